use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmulatorError {
    #[error("Memory not mapped at address: {0:#x}")]
    UnmappedMemory(u64),

    #[error("Permission denied for operation at address: {0:#x}")]
    PermissionDenied(u64),

    #[error("Invalid instruction at address: {0:#x}")]
    InvalidInstruction(u64),

    #[error("Instruction bytes ran out while decoding at address: {0:#x}")]
    TruncatedInstruction(u64),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Raised by hook implementations to abort emulation.
    #[error("Hook error: {0}")]
    HookError(String),
}

pub type Result<T> = std::result::Result<T, EmulatorError>;
