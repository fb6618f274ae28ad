pub mod cpu;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod flags;
pub mod hooks;
pub mod memory;
pub mod modrm;
pub mod opcode_map;
pub mod xmm;

pub use cpu::{CpuState, Flags, Mxcsr, Register, RoundingMode};
pub use cursor::{InstructionCursor, Prefixes, RexPrefix};
pub use engine::{Engine, EngineConfig, ExecutionContext};
pub use error::{EmulatorError, Result};
pub use flags::{Condition, LazyFlags};
pub use hooks::{HookAction, HookManager, NoHooks};
pub use memory::{MemoryRegion, MemoryTrait, OwnedMemory, Permission};
pub use modrm::Operand;
pub use opcode_map::{MapStatus, ScalarDoubleOp, execute_scalar_double};
pub use xmm::Xmm;
