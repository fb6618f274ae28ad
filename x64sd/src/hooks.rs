use crate::cpu::CpuState;
use crate::error::Result;
use crate::memory::MemoryTrait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    /// Continue normal execution
    Continue,
    /// Stop emulation before the instruction runs
    Stop,
}

/// Callbacks invoked by the engine around instruction execution.
///
/// Every method has a no-op default. Hooks see CPU state but never a
/// partially executed instruction: read and write hooks fire before the
/// access, invalid-instruction hooks fire with state exactly as it was
/// before the opcode was tried.
pub trait HookManager<M: MemoryTrait> {
    /// Called before the instruction at `address` is fetched.
    fn on_code(&mut self, cpu: &CpuState, address: u64) -> Result<HookAction> {
        let _ = (cpu, address);
        Ok(HookAction::Continue)
    }

    /// Called after an instruction completed, with its encoded bytes.
    fn on_retired(&mut self, cpu: &CpuState, address: u64, bytes: &[u8]) -> Result<()> {
        let _ = (cpu, address, bytes);
        Ok(())
    }

    fn on_mem_read(&mut self, cpu: &CpuState, address: u64, size: usize) -> Result<()> {
        let _ = (cpu, address, size);
        Ok(())
    }

    fn on_mem_write(&mut self, cpu: &CpuState, address: u64, data: &[u8]) -> Result<()> {
        let _ = (cpu, address, data);
        Ok(())
    }

    /// Called when no opcode map recognises the bytes at `address`.
    fn on_invalid(&mut self, cpu: &CpuState, memory: &M, address: u64) -> Result<()> {
        let _ = (cpu, memory, address);
        Ok(())
    }
}

/// Default no-op hook manager that does nothing for all hook events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl<M: MemoryTrait> HookManager<M> for NoHooks {}
