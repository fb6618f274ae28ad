use crate::HookManager;
use crate::cursor::InstructionCursor;
use crate::engine::ExecutionContext;
use crate::error::Result;
use crate::flags::Condition;
use crate::memory::MemoryTrait;
use tracing::debug;

impl<H: HookManager<M>, M: MemoryTrait> ExecutionContext<'_, H, M> {
    /// Jcc rel32. The displacement is always consumed; when taken it is added
    /// to RIP.
    pub(crate) fn execute_jcc(
        &mut self,
        cursor: &mut InstructionCursor<'_>,
        condition: Condition,
    ) -> Result<()> {
        let displacement = cursor.fetch_i32()?;
        let flags = self.cpu.materialize_flags();

        if condition.evaluate(flags) {
            debug!(?condition, displacement, "branch taken");
            self.cpu.rip = self.cpu.rip.wrapping_add(displacement as i64 as u64);
        }
        Ok(())
    }
}
