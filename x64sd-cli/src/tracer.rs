use colored::*;
use iced_x86::{Decoder, DecoderOptions, Formatter, FormatterOutput, FormatterTextKind, Instruction, IntelFormatter};
use tracing::warn;
use x64sd::{CpuState, HookManager, MemoryTrait, OwnedMemory, Register, Result};

struct ColorFormatterOutput {
    result: String,
}

impl FormatterOutput for ColorFormatterOutput {
    fn write(&mut self, text: &str, kind: FormatterTextKind) {
        let colored_text = match kind {
            FormatterTextKind::Directive | FormatterTextKind::Keyword => text.bright_yellow(),
            FormatterTextKind::Prefix | FormatterTextKind::Mnemonic => text.red().bold(),
            FormatterTextKind::Register => text.bright_green(),
            FormatterTextKind::Number => text.bright_cyan(),
            _ => text.normal(),
        };
        self.result.push_str(&colored_text.to_string());
    }
}

/// Prints every retired instruction with its disassembly when enabled.
pub struct InstructionTracer {
    formatter: IntelFormatter,
    output: ColorFormatterOutput,
    enabled: bool,
    instruction_count: u64,
}

impl InstructionTracer {
    pub fn new(enabled: bool) -> Self {
        Self {
            formatter: IntelFormatter::new(),
            output: ColorFormatterOutput {
                result: String::new(),
            },
            enabled,
            instruction_count: 0,
        }
    }

    fn disassemble(&mut self, address: u64, bytes: &[u8]) -> &str {
        let mut decoder = Decoder::with_ip(64, bytes, address, DecoderOptions::NONE);
        let mut instruction = Instruction::default();
        decoder.decode_out(&mut instruction);

        self.output.result.clear();
        self.formatter.format(&instruction, &mut self.output);
        &self.output.result
    }
}

impl HookManager<OwnedMemory> for InstructionTracer {
    fn on_retired(&mut self, cpu: &CpuState, address: u64, bytes: &[u8]) -> Result<()> {
        self.instruction_count += 1;
        if !self.enabled {
            return Ok(());
        }

        let count = self.instruction_count;
        let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        let disasm = self.disassemble(address, bytes).to_string();
        let next = cpu.read_reg(Register::RIP);

        println!(
            "{} {}: {:<24} {} {}",
            format!("[{:06}]", count).bright_black(),
            format!("0x{:016x}", address).yellow(),
            hex,
            disasm,
            format!("-> 0x{:x}", next).bright_black(),
        );
        Ok(())
    }

    fn on_invalid(&mut self, _cpu: &CpuState, memory: &OwnedMemory, address: u64) -> Result<()> {
        let mut window = [0u8; 15];
        let len = memory.fetch_code(address, &mut window);
        let bytes: String = window[..len].iter().map(|b| format!("{:02x} ", b)).collect();
        warn!("Unhandled instruction at 0x{:x}: {}", address, bytes.trim_end());
        Ok(())
    }
}
