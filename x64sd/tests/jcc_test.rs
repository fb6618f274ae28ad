use x64sd::flags::FlagSize;
use x64sd::{Engine, Flags, LazyFlags, MemoryTrait as _, Permission, Register};

const CODE: u64 = 0x1000;

fn engine_with(code: &[u8]) -> Engine {
    let mut engine = Engine::new();
    engine.memory.map(CODE, 0x1000, Permission::READ | Permission::EXEC).unwrap();
    engine.memory.write_code(CODE, code).unwrap();
    engine
}

#[test]
fn test_jb_taken_is_relative_to_next_instruction() {
    let code = [
        0xF2, 0x0F, 0x82, 0x10, 0x00, 0x00, 0x00, // bnd jb +0x10
    ];
    let mut engine = engine_with(&code);
    engine.reg_write(Register::RFLAGS, Flags::CF.bits());

    engine.emu_start(CODE, 0, 1).unwrap();

    assert_eq!(engine.reg_read(Register::RIP), CODE + 7 + 0x10);
}

#[test]
fn test_jb_not_taken_consumes_displacement() {
    let code = [
        0xF2, 0x0F, 0x82, 0x10, 0x00, 0x00, 0x00, // bnd jb +0x10
    ];
    let mut engine = engine_with(&code);

    engine.emu_start(CODE, 0, 1).unwrap();

    assert_eq!(engine.reg_read(Register::RIP), CODE + 7);
    assert_eq!(engine.instruction_count(), 1);
}

#[test]
fn test_backward_branch() {
    let code = [
        0xF2, 0x0F, 0x85, 0xF9, 0xFF, 0xFF, 0xFF, // bnd jne -7
    ];
    let mut engine = engine_with(&code);

    engine.emu_start(CODE, 0, 3).unwrap();

    // Loops on itself while ZF is clear
    assert_eq!(engine.reg_read(Register::RIP), CODE);
    assert_eq!(engine.instruction_count(), 3);
}

#[test]
fn test_pending_flags_are_materialized() {
    let code = [
        0xF2, 0x0F, 0x84, 0x00, 0x01, 0x00, 0x00, // bnd je +0x100
    ];
    let mut engine = engine_with(&code);
    // 5 - 5 leaves ZF set once computed
    engine.cpu.set_lazy_flags(LazyFlags::sub(FlagSize::QWord, 5, 5));

    engine.emu_start(CODE, 0, 1).unwrap();

    assert_eq!(engine.reg_read(Register::RIP), CODE + 7 + 0x100);
    assert!(!engine.cpu.lazy_flags.is_pending());
    assert!(engine.cpu.rflags.contains(Flags::ZF));
}

#[test]
fn test_every_condition_code() {
    // (opcode, flags, taken)
    let cases = [
        (0x80, Flags::OF, true),
        (0x81, Flags::OF, false),
        (0x86, Flags::ZF, true),
        (0x87, Flags::empty(), true),
        (0x87, Flags::CF, false),
        (0x88, Flags::SF, true),
        (0x8A, Flags::PF, true),
        (0x8B, Flags::PF, false),
        (0x8C, Flags::SF, true),
        (0x8C, Flags::SF | Flags::OF, false),
        (0x8D, Flags::SF | Flags::OF, true),
        (0x8E, Flags::ZF, true),
        (0x8F, Flags::empty(), true),
        (0x8F, Flags::OF, false),
    ];
    for (opcode, flags, taken) in cases {
        let code = [0xF2, 0x0F, opcode, 0x20, 0x00, 0x00, 0x00];
        let mut engine = engine_with(&code);
        engine.reg_write(Register::RFLAGS, flags.bits());

        engine.emu_start(CODE, 0, 1).unwrap();

        let expected = if taken { CODE + 7 + 0x20 } else { CODE + 7 };
        assert_eq!(engine.reg_read(Register::RIP), expected, "opcode {opcode:#x} flags {flags:?}");
    }
}
