use x64sd::{Engine, MemoryTrait as _, Permission, Register, Xmm};

const CODE: u64 = 0x1000;
const DATA: u64 = 0x2000;

fn engine_with(code: &[u8]) -> Engine {
    let mut engine = Engine::new();
    engine.memory.map(CODE, 0x1000, Permission::READ | Permission::EXEC).unwrap();
    engine.memory.map(DATA, 0x1000, Permission::READ | Permission::WRITE).unwrap();
    engine.memory.write_code(CODE, code).unwrap();
    engine
}

fn run(engine: &mut Engine, code_len: usize) {
    if let Err(e) = engine.emu_start(CODE, CODE + code_len as u64, 0) {
        panic!("Execution failed: {:?}", e);
    }
}

#[test]
fn test_movsd_register_keeps_high_lane() {
    let code = [
        0xF2, 0x0F, 0x10, 0xC1, // movsd xmm0, xmm1
    ];
    let mut engine = engine_with(&code);
    engine.xmm_write(Register::XMM0, Xmm::from_f64s(1.0, 2.0));
    engine.xmm_write(Register::XMM1, Xmm::from_f64s(3.0, 4.0));

    run(&mut engine, code.len());

    assert_eq!(engine.xmm_read(Register::XMM0), Xmm::from_f64s(3.0, 2.0));
    assert_eq!(engine.reg_read(Register::RIP), CODE + 4);
}

#[test]
fn test_movsd_memory_clears_high_lane() {
    let code = [
        0xF2, 0x0F, 0x10, 0x00, // movsd xmm0, [rax]
    ];
    let mut engine = engine_with(&code);
    engine.memory.write_u64(DATA, 3.0f64.to_bits()).unwrap();
    engine.memory.write_u64(DATA + 8, 0xFFFF_FFFF_FFFF_FFFF).unwrap();
    engine.reg_write(Register::RAX, DATA);
    engine.xmm_write(Register::XMM0, Xmm::from_f64s(1.0, 2.0));

    run(&mut engine, code.len());

    assert_eq!(engine.xmm_read(Register::XMM0), Xmm::from_f64s(3.0, 0.0));
}

#[test]
fn test_movsd_rip_relative_load() {
    let code = [
        0xF2, 0x0F, 0x10, 0x15, 0xF8, 0x0F, 0x00, 0x00, // movsd xmm2, [rip + 0xFF8]
    ];
    let mut engine = engine_with(&code);
    // 0x1008 + 0xFF8 = 0x2000
    engine.memory.write_u64(DATA, 0.5f64.to_bits()).unwrap();

    run(&mut engine, code.len());

    assert_eq!(engine.xmm_read(Register::XMM2).f64(0), 0.5);
}

#[test]
fn test_movsd_store_writes_eight_bytes() {
    let code = [
        0xF2, 0x0F, 0x11, 0x08, // movsd [rax], xmm1
    ];
    let mut engine = engine_with(&code);
    engine.memory.write_u64(DATA + 8, 0x1122_3344_5566_7788).unwrap();
    engine.reg_write(Register::RAX, DATA);
    engine.xmm_write(Register::XMM1, Xmm::from_f64s(-6.5, 99.0));

    run(&mut engine, code.len());

    assert_eq!(engine.memory.read_u64(DATA).unwrap(), (-6.5f64).to_bits());
    assert_eq!(engine.memory.read_u64(DATA + 8).unwrap(), 0x1122_3344_5566_7788);
}

#[test]
fn test_movsd_store_register_form() {
    let code = [
        0xF2, 0x0F, 0x11, 0xCA, // movsd xmm2, xmm1
    ];
    let mut engine = engine_with(&code);
    engine.xmm_write(Register::XMM1, Xmm::from_f64s(8.0, 9.0));
    engine.xmm_write(Register::XMM2, Xmm::from_f64s(1.0, 2.0));

    run(&mut engine, code.len());

    assert_eq!(engine.xmm_read(Register::XMM2), Xmm::from_f64s(8.0, 2.0));
}

#[test]
fn test_movddup() {
    let code = [
        0xF2, 0x0F, 0x12, 0xC1, // movddup xmm0, xmm1
        0xF2, 0x0F, 0x12, 0x13, // movddup xmm2, [rbx]
    ];
    let mut engine = engine_with(&code);
    engine.xmm_write(Register::XMM1, Xmm::from_f64s(1.25, 7.0));
    engine.memory.write_u64(DATA, 42.0f64.to_bits()).unwrap();
    engine.reg_write(Register::RBX, DATA);

    run(&mut engine, code.len());

    assert_eq!(engine.xmm_read(Register::XMM0), Xmm::from_f64s(1.25, 1.25));
    assert_eq!(engine.xmm_read(Register::XMM2), Xmm::from_f64s(42.0, 42.0));
}

#[test]
fn test_arithmetic_touches_only_low_lane() {
    let pairs = [(4.0, 3.0), (-1.5, 0.25), (1e300, 1e-300), (0.1, 0.2)];

    for opcode in [0x58u8, 0x5C, 0x59, 0x5E] {
        for (a, b) in pairs {
            let expected: f64 = match opcode {
                0x58 => a + b,
                0x5C => a - b,
                0x59 => a * b,
                _ => a / b,
            };
            let code = [0xF2, 0x0F, opcode, 0xC1]; // op xmm0, xmm1
            let mut engine = engine_with(&code);
            let high = Xmm::from_u64s(0, 0xAABB_CCDD_EEFF_1234);
            let mut dst = high;
            dst.set_f64(0, a);
            engine.xmm_write(Register::XMM0, dst);
            engine.xmm_write(Register::XMM1, Xmm::from_f64s(b, f64::NAN));

            run(&mut engine, code.len());

            let result = engine.xmm_read(Register::XMM0);
            assert_eq!(result.f64(0).to_bits(), expected.to_bits(), "opcode {opcode:#x}");
            assert_eq!(result.u64(1), 0xAABB_CCDD_EEFF_1234);
        }
    }
}

#[test]
fn test_addsd_extended_registers() {
    let code = [
        0xF2, 0x45, 0x0F, 0x58, 0xCA, // addsd xmm9, xmm10
    ];
    let mut engine = engine_with(&code);
    engine.xmm_write(Register::XMM9, Xmm::from_f64s(1.0, 5.0));
    engine.xmm_write(Register::XMM10, Xmm::from_f64s(2.0, 6.0));

    run(&mut engine, code.len());

    assert_eq!(engine.xmm_read(Register::XMM9), Xmm::from_f64s(3.0, 5.0));
}

#[test]
fn test_addsd_memory_operand() {
    let code = [
        0xF2, 0x0F, 0x58, 0x44, 0x24, 0x08, // addsd xmm0, [rsp + 8]
    ];
    let mut engine = engine_with(&code);
    engine.reg_write(Register::RSP, DATA);
    engine.memory.write_u64(DATA + 8, 0.5f64.to_bits()).unwrap();
    engine.xmm_write(Register::XMM0, Xmm::from_f64s(2.0, 0.0));

    run(&mut engine, code.len());

    assert_eq!(engine.xmm_read(Register::XMM0).f64(0), 2.5);
}

#[test]
fn test_mulsd_infinity_times_zero_is_negative_nan() {
    let cases = [(f64::INFINITY, 0.0), (0.0, f64::NEG_INFINITY), (-0.0, f64::INFINITY)];
    for (a, b) in cases {
        let code = [
            0xF2, 0x0F, 0x59, 0xC1, // mulsd xmm0, xmm1
        ];
        let mut engine = engine_with(&code);
        engine.xmm_write(Register::XMM0, Xmm::from_f64s(a, 1.0));
        engine.xmm_write(Register::XMM1, Xmm::from_f64s(b, 1.0));

        run(&mut engine, code.len());

        let result = engine.xmm_read(Register::XMM0);
        assert_eq!(result.u64(0), 0xFFF8_0000_0000_0000);
        assert!(result.f64(0).is_nan() && result.f64(0).is_sign_negative());
        assert_eq!(result.f64(1), 1.0);
    }
}

#[test]
fn test_sqrtsd() {
    let cases: [(f64, u64); 4] = [
        (16.0, 4.0f64.to_bits()),
        (-0.0, (-0.0f64).to_bits()),
        (-4.0, 0xFFF8_0000_0000_0000),
        (f64::NEG_INFINITY, 0xFFF8_0000_0000_0000),
    ];
    for (input, expected) in cases {
        let code = [
            0xF2, 0x0F, 0x51, 0xC1, // sqrtsd xmm0, xmm1
        ];
        let mut engine = engine_with(&code);
        engine.xmm_write(Register::XMM0, Xmm::from_f64s(123.0, 321.0));
        engine.xmm_write(Register::XMM1, Xmm::from_f64s(input, 0.0));

        run(&mut engine, code.len());

        let result = engine.xmm_read(Register::XMM0);
        assert_eq!(result.u64(0), expected, "sqrt({input})");
        assert_eq!(result.f64(1), 321.0);
    }
}

#[test]
fn test_minsd_maxsd_second_operand_wins() {
    // (opcode, dst, src, expected)
    let cases = [
        (0x5D, 1.0, 2.0, 1.0),
        (0x5D, 2.0, 1.0, 1.0),
        (0x5D, f64::NAN, 1.0, 1.0),
        (0x5D, 0.0, -0.0, 0.0),
        (0x5F, 1.0, 2.0, 2.0),
        (0x5F, 2.0, 1.0, 2.0),
        (0x5F, f64::NAN, 3.0, 3.0),
    ];
    for (opcode, dst, src, expected) in cases {
        let code = [0xF2, 0x0F, opcode, 0xC1]; // minsd/maxsd xmm0, xmm1
        let mut engine = engine_with(&code);
        engine.xmm_write(Register::XMM0, Xmm::from_f64s(dst, 5.0));
        engine.xmm_write(Register::XMM1, Xmm::from_f64s(src, 6.0));

        run(&mut engine, code.len());

        let result = engine.xmm_read(Register::XMM0);
        assert_eq!(result.f64(0).to_bits(), f64::to_bits(expected));
        assert_eq!(result.f64(1), 5.0);
    }

    // A NaN source is copied through as well
    let code = [0xF2, 0x0F, 0x5D, 0xC1];
    let mut engine = engine_with(&code);
    engine.xmm_write(Register::XMM0, Xmm::from_f64s(1.0, 0.0));
    engine.xmm_write(Register::XMM1, Xmm::from_u64s(0x7FF8_0000_0000_0001, 0));
    run(&mut engine, code.len());
    assert_eq!(engine.xmm_read(Register::XMM0).u64(0), 0x7FF8_0000_0000_0001);
}

#[test]
fn test_cvtsd2ss_writes_first_single_lane() {
    let code = [
        0xF2, 0x0F, 0x5A, 0xC1, // cvtsd2ss xmm0, xmm1
    ];
    let mut engine = engine_with(&code);
    engine.xmm_write(Register::XMM0, Xmm::from_u64s(0x1111_2222_3333_4444, 0x5555_6666_7777_8888));
    engine.xmm_write(Register::XMM1, Xmm::from_f64s(1.5, 0.0));

    run(&mut engine, code.len());

    let result = engine.xmm_read(Register::XMM0);
    assert_eq!(result.f32(0), 1.5);
    assert_eq!(result.u32(1), 0x1111_2222);
    assert_eq!(result.u64(1), 0x5555_6666_7777_8888);
}
