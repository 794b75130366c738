use tea_core::assembler::{Assembler, CodegenError};
use tea_core::vm::{StdIo, Vm};

#[test]
fn alloc_register_reuses_freed_registers() {
    let mut assembler = Assembler::new();
    let r0 = assembler.alloc_register().expect("alloc");
    let r1 = assembler.alloc_register().expect("alloc");
    assert_ne!(r0, r1);
    assembler.free_register(r0);
    let r2 = assembler.alloc_register().expect("alloc");
    assert_eq!(r0, r2);
}

#[test]
fn exhausting_all_registers_is_reported_not_fatal() {
    let mut assembler = Assembler::new();
    let mut allocated = Vec::new();
    loop {
        match assembler.alloc_register() {
            Ok(reg) => allocated.push(reg),
            Err(CodegenError::RegistersExhausted) => break,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert!(!allocated.is_empty());
}

#[test]
fn an_unbound_label_fails_at_finish_not_at_emit_time() {
    let mut assembler = Assembler::new();
    let label = assembler.create_label();
    assembler.emit_jump(label);
    let err = assembler.try_finish().unwrap_err();
    assert!(matches!(err, CodegenError::UnboundLabel(_)));
}

#[test]
fn static_data_offsets_stay_stable_as_more_data_is_appended() {
    let mut assembler = Assembler::new();
    let first = assembler.add_static_data(b"first\0");
    let second = assembler.add_static_data(b"second\0");
    // Later additions are prepended, so the earliest datum keeps the
    // smallest (least negative) offset from the end of the buffer.
    assert!(first > second);
}

#[test]
fn a_hand_assembled_loop_runs_to_the_expected_exit_code() {
    let mut assembler = Assembler::new();
    let counter = assembler.alloc_register().unwrap();
    let limit = assembler.alloc_register().unwrap();
    let one = assembler.alloc_register().unwrap();

    assembler.emit_load_immediate(counter, 0);
    assembler.emit_load_immediate(limit, 5);
    assembler.emit_load_immediate(one, 1);

    let loop_start = assembler.create_label();
    let loop_end = assembler.create_label();
    assembler.bind_label(loop_start);
    assembler.emit_compare_int_u(counter, limit);
    assembler.emit_jump_if_greater_equal(loop_end);
    assembler.emit_add_int(counter, counter, one);
    assembler.emit_jump(loop_start);
    assembler.bind_label(loop_end);
    assembler.emit_mov_to_accumulator0(counter);
    assembler.emit_halt();

    let (program, static_data) = assembler.try_finish().expect("finish");
    let mut vm = Vm::new(program, static_data);
    let mut io = StdIo;
    let exit_code = vm.run(&mut io).expect("run");
    // Halt takes its exit code from accumulator0, which holds `counter`
    // once the loop's back-edge jump has resolved correctly.
    assert_eq!(exit_code, 5);
}
