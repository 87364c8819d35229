//! End-to-end execution scenarios over the public API.

mod asm;

use asm::Asm;
use txscript::opcode as op;
use txscript::{pool, Actuator, Envs, ExecError, Value};

fn run(code: Vec<u8>) -> Result<Value, ExecError> {
    txscript::run_script(&[0; 10], code, None, Envs::new(Vec::new(), 0), 1)
}

// Runs the script and returns the final data stack, bottom first.
fn run_stack(code: Vec<u8>) -> Vec<Value> {
    let mut a = Actuator::new(&[0; 10], code, None, Envs::new(Vec::new(), 0), 1);
    txscript::script_run(&mut a).expect("script runs");
    a.stack_data()
}

fn ints(stack: &[Value]) -> Vec<i64> {
    stack
        .iter()
        .map(|v| match v {
            Value::Int(i) => *i,
            other => panic!("expected int, got {other:?}"),
        })
        .collect()
}

#[test]
fn expression_follows_operator_precedence() {
    // ( 5 + 3 * 2 ) = 11
    let inner = Asm::new()
        .int(5)
        .op(op::SYM_ADD)
        .int(3)
        .op(op::SYM_MUL)
        .int(2);
    let stack = run_stack(Asm::new().block(op::EXPR, inner).build());
    assert_eq!(stack, vec![Value::Float(11.0)]);
}

#[test]
fn nested_expression_groups_first() {
    // ( ( 5 + 3 ) * 2 ) = 16
    let group = Asm::new().int(5).op(op::SYM_ADD).int(3);
    let outer = Asm::new()
        .block(op::EXPR, group)
        .op(op::SYM_MUL)
        .int(2);
    let stack = run_stack(Asm::new().block(op::EXPR, outer).build());
    assert_eq!(stack, vec![Value::Float(16.0)]);
}

#[test]
fn unary_minus_binds_tighter_than_binary() {
    // ( -5 + 3 ) = -2
    let inner = Asm::new()
        .op(op::SYM_SUB)
        .int(5)
        .op(op::SYM_ADD)
        .int(3);
    let stack = run_stack(Asm::new().block(op::EXPR, inner).build());
    assert_eq!(stack, vec![Value::Float(-2.0)]);
}

#[test]
fn conditional_takes_the_true_branch() {
    let code = Asm::new()
        .op(op::TRUE)
        .block(op::IF, Asm::new().int(7).op(op::PUSH))
        .block(op::ELSE, Asm::new().int(9).op(op::PUSH))
        .build();
    assert_eq!(ints(&run_stack(code)), vec![7]);
}

#[test]
fn conditional_takes_the_else_branch() {
    let code = Asm::new()
        .op(op::FALSE)
        .block(op::IF, Asm::new().int(7).op(op::PUSH))
        .block(op::ELSE, Asm::new().int(9).op(op::PUSH))
        .build();
    assert_eq!(ints(&run_stack(code)), vec![9]);
}

#[test]
fn each_iterates_a_range() {
    // RANGE(start=0, step=1, size=3) EACH{ ${Value} PUSH }
    let code = Asm::new()
        .int(0)
        .int(1)
        .arg2(op::RANGE, 3)
        .block(
            op::EACH,
            Asm::new().loop_val(op::loopv::VALUE as u8).op(op::PUSH),
        )
        .build();
    assert_eq!(ints(&run_stack(code)), vec![0, 1, 2]);
}

#[test]
fn each_break_stops_the_loop() {
    // Push each value; break once the value equals 2.
    let body = Asm::new()
        .loop_val(op::loopv::VALUE as u8)
        .op(op::PUSH)
        .arg1(op::CLONE, 1)
        .int(2)
        .op(op::EQUAL)
        .block(op::IF, Asm::new().op(op::BREAK));
    let code = Asm::new()
        .int(0)
        .int(1)
        .arg2(op::RANGE, 5)
        .block(op::EACH, body)
        .build();
    assert_eq!(ints(&run_stack(code)), vec![0, 1, 2]);
}

#[test]
fn loop_variables_expose_key_and_size() {
    // Sum keys and sizes: for [9, 9] pushes keys 0,1 and size 2 twice.
    let body = Asm::new()
        .loop_val(op::loopv::KEY as u8)
        .op(op::PUSH)
        .loop_val(op::loopv::SIZE as u8)
        .op(op::PUSH);
    let code = Asm::new()
        .int(9)
        .int(9)
        .arg1(op::POPS, 2)
        .block(op::EACH, body)
        .build();
    assert_eq!(ints(&run_stack(code)), vec![0, 2, 1, 2]);
}

#[test]
fn block_exit_yields_the_payload() {
    let code = Asm::new()
        .varblock(op::BLOCK, Asm::new().op(op::CAPTURE).int(1).op(op::EXIT))
        .build();
    assert_eq!(run(code).unwrap(), Value::Int(1));
}

#[test]
fn return_escaping_a_block_is_a_shape_error() {
    let code = Asm::new()
        .varblock(op::BLOCK, Asm::new().int(1).op(op::RETURN))
        .build();
    assert_eq!(run(code), Err(ExecError::StrayReturn));
}

#[test]
fn exit_spreads_multiple_values() {
    let code = Asm::new()
        .op(op::CAPTURE)
        .int(1)
        .op(op::CAPTURE)
        .int(2)
        .op(op::EXIT)
        .build();
    // Both captures land in the args region; EXIT packs them.
    assert_eq!(
        run(code).unwrap(),
        Value::List(vec![Value::Int(1), Value::Int(2)])
    );
}

#[test]
fn pass_false_invalidates_the_script() {
    let code = Asm::new().op(op::FALSE).op(op::PASS).build();
    assert_eq!(run(code), Err(ExecError::NotPass));
    let code = Asm::new().op(op::TRUE).op(op::PASS).build();
    assert!(run(code).is_ok());
}

#[test]
fn the_257th_stack_value_is_fatal() {
    let mut a = Asm::new();
    for _ in 0..257 {
        a = a.int(1);
    }
    assert!(matches!(run(a.build()), Err(ExecError::StackOverflow(_))));
}

#[test]
fn pop_on_an_empty_stack_is_fatal() {
    let code = Asm::new().op(op::POP).build();
    assert_eq!(run(code), Err(ExecError::StackUnderflow));
}

#[test]
fn input_without_prefill_is_fatal() {
    let code = Asm::new().arg1(op::INPUT, 1).op(op::PUSH).build();
    assert!(matches!(run(code), Err(ExecError::InputShort { .. })));
}

#[test]
fn input_drains_the_prefilled_buffer() {
    let code = Asm::new().arg1(op::INPUT, 0).op(op::PUSH).build();
    let mut a = Actuator::new(&[0; 10], code, None, Envs::new(Vec::new(), 0), 1);
    a.input(vec![Value::Int(4), Value::Int(5)]);
    txscript::script_run(&mut a).unwrap();
    assert_eq!(ints(&a.stack_data()), vec![4, 5]);
}

#[test]
fn the_fourth_goto_is_fatal() {
    // Script at (600_000, 0, 0) keeps jumping to itself.
    pool::insert(600_000, 0, 0, Asm::new().goto(600_000, 0, 0).build());
    let code = Asm::new().goto(600_000, 0, 0).build();
    assert_eq!(run(code), Err(ExecError::GotoLimit));
}

#[test]
fn the_tenth_jump_is_fatal() {
    pool::insert(600_001, 0, 0, Asm::new().op(op::NOP).build());
    let mut nine = Asm::new();
    for _ in 0..9 {
        nine = nine.jump(600_001, 0, 0);
    }
    assert!(run(nine.clone().build()).is_ok());
    assert_eq!(run(nine.jump(600_001, 0, 0).build()), Err(ExecError::JumpLimit));
}

#[test]
fn goto_runs_the_target_on_a_fresh_stack() {
    // The target exits with its own stack top; caller arguments seed it.
    pool::insert(
        600_002,
        0,
        0,
        Asm::new().op(op::CAPTURE).op(op::POP).op(op::EXIT).build(),
    );
    let code = Asm::new()
        .op(op::CAPTURE)
        .int(77)
        .goto(600_002, 0, 0)
        .build();
    assert_eq!(run(code).unwrap(), Value::Int(77));
}

#[test]
fn missing_goto_target_is_fatal() {
    let code = Asm::new().goto(600_999, 9, 9).build();
    assert_eq!(
        run(code),
        Err(ExecError::ScriptUnavailable(600_999, 9, 9))
    );
}

#[test]
fn switch_runs_the_matching_case() {
    let body = Asm::new()
        .block(op::CASE, Asm::new().int(10).op(op::PUSH))
        .block(op::CASE, Asm::new().int(20).op(op::PUSH))
        .block(op::DEFAULT, Asm::new().int(99).op(op::PUSH));
    let code = Asm::new()
        .int(2)
        .int(1)
        .int(2)
        .arg1(op::POPS, 2)
        .varblock(op::SWITCH, body)
        .build();
    assert_eq!(ints(&run_stack(code)), vec![20]);
}

#[test]
fn switch_falls_back_to_default() {
    let body = Asm::new()
        .block(op::CASE, Asm::new().int(10).op(op::PUSH))
        .block(op::DEFAULT, Asm::new().int(99).op(op::PUSH));
    let code = Asm::new()
        .int(7)
        .int(1)
        .arg1(op::POPS, 1)
        .varblock(op::SWITCH, body)
        .build();
    assert_eq!(ints(&run_stack(code)), vec![99]);
}

#[test]
fn fallthrough_reaches_the_next_case() {
    let body = Asm::new()
        .block(
            op::CASE,
            Asm::new().int(10).op(op::PUSH).op(op::FALLTHROUGH),
        )
        .block(op::CASE, Asm::new().int(20).op(op::PUSH));
    let code = Asm::new()
        .int(1)
        .int(1)
        .int(2)
        .arg1(op::POPS, 2)
        .varblock(op::SWITCH, body)
        .build();
    assert_eq!(ints(&run_stack(code)), vec![10, 20]);
}

#[test]
fn map_collects_returned_values() {
    let body = Asm::new().loop_val(op::loopv::VALUE as u8).op(op::RETURN);
    let code = Asm::new()
        .int(1)
        .int(2)
        .int(3)
        .op(op::CAPTURE)
        .arg1(op::POPS, 3)
        .block(op::MAP, body)
        .build();
    let stack = run_stack(code);
    assert_eq!(
        stack,
        vec![Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])]
    );
}

#[test]
fn filter_keeps_matching_elements() {
    // Keep values greater than 1.
    let body = Asm::new()
        .loop_val(op::loopv::VALUE as u8)
        .op(op::PUSH)
        .int(1)
        .op(op::GT)
        .op(op::RETURN);
    let code = Asm::new()
        .int(1)
        .int(2)
        .int(3)
        .op(op::CAPTURE)
        .arg1(op::POPS, 3)
        .block(op::FILTER, body)
        .build();
    let stack = run_stack(code);
    assert_eq!(
        stack,
        vec![Value::List(vec![Value::Int(2), Value::Int(3)])]
    );
}

#[test]
fn dup_returns_exactly_n_copies() {
    let code = Asm::new().int(7).arg1(op::DUP, 3).build();
    assert_eq!(ints(&run_stack(code)), vec![7, 7, 7]);
}

#[test]
fn scope_chain_routes_values() {
    // `$` stores into the scope, `$(0)` reads it back into the args
    // region, PUSH moves it to the stack.
    let code = Asm::new()
        .op(op::SCOPE_PUT)
        .int(5)
        .scope_val(0)
        .op(op::PUSH)
        .build();
    assert_eq!(ints(&run_stack(code)), vec![5]);
}

#[test]
fn bring_takes_arguments_from_the_stack() {
    // `~` forces stack acquisition even though the args region has data.
    let code = Asm::new()
        .int(6)
        .op(op::CAPTURE)
        .int(9)
        .op(op::BRING)
        .arg1(op::DUP, 1)
        .op(op::PUSH)
        .build();
    // DUP duplicated the stack value 6; args region still holds 9.
    assert_eq!(ints(&run_stack(code)), vec![6, 9]);
}

#[test]
fn arithmetic_promotes_to_float() {
    let code = Asm::new().int(5).int(3).op(op::MUL).build();
    assert_eq!(run_stack(code), vec![Value::Float(15.0)]);
}

#[test]
fn add_concatenates_strings_and_bytes() {
    let code = Asm::new().text("ab").text("cd").op(op::ADD).build();
    assert_eq!(run_stack(code), vec![Value::Str("abcd".into())]);

    let code = Asm::new()
        .data(&[1, 2])
        .data(&[3])
        .op(op::ADD)
        .build();
    assert_eq!(run_stack(code), vec![Value::Bytes(vec![1, 2, 3])]);
}

#[test]
fn divmod_spreads_quotient_and_remainder() {
    let code = Asm::new().int(17).int(5).op(op::DIVMOD).build();
    assert_eq!(ints(&run_stack(code)), vec![3, 2]);
}

#[test]
fn left_shift_beyond_63_is_fatal() {
    let code = Asm::new().int(1).int(64).op(op::LMOV).build();
    assert_eq!(run(code), Err(ExecError::ShiftTooWide(64)));
}

#[test]
fn reverse_twice_is_identity() {
    let code = Asm::new()
        .data(&[1, 2, 3])
        .op(op::REVERSE)
        .op(op::REVERSE)
        .build();
    assert_eq!(run_stack(code), vec![Value::Bytes(vec![1, 2, 3])]);
}

#[test]
fn anys_roundtrip_preserves_bytes() {
    let code = Asm::new()
        .data(&[4, 5, 6])
        .arg1(op::ANYS, op::item::ANY as u8)
        .arg1(op::ANYS, op::item::BYTE as u8)
        .build();
    assert_eq!(run_stack(code), vec![Value::Bytes(vec![4, 5, 6])]);
}

#[test]
fn dict_keyval_roundtrip() {
    // DICT(keys, values), split with KEYVAL, rebuild, compare contents.
    let build_dict = Asm::new()
        .text("a")
        .text("b")
        .arg1(op::POPS, 2)
        .int(1)
        .int(2)
        .arg1(op::POPS, 2)
        .op(op::DICT);
    let code = build_dict
        .arg1(op::KEYVAL, op::keyval::BOTH as u8)
        .op(op::DICT)
        .build();

    let stack = run_stack(code);
    let Value::Dict(d) = &stack[0] else {
        panic!("expected a dict")
    };
    let d = d.lock();
    assert_eq!(d.len(), 2);
    // Key/value pairing survives the split; order does not matter.
    let a = d.get("a").unwrap();
    let b = d.get("b").unwrap();
    assert!(matches!((a, b), (Value::Int(_), Value::Int(_))));
    assert_ne!(a, b);
}

#[test]
fn substr_by_character_count() {
    let code = Asm::new().text("héllo").int(0).arg2(op::SUBSTR, 5).build();
    assert_eq!(run_stack(code), vec![Value::Str("héllo".into())]);

    let code = Asm::new().text("héllo").int(-2).arg2(op::SUBSTR, 2).build();
    assert_eq!(run_stack(code), vec![Value::Str("lo".into())]);
}

#[test]
fn eval_returns_the_private_stack() {
    let inner = Asm::new().int(1).int(2);
    let code = Asm::new().code(inner).op(op::EVAL).build();
    assert_eq!(
        run_stack(code),
        vec![Value::List(vec![Value::Int(1), Value::Int(2)])]
    );
}

#[test]
fn globals_are_set_and_read_back() {
    let code = Asm::new()
        .op(op::CAPTURE)
        .int(9)
        .arg1(op::SETVAR, 3)
        .arg1(op::VAR, 3)
        .build();
    assert_eq!(ints(&run_stack(code)), vec![9]);
}

#[test]
fn env_reports_jump_counters() {
    let code = Asm::new().arg1(op::ENV, op::env::GOTOS as u8).build();
    assert_eq!(ints(&run_stack(code)), vec![0]);
}

#[test]
fn source_slices_follow_the_null_point() {
    let code = Asm::new()
        .int(1)
        .op(op::PUSH)
        .op(op::SYS_NULL)
        .source(op::source::PAST_FROM_NULL as i8)
        .build();
    let stack = run_stack(code.clone());
    // After SYS_NULL only the SOURCE instruction itself has executed.
    let expect = &code[code.len() - 2..];
    assert_eq!(stack.last(), Some(&Value::Bytes(expect.to_vec())));
}

#[test]
fn source_all_returns_the_whole_script() {
    let code = Asm::new().source(op::source::ALL as i8).build();
    assert_eq!(
        run_stack(code.clone()),
        vec![Value::Bytes(code)]
    );
}

#[test]
fn bufdump_emits_the_output_buffer() {
    let (tx, rx) = crossbeam_channel::unbounded();
    let code = Asm::new()
        .op(op::CAPTURE)
        .int(42)
        .op(op::OUTPUT)
        .arg1(op::BUFDUMP, 7)
        .build();
    txscript::run_script(&[1; 10], code.clone(), Some(tx), Envs::new(Vec::new(), 0), 1)
        .unwrap();

    let record = rx.try_recv().expect("one record");
    assert_eq!(record.id, vec![1; 10]);
    assert_eq!(record.n, 7);
    assert_eq!(record.code, code);
    assert_eq!(record.data, vec![Value::Int(42)]);
}

#[test]
fn bufdump_without_output_stays_silent() {
    let (tx, rx) = crossbeam_channel::unbounded();
    let code = Asm::new().arg1(op::BUFDUMP, 1).build();
    txscript::run_script(&[1; 10], code, Some(tx), Envs::new(Vec::new(), 0), 1).unwrap();
    assert!(rx.try_recv().is_err());
}

#[test]
fn model_instruction_reports_the_outcome() {
    // Target `Uint8(9)` against model `_`.
    let target = Asm::new().int(9).build();
    let code = Asm::new()
        .data(&target)
        .model(false, Asm::new().op(op::WILDCARD))
        .build();
    assert_eq!(run_stack(code), vec![Value::Bool(true)]);
}

#[test]
fn model_capture_failure_is_fatal() {
    let target = Asm::new().int(9).build();
    let code = Asm::new()
        .data(&target)
        .model(true, Asm::new().op(op::FALSE))
        .build();
    assert_eq!(run(code), Err(ExecError::ModelFailure));
}

#[test]
fn continue_with_false_guard_is_ignored() {
    // CONTINUE(false) must not end the iteration.
    let body = Asm::new()
        .op(op::CAPTURE)
        .op(op::FALSE)
        .op(op::CONTINUE)
        .loop_val(op::loopv::VALUE as u8)
        .op(op::PUSH);
    let code = Asm::new()
        .int(0)
        .int(1)
        .arg2(op::RANGE, 2)
        .block(op::EACH, body)
        .build();
    assert_eq!(ints(&run_stack(code)), vec![0, 1]);
}

#[test]
fn stray_break_at_top_level_is_a_shape_error() {
    let code = Asm::new().op(op::BREAK).build();
    assert_eq!(run(code), Err(ExecError::StrayBreak));
}
