use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use txscript::instr::write_uvarint;
use txscript::opcode as op;
use txscript::{Envs, Value};

struct BenchCase {
    name: &'static str,
    code: Vec<u8>,
}

fn u8_lit(buf: &mut Vec<u8>, v: u8) {
    buf.push(op::UINT8);
    buf.push(v);
}

// ( 5 + 3 * 2 ) repeated across an expression block.
fn arithmetic_case() -> BenchCase {
    let mut inner = Vec::new();
    u8_lit(&mut inner, 5);
    inner.push(op::SYM_ADD);
    u8_lit(&mut inner, 3);
    inner.push(op::SYM_MUL);
    u8_lit(&mut inner, 2);

    let mut code = Vec::new();
    for _ in 0..8 {
        code.push(op::EXPR);
        code.push(inner.len() as u8);
        code.extend_from_slice(&inner);
    }
    BenchCase {
        name: "expression",
        code,
    }
}

// RANGE(64) EACH{ ${Value} PUSH } POPS(0)
fn loop_case() -> BenchCase {
    let mut body = Vec::new();
    body.push(op::LOOP_VAL);
    body.push(op::loopv::VALUE as u8);
    body.push(op::PUSH);

    let mut code = Vec::new();
    u8_lit(&mut code, 0);
    u8_lit(&mut code, 1);
    code.push(op::RANGE);
    code.extend_from_slice(&64u16.to_be_bytes());
    code.push(op::EACH);
    code.push(body.len() as u8);
    code.extend_from_slice(&body);
    code.push(op::POPS);
    code.push(0);
    BenchCase {
        name: "loop",
        code,
    }
}

// MODEL over a medium script with wildcards and a segment skip.
fn pattern_case() -> BenchCase {
    let mut target = Vec::new();
    for i in 0..24u8 {
        u8_lit(&mut target, i);
    }
    target.push(op::TRUE);

    let mut model = vec![op::WILDCARD, op::WILD_LUMP, op::TRUE];

    let mut code = Vec::new();
    code.push(op::DATA8);
    code.push(target.len() as u8);
    code.extend_from_slice(&target);
    code.push(op::MODEL);
    let word = model.len() as u16;
    code.extend_from_slice(&word.to_be_bytes());
    code.append(&mut model);
    code.push(op::PASS);
    BenchCase {
        name: "pattern",
        code,
    }
}

// BLOCK{ .. } nesting exercising the executor lifecycle.
fn block_case() -> BenchCase {
    let mut inner = Vec::new();
    u8_lit(&mut inner, 1);
    inner.push(op::PUSH);

    let mut code = inner;
    for _ in 0..12 {
        let mut outer = vec![op::BLOCK];
        write_uvarint(&mut outer, code.len() as u64);
        outer.extend_from_slice(&code);
        code = outer;
    }
    BenchCase {
        name: "nested-blocks",
        code,
    }
}

fn run_case(case: &BenchCase) -> Value {
    txscript::run_script(&[0; 10], case.code.clone(), None, Envs::new(Vec::new(), 0), 1)
        .expect("benchmark script runs")
}

pub fn execution_bench(c: &mut Criterion) {
    let cases = vec![
        arithmetic_case(),
        loop_case(),
        pattern_case(),
        block_case(),
    ];

    let mut group = c.benchmark_group("run");
    for case in &cases {
        group.bench_with_input(BenchmarkId::from_parameter(case.name), case, |b, case| {
            b.iter(|| run_case(case));
        });
    }
    group.finish();
}

criterion_group!(benches, execution_bench);
criterion_main!(benches);
