//! Instruction implementations, the dispatch table and the unwind
//! envelopes.
//!
//! Every handler's first action reverts the capture-chain state unless the
//! handler exists to set it. The dispatcher advances the offset past the
//! whole instruction before invoking the handler, so a fault can never
//! re-execute the faulting instruction.

use std::sync::Arc;

use chrono::{Datelike, TimeZone, Timelike, Utc};
use num_bigint::{BigInt, RandBigInt};
use once_cell::sync::Lazy;
use rand::rngs::{OsRng, StdRng};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use sha3::{Sha3_224, Sha3_256, Sha3_384, Sha3_512};
use tracing::{debug, trace};

use crate::addr;
use crate::error::{Escape, Exec, ExecError};
use crate::exec::{Actuator, Handler, Instx, Middler, Sink};
use crate::expr;
use crate::ext;
use crate::instr::{self, Parsed};
use crate::opcode as op;
use crate::pattern;
use crate::pool;
use crate::value::{
    new_dict, rune_char, runes_to_string, string_to_runes, RegexPair, Value,
};

// Dispatch ------------------------------------------------------------------

static INST_SET: Lazy<[Instx; 256]> = Lazy::new(build_table);

/// Executes the instruction at the current offset and returns its raw
/// return values. The offset is advanced before the handler runs.
pub(crate) fn inst_call(a: &mut Actuator) -> Exec<Option<Vec<Value>>> {
    let parsed = instr::parse(a.script.tail())?;
    let instx = if parsed.code >= op::FN_X {
        ext::lookup(&parsed)?
    } else {
        INST_SET[parsed.code as usize]
    };
    a.script.advance(parsed.size);
    trace!(code = parsed.code, size = parsed.size, "step");

    let args = a.arguments(instx.argn)?;
    (instx.call)(a, &parsed, args)
}

/// Main dispatch loop: the return sink is captured before each call, so a
/// capture-chain prefix affects exactly the next instruction.
pub(crate) fn code_run(a: &mut Actuator) -> Exec<()> {
    while !a.script.end() {
        let sink = a.back_to();
        let vals = inst_call(a)?;
        a.return_put(sink, vals)?;
    }
    Ok(())
}

/// Envelope for embedded code: IF/ELSE/CASE/BLOCK bodies and GOTO/JUMP
/// targets. `EXIT` passes through; `RETURN` must not appear here.
pub(crate) fn run_embed(a: &mut Actuator) -> Exec<()> {
    match code_run(a) {
        Err(Escape::Return(_)) => Err(ExecError::StrayReturn.into()),
        other => other,
    }
}

/// Envelope for private scopes (MAP/FILTER bodies): `RETURN` yields the
/// iteration value, `EXIT` must not appear here.
pub(crate) fn exec_scope(a: &mut Actuator) -> Exec<Option<Value>> {
    match code_run(a) {
        Ok(()) => Ok(None),
        Err(Escape::Return(v)) => Ok(Some(v)),
        Err(Escape::Exit(_)) => Err(ExecError::StrayExit.into()),
        Err(e) => Err(e),
    }
}

/// How a SWITCH body or loop iteration ended.
pub(crate) enum Halt {
    Ran,
    Break,
    Continue,
}

/// Envelope for SWITCH bodies and EACH iterations: absorbs
/// `BREAK`/`CONTINUE`, re-raises `EXIT`, forbids `RETURN`.
pub(crate) fn exec_part(a: &mut Actuator) -> Exec<Halt> {
    match code_run(a) {
        Ok(()) => Ok(Halt::Ran),
        Err(Escape::Break) => Ok(Halt::Break),
        Err(Escape::Continue) => Ok(Halt::Continue),
        Err(Escape::Return(_)) => Err(ExecError::StrayReturn.into()),
        Err(e) => Err(e),
    }
}

/// Runs a top-level executor to completion. `EXIT` becomes the result
/// value; a script that simply runs off its end yields `Nil`.
pub fn script_run(a: &mut Actuator) -> Result<Value, ExecError> {
    match code_run(a) {
        Ok(()) => Ok(Value::Nil),
        Err(Escape::Exit(v)) => Ok(v),
        Err(Escape::Return(_)) => Err(ExecError::StrayReturn),
        Err(Escape::Break | Escape::Continue) => Err(ExecError::StrayBreak),
        Err(Escape::Fault(e)) => Err(e),
    }
}

// Shared helpers ------------------------------------------------------------

fn one(v: Value) -> Exec<Option<Vec<Value>>> {
    Ok(Some(vec![v]))
}

fn none() -> Exec<Option<Vec<Value>>> {
    Ok(None)
}

fn arg(vs: &[Value], i: usize) -> Exec<&Value> {
    vs.get(i).ok_or_else(|| ExecError::ToHere.into())
}

fn val_byte(v: &Value) -> Exec<u8> {
    match v {
        Value::Byte(b) => Ok(*b),
        _ => Err(ExecError::TypeMismatch("byte expected").into()),
    }
}

fn val_rune(v: &Value) -> Exec<i32> {
    match v {
        Value::Rune(r) => Ok(*r),
        _ => Err(ExecError::TypeMismatch("rune expected").into()),
    }
}

fn as_runes(v: &Value) -> Exec<&[i32]> {
    match v {
        Value::Runes(r) => Ok(r),
        _ => Err(ExecError::TypeMismatch("runes expected").into()),
    }
}

fn as_ints(v: &Value) -> Exec<&[i64]> {
    match v {
        Value::Ints(x) => Ok(x),
        _ => Err(ExecError::TypeMismatch("int slice expected").into()),
    }
}

fn as_floats(v: &Value) -> Exec<&[f64]> {
    match v {
        Value::Floats(x) => Ok(x),
        _ => Err(ExecError::TypeMismatch("float slice expected").into()),
    }
}

fn as_strs(v: &Value) -> Exec<&[String]> {
    match v {
        Value::Strs(x) => Ok(x),
        _ => Err(ExecError::TypeMismatch("string slice expected").into()),
    }
}

fn norm_index(i: i64, len: usize) -> Exec<usize> {
    let idx = if i < 0 { i + len as i64 } else { i };
    if idx < 0 || idx as usize >= len {
        return Err(ExecError::IndexRange(i).into());
    }
    Ok(idx as usize)
}

fn slice_range(i: i64, z: Option<i64>, len: usize) -> Exec<(usize, usize)> {
    let start = if i < 0 { i + len as i64 } else { i };
    let end = match z {
        None => len as i64,
        Some(z) if z < 0 => z + len as i64,
        Some(z) => z,
    };
    if start < 0 || end < start || end > len as i64 {
        return Err(ExecError::IndexRange(i).into());
    }
    Ok((start as usize, end as usize))
}

// One element of a sliceable sequence, wrapped back into a value.
fn slice_item(v: &Value, i: i64) -> Exec<Value> {
    Ok(match v {
        Value::Bytes(x) => Value::Byte(x[norm_index(i, x.len())?]),
        Value::Runes(x) => Value::Rune(x[norm_index(i, x.len())?]),
        Value::List(x) => x[norm_index(i, x.len())?].clone(),
        Value::Ints(x) => Value::Int(x[norm_index(i, x.len())?]),
        Value::Floats(x) => Value::Float(x[norm_index(i, x.len())?]),
        Value::Strs(x) => Value::Str(x[norm_index(i, x.len())?].clone()),
        _ => return Err(ExecError::ToHere.into()),
    })
}

// Parallel extraction keeping the concrete slice variant.
fn slice_items(v: &Value, ids: &[i64]) -> Exec<Value> {
    Ok(match v {
        Value::Bytes(x) => {
            let mut buf = Vec::with_capacity(ids.len());
            for &i in ids {
                buf.push(x[norm_index(i, x.len())?]);
            }
            Value::Bytes(buf)
        }
        Value::Runes(x) => {
            let mut buf = Vec::with_capacity(ids.len());
            for &i in ids {
                buf.push(x[norm_index(i, x.len())?]);
            }
            Value::Runes(buf)
        }
        Value::List(x) => {
            let mut buf = Vec::with_capacity(ids.len());
            for &i in ids {
                buf.push(x[norm_index(i, x.len())?].clone());
            }
            Value::List(buf)
        }
        Value::Ints(x) => {
            let mut buf = Vec::with_capacity(ids.len());
            for &i in ids {
                buf.push(x[norm_index(i, x.len())?]);
            }
            Value::Ints(buf)
        }
        Value::Floats(x) => {
            let mut buf = Vec::with_capacity(ids.len());
            for &i in ids {
                buf.push(x[norm_index(i, x.len())?]);
            }
            Value::Floats(buf)
        }
        Value::Strs(x) => {
            let mut buf = Vec::with_capacity(ids.len());
            for &i in ids {
                buf.push(x[norm_index(i, x.len())?].clone());
            }
            Value::Strs(buf)
        }
        _ => return Err(ExecError::ToHere.into()),
    })
}

// (key, value) pairs of a collection, for MAP/FILTER/EACH iteration.
fn collection_pairs(v: &Value) -> Exec<Vec<(Value, Value)>> {
    Ok(match v {
        Value::Bytes(x) => x
            .iter()
            .enumerate()
            .map(|(i, b)| (Value::Int(i as i64), Value::Byte(*b)))
            .collect(),
        Value::Runes(x) => x
            .iter()
            .enumerate()
            .map(|(i, r)| (Value::Int(i as i64), Value::Rune(*r)))
            .collect(),
        Value::List(x) => x
            .iter()
            .enumerate()
            .map(|(i, v)| (Value::Int(i as i64), v.clone()))
            .collect(),
        Value::Ints(x) => x
            .iter()
            .enumerate()
            .map(|(i, v)| (Value::Int(i as i64), Value::Int(*v)))
            .collect(),
        Value::Floats(x) => x
            .iter()
            .enumerate()
            .map(|(i, v)| (Value::Int(i as i64), Value::Float(*v)))
            .collect(),
        Value::Strs(x) => x
            .iter()
            .enumerate()
            .map(|(i, v)| (Value::Int(i as i64), Value::Str(v.clone())))
            .collect(),
        Value::Dict(d) => d
            .lock()
            .iter()
            .map(|(k, v)| (Value::Str(k.clone()), v.clone()))
            .collect(),
        _ => return Err(ExecError::ToHere.into()),
    })
}

fn bytes_list(v: &Value) -> Exec<Vec<Vec<u8>>> {
    let mut out = Vec::new();
    for m in v.as_list()? {
        out.push(m.as_bytes()?.to_vec());
    }
    Ok(out)
}

// Textual rendering for the diagnostic print instructions.
fn display(v: &Value) -> String {
    match v {
        Value::Nil => "nil".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Byte(b) => b.to_string(),
        Value::Rune(r) => rune_char(*r).to_string(),
        Value::Int(i) => i.to_string(),
        Value::Big(b) => b.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Str(s) => s.clone(),
        Value::Time(t) => t.to_rfc3339(),
        other => format!("{other:?}"),
    }
}

fn radix(f: i64) -> Exec<u32> {
    if !(2..=36).contains(&f) {
        return Err(ExecError::BadConversion("radix outside 2..=36").into());
    }
    Ok(f as u32)
}

fn parse_int_prefixed(s: &str) -> Option<i64> {
    let (neg, t) = signed(s.trim());
    let (radix, digits) = radix_prefix(t);
    let v = i64::from_str_radix(digits, radix).ok()?;
    Some(if neg { -v } else { v })
}

fn parse_bigint_prefixed(s: &str) -> Option<BigInt> {
    let (neg, t) = signed(s.trim());
    let (radix, digits) = radix_prefix(t);
    let v = BigInt::parse_bytes(digits.as_bytes(), radix)?;
    Some(if neg { -v } else { v })
}

fn signed(s: &str) -> (bool, &str) {
    if let Some(r) = s.strip_prefix('-') {
        (true, r)
    } else {
        (false, s.strip_prefix('+').unwrap_or(s))
    }
}

fn radix_prefix(s: &str) -> (u32, &str) {
    if let Some(r) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        (16, r)
    } else if let Some(r) = s.strip_prefix("0o").or_else(|| s.strip_prefix("0O")) {
        (8, r)
    } else if let Some(r) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
        (2, r)
    } else {
        (10, s)
    }
}

// Value producers -----------------------------------------------------------

fn op_nil(a: &mut Actuator, _p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    one(Value::Nil)
}

fn op_true(a: &mut Actuator, _p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    one(Value::Bool(true))
}

fn op_false(a: &mut Actuator, _p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    one(Value::Bool(false))
}

// All remaining literal opcodes push their decoded data value.
fn op_lit(a: &mut Actuator, p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    one(p.data_value()?.clone())
}

// Capture chain -------------------------------------------------------------

fn op_capture(a: &mut Actuator, _p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.route_to(Sink::Args);
    none()
}

fn op_bring(a: &mut Actuator, _p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.take_from_stack(true);
    none()
}

fn op_scope_put(a: &mut Actuator, _p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.route_to(Sink::Scope);
    none()
}

// `$(i)` feeds the args region, or the expression evaluator when inside
// an expression block.
fn op_scope_val(a: &mut Actuator, p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let v = a.scope_item(p.aux_int(0)?)?;
    if a.in_expr() {
        return one(v);
    }
    a.put_args(v);
    none()
}

fn op_loop_val(a: &mut Actuator, p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let v = a.loop_item(p.aux_int(0)?)?;
    if a.in_expr() {
        return one(v);
    }
    a.put_args(v);
    none()
}

// Stack operations ----------------------------------------------------------

fn op_nop(a: &mut Actuator, _p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    none()
}

fn op_push(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    if !vs.is_empty() {
        a.stack_push(vs)?;
    }
    none()
}

fn op_shift(a: &mut Actuator, p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let n = p.aux_int(0)? as usize;
    Ok(Some(a.stack_pops(n)?))
}

fn op_clone(a: &mut Actuator, p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let n = p.aux_int(0)? as usize;
    Ok(Some(a.stack_tops(n)?))
}

fn op_pop(a: &mut Actuator, _p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    one(a.stack_pop()?)
}

fn op_pops(a: &mut Actuator, p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let mut n = p.aux_int(0)? as usize;
    if n == 0 {
        n = a.stack_size();
    }
    one(Value::List(a.stack_pops(n)?))
}

fn op_top(a: &mut Actuator, _p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    one(a.stack_top()?)
}

fn op_tops(a: &mut Actuator, p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let n = p.aux_int(0)? as usize;
    if n == 0 {
        return none();
    }
    one(Value::List(a.stack_tops(n)?))
}

fn op_peek(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let i = arg(&vs, 0)?.as_int()?;
    one(a.stack_item(i)?)
}

fn op_peeks(a: &mut Actuator, p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let n = p.aux_int(0)? as usize;
    let i = arg(&vs, 0)?.as_int()?;
    one(Value::List(a.stack_items(i, n)?))
}

// Collections ---------------------------------------------------------------

fn op_slice(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let i = arg(&vs, 1)?.as_int()?;
    let z = match arg(&vs, 2)? {
        Value::Nil => None,
        v => Some(v.as_int()?),
    };
    let out = match arg(&vs, 0)? {
        Value::Bytes(x) => {
            let (s, e) = slice_range(i, z, x.len())?;
            Value::Bytes(x[s..e].to_vec())
        }
        Value::Runes(x) => {
            let (s, e) = slice_range(i, z, x.len())?;
            Value::Runes(x[s..e].to_vec())
        }
        Value::List(x) => {
            let (s, e) = slice_range(i, z, x.len())?;
            Value::List(x[s..e].to_vec())
        }
        Value::Ints(x) => {
            let (s, e) = slice_range(i, z, x.len())?;
            Value::Ints(x[s..e].to_vec())
        }
        Value::Floats(x) => {
            let (s, e) = slice_range(i, z, x.len())?;
            Value::Floats(x[s..e].to_vec())
        }
        Value::Strs(x) => {
            let (s, e) = slice_range(i, z, x.len())?;
            Value::Strs(x[s..e].to_vec())
        }
        _ => return Err(ExecError::ToHere.into()),
    };
    one(out)
}

fn op_reverse(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let out = match arg(&vs, 0)? {
        Value::Bytes(x) => Value::Bytes(x.iter().rev().copied().collect()),
        Value::Runes(x) => Value::Runes(x.iter().rev().copied().collect()),
        Value::List(x) => Value::List(x.iter().rev().cloned().collect()),
        Value::Ints(x) => Value::Ints(x.iter().rev().copied().collect()),
        Value::Floats(x) => Value::Floats(x.iter().rev().copied().collect()),
        Value::Strs(x) => Value::Strs(x.iter().rev().cloned().collect()),
        _ => return Err(ExecError::ToHere.into()),
    };
    one(out)
}

fn op_merge(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let out = match arg(&vs, 0)? {
        Value::Bytes(_) => {
            let mut buf = Vec::new();
            for v in &vs {
                buf.extend_from_slice(v.as_bytes()?);
            }
            Value::Bytes(buf)
        }
        Value::Runes(_) => {
            let mut buf = Vec::new();
            for v in &vs {
                buf.extend_from_slice(as_runes(v)?);
            }
            Value::Runes(buf)
        }
        Value::List(_) => {
            let mut buf = Vec::new();
            for v in &vs {
                buf.extend_from_slice(v.as_list()?);
            }
            Value::List(buf)
        }
        Value::Ints(_) => {
            let mut buf = Vec::new();
            for v in &vs {
                buf.extend_from_slice(as_ints(v)?);
            }
            Value::Ints(buf)
        }
        Value::Floats(_) => {
            let mut buf = Vec::new();
            for v in &vs {
                buf.extend_from_slice(as_floats(v)?);
            }
            Value::Floats(buf)
        }
        Value::Strs(_) => {
            let mut buf = Vec::new();
            for v in &vs {
                buf.extend_from_slice(as_strs(v)?);
            }
            Value::Strs(buf)
        }
        _ => return Err(ExecError::ToHere.into()),
    };
    one(out)
}

fn op_expand(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let out = match arg(&vs, 0)? {
        Value::Bytes(x) => {
            let mut buf = x.clone();
            for v in &vs[1..] {
                buf.push(val_byte(v)?);
            }
            Value::Bytes(buf)
        }
        Value::Runes(x) => {
            let mut buf = x.clone();
            for v in &vs[1..] {
                buf.push(val_rune(v)?);
            }
            Value::Runes(buf)
        }
        Value::List(x) => {
            let mut buf = x.clone();
            buf.extend(vs[1..].iter().cloned());
            Value::List(buf)
        }
        Value::Ints(x) => {
            let mut buf = x.clone();
            for v in &vs[1..] {
                buf.push(v.as_int()?);
            }
            Value::Ints(buf)
        }
        Value::Floats(x) => {
            let mut buf = x.clone();
            for v in &vs[1..] {
                buf.push(v.as_float()?);
            }
            Value::Floats(buf)
        }
        Value::Strs(x) => {
            let mut buf = x.clone();
            for v in &vs[1..] {
                buf.push(v.as_str()?.to_string());
            }
            Value::Strs(buf)
        }
        _ => return Err(ExecError::ToHere.into()),
    };
    one(out)
}

// Seamless member concatenation into a byte sequence. `Ints`/`Floats`
// lack a direct byte form and are rejected.
fn op_glue(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let mut buf = Vec::new();
    match arg(&vs, 0)? {
        Value::Bytes(x) => buf.extend_from_slice(x),
        Value::Runes(x) => {
            for &r in x {
                let mut tmp = [0u8; 4];
                buf.extend_from_slice(rune_char(r).encode_utf8(&mut tmp).as_bytes());
            }
        }
        Value::List(x) => {
            for v in x {
                match v {
                    Value::Byte(b) => buf.push(*b),
                    Value::Rune(r) => {
                        let mut tmp = [0u8; 4];
                        buf.extend_from_slice(rune_char(*r).encode_utf8(&mut tmp).as_bytes());
                    }
                    Value::Bytes(b) => buf.extend_from_slice(b),
                    Value::Str(s) => buf.extend_from_slice(s.as_bytes()),
                    _ => return Err(ExecError::ToHere.into()),
                }
            }
        }
        Value::Strs(x) => {
            for s in x {
                buf.extend_from_slice(s.as_bytes());
            }
        }
        _ => return Err(ExecError::ToHere.into()),
    }
    one(Value::Bytes(buf))
}

fn op_spread(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let target = arg(&vs, 0)?;
    if !target.is_slice() {
        return Err(ExecError::ToHere.into());
    }
    let members = collection_pairs(target)?;
    Ok(Some(members.into_iter().map(|(_, v)| v).collect()))
}

fn op_item(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    match arg(&vs, 1)? {
        Value::Int(i) => one(slice_item(arg(&vs, 0)?, *i)?),
        Value::Ints(ids) => one(slice_items(arg(&vs, 0)?, ids)?),
        Value::Str(k) => {
            let d = arg(&vs, 0)?.as_dict()?;
            let v = d.lock().get(k).cloned().unwrap_or(Value::Nil);
            one(v)
        }
        Value::Strs(ks) => {
            let d = arg(&vs, 0)?.as_dict()?;
            let d = d.lock();
            one(Value::List(
                ks.iter()
                    .map(|k| d.get(k).cloned().unwrap_or(Value::Nil))
                    .collect(),
            ))
        }
        _ => Err(ExecError::ToHere.into()),
    }
}

fn op_set(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let d = arg(&vs, 0)?.as_dict()?.clone();
    match arg(&vs, 1)? {
        Value::Str(k) => {
            d.lock().insert(k.clone(), arg(&vs, 2)?.clone());
        }
        Value::Strs(ks) => {
            let mut m = d.lock();
            for (i, k) in ks.iter().enumerate() {
                m.insert(k.clone(), slice_item(arg(&vs, 2)?, i as i64)?);
            }
        }
        _ => return Err(ExecError::ToHere.into()),
    }
    one(Value::Dict(d))
}

fn op_size(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let n = match arg(&vs, 0)? {
        Value::Bytes(x) => x.len(),
        Value::Runes(x) => x.len(),
        Value::List(x) => x.len(),
        Value::Ints(x) => x.len(),
        Value::Floats(x) => x.len(),
        Value::Strs(x) => x.len(),
        Value::Dict(d) => d.lock().len(),
        _ => return Err(ExecError::ToHere.into()),
    };
    one(Value::Int(n as i64))
}

// MAP: run the body in a private scope per element, collecting the
// non-nil RETURN values. Extra call arguments seed the private stack.
fn op_map(a: &mut Actuator, p: &Parsed, mut vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    if vs.is_empty() {
        return Err(ExecError::ToHere.into());
    }
    let target = vs.remove(0);
    let code = p.data_code()?.to_vec();

    let scope = a.scope_new(&code);
    if !vs.is_empty() {
        scope.stack_push(vs)?;
    }
    let pairs = collection_pairs(&target)?;
    let size = pairs.len();

    let mut buf = Vec::new();
    for (k, v) in pairs {
        let mut child = scope.block_new(&code);
        child.loop_set(k, v, target.clone(), size)?;
        if let Some(x) = exec_scope(&mut child)? {
            if !x.is_nil() {
                buf.push(x);
            }
        }
    }
    one(Value::List(buf))
}

// FILTER: keep the elements whose body returns true. Dictionaries yield a
// fresh dictionary, never a mutation of the input.
fn op_filter(a: &mut Actuator, p: &Parsed, mut vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    if vs.is_empty() {
        return Err(ExecError::ToHere.into());
    }
    let target = vs.remove(0);
    let code = p.data_code()?.to_vec();

    let scope = a.scope_new(&code);
    if !vs.is_empty() {
        scope.stack_push(vs)?;
    }
    let pairs = collection_pairs(&target)?;
    let size = pairs.len();
    let for_dict = matches!(target, Value::Dict(_));

    let mut list = Vec::new();
    let dict = new_dict();
    for (k, v) in pairs {
        let mut child = scope.block_new(&code);
        child.loop_set(k.clone(), v.clone(), target.clone(), size)?;
        let keep = exec_scope(&mut child)?
            .ok_or(ExecError::TypeMismatch("filter body must return a bool"))?
            .as_bool()?;
        if !keep {
            continue;
        }
        if for_dict {
            dict.lock().insert(k.as_str()?.to_string(), v);
        } else {
            list.push(v);
        }
    }
    if for_dict {
        one(Value::Dict(dict))
    } else {
        one(Value::List(list))
    }
}

// Interaction ---------------------------------------------------------------

fn op_input(a: &mut Actuator, p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let n = p.aux_int(0)? as usize;
    if a.input_empty() {
        return Err(ExecError::InputShort {
            want: n.max(1),
            have: 0,
        }
        .into());
    }
    Ok(Some(a.bufin_pick(n)?))
}

fn op_output(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    if !vs.is_empty() {
        a.bufout_push(vs);
    }
    none()
}

// Snapshot and drain the output buffer onto the shared channel. The send
// never blocks the interpreter.
fn op_bufdump(a: &mut Actuator, p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let n = p.aux_int(0)? as u8;
    if !a.output_empty() {
        let record = Middler {
            id: a.id().to_vec(),
            n,
            code: a.script.source().to_vec(),
            data: a.bufout_take(),
        };
        trace!(tag = n, count = record.data.len(), "bufdump");
        if let Some(ch) = a.channel() {
            let _ = ch.send(record);
        }
    }
    none()
}

fn op_print(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    if !vs.is_empty() {
        let line: Vec<String> = vs.iter().map(display).collect();
        println!("{}", line.join(" "));
    }
    none()
}

// Results -------------------------------------------------------------------

fn op_pass(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    if !arg(&vs, 0)?.as_bool()? {
        return Err(ExecError::NotPass.into());
    }
    none()
}

fn op_fail(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    if arg(&vs, 0)?.as_bool()? {
        return Err(ExecError::NotPass.into());
    }
    none()
}

// GOTO: resolve the target from the pool and run it in an isolated
// executor; call arguments seed the fresh stack.
fn op_goto(a: &mut Actuator, p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    a.incr_goto()?;

    let h = p.aux_int(0)? as u32;
    let n = p.aux_int(1)? as u32;
    let i = p.aux_int(2)? as u16;
    let code = pool::get(h, n, i).ok_or(ExecError::ScriptUnavailable(h, n, i))?;
    debug!(h, n, i, "goto");

    let mut child = a.script_new(pool::key_id(h, n, i).to_vec(), code);
    if !vs.is_empty() {
        child.stack_push(vs)?;
    }
    child.envs().borrow_mut().goto_in();
    run_embed(&mut child)?;
    none()
}

// JUMP: embed the target into the current environment.
fn op_jump(a: &mut Actuator, p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    a.incr_jump()?;

    let h = p.aux_int(0)? as u32;
    let n = p.aux_int(1)? as u32;
    let i = p.aux_int(2)? as u16;
    let code = pool::get(h, n, i).ok_or(ExecError::ScriptUnavailable(h, n, i))?;
    debug!(h, n, i, "jump");

    let mut child = a.embed_new(pool::key_id(h, n, i).to_vec(), code);
    child.envs().borrow_mut().jump_in();
    run_embed(&mut child)?;
    none()
}

fn op_exit(a: &mut Actuator, _p: &Parsed, mut vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    match vs.len() {
        0 => none(),
        1 => Err(Escape::Exit(vs.remove(0))),
        _ => Err(Escape::Exit(Value::List(vs))),
    }
}

fn op_return(a: &mut Actuator, _p: &Parsed, mut vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    if vs.is_empty() {
        return Err(ExecError::ToHere.into());
    }
    Err(Escape::Return(vs.remove(0)))
}

// Flow control --------------------------------------------------------------

fn op_if(a: &mut Actuator, p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let cond = arg(&vs, 0)?.as_bool()?;
    a.ifs = Some(cond);
    if cond {
        let mut child = a.block_new(p.data_code()?);
        run_embed(&mut child)?;
    }
    none()
}

fn op_else(a: &mut Actuator, p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let state = a.ifs.ok_or(ExecError::ToHere)?;
    if !state {
        let mut child = a.block_new(p.data_code()?);
        run_embed(&mut child)?;
    }
    a.ifs = None;
    none()
}

fn op_switch(a: &mut Actuator, p: &Parsed, mut vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    if vs.len() != 2 {
        return Err(ExecError::ToHere.into());
    }
    let cases_value = vs.pop().ok_or(ExecError::ToHere)?;
    let cases = cases_value.as_list()?.to_vec();
    let target = vs.pop().ok_or(ExecError::ToHere)?;

    let mut child = a.switch_new(p.data_code()?, target, cases);
    // BREAK ends the body; CONTINUE does not apply to a switch.
    exec_part(&mut child)?;
    none()
}

fn op_case(a: &mut Actuator, p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let ctx = a.switch_ctx()?;

    // The next case value is consumed whether or not it matches; a miss
    // moves on to the next branch.
    let pass = ctx.borrow_mut().case_pass()?;
    let taken = pass || ctx.borrow().through();
    if !taken {
        return none();
    }
    ctx.borrow().set_through(false);
    let mut child = a.case_new(p.data_code()?);
    run_embed(&mut child)?;

    // A nested FALLTHROUGH keeps the switch body going.
    if ctx.borrow().through() {
        return none();
    }
    Err(Escape::Break)
}

fn op_default(a: &mut Actuator, p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let ctx = a.switch_ctx()?;
    let mut child = a.case_new(p.data_code()?);
    run_embed(&mut child)?;
    ctx.borrow_mut().reset();
    Err(Escape::Break)
}

// EACH: one sub-block per element. Iterations share the JUMP budget from
// the loop entry; the highest count across iterations is what sticks.
fn op_each(a: &mut Actuator, p: &Parsed, mut vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    if vs.is_empty() {
        return Err(ExecError::ToHere.into());
    }
    let target = vs.remove(0);
    let code = p.data_code()?.to_vec();

    let loop_exec = a.loop_new(&code);
    let pairs = collection_pairs(&target)?;
    let size = pairs.len();
    let orig = loop_exec.jumps();
    let mut max = orig;

    for (k, v) in pairs {
        let mut child = loop_exec.block_new(&code);
        child.set_jumps(orig);
        child.loop_set(k, v, target.clone(), size)?;

        let halt = exec_part(&mut child)?;
        max = max.max(child.jumps());
        if matches!(halt, Halt::Break) {
            break;
        }
    }
    loop_exec.set_jumps(max);
    none()
}

fn op_continue(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    if !vs.is_empty() {
        if vs.len() != 1 {
            return Err(ExecError::ToHere.into());
        }
        if !vs[0].as_bool()? {
            return none();
        }
    }
    Err(Escape::Continue)
}

fn op_break(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    if !vs.is_empty() {
        if vs.len() != 1 {
            return Err(ExecError::ToHere.into());
        }
        if !vs[0].as_bool()? {
            return none();
        }
    }
    Err(Escape::Break)
}

fn op_fallthrough(a: &mut Actuator, _p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    a.switch_ctx()?.borrow().set_through(true);
    none()
}

fn op_block(a: &mut Actuator, p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let mut child = a.block_new(p.data_code()?);
    run_embed(&mut child)?;
    none()
}

// Conversions ---------------------------------------------------------------

fn op_to_bool(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let b = match arg(&vs, 0)? {
        Value::Nil => false,
        Value::Str(s) => !s.is_empty(),
        Value::Int(i) => *i != 0,
        Value::Byte(b) => *b != 0,
        Value::Rune(r) => *r != 0,
        Value::Big(b) => **b != BigInt::from(0),
        Value::Float(f) => *f > f64::from_bits(1),
        _ => return Err(ExecError::ToHere.into()),
    };
    one(Value::Bool(b))
}

fn op_to_byte(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let b = match arg(&vs, 0)? {
        Value::Nil => 0,
        Value::Bool(v) => u8::from(*v),
        Value::Rune(r) => conv_to_byte(i64::from(*r))?,
        Value::Int(i) => conv_to_byte(*i)?,
        Value::Float(f) => conv_to_byte(*f as i64)?,
        _ => return Err(ExecError::ToHere.into()),
    };
    one(Value::Byte(b))
}

fn conv_to_byte(v: i64) -> Exec<u8> {
    if !(i64::from(i8::MIN)..=i64::from(u8::MAX)).contains(&v) {
        return Err(ExecError::BadConversion("value does not fit a byte").into());
    }
    Ok(v as u8)
}

fn op_to_rune(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let r = match arg(&vs, 0)? {
        Value::Nil => 0,
        Value::Bool(v) => i32::from(*v),
        Value::Byte(b) => i32::from(*b),
        Value::Int(i) => conv_to_rune(*i)?,
        Value::Float(f) => conv_to_rune(*f as i64)?,
        Value::Bytes(b) => {
            let s = std::str::from_utf8(b)
                .map_err(|_| ExecError::BadConversion("bytes are not one UTF-8 rune"))?;
            let mut chars = s.chars();
            let c = chars
                .next()
                .ok_or(ExecError::BadConversion("bytes are not one UTF-8 rune"))?;
            if chars.next().is_some() {
                return Err(ExecError::BadConversion("bytes are not one UTF-8 rune").into());
            }
            c as i32
        }
        _ => return Err(ExecError::ToHere.into()),
    };
    one(Value::Rune(r))
}

fn conv_to_rune(v: i64) -> Exec<i32> {
    i32::try_from(v).map_err(|_| ExecError::BadConversion("value does not fit a rune").into())
}

fn op_to_int(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let i = match arg(&vs, 0)? {
        Value::Nil => 0,
        Value::Bool(v) => i64::from(*v),
        Value::Byte(b) => i64::from(*b),
        Value::Rune(r) => i64::from(*r),
        Value::Str(s) => parse_int_prefixed(s)
            .ok_or(ExecError::BadConversion("string is not an integer"))?,
        Value::Float(f) => {
            if !f.is_finite() || *f > i64::MAX as f64 || *f < i64::MIN as f64 {
                return Err(ExecError::BadConversion("float does not fit an int").into());
            }
            *f as i64
        }
        Value::Time(t) => t.timestamp_millis(),
        Value::Big(b) => i64::try_from(b.as_ref().clone())
            .map_err(|_| ExecError::BadConversion("bigint does not fit an int"))?,
        Value::Bytes(b) => match b.len() {
            1 => i64::from(b[0]),
            2 => i64::from(u16::from_be_bytes([b[0], b[1]])),
            4 => i64::from(u32::from_be_bytes([b[0], b[1], b[2], b[3]])),
            8 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(b);
                u64::from_be_bytes(buf) as i64
            }
            _ => return Err(ExecError::BadConversion("byte length must be 1, 2, 4 or 8").into()),
        },
        _ => return Err(ExecError::ToHere.into()),
    };
    one(Value::Int(i))
}

fn op_to_bigint(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let b = match arg(&vs, 0)? {
        Value::Nil => BigInt::from(0),
        Value::Str(s) => parse_bigint_prefixed(s)
            .ok_or(ExecError::BadConversion("string is not an integer"))?,
        Value::Bytes(x) => BigInt::from_bytes_be(num_bigint::Sign::Plus, x),
        Value::Bool(v) => BigInt::from(u8::from(*v)),
        Value::Int(i) => BigInt::from(*i),
        Value::Byte(x) => BigInt::from(*x),
        Value::Rune(r) => BigInt::from(*r),
        Value::Float(f) => {
            if !f.is_finite() {
                return Err(ExecError::BadConversion("float is not finite").into());
            }
            BigInt::from(f.trunc() as i128)
        }
        _ => return Err(ExecError::ToHere.into()),
    };
    one(Value::Big(Arc::new(b)))
}

fn op_to_float(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let f = match arg(&vs, 0)? {
        Value::Nil => 0.0,
        Value::Bool(v) => f64::from(u8::from(*v)),
        Value::Int(i) => *i as f64,
        Value::Byte(b) => f64::from(*b),
        Value::Rune(r) => f64::from(*r),
        Value::Str(s) => s
            .parse::<f64>()
            .map_err(|_| ExecError::BadConversion("string is not a float"))?,
        _ => return Err(ExecError::ToHere.into()),
    };
    one(Value::Float(f))
}

fn op_to_string(a: &mut Actuator, p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let f = p.aux_int(0)?;
    let s = match arg(&vs, 0)? {
        Value::Nil => String::new(),
        Value::Bool(v) => v.to_string(),
        Value::Int(i) => BigInt::from(*i).to_str_radix(radix(f)?),
        Value::Byte(b) => (*b as char).to_string(),
        Value::Rune(r) => rune_char(*r).to_string(),
        Value::Big(b) => b.to_str_radix(radix(f)?),
        Value::Float(x) => match f as u8 {
            b'e' => format!("{x:e}"),
            _ => x.to_string(),
        },
        Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        Value::Runes(rs) => runes_to_string(rs),
        _ => return Err(ExecError::ToHere.into()),
    };
    one(Value::Str(s))
}

fn op_to_bytes(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let b = match arg(&vs, 0)? {
        Value::Nil => Vec::new(),
        Value::Int(i) => (*i as u64).to_be_bytes().to_vec(),
        Value::Big(x) => x.to_bytes_be().1,
        Value::Byte(x) => vec![*x],
        Value::Rune(r) => rune_char(*r).to_string().into_bytes(),
        Value::Str(s) => s.clone().into_bytes(),
        Value::Runes(rs) => runes_to_string(rs).into_bytes(),
        Value::Script(s) => s.source().to_vec(),
        _ => return Err(ExecError::ToHere.into()),
    };
    one(Value::Bytes(b))
}

fn op_to_runes(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let rs = match arg(&vs, 0)? {
        Value::Nil => Vec::new(),
        Value::Rune(r) => vec![*r],
        Value::Str(s) => string_to_runes(s),
        Value::Bytes(b) => string_to_runes(&String::from_utf8_lossy(b)),
        _ => return Err(ExecError::ToHere.into()),
    };
    one(Value::Runes(rs))
}

fn op_to_time(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let t = match arg(&vs, 0)? {
        Value::Int(ms) => Utc
            .timestamp_millis_opt(*ms)
            .single()
            .ok_or(ExecError::BadConversion("timestamp out of range"))?,
        Value::Str(s) => chrono::DateTime::parse_from_rfc3339(s)
            .map_err(|_| ExecError::BadConversion("string is not RFC 3339"))?
            .with_timezone(&Utc),
        _ => return Err(ExecError::ToHere.into()),
    };
    one(Value::Time(t))
}

fn op_to_regexp(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let re = RegexPair::compile(arg(&vs, 0)?.as_str()?)?;
    one(Value::Regex(Arc::new(re)))
}

fn op_anys(a: &mut Actuator, p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let kind = p.aux_int(0)?;
    let v = arg(&vs, 0)?;
    let out = match kind {
        op::item::ANY => {
            if !v.is_slice() {
                return Err(ExecError::ToHere.into());
            }
            Value::List(collection_pairs(v)?.into_iter().map(|(_, v)| v).collect())
        }
        op::item::BYTE => {
            let mut buf = Vec::new();
            for m in v.as_list()? {
                buf.push(val_byte(m)?);
            }
            Value::Bytes(buf)
        }
        op::item::RUNE => {
            let mut buf = Vec::new();
            for m in v.as_list()? {
                buf.push(val_rune(m)?);
            }
            Value::Runes(buf)
        }
        op::item::INT => {
            let mut buf = Vec::new();
            for m in v.as_list()? {
                buf.push(m.as_int()?);
            }
            Value::Ints(buf)
        }
        op::item::FLOAT => {
            let mut buf = Vec::new();
            for m in v.as_list()? {
                buf.push(m.as_float()?);
            }
            Value::Floats(buf)
        }
        op::item::STRING => {
            let mut buf = Vec::new();
            for m in v.as_list()? {
                buf.push(m.as_str()?.to_string());
            }
            Value::Strs(buf)
        }
        _ => return Err(ExecError::ToHere.into()),
    };
    one(out)
}

// Keys and values pair up by index; surplus values are ignored, missing
// ones are an error.
fn op_dict(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let values = arg(&vs, 1)?.as_list()?;
    let d = new_dict();
    {
        let mut m = d.lock();
        let mut put = |k: &str, i: usize| -> Exec<()> {
            let v = values.get(i).ok_or(ExecError::IndexRange(i as i64))?;
            m.insert(k.to_string(), v.clone());
            Ok(())
        };
        match arg(&vs, 0)? {
            Value::Strs(ks) => {
                for (i, k) in ks.iter().enumerate() {
                    put(k, i)?;
                }
            }
            Value::List(ks) => {
                for (i, k) in ks.iter().enumerate() {
                    put(k.as_str()?, i)?;
                }
            }
            _ => return Err(ExecError::ToHere.into()),
        }
    }
    one(Value::Dict(d))
}

// Arithmetic ----------------------------------------------------------------

// `()` expression blocks hand control to the sub-evaluator.
fn op_expr(a: &mut Actuator, p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let code = p.data_code()?.to_vec();
    let mut child = a.expr_new(&code);
    child.expr_in();
    let result = expr::evaluate(&mut child);
    child.expr_out();
    one(Value::Float(result?))
}

fn op_mul(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    one(Value::Float(
        arg(&vs, 0)?.to_number()? * arg(&vs, 1)?.to_number()?,
    ))
}

fn op_div(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    one(Value::Float(
        arg(&vs, 0)?.to_number()? / arg(&vs, 1)?.to_number()?,
    ))
}

// ADD also concatenates strings and byte sequences and merges
// dictionaries (into the first operand, which stays shared).
fn op_add(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    match (arg(&vs, 0)?, arg(&vs, 1)?) {
        (Value::Str(x), y) => {
            let mut s = x.clone();
            s.push_str(y.as_str()?);
            one(Value::Str(s))
        }
        (Value::Bytes(x), y) => {
            let mut b = x.clone();
            b.extend_from_slice(y.as_bytes()?);
            one(Value::Bytes(b))
        }
        (Value::Dict(x), y) => {
            let other = y.as_dict()?;
            let entries: Vec<(String, Value)> = other
                .lock()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            x.lock().extend(entries);
            one(Value::Dict(x.clone()))
        }
        (x, y) => one(Value::Float(x.to_number()? + y.to_number()?)),
    }
}

fn op_sub(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    one(Value::Float(
        arg(&vs, 0)?.to_number()? - arg(&vs, 1)?.to_number()?,
    ))
}

fn op_pow(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    one(Value::Float(
        arg(&vs, 0)?.to_number()?.powf(arg(&vs, 1)?.to_number()?),
    ))
}

fn op_mod(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    match (arg(&vs, 0)?, arg(&vs, 1)?) {
        (Value::Int(x), y) => one(Value::Int(
            x.checked_rem(y.as_int()?).ok_or(ExecError::Arithmetic)?,
        )),
        (Value::Float(x), y) => one(Value::Float(x % y.as_float()?)),
        _ => Err(ExecError::ToHere.into()),
    }
}

fn op_lmov(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let x = arg(&vs, 0)?.as_int()?;
    let n = arg(&vs, 1)?.as_int()?;
    if !(0..=63).contains(&n) {
        return Err(ExecError::ShiftTooWide(n).into());
    }
    one(Value::Int(x << n))
}

// Right shifts past the value width drain to the sign bit.
fn op_rmov(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let x = arg(&vs, 0)?.as_int()?;
    let n = arg(&vs, 1)?.as_int()?;
    if n < 0 {
        return Err(ExecError::ShiftTooWide(n).into());
    }
    one(Value::Int(x >> n.min(63)))
}

fn op_and(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    one(Value::Int(arg(&vs, 0)?.as_int()? & arg(&vs, 1)?.as_int()?))
}

fn op_andx(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    one(Value::Int(arg(&vs, 0)?.as_int()? & !arg(&vs, 1)?.as_int()?))
}

fn op_or(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    one(Value::Int(arg(&vs, 0)?.as_int()? | arg(&vs, 1)?.as_int()?))
}

// One argument complements, two arguments exclusive-or.
fn op_xor(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    match vs.len() {
        1 => one(Value::Int(!vs[0].as_int()?)),
        2 => one(Value::Int(vs[0].as_int()? ^ vs[1].as_int()?)),
        _ => Err(ExecError::ToHere.into()),
    }
}

fn op_neg(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    match arg(&vs, 0)? {
        Value::Int(x) => one(Value::Int(x.wrapping_neg())),
        Value::Float(x) => one(Value::Float(-x)),
        _ => Err(ExecError::ToHere.into()),
    }
}

fn op_not(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    one(Value::Bool(!arg(&vs, 0)?.as_bool()?))
}

fn op_divmod(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let x = arg(&vs, 0)?.as_int()?;
    let y = arg(&vs, 1)?.as_int()?;
    let q = x.checked_div(y).ok_or(ExecError::Arithmetic)?;
    let r = x.checked_rem(y).ok_or(ExecError::Arithmetic)?;
    Ok(Some(vec![Value::Int(q), Value::Int(r)]))
}

// DUP(n) returns exactly n shallow copies, spread to the caller.
fn op_dup(a: &mut Actuator, p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let n = p.aux_int(0)? as usize;
    let v = arg(&vs, 0)?;
    Ok(Some(vec![v.clone(); n]))
}

fn op_del(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let d = arg(&vs, 0)?.as_dict()?.clone();
    match arg(&vs, 1)? {
        Value::Str(k) => {
            d.lock().remove(k);
        }
        Value::Strs(ks) => {
            let mut m = d.lock();
            for k in ks {
                m.remove(k);
            }
        }
        Value::List(ks) => {
            let mut m = d.lock();
            for k in ks {
                m.remove(k.as_str()?);
            }
        }
        _ => return Err(ExecError::ToHere.into()),
    }
    one(Value::Dict(d))
}

fn op_clear(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let d = arg(&vs, 0)?.as_dict()?.clone();
    d.lock().clear();
    one(Value::Dict(d))
}

// Comparisons ---------------------------------------------------------------

fn op_equal(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    one(Value::Bool(arg(&vs, 0)? == arg(&vs, 1)?))
}

fn op_nequal(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    one(Value::Bool(arg(&vs, 0)? != arg(&vs, 1)?))
}

#[derive(Clone, Copy)]
enum CmpOp {
    Lt,
    Lte,
    Gt,
    Gte,
}

fn order_cmp(cmp: CmpOp, x: &Value, y: &Value) -> Exec<bool> {
    fn pick<T: PartialOrd>(cmp: CmpOp, a: &T, b: &T) -> bool {
        match cmp {
            CmpOp::Lt => a < b,
            CmpOp::Lte => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Gte => a >= b,
        }
    }
    Ok(match (x, y) {
        (Value::Int(a), Value::Int(b)) => pick(cmp, a, b),
        (Value::Float(a), Value::Float(b)) => pick(cmp, a, b),
        (Value::Byte(a), Value::Byte(b)) => pick(cmp, a, b),
        (Value::Rune(a), Value::Rune(b)) => pick(cmp, a, b),
        (Value::Str(a), Value::Str(b)) => pick(cmp, a, b),
        (Value::Bytes(a), Value::Bytes(b)) => pick(cmp, a, b),
        _ => return Err(ExecError::ToHere.into()),
    })
}

fn op_lt(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    one(Value::Bool(order_cmp(CmpOp::Lt, arg(&vs, 0)?, arg(&vs, 1)?)?))
}

fn op_lte(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    one(Value::Bool(order_cmp(CmpOp::Lte, arg(&vs, 0)?, arg(&vs, 1)?)?))
}

fn op_gt(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    one(Value::Bool(order_cmp(CmpOp::Gt, arg(&vs, 0)?, arg(&vs, 1)?)?))
}

fn op_gte(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    one(Value::Bool(order_cmp(CmpOp::Gte, arg(&vs, 0)?, arg(&vs, 1)?)?))
}

// Strict typing: any non-empty string reads as not-a-number.
fn op_isnan(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let nan = match arg(&vs, 0)? {
        Value::Nil
        | Value::Bool(_)
        | Value::Byte(_)
        | Value::Rune(_)
        | Value::Int(_)
        | Value::Big(_)
        | Value::Time(_) => false,
        Value::Float(f) => f.is_nan(),
        Value::Str(s) => !s.is_empty(),
        _ => true,
    };
    one(Value::Bool(nan))
}

fn op_within(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let x = arg(&vs, 0)?;
    let lo = arg(&vs, 1)?;
    let hi = arg(&vs, 2)?;
    let ok = order_cmp(CmpOp::Lte, lo, x)? && order_cmp(CmpOp::Lt, x, hi)?;
    one(Value::Bool(ok))
}

// Logic ---------------------------------------------------------------------

fn op_both(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    one(Value::Bool(
        arg(&vs, 0)?.as_bool()? && arg(&vs, 1)?.as_bool()?,
    ))
}

fn op_either(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    one(Value::Bool(
        arg(&vs, 0)?.as_bool()? || arg(&vs, 1)?.as_bool()?,
    ))
}

// An empty set is vacuously true.
fn op_every(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let mut all = true;
    for v in arg(&vs, 0)?.as_list()? {
        if !v.as_bool()? {
            all = false;
            break;
        }
    }
    one(Value::Bool(all))
}

// SOME(0) holds unconditionally; otherwise at least n members are true.
fn op_some(a: &mut Actuator, p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let mut n = p.aux_int(0)?;
    if n == 0 {
        return one(Value::Bool(true));
    }
    for v in arg(&vs, 0)?.as_list()? {
        if v.as_bool()? {
            n -= 1;
            if n == 0 {
                return one(Value::Bool(true));
            }
        }
    }
    one(Value::Bool(false))
}

// Pattern -------------------------------------------------------------------

fn op_model(a: &mut Actuator, p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let source = match arg(&vs, 0)? {
        Value::Bytes(b) => b.clone(),
        Value::Script(s) => s.source().to_vec(),
        _ => return Err(ExecError::ToHere.into()),
    };
    let capture = p.aux_flag(0)?;
    let (picks, ok) = pattern::check(&source, p.data_code()?, a.ver())?;

    if !capture {
        return one(Value::Bool(ok));
    }
    if ok {
        return one(Value::List(picks));
    }
    Err(ExecError::ModelFailure.into())
}

// Environment ---------------------------------------------------------------

fn op_env(a: &mut Actuator, p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let n = p.aux_int(0)?;
    // Derived entries come from the executor, the rest from the env map.
    let v = match n {
        op::env::GOTOS => Value::Int(i64::from(a.gotos())),
        op::env::JUMPS => Value::Int(i64::from(a.jumps())),
        _ => a.envs().borrow().env_item(n),
    };
    one(v)
}

fn op_out(a: &mut Actuator, p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let i = p.aux_int(0)? as usize;
    let n = p.aux_int(1)?;
    let v = a.envs().borrow().tx_out_item(i, n);
    one(v)
}

fn op_in(a: &mut Actuator, p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let v = a.envs().borrow().tx_in_item(p.aux_int(0)?);
    one(v)
}

fn op_inout(a: &mut Actuator, p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let v = a.envs().borrow().tx_inout_item(p.aux_int(0)?);
    one(v)
}

fn op_xfrom(a: &mut Actuator, p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    one(a.xfrom_item(p.aux_int(0)?))
}

fn op_var(a: &mut Actuator, p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    one(a.global_value(p.aux_int(0)?))
}

fn op_setvar(a: &mut Actuator, p: &Parsed, mut vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    if vs.is_empty() {
        return Err(ExecError::ToHere.into());
    }
    a.global_set(p.aux_int(0)?, vs.remove(0));
    none()
}

fn op_source(a: &mut Actuator, p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let bytes = match p.aux_int(0)? {
        op::source::PAST => a.script.past().to_vec(),
        op::source::PAST_FROM_NULL => a.script.past_from_null().to_vec(),
        op::source::ALL => a.script.source().to_vec(),
        op::source::NEXT => a.script.tail().to_vec(),
        op::source::ALL_FROM_NULL => a.script.source_from_null().to_vec(),
        _ => return Err(ExecError::ToHere.into()),
    };
    one(Value::Bytes(bytes))
}

fn op_mulsig(a: &mut Actuator, p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let i = p.aux_int(0)? as u8;
    let v = a.envs().borrow().mul_sig_n(i);
    one(Value::Bool(v))
}

// Tools ---------------------------------------------------------------------

fn op_eval(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let target = arg(&vs, 0)?.as_script()?.clone();
    let mut child = a.eval_new(target.source());
    run_embed(&mut child)?;
    one(Value::List(child.stack_data()))
}

fn op_copy(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let v = arg(&vs, 0)?;
    if !v.is_slice() {
        return Err(ExecError::ToHere.into());
    }
    one(v.clone())
}

// Deep copy recurses only through `List` members; leaves stay shared.
fn op_dcopy(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let v = arg(&vs, 0)?;
    if !v.is_slice() {
        return Err(ExecError::ToHere.into());
    }
    match v {
        Value::List(x) => one(Value::List(deep_copy(x))),
        other => one(other.clone()),
    }
}

fn deep_copy(list: &[Value]) -> Vec<Value> {
    list.iter()
        .map(|v| match v {
            Value::List(x) => Value::List(deep_copy(x)),
            other => other.clone(),
        })
        .collect()
}

fn op_keyval(a: &mut Actuator, p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let d = arg(&vs, 0)?.as_dict()?;
    let (mut keys, mut values) = (Vec::new(), Vec::new());
    for (k, v) in d.lock().iter() {
        keys.push(k.clone());
        values.push(v.clone());
    }
    match p.aux_int(0)? {
        op::keyval::BOTH => Ok(Some(vec![Value::Strs(keys), Value::List(values)])),
        op::keyval::KEYS => one(Value::Strs(keys)),
        op::keyval::VALUES => one(Value::List(values)),
        _ => Err(ExecError::ToHere.into()),
    }
}

// Regex matching over a string or byte target. The default mode returns
// the first match with its submatches, or the bare match when there are
// none; `g` all full matches, `G` all matches with submatches.
fn op_match(a: &mut Actuator, p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let target = arg(&vs, 0)?;
    if !matches!(target, Value::Str(_) | Value::Bytes(_)) {
        return Err(ExecError::ToHere.into());
    }
    let re = arg(&vs, 1)?.as_regex()?.clone();

    match p.aux_int(0)? as u8 {
        b'g' => one(Value::List(pattern::re_match_all(&re, target))),
        b'G' => one(Value::List(pattern::re_match_every(&re, target))),
        _ => {
            let mut all = pattern::re_match_first(&re, target);
            match all.len() {
                0 => one(Value::Nil),
                1 => one(all.remove(0)),
                _ => one(Value::List(all)),
            }
        }
    }
}

// Substring by character count; a negative start counts from the end.
fn op_substr(a: &mut Actuator, p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let n = p.aux_int(0)? as usize;
    let s = arg(&vs, 0)?.as_str()?;
    let i = arg(&vs, 1)?.as_int()?;

    if i >= 0 {
        let out: String = s.chars().skip(i as usize).take(n).collect();
        return one(Value::Str(out));
    }
    let chars: Vec<char> = s.chars().collect();
    let start = i + chars.len() as i64;
    if start < 0 || start as usize + n > chars.len() {
        return Err(ExecError::IndexRange(i).into());
    }
    one(Value::Str(chars[start as usize..start as usize + n].iter().collect()))
}

// String replacement: a plain pattern honors the count (0 = all), a regex
// pattern always replaces every occurrence.
fn op_replace(a: &mut Actuator, p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let n = p.aux_int(0)? as usize;
    let s = arg(&vs, 0)?.as_str()?;
    let to = arg(&vs, 2)?.as_str()?;
    match arg(&vs, 1)? {
        Value::Str(pat) => {
            let out = if n == 0 {
                s.replace(pat.as_str(), to)
            } else {
                s.replacen(pat.as_str(), to, n)
            };
            one(Value::Str(out))
        }
        Value::Regex(re) => one(Value::Str(re.text.replace_all(s, to).into_owned())),
        _ => Err(ExecError::ToHere.into()),
    }
}

fn op_srand(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let out = match arg(&vs, 0)? {
        Value::Bytes(x) => {
            let mut buf = x.clone();
            buf.shuffle(&mut OsRng);
            Value::Bytes(buf)
        }
        Value::Runes(x) => {
            let mut buf = x.clone();
            buf.shuffle(&mut OsRng);
            Value::Runes(buf)
        }
        Value::List(x) => {
            let mut buf = x.clone();
            buf.shuffle(&mut OsRng);
            Value::List(buf)
        }
        Value::Ints(x) => {
            let mut buf = x.clone();
            buf.shuffle(&mut OsRng);
            Value::Ints(buf)
        }
        Value::Floats(x) => {
            let mut buf = x.clone();
            buf.shuffle(&mut OsRng);
            Value::Floats(buf)
        }
        Value::Strs(x) => {
            let mut buf = x.clone();
            buf.shuffle(&mut OsRng);
            Value::Strs(buf)
        }
        _ => return Err(ExecError::ToHere.into()),
    };
    one(out)
}

// Cryptographically secure random below the given bound.
fn op_random(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    match vs.first() {
        None => one(Value::Int(OsRng.gen_range(0..i64::MAX))),
        Some(Value::Int(max)) => {
            if *max <= 0 {
                return Err(ExecError::Arithmetic.into());
            }
            one(Value::Int(OsRng.gen_range(0..*max)))
        }
        Some(Value::Big(max)) => {
            if **max <= BigInt::from(0) {
                return Err(ExecError::Arithmetic.into());
            }
            let v = OsRng.gen_bigint_range(&BigInt::from(0), max);
            one(Value::Big(Arc::new(v)))
        }
        Some(_) => Err(ExecError::ToHere.into()),
    }
}

// Fast random seeded from the clock mixed with the script offset.
fn op_qrandom(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let seed = (Utc::now().timestamp_micros() as u64)
        .wrapping_mul(a.script.offset() as u64 + 1);
    let mut rng = StdRng::seed_from_u64(seed);
    match vs.first() {
        None => one(Value::Int(rng.gen_range(0..i64::MAX))),
        Some(v) => {
            let max = v.as_int()?;
            if max <= 0 {
                return Err(ExecError::Arithmetic.into());
            }
            one(Value::Int(rng.gen_range(0..max)))
        }
    }
}

fn op_cmpflo(a: &mut Actuator, p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let x = arg(&vs, 0)?.as_float()?;
    let y = arg(&vs, 1)?.as_float()?;
    let d = arg(&vs, 2)?.as_float()?;
    let eq = (x - y).abs() <= d;
    let ok = match p.aux_int(0)? {
        -1 => x < y || eq,
        0 => eq,
        1 => x > y || eq,
        _ => return Err(ExecError::ToHere.into()),
    };
    one(Value::Bool(ok))
}

fn op_range(a: &mut Actuator, p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let size = p.aux_int(0)? as usize;
    match (arg(&vs, 0)?, arg(&vs, 1)?) {
        (Value::Int(start), step) => {
            let step = step.as_int()?;
            let mut buf = Vec::with_capacity(size);
            let mut v = *start;
            for _ in 0..size {
                buf.push(v);
                v = v.wrapping_add(step);
            }
            one(Value::Ints(buf))
        }
        (Value::Float(start), step) => {
            let step = step.as_float()?;
            let mut buf = Vec::with_capacity(size);
            let mut v = *start;
            for _ in 0..size {
                buf.push(v);
                v += step;
            }
            one(Value::Floats(buf))
        }
        _ => Err(ExecError::ToHere.into()),
    }
}

// System --------------------------------------------------------------------

fn op_sys_time(a: &mut Actuator, p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let t = Utc::now();
    let v = match p.aux_int(0)? {
        op::timef::DEFAULT => Value::Time(t),
        op::timef::STAMP => Value::Int(t.timestamp_millis()),
        op::timef::YEAR => Value::Int(i64::from(t.year())),
        op::timef::MONTH => Value::Int(i64::from(t.month())),
        op::timef::YEAR_DAY => Value::Int(i64::from(t.ordinal())),
        op::timef::DAY => Value::Int(i64::from(t.day())),
        op::timef::WEEK_DAY => Value::Int(i64::from(t.weekday().num_days_from_sunday())),
        op::timef::HOUR => Value::Int(i64::from(t.hour())),
        op::timef::MINUTE => Value::Int(i64::from(t.minute())),
        op::timef::SECOND => Value::Int(i64::from(t.second())),
        op::timef::MILLISECOND => Value::Int(t.timestamp_millis().rem_euclid(1000)),
        op::timef::MICROSECOND => Value::Int(t.timestamp_micros().rem_euclid(1_000_000)),
        _ => return Err(ExecError::ToHere.into()),
    };
    one(v)
}

fn op_sys_award(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let h = arg(&vs, 0)?.as_int()?;
    let v = a.envs().borrow().check_award(h);
    one(Value::Int(v))
}

fn op_sys_null(a: &mut Actuator, _p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    a.script.post_null();
    none()
}

// Functions -----------------------------------------------------------------
// The argument's runtime variant selects encode versus decode.

fn op_fn_base58(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    match arg(&vs, 0)? {
        Value::Bytes(b) => one(Value::Str(bs58::encode(b).into_string())),
        Value::Str(s) => {
            let buf = bs58::decode(s)
                .into_vec()
                .map_err(|_| ExecError::BadConversion("invalid base58"))?;
            one(Value::Bytes(buf))
        }
        _ => Err(ExecError::ToHere.into()),
    }
}

fn op_fn_base32(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    const ALPHABET: base32::Alphabet = base32::Alphabet::Rfc4648 { padding: false };
    match arg(&vs, 0)? {
        Value::Bytes(b) => one(Value::Str(base32::encode(ALPHABET, b))),
        Value::Str(s) => {
            let buf = base32::decode(ALPHABET, s)
                .ok_or(ExecError::BadConversion("invalid base32"))?;
            one(Value::Bytes(buf))
        }
        _ => Err(ExecError::ToHere.into()),
    }
}

fn op_fn_base64(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    match arg(&vs, 0)? {
        Value::Bytes(b) => one(Value::Str(URL_SAFE_NO_PAD.encode(b))),
        Value::Str(s) => {
            let buf = URL_SAFE_NO_PAD
                .decode(s)
                .map_err(|_| ExecError::BadConversion("invalid base64"))?;
            one(Value::Bytes(buf))
        }
        _ => Err(ExecError::ToHere.into()),
    }
}

fn op_fn_pubhash(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    match arg(&vs, 0)? {
        Value::Bytes(pk) => one(Value::Bytes(addr::pub_key_hash(pk, &[]))),
        Value::Str(s) => {
            let (pkh, _) = addr::decode(s)?;
            one(Value::Bytes(pkh))
        }
        _ => Err(ExecError::ToHere.into()),
    }
}

fn op_fn_mpubhash(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let pks = bytes_list(arg(&vs, 0)?)?;
    let pkhs = bytes_list(arg(&vs, 1)?)?;
    one(Value::Bytes(addr::mul_hash(&pks, &pkhs)?))
}

fn op_fn_address(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let pkh = arg(&vs, 0)?.as_bytes()?;
    let prefix = arg(&vs, 1)?.as_str()?;
    one(Value::Str(addr::encode(pkh, prefix)))
}

fn op_fn_checksig(a: &mut Actuator, p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let flag = p.aux_int(0)?;
    let sig = arg(&vs, 0)?.as_bytes()?;
    let pubkey = arg(&vs, 1)?.as_bytes()?;
    let msg = a.spent_msg(flag);
    one(Value::Bool(addr::check_sig(a.ver(), pubkey, &msg, sig)))
}

fn op_fn_mchecksig(a: &mut Actuator, p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let flag = p.aux_int(0)?;
    let sigs = bytes_list(arg(&vs, 0)?)?;
    let pbks = bytes_list(arg(&vs, 1)?)?;
    if sigs.len() != pbks.len() {
        return Err(ExecError::SigCount.into());
    }
    let (ids, keys) = addr::mul_pub_keys(&pbks);
    a.envs().borrow_mut().set_mul_sig(&ids);

    let msg = a.spent_msg(flag);
    one(Value::Bool(addr::check_sigs(a.ver(), &keys, &msg, &sigs)))
}

fn hash_digest(algo: i64, width: u32, data: &[u8]) -> Exec<Vec<u8>> {
    Ok(match (algo, width) {
        (op::hashalgo::SHA3, 224) => Sha3_224::digest(data).to_vec(),
        (op::hashalgo::SHA2, 224) => Sha224::digest(data).to_vec(),
        (op::hashalgo::BLAKE2, 224) => addr::blake_sum_224(data),
        (op::hashalgo::SHA3, 256) => Sha3_256::digest(data).to_vec(),
        (op::hashalgo::SHA2, 256) => Sha256::digest(data).to_vec(),
        (op::hashalgo::BLAKE2, 256) => addr::blake_sum_256(data).to_vec(),
        (op::hashalgo::SHA3, 384) => Sha3_384::digest(data).to_vec(),
        (op::hashalgo::SHA2, 384) => Sha384::digest(data).to_vec(),
        (op::hashalgo::BLAKE2, 384) => addr::blake_sum_384(data).to_vec(),
        (op::hashalgo::SHA3, 512) => Sha3_512::digest(data).to_vec(),
        (op::hashalgo::SHA2, 512) => Sha512::digest(data).to_vec(),
        (op::hashalgo::BLAKE2, 512) => addr::blake_sum_512(data).to_vec(),
        _ => return Err(ExecError::ToHere.into()),
    })
}

fn op_fn_hash224(a: &mut Actuator, p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    one(Value::Bytes(hash_digest(
        p.aux_int(0)?,
        224,
        arg(&vs, 0)?.as_bytes()?,
    )?))
}

fn op_fn_hash256(a: &mut Actuator, p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    one(Value::Bytes(hash_digest(
        p.aux_int(0)?,
        256,
        arg(&vs, 0)?.as_bytes()?,
    )?))
}

fn op_fn_hash384(a: &mut Actuator, p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    one(Value::Bytes(hash_digest(
        p.aux_int(0)?,
        384,
        arg(&vs, 0)?.as_bytes()?,
    )?))
}

fn op_fn_hash512(a: &mut Actuator, p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    one(Value::Bytes(hash_digest(
        p.aux_int(0)?,
        512,
        arg(&vs, 0)?.as_bytes()?,
    )?))
}

fn op_fn_printf(a: &mut Actuator, _p: &Parsed, vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    a.revert();
    let fmt = arg(&vs, 0)?.as_str()?;
    print!("{}", printf_style(fmt, &vs[1..]));
    none()
}

// Minimal %-substitution: every directive consumes one argument, %%
// escapes a percent sign.
fn printf_style(fmt: &str, args: &[Value]) -> String {
    let mut out = String::new();
    let mut next = args.iter();
    let mut chars = fmt.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some(_) => {
                if let Some(v) = next.next() {
                    out.push_str(&display(v));
                }
            }
            None => out.push('%'),
        }
    }
    out
}

// Placeholder and reserved slots.
fn op_invalid(_a: &mut Actuator, p: &Parsed, _vs: Vec<Value>) -> Exec<Option<Vec<Value>>> {
    Err(ExecError::InvalidOpcode(p.code).into())
}

// Table ---------------------------------------------------------------------

fn build_table() -> [Instx; 256] {
    let mut t = [Instx {
        call: op_invalid as Handler,
        argn: 0,
    }; 256];
    let mut set = |c: u8, call: Handler, argn: i8| {
        t[c as usize] = Instx { call, argn };
    };

    // Value producers
    set(op::NIL, op_nil, 0);
    set(op::TRUE, op_true, 0);
    set(op::FALSE, op_false, 0);
    for c in [
        op::UINT8N,
        op::UINT8,
        op::UINT63N,
        op::UINT63,
        op::BYTE,
        op::RUNE,
        op::FLOAT32,
        op::FLOAT64,
        op::DATE,
        op::BIGINT,
        op::DATA8,
        op::DATA16,
        op::TEXT8,
        op::TEXT16,
        op::REGEXP,
        op::CODE,
    ] {
        set(c, op_lit, 0);
    }

    // Capture chain
    set(op::CAPTURE, op_capture, 0);
    set(op::BRING, op_bring, 0);
    set(op::SCOPE_PUT, op_scope_put, 0);
    set(op::SCOPE_VAL, op_scope_val, 0);
    set(op::LOOP_VAL, op_loop_val, 0);

    // Stack operations
    set(op::NOP, op_nop, -1);
    set(op::PUSH, op_push, -1);
    set(op::SHIFT, op_shift, 0);
    set(op::CLONE, op_clone, 0);
    set(op::POP, op_pop, 0);
    set(op::POPS, op_pops, 0);
    set(op::TOP, op_top, 0);
    set(op::TOPS, op_tops, 0);
    set(op::PEEK, op_peek, 1);
    set(op::PEEKS, op_peeks, 1);

    // Collections
    set(op::SLICE, op_slice, 3);
    set(op::REVERSE, op_reverse, 1);
    set(op::MERGE, op_merge, -1);
    set(op::EXPAND, op_expand, -1);
    set(op::GLUE, op_glue, 1);
    set(op::SPREAD, op_spread, 1);
    set(op::ITEM, op_item, 2);
    set(op::SET, op_set, 3);
    set(op::SIZE, op_size, 1);
    set(op::MAP, op_map, -1);
    set(op::FILTER, op_filter, -1);

    // Interaction
    set(op::INPUT, op_input, 0);
    set(op::OUTPUT, op_output, -1);
    set(op::BUFDUMP, op_bufdump, 0);
    set(op::PRINT, op_print, -1);

    // Results
    set(op::PASS, op_pass, 1);
    set(op::FAIL, op_fail, 1);
    set(op::GOTO, op_goto, -1);
    set(op::JUMP, op_jump, 0);
    set(op::EXIT, op_exit, -1);
    set(op::RETURN, op_return, 1);

    // Flow control
    set(op::IF, op_if, 1);
    set(op::ELSE, op_else, 0);
    set(op::SWITCH, op_switch, 2);
    set(op::CASE, op_case, 0);
    set(op::DEFAULT, op_default, 0);
    set(op::EACH, op_each, 1);
    set(op::CONTINUE, op_continue, -1);
    set(op::BREAK, op_break, -1);
    set(op::FALLTHROUGH, op_fallthrough, 0);
    set(op::BLOCK, op_block, 0);

    // Conversions
    set(op::TO_BOOL, op_to_bool, 1);
    set(op::TO_BYTE, op_to_byte, 1);
    set(op::TO_RUNE, op_to_rune, 1);
    set(op::TO_INT, op_to_int, 1);
    set(op::TO_BIGINT, op_to_bigint, 1);
    set(op::TO_FLOAT, op_to_float, 1);
    set(op::TO_STRING, op_to_string, 1);
    set(op::TO_BYTES, op_to_bytes, 1);
    set(op::TO_RUNES, op_to_runes, 1);
    set(op::TO_TIME, op_to_time, 1);
    set(op::TO_REGEXP, op_to_regexp, 1);
    set(op::ANYS, op_anys, 1);
    set(op::DICT, op_dict, 2);

    // Arithmetic; the symbol operators stay unreachable outside
    // expression blocks.
    set(op::EXPR, op_expr, 0);
    set(op::MUL, op_mul, 2);
    set(op::DIV, op_div, 2);
    set(op::ADD, op_add, 2);
    set(op::SUB, op_sub, 2);
    set(op::POW, op_pow, 2);
    set(op::MOD, op_mod, 2);
    set(op::LMOV, op_lmov, 2);
    set(op::RMOV, op_rmov, 2);
    set(op::AND, op_and, 2);
    set(op::ANDX, op_andx, 2);
    set(op::OR, op_or, 2);
    set(op::XOR, op_xor, -1);
    set(op::NEG, op_neg, 1);
    set(op::NOT, op_not, 1);
    set(op::DIVMOD, op_divmod, 2);
    set(op::DUP, op_dup, 1);
    set(op::DEL, op_del, 2);
    set(op::CLEAR, op_clear, 1);

    // Comparisons
    set(op::EQUAL, op_equal, 2);
    set(op::NEQUAL, op_nequal, 2);
    set(op::LT, op_lt, 2);
    set(op::LTE, op_lte, 2);
    set(op::GT, op_gt, 2);
    set(op::GTE, op_gte, 2);
    set(op::ISNAN, op_isnan, 1);
    set(op::WITHIN, op_within, 3);

    // Logic
    set(op::BOTH, op_both, 2);
    set(op::EVERY, op_every, 1);
    set(op::EITHER, op_either, 2);
    set(op::SOME, op_some, 1);

    // Pattern; the pattern opcodes themselves only live inside MODEL.
    set(op::MODEL, op_model, 1);

    // Environment
    set(op::ENV, op_env, 0);
    set(op::OUT, op_out, 0);
    set(op::IN, op_in, 0);
    set(op::INOUT, op_inout, 0);
    set(op::XFROM, op_xfrom, 0);
    set(op::VAR, op_var, 0);
    set(op::SETVAR, op_setvar, 1);
    set(op::SOURCE, op_source, 0);
    set(op::MULSIG, op_mulsig, 0);

    // Tools
    set(op::EVAL, op_eval, 1);
    set(op::COPY, op_copy, 1);
    set(op::DCOPY, op_dcopy, 1);
    set(op::KEYVAL, op_keyval, 1);
    set(op::MATCH, op_match, 2);
    set(op::SUBSTR, op_substr, 2);
    set(op::REPLACE, op_replace, 3);
    set(op::SRAND, op_srand, 1);
    set(op::RANDOM, op_random, -1);
    set(op::QRANDOM, op_qrandom, -1);
    set(op::CMPFLO, op_cmpflo, 3);
    set(op::RANGE, op_range, 2);

    // System
    set(op::SYS_TIME, op_sys_time, 0);
    set(op::SYS_AWARD, op_sys_award, 1);
    set(op::SYS_NULL, op_sys_null, 0);

    // Functions
    set(op::FN_BASE58, op_fn_base58, 1);
    set(op::FN_BASE32, op_fn_base32, 1);
    set(op::FN_BASE64, op_fn_base64, 1);
    set(op::FN_PUBHASH, op_fn_pubhash, 1);
    set(op::FN_MPUBHASH, op_fn_mpubhash, 2);
    set(op::FN_ADDRESS, op_fn_address, 2);
    set(op::FN_CHECKSIG, op_fn_checksig, 2);
    set(op::FN_MCHECKSIG, op_fn_mchecksig, 2);
    set(op::FN_HASH224, op_fn_hash224, 1);
    set(op::FN_HASH256, op_fn_hash256, 1);
    set(op::FN_HASH384, op_fn_hash384, 1);
    set(op::FN_HASH512, op_fn_hash512, 1);
    set(op::FN_PRINTF, op_fn_printf, -1);

    t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printf_substitutes_in_order() {
        let out = printf_style("a=%v b=%d %% c", &[Value::Int(1), Value::Str("x".into())]);
        assert_eq!(out, "a=1 b=x % c");
    }

    #[test]
    fn slice_range_supports_negative_bounds() {
        assert_eq!(slice_range(-2, None, 4).unwrap(), (2, 4));
        assert_eq!(slice_range(0, Some(-1), 4).unwrap(), (0, 3));
        assert!(slice_range(5, None, 4).is_err());
    }

    #[test]
    fn hash_widths_match_their_names() {
        for (w, len) in [(224u32, 28usize), (256, 32), (384, 48), (512, 64)] {
            for algo in [op::hashalgo::SHA3, op::hashalgo::SHA2, op::hashalgo::BLAKE2] {
                assert_eq!(hash_digest(algo, w, b"x").unwrap().len(), len);
            }
        }
    }

    #[test]
    fn prefixed_int_parsing() {
        assert_eq!(parse_int_prefixed("42"), Some(42));
        assert_eq!(parse_int_prefixed("-0x10"), Some(-16));
        assert_eq!(parse_int_prefixed("0b101"), Some(5));
        assert_eq!(parse_int_prefixed("0o17"), Some(15));
        assert_eq!(parse_int_prefixed("x"), None);
    }

    #[test]
    fn deep_copy_recurses_lists_only() {
        let inner = vec![Value::Int(1)];
        let src = vec![Value::List(inner), Value::Bytes(vec![2])];
        let copy = deep_copy(&src);
        assert_eq!(copy, src);
    }
}
