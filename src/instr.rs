//! Instruction decoding: the raw zero-copy view used by the pattern
//! matcher and the parsed typed view used by execution.
//!
//! Both views are derived from the same per-opcode layout so that the
//! executable and the matcher always agree on encoding. Aux fields use
//! big-endian for fixed widths; variable-width integers use the varint
//! codec below (unsigned groups of seven bits, zig-zag for signed).

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use num_bigint::{BigInt, Sign};

use crate::error::{Exec, ExecError};
use crate::ext;
use crate::opcode as op;
use crate::script::Script;
use crate::value::{RegexPair, Value};

/// Maximum encoded length of a varint.
pub const MAX_VARINT_LEN: usize = 10;

/// Decodes an unsigned varint; returns the value and the encoded length.
pub fn uvarint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut x: u64 = 0;
    let mut shift = 0u32;
    for (i, &b) in buf.iter().enumerate() {
        if i >= MAX_VARINT_LEN {
            return None;
        }
        if b < 0x80 {
            if i == MAX_VARINT_LEN - 1 && b > 1 {
                return None;
            }
            return Some((x | (u64::from(b) << shift), i + 1));
        }
        x |= u64::from(b & 0x7f) << shift;
        shift += 7;
    }
    None
}

/// Decodes a zig-zag signed varint.
pub fn varint(buf: &[u8]) -> Option<(i64, usize)> {
    let (ux, n) = uvarint(buf)?;
    let mut x = (ux >> 1) as i64;
    if ux & 1 != 0 {
        x = !x;
    }
    Some((x, n))
}

pub fn write_uvarint(out: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        out.push((v as u8) | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
}

pub fn write_varint(out: &mut Vec<u8>, v: i64) {
    let ux = ((v << 1) ^ (v >> 63)) as u64;
    write_uvarint(out, ux);
}

/// Raw instruction view: byte slices into the source buffer.
///
/// `args` entries are `None` only in matcher-built reference instructions,
/// where a missing field means "don't care".
#[derive(Debug, Clone)]
pub struct RawInst<'a> {
    pub code: u8,
    pub args: Vec<Option<&'a [u8]>>,
    pub data: Option<&'a [u8]>,
    pub size: usize,
}

impl<'a> RawInst<'a> {
    pub fn plain(code: u8) -> Self {
        Self {
            code,
            args: Vec::new(),
            data: None,
            size: 1,
        }
    }
}

fn need(code: &[u8], n: usize) -> Exec<()> {
    if code.len() < n {
        return Err(ExecError::TruncatedScript.into());
    }
    Ok(())
}

fn raw_data_fixed(code: &[u8], n: usize) -> Exec<RawInst<'_>> {
    need(code, 1 + n)?;
    Ok(RawInst {
        code: code[0],
        args: Vec::new(),
        data: Some(&code[1..1 + n]),
        size: 1 + n,
    })
}

fn raw_data_varint(code: &[u8]) -> Exec<RawInst<'_>> {
    let (_, n) = uvarint(&code[1..]).ok_or(ExecError::TruncatedScript)?;
    Ok(RawInst {
        code: code[0],
        args: Vec::new(),
        data: Some(&code[1..1 + n]),
        size: 1 + n,
    })
}

fn raw_arg_fixed(code: &[u8], n: usize) -> Exec<RawInst<'_>> {
    need(code, 1 + n)?;
    Ok(RawInst {
        code: code[0],
        args: vec![Some(&code[1..1 + n])],
        data: None,
        size: 1 + n,
    })
}

fn raw_arg1_bytes(code: &[u8]) -> Exec<RawInst<'_>> {
    need(code, 2)?;
    let n = code[1] as usize;
    need(code, 2 + n)?;
    Ok(RawInst {
        code: code[0],
        args: vec![Some(&code[1..2])],
        data: Some(&code[2..2 + n]),
        size: 2 + n,
    })
}

fn raw_arg2_bytes(code: &[u8]) -> Exec<RawInst<'_>> {
    need(code, 3)?;
    let n = u16::from_be_bytes([code[1], code[2]]) as usize;
    need(code, 3 + n)?;
    Ok(RawInst {
        code: code[0],
        args: vec![Some(&code[1..3])],
        data: Some(&code[3..3 + n]),
        size: 3 + n,
    })
}

fn raw_argx_bytes(code: &[u8]) -> Exec<RawInst<'_>> {
    let (n, ln) = uvarint(&code[1..]).ok_or(ExecError::TruncatedScript)?;
    let n = n as usize;
    need(code, 1 + ln + n)?;
    Ok(RawInst {
        code: code[0],
        args: vec![Some(&code[1..1 + ln])],
        data: Some(&code[1 + ln..1 + ln + n]),
        size: 1 + ln + n,
    })
}

fn raw_model(code: &[u8]) -> Exec<RawInst<'_>> {
    need(code, 3)?;
    let x = u16::from_be_bytes([code[1], code[2]]);
    let n = (x & 0x3fff) as usize;
    need(code, 3 + n)?;
    Ok(RawInst {
        code: code[0],
        args: vec![Some(&code[1..3])],
        data: Some(&code[3..3 + n]),
        size: 3 + n,
    })
}

fn raw_regex(code: &[u8]) -> Exec<RawInst<'_>> {
    need(code, 3)?;
    let n = code[2] as usize;
    need(code, 3 + n)?;
    Ok(RawInst {
        code: code[0],
        args: vec![Some(&code[1..2]), Some(&code[2..3])],
        data: Some(&code[3..3 + n]),
        size: 3 + n,
    })
}

fn raw_jump(code: &[u8]) -> Exec<RawInst<'_>> {
    need(code, 11)?;
    Ok(RawInst {
        code: code[0],
        args: vec![Some(&code[1..5]), Some(&code[5..9]), Some(&code[9..11])],
        data: None,
        size: 11,
    })
}

fn raw_within_int(code: &[u8]) -> Exec<RawInst<'_>> {
    let (_, n1) = varint(&code[1..]).ok_or(ExecError::TruncatedScript)?;
    let (_, n2) = varint(&code[1 + n1..]).ok_or(ExecError::TruncatedScript)?;
    Ok(RawInst {
        code: code[0],
        args: vec![
            Some(&code[1..1 + n1]),
            Some(&code[1 + n1..1 + n1 + n2]),
        ],
        data: None,
        size: 1 + n1 + n2,
    })
}

fn raw_within_float(code: &[u8]) -> Exec<RawInst<'_>> {
    need(code, 21)?;
    Ok(RawInst {
        code: code[0],
        args: vec![
            Some(&code[1..9]),
            Some(&code[9..17]),
            Some(&code[17..21]),
        ],
        data: None,
        size: 21,
    })
}

fn raw_out(code: &[u8]) -> Exec<RawInst<'_>> {
    need(code, 4)?;
    Ok(RawInst {
        code: code[0],
        args: vec![Some(&code[1..3]), Some(&code[3..4])],
        data: None,
        size: 4,
    })
}

fn raw_mox(code: &[u8]) -> Exec<RawInst<'_>> {
    need(code, 2)?;
    let n = ext::mox_size(code[1]);
    need(code, 2 + n)?;
    Ok(RawInst {
        code: code[0],
        args: vec![Some(&code[1..2])],
        data: Some(&code[2..2 + n]),
        size: 2 + n,
    })
}

fn raw_exten(code: &[u8], n: usize) -> Exec<RawInst<'_>> {
    need(code, 3 + n)?;
    Ok(RawInst {
        code: code[0],
        args: vec![Some(&code[1..3])],
        data: if n > 0 { Some(&code[3..3 + n]) } else { None },
        size: 3 + n,
    })
}

/// Decodes the raw view of the instruction starting at `code[0]`.
pub fn raw(code: &[u8]) -> Exec<RawInst<'_>> {
    need(code, 1)?;
    match code[0] {
        op::UINT8N | op::UINT8 | op::BYTE => raw_data_fixed(code, 1),
        op::UINT63N | op::UINT63 | op::DATE => raw_data_varint(code),
        op::RUNE | op::FLOAT32 => raw_data_fixed(code, 4),
        op::FLOAT64 => raw_data_fixed(code, 8),
        op::BIGINT | op::DATA8 | op::TEXT8 | op::REGEXP | op::CODE => raw_arg1_bytes(code),
        op::DATA16 | op::TEXT16 => raw_arg2_bytes(code),

        op::SCOPE_VAL | op::LOOP_VAL => raw_arg_fixed(code, 1),
        op::SHIFT | op::CLONE | op::POPS | op::TOPS | op::PEEKS => raw_arg_fixed(code, 1),
        op::MAP | op::FILTER => raw_arg1_bytes(code),
        op::INPUT | op::BUFDUMP => raw_arg_fixed(code, 1),
        op::GOTO | op::JUMP => raw_jump(code),
        op::IF | op::ELSE | op::CASE | op::DEFAULT | op::EACH => raw_arg1_bytes(code),
        op::SWITCH | op::BLOCK => raw_argx_bytes(code),
        op::TO_STRING | op::ANYS => raw_arg_fixed(code, 1),
        op::EXPR => raw_arg1_bytes(code),
        op::DUP | op::SOME => raw_arg_fixed(code, 1),

        op::MODEL => raw_model(code),
        op::VAL_PICK | op::WILDNUM | op::WILDPART | op::TYPE_IS | op::RE_PICK => {
            raw_arg_fixed(code, 1)
        }
        op::WILDLIST => raw_arg1_bytes(code),
        op::WITHIN_INT => raw_within_int(code),
        op::WITHIN_FLOAT => raw_within_float(code),
        op::RE => raw_regex(code),

        op::ENV | op::IN | op::INOUT | op::XFROM | op::VAR | op::SETVAR | op::SOURCE
        | op::MULSIG => raw_arg_fixed(code, 1),
        op::OUT => raw_out(code),

        op::KEYVAL | op::MATCH | op::REPLACE | op::CMPFLO => raw_arg_fixed(code, 1),
        op::SUBSTR | op::RANGE => raw_arg_fixed(code, 2),
        op::SYS_TIME => raw_arg_fixed(code, 1),

        op::FN_CHECKSIG | op::FN_MCHECKSIG | op::FN_HASH224 | op::FN_HASH256
        | op::FN_HASH384 | op::FN_HASH512 | op::FN_X => raw_arg_fixed(code, 1),
        op::MO_RE | op::MO_TIME | op::MO_MATH | op::MO_CRYPT => raw_arg_fixed(code, 1),
        op::MO_X => raw_mox(code),
        op::EX_FN => raw_arg_fixed(code, 2),
        op::EX_INST => {
            need(code, 3)?;
            let i = u16::from_be_bytes([code[1], code[2]]);
            raw_exten(code, ext::ext_size(i))
        }
        op::EX_PRIV => {
            need(code, 3)?;
            let i = u16::from_be_bytes([code[1], code[2]]);
            raw_exten(code, ext::priv_size(i))
        }

        c => Ok(RawInst::plain(c)),
    }
}

/// Typed aux argument decoded from the inline bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aux {
    Int(i64),
    Float(f64),
    Flag(bool),
}

/// Typed data block of an instruction.
#[derive(Debug, Clone)]
pub enum ParsedData {
    None,
    Val(Value),
    Code(Vec<u8>),
}

/// Parsed instruction view: aux arguments and data decoded per opcode.
#[derive(Debug, Clone)]
pub struct Parsed {
    pub code: u8,
    pub aux: Vec<Aux>,
    pub data: ParsedData,
    pub size: usize,
}

impl Parsed {
    pub fn aux_int(&self, i: usize) -> Exec<i64> {
        match self.aux.get(i) {
            Some(Aux::Int(v)) => Ok(*v),
            _ => Err(ExecError::ToHere.into()),
        }
    }

    pub fn aux_float(&self, i: usize) -> Exec<f64> {
        match self.aux.get(i) {
            Some(Aux::Float(v)) => Ok(*v),
            _ => Err(ExecError::ToHere.into()),
        }
    }

    pub fn aux_flag(&self, i: usize) -> Exec<bool> {
        match self.aux.get(i) {
            Some(Aux::Flag(v)) => Ok(*v),
            _ => Err(ExecError::ToHere.into()),
        }
    }

    pub fn data_value(&self) -> Exec<&Value> {
        match &self.data {
            ParsedData::Val(v) => Ok(v),
            _ => Err(ExecError::ToHere.into()),
        }
    }

    pub fn data_code(&self) -> Exec<&[u8]> {
        match &self.data {
            ParsedData::Code(c) => Ok(c),
            _ => Err(ExecError::ToHere.into()),
        }
    }
}

fn parsed(code: u8, aux: Vec<Aux>, data: ParsedData, size: usize) -> Parsed {
    Parsed {
        code,
        aux,
        data,
        size,
    }
}

fn parse_arg1(code: &[u8]) -> Exec<Parsed> {
    let r = raw(code)?;
    let b = r.args[0].ok_or(ExecError::ToHere)?[0];
    Ok(parsed(r.code, vec![Aux::Int(i64::from(b))], ParsedData::None, r.size))
}

fn parse_arg1_signed(code: &[u8]) -> Exec<Parsed> {
    let r = raw(code)?;
    let b = r.args[0].ok_or(ExecError::ToHere)?[0] as i8;
    Ok(parsed(r.code, vec![Aux::Int(i64::from(b))], ParsedData::None, r.size))
}

fn parse_arg2(code: &[u8]) -> Exec<Parsed> {
    let r = raw(code)?;
    let a = r.args[0].ok_or(ExecError::ToHere)?;
    let n = u16::from_be_bytes([a[0], a[1]]);
    Ok(parsed(r.code, vec![Aux::Int(i64::from(n))], ParsedData::None, r.size))
}

fn parse_arg_code(code: &[u8]) -> Exec<Parsed> {
    let r = raw(code)?;
    let data = r.data.unwrap_or(&[]).to_vec();
    Ok(parsed(
        r.code,
        vec![Aux::Int(data.len() as i64)],
        ParsedData::Code(data),
        r.size,
    ))
}

fn parse_value(code: u8, v: Value, size: usize) -> Parsed {
    parsed(code, Vec::new(), ParsedData::Val(v), size)
}

/// Decodes the parsed view of the instruction starting at `code[0]`.
pub fn parse(code: &[u8]) -> Exec<Parsed> {
    need(code, 1)?;
    match code[0] {
        op::UINT8N => {
            let r = raw(code)?;
            let b = r.data.ok_or(ExecError::ToHere)?[0];
            Ok(parse_value(r.code, Value::Int(-i64::from(b)), r.size))
        }
        op::UINT8 => {
            let r = raw(code)?;
            let b = r.data.ok_or(ExecError::ToHere)?[0];
            Ok(parse_value(r.code, Value::Int(i64::from(b)), r.size))
        }
        op::UINT63N => {
            let r = raw(code)?;
            let (v, _) = uvarint(r.data.ok_or(ExecError::ToHere)?)
                .ok_or(ExecError::TruncatedScript)?;
            Ok(parse_value(r.code, Value::Int((v as i64).wrapping_neg()), r.size))
        }
        op::UINT63 => {
            let r = raw(code)?;
            let (v, _) = uvarint(r.data.ok_or(ExecError::ToHere)?)
                .ok_or(ExecError::TruncatedScript)?;
            Ok(parse_value(r.code, Value::Int(v as i64), r.size))
        }
        op::BYTE => {
            let r = raw(code)?;
            Ok(parse_value(r.code, Value::Byte(r.data.ok_or(ExecError::ToHere)?[0]), r.size))
        }
        op::RUNE => {
            let r = raw(code)?;
            let d = r.data.ok_or(ExecError::ToHere)?;
            let v = i32::from_be_bytes([d[0], d[1], d[2], d[3]]);
            Ok(parse_value(r.code, Value::Rune(v), r.size))
        }
        op::FLOAT32 => {
            let r = raw(code)?;
            let d = r.data.ok_or(ExecError::ToHere)?;
            let v = f32::from_be_bytes([d[0], d[1], d[2], d[3]]);
            Ok(parse_value(r.code, Value::Float(f64::from(v)), r.size))
        }
        op::FLOAT64 => {
            let r = raw(code)?;
            let d = r.data.ok_or(ExecError::ToHere)?;
            let mut b = [0u8; 8];
            b.copy_from_slice(d);
            Ok(parse_value(r.code, Value::Float(f64::from_be_bytes(b)), r.size))
        }
        op::DATE => {
            let r = raw(code)?;
            let (ms, _) = varint(r.data.ok_or(ExecError::ToHere)?)
                .ok_or(ExecError::TruncatedScript)?;
            let t = Utc
                .timestamp_millis_opt(ms)
                .single()
                .ok_or(ExecError::BadConversion("timestamp out of range"))?;
            Ok(parse_value(r.code, Value::Time(t), r.size))
        }
        op::BIGINT => {
            let r = raw(code)?;
            let d = r.data.ok_or(ExecError::ToHere)?;
            let v = BigInt::from_bytes_be(Sign::Plus, d);
            Ok(parsed(
                r.code,
                vec![Aux::Int(d.len() as i64)],
                ParsedData::Val(Value::Big(Arc::new(v))),
                r.size,
            ))
        }
        op::DATA8 | op::DATA16 => {
            let r = raw(code)?;
            let d = r.data.ok_or(ExecError::ToHere)?;
            Ok(parsed(
                r.code,
                vec![Aux::Int(d.len() as i64)],
                ParsedData::Val(Value::Bytes(d.to_vec())),
                r.size,
            ))
        }
        op::TEXT8 | op::TEXT16 => {
            let r = raw(code)?;
            let d = r.data.ok_or(ExecError::ToHere)?;
            let s = std::str::from_utf8(d)
                .map_err(|_| ExecError::BadConversion("text is not valid UTF-8"))?;
            Ok(parsed(
                r.code,
                vec![Aux::Int(d.len() as i64)],
                ParsedData::Val(Value::Str(s.to_string())),
                r.size,
            ))
        }
        op::REGEXP => {
            let r = raw(code)?;
            let d = r.data.ok_or(ExecError::ToHere)?;
            let pat = std::str::from_utf8(d)
                .map_err(|_| ExecError::BadConversion("regex is not valid UTF-8"))?;
            let re = RegexPair::compile(pat)?;
            Ok(parsed(
                r.code,
                vec![Aux::Int(d.len() as i64)],
                ParsedData::Val(Value::Regex(Arc::new(re))),
                r.size,
            ))
        }
        op::CODE => {
            let r = raw(code)?;
            let d = r.data.ok_or(ExecError::ToHere)?;
            Ok(parsed(
                r.code,
                vec![Aux::Int(d.len() as i64)],
                ParsedData::Val(Value::Script(Arc::new(Script::new(d.to_vec())))),
                r.size,
            ))
        }

        op::SCOPE_VAL | op::CMPFLO | op::SOURCE => parse_arg1_signed(code),
        op::LOOP_VAL | op::SHIFT | op::CLONE | op::POPS | op::TOPS | op::PEEKS
        | op::INPUT | op::BUFDUMP | op::TO_STRING | op::ANYS | op::DUP | op::SOME
        | op::VAL_PICK | op::WILDNUM | op::WILDPART | op::TYPE_IS | op::RE_PICK
        | op::ENV | op::IN | op::INOUT | op::XFROM | op::VAR | op::SETVAR
        | op::MULSIG | op::KEYVAL | op::MATCH | op::REPLACE
        | op::SYS_TIME | op::FN_CHECKSIG | op::FN_MCHECKSIG | op::FN_HASH224
        | op::FN_HASH256 | op::FN_HASH384 | op::FN_HASH512 | op::FN_X | op::MO_RE
        | op::MO_TIME | op::MO_MATH | op::MO_CRYPT => parse_arg1(code),

        op::SUBSTR | op::RANGE | op::EX_FN => parse_arg2(code),

        op::MAP | op::FILTER | op::IF | op::ELSE | op::CASE | op::DEFAULT | op::EACH
        | op::SWITCH | op::BLOCK | op::EXPR | op::WILDLIST => parse_arg_code(code),

        op::GOTO | op::JUMP => {
            let r = raw(code)?;
            let h = r.args[0].ok_or(ExecError::ToHere)?;
            let n = r.args[1].ok_or(ExecError::ToHere)?;
            let i = r.args[2].ok_or(ExecError::ToHere)?;
            Ok(parsed(
                r.code,
                vec![
                    Aux::Int(i64::from(u32::from_be_bytes([h[0], h[1], h[2], h[3]]))),
                    Aux::Int(i64::from(u32::from_be_bytes([n[0], n[1], n[2], n[3]]))),
                    Aux::Int(i64::from(u16::from_be_bytes([i[0], i[1]]))),
                ],
                ParsedData::None,
                r.size,
            ))
        }

        op::MODEL => {
            let r = raw(code)?;
            let a = r.args[0].ok_or(ExecError::ToHere)?;
            let capture = a[0] & 0b1000_0000 != 0;
            let data = r.data.unwrap_or(&[]).to_vec();
            Ok(parsed(
                r.code,
                vec![Aux::Flag(capture), Aux::Int(data.len() as i64)],
                ParsedData::Code(data),
                r.size,
            ))
        }

        op::WITHIN_INT => {
            let r = raw(code)?;
            let (low, _) = varint(r.args[0].ok_or(ExecError::ToHere)?)
                .ok_or(ExecError::TruncatedScript)?;
            let (up, _) = varint(r.args[1].ok_or(ExecError::ToHere)?)
                .ok_or(ExecError::TruncatedScript)?;
            Ok(parsed(
                r.code,
                vec![Aux::Int(low), Aux::Int(up)],
                ParsedData::None,
                r.size,
            ))
        }

        op::WITHIN_FLOAT => {
            let r = raw(code)?;
            let low = float_from(r.args[0].ok_or(ExecError::ToHere)?);
            let up = float_from(r.args[1].ok_or(ExecError::ToHere)?);
            let dev = float_from(r.args[2].ok_or(ExecError::ToHere)?);
            Ok(parsed(
                r.code,
                vec![Aux::Float(low), Aux::Float(up), Aux::Float(dev)],
                ParsedData::None,
                r.size,
            ))
        }

        op::RE => {
            let r = raw(code)?;
            let flag = r.args[0].ok_or(ExecError::ToHere)?[0];
            let len = r.args[1].ok_or(ExecError::ToHere)?[0];
            let d = r.data.ok_or(ExecError::ToHere)?;
            let pat = std::str::from_utf8(d)
                .map_err(|_| ExecError::BadConversion("regex is not valid UTF-8"))?;
            let re = RegexPair::compile(pat)?;
            Ok(parsed(
                r.code,
                vec![Aux::Int(i64::from(flag)), Aux::Int(i64::from(len))],
                ParsedData::Val(Value::Regex(Arc::new(re))),
                r.size,
            ))
        }

        op::OUT => {
            let r = raw(code)?;
            let a = r.args[0].ok_or(ExecError::ToHere)?;
            let i = u16::from_be_bytes([a[0], a[1]]);
            let n = r.args[1].ok_or(ExecError::ToHere)?[0];
            Ok(parsed(
                r.code,
                vec![Aux::Int(i64::from(i)), Aux::Int(i64::from(n))],
                ParsedData::None,
                r.size,
            ))
        }

        op::MO_X => {
            let r = raw(code)?;
            let i = r.args[0].ok_or(ExecError::ToHere)?[0];
            Ok(parsed(
                r.code,
                vec![Aux::Int(i64::from(i))],
                ParsedData::Code(r.data.unwrap_or(&[]).to_vec()),
                r.size,
            ))
        }

        op::EX_INST | op::EX_PRIV => {
            let r = raw(code)?;
            let a = r.args[0].ok_or(ExecError::ToHere)?;
            let i = u16::from_be_bytes([a[0], a[1]]);
            Ok(parsed(
                r.code,
                vec![Aux::Int(i64::from(i))],
                ParsedData::Code(r.data.unwrap_or(&[]).to_vec()),
                r.size,
            ))
        }

        c => Ok(parsed(c, Vec::new(), ParsedData::None, 1)),
    }
}

/// Reads an 8-byte (f64) or 4-byte (f32) big-endian float field.
fn float_from(bytes: &[u8]) -> f64 {
    if bytes.len() == 4 {
        f64::from(f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    } else {
        let mut b = [0u8; 8];
        b.copy_from_slice(bytes);
        f64::from_be_bytes(b)
    }
}
