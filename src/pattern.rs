//! Pattern matching over nested bytecode.
//!
//! The matcher walks the source script and the model in parallel; each
//! model opcode decides how far both sides advance and whether the step
//! holds. A match succeeds when the model is fully consumed and the source
//! is exhausted exactly. Structured blocks recurse with the same capture
//! buffer; `...` segments retry a reduced, capture-free version of the
//! same table against successive source windows.

use crate::addr;
use crate::error::{Exec, ExecError};
use crate::instr::{self, Aux, Parsed, ParsedData, RawInst};
use crate::opcode as op;
use crate::value::{RegexPair, Value};

/// Matches `source` against `model`, returning the capture buffer and the
/// match outcome.
pub fn check(source: &[u8], model: &[u8], ver: u32) -> Exec<(Vec<Value>, bool)> {
    let mut st = State {
        last: None,
        matched: Vec::new(),
        buffer: Vec::new(),
        capturing: true,
        ver,
    };
    let ok = check_at(&mut st, source, model)?;
    Ok((st.buffer, ok))
}

struct State<'a> {
    /// Source position of the most recent instruction a model step
    /// consumed; `#` captures read from here.
    last: Option<&'a [u8]>,
    /// Result set of the most recent `RE{}` step; `&` captures read it.
    matched: Vec<Value>,
    buffer: Vec<Value>,
    /// Off inside `...` segment probing, where captures must not fire.
    capturing: bool,
    ver: u32,
}

impl<'a> State<'a> {
    fn scratch(ver: u32) -> Self {
        Self {
            last: None,
            matched: Vec::new(),
            buffer: Vec::new(),
            capturing: false,
            ver,
        }
    }

    fn push(&mut self, vs: Vec<Value>) {
        if self.capturing {
            self.buffer.extend(vs);
        }
    }
}

/// Model opcodes that consume no source and may therefore run after the
/// source is exhausted.
fn zero_source(code: u8) -> bool {
    matches!(code, op::VAL_PICK | op::RE_PICK)
}

fn check_at<'a>(st: &mut State<'a>, s: &'a [u8], m: &[u8]) -> Exec<bool> {
    let mut so = 0usize;
    let mut mo = 0usize;

    while mo < m.len() {
        let c = m[mo];
        if so >= s.len() && !zero_source(c) {
            return Ok(false);
        }
        let (n1, n2, ok) = step(st, c, &s[so..], &m[mo..])?;
        if !ok {
            return Ok(false);
        }
        if n1 > 0 {
            st.last = Some(&s[so..]);
        }
        so += n1;
        mo += n2;
    }
    Ok(so >= s.len())
}

// One model step: (source advance, model advance, holds).
fn step<'a>(
    st: &mut State<'a>,
    code: u8,
    s: &'a [u8],
    m: &[u8],
) -> Exec<(usize, usize, bool)> {
    match code {
        op::VAL_PICK => m_val_pick(st, m),
        op::WILDCARD => m_wildcard(s, m),
        op::WILDNUM => m_wildnum(s, m),
        op::WILDPART => m_wildpart(st, s, m),
        op::WILDLIST => m_wildlist(s, m),
        op::TYPE_IS => m_type_is(s, m),
        op::WITHIN_INT => m_within_int(s, m),
        op::WITHIN_FLOAT => m_within_float(s, m),
        op::RE => m_re(st, s, m),
        op::RE_PICK => m_re_pick(st, m),
        op::WILD_LUMP => m_wild_lump(st, s, m),
        op::MAP | op::FILTER | op::IF | op::ELSE | op::SWITCH | op::CASE | op::DEFAULT
        | op::EACH | op::BLOCK | op::EXPR => m_block(st, s, m),
        _ => m_default(st, s, m),
    }
}

// `#(flag)`: capture components of the previously matched instruction.
fn m_val_pick(st: &mut State<'_>, m: &[u8]) -> Exec<(usize, usize, bool)> {
    let p = instr::parse(m)?;
    let flag = p.aux_int(0)?;
    let last = st.last.ok_or(ExecError::ToHere)?;
    let ins = instr::parse(last)?;
    let picked = inst_value(&ins, flag);
    st.push(picked);
    Ok((0, p.size, true))
}

// `_`: any single instruction.
fn m_wildcard(s: &[u8], m: &[u8]) -> Exec<(usize, usize, bool)> {
    let a = instr::raw(s)?;
    let z = instr::raw(m)?;
    Ok((a.size, z.size, true))
}

// `_(n)`: any n instructions.
fn m_wildnum(s: &[u8], m: &[u8]) -> Exec<(usize, usize, bool)> {
    let p = instr::parse(m)?;
    let n = p.aux_int(0)?;
    let mut size = 0usize;
    for _ in 0..n {
        if size >= s.len() {
            return Ok((0, p.size, false));
        }
        size += instr::raw(&s[size..])?.size;
    }
    Ok((size, p.size, true))
}

// `?(flag)`: local-wildcard the following model instruction.
fn m_wildpart<'a>(st: &mut State<'a>, s: &'a [u8], m: &[u8]) -> Exec<(usize, usize, bool)> {
    let p = instr::parse(m)?;
    let flag = WildPart(p.aux_int(0)?);

    let built = model_instor(&m[p.size..], flag)?;
    let src = instr::raw(s)?;
    let (n1, n2, ok) = test(&src, &built, flag, st.ver);
    Ok((n1, p.size + n2, ok))
}

// `?(len){..}`: optional inline sequence: consumed when the next bytes
// equal it, skipped otherwise.
fn m_wildlist(s: &[u8], m: &[u8]) -> Exec<(usize, usize, bool)> {
    let p = instr::parse(m)?;
    let inline = p.data_code()?;
    let n = inline.len();
    if s.len() >= n && &s[..n] == inline {
        return Ok((n, p.size, true));
    }
    Ok((0, p.size, true))
}

// `!{Type}(tag)`: opcode class check.
fn m_type_is(s: &[u8], m: &[u8]) -> Exec<(usize, usize, bool)> {
    let p = instr::parse(m)?;
    let tag = p.aux_int(0)?;
    let chk = type_check(tag)?;
    let src = instr::raw(s)?;
    Ok((src.size, p.size, chk(src.code)))
}

fn m_within_int(s: &[u8], m: &[u8]) -> Exec<(usize, usize, bool)> {
    let p = instr::parse(m)?;
    let low = p.aux_int(0)?;
    let up = p.aux_int(1)?;
    let src = instr::parse(s)?;
    let ok = matches!(src.data, ParsedData::Val(Value::Int(v)) if low <= v && v < up);
    Ok((src.size, p.size, ok))
}

fn m_within_float(s: &[u8], m: &[u8]) -> Exec<(usize, usize, bool)> {
    let p = instr::parse(m)?;
    let low = p.aux_float(0)?;
    let up = p.aux_float(1)?;
    let dev = p.aux_float(2)?;
    let src = instr::parse(s)?;
    let ok = matches!(
        src.data,
        ParsedData::Val(Value::Float(v)) if (low < v || float_eq(low, v, dev)) && v < up
    );
    Ok((src.size, p.size, ok))
}

// `RE{flag}(len)..`: regex over the current instruction's data. The high
// flag bit demands a non-empty result.
fn m_re(st: &mut State<'_>, s: &[u8], m: &[u8]) -> Exec<(usize, usize, bool)> {
    let p = instr::parse(m)?;
    let flag = p.aux_int(0)?;
    let re = p.data_value()?.as_regex()?.clone();
    let src = instr::parse(s)?;

    let target = match &src.data {
        ParsedData::Val(v @ (Value::Str(_) | Value::Bytes(_))) => Some(v.clone()),
        _ => None,
    };
    let found = match target {
        None => Vec::new(),
        Some(v) => match (flag & 0x7f) as u8 {
            b'g' => re_match_all(&re, &v),
            b'G' => re_match_every(&re, &v),
            _ => re_match_first(&re, &v),
        },
    };
    let ok = flag & 0x80 == 0 || !found.is_empty();
    if st.capturing {
        st.matched = found;
    }
    Ok((src.size, p.size, ok))
}

// `&(i)`: capture the i-th regex result; out of range yields Nil.
fn m_re_pick(st: &mut State<'_>, m: &[u8]) -> Exec<(usize, usize, bool)> {
    let p = instr::parse(m)?;
    let i = p.aux_int(0)?;
    let v = usize::try_from(i)
        .ok()
        .and_then(|i| st.matched.get(i).cloned())
        .unwrap_or(Value::Nil);
    st.push(vec![v]);
    Ok((0, p.size, true))
}

// `...`: consume source instructions until the trailing model segment
// matches the window that follows.
fn m_wild_lump(st: &mut State<'_>, s: &[u8], m: &[u8]) -> Exec<(usize, usize, bool)> {
    let seg = lump_bytes(&m[1..])?;
    let (size, ok) = lump_all(seg, s, st.ver)?;
    Ok((size, 1, ok))
}

// Structured blocks recurse on their inner bytes with the same capture
// buffer. Crossing the block boundary with `...` is intentionally
// impossible; `MODEL` blocks stay opaque bytes.
fn m_block<'a>(st: &mut State<'a>, s: &'a [u8], m: &[u8]) -> Exec<(usize, usize, bool)> {
    let a = instr::raw(s)?;
    let z = instr::raw(m)?;
    let mut ok = false;
    if a.code == z.code {
        let saved_last = st.last;
        ok = check_at(st, a.data.unwrap_or(&[]), z.data.unwrap_or(&[]))?;
        st.last = saved_last;
    }
    Ok((a.size, z.size, ok))
}

// Plain instructions compare field by field.
fn m_default(st: &mut State<'_>, s: &[u8], m: &[u8]) -> Exec<(usize, usize, bool)> {
    let a = instr::raw(s)?;
    let z = instr::raw(m)?;
    Ok(test(&a, &z, WildPart(0), st.ver))
}

/// Local-wildcard flag bits of `?(flag)`: bit 0 marks the instruction
/// optional, bits 1..=5 wildcard aux fields, bit 6 the data, bit 7 turns
/// on hash-mode data comparison.
#[derive(Debug, Clone, Copy)]
struct WildPart(i64);

impl WildPart {
    fn is_option(self) -> bool {
        self.0 & 1 != 0
    }

    fn wild_arg(self, n: u32) -> bool {
        self.0 & (1 << n) != 0
    }

    fn wild_data(self) -> bool {
        self.0 & 0x40 != 0
    }

    fn in_hash(self) -> bool {
        self.0 & 0x80 != 0
    }
}

// Field-wise comparison of a source instruction against a (possibly
// wildcarded) model reference.
fn test(a: &RawInst<'_>, z: &RawInst<'_>, flag: WildPart, ver: u32) -> (usize, usize, bool) {
    if a.code != z.code {
        return (0, z.size, flag.is_option());
    }
    let ok = args_equal(&a.args, &z.args)
        && data_equal(a.data, z.data, flag.in_hash(), ver);
    (a.size, z.size, ok)
}

fn args_equal(aa: &[Option<&[u8]>], zz: &[Option<&[u8]>]) -> bool {
    if zz.is_empty() {
        return true;
    }
    aa.iter().zip(zz).all(|(a, z)| match (a, z) {
        (_, None) => true,
        (Some(a), Some(z)) => a == z,
        (None, Some(_)) => false,
    })
}

fn data_equal(target: Option<&[u8]>, model: Option<&[u8]>, hash: bool, ver: u32) -> bool {
    let Some(model) = model else { return true };
    let target = target.unwrap_or(&[]);
    if hash {
        return addr::sum160(ver, target) == model;
    }
    target == model
}

fn float_eq(x: f64, y: f64, dev: f64) -> bool {
    (x - y).abs() <= dev
}

// Capture selection for `#(flag)`: bit 0 opcode, bits 1..=5 aux fields,
// bit 6 data, bit 7 the whole instruction.
fn inst_value(p: &Parsed, flag: i64) -> Vec<Value> {
    if flag & 0x80 != 0 {
        return vec![
            Value::Int(i64::from(p.code)),
            Value::List(p.aux.iter().map(aux_value).collect()),
            data_value(&p.data),
        ];
    }
    let mut buf = Vec::new();
    if flag & 1 != 0 {
        buf.push(Value::Int(i64::from(p.code)));
    }
    for bit in 1..6u32 {
        if flag & (1 << bit) != 0 {
            if let Some(a) = p.aux.get((bit - 1) as usize) {
                buf.push(aux_value(a));
            }
        }
    }
    if flag & 0x40 != 0 {
        buf.push(data_value(&p.data));
    }
    buf
}

fn aux_value(a: &Aux) -> Value {
    match a {
        Aux::Int(v) => Value::Int(*v),
        Aux::Float(v) => Value::Float(*v),
        Aux::Flag(v) => Value::Bool(*v),
    }
}

fn data_value(d: &ParsedData) -> Value {
    match d {
        ParsedData::None => Value::Nil,
        ParsedData::Val(v) => v.clone(),
        ParsedData::Code(c) => Value::Bytes(c.clone()),
    }
}

fn type_check(tag: i64) -> Exec<fn(u8) -> bool> {
    Ok(match tag {
        op::typeis::BOOL => |c| c == op::TRUE || c == op::FALSE,
        op::typeis::INT => is_int_code,
        op::typeis::BYTE => |c| c == op::BYTE,
        op::typeis::RUNE => |c| c == op::RUNE,
        op::typeis::FLOAT => is_float_code,
        op::typeis::TIME => |c| c == op::DATE,
        op::typeis::BIGINT => |c| c == op::BIGINT,
        op::typeis::BYTES => |c| c == op::DATA8 || c == op::DATA16,
        op::typeis::STRING => |c| c == op::TEXT8 || c == op::TEXT16,
        op::typeis::REGEXP => |c| c == op::REGEXP,
        op::typeis::SCRIPT => |c| c == op::CODE,
        op::typeis::NUMBER => |c| is_int_code(c) || is_float_code(c),
        op::typeis::MODEL => |c| c == op::MODEL,
        _ => return Err(ExecError::BadTypeTag(tag).into()),
    })
}

fn is_int_code(c: u8) -> bool {
    (op::UINT8N..=op::UINT63).contains(&c)
}

fn is_float_code(c: u8) -> bool {
    c == op::FLOAT32 || c == op::FLOAT64
}

// Regex result helpers -----------------------------------------------------
// First match with submatches; non-participating groups read as empty.

pub(crate) fn re_match_first(re: &RegexPair, target: &Value) -> Vec<Value> {
    match target {
        Value::Str(s) => re.text.captures(s).map_or(Vec::new(), |caps| {
            caps.iter()
                .map(|g| Value::Str(g.map_or(String::new(), |m| m.as_str().to_string())))
                .collect()
        }),
        Value::Bytes(b) => re.bin.captures(b).map_or(Vec::new(), |caps| {
            caps.iter()
                .map(|g| Value::Bytes(g.map_or(Vec::new(), |m| m.as_bytes().to_vec())))
                .collect()
        }),
        _ => Vec::new(),
    }
}

pub(crate) fn re_match_all(re: &RegexPair, target: &Value) -> Vec<Value> {
    match target {
        Value::Str(s) => re
            .text
            .find_iter(s)
            .map(|m| Value::Str(m.as_str().to_string()))
            .collect(),
        Value::Bytes(b) => re
            .bin
            .find_iter(b)
            .map(|m| Value::Bytes(m.as_bytes().to_vec()))
            .collect(),
        _ => Vec::new(),
    }
}

pub(crate) fn re_match_every(re: &RegexPair, target: &Value) -> Vec<Value> {
    match target {
        Value::Str(s) => re
            .text
            .captures_iter(s)
            .map(|caps| {
                Value::List(
                    caps.iter()
                        .map(|g| Value::Str(g.map_or(String::new(), |m| m.as_str().to_string())))
                        .collect(),
                )
            })
            .collect(),
        Value::Bytes(b) => re
            .bin
            .captures_iter(b)
            .map(|caps| {
                Value::List(
                    caps.iter()
                        .map(|g| Value::Bytes(g.map_or(Vec::new(), |m| m.as_bytes().to_vec())))
                        .collect(),
                )
            })
            .collect(),
        _ => Vec::new(),
    }
}

// Segment wildcard ---------------------------------------------------------

// Model bytes from just after `...` up to the next `...` or the end.
fn lump_bytes(m: &[u8]) -> Exec<&[u8]> {
    let mut size = 0usize;
    while size < m.len() {
        let ins = instr::raw(&m[size..])?;
        if ins.code == op::WILD_LUMP {
            break;
        }
        size += ins.size;
    }
    Ok(&m[..size])
}

enum Round {
    Matched,
    Failed,
    /// Source ran out mid-segment; no later window can match either.
    Short,
}

fn lump_one(seg: &[u8], s: &[u8], ver: u32) -> Exec<Round> {
    let mut st = State::scratch(ver);
    let mut so = 0usize;
    let mut mo = 0usize;

    while mo < seg.len() {
        let c = seg[mo];
        if so >= s.len() && !zero_source(c) {
            return Ok(Round::Short);
        }
        let (n1, n2, ok) = step(&mut st, c, &s[so..], &seg[mo..])?;
        if !ok {
            return Ok(Round::Failed);
        }
        if n1 > 0 {
            st.last = Some(&s[so..]);
        }
        so += n1;
        mo += n2;
    }
    Ok(Round::Matched)
}

// Slides the window one source instruction at a time until the segment
// matches; reports the skipped byte count.
fn lump_all(seg: &[u8], s: &[u8], ver: u32) -> Exec<(usize, bool)> {
    let mut skipped = 0usize;
    let mut rest = s;
    loop {
        match lump_one(seg, rest, ver)? {
            Round::Matched => return Ok((skipped, true)),
            Round::Short => return Ok((0, false)),
            Round::Failed => {
                if rest.is_empty() {
                    return Ok((0, false));
                }
                let n = instr::raw(rest)?.size;
                skipped += n;
                rest = &rest[n..];
            }
        }
    }
}

// Matcher-builders ---------------------------------------------------------
// Compile the instruction following `?(flag)` into a reference with the
// wildcarded fields absent. Wildcarded fields occupy no space in the
// model encoding.

fn model_instor<'m>(code: &'m [u8], flag: WildPart) -> Exec<RawInst<'m>> {
    if code.is_empty() {
        return Err(ExecError::TruncatedScript.into());
    }
    match code[0] {
        op::UINT8N | op::UINT8 | op::BYTE => mi_data_fixed(code, flag, 1),
        op::RUNE | op::FLOAT32 => mi_data_fixed(code, flag, 4),
        op::FLOAT64 => mi_data_fixed(code, flag, 8),
        op::UINT63N | op::UINT63 | op::DATE => mi_data_varint(code, flag),
        op::BIGINT | op::DATA8 | op::TEXT8 | op::REGEXP | op::CODE | op::MAP | op::FILTER
        | op::IF | op::ELSE | op::CASE | op::DEFAULT | op::EACH | op::EXPR => {
            mi_arg1_bytes(code, flag)
        }
        op::DATA16 | op::TEXT16 => mi_arg2_bytes(code, flag),
        op::SWITCH | op::BLOCK => mi_argx_bytes(code, flag),
        op::MODEL => mi_model(code, flag),

        op::SCOPE_VAL | op::LOOP_VAL | op::SHIFT | op::CLONE | op::POPS | op::TOPS
        | op::PEEKS | op::INPUT | op::BUFDUMP | op::TO_STRING | op::ANYS | op::DUP
        | op::SOME | op::ENV | op::IN | op::INOUT | op::XFROM | op::VAR | op::SETVAR
        | op::SOURCE | op::MULSIG | op::KEYVAL | op::MATCH | op::REPLACE | op::CMPFLO
        | op::SYS_TIME | op::FN_CHECKSIG | op::FN_MCHECKSIG | op::FN_HASH224
        | op::FN_HASH256 | op::FN_HASH384 | op::FN_HASH512 | op::FN_X | op::MO_RE
        | op::MO_TIME | op::MO_MATH | op::MO_CRYPT => mi_arg_fixed(code, flag, 1),

        op::SUBSTR | op::RANGE | op::EX_FN => mi_arg_fixed(code, flag, 2),

        op::GOTO | op::JUMP => mi_jump(code, flag),
        op::OUT => mi_out(code, flag),
        op::MO_X => mi_exten(code, flag, 1),
        op::EX_INST | op::EX_PRIV => mi_exten(code, flag, 2),

        op::VAL_PICK | op::WILDCARD | op::WILDNUM | op::WILDPART | op::WILDLIST
        | op::TYPE_IS | op::WITHIN_INT | op::WITHIN_FLOAT | op::RE | op::RE_PICK
        | op::WILD_LUMP => Err(ExecError::ModelMatchBan.into()),

        c => Ok(RawInst::plain(c)),
    }
}

fn short(code: &[u8], n: usize) -> Exec<()> {
    if code.len() < n {
        return Err(ExecError::TruncatedScript.into());
    }
    Ok(())
}

// Hash-mode reference: the 20-byte digest replaces args and data.
fn hash_data(code: &[u8]) -> Exec<RawInst<'_>> {
    short(code, 1 + addr::SIZE160)?;
    Ok(RawInst {
        code: code[0],
        args: Vec::new(),
        data: Some(&code[1..1 + addr::SIZE160]),
        size: 1 + addr::SIZE160,
    })
}

fn mi_data_fixed(code: &[u8], flag: WildPart, n: usize) -> Exec<RawInst<'_>> {
    if flag.in_hash() {
        return hash_data(code);
    }
    let mut data = None;
    let mut size = 1;
    if !flag.wild_data() && !flag.wild_arg(1) {
        short(code, 1 + n)?;
        data = Some(&code[1..1 + n]);
        size += n;
    }
    Ok(RawInst {
        code: code[0],
        args: Vec::new(),
        data,
        size,
    })
}

fn mi_data_varint(code: &[u8], flag: WildPart) -> Exec<RawInst<'_>> {
    if flag.in_hash() {
        return hash_data(code);
    }
    let mut data = None;
    let mut size = 1;
    if !flag.wild_data() && !flag.wild_arg(1) {
        let (_, n) = instr::uvarint(&code[1..]).ok_or(ExecError::TruncatedScript)?;
        data = Some(&code[1..1 + n]);
        size += n;
    }
    Ok(RawInst {
        code: code[0],
        args: Vec::new(),
        data,
        size,
    })
}

fn mi_arg_fixed(code: &[u8], flag: WildPart, n: usize) -> Exec<RawInst<'_>> {
    let mut arg = None;
    let mut size = 1;
    if !flag.wild_arg(1) {
        short(code, 1 + n)?;
        arg = Some(&code[1..1 + n]);
        size += n;
    }
    Ok(RawInst {
        code: code[0],
        args: vec![arg],
        data: None,
        size,
    })
}

fn mi_arg1_bytes(code: &[u8], flag: WildPart) -> Exec<RawInst<'_>> {
    if flag.in_hash() {
        return hash_data(code);
    }
    let mut arg = None;
    let mut data = None;
    let mut size = 1;
    if !flag.wild_arg(1) {
        short(code, 2)?;
        let n = code[1] as usize;
        size += 1;
        if !flag.wild_data() {
            short(code, size + n)?;
            data = Some(&code[size..size + n]);
            size += n;
        }
        arg = Some(&code[1..2]);
    }
    Ok(RawInst {
        code: code[0],
        args: vec![arg],
        data,
        size,
    })
}

fn mi_arg2_bytes(code: &[u8], flag: WildPart) -> Exec<RawInst<'_>> {
    if flag.in_hash() {
        return hash_data(code);
    }
    let mut arg = None;
    let mut data = None;
    let mut size = 1;
    if !flag.wild_arg(1) {
        short(code, 3)?;
        let n = u16::from_be_bytes([code[1], code[2]]) as usize;
        size += 2;
        if !flag.wild_data() {
            short(code, size + n)?;
            data = Some(&code[size..size + n]);
            size += n;
        }
        arg = Some(&code[1..3]);
    }
    Ok(RawInst {
        code: code[0],
        args: vec![arg],
        data,
        size,
    })
}

fn mi_argx_bytes(code: &[u8], flag: WildPart) -> Exec<RawInst<'_>> {
    if flag.in_hash() {
        return hash_data(code);
    }
    let mut arg = None;
    let mut data = None;
    let mut size = 1;
    if !flag.wild_arg(1) {
        let (n, ln) = instr::uvarint(&code[1..]).ok_or(ExecError::TruncatedScript)?;
        let n = n as usize;
        size += ln;
        if !flag.wild_data() {
            short(code, size + n)?;
            data = Some(&code[size..size + n]);
            size += n;
        }
        arg = Some(&code[1..1 + ln]);
    }
    Ok(RawInst {
        code: code[0],
        args: vec![arg],
        data,
        size,
    })
}

fn mi_model(code: &[u8], flag: WildPart) -> Exec<RawInst<'_>> {
    if flag.in_hash() {
        return hash_data(code);
    }
    let mut arg = None;
    let mut data = None;
    let mut size = 1;
    if !flag.wild_arg(1) {
        short(code, 3)?;
        let n = (u16::from_be_bytes([code[1], code[2]]) & 0x3fff) as usize;
        size += 2;
        if !flag.wild_data() {
            short(code, size + n)?;
            data = Some(&code[size..size + n]);
            size += n;
        }
        arg = Some(&code[1..3]);
    }
    Ok(RawInst {
        code: code[0],
        args: vec![arg],
        data,
        size,
    })
}

fn mi_jump(code: &[u8], flag: WildPart) -> Exec<RawInst<'_>> {
    let widths = [4usize, 4, 2];
    let mut args: Vec<Option<&[u8]>> = vec![None; 3];
    let mut size = 1;
    for (i, w) in widths.iter().enumerate() {
        if !flag.wild_arg(i as u32 + 1) {
            short(code, size + w)?;
            args[i] = Some(&code[size..size + w]);
            size += w;
        }
    }
    Ok(RawInst {
        code: code[0],
        args,
        data: None,
        size,
    })
}

fn mi_out(code: &[u8], flag: WildPart) -> Exec<RawInst<'_>> {
    let widths = [2usize, 1];
    let mut args: Vec<Option<&[u8]>> = vec![None; 2];
    let mut size = 1;
    for (i, w) in widths.iter().enumerate() {
        if !flag.wild_arg(i as u32 + 1) {
            short(code, size + w)?;
            args[i] = Some(&code[size..size + w]);
            size += w;
        }
    }
    Ok(RawInst {
        code: code[0],
        args,
        data: None,
        size,
    })
}

// Free extension classes carry their own data; hash mode does not apply.
fn mi_exten(code: &[u8], flag: WildPart, idx_width: usize) -> Exec<RawInst<'_>> {
    let mut arg = None;
    let mut data = None;
    let mut size = 1;
    if !flag.wild_arg(1) {
        short(code, 1 + idx_width)?;
        size += idx_width;
        if !flag.wild_data() {
            let full = instr::raw(code)?;
            data = full.data;
            size = full.size;
        }
        arg = Some(&code[1..1 + idx_width]);
    }
    Ok(RawInst {
        code: code[0],
        args: vec![arg],
        data,
        size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u8_inst(v: u8) -> Vec<u8> {
        vec![op::UINT8, v]
    }

    #[test]
    fn wildcard_matches_any_single_instruction() {
        for src in [u8_inst(42), vec![op::TRUE], vec![op::DATA8, 2, 1, 2]] {
            let (picks, ok) = check(&src, &[op::WILDCARD], 1).unwrap();
            assert!(ok);
            assert!(picks.is_empty());
        }
    }

    #[test]
    fn identical_source_matches_without_captures() {
        let mut src = u8_inst(7);
        src.extend(vec![op::DATA8, 2, 9, 9]);
        let (picks, ok) = check(&src, &src.clone(), 1).unwrap();
        assert!(ok);
        assert!(picks.is_empty());
    }

    #[test]
    fn model_must_consume_the_whole_source() {
        let mut src = u8_inst(1);
        src.extend(u8_inst(2));
        let (_, ok) = check(&src, &[op::WILDCARD], 1).unwrap();
        assert!(!ok);
    }

    #[test]
    fn capture_reads_the_previous_instruction() {
        let src = u8_inst(42);
        // `_` then `#(code | data)`.
        let model = vec![op::WILDCARD, op::VAL_PICK, 0b0100_0001];
        let (picks, ok) = check(&src, &model, 1).unwrap();
        assert!(ok);
        assert_eq!(picks, vec![Value::Int(i64::from(op::UINT8)), Value::Int(42)]);
    }

    #[test]
    fn optional_instruction_tolerates_a_mismatch() {
        // Model expects TRUE optionally; source starts with an int.
        let mut model = vec![op::WILDPART, 0b0000_0001, op::TRUE];
        model.extend([op::WILDCARD]);
        let (_, ok) = check(&u8_inst(3), &model, 1).unwrap();
        assert!(ok);
    }

    #[test]
    fn wildcarded_data_ignores_the_value() {
        // ?(data-wild) over a one-byte int: value differs, still matches.
        let model = vec![op::WILDPART, 0b0100_0000, op::UINT8];
        let (_, ok) = check(&u8_inst(9), &model, 1).unwrap();
        assert!(ok);
        let (_, ok) = check(&[op::TRUE], &model, 1).unwrap();
        assert!(!ok);
    }

    #[test]
    fn hash_mode_compares_the_digest() {
        let payload = vec![1u8, 2, 3, 4];
        let mut src = vec![op::DATA8, payload.len() as u8];
        src.extend(&payload);

        let mut model = vec![op::WILDPART, 0b1000_0000, op::DATA8];
        model.extend(addr::sum160(1, &payload));
        let (_, ok) = check(&src, &model, 1).unwrap();
        assert!(ok);

        let mut wrong = vec![op::WILDPART, 0b1000_0000, op::DATA8];
        wrong.extend(addr::sum160(1, b"other"));
        let (_, ok) = check(&src, &wrong, 1).unwrap();
        assert!(!ok);
    }

    #[test]
    fn type_check_classifies_int_opcodes() {
        let model = vec![op::TYPE_IS, op::typeis::INT as u8];
        assert!(check(&u8_inst(5), &model, 1).unwrap().1);
        assert!(!check(&[op::TRUE], &model, 1).unwrap().1);
    }

    #[test]
    fn pattern_opcode_as_target_is_banned() {
        let model = vec![op::WILDPART, 0, op::WILDCARD];
        let err = check(&u8_inst(1), &model, 1).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Escape::Fault(ExecError::ModelMatchBan)
        ));
    }

    #[test]
    fn blocks_recurse_and_merge_captures() {
        // Source: IF{ Uint8(7) }, model: IF{ _ #(data) }.
        let src = vec![op::IF, 2, op::UINT8, 7];
        let model = vec![op::IF, 3, op::WILDCARD, op::VAL_PICK, 0b0100_0000];
        let (picks, ok) = check(&src, &model, 1).unwrap();
        assert!(ok);
        assert_eq!(picks, vec![Value::Int(7)]);
    }

    #[test]
    fn lump_skips_until_the_tail_matches() {
        let mut src = u8_inst(1);
        src.extend(u8_inst(2));
        src.extend(u8_inst(3));
        src.extend(vec![op::TRUE]);

        // `... TRUE` tolerates any prefix.
        let model = vec![op::WILD_LUMP, op::TRUE];
        let (_, ok) = check(&src, &model, 1).unwrap();
        assert!(ok);

        // `... FALSE` never finds its window.
        let model = vec![op::WILD_LUMP, op::FALSE];
        let (_, ok) = check(&src, &model, 1).unwrap();
        assert!(!ok);
    }

    #[test]
    fn within_int_checks_the_bounds() {
        let mut model = vec![op::WITHIN_INT];
        instr::write_varint(&mut model, 10);
        instr::write_varint(&mut model, 20);
        assert!(check(&u8_inst(15), &model, 1).unwrap().1);
        assert!(!check(&u8_inst(20), &model, 1).unwrap().1);
        assert!(!check(&u8_inst(9), &model, 1).unwrap().1);
    }
}
