//! Tagged runtime values.
//!
//! Scripts are dynamically typed; every handler does an exhaustive match
//! over this variant and treats unsupported combinations as shape errors.
//! The six sliceable sequences are `Bytes`, `Runes`, `List`, `Ints`,
//! `Floats`, `Strs`: conversions between `List` and the typed forms go
//! through the `ANYS` instruction.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use parking_lot::Mutex;

use crate::error::{Exec, ExecError};
use crate::script::Script;

/// String-keyed dictionary with shared in-place mutation. Insertion order
/// is irrelevant.
pub type Dict = Arc<Mutex<HashMap<String, Value>>>;

pub fn new_dict() -> Dict {
    Arc::new(Mutex::new(HashMap::new()))
}

/// A compiled regular expression usable against both text and raw bytes.
#[derive(Debug)]
pub struct RegexPair {
    pub text: regex::Regex,
    pub bin: regex::bytes::Regex,
    pattern: String,
}

impl RegexPair {
    pub fn compile(pattern: &str) -> Result<Self, ExecError> {
        let text =
            regex::Regex::new(pattern).map_err(|e| ExecError::BadRegex(e.to_string()))?;
        let bin = regex::bytes::Regex::new(pattern)
            .map_err(|e| ExecError::BadRegex(e.to_string()))?;
        Ok(Self {
            text,
            bin,
            pattern: pattern.to_string(),
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

/// The runtime value variant.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Byte(u8),
    /// Unicode code point, kept as a raw `i32` like the wire encoding.
    Rune(i32),
    Int(i64),
    Big(Arc<BigInt>),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Runes(Vec<i32>),
    Time(DateTime<Utc>),
    Regex(Arc<RegexPair>),
    Script(Arc<Script>),
    List(Vec<Value>),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Strs(Vec<String>),
    Dict(Dict),
}

impl Value {
    /// Short tag name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Byte(_) => "byte",
            Value::Rune(_) => "rune",
            Value::Int(_) => "int",
            Value::Big(_) => "bigint",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Runes(_) => "runes",
            Value::Time(_) => "time",
            Value::Regex(_) => "regexp",
            Value::Script(_) => "script",
            Value::List(_) => "list",
            Value::Ints(_) => "ints",
            Value::Floats(_) => "floats",
            Value::Strs(_) => "strings",
            Value::Dict(_) => "dict",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_bool(&self) -> Exec<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            _ => Err(ExecError::TypeMismatch("bool expected").into()),
        }
    }

    pub fn as_int(&self) -> Exec<i64> {
        match self {
            Value::Int(i) => Ok(*i),
            _ => Err(ExecError::TypeMismatch("int expected").into()),
        }
    }

    pub fn as_float(&self) -> Exec<f64> {
        match self {
            Value::Float(f) => Ok(*f),
            _ => Err(ExecError::TypeMismatch("float expected").into()),
        }
    }

    pub fn as_str(&self) -> Exec<&str> {
        match self {
            Value::Str(s) => Ok(s),
            _ => Err(ExecError::TypeMismatch("string expected").into()),
        }
    }

    pub fn as_bytes(&self) -> Exec<&[u8]> {
        match self {
            Value::Bytes(b) => Ok(b),
            _ => Err(ExecError::TypeMismatch("bytes expected").into()),
        }
    }

    pub fn as_list(&self) -> Exec<&[Value]> {
        match self {
            Value::List(l) => Ok(l),
            _ => Err(ExecError::TypeMismatch("list expected").into()),
        }
    }

    pub fn as_dict(&self) -> Exec<&Dict> {
        match self {
            Value::Dict(d) => Ok(d),
            _ => Err(ExecError::TypeMismatch("dict expected").into()),
        }
    }

    pub fn as_script(&self) -> Exec<&Arc<Script>> {
        match self {
            Value::Script(s) => Ok(s),
            _ => Err(ExecError::TypeMismatch("script expected").into()),
        }
    }

    pub fn as_regex(&self) -> Exec<&Arc<RegexPair>> {
        match self {
            Value::Regex(r) => Ok(r),
            _ => Err(ExecError::TypeMismatch("regexp expected").into()),
        }
    }

    /// Numeric promotion used by `MUL`/`DIV`/`SUB`/`POW` and the expression
    /// evaluator: `Int | Byte | Rune | Float` become `f64`, anything else is
    /// fatal.
    pub fn to_number(&self) -> Exec<f64> {
        match self {
            Value::Float(f) => Ok(*f),
            Value::Int(i) => Ok(*i as f64),
            Value::Byte(b) => Ok(*b as f64),
            Value::Rune(r) => Ok(*r as f64),
            _ => Err(ExecError::TypeMismatch("number expected").into()),
        }
    }

    /// True when the value is one of the six sliceable sequences.
    pub fn is_slice(&self) -> bool {
        matches!(
            self,
            Value::Bytes(_)
                | Value::Runes(_)
                | Value::List(_)
                | Value::Ints(_)
                | Value::Floats(_)
                | Value::Strs(_)
        )
    }
}

/// Equality used by `EQUAL`, `CASE` matching and dict values: same variant,
/// same payload. `Bytes` compare by content, floats by IEEE-754, shared
/// containers by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Byte(a), Value::Byte(b)) => a == b,
            (Value::Rune(a), Value::Rune(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Big(a), Value::Big(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Runes(a), Value::Runes(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::Regex(a), Value::Regex(b)) => Arc::ptr_eq(a, b),
            (Value::Script(a), Value::Script(b)) => Arc::ptr_eq(a, b),
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Ints(a), Value::Ints(b)) => a == b,
            (Value::Floats(a), Value::Floats(b)) => a == b,
            (Value::Strs(a), Value::Strs(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Decodes a code point into a `char`, substituting U+FFFD for invalid
/// values the way lossy UTF-8 decoding does.
pub fn rune_char(r: i32) -> char {
    u32::try_from(r)
        .ok()
        .and_then(char::from_u32)
        .unwrap_or(char::REPLACEMENT_CHARACTER)
}

/// Encodes a rune sequence as a UTF-8 string.
pub fn runes_to_string(rs: &[i32]) -> String {
    rs.iter().map(|&r| rune_char(r)).collect()
}

/// Decodes a UTF-8 string into code points.
pub fn string_to_runes(s: &str) -> Vec<i32> {
    s.chars().map(|c| c as i32).collect()
}
