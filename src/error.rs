//! Error taxonomy: fatal errors versus non-local control sentinels.
//!
//! Handlers and envelopes pass both kinds through `Result`'s error channel;
//! each envelope catches exactly the sentinels it serves and re-raises the
//! rest. A sentinel surfacing at the wrong envelope is itself a shape
//! error.

use thiserror::Error;

use crate::value::Value;

/// Result alias used throughout the execution core.
pub type Exec<T> = Result<T, Escape>;

/// Fatal conditions that unwind the whole executor chain.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecError {
    #[error("pass check failed")]
    NotPass,
    #[error("script does not match the model")]
    ModelFailure,
    #[error("data stack would grow to {0} entries (limit 256)")]
    StackOverflow(usize),
    #[error("data stack is empty or too short")]
    StackUnderflow,
    #[error("local scope would grow to {0} entries (limit 128)")]
    ScopeOverflow(usize),
    #[error("scope index {0} out of range")]
    ScopeIndex(i64),
    #[error("index {0} out of range")]
    IndexRange(i64),
    #[error("GOTO count would exceed the limit (3)")]
    GotoLimit,
    #[error("JUMP count would exceed the limit (9)")]
    JumpLimit,
    #[error("GOTO is not allowed in this context")]
    GotoForbidden,
    #[error("JUMP is not allowed in this context")]
    JumpForbidden,
    #[error("args region holds {have} values, instruction needs {want}")]
    ArgumentMismatch { want: usize, have: usize },
    #[error("conversion failed: {0}")]
    BadConversion(&'static str),
    #[error("operand type not supported: {0}")]
    TypeMismatch(&'static str),
    #[error("left shift by {0} exceeds 63 bits")]
    ShiftTooWide(i64),
    #[error("arithmetic overflow or division by zero")]
    Arithmetic,
    #[error("opcode {0:#04x} is not executable")]
    InvalidOpcode(u8),
    #[error("instruction truncated at the end of the script")]
    TruncatedScript,
    #[error("execution flow must not reach this point")]
    ToHere,
    #[error("RETURN escaped its scope block")]
    StrayReturn,
    #[error("EXIT is not allowed inside a private scope")]
    StrayExit,
    #[error("BREAK or CONTINUE outside of a loop or switch")]
    StrayBreak,
    #[error("input buffer holds {have} values, INPUT needs {want}")]
    InputShort { want: usize, have: usize },
    #[error("script ({0}, {1}, {2}) is not available")]
    ScriptUnavailable(u32, u32, u16),
    #[error("regular expression is invalid: {0}")]
    BadRegex(String),
    #[error("pattern opcodes cannot themselves be match targets")]
    ModelMatchBan,
    #[error("unknown type tag {0} in pattern")]
    BadTypeTag(i64),
    #[error("expression error: {0}")]
    ExprSyntax(&'static str),
    #[error("multi-signature set exceeds 255 entries")]
    MulSigSize,
    #[error("multi-signature position list has a gap")]
    MulSigIndex,
    #[error("address has no prefix delimiter")]
    DelimiterMissing,
    #[error("address checksum mismatch")]
    Checksum,
    #[error("address is malformed: checksum missing")]
    AddressFormat,
    #[error("signature and public key counts differ")]
    SigCount,
    #[error("extension target ({0:#04x}, {1}) is not registered")]
    UnknownExtension(u8, i64),
}

/// Non-local control sentinels plus the fatal channel.
///
/// `Exit`/`Return` carry their payload; `Break`/`Continue` are bare. These
/// are not errors; they are typed jumps consumed by the matching envelope.
#[derive(Debug, Clone)]
pub enum Escape {
    Exit(Value),
    Return(Value),
    Break,
    Continue,
    Fault(ExecError),
}

impl From<ExecError> for Escape {
    fn from(err: ExecError) -> Self {
        Escape::Fault(err)
    }
}
