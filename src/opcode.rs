//! Opcode byte assignments and the closed tag sets used by instruction
//! arguments.
//!
//! The 256-slot opcode space is carved into fixed groups; gaps inside a
//! group are reserved and decode as invalid opcodes. All multi-byte fixed
//! widths are big-endian, variable-width integers use the varint codec in
//! [`crate::instr`].

// Value producers: [0, 19]
pub const NIL: u8 = 0;
pub const TRUE: u8 = 1;
pub const FALSE: u8 = 2;
/// Negative one-byte integer; the stored byte is the magnitude.
pub const UINT8N: u8 = 3;
pub const UINT8: u8 = 4;
/// Negative varint integer; stored as the unsigned magnitude.
pub const UINT63N: u8 = 5;
pub const UINT63: u8 = 6;
pub const BYTE: u8 = 7;
pub const RUNE: u8 = 8;
pub const FLOAT32: u8 = 9;
pub const FLOAT64: u8 = 10;
pub const DATE: u8 = 11;
pub const BIGINT: u8 = 12;
pub const DATA8: u8 = 13;
pub const DATA16: u8 = 14;
pub const TEXT8: u8 = 15;
pub const TEXT16: u8 = 16;
pub const REGEXP: u8 = 17;
pub const CODE: u8 = 18;

// Capture chain: [20, 24]
/// `@`: route the next instruction's return into the args region.
pub const CAPTURE: u8 = 20;
/// `~`: the next instruction takes its arguments straight off the stack.
pub const BRING: u8 = 21;
/// `$`: route the next instruction's return into the local scope.
pub const SCOPE_PUT: u8 = 22;
/// `$(i)`: read a scope entry.
pub const SCOPE_VAL: u8 = 23;
/// `${i}`: read a loop-variable slot.
pub const LOOP_VAL: u8 = 24;

// Stack operations: [25, 34]
pub const NOP: u8 = 25;
pub const PUSH: u8 = 26;
pub const SHIFT: u8 = 27;
pub const CLONE: u8 = 28;
pub const POP: u8 = 29;
pub const POPS: u8 = 30;
pub const TOP: u8 = 31;
pub const TOPS: u8 = 32;
pub const PEEK: u8 = 33;
pub const PEEKS: u8 = 34;

// Collections: [35, 45]
pub const SLICE: u8 = 35;
pub const REVERSE: u8 = 36;
pub const MERGE: u8 = 37;
pub const EXPAND: u8 = 38;
pub const GLUE: u8 = 39;
pub const SPREAD: u8 = 40;
pub const ITEM: u8 = 41;
pub const SET: u8 = 42;
pub const SIZE: u8 = 43;
pub const MAP: u8 = 44;
pub const FILTER: u8 = 45;

// Interaction: [46, 50]
pub const INPUT: u8 = 46;
pub const OUTPUT: u8 = 47;
pub const BUFDUMP: u8 = 48;
pub const PRINT: u8 = 50;

// Results: [51, 56]
pub const PASS: u8 = 51;
pub const FAIL: u8 = 52;
pub const GOTO: u8 = 53;
pub const JUMP: u8 = 54;
pub const EXIT: u8 = 55;
pub const RETURN: u8 = 56;

// Flow control: [57, 66]
pub const IF: u8 = 57;
pub const ELSE: u8 = 58;
pub const SWITCH: u8 = 59;
pub const CASE: u8 = 60;
pub const DEFAULT: u8 = 61;
pub const EACH: u8 = 62;
pub const CONTINUE: u8 = 63;
pub const BREAK: u8 = 64;
pub const FALLTHROUGH: u8 = 65;
pub const BLOCK: u8 = 66;

// Conversions: [67, 79]
pub const TO_BOOL: u8 = 67;
pub const TO_BYTE: u8 = 68;
pub const TO_RUNE: u8 = 69;
pub const TO_INT: u8 = 70;
pub const TO_BIGINT: u8 = 71;
pub const TO_FLOAT: u8 = 72;
pub const TO_STRING: u8 = 73;
pub const TO_BYTES: u8 = 74;
pub const TO_RUNES: u8 = 75;
pub const TO_TIME: u8 = 76;
pub const TO_REGEXP: u8 = 77;
pub const ANYS: u8 = 78;
pub const DICT: u8 = 79;

// Arithmetic: [80, 103]
/// `()`: expression block, evaluated by the sub-evaluator.
pub const EXPR: u8 = 80;
/// Symbol operators; only meaningful inside an expression block.
pub const SYM_MUL: u8 = 81;
pub const SYM_DIV: u8 = 82;
pub const SYM_ADD: u8 = 83;
pub const SYM_SUB: u8 = 84;
pub const MUL: u8 = 85;
pub const DIV: u8 = 86;
pub const ADD: u8 = 87;
pub const SUB: u8 = 88;
pub const POW: u8 = 89;
pub const MOD: u8 = 90;
pub const LMOV: u8 = 91;
pub const RMOV: u8 = 92;
pub const AND: u8 = 93;
pub const ANDX: u8 = 94;
pub const OR: u8 = 95;
pub const XOR: u8 = 96;
pub const NEG: u8 = 97;
pub const NOT: u8 = 98;
pub const DIVMOD: u8 = 99;
pub const DUP: u8 = 100;
pub const DEL: u8 = 101;
pub const CLEAR: u8 = 102;

// Comparisons: [104, 111]
pub const EQUAL: u8 = 104;
pub const NEQUAL: u8 = 105;
pub const LT: u8 = 106;
pub const LTE: u8 = 107;
pub const GT: u8 = 108;
pub const GTE: u8 = 109;
pub const ISNAN: u8 = 110;
pub const WITHIN: u8 = 111;

// Logic: [112, 115]
pub const BOTH: u8 = 112;
pub const EVERY: u8 = 113;
pub const EITHER: u8 = 114;
pub const SOME: u8 = 115;

// Pattern: [116, 127]
pub const MODEL: u8 = 116;
/// `#(flag)`: capture components of the previously matched instruction.
pub const VAL_PICK: u8 = 117;
/// `_`: wildcard one instruction.
pub const WILDCARD: u8 = 118;
/// `_(n)`: wildcard n instructions.
pub const WILDNUM: u8 = 119;
/// `?(flag)`: local-wildcard the following model instruction.
pub const WILDPART: u8 = 120;
/// `?(len){..}`: optional inline instruction sequence.
pub const WILDLIST: u8 = 121;
/// `!{Type}(tag)`: opcode class match.
pub const TYPE_IS: u8 = 122;
pub const WITHIN_INT: u8 = 123;
pub const WITHIN_FLOAT: u8 = 124;
/// `RE{flag}(len)..`: regex over the current instruction's data.
pub const RE: u8 = 125;
/// `&(i)`: capture the i-th regex group.
pub const RE_PICK: u8 = 126;
/// `...`: same-level segment wildcard.
pub const WILD_LUMP: u8 = 127;

// Environment: [128, 137]
pub const ENV: u8 = 128;
pub const OUT: u8 = 129;
pub const IN: u8 = 130;
pub const INOUT: u8 = 131;
pub const XFROM: u8 = 132;
pub const VAR: u8 = 133;
pub const SETVAR: u8 = 134;
pub const SOURCE: u8 = 135;
pub const MULSIG: u8 = 136;

// Tools: [138, 163]
pub const EVAL: u8 = 138;
pub const COPY: u8 = 139;
pub const DCOPY: u8 = 140;
pub const KEYVAL: u8 = 141;
pub const MATCH: u8 = 142;
pub const SUBSTR: u8 = 143;
pub const REPLACE: u8 = 144;
pub const SRAND: u8 = 145;
pub const RANDOM: u8 = 146;
pub const QRANDOM: u8 = 147;
pub const CMPFLO: u8 = 148;
pub const RANGE: u8 = 155;

// System: [164, 169]
pub const SYS_TIME: u8 = 164;
pub const SYS_AWARD: u8 = 165;
pub const SYS_NULL: u8 = 169;

// Functions: [170, 209]
pub const FN_BASE58: u8 = 170;
pub const FN_BASE32: u8 = 171;
pub const FN_BASE64: u8 = 172;
pub const FN_PUBHASH: u8 = 173;
pub const FN_MPUBHASH: u8 = 174;
pub const FN_ADDRESS: u8 = 175;
pub const FN_CHECKSIG: u8 = 176;
pub const FN_MCHECKSIG: u8 = 177;
pub const FN_HASH224: u8 = 178;
pub const FN_HASH256: u8 = 179;
pub const FN_HASH384: u8 = 180;
pub const FN_HASH512: u8 = 181;
pub const FN_PRINTF: u8 = 208;
pub const FN_X: u8 = 209;

// Modules: [210, 249]
pub const MO_RE: u8 = 210;
pub const MO_TIME: u8 = 211;
pub const MO_MATH: u8 = 212;
pub const MO_CRYPT: u8 = 213;
pub const MO_X: u8 = 249;

// Extensions: [250, 254]
pub const EX_FN: u8 = 250;
pub const EX_INST: u8 = 251;
pub const EX_PRIV: u8 = 253;

/// Loop-variable slots addressed by `${i}`.
pub mod loopv {
    pub const VALUE: i64 = 0;
    pub const KEY: i64 = 1;
    pub const DATA: i64 = 2;
    pub const SIZE: i64 = 3;
}

/// Slice element kinds for `ANYS(kind)`.
pub mod item {
    pub const ANY: i64 = 0;
    pub const BYTE: i64 = 1;
    pub const RUNE: i64 = 2;
    pub const INT: i64 = 3;
    pub const FLOAT: i64 = 4;
    pub const STRING: i64 = 5;
}

/// Opcode classes for the `!{Type}(tag)` pattern check.
pub mod typeis {
    pub const BOOL: i64 = 0;
    pub const INT: i64 = 1;
    pub const BYTE: i64 = 2;
    pub const RUNE: i64 = 3;
    pub const FLOAT: i64 = 4;
    pub const TIME: i64 = 5;
    pub const BIGINT: i64 = 6;
    pub const BYTES: i64 = 7;
    pub const STRING: i64 = 8;
    pub const REGEXP: i64 = 9;
    pub const SCRIPT: i64 = 10;
    pub const NUMBER: i64 = 11;
    pub const MODEL: i64 = 12;
}

/// `ENV(tag)` entries.
pub mod env {
    pub const HEIGHT: i64 = 0;
    pub const TIME: i64 = 1;
    pub const REAL_HEIGHT: i64 = 2;
    pub const TX_ID: i64 = 3;
    pub const TIMESTAMP: i64 = 4;
    pub const IN_SIZE: i64 = 5;
    pub const IN_AMOUNT: i64 = 6;
    pub const OUT_SIZE: i64 = 7;
    pub const OUT_AMOUNT: i64 = 8;
    pub const IN_GOTO: i64 = 9;
    pub const IN_JUMP: i64 = 10;
    pub const GOTOS: i64 = 11;
    pub const JUMPS: i64 = 12;
    pub const BLOCK_HEIGHT: i64 = 13;
    pub const BLOCK_TIME: i64 = 14;
    pub const LIMIT_STACK: i64 = 15;
    pub const LIMIT_SCOPE: i64 = 16;
}

/// `OUT(i, tag)` / `INOUT(tag)` entries.
pub mod out {
    pub const AMOUNT: i64 = 0;
    pub const RECEIVER: i64 = 1;
    pub const CREATOR: i64 = 2;
    pub const DESCRIPTION: i64 = 3;
    pub const COUNT: i64 = 4;
    pub const TITLE: i64 = 5;
    pub const CONTENT: i64 = 6;
    pub const ATTACHMENT: i64 = 7;
    pub const SOURCE: i64 = 8;
    /// Source-transaction creation time; `INOUT` only.
    pub const TIMESTAMP: i64 = 9;
}

/// `IN(tag)` entries.
pub mod intag {
    pub const INDEX: i64 = 0;
    pub const AMOUNT: i64 = 1;
    pub const ACCOUNT: i64 = 2;
    pub const ADDRESS: i64 = 3;
    pub const PAY_TYPE: i64 = 4;
    pub const SIGS: i64 = 5;
    pub const CAN_SIGS: i64 = 6;
    pub const SIG_TYPE: i64 = 7;
    pub const SOURCE: i64 = 8;
}

/// `XFROM(tag)` entries, populated when entering a script via GOTO/JUMP.
pub mod xfrom {
    pub const SOURCE: i64 = 0;
    pub const OFFSET: i64 = 1;
    pub const IN_SIZE: i64 = 2;
    pub const IN_AMOUNT: i64 = 3;
    pub const OUT_SIZE: i64 = 4;
    pub const OUT_AMOUNT: i64 = 5;
    pub const TX_ID: i64 = 6;
    pub const HEIGHT: i64 = 7;
    pub const TIME: i64 = 8;
    pub const TIMESTAMP: i64 = 9;
    pub const AMOUNT: i64 = 10;
    pub const ACCOUNT: i64 = 11;
    pub const ADDRESS: i64 = 12;
    pub const PAY_TYPE: i64 = 13;
}

/// `SYS_TIME(field)` selectors.
pub mod timef {
    pub const DEFAULT: i64 = 0;
    pub const STAMP: i64 = 1;
    pub const YEAR: i64 = 2;
    pub const MONTH: i64 = 3;
    pub const YEAR_DAY: i64 = 4;
    pub const DAY: i64 = 5;
    pub const WEEK_DAY: i64 = 6;
    pub const HOUR: i64 = 7;
    pub const MINUTE: i64 = 8;
    pub const SECOND: i64 = 9;
    pub const MILLISECOND: i64 = 10;
    pub const MICROSECOND: i64 = 11;
}

/// Hash algorithm selectors for the `FN_HASH*` family.
pub mod hashalgo {
    pub const SHA3: i64 = 0;
    pub const SHA2: i64 = 1;
    pub const BLAKE2: i64 = 2;
}

/// `SOURCE(flag)` slicing modes.
pub mod source {
    pub const ALL: i64 = 0;
    pub const PAST: i64 = -1;
    pub const PAST_FROM_NULL: i64 = -2;
    pub const NEXT: i64 = 1;
    pub const ALL_FROM_NULL: i64 = 2;
}

/// `KEYVAL(flag)` selectors.
pub mod keyval {
    pub const BOTH: i64 = 0;
    pub const KEYS: i64 = 1;
    pub const VALUES: i64 = 2;
}
