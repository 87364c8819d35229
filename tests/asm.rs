//! Tiny bytecode builder shared by the integration tests.

#![allow(dead_code)]

use txscript::instr::{write_uvarint, write_varint};
use txscript::opcode as op;

#[derive(Default, Clone)]
pub struct Asm {
    buf: Vec<u8>,
}

impl Asm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Raw single-byte opcode.
    pub fn op(mut self, c: u8) -> Self {
        self.buf.push(c);
        self
    }

    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Integer literal in its smallest encoding.
    pub fn int(mut self, v: i64) -> Self {
        if (0..=255).contains(&v) {
            self.buf.push(op::UINT8);
            self.buf.push(v as u8);
        } else if (-255..0).contains(&v) {
            self.buf.push(op::UINT8N);
            self.buf.push((-v) as u8);
        } else if v > 0 {
            self.buf.push(op::UINT63);
            write_uvarint(&mut self.buf, v as u64);
        } else {
            self.buf.push(op::UINT63N);
            write_uvarint(&mut self.buf, v.unsigned_abs());
        }
        self
    }

    pub fn byte(mut self, b: u8) -> Self {
        self.buf.push(op::BYTE);
        self.buf.push(b);
        self
    }

    pub fn rune(mut self, r: i32) -> Self {
        self.buf.push(op::RUNE);
        self.buf.extend_from_slice(&r.to_be_bytes());
        self
    }

    pub fn float(mut self, f: f64) -> Self {
        self.buf.push(op::FLOAT64);
        self.buf.extend_from_slice(&f.to_be_bytes());
        self
    }

    pub fn date(mut self, ms: i64) -> Self {
        self.buf.push(op::DATE);
        write_varint(&mut self.buf, ms);
        self
    }

    pub fn text(mut self, s: &str) -> Self {
        self.buf.push(op::TEXT8);
        self.buf.push(s.len() as u8);
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    pub fn data(mut self, b: &[u8]) -> Self {
        self.buf.push(op::DATA8);
        self.buf.push(b.len() as u8);
        self.buf.extend_from_slice(b);
        self
    }

    pub fn regex(mut self, pat: &str) -> Self {
        self.buf.push(op::REGEXP);
        self.buf.push(pat.len() as u8);
        self.buf.extend_from_slice(pat.as_bytes());
        self
    }

    pub fn code(mut self, inner: Asm) -> Self {
        let bytes = inner.build();
        self.buf.push(op::CODE);
        self.buf.push(bytes.len() as u8);
        self.buf.extend_from_slice(&bytes);
        self
    }

    /// Generic opcode with one unsigned aux byte.
    pub fn arg1(mut self, c: u8, a: u8) -> Self {
        self.buf.push(c);
        self.buf.push(a);
        self
    }

    /// Generic opcode with one 2-byte big-endian aux.
    pub fn arg2(mut self, c: u8, n: u16) -> Self {
        self.buf.push(c);
        self.buf.extend_from_slice(&n.to_be_bytes());
        self
    }

    /// Block opcode with a one-byte length: IF/ELSE/CASE/DEFAULT/EACH/
    /// MAP/FILTER/EXPR.
    pub fn block(mut self, c: u8, inner: Asm) -> Self {
        let bytes = inner.build();
        self.buf.push(c);
        self.buf.push(bytes.len() as u8);
        self.buf.extend_from_slice(&bytes);
        self
    }

    /// Block opcode with a varint length: SWITCH/BLOCK.
    pub fn varblock(mut self, c: u8, inner: Asm) -> Self {
        let bytes = inner.build();
        self.buf.push(c);
        write_uvarint(&mut self.buf, bytes.len() as u64);
        self.buf.extend_from_slice(&bytes);
        self
    }

    pub fn goto(self, h: u32, n: u32, i: u16) -> Self {
        self.jump_like(op::GOTO, h, n, i)
    }

    pub fn jump(self, h: u32, n: u32, i: u16) -> Self {
        self.jump_like(op::JUMP, h, n, i)
    }

    fn jump_like(mut self, c: u8, h: u32, n: u32, i: u16) -> Self {
        self.buf.push(c);
        self.buf.extend_from_slice(&h.to_be_bytes());
        self.buf.extend_from_slice(&n.to_be_bytes());
        self.buf.extend_from_slice(&i.to_be_bytes());
        self
    }

    pub fn model(mut self, capture: bool, inner: Asm) -> Self {
        let bytes = inner.build();
        let mut word = bytes.len() as u16;
        if capture {
            word |= 0x8000;
        }
        self.buf.push(op::MODEL);
        self.buf.extend_from_slice(&word.to_be_bytes());
        self.buf.extend_from_slice(&bytes);
        self
    }

    pub fn scope_val(mut self, i: i8) -> Self {
        self.buf.push(op::SCOPE_VAL);
        self.buf.push(i as u8);
        self
    }

    pub fn loop_val(self, slot: u8) -> Self {
        self.arg1(op::LOOP_VAL, slot)
    }

    pub fn source(mut self, flag: i8) -> Self {
        self.buf.push(op::SOURCE);
        self.buf.push(flag as u8);
        self
    }
}
