//! Arithmetic expression evaluation for `()` blocks.
//!
//! A precedence-climbing parser drives the main dispatcher one instruction
//! at a time: `*` and `/` bind at level 2, `+` and `-` at level 1, unary
//! signs tighter than both. Operands are whatever the stepped instructions
//! return, converted to `f64`; every computation stays in `f64`.

use crate::error::{Exec, ExecError};
use crate::exec::Actuator;
use crate::opcode as op;
use crate::ops;
use crate::value::Value;

/// Code marker reported once the fragment is exhausted.
const EXPR_END: i16 = -1;

/// Evaluates the expression fragment held by `a` to completion.
pub(crate) fn evaluate(a: &mut Actuator) -> Exec<f64> {
    let mut c = Stepper {
        a,
        code: EXPR_END,
        value: 0.0,
    };
    c.next()?;
    let v = parse_binary(&mut c, 1)?;
    if c.code != EXPR_END {
        return Err(ExecError::ExprSyntax("trailing instructions after expression").into());
    }
    Ok(v)
}

/// Step driver over the main dispatcher. After `next()`, `code` holds the
/// opcode just stepped past and `value` its numeric return (0.0 for none).
struct Stepper<'a> {
    a: &'a mut Actuator,
    code: i16,
    value: f64,
}

impl Stepper<'_> {
    fn next(&mut self) -> Exec<bool> {
        if self.a.script.end() {
            self.code = EXPR_END;
            return Ok(false);
        }
        let opcode = self.a.script.code();
        self.code = i16::from(opcode);
        self.value = 0.0;

        // Operator opcodes carry no handler; the parser consumes them as
        // tokens.
        if is_operator(opcode) {
            self.a.script.advance(1);
            return Ok(true);
        }

        let vals = ops::inst_call(self.a)?.unwrap_or_default();
        match vals.len() {
            0 => {}
            1 => self.value = to_operand(&vals[0])?,
            _ => {
                return Err(
                    ExecError::ExprSyntax("instruction returned more than one value").into(),
                )
            }
        }
        Ok(true)
    }
}

fn is_operator(code: u8) -> bool {
    matches!(code, op::SYM_MUL | op::SYM_DIV | op::SYM_ADD | op::SYM_SUB)
}

fn precedence(code: i16) -> i32 {
    match code {
        c if c == i16::from(op::SYM_MUL) || c == i16::from(op::SYM_DIV) => 2,
        c if c == i16::from(op::SYM_ADD) || c == i16::from(op::SYM_SUB) => 1,
        _ => 0,
    }
}

fn to_operand(v: &Value) -> Exec<f64> {
    v.to_number()
        .map_err(|_| ExecError::ExprSyntax("operand is not numeric").into())
}

fn parse_binary(c: &mut Stepper<'_>, min_prec: i32) -> Exec<f64> {
    let mut lhs = parse_unary(c)?;

    let mut prec = precedence(c.code);
    while prec >= min_prec {
        while precedence(c.code) == prec {
            let operator = c.code;
            if !c.next()? {
                return Err(ExecError::ExprSyntax("binary operator misses an operand").into());
            }
            let rhs = parse_binary(c, prec + 1)?;
            lhs = apply(operator, lhs, rhs);
        }
        prec -= 1;
    }
    Ok(lhs)
}

fn parse_unary(c: &mut Stepper<'_>) -> Exec<f64> {
    let code = c.code;
    if code == i16::from(op::SYM_ADD) || code == i16::from(op::SYM_SUB) {
        if !c.next()? {
            return Err(ExecError::ExprSyntax("unary operator misses an operand").into());
        }
        let v = parse_unary(c)?;
        return Ok(if code == i16::from(op::SYM_SUB) { -v } else { v });
    }
    parse_primary(c)
}

fn parse_primary(c: &mut Stepper<'_>) -> Exec<f64> {
    if c.code == EXPR_END {
        return Err(ExecError::ExprSyntax("expression ended where an operand was expected").into());
    }
    let v = c.value;
    c.next()?;
    Ok(v)
}

fn apply(operator: i16, x: f64, y: f64) -> f64 {
    match operator {
        c if c == i16::from(op::SYM_MUL) => x * y,
        c if c == i16::from(op::SYM_DIV) => x / y,
        c if c == i16::from(op::SYM_ADD) => x + y,
        _ => x - y,
    }
}
