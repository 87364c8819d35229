//! Extension instruction registries.
//!
//! `FN_X`, `EX_FN` and the `MO_*` modules map an index (plus, for the free
//! extension classes, a method byte carried in the instruction data) to a
//! registered handler. The registries start empty; the embedding layer
//! registers targets before any script runs. Per-target payload layouts
//! stay with the implementations; the decoder only needs the trailer
//! sizes below.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::error::{Exec, ExecError};
use crate::exec::Instx;
use crate::instr::Parsed;
use crate::opcode as op;

/// Trailer bytes owned by an `MO_X` module: one method byte.
pub fn mox_size(_index: u8) -> usize {
    1
}

/// Trailer bytes owned by an `EX_INST` target: one method byte.
pub fn ext_size(_index: u16) -> usize {
    1
}

/// Trailer bytes owned by an `EX_PRIV` target: none, the index is the
/// instruction.
pub fn priv_size(_index: u16) -> usize {
    0
}

type Key = (u8, i64, i64);

static REGISTRY: Lazy<RwLock<HashMap<Key, Instx>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers an extension handler under `(opcode, index, method)`.
///
/// Direct extension classes (`FN_X`, `EX_FN`, `MO_RE`…`MO_CRYPT`,
/// `EX_PRIV`) use method 0.
pub fn register(code: u8, index: i64, method: i64, instx: Instx) {
    REGISTRY.write().insert((code, index, method), instx);
}

/// Resolves the handler for a decoded extension instruction.
pub(crate) fn lookup(parsed: &Parsed) -> Exec<Instx> {
    let method = match parsed.code {
        op::MO_X | op::EX_INST => {
            let data = parsed.data_code()?;
            i64::from(*data.first().ok_or(ExecError::TruncatedScript)?)
        }
        op::FN_X | op::EX_FN | op::MO_RE | op::MO_TIME | op::MO_MATH | op::MO_CRYPT
        | op::EX_PRIV => 0,
        c => return Err(ExecError::InvalidOpcode(c).into()),
    };
    let index = parsed.aux_int(0)?;
    REGISTRY
        .read()
        .get(&(parsed.code, index, method))
        .copied()
        .ok_or_else(|| ExecError::UnknownExtension(parsed.code, index).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instr;

    #[test]
    fn unregistered_target_is_an_error() {
        let p = instr::parse(&[op::EX_FN, 0, 9]).unwrap();
        assert!(matches!(
            lookup(&p),
            Err(crate::error::Escape::Fault(ExecError::UnknownExtension(c, 9))) if c == op::EX_FN
        ));
    }

    #[test]
    fn trailer_sizes_match_the_decoder() {
        assert_eq!(mox_size(0), 1);
        assert_eq!(ext_size(0), 1);
        assert_eq!(priv_size(0), 0);
    }
}
