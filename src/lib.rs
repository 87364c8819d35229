//! Deterministic bytecode execution core for transaction lock/unlock
//! scripts.
//!
//! Scripts are compact byte sequences evaluated by a stack machine with
//! hard resource bounds, so every node reaches the same validation
//! verdict. The crate covers instruction decoding, the nested executor
//! lifecycle, the instruction set, the pattern-match subsystem, the
//! arithmetic sub-evaluator and the shared script pool; transaction-level
//! validation and the surrounding I/O live with the embedding layer.
//!
//! ```
//! use txscript::{run_script, Envs, Value};
//!
//! // @ Uint8(1) EXIT: capture 1 into the args region and exit with it.
//! let code = vec![20, 4, 1, 55];
//! let result = run_script(&[0; 10], code, None, Envs::new(Vec::new(), 0), 1);
//! assert_eq!(result.unwrap(), Value::Int(1));
//! ```

pub mod addr;
pub mod error;
pub mod exec;
pub mod ext;
pub mod instr;
pub mod opcode;
pub mod ops;
pub mod pattern;
pub mod pool;
pub mod script;
pub mod value;

mod expr;

pub use error::{Escape, Exec, ExecError};
pub use exec::{Actuator, Envs, Instx, Middler, GOTO_MAX, JUMP_MAX, SCOPE_MAX, STACK_MAX};
pub use ops::script_run;
pub use script::Script;
pub use value::{new_dict, Dict, Value};

use crossbeam_channel::Sender;

/// Protocol version understood by this implementation.
pub const VERSION: u32 = 1;

/// Runs one top-level script to completion.
///
/// `id` is the 10-byte script identity, `ch` the shared `BUFDUMP` sink for
/// the validation batch, `envs` the environment owned by this run. The
/// result is the `EXIT` payload (`Nil` when the script just runs out), or
/// the fatal error that invalidated the script.
pub fn run_script(
    id: &[u8],
    code: Vec<u8>,
    ch: Option<Sender<Middler>>,
    envs: Envs,
    ver: u32,
) -> Result<Value, ExecError> {
    let mut a = Actuator::new(id, code, ch, envs, ver);
    ops::script_run(&mut a)
}

/// Runs a script whose `INPUT` instructions read from `input`.
pub fn run_script_with_input(
    id: &[u8],
    code: Vec<u8>,
    input: Vec<Value>,
    ch: Option<Sender<Middler>>,
    envs: Envs,
    ver: u32,
) -> Result<Value, ExecError> {
    let mut a = Actuator::new(id, code, ch, envs, ver);
    a.input(input);
    ops::script_run(&mut a)
}
