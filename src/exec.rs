//! Executor state: shared value spaces, jump budgets, switch and loop
//! context, the system environment, and the child-executor constructors.
//!
//! Concurrency is per script: one executor chain runs on one thread, so
//! the shared regions use `Rc`/`RefCell` handles. The only objects crossing
//! threads are the script pool and the `BUFDUMP` channel.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::rc::Rc;

use crossbeam_channel::Sender;

use crate::error::{Exec, ExecError};
use crate::opcode as op;
use crate::script::Script;
use crate::value::Value;

/// Data-stack depth limit.
pub const STACK_MAX: usize = 256;
/// Local-scope size limit.
pub const SCOPE_MAX: usize = 128;
/// GOTO budget per script run, inclusive.
pub const GOTO_MAX: u32 = 3;
/// JUMP budget per script run, inclusive.
pub const JUMP_MAX: u32 = 9;

/// Record emitted by `BUFDUMP`: the script identity, the user tag, a copy
/// of the source, and the drained output buffer.
#[derive(Debug, Clone)]
pub struct Middler {
    pub id: Vec<u8>,
    pub n: u8,
    pub code: Vec<u8>,
    pub data: Vec<Value>,
}

/// Handler signature: executor, parsed instruction, acquired arguments.
/// `None` means "no return values".
pub type Handler = fn(&mut Actuator, &crate::instr::Parsed, Vec<Value>) -> Exec<Option<Vec<Value>>>;

/// One dispatch-table slot: the handler and its argument count.
/// `argn == -1` drains the whole args region (variadic).
#[derive(Clone, Copy)]
pub struct Instx {
    pub call: Handler,
    pub argn: i8,
}

/// Return-value sink selected by the capture chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sink {
    Stack,
    Args,
    Scope,
}

/// Per-instruction routing state. Mutations by `@`/`~`/`$` live exactly
/// one instruction; every handler reverts first.
#[derive(Debug)]
struct State {
    back_to: Sink,
    from_stack: bool,
    changed: bool,
}

impl Default for State {
    fn default() -> Self {
        Self {
            back_to: Sink::Stack,
            from_stack: false,
            changed: false,
        }
    }
}

impl State {
    fn revert(&mut self) {
        if !self.changed {
            return;
        }
        self.back_to = Sink::Stack;
        self.from_stack = false;
        self.changed = false;
    }
}

/// GOTO/JUMP budgets, shared by reference between the executors that
/// count against the same limit. A missing cell means the instruction is
/// forbidden in this context.
#[derive(Clone, Default)]
struct Counters {
    gotos: Option<Rc<Cell<u32>>>,
    jumps: Option<Rc<Cell<u32>>>,
}

impl Counters {
    fn fresh() -> Self {
        Self {
            gotos: Some(Rc::new(Cell::new(0))),
            jumps: Some(Rc::new(Cell::new(0))),
        }
    }

    /// Loop context: JUMP allowed (shared cell), GOTO forbidden.
    fn jumps_only(&self) -> Self {
        Self {
            gotos: None,
            jumps: self.jumps.clone(),
        }
    }

    fn incr_goto(&self) -> Exec<()> {
        let cell = self.gotos.as_ref().ok_or(ExecError::GotoForbidden)?;
        if cell.get() >= GOTO_MAX {
            return Err(ExecError::GotoLimit.into());
        }
        cell.set(cell.get() + 1);
        Ok(())
    }

    fn incr_jump(&self) -> Exec<()> {
        let cell = self.jumps.as_ref().ok_or(ExecError::JumpForbidden)?;
        if cell.get() >= JUMP_MAX {
            return Err(ExecError::JumpLimit.into());
        }
        cell.set(cell.get() + 1);
        Ok(())
    }

    fn gotos(&self) -> u32 {
        self.gotos.as_ref().map_or(0, |c| c.get())
    }

    fn jumps(&self) -> u32 {
        self.jumps.as_ref().map_or(0, |c| c.get())
    }

    fn set_jumps(&self, n: u32) {
        if let Some(cell) = &self.jumps {
            cell.set(n);
        }
    }
}

/// Switch context: the compared target, the remaining case values, and the
/// fallthrough cell that nested CASE blocks share with their switch.
pub struct SwitchCtx {
    target: Value,
    cases: VecDeque<Value>,
    through: Rc<Cell<bool>>,
}

impl SwitchCtx {
    fn new(target: Value, cases: Vec<Value>) -> Self {
        Self {
            target,
            cases: cases.into(),
            through: Rc::new(Cell::new(false)),
        }
    }

    /// A CASE body gets the through-pointer but no comparison state, which
    /// keeps illegally nested CASE instructions from matching anything.
    fn case_in(&self) -> Self {
        Self {
            target: Value::Nil,
            cases: VecDeque::new(),
            through: self.through.clone(),
        }
    }

    /// Consumes the next case value and compares it against the target.
    pub fn case_pass(&mut self) -> Exec<bool> {
        let v = self.cases.pop_front().ok_or(ExecError::ToHere)?;
        Ok(v == self.target)
    }

    pub fn set_through(&self, v: bool) {
        self.through.set(v);
    }

    pub fn through(&self) -> bool {
        self.through.get()
    }

    /// Clears comparison state after DEFAULT so a trailing CASE faults.
    pub fn reset(&mut self) {
        self.target = Value::Nil;
        self.cases.clear();
    }
}

/// The shared value spaces of one script: data stack, args region, and the
/// import/export buffers with their outbound channel.
pub struct Spaces {
    ch: Option<Sender<Middler>>,
    stack: Vec<Value>,
    args: Vec<Value>,
    bufin: VecDeque<Value>,
    bufout: Vec<Value>,
}

impl Spaces {
    fn new(ch: Option<Sender<Middler>>) -> Self {
        Self {
            ch,
            stack: Vec::new(),
            args: Vec::new(),
            bufin: VecDeque::new(),
            bufout: Vec::new(),
        }
    }

    /// Private-scope split: fresh stack and args, buffers carried over as
    /// they stand.
    fn scope_new(&self) -> Self {
        Self {
            ch: self.ch.clone(),
            stack: Vec::new(),
            args: Vec::new(),
            bufin: self.bufin.clone(),
            bufout: self.bufout.clone(),
        }
    }

    fn stack_push(&mut self, vs: Vec<Value>) -> Exec<()> {
        let n = self.stack.len() + vs.len();
        if n > STACK_MAX {
            return Err(ExecError::StackOverflow(n).into());
        }
        self.stack.extend(vs);
        Ok(())
    }

    fn stack_pop(&mut self) -> Exec<Value> {
        self.stack.pop().ok_or_else(|| ExecError::StackUnderflow.into())
    }

    fn stack_pops(&mut self, n: usize) -> Exec<Vec<Value>> {
        if n > self.stack.len() {
            return Err(ExecError::StackUnderflow.into());
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn stack_top(&self) -> Exec<Value> {
        self.stack
            .last()
            .cloned()
            .ok_or_else(|| ExecError::StackUnderflow.into())
    }

    fn stack_tops(&self, n: usize) -> Exec<Vec<Value>> {
        if n > self.stack.len() {
            return Err(ExecError::StackUnderflow.into());
        }
        Ok(self.stack[self.stack.len() - n..].to_vec())
    }

    fn stack_item(&self, i: i64) -> Exec<Value> {
        let idx = resolve_index(i, self.stack.len())?;
        Ok(self.stack[idx].clone())
    }

    fn stack_items(&self, i: i64, n: usize) -> Exec<Vec<Value>> {
        let idx = resolve_index(i, self.stack.len())?;
        if idx + n > self.stack.len() {
            return Err(ExecError::StackUnderflow.into());
        }
        Ok(self.stack[idx..idx + n].to_vec())
    }
}

fn resolve_index(i: i64, len: usize) -> Exec<usize> {
    let idx = if i < 0 { i + len as i64 } else { i };
    if idx < 0 || idx as usize >= len {
        return Err(ExecError::StackUnderflow.into());
    }
    Ok(idx as usize)
}

/// System environment: lazily filled per-tag maps, the payer address, and
/// the multi-signature position set. Owned by one script execution.
pub struct Envs {
    env: HashMap<i64, Value>,
    outs: Vec<HashMap<i64, Value>>,
    input: HashMap<i64, Value>,
    inout: HashMap<i64, Value>,
    mul_sigs: Option<BTreeSet<u8>>,
    pkaddr: Vec<u8>,
    spent_msg: Option<Box<dyn Fn(i64) -> Vec<u8>>>,
    award: Option<Box<dyn Fn(i64) -> i64>>,
}

impl Envs {
    /// `out_count` is the size of the transaction's output set.
    pub fn new(pkaddr: Vec<u8>, out_count: usize) -> Self {
        Self {
            env: HashMap::new(),
            outs: vec![HashMap::new(); out_count],
            input: HashMap::new(),
            inout: HashMap::new(),
            mul_sigs: None,
            pkaddr,
            spent_msg: None,
            award: None,
        }
    }

    pub fn pub_key_addr(&self) -> &[u8] {
        &self.pkaddr
    }

    /// A tag never filled in reads as `Nil`.
    pub fn env_item(&self, n: i64) -> Value {
        self.env.get(&n).cloned().unwrap_or(Value::Nil)
    }

    pub fn set_env_item(&mut self, n: i64, v: Value) {
        self.env.insert(n, v);
    }

    pub fn tx_out_item(&self, i: usize, n: i64) -> Value {
        self.outs
            .get(i)
            .and_then(|m| m.get(&n))
            .cloned()
            .unwrap_or(Value::Nil)
    }

    pub fn set_tx_out_item(&mut self, i: usize, n: i64, v: Value) {
        if let Some(m) = self.outs.get_mut(i) {
            m.insert(n, v);
        }
    }

    pub fn tx_in_item(&self, n: i64) -> Value {
        self.input.get(&n).cloned().unwrap_or(Value::Nil)
    }

    pub fn set_tx_in_item(&mut self, n: i64, v: Value) {
        self.input.insert(n, v);
    }

    pub fn tx_inout_item(&self, n: i64) -> Value {
        self.inout.get(&n).cloned().unwrap_or(Value::Nil)
    }

    pub fn set_tx_inout_item(&mut self, n: i64, v: Value) {
        self.inout.insert(n, v);
    }

    /// Replaces the signature position set. Each verification attempt gets
    /// an independent set; the old one is dropped, never mutated.
    pub fn set_mul_sig(&mut self, ns: &[u8]) {
        self.mul_sigs = Some(ns.iter().copied().collect());
    }

    pub fn mul_sig_n(&self, n: u8) -> bool {
        self.mul_sigs.as_ref().is_some_and(|s| s.contains(&n))
    }

    pub fn goto_in(&mut self) {
        self.env.insert(op::env::IN_GOTO, Value::Bool(true));
    }

    pub fn jump_in(&mut self) {
        self.env.insert(op::env::IN_JUMP, Value::Bool(true));
    }

    /// Installs the transaction layer's signature-message constructor.
    pub fn set_spent_msg_hook(&mut self, f: Box<dyn Fn(i64) -> Vec<u8>>) {
        self.spent_msg = Some(f);
    }

    pub fn spent_msg(&self, flag: i64) -> Vec<u8> {
        self.spent_msg.as_ref().map_or(Vec::new(), |f| f(flag))
    }

    /// Installs the award-check hook used by `SYS_AWARD`.
    pub fn set_award_hook(&mut self, f: Box<dyn Fn(i64) -> i64>) {
        self.award = Some(f);
    }

    pub fn check_award(&self, height: i64) -> i64 {
        self.award.as_ref().map_or(0, |f| f(height))
    }
}

/// Per-script executor.
///
/// A top-level executor owns fresh state; children selectively share or
/// re-create each slot according to their kind. The script cursor always
/// belongs to the executor alone.
pub struct Actuator {
    ver: u32,
    id: Vec<u8>,
    pub(crate) ifs: Option<bool>,
    pub(crate) script: Script,
    state: State,
    scope: Vec<Value>,
    envs: Rc<RefCell<Envs>>,
    spaces: Rc<RefCell<Spaces>>,
    counters: Counters,
    switch: Option<Rc<RefCell<SwitchCtx>>>,
    loop_var: Option<Rc<RefCell<[Value; 4]>>>,
    in_expr: Rc<Cell<i32>>,
    xfrom: Option<Rc<HashMap<i64, Value>>>,
    globals: Rc<RefCell<HashMap<i64, Value>>>,
}

impl Actuator {
    /// Top-level executor for one script run.
    ///
    /// `id` is the 10-byte script identity, `ch` the shared `BUFDUMP`
    /// sink, `envs` the environment owned by this run.
    pub fn new(
        id: &[u8],
        code: Vec<u8>,
        ch: Option<Sender<Middler>>,
        envs: Envs,
        ver: u32,
    ) -> Self {
        Self {
            ver,
            id: id.to_vec(),
            ifs: None,
            script: Script::new(code),
            state: State::default(),
            scope: Vec::new(),
            envs: Rc::new(RefCell::new(envs)),
            spaces: Rc::new(RefCell::new(Spaces::new(ch))),
            counters: Counters::fresh(),
            switch: None,
            loop_var: None,
            in_expr: Rc::new(Cell::new(0)),
            xfrom: None,
            globals: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    fn derive(&self, code: &[u8]) -> Self {
        Self {
            ver: self.ver,
            id: self.id.clone(),
            ifs: None,
            script: Script::new(code.to_vec()),
            state: State::default(),
            scope: Vec::new(),
            envs: self.envs.clone(),
            spaces: self.spaces.clone(),
            counters: self.counters.clone(),
            switch: None,
            loop_var: self.loop_var.clone(),
            in_expr: Rc::new(Cell::new(0)),
            xfrom: self.xfrom.clone(),
            globals: self.globals.clone(),
        }
    }

    /// Plain sub-block: IF/ELSE bodies, BLOCK, and loop iterations.
    pub(crate) fn block_new(&self, code: &[u8]) -> Self {
        self.derive(code)
    }

    /// SWITCH body with a fresh comparison context.
    pub(crate) fn switch_new(&self, code: &[u8], target: Value, cases: Vec<Value>) -> Self {
        let mut a = self.derive(code);
        a.switch = Some(Rc::new(RefCell::new(SwitchCtx::new(target, cases))));
        a
    }

    /// CASE/DEFAULT body inheriting only the fallthrough cell.
    pub(crate) fn case_new(&self, code: &[u8]) -> Self {
        let mut a = self.derive(code);
        a.switch = self
            .switch
            .as_ref()
            .map(|ctx| Rc::new(RefCell::new(ctx.borrow().case_in())));
        a
    }

    /// Private scope for MAP/FILTER: own stack and args, fresh loop slots,
    /// no jump budget.
    pub(crate) fn scope_new(&self, code: &[u8]) -> Self {
        let mut a = self.derive(code);
        a.spaces = Rc::new(RefCell::new(self.spaces.borrow().scope_new()));
        a.counters = Counters::default();
        a.loop_var = Some(Rc::new(RefCell::new(loop_slots())));
        a
    }

    /// EACH body: shared spaces, fresh loop slots, JUMP-only budget.
    pub(crate) fn loop_new(&self, code: &[u8]) -> Self {
        let mut a = self.derive(code);
        a.counters = self.counters.jumps_only();
        a.loop_var = Some(Rc::new(RefCell::new(loop_slots())));
        a
    }

    /// Independent script entered by GOTO: own stack, args and globals;
    /// caller info synthesized into `xfrom`.
    pub(crate) fn script_new(&self, id: Vec<u8>, code: Vec<u8>) -> Self {
        let mut a = self.derive(&code);
        a.id = id;
        a.spaces = Rc::new(RefCell::new(self.spaces.borrow().scope_new()));
        a.globals = Rc::new(RefCell::new(HashMap::new()));
        a.loop_var = None;
        a.xfrom = Some(Rc::new(self.from_script()));
        a
    }

    /// Embedded script entered by JUMP: shares the caller's spaces and
    /// globals but carries its own identity and `xfrom`.
    pub(crate) fn embed_new(&self, id: Vec<u8>, code: Vec<u8>) -> Self {
        let mut a = self.derive(&code);
        a.id = id;
        a.loop_var = None;
        a.xfrom = Some(Rc::new(self.from_script()));
        a
    }

    /// EVAL body: isolated like a GOTO target but keeps the caller's id,
    /// since the code can only come from a `CODE{}` literal of this script.
    pub(crate) fn eval_new(&self, code: &[u8]) -> Self {
        let mut a = self.derive(code);
        a.spaces = Rc::new(RefCell::new(self.spaces.borrow().scope_new()));
        a.counters = Counters::default();
        a.globals = Rc::new(RefCell::new(HashMap::new()));
        a.loop_var = None;
        a.xfrom = Some(Rc::new(self.from_script()));
        a
    }

    /// Expression fragment: shares everything including the expression
    /// depth; no jump budget.
    pub(crate) fn expr_new(&self, code: &[u8]) -> Self {
        let mut a = self.derive(code);
        a.counters = Counters::default();
        a.in_expr = self.in_expr.clone();
        a
    }

    // Caller-script info exposed through XFROM in the jump target.
    fn from_script(&self) -> HashMap<i64, Value> {
        let mut m = HashMap::new();
        m.insert(op::xfrom::SOURCE, Value::Bytes(self.script.past().to_vec()));
        m.insert(op::xfrom::OFFSET, Value::Int(self.script.offset() as i64));
        m
    }

    pub fn ver(&self) -> u32 {
        self.ver
    }

    pub fn id(&self) -> &[u8] {
        &self.id
    }

    pub fn envs(&self) -> Rc<RefCell<Envs>> {
        self.envs.clone()
    }

    pub(crate) fn switch_ctx(&self) -> Exec<Rc<RefCell<SwitchCtx>>> {
        self.switch.clone().ok_or_else(|| ExecError::ToHere.into())
    }

    pub(crate) fn in_expr(&self) -> bool {
        self.in_expr.get() > 0
    }

    pub(crate) fn expr_in(&self) {
        self.in_expr.set(self.in_expr.get() + 1);
    }

    pub(crate) fn expr_out(&self) {
        self.in_expr.set(self.in_expr.get() - 1);
    }

    pub(crate) fn xfrom_item(&self, i: i64) -> Value {
        self.xfrom
            .as_ref()
            .and_then(|m| m.get(&i).cloned())
            .unwrap_or(Value::Nil)
    }

    pub(crate) fn global_set(&self, i: i64, v: Value) {
        self.globals.borrow_mut().insert(i, v);
    }

    pub(crate) fn global_value(&self, i: i64) -> Value {
        self.globals.borrow().get(&i).cloned().unwrap_or(Value::Nil)
    }

    pub(crate) fn incr_goto(&self) -> Exec<()> {
        self.counters.incr_goto()
    }

    pub(crate) fn incr_jump(&self) -> Exec<()> {
        self.counters.incr_jump()
    }

    pub(crate) fn gotos(&self) -> u32 {
        self.counters.gotos()
    }

    pub(crate) fn jumps(&self) -> u32 {
        self.counters.jumps()
    }

    pub(crate) fn set_jumps(&self, n: u32) {
        self.counters.set_jumps(n)
    }

    // Capture-chain state -------------------------------------------------

    pub(crate) fn revert(&mut self) {
        self.state.revert();
    }

    pub(crate) fn back_to(&self) -> Sink {
        self.state.back_to
    }

    /// `@`/`$`: select the sink and pin argument acquisition back to the
    /// region rule; only a following `~` can flip it.
    pub(crate) fn route_to(&mut self, sink: Sink) {
        self.state.back_to = sink;
        self.state.from_stack = false;
        self.state.changed = true;
    }

    pub(crate) fn take_from_stack(&mut self, on: bool) {
        self.state.from_stack = on;
        self.state.changed = true;
    }

    // Argument acquisition and return routing -----------------------------

    /// Applies the argument-acquisition rule for an instruction needing
    /// `n` arguments (`-1` = variadic over the args region).
    pub(crate) fn arguments(&mut self, n: i8) -> Exec<Vec<Value>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut sp = self.spaces.borrow_mut();
        if n < 0 {
            return Ok(std::mem::take(&mut sp.args));
        }
        let n = n as usize;
        if self.state.from_stack || sp.args.is_empty() {
            return sp.stack_pops(n);
        }
        if sp.args.len() != n {
            return Err(ExecError::ArgumentMismatch {
                want: n,
                have: sp.args.len(),
            }
            .into());
        }
        Ok(std::mem::take(&mut sp.args))
    }

    /// Routes a handler's return values into the sink captured before the
    /// call.
    pub(crate) fn return_put(&mut self, to: Sink, vs: Option<Vec<Value>>) -> Exec<()> {
        let Some(vs) = vs else { return Ok(()) };
        match to {
            Sink::Stack => self.spaces.borrow_mut().stack_push(vs),
            Sink::Args => {
                self.spaces.borrow_mut().args.extend(vs);
                Ok(())
            }
            Sink::Scope => self.scope_add(vs),
        }
    }

    // Scope ---------------------------------------------------------------

    pub(crate) fn scope_add(&mut self, vs: Vec<Value>) -> Exec<()> {
        let n = self.scope.len() + vs.len();
        if n > SCOPE_MAX {
            return Err(ExecError::ScopeOverflow(n).into());
        }
        self.scope.extend(vs);
        Ok(())
    }

    pub(crate) fn scope_item(&self, i: i64) -> Exec<Value> {
        let idx = if i < 0 { i + self.scope.len() as i64 } else { i };
        if idx < 0 || idx as usize >= self.scope.len() {
            return Err(ExecError::ScopeIndex(i).into());
        }
        Ok(self.scope[idx as usize].clone())
    }

    // Loop variables ------------------------------------------------------

    pub(crate) fn loop_set(&self, key: Value, value: Value, data: Value, size: usize) -> Exec<()> {
        let slots = self.loop_var.as_ref().ok_or(ExecError::ToHere)?;
        *slots.borrow_mut() = [value, key, data, Value::Int(size as i64)];
        Ok(())
    }

    pub(crate) fn loop_item(&self, i: i64) -> Exec<Value> {
        let slots = self.loop_var.as_ref().ok_or(ExecError::ToHere)?;
        let slots = slots.borrow();
        usize::try_from(i)
            .ok()
            .and_then(|i| slots.get(i).cloned())
            .ok_or_else(|| ExecError::ToHere.into())
    }

    // Stack and buffers ---------------------------------------------------

    pub(crate) fn stack_push(&self, vs: Vec<Value>) -> Exec<()> {
        self.spaces.borrow_mut().stack_push(vs)
    }

    pub(crate) fn stack_pop(&self) -> Exec<Value> {
        self.spaces.borrow_mut().stack_pop()
    }

    pub(crate) fn stack_pops(&self, n: usize) -> Exec<Vec<Value>> {
        self.spaces.borrow_mut().stack_pops(n)
    }

    pub(crate) fn stack_top(&self) -> Exec<Value> {
        self.spaces.borrow().stack_top()
    }

    pub(crate) fn stack_tops(&self, n: usize) -> Exec<Vec<Value>> {
        self.spaces.borrow().stack_tops(n)
    }

    pub(crate) fn stack_item(&self, i: i64) -> Exec<Value> {
        self.spaces.borrow().stack_item(i)
    }

    pub(crate) fn stack_items(&self, i: i64, n: usize) -> Exec<Vec<Value>> {
        self.spaces.borrow().stack_items(i, n)
    }

    pub(crate) fn stack_size(&self) -> usize {
        self.spaces.borrow().stack.len()
    }

    /// Snapshot of the whole data stack, bottom first.
    pub fn stack_data(&self) -> Vec<Value> {
        self.spaces.borrow().stack.clone()
    }

    pub(crate) fn put_args(&self, v: Value) {
        self.spaces.borrow_mut().args.push(v);
    }

    /// Pre-fills the input buffer. A script containing `INPUT` fails
    /// unless the caller loads enough values first.
    pub fn input(&self, vs: Vec<Value>) {
        self.spaces.borrow_mut().bufin.extend(vs);
    }

    pub(crate) fn input_empty(&self) -> bool {
        self.spaces.borrow().bufin.is_empty()
    }

    pub(crate) fn output_empty(&self) -> bool {
        self.spaces.borrow().bufout.is_empty()
    }

    /// Takes `n` values from the input buffer; zero takes everything.
    pub(crate) fn bufin_pick(&self, n: usize) -> Exec<Vec<Value>> {
        let mut sp = self.spaces.borrow_mut();
        if n == 0 {
            return Ok(sp.bufin.drain(..).collect());
        }
        if n > sp.bufin.len() {
            return Err(ExecError::InputShort {
                want: n,
                have: sp.bufin.len(),
            }
            .into());
        }
        Ok(sp.bufin.drain(..n).collect())
    }

    pub(crate) fn bufout_push(&self, vs: Vec<Value>) {
        self.spaces.borrow_mut().bufout.extend(vs);
    }

    pub(crate) fn bufout_take(&self) -> Vec<Value> {
        std::mem::take(&mut self.spaces.borrow_mut().bufout)
    }

    pub(crate) fn channel(&self) -> Option<Sender<Middler>> {
        self.spaces.borrow().ch.clone()
    }

    /// Signature-message construction, delegated to the transaction layer.
    pub(crate) fn spent_msg(&self, flag: i64) -> Vec<u8> {
        self.envs.borrow().spent_msg(flag)
    }
}

fn loop_slots() -> [Value; 4] {
    [Value::Nil, Value::Nil, Value::Nil, Value::Nil]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actuator() -> Actuator {
        Actuator::new(&[0; 10], Vec::new(), None, Envs::new(Vec::new(), 0), 1)
    }

    #[test]
    fn stack_rejects_the_257th_value() {
        let a = actuator();
        a.stack_push(vec![Value::Int(0); STACK_MAX]).unwrap();
        let err = a.stack_push(vec![Value::Int(0)]).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Escape::Fault(ExecError::StackOverflow(_))
        ));
    }

    #[test]
    fn scope_rejects_the_129th_value() {
        let mut a = actuator();
        a.scope_add(vec![Value::Int(0); SCOPE_MAX]).unwrap();
        assert!(a.scope_add(vec![Value::Int(0)]).is_err());
        assert_eq!(a.scope_item(-1).unwrap(), Value::Int(0));
    }

    #[test]
    fn argument_rule_prefers_args_region() {
        let mut a = actuator();
        a.stack_push(vec![Value::Int(1), Value::Int(2)]).unwrap();
        a.put_args(Value::Int(9));

        // Args region present and matching: drained.
        assert_eq!(a.arguments(1).unwrap(), vec![Value::Int(9)]);
        // Args region now empty: popped from the stack.
        assert_eq!(a.arguments(1).unwrap(), vec![Value::Int(2)]);
    }

    #[test]
    fn argument_rule_counts_must_match() {
        let mut a = actuator();
        a.put_args(Value::Int(1));
        a.put_args(Value::Int(2));
        let err = a.arguments(1).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Escape::Fault(ExecError::ArgumentMismatch { want: 1, have: 2 })
        ));
    }

    #[test]
    fn from_stack_overrides_args_region() {
        let mut a = actuator();
        a.stack_push(vec![Value::Int(7)]).unwrap();
        a.put_args(Value::Int(9));
        a.take_from_stack(true);
        assert_eq!(a.arguments(1).unwrap(), vec![Value::Int(7)]);
    }

    #[test]
    fn goto_budget_is_three_inclusive() {
        let a = actuator();
        for _ in 0..GOTO_MAX {
            a.incr_goto().unwrap();
        }
        assert!(matches!(
            a.incr_goto().unwrap_err(),
            crate::error::Escape::Fault(ExecError::GotoLimit)
        ));
    }

    #[test]
    fn loop_child_forbids_goto_but_shares_jumps() {
        let a = actuator();
        a.incr_jump().unwrap();
        let child = a.loop_new(&[]);
        assert!(matches!(
            child.incr_goto().unwrap_err(),
            crate::error::Escape::Fault(ExecError::GotoForbidden)
        ));
        assert_eq!(child.jumps(), 1);
        child.incr_jump().unwrap();
        assert_eq!(a.jumps(), 2);
    }

    #[test]
    fn case_context_consumes_case_values() {
        let mut ctx = SwitchCtx::new(Value::Int(2), vec![Value::Int(1), Value::Int(2)]);
        assert!(!ctx.case_pass().unwrap());
        assert!(ctx.case_pass().unwrap());
        assert!(ctx.case_pass().is_err());
    }

    #[test]
    fn scope_child_isolates_the_stack() {
        let a = actuator();
        a.stack_push(vec![Value::Int(5)]).unwrap();
        let child = a.scope_new(&[]);
        assert_eq!(child.stack_size(), 0);
        child.stack_push(vec![Value::Int(1)]).unwrap();
        assert_eq!(a.stack_size(), 1);
    }

    #[test]
    fn mul_sig_set_is_replaced_not_mutated() {
        let mut envs = Envs::new(Vec::new(), 0);
        envs.set_mul_sig(&[0, 2]);
        assert!(envs.mul_sig_n(2));
        envs.set_mul_sig(&[1]);
        assert!(!envs.mul_sig_n(2));
        assert!(envs.mul_sig_n(1));
    }
}
