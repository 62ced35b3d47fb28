//! `PROC`/`FN` invocation: parameter binding through the `LOCAL`/`RETPARM`
//! save-restore protocol, and the nested sub-loop an `FN` call needs to
//! synchronously produce a value from inside expression evaluation.
//!
//! A `PROC` call is a plain jump: push the formal-parameter save frames,
//! push a `Proc` frame recording where to resume, and let the dispatcher's
//! own top-level loop carry on at the body's entry point exactly like a
//! `GOSUB` does. `ENDPROC` unwinds back to that `Proc` frame and restores
//! `current`.
//!
//! `FN`, called from inside [`crate::eval`] while the *caller's* statement
//! handler is mid-evaluation, can't do the same thing — the call has to
//! come back with a `Value` before the surrounding expression can finish.
//! [`Interpreter::run_loop`] drives the dispatcher recursively (as an
//! ordinary nested Rust call) until the `=` statement pops this call's own
//! `Fn` frame back off, then hands the saved return value back.
//!
//! The one complication this recursion creates: an `ON ERROR LOCAL`
//! handler several calls up the Rust stack can reposition `current` at a
//! depth shallower than the nested `run_loop` currently driving execution.
//! Rust has no cross-frame `longjmp`, so instead each `run_loop` compares
//! the control-stack depth after every step against its own recorded
//! `floor` (the depth on entry) and, finding it already unwound past, just
//! returns [`LoopExit::UnwoundAbove`] — the caller turns that into
//! `Err(BasicError::ControlUnwound)`, an ordinary `?`-propagated error that
//! the next `run_loop` up sees and re-checks against its own floor, and so
//! on until the level that actually owns the target depth resumes.

use crate::error::{BasicError, Result};
use crate::host::Host;
use crate::interpreter::{Interpreter, LoopExit, StopReason};
use crate::stack::{Frame, Lvalue};
use crate::symbol::{NameKind, ProcFnDef, SymbolId};
use crate::token::Opcode;
use crate::value::Value;

impl<H: Host> Interpreter<H> {
    /// Drive the dispatcher until the control stack falls back to `floor`
    /// or the run ends outright. Used only by [`Interpreter::call_fn`] —
    /// `PROC` calls and every other control-flow statement stay on the
    /// single top-level loop in `crate::interpreter::run`.
    pub(crate) fn run_loop(&mut self, floor: usize) -> LoopExit {
        loop {
            match self.step() {
                Ok(None) => {
                    if self.control.len() <= floor {
                        return LoopExit::ReachedFloor;
                    }
                }
                Ok(Some(reason)) => return LoopExit::Stopped(reason),
                Err(BasicError::ControlUnwound) => {
                    if self.control.len() <= floor {
                        return LoopExit::UnwoundAbove;
                    }
                }
                Err(err) => match self.handle_error(err) {
                    Ok(()) => {
                        if self.control.len() <= floor {
                            return LoopExit::UnwoundAbove;
                        }
                    }
                    Err(unhandled) => {
                        return LoopExit::Stopped(StopReason::UnhandledError(unhandled))
                    }
                },
            }
        }
    }

    /// `FN` used inside an expression: parse the argument list, bind
    /// formals, and run the body to its `=` via a nested [`Self::run_loop`].
    pub(crate) fn call_fn(&mut self, id: SymbolId) -> Result<Value> {
        let def = self.resolve_proc_fn(id, NameKind::Fn)?;
        let (return_addr, args) = self.parse_call_args(&def)?;
        let floor = self.control.len();
        self.control.push(Frame::Fn {
            return_addr: return_addr as u32,
            param_count: def.params.len(),
            name: self.symbols.get(id).name.clone(),
            saved_opstack_len: self.operand.len(),
            saved_error_handler: None,
        })?;
        self.bind_call_args(&def, args)?;
        self.current = def.entry_point as usize;
        match self.run_loop(floor) {
            LoopExit::ReachedFloor => self.pending_return.take().ok_or(BasicError::FnReturn),
            LoopExit::UnwoundAbove => Err(BasicError::ControlUnwound),
            LoopExit::Stopped(reason) => Err(stopped_as_error(reason)),
        }
    }

    /// `PROC` used as a statement: parse arguments, push the `Proc` frame,
    /// bind formals on top of it, and jump — the enclosing `run`/`run_loop`
    /// just keeps stepping at the new `current`.
    pub(crate) fn call_proc(&mut self, id: SymbolId) -> Result<()> {
        let def = self.resolve_proc_fn(id, NameKind::Proc)?;
        let (return_addr, args) = self.parse_call_args(&def)?;
        self.control.push(Frame::Proc {
            return_addr: return_addr as u32,
            param_count: def.params.len(),
            name: self.symbols.get(id).name.clone(),
        })?;
        self.bind_call_args(&def, args)?;
        self.current = def.entry_point as usize;
        Ok(())
    }

    /// Parse `(arg, arg, ...)` (present only when `def.params` is
    /// non-empty, spec §4.7), evaluating each actual against the caller's
    /// lvalue/value but without touching the control stack yet. Returns the
    /// offset just past the closing paren (the call's own return address)
    /// and the parsed `(lvalue, value)` pairs for [`Self::bind_call_args`]
    /// to push — the `Proc`/`Fn` frame must go on the stack before any
    /// `Local`/`RetParm` frame so unwinding finds them in the right order.
    fn parse_call_args(&mut self, def: &ProcFnDef) -> Result<(usize, Vec<(Lvalue, Value)>)> {
        let mut args: Vec<(Lvalue, Value)> = Vec::with_capacity(def.params.len());
        if !def.params.is_empty() {
            if self.peek_opcode()? != Opcode::LParen {
                return Err(BasicError::Syntax);
            }
            self.current += 1;
            for (i, _param) in def.params.iter().enumerate() {
                let lvalue = self.parse_lvalue_or_dummy()?;
                let value = self.read_lvalue_for_call(&lvalue)?;
                args.push((lvalue, value));
                if i + 1 < def.params.len() {
                    if self.peek_opcode()? != Opcode::Comma {
                        return Err(BasicError::ComMiss);
                    }
                    self.current += 1;
                }
            }
            if self.peek_opcode()? != Opcode::RParen {
                return Err(BasicError::RpMiss);
            }
            self.current += 1;
        }
        let return_addr = self.current;
        Ok((return_addr, args))
    }

    /// Bind each parsed actual to its formal and push its `Local`/`RetParm`
    /// save frame. Must run after the caller has already pushed the call's
    /// own `Proc`/`Fn` frame, so these land above it — `unwind_call` relies
    /// on that ordering to restore every parameter before popping the call
    /// frame underneath them.
    fn bind_call_args(&mut self, def: &ProcFnDef, args: Vec<(Lvalue, Value)>) -> Result<()> {
        for (param, (caller_lvalue, value)) in def.params.iter().zip(args.into_iter()) {
            let formal = self.symbols.insert(
                def.owner,
                NameKind::Variable,
                &param.name,
                crate::symbol::SymbolPayload::Pending,
            );
            let saved = self
                .symbols
                .scalar(formal)
                .ok()
                .cloned()
                .unwrap_or(Value::Int(0));
            self.symbols.set_scalar(formal, value)?;
            if param.is_return {
                self.control.push(Frame::RetParm {
                    caller_target: caller_lvalue,
                    inner: Lvalue::Scalar(formal),
                    saved,
                })?;
            } else {
                self.control.push(Frame::Local {
                    target: Lvalue::Scalar(formal),
                    saved,
                })?;
            }
        }
        Ok(())
    }

    /// A `RETURN`-flagged formal's actual argument must itself be an
    /// lvalue (so its final value can be copied back); a plain formal's
    /// argument is any expression, evaluated once up front. Since both
    /// need the same token-stream position first, this always parses an
    /// lvalue when possible and falls back to a full expression otherwise.
    fn parse_lvalue_or_dummy(&mut self) -> Result<Lvalue> {
        match self.peek_opcode()? {
            Opcode::Var | Opcode::IndirectByte | Opcode::IndirectWord => self.parse_lvalue(),
            _ => {
                // A non-lvalue actual (a literal or sub-expression): bind it
                // through a throwaway scalar that has nowhere to write back.
                let value = self.eval_prec(0)?;
                Ok(Lvalue::Scalar(self.symbols.new_temp_scalar(value)))
            }
        }
    }

    fn read_lvalue_for_call(&mut self, lvalue: &Lvalue) -> Result<Value> {
        self.read_lvalue(lvalue)
    }

    /// Resolve a `PROC`/`FN` name to its definition, scanning the program's
    /// (or, on a program-scope miss, each declared library's) `DEF`
    /// headers on first need — spec §4.10's "library search is lazy".
    fn resolve_proc_fn(&mut self, id: SymbolId, expected: NameKind) -> Result<ProcFnDef> {
        let owner = self.symbols.get(id).owner;
        self.ensure_defs_scanned(owner)?;
        if let Ok(def) = self.symbols.proc_fn_def(id) {
            return Ok(def.clone());
        }
        if owner.is_none() {
            let name = self.symbols.get(id).name.clone();
            for lib in self.declared_libraries.clone() {
                self.ensure_defs_scanned(Some(lib))?;
                if let Some(found) = self.symbols.lookup(Some(lib), expected, &name) {
                    if let Ok(def) = self.symbols.proc_fn_def(found) {
                        return Ok(def.clone());
                    }
                }
            }
        }
        Err(match expected {
            NameKind::Fn => BasicError::FnReturn,
            _ => BasicError::EndProc,
        })
    }

    fn ensure_defs_scanned(&mut self, owner: Option<crate::symbol::LibraryId>) -> Result<()> {
        match owner {
            None => {
                if !self.program_defs_scanned {
                    let before = self.symbols.len();
                    crate::patch::scan_defs_in_range(
                        &self.program,
                        self.program.start(),
                        self.program_main_end,
                        &mut self.symbols,
                        None,
                    )?;
                    self.program_defs_scanned = true;
                    log::debug!(
                        "lazy-scanned program DEF PROC/DEF FN headers: {} found",
                        self.symbols.len() - before
                    );
                }
            }
            Some(lib) => {
                if !self.symbols.library_scanned(lib) {
                    let range = self
                        .library_ranges
                        .iter()
                        .find(|r| r.id == lib)
                        .ok_or(BasicError::Broken)?;
                    let before = self.symbols.len();
                    crate::patch::scan_defs_in_range(
                        &self.program,
                        range.start,
                        range.end,
                        &mut self.symbols,
                        Some(lib),
                    )?;
                    self.symbols.mark_library_scanned(lib);
                    log::debug!(
                        "lazy-scanned library {lib:?} DEF PROC/DEF FN headers: {} found",
                        self.symbols.len() - before
                    );
                }
            }
        }
        Ok(())
    }

    /// Unwind back through a `Proc`/`Fn` call's own frames (restoring every
    /// `Local`/`RetParm` along the way, copying `RetParm` finals back to
    /// the caller's lvalue) and reposition `current` at the return
    /// address. Shared by `ENDPROC` and `=`.
    pub(crate) fn unwind_call(&mut self, expect_fn: bool) -> Result<u32> {
        let undone = self.control.unwind_until(|f| match (expect_fn, f) {
            (true, Frame::Fn { .. }) => true,
            (false, Frame::Proc { .. }) => true,
            _ => false,
        })?;
        for frame in undone {
            self.restore_saved(frame)?;
        }
        let return_addr = match self.control.pop() {
            Some(Frame::Fn { return_addr, .. }) if expect_fn => return_addr,
            Some(Frame::Proc { return_addr, .. }) if !expect_fn => return_addr,
            _ => return Err(BasicError::Broken),
        };
        Ok(return_addr)
    }
}

fn stopped_as_error(reason: StopReason) -> BasicError {
    match reason {
        StopReason::UnhandledError(err) => err,
        StopReason::EndOfProgram | StopReason::End { .. } => BasicError::EndProc,
        StopReason::Stop => BasicError::Stop,
        StopReason::Quit { .. } => BasicError::Stop,
    }
}
