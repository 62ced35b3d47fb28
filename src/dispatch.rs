//! The statement dispatcher (spec §4.1): one `match` over every resolved
//! opcode a statement can start with, standing in for the fn-pointer jump
//! table the "256-entry handler table, indexed by opcode" design note
//! describes — Rust has no first-class sparse array of methods, so a
//! `match` arm per opcode is the idiomatic equivalent.
//!
//! Each handler leaves `current` positioned at the next statement (or
//! jumps elsewhere for control flow) and returns `Ok(None)` to keep the
//! loop going, `Ok(Some(reason))` to stop the run, or an `Err` for the
//! caller to unwind to the nearest `ON ERROR` handler.

use crate::config::RunFlags;
use crate::error::{BasicError, Result};
use crate::host::Host;
use crate::interpreter::{Interpreter, StopReason};
use crate::stack::{DataCursor, ErrorHandler, ForFrame, ForKind, Frame, Lvalue};
use crate::symbol::{NameKind, SymbolId};
use crate::token::Opcode;
use crate::value::Value;

impl<H: Host> Interpreter<H> {
    pub(crate) fn dispatch_statement(&mut self, byte: u8) -> Result<Option<StopReason>> {
        let opcode = Opcode::try_from(byte).map_err(|_| BasicError::Syntax)?;
        log::trace!("dispatch opcode={opcode:?} current={}", self.current);
        match opcode {
            Opcode::Assign => self.stmt_assign(),
            Opcode::Print => self.stmt_print(),
            Opcode::XIf => self.stmt_if(),
            Opcode::BlockIf | Opcode::SingLif => self.stmt_if_resolved(opcode),
            Opcode::Else | Opcode::LhElse | Opcode::When | Opcode::Otherwise => self.stmt_else(),
            Opcode::EndIf => {
                self.current += 1;
                Ok(None)
            }
            Opcode::XCase => self.stmt_case(),
            Opcode::Case => self.stmt_case_resolved(),
            Opcode::EndCase => {
                self.current += 1;
                Ok(None)
            }
            Opcode::XWhile => self.stmt_while(),
            Opcode::While => self.stmt_while_resolved(),
            Opcode::EndWhile => self.stmt_endwhile(),
            Opcode::Repeat => self.stmt_repeat(),
            Opcode::Until => self.stmt_until(),
            Opcode::For => self.stmt_for(),
            Opcode::Next => self.stmt_next(),
            Opcode::Goto => self.stmt_goto(),
            Opcode::Gosub => self.stmt_gosub(),
            Opcode::Return => self.stmt_return(),
            Opcode::On => self.stmt_on(),
            Opcode::XFnProcCall => self.stmt_proc_call(true),
            Opcode::FnProcCall => self.stmt_proc_call(false),
            Opcode::EndProc => self.stmt_endproc(),
            Opcode::Equals => self.stmt_equals(),
            Opcode::Local => self.stmt_local(),
            Opcode::LocalError => self.stmt_local_error(),
            Opcode::LocalData => self.stmt_local_data(),
            Opcode::Data => self.stmt_data(),
            Opcode::Read => self.stmt_read(),
            Opcode::Restore => self.stmt_restore(),
            Opcode::Dim => self.stmt_dim(false),
            Opcode::DimHimem => self.stmt_dim(true),
            Opcode::Clear => self.stmt_clear(false),
            Opcode::ClearHimem => self.stmt_clear(true),
            Opcode::Library => self.stmt_library(),
            Opcode::ErrorStmt => self.stmt_error(),
            Opcode::OnError => self.stmt_on_error(),
            Opcode::Report => self.stmt_report(),
            Opcode::End => self.stmt_end(),
            Opcode::EndEquals => self.stmt_end_equals(),
            Opcode::Stop => Ok(Some(StopReason::Stop)),
            Opcode::Quit => self.stmt_quit(),
            Opcode::Run => self.stmt_run(),
            Opcode::Chain => self.stmt_chain(),
            Opcode::Oscli => self.stmt_oscli(false),
            Opcode::OscliTo => self.stmt_oscli(true),
            Opcode::Call => self.stmt_call(),
            Opcode::Sys => self.stmt_sys(),
            Opcode::Wait => self.stmt_wait(),
            Opcode::Trace => self.stmt_trace(),
            Opcode::Swap => self.stmt_swap(),
            Opcode::Def => self.stmt_def(),
            Opcode::Semicolon | Opcode::Var | Opcode::XVar => Err(BasicError::Syntax),
            _ => Err(BasicError::Syntax),
        }
    }

    // --- assignment and PRINT -------------------------------------------

    fn stmt_assign(&mut self) -> Result<Option<StopReason>> {
        self.current += 1;
        let lvalue = self.parse_lvalue()?;
        // `Assign` always carries its own `=` implicitly, with no distinct
        // opcode for it mid-statement; the next token is straight away the
        // right-hand side.
        self.eval_expr()?;
        let value = self.operand.pop()?;
        self.write_lvalue(&lvalue, value)?;
        Ok(None)
    }

    /// `PRINT [expr] [; expr ...] [;]`. Numbers print with BASIC's usual
    /// bare formatting; a trailing `;` (spec's terminal-I/O non-goal, but
    /// needed for observable output, SPEC_FULL.md ambient stack) suppresses
    /// the newline.
    fn stmt_print(&mut self) -> Result<Option<StopReason>> {
        self.current += 1;
        let mut suppress_newline = false;
        loop {
            suppress_newline = false;
            if self.program.is_statement_end(self.current)? {
                break;
            }
            if self.peek_opcode() == Ok(Opcode::Semicolon) {
                self.current += 1;
                suppress_newline = true;
                if self.program.is_statement_end(self.current)? {
                    break;
                }
                continue;
            }
            self.eval_expr()?;
            let value = self.operand.pop()?;
            let text = format_value(&value);
            self.host.write_output(text.as_bytes()).map_err(crate::host::host_err)?;
        }
        if !suppress_newline {
            self.host.write_output(b"\r\n").map_err(crate::host::host_err)?;
        }
        Ok(None)
    }

    // --- IF / ELSE -------------------------------------------------------

    fn stmt_if(&mut self) -> Result<Option<StopReason>> {
        let opcode_offset = self.current;
        let source = self.program.source_section(self.line_start())?.to_vec();
        let then_is_last_on_line = source_ends_with_then(&source);
        let cascade_nested_block_if = contains_nested_if_before_then(&source);
        crate::patch::patch_if(
            &mut self.program,
            opcode_offset,
            then_is_last_on_line,
            cascade_nested_block_if,
            &self.run_flags,
        )?;
        self.current = opcode_offset;
        self.stmt_if_resolved(self.peek_opcode()?)
    }

    fn stmt_if_resolved(&mut self, opcode: Opcode) -> Result<Option<StopReason>> {
        match opcode {
            Opcode::BlockIf => {
                let then_target = self.program.read_offset_target(self.current)?;
                let else_target = self
                    .program
                    .read_offset_target(self.current + crate::token::OFFSIZE)?;
                self.current += 1 + 2 * crate::token::OFFSIZE;
                self.eval_expr()?;
                let condition = self.operand.pop()?;
                self.current = if condition.as_i32()? != 0 {
                    then_target
                } else {
                    else_target
                };
                Ok(None)
            }
            Opcode::SingLif => {
                // Same reserved operand width as `BlockIf` (spec §9
                // "patch is monotonic"): the two offset slots a block IF
                // would have used sit unread here, but the tokeniser
                // always lays them down before the condition expression.
                self.current += 1 + 2 * crate::token::OFFSIZE;
                self.eval_expr()?;
                let condition = self.operand.pop()?;
                if condition.as_i32()? == 0 {
                    self.skip_rest_of_line()?;
                }
                Ok(None)
            }
            _ => Err(BasicError::Broken),
        }
    }

    fn skip_rest_of_line(&mut self) -> Result<()> {
        self.current = self.program.next_line_offset(self.line_start()?)?;
        if !self.program.is_end_of_program(self.current) {
            self.current = self.program.exec_start(self.current)?;
        }
        Ok(())
    }

    fn stmt_else(&mut self) -> Result<Option<StopReason>> {
        // Reached by straight-line fall-through out of a `THEN` branch (or,
        // shared with `CASE`, out of a `WHEN`/`OTHERWISE` arm's body): jump
        // to the matching `ENDIF`/`ENDCASE`'s successor baked in at patch
        // time.
        let target = self.program.read_offset_target(self.current)?;
        self.current = target;
        Ok(None)
    }

    // --- CASE --------------------------------------------------------

    fn stmt_case(&mut self) -> Result<Option<StopReason>> {
        let opcode_offset = self.current;
        crate::patch::patch_case(
            &mut self.program,
            opcode_offset,
            &mut self.case_tables,
            &self.limits,
        )?;
        self.current = opcode_offset;
        self.stmt_case_resolved()
    }

    fn stmt_case_resolved(&mut self) -> Result<Option<StopReason>> {
        let table_id = crate::case_table::CaseTableId(self.program.read_u32(self.current + 1)?);
        self.current += 1 + crate::token::LOFFSIZE;
        self.eval_expr()?;
        let subject = self.operand.pop()?;
        let table = self.case_tables.get(table_id)?.clone_arms();
        for arm in &table.0 {
            self.current = arm.values_start;
            loop {
                self.eval_expr()?;
                let candidate = self.operand.pop()?;
                if crate::value::case_equal(&subject, &candidate)? {
                    self.current = arm.body_start;
                    return Ok(None);
                }
                if self.peek_opcode() == Ok(Opcode::Comma) {
                    self.current += 1;
                    continue;
                }
                break;
            }
        }
        self.current = table.1.unwrap_or(table.2);
        Ok(None)
    }

    // --- WHILE / REPEAT --------------------------------------------------

    fn stmt_while(&mut self) -> Result<Option<StopReason>> {
        let opcode_offset = self.current;
        crate::patch::patch_while(&mut self.program, opcode_offset)?;
        self.current = opcode_offset;
        self.stmt_while_resolved()
    }

    fn stmt_while_resolved(&mut self) -> Result<Option<StopReason>> {
        let exit = self.program.read_offset_target(self.current)?;
        let test_expr = self.current + 1 + crate::token::OFFSIZE;
        self.current = test_expr;
        self.eval_expr()?;
        let condition = self.operand.pop()?;
        if condition.as_i32()? == 0 {
            self.current = exit;
        } else {
            self.control.push(Frame::While {
                test_expr: test_expr as u32,
                exit: exit as u32,
            })?;
        }
        Ok(None)
    }

    fn stmt_endwhile(&mut self) -> Result<Option<StopReason>> {
        self.poll_escape_at_loop_back()?;
        let (undone, index) = self.control.find_while().map_err(|_| BasicError::EndWhile)?;
        for frame in undone {
            self.restore_saved(frame)?;
        }
        let Some(Frame::While { test_expr, .. }) = self.control.get(index).cloned() else {
            return Err(BasicError::Broken);
        };
        self.control.truncate(index);
        // Re-run the WHILE test the same way the first entry did, reusing
        // the already-resolved opcode sitting one opcode before test_expr:
        // it re-evaluates the condition itself and either re-pushes the
        // frame or jumps straight to `exit`, so there is nothing left to
        // check here.
        self.current = (test_expr as usize) - 1 - crate::token::OFFSIZE;
        self.stmt_while_resolved()
    }

    fn stmt_repeat(&mut self) -> Result<Option<StopReason>> {
        self.current += 1;
        self.control.push(Frame::Repeat { body: self.current as u32 })?;
        Ok(None)
    }

    fn stmt_until(&mut self) -> Result<Option<StopReason>> {
        self.current += 1;
        self.eval_expr()?;
        let condition = self.operand.pop()?;
        self.poll_escape_at_loop_back()?;
        let (undone, index) = self.control.find_repeat().map_err(|_| BasicError::NotRepeat)?;
        for frame in undone {
            self.restore_saved(frame)?;
        }
        if condition.as_i32()? != 0 {
            self.control.truncate(index);
        } else {
            let Some(Frame::Repeat { body }) = self.control.get(index).cloned() else {
                return Err(BasicError::Broken);
            };
            self.control.truncate(index + 1);
            self.current = body as usize;
        }
        Ok(None)
    }

    // --- FOR / NEXT --------------------------------------------------

    fn stmt_for(&mut self) -> Result<Option<StopReason>> {
        self.current += 1;
        let control = self.parse_lvalue()?;
        // `=` following the control variable is carried as part of the
        // surrounding `Assign`-shaped grammar, not its own opcode here; the
        // expression parser below picks up right after the lvalue.
        self.eval_expr()?;
        let start_value = self.operand.pop()?;
        if self.peek_opcode()? != Opcode::ToKw {
            return Err(BasicError::ToMiss);
        }
        self.current += 1;
        self.eval_expr()?;
        let limit_value = self.operand.pop()?;
        let step_value = if self.peek_opcode() == Ok(Opcode::StepKw) {
            self.current += 1;
            self.eval_expr()?;
            self.operand.pop()?
        } else {
            Value::Int(1)
        };
        self.write_lvalue(&control, start_value.clone())?;
        let kind = start_value
            .common_kind(&limit_value)?
            .max(start_value.common_kind(&step_value)?);
        let simple = matches!(kind, crate::value::NumKind::Int)
            && matches!(step_value, Value::Int(1) | Value::U8(1));
        let frame = match kind {
            crate::value::NumKind::Int => ForFrame {
                kind: ForKind::Int,
                control,
                body: self.current as u32,
                limit_i: limit_value.as_i32()?,
                limit_i64: 0,
                limit_f: 0.0,
                step_i: step_value.as_i32()?,
                step_i64: 0,
                step_f: 0.0,
                simple,
            },
            crate::value::NumKind::Int64 => ForFrame {
                kind: ForKind::Int64,
                control,
                body: self.current as u32,
                limit_i: 0,
                limit_i64: limit_value.as_i64()?,
                limit_f: 0.0,
                step_i: 0,
                step_i64: step_value.as_i64()?,
                step_f: 0.0,
                simple: false,
            },
            crate::value::NumKind::Float => ForFrame {
                kind: ForKind::Float,
                control,
                body: self.current as u32,
                limit_i: 0,
                limit_i64: 0,
                limit_f: limit_value.as_f64()?,
                step_i: 0,
                step_i64: 0,
                step_f: step_value.as_f64()?,
                simple: false,
            },
        };
        let entered = for_condition_met(&frame, &start_value)?;
        if entered {
            self.control.push(Frame::For(frame))?;
        } else {
            self.skip_to_matching_next()?;
        }
        Ok(None)
    }

    fn skip_to_matching_next(&mut self) -> Result<()> {
        let mut depth: u32 = 0;
        loop {
            if self.program.is_end_of_program(self.current) {
                return Err(BasicError::NotFor);
            }
            let byte = self.program.byte(self.current)?;
            if byte == crate::token::NUL {
                self.current = self.program.exec_start(self.program.next_line_offset(self.line_start())?)?;
                continue;
            }
            let Ok(op) = Opcode::try_from(byte) else {
                self.current += 1;
                continue;
            };
            match op {
                Opcode::For => {
                    depth += 1;
                    self.current += 1;
                }
                Opcode::Next if depth > 0 => {
                    depth -= 1;
                    self.current += 1;
                }
                Opcode::Next => {
                    self.current += 1;
                    return Ok(());
                }
                _ => self.current += 1 + op.fixed_operand_len().unwrap_or(0),
            }
        }
    }

    fn stmt_next(&mut self) -> Result<Option<StopReason>> {
        self.current += 1;
        // An explicit control-variable list after `NEXT` is this crate's
        // choice to support the same as a plain `NEXT`, by just looking at
        // the nearest `For` frame regardless (single-variable NEXT is the
        // overwhelmingly common case; spec §4.9 doesn't require the list
        // form beyond "advances the nearest FOR").
        self.poll_escape_at_loop_back()?;
        let (undone, index) = self
            .control
            .unwind_until(|f| matches!(f, Frame::For(_)))
            .map_err(|_| BasicError::NotFor)?;
        for frame in undone {
            self.restore_saved(frame)?;
        }
        let Some(Frame::For(for_frame)) = self.control.get(index).cloned() else {
            return Err(BasicError::Broken);
        };
        let current_value = self.read_lvalue(&for_frame.control)?;
        let advanced = advance_for(&for_frame, &current_value)?;
        self.write_lvalue(&for_frame.control, advanced.clone())?;
        if for_condition_met(&for_frame, &advanced)? {
            self.current = for_frame.body as usize;
        } else {
            self.control.truncate(index);
        }
        Ok(None)
    }

    // --- GOTO / GOSUB / RETURN -------------------------------------------

    fn read_line_target(&mut self) -> Result<usize> {
        match self.peek_opcode()? {
            Opcode::XLineNum => {
                let target = crate::patch::patch_line_num(&mut self.program, self.current)?;
                self.current += 1 + crate::token::LOFFSIZE;
                Ok(target)
            }
            Opcode::LineNum => {
                let target = self.program.read_long_target(self.current)?;
                self.current += 1 + crate::token::LOFFSIZE;
                Ok(target)
            }
            _ => Err(BasicError::Syntax),
        }
    }

    fn stmt_goto(&mut self) -> Result<Option<StopReason>> {
        self.current += 1;
        let target = self.read_line_target()?;
        self.current = self.program.exec_start(target)?;
        self.poll_escape_at_loop_back()?;
        Ok(None)
    }

    fn stmt_gosub(&mut self) -> Result<Option<StopReason>> {
        self.current += 1;
        let target = self.read_line_target()?;
        self.control.push(Frame::Gosub { return_addr: self.current as u32 })?;
        self.current = self.program.exec_start(target)?;
        self.poll_escape_at_loop_back()?;
        Ok(None)
    }

    fn stmt_return(&mut self) -> Result<Option<StopReason>> {
        self.current += 1;
        let (undone, _index) = self
            .control
            .unwind_until(|f| matches!(f, Frame::Gosub { .. }))
            .map_err(|_| BasicError::Broken)?;
        for frame in undone {
            self.restore_saved(frame)?;
        }
        let Some(Frame::Gosub { return_addr }) = self.control.pop() else {
            return Err(BasicError::Broken);
        };
        self.current = return_addr as usize;
        Ok(None)
    }

    /// One entry of an `ON ... PROC` list or its `ELSE` fallback: a
    /// `FnProcCall`/`XFnProcCall` operand naming the procedure to invoke,
    /// shaped just like a bare `PROC` statement but read without moving
    /// `self.current` past anything but its own fixed operand.
    fn read_on_proc_target(&mut self) -> Result<SymbolId> {
        let opcode_offset = self.current;
        let id = match self.peek_opcode()? {
            Opcode::XFnProcCall => crate::patch::patch_fn_proc_call(
                &mut self.program,
                opcode_offset,
                &mut self.symbols,
                &self.declared_libraries,
            )?,
            Opcode::FnProcCall => SymbolId(self.program.read_u32(opcode_offset + 1)?),
            _ => return Err(BasicError::Syntax),
        };
        self.current = opcode_offset + 1 + crate::token::LOFFSIZE;
        Ok(id)
    }

    /// `ON <expr> GOTO|GOSUB|PROC t1, t2, ... [ELSE fallback]`. Every
    /// candidate is parsed up front (so the list's own shape — line targets
    /// for `GOTO`/`GOSUB`, named calls for `PROC` — never depends on which
    /// one the selector lands on), and the chosen action always runs from
    /// the position just past the whole statement, not mid-list.
    fn stmt_on(&mut self) -> Result<Option<StopReason>> {
        self.current += 1;
        self.eval_expr()?;
        let selector = self.operand.pop()?.as_i32()?;
        let kind = self.peek_opcode()?;
        self.current += 1;

        enum OnTarget {
            Line(usize),
            Proc(SymbolId),
        }

        let mut targets: Vec<OnTarget> = Vec::new();
        loop {
            targets.push(match kind {
                Opcode::GotoTag | Opcode::GosubTag => OnTarget::Line(self.read_line_target()?),
                Opcode::ProcTag => OnTarget::Proc(self.read_on_proc_target()?),
                _ => return Err(BasicError::Syntax),
            });
            // A plain byte compare, not `peek_opcode`: the list's final
            // entry is followed by a statement terminator (`:`/NUL), which
            // isn't a valid standalone `Opcode` and would make `peek_opcode`
            // fail before this match ever saw its `_` arm.
            if self.program.byte(self.current)? == Opcode::Comma as u8 {
                self.current += 1;
            } else {
                break;
            }
        }
        let fallback = if self.program.byte(self.current)? == Opcode::OnElseKw as u8 {
            self.current += 1;
            Some(match kind {
                Opcode::ProcTag => OnTarget::Proc(self.read_on_proc_target()?),
                _ => OnTarget::Line(self.read_line_target()?),
            })
        } else {
            None
        };
        let return_addr = self.current as u32;

        let chosen = if selector >= 1 && (selector as usize) <= targets.len() {
            &targets[selector as usize - 1]
        } else {
            match &fallback {
                Some(target) => target,
                None => return Err(BasicError::OnRange),
            }
        };
        match (kind, chosen) {
            (Opcode::GotoTag, OnTarget::Line(target)) => {
                self.current = self.program.exec_start(*target)?;
                self.poll_escape_at_loop_back()?;
            }
            (Opcode::GosubTag, OnTarget::Line(target)) => {
                self.control.push(Frame::Gosub { return_addr })?;
                self.current = self.program.exec_start(*target)?;
                self.poll_escape_at_loop_back()?;
            }
            (Opcode::ProcTag, OnTarget::Proc(id)) => {
                self.current = return_addr as usize;
                self.call_proc(*id)?;
            }
            _ => return Err(BasicError::Broken),
        }
        Ok(None)
    }

    // --- PROC / FN / ENDPROC / = -----------------------------------------

    fn stmt_proc_call(&mut self, unresolved: bool) -> Result<Option<StopReason>> {
        let opcode_offset = self.current;
        let id = if unresolved {
            crate::patch::patch_fn_proc_call(
                &mut self.program,
                opcode_offset,
                &mut self.symbols,
                &self.declared_libraries,
            )?
        } else {
            SymbolId(self.program.read_u32(opcode_offset + 1)?)
        };
        self.current = opcode_offset + 1 + crate::token::LOFFSIZE;
        self.call_proc(id)?;
        Ok(None)
    }

    fn stmt_endproc(&mut self) -> Result<Option<StopReason>> {
        let return_addr = self.unwind_call(false)?;
        self.current = return_addr as usize;
        Ok(None)
    }

    fn stmt_equals(&mut self) -> Result<Option<StopReason>> {
        self.current += 1;
        self.eval_expr()?;
        let value = self.operand.pop()?;
        let value = match value {
            Value::Str(s) => Value::Str(s.into_owned_temp()),
            other => other,
        };
        let return_addr = self.unwind_call(true)?;
        self.pending_return = Some(value);
        self.current = return_addr as usize;
        Ok(None)
    }

    fn stmt_def(&mut self) -> Result<Option<StopReason>> {
        // Reached only by straight-line fall-through into a body it
        // defines, never by a call (calls jump straight to `entry_point`
        // past this header). Skip over the header fields as a no-op.
        let header = crate::patch::read_def_header_public(&self.program, self.current)?;
        self.current = header.after_header;
        Ok(None)
    }

    // --- LOCAL / error scoping -------------------------------------------

    fn stmt_local(&mut self) -> Result<Option<StopReason>> {
        self.current += 1;
        loop {
            let target = self.parse_lvalue()?;
            let saved = self.read_lvalue(&target)?;
            self.control.push(Frame::Local { target, saved })?;
            if self.peek_opcode() == Ok(Opcode::Comma) {
                self.current += 1;
                continue;
            }
            break;
        }
        Ok(None)
    }

    fn stmt_local_error(&mut self) -> Result<Option<StopReason>> {
        self.current += 1;
        self.control.push(Frame::Restart)?;
        Ok(None)
    }

    fn stmt_local_data(&mut self) -> Result<Option<StopReason>> {
        self.current += 1;
        self.control.push(Frame::Data { saved: self.data_cursor })?;
        Ok(None)
    }

    // --- DATA / READ / RESTORE -------------------------------------------

    fn stmt_data(&mut self) -> Result<Option<StopReason>> {
        self.current = self.program.next_line_offset(self.line_start())?;
        if !self.program.is_end_of_program(self.current) {
            self.current = self.program.exec_start(self.current)?;
        }
        Ok(None)
    }

    fn stmt_read(&mut self) -> Result<Option<StopReason>> {
        self.current += 1;
        loop {
            let target = self.parse_lvalue()?;
            let value = self.read_next_data_item()?;
            self.write_lvalue(&target, value)?;
            if self.peek_opcode() == Ok(Opcode::Comma) {
                self.current += 1;
                continue;
            }
            break;
        }
        Ok(None)
    }

    fn read_next_data_item(&mut self) -> Result<Value> {
        let mut cursor = match self.data_cursor {
            Some(c) => c.0,
            None => self.first_data_line()?,
        };
        loop {
            let byte = self.program.byte(cursor)?;
            if byte == crate::token::NUL {
                let next = self
                    .program
                    .next_data_line(self.enclosing_line_start(cursor)?)?
                    .ok_or(BasicError::Data)?;
                cursor = next;
                continue;
            }
            if byte == b',' || byte == b' ' {
                cursor += 1;
                continue;
            }
            if byte == b'"' {
                let (value, after) = self.read_data_quoted_string(cursor + 1)?;
                cursor = after;
                while !matches!(self.program.byte(cursor)?, b',' | 0) {
                    cursor += 1;
                }
                self.data_cursor = Some(DataCursor(cursor));
                return Ok(value);
            }
            let start = cursor;
            while !matches!(self.program.byte(cursor)?, b',' | 0) {
                cursor += 1;
            }
            let text = String::from_utf8_lossy(
                &(start..cursor)
                    .map(|i| self.program.byte(i))
                    .collect::<Result<Vec<u8>>>()?,
            )
            .trim()
            .to_string();
            self.data_cursor = Some(DataCursor(cursor));
            return Ok(parse_data_literal(&text));
        }
    }

    /// A quoted `DATA` string field (spec §4.8): everything up to the
    /// closing `"`, with an embedded `""` collapsed to a literal `"` rather
    /// than ending the literal — the only way a comma inside a `DATA`
    /// value survives field-splitting. Unlike an unquoted field, the
    /// result is always a string regardless of what its text looks like.
    /// Returns the value and the offset just past the closing quote.
    fn read_data_quoted_string(&self, mut cursor: usize) -> Result<(Value, usize)> {
        let mut text = Vec::new();
        loop {
            let b = self.program.byte(cursor)?;
            if b == crate::token::NUL {
                return Err(BasicError::Data);
            }
            if b == b'"' {
                if self.program.byte(cursor + 1).ok() == Some(b'"') {
                    text.push(b'"');
                    cursor += 2;
                    continue;
                }
                cursor += 1;
                break;
            }
            text.push(b);
            cursor += 1;
        }
        Ok((Value::Str(crate::value::StringValue::temp(text)), cursor))
    }

    fn enclosing_line_start(&self, offset: usize) -> Result<usize> {
        let mut start = self.program.start();
        loop {
            let next = self.program.next_line_offset(start)?;
            if next > offset || self.program.is_end_of_program(next) {
                return Ok(start);
            }
            start = next;
        }
    }

    fn first_data_line(&mut self) -> Result<usize> {
        let start = self.program.start();
        let exec = self.program.exec_start(start)?;
        if self.program.byte(exec)? == Opcode::Data as u8 {
            return Ok(self.program.source_start(start));
        }
        self.program
            .next_data_line(start)?
            .ok_or(BasicError::Data)
    }

    fn stmt_restore(&mut self) -> Result<Option<StopReason>> {
        self.current += 1;
        if self.program.is_statement_end(self.current)? {
            self.data_cursor = None;
            return Ok(None);
        }
        if self.peek_opcode() == Ok(Opcode::LocalError) {
            // `RESTORE ERROR` — not modelled as a distinct data cursor
            // concern in this core; treated as a plain `RESTORE`.
            self.current += 1;
        }
        let target = match self.read_line_target() {
            Ok(target) => target,
            Err(err) => {
                log::warn!("RESTORE target line not found; DATA cursor left untouched");
                return Err(err);
            }
        };
        self.data_cursor = Some(DataCursor(self.program.source_start(target)));
        Ok(None)
    }

    // --- DIM / CLEAR / LIBRARY -------------------------------------------

    fn stmt_dim(&mut self, himem: bool) -> Result<Option<StopReason>> {
        self.current += 1;
        loop {
            self.dim_one(himem)?;
            if self.peek_opcode() == Ok(Opcode::Comma) {
                self.current += 1;
                continue;
            }
            break;
        }
        Ok(None)
    }

    /// One comma-separated item of a `DIM`/`DIM HIMEM` statement: either
    /// `name(d1, d2, ...)` (a new array), `name <size>` (a raw byte block,
    /// base address stored in `name`), or `!addr <size>` (the same byte
    /// block, base address stored at the indirection target) — spec §4.11.
    fn dim_one(&mut self, himem: bool) -> Result<()> {
        match self.peek_opcode()? {
            Opcode::IndirectWord => {
                self.current += 1;
                let addr = self.eval_unary()?.as_i64()? as u64;
                let size = self.eval_prec(0)?.as_i64()?;
                let base = self.alloc_byte_block(size)?;
                self.workspace
                    .write_u32(crate::workspace::HeapAddr(addr), base.0 as u32)?;
                let _ = himem;
                Ok(())
            }
            Opcode::Var => {
                let id = SymbolId(self.program.read_u32(self.current + 1)?);
                self.current += 1 + crate::token::LOFFSIZE;
                if self.peek_opcode() == Ok(Opcode::LParen) {
                    self.current += 1;
                    let mut dims = Vec::new();
                    loop {
                        let n = self.eval_prec(0)?.as_i32()?;
                        if n < 0 {
                            return Err(BasicError::NegDim);
                        }
                        dims.push(n as usize + 1);
                        match self.peek_opcode()? {
                            Opcode::Comma => self.current += 1,
                            Opcode::RParen => {
                                self.current += 1;
                                break;
                            }
                            _ => return Err(BasicError::RpMiss),
                        }
                    }
                    self.create_array(id, dims, himem)
                } else {
                    let size = self.eval_prec(0)?.as_i64()?;
                    let base = self.alloc_byte_block(size)?;
                    self.symbols.set_scalar(id, Value::Int64(base.0 as i64))?;
                    Ok(())
                }
            }
            _ => Err(BasicError::BadDim),
        }
    }

    /// `<size>` of `-1` (spec §4.11) means "current heap top, no
    /// allocation"; otherwise negative sizes are rejected and everything
    /// else goes through the bump allocator, which itself enforces the
    /// 32-bit address bound in `addr32` mode.
    fn alloc_byte_block(&mut self, size: i64) -> Result<crate::workspace::HeapAddr> {
        if size == crate::workspace::HEAP_TOP_SENTINEL {
            return Ok(self.workspace.heap_top());
        }
        if size < 0 {
            return Err(BasicError::NegByteDim);
        }
        self.workspace.alloc(size as u64)
    }

    /// Create a new array and bind it to `id`. A stack-local array (spec
    /// §4.11: "inside `PROC`/`FN` and the name already exists as a declared
    /// scalar with no array binding") is reclaimed automatically by a
    /// `LocArray` frame at the enclosing call's unwind; everything else
    /// lives for the run (`Heap`) or until `CLEAR HIMEM`/end of run
    /// (`OffHeap`, for `DIM HIMEM`).
    fn create_array(&mut self, id: SymbolId, dims: Vec<usize>, himem: bool) -> Result<()> {
        if matches!(
            self.symbols.get(id).payload,
            crate::symbol::SymbolPayload::Array(_)
        ) {
            return Err(BasicError::DuplDim);
        }
        let was_scalar = matches!(
            self.symbols.get(id).payload,
            crate::symbol::SymbolPayload::Scalar(_)
        );
        let total: usize = dims.iter().product();
        let kind = element_kind_for_name(&self.symbols.get(id).name);
        let elements = match kind {
            crate::array::ElementKind::Int => crate::array::ElementStore::Int(vec![0; total]),
            crate::array::ElementKind::Int64 => crate::array::ElementStore::Int64(vec![0; total]),
            crate::array::ElementKind::U8 => crate::array::ElementStore::U8(vec![0; total]),
            crate::array::ElementKind::Float => crate::array::ElementStore::Float(vec![0.0; total]),
            crate::array::ElementKind::Str => crate::array::ElementStore::Str(
                (0..total)
                    .map(|_| crate::value::StringValue::temp(Vec::new()))
                    .collect(),
            ),
        };
        let storage_class = if himem {
            crate::array::ArrayStorage::OffHeap
        } else if was_scalar && self.in_call() {
            crate::array::ArrayStorage::StackLocal
        } else {
            crate::array::ArrayStorage::Heap
        };
        let descriptor = crate::array::ArrayDescriptor {
            kind,
            dims,
            storage_class,
            elements,
            owner: id,
        };
        let array_id = self.arrays.insert(descriptor);
        self.symbols.bind_array(id, array_id);
        if matches!(storage_class, crate::array::ArrayStorage::StackLocal) {
            self.control.push(Frame::LocArray { array: array_id })?;
        }
        Ok(())
    }

    fn stmt_clear(&mut self, himem: bool) -> Result<Option<StopReason>> {
        self.current += 1;
        if himem {
            // `CLEAR HIMEM`: off-heap arrays are dropped wholesale; this
            // core has no separate off-heap allocator to reclaim beyond
            // the array arena entries themselves.
        } else {
            self.clear();
        }
        Ok(None)
    }

    fn stmt_library(&mut self) -> Result<Option<StopReason>> {
        self.current += 1;
        let len = self.program.read_u16(self.current)? as usize;
        let start = self.current + 2;
        let mut name = Vec::with_capacity(len);
        for i in 0..len {
            name.push(self.program.byte(start + i)?);
        }
        self.current = start + len;
        let bytes = self.host.load_program(&name).map_err(crate::host::host_err)?;
        let (lib_start, lib_end) = self.program.append_library(bytes);
        let lib_id = self.symbols.add_library();
        self.library_ranges.push(crate::interpreter::LibraryRange {
            id: lib_id,
            start: lib_start,
            end: lib_end,
        });
        self.declared_libraries.push(lib_id);
        Ok(None)
    }

    // --- error handling --------------------------------------------------

    fn stmt_error(&mut self) -> Result<Option<StopReason>> {
        self.current += 1;
        self.eval_expr()?;
        let number = self.operand.pop()?.as_i32()?;
        self.eval_expr()?;
        let message = self.operand.pop()?;
        let text = match message {
            Value::Str(s) => String::from_utf8_lossy(s.as_bytes()).into_owned(),
            other => format_value(&other),
        };
        Err(BasicError::user(number, text))
    }

    fn stmt_on_error(&mut self) -> Result<Option<StopReason>> {
        self.current += 1;
        let local = if self.peek_opcode() == Ok(Opcode::LocalError) {
            self.current += 1;
            true
        } else {
            false
        };
        if self.program.is_statement_end(self.current)? {
            // `ON ERROR OFF`-equivalent: bare `ON ERROR` with nothing after
            // it clears the nearest handler rather than installing one.
            if let Some((index, _)) = self.control.nearest_error_handler() {
                self.control.truncate(index);
            }
            return Ok(None);
        }
        let target = self.program.exec_start(self.read_line_target()?)?;
        let handler = if local {
            ErrorHandler::Local {
                handler_addr: target as u32,
                restart_frame: self.control.len(),
            }
        } else {
            ErrorHandler::Global { handler_addr: target as u32 }
        };
        self.control.push(Frame::Error { handler: Some(handler) })?;
        Ok(None)
    }

    fn stmt_report(&mut self) -> Result<Option<StopReason>> {
        self.current += 1;
        let text = format!("Error {}", self.last_error_number);
        self.host.write_output(text.as_bytes()).map_err(crate::host::host_err)?;
        Ok(None)
    }

    // --- run control -------------------------------------------------

    fn stmt_end(&mut self) -> Result<Option<StopReason>> {
        Ok(Some(StopReason::End { value: None }))
    }

    fn stmt_end_equals(&mut self) -> Result<Option<StopReason>> {
        self.current += 1;
        self.eval_expr()?;
        let value = self.operand.pop()?.as_i64()?;
        Ok(Some(StopReason::End { value: Some(value) }))
    }

    fn stmt_quit(&mut self) -> Result<Option<StopReason>> {
        self.current += 1;
        let code = if self.program.is_statement_end(self.current)? {
            0
        } else {
            self.eval_expr()?;
            self.operand.pop()?.as_i32()?
        };
        Ok(Some(StopReason::Quit { code }))
    }

    fn stmt_run(&mut self) -> Result<Option<StopReason>> {
        self.current += 1;
        if !self.program.is_statement_end(self.current)? {
            // `RUN "filename"` / `RUN <line>`: either reloads a fresh
            // program via the host or jumps to a line in the current one.
            if self.peek_opcode() == Ok(Opcode::StrLit) {
                self.eval_expr()?;
                let name = self.operand.pop()?;
                let bytes = name.as_str()?.as_bytes().to_vec();
                let program_bytes = self.host.load_program(&bytes).map_err(crate::host::host_err)?;
                self.program = crate::program::Program::new(program_bytes);
                self.clear();
                self.current = self.program.exec_start(self.program.start())?;
                return Ok(None);
            }
            let target = self.read_line_target()?;
            self.clear();
            self.current = self.program.exec_start(target)?;
            return Ok(None);
        }
        self.clear();
        self.current = self.program.exec_start(self.program.start())?;
        Ok(None)
    }

    fn stmt_chain(&mut self) -> Result<Option<StopReason>> {
        self.current += 1;
        self.eval_expr()?;
        let name = self.operand.pop()?;
        let bytes = name.as_str()?.as_bytes().to_vec();
        let program_bytes = self.host.load_program(&bytes).map_err(crate::host::host_err)?;
        self.program = crate::program::Program::new(program_bytes);
        self.clear();
        self.current = self.program.exec_start(self.program.start())?;
        Ok(None)
    }

    // --- OS gateway --------------------------------------------------

    fn stmt_oscli(&mut self, to_file: bool) -> Result<Option<StopReason>> {
        self.current += 1;
        self.eval_expr()?;
        let command = self.operand.pop()?;
        let command_bytes = command.as_str()?.as_bytes().to_vec();
        let to = if to_file {
            self.eval_expr()?;
            let name = self.operand.pop()?;
            Some(String::from_utf8_lossy(name.as_str()?.as_bytes()).into_owned())
        } else {
            None
        };
        self.host
            .os_cli(&command_bytes, to.as_deref())
            .map_err(crate::host::host_err)?;
        Ok(None)
    }

    fn stmt_call(&mut self) -> Result<Option<StopReason>> {
        self.current += 1;
        self.eval_expr()?;
        let address = self.operand.pop()?.as_i64()? as u64;
        let mut argv = Vec::new();
        while self.peek_opcode() == Ok(Opcode::Comma) {
            self.current += 1;
            self.eval_expr()?;
            argv.push(self.operand.pop()?.as_i64()?);
        }
        self.host
            .call_native(address, &argv)
            .map_err(crate::host::host_err)?;
        Ok(None)
    }

    fn stmt_sys(&mut self) -> Result<Option<StopReason>> {
        self.current += 1;
        self.eval_expr()?;
        let swi_number = self.operand.pop()?.as_i64()?;
        let mut params = Vec::new();
        while self.peek_opcode() == Ok(Opcode::Comma) {
            self.current += 1;
            self.eval_expr()?;
            params.push(value_to_sys_param(self.operand.pop()?)?);
            if params.len() > self.limits.max_sys_params {
                return Err(BasicError::StackFull);
            }
        }
        let result = self
            .host
            .sys_call(swi_number, &params)
            .map_err(crate::host::host_err)?;
        if self.peek_opcode() == Ok(Opcode::Semicolon) {
            self.current += 1;
            for out in result.out {
                let target = self.parse_lvalue()?;
                self.write_lvalue(&target, sys_param_to_value(out))?;
                if self.peek_opcode() == Ok(Opcode::Comma) {
                    self.current += 1;
                } else {
                    break;
                }
            }
        }
        Ok(None)
    }

    fn stmt_wait(&mut self) -> Result<Option<StopReason>> {
        self.current += 1;
        if self.program.is_statement_end(self.current)? {
            self.host.wait();
        } else {
            self.eval_expr()?;
            let centiseconds = self.operand.pop()?.as_i32()?.max(0) as u32;
            self.host.wait_delay(centiseconds);
        }
        Ok(None)
    }

    fn stmt_trace(&mut self) -> Result<Option<StopReason>> {
        self.current += 1;
        // The option letter was tokenised as a literal string by this
        // crate's own tokeniser convention (no dedicated opcode per
        // option); read it back the same way.
        self.eval_expr()?;
        let option = self.operand.pop()?;
        let letters = option.as_str()?.as_bytes().to_ascii_uppercase();
        for &b in &letters {
            match b {
                b'P' => self.trace_flags.proc = true,
                b'F' => self.trace_flags.fn_ = true,
                b'G' => self.trace_flags.goto = true,
                b'N' | b'S' => self.trace_flags.step = true,
                b'R' => self.trace_flags.ret = true,
                b'V' => self.trace_flags.vdu = true,
                b'O' if letters == b"OFF" => {
                    self.trace_flags = crate::interpreter::TraceFlags::default();
                    break;
                }
                _ => return Err(BasicError::BadTrace),
            }
        }
        Ok(None)
    }

    fn stmt_swap(&mut self) -> Result<Option<StopReason>> {
        self.current += 1;
        if self.peek_opcode() == Ok(Opcode::Var) {
            let save_point = self.current;
            let maybe_array = self.try_parse_array_name_only();
            if let Some((a_id, b_id)) = maybe_array {
                self.arrays.swap_contents(a_id, b_id)?;
                return Ok(None);
            }
            self.current = save_point;
        }
        let a = self.parse_lvalue()?;
        if self.peek_opcode()? != Opcode::Comma {
            return Err(BasicError::ComMiss);
        }
        self.current += 1;
        let b = self.parse_lvalue()?;
        let a_value = self.read_lvalue(&a)?;
        let b_value = self.read_lvalue(&b)?;
        self.write_lvalue(&a, b_value)?;
        self.write_lvalue(&b, a_value)?;
        Ok(None)
    }

    /// `SWAP a(), b()` (spec §3, Testable Property 7): recognise the
    /// whole-array form — a bare `name()` with no indices on both sides —
    /// and resolve each to its [`crate::array::ArrayId`]. Any other shape
    /// (a subscripted element, a scalar, a mismatched paren) falls back to
    /// ordinary lvalue `SWAP` at the call site.
    fn try_parse_array_name_only(&mut self) -> Option<(crate::array::ArrayId, crate::array::ArrayId)> {
        let a = self.try_parse_one_array_name()?;
        if self.peek_opcode() != Ok(Opcode::Comma) {
            return None;
        }
        self.current += 1;
        let b = self.try_parse_one_array_name()?;
        Some((a, b))
    }

    fn try_parse_one_array_name(&mut self) -> Option<crate::array::ArrayId> {
        if self.peek_opcode() != Ok(Opcode::Var) {
            return None;
        }
        let id = SymbolId(self.program.read_u32(self.current + 1).ok()?);
        let after_var = self.current + 1 + crate::token::LOFFSIZE;
        if Opcode::try_from(self.program.byte(after_var).ok()?).ok()? != Opcode::LParen {
            return None;
        }
        let after_lparen = after_var + 1;
        if Opcode::try_from(self.program.byte(after_lparen).ok()?).ok()? != Opcode::RParen {
            return None;
        }
        self.current = after_lparen + 1;
        self.symbols.array_id(id).ok()
    }

    fn restore_saved(&mut self, frame: Frame) -> Result<()> {
        match frame {
            Frame::Local { target, saved } => self.write_lvalue(&target, saved),
            Frame::RetParm { caller_target, inner, saved } => {
                let final_value = self.read_lvalue(&inner)?;
                self.write_lvalue(&inner, saved)?;
                self.write_lvalue(&caller_target, final_value)
            }
            Frame::OpStack { opstack_len_at_entry } => {
                self.operand.truncate(opstack_len_at_entry);
                Ok(())
            }
            Frame::Data { saved } => {
                self.data_cursor = saved;
                Ok(())
            }
            Frame::LocArray { array } => {
                self.arrays.destroy(array);
                Ok(())
            }
            Frame::Restart => Ok(()),
            _ => Ok(()),
        }
    }
}

fn for_condition_met(frame: &ForFrame, value: &Value) -> Result<bool> {
    Ok(match frame.kind {
        ForKind::Int => {
            if frame.step_i >= 0 {
                value.as_i32()? <= frame.limit_i
            } else {
                value.as_i32()? >= frame.limit_i
            }
        }
        ForKind::Int64 => {
            if frame.step_i64 >= 0 {
                value.as_i64()? <= frame.limit_i64
            } else {
                value.as_i64()? >= frame.limit_i64
            }
        }
        ForKind::Float => {
            if frame.step_f >= 0.0 {
                value.as_f64()? <= frame.limit_f
            } else {
                value.as_f64()? >= frame.limit_f
            }
        }
    })
}

fn advance_for(frame: &ForFrame, current: &Value) -> Result<Value> {
    Ok(match frame.kind {
        ForKind::Int => Value::Int(
            current
                .as_i32()?
                .checked_add(frame.step_i)
                .ok_or(BasicError::Range)?,
        ),
        ForKind::Int64 => Value::Int64(
            current
                .as_i64()?
                .checked_add(frame.step_i64)
                .ok_or(BasicError::Range)?,
        ),
        ForKind::Float => Value::Float(current.as_f64()? + frame.step_f),
    })
}

fn value_to_sys_param(value: Value) -> Result<crate::host::SysParam> {
    Ok(match value {
        Value::Str(s) => crate::host::SysParam::Str(s.as_bytes().to_vec()),
        Value::Float(f) => crate::host::SysParam::Float(f),
        other => crate::host::SysParam::Int(other.as_i64()?),
    })
}

fn sys_param_to_value(param: crate::host::SysParam) -> Value {
    match param {
        crate::host::SysParam::Int(i) => Value::Int64(i),
        crate::host::SysParam::Float(f) => Value::Float(f),
        crate::host::SysParam::Str(bytes) => Value::Str(crate::value::StringValue::temp(bytes)),
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::U8(v) => v.to_string(),
        Value::Int(v) => v.to_string(),
        Value::Int64(v) => v.to_string(),
        Value::Float(v) => format!("{v}"),
        Value::Str(s) => String::from_utf8_lossy(s.as_bytes()).into_owned(),
        Value::Array(_) => String::new(),
    }
}

fn parse_data_literal(text: &str) -> Value {
    if let Ok(i) = text.parse::<i32>() {
        Value::Int(i)
    } else if let Ok(f) = text.parse::<f64>() {
        Value::Float(f)
    } else {
        Value::Str(crate::value::StringValue::temp(text.as_bytes().to_vec()))
    }
}

/// Array element type from the variable name's trailing suffix, the same
/// `$`/`%`/`&` convention BASIC has always used for scalars (spec §3
/// "Values"): `$` string, `%` 32-bit integer, `&` byte; anything else
/// (including no suffix) is `FLOAT`, the default numeric type. `Int64` has
/// no array-producing suffix in this core.
fn element_kind_for_name(name: &[u8]) -> crate::array::ElementKind {
    use crate::array::ElementKind;
    match name.last() {
        Some(b'$') => ElementKind::Str,
        Some(b'%') => ElementKind::Int,
        Some(b'&') => ElementKind::U8,
        _ => ElementKind::Float,
    }
}

fn source_ends_with_then(source: &[u8]) -> bool {
    let trimmed = source
        .iter()
        .rposition(|&b| !b.is_ascii_whitespace())
        .map(|i| &source[..=i])
        .unwrap_or(&[]);
    trimmed.len() >= 4 && trimmed[trimmed.len() - 4..].eq_ignore_ascii_case(b"then")
}

fn contains_nested_if_before_then(source: &[u8]) -> bool {
    let upper = source.to_ascii_uppercase();
    let first_then = upper.windows(4).position(|w| w == b"THEN");
    let Some(first_then) = first_then else { return false };
    upper[..first_then]
        .windows(2)
        .filter(|w| *w == b"IF")
        .count()
        > 1
}

use crate::value::NumKind;

impl NumKind {
    fn max(self, other: NumKind) -> NumKind {
        match (self, other) {
            (NumKind::Float, _) | (_, NumKind::Float) => NumKind::Float,
            (NumKind::Int64, _) | (_, NumKind::Int64) => NumKind::Int64,
            _ => NumKind::Int,
        }
    }
}
