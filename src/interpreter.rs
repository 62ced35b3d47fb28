//! The interpreter (spec §4.1 dispatcher, §5 concurrency/resource model):
//! ties the workspace, the two stacks, the symbol table, the array arena,
//! the program buffer, and a [`Host`] together behind one `run` loop.

use crate::array::ArrayArena;
use crate::case_table::CaseTableArena;
use crate::config::{Limits, RunFlags};
use crate::error::{BasicError, Result};
use crate::host::Host;
use crate::program::Program;
use crate::stack::{ControlStack, ErrorHandler, Frame, OperandStack};
use crate::symbol::{LibraryId, SymbolTable};
use crate::workspace::Workspace;

/// `TRACE`'s bitset of independently toggled facilities (SPEC_FULL.md
/// §4.9 supplement).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceFlags {
    pub proc: bool,
    pub fn_: bool,
    pub goto: bool,
    pub step: bool,
    pub ret: bool,
    pub vdu: bool,
}

impl TraceFlags {
    pub fn any(&self) -> bool {
        self.proc || self.fn_ || self.goto || self.step || self.ret || self.vdu
    }
}

/// The byte range within [`Interpreter::program`] occupied by one loaded
/// library, used for the "determine whether the reference site lies
/// within a library" address-range lookup (spec §4.10).
#[derive(Debug, Clone, Copy)]
pub struct LibraryRange {
    pub id: LibraryId,
    pub start: usize,
    pub end: usize,
}

/// Why the run loop stopped (spec §5: cancellation is escape, `QUIT`,
/// `END`/`STOP`, or an unhandled error).
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    EndOfProgram,
    End { value: Option<i64> },
    Stop,
    Quit { code: i32 },
    UnhandledError(BasicError),
}

/// How a nested `call_fn` sub-loop (see [`crate::calls`]) came to a stop.
pub(crate) enum LoopExit {
    /// Control stack depth fell back to the floor via a normal `=`/
    /// `ENDPROC` at this nesting level.
    ReachedFloor,
    /// An `ON ERROR`/`ON ERROR LOCAL` handler above this call's own frame
    /// claimed the error; this level has nothing left to do but propagate
    /// the unwind further up the Rust call stack.
    UnwoundAbove,
    Stopped(StopReason),
}

pub struct Interpreter<H: Host> {
    pub program: Program,
    pub library_ranges: Vec<LibraryRange>,
    pub declared_libraries: Vec<LibraryId>,
    pub symbols: SymbolTable,
    pub arrays: ArrayArena,
    pub workspace: Workspace,
    pub operand: OperandStack,
    pub control: ControlStack,
    pub case_tables: CaseTableArena,
    pub current: usize,
    pub data_cursor: Option<crate::stack::DataCursor>,
    pub run_flags: RunFlags,
    pub limits: Limits,
    pub trace_flags: TraceFlags,
    /// What `ERR` reads inside an `ON ERROR` handler: the number of the
    /// most recently raised error (spec §7).
    pub last_error_number: i32,
    /// Set by the `=` handler just before it pops its `Fn` frame, and
    /// consumed by `crate::calls::call_fn` once its sub-loop reaches the
    /// floor; `None` would mean `=` was never reached, an internal error.
    pub(crate) pending_return: Option<crate::value::Value>,
    /// Byte length of the main program at load time, before any `LIBRARY`
    /// appended its own range onto the same buffer — the upper bound a
    /// program-scope `DEF` scan stops at.
    pub(crate) program_main_end: usize,
    /// Whether the main program's `DEF PROC`/`DEF FN` headers have been
    /// scanned yet (crate::calls's lazy resolve, mirroring
    /// `SymbolTable::library_scanned`).
    pub(crate) program_defs_scanned: bool,
    pub host: H,
}

impl<H: Host> Interpreter<H> {
    pub fn new(program: Program, run_flags: RunFlags, limits: Limits, host: H) -> Self {
        let start = program.start();
        let program_main_end = program.len();
        let current = program.exec_start(start).unwrap_or(start);
        Interpreter {
            program,
            library_ranges: Vec::new(),
            declared_libraries: Vec::new(),
            symbols: SymbolTable::new(),
            arrays: ArrayArena::new(),
            workspace: Workspace::new(run_flags.addr32),
            operand: OperandStack::new(&limits),
            control: ControlStack::new(&limits),
            case_tables: CaseTableArena::new(),
            current,
            data_cursor: None,
            run_flags,
            limits,
            trace_flags: TraceFlags::default(),
            last_error_number: 0,
            pending_return: None,
            program_main_end,
            program_defs_scanned: false,
            host,
        }
    }

    /// The owning library of a token-stream address, by range lookup
    /// (spec §4.10), or `None` if `offset` falls in the main program.
    pub fn owning_library(&self, offset: usize) -> Option<LibraryId> {
        self.library_ranges
            .iter()
            .find(|r| offset >= r.start && offset < r.end)
            .map(|r| r.id)
    }

    /// Reset to a fresh-run baseline: stack, symbols, arrays, DATA cursor,
    /// error handler (SPEC_FULL.md §4.9 supplement, `CLEAR`/`CHAIN`/`RUN`).
    pub fn clear(&mut self) {
        let mut symbols = SymbolTable::new();
        for _ in &self.library_ranges {
            symbols.add_library();
        }
        self.symbols = symbols;
        self.arrays = ArrayArena::new();
        self.workspace = Workspace::new(self.run_flags.addr32);
        self.operand = OperandStack::new(&self.limits);
        self.control = ControlStack::new(&self.limits);
        self.data_cursor = None;
        self.program_defs_scanned = false;
    }

    /// True iff a `PROC`/`FN` call is active (spec §3 invariant:
    /// "`procstack == null` iff no `PROC`/`FN` is active").
    pub fn in_call(&self) -> bool {
        (0..self.control.len()).any(|i| {
            matches!(
                self.control.get(i),
                Some(Frame::Proc { .. }) | Some(Frame::Fn { .. })
            )
        })
    }

    fn poll_escape(&mut self) -> Result<()> {
        if self.host.escape_poll() {
            Err(BasicError::Escape)
        } else {
            Ok(())
        }
    }

    /// The main dispatch loop (spec §4.1). Runs until a statement handler
    /// signals a stop reason or an error escapes every handler.
    pub fn run(&mut self) -> StopReason {
        loop {
            match self.step() {
                Ok(None) => continue,
                Ok(Some(StopReason::Stop)) if self.control.nearest_error_handler().is_none() => {
                    log::warn!("STOP with no ON ERROR handler installed");
                    return StopReason::Stop;
                }
                Ok(Some(reason)) => return reason,
                Err(err) => match self.handle_error(err) {
                    Ok(()) => continue,
                    Err(unhandled) => return StopReason::UnhandledError(unhandled),
                },
            }
        }
    }

    /// Execute one dispatch step: skip separators, advance past a line
    /// boundary, or call the handler for the opcode at `current` (spec
    /// §4.1: "Between statements the dispatcher treats `:` as a skip").
    pub(crate) fn step(&mut self) -> Result<Option<StopReason>> {
        if self.program.is_end_of_program(self.current) {
            return Ok(Some(StopReason::EndOfProgram));
        }
        let byte = self.program.byte(self.current)?;
        if byte == crate::token::NUL {
            let next = self.program.next_line_offset(self.line_start())?;
            if self.program.is_end_of_program(next) {
                return Ok(Some(StopReason::EndOfProgram));
            }
            self.current = self.program.exec_start(next)?;
            return Ok(None);
        }
        if byte == crate::token::COLON || byte == crate::token::SPACE {
            self.current += 1;
            return Ok(None);
        }
        self.dispatch_statement(byte)
    }

    /// Offset of the start of the line record containing `current`,
    /// needed to find the *next* line's record (spec §3 line-record scan).
    fn line_start(&self) -> usize {
        let mut offset = self.program.start();
        loop {
            match self.program.next_line_offset(offset) {
                Ok(next) if next <= self.current && !self.program.is_end_of_program(next) => {
                    offset = next
                }
                _ => return offset,
            }
        }
    }

    /// Escape-polling loop-back points named in §5: `GOTO`, `GOSUB`,
    /// `NEXT`, `UNTIL`, `ENDWHILE`, `PROC` entry.
    pub fn poll_escape_at_loop_back(&mut self) -> Result<()> {
        self.poll_escape()
    }

    /// Unwind and dispatch to the installed error handler, per the
    /// propagation policy in spec §7. Returns `Ok(())` having repositioned
    /// `current` at the handler if one absorbed the error, or `Err` to
    /// propagate it further (ending the run, or — inside a nested
    /// `run_loop`, crate::calls — signalling the enclosing call to keep
    /// propagating).
    pub(crate) fn handle_error(&mut self, err: BasicError) -> Result<()> {
        self.last_error_number = err.errnum();
        match self.control.nearest_error_handler() {
            None => Err(err),
            Some((frame_index, Some(ErrorHandler::Global { handler_addr }))) => {
                self.control.truncate(frame_index);
                self.operand.truncate(0);
                self.current = handler_addr as usize;
                Ok(())
            }
            Some((frame_index, Some(ErrorHandler::Local { handler_addr, restart_frame }))) => {
                self.control.truncate(restart_frame.max(frame_index));
                self.operand.truncate(0);
                self.current = handler_addr as usize;
                Ok(())
            }
            Some((_, None)) => Err(err),
        }
    }
}
