//! The control stack (spec §4.3): a LIFO of tagged frames driving
//! structured flow. Modelled as `Vec<Frame>` (one `enum`) rather than a
//! single workspace with a typed header discriminator, per the "two
//! stacks, many frame kinds" design note (spec §9).

use crate::array::ArrayId;
use crate::config::Limits;
use crate::error::{BasicError, Result};
use crate::value::Value;

/// A mutable storage location: a scalar variable, one element of an
/// array, or a raw indirection target (`DIM name!offset`-style byte
/// addressing). Spec Glossary "Lvalue".
#[derive(Debug, Clone, PartialEq)]
pub enum Lvalue {
    Scalar(crate::symbol::SymbolId),
    ArrayElem(ArrayId, usize),
    /// `?addr` — single byte.
    Indirection(u64),
    /// `!addr` — little-endian 32-bit word.
    IndirectionWord(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForKind {
    Int,
    Int64,
    Float,
}

#[derive(Debug, Clone)]
pub struct ForFrame {
    pub kind: ForKind,
    pub control: Lvalue,
    pub body: u32,
    pub limit_i: i32,
    pub limit_i64: i64,
    pub limit_f: f64,
    pub step_i: i32,
    pub step_i64: i64,
    pub step_f: f64,
    /// Fast path: `i32` control variable with `step == 1` (spec §4.4).
    pub simple: bool,
}

/// Distinguishes a global `ON ERROR` from an `ON ERROR LOCAL`, whose
/// re-entry point is a `Restart` frame elsewhere on the stack (spec
/// SPEC_FULL.md §4.3 supplement — this replaces the original's redundant
/// `STACK_ERROR`/`errorislocal` pair with one source of truth).
#[derive(Debug, Clone, Copy)]
pub enum ErrorHandler {
    Global { handler_addr: u32 },
    Local { handler_addr: u32, restart_frame: usize },
}

/// An absolute byte offset into the program buffer, or `None` meaning
/// "before the first `READ`" (spec §3 invariants: "`datacur` is null
/// until the first `READ`").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataCursor(pub usize);

#[derive(Debug, Clone)]
pub enum Frame {
    While {
        test_expr: u32,
        exit: u32,
    },
    Repeat {
        body: u32,
    },
    For(ForFrame),
    Gosub {
        return_addr: u32,
    },
    Proc {
        return_addr: u32,
        param_count: usize,
        name: Vec<u8>,
    },
    Fn {
        return_addr: u32,
        param_count: usize,
        name: Vec<u8>,
        saved_opstack_len: usize,
        saved_error_handler: Option<ErrorHandler>,
    },
    Local {
        target: Lvalue,
        saved: Value,
    },
    RetParm {
        caller_target: Lvalue,
        inner: Lvalue,
        saved: Value,
    },
    Error {
        handler: Option<ErrorHandler>,
    },
    Data {
        saved: Option<DataCursor>,
    },
    LocArray {
        array: ArrayId,
    },
    OpStack {
        opstack_len_at_entry: usize,
    },
    /// `LOCAL ERROR`: a barrier pushed onto the control stack that makes
    /// [`ControlStack::nearest_error_handler`] stop searching rather than
    /// fall through to whatever `ON ERROR` is active further down, for as
    /// long as this frame is present. Popping it (by reaching `ENDPROC`/
    /// `ENDWHILE`/... or by an ordinary fall-through) re-exposes the outer
    /// handler with no value to restore — it's a pure visibility barrier.
    Restart,
}

impl Frame {
    pub fn tag_name(&self) -> &'static str {
        match self {
            Frame::While { .. } => "WHILE",
            Frame::Repeat { .. } => "REPEAT",
            Frame::For(_) => "FOR",
            Frame::Gosub { .. } => "GOSUB",
            Frame::Proc { .. } => "PROC",
            Frame::Fn { .. } => "FN",
            Frame::Local { .. } => "LOCAL",
            Frame::RetParm { .. } => "RETPARM",
            Frame::Error { .. } => "ERROR",
            Frame::Data { .. } => "DATA",
            Frame::LocArray { .. } => "LOCARRAY",
            Frame::OpStack { .. } => "OPSTACK",
            Frame::Restart => "RESTART",
        }
    }

    /// Frames that `empty_stack`/`get_*` may silently discard while
    /// searching for a specific tag (spec §4.3 "disposable table").
    /// `LOCAL`/`RETPARM` need their effects undone (restoring the saved
    /// value) rather than being dropped outright, which is why discarding
    /// always goes through [`ControlStack::pop_and_undo`] instead of a
    /// bare `Vec::pop`.
    fn is_disposable(&self) -> bool {
        matches!(
            self,
            Frame::Local { .. }
                | Frame::RetParm { .. }
                | Frame::OpStack { .. }
                | Frame::Restart
        )
    }
}

pub struct ControlStack {
    frames: Vec<Frame>,
    max_len: usize,
}

impl ControlStack {
    pub fn new(limits: &Limits) -> Self {
        ControlStack {
            frames: Vec::new(),
            max_len: limits.max_control_frames,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn push(&mut self, frame: Frame) -> Result<()> {
        if self.frames.len() >= self.max_len {
            return Err(BasicError::StackFull);
        }
        self.frames.push(frame);
        Ok(())
    }

    pub fn top(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    pub fn get(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    pub fn truncate(&mut self, len: usize) {
        self.frames.truncate(len);
    }

    /// Pop the top frame, applying its "undo" effect if it is a
    /// `LOCAL`/`RETPARM` save (the caller is responsible for actually
    /// writing `saved` back into storage — this just hands the frame to
    /// the caller to interpret, since writing back requires the symbol
    /// table/array arena this module doesn't have access to).
    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    /// Pop consecutive `LOCAL`/`RETPARM` frames from the top, yielding each
    /// so the caller can restore the saved value, and stop at the first
    /// non-local frame — returning its tag so callers can notice an
    /// `ERROR` frame underneath (spec §4.3 `stack_unwindlocal`).
    pub fn unwind_local(&mut self) -> Vec<Frame> {
        let mut undone = Vec::new();
        while let Some(top) = self.frames.last() {
            if matches!(top, Frame::Local { .. } | Frame::RetParm { .. }) {
                undone.push(self.frames.pop().unwrap());
            } else {
                break;
            }
        }
        undone
    }

    /// Discard frames (collecting any that need restoring) until one
    /// matching `is_target` is on top, or the stack is empty. Non-
    /// disposable frames encountered along the way are an internal
    /// consistency error (spec §4.3 `empty_stack`).
    pub fn unwind_until(
        &mut self,
        mut is_target: impl FnMut(&Frame) -> bool,
    ) -> Result<Vec<Frame>> {
        let mut undone = Vec::new();
        loop {
            match self.frames.last() {
                None => return Err(BasicError::Broken),
                Some(top) if is_target(top) => return Ok(undone),
                Some(top) if top.is_disposable() => {
                    undone.push(self.frames.pop().unwrap());
                }
                Some(_) => return Err(BasicError::Broken),
            }
        }
    }

    /// Find (without disturbing frames above it, other than disposables)
    /// the nearest `WHILE` frame, per `get_while` (spec §4.3/4.4).
    pub fn find_while(&mut self) -> Result<(Vec<Frame>, usize)> {
        let undone = self.unwind_until(|f| matches!(f, Frame::While { .. }))?;
        Ok((undone, self.frames.len() - 1))
    }

    pub fn find_repeat(&mut self) -> Result<(Vec<Frame>, usize)> {
        let undone = self.unwind_until(|f| matches!(f, Frame::Repeat { .. }))?;
        Ok((undone, self.frames.len() - 1))
    }

    pub fn find_for(&mut self, control: &Lvalue) -> Result<(Vec<Frame>, usize)> {
        let undone = self.unwind_until(|f| match f {
            Frame::For(inner) => &inner.control == control,
            _ => false,
        })?;
        Ok((undone, self.frames.len() - 1))
    }

    /// Find the nearest `Error` frame at or below `from`, without
    /// disturbing the stack. Used by `ERR`/re-raise logic, which only
    /// *reads* the handler before a full unwind happens elsewhere.
    pub fn nearest_error_handler(&self) -> Option<(usize, Option<ErrorHandler>)> {
        for (i, f) in self.frames.iter().enumerate().rev() {
            match f {
                Frame::Error { handler } => return Some((i, *handler)),
                Frame::Restart => return None,
                _ => {}
            }
        }
        None
    }
}
