//! The `CASE` jump table (spec §4.6): built once, on `XCASE`'s first
//! execution, by scanning forward for every `WHEN`/`OTHERWISE` at the
//! matching nesting depth. Stored in its own arena (addressed by
//! [`CaseTableId`]) rather than inline in the token stream, since a table
//! is variable-length and the patched `CASE` opcode's operand is a single
//! fixed-width index (spec §9 "model with indices").

use crate::config::Limits;
use crate::error::{BasicError, Result};

/// One `WHEN` arm: the offset of its (possibly comma-separated) list of
/// candidate-value expressions, and the offset of its statement body.
#[derive(Debug, Clone, Copy)]
pub struct CaseArm {
    pub values_start: usize,
    pub body_start: usize,
}

#[derive(Debug, Clone)]
pub struct CaseTable {
    pub arms: Vec<CaseArm>,
    pub otherwise: Option<usize>,
    /// Where control falls through if nothing matches and there is no
    /// `OTHERWISE`: the statement after `ENDCASE` (spec §4.6).
    pub fallthrough: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CaseTableId(pub u32);

#[derive(Debug, Default)]
pub struct CaseTableArena {
    tables: Vec<CaseTable>,
}

impl CaseTableArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: CaseTable, limits: &Limits) -> Result<CaseTableId> {
        if table.arms.len() > limits.max_case_arms {
            return Err(BasicError::WhenCount);
        }
        self.tables.push(table);
        Ok(CaseTableId((self.tables.len() - 1) as u32))
    }

    pub fn get(&self, id: CaseTableId) -> Result<&CaseTable> {
        self.tables.get(id.0 as usize).ok_or(BasicError::Broken)
    }
}

impl CaseTable {
    /// Clone out the arm list plus the two fallback targets, so a caller can
    /// walk the arms while also mutating `self`/its interpreter through
    /// `eval_expr` (the arena borrow can't stay alive across that call).
    pub fn clone_arms(&self) -> (Vec<CaseArm>, Option<usize>, usize) {
        (self.arms.clone(), self.otherwise, self.fallthrough)
    }
}
