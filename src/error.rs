//! The numbered error-kind taxonomy (spec §7) and the [`Result`] alias used
//! throughout the interpreter core.
//!
//! `BasicError` is the one place in this crate that earns a hand-written
//! `thiserror` enum instead of `anyhow::Error`: BASIC programs can inspect
//! `ERR` and branch on it inside an `ON ERROR` handler, so the error kind
//! has to carry a stable number, not just a message.

use thiserror::Error;

/// Result alias used by every fallible operation inside the interpreter
/// core.
pub type Result<T> = std::result::Result<T, BasicError>;

/// A numbered error kind, per spec §7. `errnum()` is what `ERR` reads
/// inside an `ON ERROR` handler; `Display` is what `REPORT` prints.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BasicError {
    #[error("Syntax error")]
    Syntax,
    #[error("No such variable")]
    VarNum,
    #[error("No such string variable")]
    VarNumStr,
    #[error("Type mismatch: numeric value needed")]
    TypeNum,
    #[error("Type mismatch: string value needed")]
    TypeStr,
    #[error("Line does not exist")]
    LineMiss,
    #[error("Line number invalid")]
    LineNo,
    #[error("ENDPROC without PROC")]
    EndProc,
    #[error("No such FN")]
    FnReturn,
    #[error("ENDIF without block IF")]
    EndIf,
    #[error("ENDCASE without CASE")]
    EndCase,
    #[error("ENDWHILE without WHILE")]
    EndWhile,
    #[error("Not WHILE")]
    NotWhile,
    #[error("Not REPEAT")]
    NotRepeat,
    #[error("Not FOR")]
    NotFor,
    #[error("Out of DATA")]
    Data,
    #[error("No DATA to restore")]
    DataNotOp,
    #[error("No ERROR to restore")]
    ErrNotOp,
    #[error("Stack full")]
    StackFull,
    #[error("Bad DIM")]
    BadDim,
    #[error("Negative DIM")]
    NegDim,
    #[error("Negative byte DIM")]
    NegByteDim,
    #[error("Bad byte DIM")]
    BadByteDim,
    #[error("Duplicate DIM")]
    DuplDim,
    #[error("Wrong number of dimensions")]
    DimCount,
    #[error("')' expected")]
    RpMiss,
    #[error("',' expected")]
    ComMiss,
    #[error("'=' expected")]
    EqMiss,
    #[error("'TO' expected")]
    ToMiss,
    #[error("Silly value (STEP can't be zero)")]
    Silly,
    #[error("Too many WHEN/OTHERWISE clauses")]
    WhenCount,
    #[error("ON range error")]
    OnRange,
    #[error("No such LOCAL variable in a library")]
    NoLibLoc,
    #[error("Can't SWAP these operands")]
    NoSwap,
    #[error("String too long")]
    StringLen,
    #[error("Escape")]
    Escape,
    #[error("STOP")]
    Stop,
    #[error("Value out of range")]
    Range,
    #[error("Missing quote")]
    QuoteMiss,
    #[error("Unsupported feature")]
    Unsupported,
    #[error("Unsupported statement in this context")]
    UnsupState,
    #[error("Bad TRACE option")]
    BadTrace,
    #[error("Internal error (BROKEN)")]
    Broken,
    #[error("Host operation failed: {0}")]
    Host(String),
    #[error("{message}")]
    User { number: i32, message: String },

    /// Internal-only signal, never reported to a BASIC program: a deeper
    /// `ON ERROR LOCAL` handler already repositioned `current` at an
    /// outer call depth (crate::calls's "cross-call long jump"). Every
    /// call/loop boundary on the way back up re-checks the control-stack
    /// depth and either resumes there or keeps propagating this signal —
    /// it is always intercepted before it could reach `REPORT`/`ERR`.
    #[error("internal: control stack unwound past this call")]
    ControlUnwound,
}

impl BasicError {
    /// The stable error number `ERR` reads inside an `ON ERROR` handler.
    /// Matches the ordering in spec §7's representative-kinds list; `User`
    /// carries its own caller-supplied number.
    pub fn errnum(&self) -> i32 {
        use BasicError::*;
        match self {
            Syntax => 0,
            VarNum => 1,
            VarNumStr => 2,
            TypeNum => 6,
            TypeStr => 7,
            LineMiss => 41,
            LineNo => 20,
            EndProc => 38,
            FnReturn => 39,
            EndIf => 9,
            EndCase => 10,
            EndWhile => 34,
            NotWhile => 30,
            NotRepeat => 32,
            NotFor => 33,
            Data => 22,
            DataNotOp => 23,
            ErrNotOp => 37,
            StackFull => 19,
            BadDim => 10,
            NegDim => 16,
            NegByteDim => 17,
            BadByteDim => 18,
            DuplDim => 10,
            DimCount => 11,
            RpMiss => 27,
            ComMiss => 5,
            EqMiss => 13,
            ToMiss => 14,
            Silly => 15,
            WhenCount => 50,
            OnRange => 3,
            NoLibLoc => 51,
            NoSwap => 52,
            StringLen => 19,
            Escape => 17,
            Stop => 0,
            Range => 63,
            QuoteMiss => 40,
            Unsupported => 254,
            UnsupState => 255,
            BadTrace => 253,
            Broken => 255,
            Host(_) => 255,
            User { number, .. } => *number,
            ControlUnwound => 255,
        }
    }

    /// Build an `ERROR <n>,<msg>`-raised user error.
    pub fn user(number: i32, message: impl Into<String>) -> Self {
        BasicError::User {
            number,
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for BasicError {
    fn from(value: std::io::Error) -> Self {
        BasicError::Host(value.to_string())
    }
}

impl From<anyhow::Error> for BasicError {
    fn from(value: anyhow::Error) -> Self {
        BasicError::Host(value.to_string())
    }
}
