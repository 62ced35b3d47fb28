//! Core runtime for a BBC BASIC V/VI dialect: tokenised-program execution
//! behind an operand/control stack dispatcher, with the host (OS, terminal,
//! clock, program loader) kept as a narrow trait boundary so this crate
//! never touches the filesystem, a terminal, or a shell directly.
//!
//! Tokenising a text listing into the line-record format [`program::Program`]
//! expects is out of scope (spec §1); this crate starts from an already
//! tokenised image, runs it, and reports back through [`host::Host`].

#![forbid(unsafe_code)]

pub mod array;
pub mod calls;
pub mod case_table;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod eval;
pub mod host;
pub mod interpreter;
pub mod patch;
pub mod program;
pub mod stack;
pub mod symbol;
pub mod token;
pub mod value;
pub mod workspace;

#[cfg(test)]
mod test;

pub use config::{Limits, RunFlags};
pub use error::{BasicError, Result};
pub use host::{Host, NullHost, RecordingHost};
pub use interpreter::{Interpreter, StopReason};
pub use program::Program;
