//! The two runtime stacks (spec §4.2/§4.3): an [`operand::OperandStack`]
//! for expression evaluation and a [`control::ControlStack`] of tagged
//! frames for structured flow.

pub mod control;
pub mod operand;

pub use control::{ControlStack, DataCursor, Frame, ForFrame, ForKind, Lvalue, ErrorHandler};
pub use operand::OperandStack;
