//! Runtime-tunable behaviour. This is the embeddable core's "configuration
//! layer": callers build a [`RunFlags`]/[`Limits`] pair and hand it to
//! [`crate::Interpreter::new`] rather than reading environment variables or
//! a config file.

/// Maximum number of `WHEN`/`OTHERWISE` arms a single `CASE` table may hold.
/// A dimensioning constant, not a contract (spec §9, Open Question (c)).
pub const MAX_CASE_ARMS: usize = 500;

/// Maximum number of positional parameters a single `SYS` call may pass.
/// A dimensioning constant, not a contract (spec §9, Open Question (c)).
pub const MAX_SYS_PARAMS: usize = 16;

/// Minimum number of entries of headroom the operand stack keeps free so a
/// fresh expression evaluation never runs it out from under a handler mid
/// push.
pub const OPSTACK_HEADROOM: usize = 64;

/// Runtime behaviour flags. Mirrors `original_source`'s `basicvars.runflags`
/// bitset, kept here as named `bool`s instead of bits since nothing outside
/// this crate ever serialises them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunFlags {
    /// Whether a trailing `THEN` on a single-line `IF` that contains a
    /// nested block `IF` is treated as "find the matching `ENDIF`" rather
    /// than literal single-line `IF` nesting. Defaults to `true`, matching
    /// `original_source`'s shipped default (spec §9, Open Question (a)).
    pub cascade_if_tweak: bool,
    /// Whether `DIM HIMEM` addresses are required to fit in 32 bits.
    pub addr32: bool,
}

impl Default for RunFlags {
    fn default() -> Self {
        RunFlags {
            cascade_if_tweak: true,
            addr32: false,
        }
    }
}

/// Size limits that bound table growth and stack depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_case_arms: usize,
    pub max_sys_params: usize,
    pub opstack_headroom: usize,
    /// Maximum number of control-stack frames before a `StackFull` error.
    pub max_control_frames: usize,
    /// Maximum number of operand-stack values before a `StackFull` error.
    pub max_operand_values: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_case_arms: MAX_CASE_ARMS,
            max_sys_params: MAX_SYS_PARAMS,
            opstack_headroom: OPSTACK_HEADROOM,
            max_control_frames: 8192,
            max_operand_values: 8192,
        }
    }
}
