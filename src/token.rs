//! Token stream layout: opcode assignment, operand widths, and the
//! low-level cursor used to read and patch bytes in place.
//!
//! Values `0x00..=0x7F` in the token stream are literal ASCII, with `0x00`
//! marking end-of-line and `0x3A` (`:`) marking a statement separator (spec
//! §3). Values `0x80..=0xFF` are [`Opcode`]s assigned by this crate — there
//! is no external tokeniser to stay bit-compatible with (spec §1's
//! non-goals), so the assignment only has to be internally consistent.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Width in bytes of a short, signed, PC-relative offset (used by
/// `IF`/`ELSE`/`WHEN`-family branches). Stored as a little-endian `i16`: the
/// value added to the address immediately following the operand to get the
/// branch target.
pub const OFFSIZE: usize = 2;

/// Width in bytes of a long absolute operand: either a byte offset anywhere
/// in the token buffer (`LINENUM`, `PROC`/`FN` entry points), or a baked
/// index into a side table (`CASE`'s case-table arena, a resolved `Var`'s
/// symbol id, a name-pool index). Stored as a little-endian `u32`.
pub const LOFFSIZE: usize = 4;

pub const NUL: u8 = 0x00;
pub const COLON: u8 = b':';
pub const SPACE: u8 = b' ';

/// End-of-line marker used inside a statement terminator test: `0x00`
/// (NUL) and `:` both end a statement; only NUL ends a line.
#[inline]
pub fn is_statement_end(byte: u8) -> bool {
    byte == NUL || byte == COLON
}

#[inline]
pub fn is_line_end(byte: u8) -> bool {
    byte == NUL
}

/// Opcodes `0x80..=0xFF`. Unresolved (`X*`) and resolved forms are paired so
/// that `resolved()`/`unresolved()` can assert they occupy the same operand
/// width (spec §3, "patcher requires ... exactly the same number of
/// bytes").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Opcode {
    // --- control flow, unresolved (X*) forms ---
    XLineNum = 0x80,
    XIf = 0x81,
    XCase = 0x82,
    XElse = 0x83,
    XLhElse = 0x84,
    XWhen = 0x85,
    XOtherwise = 0x86,
    XFnProcCall = 0x87,
    XWhile = 0x88,
    XVar = 0x89,

    // --- control flow, resolved forms ---
    LineNum = 0x90,
    BlockIf = 0x91,
    SingLif = 0x92,
    Case = 0x93,
    Else = 0x94,
    LhElse = 0x95,
    When = 0x96,
    Otherwise = 0x97,
    FnProcCall = 0x98,
    While = 0x99,
    Var = 0x9A,

    // --- loop / jump statements ---
    EndIf = 0xA0,
    EndCase = 0xA1,
    EndWhile = 0xA2,
    Repeat = 0xA3,
    Until = 0xA4,
    For = 0xA5,
    Next = 0xA6,
    Goto = 0xA7,
    Gosub = 0xA8,
    Return = 0xA9,
    On = 0xAA,

    // --- procedure / function ---
    Proc = 0xB0,
    EndProc = 0xB1,
    Equals = 0xB2, // `=<expr>` inside a FN, i.e. FN's return statement
    Local = 0xB3,
    LocalError = 0xB4,
    LocalData = 0xB5,

    // --- data ---
    Data = 0xC0,
    Read = 0xC1,
    Restore = 0xC2,

    // --- declarations / housekeeping ---
    Dim = 0xC8,
    DimHimem = 0xC9,
    Clear = 0xCA,
    ClearHimem = 0xCB,
    Library = 0xCC,

    // --- error handling ---
    ErrorStmt = 0xD0,
    OnError = 0xD1,
    Report = 0xD2,

    // --- run control / host gateway ---
    End = 0xD8,
    EndEquals = 0xD9,
    Stop = 0xDA,
    Quit = 0xDB,
    Run = 0xDC,
    Chain = 0xDD,
    Oscli = 0xDE,
    OscliTo = 0xDF,
    Call = 0xE0,
    Sys = 0xE1,
    Wait = 0xE2,
    Trace = 0xE3,
    Swap = 0xE4,
    Assign = 0xE5,
    Def = 0xE6, // executes as a REM / no-op statement

    // --- expression-surface tokens ---
    IntLit = 0xE8,
    Int64Lit = 0xE9,
    FloatLit = 0xEA,
    StrLit = 0xEB,
    BinOp = 0xEC,
    UnaryMinus = 0xED,
    UnaryNot = 0xEE,
    LParen = 0xEF,
    RParen = 0xF0,
    Comma = 0xF1,
    FnCall = 0xF2, // `FN` used inside an expression (value-producing call)
    ErrFunc = 0xF3, // `ERR` pseudo-variable
    IndirectByte = 0xF4, // `?addr` prefix, byte-sized indirection
    IndirectWord = 0xF5, // `!addr` prefix, word-sized indirection

    // --- statement-grammar keywords with no other opcode to hang off ---
    Print = 0xF6,
    Semicolon = 0xF7,
    ToKw = 0xF8,   // `FOR ... TO`
    StepKw = 0xF9, // `FOR ... STEP`
    OfKw = 0xFA,   // `CASE ... OF`
    OnElseKw = 0xFB, // `ON ... ELSE` fallback
    GotoTag = 0xFC,  // `ON`'s dispatch-kind byte: GOTO
    GosubTag = 0xFD, // `ON`'s dispatch-kind byte: GOSUB
    ProcTag = 0xFE,  // `ON`'s dispatch-kind byte: PROC
}

impl Opcode {
    /// Number of operand bytes following the opcode byte itself, for
    /// opcodes whose width is fixed and known without reading further
    /// context. Variable-width opcodes (`StrLit`, `FnProcCall`'s argument
    /// list, etc.) return `None` — callers that need to skip them use a
    /// dedicated skip routine instead.
    pub fn fixed_operand_len(self) -> Option<usize> {
        use Opcode::*;
        match self {
            XLineNum | LineNum => Some(LOFFSIZE),
            // Reserved width matches its resolved forms even before a scan
            // has patched it, so a skip over an un-executed nested `IF`
            // doesn't have to reinterpret the placeholder bytes one at a
            // time (crate::patch, crate::dispatch skip helpers).
            XIf => Some(2 * OFFSIZE),
            BlockIf | SingLif => Some(2 * OFFSIZE),
            XCase => Some(0),
            Case => Some(LOFFSIZE),
            XElse | Else => Some(OFFSIZE),
            XLhElse | LhElse => Some(OFFSIZE),
            XWhen | When => Some(OFFSIZE),
            XOtherwise | Otherwise => Some(OFFSIZE),
            XFnProcCall | FnProcCall => Some(LOFFSIZE),
            XWhile | While => Some(OFFSIZE),
            XVar | Var => Some(LOFFSIZE),
            EndIf | EndCase | EndWhile => Some(0),
            Repeat => Some(0),
            Until => Some(0),
            For => Some(0),
            Next => Some(0),
            Goto | Gosub => Some(0),
            Return => Some(0),
            On => Some(0),
            Proc => Some(0),
            EndProc => Some(0),
            Equals => Some(0),
            Local | LocalError | LocalData => Some(0),
            Data => Some(LOFFSIZE),
            Read | Restore => Some(0),
            Dim | DimHimem => Some(0),
            Clear | ClearHimem => Some(0),
            Library => Some(0),
            ErrorStmt => Some(0),
            OnError => Some(0),
            Report => Some(0),
            End => Some(0),
            EndEquals => Some(0),
            Stop | Quit => Some(0),
            Run | Chain => Some(0),
            Oscli | OscliTo => Some(0),
            Call | Sys | Wait | Trace | Swap | Assign | Def => Some(0),
            IntLit => Some(4),
            Int64Lit => Some(8),
            FloatLit => Some(8),
            StrLit => None,
            BinOp => Some(1),
            UnaryMinus | UnaryNot => Some(0),
            LParen | RParen | Comma => Some(0),
            FnCall => Some(LOFFSIZE),
            ErrFunc => Some(0),
            IndirectByte | IndirectWord => Some(0),
            Print | Semicolon | ToKw | StepKw | OfKw | OnElseKw => Some(0),
            GotoTag | GosubTag | ProcTag => Some(0),
        }
    }

    /// The resolved form this unresolved opcode patches into, if any.
    pub fn resolved(self) -> Option<Opcode> {
        use Opcode::*;
        Some(match self {
            XLineNum => LineNum,
            XElse => Else,
            XLhElse => LhElse,
            XWhen => When,
            XOtherwise => Otherwise,
            XFnProcCall => FnProcCall,
            XWhile => While,
            XVar => Var,
            _ => return None,
        })
    }

    pub fn is_unresolved(self) -> bool {
        matches!(
            self,
            Opcode::XLineNum
                | Opcode::XIf
                | Opcode::XCase
                | Opcode::XElse
                | Opcode::XLhElse
                | Opcode::XWhen
                | Opcode::XOtherwise
                | Opcode::XFnProcCall
                | Opcode::XWhile
                | Opcode::XVar
        )
    }
}

/// Binary operators encoded as the single byte following a [`Opcode::BinOp`]
/// token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum BinOp {
    Add = 0,
    Sub = 1,
    Mul = 2,
    Div = 3,
    IntDiv = 4,
    Mod = 5,
    Pow = 6,
    Eq = 7,
    Ne = 8,
    Lt = 9,
    Gt = 10,
    Le = 11,
    Ge = 12,
    And = 13,
    Or = 14,
    Eor = 15,
}

/// Read/write helpers over a byte slice, addressed by absolute offset. Kept
/// as free functions (rather than a stateful cursor type) since callers
/// juggle several independent offsets at once (the patcher reads ahead
/// while writing behind).
pub fn read_u8(buf: &[u8], at: usize) -> u8 {
    buf[at]
}

pub fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

pub fn read_i16(buf: &[u8], at: usize) -> i16 {
    read_u16(buf, at) as i16
}

pub fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

pub fn read_i32(buf: &[u8], at: usize) -> i32 {
    read_u32(buf, at) as i32
}

pub fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

pub fn read_i64(buf: &[u8], at: usize) -> i64 {
    read_u64(buf, at) as i64
}

pub fn read_f64(buf: &[u8], at: usize) -> f64 {
    f64::from_bits(read_u64(buf, at))
}

pub fn write_u8(buf: &mut [u8], at: usize, value: u8) {
    buf[at] = value;
}

pub fn write_u16(buf: &mut [u8], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

pub fn write_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

/// Write a short branch offset such that reading it back from `at` (after
/// the [`OFFSIZE`]-byte field) lands on `target`.
pub fn write_offset(buf: &mut [u8], at: usize, target: usize) {
    let base = at as i64 + OFFSIZE as i64;
    let delta = target as i64 - base;
    write_u16(buf, at, delta as i16 as u16);
}

/// Resolve a short branch offset field at `at` into an absolute buffer
/// offset.
pub fn read_offset_target(buf: &[u8], at: usize) -> usize {
    let base = at as i64 + OFFSIZE as i64;
    (base + read_i16(buf, at) as i64) as usize
}
