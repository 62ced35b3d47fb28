//! End-to-end tests: hand-assembled token streams run through a real
//! [`Interpreter`], asserting on [`RecordingHost`]'s captured output or on
//! post-run interpreter state directly. There is no tokeniser in this
//! crate (spec §1 non-goal), so every program here is built byte-by-byte
//! with [`Builder`], the same line-record layout [`crate::program`]
//! documents.

use crate::array::ElementKind;
use crate::config::{Limits, RunFlags};
use crate::error::BasicError;
use crate::host::{NullHost, RecordingHost};
use crate::interpreter::{Interpreter, StopReason};
use crate::program::Program;
use crate::symbol::{NameKind, SymbolId, SymbolPayload, SymbolTable};
use crate::token::{BinOp, Opcode, OFFSIZE};
use crate::value::Value;

/// Accumulates one line record's executable bytes and wraps them with the
/// `[total_len][line_number][source_len][source][exec]` header
/// `crate::program` documents. Source text defaults to empty; only a few
/// statements (`IF`'s THEN-position heuristic, `DATA`'s literal list)
/// re-read it.
struct Line {
    number: u16,
    source: Vec<u8>,
    exec: Vec<u8>,
}

impl Line {
    fn new(number: u16) -> Self {
        Line { number, source: Vec::new(), exec: Vec::new() }
    }

    fn source(mut self, text: &[u8]) -> Self {
        self.source = text.to_vec();
        self
    }

    fn op(mut self, op: Opcode) -> Self {
        self.exec.push(op as u8);
        self
    }

    fn byte(mut self, b: u8) -> Self {
        self.exec.push(b);
        self
    }

    fn u32(mut self, v: u32) -> Self {
        self.exec.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn i32(mut self, v: i32) -> Self {
        self.exec.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Reserve the bytes an unresolved `X*` opcode's eventual resolved form
    /// will occupy — the patcher only ever overwrites existing bytes, never
    /// grows the buffer, so a builder must lay them down up front.
    fn reserve(mut self, width: usize) -> Self {
        self.exec.extend(std::iter::repeat(0u8).take(width));
        self
    }

    fn var(self, id: SymbolId) -> Self {
        self.op(Opcode::Var).u32(id.0)
    }

    fn int_lit(self, v: i32) -> Self {
        self.op(Opcode::IntLit).i32(v)
    }

    fn str_lit(mut self, bytes: &[u8]) -> Self {
        self.exec.push(Opcode::StrLit as u8);
        self.exec.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
        self.exec.extend_from_slice(bytes);
        self
    }

    fn binop(self, op: BinOp) -> Self {
        self.op(Opcode::BinOp).byte(op as u8)
    }

    /// A `LineNum` operand used by `GOTO`/`GOSUB`/`RESTORE`/`ON ERROR`;
    /// callers patch the real target in with [`Program::patch_long`] once
    /// every line's offset is known.
    fn line_num_placeholder(self) -> Self {
        self.op(Opcode::LineNum).u32(0)
    }

    fn nul(mut self) -> Self {
        self.exec.push(crate::token::NUL);
        self
    }

    fn finish(self) -> Vec<u8> {
        const HEADER_LEN: usize = 6;
        let total = HEADER_LEN + self.source.len() + self.exec.len();
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&(total as u16).to_le_bytes());
        out.extend_from_slice(&self.number.to_le_bytes());
        out.extend_from_slice(&(self.source.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.source);
        out.extend_from_slice(&self.exec);
        out
    }
}

struct Builder {
    buf: Vec<u8>,
}

impl Builder {
    fn new() -> Self {
        Builder { buf: Vec::new() }
    }

    fn line(mut self, line: Line) -> Self {
        self.buf.extend(line.finish());
        self
    }

    fn build(mut self) -> Program {
        self.buf.extend_from_slice(&crate::program::END_OF_PROGRAM.to_le_bytes());
        Program::new(self.buf)
    }
}

/// Register a program-scope variable ahead of time and return its id. This
/// crate never looks a `Var` token up by name at dispatch time — that
/// resolution happens once, by whatever built the token stream — so a
/// hand-built program must bake an already-issued [`SymbolId`] into every
/// `Var` operand.
fn var(symbols: &mut SymbolTable, name: &[u8]) -> SymbolId {
    symbols.insert(None, NameKind::Variable, name, SymbolPayload::Pending)
}

fn run_with(program: Program, symbols: SymbolTable) -> Interpreter<RecordingHost> {
    let mut interpreter =
        Interpreter::new(program, RunFlags::default(), Limits::default(), RecordingHost::default());
    interpreter.symbols = symbols;
    interpreter
}

/// Patch a `LineNum` placeholder sitting right after `owner_opcode_at` (the
/// offset of the `Goto`/`Gosub`/`Restore`/`OnError` opcode byte itself) to
/// point at `target_line`'s line record.
fn patch_target(program: &mut Program, owner_opcode_at: usize, target_line: u16) {
    let target = program.find_line(target_line).unwrap();
    program.patch_long(owner_opcode_at + 1, target as u32).unwrap();
}

#[test]
fn assigns_and_prints_arithmetic() {
    let mut symbols = SymbolTable::new();
    let a = var(&mut symbols, b"a%");
    let program = Builder::new()
        .line(
            Line::new(10)
                .op(Opcode::Assign)
                .var(a)
                .int_lit(2)
                .binop(BinOp::Add)
                .int_lit(3)
                .binop(BinOp::Mul)
                .int_lit(4)
                .nul(),
        )
        .line(Line::new(20).op(Opcode::Print).var(a).nul())
        .line(Line::new(30).op(Opcode::End).nul())
        .build();
    let mut interpreter = run_with(program, symbols);
    let reason = interpreter.run();
    assert_eq!(reason, StopReason::End { value: None });
    assert_eq!(interpreter.host.output_text(), "20\r\n");
}

#[test]
fn string_concatenation() {
    let program = Builder::new()
        .line(
            Line::new(10)
                .op(Opcode::Print)
                .str_lit(b"HELLO, ")
                .binop(BinOp::Add)
                .str_lit(b"WORLD")
                .nul(),
        )
        .line(Line::new(20).op(Opcode::End).nul())
        .build();
    let mut interpreter = run_with(program, SymbolTable::new());
    interpreter.run();
    assert_eq!(interpreter.host.output_text(), "HELLO, WORLD\r\n");
}

/// `FOR I% = 1 TO 3` summing into an accumulator.
#[test]
fn for_next_accumulates() {
    let mut symbols = SymbolTable::new();
    let i = var(&mut symbols, b"i%");
    let total = var(&mut symbols, b"total%");
    let program = Builder::new()
        .line(Line::new(10).op(Opcode::Assign).var(total).int_lit(0).nul())
        .line(
            Line::new(20)
                .op(Opcode::For)
                .var(i)
                .int_lit(1)
                .op(Opcode::ToKw)
                .int_lit(3)
                .nul(),
        )
        .line(
            Line::new(30)
                .op(Opcode::Assign)
                .var(total)
                .var(total)
                .binop(BinOp::Add)
                .var(i)
                .nul(),
        )
        .line(Line::new(40).op(Opcode::Next).nul())
        .line(Line::new(50).op(Opcode::Print).var(total).nul())
        .line(Line::new(60).op(Opcode::End).nul())
        .build();
    let mut interpreter = run_with(program, symbols);
    interpreter.run();
    assert_eq!(interpreter.host.output_text(), "6\r\n");
}

/// A `FOR` whose own entry condition already fails never runs its body.
#[test]
fn for_loop_skips_when_condition_fails_up_front() {
    let mut symbols = SymbolTable::new();
    let i = var(&mut symbols, b"i%");
    let hits = var(&mut symbols, b"hits%");
    let program = Builder::new()
        .line(Line::new(10).op(Opcode::Assign).var(hits).int_lit(0).nul())
        .line(
            Line::new(20)
                .op(Opcode::For)
                .var(i)
                .int_lit(5)
                .op(Opcode::ToKw)
                .int_lit(1)
                .nul(),
        )
        .line(Line::new(30).op(Opcode::Assign).var(hits).int_lit(1).nul())
        .line(Line::new(40).op(Opcode::Next).nul())
        .line(Line::new(50).op(Opcode::Print).var(hits).nul())
        .line(Line::new(60).op(Opcode::End).nul())
        .build();
    let mut interpreter = run_with(program, symbols);
    interpreter.run();
    assert_eq!(interpreter.host.output_text(), "0\r\n");
}

/// A single-line `IF ... THEN ...` (no nested block `IF`): patched to
/// `SingLif` on first execution, skipping the rest of the line when false.
#[test]
fn single_line_if_skips_rest_of_line_when_false() {
    let mut symbols = SymbolTable::new();
    let flag = var(&mut symbols, b"flag%");
    let program = Builder::new()
        .line(Line::new(10).op(Opcode::Assign).var(flag).int_lit(0).nul())
        .line(
            Line::new(20)
                .source(b"IF 0 THEN flag%=1")
                .op(Opcode::XIf)
                .reserve(2 * OFFSIZE)
                .int_lit(0)
                .op(Opcode::Assign)
                .var(flag)
                .int_lit(1)
                .nul(),
        )
        .line(Line::new(30).op(Opcode::Print).var(flag).nul())
        .line(Line::new(40).op(Opcode::End).nul())
        .build();
    let mut interpreter = run_with(program, symbols);
    interpreter.run();
    assert_eq!(interpreter.host.output_text(), "0\r\n");
}

/// A block `IF ... THEN` (the last token on its line) runs its body and
/// falls through past the matching `ENDIF`.
#[test]
fn block_if_runs_then_branch() {
    let mut symbols = SymbolTable::new();
    let flag = var(&mut symbols, b"flag%");
    let program = Builder::new()
        .line(Line::new(10).op(Opcode::Assign).var(flag).int_lit(0).nul())
        .line(
            Line::new(20)
                .source(b"IF 1 THEN")
                .op(Opcode::XIf)
                .reserve(2 * OFFSIZE)
                .int_lit(1)
                .nul(),
        )
        .line(Line::new(30).op(Opcode::Assign).var(flag).int_lit(1).nul())
        .line(Line::new(40).op(Opcode::EndIf).nul())
        .line(Line::new(50).op(Opcode::Print).var(flag).nul())
        .line(Line::new(60).op(Opcode::End).nul())
        .build();
    let mut interpreter = run_with(program, symbols);
    interpreter.run();
    assert_eq!(interpreter.host.output_text(), "1\r\n");
}

/// `WHILE`/`ENDWHILE` re-checks its own condition at the back edge.
#[test]
fn while_loop_counts_down() {
    let mut symbols = SymbolTable::new();
    let n = var(&mut symbols, b"n%");
    let program = Builder::new()
        .line(Line::new(10).op(Opcode::Assign).var(n).int_lit(3).nul())
        .line(
            Line::new(20)
                .op(Opcode::XWhile)
                .reserve(OFFSIZE)
                .var(n)
                .binop(BinOp::Gt)
                .int_lit(0)
                .nul(),
        )
        .line(
            Line::new(30)
                .op(Opcode::Assign)
                .var(n)
                .var(n)
                .binop(BinOp::Sub)
                .int_lit(1)
                .nul(),
        )
        .line(Line::new(40).op(Opcode::EndWhile).nul())
        .line(Line::new(50).op(Opcode::Print).var(n).nul())
        .line(Line::new(60).op(Opcode::End).nul())
        .build();
    let mut interpreter = run_with(program, symbols);
    interpreter.run();
    assert_eq!(interpreter.host.output_text(), "0\r\n");
}

/// `REPEAT`/`UNTIL` always runs its body at least once, unlike `WHILE`.
#[test]
fn repeat_until_runs_body_at_least_once() {
    let mut symbols = SymbolTable::new();
    let n = var(&mut symbols, b"n%");
    let program = Builder::new()
        .line(Line::new(10).op(Opcode::Assign).var(n).int_lit(0).nul())
        .line(Line::new(20).op(Opcode::Repeat).nul())
        .line(
            Line::new(30)
                .op(Opcode::Assign)
                .var(n)
                .var(n)
                .binop(BinOp::Add)
                .int_lit(1)
                .nul(),
        )
        .line(Line::new(40).op(Opcode::Until).var(n).binop(BinOp::Ge).int_lit(1).nul())
        .line(Line::new(50).op(Opcode::Print).var(n).nul())
        .line(Line::new(60).op(Opcode::End).nul())
        .build();
    let mut interpreter = run_with(program, symbols);
    interpreter.run();
    assert_eq!(interpreter.host.output_text(), "1\r\n");
}

/// `GOTO`/`GOSUB`/`RETURN`: a subroutine that doubles a value, called once
/// via `GOSUB`, then control falls back past it.
#[test]
fn gosub_return_round_trips() {
    let mut symbols = SymbolTable::new();
    let v = var(&mut symbols, b"v%");
    let program = Builder::new()
        .line(Line::new(10).op(Opcode::Assign).var(v).int_lit(5).nul())
        .line(Line::new(20).op(Opcode::Gosub).line_num_placeholder().nul())
        .line(Line::new(30).op(Opcode::Print).var(v).nul())
        .line(Line::new(40).op(Opcode::End).nul())
        .line(
            Line::new(100)
                .op(Opcode::Assign)
                .var(v)
                .var(v)
                .binop(BinOp::Mul)
                .int_lit(2)
                .nul(),
        )
        .line(Line::new(110).op(Opcode::Return).nul())
        .build();
    let mut interpreter = run_with(program, symbols);
    let gosub_at = interpreter.program.find_line(20).unwrap();
    let gosub_opcode_at = interpreter.program.exec_start(gosub_at).unwrap();
    patch_target(&mut interpreter.program, gosub_opcode_at, 100);

    interpreter.run();
    assert_eq!(interpreter.host.output_text(), "10\r\n");
}

/// `GOTO` jumping backward into an infinite loop is interrupted by escape.
#[test]
fn goto_loop_interrupted_by_escape() {
    let program = Builder::new()
        .line(Line::new(10).op(Opcode::Goto).line_num_placeholder().nul())
        .build();
    let mut interpreter = run_with(program, SymbolTable::new());
    interpreter.host.escape_armed = true;
    let goto_at = interpreter.program.find_line(10).unwrap();
    let goto_opcode_at = interpreter.program.exec_start(goto_at).unwrap();
    patch_target(&mut interpreter.program, goto_opcode_at, 10);

    match interpreter.run() {
        StopReason::UnhandledError(BasicError::Escape) => {}
        other => panic!("expected Escape, got {other:?}"),
    }
}

/// `ON 2 GOTO 30,40,50 ELSE 60` picks the second target by selector value,
/// leaving the unmatched entries and the `ELSE` fallback unread.
#[test]
fn on_goto_picks_matching_target() {
    let program = Builder::new()
        .line(
            Line::new(10)
                .op(Opcode::On)
                .int_lit(2)
                .op(Opcode::GotoTag)
                .line_num_placeholder()
                .op(Opcode::Comma)
                .line_num_placeholder()
                .op(Opcode::Comma)
                .line_num_placeholder()
                .op(Opcode::OnElseKw)
                .line_num_placeholder()
                .nul(),
        )
        .line(Line::new(30).op(Opcode::Print).str_lit(b"A").op(Opcode::End).nul())
        .line(Line::new(40).op(Opcode::Print).str_lit(b"B").op(Opcode::End).nul())
        .line(Line::new(50).op(Opcode::Print).str_lit(b"C").op(Opcode::End).nul())
        .line(Line::new(60).op(Opcode::Print).str_lit(b"D").nul())
        .build();
    let mut interpreter = run_with(program, SymbolTable::new());
    let on_at = interpreter.program.find_line(10).unwrap();
    let on_opcode_at = interpreter.program.exec_start(on_at).unwrap();
    patch_target(&mut interpreter.program, on_opcode_at + 6, 30);
    patch_target(&mut interpreter.program, on_opcode_at + 12, 40);
    patch_target(&mut interpreter.program, on_opcode_at + 18, 50);
    patch_target(&mut interpreter.program, on_opcode_at + 24, 60);

    interpreter.run();
    assert_eq!(interpreter.host.output_text(), "B\r\n");
}

/// `ON` falls through to its `ELSE` clause when the selector names no
/// candidate.
#[test]
fn on_goto_falls_through_to_else() {
    let program = Builder::new()
        .line(
            Line::new(10)
                .op(Opcode::On)
                .int_lit(9)
                .op(Opcode::GotoTag)
                .line_num_placeholder()
                .op(Opcode::Comma)
                .line_num_placeholder()
                .op(Opcode::OnElseKw)
                .line_num_placeholder()
                .nul(),
        )
        .line(Line::new(30).op(Opcode::Print).str_lit(b"A").op(Opcode::End).nul())
        .line(Line::new(40).op(Opcode::Print).str_lit(b"B").op(Opcode::End).nul())
        .line(Line::new(60).op(Opcode::Print).str_lit(b"D").nul())
        .build();
    let mut interpreter = run_with(program, SymbolTable::new());
    let on_at = interpreter.program.find_line(10).unwrap();
    let on_opcode_at = interpreter.program.exec_start(on_at).unwrap();
    patch_target(&mut interpreter.program, on_opcode_at + 6, 30);
    patch_target(&mut interpreter.program, on_opcode_at + 12, 40);
    patch_target(&mut interpreter.program, on_opcode_at + 18, 60);

    interpreter.run();
    assert_eq!(interpreter.host.output_text(), "D\r\n");
}

/// `ON` with no `ELSE` and a selector matching no candidate is a range
/// error.
#[test]
fn on_goto_out_of_range_without_else_is_an_error() {
    let program = Builder::new()
        .line(
            Line::new(10)
                .op(Opcode::On)
                .int_lit(9)
                .op(Opcode::GotoTag)
                .line_num_placeholder()
                .op(Opcode::Comma)
                .line_num_placeholder()
                .nul(),
        )
        .line(Line::new(30).op(Opcode::Print).str_lit(b"A").op(Opcode::End).nul())
        .line(Line::new(40).op(Opcode::Print).str_lit(b"B").op(Opcode::End).nul())
        .build();
    let mut interpreter = run_with(program, SymbolTable::new());
    let on_at = interpreter.program.find_line(10).unwrap();
    let on_opcode_at = interpreter.program.exec_start(on_at).unwrap();
    patch_target(&mut interpreter.program, on_opcode_at + 6, 30);
    patch_target(&mut interpreter.program, on_opcode_at + 12, 40);

    match interpreter.run() {
        StopReason::UnhandledError(BasicError::OnRange) => {}
        other => panic!("expected OnRange, got {other:?}"),
    }
}

/// `DIM a%(3)` creates a four-element (`0..=3`) heap array; indexed
/// assignment and read round-trip through the array arena.
#[test]
fn dim_array_create_and_index() {
    let mut symbols = SymbolTable::new();
    let a = var(&mut symbols, b"a%");
    let i = var(&mut symbols, b"i%");
    let program = Builder::new()
        .line(Line::new(10).op(Opcode::Dim).var(a).op(Opcode::LParen).int_lit(3).op(Opcode::RParen).nul())
        .line(
            Line::new(20)
                .op(Opcode::Assign)
                .var(a)
                .op(Opcode::LParen)
                .int_lit(2)
                .op(Opcode::RParen)
                .int_lit(42)
                .nul(),
        )
        .line(Line::new(30).op(Opcode::Assign).var(i).int_lit(2).nul())
        .line(
            Line::new(40)
                .op(Opcode::Print)
                .var(a)
                .op(Opcode::LParen)
                .var(i)
                .op(Opcode::RParen)
                .nul(),
        )
        .line(Line::new(50).op(Opcode::End).nul())
        .build();
    let mut interpreter = run_with(program, symbols);
    interpreter.run();
    assert_eq!(interpreter.host.output_text(), "42\r\n");

    let array_id = interpreter.symbols.array_id(a).expect("array bound");
    let descriptor = interpreter.arrays.get(array_id).unwrap();
    assert_eq!(descriptor.kind, ElementKind::Int);
    assert_eq!(descriptor.dims, vec![4]);
}

/// Dimensioning the same array twice is rejected.
#[test]
fn dim_array_twice_is_an_error() {
    let mut symbols = SymbolTable::new();
    let a = var(&mut symbols, b"a%");
    let program = Builder::new()
        .line(Line::new(10).op(Opcode::Dim).var(a).op(Opcode::LParen).int_lit(3).op(Opcode::RParen).nul())
        .line(Line::new(20).op(Opcode::Dim).var(a).op(Opcode::LParen).int_lit(3).op(Opcode::RParen).nul())
        .line(Line::new(30).op(Opcode::End).nul())
        .build();
    let mut interpreter = run_with(program, symbols);
    match interpreter.run() {
        StopReason::UnhandledError(BasicError::DuplDim) => {}
        other => panic!("expected DuplDim, got {other:?}"),
    }
}

/// A negative array dimension is rejected before any allocation happens.
#[test]
fn negative_dim_is_rejected() {
    let mut symbols = SymbolTable::new();
    let a = var(&mut symbols, b"a%");
    let program = Builder::new()
        .line(Line::new(10).op(Opcode::Dim).var(a).op(Opcode::LParen).int_lit(-1).op(Opcode::RParen).nul())
        .line(Line::new(20).op(Opcode::End).nul())
        .build();
    let mut interpreter = run_with(program, symbols);
    match interpreter.run() {
        StopReason::UnhandledError(BasicError::NegDim) => {}
        other => panic!("expected NegDim, got {other:?}"),
    }
}

/// `DIM name <size>` with `<size> == -1` is the "current heap top, no
/// allocation" sentinel: the variable ends up holding the heap's current
/// top address with the heap left untouched.
#[test]
fn dim_byte_block_sentinel_reads_heap_top_without_allocating() {
    let mut symbols = SymbolTable::new();
    let p = var(&mut symbols, b"p");
    let program = Builder::new()
        .line(Line::new(10).op(Opcode::Dim).var(p).int_lit(-1).nul())
        .line(Line::new(20).op(Opcode::End).nul())
        .build();
    let mut interpreter = run_with(program, symbols);
    interpreter.run();
    let Value::Int64(addr) = interpreter.symbols.scalar(p).unwrap().clone() else {
        panic!("expected Int64 address");
    };
    assert_eq!(addr as u64, interpreter.workspace.heap_top().0);
}

/// `DIM name <size>` with a real size bumps the allocator and returns a
/// distinct base address on a second call.
#[test]
fn dim_byte_block_allocates_distinct_regions() {
    let mut symbols = SymbolTable::new();
    let p = var(&mut symbols, b"p");
    let q = var(&mut symbols, b"q");
    let program = Builder::new()
        .line(Line::new(10).op(Opcode::Dim).var(p).int_lit(16).nul())
        .line(Line::new(20).op(Opcode::Dim).var(q).int_lit(16).nul())
        .line(Line::new(30).op(Opcode::End).nul())
        .build();
    let mut interpreter = run_with(program, symbols);
    interpreter.run();
    let Value::Int64(p_addr) = interpreter.symbols.scalar(p).unwrap().clone() else {
        panic!("expected Int64 address");
    };
    let Value::Int64(q_addr) = interpreter.symbols.scalar(q).unwrap().clone() else {
        panic!("expected Int64 address");
    };
    assert_ne!(p_addr, q_addr);
    assert_eq!(q_addr - p_addr, 16);
}

/// `SWAP a(), b()` exchanges two whole arrays' storage in place, not a
/// single indexed element.
#[test]
fn swap_exchanges_whole_arrays() {
    let mut symbols = SymbolTable::new();
    let a = var(&mut symbols, b"a%");
    let b = var(&mut symbols, b"b%");
    let program = Builder::new()
        .line(Line::new(10).op(Opcode::Dim).var(a).op(Opcode::LParen).int_lit(1).op(Opcode::RParen).nul())
        .line(Line::new(20).op(Opcode::Dim).var(b).op(Opcode::LParen).int_lit(1).op(Opcode::RParen).nul())
        .line(
            Line::new(30)
                .op(Opcode::Assign)
                .var(a)
                .op(Opcode::LParen)
                .int_lit(0)
                .op(Opcode::RParen)
                .int_lit(1)
                .nul(),
        )
        .line(
            Line::new(40)
                .op(Opcode::Assign)
                .var(b)
                .op(Opcode::LParen)
                .int_lit(0)
                .op(Opcode::RParen)
                .int_lit(2)
                .nul(),
        )
        .line(
            Line::new(50)
                .op(Opcode::Swap)
                .var(a)
                .op(Opcode::LParen)
                .op(Opcode::RParen)
                .op(Opcode::Comma)
                .var(b)
                .op(Opcode::LParen)
                .op(Opcode::RParen)
                .nul(),
        )
        .line(
            Line::new(60)
                .op(Opcode::Print)
                .var(a)
                .op(Opcode::LParen)
                .int_lit(0)
                .op(Opcode::RParen)
                .nul(),
        )
        .line(Line::new(70).op(Opcode::End).nul())
        .build();
    let mut interpreter = run_with(program, symbols);
    interpreter.run();
    assert_eq!(interpreter.host.output_text(), "2\r\n");
}

/// `SWAP a%, b%` (plain scalars) exchanges their values.
#[test]
fn swap_exchanges_scalars() {
    let mut symbols = SymbolTable::new();
    let a = var(&mut symbols, b"a%");
    let b = var(&mut symbols, b"b%");
    let program = Builder::new()
        .line(Line::new(10).op(Opcode::Assign).var(a).int_lit(1).nul())
        .line(Line::new(20).op(Opcode::Assign).var(b).int_lit(2).nul())
        .line(Line::new(30).op(Opcode::Swap).var(a).op(Opcode::Comma).var(b).nul())
        .line(Line::new(40).op(Opcode::Print).var(a).nul())
        .line(Line::new(50).op(Opcode::End).nul())
        .build();
    let mut interpreter = run_with(program, symbols);
    interpreter.run();
    assert_eq!(interpreter.host.output_text(), "2\r\n");
}

/// `DATA`/`READ`/`RESTORE`: values are read back in textual order, and
/// `RESTORE` rewinds the cursor to the named line.
#[test]
fn data_read_restore_round_trip() {
    let mut symbols = SymbolTable::new();
    let x = var(&mut symbols, b"x%");
    let y = var(&mut symbols, b"y%");
    let program = Builder::new()
        .line(Line::new(10).source(b"10,20").op(Opcode::Data).nul())
        .line(Line::new(20).op(Opcode::Read).var(x).op(Opcode::Comma).var(y).nul())
        .line(Line::new(30).op(Opcode::Print).var(x).nul())
        .line(Line::new(40).op(Opcode::Print).var(y).nul())
        .line(Line::new(50).op(Opcode::Restore).line_num_placeholder().nul())
        .line(Line::new(60).op(Opcode::Read).var(x).nul())
        .line(Line::new(70).op(Opcode::Print).var(x).nul())
        .line(Line::new(80).op(Opcode::End).nul())
        .build();
    let mut interpreter = run_with(program, symbols);
    let restore_at = interpreter.program.find_line(50).unwrap();
    let restore_opcode_at = interpreter.program.exec_start(restore_at).unwrap();
    patch_target(&mut interpreter.program, restore_opcode_at, 10);

    interpreter.run();
    assert_eq!(interpreter.host.output_text(), "10\r\n20\r\n10\r\n");
}

/// A quoted `DATA` string field reads back with its quotes stripped, and
/// a comma inside the quotes does not split the field.
#[test]
fn data_read_quoted_string_field() {
    let mut symbols = SymbolTable::new();
    let a = var(&mut symbols, b"a%");
    let b = var(&mut symbols, b"b%");
    let c = var(&mut symbols, b"c$");
    let d = var(&mut symbols, b"d%");
    let program = Builder::new()
        .line(Line::new(10).source(b"1,2,\"three\",4").op(Opcode::Data).nul())
        .line(
            Line::new(20)
                .op(Opcode::Read)
                .var(a)
                .op(Opcode::Comma)
                .var(b)
                .op(Opcode::Comma)
                .var(c)
                .op(Opcode::Comma)
                .var(d)
                .nul(),
        )
        .line(Line::new(30).op(Opcode::Print).var(c).nul())
        .line(Line::new(40).op(Opcode::Print).var(d).nul())
        .line(Line::new(50).op(Opcode::End).nul())
        .build();
    let mut interpreter = run_with(program, symbols);
    interpreter.run();
    assert_eq!(interpreter.host.output_text(), "three\r\n4\r\n");
}

/// A `DATA` string field with an embedded comma, wrapped in quotes, is
/// read as one field rather than splitting at the comma.
#[test]
fn data_read_quoted_string_with_embedded_comma() {
    let mut symbols = SymbolTable::new();
    let a = var(&mut symbols, b"a$");
    let b = var(&mut symbols, b"b%");
    let program = Builder::new()
        .line(Line::new(10).source(b"\"hello, world\",42").op(Opcode::Data).nul())
        .line(Line::new(20).op(Opcode::Read).var(a).op(Opcode::Comma).var(b).nul())
        .line(Line::new(30).op(Opcode::Print).var(a).nul())
        .line(Line::new(40).op(Opcode::Print).var(b).nul())
        .line(Line::new(50).op(Opcode::End).nul())
        .build();
    let mut interpreter = run_with(program, symbols);
    interpreter.run();
    assert_eq!(interpreter.host.output_text(), "hello, world\r\n42\r\n");
}

/// A `PROC` with a `RETURN`-flagged formal writes its final value back to
/// the caller's own variable at `ENDPROC`, and leaves no `RETPARM`/`Proc`
/// frame behind.
#[test]
fn proc_return_parameter_writes_back_to_caller() {
    let mut symbols = SymbolTable::new();
    let x = var(&mut symbols, b"x%");
    let formal_a = var(&mut symbols, b"a%");
    let proc_id = symbols.insert(None, NameKind::Proc, b"setval", SymbolPayload::Pending);

    let mut program = Builder::new()
        .line(Line::new(10).op(Opcode::Assign).var(x).int_lit(7).nul())
        .line(
            Line::new(20)
                .op(Opcode::FnProcCall)
                .u32(proc_id.0)
                .op(Opcode::LParen)
                .var(x)
                .op(Opcode::RParen)
                .nul(),
        )
        .line(Line::new(30).op(Opcode::Print).var(x).nul())
        .line(Line::new(40).op(Opcode::End).nul())
        .line(
            Line::new(100)
                .op(Opcode::Assign)
                .var(formal_a)
                .int_lit(14)
                .nul(),
        )
        .line(Line::new(110).op(Opcode::EndProc).nul())
        .build();

    let body_at = program.find_line(100).unwrap();
    let entry_point = program.exec_start(body_at).unwrap() as u32;
    symbols.bind_proc_fn(
        proc_id,
        crate::symbol::ProcFnDef {
            params: vec![crate::symbol::ParamDef { name: b"a%".to_vec(), is_return: true }],
            entry_point,
            owner: None,
        },
    );

    let mut interpreter = run_with(program, symbols);
    interpreter.run();
    assert_eq!(interpreter.host.output_text(), "14\r\n");
    assert_eq!(interpreter.control.len(), 0);
}

/// `CASE`/`WHEN`/`OTHERWISE`: the first matching `WHEN` wins, and falling
/// out of its body skips straight past `ENDCASE` rather than falling into
/// the next arm.
#[test]
fn case_picks_first_matching_when_arm() {
    let mut symbols = SymbolTable::new();
    let x = var(&mut symbols, b"x$");
    let program = Builder::new()
        .line(Line::new(10).op(Opcode::Assign).var(x).str_lit(b"hi").nul())
        .line(
            Line::new(20)
                .op(Opcode::XCase)
                .reserve(crate::token::LOFFSIZE)
                .var(x)
                .nul(),
        )
        .line(
            Line::new(30)
                .op(Opcode::XWhen)
                .reserve(OFFSIZE)
                .str_lit(b"hello")
                .byte(crate::token::COLON)
                .op(Opcode::Print)
                .int_lit(1)
                .nul(),
        )
        .line(
            Line::new(40)
                .op(Opcode::XWhen)
                .reserve(OFFSIZE)
                .str_lit(b"hi")
                .op(Opcode::Comma)
                .str_lit(b"hey")
                .byte(crate::token::COLON)
                .op(Opcode::Print)
                .int_lit(2)
                .nul(),
        )
        .line(
            Line::new(50)
                .op(Opcode::XOtherwise)
                .reserve(OFFSIZE)
                .op(Opcode::Print)
                .int_lit(3)
                .nul(),
        )
        .line(Line::new(60).op(Opcode::EndCase).nul())
        .line(Line::new(70).op(Opcode::End).nul())
        .build();
    let mut interpreter = run_with(program, symbols);
    interpreter.run();
    assert_eq!(interpreter.host.output_text(), "2\r\n");
}

/// `ON ERROR LOCAL`: an `ERROR` statement jumps to the nearest handler,
/// which reads `ERR` and continues past it.
#[test]
fn on_error_local_catches_user_error() {
    let mut symbols = SymbolTable::new();
    let caught = var(&mut symbols, b"caught%");
    let program = Builder::new()
        .line(Line::new(10).op(Opcode::Assign).var(caught).int_lit(0).nul())
        .line(Line::new(20).op(Opcode::OnError).line_num_placeholder().nul())
        .line(Line::new(30).op(Opcode::ErrorStmt).int_lit(99).str_lit(b"boom").nul())
        .line(Line::new(100).op(Opcode::Assign).var(caught).op(Opcode::ErrFunc).nul())
        .line(Line::new(110).op(Opcode::Print).var(caught).nul())
        .line(Line::new(120).op(Opcode::End).nul())
        .build();
    let mut interpreter = run_with(program, symbols);
    let on_error_at = interpreter.program.find_line(20).unwrap();
    let on_error_opcode_at = interpreter.program.exec_start(on_error_at).unwrap();
    patch_target(&mut interpreter.program, on_error_opcode_at, 100);

    interpreter.run();
    assert_eq!(interpreter.host.output_text(), "99\r\n");
}

#[test]
fn unhandled_user_error_stops_the_run() {
    let program = Builder::new()
        .line(Line::new(10).op(Opcode::ErrorStmt).int_lit(17).str_lit(b"nope").nul())
        .line(Line::new(20).op(Opcode::End).nul())
        .build();
    let mut interpreter = run_with(program, SymbolTable::new());
    match interpreter.run() {
        StopReason::UnhandledError(BasicError::User { number, .. }) => assert_eq!(number, 17),
        other => panic!("expected a User error, got {other:?}"),
    }
}

/// A [`NullHost`] run of a trivial program: the host trait boundary is
/// satisfiable with no real OS underneath.
#[test]
fn null_host_runs_a_trivial_program() {
    let program = Builder::new().line(Line::new(10).op(Opcode::End).nul()).build();
    let mut interpreter =
        Interpreter::new(program, RunFlags::default(), Limits::default(), NullHost::default());
    assert_eq!(interpreter.run(), StopReason::End { value: None });
}

#[test]
fn quit_reports_its_exit_code() {
    let program = Builder::new().line(Line::new(10).op(Opcode::Quit).int_lit(7).nul()).build();
    let mut interpreter = run_with(program, SymbolTable::new());
    assert_eq!(interpreter.run(), StopReason::Quit { code: 7 });
}

#[test]
fn end_equals_reports_its_value() {
    let program = Builder::new()
        .line(Line::new(10).op(Opcode::EndEquals).int_lit(42).nul())
        .build();
    let mut interpreter = run_with(program, SymbolTable::new());
    assert_eq!(interpreter.run(), StopReason::End { value: Some(42) });
}

#[test]
fn type_mismatch_subtracting_number_from_string() {
    let program = Builder::new()
        .line(Line::new(10).op(Opcode::Print).str_lit(b"x").binop(BinOp::Sub).int_lit(1).nul())
        .build();
    let mut interpreter = run_with(program, SymbolTable::new());
    match interpreter.run() {
        StopReason::UnhandledError(BasicError::TypeStr) => {}
        other => panic!("expected TypeStr, got {other:?}"),
    }
}

#[test]
fn division_by_zero_is_a_range_error() {
    let program = Builder::new()
        .line(Line::new(10).op(Opcode::Print).int_lit(1).binop(BinOp::Div).int_lit(0).nul())
        .build();
    let mut interpreter = run_with(program, SymbolTable::new());
    match interpreter.run() {
        StopReason::UnhandledError(BasicError::Range) => {}
        other => panic!("expected Range, got {other:?}"),
    }
}

/// `GOTO` to a line number the program never defines: the unresolved
/// `XLineNum` form carries the literal line number, not an offset, so
/// resolving it goes through `Program::find_line` and fails with
/// `LineMiss` — unlike the already-resolved form the other `GOTO`/`GOSUB`
/// tests patch directly.
#[test]
fn undefined_line_number_is_a_line_miss_error() {
    let program = Builder::new()
        .line(Line::new(10).op(Opcode::Goto).op(Opcode::XLineNum).u32(999).nul())
        .build();
    let mut interpreter = run_with(program, SymbolTable::new());
    match interpreter.run() {
        StopReason::UnhandledError(BasicError::LineMiss) => {}
        other => panic!("expected LineMiss, got {other:?}"),
    }
}
