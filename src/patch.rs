//! The patcher (spec §4.1/§4.5/§4.6/§4.7/§4.10, §9 "self-modifying token
//! stream"): first-execution rewrites of `X*` tokens into resolved forms,
//! filling in offsets, pointers, and jump tables in place. Every function
//! here is idempotent to call twice on an already-resolved opcode — the
//! dispatcher only calls them when it sees the unresolved form, but the
//! rewrite itself never re-reads state it already overwrote (spec
//! Testable Property 4).

use crate::case_table::{CaseArm, CaseTable, CaseTableArena, CaseTableId};
use crate::config::{Limits, RunFlags};
use crate::error::{BasicError, Result};
use crate::program::Program;
use crate::symbol::{LibraryId, NameKind, SymbolId, SymbolPayload, SymbolTable};
use crate::token::Opcode;

/// Read a name record: `[len: u8][bytes; len]` at `at`, used by `XVAR`'s
/// and `XFNPROCALL`'s operand, which point at this record instead of
/// embedding the name inline (keeping the opcode's own operand width
/// fixed across the unresolved/resolved rewrite, spec §6).
fn read_name_record(program: &Program, at: usize) -> Result<Vec<u8>> {
    let len = program.byte(at)? as usize;
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        out.push(program.byte(at + 1 + i)?);
    }
    Ok(out)
}

/// `XLINENUM` → `LINENUM`: the operand holds a literal line number before
/// patching and the line's absolute byte offset afterwards (spec §4.1).
pub fn patch_line_num(program: &mut Program, opcode_offset: usize) -> Result<usize> {
    let line_number = program.read_long_target(opcode_offset)? as u16;
    let target = program.find_line(line_number)?;
    program.patch_opcode(opcode_offset, Opcode::LineNum)?;
    program.patch_long(opcode_offset, target as u32)?;
    log::debug!("patch XLINENUM -> LINENUM at {opcode_offset}: line {line_number} -> offset {target}");
    Ok(target)
}

/// `XVAR` → `VAR`: resolves a variable reference to a [`SymbolId`], baking
/// the id into the same operand slot that held the name-record pointer
/// (spec §4.10).
pub fn patch_var(
    program: &mut Program,
    opcode_offset: usize,
    symbols: &mut SymbolTable,
    owner: Option<LibraryId>,
) -> Result<SymbolId> {
    let name_at = program.read_long_target(opcode_offset)?;
    let name = read_name_record(program, name_at)?;
    let id = symbols.insert(owner, NameKind::Variable, &name, SymbolPayload::Pending);
    program.patch_opcode(opcode_offset, Opcode::Var)?;
    program.patch_long(opcode_offset, id.0)?;
    log::debug!("patch XVAR -> VAR at {opcode_offset}: {:?} -> {id:?}", String::from_utf8_lossy(&name));
    Ok(id)
}

/// `XWHILE` → `WHILE`: fills in the fall-through destination (the
/// statement after the matching `ENDWHILE`) so later iterations don't
/// re-scan (spec §4.4).
pub fn patch_while(program: &mut Program, opcode_offset: usize) -> Result<usize> {
    let body = opcode_offset + 1 + crate::token::OFFSIZE;
    let end = scan_matching_end(program, body, Opcode::EndWhile, &[])?;
    program.patch_opcode(opcode_offset, Opcode::While)?;
    program.patch_offset(opcode_offset, end)?;
    log::debug!("patch XWHILE -> WHILE at {opcode_offset}: fall-through -> {end}");
    Ok(end)
}

/// Scan forward from `from` for the next `target` opcode at nesting depth
/// zero. `openers` lists opcodes that increase the nesting depth (so a
/// nested occurrence of `target` is skipped). Used by `WHILE`/`ELSE`/
/// `WHEN`/`CASE` patchers, which all share this "find my own closer"
/// shape (spec §4.5/§4.6's "accounting for nested ... IFs").
fn scan_matching_end(
    program: &Program,
    from: usize,
    target: Opcode,
    openers: &[Opcode],
) -> Result<usize> {
    let mut offset = from;
    let mut depth: u32 = 0;
    loop {
        if program.is_end_of_program(offset) {
            return Err(BasicError::EndIf);
        }
        let byte = program.byte(offset)?;
        let opcode = Opcode::try_from(byte).ok();
        if let Some(op) = opcode {
            if op == target {
                if depth == 0 {
                    return Ok(offset + 1 + op.fixed_operand_len().unwrap_or(0));
                }
                depth -= 1;
                offset += 1 + op.fixed_operand_len().unwrap_or(0);
                continue;
            }
            if openers.contains(&op) {
                depth += 1;
            }
            offset += 1 + op.fixed_operand_len().unwrap_or(0);
        } else {
            offset += 1;
        }
    }
}

/// `XELSE`/`XLHELSE`/`XWHEN`/`XOTHERWISE` → their resolved forms: all fill
/// in "offset to the token after the matching `ENDIF`/`ENDCASE`" the same
/// way (spec §4.5).
pub fn patch_branch_to_end(
    program: &mut Program,
    opcode_offset: usize,
    unresolved: Opcode,
    end_marker: Opcode,
    openers: &[Opcode],
) -> Result<usize> {
    let resolved = unresolved.resolved().ok_or(BasicError::Broken)?;
    let after_operand = opcode_offset + 1 + unresolved.fixed_operand_len().unwrap_or(0);
    let target = scan_matching_end(program, after_operand, end_marker, openers)?;
    program.patch_opcode(opcode_offset, resolved)?;
    program.patch_offset(opcode_offset, target)?;
    log::debug!("patch {unresolved:?} -> {resolved:?} at {opcode_offset}: -> {target}");
    Ok(target)
}

/// `XIF` → `BLOCKIF`/`SINGLIF` (spec §4.5). Distinguishes single-line from
/// block `IF` by whether `THEN` is the last token on the line; this crate
/// has no separate `THEN` opcode (it's consumed by the tokeniser-shaped
/// surface, not the executable token stream), so the distinguishing bit is
/// passed in by the caller, which scanned the source-text section for the
/// trailing `THEN` (the only place that information still exists, per
/// spec §3's "source-tokens section ... backing store for ... context").
pub fn patch_if(
    program: &mut Program,
    opcode_offset: usize,
    then_is_last_on_line: bool,
    cascade_nested_block_if: bool,
    flags: &RunFlags,
) -> Result<(usize, usize)> {
    let is_block = then_is_last_on_line
        || (flags.cascade_if_tweak && cascade_nested_block_if);
    let after_opcode = opcode_offset + 1;
    if is_block {
        let then_target = program.next_line_offset(line_start_of(program, opcode_offset)?)?;
        let else_target =
            scan_matching_end(program, after_opcode, Opcode::EndIf, &[Opcode::XIf, Opcode::BlockIf])?;
        program.patch_opcode(opcode_offset, Opcode::BlockIf)?;
        program.patch_offset(opcode_offset, then_target)?;
        program.patch_offset(opcode_offset + crate::token::OFFSIZE, else_target)?;
        log::debug!(
            "patch XIF -> BLOCKIF at {opcode_offset}: then={then_target} else={else_target}"
        );
        Ok((then_target, else_target))
    } else {
        program.patch_opcode(opcode_offset, Opcode::SingLif)?;
        log::debug!("patch XIF -> SINGLIF at {opcode_offset}");
        Ok((after_opcode, after_opcode))
    }
}

fn line_start_of(program: &Program, mut offset: usize) -> Result<usize> {
    let mut start = program.start();
    loop {
        if start >= offset {
            return Ok(start.min(offset));
        }
        let next = program.next_line_offset(start)?;
        if next > offset {
            return Ok(start);
        }
        start = next;
    }
}

/// `XCASE` → `CASE` (spec §4.6): scans forward collecting every `WHEN`'s
/// value-list/body pair and the optional `OTHERWISE`, stopping at the
/// matching `ENDCASE`. Guarded by [`Limits::max_case_arms`].
pub fn patch_case(
    program: &mut Program,
    opcode_offset: usize,
    arena: &mut CaseTableArena,
    limits: &Limits,
) -> Result<CaseTableId> {
    let mut arms = Vec::new();
    let mut otherwise = None;
    let mut branch_opcodes = Vec::new();
    let mut offset = opcode_offset + 1;
    let mut depth: u32 = 0;
    loop {
        if program.is_end_of_program(offset) {
            return Err(BasicError::EndCase);
        }
        let byte = program.byte(offset)?;
        let Ok(op) = Opcode::try_from(byte) else {
            offset += 1;
            continue;
        };
        match op {
            Opcode::XCase | Opcode::Case => {
                depth += 1;
                offset += 1 + op.fixed_operand_len().unwrap_or(0);
            }
            Opcode::EndCase if depth > 0 => {
                depth -= 1;
                offset += 1;
            }
            Opcode::EndCase => {
                offset += 1;
                break;
            }
            Opcode::XWhen | Opcode::When if depth == 0 => {
                branch_opcodes.push(offset);
                let values_start = offset + 1 + op.fixed_operand_len().unwrap_or(0);
                let body_start = skip_to_statement_end(program, values_start)?;
                arms.push(CaseArm {
                    values_start,
                    body_start,
                });
                if arms.len() > limits.max_case_arms {
                    return Err(BasicError::WhenCount);
                }
                offset = body_start;
            }
            Opcode::XOtherwise | Opcode::Otherwise if depth == 0 => {
                branch_opcodes.push(offset);
                let body_start = offset + 1 + op.fixed_operand_len().unwrap_or(0);
                otherwise = Some(body_start);
                offset = body_start;
            }
            other => {
                offset += 1 + other.fixed_operand_len().unwrap_or(0);
            }
        }
    }
    let arm_count = arms.len();
    let fallthrough = offset;
    let table = CaseTable {
        arms,
        otherwise,
        fallthrough,
    };
    let id = arena.insert(table, limits)?;
    program.patch_opcode(opcode_offset, Opcode::Case)?;
    program.patch_long(opcode_offset, id.0)?;
    // Every `WHEN`/`OTHERWISE` patches itself to load `fallthrough` and
    // jump, the same mechanism `ELSE` uses: straight-line fall-through out
    // of a chosen arm's body lands on the next arm's own opcode, which
    // must skip past `ENDCASE` rather than being evaluated as another
    // candidate.
    for branch_at in branch_opcodes {
        let unresolved = Opcode::try_from(program.byte(branch_at)?).map_err(|_| BasicError::Broken)?;
        let resolved = unresolved.resolved().ok_or(BasicError::Broken)?;
        program.patch_opcode(branch_at, resolved)?;
        program.patch_offset(branch_at, fallthrough)?;
    }
    log::debug!("patch XCASE -> CASE at {opcode_offset}: {arm_count} WHEN arm(s), table {id:?}");
    Ok(id)
}

/// Skip forward from `offset` to the first byte after the next
/// statement-end marker (`:` or NUL), used to locate a `WHEN` arm's body
/// (the statement immediately following its value list).
fn skip_to_statement_end(program: &Program, mut offset: usize) -> Result<usize> {
    loop {
        if program.is_statement_end(offset)? {
            return Ok(offset + 1);
        }
        let byte = program.byte(offset)?;
        let step = Opcode::try_from(byte)
            .ok()
            .and_then(|op| op.fixed_operand_len())
            .map(|w| 1 + w)
            .unwrap_or(1);
        offset += step;
    }
}

/// Layout of a `DEF PROC`/`DEF FN` header immediately following the `Def`
/// opcode byte: `[kind_marker: u8][name_len: u8][name bytes]
/// [param_count: u8] ([is_return: u8][name_len: u8][name bytes]){count}`.
/// `kind_marker` is 0 for `PROC`, 1 for `FN`, matching the marker byte
/// `patch_fn_proc_call`'s name record carries. The header is immediately
/// followed by the body's first executable token, which becomes
/// `ProcFnDef::entry_point`.
pub struct DefHeader {
    pub kind: NameKind,
    pub name: Vec<u8>,
    pub params: Vec<crate::symbol::ParamDef>,
    pub entry_point: u32,
    /// Offset of the first byte after the header — where the `Def`
    /// statement handler resumes straight-line execution.
    pub after_header: usize,
}

/// Public wrapper over [`read_def_header`] for the `Def` statement handler
/// (`crate::dispatch`), which only needs to skip the header, not bind it.
pub fn read_def_header_public(program: &Program, def_opcode_offset: usize) -> Result<DefHeader> {
    read_def_header(program, def_opcode_offset)
}

fn read_def_header(program: &Program, def_opcode_offset: usize) -> Result<DefHeader> {
    let mut at = def_opcode_offset + 1;
    let kind_marker = program.byte(at)?;
    at += 1;
    let kind = if kind_marker == 0 { NameKind::Proc } else { NameKind::Fn };
    let name_len = program.byte(at)? as usize;
    at += 1;
    let mut name = Vec::with_capacity(name_len);
    for _ in 0..name_len {
        name.push(program.byte(at)?);
        at += 1;
    }
    let param_count = program.byte(at)? as usize;
    at += 1;
    let mut params = Vec::with_capacity(param_count);
    for _ in 0..param_count {
        let is_return = program.byte(at)? != 0;
        at += 1;
        let plen = program.byte(at)? as usize;
        at += 1;
        let mut pname = Vec::with_capacity(plen);
        for _ in 0..plen {
            pname.push(program.byte(at)?);
            at += 1;
        }
        params.push(crate::symbol::ParamDef { name: pname, is_return });
    }
    Ok(DefHeader {
        kind,
        name,
        params,
        entry_point: at as u32,
        after_header: at,
    })
}

/// Scan `[start, end)` for every `DEF PROC`/`DEF FN` header and bind each
/// one's [`crate::symbol::ProcFnDef`] into `owner`'s scope, resolving any
/// `Pending` placeholder `patch_fn_proc_call` left behind. Run once per
/// scope (program or library) the first time a call into it misses —
/// mirrors the "library search is lazy, scanned once" rule (spec §4.10).
pub fn scan_defs_in_range(
    program: &Program,
    start: usize,
    end: usize,
    symbols: &mut SymbolTable,
    owner: Option<LibraryId>,
) -> Result<()> {
    let mut offset = start;
    while offset < end {
        if program.is_end_of_program(offset) {
            break;
        }
        let byte = program.byte(offset)?;
        if byte == Opcode::Def as u8 {
            let header = read_def_header(program, offset)?;
            let id = symbols.insert(owner, header.kind, &header.name, SymbolPayload::Pending);
            symbols.bind_proc_fn(
                id,
                crate::symbol::ProcFnDef {
                    params: header.params,
                    entry_point: header.entry_point,
                    owner,
                },
            );
            offset = header.after_header;
            continue;
        }
        let Ok(op) = Opcode::try_from(byte) else {
            offset += 1;
            continue;
        };
        offset += 1 + op.fixed_operand_len().unwrap_or(0);
    }
    Ok(())
}

/// `XFNPROCALL` → `FNPROCALL` (spec §4.10): resolves a `PROC`/`FN` name
/// against the program table, then declared libraries in order. The
/// result (found or freshly inserted as `Pending`, awaiting its `DEF` to
/// be scanned) is baked into the operand slot so later calls skip
/// resolution entirely.
pub fn patch_fn_proc_call(
    program: &mut Program,
    opcode_offset: usize,
    symbols: &mut SymbolTable,
    declared_libraries: &[LibraryId],
) -> Result<SymbolId> {
    let name_at = program.read_long_target(opcode_offset)?;
    let record = read_name_record(program, name_at)?;
    let (kind_marker, name) = record.split_first().ok_or(BasicError::Syntax)?;
    let kind = if *kind_marker == 0 {
        NameKind::Proc
    } else {
        NameKind::Fn
    };
    let id = symbols
        .lookup(None, kind, name)
        .or_else(|| declared_libraries.iter().find_map(|lib| symbols.lookup(Some(*lib), kind, name)))
        .unwrap_or_else(|| symbols.insert(None, kind, name, SymbolPayload::Pending));
    program.patch_opcode(opcode_offset, Opcode::FnProcCall)?;
    program.patch_long(opcode_offset, id.0)?;
    log::debug!(
        "patch XFNPROCALL -> FNPROCALL at {opcode_offset}: {:?} -> {id:?}",
        String::from_utf8_lossy(name)
    );
    Ok(id)
}
