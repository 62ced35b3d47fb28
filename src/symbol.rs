//! Symbol table and `PROC`/`FN` resolution (spec §4.10): per-owner hash
//! buckets for scalars, arrays, and `PROC`/`FN` definitions, with program
//! and library-private scopes.
//!
//! Storage is an arena ([`SymbolTable::arena`]) addressed by [`SymbolId`]
//! rather than a pointer graph, per the "model with indices into the
//! symbol arena" design note (spec §9): buckets hold `SymbolId`s, not
//! pointers, so there is nothing to invalidate when the arena grows.

use crate::array::ArrayId;
use crate::error::{BasicError, Result};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymbolId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LibraryId(pub u32);

/// The marker byte prefix distinguishing `PROCfoo` from `FNfoo` — two
/// distinct names that would otherwise hash identically (spec §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameKind {
    Variable,
    Proc,
    Fn,
}

/// A formal parameter of a `PROC`/`FN` definition. `is_return` marks a
/// `RETURN`-flagged formal: its final value is copied back to the
/// caller's lvalue at `ENDPROC`/`=` (spec §4.7, Glossary "Return
/// parameter").
#[derive(Debug, Clone)]
pub struct ParamDef {
    pub name: Vec<u8>,
    pub is_return: bool,
}

#[derive(Debug, Clone)]
pub struct ProcFnDef {
    pub params: Vec<ParamDef>,
    /// Absolute byte offset of the first executable token of the body.
    pub entry_point: u32,
    /// The scope formal-parameter names (and any other variable this body
    /// touches) resolve in — the program, or a particular library's
    /// private variable scope, matching wherever the `DEF` itself lives.
    pub owner: Option<LibraryId>,
}

#[derive(Debug, Clone)]
pub enum SymbolPayload {
    Scalar(Value),
    Array(ArrayId),
    ProcFn(ProcFnDef),
    /// A `PROC`/`FN` name seen referenced but not yet resolved to a
    /// definition (pending parameter resolution, spec §3 invariants).
    Pending,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: Vec<u8>,
    pub kind: NameKind,
    pub owner: Option<LibraryId>,
    pub hash: u64,
    pub payload: SymbolPayload,
}

/// One hash-bucket table: either the program's table or one library's
/// private table. Singly linked in spirit (a bucket is a `Vec<SymbolId>`,
/// insertion order unspecified per spec §4.10).
#[derive(Debug)]
struct Scope {
    buckets: Vec<Vec<SymbolId>>,
}

const BUCKET_COUNT: usize = 251; // prime, keeps the polynomial hash spread out

impl Scope {
    fn new() -> Self {
        Scope {
            buckets: (0..BUCKET_COUNT).map(|_| Vec::new()).collect(),
        }
    }
}

/// Polynomial name hash: `h := h*5 XOR byte`, over the name bytes
/// including the `PROC`/`FN` marker discriminant (spec §4.10).
pub fn hash_name(kind: NameKind, name: &[u8]) -> u64 {
    let mut h: u64 = match kind {
        NameKind::Variable => 0,
        NameKind::Proc => 1,
        NameKind::Fn => 2,
    };
    for &b in name {
        h = h.wrapping_mul(5) ^ (b as u64);
    }
    h
}

pub struct SymbolTable {
    arena: Vec<Symbol>,
    program: Scope,
    libraries: Vec<Scope>,
    /// Lazily populated per-library list of `DEF PROC`/`DEF FN` entry
    /// points, scanned on first search of that library (spec §4.10,
    /// "Library searches are lazy").
    library_defs_scanned: Vec<bool>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            arena: Vec::new(),
            program: Scope::new(),
            libraries: Vec::new(),
            library_defs_scanned: Vec::new(),
        }
    }

    pub fn add_library(&mut self) -> LibraryId {
        self.libraries.push(Scope::new());
        self.library_defs_scanned.push(false);
        LibraryId((self.libraries.len() - 1) as u32)
    }

    pub fn library_scanned(&self, lib: LibraryId) -> bool {
        self.library_defs_scanned[lib.0 as usize]
    }

    pub fn mark_library_scanned(&mut self, lib: LibraryId) {
        self.library_defs_scanned[lib.0 as usize] = true;
    }

    fn scope(&self, owner: Option<LibraryId>) -> &Scope {
        match owner {
            None => &self.program,
            Some(id) => &self.libraries[id.0 as usize],
        }
    }

    fn scope_mut(&mut self, owner: Option<LibraryId>) -> &mut Scope {
        match owner {
            None => &mut self.program,
            Some(id) => &mut self.libraries[id.0 as usize],
        }
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.arena[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.arena[id.0 as usize]
    }

    /// Look up a name in one scope only (no library-search fallthrough —
    /// that sequencing lives in `crate::interpreter`, which knows the
    /// declared/installed library order).
    pub fn lookup(&self, owner: Option<LibraryId>, kind: NameKind, name: &[u8]) -> Option<SymbolId> {
        let hash = hash_name(kind, name);
        let bucket = &self.scope(owner).buckets[(hash as usize) % BUCKET_COUNT];
        bucket
            .iter()
            .copied()
            .find(|id| {
                let sym = &self.arena[id.0 as usize];
                sym.kind == kind && sym.name == name
            })
    }

    /// Insert a new symbol, or return the existing one if already present
    /// (first-wins, matching the original's "insertion order within a
    /// bucket is unspecified" — we never need to distinguish duplicates).
    pub fn insert(
        &mut self,
        owner: Option<LibraryId>,
        kind: NameKind,
        name: &[u8],
        payload: SymbolPayload,
    ) -> SymbolId {
        if let Some(existing) = self.lookup(owner, kind, name) {
            return existing;
        }
        let hash = hash_name(kind, name);
        let id = SymbolId(self.arena.len() as u32);
        self.arena.push(Symbol {
            name: name.to_vec(),
            kind,
            owner,
            hash,
            payload,
        });
        let bucket_idx = (hash as usize) % BUCKET_COUNT;
        self.scope_mut(owner).buckets[bucket_idx].push(id);
        id
    }

    /// Allocate a scratch scalar with no name and no scope bucket — used
    /// to bind a non-lvalue actual argument to a `PROC`/`FN` formal
    /// (spec §4.7). Never looked up by name, so dedup doesn't apply.
    pub fn new_temp_scalar(&mut self, value: Value) -> SymbolId {
        let id = SymbolId(self.arena.len() as u32);
        self.arena.push(Symbol {
            name: Vec::new(),
            kind: NameKind::Variable,
            owner: None,
            hash: 0,
            payload: SymbolPayload::Scalar(value),
        });
        id
    }

    pub fn scalar(&self, id: SymbolId) -> Result<&Value> {
        match &self.arena[id.0 as usize].payload {
            SymbolPayload::Scalar(v) => Ok(v),
            _ => Err(BasicError::VarNum),
        }
    }

    pub fn set_scalar(&mut self, id: SymbolId, value: Value) -> Result<()> {
        match &mut self.arena[id.0 as usize].payload {
            SymbolPayload::Scalar(slot) => {
                *slot = value;
                Ok(())
            }
            slot @ SymbolPayload::Pending => {
                *slot = SymbolPayload::Scalar(value);
                Ok(())
            }
            _ => Err(BasicError::VarNum),
        }
    }

    pub fn array_id(&self, id: SymbolId) -> Result<ArrayId> {
        match &self.arena[id.0 as usize].payload {
            SymbolPayload::Array(a) => Ok(*a),
            _ => Err(BasicError::VarNum),
        }
    }

    pub fn bind_array(&mut self, id: SymbolId, array: ArrayId) {
        self.arena[id.0 as usize].payload = SymbolPayload::Array(array);
    }

    pub fn proc_fn_def(&self, id: SymbolId) -> Result<&ProcFnDef> {
        match &self.arena[id.0 as usize].payload {
            SymbolPayload::ProcFn(def) => Ok(def),
            _ => Err(BasicError::FnReturn),
        }
    }

    pub fn bind_proc_fn(&mut self, id: SymbolId, def: ProcFnDef) {
        self.arena[id.0 as usize].payload = SymbolPayload::ProcFn(def);
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}
