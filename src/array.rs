//! Array lifecycle (spec §4.11): heap arrays, stack-local arrays, and
//! `DIM HIMEM` off-heap arrays. Descriptors live in an arena
//! ([`ArrayArena`]) addressed by [`ArrayId`] rather than behind a pointer,
//! per the "model with indices into the symbol arena" design note (spec
//! §9) — `SWAP`'s back-pointer fixup (Testable Property 7) becomes a plain
//! index rewrite instead of a raw-pointer patch.

use crate::error::{BasicError, Result};
use crate::symbol::SymbolId;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArrayId(pub u32);

/// Where an array's element storage lives. Fixed at creation time (spec
/// §3, "Lifecycles").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayStorage {
    /// Allocated from the workspace heap; reclaimed at run end or when its
    /// owning scope (program or library) is cleared.
    Heap,
    /// Allocated on the control stack inside a `LOCARRAY` frame; reclaimed
    /// when that frame unwinds (`PROC`/`FN` return or error unwind).
    StackLocal,
    /// Allocated via `DIM HIMEM`, outside the workspace. Explicitly freed
    /// by `CLEAR HIMEM [array]` or at end of run.
    OffHeap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Int,
    Int64,
    U8,
    Float,
    Str,
}

#[derive(Debug, Clone)]
pub enum ElementStore {
    Int(Vec<i32>),
    Int64(Vec<i64>),
    U8(Vec<u8>),
    Float(Vec<f64>),
    Str(Vec<crate::value::StringValue>),
}

impl ElementStore {
    pub fn len(&self) -> usize {
        match self {
            ElementStore::Int(v) => v.len(),
            ElementStore::Int64(v) => v.len(),
            ElementStore::U8(v) => v.len(),
            ElementStore::Float(v) => v.len(),
            ElementStore::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Result<Value> {
        match self {
            ElementStore::Int(v) => v.get(index).map(|x| Value::Int(*x)),
            ElementStore::Int64(v) => v.get(index).map(|x| Value::Int64(*x)),
            ElementStore::U8(v) => v.get(index).map(|x| Value::U8(*x)),
            ElementStore::Float(v) => v.get(index).map(|x| Value::Float(*x)),
            ElementStore::Str(v) => v.get(index).map(|x| Value::Str(x.clone())),
        }
        .ok_or(BasicError::Range)
    }

    pub fn set(&mut self, index: usize, value: Value) -> Result<()> {
        match (self, value) {
            (ElementStore::Int(v), val) => {
                *v.get_mut(index).ok_or(BasicError::Range)? = val.as_i32()?;
            }
            (ElementStore::Int64(v), val) => {
                *v.get_mut(index).ok_or(BasicError::Range)? = val.as_i64()?;
            }
            (ElementStore::U8(v), val) => {
                *v.get_mut(index).ok_or(BasicError::Range)? = val.as_u8()?;
            }
            (ElementStore::Float(v), val) => {
                *v.get_mut(index).ok_or(BasicError::Range)? = val.as_f64()?;
            }
            (ElementStore::Str(v), Value::Str(s)) => {
                *v.get_mut(index).ok_or(BasicError::Range)? = s;
            }
            (ElementStore::Str(_), _) => return Err(BasicError::TypeStr),
        }
        Ok(())
    }
}

/// Carries: element kind, dimension sizes, storage, and a back-pointer to
/// the owning symbol (spec §3 "Array descriptor").
#[derive(Debug, Clone)]
pub struct ArrayDescriptor {
    pub kind: ElementKind,
    pub dims: Vec<usize>,
    pub storage_class: ArrayStorage,
    pub elements: ElementStore,
    pub owner: SymbolId,
}

impl ArrayDescriptor {
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    /// Row-major linearisation of a multi-dimensional index (spec §3).
    pub fn linear_index(&self, indices: &[usize]) -> Result<usize> {
        if indices.len() != self.dims.len() {
            return Err(BasicError::DimCount);
        }
        let mut index = 0usize;
        for (dim_size, idx) in self.dims.iter().zip(indices.iter()) {
            if *idx >= *dim_size {
                return Err(BasicError::Range);
            }
            index = index * dim_size + idx;
        }
        Ok(index)
    }
}

/// Arena of live array descriptors, addressed by [`ArrayId`].
#[derive(Debug, Default)]
pub struct ArrayArena {
    slots: Vec<Option<ArrayDescriptor>>,
}

impl ArrayArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, descriptor: ArrayDescriptor) -> ArrayId {
        self.slots.push(Some(descriptor));
        ArrayId((self.slots.len() - 1) as u32)
    }

    pub fn get(&self, id: ArrayId) -> Result<&ArrayDescriptor> {
        self.slots
            .get(id.0 as usize)
            .and_then(|s| s.as_ref())
            .ok_or(BasicError::Broken)
    }

    pub fn get_mut(&mut self, id: ArrayId) -> Result<&mut ArrayDescriptor> {
        self.slots
            .get_mut(id.0 as usize)
            .and_then(|s| s.as_mut())
            .ok_or(BasicError::Broken)
    }

    /// Destroy an array (deallocate its storage). Used at frame unwind for
    /// `StackLocal` arrays and at `CLEAR HIMEM`/run-end for `OffHeap` ones.
    pub fn destroy(&mut self, id: ArrayId) {
        if let Some(slot) = self.slots.get_mut(id.0 as usize) {
            *slot = None;
        }
    }

    /// Exchange the storage (and hence the element data) of two arrays in
    /// place, keeping each slot's identity (and therefore each owning
    /// symbol's `ArrayId`) untouched — `SWAP a(),b()` fixes up the *owner*
    /// symbols by swapping their `ArrayId` link; this method is the
    /// low-level "exchange the payloads" half for when both are already
    /// otherwise identical descriptors pointing at the same owner slot.
    pub fn swap_contents(&mut self, a: ArrayId, b: ArrayId) -> Result<()> {
        if a == b {
            return Ok(());
        }
        let (lo, hi) = if a.0 < b.0 { (a, b) } else { (b, a) };
        let (left, right) = self.slots.split_at_mut(hi.0 as usize);
        let a_slot = left[lo.0 as usize].as_mut().ok_or(BasicError::Broken)?;
        let b_slot = right[0].as_mut().ok_or(BasicError::Broken)?;
        std::mem::swap(&mut a_slot.kind, &mut b_slot.kind);
        std::mem::swap(&mut a_slot.dims, &mut b_slot.dims);
        std::mem::swap(&mut a_slot.elements, &mut b_slot.elements);
        std::mem::swap(&mut a_slot.storage_class, &mut b_slot.storage_class);
        Ok(())
    }
}
