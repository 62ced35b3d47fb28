//! The value model (spec §3 "Values", §4.2): a tagged union over scalar
//! kinds plus array and string variants, with the numeric-promotion ladder
//! resolved from `original_source` (spec SPEC_FULL.md §3 supplement).

use crate::array::ArrayId;
use crate::error::{BasicError, Result};

/// The BASIC boolean encoding: comparisons push `-1` for true, `0` for
/// false (`original_source`'s `BASTRUE`/`BASFALSE`), not Rust's `bool`.
pub const TRUE_VALUE: i32 = -1;
pub const FALSE_VALUE: i32 = 0;

#[inline]
pub fn bool_to_basic(b: bool) -> i32 {
    if b {
        TRUE_VALUE
    } else {
        FALSE_VALUE
    }
}

/// A BASIC string's backing storage. `Borrowed` never gets freed by the
/// stack (it aliases a line's source text or another variable's storage);
/// `Temp` owns a heap allocation and is freed exactly once via `Drop` —
/// Rust's ownership rules give us the "every temp-string popped is freed
/// exactly once" invariant (spec §3) for free, rather than needing a
/// manual "is this a temp" flag plus a manual free call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StringValue {
    Borrowed(std::rc::Rc<[u8]>),
    Temp(Vec<u8>),
}

impl StringValue {
    pub fn temp(bytes: impl Into<Vec<u8>>) -> Self {
        StringValue::Temp(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            StringValue::Borrowed(rc) => rc,
            StringValue::Temp(v) => v,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// Copy into a fresh temp, detaching from whatever storage this value
    /// currently borrows. Used by `=`'s return-value handling (spec §4.7):
    /// a string result that references local-variable storage must be
    /// copied before the locals are torn down.
    pub fn into_owned_temp(self) -> Self {
        match self {
            StringValue::Temp(v) => StringValue::Temp(v),
            StringValue::Borrowed(rc) => StringValue::Temp(rc.to_vec()),
        }
    }
}

/// A tagged value. Array variants hold an [`ArrayId`] (an index into the
/// array arena) rather than a pointer, per the "model with indices into the
/// symbol arena" design note (spec §9).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U8(u8),
    Int(i32),
    Int64(i64),
    Float(f64),
    Str(StringValue),
    Array(ArrayId),
}

/// Which numeric representation an arithmetic result should take, after
/// promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumKind {
    Int,
    Int64,
    Float,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::U8(_) => "u8",
            Value::Int(_) => "int",
            Value::Int64(_) => "int64",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::U8(_) | Value::Int(_) | Value::Int64(_) | Value::Float(_)
        )
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::Str(_))
    }

    /// Widen to the common kind of `self` and `other`, per the promotion
    /// ladder `u8 -> i32 -> i64 -> f64`.
    pub fn common_kind(&self, other: &Value) -> Result<NumKind> {
        if !self.is_numeric() || !other.is_numeric() {
            return Err(BasicError::TypeNum);
        }
        Ok(rank(self).max(rank(other)))
    }

    /// Coerce to `i32`, truncating/erroring on overflow exactly like
    /// `pop_anynum32` (spec §4.2): floats are range-checked, not silently
    /// wrapped.
    pub fn as_i32(&self) -> Result<i32> {
        match self {
            Value::U8(v) => Ok(*v as i32),
            Value::Int(v) => Ok(*v),
            Value::Int64(v) => i32::try_from(*v).map_err(|_| BasicError::Range),
            Value::Float(v) => {
                if *v < i32::MIN as f64 || *v > i32::MAX as f64 {
                    Err(BasicError::Range)
                } else {
                    Ok(*v as i32)
                }
            }
            _ => Err(BasicError::TypeNum),
        }
    }

    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Value::U8(v) => Ok(*v as i64),
            Value::Int(v) => Ok(*v as i64),
            Value::Int64(v) => Ok(*v),
            Value::Float(v) => {
                if *v < i64::MIN as f64 || *v > i64::MAX as f64 {
                    Err(BasicError::Range)
                } else {
                    Ok(*v as i64)
                }
            }
            _ => Err(BasicError::TypeNum),
        }
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Value::U8(v) => Ok(*v as f64),
            Value::Int(v) => Ok(*v as f64),
            Value::Int64(v) => Ok(*v as f64),
            Value::Float(v) => Ok(*v),
            _ => Err(BasicError::TypeNum),
        }
    }

    pub fn as_u8(&self) -> Result<u8> {
        match self {
            Value::U8(v) => Ok(*v),
            other => {
                let n = other.as_i32()?;
                u8::try_from(n).map_err(|_| BasicError::Range)
            }
        }
    }

    pub fn as_str(&self) -> Result<&StringValue> {
        match self {
            Value::Str(s) => Ok(s),
            _ => Err(BasicError::TypeStr),
        }
    }
}

fn rank(v: &Value) -> NumKind {
    match v {
        Value::U8(_) | Value::Int(_) => NumKind::Int,
        Value::Int64(_) => NumKind::Int64,
        Value::Float(_) => NumKind::Float,
        _ => NumKind::Float,
    }
}

/// Structural equality for `CASE` matching (spec §4.6, Testable Property
/// 8/9): numeric values compare by widening to the common kind (so
/// `2 = 2.0` matches); strings compare length-then-bytewise; numeric vs
/// string is a type error.
pub fn case_equal(subject: &Value, candidate: &Value) -> Result<bool> {
    match (subject.is_string(), candidate.is_string()) {
        (true, true) => {
            let a = subject.as_str()?;
            let b = candidate.as_str()?;
            Ok(a.len() == b.len() && a.as_bytes() == b.as_bytes())
        }
        (false, false) => match subject.common_kind(candidate)? {
            NumKind::Int => Ok(subject.as_i32()? == candidate.as_i32()?),
            NumKind::Int64 => Ok(subject.as_i64()? == candidate.as_i64()?),
            NumKind::Float => Ok(subject.as_f64()? == candidate.as_f64()?),
        },
        _ => Err(BasicError::TypeStr),
    }
}
