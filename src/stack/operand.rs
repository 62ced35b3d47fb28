//! The operand stack (spec §4.2): a LIFO of typed values used transiently
//! for expression evaluation. Empty at every statement boundary (spec §3
//! invariants, Testable Property 1).

use crate::config::Limits;
use crate::error::{BasicError, Result};
use crate::value::{NumKind, StringValue, Value};

#[derive(Debug, Default)]
pub struct OperandStack {
    values: Vec<Value>,
    max_len: usize,
}

impl OperandStack {
    pub fn new(limits: &Limits) -> Self {
        OperandStack {
            values: Vec::new(),
            max_len: limits.max_operand_values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Checks there is room for at least one more entry before pushing
    /// (spec §4.2: "checks that the stack has room for at least
    /// OPSTACKSIZE entries ... overflow fails with a stack-full error").
    fn check_room(&self) -> Result<()> {
        if self.values.len() >= self.max_len {
            Err(BasicError::StackFull)
        } else {
            Ok(())
        }
    }

    pub fn push(&mut self, value: Value) -> Result<()> {
        self.check_room()?;
        self.values.push(value);
        Ok(())
    }

    pub fn push_u8(&mut self, v: u8) -> Result<()> {
        self.push(Value::U8(v))
    }
    pub fn push_int(&mut self, v: i32) -> Result<()> {
        self.push(Value::Int(v))
    }
    pub fn push_int64(&mut self, v: i64) -> Result<()> {
        self.push(Value::Int64(v))
    }
    pub fn push_float(&mut self, v: f64) -> Result<()> {
        self.push(Value::Float(v))
    }
    pub fn push_string(&mut self, v: StringValue) -> Result<()> {
        self.push(Value::Str(v))
    }
    pub fn push_bool(&mut self, v: bool) -> Result<()> {
        self.push_int(crate::value::bool_to_basic(v))
    }

    pub fn pop(&mut self) -> Result<Value> {
        self.values.pop().ok_or(BasicError::Broken)
    }

    pub fn peek(&self) -> Result<&Value> {
        self.values.last().ok_or(BasicError::Broken)
    }

    /// Widen among the three integer kinds (spec §4.2 `pop_any_int`).
    pub fn pop_any_int(&mut self) -> Result<i64> {
        let v = self.pop()?;
        match v {
            Value::U8(x) => Ok(x as i64),
            Value::Int(x) => Ok(x as i64),
            Value::Int64(x) => Ok(x),
            _ => Err(BasicError::TypeNum),
        }
    }

    pub fn pop_any_num32(&mut self) -> Result<i32> {
        let v = self.pop()?;
        v.as_i32()
    }

    pub fn pop_any_num64(&mut self) -> Result<i64> {
        let v = self.pop()?;
        v.as_i64()
    }

    /// Coerce integers to float, or truncate a float with a range check
    /// (spec §4.2 `pop_any_numfp`... actually this coerces *to* float; the
    /// truncating direction is `pop_any_num32`/`pop_any_num64` above).
    pub fn pop_any_numfp(&mut self) -> Result<f64> {
        let v = self.pop()?;
        v.as_f64()
    }

    pub fn pop_string(&mut self) -> Result<StringValue> {
        match self.pop()? {
            Value::Str(s) => Ok(s),
            _ => Err(BasicError::TypeStr),
        }
    }

    pub fn pop_array(&mut self) -> Result<crate::array::ArrayId> {
        match self.pop()? {
            Value::Array(id) => Ok(id),
            _ => Err(BasicError::VarNum),
        }
    }

    pub fn common_num_kind(&self) -> Result<NumKind> {
        let len = self.values.len();
        if len < 2 {
            return Err(BasicError::Broken);
        }
        self.values[len - 1].common_kind(&self.values[len - 2])
    }

    /// True iff the stack is empty, the state required at every statement
    /// boundary (spec §3 invariants, Testable Property 1).
    pub fn assert_empty_at_boundary(&self) -> Result<()> {
        if self.values.is_empty() {
            Ok(())
        } else {
            Err(BasicError::Broken)
        }
    }

    /// Discard down to a saved depth, used when unwinding a call or loop
    /// whose body leaves intermediate values behind (spec §4.7:
    /// "discards any lingering operand-stack entries down to the
    /// PROC/FN frame").
    pub fn truncate(&mut self, len: usize) {
        self.values.truncate(len);
    }
}
