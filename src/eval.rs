//! Expression evaluator (spec §4.2): precedence-climbing over the
//! expression-surface opcodes (`IntLit`/`Int64Lit`/`FloatLit`/`StrLit`,
//! `Var`, `BinOp`, `UnaryMinus`/`UnaryNot`, parens, `FnCall`, `ErrFunc`),
//! feeding and draining [`crate::stack::OperandStack`].
//!
//! The `OPSTACK` control frame from spec §4.2 ("a dedicated frame ... also
//! tests that room exists for a fresh expression") is pushed by the
//! caller around a top-level `eval_expr` call, not by this module — it's
//! bookkeeping for the *caller's* unwind safety, not part of evaluation
//! itself.

use crate::error::{BasicError, Result};
use crate::host::Host;
use crate::interpreter::Interpreter;
use crate::stack::Lvalue;
use crate::symbol::{NameKind, SymbolId, SymbolPayload};
use crate::token::{BinOp, Opcode};
use crate::value::{bool_to_basic, NumKind, StringValue, Value};

/// Binding power of each binary operator; `NOT`/unary minus bind tighter
/// than every binary operator (spec §4.2's expression surface has no
/// separate precedence table, so this follows the conventional BASIC
/// ladder: `OR`/`EOR` < `AND` < comparisons < `+`/`-` < `*`/`/`/`DIV`/`MOD`
/// < `^` (right-associative)).
fn precedence(op: BinOp) -> (u8, bool) {
    use BinOp::*;
    match op {
        Or | Eor => (1, false),
        And => (2, false),
        Eq | Ne | Lt | Gt | Le | Ge => (3, false),
        Add | Sub => (4, false),
        Mul | Div | IntDiv | Mod => (5, false),
        Pow => (6, true),
    }
}

impl<H: Host> Interpreter<H> {
    /// Evaluate one expression starting at `self.current`, leaving exactly
    /// one value on the operand stack and `self.current` positioned just
    /// past the last consumed token (spec Testable Property 2).
    pub fn eval_expr(&mut self) -> Result<()> {
        let value = self.eval_prec(0)?;
        self.operand.push(value)
    }

    pub(crate) fn eval_prec(&mut self, min_bp: u8) -> Result<Value> {
        let mut lhs = self.eval_unary()?;
        loop {
            let Ok(Opcode::BinOp) = self.peek_opcode() else {
                break;
            };
            let op_byte = self.program.byte(self.current + 1)?;
            let op = BinOp::try_from(op_byte).map_err(|_| BasicError::Broken)?;
            let (bp, right_assoc) = precedence(op);
            if bp < min_bp {
                break;
            }
            self.current += 2;
            let next_min = if right_assoc { bp } else { bp + 1 };
            let rhs = self.eval_prec(next_min)?;
            lhs = apply_binop(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn eval_unary(&mut self) -> Result<Value> {
        match self.peek_opcode() {
            Ok(Opcode::UnaryMinus) => {
                self.current += 1;
                let v = self.eval_unary()?;
                negate(&v)
            }
            Ok(Opcode::UnaryNot) => {
                self.current += 1;
                let v = self.eval_unary()?;
                Ok(Value::Int(!v.as_i32()?))
            }
            Ok(Opcode::IndirectByte) => {
                self.current += 1;
                let addr = self.eval_unary()?.as_i64()? as u64;
                Ok(Value::U8(self.workspace.read_u8(crate::workspace::HeapAddr(addr))?))
            }
            Ok(Opcode::IndirectWord) => {
                self.current += 1;
                let addr = self.eval_unary()?.as_i64()? as u64;
                Ok(Value::Int(
                    self.workspace.read_u32(crate::workspace::HeapAddr(addr))? as i32,
                ))
            }
            _ => self.eval_primary(),
        }
    }

    fn eval_primary(&mut self) -> Result<Value> {
        let opcode = self.peek_opcode()?;
        match opcode {
            Opcode::IntLit => {
                let v = self.program.read_u32(self.current + 1)? as i32;
                self.current += 1 + 4;
                Ok(Value::Int(v))
            }
            Opcode::Int64Lit => {
                let hi = self.program.read_u32(self.current + 5)? as u64;
                let lo = self.program.read_u32(self.current + 1)? as u64;
                self.current += 1 + 8;
                Ok(Value::Int64(((hi << 32) | lo) as i64))
            }
            Opcode::FloatLit => {
                let v = self.program.read_f64(self.current + 1)?;
                self.current += 1 + 8;
                Ok(Value::Float(v))
            }
            Opcode::StrLit => {
                let len = self.program.read_u16(self.current + 1)? as usize;
                let start = self.current + 3;
                let mut bytes = Vec::with_capacity(len);
                for i in 0..len {
                    bytes.push(self.program.byte(start + i)?);
                }
                self.current = start + len;
                Ok(Value::Str(StringValue::temp(bytes)))
            }
            Opcode::LParen => {
                self.current += 1;
                let v = self.eval_prec(0)?;
                if self.peek_opcode()? != Opcode::RParen {
                    return Err(BasicError::RpMiss);
                }
                self.current += 1;
                Ok(v)
            }
            Opcode::Var => {
                let id = SymbolId(self.program.read_u32(self.current + 1)?);
                self.current += 1 + crate::token::LOFFSIZE;
                self.eval_variable_reference(id)
            }
            Opcode::ErrFunc => {
                self.current += 1;
                Ok(Value::Int(self.last_error_number))
            }
            Opcode::FnCall => {
                let id = SymbolId(self.program.read_u32(self.current + 1)?);
                self.current += 1 + crate::token::LOFFSIZE;
                self.call_fn(id)
            }
            _ => Err(BasicError::Syntax),
        }
    }

    /// Read a scalar variable, or — if followed by `(`— index into its
    /// array (spec §3 "Array descriptor", row-major linearisation).
    fn eval_variable_reference(&mut self, id: SymbolId) -> Result<Value> {
        if self.peek_opcode() == Ok(Opcode::LParen) {
            self.current += 1;
            let mut indices = Vec::new();
            loop {
                let idx = self.eval_prec(0)?.as_i32()?;
                indices.push(idx as usize);
                match self.peek_opcode()? {
                    Opcode::Comma => {
                        self.current += 1;
                    }
                    Opcode::RParen => {
                        self.current += 1;
                        break;
                    }
                    _ => return Err(BasicError::RpMiss),
                }
            }
            let array_id = self.symbols.array_id(id)?;
            let descriptor = self.arrays.get(array_id)?;
            let linear = descriptor.linear_index(&indices)?;
            descriptor.elements.get(linear)
        } else {
            self.symbols.scalar(id).cloned()
        }
    }

    pub(crate) fn peek_opcode(&self) -> Result<Opcode> {
        let byte = self.program.byte(self.current)?;
        Opcode::try_from(byte).map_err(|_| BasicError::Syntax)
    }

    /// Resolve an lvalue at `self.current` (a `Var`, possibly followed by
    /// an array index, or a `?`/`!` indirection prefix, Glossary
    /// "Lvalue") without evaluating it.
    pub fn parse_lvalue(&mut self) -> Result<Lvalue> {
        match self.peek_opcode()? {
            Opcode::IndirectByte => {
                self.current += 1;
                let addr = self.eval_unary()?.as_i64()? as u64;
                Ok(Lvalue::Indirection(addr))
            }
            Opcode::IndirectWord => {
                self.current += 1;
                let addr = self.eval_unary()?.as_i64()? as u64;
                Ok(Lvalue::IndirectionWord(addr))
            }
            Opcode::Var => {
                let id = SymbolId(self.program.read_u32(self.current + 1)?);
                self.current += 1 + crate::token::LOFFSIZE;
                if self.peek_opcode() == Ok(Opcode::LParen) {
                    self.current += 1;
                    let mut indices = Vec::new();
                    loop {
                        let idx = self.eval_prec(0)?.as_i32()?;
                        indices.push(idx as usize);
                        match self.peek_opcode()? {
                            Opcode::Comma => {
                                self.current += 1;
                            }
                            Opcode::RParen => {
                                self.current += 1;
                                break;
                            }
                            _ => return Err(BasicError::RpMiss),
                        }
                    }
                    let array_id = self.symbols.array_id(id)?;
                    let linear = self.arrays.get(array_id)?.linear_index(&indices)?;
                    Ok(Lvalue::ArrayElem(array_id, linear))
                } else {
                    Ok(Lvalue::Scalar(id))
                }
            }
            _ => Err(BasicError::Syntax),
        }
    }

    pub fn read_lvalue(&self, lvalue: &Lvalue) -> Result<Value> {
        match lvalue {
            Lvalue::Scalar(id) => self.symbols.scalar(*id).cloned(),
            Lvalue::ArrayElem(array, index) => self.arrays.get(*array)?.elements.get(*index),
            Lvalue::Indirection(addr) => {
                Ok(Value::U8(self.workspace.read_u8(crate::workspace::HeapAddr(*addr))?))
            }
            Lvalue::IndirectionWord(addr) => Ok(Value::Int(
                self.workspace.read_u32(crate::workspace::HeapAddr(*addr))? as i32,
            )),
        }
    }

    pub fn write_lvalue(&mut self, lvalue: &Lvalue, value: Value) -> Result<()> {
        match lvalue {
            Lvalue::Scalar(id) => self.symbols.set_scalar(*id, value),
            Lvalue::ArrayElem(array, index) => {
                self.arrays.get_mut(*array)?.elements.set(*index, value)
            }
            Lvalue::Indirection(addr) => {
                self.workspace
                    .write_u8(crate::workspace::HeapAddr(*addr), value.as_u8()?)
            }
            Lvalue::IndirectionWord(addr) => self
                .workspace
                .write_u32(crate::workspace::HeapAddr(*addr), value.as_i32()? as u32),
        }
    }
}

fn negate(v: &Value) -> Result<Value> {
    match v {
        Value::U8(x) => Ok(Value::Int(-(*x as i32))),
        Value::Int(x) => Ok(Value::Int(x.checked_neg().ok_or(BasicError::Range)?)),
        Value::Int64(x) => Ok(Value::Int64(x.checked_neg().ok_or(BasicError::Range)?)),
        Value::Float(x) => Ok(Value::Float(-x)),
        _ => Err(BasicError::TypeNum),
    }
}

fn apply_binop(op: BinOp, lhs: Value, rhs: Value) -> Result<Value> {
    if op == BinOp::Add && (lhs.is_string() || rhs.is_string()) {
        let a = lhs.as_str()?.as_bytes().to_vec();
        let mut a = a;
        a.extend_from_slice(rhs.as_str()?.as_bytes());
        return Ok(Value::Str(StringValue::temp(a)));
    }
    if lhs.is_string() || rhs.is_string() {
        return match op {
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
                let a = lhs.as_str()?.as_bytes();
                let b = rhs.as_str()?.as_bytes();
                let result = match op {
                    BinOp::Eq => a == b,
                    BinOp::Ne => a != b,
                    BinOp::Lt => a < b,
                    BinOp::Gt => a > b,
                    BinOp::Le => a <= b,
                    BinOp::Ge => a >= b,
                    _ => unreachable!(),
                };
                Ok(Value::Int(bool_to_basic(result)))
            }
            _ => Err(BasicError::TypeStr),
        };
    }
    let kind = lhs.common_kind(&rhs)?;
    match op {
        BinOp::Div if matches!(kind, NumKind::Int | NumKind::Int64) && rhs.as_f64()? == 0.0 => {
            Err(BasicError::Range)
        }
        BinOp::IntDiv | BinOp::Mod if rhs_is_zero_int(&rhs, kind)? => Err(BasicError::Range),
        _ => {}
    }
    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::IntDiv | BinOp::Mod => {
            arith_same_kind(op, kind, &lhs, &rhs)
        }
        BinOp::Div | BinOp::Pow => {
            let a = lhs.as_f64()?;
            let b = rhs.as_f64()?;
            Ok(Value::Float(if op == BinOp::Div { a / b } else { a.powf(b) }))
        }
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
            let cmp = compare_numeric(kind, &lhs, &rhs)?;
            let result = match op {
                BinOp::Eq => cmp == std::cmp::Ordering::Equal,
                BinOp::Ne => cmp != std::cmp::Ordering::Equal,
                BinOp::Lt => cmp == std::cmp::Ordering::Less,
                BinOp::Gt => cmp == std::cmp::Ordering::Greater,
                BinOp::Le => cmp != std::cmp::Ordering::Greater,
                BinOp::Ge => cmp != std::cmp::Ordering::Less,
                _ => unreachable!(),
            };
            Ok(Value::Int(bool_to_basic(result)))
        }
        BinOp::And | BinOp::Or | BinOp::Eor => {
            let a = lhs.as_i32()?;
            let b = rhs.as_i32()?;
            Ok(Value::Int(match op {
                BinOp::And => a & b,
                BinOp::Or => a | b,
                BinOp::Eor => a ^ b,
                _ => unreachable!(),
            }))
        }
    }
}

fn rhs_is_zero_int(rhs: &Value, kind: NumKind) -> Result<bool> {
    Ok(match kind {
        NumKind::Int => rhs.as_i32()? == 0,
        NumKind::Int64 => rhs.as_i64()? == 0,
        NumKind::Float => rhs.as_f64()? == 0.0,
    })
}

fn arith_same_kind(op: BinOp, kind: NumKind, lhs: &Value, rhs: &Value) -> Result<Value> {
    match kind {
        NumKind::Int => {
            let a = lhs.as_i32()?;
            let b = rhs.as_i32()?;
            Ok(Value::Int(match op {
                BinOp::Add => a.checked_add(b).ok_or(BasicError::Range)?,
                BinOp::Sub => a.checked_sub(b).ok_or(BasicError::Range)?,
                BinOp::Mul => a.checked_mul(b).ok_or(BasicError::Range)?,
                BinOp::IntDiv => a.checked_div(b).ok_or(BasicError::Range)?,
                BinOp::Mod => a.checked_rem(b).ok_or(BasicError::Range)?,
                _ => unreachable!(),
            }))
        }
        NumKind::Int64 => {
            let a = lhs.as_i64()?;
            let b = rhs.as_i64()?;
            Ok(Value::Int64(match op {
                BinOp::Add => a.checked_add(b).ok_or(BasicError::Range)?,
                BinOp::Sub => a.checked_sub(b).ok_or(BasicError::Range)?,
                BinOp::Mul => a.checked_mul(b).ok_or(BasicError::Range)?,
                BinOp::IntDiv => a.checked_div(b).ok_or(BasicError::Range)?,
                BinOp::Mod => a.checked_rem(b).ok_or(BasicError::Range)?,
                _ => unreachable!(),
            }))
        }
        NumKind::Float => {
            let a = lhs.as_f64()?;
            let b = rhs.as_f64()?;
            Ok(Value::Float(match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::IntDiv => (a / b).trunc(),
                BinOp::Mod => a % b,
                _ => unreachable!(),
            }))
        }
    }
}

fn compare_numeric(kind: NumKind, lhs: &Value, rhs: &Value) -> Result<std::cmp::Ordering> {
    Ok(match kind {
        NumKind::Int => lhs.as_i32()?.cmp(&rhs.as_i32()?),
        NumKind::Int64 => lhs.as_i64()?.cmp(&rhs.as_i64()?),
        NumKind::Float => lhs
            .as_f64()?
            .partial_cmp(&rhs.as_f64()?)
            .ok_or(BasicError::Range)?,
    })
}
