//! Operators.
//!
//! Numbers, strings and lists have built-in meanings; any other left
//! operand falls back to the operator method (`plus`, `minus`,
//! `multiply`, `div`, `mod`, `compareTo`, `equals`, `negative`).
use std::cmp::Ordering;
use std::sync::Arc;

use bytecode::Op;

use crate::error::RuntimeError;
use crate::interp::Interpreter;
use crate::value::Value;

fn operator_method(op: Op) -> Option<&'static str> {
    Some(match op {
        Op::Add => "plus",
        Op::Sub => "minus",
        Op::Mul => "multiply",
        Op::Div => "div",
        Op::Mod => "mod",
        _ => return None,
    })
}

impl Interpreter<'_> {
    /// `lhs <op> rhs`.
    pub fn binary(&mut self, op: Op, lhs: &Value, rhs: &Value) -> Result<Value, RuntimeError> {
        match op {
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod => self.arithmetic(op, lhs, rhs),
            Op::Eq => Ok(Value::Bool(self.equals(lhs, rhs)?)),
            Op::Ne => Ok(Value::Bool(!self.equals(lhs, rhs)?)),
            Op::Lt => Ok(Value::Bool(self.compare(lhs, rhs)?.is_lt())),
            Op::Le => Ok(Value::Bool(self.compare(lhs, rhs)?.is_le())),
            Op::Gt => Ok(Value::Bool(self.compare(lhs, rhs)?.is_gt())),
            Op::Ge => Ok(Value::Bool(self.compare(lhs, rhs)?.is_ge())),
            other => Err(RuntimeError::bug(format!("{other:?} is not a binary operator"))),
        }
    }

    fn arithmetic(&mut self, op: Op, lhs: &Value, rhs: &Value) -> Result<Value, RuntimeError> {
        if let Some(result) = self.numeric(op, lhs, rhs) {
            return result;
        }
        match (op, lhs, rhs) {
            (Op::Add, Value::Str(_), _) | (Op::Add, _, Value::Str(_)) => {
                let mut text = self.to_string(lhs)?.to_string();
                text.push_str(&self.to_string(rhs)?);
                Ok(Value::str(text))
            }
            (Op::Add, Value::List(items), other) => {
                let mut out = items.read().clone();
                match other {
                    Value::List(more) => out.extend(more.read().iter().cloned()),
                    single => out.push(single.clone()),
                }
                Ok(Value::list(out))
            }
            (Op::Mul, Value::Str(s), Value::Int(n)) => {
                let count = usize::try_from(*n).map_err(|_| {
                    self.raise("IllegalArgumentException", format!("negative repeat count {n}"))
                })?;
                Ok(Value::str(s.repeat(count)))
            }
            _ => match operator_method(op) {
                Some(name) => self.call_method(lhs, name, std::slice::from_ref(rhs)),
                None => Err(RuntimeError::bug(format!("{op:?} is not arithmetic"))),
            },
        }
    }

    fn numeric(&self, op: Op, lhs: &Value, rhs: &Value) -> Option<Result<Value, RuntimeError>> {
        let float = |x: f64, y: f64| {
            Value::Float(match op {
                Op::Add => x + y,
                Op::Sub => x - y,
                Op::Mul => x * y,
                Op::Div => x / y,
                _ => x % y,
            })
        };
        Some(match (lhs, rhs) {
            (Value::Int(x), Value::Int(y)) => self.integer(op, *x, *y),
            (Value::Int(x), Value::Float(y)) => Ok(float(*x as f64, *y)),
            (Value::Float(x), Value::Int(y)) => Ok(float(*x, *y as f64)),
            (Value::Float(x), Value::Float(y)) => Ok(float(*x, *y)),
            _ => return None,
        })
    }

    /// Checked integer arithmetic. `/` always yields a float.
    fn integer(&self, op: Op, x: i64, y: i64) -> Result<Value, RuntimeError> {
        let result = match op {
            Op::Add => x.checked_add(y),
            Op::Sub => x.checked_sub(y),
            Op::Mul => x.checked_mul(y),
            Op::Div | Op::Mod if y == 0 => {
                return Err(self.raise("ArithmeticException", "Division by zero"));
            }
            Op::Div => return Ok(Value::Float(x as f64 / y as f64)),
            // i64::MIN % -1 is 0, not an overflow.
            Op::Mod => Some(x.wrapping_rem(y)),
            other => return Err(RuntimeError::bug(format!("{other:?} is not arithmetic"))),
        };
        result
            .map(Value::Int)
            .ok_or_else(|| self.raise("ArithmeticException", format!("integer overflow in {x} {op:?} {y}")))
    }

    pub(crate) fn negate(&mut self, value: &Value) -> Result<Value, RuntimeError> {
        match value {
            Value::Int(v) => v
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| self.raise("ArithmeticException", format!("integer overflow in -{v}"))),
            Value::Float(v) => Ok(Value::Float(-v)),
            other => self.call_method(other, "negative", &[]),
        }
    }

    /// `==`: numeric across integers and floats, element-wise for lists,
    /// `equals` for objects.
    pub fn equals(&mut self, lhs: &Value, rhs: &Value) -> Result<bool, RuntimeError> {
        Ok(match (lhs, rhs) {
            (Value::Null, _) | (_, Value::Null) => lhs.is_null() && rhs.is_null(),
            (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => *x as f64 == *y,
            (Value::Float(x), Value::Float(y)) => x == y,
            (Value::List(a), Value::List(b)) => {
                if Arc::ptr_eq(a, b) {
                    return Ok(true);
                }
                let (a, b) = (a.read().clone(), b.read().clone());
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (x, y) in a.iter().zip(&b) {
                    if !self.equals(x, y)? {
                        return Ok(false);
                    }
                }
                true
            }
            (Value::Object(_), _) => self.call_method(lhs, "equals", std::slice::from_ref(rhs))?.truthy(),
            _ => lhs.same(rhs),
        })
    }

    /// Ordering for `<`, `<=`, `>` and `>=`.
    pub fn compare(&mut self, lhs: &Value, rhs: &Value) -> Result<Ordering, RuntimeError> {
        let as_float = |v: &Value| match v {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        };
        match (lhs, rhs) {
            (Value::Int(x), Value::Int(y)) => return Ok(x.cmp(y)),
            (Value::Str(x), Value::Str(y)) => return Ok(x.cmp(y)),
            _ => {}
        }
        if let (Some(x), Some(y)) = (as_float(lhs), as_float(rhs)) {
            return x.partial_cmp(&y).ok_or_else(|| {
                self.raise("ArithmeticException", format!("cannot order {x} and {y}"))
            });
        }
        match self.call_method(lhs, "compareTo", std::slice::from_ref(rhs))? {
            Value::Int(v) => Ok(v.cmp(&0)),
            other => {
                let class = self.type_name(&other);
                Err(self.raise(
                    "ClassCastException",
                    format!("compareTo returned {class}, expected Integer"),
                ))
            }
        }
    }
}
