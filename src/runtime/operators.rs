//! Operator dispatch.
//!
//! Built-in types implement operators natively: int and float promote to
//! float when mixed, strings and lists concatenate, equality defaults to
//! reference identity for objects. A user object dispatches an operator it
//! does not implement natively to an attribute-named method (`_add`,
//! `_equals`, `_lessThan`, ...) invoked with the right-hand operand as its
//! sole argument.

use std::rc::Rc;

use crate::bytecode::instruction::{BinaryOpKind, UnaryOpKind};
use crate::error::RuntimeError;
use crate::span::Span;

use super::value::{values_equal, Value};
use super::vm::Vm;

impl Vm {
    /// Apply a binary operator. `None` means user code raised mid-dispatch.
    pub(crate) fn binary_op(
        &mut self,
        kind: BinaryOpKind,
        a: Value,
        b: Value,
        span: Span,
    ) -> Result<Option<Value>, RuntimeError> {
        use BinaryOpKind::*;

        if let Value::Object(_) = a {
            return self.dispatch_operator_method(kind, a, b, span);
        }

        let result = match kind {
            Add => match (&a, &b) {
                (Value::Int(x), Value::Int(y)) => Value::Int(x + y),
                (Value::Float(x), Value::Float(y)) => Value::Float(x + y),
                (Value::Int(x), Value::Float(y)) => Value::Float(*x as f64 + y),
                (Value::Float(x), Value::Int(y)) => Value::Float(x + *y as f64),
                (Value::Str(x), Value::Str(y)) => Value::string(format!("{}{}", x, y)),
                (Value::Bytes(x), Value::Bytes(y)) => {
                    let mut joined = x.as_ref().clone();
                    joined.extend_from_slice(y);
                    Value::Bytes(Rc::new(joined))
                }
                (Value::List(x), Value::List(y)) => {
                    let mut joined = x.borrow().clone();
                    joined.extend(y.borrow().iter().cloned());
                    Value::list(joined)
                }
                (Value::Tuple(x), Value::Tuple(y)) => {
                    let mut joined = x.as_ref().clone();
                    joined.extend(y.iter().cloned());
                    Value::Tuple(Rc::new(joined))
                }
                _ => return Err(type_mismatch(kind, &a, &b, span)),
            },
            Subtract => match (&a, &b) {
                (Value::Int(x), Value::Int(y)) => Value::Int(x - y),
                (Value::Float(x), Value::Float(y)) => Value::Float(x - y),
                (Value::Int(x), Value::Float(y)) => Value::Float(*x as f64 - y),
                (Value::Float(x), Value::Int(y)) => Value::Float(x - *y as f64),
                _ => return Err(type_mismatch(kind, &a, &b, span)),
            },
            Multiply => match (&a, &b) {
                (Value::Int(x), Value::Int(y)) => Value::Int(x * y),
                (Value::Float(x), Value::Float(y)) => Value::Float(x * y),
                (Value::Int(x), Value::Float(y)) => Value::Float(*x as f64 * y),
                (Value::Float(x), Value::Int(y)) => Value::Float(x * *y as f64),
                (Value::Str(s), Value::Int(n)) if *n >= 0 => {
                    Value::string(s.repeat(*n as usize))
                }
                _ => return Err(type_mismatch(kind, &a, &b, span)),
            },
            Divide => match (&a, &b) {
                (_, Value::Int(0)) => return Err(RuntimeError::DivisionByZero(span)),
                (Value::Int(x), Value::Int(y)) => Value::Int(x / y),
                (Value::Float(x), Value::Float(y)) if *y != 0.0 => Value::Float(x / y),
                (Value::Int(x), Value::Float(y)) if *y != 0.0 => Value::Float(*x as f64 / y),
                (Value::Float(x), Value::Int(y)) => Value::Float(x / *y as f64),
                (Value::Float(_), Value::Float(_)) | (Value::Int(_), Value::Float(_)) => {
                    return Err(RuntimeError::DivisionByZero(span))
                }
                _ => return Err(type_mismatch(kind, &a, &b, span)),
            },
            Modulo => match (&a, &b) {
                (_, Value::Int(0)) => return Err(RuntimeError::DivisionByZero(span)),
                (Value::Int(x), Value::Int(y)) => Value::Int(x % y),
                (Value::Float(x), Value::Float(y)) => Value::Float(x % y),
                (Value::Int(x), Value::Float(y)) => Value::Float(*x as f64 % y),
                (Value::Float(x), Value::Int(y)) => Value::Float(x % *y as f64),
                _ => return Err(type_mismatch(kind, &a, &b, span)),
            },
            Equal => Value::Bool(values_equal(&a, &b)),
            NotEqual => Value::Bool(!values_equal(&a, &b)),
            Less | LessEqual | Greater | GreaterEqual => {
                let ordering = compare(&a, &b)
                    .ok_or_else(|| type_mismatch(kind, &a, &b, span))?;
                let holds = match kind {
                    Less => ordering.is_lt(),
                    LessEqual => ordering.is_le(),
                    Greater => ordering.is_gt(),
                    GreaterEqual => ordering.is_ge(),
                    _ => unreachable!(),
                };
                Value::Bool(holds)
            }
        };
        Ok(Some(result))
    }

    /// Apply a unary operator.
    pub(crate) fn unary_op(
        &mut self,
        kind: UnaryOpKind,
        value: Value,
        span: Span,
    ) -> Result<Option<Value>, RuntimeError> {
        if let Value::Object(object) = &value {
            let method = object.borrow().get_attribute(kind.method_name());
            if let Some(method) = method {
                return self.call_value(method, Vec::new(), span);
            }
            if kind == UnaryOpKind::Not {
                return Ok(Some(Value::Bool(!value.is_truthy())));
            }
            return Err(RuntimeError::type_error(
                format!("'{}' does not implement unary negation", value.type_name()),
                span,
            ));
        }

        let result = match kind {
            UnaryOpKind::Negate => match value {
                Value::Int(n) => Value::Int(-n),
                Value::Float(n) => Value::Float(-n),
                other => {
                    return Err(RuntimeError::type_error(
                        format!("Cannot negate '{}'", other.type_name()),
                        span,
                    ))
                }
            },
            UnaryOpKind::Not => Value::Bool(!value.is_truthy()),
        };
        Ok(Some(result))
    }

    /// Operator overloading: look up the operator's attribute-named method
    /// on the left operand and invoke it with the right operand. Equality
    /// falls back to reference identity when unimplemented.
    fn dispatch_operator_method(
        &mut self,
        kind: BinaryOpKind,
        a: Value,
        b: Value,
        span: Span,
    ) -> Result<Option<Value>, RuntimeError> {
        let method = {
            let Value::Object(object) = &a else {
                unreachable!("dispatch is only reached for objects");
            };
            object.borrow().get_attribute(kind.method_name())
        };

        match method {
            Some(method) => self.call_value(method, vec![b], span),
            None => match kind {
                BinaryOpKind::Equal => Ok(Some(Value::Bool(values_equal(&a, &b)))),
                BinaryOpKind::NotEqual => Ok(Some(Value::Bool(!values_equal(&a, &b)))),
                _ => Err(RuntimeError::type_error(
                    format!(
                        "'{}' does not implement '{}'",
                        a.type_name(),
                        kind.symbol()
                    ),
                    span,
                )),
            },
        }
    }
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y),
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)),
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn type_mismatch(kind: BinaryOpKind, a: &Value, b: &Value, span: Span) -> RuntimeError {
    RuntimeError::type_error(
        format!(
            "Unsupported operands for '{}': '{}' and '{}'",
            kind.symbol(),
            a.type_name(),
            b.type_name()
        ),
        span,
    )
}
