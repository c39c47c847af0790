//! The pull-based iterator protocol: reset, move-next, get-next.
//!
//! Built-in collections iterate through an `IterState` value; user objects
//! participate by defining `_iterReset`, `_iterMoveNext`, and `_iterGetNext`
//! methods. The protocol is single-threaded and non-suspendable: move-next
//! advances, get-next reads the element move-next arrived at.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::RuntimeError;
use crate::span::Span;

use super::value::{MapKey, Value};
use super::vm::Vm;

/// Cursor state over a built-in collection.
pub enum IterState {
    List {
        items: Rc<RefCell<Vec<Value>>>,
        pos: usize,
    },
    Tuple {
        items: Rc<Vec<Value>>,
        pos: usize,
    },
    Str {
        chars: Vec<char>,
        pos: usize,
    },
    Bytes {
        bytes: Rc<Vec<u8>>,
        pos: usize,
    },
    /// Map iteration yields the keys, snapshotted at reset.
    Keys {
        keys: Vec<MapKey>,
        pos: usize,
    },
}

impl IterState {
    fn len(&self) -> usize {
        match self {
            IterState::List { items, .. } => items.borrow().len(),
            IterState::Tuple { items, .. } => items.len(),
            IterState::Str { chars, .. } => chars.len(),
            IterState::Bytes { bytes, .. } => bytes.len(),
            IterState::Keys { keys, .. } => keys.len(),
        }
    }

    fn pos_mut(&mut self) -> &mut usize {
        match self {
            IterState::List { pos, .. }
            | IterState::Tuple { pos, .. }
            | IterState::Str { pos, .. }
            | IterState::Bytes { pos, .. }
            | IterState::Keys { pos, .. } => pos,
        }
    }

    pub fn reset(&mut self) {
        *self.pos_mut() = 0;
    }

    /// Advance to the next element; false once the collection is exhausted.
    pub fn move_next(&mut self) -> bool {
        let len = self.len();
        let pos = self.pos_mut();
        if *pos < len {
            *pos += 1;
            true
        } else {
            false
        }
    }

    /// The element the last `move_next` arrived at.
    pub fn current(&self) -> Option<Value> {
        let index = match self {
            IterState::List { pos, .. }
            | IterState::Tuple { pos, .. }
            | IterState::Str { pos, .. }
            | IterState::Bytes { pos, .. }
            | IterState::Keys { pos, .. } => pos.checked_sub(1)?,
        };
        match self {
            IterState::List { items, .. } => items.borrow().get(index).cloned(),
            IterState::Tuple { items, .. } => items.get(index).cloned(),
            IterState::Str { chars, .. } => {
                chars.get(index).map(|c| Value::string(c.to_string()))
            }
            IterState::Bytes { bytes, .. } => bytes.get(index).map(|&b| Value::Int(b as i64)),
            IterState::Keys { keys, .. } => keys.get(index).map(|k| k.to_value()),
        }
    }
}

impl Vm {
    /// Produce the value the for-each loop drives: a cursor for built-in
    /// collections, or the object itself after its `_iterReset` ran.
    /// `None` means an exception is in flight from user code.
    pub(crate) fn iter_reset(
        &mut self,
        value: Value,
        span: Span,
    ) -> Result<Option<Value>, RuntimeError> {
        let state = match &value {
            Value::List(items) => IterState::List {
                items: items.clone(),
                pos: 0,
            },
            Value::Tuple(items) => IterState::Tuple {
                items: items.clone(),
                pos: 0,
            },
            Value::Str(s) => IterState::Str {
                chars: s.chars().collect(),
                pos: 0,
            },
            Value::Bytes(bytes) => IterState::Bytes {
                bytes: bytes.clone(),
                pos: 0,
            },
            Value::Map(entries) => IterState::Keys {
                keys: entries.borrow().keys().cloned().collect(),
                pos: 0,
            },
            Value::Iter(state) => {
                state.borrow_mut().reset();
                return Ok(Some(value));
            }
            Value::Object(_) => {
                match self.call_iter_method(&value, "_iterReset", span)? {
                    Some(_) => return Ok(Some(value)),
                    None => return Ok(None),
                }
            }
            other => {
                return Err(RuntimeError::type_error(
                    format!("'{}' is not iterable", other.type_name()),
                    span,
                ))
            }
        };
        Ok(Some(Value::Iter(Rc::new(RefCell::new(state)))))
    }

    pub(crate) fn iter_move_next(
        &mut self,
        value: &Value,
        span: Span,
    ) -> Result<Option<Value>, RuntimeError> {
        match value {
            Value::Iter(state) => Ok(Some(Value::Bool(state.borrow_mut().move_next()))),
            Value::Object(_) => self.call_iter_method(value, "_iterMoveNext", span),
            other => Err(RuntimeError::internal(
                format!("cannot advance a '{}'", other.type_name()),
                span,
            )),
        }
    }

    pub(crate) fn iter_get_next(
        &mut self,
        value: &Value,
        span: Span,
    ) -> Result<Option<Value>, RuntimeError> {
        match value {
            Value::Iter(state) => state.borrow().current().map(Some).ok_or_else(|| {
                RuntimeError::internal("iterator read before first advance", span)
            }),
            Value::Object(_) => self.call_iter_method(value, "_iterGetNext", span),
            other => Err(RuntimeError::internal(
                format!("cannot read elements of a '{}'", other.type_name()),
                span,
            )),
        }
    }

    fn call_iter_method(
        &mut self,
        receiver: &Value,
        name: &str,
        span: Span,
    ) -> Result<Option<Value>, RuntimeError> {
        let Value::Object(object) = receiver else {
            return Err(RuntimeError::internal("iterator dispatch on non-object", span));
        };
        let method = object.borrow().get_attribute(name).ok_or_else(|| {
            RuntimeError::type_error(
                format!(
                    "'{}' is not iterable (missing {})",
                    object.borrow().class_name(),
                    name
                ),
                span,
            )
        })?;
        self.call_value(method, Vec::new(), span)
    }
}
