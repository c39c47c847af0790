//! Runtime values.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::bytecode::method::{ClassDef, EnumDef, Method};
use crate::error::RuntimeError;
use crate::span::Span;

use super::iterator::IterState;
use super::modules::RtModule;
use super::object::Object;
use super::vm::Vm;

/// String-keyed dictionary used for attribute stores.
pub type Dict<V> = IndexMap<String, V, ahash::RandomState>;

/// Map collections are keyed by hashable primitive values.
pub type ValueMap = IndexMap<MapKey, Value, ahash::RandomState>;

/// A runtime value. Heap values are `Rc`-shared; the whole model is
/// single-threaded by construction.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<String>),
    Bytes(Rc<Vec<u8>>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Map(Rc<RefCell<ValueMap>>),
    Iter(Rc<RefCell<IterState>>),
    /// A compiled function paired with its owning module.
    Method(Rc<MethodValue>),
    /// A compiled function plus a captured frame's locals.
    Closure(Rc<Closure>),
    /// An instance method bound to its receiver at assignment time.
    Bound(Rc<BoundMethod>),
    Native(NativeFunction),
    Class(Rc<ClassValue>),
    Enum(Rc<EnumDef>),
    Object(Rc<RefCell<Object>>),
    Module(Rc<RefCell<RtModule>>),
}

/// A compiled method and the module whose constant pool its instructions
/// index.
pub struct MethodValue {
    pub method: Rc<Method>,
    pub module: Rc<RefCell<RtModule>>,
}

/// A class definition bound to the module it was declared in.
pub struct ClassValue {
    pub def: Rc<ClassDef>,
    pub module: Rc<RefCell<RtModule>>,
}

/// A closure: the target method plus the captured frame state. The locals
/// buffer is shared, not copied — every invocation observes (and mutates)
/// the same slots as the frame that created the closure.
pub struct Closure {
    pub method: Rc<Method>,
    pub locals: Rc<RefCell<Vec<Value>>>,
    pub self_value: Value,
    pub module: Rc<RefCell<RtModule>>,
}

/// An instance method with its receiver captured.
pub struct BoundMethod {
    pub receiver: Value,
    pub method: Rc<Method>,
    pub module: Rc<RefCell<RtModule>>,
}

/// A native (Rust) function exposed through the same invocation surface as
/// compiled code. This is the FFI boundary: stdlib collaborators install
/// these as module attributes or globals.
#[derive(Clone)]
pub struct NativeFunction {
    pub name: Rc<str>,
    #[allow(clippy::type_complexity)]
    pub func: Rc<dyn Fn(&mut Vm, Vec<Value>, Span) -> Result<Value, RuntimeError>>,
}

impl NativeFunction {
    pub fn new(
        name: &str,
        func: impl Fn(&mut Vm, Vec<Value>, Span) -> Result<Value, RuntimeError> + 'static,
    ) -> Self {
        Self {
            name: Rc::from(name),
            func: Rc::new(func),
        }
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native fn {}>", self.name)
    }
}

/// A hashable key for map collections.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    Int(i64),
    Str(String),
    Bool(bool),
    Null,
}

impl MapKey {
    pub fn from_value(value: &Value) -> Option<MapKey> {
        match value {
            Value::Int(n) => Some(MapKey::Int(*n)),
            Value::Str(s) => Some(MapKey::Str(s.as_ref().clone())),
            Value::Bool(b) => Some(MapKey::Bool(*b)),
            Value::Null => Some(MapKey::Null),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            MapKey::Int(n) => Value::Int(*n),
            MapKey::Str(s) => Value::string(s.clone()),
            MapKey::Bool(b) => Value::Bool(*b),
            MapKey::Null => Value::Null,
        }
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapKey::Int(n) => write!(f, "{}", n),
            MapKey::Str(s) => write!(f, "\"{}\"", s),
            MapKey::Bool(b) => write!(f, "{}", b),
            MapKey::Null => write!(f, "null"),
        }
    }
}

impl Value {
    pub fn string(s: impl Into<String>) -> Value {
        Value::Str(Rc::new(s.into()))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    /// null and false are falsy; everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Null | Value::Bool(false))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Map(_) => "map",
            Value::Iter(_) => "iterator",
            Value::Method(_) | Value::Closure(_) | Value::Native(_) => "function",
            Value::Bound(_) => "method",
            Value::Class(_) => "class",
            Value::Enum(_) => "enum",
            Value::Object(_) => "object",
            Value::Module(_) => "module",
        }
    }
}

/// Built-in equality. Numbers compare across int/float; strings, bytes, and
/// aggregates compare by content; objects, functions, and modules compare by
/// reference identity.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => *x as f64 == *y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Bytes(x), Value::Bytes(y)) => x == y,
        (Value::Tuple(x), Value::Tuple(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| values_equal(a, b))
        }
        (Value::List(x), Value::List(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let x = x.borrow();
            let y = y.borrow();
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| values_equal(a, b))
        }
        (Value::Map(x), Value::Map(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let x = x.borrow();
            let y = y.borrow();
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| values_equal(v, other)))
        }
        (Value::Object(x), Value::Object(y)) => Rc::ptr_eq(x, y),
        (Value::Module(x), Value::Module(y)) => Rc::ptr_eq(x, y),
        (Value::Class(x), Value::Class(y)) => Rc::ptr_eq(&x.def, &y.def),
        (Value::Enum(x), Value::Enum(y)) => Rc::ptr_eq(x, y),
        (Value::Method(x), Value::Method(y)) => Rc::ptr_eq(x, y),
        (Value::Closure(x), Value::Closure(y)) => Rc::ptr_eq(x, y),
        (Value::Bound(x), Value::Bound(y)) => Rc::ptr_eq(x, y),
        (Value::Native(x), Value::Native(y)) => Rc::ptr_eq(&x.func, &y.func),
        (Value::Iter(x), Value::Iter(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        values_equal(self, other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{}", s),
            Value::Bytes(bytes) => {
                write!(f, "b\"")?;
                for byte in bytes.iter() {
                    if byte.is_ascii_graphic() || *byte == b' ' {
                        write!(f, "{}", *byte as char)?;
                    } else {
                        write!(f, "\\x{:02x}", byte)?;
                    }
                }
                write!(f, "\"")
            }
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "}}")
            }
            Value::Iter(_) => write!(f, "<iterator>"),
            Value::Method(m) => write!(f, "<function {}>", m.method.name),
            Value::Closure(c) => write!(f, "<function {}>", c.method.name),
            Value::Bound(b) => write!(f, "<bound method {}>", b.method.name),
            Value::Native(n) => write!(f, "<native fn {}>", n.name),
            Value::Class(c) => write!(f, "<class {}>", c.def.name),
            Value::Enum(e) => write!(f, "<enum {}>", e.name),
            Value::Object(obj) => write!(f, "<{} instance>", obj.borrow().class_name()),
            Value::Module(m) => write!(f, "<module {}>", m.borrow().name),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}
