//! Runtime modules.
//!
//! A module is an object: the same attribute-dictionary contract backs its
//! globals. It additionally owns the constant pool its methods index, the
//! initializer holding all top-level statements, and an initialized flag —
//! the initializer runs lazily on first external attribute access and is
//! memoized thereafter.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bytecode::method::{CompiledModule, Constant, Method};

use super::value::{ClassValue, Dict, MethodValue, Value};

pub struct RtModule {
    pub name: String,
    /// Resolution path this module is cached under.
    pub path: String,
    pub attributes: Dict<Value>,
    pub constants: Rc<Vec<Constant>>,
    pub initializer: Rc<Method>,
    pub imports: Vec<String>,
    pub initialized: bool,
}

impl RtModule {
    pub fn get_attribute(&self, name: &str) -> Option<Value> {
        self.attributes.get(name).cloned()
    }

    pub fn set_attribute(&mut self, name: &str, value: Value) {
        self.attributes.insert(name.to_string(), value);
    }
}

/// Instantiate a compiled module: seed the attribute dictionary with the
/// functions, classes, and enums the module pass registered. The module is
/// returned uninitialized; its top-level statements have not run yet.
pub fn instantiate(compiled: &CompiledModule, path: &str) -> Rc<RefCell<RtModule>> {
    let module = Rc::new(RefCell::new(RtModule {
        name: compiled.name.clone(),
        path: path.to_string(),
        attributes: Dict::default(),
        constants: Rc::new(compiled.constants.clone()),
        initializer: compiled.initializer.clone(),
        imports: compiled.imports.clone(),
        initialized: false,
    }));

    for (name, constant) in &compiled.attributes {
        let value = constant_to_value(constant, &module);
        module.borrow_mut().attributes.insert(name.clone(), value);
    }

    module
}

/// Convert a pooled constant into a runtime value. Methods and classes are
/// bound to the module owning the pool they index.
pub fn constant_to_value(constant: &Constant, module: &Rc<RefCell<RtModule>>) -> Value {
    match constant {
        Constant::Int(n) => Value::Int(*n),
        Constant::Float(n) => Value::Float(*n),
        Constant::Str(s) | Constant::Name(s) => Value::string(s.clone()),
        Constant::Bool(b) => Value::Bool(*b),
        Constant::Null => Value::Null,
        Constant::List(items) => Value::list(
            items
                .iter()
                .map(|item| constant_to_value(item, module))
                .collect(),
        ),
        Constant::Tuple(items) => Value::Tuple(Rc::new(
            items
                .iter()
                .map(|item| constant_to_value(item, module))
                .collect(),
        )),
        Constant::Method(method) => Value::Method(Rc::new(MethodValue {
            method: method.clone(),
            module: module.clone(),
        })),
        Constant::Class(def) => Value::Class(Rc::new(ClassValue {
            def: def.clone(),
            module: module.clone(),
        })),
        Constant::Enum(def) => Value::Enum(def.clone()),
    }
}
