//! The attribute-delegation object model.
//!
//! An object is an attribute dictionary plus an optional `base`: a single
//! ancestor *instance* forming a per-instance delegation chain. There is no
//! static class hierarchy at runtime — each constructed instance owns its
//! own linked ancestor instance, and inherited state lives on whichever
//! ancestor defines it.

use std::cell::RefCell;
use std::rc::Rc;

use super::value::{BoundMethod, ClassValue, Dict, Value};

pub struct Object {
    /// The class this instance was constructed from, when any.
    pub class: Option<Rc<ClassValue>>,
    pub attributes: Dict<Value>,
    /// Ancestor instance for attribute delegation.
    pub base: Option<Rc<RefCell<Object>>>,
}

impl Object {
    pub fn new(class: Option<Rc<ClassValue>>) -> Self {
        Self {
            class,
            attributes: Dict::default(),
            base: None,
        }
    }

    /// Look up an attribute: own dictionary first, then delegate to `base`.
    pub fn get_attribute(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.attributes.get(name) {
            return Some(value.clone());
        }
        self.base
            .as_ref()
            .and_then(|base| base.borrow().get_attribute(name))
    }

    /// True when this object or any ancestor defines `name`.
    pub fn defines(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
            || self
                .base
                .as_ref()
                .is_some_and(|base| base.borrow().defines(name))
    }

    pub fn class_name(&self) -> String {
        match &self.class {
            Some(class) => class.def.name.clone(),
            None => "object".to_string(),
        }
    }
}

/// Store an attribute following the write-through rule: when the name is not
/// already defined locally but an ancestor defines it, the write is
/// forwarded to the nearest defining ancestor, so unshadowed inherited
/// fields stay shared across the whole delegation chain.
///
/// Storing an instance-flagged method wraps it in a bound method capturing
/// the receiver at assignment time.
pub fn set_attribute(object: &Rc<RefCell<Object>>, name: &str, value: Value) {
    let forward_to = {
        let obj = object.borrow();
        if obj.attributes.contains_key(name) {
            None
        } else {
            obj.base
                .as_ref()
                .filter(|base| base.borrow().defines(name))
                .cloned()
        }
    };

    if let Some(base) = forward_to {
        set_attribute(&base, name, value);
        return;
    }

    let value = match value {
        Value::Method(mv) if mv.method.is_instance => Value::Bound(Rc::new(BoundMethod {
            receiver: Value::Object(object.clone()),
            method: mv.method.clone(),
            module: mv.module.clone(),
        })),
        other => other,
    };
    object.borrow_mut().attributes.insert(name.to_string(), value);
}

/// Walk the receiver's per-instance chain testing whether any link was
/// constructed from `class`.
pub fn instance_of(value: &Value, class: &Rc<ClassValue>) -> bool {
    let Value::Object(object) = value else {
        return false;
    };
    let mut current = Some(object.clone());
    while let Some(obj) = current {
        let obj = obj.borrow();
        if let Some(own_class) = &obj.class {
            if Rc::ptr_eq(&own_class.def, &class.def) {
                return true;
            }
        }
        current = obj.base.clone();
    }
    false
}
