//! Invocation: methods, closures, bound methods, natives, and class
//! construction.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bytecode::method::Method;
use crate::error::RuntimeError;
use crate::span::Span;

use super::frame::StackFrame;
use super::modules::RtModule;
use super::object::{set_attribute, Object};
use super::value::{ClassValue, MethodValue, Value};
use super::vm::Vm;

impl Vm {
    /// Invoke any callable value. Returns the call's result, or `None` when
    /// an exception is in flight (the result must not be pushed then). A
    /// plain object does not support invocation.
    pub fn call_value(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        span: Span,
    ) -> Result<Option<Value>, RuntimeError> {
        match callee {
            Value::Native(native) => {
                let result = (native.func)(self, args, span)?;
                Ok(Some(result))
            }
            Value::Method(mv) => {
                let frame = StackFrame::new(mv.method.clone(), mv.module.clone(), Value::Null);
                self.call_frame(frame, &mv.method, args, span)
            }
            Value::Bound(bound) => {
                let frame = StackFrame::new(
                    bound.method.clone(),
                    bound.module.clone(),
                    bound.receiver.clone(),
                );
                self.call_frame(frame, &bound.method, args, span)
            }
            Value::Closure(closure) => {
                // The duplicated frame shares the captured locals buffer, so
                // argument binding below writes into the enclosing frame's
                // slots as well.
                let frame = StackFrame::for_closure(&closure);
                self.call_frame(frame, &closure.method, args, span)
            }
            Value::Class(class) => self.construct_instance(&class, args, span),
            other => Err(RuntimeError::not_supported(
                format!("'{}' does not support invocation", other.type_name()),
                span,
            )),
        }
    }

    fn call_frame(
        &mut self,
        frame: StackFrame,
        method: &Rc<Method>,
        args: Vec<Value>,
        span: Span,
    ) -> Result<Option<Value>, RuntimeError> {
        bind_arguments(method, args, &frame.locals, span)?;
        self.execute_frame(frame)?;
        if self.in_flight.is_some() {
            Ok(None)
        } else {
            Ok(Some(self.stack.last_value.clone()))
        }
    }

    /// A class invocation constructs an instance: bind every declared
    /// instance method onto the new object (each wrapped with the object as
    /// receiver), run the `init` constructor against it, return it.
    pub(crate) fn construct_instance(
        &mut self,
        class: &Rc<ClassValue>,
        args: Vec<Value>,
        span: Span,
    ) -> Result<Option<Value>, RuntimeError> {
        let object = Rc::new(RefCell::new(Object::new(Some(class.clone()))));
        for (name, method) in &class.def.methods {
            set_attribute(
                &object,
                name,
                Value::Method(Rc::new(MethodValue {
                    method: method.clone(),
                    module: class.module.clone(),
                })),
            );
        }

        let instance = Value::Object(object.clone());
        let init = object.borrow().get_attribute("init");
        if let Some(init) = init {
            if self.call_value(init, args, span)?.is_none() {
                return Ok(None);
            }
        } else {
            if !args.is_empty() {
                return Err(RuntimeError::argument(
                    format!(
                        "class '{}' has no constructor but was given {} argument(s)",
                        class.def.name,
                        args.len()
                    ),
                    span,
                ));
            }
            // No constructor to call super from: a declared base is
            // constructed implicitly with no arguments.
            if class.def.base.is_some()
                && self
                    .invoke_super(instance.clone(), &class.module, Vec::new(), span)?
                    .is_none()
            {
                return Ok(None);
            }
        }
        Ok(Some(instance))
    }

    /// Explicit superclass construction: build the ancestor instance the
    /// same way, attach it as the receiver's `base`, and merge in ancestor
    /// methods the subclass does not shadow.
    pub(crate) fn invoke_super(
        &mut self,
        self_value: Value,
        module: &Rc<RefCell<RtModule>>,
        args: Vec<Value>,
        span: Span,
    ) -> Result<Option<Value>, RuntimeError> {
        let Value::Object(object) = self_value else {
            return Err(RuntimeError::not_supported(
                "'super' outside of an instance method",
                span,
            ));
        };

        let class = object.borrow().class.clone().ok_or_else(|| {
            RuntimeError::not_supported("'super' on a classless object", span)
        })?;
        let base_name = class.def.base.clone().ok_or_else(|| {
            RuntimeError::type_error(
                format!("class '{}' has no superclass", class.def.name),
                span,
            )
        })?;

        let base_value = self.resolve_name(&base_name, module).ok_or_else(|| {
            RuntimeError::UndefinedVariable(base_name.clone(), span)
        })?;
        let Value::Class(base_class) = base_value else {
            return Err(RuntimeError::type_error(
                format!("'{}' is not a class", base_name),
                span,
            ));
        };

        let Some(Value::Object(ancestor)) = self.construct_instance(&base_class, args, span)?
        else {
            return Ok(None);
        };

        object.borrow_mut().base = Some(ancestor.clone());

        // Ancestor methods stay callable directly on the subclass instance;
        // fields remain reachable through delegation alone.
        let inherited: Vec<(String, Value)> = ancestor
            .borrow()
            .attributes
            .iter()
            .filter(|(_, value)| matches!(value, Value::Bound(_)))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        for (name, value) in inherited {
            if !object.borrow().attributes.contains_key(&name) {
                object.borrow_mut().attributes.insert(name, value);
            }
        }

        Ok(Some(Value::Null))
    }

    /// Name resolution for runtime lookups: the process-wide globals first,
    /// then the given module's attribute dictionary.
    pub(crate) fn resolve_name(
        &self,
        name: &str,
        module: &Rc<RefCell<RtModule>>,
    ) -> Option<Value> {
        if let Some(value) = self.globals.get(name) {
            return Some(value.clone());
        }
        module.borrow().get_attribute(name)
    }
}

/// Bind call arguments into a frame's locals at the method's parameter
/// slots. A variadic method collects surplus arguments into a list bound to
/// its trailing parameter.
fn bind_arguments(
    method: &Rc<Method>,
    mut args: Vec<Value>,
    locals: &Rc<RefCell<Vec<Value>>>,
    span: Span,
) -> Result<(), RuntimeError> {
    let params = &method.params;

    if method.variadic {
        let fixed = params.len().saturating_sub(1);
        if args.len() < fixed {
            return Err(RuntimeError::argument(
                format!(
                    "'{}' expects at least {} argument(s), got {}",
                    method.name,
                    fixed,
                    args.len()
                ),
                span,
            ));
        }
        let rest: Vec<Value> = args.split_off(fixed);
        let mut locals = locals.borrow_mut();
        for ((_, slot), value) in params[..fixed].iter().zip(args) {
            write_slot(&mut locals, *slot, value, &method.name, span)?;
        }
        let rest_slot = params[fixed].1;
        write_slot(&mut locals, rest_slot, Value::list(rest), &method.name, span)?;
    } else {
        if args.len() != params.len() {
            return Err(RuntimeError::argument(
                format!(
                    "'{}' expects {} argument(s), got {}",
                    method.name,
                    params.len(),
                    args.len()
                ),
                span,
            ));
        }
        let mut locals = locals.borrow_mut();
        for ((_, slot), value) in params.iter().zip(args) {
            write_slot(&mut locals, *slot, value, &method.name, span)?;
        }
    }
    Ok(())
}

fn write_slot(
    locals: &mut Vec<Value>,
    slot: usize,
    value: Value,
    method_name: &str,
    span: Span,
) -> Result<(), RuntimeError> {
    match locals.get_mut(slot) {
        Some(cell) => {
            *cell = value;
            Ok(())
        }
        None => Err(RuntimeError::internal(
            format!("parameter slot {} out of range in '{}'", slot, method_name),
            span,
        )),
    }
}
