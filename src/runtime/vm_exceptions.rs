//! Exception raising and unwinding.
//!
//! Raising is a bytecode-level control transfer. The nearest handler is
//! popped, every frame above its recorded depth is marked aborted (their
//! dispatch loops terminate as the native recursion unravels), the raised
//! value is stashed as the last exception, and the handler frame's
//! instruction pointer is redirected to the handler address. Only an
//! exception with no registered handler anywhere is fatal.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::RuntimeError;
use crate::span::Span;

use super::object::{set_attribute, Object};
use super::value::Value;
use super::vm::Vm;

impl Vm {
    /// Raise a first-class exception value.
    pub fn raise_value(&mut self, value: Value, span: Span) -> Result<(), RuntimeError> {
        match self.handlers.pop() {
            None => Err(RuntimeError::Uncaught {
                message: exception_message(&value),
                trace: self.render_stack_trace(span),
            }),
            Some(handler) => {
                self.stack.unwind_to(handler.frame_depth);
                self.last_exception = value.clone();
                self.in_flight = Some(value);
                if let Some(frame) = self.stack.frame_at(handler.frame_depth.saturating_sub(1)) {
                    let mut frame = frame.borrow_mut();
                    frame.ip = handler.address;
                    frame.aborted = false;
                }
                Ok(())
            }
        }
    }

    /// Convert a runtime error into an exception object of the matching
    /// built-in class and raise it. Native-callback faults flow through
    /// here too, so stdlib bugs stay catchable.
    pub(crate) fn raise_from_error(&mut self, err: RuntimeError) -> Result<(), RuntimeError> {
        if matches!(err, RuntimeError::Uncaught { .. }) {
            return Err(err);
        }
        let span = err.span();
        let exception = self.make_exception(err.exception_class(), &err.to_string());
        self.raise_value(exception, span)
    }

    /// Build an instance of a built-in exception class with a `message`
    /// attribute. The instance carries an `Exception` ancestor on its
    /// delegation chain so class-filtered except clauses match subclasses.
    pub fn make_exception(&self, class_name: &str, message: &str) -> Value {
        let class = match self.globals.get(class_name) {
            Some(Value::Class(class)) => Some(class.clone()),
            _ => None,
        };

        let object = Rc::new(RefCell::new(Object::new(class.clone())));
        if let Some(class) = &class {
            if class.def.base.as_deref() == Some("Exception") {
                if let Some(Value::Class(base)) = self.globals.get("Exception") {
                    let ancestor = Rc::new(RefCell::new(Object::new(Some(base.clone()))));
                    object.borrow_mut().base = Some(ancestor);
                }
            }
        }
        set_attribute(&object, "message", Value::string(message));
        Value::Object(object)
    }

    /// Frame-by-frame trace, innermost call first.
    pub(crate) fn render_stack_trace(&self, span: Span) -> String {
        let mut trace = String::from("Stack trace (most recent call first):\n");
        for (i, frame) in self.stack.frames().iter().enumerate().rev() {
            let frame = frame.borrow();
            let location = if i + 1 == self.stack.depth() {
                span
            } else {
                frame.current_span()
            };
            let name = if frame.method.name.is_empty() {
                "<anonymous>"
            } else {
                &frame.method.name
            };
            trace.push_str(&format!(
                "  at {} ({}, {})\n",
                name,
                frame.module.borrow().name,
                location
            ));
        }
        trace
    }
}

/// Human-readable message for a raised value: the `message` attribute of an
/// exception object when present, otherwise its display form.
pub fn exception_message(value: &Value) -> String {
    match value {
        Value::Object(object) => {
            let object = object.borrow();
            match object.get_attribute("message") {
                Some(message) => format!("{}: {}", object.class_name(), message),
                None => format!("<{} instance>", object.class_name()),
            }
        }
        Value::Str(s) => s.as_ref().clone(),
        other => format!("{}", other),
    }
}
