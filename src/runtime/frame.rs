//! Call frames.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bytecode::method::Method;

use super::modules::RtModule;
use super::value::{Closure, Value};

/// One invocation's state: a fixed-size locals buffer, a private operand
/// stack, and an instruction pointer.
///
/// The locals buffer is behind shared ownership because closures alias it:
/// a frame duplicated from a captured one observes the *same* slots, so a
/// mutation on either side is visible to the other. Frames created for a
/// plain method call own a fresh buffer.
pub struct StackFrame {
    pub method: Rc<Method>,
    pub module: Rc<RefCell<RtModule>>,
    pub locals: Rc<RefCell<Vec<Value>>>,
    pub operands: Vec<Value>,
    pub ip: usize,
    pub self_value: Value,
    /// Set during unwinding; the dispatch loop terminates on its next fetch.
    pub aborted: bool,
}

impl StackFrame {
    /// A fresh frame with its own locals buffer sized to the method.
    pub fn new(method: Rc<Method>, module: Rc<RefCell<RtModule>>, self_value: Value) -> Self {
        let locals = vec![Value::Null; method.local_count];
        Self {
            method,
            module,
            locals: Rc::new(RefCell::new(locals)),
            operands: Vec::new(),
            ip: 0,
            self_value,
            aborted: false,
        }
    }

    /// A frame duplicated from a closure's captured frame: same locals
    /// buffer, fresh operand stack and instruction pointer. This is the
    /// closure-capture mechanism — the nested function sees live mutations
    /// of the enclosing function's locals, not a snapshot.
    pub fn for_closure(closure: &Closure) -> Self {
        Self {
            method: closure.method.clone(),
            module: closure.module.clone(),
            locals: closure.locals.clone(),
            operands: Vec::new(),
            ip: 0,
            self_value: closure.self_value.clone(),
            aborted: false,
        }
    }

    /// Source location of the instruction being executed. The instruction
    /// pointer has already advanced past it when handlers run.
    pub fn current_span(&self) -> crate::span::Span {
        let index = self
            .ip
            .saturating_sub(1)
            .min(self.method.body.len().saturating_sub(1));
        self.method
            .body
            .get(index)
            .map(|instr| instr.span)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::modules;
    use pretty_assertions::assert_eq;

    fn empty_module() -> Rc<RefCell<RtModule>> {
        let compiled = crate::bytecode::method::CompiledModule {
            name: "t".to_string(),
            constants: Vec::new(),
            initializer: Rc::new(Method::new("<init>")),
            attributes: Vec::new(),
            imports: Vec::new(),
        };
        modules::instantiate(&compiled, "t")
    }

    #[test]
    fn test_closure_frames_share_the_locals_buffer() {
        let mut method = Method::new("outer");
        method.local_count = 2;
        let method = Rc::new(method);
        let module = empty_module();

        let outer = StackFrame::new(method.clone(), module.clone(), Value::Null);
        let closure = Closure {
            method: method.clone(),
            locals: outer.locals.clone(),
            self_value: Value::Null,
            module,
        };
        let inner = StackFrame::for_closure(&closure);

        // Writes on either side are visible on the other: aliasing, not a
        // copy.
        outer.locals.borrow_mut()[0] = Value::Int(7);
        assert_eq!(inner.locals.borrow()[0], Value::Int(7));
        inner.locals.borrow_mut()[1] = Value::Int(9);
        assert_eq!(outer.locals.borrow()[1], Value::Int(9));
    }

    #[test]
    fn test_fresh_frames_get_independent_buffers() {
        let mut method = Method::new("f");
        method.local_count = 1;
        let method = Rc::new(method);
        let module = empty_module();

        let a = StackFrame::new(method.clone(), module.clone(), Value::Null);
        let b = StackFrame::new(method, module, Value::Null);
        a.locals.borrow_mut()[0] = Value::Int(1);
        assert_eq!(b.locals.borrow()[0], Value::Null);
    }
}
