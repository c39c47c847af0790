//! The call stack.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bytecode::method::Method;

use super::frame::StackFrame;
use super::modules::RtModule;
use super::value::Value;

/// A stack of call frames plus the single most-recently-pushed operand
/// value. That value doubles as the implicit expression/return value: there
/// is no dedicated return-value slot, a documented quirk of the design.
pub struct CallStack {
    frames: Vec<Rc<RefCell<StackFrame>>>,
    pub last_value: Value,
}

impl CallStack {
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            last_value: Value::Null,
        }
    }

    pub fn new_frame(&mut self, frame: Rc<RefCell<StackFrame>>) {
        self.frames.push(frame);
    }

    pub fn end_frame(&mut self) {
        self.frames.pop();
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn current(&self) -> Option<&Rc<RefCell<StackFrame>>> {
        self.frames.last()
    }

    pub fn frame_at(&self, index: usize) -> Option<&Rc<RefCell<StackFrame>>> {
        self.frames.get(index)
    }

    pub fn frames(&self) -> &[Rc<RefCell<StackFrame>>] {
        &self.frames
    }

    pub fn current_method(&self) -> Option<Rc<Method>> {
        self.current().map(|frame| frame.borrow().method.clone())
    }

    pub fn current_module(&self) -> Option<Rc<RefCell<RtModule>>> {
        self.current().map(|frame| frame.borrow().module.clone())
    }

    pub fn current_self(&self) -> Value {
        self.current()
            .map(|frame| frame.borrow().self_value.clone())
            .unwrap_or(Value::Null)
    }

    /// Mark every frame above `depth` aborted. The frames stay on the stack
    /// until their dispatch loops observe the flag and return — exception
    /// propagation is a pure control transfer, no exception object travels
    /// through the native call stack.
    pub fn unwind_to(&mut self, depth: usize) {
        for frame in self.frames.iter().skip(depth) {
            frame.borrow_mut().aborted = true;
        }
    }
}

impl Default for CallStack {
    fn default() -> Self {
        Self::new()
    }
}
