//! The virtual machine: instruction dispatch, globals and module
//! resolution, imports, and the exception-handler stack.
//!
//! Each frame runs its own dispatch loop; invoking a compiled callable
//! recurses into a nested loop for the callee's frame. Unwinding marks
//! intermediate frames aborted and lets the recursion unravel — see
//! `vm_exceptions`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::bytecode::instruction::{
    BinaryOpKind, Instruction, OpCode, UnaryOpKind, RETURN_SENTINEL,
};
use crate::bytecode::method::{CompiledModule, Constant};
use crate::compiler::compile_module;
use crate::compiler::compiler_stmts::module_stem;
use crate::error::RuntimeError;
use crate::parser::parse_source;
use crate::span::Span;

use super::frame::StackFrame;
use super::modules::{self, RtModule};
use super::object::{instance_of, set_attribute};
use super::stack::CallStack;
use super::value::{Closure, Dict, MapKey, Value};

/// A registered try-region handler: the call-stack depth it was registered
/// at and the absolute address of its except region.
#[derive(Debug, Clone, Copy)]
pub struct ExceptionHandler {
    pub frame_depth: usize,
    pub address: usize,
}

type Loader = Box<dyn Fn(&str) -> Result<String, RuntimeError>>;

/// One single-threaded execution engine. Runtime values are `Rc`-based and
/// deliberately not `Send`: a threading collaborator runs one VM per thread
/// with its own globals rather than sharing this one.
pub struct Vm {
    pub stack: CallStack,
    /// Process-wide globals, checked before the current module's attributes.
    pub globals: Dict<Value>,
    pub handlers: Vec<ExceptionHandler>,
    /// The most recently caught exception, readable via LoadException.
    pub last_exception: Value,
    /// Set between a raise and the handler's BeginExcept; call results must
    /// not be pushed while an exception is in flight.
    pub(crate) in_flight: Option<Value>,
    /// Compiled modules cached by resolution path.
    pub modules: HashMap<String, Rc<RefCell<RtModule>>>,
    /// Captured print output, for tests and embedders.
    pub output: Vec<String>,
    loader: Loader,
}

impl Vm {
    pub fn new() -> Self {
        let mut vm = Self {
            stack: CallStack::new(),
            globals: Dict::default(),
            handlers: Vec::new(),
            last_exception: Value::Null,
            in_flight: None,
            modules: HashMap::new(),
            output: Vec::new(),
            loader: Box::new(default_loader),
        };
        super::builtins::install(&mut vm);
        vm
    }

    /// Replace the import source loader (embedders and tests).
    pub fn set_loader(
        &mut self,
        loader: impl Fn(&str) -> Result<String, RuntimeError> + 'static,
    ) {
        self.loader = Box::new(loader);
    }

    /// Execute a compiled module eagerly and return the value its
    /// initializer left behind.
    pub fn run_module(
        &mut self,
        compiled: &CompiledModule,
        path: &str,
    ) -> Result<Value, RuntimeError> {
        let module = modules::instantiate(compiled, path);
        self.modules.insert(path.to_string(), module.clone());
        self.initialize_module(&module)?;
        Ok(self.stack.last_value.clone())
    }

    /// Run a module's initializer once; later calls are no-ops.
    pub fn initialize_module(
        &mut self,
        module: &Rc<RefCell<RtModule>>,
    ) -> Result<(), RuntimeError> {
        if module.borrow().initialized {
            return Ok(());
        }
        module.borrow_mut().initialized = true;
        let initializer = module.borrow().initializer.clone();
        let frame = StackFrame::new(initializer, module.clone(), Value::Null);
        self.execute_frame(frame)
    }

    /// Push a frame, run its dispatch loop, pop it. `Err` is fatal only —
    /// catchable conditions were already routed to a handler.
    pub(crate) fn execute_frame(&mut self, frame: StackFrame) -> Result<(), RuntimeError> {
        let frame = Rc::new(RefCell::new(frame));
        self.stack.new_frame(frame.clone());
        let result = self.run(&frame);
        self.stack.end_frame();
        result
    }

    /// The dispatch loop: fetch, advance, execute, until the instruction
    /// pointer passes the body (Return parks it on a sentinel past the end)
    /// or the frame is aborted by unwinding.
    fn run(&mut self, frame: &Rc<RefCell<StackFrame>>) -> Result<(), RuntimeError> {
        loop {
            let instr = {
                let f = frame.borrow();
                if f.aborted || f.ip >= f.method.body.len() {
                    break;
                }
                f.method.body[f.ip]
            };
            frame.borrow_mut().ip += 1;

            if let Err(err) = self.execute(frame, instr) {
                self.raise_from_error(err)?;
            }
        }
        Ok(())
    }

    fn execute(
        &mut self,
        frame: &Rc<RefCell<StackFrame>>,
        instr: Instruction,
    ) -> Result<(), RuntimeError> {
        let span = instr.span;
        let operand = instr.operand;

        match instr.op {
            OpCode::Pop => {
                self.pop(frame, span)?;
            }
            OpCode::Dup => {
                let value = self.peek(frame, span)?;
                self.push(frame, value);
            }

            OpCode::LoadConst => {
                let constant = self.constant(frame, operand, span)?;
                let module = frame.borrow().module.clone();
                let value = modules::constant_to_value(&constant, &module);
                self.push(frame, value);
            }
            OpCode::LoadLocal => {
                let value = {
                    let f = frame.borrow();
                    let locals = f.locals.borrow();
                    locals.get(operand as usize).cloned()
                };
                match value {
                    Some(value) => self.push(frame, value),
                    None => {
                        return Err(RuntimeError::internal(
                            format!("local slot {} out of range", operand),
                            span,
                        ))
                    }
                }
            }
            OpCode::StoreLocal => {
                let value = self.pop(frame, span)?;
                let f = frame.borrow();
                let mut locals = f.locals.borrow_mut();
                match locals.get_mut(operand as usize) {
                    Some(slot) => *slot = value,
                    None => {
                        return Err(RuntimeError::internal(
                            format!("local slot {} out of range", operand),
                            span,
                        ))
                    }
                }
            }
            OpCode::LoadGlobal => {
                let name = self.constant_text(frame, operand, span)?;
                let module = frame.borrow().module.clone();
                match self.resolve_name(&name, &module) {
                    Some(value) => self.push(frame, value),
                    None => return Err(RuntimeError::UndefinedVariable(name, span)),
                }
            }
            OpCode::StoreGlobal => {
                let name = self.constant_text(frame, operand, span)?;
                let value = self.pop(frame, span)?;
                if self.globals.contains_key(&name) {
                    self.globals.insert(name, value);
                } else {
                    let module = frame.borrow().module.clone();
                    module.borrow_mut().set_attribute(&name, value);
                }
            }

            OpCode::LoadAttribute => {
                let name = self.constant_text(frame, operand, span)?;
                let target = self.pop(frame, span)?;
                if let Some(value) = self.attribute_of(&target, &name, span)? {
                    self.push(frame, value);
                }
            }
            OpCode::StoreAttribute => {
                let name = self.constant_text(frame, operand, span)?;
                let target = self.pop(frame, span)?;
                let value = self.pop(frame, span)?;
                self.store_attribute(&target, &name, value, span)?;
            }
            OpCode::LoadIndex => {
                let index = self.pop(frame, span)?;
                let target = self.pop(frame, span)?;
                let value = index_get(&target, &index, span)?;
                self.push(frame, value);
            }
            OpCode::StoreIndex => {
                let index = self.pop(frame, span)?;
                let target = self.pop(frame, span)?;
                let value = self.pop(frame, span)?;
                index_set(&target, &index, value, span)?;
            }

            OpCode::Jump => {
                frame.borrow_mut().ip = operand as usize;
            }
            OpCode::JumpIfTrue => {
                let value = self.pop(frame, span)?;
                if value.is_truthy() {
                    frame.borrow_mut().ip = operand as usize;
                }
            }
            OpCode::JumpIfFalse => {
                let value = self.pop(frame, span)?;
                if !value.is_truthy() {
                    frame.borrow_mut().ip = operand as usize;
                }
            }
            OpCode::Return => {
                frame.borrow_mut().ip = RETURN_SENTINEL;
            }

            OpCode::BinOp => {
                let kind = BinaryOpKind::from_i32(operand).ok_or_else(|| {
                    RuntimeError::internal(format!("bad binary operator {}", operand), span)
                })?;
                let b = self.pop(frame, span)?;
                let a = self.pop(frame, span)?;
                if let Some(result) = self.binary_op(kind, a, b, span)? {
                    self.push(frame, result);
                }
            }
            OpCode::UnaryOp => {
                let kind = UnaryOpKind::from_i32(operand).ok_or_else(|| {
                    RuntimeError::internal(format!("bad unary operator {}", operand), span)
                })?;
                let value = self.pop(frame, span)?;
                if let Some(result) = self.unary_op(kind, value, span)? {
                    self.push(frame, result);
                }
            }

            OpCode::Invoke => {
                let args = self.pop_arguments(frame, operand as usize, span)?;
                let callee = self.pop(frame, span)?;
                if let Some(result) = self.call_value(callee, args, span)? {
                    self.push(frame, result);
                }
            }
            OpCode::InvokeSuper => {
                let args = self.pop_arguments(frame, operand as usize, span)?;
                let (self_value, module) = {
                    let f = frame.borrow();
                    (f.self_value.clone(), f.module.clone())
                };
                if let Some(result) = self.invoke_super(self_value, &module, args, span)? {
                    self.push(frame, result);
                }
            }

            OpCode::BuildList => {
                let items = self.pop_arguments(frame, operand as usize, span)?;
                self.push(frame, Value::list(items));
            }
            OpCode::BuildTuple => {
                let items = self.pop_arguments(frame, operand as usize, span)?;
                self.push(frame, Value::Tuple(Rc::new(items)));
            }
            OpCode::BuildClosure => {
                let constant = self.constant(frame, operand, span)?;
                let Constant::Method(method) = constant else {
                    return Err(RuntimeError::internal(
                        "BuildClosure operand is not a method constant",
                        span,
                    ));
                };
                let closure = {
                    let f = frame.borrow();
                    Closure {
                        method,
                        locals: f.locals.clone(),
                        self_value: f.self_value.clone(),
                        module: f.module.clone(),
                    }
                };
                self.push(frame, Value::Closure(Rc::new(closure)));
            }

            OpCode::IterReset => {
                let value = self.pop(frame, span)?;
                if let Some(iterator) = self.iter_reset(value, span)? {
                    self.push(frame, iterator);
                }
            }
            OpCode::IterMoveNext => {
                let iterator = self.peek(frame, span)?;
                if let Some(moved) = self.iter_move_next(&iterator, span)? {
                    self.push(frame, moved);
                }
            }
            OpCode::IterGetNext => {
                let iterator = self.peek(frame, span)?;
                if let Some(element) = self.iter_get_next(&iterator, span)? {
                    self.push(frame, element);
                }
            }

            OpCode::PushExceptionHandler => {
                self.handlers.push(ExceptionHandler {
                    frame_depth: self.stack.depth(),
                    address: operand as usize,
                });
            }
            OpCode::PopExceptionHandler => {
                if self.handlers.pop().is_none() {
                    return Err(RuntimeError::internal(
                        "exception handler stack underflow",
                        span,
                    ));
                }
            }
            OpCode::LoadException => {
                let exception = self.last_exception.clone();
                self.push(frame, exception);
            }
            OpCode::Raise => {
                let value = self.pop(frame, span)?;
                self.raise_value(value, span)?;
            }
            OpCode::BeginExcept => {
                self.in_flight = None;
            }
            OpCode::InstanceOf => {
                let class = self.pop(frame, span)?;
                let value = self.pop(frame, span)?;
                let class = match class {
                    Value::Class(class) => class,
                    other => {
                        return Err(RuntimeError::type_error(
                            format!("'{}' is not a class", other.type_name()),
                            span,
                        ))
                    }
                };
                self.push(frame, Value::Bool(instance_of(&value, &class)));
            }

            OpCode::Import => {
                let path = self.constant_text(frame, operand, span)?;
                let module = self.import_module(&path, span)?;
                self.push(frame, Value::Module(module));
            }
            OpCode::ImportFrom => {
                let name = self.constant_text(frame, operand, span)?;
                let source = match self.pop(frame, span)? {
                    Value::Module(source) => source,
                    other => {
                        return Err(RuntimeError::type_error(
                            format!("cannot import from '{}'", other.type_name()),
                            span,
                        ))
                    }
                };
                self.initialize_module(&source)?;
                if self.in_flight.is_some() {
                    return Ok(());
                }
                let value = source.borrow().get_attribute(&name).ok_or_else(|| {
                    RuntimeError::attribute_not_found(
                        source.borrow().name.clone(),
                        name.clone(),
                        span,
                    )
                })?;
                let module = frame.borrow().module.clone();
                module.borrow_mut().set_attribute(&name, value);
            }
            OpCode::ImportAll => {
                let source = match self.pop(frame, span)? {
                    Value::Module(source) => source,
                    other => {
                        return Err(RuntimeError::type_error(
                            format!("cannot import from '{}'", other.type_name()),
                            span,
                        ))
                    }
                };
                self.initialize_module(&source)?;
                if self.in_flight.is_some() {
                    return Ok(());
                }
                let merged: Vec<(String, Value)> = source
                    .borrow()
                    .attributes
                    .iter()
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect();
                let module = frame.borrow().module.clone();
                for (name, value) in merged {
                    module.borrow_mut().set_attribute(&name, value);
                }
            }

            OpCode::LoadSelf => {
                let self_value = frame.borrow().self_value.clone();
                self.push(frame, self_value);
            }
        }
        Ok(())
    }

    // --- Operand stack helpers ---

    /// Push routes through the stack so the most-recently-pushed value is
    /// tracked — it doubles as the implicit return value.
    pub(crate) fn push(&mut self, frame: &Rc<RefCell<StackFrame>>, value: Value) {
        self.stack.last_value = value.clone();
        frame.borrow_mut().operands.push(value);
    }

    pub(crate) fn pop(
        &mut self,
        frame: &Rc<RefCell<StackFrame>>,
        span: Span,
    ) -> Result<Value, RuntimeError> {
        frame
            .borrow_mut()
            .operands
            .pop()
            .ok_or_else(|| RuntimeError::internal("operand stack underflow", span))
    }

    fn peek(
        &self,
        frame: &Rc<RefCell<StackFrame>>,
        span: Span,
    ) -> Result<Value, RuntimeError> {
        frame
            .borrow()
            .operands
            .last()
            .cloned()
            .ok_or_else(|| RuntimeError::internal("operand stack underflow", span))
    }

    fn pop_arguments(
        &mut self,
        frame: &Rc<RefCell<StackFrame>>,
        count: usize,
        span: Span,
    ) -> Result<Vec<Value>, RuntimeError> {
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            args.push(self.pop(frame, span)?);
        }
        args.reverse();
        Ok(args)
    }

    fn constant(
        &self,
        frame: &Rc<RefCell<StackFrame>>,
        index: i32,
        span: Span,
    ) -> Result<Constant, RuntimeError> {
        let f = frame.borrow();
        let module = f.module.borrow();
        module
            .constants
            .get(index as usize)
            .cloned()
            .ok_or_else(|| {
                RuntimeError::internal(format!("constant {} out of range", index), span)
            })
    }

    fn constant_text(
        &self,
        frame: &Rc<RefCell<StackFrame>>,
        index: i32,
        span: Span,
    ) -> Result<String, RuntimeError> {
        let constant = self.constant(frame, index, span)?;
        constant
            .as_text()
            .map(str::to_string)
            .ok_or_else(|| RuntimeError::internal("expected a name constant", span))
    }

    // --- Attributes ---

    /// Attribute access on any value. Accessing an attribute of an
    /// uninitialized module runs its initializer first, memoized.
    fn attribute_of(
        &mut self,
        target: &Value,
        name: &str,
        span: Span,
    ) -> Result<Option<Value>, RuntimeError> {
        match target {
            Value::Object(object) => {
                let value = object.borrow().get_attribute(name).ok_or_else(|| {
                    RuntimeError::attribute_not_found(
                        object.borrow().class_name(),
                        name,
                        span,
                    )
                })?;
                Ok(Some(value))
            }
            Value::Module(module) => {
                self.initialize_module(module)?;
                if self.in_flight.is_some() {
                    return Ok(None);
                }
                let value = module.borrow().get_attribute(name).ok_or_else(|| {
                    RuntimeError::attribute_not_found(
                        module.borrow().name.clone(),
                        name,
                        span,
                    )
                })?;
                Ok(Some(value))
            }
            Value::Enum(def) => {
                let value = def.member(name).ok_or_else(|| {
                    RuntimeError::attribute_not_found(def.name.clone(), name, span)
                })?;
                Ok(Some(Value::Int(value as i64)))
            }
            Value::Class(class) => {
                let method = class.def.method(name).ok_or_else(|| {
                    RuntimeError::attribute_not_found(class.def.name.clone(), name, span)
                })?;
                Ok(Some(Value::Method(Rc::new(super::value::MethodValue {
                    method: method.clone(),
                    module: class.module.clone(),
                }))))
            }
            other => Err(RuntimeError::attribute_not_found(
                other.type_name(),
                name,
                span,
            )),
        }
    }

    fn store_attribute(
        &mut self,
        target: &Value,
        name: &str,
        value: Value,
        span: Span,
    ) -> Result<(), RuntimeError> {
        match target {
            Value::Object(object) => {
                set_attribute(object, name, value);
                Ok(())
            }
            Value::Module(module) => {
                self.initialize_module(module)?;
                if self.in_flight.is_some() {
                    return Ok(());
                }
                module.borrow_mut().set_attribute(name, value);
                Ok(())
            }
            other => Err(RuntimeError::type_error(
                format!("cannot set attribute on '{}'", other.type_name()),
                span,
            )),
        }
    }

    // --- Imports ---

    /// Resolve and cache a module by path. The module is compiled but not
    /// initialized; its initializer runs lazily on first attribute access.
    pub(crate) fn import_module(
        &mut self,
        path: &str,
        span: Span,
    ) -> Result<Rc<RefCell<RtModule>>, RuntimeError> {
        if let Some(module) = self.modules.get(path) {
            return Ok(module.clone());
        }

        let source = (self.loader)(path).map_err(|err| RuntimeError::Io {
            message: format!("cannot load module '{}': {}", path, err),
            span,
        })?;
        let program = parse_source(&source).map_err(|errors| RuntimeError::ModuleSyntax {
            module: path.to_string(),
            message: errors.to_string(),
        })?;
        let compiled =
            compile_module(&module_stem(path), &program).map_err(|errors| {
                RuntimeError::ModuleSyntax {
                    module: path.to_string(),
                    message: errors.to_string(),
                }
            })?;

        let module = modules::instantiate(&compiled, path);
        self.modules.insert(path.to_string(), module.clone());
        Ok(module)
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

fn default_loader(path: &str) -> Result<String, RuntimeError> {
    let with_extension = format!("{}.vsp", path);
    let candidate = if std::path::Path::new(path).extension().is_some() {
        path.to_string()
    } else if std::path::Path::new(&with_extension).exists() {
        with_extension
    } else {
        path.to_string()
    };
    std::fs::read_to_string(&candidate).map_err(|err| RuntimeError::Io {
        message: format!("{}: {}", candidate, err),
        span: Span::default(),
    })
}

// --- Indexing ---

fn index_get(target: &Value, index: &Value, span: Span) -> Result<Value, RuntimeError> {
    match (target, index) {
        (Value::List(items), Value::Int(i)) => {
            let items = items.borrow();
            let idx = normalize_index(*i, items.len());
            items
                .get(idx)
                .cloned()
                .ok_or(RuntimeError::IndexOutOfBounds {
                    index: *i,
                    length: items.len(),
                    span,
                })
        }
        (Value::Tuple(items), Value::Int(i)) => {
            let idx = normalize_index(*i, items.len());
            items
                .get(idx)
                .cloned()
                .ok_or(RuntimeError::IndexOutOfBounds {
                    index: *i,
                    length: items.len(),
                    span,
                })
        }
        (Value::Str(s), Value::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            let idx = normalize_index(*i, chars.len());
            chars
                .get(idx)
                .map(|c| Value::string(c.to_string()))
                .ok_or(RuntimeError::IndexOutOfBounds {
                    index: *i,
                    length: chars.len(),
                    span,
                })
        }
        (Value::Bytes(bytes), Value::Int(i)) => {
            let idx = normalize_index(*i, bytes.len());
            bytes
                .get(idx)
                .map(|&b| Value::Int(b as i64))
                .ok_or(RuntimeError::IndexOutOfBounds {
                    index: *i,
                    length: bytes.len(),
                    span,
                })
        }
        (Value::Map(entries), key) => {
            let map_key = MapKey::from_value(key).ok_or_else(|| {
                RuntimeError::type_error(
                    format!("'{}' cannot be used as a map key", key.type_name()),
                    span,
                )
            })?;
            entries
                .borrow()
                .get(&map_key)
                .cloned()
                .ok_or(RuntimeError::KeyNotFound {
                    key: map_key.to_string(),
                    span,
                })
        }
        _ => Err(RuntimeError::type_error(
            format!(
                "cannot index '{}' with '{}'",
                target.type_name(),
                index.type_name()
            ),
            span,
        )),
    }
}

fn index_set(
    target: &Value,
    index: &Value,
    value: Value,
    span: Span,
) -> Result<(), RuntimeError> {
    match (target, index) {
        (Value::List(items), Value::Int(i)) => {
            let mut items = items.borrow_mut();
            let len = items.len();
            let idx = normalize_index(*i, len);
            match items.get_mut(idx) {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => Err(RuntimeError::IndexOutOfBounds {
                    index: *i,
                    length: len,
                    span,
                }),
            }
        }
        (Value::Map(entries), key) => {
            let map_key = MapKey::from_value(key).ok_or_else(|| {
                RuntimeError::type_error(
                    format!("'{}' cannot be used as a map key", key.type_name()),
                    span,
                )
            })?;
            entries.borrow_mut().insert(map_key, value);
            Ok(())
        }
        _ => Err(RuntimeError::type_error(
            format!("cannot assign into '{}'", target.type_name()),
            span,
        )),
    }
}

/// Negative indices count from the end.
fn normalize_index(index: i64, length: usize) -> usize {
    if index < 0 {
        (length as i64 + index).max(-1) as usize
    } else {
        index as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{compile_module_with, CompilerOptions};
    use pretty_assertions::assert_eq;

    fn run(source: &str) -> (Vm, Value) {
        let program = parse_source(source).expect("parse error");
        let module = compile_module("main", &program).expect("compile error");
        let mut vm = Vm::new();
        let value = vm.run_module(&module, "main").expect("runtime error");
        (vm, value)
    }

    fn run_value(source: &str) -> Value {
        run(source).1
    }

    fn run_err(source: &str) -> RuntimeError {
        let program = parse_source(source).expect("parse error");
        let module = compile_module("main", &program).expect("compile error");
        let mut vm = Vm::new();
        vm.run_module(&module, "main").expect_err("expected a runtime error")
    }

    fn main_attribute(vm: &Vm, name: &str) -> Value {
        vm.modules["main"].borrow().get_attribute(name).unwrap_or(Value::Null)
    }

    // --- Basics ---

    #[test]
    fn test_while_loop_counts_to_five() {
        // x = 1; while (x < 5) { x = x + 1; } return x;  =>  5
        let value = run_value("x = 1; while (x < 5) { x = x + 1; } return x;");
        assert_eq!(value, Value::Int(5));
    }

    #[test]
    fn test_foreach_invokes_print_in_order() {
        let (vm, _) = run("for (i in [1, 2, 3]) { print(i); }");
        assert_eq!(vm.output, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_except_body_runs_exactly_once_and_continues() {
        let (vm, value) = run(
            r#"
            try { print("try"); raise TypeError(); print("unreached"); }
            except (e) { print("except"); }
            print("after");
            return 99;
            "#,
        );
        assert_eq!(vm.output, vec!["try", "except", "after"]);
        assert_eq!(value, Value::Int(99));
    }

    #[test]
    fn test_arithmetic_and_precedence() {
        assert_eq!(run_value("return 2 + 3 * 4;"), Value::Int(14));
        assert_eq!(run_value("return (2 + 3) * 4;"), Value::Int(20));
        assert_eq!(run_value("return 7 % 3;"), Value::Int(1));
        assert_eq!(run_value("return 1 + 2.5;"), Value::Float(3.5));
        assert_eq!(run_value("return -3 * -2;"), Value::Int(6));
    }

    #[test]
    fn test_string_operations() {
        assert_eq!(
            run_value(r#"return "foo" + "bar";"#),
            Value::string("foobar")
        );
        assert_eq!(run_value(r#"return "ab" * 3;"#), Value::string("ababab"));
        assert_eq!(run_value(r#"return "abc"[1];"#), Value::string("b"));
        assert_eq!(run_value(r#"return len("abc");"#), Value::Int(3));
    }

    #[test]
    fn test_logical_operators_short_circuit() {
        assert_eq!(run_value("return true and 5;"), Value::Int(5));
        assert_eq!(run_value("return false and missing();"), Value::Bool(false));
        assert_eq!(run_value("return null or 7;"), Value::Int(7));
        assert_eq!(run_value("return 3 or missing();"), Value::Int(3));
        assert_eq!(run_value("return not null;"), Value::Bool(true));
    }

    #[test]
    fn test_if_elif_else_chain() {
        let source = "
            function grade(n) {
                if (n < 10) { return \"low\"; }
                elif (n < 20) { return \"mid\"; }
                else { return \"high\"; }
            }
            return (grade(5), grade(15), grade(25));
        ";
        let Value::Tuple(items) = run_value(source) else {
            panic!("expected tuple");
        };
        assert_eq!(items[0], Value::string("low"));
        assert_eq!(items[1], Value::string("mid"));
        assert_eq!(items[2], Value::string("high"));
    }

    #[test]
    fn test_assignment_is_an_expression() {
        let value = run_value("x = 0; y = (x = 5) + 1; return (x, y);");
        assert_eq!(
            value,
            Value::Tuple(Rc::new(vec![Value::Int(5), Value::Int(6)]))
        );
    }

    #[test]
    fn test_break_exits_only_the_innermost_loop() {
        let value = run_value(
            "
            total = 0;
            for (i in [1, 2, 3]) {
                while (true) { break; }
                total = total + i;
            }
            return total;
            ",
        );
        assert_eq!(value, Value::Int(6));
    }

    // --- Functions and closures ---

    #[test]
    fn test_function_call_and_recursion() {
        let value = run_value(
            "
            function fib(n) {
                if (n < 2) { return n; }
                return fib(n - 1) + fib(n - 2);
            }
            return fib(10);
            ",
        );
        assert_eq!(value, Value::Int(55));
    }

    #[test]
    fn test_function_without_return_yields_null() {
        assert_eq!(run_value("function f() { 1 + 1; } return f();"), Value::Null);
    }

    #[test]
    fn test_closure_mutation_is_visible_in_enclosing_frame() {
        let value = run_value(
            "
            function counter() {
                count = 0;
                inc = function () { count = count + 1; return count; };
                inc();
                inc();
                return count;
            }
            return counter();
            ",
        );
        assert_eq!(value, Value::Int(2));
    }

    #[test]
    fn test_enclosing_mutation_is_visible_in_closure() {
        let value = run_value(
            "
            function f() {
                x = 1;
                get = function () { return x; };
                x = 42;
                return get();
            }
            return f();
            ",
        );
        assert_eq!(value, Value::Int(42));
    }

    #[test]
    fn test_escaped_closure_keeps_locals_alive() {
        let value = run_value(
            "
            function make_adder(n) {
                return function (x) { return x + n; };
            }
            add5 = make_adder(5);
            add9 = make_adder(9);
            return (add5(1), add9(1));
            ",
        );
        assert_eq!(
            value,
            Value::Tuple(Rc::new(vec![Value::Int(6), Value::Int(10)]))
        );
    }

    #[test]
    fn test_nested_function_can_recurse_through_its_slot() {
        let value = run_value(
            "
            function outer(n) {
                function fact(k) {
                    if (k < 2) { return 1; }
                    return k * fact(k - 1);
                }
                return fact(n);
            }
            return outer(5);
            ",
        );
        assert_eq!(value, Value::Int(120));
    }

    #[test]
    fn test_variadic_function_collects_rest() {
        let value = run_value(
            "
            function f(first, rest...) { return (first, len(rest), rest[1]); }
            return f(10, 20, 30);
            ",
        );
        assert_eq!(
            value,
            Value::Tuple(Rc::new(vec![
                Value::Int(10),
                Value::Int(2),
                Value::Int(30)
            ]))
        );
    }

    #[test]
    fn test_wrong_arity_raises_catchable_argument_error() {
        let value = run_value(
            "
            function f(a, b) { return a + b; }
            try { f(1); } except (e : ArgumentError) { return \"caught\"; }
            return \"not\";
            ",
        );
        assert_eq!(value, Value::string("caught"));
    }

    // --- Collections and iteration ---

    #[test]
    fn test_list_and_map_indexing() {
        assert_eq!(run_value("a = [1, 2, 3]; a[0] = 9; return a[0] + a[2];"), Value::Int(12));
        assert_eq!(run_value("a = [1, 2, 3]; return a[-1];"), Value::Int(3));
        assert_eq!(
            run_value(r#"m = map(); m["k"] = 5; m["k"] = m["k"] + 1; return m["k"];"#),
            Value::Int(6)
        );
    }

    #[test]
    fn test_missing_map_key_raises_key_not_found() {
        let value = run_value(
            r#"m = map(); try { x = m["nope"]; } except (e : KeyNotFoundError) { return "caught"; } return "not";"#,
        );
        assert_eq!(value, Value::string("caught"));
    }

    #[test]
    fn test_foreach_over_tuple_string_map_and_range() {
        let (vm, _) = run(
            r#"
            for (x in (1, 2)) { print(x); }
            for (c in "ab") { print(c); }
            m = map("k1", 1, "k2", 2);
            for (k in m) { print(k); }
            for (n in range(1, 3)) { print(n); }
            "#,
        );
        assert_eq!(vm.output, vec!["1", "2", "a", "b", "k1", "k2", "1", "2", "3"]);
    }

    #[test]
    fn test_user_object_iterator_protocol() {
        let (vm, _) = run(
            "
            class Countdown {
                function init(n) { this.n = n; this.cur = 0; }
                function _iterReset() { this.cur = this.n + 1; return null; }
                function _iterMoveNext() { this.cur = this.cur - 1; return this.cur > 0; }
                function _iterGetNext() { return this.cur; }
            }
            for (x in Countdown(3)) { print(x); }
            ",
        );
        assert_eq!(vm.output, vec!["3", "2", "1"]);
    }

    #[test]
    fn test_non_iterable_raises_type_error() {
        let value = run_value(
            "try { for (x in 5) { print(x); } } except (e : TypeError) { return \"caught\"; } return \"not\";",
        );
        assert_eq!(value, Value::string("caught"));
    }

    // --- Classes and the object model ---

    #[test]
    fn test_class_construction_and_methods() {
        let value = run_value(
            "
            class Point {
                function init(x, y) { this.x = x; this.y = y; }
                function sum() { return this.x + this.y; }
            }
            p = Point(3, 4);
            return p.sum();
            ",
        );
        assert_eq!(value, Value::Int(7));
    }

    #[test]
    fn test_inheritance_through_super() {
        let value = run_value(
            r#"
            class Animal {
                function init(name) { this.name = name; }
                function describe() { return this.name; }
                function speak() { return "..."; }
            }
            class Dog : Animal {
                function init(name) { super(name); }
                function speak() { return "woof"; }
            }
            d = Dog("rex");
            return (d.speak(), d.describe(), d.name);
            "#,
        );
        assert_eq!(
            value,
            Value::Tuple(Rc::new(vec![
                Value::string("woof"),
                Value::string("rex"),
                Value::string("rex"),
            ]))
        );
    }

    #[test]
    fn test_inherited_field_write_through() {
        let value = run_value(
            r#"
            class Animal {
                function init(name) { this.name = name; }
                function describe() { return this.name; }
            }
            class Dog : Animal {
                function init(name) { super(name); }
            }
            d = Dog("rex");
            d.name = "max";
            return d.describe();
            "#,
        );
        // The write went through to the ancestor holding the field, so the
        // ancestor-bound method observes it.
        assert_eq!(value, Value::string("max"));
    }

    #[test]
    fn test_operator_overloading_dispatches_to_methods() {
        let value = run_value(
            "
            class Vec {
                function init(x) { this.x = x; }
                function _add(other) { return Vec(this.x + other.x); }
                function _equals(other) { return this.x == other.x; }
                function _lessThan(other) { return this.x < other.x; }
            }
            v = Vec(1) + Vec(2);
            return (v.x, Vec(3) == v, Vec(0) < v);
            ",
        );
        assert_eq!(
            value,
            Value::Tuple(Rc::new(vec![
                Value::Int(3),
                Value::Bool(true),
                Value::Bool(true)
            ]))
        );
    }

    #[test]
    fn test_object_equality_defaults_to_identity() {
        let value = run_value(
            "
            class Box { function init() { this.v = 0; } }
            a = Box();
            b = Box();
            return (a == a, a == b);
            ",
        );
        assert_eq!(
            value,
            Value::Tuple(Rc::new(vec![Value::Bool(true), Value::Bool(false)]))
        );
    }

    #[test]
    fn test_plain_object_invocation_raises_not_supported() {
        let value = run_value(
            "
            class Box { function init() { this.v = 0; } }
            b = Box();
            try { b(); } except (e : NotSupportedError) { return \"caught\"; }
            return \"not\";
            ",
        );
        assert_eq!(value, Value::string("caught"));
    }

    #[test]
    fn test_missing_attribute_raises_attribute_error() {
        let value = run_value(
            "
            class Box { function init() { this.v = 0; } }
            b = Box();
            try { x = b.missing; } except (e : AttributeError) { return \"caught\"; }
            return \"not\";
            ",
        );
        assert_eq!(value, Value::string("caught"));
    }

    #[test]
    fn test_enum_members_are_integers() {
        let value = run_value("enum Color { Red, Green, Blue } return (Color.Green, Color.Blue);");
        assert_eq!(
            value,
            Value::Tuple(Rc::new(vec![Value::Int(1), Value::Int(2)]))
        );
    }

    // --- Exceptions ---

    #[test]
    fn test_unwinding_across_three_frames() {
        let (vm, value) = run(
            "
            function level3() { raise ArgumentError(); }
            function level2() { return level3(); }
            function level1() {
                try { level2(); } except (e) { return type(e); }
                return \"not reached\";
            }
            return level1();
            ",
        );
        assert_eq!(value, Value::string("ArgumentError"));
        // Every aborted frame was popped on the way out.
        assert_eq!(vm.stack.depth(), 0);
        assert!(vm.handlers.is_empty());
    }

    #[test]
    fn test_load_exception_returns_the_raised_object() {
        let value = run_value(
            "
            class MyError { function init(code) { this.code = code; } }
            try { raise MyError(42); } except (e) { return e.code; }
            ",
        );
        assert_eq!(value, Value::Int(42));
    }

    #[test]
    fn test_unmatched_filter_rethrows_to_outer_handler() {
        let value = run_value(
            "
            function f() {
                try { raise TypeError(); }
                except (e : ArgumentError) { return \"wrong\"; }
                return \"no\";
            }
            r = \"\";
            try { f(); } except (e : TypeError) { r = \"outer\"; }
            return r;
            ",
        );
        assert_eq!(value, Value::string("outer"));
    }

    #[test]
    fn test_filter_matches_exception_base_class() {
        // Built-in exception instances carry an Exception ancestor, so an
        // Exception filter catches every built-in kind.
        let value = run_value(
            "try { raise TypeError(); } except (e : Exception) { return \"caught\"; } return \"not\";",
        );
        assert_eq!(value, Value::string("caught"));
    }

    #[test]
    fn test_nested_try_regions_pop_in_order() {
        let (vm, _) = run(
            r#"
            try {
                try { raise TypeError(); } except (e) { print("inner"); }
                raise ArgumentError();
            } except (e) { print("outer"); }
            "#,
        );
        assert_eq!(vm.output, vec!["inner", "outer"]);
        assert!(vm.handlers.is_empty());
    }

    #[test]
    fn test_return_inside_try_unregisters_the_handler() {
        let (vm, value) = run(
            "
            function f() { try { return 1; } except (e) { return 2; } }
            a = f();
            b = 0;
            try { raise TypeError(); } except (e) { b = 1; }
            return (a, b);
            ",
        );
        assert_eq!(
            value,
            Value::Tuple(Rc::new(vec![Value::Int(1), Value::Int(1)]))
        );
        assert!(vm.handlers.is_empty());
    }

    #[test]
    fn test_break_crossing_a_try_region_unregisters_the_handler() {
        let (vm, value) = run(
            "
            total = 0;
            while (true) { try { break; } except (e) { total = 9; } }
            try { raise TypeError(); } except (e) { total = total + 1; }
            return total;
            ",
        );
        assert_eq!(value, Value::Int(1));
        assert!(vm.handlers.is_empty());
    }

    #[test]
    fn test_native_fault_is_catchable() {
        let value = run_value(
            "try { len(5); } except (e : TypeError) { return \"caught\"; } return \"not\";",
        );
        assert_eq!(value, Value::string("caught"));
    }

    #[test]
    fn test_uncaught_exception_is_fatal_with_stack_trace() {
        let err = run_err("function boom() { raise Exception(); } boom();");
        let RuntimeError::Uncaught { trace, .. } = err else {
            panic!("expected an uncaught exception, got {}", err);
        };
        assert!(trace.contains("at boom"));
        assert!(trace.contains("main"));
    }

    #[test]
    fn test_raising_a_plain_value_works() {
        let value = run_value(
            r#"try { raise "boom"; } except (e) { return e + "!"; }"#,
        );
        assert_eq!(value, Value::string("boom!"));
    }

    #[test]
    fn test_division_by_zero_is_catchable() {
        let value = run_value(
            "try { x = 1 / 0; } except (e : TypeError) { return \"caught\"; } return \"not\";",
        );
        assert_eq!(value, Value::string("caught"));
    }

    // --- Globals, scoping, modules ---

    #[test]
    fn test_top_level_assignments_are_module_attributes() {
        let (vm, _) = run("x = 10; y = x * 2;");
        assert_eq!(main_attribute(&vm, "x"), Value::Int(10));
        assert_eq!(main_attribute(&vm, "y"), Value::Int(20));
    }

    #[test]
    fn test_block_locals_do_not_leak_to_module_scope() {
        let err = run_err("if (true) { tmp = 9; } return tmp;");
        let RuntimeError::Uncaught { message, .. } = err else {
            panic!("expected an uncaught exception");
        };
        assert!(message.contains("Undefined variable"), "{}", message);
    }

    #[test]
    fn test_import_binds_module_by_stem() {
        let program = parse_source(
            "import \"lib/mathx\"; a = mathx.double(21); return a;",
        )
        .expect("parse");
        let module = compile_module("main", &program).expect("compile");
        let mut vm = Vm::new();
        vm.set_loader(|path| match path {
            "lib/mathx" => Ok("function double(x) { return x * 2; }".to_string()),
            other => Err(RuntimeError::Io {
                message: format!("no such module {}", other),
                span: Span::default(),
            }),
        });
        let value = vm.run_module(&module, "main").expect("run");
        assert_eq!(value, Value::Int(42));
    }

    #[test]
    fn test_import_from_and_import_all_merge_attributes() {
        let program = parse_source(
            "from \"m\" import twice; from \"n\" import *; return (twice, thrice);",
        )
        .expect("parse");
        let module = compile_module("main", &program).expect("compile");
        let mut vm = Vm::new();
        vm.set_loader(|path| match path {
            "m" => Ok("twice = 2;".to_string()),
            "n" => Ok("thrice = 3; quad = 4;".to_string()),
            other => Err(RuntimeError::Io {
                message: format!("no such module {}", other),
                span: Span::default(),
            }),
        });
        let value = vm.run_module(&module, "main").expect("run");
        assert_eq!(
            value,
            Value::Tuple(Rc::new(vec![Value::Int(2), Value::Int(3)]))
        );
        // Wildcard import merged everything into the importing module.
        assert_eq!(main_attribute(&vm, "quad"), Value::Int(4));
    }

    #[test]
    fn test_module_initializer_runs_lazily_and_once() {
        let program = parse_source(
            "import \"m\"; a = m.val; b = m.val; return a + b;",
        )
        .expect("parse");
        let module = compile_module("main", &program).expect("compile");
        let mut vm = Vm::new();
        vm.set_loader(|path| match path {
            "m" => Ok("print(\"init\"); val = 5;".to_string()),
            other => Err(RuntimeError::Io {
                message: format!("no such module {}", other),
                span: Span::default(),
            }),
        });
        let value = vm.run_module(&module, "main").expect("run");
        assert_eq!(value, Value::Int(10));
        // Two attribute accesses, one initialization.
        assert_eq!(vm.output, vec!["init"]);
    }

    #[test]
    fn test_import_without_access_does_not_initialize() {
        let program = parse_source("import \"m\";").expect("parse");
        let module = compile_module("main", &program).expect("compile");
        let mut vm = Vm::new();
        vm.set_loader(|path| match path {
            "m" => Ok("print(\"init\");".to_string()),
            other => Err(RuntimeError::Io {
                message: format!("no such module {}", other),
                span: Span::default(),
            }),
        });
        vm.run_module(&module, "main").expect("run");
        assert!(vm.output.is_empty());
    }

    #[test]
    fn test_syntax_error_in_imported_module_is_reported() {
        let program = parse_source("from \"bad\" import *;").expect("parse");
        let module = compile_module("main", &program).expect("compile");
        let mut vm = Vm::new();
        vm.set_loader(|_| Ok("x = = 1;".to_string()));
        let err = vm.run_module(&module, "main").expect_err("expected failure");
        let RuntimeError::Uncaught { message, .. } = err else {
            panic!("expected an uncaught SyntaxError, got {}", err);
        };
        assert!(message.contains("SyntaxError"), "{}", message);
    }

    // --- Optimizer equivalence ---

    #[test]
    fn test_optimized_and_unoptimized_programs_agree() {
        let sources = [
            "x = 1; while (x < 5) { x = x + 1; } return x;",
            "
            function grade(n) {
                if (n < 10) { return \"low\"; }
                elif (n < 20) { return \"mid\"; }
                return \"high\";
            }
            out = \"\";
            for (n in [5, 15, 25]) { out = out + grade(n); }
            return out;
            ",
            "
            function f() {
                try { raise TypeError(); } except (e : ArgumentError) { return 1; }
                return 2;
            }
            try { return f(); } except (e) { return 3; }
            ",
            "total = 0; for (i in range(1, 10)) { if (i % 2 == 0) { total = total + i; } } return total;",
        ];
        for source in sources {
            let program = parse_source(source).expect("parse");
            let optimized = compile_module("main", &program).expect("compile");
            let unoptimized = compile_module_with(
                "main",
                &program,
                CompilerOptions { optimize: false },
            )
            .expect("compile");

            let mut vm_a = Vm::new();
            let mut vm_b = Vm::new();
            let a = vm_a.run_module(&optimized, "main").expect("optimized run");
            let b = vm_b.run_module(&unoptimized, "main").expect("unoptimized run");
            assert_eq!(a, b, "results diverge for: {}", source);
            assert_eq!(vm_a.output, vm_b.output, "output diverges for: {}", source);
        }
    }

    // --- The implicit-return quirk ---

    #[test]
    fn test_last_pushed_value_is_the_return_value() {
        // No dedicated return slot: the value a frame pushed last is what
        // the caller observes.
        assert_eq!(run_value("function f() { return 5; } return f();"), Value::Int(5));
        assert_eq!(run_value("return (function () { return 1 + 2; })();"), Value::Int(3));
    }
}
