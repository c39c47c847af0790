//! Native built-ins and the built-in exception classes.
//!
//! Natives are installed as globals through the same `NativeFunction` value
//! the FFI boundary uses: the VM invokes them exactly like compiled code.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bytecode::method::{ClassDef, CompiledModule, Method};
use crate::error::RuntimeError;
use crate::span::Span;

use super::modules::{self, RtModule};
use super::value::{ClassValue, MapKey, NativeFunction, Value, ValueMap};
use super::vm::Vm;

/// Names of the built-in exception classes. Every class except `Exception`
/// itself inherits from `Exception`.
pub const EXCEPTION_CLASSES: &[&str] = &[
    "Exception",
    "TypeError",
    "ArgumentError",
    "IndexError",
    "IOError",
    "KeyNotFoundError",
    "AttributeError",
    "SyntaxError",
    "NotSupportedError",
    "InternalError",
];

/// Install the native functions and exception classes into the VM globals.
pub fn install(vm: &mut Vm) {
    let builtins = builtins_module();

    for name in EXCEPTION_CLASSES {
        let def = ClassDef {
            name: name.to_string(),
            base: (*name != "Exception").then(|| "Exception".to_string()),
            methods: Vec::new(),
        };
        vm.globals.insert(
            name.to_string(),
            Value::Class(Rc::new(ClassValue {
                def: Rc::new(def),
                module: builtins.clone(),
            })),
        );
    }

    install_native(vm, "print", native_print);
    install_native(vm, "len", native_len);
    install_native(vm, "type", native_type);
    install_native(vm, "str", native_str);
    install_native(vm, "range", native_range);
    install_native(vm, "bytes", native_bytes);
    install_native(vm, "map", native_map);
}

fn install_native(
    vm: &mut Vm,
    name: &str,
    func: impl Fn(&mut Vm, Vec<Value>, Span) -> Result<Value, RuntimeError> + 'static,
) {
    vm.globals
        .insert(name.to_string(), Value::Native(NativeFunction::new(name, func)));
}

/// The module that owns the built-in classes; it has nothing to run.
fn builtins_module() -> Rc<RefCell<RtModule>> {
    let compiled = CompiledModule {
        name: "builtins".to_string(),
        constants: Vec::new(),
        initializer: Rc::new(Method::new("<init>")),
        attributes: Vec::new(),
        imports: Vec::new(),
    };
    let module = modules::instantiate(&compiled, "<builtins>");
    module.borrow_mut().initialized = true;
    module
}

// --- Natives ---

fn native_print(vm: &mut Vm, args: Vec<Value>, _span: Span) -> Result<Value, RuntimeError> {
    let line = args
        .iter()
        .map(|value| format!("{}", value))
        .collect::<Vec<_>>()
        .join(" ");
    println!("{}", line);
    vm.output.push(line);
    Ok(Value::Null)
}

fn native_len(_vm: &mut Vm, args: Vec<Value>, span: Span) -> Result<Value, RuntimeError> {
    expect_arity("len", &args, 1, span)?;
    let length = match &args[0] {
        Value::Str(s) => s.chars().count(),
        Value::Bytes(bytes) => bytes.len(),
        Value::List(items) => items.borrow().len(),
        Value::Tuple(items) => items.len(),
        Value::Map(entries) => entries.borrow().len(),
        other => {
            return Err(RuntimeError::type_error(
                format!("'{}' has no length", other.type_name()),
                span,
            ))
        }
    };
    Ok(Value::Int(length as i64))
}

fn native_type(_vm: &mut Vm, args: Vec<Value>, span: Span) -> Result<Value, RuntimeError> {
    expect_arity("type", &args, 1, span)?;
    let name = match &args[0] {
        Value::Object(object) => object.borrow().class_name(),
        other => other.type_name().to_string(),
    };
    Ok(Value::string(name))
}

fn native_str(_vm: &mut Vm, args: Vec<Value>, span: Span) -> Result<Value, RuntimeError> {
    expect_arity("str", &args, 1, span)?;
    Ok(Value::string(format!("{}", args[0])))
}

/// range(a, b) produces the inclusive integer list a..=b.
fn native_range(_vm: &mut Vm, args: Vec<Value>, span: Span) -> Result<Value, RuntimeError> {
    expect_arity("range", &args, 2, span)?;
    match (&args[0], &args[1]) {
        (Value::Int(start), Value::Int(end)) => {
            Ok(Value::list((*start..=*end).map(Value::Int).collect()))
        }
        _ => Err(RuntimeError::type_error(
            "range expects integer bounds",
            span,
        )),
    }
}

fn native_bytes(_vm: &mut Vm, args: Vec<Value>, span: Span) -> Result<Value, RuntimeError> {
    expect_arity("bytes", &args, 1, span)?;
    match &args[0] {
        Value::Str(s) => Ok(Value::Bytes(Rc::new(s.as_bytes().to_vec()))),
        Value::Bytes(bytes) => Ok(Value::Bytes(bytes.clone())),
        Value::List(items) => {
            let mut out = Vec::with_capacity(items.borrow().len());
            for item in items.borrow().iter() {
                match item {
                    Value::Int(n) if (0..=255).contains(n) => out.push(*n as u8),
                    other => {
                        return Err(RuntimeError::type_error(
                            format!("bytes expects ints 0-255, got {}", other),
                            span,
                        ))
                    }
                }
            }
            Ok(Value::Bytes(Rc::new(out)))
        }
        other => Err(RuntimeError::type_error(
            format!("cannot convert '{}' to bytes", other.type_name()),
            span,
        )),
    }
}

/// map() builds an empty map; map(k1, v1, k2, v2, ...) seeds it pairwise.
fn native_map(_vm: &mut Vm, args: Vec<Value>, span: Span) -> Result<Value, RuntimeError> {
    if args.len() % 2 != 0 {
        return Err(RuntimeError::argument(
            "map expects an even number of arguments",
            span,
        ));
    }
    let mut entries = ValueMap::default();
    for pair in args.chunks(2) {
        let key = MapKey::from_value(&pair[0]).ok_or_else(|| {
            RuntimeError::type_error(
                format!("'{}' cannot be used as a map key", pair[0].type_name()),
                span,
            )
        })?;
        entries.insert(key, pair[1].clone());
    }
    Ok(Value::Map(Rc::new(RefCell::new(entries))))
}

fn expect_arity(
    name: &str,
    args: &[Value],
    expected: usize,
    span: Span,
) -> Result<(), RuntimeError> {
    if args.len() != expected {
        return Err(RuntimeError::argument(
            format!("{} expects {} argument(s), got {}", name, expected, args.len()),
            span,
        ));
    }
    Ok(())
}
