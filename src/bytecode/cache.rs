//! Binary bytecode cache codec.
//!
//! Layout, in order, all integers little-endian, strings as `i32` length +
//! UTF-8 bytes:
//!
//! ```text
//! [module name][constant count: i32][constants...]
//! [initializer method][attribute count: i32][(name, value)...]
//! ```
//!
//! Each value is a one-byte type tag followed by its payload. A method
//! payload is `(name, variadic: u8, instance: u8, param-count: i32,
//! (param-name, slot: i32) x N, local-count: i32, instruction-count: i32,
//! (opcode: u8, operand: i32) x N)`. Source spans are not persisted; loaded
//! instructions carry a default span.

use std::rc::Rc;

use thiserror::Error;

use crate::span::Span;

use super::instruction::{Instruction, OpCode};
use super::method::{ClassDef, CompiledModule, Constant, EnumDef, Method};

// Value type tags.
const TAG_METHOD: u8 = 0;
const TAG_LIST: u8 = 1;
const TAG_TUPLE: u8 = 2;
const TAG_CLASS: u8 = 3;
const TAG_ENUM: u8 = 4;
const TAG_STRING: u8 = 5;
const TAG_INT: u8 = 6;
const TAG_FLOAT: u8 = 7;
const TAG_BOOL: u8 = 8;
const TAG_NAME: u8 = 9;
const TAG_NULL: u8 = 10;

/// Errors reading a cached module.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Unexpected end of cache data at offset {0}")]
    UnexpectedEof(usize),

    #[error("Unknown value tag {0}")]
    BadTag(u8),

    #[error("Unknown opcode {0}")]
    BadOpcode(u8),

    #[error("Cache data is not valid UTF-8")]
    InvalidUtf8,

    #[error("Invalid length field {0}")]
    BadLength(i64),
}

/// Serialize a compiled module into the cache format.
pub fn write_module(module: &CompiledModule) -> Vec<u8> {
    let mut w = Writer::new();
    w.string(&module.name);
    w.i32(module.constants.len() as i32);
    for constant in &module.constants {
        w.value(constant);
    }
    w.method(&module.initializer);
    w.i32(module.attributes.len() as i32);
    for (name, value) in &module.attributes {
        w.string(name);
        w.value(value);
    }
    w.buf
}

/// Deserialize a compiled module from the cache format.
pub fn read_module(bytes: &[u8]) -> Result<CompiledModule, CacheError> {
    let mut r = Reader::new(bytes);
    let name = r.string()?;

    let constant_count = r.len_field()?;
    let mut constants = Vec::with_capacity(constant_count);
    for _ in 0..constant_count {
        constants.push(r.value()?);
    }

    let initializer = Rc::new(r.method()?);

    let attr_count = r.len_field()?;
    let mut attributes = Vec::with_capacity(attr_count);
    for _ in 0..attr_count {
        let attr_name = r.string()?;
        attributes.push((attr_name, r.value()?));
    }

    Ok(CompiledModule {
        name,
        constants,
        initializer,
        attributes,
        // The cache layout does not carry the import list; imports are
        // re-discovered from the Import instructions when executed.
        imports: Vec::new(),
    })
}

// --- Writing ---

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn string(&mut self, s: &str) {
        self.i32(s.len() as i32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    fn method(&mut self, method: &Method) {
        self.string(&method.name);
        self.u8(method.variadic as u8);
        self.u8(method.is_instance as u8);
        self.i32(method.params.len() as i32);
        for (name, slot) in &method.params {
            self.string(name);
            self.i32(*slot as i32);
        }
        self.i32(method.local_count as i32);
        self.i32(method.body.len() as i32);
        for instr in &method.body {
            self.u8(instr.op as u8);
            self.i32(instr.operand);
        }
    }

    fn value(&mut self, constant: &Constant) {
        match constant {
            Constant::Method(m) => {
                self.u8(TAG_METHOD);
                self.method(m);
            }
            Constant::List(items) => {
                self.u8(TAG_LIST);
                self.i32(items.len() as i32);
                for item in items {
                    self.value(item);
                }
            }
            Constant::Tuple(items) => {
                self.u8(TAG_TUPLE);
                self.i32(items.len() as i32);
                for item in items {
                    self.value(item);
                }
            }
            Constant::Class(class) => {
                self.u8(TAG_CLASS);
                self.string(&class.name);
                match &class.base {
                    Some(base) => {
                        self.u8(1);
                        self.string(base);
                    }
                    None => self.u8(0),
                }
                self.i32(class.methods.len() as i32);
                for (name, method) in &class.methods {
                    self.string(name);
                    self.method(method);
                }
            }
            Constant::Enum(def) => {
                self.u8(TAG_ENUM);
                self.string(&def.name);
                self.i32(def.members.len() as i32);
                for (name, value) in &def.members {
                    self.string(name);
                    self.i32(*value);
                }
            }
            Constant::Str(s) => {
                self.u8(TAG_STRING);
                self.string(s);
            }
            Constant::Int(n) => {
                self.u8(TAG_INT);
                self.i64(*n);
            }
            Constant::Float(n) => {
                self.u8(TAG_FLOAT);
                self.f64(*n);
            }
            Constant::Bool(b) => {
                self.u8(TAG_BOOL);
                self.u8(*b as u8);
            }
            Constant::Name(s) => {
                self.u8(TAG_NAME);
                self.string(s);
            }
            Constant::Null => self.u8(TAG_NULL),
        }
    }
}

// --- Reading ---

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], CacheError> {
        if self.pos + count > self.data.len() {
            return Err(CacheError::UnexpectedEof(self.pos));
        }
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CacheError> {
        Ok(self.take(1)?[0])
    }

    fn i32(&mut self) -> Result<i32, CacheError> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn i64(&mut self) -> Result<i64, CacheError> {
        let bytes: [u8; 8] = self.take(8)?.try_into().expect("length checked");
        Ok(i64::from_le_bytes(bytes))
    }

    fn f64(&mut self) -> Result<f64, CacheError> {
        let bytes: [u8; 8] = self.take(8)?.try_into().expect("length checked");
        Ok(f64::from_le_bytes(bytes))
    }

    fn len_field(&mut self) -> Result<usize, CacheError> {
        let v = self.i32()?;
        if v < 0 {
            return Err(CacheError::BadLength(v as i64));
        }
        Ok(v as usize)
    }

    fn string(&mut self) -> Result<String, CacheError> {
        let len = self.len_field()?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CacheError::InvalidUtf8)
    }

    fn method(&mut self) -> Result<Method, CacheError> {
        let name = self.string()?;
        let variadic = self.u8()? != 0;
        let is_instance = self.u8()? != 0;

        let param_count = self.len_field()?;
        let mut params = Vec::with_capacity(param_count);
        for _ in 0..param_count {
            let param_name = self.string()?;
            let slot = self.i32()?;
            params.push((param_name, slot as usize));
        }

        let local_count = self.len_field()?;
        let instruction_count = self.len_field()?;
        let mut body = Vec::with_capacity(instruction_count);
        for _ in 0..instruction_count {
            let opcode = self.u8()?;
            let operand = self.i32()?;
            let op = OpCode::from_u8(opcode).ok_or(CacheError::BadOpcode(opcode))?;
            body.push(Instruction::new(op, operand, Span::default()));
        }

        Ok(Method {
            name,
            params,
            local_count,
            variadic,
            is_instance,
            body,
        })
    }

    fn value(&mut self) -> Result<Constant, CacheError> {
        let tag = self.u8()?;
        match tag {
            TAG_METHOD => Ok(Constant::Method(Rc::new(self.method()?))),
            TAG_LIST => {
                let count = self.len_field()?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.value()?);
                }
                Ok(Constant::List(items))
            }
            TAG_TUPLE => {
                let count = self.len_field()?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.value()?);
                }
                Ok(Constant::Tuple(items))
            }
            TAG_CLASS => {
                let name = self.string()?;
                let base = if self.u8()? != 0 {
                    Some(self.string()?)
                } else {
                    None
                };
                let method_count = self.len_field()?;
                let mut methods = Vec::with_capacity(method_count);
                for _ in 0..method_count {
                    let method_name = self.string()?;
                    methods.push((method_name, Rc::new(self.method()?)));
                }
                Ok(Constant::Class(Rc::new(ClassDef {
                    name,
                    base,
                    methods,
                })))
            }
            TAG_ENUM => {
                let name = self.string()?;
                let member_count = self.len_field()?;
                let mut members = Vec::with_capacity(member_count);
                for _ in 0..member_count {
                    let member_name = self.string()?;
                    let value = self.i32()?;
                    members.push((member_name, value));
                }
                Ok(Constant::Enum(Rc::new(EnumDef { name, members })))
            }
            TAG_STRING => Ok(Constant::Str(self.string()?)),
            TAG_INT => Ok(Constant::Int(self.i64()?)),
            TAG_FLOAT => Ok(Constant::Float(self.f64()?)),
            TAG_BOOL => Ok(Constant::Bool(self.u8()? != 0)),
            TAG_NAME => Ok(Constant::Name(self.string()?)),
            TAG_NULL => Ok(Constant::Null),
            other => Err(CacheError::BadTag(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::instruction::BinaryOpKind;
    use pretty_assertions::assert_eq;

    fn sample_module() -> CompiledModule {
        let add = Rc::new(Method {
            name: "add".to_string(),
            params: vec![("a".to_string(), 0), ("b".to_string(), 1)],
            local_count: 2,
            variadic: false,
            is_instance: false,
            body: vec![
                Instruction::new(OpCode::LoadLocal, 0, Span::default()),
                Instruction::new(OpCode::LoadLocal, 1, Span::default()),
                Instruction::new(OpCode::BinOp, BinaryOpKind::Add as i32, Span::default()),
                Instruction::new(OpCode::Return, 0, Span::default()),
            ],
        });
        let init = Rc::new(Method {
            name: "<init>".to_string(),
            params: Vec::new(),
            local_count: 0,
            variadic: false,
            is_instance: false,
            body: vec![
                Instruction::new(OpCode::LoadConst, 0, Span::default()),
                Instruction::new(OpCode::Return, 0, Span::default()),
            ],
        });
        let class = Rc::new(ClassDef {
            name: "Point".to_string(),
            base: Some("Object".to_string()),
            methods: vec![("init".to_string(), add.clone())],
        });
        CompiledModule {
            name: "sample".to_string(),
            constants: vec![
                Constant::Null,
                Constant::Int(42),
                Constant::Float(2.5),
                Constant::Str("hello".to_string()),
                Constant::Name("x".to_string()),
                Constant::Bool(true),
                Constant::List(vec![Constant::Int(1), Constant::Int(2)]),
                Constant::Tuple(vec![Constant::Str("a".to_string()), Constant::Null]),
            ],
            initializer: init,
            attributes: vec![
                ("add".to_string(), Constant::Method(add)),
                ("Point".to_string(), Constant::Class(class)),
                (
                    "Color".to_string(),
                    Constant::Enum(Rc::new(EnumDef {
                        name: "Color".to_string(),
                        members: vec![("Red".to_string(), 0), ("Green".to_string(), 1)],
                    })),
                ),
            ],
            imports: Vec::new(),
        }
    }

    #[test]
    fn test_round_trip_preserves_module() {
        let module = sample_module();
        let bytes = write_module(&module);
        let loaded = read_module(&bytes).expect("read back");
        assert_eq!(loaded, module);
    }

    #[test]
    fn test_round_trip_is_bit_exact() {
        let module = sample_module();
        let bytes = write_module(&module);
        let loaded = read_module(&bytes).expect("read back");
        let rewritten = write_module(&loaded);
        assert_eq!(rewritten, bytes);
    }

    #[test]
    fn test_truncated_data_is_rejected() {
        let bytes = write_module(&sample_module());
        let err = read_module(&bytes[..bytes.len() - 3]);
        assert!(matches!(err, Err(CacheError::UnexpectedEof(_))));
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        // Module name "m", one constant with a bogus tag.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.push(b'm');
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.push(99);
        assert!(matches!(read_module(&bytes), Err(CacheError::BadTag(99))));
    }
}
