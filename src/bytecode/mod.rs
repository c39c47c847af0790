//! Bytecode: the instruction set, compiled containers, the dead-code
//! optimizer, and the on-disk cache codec.

pub mod cache;
pub mod instruction;
pub mod method;
pub mod optimizer;

pub use instruction::{BinaryOpKind, Instruction, OpCode, UnaryOpKind, RETURN_SENTINEL};
pub use method::{ClassDef, CompiledModule, Constant, EnumDef, Method};
