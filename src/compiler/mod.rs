//! The bytecode compiler: symbol table, module/function passes, emission.

pub mod compiler;
pub mod compiler_classes;
pub mod compiler_exprs;
pub mod compiler_stmts;
pub mod symbols;

pub use compiler::{compile_module, compile_module_with, Compiler, CompilerOptions};
pub use symbols::{Symbol, SymbolKind, SymbolTable};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::instruction::{Instruction, OpCode};
    use crate::bytecode::method::{CompiledModule, Constant};
    use crate::parser::parse_source;
    use pretty_assertions::assert_eq;

    fn compile(source: &str) -> CompiledModule {
        let program = parse_source(source).expect("parse error");
        compile_module("test", &program).expect("compile error")
    }

    fn compile_unoptimized(source: &str) -> CompiledModule {
        let program = parse_source(source).expect("parse error");
        compile_module_with("test", &program, CompilerOptions { optimize: false })
            .expect("compile error")
    }

    /// Net operand-stack effect of one instruction, assuming Invoke-family
    /// results are pushed.
    fn stack_effect(instr: &Instruction) -> i32 {
        let n = instr.operand;
        match instr.op {
            OpCode::Pop => -1,
            OpCode::Dup => 1,
            OpCode::LoadConst
            | OpCode::LoadLocal
            | OpCode::LoadGlobal
            | OpCode::LoadException
            | OpCode::LoadSelf
            | OpCode::BuildClosure
            | OpCode::Import => 1,
            OpCode::StoreLocal | OpCode::StoreGlobal => -1,
            OpCode::LoadAttribute => 0,
            OpCode::StoreAttribute => -2,
            OpCode::LoadIndex => -1,
            OpCode::StoreIndex => -3,
            OpCode::Jump => 0,
            OpCode::JumpIfTrue | OpCode::JumpIfFalse => -1,
            OpCode::Return | OpCode::Raise => -1,
            OpCode::BinOp => -1,
            OpCode::UnaryOp => 0,
            OpCode::Invoke => -n,
            OpCode::InvokeSuper => 1 - n,
            OpCode::BuildList | OpCode::BuildTuple => 1 - n,
            OpCode::IterReset => 0,
            OpCode::IterMoveNext | OpCode::IterGetNext => 1,
            OpCode::PushExceptionHandler
            | OpCode::PopExceptionHandler
            | OpCode::BeginExcept => 0,
            OpCode::InstanceOf => -1,
            OpCode::ImportFrom | OpCode::ImportAll => -1,
        }
    }

    fn assert_balanced(source: &str) {
        let module = compile_unoptimized(source);
        let net: i32 = module.initializer.body.iter().map(stack_effect).sum();
        assert_eq!(net, 0, "initializer unbalanced for: {}", source);
        for (name, attr) in &module.attributes {
            if let Constant::Method(method) = attr {
                let net: i32 = method.body.iter().map(stack_effect).sum();
                assert_eq!(net, 0, "method '{}' unbalanced for: {}", name, source);
            }
        }
    }

    #[test]
    fn test_statements_leave_stack_depth_unchanged() {
        assert_balanced("x = 1;");
        assert_balanced("x = 1; y = x + 2 * 3;");
        assert_balanced("a = [1, 2]; a[0] = 5; b = a[1];");
        assert_balanced("f = function (o) { o.field = o.field + 1; return o; };");
        assert_balanced("x = 1; while (x < 5) { x = x + 1; }");
        assert_balanced("if (1 < 2) { x = 1; } elif (2 < 3) { x = 2; } else { x = 3; }");
        assert_balanced("for (i in [1, 2, 3]) { x = i; }");
        assert_balanced("try { raise 1; } except (e) { x = e; }");
        assert_balanced("try { x = 1; } except (e : Exception) { y = e; }");
        assert_balanced("b = true and false or true;");
        assert_balanced("function g(a, rest...) { for (r in rest) { a = a + r; } return a; }");
    }

    #[test]
    fn test_jump_operands_are_valid_addresses() {
        let sources = [
            "x = 0; while (x < 10) { x = x + 1; if (x == 5) { break; } }",
            "if (a) { b = 1; } elif (c) { b = 2; } else { b = 3; }",
            "try { f(); } except (e : TypeError) { g(); } except (e) { h(); }",
            "for (i in [1, 2]) { for (j in [3, 4]) { if (j == i) { break; } } }",
        ];
        for source in sources {
            let module = compile(source);
            for (index, instr) in module.initializer.body.iter().enumerate() {
                if instr.op.is_jump() {
                    let target = instr.operand as usize;
                    assert!(
                        target < module.initializer.body.len(),
                        "instruction {} of {:?} jumps out of bounds",
                        index,
                        source
                    );
                }
            }
        }
    }

    #[test]
    fn test_while_lowering_shape() {
        let module = compile_unoptimized("x = 0; while (x < 5) { x = x + 1; }");
        let body = &module.initializer.body;
        // Condition -> conditional jump to break -> body -> jump to top.
        let jif = body
            .iter()
            .position(|i| i.op == OpCode::JumpIfFalse)
            .expect("loop has a conditional exit");
        let back = body
            .iter()
            .rposition(|i| i.op == OpCode::Jump)
            .expect("loop has a back jump");
        // The back jump targets the top of the condition, before JumpIfFalse.
        assert!((body[back].operand as usize) < jif);
        // The conditional exit lands just after the back jump.
        assert_eq!(body[jif].operand as usize, back + 1);
    }

    #[test]
    fn test_foreach_lowers_to_iterator_protocol() {
        let module = compile_unoptimized("for (i in [1, 2, 3]) { x = i; }");
        let ops: Vec<OpCode> = module.initializer.body.iter().map(|i| i.op).collect();
        let reset = ops.iter().position(|&op| op == OpCode::IterReset).unwrap();
        let move_next = ops.iter().position(|&op| op == OpCode::IterMoveNext).unwrap();
        let get_next = ops.iter().position(|&op| op == OpCode::IterGetNext).unwrap();
        assert!(reset < move_next && move_next < get_next);
        // The loop variable store follows the element fetch.
        assert_eq!(ops[get_next + 1], OpCode::StoreLocal);
        // The iterator is popped after the loop exits.
        assert!(ops[get_next..].contains(&OpCode::Pop));
    }

    #[test]
    fn test_try_lowering_brackets_the_guarded_body() {
        let module = compile_unoptimized("try { x = 1; } except (e) { y = e; }");
        let ops: Vec<OpCode> = module.initializer.body.iter().map(|i| i.op).collect();
        let push = ops
            .iter()
            .position(|&op| op == OpCode::PushExceptionHandler)
            .unwrap();
        let pop = ops
            .iter()
            .position(|&op| op == OpCode::PopExceptionHandler)
            .unwrap();
        let begin = ops.iter().position(|&op| op == OpCode::BeginExcept).unwrap();
        assert!(push < pop && pop < begin);
        // The handler address points at the BeginExcept.
        assert_eq!(module.initializer.body[push].operand as usize, begin);
    }

    #[test]
    fn test_assignment_reloads_value() {
        let module = compile_unoptimized("x = 1;");
        let ops: Vec<OpCode> = module.initializer.body.iter().map(|i| i.op).collect();
        // Store then reload keeps assignment usable as an expression; the
        // statement then pops the reloaded value.
        assert_eq!(
            &ops[..4],
            &[
                OpCode::LoadConst,
                OpCode::StoreGlobal,
                OpCode::LoadGlobal,
                OpCode::Pop
            ]
        );
    }

    #[test]
    fn test_function_local_count_spans_nested_scopes() {
        let module = compile("function f(a) { x = 1; if (a) { y = 2; } z = 3; }");
        let Constant::Method(method) = &module.attributes[0].1 else {
            panic!("expected method attribute");
        };
        // a, x, y, z — slots are never shared between sibling scopes.
        assert_eq!(method.local_count, 4);
    }

    #[test]
    fn test_sibling_functions_reuse_slot_numbers() {
        let module = compile("function f(a) { return a; } function g(b) { return b; }");
        let methods: Vec<_> = module
            .attributes
            .iter()
            .filter_map(|(_, attr)| match attr {
                Constant::Method(m) => Some(m.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(methods[0].params[0].1, 0);
        assert_eq!(methods[1].params[0].1, 0);
    }

    #[test]
    fn test_lambda_reuses_enclosing_slot_numbering() {
        let module =
            compile("function outer() { a = 1; f = function (b) { return a + b; }; return f; }");
        let Constant::Method(outer) = &module.attributes[0].1 else {
            panic!("expected method attribute");
        };
        // a, f, then the lambda's b continues the same numbering.
        assert_eq!(outer.local_count, 3);
        let lambda = module
            .constants
            .iter()
            .find_map(|c| match c {
                Constant::Method(m) if m.name == "<lambda>" => Some(m.clone()),
                _ => None,
            })
            .expect("lambda in constant pool");
        assert_eq!(lambda.params[0].1, 2);
    }

    #[test]
    fn test_reading_unresolved_name_compiles_to_global_lookup() {
        let module = compile_unoptimized("y = missing;");
        let ops: Vec<OpCode> = module.initializer.body.iter().map(|i| i.op).collect();
        assert_eq!(ops[0], OpCode::LoadGlobal);
    }

    #[test]
    fn test_module_pass_registers_declarations_as_attributes() {
        let module = compile(
            "function f() { return 1; } class C { function init() { this.x = 0; } } enum E { A, B }",
        );
        let names: Vec<&str> = module.attributes.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["f", "C", "E"]);
        assert!(matches!(module.attributes[0].1, Constant::Method(_)));
        assert!(matches!(module.attributes[1].1, Constant::Class(_)));
        assert!(matches!(module.attributes[2].1, Constant::Enum(_)));
        // Only top-level statements reach the initializer; declarations do not.
        assert!(module
            .initializer
            .body
            .iter()
            .all(|i| i.op != OpCode::BuildClosure));
    }

    #[test]
    fn test_import_lowerings() {
        let module =
            compile_unoptimized("import \"lib/util\";\nfrom \"m\" import a, b;\nfrom \"n\" import *;");
        assert_eq!(module.imports, vec!["lib/util", "m", "n"]);
        let ops: Vec<OpCode> = module.initializer.body.iter().map(|i| i.op).collect();
        let expected_prefix = [
            OpCode::Import,
            OpCode::StoreGlobal,
            OpCode::Import,
            OpCode::Dup,
            OpCode::ImportFrom,
            OpCode::Dup,
            OpCode::ImportFrom,
            OpCode::Pop,
            OpCode::Import,
            OpCode::ImportAll,
        ];
        assert_eq!(&ops[..expected_prefix.len()], &expected_prefix);
    }

    #[test]
    fn test_errors_accumulate_into_one_aggregate() {
        let program = parse_source("break; function f() { class C { } } super(1);").expect("parse");
        let err = compile_module("test", &program).expect_err("expected compile errors");
        assert_eq!(err.len(), 3);
    }

    #[test]
    fn test_break_jumps_to_the_loop_exit() {
        let module = compile_unoptimized("while (true) { break; }");
        let body = &module.initializer.body;
        let exit = body
            .iter()
            .find(|i| i.op == OpCode::JumpIfFalse)
            .expect("conditional exit")
            .operand;
        let break_jump = body
            .iter()
            .find(|i| i.op == OpCode::Jump)
            .expect("break jump")
            .operand;
        // break and the failed condition leave through the same label.
        assert_eq!(break_jump, exit);
    }
}
