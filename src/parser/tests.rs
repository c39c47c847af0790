//! Parser tests.

use super::{parse_source, parse_source_partial};
use crate::ast::*;
use pretty_assertions::assert_eq;

fn parse_ok(source: &str) -> Program {
    match parse_source(source) {
        Ok(program) => program,
        Err(errors) => panic!("unexpected parse errors:\n{}", errors),
    }
}

#[test]
fn test_parse_assignment_statement() {
    let program = parse_ok("x = 1 + 2 * 3;");
    assert_eq!(program.statements.len(), 1);
    let StmtKind::Expression(expr) = &program.statements[0].kind else {
        panic!("expected expression statement");
    };
    let ExprKind::Assign { target, value } = &expr.kind else {
        panic!("expected assignment");
    };
    assert_eq!(target.kind, ExprKind::Variable("x".to_string()));
    // Precedence: 1 + (2 * 3)
    let ExprKind::Binary { operator, .. } = &value.kind else {
        panic!("expected binary expression");
    };
    assert_eq!(*operator, BinaryOp::Add);
}

#[test]
fn test_parse_chained_assignment_is_right_associative() {
    let program = parse_ok("x = y = 1;");
    let StmtKind::Expression(expr) = &program.statements[0].kind else {
        panic!("expected expression statement");
    };
    let ExprKind::Assign { value, .. } = &expr.kind else {
        panic!("expected assignment");
    };
    assert!(matches!(value.kind, ExprKind::Assign { .. }));
}

#[test]
fn test_parse_if_elif_else() {
    let program = parse_ok("if (a) { b; } elif (c) { d; } else { e; }");
    let StmtKind::If {
        elif_branches,
        else_branch,
        ..
    } = &program.statements[0].kind
    else {
        panic!("expected if statement");
    };
    assert_eq!(elif_branches.len(), 1);
    assert!(else_branch.is_some());
}

#[test]
fn test_parse_for_in() {
    let program = parse_ok("for (i in [1, 2, 3]) { print(i); }");
    let StmtKind::For {
        variable, iterable, ..
    } = &program.statements[0].kind
    else {
        panic!("expected for statement");
    };
    assert_eq!(variable, "i");
    assert!(matches!(iterable.kind, ExprKind::List(_)));
}

#[test]
fn test_parse_try_except_with_filter() {
    let program = parse_ok("try { f(); } except (e : TypeError) { g(e); } except (e) { h(e); }");
    let StmtKind::Try { clauses, .. } = &program.statements[0].kind else {
        panic!("expected try statement");
    };
    assert_eq!(clauses.len(), 2);
    assert!(clauses[0].filter.is_some());
    assert!(clauses[1].filter.is_none());
}

#[test]
fn test_parse_function_and_lambda() {
    let program = parse_ok("function add(a, b) { return a + b; } f = function (x) { return x; };");
    assert!(matches!(program.statements[0].kind, StmtKind::Function(_)));
    let StmtKind::Expression(expr) = &program.statements[1].kind else {
        panic!("expected expression statement");
    };
    let ExprKind::Assign { value, .. } = &expr.kind else {
        panic!("expected assignment");
    };
    assert!(matches!(value.kind, ExprKind::Lambda { .. }));
}

#[test]
fn test_parse_variadic_parameter() {
    let program = parse_ok("function f(a, rest...) { return rest; }");
    let StmtKind::Function(decl) = &program.statements[0].kind else {
        panic!("expected function declaration");
    };
    assert!(decl.variadic);
    assert_eq!(decl.params.len(), 2);
}

#[test]
fn test_parse_class_with_base_and_super() {
    let program = parse_ok(
        "class Dog : Animal { function init(name) { super(name); } function speak() { return 1; } }",
    );
    let StmtKind::Class(decl) = &program.statements[0].kind else {
        panic!("expected class declaration");
    };
    assert_eq!(decl.name, "Dog");
    assert_eq!(decl.base.as_deref(), Some("Animal"));
    assert_eq!(decl.methods.len(), 2);
}

#[test]
fn test_parse_enum() {
    let program = parse_ok("enum Color { Red, Green, Blue }");
    let StmtKind::Enum(decl) = &program.statements[0].kind else {
        panic!("expected enum declaration");
    };
    assert_eq!(decl.members, vec!["Red", "Green", "Blue"]);
}

#[test]
fn test_parse_imports() {
    let program = parse_ok(
        "import \"util\";\nfrom \"math\" import sin, cos;\nfrom \"strings\" import *;",
    );
    let kinds: Vec<_> = program
        .statements
        .iter()
        .map(|s| match &s.kind {
            StmtKind::Import(decl) => decl.items.clone(),
            _ => panic!("expected import"),
        })
        .collect();
    assert_eq!(kinds[0], ImportItems::Module);
    assert_eq!(
        kinds[1],
        ImportItems::Names(vec!["sin".to_string(), "cos".to_string()])
    );
    assert_eq!(kinds[2], ImportItems::All);
}

#[test]
fn test_parse_tuple_vs_grouping() {
    let program = parse_ok("a = (1, 2); b = (1);");
    let StmtKind::Expression(expr) = &program.statements[0].kind else {
        panic!("expected expression");
    };
    let ExprKind::Assign { value, .. } = &expr.kind else {
        panic!("expected assignment");
    };
    assert!(matches!(value.kind, ExprKind::Tuple(_)));

    let StmtKind::Expression(expr) = &program.statements[1].kind else {
        panic!("expected expression");
    };
    let ExprKind::Assign { value, .. } = &expr.kind else {
        panic!("expected assignment");
    };
    assert_eq!(value.kind, ExprKind::IntLiteral(1));
}

#[test]
fn test_errors_accumulate_across_statements() {
    let (program, diagnostics) = parse_source_partial("x = ;\ny = 2;\nz = ;\nw = 4;");
    // Both bad statements are reported; both good ones still parse.
    assert_eq!(diagnostics.len(), 2);
    assert_eq!(program.statements.len(), 2);
}

#[test]
fn test_invalid_assignment_target() {
    let (_, diagnostics) = parse_source_partial("1 = 2;");
    assert_eq!(diagnostics.len(), 1);
    assert!(diagnostics[0].message.contains("assignment target"));
}
