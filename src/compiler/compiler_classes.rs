//! Module-level registration: functions, classes, and enums become module
//! attributes rather than initializer code.

use std::rc::Rc;

use crate::ast::{ClassDecl, EnumDecl, FunctionDecl};
use crate::bytecode::method::{ClassDef, Constant, EnumDef};

use super::compiler::Compiler;

impl Compiler {
    pub(crate) fn register_function(&mut self, decl: &FunctionDecl) {
        if self.has_attribute(&decl.name) {
            self.error(
                decl.span,
                format!("'{}' is already defined in this module", decl.name),
            );
            return;
        }
        let method = self.compile_function(
            &decl.name,
            &decl.params,
            decl.variadic,
            &decl.body,
            false,
            decl.span,
        );
        self.attributes
            .push((decl.name.clone(), Constant::Method(method)));
    }

    pub(crate) fn register_class(&mut self, decl: &ClassDecl) {
        if self.has_attribute(&decl.name) {
            self.error(
                decl.span,
                format!("'{}' is already defined in this module", decl.name),
            );
            return;
        }

        self.class_stack.push(decl.name.clone());
        let mut methods = Vec::with_capacity(decl.methods.len());
        for method_decl in &decl.methods {
            if methods
                .iter()
                .any(|(name, _): &(String, Rc<crate::bytecode::Method>)| name == &method_decl.name)
            {
                self.error(
                    method_decl.span,
                    format!(
                        "method '{}' is already defined on class '{}'",
                        method_decl.name, decl.name
                    ),
                );
                continue;
            }
            let method = self.compile_function(
                &method_decl.name,
                &method_decl.params,
                method_decl.variadic,
                &method_decl.body,
                true,
                method_decl.span,
            );
            methods.push((method_decl.name.clone(), method));
        }
        self.class_stack.pop();

        let class = ClassDef {
            name: decl.name.clone(),
            base: decl.base.clone(),
            methods,
        };
        self.attributes
            .push((decl.name.clone(), Constant::Class(Rc::new(class))));
    }

    pub(crate) fn register_enum(&mut self, decl: &EnumDecl) {
        if self.has_attribute(&decl.name) {
            self.error(
                decl.span,
                format!("'{}' is already defined in this module", decl.name),
            );
            return;
        }
        let members = decl
            .members
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i as i32))
            .collect();
        self.attributes.push((
            decl.name.clone(),
            Constant::Enum(Rc::new(EnumDef {
                name: decl.name.clone(),
                members,
            })),
        ));
    }

    fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|(n, _)| n == name)
    }
}
