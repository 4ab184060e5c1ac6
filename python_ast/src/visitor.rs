// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use crate::{Assignment, CallExpr, ClassDef, Expr, FromImportStmt, FunctionDef, IfStmt, ImportStmt, MemberExpr, Module, Stmt};

#[derive(Debug, Eq, PartialEq)]
pub enum ChildBehavior {
    Visit,
    Ignore,
}

///
/// Per-kind hooks invoked by the walk functions below. A hook decides whether the walk descends
/// into the node's children; a visitor that needs a different traversal of some subtree (e.g.
/// scope tracking) can return `Ignore` and walk the children itself.
///
#[allow(unused_variables)]
pub trait Visitor {
    fn visit_import(&mut self, stmt: &ImportStmt) -> ChildBehavior {
        ChildBehavior::Visit
    }
    fn visit_from_import(&mut self, stmt: &FromImportStmt) -> ChildBehavior {
        ChildBehavior::Visit
    }
    fn visit_function_def(&mut self, stmt: &FunctionDef) -> ChildBehavior {
        ChildBehavior::Visit
    }
    fn visit_class_def(&mut self, stmt: &ClassDef) -> ChildBehavior {
        ChildBehavior::Visit
    }
    fn visit_assignment(&mut self, stmt: &Assignment) -> ChildBehavior {
        ChildBehavior::Visit
    }
    fn visit_if(&mut self, stmt: &IfStmt) -> ChildBehavior {
        ChildBehavior::Visit
    }
    fn visit_name(&mut self, name: &str) -> ChildBehavior {
        ChildBehavior::Visit
    }
    fn visit_member(&mut self, expr: &MemberExpr) -> ChildBehavior {
        ChildBehavior::Visit
    }
    fn visit_call(&mut self, expr: &CallExpr) -> ChildBehavior {
        ChildBehavior::Visit
    }
    fn visit_string(&mut self, value: &str) -> ChildBehavior {
        ChildBehavior::Visit
    }
}

pub fn walk_module<V: Visitor>(visitor: &mut V, module: &Module) {
    walk_body(visitor, &module.body);
}

pub fn walk_body<V: Visitor>(visitor: &mut V, body: &[Stmt]) {
    for stmt in body {
        walk_stmt(visitor, stmt);
    }
}

pub fn walk_stmt<V: Visitor>(visitor: &mut V, stmt: &Stmt) {
    match stmt {
        Stmt::Import(s) => {
            visitor.visit_import(s);
        }
        Stmt::FromImport(s) => {
            visitor.visit_from_import(s);
        }
        Stmt::FunctionDef(s) => {
            if visitor.visit_function_def(s) == ChildBehavior::Visit {
                walk_body(visitor, &s.body);
            }
        }
        Stmt::ClassDef(s) => {
            if visitor.visit_class_def(s) == ChildBehavior::Visit {
                for base in &s.bases {
                    walk_expr(visitor, base);
                }
                walk_body(visitor, &s.body);
            }
        }
        Stmt::Assignment(s) => {
            if visitor.visit_assignment(s) == ChildBehavior::Visit {
                for target in &s.targets {
                    walk_expr(visitor, target);
                }
                walk_expr(visitor, &s.value);
            }
        }
        Stmt::If(s) => {
            if visitor.visit_if(s) == ChildBehavior::Visit {
                walk_expr(visitor, &s.test);
                walk_body(visitor, &s.body);
                walk_body(visitor, &s.orelse);
            }
        }
        Stmt::Expr(e) => {
            walk_expr(visitor, e);
        }
    }
}

pub fn walk_expr<V: Visitor>(visitor: &mut V, expr: &Expr) {
    match expr {
        Expr::Name(name) => {
            visitor.visit_name(name);
        }
        Expr::Member(member) => {
            if visitor.visit_member(member) == ChildBehavior::Visit {
                walk_expr(visitor, &member.value);
            }
        }
        Expr::Call(call) => {
            if visitor.visit_call(call) == ChildBehavior::Visit {
                walk_expr(visitor, &call.func);
                for arg in &call.args {
                    walk_expr(visitor, arg);
                }
            }
        }
        Expr::Str(value) => {
            visitor.visit_string(value);
        }
        Expr::Tuple(items) | Expr::List(items) => {
            for item in items {
                walk_expr(visitor, item);
            }
        }
    }
}
