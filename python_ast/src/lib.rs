// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
// Enable all clippy lints except for many of the pedantic ones. It's a shame this needs to be copied and pasted across crates, but there doesn't appear to be a way to include inner attributes from a common source.
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
// It is often more clear to show that nothing is being moved.
#![allow(clippy::match_ref_pats)]
// Subjective style.
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
// Default isn't as big a deal as people seem to think it is.
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]

//! The module AST surface the host's parser produces, and the visitor protocol the analysis
//! core walks it with. The core only ever reads these values.

pub mod visitor;

use std::fmt;

///
/// A dotted module path such as `a.b.c`, stored as its parts.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct DottedName {
    parts: Vec<String>,
}

impl DottedName {
    pub fn new(parts: Vec<String>) -> DottedName {
        DottedName { parts }
    }

    pub fn parse(text: &str) -> DottedName {
        DottedName {
            parts: text.split('.').map(str::to_owned).collect(),
        }
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn first(&self) -> &str {
        &self.parts[0]
    }

    ///
    /// Every leading prefix of the name, shortest first: for `a.b.c`, yields `a`, `a.b`, `a.b.c`.
    ///
    pub fn prefixes(&self) -> impl Iterator<Item = &[String]> {
        (1..=self.parts.len()).map(|len| &self.parts[..len])
    }
}

impl fmt::Display for DottedName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.parts.join("."))
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Module {
    pub body: Vec<Stmt>,
}

impl Module {
    pub fn new(body: Vec<Stmt>) -> Module {
        Module { body }
    }

    ///
    /// A reduced copy keeping imports and def/class stubs but dropping bodies. Used to bound
    /// memory once a library module's analysis has been persisted.
    ///
    pub fn import_skeleton(&self) -> Module {
        fn reduce(body: &[Stmt]) -> Vec<Stmt> {
            body.iter()
                .filter_map(|stmt| match stmt {
                    Stmt::Import(s) => Some(Stmt::Import(s.clone())),
                    Stmt::FromImport(s) => Some(Stmt::FromImport(s.clone())),
                    Stmt::FunctionDef(s) => Some(Stmt::FunctionDef(FunctionDef {
                        name: s.name.clone(),
                        body: reduce(&s.body),
                    })),
                    Stmt::ClassDef(s) => Some(Stmt::ClassDef(ClassDef {
                        name: s.name.clone(),
                        bases: s.bases.clone(),
                        body: reduce(&s.body),
                    })),
                    Stmt::If(s) => Some(Stmt::If(IfStmt {
                        test: s.test.clone(),
                        body: reduce(&s.body),
                        orelse: reduce(&s.orelse),
                    })),
                    Stmt::Assignment(_) | Stmt::Expr(_) => None,
                })
                .collect()
        }
        Module {
            body: reduce(&self.body),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Stmt {
    Import(ImportStmt),
    FromImport(FromImportStmt),
    FunctionDef(FunctionDef),
    ClassDef(ClassDef),
    Assignment(Assignment),
    If(IfStmt),
    Expr(Expr),
}

/// `import a.b.c [as x], d [as y], …`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImportStmt {
    pub names: Vec<ImportedModule>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImportedModule {
    pub name: DottedName,
    pub alias: Option<String>,
}

/// `from a.b import x [as u], y [as v], …` or `from a.b import *`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FromImportStmt {
    pub module: DottedName,
    pub names: Vec<ImportedName>,
    pub wildcard: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImportedName {
    pub name: String,
    pub alias: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub body: Vec<Stmt>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClassDef {
    pub name: String,
    pub bases: Vec<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Assignment {
    pub targets: Vec<Expr>,
    pub value: Expr,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IfStmt {
    pub test: Expr,
    pub body: Vec<Stmt>,
    pub orelse: Vec<Stmt>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Expr {
    Name(String),
    Member(Box<MemberExpr>),
    Call(Box<CallExpr>),
    Str(String),
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
}

/// `value.attr`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MemberExpr {
    pub value: Expr,
    pub attr: String,
}

/// `func(args…)`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CallExpr {
    pub func: Expr,
    pub args: Vec<Expr>,
}

impl Expr {
    ///
    /// If this expression is a chain of member accesses rooted at a plain name (`a.b.c`), the
    /// dotted parts in source order.
    ///
    pub fn dotted_parts(&self) -> Option<Vec<&str>> {
        match self {
            Expr::Name(name) => Some(vec![name.as_str()]),
            Expr::Member(member) => {
                let mut parts = member.value.dotted_parts()?;
                parts.push(member.attr.as_str());
                Some(parts)
            }
            _ => None,
        }
    }
}
