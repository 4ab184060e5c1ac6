// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::path::PathBuf;

use depgraph::{ModuleKey, ModuleType, PyModule};
use fnv::FnvHashMap;
use python_ast::{
    Assignment, CallExpr, DottedName, Expr, FromImportStmt, FunctionDef, ImportStmt, ImportedModule, ImportedName,
    MemberExpr, Module, Stmt,
};

use crate::{extract_dependencies, ImportResolution, IntrinsicModules, PathResolver, ResolvedModule};

struct FakeResolver {
    modules: FnvHashMap<String, ResolvedModule>,
}

impl FakeResolver {
    fn new(names: &[&str]) -> FakeResolver {
        let modules = names
            .iter()
            .map(|name| {
                (
                    (*name).to_owned(),
                    ResolvedModule {
                        full_name: (*name).to_owned(),
                        module_path: Some(PathBuf::from(format!("/lib/{}.py", name.replace('.', "/")))),
                        is_typeshed: false,
                    },
                )
            })
            .collect();
        FakeResolver { modules }
    }
}

impl PathResolver for FakeResolver {
    fn find_imports(
        &self,
        _importer: Option<&std::path::Path>,
        names: &[String],
        _force_absolute: bool,
    ) -> Option<ImportResolution> {
        self.modules.get(&names.join(".")).map(|m| ImportResolution::Module(m.clone()))
    }
}

fn user_module(name: &str) -> PyModule {
    PyModule::new(name, Some(PathBuf::from(format!("/src/{name}.py"))), ModuleType::User)
}

fn import_(names: &[&str]) -> Stmt {
    Stmt::Import(ImportStmt {
        names: names
            .iter()
            .map(|name| ImportedModule {
                name: DottedName::parse(name),
                alias: None,
            })
            .collect(),
    })
}

fn import_as(name: &str, alias: &str) -> Stmt {
    Stmt::Import(ImportStmt {
        names: vec![ImportedModule {
            name: DottedName::parse(name),
            alias: Some(alias.to_owned()),
        }],
    })
}

fn from_import(module: &str, names: &[&str]) -> Stmt {
    Stmt::FromImport(FromImportStmt {
        module: DottedName::parse(module),
        names: names
            .iter()
            .map(|name| ImportedName {
                name: (*name).to_owned(),
                alias: None,
            })
            .collect(),
        wildcard: names.is_empty(),
    })
}

fn member(parts: &[&str]) -> Expr {
    let mut expr = Expr::Name(parts[0].to_owned());
    for attr in &parts[1..] {
        expr = Expr::Member(Box::new(MemberExpr {
            value: expr,
            attr: (*attr).to_owned(),
        }));
    }
    expr
}

fn assert_keys(module: &PyModule, body: Vec<Stmt>, resolver: &FakeResolver, expected: &[&str]) {
    let extracted = extract_dependencies(module, &Module::new(body), resolver, &IntrinsicModules::new());
    let names: Vec<&str> = extracted.keys.iter().map(|k| k.name()).collect();
    assert_eq!(names, expected);
}

#[test]
fn simple_imports() {
    let resolver = FakeResolver::new(&["a", "a.b", "c"]);
    let module = user_module("m");
    assert_keys(&module, vec![import_(&["a"])], &resolver, &["a"]);
    // One key per prefix that resolves to a module.
    assert_keys(&module, vec![import_(&["a.b"])], &resolver, &["a", "a.b"]);
    // An unresolvable prefix contributes nothing, but deeper prefixes still can.
    assert_keys(&module, vec![import_(&["x.y"])], &resolver, &[]);
    assert_keys(&module, vec![import_(&["a", "c"])], &resolver, &["a", "c"]);
}

#[test]
fn from_imports() {
    let resolver = FakeResolver::new(&["a", "a.b", "a.b.c"]);
    let module = user_module("m");
    // The package key, plus names that are themselves submodules.
    assert_keys(&module, vec![from_import("a.b", &["c"])], &resolver, &["a.b", "a.b.c"]);
    // A plain attribute import only contributes the package key.
    assert_keys(&module, vec![from_import("a.b", &["value"])], &resolver, &["a.b"]);
    // Wildcard.
    assert_keys(&module, vec![from_import("a.b", &[])], &resolver, &["a.b"]);
}

#[test]
fn future_imports_are_not_dependencies() {
    let resolver = FakeResolver::new(&["__future__"]);
    let module = user_module("m");
    assert_keys(&module, vec![from_import("__future__", &["annotations"])], &resolver, &[]);
}

#[test]
fn intrinsic_modules_are_dropped() {
    let resolver = FakeResolver::new(&["builtins", "special", "a"]);
    let module = user_module("m");
    let intrinsics = IntrinsicModules::new().with_specialized(vec!["special".to_owned()]);
    let extracted = extract_dependencies(
        &module,
        &Module::new(vec![import_(&["builtins"]), import_(&["special"]), import_(&["a"])]),
        &resolver,
        &intrinsics,
    );
    let names: Vec<&str> = extracted.keys.iter().map(|k| k.name()).collect();
    assert_eq!(names, vec!["a"]);
}

#[test]
fn stub_companion_comes_first() {
    let resolver = FakeResolver::new(&["a"]);
    let stub = PyModule::new("m", Some(PathBuf::from("/ts/m.pyi")), ModuleType::Stub);
    let module = user_module("m").with_stub(stub);

    let extracted = extract_dependencies(
        &module,
        &Module::new(vec![import_(&["a"])]),
        &resolver,
        &IntrinsicModules::new(),
    );
    assert_eq!(extracted.keys.len(), 2);
    assert_eq!(extracted.keys[0], ModuleKey::new("m", Some(PathBuf::from("/ts/m.pyi")), true));
    assert_eq!(extracted.keys[1].name(), "a");
}

#[test]
fn dunder_import_calls() {
    let resolver = FakeResolver::new(&["a", "a.b"]);
    let module = user_module("m");
    let call = Stmt::Expr(Expr::Call(Box::new(CallExpr {
        func: Expr::Name("__import__".to_owned()),
        args: vec![Expr::Str("a.b".to_owned())],
    })));
    assert_keys(&module, vec![call], &resolver, &["a", "a.b"]);
}

#[test]
fn member_references_reach_submodules() {
    let resolver = FakeResolver::new(&["os", "os.path"]);
    let module = user_module("m");
    // import os; os.path.join(...) pulls in os.path as well.
    assert_keys(
        &module,
        vec![
            import_(&["os"]),
            Stmt::Expr(Expr::Call(Box::new(CallExpr {
                func: member(&["os", "path", "join"]),
                args: vec![],
            }))),
        ],
        &resolver,
        &["os", "os.path"],
    );
    // Without the import, the chain is just an attribute access on a local.
    assert_keys(
        &module,
        vec![Stmt::Expr(member(&["os", "path", "join"]))],
        &resolver,
        &[],
    );
}

#[test]
fn aliased_member_references() {
    let resolver = FakeResolver::new(&["a", "a.b", "a.b.c"]);
    let module = user_module("m");
    // import a.b as x; x.c refers to a.b.c.
    assert_keys(
        &module,
        vec![import_as("a.b", "x"), Stmt::Expr(member(&["x", "c"]))],
        &resolver,
        &["a", "a.b", "a.b.c"],
    );
}

#[test]
fn imports_inside_bodies_are_collected() {
    let resolver = FakeResolver::new(&["late"]);
    let module = user_module("m");
    let body = vec![Stmt::FunctionDef(FunctionDef {
        name: "f".to_owned(),
        body: vec![import_(&["late"])],
    })];
    assert_keys(&module, body, &resolver, &["late"]);
}

#[test]
fn exported_names() {
    let resolver = FakeResolver::new(&["os"]);
    let module = user_module("m");
    let extracted = extract_dependencies(
        &module,
        &Module::new(vec![
            import_(&["os"]),
            import_as("os", "system"),
            from_import("os", &["path"]),
            Stmt::FunctionDef(FunctionDef {
                name: "outer".to_owned(),
                body: vec![Stmt::FunctionDef(FunctionDef {
                    name: "inner".to_owned(),
                    body: vec![],
                })],
            }),
            Stmt::Assignment(Assignment {
                targets: vec![Expr::Name("CONST".to_owned())],
                value: Expr::Str("v".to_owned()),
            }),
        ]),
        &resolver,
        &IntrinsicModules::new(),
    );
    assert_eq!(
        extracted.exported_names,
        vec!["os", "system", "path", "outer", "CONST"]
    );
}
