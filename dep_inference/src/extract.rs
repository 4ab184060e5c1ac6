// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use depgraph::{ModuleKey, PyModule};
use fnv::FnvHashMap;
use indexmap::IndexSet;
use python_ast::visitor::{self, ChildBehavior, Visitor};
use python_ast::{Assignment, CallExpr, ClassDef, DottedName, Expr, FromImportStmt, FunctionDef, ImportStmt, MemberExpr, Module};

use crate::{ImportResolution, IntrinsicModules, PathResolver, ResolvedModule};

///
/// The result of one extraction pass: the modules this module depends on, in a stable order
/// with the stub companion (if any) first, plus the names the module binds at top level.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExtractedDependencies {
    pub keys: Vec<ModuleKey>,
    pub exported_names: Vec<String>,
}

///
/// Walks the AST once and yields every module key this module depends on: plain imports (one
/// key per dotted prefix that resolves to a module), from-imports (the package key plus any
/// names that are themselves submodules), literal `__import__("…")` calls, and dotted member
/// references rooted at an imported name. `from __future__ import …` contributes nothing, and
/// names satisfied inside the analyzer are dropped.
///
pub fn extract_dependencies(
    module: &PyModule,
    ast: &Module,
    resolver: &dyn PathResolver,
    intrinsics: &IntrinsicModules,
) -> ExtractedDependencies {
    let mut collector = ImportCollector {
        module,
        resolver,
        intrinsics,
        keys: IndexSet::new(),
        exported: IndexSet::new(),
        bindings: FnvHashMap::default(),
        member_chains: IndexSet::new(),
        depth: 0,
    };
    visitor::walk_module(&mut collector, ast);
    collector.finish()
}

struct ImportCollector<'a> {
    module: &'a PyModule,
    resolver: &'a dyn PathResolver,
    intrinsics: &'a IntrinsicModules,
    keys: IndexSet<ModuleKey>,
    exported: IndexSet<String>,
    // Names bound by imports at module level, mapped to the dotted module path they refer to.
    // Member chains rooted at one of these are candidates for submodule references.
    bindings: FnvHashMap<String, Vec<String>>,
    member_chains: IndexSet<Vec<String>>,
    depth: usize,
}

impl ImportCollector<'_> {
    fn resolve(&self, parts: &[String]) -> Option<ImportResolution> {
        self.resolver
            .find_imports(self.module.file_path.as_deref(), parts, false)
    }

    fn push_resolved(&mut self, resolved: &ResolvedModule) {
        if self.intrinsics.is_intrinsic(&resolved.full_name) {
            return;
        }
        self.keys.insert(ModuleKey::new(
            resolved.full_name.clone(),
            resolved.module_path.clone(),
            resolved.is_typeshed,
        ));
    }

    ///
    /// Emits one key per dotted prefix of `name` that resolves to a module.
    ///
    fn add_prefix_keys(&mut self, name: &DottedName) {
        for len in 1..=name.parts().len() {
            match self.resolve(&name.parts()[..len]) {
                Some(ImportResolution::Module(resolved)) => self.push_resolved(&resolved),
                Some(ImportResolution::Package { modules }) => {
                    for resolved in &modules {
                        self.push_resolved(resolved);
                    }
                }
                Some(ImportResolution::Possible { .. }) | None => {}
            }
        }
    }

    fn bind(&mut self, name: &str, target: Vec<String>) {
        if self.depth == 0 {
            self.exported.insert(name.to_owned());
            self.bindings.insert(name.to_owned(), target);
        }
    }

    fn finish(mut self) -> ExtractedDependencies {
        // Resolve member chains against the bindings collected over the whole pass: a chain
        // `x.b.c` rooted at a binding for `a` stands for `a.b`, `a.b.c`, … as long as each
        // longer prefix still names a module.
        let chains: Vec<Vec<String>> = self.member_chains.iter().cloned().collect();
        for chain in chains {
            let Some(target) = self.bindings.get(&chain[0]).cloned() else {
                continue;
            };
            let mut full = target;
            full.extend(chain[1..].iter().cloned());
            for len in 2..=full.len() {
                match self.resolve(&full[..len]) {
                    Some(ImportResolution::Module(resolved)) => self.push_resolved(&resolved),
                    _ => break,
                }
            }
        }

        // Stubs are analyzed ahead of their source siblings.
        let mut keys: Vec<ModuleKey> = Vec::with_capacity(self.keys.len() + 1);
        if let Some(stub) = &self.module.stub {
            keys.push(ModuleKey::for_module(stub));
        }
        for key in self.keys {
            if keys.first() != Some(&key) {
                keys.push(key);
            }
        }
        log::trace!("{}: {} dependencies extracted", self.module.name, keys.len());

        ExtractedDependencies {
            keys,
            exported_names: self.exported.into_iter().collect(),
        }
    }
}

impl Visitor for ImportCollector<'_> {
    fn visit_import(&mut self, stmt: &ImportStmt) -> ChildBehavior {
        for imported in &stmt.names {
            self.add_prefix_keys(&imported.name);
            match &imported.alias {
                Some(alias) => self.bind(alias, imported.name.parts().to_vec()),
                // `import a.b.c` binds the root package name.
                None => self.bind(imported.name.first(), vec![imported.name.first().to_owned()]),
            }
        }
        ChildBehavior::Ignore
    }

    fn visit_from_import(&mut self, stmt: &FromImportStmt) -> ChildBehavior {
        if stmt.module.first() == "__future__" {
            return ChildBehavior::Ignore;
        }

        match self.resolve(stmt.module.parts()) {
            Some(ImportResolution::Module(resolved)) => self.push_resolved(&resolved),
            Some(ImportResolution::Package { modules }) => {
                for resolved in &modules {
                    self.push_resolved(resolved);
                }
            }
            Some(ImportResolution::Possible { .. }) | None => {}
        }

        for imported in &stmt.names {
            let mut parts = stmt.module.parts().to_vec();
            parts.push(imported.name.clone());
            // An imported name may itself be a submodule.
            if let Some(ImportResolution::Module(resolved)) = self.resolve(&parts) {
                self.push_resolved(&resolved);
            }
            self.bind(imported.alias.as_deref().unwrap_or(&imported.name), parts);
        }
        ChildBehavior::Ignore
    }

    fn visit_function_def(&mut self, stmt: &FunctionDef) -> ChildBehavior {
        if self.depth == 0 {
            self.exported.insert(stmt.name.clone());
        }
        self.depth += 1;
        visitor::walk_body(self, &stmt.body);
        self.depth -= 1;
        ChildBehavior::Ignore
    }

    fn visit_class_def(&mut self, stmt: &ClassDef) -> ChildBehavior {
        if self.depth == 0 {
            self.exported.insert(stmt.name.clone());
        }
        for base in &stmt.bases {
            visitor::walk_expr(self, base);
        }
        self.depth += 1;
        visitor::walk_body(self, &stmt.body);
        self.depth -= 1;
        ChildBehavior::Ignore
    }

    fn visit_assignment(&mut self, stmt: &Assignment) -> ChildBehavior {
        if self.depth == 0 {
            for target in &stmt.targets {
                if let Expr::Name(name) = target {
                    self.exported.insert(name.clone());
                }
            }
        }
        ChildBehavior::Visit
    }

    fn visit_call(&mut self, expr: &CallExpr) -> ChildBehavior {
        if let Expr::Name(func) = &expr.func {
            if func == "__import__" {
                if let Some(Expr::Str(name)) = expr.args.first() {
                    self.add_prefix_keys(&DottedName::parse(name));
                }
                return ChildBehavior::Ignore;
            }
        }
        ChildBehavior::Visit
    }

    fn visit_member(&mut self, expr: &MemberExpr) -> ChildBehavior {
        let chain = expr.value.dotted_parts().map(|mut parts| {
            parts.push(expr.attr.as_str());
            parts
        });
        if let Some(chain) = chain {
            self.member_chains
                .insert(chain.into_iter().map(str::to_owned).collect());
            return ChildBehavior::Ignore;
        }
        ChildBehavior::Visit
    }
}
