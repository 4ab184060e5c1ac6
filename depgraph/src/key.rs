// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use crate::module::PyModule;

///
/// Canonical identity of a module in the dependency graph.
///
/// The name compares byte-exact; the file path compares per-OS path rules (case-insensitive on
/// Windows); the typeshed flag lets a stub and its source sibling coexist under the same name.
///
/// Compiled builtin modules elide their file path, so two builtins with the same name compare
/// equal regardless of which probing path discovered them.
///
#[derive(Clone, Debug, Eq)]
pub struct ModuleKey {
    name: String,
    file_path: Option<PathBuf>,
    is_typeshed: bool,
}

impl ModuleKey {
    pub fn new(name: impl Into<String>, file_path: Option<PathBuf>, is_typeshed: bool) -> ModuleKey {
        ModuleKey {
            name: name.into(),
            file_path,
            is_typeshed,
        }
    }

    ///
    /// Creates the key for a module object, eliding the file path for compiled builtins.
    ///
    pub fn for_module(module: &PyModule) -> ModuleKey {
        let file_path = if module.module_type.is_builtin() {
            None
        } else {
            module.file_path.clone()
        };
        ModuleKey {
            name: module.name.clone(),
            file_path,
            is_typeshed: module.is_typeshed,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    pub fn is_typeshed(&self) -> bool {
        self.is_typeshed
    }

    ///
    /// Yields the three identity fields, for callers that need to order or classify keys.
    ///
    pub fn deconstruct(&self) -> (&str, Option<&Path>, bool) {
        (&self.name, self.file_path.as_deref(), self.is_typeshed)
    }
}

#[cfg(windows)]
fn fold_path(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

#[cfg(windows)]
fn paths_equal(a: Option<&Path>, b: Option<&Path>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => fold_path(a) == fold_path(b),
        (None, None) => true,
        _ => false,
    }
}

#[cfg(not(windows))]
fn paths_equal(a: Option<&Path>, b: Option<&Path>) -> bool {
    a == b
}

impl PartialEq for ModuleKey {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.is_typeshed == other.is_typeshed
            && paths_equal(self.file_path(), other.file_path())
    }
}

impl Hash for ModuleKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.is_typeshed.hash(state);
        #[cfg(windows)]
        self.file_path.as_deref().map(fold_path).hash(state);
        #[cfg(not(windows))]
        self.file_path.hash(state);
    }
}

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if self.is_typeshed {
            write!(f, " (typeshed)")?;
        }
        if let Some(path) = &self.file_path {
            write!(f, " ({})", path.display())?;
        }
        Ok(())
    }
}
