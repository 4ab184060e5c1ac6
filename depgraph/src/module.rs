// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

///
/// The provenance of a module, as reported by the host's module loader.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ModuleType {
    User,
    Library,
    Stub,
    Specialized,
    Compiled,
    CompiledBuiltin,
    Builtins,
}

impl ModuleType {
    ///
    /// True for modules which have no backing source file of their own.
    ///
    pub fn is_builtin(&self) -> bool {
        matches!(self, ModuleType::CompiledBuiltin | ModuleType::Builtins)
    }
}

///
/// A loaded module object: the unit the host's loader hands to the analyzer.
///
#[derive(Clone, Debug)]
pub struct PyModule {
    pub name: String,
    pub file_path: Option<PathBuf>,
    pub module_type: ModuleType,
    pub is_typeshed: bool,
    /// The stub companion for this module, when one exists. Stubs are analyzed ahead of their
    /// source siblings.
    pub stub: Option<Arc<PyModule>>,
}

impl PyModule {
    pub fn new(name: impl Into<String>, file_path: Option<PathBuf>, module_type: ModuleType) -> PyModule {
        PyModule {
            name: name.into(),
            file_path,
            module_type,
            is_typeshed: module_type == ModuleType::Stub,
            stub: None,
        }
    }

    pub fn with_stub(mut self, stub: PyModule) -> PyModule {
        self.stub = Some(Arc::new(stub));
        self
    }

    pub fn is_user_module(&self) -> bool {
        self.module_type == ModuleType::User
    }
}

impl fmt::Display for PyModule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({:?})", self.name, self.module_type)
    }
}

///
/// Loads (or returns the already-loaded) module object for a name. Supplied by the host;
/// assumed internally thread-safe.
///
pub trait ModuleLoader: Send + Sync {
    fn get_or_load(&self, name: &str, is_typeshed: bool) -> Option<Arc<PyModule>>;
}
