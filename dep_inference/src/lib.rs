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

//! Extracts the set of modules a Python module depends on from its AST.

mod extract;

pub use crate::extract::{extract_dependencies, ExtractedDependencies};

use std::path::PathBuf;

use fnv::FnvHashSet;

///
/// A module discovered by the path resolver.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedModule {
    pub full_name: String,
    pub module_path: Option<PathBuf>,
    pub is_typeshed: bool,
}

///
/// The outcome of resolving one dotted import name.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ImportResolution {
    /// The name maps to exactly one module.
    Module(ResolvedModule),
    /// A leading portion of the name maps to a module; the remainder is a member path inside it.
    Possible {
        preceding: ResolvedModule,
        remaining_parts: Vec<String>,
    },
    /// The name maps to a package: one key per contained module candidate.
    Package { modules: Vec<ResolvedModule> },
}

///
/// Maps dotted import syntax to file paths. Supplied by the host; assumed internally
/// thread-safe.
///
pub trait PathResolver: Send + Sync {
    fn find_imports(&self, importer: Option<&std::path::Path>, names: &[String], force_absolute: bool)
        -> Option<ImportResolution>;
}

///
/// Module names satisfied inside the analyzer itself, which therefore never become graph
/// dependencies: the builtins module, plus any specialized modules the host provides natively.
///
#[derive(Clone, Debug)]
pub struct IntrinsicModules {
    pub builtins_name: String,
    pub specialized: FnvHashSet<String>,
}

impl IntrinsicModules {
    pub fn new() -> IntrinsicModules {
        IntrinsicModules {
            builtins_name: "builtins".to_owned(),
            specialized: FnvHashSet::default(),
        }
    }

    pub fn with_specialized(mut self, names: impl IntoIterator<Item = String>) -> IntrinsicModules {
        self.specialized.extend(names);
        self
    }

    fn is_intrinsic(&self, name: &str) -> bool {
        name == self.builtins_name || self.specialized.contains(name)
    }
}

#[cfg(test)]
mod tests;
