// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use depgraph::PyModule;
use python_ast::Module as Ast;

use crate::types::{AnalysisError, Diagnostic, GlobalScope, ModuleAnalysis};

///
/// Produces the global scope for one module from its AST. Invoked once per walked node (twice
/// for members of an import cycle). May suspend for I/O (reading sources, stubs).
///
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, module: &PyModule, ast: &Ast) -> Result<Arc<GlobalScope>, AnalysisError>;
}

///
/// An optional store of prior analyses, keyed by module name and path. The cache alone decides
/// the on-disk format; it is assumed internally thread-safe.
///
#[async_trait]
pub trait AnalysisCache: Send + Sync {
    fn exists(&self, name: &str, file_path: Option<&Path>) -> bool;
    async fn restore(&self, module: &PyModule) -> Option<Arc<GlobalScope>>;
    async fn store(&self, analysis: &ModuleAnalysis);
}

///
/// Receives the count of unresolved walk nodes after every commit or skip, and zero on clean
/// completion.
///
pub trait ProgressReporter: Send + Sync {
    fn report_remaining(&self, remaining: usize);
}

/// A reporter for hosts that do not surface progress.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report_remaining(&self, _remaining: usize) {}
}

pub trait Linter: Send + Sync {
    fn lint(&self, module: &PyModule, analysis: &ModuleAnalysis) -> Vec<Diagnostic>;
}

///
/// Raised when the analyzer reaches a steady state: no sessions running, no pending edits, and
/// no missing keys.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AnalysisComplete {
    pub modules: usize,
    pub elapsed: Duration,
}
