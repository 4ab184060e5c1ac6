// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;
use std::sync::Arc;

use depgraph::ModuleKey;

///
/// The global scope produced by evaluating a module: the names it binds at top level, in
/// declaration order.
///
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GlobalScope {
    pub names: Vec<String>,
}

impl GlobalScope {
    pub fn new(names: Vec<String>) -> GlobalScope {
        GlobalScope { names }
    }
}

///
/// One completed analysis of a module at a specific buffer version.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModuleAnalysis {
    pub key: ModuleKey,
    /// The buffer version of the source this analysis was produced from; negative for the empty
    /// sentinel that exists before any analysis has completed.
    pub version: i32,
    pub scope: Arc<GlobalScope>,
}

impl ModuleAnalysis {
    pub fn new(key: ModuleKey, version: i32, scope: Arc<GlobalScope>) -> ModuleAnalysis {
        ModuleAnalysis { key, version, scope }
    }

    pub fn empty(key: ModuleKey) -> ModuleAnalysis {
        ModuleAnalysis {
            key,
            version: -1,
            scope: Arc::new(GlobalScope::default()),
        }
    }

    pub fn is_empty_sentinel(&self) -> bool {
        self.version < 0
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Severity {
    Error,
    Warning,
    Information,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

///
/// The two ways a worker step can fail. Evaluator faults are contained per entry; only
/// cancellation propagates out of a session.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AnalysisError {
    Cancelled,
    Failed(String),
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AnalysisError::Cancelled => write!(f, "Analysis was cancelled"),
            AnalysisError::Failed(message) => write!(f, "Analysis failed: {message}"),
        }
    }
}

impl std::error::Error for AnalysisError {}
