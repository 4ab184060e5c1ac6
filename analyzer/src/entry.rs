// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use depgraph::{ModuleKey, PyModule};
use parking_lot::Mutex;
use python_ast::Module as Ast;

use crate::sync::CompletionCell;
use crate::types::{AnalysisError, ModuleAnalysis};

struct EntryState {
    ast: Option<Arc<Ast>>,
    buffer_version: i32,
    graph_version: u64,
    analysis: Arc<ModuleAnalysis>,
    declared_names: Vec<String>,
}

///
/// The per-module state cell: the current AST and buffer version, the last completed analysis
/// (an empty sentinel until the first one lands), and the completion handle `get_analysis`
/// awaits.
///
/// Buffer versions never decrease. The completion handle is reset when the entry is
/// invalidated, and set on success, cancellation, or fatal failure. `try_set_analysis` is the
/// only write path for analyses, and rejects results older than the entry's current version.
///
pub struct AnalysisEntry {
    module: Arc<PyModule>,
    key: ModuleKey,
    state: Mutex<EntryState>,
    completion: CompletionCell<Arc<ModuleAnalysis>>,
    run_count: AtomicUsize,
    // True while the host has the document open for editing. An open module keeps its full AST
    // and is never persisted to the cache.
    is_open: AtomicBool,
}

impl AnalysisEntry {
    pub fn new(module: Arc<PyModule>) -> AnalysisEntry {
        let key = ModuleKey::for_module(&module);
        AnalysisEntry {
            module,
            state: Mutex::new(EntryState {
                ast: None,
                buffer_version: -1,
                graph_version: 0,
                analysis: Arc::new(ModuleAnalysis::empty(key.clone())),
                declared_names: Vec::new(),
            }),
            key,
            completion: CompletionCell::new(),
            run_count: AtomicUsize::new(0),
            is_open: AtomicBool::new(false),
        }
    }

    pub fn module(&self) -> &Arc<PyModule> {
        &self.module
    }

    pub fn key(&self) -> &ModuleKey {
        &self.key
    }

    pub fn is_user_module(&self) -> bool {
        self.module.is_user_module()
    }

    pub fn buffer_version(&self) -> i32 {
        self.state.lock().buffer_version
    }

    pub fn ast(&self) -> Option<Arc<Ast>> {
        self.state.lock().ast.clone()
    }

    /// The AST together with the buffer version it carries, read atomically.
    pub fn ast_and_version(&self) -> Option<(Arc<Ast>, i32)> {
        let state = self.state.lock();
        state.ast.clone().map(|ast| (ast, state.buffer_version))
    }

    ///
    /// Installs a new AST if `buffer_version` advances past the current one. Stale versions are
    /// dropped, which is how superseded edits die.
    ///
    pub fn try_update_ast(&self, ast: Arc<Ast>, buffer_version: i32) -> bool {
        let mut state = self.state.lock();
        if buffer_version <= state.buffer_version {
            return false;
        }
        state.ast = Some(ast);
        state.buffer_version = buffer_version;
        true
    }

    ///
    /// Replaces the AST with its import-only skeleton, once the full analysis is safely in the
    /// cache.
    ///
    pub fn downgrade_ast(&self) {
        let mut state = self.state.lock();
        if let Some(ast) = &state.ast {
            state.ast = Some(Arc::new(ast.import_skeleton()));
        }
    }

    /// Resets the completion handle ahead of a new analysis round.
    pub fn invalidate(&self) {
        self.completion.reset();
    }

    pub fn graph_version(&self) -> u64 {
        self.state.lock().graph_version
    }

    pub fn set_graph_version(&self, version: u64) {
        self.state.lock().graph_version = version;
    }

    pub fn bump_graph_version(&self) {
        self.state.lock().graph_version += 1;
    }

    ///
    /// True if a result produced by a session planned at `session_version` may still be applied
    /// to this entry.
    ///
    pub fn can_update(&self, session_version: u64) -> bool {
        let state = self.state.lock();
        state.ast.is_some() && state.graph_version <= session_version
    }

    /// True once an analysis for the current buffer version has completed.
    pub fn is_analyzed(&self) -> bool {
        let state = self.state.lock();
        state.buffer_version >= 0 && state.analysis.version >= state.buffer_version
    }

    pub fn try_set_analysis(&self, analysis: Arc<ModuleAnalysis>) -> bool {
        {
            let mut state = self.state.lock();
            if analysis.version < state.buffer_version {
                return false;
            }
            state.analysis = analysis.clone();
        }
        self.run_count.fetch_add(1, Ordering::SeqCst);
        self.completion.complete(Ok(analysis));
        true
    }

    pub fn record_cancelled(&self) {
        self.completion.complete(Err(AnalysisError::Cancelled));
    }

    pub fn record_failure(&self, message: String) {
        log::warn!("Analysis of {} failed: {message}", self.key);
        self.completion.complete(Err(AnalysisError::Failed(message)));
    }

    /// The last completed analysis, without waiting. The empty sentinel until one lands.
    pub fn peek_analysis(&self) -> Arc<ModuleAnalysis> {
        self.state.lock().analysis.clone()
    }

    pub async fn wait_analysis(&self) -> Result<Arc<ModuleAnalysis>, AnalysisError> {
        self.completion.wait().await
    }

    /// How many analyses have been written to this entry.
    pub fn run_count(&self) -> usize {
        self.run_count.load(Ordering::SeqCst)
    }

    /// True while the host has this module's document open for editing.
    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    pub fn set_open(&self, open: bool) {
        self.is_open.store(open, Ordering::SeqCst);
    }

    pub fn set_declared_names(&self, names: Vec<String>) {
        self.state.lock().declared_names = names;
    }

    /// The top-level names the import pass saw, available before evaluation completes.
    pub fn declared_names(&self) -> Vec<String> {
        self.state.lock().declared_names.clone()
    }
}

impl fmt::Display for AnalysisEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}
