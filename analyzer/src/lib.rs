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
// Arc<Mutex> can be more clear than needing to grok Orderings:
#![allow(clippy::mutex_atomic)]

//! The incremental analysis scheduler: entries, sessions, and the process-wide facade that
//! dispatches module edits to analysis passes.

mod entry;
mod options;
mod services;
mod session;
mod sync;
mod types;

pub use crate::entry::AnalysisEntry;
pub use crate::options::AnalyzerOptions;
pub use crate::services::{AnalysisCache, AnalysisComplete, Evaluator, Linter, NoProgress, ProgressReporter};
pub use crate::session::{Session, SessionState, SessionStats};
pub use crate::types::{AnalysisError, Diagnostic, GlobalScope, ModuleAnalysis, Severity};
pub use dep_inference::{ImportResolution, IntrinsicModules, PathResolver, ResolvedModule};
pub use depgraph::{ModuleKey, ModuleLoader, ModuleType, PyModule};

use std::sync::Arc;
use std::time::{Duration, Instant};

use depgraph::DepGraph;
use fnv::{FnvHashMap as HashMap, FnvHashSet as HashSet};
use parking_lot::Mutex;
use python_ast::Module as Ast;
use task_executor::Executor;
use tokio::sync::broadcast;
use walker::plan_walk;

use crate::session::SessionServices;
use crate::sync::{CancelFlag, StateEvent};

///
/// The external collaborators the host supplies. The resolver, loader, and cache are assumed
/// internally thread-safe; the evaluator is invoked from at most one worker per node at a time.
///
pub struct HostServices {
    pub resolver: Arc<dyn PathResolver>,
    pub loader: Arc<dyn ModuleLoader>,
    pub evaluator: Arc<dyn Evaluator>,
    pub cache: Option<Arc<dyn AnalysisCache>>,
    pub progress: Arc<dyn ProgressReporter>,
    pub linter: Option<Arc<dyn Linter>>,
}

struct FacadeState {
    entries: HashMap<ModuleKey, Arc<AnalysisEntry>>,
    current: Option<Arc<Session>>,
    next: Option<Arc<Session>>,
    kicked_loads: HashSet<ModuleKey>,
}

struct Inner {
    options: AnalyzerOptions,
    executor: Executor,
    services: HostServices,
    intrinsics: IntrinsicModules,
    graph: DepGraph<Arc<AnalysisEntry>>,
    state: Mutex<FacadeState>,
    disposal: CancelFlag,
    complete_event: StateEvent,
    complete_tx: broadcast::Sender<AnalysisComplete>,
    busy_since: Mutex<Option<Instant>>,
}

///
/// The process-wide registry of analysis entries, and the dispatcher of module edits to
/// sessions. At most one session runs at a time; a newer edit cancels the running session and
/// queues its successor, so the latest edit always wins.
///
#[derive(Clone)]
pub struct Analyzer {
    inner: Arc<Inner>,
}

impl Analyzer {
    pub fn new(executor: Executor, services: HostServices, intrinsics: IntrinsicModules, options: AnalyzerOptions) -> Analyzer {
        let (complete_tx, _) = broadcast::channel(16);
        Analyzer {
            inner: Arc::new(Inner {
                options,
                executor,
                services,
                intrinsics,
                graph: DepGraph::new(),
                state: Mutex::new(FacadeState {
                    entries: HashMap::default(),
                    current: None,
                    next: None,
                    kicked_loads: HashSet::default(),
                }),
                disposal: CancelFlag::new(),
                // No work in flight at startup is a steady state.
                complete_event: StateEvent::new(true),
                complete_tx,
                busy_since: Mutex::new(None),
            }),
        }
    }

    pub fn entry(&self, key: &ModuleKey) -> Option<Arc<AnalysisEntry>> {
        self.inner.state.lock().entries.get(key).cloned()
    }

    pub fn module_count(&self) -> usize {
        self.inner.graph.len()
    }

    pub fn graph_version(&self) -> u64 {
        self.inner.graph.version()
    }

    ///
    /// Marks the entry changed ahead of its next analysis: bumps its version marker so stale
    /// session results are rejected, and resets the completion handle.
    ///
    pub fn invalidate(&self, key: &ModuleKey) {
        if let Some(entry) = self.entry(key) {
            entry.bump_graph_version();
            entry.invalidate();
        }
    }

    ///
    /// Drops the entry from the registry. The graph keeps the vertex until the next topology
    /// change.
    ///
    pub fn remove(&self, key: &ModuleKey) {
        self.inner.state.lock().entries.remove(key);
    }

    ///
    /// Marks the module's document open for editing. While open, its analysis is never
    /// persisted to the cache and its AST is never downgraded.
    ///
    pub fn open_document(&self, key: &ModuleKey) {
        if let Some(entry) = self.entry(key) {
            entry.set_open(true);
        }
    }

    pub fn close_document(&self, key: &ModuleKey) {
        if let Some(entry) = self.entry(key) {
            entry.set_open(false);
        }
    }

    ///
    /// Submits an edit: a new AST at a buffer version. Versions at or below the entry's current
    /// one are dropped. Otherwise the entry's import set is recomputed, the graph updated, and
    /// the change dispatched to a session.
    ///
    pub fn enqueue(&self, module: Arc<PyModule>, ast: Arc<Ast>, buffer_version: i32) {
        let inner = &self.inner;
        if inner.disposal.is_cancelled() {
            return;
        }
        let entry = inner.ensure_entry(module.clone());
        if !entry.try_update_ast(ast.clone(), buffer_version) {
            log::trace!("Dropping superseded edit v{buffer_version} for {}", entry.key());
            return;
        }
        entry.invalidate();

        let extracted = dep_inference::extract_dependencies(&module, &ast, inner.services.resolver.as_ref(), &inner.intrinsics);
        entry.set_declared_names(extracted.exported_names);
        // An open editor buffer gets its analysis ahead of the full chain.
        let fast_path = if entry.is_user_module() { Some(entry.clone()) } else { None };

        let vertex = inner.graph.add_or_update(entry.key().clone(), entry.clone(), extracted.keys);
        entry.set_graph_version(vertex.version());
        inner.complete_event.reset();
        inner.schedule(fast_path);
    }

    ///
    /// Variant of `enqueue` that takes an explicit dependency set, for when an importer's
    /// dependencies change without a new AST.
    ///
    pub fn enqueue_with_dependencies(&self, module: Arc<PyModule>, dependencies: Vec<ModuleKey>) {
        let inner = &self.inner;
        if inner.disposal.is_cancelled() {
            return;
        }
        let entry = inner.ensure_entry(module);
        entry.invalidate();
        let vertex = inner.graph.add_or_update(entry.key().clone(), entry.clone(), dependencies);
        entry.set_graph_version(vertex.version());
        inner.complete_event.reset();
        inner.schedule(None);
    }

    ///
    /// Awaits the module's analysis. A call without an explicit wait uses the configured
    /// default timeout. When the wait elapses, the last known analysis (possibly the empty
    /// sentinel) is returned rather than an error; per-entry faults degrade the same way. Only
    /// cancellation surfaces as an error.
    ///
    pub async fn get_analysis(&self, key: &ModuleKey, wait: Option<Duration>) -> Result<Arc<ModuleAnalysis>, AnalysisError> {
        let Some(entry) = self.entry(key) else {
            return Err(AnalysisError::Failed(format!("No entry for module {key}")));
        };
        let wait = if self.inner.options.disable_timeout {
            None
        } else {
            wait.or(self.inner.options.default_get_analysis_timeout)
        };
        let result = match wait {
            Some(timeout) => match tokio::time::timeout(timeout, entry.wait_analysis()).await {
                Ok(result) => result,
                Err(_) => return Ok(entry.peek_analysis()),
            },
            None => entry.wait_analysis().await,
        };
        match result {
            Ok(analysis) => Ok(analysis),
            Err(AnalysisError::Cancelled) => Err(AnalysisError::Cancelled),
            Err(AnalysisError::Failed(_)) => Ok(entry.peek_analysis()),
        }
    }

    ///
    /// Resolves once the analyzer reaches a steady state: no sessions running, no pending
    /// edits, and no missing keys. Not failed by per-module faults.
    ///
    pub async fn wait_for_complete(&self) {
        self.inner.complete_event.wait().await
    }

    pub fn is_complete(&self) -> bool {
        self.inner.complete_event.is_set()
    }

    /// The analysis-complete event stream, with module count and elapsed wall-clock time.
    pub fn subscribe_complete(&self) -> broadcast::Receiver<AnalysisComplete> {
        self.inner.complete_tx.subscribe()
    }

    ///
    /// Runs the linter over the module's current analysis. Non-user modules lint clean.
    ///
    pub fn lint(&self, key: &ModuleKey) -> Vec<Diagnostic> {
        let Some(entry) = self.entry(key) else {
            return Vec::new();
        };
        if !entry.is_user_module() {
            return Vec::new();
        }
        let Some(linter) = &self.inner.services.linter else {
            return Vec::new();
        };
        linter.lint(entry.module(), &entry.peek_analysis())
    }

    ///
    /// Clears all non-typeshed, non-builtin entries and drops their graph vertices.
    ///
    pub fn reset(&self) {
        let drop_keys: Vec<ModuleKey> = {
            let mut state = self.inner.state.lock();
            let keys: Vec<ModuleKey> = state
                .entries
                .iter()
                .filter(|(key, entry)| !key.is_typeshed() && !entry.module().module_type.is_builtin())
                .map(|(key, _)| key.clone())
                .collect();
            for key in &keys {
                state.entries.remove(key);
            }
            state.kicked_loads.clear();
            keys
        };
        self.inner.graph.remove(&drop_keys);
        log::info!("Reset dropped {} entries", drop_keys.len());
    }

    ///
    /// Trips the global disposal flag: cancels the current and queued sessions and completes
    /// every outstanding completion handle as cancelled, unblocking `get_analysis` callers.
    ///
    pub fn dispose(&self) {
        self.inner.disposal.cancel();
        let (current, next, entries) = {
            let state = self.inner.state.lock();
            (
                state.current.clone(),
                state.next.clone(),
                state.entries.values().cloned().collect::<Vec<_>>(),
            )
        };
        for session in [current, next].into_iter().flatten() {
            session.cancel();
        }
        for entry in entries {
            entry.record_cancelled();
        }
        log::info!("Analyzer disposed");
    }
}

impl Inner {
    fn ensure_entry(&self, module: Arc<PyModule>) -> Arc<AnalysisEntry> {
        let key = ModuleKey::for_module(&module);
        let mut state = self.state.lock();
        state
            .entries
            .entry(key)
            .or_insert_with(|| Arc::new(AnalysisEntry::new(module)))
            .clone()
    }

    ///
    /// Plans a walk over the pending delta and installs a session for it: directly as the
    /// current session when none is running, and as the queued successor (cancelling the
    /// running one) otherwise.
    ///
    fn schedule(self: &Arc<Self>, fast_path: Option<Arc<AnalysisEntry>>) {
        let snapshot = self.graph.snapshot();
        let changed = self.graph.changed_keys();
        if changed.is_empty() {
            return;
        }

        {
            let mut busy = self.busy_since.lock();
            if busy.is_none() {
                *busy = Some(Instant::now());
            }
        }

        let mut state = self.state.lock();
        let superseded = |session: &Option<Arc<Session>>| {
            session.as_ref().map(|s| s.version() >= snapshot.version()).unwrap_or(false)
        };
        if superseded(&state.current) || superseded(&state.next) {
            return;
        }

        let plan = plan_walk(&self.graph, &snapshot, changed);
        self.kick_missing_loads(&mut state, &plan.missing_keys);

        let session = Session::new(
            snapshot.version(),
            plan.walker,
            fast_path,
            self.disposal.clone(),
            self.executor.clone(),
            SessionServices {
                evaluator: self.services.evaluator.clone(),
                cache: self.services.cache.clone(),
                progress: self.services.progress.clone(),
                cache_libraries: self.options.cache_libraries,
            },
            self.options.max_tasks,
        );

        match &state.current {
            None => {
                state.current = Some(session.clone());
                drop(state);
                self.start_session(session);
            }
            Some(current) => {
                // The newer version wins: the running session is cancelled, and the hand-off
                // hook promotes this one when it completes.
                current.cancel();
                if let Some(previous) = state.next.replace(session) {
                    previous.cancel();
                }
            }
        }
    }

    fn start_session(self: &Arc<Self>, session: Arc<Session>) {
        let inner = self.clone();
        let finished = session.clone();
        session.start(session.has_fast_path(), move || inner.session_completed(&finished));
    }

    ///
    /// The hand-off hook: promotes the queued successor, or raises the analysis-complete event
    /// when the finished session left a steady state behind.
    ///
    fn session_completed(self: &Arc<Self>, finished: &Arc<Session>) {
        let next = {
            let mut state = self.state.lock();
            if state.current.as_ref().map(|c| Arc::ptr_eq(c, finished)).unwrap_or(false) {
                state.current = None;
                if let Some(next) = state.next.take() {
                    state.current = Some(next.clone());
                    Some(next)
                } else {
                    None
                }
            } else {
                None
            }
        };
        if let Some(next) = next {
            self.start_session(next);
            return;
        }
        self.maybe_complete(finished);
    }

    fn maybe_complete(&self, finished: &Arc<Session>) {
        if finished.is_cancelled() || self.disposal.is_cancelled() {
            return;
        }
        let snapshot = self.graph.snapshot();
        if self.graph.has_changes() || !snapshot.missing_keys().is_empty() {
            return;
        }
        let elapsed = self.busy_since.lock().take().map(|since| since.elapsed()).unwrap_or_default();
        let event = AnalysisComplete {
            modules: snapshot.len(),
            elapsed,
        };
        log::info!("Analysis complete: {} modules in {:?}", event.modules, event.elapsed);
        self.complete_event.set();
        let _ = self.complete_tx.send(event);
    }

    ///
    /// For every key referenced but absent from the graph, kicks one background load. A loaded
    /// module gets a vertex immediately (so the key resolves in the next snapshot); its AST
    /// arrives through a host enqueue like any other edit.
    ///
    fn kick_missing_loads(self: &Arc<Self>, state: &mut FacadeState, missing: &HashSet<ModuleKey>) {
        for key in missing {
            if !state.kicked_loads.insert(key.clone()) {
                continue;
            }
            log::debug!("Missing module {key}: kicking a load");
            let inner = self.clone();
            let key = key.clone();
            let _join = self.executor.native_spawn(async move {
                if inner.graph.contains_key(&key) {
                    // An edit beat the load to it.
                    return;
                }
                match inner.services.loader.get_or_load(key.name(), key.is_typeshed()) {
                    Some(module) => {
                        let entry = inner.ensure_entry(module);
                        entry.invalidate();
                        let vertex = inner.graph.add_or_update(entry.key().clone(), entry.clone(), Vec::new());
                        entry.set_graph_version(vertex.version());
                        inner.schedule(None);
                    }
                    None => log::warn!("Missing module {key} could not be loaded"),
                }
            });
        }
    }
}

#[cfg(test)]
mod tests;
