// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use depgraph::ModuleType;
use parking_lot::Mutex;
use task_executor::Executor;
use tokio::sync::Notify;
use walker::{ChainWalker, WalkingVertex};

use crate::entry::AnalysisEntry;
use crate::services::{AnalysisCache, Evaluator, ProgressReporter};
use crate::sync::CancelFlag;
use crate::types::{AnalysisError, ModuleAnalysis};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    NotStarted,
    Started,
    Completed,
}

#[derive(Clone)]
pub(crate) struct SessionServices {
    pub evaluator: Arc<dyn Evaluator>,
    pub cache: Option<Arc<dyn AnalysisCache>>,
    pub progress: Arc<dyn ProgressReporter>,
    pub cache_libraries: bool,
}

#[derive(Default)]
pub struct SessionStats {
    pub committed: AtomicUsize,
    pub skipped: AtomicUsize,
    pub restored_from_cache: AtomicUsize,
    pub evaluated: AtomicUsize,
}

type Node = Arc<WalkingVertex<Arc<AnalysisEntry>>>;

///
/// One analysis pass: drains its walker with a bounded worker fan-out, writing results into the
/// walked entries.
///
/// Cancellation is cooperative: workers observe it between nodes and skip the remainder, so a
/// cancelled session still drains its walker and reaches `Completed` (which is what allows a
/// queued successor to take over).
///
pub struct Session {
    version: u64,
    walker: Arc<ChainWalker<Arc<AnalysisEntry>>>,
    fast_path: Option<Arc<AnalysisEntry>>,
    cancelled: CancelFlag,
    disposal: CancelFlag,
    state: Mutex<SessionState>,
    // One slot is permanently the driver's: workers may be spawned while fewer than
    // `max_tasks - 1` are running, and otherwise the driver executes the node inline.
    running_tasks: AtomicUsize,
    max_tasks: usize,
    workers_idle: Notify,
    executor: Executor,
    services: SessionServices,
    stats: SessionStats,
}

impl Session {
    pub(crate) fn new(
        version: u64,
        walker: Arc<ChainWalker<Arc<AnalysisEntry>>>,
        fast_path: Option<Arc<AnalysisEntry>>,
        disposal: CancelFlag,
        executor: Executor,
        services: SessionServices,
        max_tasks: usize,
    ) -> Arc<Session> {
        Arc::new(Session {
            version,
            walker,
            fast_path,
            cancelled: CancelFlag::new(),
            disposal,
            state: Mutex::new(SessionState::NotStarted),
            running_tasks: AtomicUsize::new(0),
            max_tasks: max_tasks.max(1),
            workers_idle: Notify::new(),
            executor,
            services,
            stats: SessionStats::default(),
        })
    }

    /// The graph version this session was planned at. A session at a newer version supersedes it.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn remaining(&self) -> usize {
        self.walker.remaining()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn cancel(&self) {
        self.cancelled.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_cancelled() || self.disposal.is_cancelled()
    }

    pub(crate) fn has_fast_path(&self) -> bool {
        self.fast_path.is_some()
    }

    ///
    /// Spawns the session onto the executor. `on_complete` is the hand-off hook: it runs after
    /// the session reaches `Completed`, on the task that drained the walker.
    ///
    pub(crate) fn start(self: &Arc<Self>, analyze_entry: bool, on_complete: impl FnOnce() + Send + 'static) {
        let session = self.clone();
        let _join = self.executor.native_spawn(async move {
            session.run(analyze_entry).await;
            on_complete();
        });
    }

    pub(crate) async fn run(self: Arc<Self>, analyze_entry: bool) {
        {
            let mut state = self.state.lock();
            if *state != SessionState::NotStarted {
                return;
            }
            *state = SessionState::Started;
        }
        log::debug!("Session v{} started with {} nodes", self.version, self.walker.total());

        if analyze_entry {
            if let Some(entry) = self.fast_path.clone() {
                self.analyze_fast_path(&entry).await;
            }
        }
        self.drive_walker().await;
        self.wait_workers_idle().await;
        *self.state.lock() = SessionState::Completed;

        log::info!(
            "Session v{} completed: {} committed ({} evaluated, {} restored), {} skipped",
            self.version,
            self.stats.committed.load(Ordering::SeqCst),
            self.stats.evaluated.load(Ordering::SeqCst),
            self.stats.restored_from_cache.load(Ordering::SeqCst),
            self.stats.skipped.load(Ordering::SeqCst),
        );
    }

    ///
    /// Analyzes the pre-chosen entry ahead of the chain, so the user's current file gets its
    /// analysis without waiting for the full walk.
    ///
    async fn analyze_fast_path(&self, entry: &Arc<AnalysisEntry>) {
        if entry.is_analyzed() {
            return;
        }
        let Some((ast, version)) = entry.ast_and_version() else {
            return;
        };
        log::debug!("Fast path analysis of {}", entry.key());
        match self.services.evaluator.evaluate(entry.module(), &ast).await {
            Ok(scope) => {
                entry.try_set_analysis(Arc::new(ModuleAnalysis::new(entry.key().clone(), version, scope)));
            }
            Err(AnalysisError::Cancelled) => entry.record_cancelled(),
            Err(AnalysisError::Failed(message)) => entry.record_failure(message),
        }
    }

    async fn drive_walker(self: &Arc<Self>) {
        self.services.progress.report_remaining(self.walker.remaining());
        while let Some(node) = self.walker.get_next().await {
            // The last node runs inline so that completion and the hand-off hook execute on the
            // task that drained the walker.
            if self.walker.remaining() > 1 && self.try_reserve_worker() {
                let session = self.clone();
                let _join = self.executor.native_spawn(async move {
                    session.process_node(&node).await;
                    session.release_worker();
                });
            } else {
                self.process_node(&node).await;
            }
        }
    }

    async fn process_node(&self, node: &Node) {
        let entry = node.value().clone();

        // A cancelled session only finishes nodes that are still required: entries with no
        // analysis yet, and members of loops that must complete both passes.
        if self.is_cancelled() && entry.is_analyzed() && !node.in_loop() {
            self.skip_node(node);
            return;
        }
        // Stale for this session: a newer edit owns the entry now.
        if !entry.can_update(self.version) {
            self.skip_node(node);
            return;
        }
        // The fast path already produced this version's analysis: commit without re-evaluating.
        if let Some(fast) = &self.fast_path {
            if Arc::ptr_eq(fast, &entry) && entry.is_analyzed() && !node.in_loop() {
                self.commit_node(node);
                return;
            }
        }

        if let Some(cache) = &self.services.cache {
            if cache.exists(entry.key().name(), entry.key().file_path()) {
                if let Some(scope) = cache.restore(entry.module()).await {
                    let analysis = Arc::new(ModuleAnalysis::new(entry.key().clone(), entry.buffer_version(), scope));
                    entry.try_set_analysis(analysis);
                    node.set_walked_with_dependencies(true);
                    self.stats.restored_from_cache.fetch_add(1, Ordering::SeqCst);
                    self.commit_node(node);
                    return;
                }
                log::warn!("Failed to restore the cached analysis for {}", entry.key());
            }
        }

        let Some((ast, version)) = entry.ast_and_version() else {
            self.skip_node(node);
            return;
        };
        match self.services.evaluator.evaluate(entry.module(), &ast).await {
            Ok(scope) => {
                let analysis = Arc::new(ModuleAnalysis::new(entry.key().clone(), version, scope));
                entry.try_set_analysis(analysis.clone());
                let walked = node.dependencies_walked() && !node.has_missing_dependencies();
                node.set_walked_with_dependencies(walked);
                self.stats.evaluated.fetch_add(1, Ordering::SeqCst);
                self.commit_node(node);

                // An open document is never persisted: its buffer is still changing, and it
                // must keep its full AST.
                if walked
                    && self.services.cache_libraries
                    && entry.module().module_type == ModuleType::Library
                    && !entry.is_open()
                {
                    if let Some(cache) = &self.services.cache {
                        cache.store(&analysis).await;
                        entry.downgrade_ast();
                    }
                }
            }
            Err(AnalysisError::Cancelled) => {
                entry.record_cancelled();
                self.skip_node(node);
            }
            Err(AnalysisError::Failed(message)) => {
                // Contained per entry: the node commits so dependents proceed with the previous
                // (possibly empty) analysis.
                entry.record_failure(message);
                self.commit_node(node);
            }
        }
    }

    fn commit_node(&self, node: &Node) {
        self.walker.commit(node);
        self.stats.committed.fetch_add(1, Ordering::SeqCst);
        self.services.progress.report_remaining(self.walker.remaining());
    }

    fn skip_node(&self, node: &Node) {
        self.walker.skip(node);
        self.stats.skipped.fetch_add(1, Ordering::SeqCst);
        self.services.progress.report_remaining(self.walker.remaining());
    }

    fn try_reserve_worker(&self) -> bool {
        self.running_tasks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |running| {
                if running + 1 < self.max_tasks {
                    Some(running + 1)
                } else {
                    None
                }
            })
            .is_ok()
    }

    fn release_worker(&self) {
        if self.running_tasks.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.workers_idle.notify_waiters();
        }
    }

    async fn wait_workers_idle(&self) {
        loop {
            let mut notified = pin!(self.workers_idle.notified());
            notified.as_mut().enable();
            if self.running_tasks.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}
