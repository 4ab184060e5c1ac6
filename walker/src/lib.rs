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

//! Plans and drives one analysis walk over a dependency-graph snapshot.

mod plan;

pub use crate::plan::{plan_walk, WalkPlan};

use std::collections::VecDeque;
use std::fmt;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use depgraph::{DepGraph, DepVertex, ModuleKey};
use parking_lot::Mutex;
use tokio::sync::Notify;

///
/// Which of a cyclic module's two analyses a walking vertex represents. Modules outside any
/// import cycle are walked exactly once, in `First`.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Pass {
    First,
    Second,
}

///
/// A planning-only node wrapping a dependency vertex for one session. Sealed by the planner;
/// only the live counters change while the walk runs.
///
pub struct WalkingVertex<V> {
    id: usize,
    dep: Arc<DepVertex<V>>,
    pass: Pass,
    outgoing: Vec<usize>,
    initial_incoming: usize,
    incoming_count: AtomicUsize,
    walked_incoming_count: AtomicUsize,
    loop_number: Option<u32>,
    has_missing_dependencies: bool,
    first_pass: Option<usize>,
    second_pass: Option<usize>,
    walked_with_dependencies: AtomicBool,
    resolved: AtomicBool,
}

impl<V> WalkingVertex<V> {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn vertex(&self) -> &Arc<DepVertex<V>> {
        &self.dep
    }

    pub fn key(&self) -> &ModuleKey {
        self.dep.key()
    }

    pub fn value(&self) -> &V {
        self.dep.value()
    }

    pub fn pass(&self) -> Pass {
        self.pass
    }

    /// The loop this vertex belongs to, if it is part of a multi-member import cycle.
    pub fn loop_number(&self) -> Option<u32> {
        self.loop_number
    }

    pub fn in_loop(&self) -> bool {
        self.loop_number.is_some()
    }

    /// True if any of this module's declared imports had no vertex in the snapshot.
    pub fn has_missing_dependencies(&self) -> bool {
        self.has_missing_dependencies
    }

    /// The walking-vertex id of this vertex's first-pass original, for second-pass mirrors.
    pub fn first_pass(&self) -> Option<usize> {
        self.first_pass
    }

    /// The walking-vertex id of this vertex's second-pass mirror, for cyclic first passes.
    pub fn second_pass(&self) -> Option<usize> {
        self.second_pass
    }

    ///
    /// True once every in-walk dependency of this vertex has been committed with its own
    /// dependencies walked. Gates persisting this module's analysis to the cache.
    ///
    pub fn dependencies_walked(&self) -> bool {
        self.walked_incoming_count.load(Ordering::SeqCst) == self.initial_incoming
    }

    pub fn walked_with_dependencies(&self) -> bool {
        self.walked_with_dependencies.load(Ordering::SeqCst)
    }

    pub fn set_walked_with_dependencies(&self, walked: bool) {
        self.walked_with_dependencies.store(walked, Ordering::SeqCst);
    }
}

impl<V> fmt::Display for WalkingVertex<V> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.dep.key())?;
        if self.pass == Pass::Second {
            write!(f, " (second pass)")?;
        }
        Ok(())
    }
}

struct WalkerState {
    ready: VecDeque<usize>,
    remaining: usize,
    closed: bool,
}

///
/// The producer/consumer over a walking graph: serves nodes as soon as their incoming edges
/// drain, and closes once every node has been committed or skipped.
///
/// `get_next` may be called from any number of workers concurrently. Each served node must be
/// resolved exactly once, via `commit` or `skip`.
///
pub struct ChainWalker<V> {
    version: u64,
    graph: DepGraph<V>,
    vertices: Vec<Arc<WalkingVertex<V>>>,
    state: Mutex<WalkerState>,
    notify: Notify,
}

impl<V: Clone> ChainWalker<V> {
    pub(crate) fn new(graph: DepGraph<V>, version: u64, vertices: Vec<Arc<WalkingVertex<V>>>, ready: VecDeque<usize>) -> ChainWalker<V> {
        let remaining = vertices.len();
        ChainWalker {
            version,
            graph,
            vertices,
            state: Mutex::new(WalkerState {
                ready,
                remaining,
                closed: remaining == 0,
            }),
            notify: Notify::new(),
        }
    }

    /// The graph version observed when the walking graph was built. A newer graph version
    /// supersedes this walk.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The total number of nodes in this walk, second-pass mirrors included.
    pub fn total(&self) -> usize {
        self.vertices.len()
    }

    pub fn remaining(&self) -> usize {
        self.state.lock().remaining
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().closed
    }

    ///
    /// Awaits a node whose incoming edges have all drained. Completes with `None` once every
    /// node has been committed or skipped; after the walker closes, all concurrent and future
    /// callers observe `None` as well, so workers never hang.
    ///
    pub async fn get_next(&self) -> Option<Arc<WalkingVertex<V>>> {
        loop {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();
            {
                let mut state = self.state.lock();
                if let Some(id) = state.ready.pop_front() {
                    return Some(self.vertices[id].clone());
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    ///
    /// Marks the node analyzed: releases its dependents and forgets its module from the graph's
    /// changed set, so that the next session plans from the true delta.
    ///
    pub fn commit(&self, vertex: &WalkingVertex<V>) {
        self.resolve(vertex, true)
    }

    ///
    /// Marks the node finished without an analysis. Releases its dependents, but leaves its
    /// module in the graph's changed set for the next session.
    ///
    pub fn skip(&self, vertex: &WalkingVertex<V>) {
        self.resolve(vertex, false)
    }

    fn resolve(&self, vertex: &WalkingVertex<V>, committed: bool) {
        if vertex.resolved.swap(true, Ordering::SeqCst) {
            debug_assert!(false, "{vertex} was committed or skipped twice");
            log::error!("{vertex} was committed or skipped twice; ignoring.");
            return;
        }

        if committed {
            self.graph.forget_changed(vertex.key());
        }
        let walked = committed && vertex.walked_with_dependencies();

        {
            let mut state = self.state.lock();
            state.remaining -= 1;
            for &target in &vertex.outgoing {
                let dependent = &self.vertices[target];
                if walked {
                    dependent.walked_incoming_count.fetch_add(1, Ordering::SeqCst);
                }
                if dependent.incoming_count.fetch_sub(1, Ordering::SeqCst) == 1 {
                    state.ready.push_back(target);
                }
            }
            if state.remaining == 0 {
                state.closed = true;
            }
        }
        self.notify.notify_waiters();
    }
}
