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

mod key;
mod module;

pub use crate::key::ModuleKey;
pub use crate::module::{ModuleLoader, ModuleType, PyModule};

use std::fmt;
use std::sync::Arc;

use fnv::{FnvHashMap as HashMap, FnvHashSet as HashSet};
use parking_lot::Mutex;

///
/// A vertex in the dependency graph: one module, its value, and the keys it imports.
///
/// A vertex is mutable only in the sense that the graph may replace it wholesale: each instance
/// is either unsealed (created by a mutation, edges unresolved) or sealed (created by a snapshot,
/// edges resolved). Sealing is monotone per instance; a later mutation installs a fresh unsealed
/// instance at the same key.
///
#[derive(Clone, Debug)]
pub struct DepVertex<V> {
    index: usize,
    key: ModuleKey,
    value: V,
    incoming_keys: Vec<ModuleKey>,
    incoming: Vec<usize>,
    outgoing: Vec<usize>,
    has_missing_keys: bool,
    version: u64,
    sealed: bool,
}

impl<V> DepVertex<V> {
    ///
    /// The stable position of this vertex in the graph's index-ordered arena. Indices form a
    /// compact `[0, n)` range and are only re-assigned when vertices are removed.
    ///
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn key(&self) -> &ModuleKey {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    /// The keys this module imports, as declared at the last update.
    pub fn incoming_keys(&self) -> &[ModuleKey] {
        &self.incoming_keys
    }

    /// Indices of the vertices this module imports. Empty until sealed.
    pub fn incoming(&self) -> &[usize] {
        &self.incoming
    }

    /// Indices of the vertices that import this module. Empty until sealed.
    pub fn outgoing(&self) -> &[usize] {
        &self.outgoing
    }

    /// True if any declared incoming key had no vertex at the time of the sealing snapshot.
    pub fn has_missing_keys(&self) -> bool {
        self.has_missing_keys
    }

    /// The graph version at which this vertex was last added or updated.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }
}

impl<V> fmt::Display for DepVertex<V> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} (#{}, v{}, {} imports)",
            self.key,
            self.index,
            self.version,
            self.incoming_keys.len()
        )
    }
}

///
/// An immutable view of the graph at a specific version: every vertex sealed, edges resolved,
/// and the set of keys that were referenced but absent.
///
pub struct Snapshot<V> {
    version: u64,
    vertices: Arc<Vec<Arc<DepVertex<V>>>>,
    keys: Arc<HashMap<ModuleKey, usize>>,
    missing_keys: Arc<HashSet<ModuleKey>>,
}

impl<V> Clone for Snapshot<V> {
    fn clone(&self) -> Self {
        Snapshot {
            version: self.version,
            vertices: self.vertices.clone(),
            keys: self.keys.clone(),
            missing_keys: self.missing_keys.clone(),
        }
    }
}

impl<V> Snapshot<V> {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn vertices(&self) -> &[Arc<DepVertex<V>>] {
        &self.vertices
    }

    pub fn vertex(&self, index: usize) -> &Arc<DepVertex<V>> {
        &self.vertices[index]
    }

    pub fn vertex_for_key(&self, key: &ModuleKey) -> Option<&Arc<DepVertex<V>>> {
        self.keys.get(key).map(|&i| &self.vertices[i])
    }

    pub fn missing_keys(&self) -> &HashSet<ModuleKey> {
        &self.missing_keys
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }
}

struct InnerGraph<V> {
    // Index-ordered arena of the current generation of each vertex.
    vertices: Vec<Arc<DepVertex<V>>>,
    keys: HashMap<ModuleKey, usize>,
    version: u64,
    // Keys added or updated since the last session committed them: the seed set for the next
    // walk plan.
    changed: HashSet<ModuleKey>,
    snapshot: Option<Snapshot<V>>,
}

impl<V: Clone> InnerGraph<V> {
    fn add_or_update(&mut self, key: ModuleKey, value: V, incoming_keys: Vec<ModuleKey>) -> Arc<DepVertex<V>> {
        self.version += 1;
        let index = match self.keys.get(&key) {
            Some(&index) => index,
            None => {
                let index = self.vertices.len();
                self.keys.insert(key.clone(), index);
                // Reserve the slot; it is overwritten with the real vertex below.
                self.vertices.push(Arc::new(DepVertex {
                    index,
                    key: key.clone(),
                    value: value.clone(),
                    incoming_keys: Vec::new(),
                    incoming: Vec::new(),
                    outgoing: Vec::new(),
                    has_missing_keys: false,
                    version: self.version,
                    sealed: false,
                }));
                index
            }
        };

        let vertex = Arc::new(DepVertex {
            index,
            key: key.clone(),
            value,
            incoming_keys,
            incoming: Vec::new(),
            outgoing: Vec::new(),
            has_missing_keys: false,
            version: self.version,
            sealed: false,
        });
        self.vertices[index] = vertex.clone();
        self.changed.insert(key);
        self.snapshot = None;
        vertex
    }

    fn remove(&mut self, keys: &[ModuleKey]) {
        let dropped: HashSet<usize> = keys.iter().filter_map(|k| self.keys.get(k).copied()).collect();
        if dropped.is_empty() {
            return;
        }
        self.version += 1;

        // Compact the arena, re-assigning indices so they remain a dense [0, n) range. Resolved
        // edges are stale after a removal in any case, so survivors are re-installed unsealed.
        let old = std::mem::take(&mut self.vertices);
        self.keys.clear();
        for vertex in old {
            if dropped.contains(&vertex.index) {
                self.changed.remove(&vertex.key);
                continue;
            }
            let index = self.vertices.len();
            self.keys.insert(vertex.key.clone(), index);
            self.vertices.push(Arc::new(DepVertex {
                index,
                key: vertex.key.clone(),
                value: vertex.value.clone(),
                incoming_keys: vertex.incoming_keys.clone(),
                incoming: Vec::new(),
                outgoing: Vec::new(),
                has_missing_keys: false,
                version: vertex.version,
                sealed: false,
            }));
        }
        self.snapshot = None;
    }

    ///
    /// Resolves edges for every vertex, seals them, and caches the result. Idempotent: a second
    /// call at the same version returns the cached view.
    ///
    fn snapshot(&mut self) -> Snapshot<V> {
        if let Some(snapshot) = &self.snapshot {
            if snapshot.version == self.version {
                return snapshot.clone();
            }
        }

        let n = self.vertices.len();
        let mut incoming: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut vertex_missing = vec![false; n];
        let mut missing_keys = HashSet::default();

        for (i, vertex) in self.vertices.iter().enumerate() {
            for key in vertex.incoming_keys() {
                match self.keys.get(key) {
                    Some(&dep) => {
                        incoming[i].push(dep);
                        outgoing[dep].push(i);
                    }
                    None => {
                        missing_keys.insert(key.clone());
                        vertex_missing[i] = true;
                    }
                }
            }
        }

        let sealed: Vec<Arc<DepVertex<V>>> = self
            .vertices
            .iter()
            .enumerate()
            .map(|(i, vertex)| {
                let mut inc = std::mem::take(&mut incoming[i]);
                let mut out = std::mem::take(&mut outgoing[i]);
                inc.sort_unstable();
                inc.dedup();
                out.sort_unstable();
                out.dedup();
                Arc::new(DepVertex {
                    index: i,
                    key: vertex.key.clone(),
                    value: vertex.value.clone(),
                    incoming_keys: vertex.incoming_keys.clone(),
                    incoming: inc,
                    outgoing: out,
                    has_missing_keys: vertex_missing[i],
                    version: vertex.version,
                    sealed: true,
                })
            })
            .collect();
        self.vertices = sealed;

        let snapshot = Snapshot {
            version: self.version,
            vertices: Arc::new(self.vertices.clone()),
            keys: Arc::new(self.keys.clone()),
            missing_keys: Arc::new(missing_keys),
        };
        self.snapshot = Some(snapshot.clone());
        log::trace!(
            "Sealed snapshot v{} with {} vertices, {} missing keys",
            snapshot.version,
            snapshot.len(),
            snapshot.missing_keys.len()
        );
        snapshot
    }
}

///
/// A versioned graph of inter-module dependencies, keyed by `ModuleKey`.
///
/// All mutations are serialized under a single lock and each bumps the graph version by one;
/// readers obtain consistent views through `snapshot`. The graph never mutates under a live
/// snapshot: snapshots hold their own (sealed) vertex instances.
///
pub struct DepGraph<V> {
    inner: Arc<Mutex<InnerGraph<V>>>,
}

impl<V> Clone for DepGraph<V> {
    fn clone(&self) -> Self {
        DepGraph {
            inner: self.inner.clone(),
        }
    }
}

impl<V: Clone> DepGraph<V> {
    pub fn new() -> DepGraph<V> {
        DepGraph {
            inner: Arc::new(Mutex::new(InnerGraph {
                vertices: Vec::new(),
                keys: HashMap::default(),
                version: 0,
                changed: HashSet::default(),
                snapshot: None,
            })),
        }
    }

    ///
    /// Creates or replaces the vertex for `key`, declaring the keys it imports. Edges of other
    /// vertices are recomputed lazily by the next `snapshot`.
    ///
    pub fn add_or_update(&self, key: ModuleKey, value: V, incoming_keys: Vec<ModuleKey>) -> Arc<DepVertex<V>> {
        self.inner.lock().add_or_update(key, value, incoming_keys)
    }

    ///
    /// Drops the vertices for the given keys and re-indexes the survivors.
    ///
    pub fn remove(&self, keys: &[ModuleKey]) {
        self.inner.lock().remove(keys)
    }

    pub fn snapshot(&self) -> Snapshot<V> {
        self.inner.lock().snapshot()
    }

    pub fn get(&self, key: &ModuleKey) -> Option<Arc<DepVertex<V>>> {
        let inner = self.inner.lock();
        inner.keys.get(key).map(|&i| inner.vertices[i].clone())
    }

    pub fn contains_key(&self, key: &ModuleKey) -> bool {
        self.inner.lock().keys.contains_key(key)
    }

    pub fn version(&self) -> u64 {
        self.inner.lock().version
    }

    pub fn len(&self) -> usize {
        self.inner.lock().vertices.len()
    }

    ///
    /// The keys added or updated since their last committed walk, in arena order.
    ///
    pub fn changed_keys(&self) -> Vec<ModuleKey> {
        let inner = self.inner.lock();
        let mut keys: Vec<_> = inner
            .changed
            .iter()
            .filter_map(|k| inner.keys.get(k).map(|&i| (i, k.clone())))
            .collect();
        keys.sort_by_key(|(i, _)| *i);
        keys.into_iter().map(|(_, k)| k).collect()
    }

    ///
    /// Forgets `key` from the changed set. Invoked when a walk commits the vertex, so that the
    /// next session plans from the true delta.
    ///
    pub fn forget_changed(&self, key: &ModuleKey) {
        self.inner.lock().changed.remove(key);
    }

    pub fn has_changes(&self) -> bool {
        !self.inner.lock().changed.is_empty()
    }
}
