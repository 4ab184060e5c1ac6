// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::Arc;

use depgraph::{DepGraph, DepVertex, ModuleKey, Snapshot};
use fnv::{FnvHashMap as HashMap, FnvHashSet as HashSet};
use indexmap::IndexSet;
use petgraph::graph::DiGraph;

use crate::{ChainWalker, Pass, WalkingVertex};

///
/// The product of planning one walk: the walker to drain, and the keys that were referenced by
/// walked modules but absent from the graph (analysis proceeds without them; the facade kicks a
/// load so they appear in a later snapshot).
///
pub struct WalkPlan<V> {
    pub walker: Arc<ChainWalker<V>>,
    pub missing_keys: HashSet<ModuleKey>,
}

struct Builder<V> {
    dep: Arc<DepVertex<V>>,
    pass: Pass,
    outgoing: IndexSet<usize>,
    loop_number: Option<u32>,
    first_pass: Option<usize>,
    second_pass: Option<usize>,
}

///
/// Builds the walking graph for the given changed keys over a snapshot:
///
/// 1. materialize one walking vertex per changed vertex and per vertex transitively reachable
///    through `outgoing` (the dependents);
/// 2. find import cycles among them;
/// 3. split every cyclic module into a first and second pass, so that it is analyzed once with
///    partial information and once after all of its cycle peers have finished their first pass;
/// 4. seal the vertices and seed the ready queue with those that have no incoming edges.
///
pub fn plan_walk<V: Clone>(
    graph: &DepGraph<V>,
    snapshot: &Snapshot<V>,
    changed: impl IntoIterator<Item = ModuleKey>,
) -> WalkPlan<V> {
    let mut builders: Vec<Builder<V>> = Vec::new();
    let mut by_dep: HashMap<usize, usize> = HashMap::default();
    let mut queue: VecDeque<usize> = VecDeque::new();

    let mut ensure = |dep: &Arc<DepVertex<V>>, builders: &mut Vec<Builder<V>>, queue: &mut VecDeque<usize>| -> usize {
        match by_dep.get(&dep.index()) {
            Some(&id) => id,
            None => {
                let id = builders.len();
                builders.push(Builder {
                    dep: dep.clone(),
                    pass: Pass::First,
                    outgoing: IndexSet::new(),
                    loop_number: None,
                    first_pass: None,
                    second_pass: None,
                });
                by_dep.insert(dep.index(), id);
                queue.push_back(id);
                id
            }
        }
    };

    for key in changed {
        if let Some(dep) = snapshot.vertex_for_key(&key) {
            ensure(dep, &mut builders, &mut queue);
        }
    }

    // Forward BFS through dependents. Self-loops are dropped here: a module importing itself is
    // analyzed in a single pass.
    while let Some(id) = queue.pop_front() {
        let dep = builders[id].dep.clone();
        for &out in dep.outgoing() {
            if out == dep.index() {
                continue;
            }
            let target = ensure(snapshot.vertex(out), &mut builders, &mut queue);
            builders[id].outgoing.insert(target);
        }
    }

    // Keys the walked modules reference that have no vertex yet.
    let mut missing_keys = HashSet::default();
    for builder in &builders {
        if builder.dep.has_missing_keys() {
            for key in builder.dep.incoming_keys() {
                if snapshot.missing_keys().contains(key) {
                    missing_keys.insert(key.clone());
                }
            }
        }
    }

    // Multi-member strongly connected components are import cycles needing the two-pass split.
    let mut pg: DiGraph<usize, ()> = DiGraph::new();
    let nodes: Vec<_> = (0..builders.len()).map(|id| pg.add_node(id)).collect();
    for (id, builder) in builders.iter().enumerate() {
        for &target in &builder.outgoing {
            pg.add_edge(nodes[id], nodes[target], ());
        }
    }
    let mut loops: Vec<Vec<usize>> = Vec::new();
    for scc in petgraph::algo::tarjan_scc(&pg) {
        if scc.len() >= 2 {
            let members: Vec<usize> = scc.iter().map(|&n| pg[n]).collect();
            for &member in &members {
                builders[member].loop_number = Some(loops.len() as u32);
            }
            loops.push(members);
        }
    }

    // Incoming counts of the unbroken graph, used to order the loop-breaking DFS below.
    let mut incoming = vec![0usize; builders.len()];
    for builder in &builders {
        for &target in &builder.outgoing {
            incoming[target] += 1;
        }
    }

    for members in &loops {
        break_loop(&mut builders, members, &incoming);
    }

    // Seal. Incoming counts are recomputed over the transformed edges.
    let mut incoming = vec![0usize; builders.len()];
    for builder in &builders {
        for &target in &builder.outgoing {
            incoming[target] += 1;
        }
    }
    let vertices: Vec<Arc<WalkingVertex<V>>> = builders
        .into_iter()
        .enumerate()
        .map(|(id, builder)| {
            Arc::new(WalkingVertex {
                id,
                has_missing_dependencies: builder.dep.has_missing_keys(),
                dep: builder.dep,
                pass: builder.pass,
                outgoing: builder.outgoing.into_iter().collect(),
                initial_incoming: incoming[id],
                incoming_count: AtomicUsize::new(incoming[id]),
                walked_incoming_count: AtomicUsize::new(0),
                loop_number: builder.loop_number,
                first_pass: builder.first_pass,
                second_pass: builder.second_pass,
                walked_with_dependencies: AtomicBool::new(false),
                resolved: AtomicBool::new(false),
            })
        })
        .collect();

    let ready: VecDeque<usize> = vertices
        .iter()
        .filter(|vertex| vertex.initial_incoming == 0)
        .map(|vertex| vertex.id)
        .collect();

    log::debug!(
        "Planned walk of {} nodes ({} loops, {} missing keys) at graph v{}",
        vertices.len(),
        loops.len(),
        missing_keys.len(),
        snapshot.version()
    );

    WalkPlan {
        walker: Arc::new(ChainWalker::new(graph.clone(), snapshot.version(), vertices, ready)),
        missing_keys,
    }
}

///
/// The two-pass transform for one import cycle:
///
/// * every member gets a second-pass mirror;
/// * edges that leave the cycle move to the mirror, so dependents of a cyclic module only run
///   after its second pass;
/// * a DFS over the members (ascending by incoming count) drops every edge landing on an
///   already-visited member, leaving an acyclic first-pass subgraph;
/// * every first-pass member then feeds every second-pass mirror, so no second pass starts
///   before the whole cycle has a first analysis.
///
fn break_loop<V>(builders: &mut Vec<Builder<V>>, members: &[usize], incoming: &[usize]) {
    // Materialization order, so that mirror ids (and therefore release order among mirrors that
    // become ready together) do not depend on how the components were enumerated.
    let mut members = members.to_vec();
    members.sort_unstable();
    let members = &members[..];
    let member_set: HashSet<usize> = members.iter().copied().collect();

    let mut mirror: HashMap<usize, usize> = HashMap::default();
    for &member in members {
        let id = builders.len();
        let (dep, loop_number) = {
            let first = &builders[member];
            (first.dep.clone(), first.loop_number)
        };
        builders.push(Builder {
            dep,
            pass: Pass::Second,
            outgoing: IndexSet::new(),
            loop_number,
            first_pass: Some(member),
            second_pass: None,
        });
        builders[member].second_pass = Some(id);
        mirror.insert(member, id);
    }

    for &member in members {
        let exits: Vec<usize> = builders[member]
            .outgoing
            .iter()
            .copied()
            .filter(|target| !member_set.contains(target))
            .collect();
        for target in exits {
            builders[member].outgoing.shift_remove(&target);
            builders[mirror[&member]].outgoing.insert(target);
        }
    }

    let mut sorted: Vec<usize> = members.to_vec();
    sorted.sort_by_key(|&member| (incoming[member], member));

    let mut visited: HashSet<usize> = HashSet::default();
    let mut stack: Vec<usize> = Vec::new();
    for &root in &sorted {
        if visited.contains(&root) {
            continue;
        }
        visited.insert(root);
        stack.push(root);
        while let Some(member) = stack.pop() {
            let targets: Vec<usize> = builders[member]
                .outgoing
                .iter()
                .copied()
                .filter(|target| member_set.contains(target))
                .collect();
            for target in targets {
                if visited.contains(&target) {
                    builders[member].outgoing.shift_remove(&target);
                } else {
                    visited.insert(target);
                    stack.push(target);
                }
            }
        }
    }

    for &member in members {
        for &other in members {
            builders[member].outgoing.insert(mirror[&other]);
        }
    }
}
