//! Path-level dependency graph: evaluation order, cycles and re-evaluation sets.
//!
//! Nodes are fully-qualified reactive paths. Each node stores the paths its
//! expression references; a reverse index maps every referenced path to the
//! nodes that reference it. A reference `R` resolves to node `N` when `N` is
//! `R`, an ancestor of `R` (`Api1.data` for `Api1.data.users`) or a
//! descendant of `R` (`Table1.selectedRow` for `Table1`).

use crate::node::{Dependents, Node};
use crate::path::{ancestors, is_descendant};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Clone, Debug, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, Node>,
    reverse: BTreeMap<String, Dependents>,
    cycles: Vec<Vec<String>>,
    cyclic: BTreeSet<String>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        DependencyGraph::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }

    pub fn references(&self, path: &str) -> Option<&BTreeSet<String>> {
        self.nodes.get(path).map(|node| &node.references)
    }

    /// Replaces the references of one node, creating it if needed.
    ///
    /// Only this node's reverse-index entries are touched. Returns whether
    /// the references changed.
    pub fn set_references(&mut self, path: &str, references: BTreeSet<String>) -> bool {
        let node = self
            .nodes
            .entry(path.to_string())
            .or_insert_with(|| Node::create(path));
        if node.references == references {
            return false;
        }
        let old = std::mem::replace(&mut node.references, references.clone());
        for reference in old.difference(&references) {
            if let Some(dependents) = self.reverse.get_mut(reference) {
                dependents.remove(path);
                if dependents.is_empty() {
                    self.reverse.remove(reference);
                }
            }
        }
        for reference in references.difference(&old) {
            self.reverse.entry(reference.clone()).or_default().insert(path);
        }
        true
    }

    pub fn remove_node(&mut self, path: &str) -> bool {
        let Some(node) = self.nodes.remove(path) else {
            return false;
        };
        for reference in &node.references {
            if let Some(dependents) = self.reverse.get_mut(reference) {
                dependents.remove(path);
                if dependents.is_empty() {
                    self.reverse.remove(reference);
                }
            }
        }
        true
    }

    /// Nodes a reference resolves to.
    pub fn resolve(&self, reference: &str) -> BTreeSet<String> {
        let mut found: BTreeSet<String> = ancestors(reference)
            .into_iter()
            .chain(std::iter::once(reference))
            .filter(|candidate| self.nodes.contains_key(*candidate))
            .map(str::to_string)
            .collect();
        found.extend(
            self.nodes
                .range::<str, _>((std::ops::Bound::Excluded(reference), std::ops::Bound::Unbounded))
                .map(|(path, _)| path)
                .take_while(|path| path.starts_with(reference))
                .filter(|path| is_descendant(path, reference))
                .cloned(),
        );
        found
    }

    /// Nodes that `path` directly depends on.
    pub fn dependencies_of(&self, path: &str) -> BTreeSet<String> {
        let Some(node) = self.nodes.get(path) else {
            return BTreeSet::new();
        };
        node.references
            .iter()
            .flat_map(|reference| self.resolve(reference))
            .collect()
    }

    /// Nodes whose expressions reference `path`, one of its ancestors or one
    /// of its descendants.
    pub fn dependents_of(&self, path: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut collect = |dependents: &Dependents| found.extend(dependents.iter().cloned());

        for key in ancestors(path).into_iter().chain(std::iter::once(path)) {
            if let Some(dependents) = self.reverse.get(key) {
                collect(dependents);
            }
        }
        for (key, dependents) in self
            .reverse
            .range::<str, _>((std::ops::Bound::Excluded(path), std::ops::Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(path))
        {
            if is_descendant(key, path) {
                collect(dependents);
            }
        }
        found
    }

    /// `changed` paths resolved to nodes, plus every node that transitively
    /// depends on one of them.
    ///
    /// Changed paths that are not nodes (static values) still seed the walk.
    pub fn reevaluation_set(&self, changed: &[String]) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();

        for path in changed {
            for node in self.resolve(path) {
                if result.insert(node.clone()) {
                    queue.push_back(node);
                }
            }
            for dependent in self.dependents_of(path) {
                if result.insert(dependent.clone()) {
                    queue.push_back(dependent);
                }
            }
        }

        while let Some(current) = queue.pop_front() {
            for dependent in self.dependents_of(&current) {
                if result.insert(dependent.clone()) {
                    queue.push_back(dependent);
                }
            }
        }
        result
    }

    /// Orders `subset` so that every node follows the nodes it depends on.
    ///
    /// Dependencies outside the subset are ignored. Ties are broken by path
    /// name, so the order is deterministic.
    pub fn topo_sort(&self, subset: &BTreeSet<String>) -> Vec<String> {
        let mut sorted_nodes = Vec::with_capacity(subset.len());
        let mut visited: BTreeSet<String> = BTreeSet::new();
        let mut on_stack: BTreeSet<String> = BTreeSet::new();

        for start in subset {
            if visited.contains(start) {
                continue;
            }
            let mut work_stack = vec![start.clone()];

            while let Some(current) = work_stack.pop() {
                if visited.contains(&current) {
                    continue;
                }
                on_stack.insert(current.clone());

                let pending = self.dependencies_of(&current).into_iter().find(|dep| {
                    subset.contains(dep) && !visited.contains(dep) && !on_stack.contains(dep)
                });
                match pending {
                    Some(dep) => {
                        work_stack.push(current);
                        work_stack.push(dep);
                    }
                    None => {
                        on_stack.remove(&current);
                        visited.insert(current.clone());
                        sorted_nodes.push(current);
                    }
                }
            }
        }
        sorted_nodes
    }

    /// Full cycle detection over every node.
    pub fn detect_cycles(&mut self) -> &[Vec<String>] {
        let all: Vec<String> = self.nodes.keys().cloned().collect();
        self.cycles = self.strongly_connected(&all);
        self.rebuild_cyclic();
        &self.cycles
    }

    /// Re-checks cycles after the references of `touched` changed.
    ///
    /// Only the previous cycles containing a touched node and the components
    /// reachable from the touched nodes are examined.
    pub fn recheck_cycles(&mut self, touched: &BTreeSet<String>) -> &[Vec<String>] {
        let (stale, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.cycles)
            .into_iter()
            .partition(|cycle| cycle.iter().any(|path| touched.contains(path)));

        let mut seeds: BTreeSet<String> = touched.clone();
        seeds.extend(stale.into_iter().flatten());
        let seeds: Vec<String> = seeds
            .into_iter()
            .filter(|path| self.nodes.contains_key(path))
            .collect();

        self.cycles = kept;
        for cycle in self.strongly_connected(&seeds) {
            if cycle.iter().any(|path| seeds.contains(path)) && !self.cycles.contains(&cycle) {
                self.cycles.push(cycle);
            }
        }
        self.cycles.sort();
        self.rebuild_cyclic();
        &self.cycles
    }

    pub fn cycles(&self) -> &[Vec<String>] {
        &self.cycles
    }

    pub fn is_cyclic(&self, path: &str) -> bool {
        self.cyclic.contains(path)
    }

    pub fn cycle_of(&self, path: &str) -> Option<&Vec<String>> {
        self.cycles.iter().find(|cycle| cycle.iter().any(|p| p == path))
    }

    fn rebuild_cyclic(&mut self) {
        self.cyclic = self.cycles.iter().flatten().cloned().collect();
    }

    /// Tarjan's algorithm over the nodes reachable from `roots`, with an
    /// explicit stack. Returns the components that form cycles, each sorted.
    fn strongly_connected(&self, roots: &[String]) -> Vec<Vec<String>> {
        struct Frame {
            path: String,
            edges: Vec<String>,
            next: usize,
        }

        let mut index: BTreeMap<String, usize> = BTreeMap::new();
        let mut lowlink: BTreeMap<String, usize> = BTreeMap::new();
        let mut stack: Vec<String> = Vec::new();
        let mut on_stack: BTreeSet<String> = BTreeSet::new();
        let mut cycles = Vec::new();
        let mut counter = 0;

        for root in roots {
            if index.contains_key(root) {
                continue;
            }
            let mut calls = vec![Frame {
                path: root.clone(),
                edges: self.dependencies_of(root).into_iter().collect(),
                next: 0,
            }];
            index.insert(root.clone(), counter);
            lowlink.insert(root.clone(), counter);
            counter += 1;
            stack.push(root.clone());
            on_stack.insert(root.clone());

            while let Some(frame) = calls.last_mut() {
                if frame.next < frame.edges.len() {
                    let next = frame.edges[frame.next].clone();
                    frame.next += 1;
                    if !index.contains_key(&next) {
                        index.insert(next.clone(), counter);
                        lowlink.insert(next.clone(), counter);
                        counter += 1;
                        stack.push(next.clone());
                        on_stack.insert(next.clone());
                        let edges = self.dependencies_of(&next).into_iter().collect();
                        calls.push(Frame {
                            path: next,
                            edges,
                            next: 0,
                        });
                    } else if on_stack.contains(&next) {
                        let low = lowlink[&frame.path].min(index[&next]);
                        lowlink.insert(frame.path.clone(), low);
                    }
                    continue;
                }

                let Some(frame) = calls.pop() else {
                    break;
                };
                let low = lowlink[&frame.path];
                if let Some(parent) = calls.last() {
                    let parent_low = lowlink[&parent.path].min(low);
                    lowlink.insert(parent.path.clone(), parent_low);
                }
                if low == index[&frame.path] {
                    let mut component = Vec::new();
                    while let Some(member) = stack.pop() {
                        on_stack.remove(&member);
                        let done = member == frame.path;
                        component.push(member);
                        if done {
                            break;
                        }
                    }
                    let self_loop = component.len() == 1 && frame.edges.contains(&frame.path);
                    if component.len() > 1 || self_loop {
                        component.sort();
                        cycles.push(component);
                    }
                }
            }
        }
        cycles.sort();
        cycles
    }
}
