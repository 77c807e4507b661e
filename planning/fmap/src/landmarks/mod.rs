//! Landmark graphs: facts (or disjunctions of facts) true at some point of every valid plan,
//! with the orderings between them.

pub mod multi;
mod single;

use std::fmt::{Display, Formatter};

use hashbrown::HashMap;
use itertools::Itertools;

pub use single::{RelaxedExplorer, extract};

use crate::grounding::{Fact, GroundedTask};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OrderingKind {
    /// The predecessor must be true immediately before the successor is first achieved.
    Necessary,
    /// The successor should not be achieved before the predecessor, or it would have to be achieved again.
    Reasonable,
}

impl Display for OrderingKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderingKind::Necessary => write!(f, "necessary"),
            OrderingKind::Reasonable => write!(f, "reasonable"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LandmarkNode {
    pub id: usize,
    /// One fact for a single landmark, several for a disjunctive one. Sorted.
    pub facts: Vec<Fact>,
    pub is_goal: bool,
}

impl LandmarkNode {
    pub fn is_disjunctive(&self) -> bool {
        self.facts.len() > 1
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LandmarkOrdering {
    pub before: usize,
    pub after: usize,
    pub kind: OrderingKind,
}

#[derive(Clone, Debug, Default)]
pub struct LandmarkGraph {
    nodes: Vec<LandmarkNode>,
    index: HashMap<Vec<Fact>, usize>,
    orderings: Vec<LandmarkOrdering>,
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl LandmarkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node, or returns the existing node with the same facts. Returns the node and whether it is new.
    pub fn add_node(&mut self, mut facts: Vec<Fact>, is_goal: bool) -> (usize, bool) {
        facts.sort();
        facts.dedup();
        if let Some(&id) = self.index.get(&facts) {
            self.nodes[id].is_goal |= is_goal;
            return (id, false);
        }
        let id = self.nodes.len();
        self.index.insert(facts.clone(), id);
        self.nodes.push(LandmarkNode { id, facts, is_goal });
        (id, true)
    }

    pub fn node_of(&self, facts: &[Fact]) -> Option<usize> {
        let mut facts = facts.to_vec();
        facts.sort();
        self.index.get(&facts).copied()
    }

    /// Adds an ordering. A necessary ordering supersedes a reasonable one between the same nodes.
    pub fn add_ordering(&mut self, before: usize, after: usize, kind: OrderingKind) -> bool {
        if before == after {
            return false;
        }
        match self.orderings.iter_mut().find(|o| o.before == before && o.after == after) {
            Some(o) => {
                if o.kind == OrderingKind::Reasonable && kind == OrderingKind::Necessary {
                    o.kind = kind;
                }
                false
            }
            None => {
                self.orderings.push(LandmarkOrdering { before, after, kind });
                true
            }
        }
    }

    pub fn nodes(&self) -> &[LandmarkNode] {
        &self.nodes
    }

    pub fn node(&self, id: usize) -> &LandmarkNode {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn all_orderings(&self) -> &[LandmarkOrdering] {
        &self.orderings
    }

    /// Orderings of the given kind (any kind if `None`), restricted to those whose successor is a
    /// goal landmark if `goals_only` is set.
    pub fn orderings(&self, kind: Option<OrderingKind>, goals_only: bool) -> Vec<LandmarkOrdering> {
        self.orderings
            .iter()
            .filter(|o| kind.is_none_or(|k| o.kind == k))
            .filter(|o| !goals_only || self.nodes[o.after].is_goal)
            .copied()
            .collect()
    }

    fn successors(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.orderings.iter().filter(move |o| o.before == node).map(|o| o.after)
    }

    fn in_degrees(&self) -> Vec<usize> {
        let mut deg = vec![0; self.nodes.len()];
        for o in &self.orderings {
            deg[o.after] += 1;
        }
        deg
    }

    /// Removes the back edges found by a depth-first traversal started from the nodes of lowest
    /// in-degree. Returns the number of removed orderings.
    pub fn remove_cycles(&mut self) -> usize {
        let degrees = self.in_degrees();
        let roots = (0..self.nodes.len()).sorted_by_key(|&n| (degrees[n], n)).collect_vec();
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut back_edges = Vec::new();
        for root in roots {
            if marks[root] == Mark::Unvisited {
                self.visit(root, &mut marks, &mut back_edges);
            }
        }
        let removed = back_edges.len();
        if removed > 0 {
            let mut i = 0;
            self.orderings.retain(|_| {
                let keep = !back_edges.contains(&i);
                i += 1;
                keep
            });
            tracing::debug!("removed {removed} landmark orderings closing a cycle");
        }
        removed
    }

    fn visit(&self, node: usize, marks: &mut [Mark], back_edges: &mut Vec<usize>) {
        marks[node] = Mark::InProgress;
        for (i, o) in self.orderings.iter().enumerate() {
            if o.before != node || back_edges.contains(&i) {
                continue;
            }
            match marks[o.after] {
                Mark::InProgress => back_edges.push(i),
                Mark::Unvisited => self.visit(o.after, marks, back_edges),
                Mark::Done => {}
            }
        }
        marks[node] = Mark::Done;
    }

    /// True if `to` can be reached from `from` through a path of at least two orderings that does
    /// not use the ordering at index `skip`.
    fn has_longer_path(&self, from: usize, to: usize, skip: usize) -> bool {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack: Vec<usize> = self
            .orderings
            .iter()
            .enumerate()
            .filter(|&(i, o)| i != skip && o.before == from && o.after != to)
            .map(|(_, o)| o.after)
            .collect();
        while let Some(n) = stack.pop() {
            if n == to {
                return true;
            }
            if std::mem::replace(&mut visited[n], true) {
                continue;
            }
            stack.extend(self.successors(n));
        }
        false
    }

    /// Removes every ordering implied by a longer path, until no ordering is redundant.
    /// Returns the number of removed orderings.
    pub fn filter_transitive_orders(&mut self) -> usize {
        let mut removed = 0;
        'scan: loop {
            for i in 0..self.orderings.len() {
                let o = self.orderings[i];
                if self.has_longer_path(o.before, o.after, i) {
                    self.orderings.remove(i);
                    removed += 1;
                    continue 'scan;
                }
            }
            break;
        }
        if removed > 0 {
            tracing::debug!("removed {removed} transitive landmark orderings");
        }
        removed
    }

    pub fn is_acyclic(&self) -> bool {
        let mut degrees = self.in_degrees();
        let mut ready = (0..self.nodes.len()).filter(|&n| degrees[n] == 0).collect_vec();
        let mut seen = 0;
        while let Some(n) = ready.pop() {
            seen += 1;
            for s in self.successors(n).collect_vec() {
                degrees[s] -= 1;
                if degrees[s] == 0 {
                    ready.push(s);
                }
            }
        }
        seen == self.nodes.len()
    }

    pub fn node_label(&self, task: &GroundedTask, node: usize) -> String {
        let labels = self.nodes[node].facts.iter().map(|&f| task.fact_label(f));
        if self.nodes[node].is_disjunctive() {
            format!("(or {})", labels.format(" "))
        } else {
            labels.format(" ").to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ObjId, VarId};
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn graph(n: usize, edges: &[(usize, usize)]) -> LandmarkGraph {
        let mut g = LandmarkGraph::new();
        for i in 0..n {
            g.add_node(vec![Fact::new(VarId::from(i), ObjId::from(0usize))], i == n - 1);
        }
        for &(a, b) in edges {
            g.add_ordering(a, b, OrderingKind::Necessary);
        }
        g
    }

    #[test]
    fn cycles_are_broken() {
        let mut g = graph(4, &[(0, 1), (1, 2), (2, 1), (2, 3), (3, 0)]);
        assert!(!g.is_acyclic());
        assert!(g.remove_cycles() > 0);
        assert!(g.is_acyclic());
        assert_eq!(g.remove_cycles(), 0);
    }

    #[test]
    fn transitive_orders_are_filtered() {
        let mut g = graph(4, &[(0, 1), (1, 2), (0, 2), (2, 3), (0, 3)]);
        assert_eq!(g.filter_transitive_orders(), 2);
        let mut left = g.all_orderings().iter().map(|o| (o.before, o.after)).collect_vec();
        left.sort();
        assert_eq!(left, vec![(0, 1), (1, 2), (2, 3)]);
        assert_eq!(g.filter_transitive_orders(), 0);
    }

    #[test]
    fn ordering_queries() {
        let mut g = graph(3, &[(0, 2)]);
        g.add_ordering(0, 1, OrderingKind::Reasonable);
        g.add_ordering(1, 2, OrderingKind::Reasonable);
        assert_eq!(g.orderings(Some(OrderingKind::Reasonable), false).len(), 2);
        assert_eq!(g.orderings(None, true).len(), 2);
        assert_eq!(g.orderings(Some(OrderingKind::Necessary), true).len(), 1);
        // upgrade
        g.add_ordering(0, 1, OrderingKind::Necessary);
        assert_eq!(g.orderings(Some(OrderingKind::Reasonable), false).len(), 1);
    }

    #[test]
    fn random_graphs_postprocess_to_a_reduced_dag() {
        let mut rng = SmallRng::seed_from_u64(0xF3A9);
        for _ in 0..50 {
            let n = rng.random_range(2..12);
            let edges = (0..rng.random_range(0..3 * n))
                .map(|_| (rng.random_range(0..n), rng.random_range(0..n)))
                .collect_vec();
            let mut g = graph(n, &edges);
            g.remove_cycles();
            assert!(g.is_acyclic());
            g.filter_transitive_orders();
            assert!(g.is_acyclic());
            assert_eq!(g.filter_transitive_orders(), 0);
            assert_eq!(g.remove_cycles(), 0);
        }
    }
}
