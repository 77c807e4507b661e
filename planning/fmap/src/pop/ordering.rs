//! Precedence queries between the steps of a partial-order plan.
//!
//! The manager keeps the explicit orderings of the plan currently loaded as an adjacency list,
//! and caches the answers of reachability queries in a dense matrix. A cell only holds an answer
//! if it equals one of the two live sentinels (`index_t` for "ordered", `index_f` for "not
//! ordered"): replacing the sentinels by fresh values invalidates the whole cache at once,
//! without touching the matrix.

use std::collections::VecDeque;

use crate::ids::{PlanId, StepId};

use super::plan::PlanArena;

const INITIAL_CAPACITY: usize = 16;

pub struct OrderingManager {
    capacity: usize,
    matrix: Vec<u32>,
    index_t: u32,
    index_f: u32,
    /// Successors of each step through explicit orderings.
    successors: Vec<Vec<StepId>>,
    num_steps: usize,
    /// Plan whose orderings are currently loaded.
    loaded: Option<PlanId>,
}

impl Default for OrderingManager {
    fn default() -> Self {
        Self::new(INITIAL_CAPACITY)
    }
}

impl OrderingManager {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        OrderingManager {
            capacity,
            matrix: vec![0; capacity * capacity],
            index_t: 1,
            index_f: 2,
            successors: vec![Vec::new(); 2],
            num_steps: 2,
            loaded: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    /// Replaces both sentinels, invalidating every cached answer.
    fn invalidate(&mut self) {
        if self.index_f >= u32::MAX - 2 {
            self.matrix.iter_mut().for_each(|c| *c = 0);
            self.index_t = 1;
            self.index_f = 2;
        } else {
            self.index_t = self.index_f + 1;
            self.index_f = self.index_f + 2;
        }
    }

    /// Replaces the "not ordered" sentinel only: a new ordering can turn negative answers into
    /// positive ones but never the opposite.
    fn invalidate_negatives(&mut self) {
        if self.index_f >= u32::MAX - 2 {
            self.invalidate();
        } else {
            self.index_f = self.index_f.max(self.index_t) + 1;
        }
    }

    /// Grows the matrix by 50% until it can hold `steps` steps, preserving cached entries.
    pub fn resize(&mut self, steps: usize) {
        if steps <= self.capacity {
            return;
        }
        let mut capacity = self.capacity;
        while capacity < steps {
            capacity += capacity.div_ceil(2);
        }
        let mut matrix = vec![0; capacity * capacity];
        for row in 0..self.capacity {
            let old = &self.matrix[row * self.capacity..(row + 1) * self.capacity];
            matrix[row * capacity..row * capacity + self.capacity].copy_from_slice(old);
        }
        tracing::trace!("ordering matrix resized from {} to {capacity}", self.capacity);
        self.matrix = matrix;
        self.capacity = capacity;
    }

    fn ensure_step(&mut self, step: StepId) {
        let n = usize::from(step) + 1;
        if n > self.num_steps {
            self.resize(n);
            self.successors.resize(n, Vec::new());
            self.num_steps = n;
        }
    }

    fn cell(&self, a: StepId, b: StepId) -> usize {
        usize::from(a) * self.capacity + usize::from(b)
    }

    /// Declares `a` before `b`.
    pub fn add_ordering(&mut self, a: StepId, b: StepId) {
        self.ensure_step(a);
        self.ensure_step(b);
        if self.successors[usize::from(a)].contains(&b) {
            return;
        }
        self.successors[usize::from(a)].push(b);
        self.invalidate_negatives();
        let c = self.cell(a, b);
        self.matrix[c] = self.index_t;
    }

    /// Withdraws an explicit ordering. Every cached answer may be wrong afterwards.
    pub fn remove_ordering(&mut self, a: StepId, b: StepId) {
        if usize::from(a) >= self.num_steps {
            return;
        }
        let succ = &mut self.successors[usize::from(a)];
        let len = succ.len();
        succ.retain(|&s| s != b);
        if succ.len() != len {
            self.invalidate();
        }
    }

    /// True if `a` precedes `b`, directly or transitively.
    pub fn check_ordering(&mut self, a: StepId, b: StepId) -> bool {
        if a == b {
            return false;
        }
        if a == StepId::INIT || b == StepId::GOAL {
            return true;
        }
        if a == StepId::GOAL || b == StepId::INIT {
            return false;
        }
        if usize::from(a) >= self.num_steps || usize::from(b) >= self.num_steps {
            return false;
        }
        let c = self.cell(a, b);
        if self.matrix[c] == self.index_t {
            return true;
        }
        if self.matrix[c] == self.index_f {
            return false;
        }
        // every step reached from `a` is after `a`
        let mut visited = vec![false; self.num_steps];
        let mut queue: VecDeque<StepId> = self.successors[usize::from(a)].iter().copied().collect();
        let mut found = false;
        while let Some(s) = queue.pop_front() {
            if std::mem::replace(&mut visited[usize::from(s)], true) {
                continue;
            }
            let cs = self.cell(a, s);
            self.matrix[cs] = self.index_t;
            if s == b {
                found = true;
                break;
            }
            queue.extend(self.successors[usize::from(s)].iter().copied());
        }
        if !found {
            self.matrix[c] = self.index_f;
        }
        found
    }

    fn clear(&mut self) {
        self.successors.iter_mut().for_each(Vec::clear);
        self.num_steps = 2;
        self.successors.truncate(2);
        self.invalidate();
        self.loaded = None;
    }

    /// Loads the orderings of a plan from scratch.
    pub fn rebuild(&mut self, arena: &PlanArena, plan: PlanId) {
        self.clear();
        for id in arena.chain(plan) {
            self.fold(arena, id);
        }
        self.loaded = Some(plan);
    }

    /// Loads the orderings of a plan, only folding in the refinements between the currently
    /// loaded plan and `plan` when the former is an ancestor of the latter.
    pub fn update(&mut self, arena: &PlanArena, plan: PlanId) {
        let Some(loaded) = self.loaded else {
            return self.rebuild(arena, plan);
        };
        let chain = arena.chain(plan);
        match chain.iter().position(|&id| id == loaded) {
            Some(i) => {
                for &id in &chain[i + 1..] {
                    self.fold(arena, id);
                }
                self.loaded = Some(plan);
            }
            None => self.rebuild(arena, plan),
        }
    }

    /// Adds the step and the orderings introduced by a single plan node.
    fn fold(&mut self, arena: &PlanArena, id: PlanId) {
        let node = arena.node(id);
        if node.step.is_some() {
            self.ensure_step(StepId::from(node.num_steps - 1));
        }
        for &(a, b) in node.all_orderings() {
            if !a.is_sentinel() && !b.is_sentinel() {
                self.add_ordering(a, b);
            }
        }
    }

    pub fn loaded(&self) -> Option<PlanId> {
        self.loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn s(i: usize) -> StepId {
        StepId::from(i)
    }

    #[test]
    fn sentinels_bound_every_step() {
        let mut om = OrderingManager::new(4);
        om.add_ordering(s(2), s(3));
        assert!(om.check_ordering(StepId::INIT, s(3)));
        assert!(om.check_ordering(s(3), StepId::GOAL));
        assert!(!om.check_ordering(StepId::GOAL, s(2)));
        assert!(om.check_ordering(s(2), s(3)));
        assert!(!om.check_ordering(s(3), s(2)));
    }

    #[test]
    fn cache_survives_resize_and_is_invalidated_by_removal() {
        let mut om = OrderingManager::new(4);
        om.add_ordering(s(2), s(3));
        om.add_ordering(s(3), s(4));
        assert!(om.check_ordering(s(2), s(4)));
        om.add_ordering(s(4), s(20));
        assert!(om.capacity() >= 21);
        assert!(om.check_ordering(s(2), s(20)));
        om.remove_ordering(s(3), s(4));
        assert!(!om.check_ordering(s(2), s(4)));
        assert!(!om.check_ordering(s(2), s(20)));
        assert!(om.check_ordering(s(4), s(20)));
    }

    #[test]
    fn new_orderings_override_negative_answers() {
        let mut om = OrderingManager::new(8);
        om.add_ordering(s(2), s(3));
        assert!(!om.check_ordering(s(2), s(5)));
        om.add_ordering(s(3), s(5));
        assert!(om.check_ordering(s(2), s(5)));
    }

    #[test]
    fn random_operations_keep_transitivity() {
        let mut rng = SmallRng::seed_from_u64(42);
        for _ in 0..20 {
            let mut om = OrderingManager::new(4);
            let mut edges: Vec<(usize, usize)> = Vec::new();
            for _ in 0..40 {
                match rng.random_range(0..10) {
                    0..=5 => {
                        // forward edges only: the plan stays acyclic
                        let a = rng.random_range(2..10);
                        let b = rng.random_range(2..12);
                        if a < b {
                            om.add_ordering(s(a), s(b));
                            edges.push((a, b));
                        }
                    }
                    6 | 7 if !edges.is_empty() => {
                        let (a, b) = edges.swap_remove(rng.random_range(0..edges.len()));
                        om.remove_ordering(s(a), s(b));
                        edges.retain(|&e| e != (a, b));
                    }
                    _ => om.resize(om.capacity() + 1),
                }
                let n = om.num_steps();
                for a in 0..n {
                    for b in 0..n {
                        for c in 0..n {
                            if om.check_ordering(s(a), s(b)) && om.check_ordering(s(b), s(c)) {
                                assert!(om.check_ordering(s(a), s(c)), "{a} < {b} < {c}");
                            }
                        }
                    }
                }
            }
        }
    }
}
