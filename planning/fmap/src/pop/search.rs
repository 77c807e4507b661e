use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt::{Display, Formatter};

use hashbrown::HashSet;

use crate::grounding::GroundedTask;
use crate::heuristics::{Evaluation, Heuristic};
use crate::ids::{ActionId, PlanId};
use crate::params::PlannerConfig;

use super::ordering::OrderingManager;
use super::output::Plan;
use super::plan::{PlanArena, PlanView, Refinement};
use super::refine::{Candidate, Refiner, applicable_actions, support_goals};

/// A child plan with its evaluation. `goal_support` is set when the plan can be completed into a
/// solution by linking the goals.
pub struct Evaluated {
    pub candidate: Candidate,
    pub eval: Evaluation,
    pub goal_support: Option<Refinement>,
}

/// Scores a candidate. Plans whose goals can all be supported are solutions and are not evaluated.
pub fn evaluate(task: &GroundedTask, heuristic: &dyn Heuristic, candidate: Candidate) -> Evaluated {
    match support_goals(task, &candidate.view) {
        Some(support) => Evaluated {
            candidate,
            eval: Evaluation::SOLUTION,
            goal_support: Some(support),
        },
        None => {
            let eval = heuristic.evaluate(&candidate.view);
            Evaluated {
                candidate,
                eval,
                goal_support: None,
            }
        }
    }
}

/// Runs `work` on `threads` workers. The actions are split in contiguous chunks of equal size, the
/// last worker taking the remainder. Results are returned in worker order. The output of a
/// panicking worker is lost.
pub fn in_parallel<T: Send>(
    actions: &[ActionId],
    threads: usize,
    work: impl Fn(&[ActionId]) -> Vec<T> + Sync,
) -> Vec<T> {
    let threads = threads.max(1);
    let chunk = actions.len() / threads;
    if threads == 1 || chunk == 0 {
        return work(actions);
    }
    std::thread::scope(|scope| {
        let work = &work;
        let handles: Vec<_> = (0..threads)
            .map(|i| {
                let end = if i + 1 == threads { actions.len() } else { (i + 1) * chunk };
                let part = &actions[i * chunk..end];
                scope.spawn(move || work(part))
            })
            .collect();
        let mut out = Vec::new();
        for (i, h) in handles.into_iter().enumerate() {
            match h.join() {
                Ok(results) => out.extend(results),
                Err(_) => tracing::error!("refinement worker {i} panicked, its plans are dropped"),
            }
        }
        out
    })
}

/// Refines and evaluates the frozen `plan` with the given actions on `threads` workers.
pub fn expand(
    refiner: &Refiner,
    heuristic: &dyn Heuristic,
    plan: &PlanView,
    actions: &[ActionId],
    threads: usize,
) -> Vec<Evaluated> {
    in_parallel(actions, threads, |chunk| {
        refiner
            .refine(plan, chunk)
            .into_iter()
            .map(|c| evaluate(refiner.task(), heuristic, c))
            .collect()
    })
}

/// Result of one expansion.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Step {
    Continue,
    Solution(PlanId),
    Exhausted,
}

pub enum SearchOutcome {
    Solution(Plan),
    /// No plan exists.
    Exhausted,
    /// No plan was found, but the refinement limits pruned part of the search space.
    Incomplete,
    /// Interrupted by the host.
    Stopped,
}

#[derive(Clone, Debug, Default)]
pub struct SearchStats {
    pub expanded: usize,
    pub generated: usize,
    /// Plans discarded as duplicates or dead ends.
    pub pruned: usize,
}

impl Display for SearchStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "expanded: {}, generated: {}, pruned: {}",
            self.expanded, self.generated, self.pruned
        )
    }
}

/// Entry of the open list: `(f, secondary, id)`, smallest first.
type Queued = Reverse<(u64, u32, PlanId)>;

/// Single-agent best-first search over partial-order plans, on `f = g + w * h`.
pub struct Search<'a> {
    task: &'a GroundedTask,
    heuristic: Box<dyn Heuristic + 'a>,
    refiner: Refiner<'a>,
    arena: PlanArena,
    om: OrderingManager,
    open: BinaryHeap<Queued>,
    memo: HashSet<String>,
    threads: usize,
    h_weight: u32,
    solution: Option<PlanId>,
    pub stats: SearchStats,
}

impl<'a> Search<'a> {
    pub fn new(task: &'a GroundedTask, heuristic: Box<dyn Heuristic + 'a>, config: &PlannerConfig) -> Self {
        let mut search = Search {
            task,
            heuristic,
            refiner: Refiner::new(task, config.limits),
            arena: PlanArena::new(task),
            om: OrderingManager::default(),
            open: BinaryHeap::new(),
            memo: HashSet::new(),
            threads: config.search_threads.max(1),
            h_weight: config.h_weight,
            solution: None,
            stats: SearchStats::default(),
        };
        let root = search.arena.view(PlanArena::ROOT, &mut search.om);
        match support_goals(task, &root) {
            Some(support) => {
                let id = search.arena.push(PlanArena::ROOT, support, Evaluation::SOLUTION, true);
                search.solution = Some(id);
            }
            None => {
                let eval = search.heuristic.evaluate(&root);
                search.arena.set_eval(PlanArena::ROOT, eval);
                search.memo.insert(root.signature());
                if !eval.is_dead_end() {
                    search.enqueue(PlanArena::ROOT);
                }
            }
        }
        search
    }

    fn enqueue(&mut self, id: PlanId) {
        let node = self.arena.node(id);
        let f = node.g() as u64 + self.h_weight as u64 * node.eval.primary as u64;
        self.open.push(Reverse((f, node.eval.secondary, id)));
    }

    pub fn arena(&self) -> &PlanArena {
        &self.arena
    }

    pub fn solution(&self) -> Option<PlanId> {
        self.solution
    }

    /// True if the refinement limits have pruned some plans.
    pub fn truncated(&self) -> bool {
        self.refiner.truncated()
    }

    /// Full view of a plan of the search tree.
    pub fn view(&mut self, id: PlanId) -> PlanView {
        self.arena.view(id, &mut self.om)
    }

    pub fn plan(&mut self, id: PlanId) -> Plan {
        let view = self.view(id);
        Plan::from_view(self.task, &view)
    }

    /// Expands the most promising plan.
    pub fn step(&mut self) -> Step {
        if let Some(id) = self.solution {
            return Step::Solution(id);
        }
        let Some(Reverse((_, _, parent))) = self.open.pop() else {
            return Step::Exhausted;
        };
        let _span = tracing::span!(tracing::Level::TRACE, "expand", plan = %parent).entered();
        let view = self.arena.view(parent, &mut self.om);
        let actions = applicable_actions(self.task, &view);
        let children = expand(&self.refiner, &*self.heuristic, &view, &actions, self.threads);
        self.stats.expanded += 1;
        tracing::trace!("{} applicable actions, {} children", actions.len(), children.len());

        for child in children {
            self.stats.generated += 1;
            if child.eval.is_dead_end() || !self.memo.insert(child.candidate.view.signature()) {
                self.stats.pruned += 1;
                continue;
            }
            let id = self.arena.push(parent, child.candidate.refinement, child.eval, false);
            if let Some(support) = child.goal_support {
                let id = self.arena.push(id, support, Evaluation::SOLUTION, true);
                self.solution = Some(id);
                tracing::debug!("solution found after {} expansions", self.stats.expanded);
                return Step::Solution(id);
            }
            self.enqueue(id);
        }
        Step::Continue
    }

    /// Searches until a solution is found, the search space is exhausted or `stop` returns true.
    pub fn run_with(&mut self, mut stop: impl FnMut(&SearchStats) -> bool) -> SearchOutcome {
        let _span = tracing::span!(tracing::Level::DEBUG, "SEARCH").entered();
        loop {
            if stop(&self.stats) {
                tracing::debug!("search stopped ({})", self.stats);
                return SearchOutcome::Stopped;
            }
            match self.step() {
                Step::Continue => {}
                Step::Solution(id) => {
                    tracing::debug!("{}", self.stats);
                    return SearchOutcome::Solution(self.plan(id));
                }
                Step::Exhausted if self.truncated() => {
                    tracing::warn!("no plan within the refinement limits ({})", self.stats);
                    return SearchOutcome::Incomplete;
                }
                Step::Exhausted => {
                    tracing::debug!("search space exhausted ({})", self.stats);
                    return SearchOutcome::Exhausted;
                }
            }
        }
    }

    pub fn run(&mut self) -> SearchOutcome {
        self.run_with(|_| false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actions(n: usize) -> Vec<ActionId> {
        (0..n).map(ActionId::from).collect()
    }

    #[test]
    fn last_worker_takes_the_remainder() {
        let chunks = in_parallel(&actions(10), 3, |chunk| vec![chunk.to_vec()]);
        assert_eq!(chunks.iter().map(|c| c.len()).collect::<Vec<_>>(), vec![3, 3, 4]);
        assert_eq!(chunks.concat(), actions(10));
    }

    #[test]
    fn fewer_actions_than_workers_runs_inline() {
        let chunks = in_parallel(&actions(2), 4, |chunk| vec![chunk.len()]);
        assert_eq!(chunks, vec![2]);
    }

    #[test]
    fn panicking_worker_loses_its_output() {
        let four = ActionId::from(4usize);
        let out = in_parallel(&actions(10), 3, |chunk| {
            assert!(!chunk.contains(&four), "worker failure");
            chunk.to_vec()
        });
        let expected: Vec<ActionId> = (0..3).chain(6..10).map(ActionId::from).collect();
        assert_eq!(out, expected);
    }
}
