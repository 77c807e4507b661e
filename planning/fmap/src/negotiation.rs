//! Joint search of several agents over a replicated tree of partial-order plans.
//!
//! Every agent keeps an identical copy of the search tree and of the open list, so that all of
//! them select the same plan at each iteration. An iteration goes as follows:
//!
//! 1. each agent refines the selected plan with its own actions, and sends each refinement to each
//!    peer, stripped of the facts it may not disclose to that peer;
//! 2. the refinements of all agents are inserted in the tree in a canonical order (agent index,
//!    then proposal index), so that plan identifiers agree across agents, and duplicates of
//!    already explored plans are dropped;
//! 3. each agent evaluates every new plan from its own point of view and broadcasts a verdict.
//!    The joint value of a plan is the sum of the values reported by all agents; a plan is a
//!    solution when every agent can support its goals in it, with compatible orderings.
//!
//! A plan in which an agent sees a threat that the owner of the new step could not see, because
//! the threatened link is private, is a dead end for that agent and hence for everyone.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use hashbrown::HashSet;
use itertools::Itertools;

use crate::comm::{AgentComm, Payload};
use crate::errors::{ProtocolError, Res};
use crate::grounding::{CondKind, Condition, GroundedTask, SymbolicFact};
use crate::heuristics::{DEAD_END, Evaluation, Heuristic};
use crate::ids::{PlanId, StepId};
use crate::params::PlannerConfig;
use crate::pop::plan::{CausalLink, PlanArena, PlanView, Refinement, Step};
use crate::pop::refine::{Refiner, applicable_actions, support_goals};
use crate::pop::{OrderingManager, Plan, SearchOutcome, SearchStats, SearchStep, in_parallel};

/// A condition in symbolic form.
pub type SymbolicCondition = (SymbolicFact, CondKind);

#[derive(Clone, Debug, PartialEq)]
pub struct ProposedStep {
    pub label: String,
    pub preconditions: Vec<SymbolicCondition>,
    pub effects: Vec<SymbolicFact>,
}

/// A refinement of the current plan, as disclosed to one peer.
#[derive(Clone, Debug, PartialEq)]
pub struct Proposal {
    pub parent: PlanId,
    pub step: ProposedStep,
    /// Links whose condition the receiver may see.
    pub links: Vec<(StepId, StepId, SymbolicCondition)>,
    /// All orderings of the refinement, including those implied by its links.
    pub orderings: Vec<(StepId, StepId)>,
    /// Digest of the supports of the step, identical for every receiver.
    pub support: u64,
}

/// Opinion of an agent on a new plan.
#[derive(Clone, Debug, PartialEq)]
pub struct Verdict {
    pub eval: Evaluation,
    /// Orderings needed to support the goals of the agent, if it can support them all.
    pub goal_orderings: Option<Vec<(StepId, StepId)>>,
}

fn symbolic_condition(task: &GroundedTask, c: &Condition) -> SymbolicCondition {
    (task.symbolic(c.fact), c.kind)
}

fn resolve_condition(task: &GroundedTask, (fact, kind): &SymbolicCondition) -> Option<Condition> {
    let fact = task.resolve(fact)?;
    Some(Condition { kind: *kind, fact })
}

/// Part of a local refinement that `dest` may see.
pub fn proposal_for(task: &GroundedTask, parent: PlanId, refinement: &Refinement, dest: &str) -> Option<Proposal> {
    let step = refinement.step.as_ref()?;
    let visible = |c: &Condition| task.can_share(c.fact, dest);
    let mut orderings = refinement.orderings.clone();
    orderings.extend(
        refinement
            .links
            .iter()
            .filter(|l| !l.producer.is_sentinel() && !l.consumer.is_sentinel())
            .map(|l| (l.producer, l.consumer)),
    );
    orderings.sort();
    orderings.dedup();
    Some(Proposal {
        parent,
        step: ProposedStep {
            label: step.label.to_string(),
            preconditions: step
                .preconditions
                .iter()
                .filter(|c| visible(c))
                .map(|c| symbolic_condition(task, c))
                .collect(),
            effects: step
                .effects
                .iter()
                .filter(|&&e| task.can_share(e, dest))
                .map(|&e| task.symbolic(e))
                .collect(),
        },
        links: refinement
            .links
            .iter()
            .filter(|l| visible(&l.cond))
            .map(|l| (l.producer, l.consumer, symbolic_condition(task, &l.cond)))
            .collect(),
        orderings,
        support: refinement.support,
    })
}

/// Local form of a peer's proposal. Facts unknown locally are dropped.
pub fn adopt(task: &GroundedTask, owner: usize, proposal: &Proposal) -> Refinement {
    let step = Step {
        owner,
        action: None,
        label: proposal.step.label.as_str().into(),
        preconditions: proposal
            .step
            .preconditions
            .iter()
            .filter_map(|c| resolve_condition(task, c))
            .collect(),
        effects: proposal.step.effects.iter().filter_map(|f| task.resolve(f)).collect(),
        denied: Vec::new(),
        numeric_preconditions: Vec::new(),
        numeric_effects: Vec::new(),
    };
    let links = proposal
        .links
        .iter()
        .filter_map(|(producer, consumer, cond)| {
            Some(CausalLink {
                producer: *producer,
                consumer: *consumer,
                cond: resolve_condition(task, cond)?,
            })
        })
        .collect();
    Refinement {
        step: Some(Arc::new(step)),
        links,
        orderings: proposal.orderings.clone(),
        support: proposal.support,
    }
}

/// Sum of the evaluations of all agents. A plan is a dead end if any agent considers it one.
pub fn joint_evaluation(verdicts: &[&Verdict]) -> Evaluation {
    if verdicts.iter().any(|v| v.eval.is_dead_end()) {
        return Evaluation::dead_end();
    }
    let primary = verdicts
        .iter()
        .fold(0u32, |acc, v| acc.saturating_add(v.eval.primary))
        .min(DEAD_END - 1);
    let secondary = verdicts.iter().fold(0u32, |acc, v| acc.saturating_add(v.eval.secondary));
    Evaluation::new(primary, secondary)
}

/// Union of the goal orderings of all agents, if they all support their goals and the orderings
/// are consistent with the plan.
pub fn joint_goal_orderings(plan: &PlanView, verdicts: &[&Verdict]) -> Option<Vec<(StepId, StepId)>> {
    let mut view = plan.clone();
    let mut all = Vec::new();
    for v in verdicts {
        for &(a, b) in v.goal_orderings.as_ref()? {
            if !view.add_ordering(a, b) {
                return None;
            }
            all.push((a, b));
        }
    }
    all.sort();
    all.dedup();
    Some(all)
}

type Queued = Reverse<(u64, u32, PlanId)>;

/// Search state of one agent taking part in a joint search.
pub struct Negotiation<'a> {
    task: &'a GroundedTask,
    heuristic: Box<dyn Heuristic + 'a>,
    refiner: Refiner<'a>,
    arena: PlanArena,
    om: OrderingManager,
    open: BinaryHeap<Queued>,
    memo: HashSet<String>,
    threads: usize,
    h_weight: u32,
    iteration: u32,
    pub stats: SearchStats,
}

impl<'a> Negotiation<'a> {
    pub fn new(task: &'a GroundedTask, heuristic: Box<dyn Heuristic + 'a>, config: &PlannerConfig) -> Self {
        Negotiation {
            task,
            heuristic,
            refiner: Refiner::new(task, config.limits),
            arena: PlanArena::new(task),
            om: OrderingManager::default(),
            open: BinaryHeap::new(),
            memo: HashSet::new(),
            threads: config.search_threads.max(1),
            h_weight: config.h_weight,
            iteration: 0,
            stats: SearchStats::default(),
        }
    }

    pub fn arena(&self) -> &PlanArena {
        &self.arena
    }

    fn enqueue(&mut self, id: PlanId) {
        let node = self.arena.node(id);
        let f = node.g() as u64 + self.h_weight as u64 * node.eval.primary as u64;
        self.open.push(Reverse((f, node.eval.secondary, id)));
    }

    /// Local verdict on a plan, with the goal links this agent would add to it.
    fn verdict(&self, view: &PlanView) -> (Verdict, Option<Refinement>) {
        if let Some((link, t)) = view.threats().first() {
            tracing::trace!(
                "plan {}: {} threatens {}",
                view.id,
                view.step(*t).label,
                self.task.condition_label(&link.cond)
            );
            let dead = Verdict {
                eval: Evaluation::dead_end(),
                goal_orderings: None,
            };
            return (dead, None);
        }
        match support_goals(self.task, view) {
            Some(support) => (
                Verdict {
                    eval: Evaluation::SOLUTION,
                    goal_orderings: Some(support.orderings.clone()),
                },
                Some(support),
            ),
            None => (
                Verdict {
                    eval: self.heuristic.evaluate(view),
                    goal_orderings: None,
                },
                None,
            ),
        }
    }

    /// Exchanges the verdicts on the new plans. Non-solution plans are queued with their joint
    /// value. Returns the first joint solution, if any.
    fn judge(&mut self, comm: &mut AgentComm, plans: &[(PlanId, PlanView)]) -> Res<Option<PlanId>> {
        let (mine, supports): (Vec<Verdict>, Vec<Option<Refinement>>) =
            plans.iter().map(|(_, view)| self.verdict(view)).unzip();
        comm.broadcast(Payload::Verdicts(mine.clone()))?;
        let mut all = vec![Vec::new(); comm.len()];
        for peer in comm.peers() {
            let verdicts = comm.expect(peer, "negotiation", "Verdicts", |p| match p {
                Payload::Verdicts(v) => Ok(v),
                p => Err(p),
            })?;
            if verdicts.len() != plans.len() {
                return Err(ProtocolError {
                    phase: "negotiation",
                    peer: comm.names()[peer].clone(),
                    expected: "one verdict per plan",
                    got: format!("{} verdicts for {} plans", verdicts.len(), plans.len()),
                }
                .into());
            }
            all[peer] = verdicts;
        }
        all[comm.me()] = mine;

        let mut solution = None;
        for (i, ((id, view), support)) in plans.iter().zip(supports).enumerate() {
            let verdicts = all.iter().map(|v| &v[i]).collect_vec();
            if solution.is_none() {
                if let (Some(orderings), Some(mut support)) = (joint_goal_orderings(view, &verdicts), support) {
                    support.orderings = orderings;
                    solution = Some(self.arena.push(*id, support, Evaluation::SOLUTION, true));
                    continue;
                }
            }
            let eval = joint_evaluation(&verdicts);
            self.arena.set_eval(*id, eval);
            if eval.is_dead_end() {
                self.stats.pruned += 1;
            } else {
                self.enqueue(*id);
            }
        }
        Ok(solution)
    }

    /// Proposals of every agent on `parent`, in canonical order, in local form.
    fn exchange(
        &mut self,
        comm: &mut AgentComm,
        parent: PlanId,
        local: Vec<Refinement>,
    ) -> Res<Vec<Vec<Refinement>>> {
        for peer in comm.peers() {
            let dest = &comm.names()[peer];
            let proposals = local
                .iter()
                .filter_map(|r| proposal_for(self.task, parent, r, dest))
                .collect();
            comm.send(peer, Payload::Proposals(proposals))?;
        }
        let mut all = vec![Vec::new(); comm.len()];
        for peer in comm.peers() {
            let proposals = comm.expect(peer, "negotiation", "Proposals", |p| match p {
                Payload::Proposals(p) => Ok(p),
                p => Err(p),
            })?;
            if let Some(p) = proposals.iter().find(|p| p.parent != parent) {
                return Err(ProtocolError {
                    phase: "negotiation",
                    peer: comm.names()[peer].clone(),
                    expected: "proposals on the selected plan",
                    got: format!("a proposal on plan {}", p.parent),
                }
                .into());
            }
            all[peer] = proposals.iter().map(|p| adopt(self.task, peer, p)).collect();
        }
        all[comm.me()] = local;
        Ok(all)
    }

    /// Runs one iteration. All agents must call it the same number of times.
    fn iterate(&mut self, comm: &mut AgentComm) -> Res<SearchStep> {
        let Some(Reverse((_, _, parent))) = self.open.pop() else {
            return Ok(SearchStep::Exhausted);
        };
        self.iteration += 1;
        let view = self.arena.view(parent, &mut self.om);
        let actions = applicable_actions(self.task, &view);
        let refiner = &self.refiner;
        let local: Vec<Refinement> = in_parallel(&actions, self.threads, |chunk| {
            refiner.refine(&view, chunk).into_iter().map(|c| c.refinement).collect()
        });
        self.stats.expanded += 1;
        tracing::trace!("iteration {}: plan {parent}, {} local proposals", self.iteration, local.len());

        let proposals = self.exchange(comm, parent, local)?;
        let mut fresh = Vec::new();
        for refinement in proposals.into_iter().flatten() {
            self.stats.generated += 1;
            let Some(child) = view.extend(&refinement) else {
                self.stats.pruned += 1;
                continue;
            };
            if !self.memo.insert(child.signature()) {
                self.stats.pruned += 1;
                continue;
            }
            let id = self.arena.push(parent, refinement, Evaluation::default(), false);
            fresh.push((id, child));
        }
        let solution = self.judge(comm, &fresh)?;
        comm.barrier(self.iteration)?;
        Ok(solution.map_or(SearchStep::Continue, SearchStep::Solution))
    }

    /// Joint search, until a solution is found, the replicated search space is exhausted or `stop`
    /// returns true. The stop predicate must give the same answer on every agent.
    pub fn run_with(&mut self, comm: &mut AgentComm, mut stop: impl FnMut(&SearchStats) -> bool) -> Res<SearchOutcome> {
        let _span = tracing::span!(tracing::Level::DEBUG, "NEGOTIATION").entered();
        let root = self.arena.view(PlanArena::ROOT, &mut self.om);
        self.memo.insert(root.signature());
        if let Some(id) = self.judge(comm, &[(PlanArena::ROOT, root)])? {
            return Ok(SearchOutcome::Solution(self.plan(id)));
        }
        loop {
            if stop(&self.stats) {
                tracing::debug!("negotiation stopped ({})", self.stats);
                return Ok(SearchOutcome::Stopped);
            }
            match self.iterate(comm)? {
                SearchStep::Continue => {}
                SearchStep::Solution(id) => {
                    tracing::debug!("joint solution after {} iterations ({})", self.iteration, self.stats);
                    return Ok(SearchOutcome::Solution(self.plan(id)));
                }
                SearchStep::Exhausted => {
                    // open lists are replicated, so every agent gets here in the same iteration
                    if comm.round_barrier(self.iteration + 1, self.refiner.truncated())? {
                        tracing::warn!("no joint plan within the refinement limits ({})", self.stats);
                        return Ok(SearchOutcome::Incomplete);
                    }
                    tracing::debug!("joint search space exhausted ({})", self.stats);
                    return Ok(SearchOutcome::Exhausted);
                }
            }
        }
    }

    pub fn plan(&mut self, id: PlanId) -> Plan {
        let view = self.arena.view(id, &mut self.om);
        Plan::from_view(self.task, &view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grounding::ground_task;
    use crate::heuristics::{HeuristicKind, heuristic};
    use crate::task::Task;

    /// Agent `b` passes `door1`, which it knows to be open and which it could jam itself.
    fn door_task() -> GroundedTask {
        let task: Task = serde_json::from_value(serde_json::json!({
            "domain": "doors",
            "problem": "b",
            "types": [{"name": "door"}, {"name": "robot", "parents": ["agent"]}],
            "objects": [{"name": "door1", "types": ["door"]}, {"name": "b", "types": ["robot"]}],
            "functions": [
                {"name": "open", "params": [{"name": "?d", "types": ["door"]}]},
                {"name": "passed", "params": [{"name": "?r", "types": ["robot"]}]}
            ],
            "operators": [
                {
                    "name": "pass",
                    "params": [{"name": "?r", "types": ["robot"]}, {"name": "?d", "types": ["door"]}],
                    "preconditions": [{"function": "open", "params": ["?d"]}],
                    "effects": [{"function": "passed", "params": ["?r"]}]
                },
                {
                    "name": "jam",
                    "params": [{"name": "?d", "types": ["door"]}],
                    "preconditions": [{"function": "open", "params": ["?d"]}],
                    "effects": [{"function": "open", "params": ["?d"], "negated": true}]
                }
            ],
            "init": [{"function": "open", "params": ["door1"]}],
            "goals": [{"function": "passed", "params": ["b"]}],
            "shared_data": [{"function": "open", "params": ["door"], "agents": ["a", "b"]}]
        }))
        .unwrap();
        ground_task(&task, "b", &PlannerConfig::default()).unwrap()
    }

    fn peer_step(label: &str, effects: Vec<SymbolicFact>) -> Proposal {
        Proposal {
            parent: PlanArena::ROOT,
            step: ProposedStep {
                label: label.to_string(),
                preconditions: Vec::new(),
                effects,
            },
            links: Vec::new(),
            orderings: Vec::new(),
            support: 0,
        }
    }

    #[test]
    fn adopted_step_threatening_a_local_link_is_a_dead_end() {
        let task = door_task();
        let config = PlannerConfig::default().with_threads(1);
        let mut negotiation = Negotiation::new(&task, heuristic(HeuristicKind::Ff, &task, None), &config);
        let root = negotiation.arena.view(PlanArena::ROOT, &mut negotiation.om);
        let pass = task.action(task.action_by_key("pass b door1").unwrap());
        let passing = negotiation.refiner.insert_step(&root, pass).remove(0).view;

        let close = SymbolicFact {
            function: "open".to_string(),
            params: vec!["door1".to_string()],
            value: crate::task::FALSE.to_string(),
        };
        let closing = passing.extend(&adopt(&task, 0, &peer_step("(close door1)", vec![close]))).unwrap();
        let (verdict, support) = negotiation.verdict(&closing);
        assert!(verdict.eval.is_dead_end());
        assert_eq!(verdict.goal_orderings, None);
        assert!(support.is_none());

        // a harmless peer step leaves the plan a solution
        let waving = passing.extend(&adopt(&task, 0, &peer_step("(wave a)", Vec::new()))).unwrap();
        let (verdict, support) = negotiation.verdict(&waving);
        assert_eq!(verdict.eval, Evaluation::SOLUTION);
        assert!(verdict.goal_orderings.is_some() && support.is_some());
    }

    #[test]
    fn proposals_carry_the_support_digest() {
        let task = door_task();
        let arena = PlanArena::new(&task);
        let root = arena.view(PlanArena::ROOT, &mut OrderingManager::default());
        let pass = task.action(task.action_by_key("pass b door1").unwrap());
        let refinement = Refiner::new(&task, PlannerConfig::default().limits)
            .insert_step(&root, pass)
            .remove(0)
            .refinement;
        assert_ne!(refinement.support, 0);
        let proposal = proposal_for(&task, PlanArena::ROOT, &refinement, "a").unwrap();
        assert_eq!(proposal.support, refinement.support);
        assert_eq!(adopt(&task, 1, &proposal).support, refinement.support);
        assert_eq!(proposal.links.len(), 1);
    }
}
