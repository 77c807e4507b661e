//! Generation of the refinements of a plan.
//!
//! A refinement inserts one new step, supported by causal links from existing steps. Threats
//! introduced by the new step or against its links are then resolved by promotion or demotion,
//! each consistent resolution giving a distinct child plan.
//!
//! The number of support combinations and threat resolutions explored per step can be bounded
//! with [`RefineLimits`]. A bounded search is no longer complete: the [`Refiner`] records whether a
//! limit ever cut refinements so that an empty open list is not mistaken for a proof that no plan
//! exists.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use itertools::Itertools;

use crate::grounding::{Condition, GroundAction, GroundedTask};
use crate::ids::{ActionId, StepId, VarId};

use super::plan::{CausalLink, PlanView, Refinement, Step};

/// Bounds on the refinements generated for a single action. `None` is unbounded.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RefineLimits {
    /// Support combinations tried for the preconditions of a new step.
    pub support_combinations: Option<usize>,
    /// Threat resolutions kept per support combination.
    pub threat_resolutions: Option<usize>,
}

impl RefineLimits {
    pub const UNBOUNDED: RefineLimits = RefineLimits {
        support_combinations: None,
        threat_resolutions: None,
    };

    pub fn is_bounded(&self) -> bool {
        self.support_combinations.is_some() || self.threat_resolutions.is_some()
    }
}

/// A child plan, with the increment producing it from its parent.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub refinement: Refinement,
    pub view: PlanView,
}

/// True if every precondition of the action has a potential supporter in the plan and its numeric
/// preconditions hold at the end of the plan.
pub fn is_applicable(plan: &PlanView, numbers: &[Option<f64>], action: &GroundAction) -> bool {
    let value_of = |v: VarId| numbers.get(usize::from(v)).copied().flatten();
    action.numeric_preconditions.iter().all(|c| c.holds(&value_of))
        && action
            .preconditions
            .iter()
            .all(|c| plan.step_ids().any(|s| s != StepId::GOAL && plan.step(s).supports(c)))
        && (!action.effects.is_empty() || !action.numeric_effects.is_empty())
}

/// Local actions that can be inserted in the plan.
pub fn applicable_actions(task: &GroundedTask, plan: &PlanView) -> Vec<ActionId> {
    let numbers = plan.numeric_state(task);
    task.actions()
        .iter()
        .filter(|a| is_applicable(plan, &numbers, a))
        .map(|a| a.id)
        .collect()
}

/// Orderings placing the new step after every step it conflicts with on a numeric variable:
/// writers of the variables it reads or writes, and readers of the variables it writes.
fn numeric_orderings(plan: &PlanView, new: StepId, step: &Step) -> Vec<(StepId, StepId)> {
    if !step.is_numeric() {
        return Vec::new();
    }
    let reads = step.numeric_reads();
    let writes: Vec<VarId> = step.numeric_writes().collect();
    plan.inner_steps()
        .filter(|&t| t != new)
        .filter(|&t| {
            let other = plan.step(t);
            let other_writes: Vec<VarId> = other.numeric_writes().collect();
            other_writes.iter().any(|v| reads.contains(v) || writes.contains(v))
                || other.numeric_reads().iter().any(|v| writes.contains(v))
        })
        .map(|t| (t, new))
        .collect()
}

/// Supporters of each precondition, most recent step first.
fn supports(plan: &PlanView, step: &Step) -> Vec<Vec<StepId>> {
    step.preconditions
        .iter()
        .map(|c| {
            let mut s = plan.supporters(c);
            s.sort_by(|a, b| b.cmp(a));
            s
        })
        .collect()
}

/// Resolves the threats of `view` by adding orderings, exploring both promotion and demotion.
/// Every consistent, threat-free completion is pushed to `out` with the orderings it required,
/// up to `limit` of them. `cut` is set when a completion is dropped because of the limit.
fn resolve_threats(
    view: PlanView,
    added: Vec<(StepId, StepId)>,
    limit: usize,
    out: &mut Vec<(PlanView, Vec<(StepId, StepId)>)>,
    cut: &mut bool,
) {
    if *cut {
        return;
    }
    let Some((link, t)) = view.threats().into_iter().next() else {
        if out.len() < limit {
            out.push((view, added));
        } else {
            *cut = true;
        }
        return;
    };
    // demotion: the threat before the producer
    let demotion = (link.producer != StepId::INIT).then_some((t, link.producer));
    // promotion: the threat after the consumer
    let promotion = (link.consumer != StepId::GOAL).then_some((link.consumer, t));
    for (a, b) in demotion.into_iter().chain(promotion) {
        let mut child = view.clone();
        if child.add_ordering(a, b) {
            let mut added = added.clone();
            added.push((a, b));
            resolve_threats(child, added, limit, out, cut);
        }
    }
}

/// Generates the refinements of plans, within the configured limits.
pub struct Refiner<'a> {
    task: &'a GroundedTask,
    limits: RefineLimits,
    truncated: AtomicBool,
}

impl<'a> Refiner<'a> {
    pub fn new(task: &'a GroundedTask, limits: RefineLimits) -> Self {
        Refiner {
            task,
            limits,
            truncated: AtomicBool::new(false),
        }
    }

    pub fn task(&self) -> &'a GroundedTask {
        self.task
    }

    /// True if a limit has dropped at least one refinement since the creation of the refiner.
    pub fn truncated(&self) -> bool {
        self.truncated.load(Ordering::Relaxed)
    }

    fn mark_truncated(&self) {
        if !self.truncated.swap(true, Ordering::Relaxed) {
            tracing::warn!("refinement limits reached ({:?}), the search is no longer complete", self.limits);
        }
    }

    /// Child plans obtained by inserting a step for `action` in `plan`.
    pub fn insert_step(&self, plan: &PlanView, action: &GroundAction) -> Vec<Candidate> {
        let step = Arc::new(Step::from_action(self.task.me, action));
        let new = StepId::from(plan.num_steps());
        let supports = supports(plan, &step);
        let choices: Vec<Vec<StepId>> = if supports.is_empty() {
            vec![Vec::new()]
        } else {
            let max = self.limits.support_combinations.unwrap_or(usize::MAX);
            let mut choices: Vec<Vec<StepId>> = supports
                .iter()
                .multi_cartesian_product()
                .take(max.saturating_add(1))
                .map(|c| c.into_iter().copied().collect())
                .collect();
            if choices.len() > max {
                choices.truncate(max);
                self.mark_truncated();
            }
            choices
        };

        let mut candidates = Vec::new();
        for choice in choices {
            let links = choice
                .iter()
                .zip(&step.preconditions)
                .map(|(&producer, &cond)| CausalLink {
                    producer,
                    consumer: new,
                    cond,
                })
                .collect_vec();
            let mut base = Refinement {
                step: Some(step.clone()),
                support: plan.support_digest(&links),
                links,
                orderings: Vec::new(),
            };
            let Some(mut view) = plan.extend(&base) else {
                continue;
            };
            let numeric = numeric_orderings(&view, new, &step);
            if !numeric.iter().all(|&(a, b)| view.add_ordering(a, b)) {
                continue;
            }
            base.orderings = numeric;

            let mut resolutions = Vec::new();
            let mut cut = false;
            let limit = self.limits.threat_resolutions.unwrap_or(usize::MAX);
            resolve_threats(view, Vec::new(), limit, &mut resolutions, &mut cut);
            if cut {
                self.mark_truncated();
            }
            for (view, added) in resolutions {
                let mut refinement = base.clone();
                refinement.orderings.extend(added);
                candidates.push(Candidate { refinement, view });
            }
        }
        candidates
    }

    /// Refinements of `plan` for a subset of the applicable actions.
    pub fn refine(&self, plan: &PlanView, actions: &[ActionId]) -> Vec<Candidate> {
        actions
            .iter()
            .flat_map(|&a| self.insert_step(plan, self.task.action(a)))
            .collect()
    }
}

/// Links every goal to the final step, with the orderings protecting them. Returns `None` if a
/// goal has no producer that all the conflicting steps can precede, or a numeric goal fails.
pub fn support_goals(task: &GroundedTask, plan: &PlanView) -> Option<Refinement> {
    support_conditions(plan, &plan.open_goals()).filter(|_| plan.numeric_goals_hold(task))
}

/// Same as [`support_goals`] for an explicit set of goals.
pub fn support_conditions(plan: &PlanView, goals: &[Condition]) -> Option<Refinement> {
    let mut view = plan.clone();
    let mut refinement = Refinement::default();
    for &goal in goals {
        let mut producers = view.supporters(&goal);
        producers.sort_by(|a, b| b.cmp(a));
        let mut supported = false;
        for p in producers {
            let threats = view
                .inner_steps()
                .filter(|&t| t != p && view.step(t).threatens(&goal))
                .collect_vec();
            let mut attempt = view.clone();
            if threats.iter().all(|&t| attempt.add_ordering(t, p)) {
                let link = CausalLink {
                    producer: p,
                    consumer: StepId::GOAL,
                    cond: goal,
                };
                attempt.links.push(link);
                refinement.links.push(link);
                refinement.orderings.extend(threats.iter().map(|&t| (t, p)));
                view = attempt;
                supported = true;
                break;
            }
        }
        if !supported {
            return None;
        }
    }
    Some(refinement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grounding::ground_task;
    use crate::params::PlannerConfig;
    use crate::pop::{OrderingManager, PlanArena};
    use crate::task::Task;

    /// `make1` and `make2` both produce `f` and `g`, `clear` deletes `f`, `consume` needs both.
    fn task() -> GroundedTask {
        let task: Task = serde_json::from_value(serde_json::json!({
            "domain": "supports",
            "functions": [{"name": "f"}, {"name": "g"}, {"name": "done"}],
            "operators": [
                {"name": "make1", "effects": [{"function": "f"}, {"function": "g"}]},
                {"name": "make2", "effects": [{"function": "f"}, {"function": "g"}]},
                {"name": "clear", "effects": [{"function": "f", "negated": true}]},
                {
                    "name": "consume",
                    "preconditions": [{"function": "f"}, {"function": "g"}],
                    "effects": [{"function": "done"}]
                }
            ],
            "goals": [{"function": "done"}]
        }))
        .unwrap();
        ground_task(&task, "agent", &PlannerConfig::default()).unwrap()
    }

    /// Root plan extended with unordered steps for the given actions.
    fn plan_with(task: &GroundedTask, actions: &[&str]) -> PlanView {
        let arena = PlanArena::new(task);
        let mut view = arena.view(PlanArena::ROOT, &mut OrderingManager::default());
        for key in actions {
            let action = task.action(task.action_by_key(key).unwrap());
            let refinement = Refinement {
                step: Some(Arc::new(Step::from_action(task.me, action))),
                ..Refinement::default()
            };
            view = view.extend(&refinement).unwrap();
        }
        view
    }

    #[test]
    fn support_combinations_are_bounded() {
        let task = task();
        let plan = plan_with(&task, &["make1", "make2"]);
        let consume = task.action(task.action_by_key("consume").unwrap());

        let unbounded = Refiner::new(&task, RefineLimits::UNBOUNDED);
        assert_eq!(unbounded.insert_step(&plan, consume).len(), 4);
        assert!(!unbounded.truncated());

        let limits = RefineLimits {
            support_combinations: Some(2),
            ..RefineLimits::default()
        };
        let bounded = Refiner::new(&task, limits);
        assert_eq!(bounded.insert_step(&plan, consume).len(), 2);
        assert!(bounded.truncated());

        // a limit that cuts nothing leaves the search complete
        let loose = Refiner::new(&task, RefineLimits {
            support_combinations: Some(4),
            ..RefineLimits::default()
        });
        assert_eq!(loose.insert_step(&plan, consume).len(), 4);
        assert!(!loose.truncated());
    }

    #[test]
    fn threat_resolutions_are_bounded() {
        let task = task();
        let plan = plan_with(&task, &["make1", "clear"]);
        let consume = task.action(task.action_by_key("consume").unwrap());

        let unbounded = Refiner::new(&task, RefineLimits::UNBOUNDED);
        let children = unbounded.insert_step(&plan, consume);
        // clear either before make1 or after consume
        assert_eq!(children.len(), 2);
        assert!(children.iter().all(|c| c.view.threats().is_empty()));
        assert!(!unbounded.truncated());

        let bounded = Refiner::new(&task, RefineLimits {
            threat_resolutions: Some(1),
            ..RefineLimits::default()
        });
        assert_eq!(bounded.insert_step(&plan, consume).len(), 1);
        assert!(bounded.truncated());
    }

    #[test]
    fn support_digest_follows_the_links() {
        let task = task();
        let plan = plan_with(&task, &["make1", "make2"]);
        let consume = task.action(task.action_by_key("consume").unwrap());
        let children = Refiner::new(&task, RefineLimits::UNBOUNDED).insert_step(&plan, consume);
        let signatures: hashbrown::HashSet<String> = children.iter().map(|c| c.view.signature()).collect();
        assert_eq!(signatures.len(), children.len());
    }
}
