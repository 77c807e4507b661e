//! Heuristic evaluation of partial-order plans.
//!
//! All estimates are computed from the *frontier state* of a plan (the state reached by executing
//! any linearization of its steps) with a delete relaxation over the local ground actions. Values
//! that only peers can establish are available at the level they reported during grounding.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use fixedbitset::FixedBitSet;

use crate::grounding::{CondKind, Condition, GroundedTask, UNREACHED};
use crate::ids::{ActionId, ObjId, ValueId, VarId};
use crate::landmarks::LandmarkGraph;
use crate::pop::plan::PlanView;

pub type Cost = u32;

/// Cost of an unreachable value. Sums of a few infinite costs do not overflow.
pub const COST_INFTY: Cost = u32::MAX / 16;

/// Primary value assigned to plans from which no solution is reachable.
pub const DEAD_END: Cost = COST_INFTY;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum HeuristicKind {
    /// Length of a relaxed plan.
    Ff,
    /// Sum of the costs of the open goals.
    Add,
    /// Number of landmarks not yet achieved.
    Land,
    /// Relaxed plan length, ties broken by pending landmarks.
    FfLand,
}

impl FromStr for HeuristicKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ff" => Ok(HeuristicKind::Ff),
            "add" => Ok(HeuristicKind::Add),
            "land" => Ok(HeuristicKind::Land),
            "ff-land" => Ok(HeuristicKind::FfLand),
            _ => Err(format!("unknown heuristic `{s}` (expected ff|add|land|ff-land)")),
        }
    }
}

impl Display for HeuristicKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HeuristicKind::Ff => "ff",
            HeuristicKind::Add => "add",
            HeuristicKind::Land => "land",
            HeuristicKind::FfLand => "ff-land",
        };
        write!(f, "{s}")
    }
}

impl HeuristicKind {
    pub fn uses_landmarks(self) -> bool {
        matches!(self, HeuristicKind::Land | HeuristicKind::FfLand)
    }
}

/// Heuristic value of a plan. Lower is better, compared lexicographically.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Evaluation {
    pub primary: Cost,
    pub secondary: Cost,
}

impl Evaluation {
    pub const SOLUTION: Evaluation = Evaluation {
        primary: 0,
        secondary: 0,
    };

    pub fn new(primary: Cost, secondary: Cost) -> Self {
        Evaluation { primary, secondary }
    }

    pub fn dead_end() -> Self {
        Evaluation::new(DEAD_END, DEAD_END)
    }

    pub fn is_dead_end(&self) -> bool {
        self.primary >= DEAD_END
    }
}

impl Display for Evaluation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_dead_end() {
            write!(f, "dead-end")
        } else {
            write!(f, "{}/{}", self.primary, self.secondary)
        }
    }
}

/// A strategy scoring plans. Shared by the worker threads of a search.
pub trait Heuristic: Send + Sync {
    fn evaluate(&self, plan: &PlanView) -> Evaluation;
}

/// Result of the h-add relaxation from a state.
pub struct RelaxedCosts<'a> {
    task: &'a GroundedTask,
    state: &'a [Option<ObjId>],
    value_costs: Vec<Cost>,
    /// Cheapest local achiever of each value, if any.
    best_supporter: Vec<Option<ActionId>>,
    action_costs: Vec<Cost>,
}

impl<'a> RelaxedCosts<'a> {
    pub fn value_cost(&self, value: ValueId) -> Cost {
        self.value_costs[value]
    }

    pub fn action_cost(&self, action: ActionId) -> Option<Cost> {
        let c = self.action_costs[action];
        (c < COST_INFTY).then_some(c)
    }

    fn state_value(&self, var: VarId) -> Option<ObjId> {
        self.state.get(usize::from(var)).copied().flatten()
    }

    /// Cost of a condition, with the value chosen to support it (`None` if it already holds).
    fn condition_support(&self, cond: &Condition) -> (Cost, Option<ValueId>) {
        if cond.holds_with(self.state_value(cond.var())) {
            return (0, None);
        }
        match cond.kind {
            CondKind::Equal => match self.task.value_id(cond.fact) {
                Some(v) => (self.value_costs[v], Some(v)),
                None => (COST_INFTY, None),
            },
            CondKind::Distinct => {
                let var = self.task.var(cond.var());
                if self.state_value(cond.var()).is_none() && var.init_false.contains(&cond.fact.value) {
                    return (0, None);
                }
                self.task
                    .values_of_var(cond.var())
                    .iter()
                    .filter(|&&v| self.task.value(v).fact.value != cond.fact.value)
                    .map(|&v| (self.value_costs[v], Some(v)))
                    .min()
                    .unwrap_or((COST_INFTY, None))
            }
        }
    }

    pub fn condition_cost(&self, cond: &Condition) -> Cost {
        self.condition_support(cond).0
    }

    pub fn conjunction_cost(&self, conds: &[Condition]) -> Cost {
        conds
            .iter()
            .map(|c| self.condition_cost(c))
            .fold(0, |acc: Cost, c| acc.saturating_add(c).min(COST_INFTY))
    }

    /// Number of actions of a relaxed plan achieving the conditions, or `None` if one is unreachable.
    /// Peer-only values are counted once each.
    pub fn relaxed_plan_length(&self, conds: &[Condition]) -> Option<Cost> {
        let mut in_plan = FixedBitSet::with_capacity(self.task.actions().len());
        let mut achieved = FixedBitSet::with_capacity(self.value_costs.len());
        let mut external = 0;
        let mut stack: Vec<Condition> = conds.to_vec();
        while let Some(cond) = stack.pop() {
            let (cost, value) = self.condition_support(&cond);
            if cost >= COST_INFTY {
                return None;
            }
            let Some(value) = value else {
                continue;
            };
            if achieved.put(value.into()) || cost == 0 {
                continue;
            }
            match self.best_supporter[value] {
                Some(a) => {
                    if !in_plan.put(a.into()) {
                        stack.extend_from_slice(&self.task.action(a).preconditions);
                    }
                }
                None => external += 1,
            }
        }
        Some(in_plan.count_ones(..) as Cost + external)
    }
}

/// Computes the h-add cost of every value from `state`.
pub fn hadd<'a>(task: &'a GroundedTask, state: &'a [Option<ObjId>]) -> RelaxedCosts<'a> {
    let mut value_costs = vec![COST_INFTY; task.values().len()];
    for (i, v) in task.values().iter().enumerate() {
        if state.get(usize::from(v.fact.var)).copied().flatten() == Some(v.fact.value) {
            value_costs[i] = 0;
        } else if task.achievers(ValueId::from(i)).is_empty() && v.time() != UNREACHED {
            // only established by peers
            value_costs[i] = v.time().max(1);
        }
    }
    let mut costs = RelaxedCosts {
        task,
        state,
        value_costs,
        best_supporter: vec![None; task.values().len()],
        action_costs: vec![COST_INFTY; task.actions().len()],
    };

    let mut again = true;
    while again {
        again = false;
        for a in task.actions() {
            let c = costs.conjunction_cost(&a.preconditions);
            if c >= costs.action_costs[a.id] {
                continue;
            }
            costs.action_costs[a.id] = c;
            for e in &a.effects {
                if let Some(v) = task.value_id(*e) {
                    if c + 1 < costs.value_costs[v] {
                        costs.value_costs[v] = c + 1;
                        costs.best_supporter[v] = Some(a.id);
                        again = true;
                    }
                }
            }
        }
    }
    costs
}

/// Estimated number of actions needed to satisfy the numeric goals: for each unsatisfied goal,
/// the applications of the local action changing its variable by the largest constant step in the
/// right direction. Gaps no local action can close count one per unit.
fn numeric_goal_cost(task: &GroundedTask, plan: &PlanView, costs: &RelaxedCosts) -> Cost {
    if task.numeric_goals.is_empty() {
        return 0;
    }
    let numbers = plan.numeric_state(task);
    let value_of = |v: VarId| numbers.get(usize::from(v)).copied().flatten();
    let mut total: Cost = 0;
    for goal in &task.numeric_goals {
        if goal.holds(&value_of) {
            continue;
        }
        let Some((var, gap)) = goal.gap(&value_of) else {
            total += 1;
            continue;
        };
        let best = task
            .actions()
            .iter()
            .filter_map(|a| {
                let step = a
                    .numeric_effects
                    .iter()
                    .filter(|e| e.var == var)
                    .filter_map(|e| e.constant_delta())
                    .find(|d| d * gap > 0.0)?;
                let pre = costs.action_cost(a.id)?;
                let n = (gap / step).abs().ceil() as Cost;
                Some(n.saturating_mul(pre + 1))
            })
            .min();
        total = total.saturating_add(best.unwrap_or(gap.abs().ceil() as Cost));
    }
    total.min(COST_INFTY)
}

/// Number of landmarks not achieved by any step of the plan. A goal landmark also counts when it
/// does not hold at the end of the plan.
pub fn pending_landmarks(task: &GroundedTask, landmarks: &LandmarkGraph, plan: &PlanView) -> Cost {
    let state = plan.frontier_state(task);
    landmarks
        .nodes()
        .iter()
        .filter(|node| {
            let achieved = plan
                .step_ids()
                .any(|s| node.facts.iter().any(|f| plan.step(s).effects.contains(f)));
            let holds = node
                .facts
                .iter()
                .any(|f| state.get(usize::from(f.var)).copied().flatten() == Some(f.value));
            !achieved || (node.is_goal && !holds)
        })
        .count() as Cost
}

/// Relaxation-based heuristics, optionally combined with a landmark count.
pub struct RelaxationHeuristic<'a> {
    task: &'a GroundedTask,
    landmarks: Option<&'a LandmarkGraph>,
    kind: HeuristicKind,
}

impl<'a> RelaxationHeuristic<'a> {
    pub fn new(kind: HeuristicKind, task: &'a GroundedTask, landmarks: Option<&'a LandmarkGraph>) -> Self {
        RelaxationHeuristic { task, landmarks, kind }
    }

    fn landmark_count(&self, plan: &PlanView) -> Cost {
        self.landmarks
            .map(|lm| pending_landmarks(self.task, lm, plan))
            .unwrap_or(0)
    }
}

impl Heuristic for RelaxationHeuristic<'_> {
    fn evaluate(&self, plan: &PlanView) -> Evaluation {
        let open = plan.open_goals();
        if self.kind == HeuristicKind::Land {
            let state = plan.frontier_state(self.task);
            let costs = hadd(self.task, &state);
            if costs.conjunction_cost(&open) >= COST_INFTY {
                return Evaluation::dead_end();
            }
            return Evaluation::new(self.landmark_count(plan) + open.len() as Cost, 0);
        }
        let state = plan.frontier_state(self.task);
        let costs = hadd(self.task, &state);
        let numeric = numeric_goal_cost(self.task, plan, &costs);
        let relaxed = match self.kind {
            HeuristicKind::Add => Some(costs.conjunction_cost(&open)).filter(|&c| c < COST_INFTY),
            _ => costs.relaxed_plan_length(&open),
        };
        let Some(relaxed) = relaxed else {
            return Evaluation::dead_end();
        };
        let primary = relaxed.saturating_add(numeric).min(DEAD_END - 1);
        let secondary = match self.kind {
            HeuristicKind::FfLand => self.landmark_count(plan),
            _ => 0,
        };
        Evaluation::new(primary, secondary)
    }
}

/// Builds the heuristic selected by `kind`. Landmark-based strategies need a landmark graph.
pub fn heuristic<'a>(
    kind: HeuristicKind,
    task: &'a GroundedTask,
    landmarks: Option<&'a LandmarkGraph>,
) -> Box<dyn Heuristic + 'a> {
    if kind.uses_landmarks() && landmarks.is_none() {
        tracing::warn!("heuristic {kind} without landmarks, they are ignored");
    }
    Box::new(RelaxationHeuristic::new(kind, task, landmarks))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_parse_and_print() {
        for kind in [HeuristicKind::Ff, HeuristicKind::Add, HeuristicKind::Land, HeuristicKind::FfLand] {
            assert_eq!(kind.to_string().parse::<HeuristicKind>(), Ok(kind));
        }
        assert!("hmax".parse::<HeuristicKind>().is_err());
    }

    #[test]
    fn evaluations_order_lexicographically() {
        assert!(Evaluation::new(1, 5) < Evaluation::new(2, 0));
        assert!(Evaluation::new(1, 0) < Evaluation::new(1, 1));
        assert!(Evaluation::dead_end().is_dead_end());
        assert!(!Evaluation::SOLUTION.is_dead_end());
    }
}
