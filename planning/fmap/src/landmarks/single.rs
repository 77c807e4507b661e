use std::collections::VecDeque;

use fixedbitset::FixedBitSet;
use itertools::Itertools;

use super::{LandmarkGraph, OrderingKind};
use crate::grounding::{CondKind, Condition, Fact, GroundAction, GroundedTask, UNREACHED};
use crate::ids::{ActionId, FunId};

/// Largest disjunctive landmark considered.
const MAX_DISJUNCTION: usize = 4;

/// Relaxed reachability over the local actions of an agent, ignoring delete effects.
///
/// Values reached only by peers are considered available from the start: they are achieved by
/// somebody else.
pub struct RelaxedExplorer<'a> {
    task: &'a GroundedTask,
    seed: FixedBitSet,
}

impl<'a> RelaxedExplorer<'a> {
    pub fn new(task: &'a GroundedTask) -> Self {
        let me = task.me;
        let mut seed = FixedBitSet::with_capacity(task.values().len());
        for (i, v) in task.values().iter().enumerate() {
            if v.initial || v.time_for(me) == UNREACHED {
                seed.insert(i);
            }
        }
        RelaxedExplorer { task, seed }
    }

    fn holds(&self, reached: &FixedBitSet, cond: &Condition) -> bool {
        match cond.kind {
            CondKind::Equal => self.task.value_id(cond.fact).is_some_and(|v| reached.contains(v.into())),
            CondKind::Distinct => {
                self.task.var(cond.var()).init_false.contains(&cond.fact.value)
                    || self
                        .task
                        .values_of_var(cond.var())
                        .iter()
                        .any(|&v| reached.contains(v.into()) && self.task.value(v).fact.value != cond.fact.value)
            }
        }
    }

    /// Values reachable using only the actions accepted by `allowed`.
    pub fn reachable(&self, allowed: impl Fn(&GroundAction) -> bool) -> FixedBitSet {
        let mut reached = self.seed.clone();
        let mut applied = FixedBitSet::with_capacity(self.task.actions().len());
        loop {
            let mut changed = false;
            for a in self.task.actions() {
                let id = usize::from(a.id);
                if applied.contains(id) || !allowed(a) || !a.preconditions.iter().all(|c| self.holds(&reached, c)) {
                    continue;
                }
                applied.insert(id);
                for e in &a.effects {
                    if let Some(v) = self.task.value_id(*e) {
                        changed |= !reached.put(v.into());
                    }
                }
            }
            if !changed {
                return reached;
            }
        }
    }

    /// True if one of the facts is reachable without any action achieving one of `removed`.
    pub fn reaches_without(&self, facts: &[Fact], removed: &[Fact]) -> bool {
        let reached = self.reachable(|a| !a.effects.iter().any(|e| removed.contains(e)));
        facts
            .iter()
            .any(|&f| self.task.value_id(f).is_some_and(|v| reached.contains(v.into())))
    }
}

fn is_initial(task: &GroundedTask, fact: Fact) -> bool {
    task.value_id(fact).is_some_and(|v| task.value(v).initial)
}

/// Achievers of a fact that can be applied strictly before the level of the fact.
fn early_achievers(task: &GroundedTask, fact: Fact) -> Vec<ActionId> {
    let Some(v) = task.value_id(fact) else {
        return Vec::new();
    };
    let level = task.value(v).time();
    task.achievers(v)
        .iter()
        .copied()
        .filter(|&a| task.action(a).min_time < level)
        .collect()
}

fn positive_preconditions(action: &GroundAction) -> impl Iterator<Item = Fact> + '_ {
    action
        .preconditions
        .iter()
        .filter(|c| c.kind == CondKind::Equal)
        .map(|c| c.fact)
}

/// Builds the landmark graph of the task by back-chaining from the goals over the relaxed planning
/// graph, then removes cycles and transitive orderings.
pub fn extract(task: &GroundedTask) -> LandmarkGraph {
    let _span = tracing::span!(tracing::Level::DEBUG, "LANDMARKS").entered();
    let explorer = RelaxedExplorer::new(task);
    let mut graph = LandmarkGraph::new();
    let mut queue = VecDeque::new();

    for goal in &task.goals {
        if goal.kind == CondKind::Equal && task.is_reachable(goal.fact) {
            let (id, new) = graph.add_node(vec![goal.fact], true);
            if new {
                queue.push_back(id);
            }
        }
    }

    while let Some(node) = queue.pop_front() {
        let facts = graph.node(node).facts.clone();
        if facts.iter().any(|&f| is_initial(task, f)) {
            continue;
        }
        let achievers = facts
            .iter()
            .flat_map(|&f| early_achievers(task, f))
            .unique()
            .collect_vec();
        if achievers.is_empty() {
            // achieved by a peer
            continue;
        }

        let mut common = positive_preconditions(task.action(achievers[0])).collect_vec();
        for &a in &achievers[1..] {
            let pre = positive_preconditions(task.action(a)).collect_vec();
            common.retain(|f| pre.contains(f));
        }
        for &p in &common {
            if facts.contains(&p) {
                continue;
            }
            if !is_initial(task, p) && explorer.reaches_without(&facts, &[p]) {
                continue;
            }
            let (id, new) = graph.add_node(vec![p], false);
            graph.add_ordering(id, node, OrderingKind::Necessary);
            if new {
                queue.push_back(id);
            }
        }

        let functions: Vec<FunId> = positive_preconditions(task.action(achievers[0]))
            .filter(|f| !common.contains(f))
            .map(|f| task.var(f.var).function)
            .unique()
            .collect();
        for fun in functions {
            let mut disjunction = Vec::new();
            let mut covers_all = true;
            for &a in &achievers {
                let options = positive_preconditions(task.action(a))
                    .filter(|f| !common.contains(f) && task.var(f.var).function == fun)
                    .collect_vec();
                covers_all &= !options.is_empty();
                disjunction.extend(options);
            }
            disjunction.sort();
            disjunction.dedup();
            if !covers_all || disjunction.len() < 2 || disjunction.len() > MAX_DISJUNCTION {
                continue;
            }
            if disjunction.iter().any(|&f| is_initial(task, f)) || explorer.reaches_without(&facts, &disjunction) {
                continue;
            }
            let (id, new) = graph.add_node(disjunction, false);
            graph.add_ordering(id, node, OrderingKind::Necessary);
            if new {
                queue.push_back(id);
            }
        }
    }

    add_reasonable_orderings(task, &mut graph);
    graph.remove_cycles();
    graph.filter_transitive_orders();
    tracing::debug!(
        "{} landmarks, {} orderings",
        graph.len(),
        graph.all_orderings().len()
    );
    graph
}

/// `x -> g` for a goal `g` when every achiever of `x` deletes `g`: achieving `g` before `x` is wasted.
fn add_reasonable_orderings(task: &GroundedTask, graph: &mut LandmarkGraph) {
    let goals = graph
        .nodes()
        .iter()
        .filter(|n| n.is_goal && !n.is_disjunctive())
        .map(|n| (n.id, n.facts[0]))
        .collect_vec();
    let mut added = Vec::new();
    for x in graph.nodes() {
        if x.is_goal || x.is_disjunctive() || is_initial(task, x.facts[0]) {
            continue;
        }
        let Some(v) = task.value_id(x.facts[0]) else {
            continue;
        };
        let achievers: &[ActionId] = task.achievers(v);
        if achievers.is_empty() {
            continue;
        }
        for &(g, goal) in &goals {
            let deletes = |a: &ActionId| {
                task.action(*a)
                    .effects
                    .iter()
                    .any(|e| e.var == goal.var && e.value != goal.value)
            };
            if achievers.iter().all(deletes) {
                added.push((x.id, g));
            }
        }
    }
    for (x, g) in added {
        graph.add_ordering(x, g, OrderingKind::Reasonable);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grounding::ground_task;
    use crate::landmarks::{LandmarkOrdering, OrderingKind};
    use crate::params::PlannerConfig;
    use crate::task::Task;
    use crate::types::Objects;

    /// Entering needs the door open, which needs the key, whose grabbing dirties the robot.
    fn house() -> GroundedTask {
        let task: Task = serde_json::from_value(serde_json::json!({
            "domain": "house",
            "functions": [{"name": "key-held"}, {"name": "door-open"}, {"name": "inside"}, {"name": "clean"}],
            "operators": [
                {
                    "name": "grab",
                    "effects": [{"function": "key-held"}, {"function": "clean", "negated": true}]
                },
                {
                    "name": "unlock",
                    "preconditions": [{"function": "key-held"}],
                    "effects": [{"function": "door-open"}]
                },
                {
                    "name": "enter",
                    "preconditions": [{"function": "door-open"}],
                    "effects": [{"function": "inside"}]
                },
                {"name": "wash", "effects": [{"function": "clean"}]}
            ],
            "init": [{"function": "clean"}],
            "goals": [{"function": "inside"}, {"function": "clean"}]
        }))
        .unwrap();
        ground_task(&task, "agent", &PlannerConfig::default()).unwrap()
    }

    #[test]
    fn landmarks_and_their_orderings() {
        let task = house();
        let graph = extract(&task);
        let node = |name: &str| {
            let var = task.var_id(task.function_id(name).unwrap(), &[]).unwrap();
            graph.node_of(&[Fact::new(var, Objects::TRUE)])
        };
        let (key, door, inside, clean) = (
            node("key-held").unwrap(),
            node("door-open").unwrap(),
            node("inside").unwrap(),
            node("clean").unwrap(),
        );
        assert!(graph.node(inside).is_goal && graph.node(clean).is_goal);
        assert!(!graph.node(key).is_goal);

        let has = |before, after, kind| graph.all_orderings().contains(&LandmarkOrdering { before, after, kind });
        assert!(has(door, inside, OrderingKind::Necessary));
        assert!(has(key, door, OrderingKind::Necessary));
        // grabbing the key dirties the robot: wash afterwards
        assert!(has(key, clean, OrderingKind::Reasonable));
        assert!(!has(door, clean, OrderingKind::Reasonable));
        assert_eq!(graph.orderings(Some(OrderingKind::Necessary), true).len(), 1);
        assert!(graph.is_acyclic());
    }
}
