//! Partial-order plans.
//!
//! Plans form a tree stored in a [`PlanArena`]: each node only records what it adds to its
//! parent (at most one step, some causal links and orderings) and is never modified afterwards.
//! A [`PlanView`] materializes a node with the full sets of steps, links and orderings of the
//! plan, together with the transitive closure of its ordering relation.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use fixedbitset::FixedBitSet;
use itertools::Itertools;

use crate::grounding::{Condition, Fact, GroundAction, GroundedTask, NumericCondition, NumericEffect};
use crate::heuristics::Evaluation;
use crate::ids::{ActionId, ObjId, PlanId, StepId, VarId};

use super::ordering::OrderingManager;

/// A step of a plan, as seen by this agent.
#[derive(Clone, Debug)]
pub struct Step {
    /// Index of the agent that owns the step.
    pub owner: usize,
    /// Ground action of this agent, if the step is one of its own.
    pub action: Option<ActionId>,
    /// `(name p1 ... pn)`
    pub label: Arc<str>,
    pub preconditions: Vec<Condition>,
    pub effects: Vec<Fact>,
    /// Values known to be false (initial step only).
    pub denied: Vec<Fact>,
    pub numeric_preconditions: Vec<NumericCondition>,
    pub numeric_effects: Vec<NumericEffect>,
}

impl Step {
    pub fn from_action(owner: usize, action: &GroundAction) -> Step {
        Step {
            owner,
            action: Some(action.id),
            label: action.label.clone(),
            preconditions: action.preconditions.clone(),
            effects: action.effects.clone(),
            denied: Vec::new(),
            numeric_preconditions: action.numeric_preconditions.clone(),
            numeric_effects: action.numeric_effects.clone(),
        }
    }

    fn initial(task: &GroundedTask) -> Step {
        let effects = task
            .initial_state()
            .into_iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|v| Fact::new(VarId::from(i), v)))
            .collect();
        let denied = task
            .vars()
            .iter()
            .enumerate()
            .flat_map(|(i, v)| v.init_false.iter().map(move |&o| Fact::new(VarId::from(i), o)))
            .collect();
        Step {
            owner: task.me,
            action: None,
            label: "(init)".into(),
            preconditions: Vec::new(),
            effects,
            denied,
            numeric_preconditions: Vec::new(),
            numeric_effects: Vec::new(),
        }
    }

    fn goal(task: &GroundedTask) -> Step {
        Step {
            owner: task.me,
            action: None,
            label: "(goal)".into(),
            preconditions: task.goals.clone(),
            effects: Vec::new(),
            denied: Vec::new(),
            numeric_preconditions: task.numeric_goals.clone(),
            numeric_effects: Vec::new(),
        }
    }

    pub fn supports(&self, cond: &Condition) -> bool {
        self.effects.iter().any(|e| cond.is_supported_by(*e))
            || (cond.kind == crate::grounding::CondKind::Distinct && self.denied.contains(&cond.fact))
    }

    pub fn threatens(&self, cond: &Condition) -> bool {
        self.effects.iter().any(|e| cond.is_violated_by(*e))
    }

    pub fn numeric_writes(&self) -> impl Iterator<Item = VarId> + '_ {
        self.numeric_effects.iter().map(|e| e.var)
    }

    pub fn numeric_reads(&self) -> Vec<VarId> {
        let mut out = Vec::new();
        for c in &self.numeric_preconditions {
            out.extend(c.vars());
        }
        for e in &self.numeric_effects {
            out.extend(e.reads());
        }
        out.sort();
        out.dedup();
        out
    }

    pub fn is_numeric(&self) -> bool {
        !self.numeric_preconditions.is_empty() || !self.numeric_effects.is_empty()
    }
}

/// `producer` establishes `cond` for `consumer`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CausalLink {
    pub producer: StepId,
    pub consumer: StepId,
    pub cond: Condition,
}

/// Increment applied to a plan to obtain one of its children.
#[derive(Clone, Debug, Default)]
pub struct Refinement {
    pub step: Option<Arc<Step>>,
    pub links: Vec<CausalLink>,
    /// Orderings not implied by the links.
    pub orderings: Vec<(StepId, StepId)>,
    /// Digest of the links supporting the new step, computed by the owner of the step.
    pub support: u64,
}

#[derive(Clone, Debug)]
pub struct PlanNode {
    pub id: PlanId,
    pub parent: Option<PlanId>,
    pub step: Option<Arc<Step>>,
    pub links: Vec<CausalLink>,
    /// Orderings added by the node, including those implied by its links.
    orderings: Vec<(StepId, StepId)>,
    pub support: u64,
    /// Number of steps of the plan, sentinels included.
    pub num_steps: usize,
    pub eval: Evaluation,
    pub solution: bool,
}

impl PlanNode {
    pub fn all_orderings(&self) -> &[(StepId, StepId)] {
        &self.orderings
    }

    /// Number of steps, sentinels excluded.
    pub fn g(&self) -> u32 {
        (self.num_steps - 2) as u32
    }
}

/// Tree of all plans generated by a search.
pub struct PlanArena {
    init: Arc<Step>,
    goal: Arc<Step>,
    nodes: Vec<PlanNode>,
}

impl PlanArena {
    pub const ROOT: PlanId = PlanId::from_u32(0);

    /// Arena containing the root plan: the initial and final steps, with the goals open.
    pub fn new(task: &GroundedTask) -> Self {
        let root = PlanNode {
            id: Self::ROOT,
            parent: None,
            step: None,
            links: Vec::new(),
            orderings: Vec::new(),
            support: 0,
            num_steps: 2,
            eval: Evaluation::default(),
            solution: false,
        };
        PlanArena {
            init: Arc::new(Step::initial(task)),
            goal: Arc::new(Step::goal(task)),
            nodes: vec![root],
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: PlanId) -> &PlanNode {
        &self.nodes[id]
    }

    pub fn set_eval(&mut self, id: PlanId, eval: Evaluation) {
        self.nodes[id].eval = eval;
    }

    pub fn push(&mut self, parent: PlanId, refinement: Refinement, eval: Evaluation, solution: bool) -> PlanId {
        let id = PlanId::from(self.nodes.len());
        let num_steps = self.nodes[parent].num_steps + refinement.step.is_some() as usize;
        let mut orderings = refinement.orderings;
        for l in &refinement.links {
            if !l.producer.is_sentinel() && !l.consumer.is_sentinel() {
                orderings.push((l.producer, l.consumer));
            }
        }
        orderings.sort();
        orderings.dedup();
        self.nodes.push(PlanNode {
            id,
            parent: Some(parent),
            step: refinement.step,
            links: refinement.links,
            orderings,
            support: refinement.support,
            num_steps,
            eval,
            solution,
        });
        id
    }

    /// Plans from the root to `id`, both included.
    pub fn chain(&self, id: PlanId) -> Vec<PlanId> {
        let mut chain = vec![id];
        let mut cur = id;
        while let Some(p) = self.nodes[cur].parent {
            chain.push(p);
            cur = p;
        }
        chain.reverse();
        chain
    }

    /// Materializes a plan. The ordering manager is brought to the plan and provides the closure.
    pub fn view(&self, id: PlanId, om: &mut OrderingManager) -> PlanView {
        om.update(self, id);
        let mut steps = vec![self.init.clone(), self.goal.clone()];
        let mut supports = vec![0, 0];
        let mut links = Vec::new();
        let mut orderings = Vec::new();
        for p in self.chain(id) {
            let node = &self.nodes[p];
            if let Some(step) = &node.step {
                steps.push(step.clone());
                supports.push(node.support);
            }
            links.extend_from_slice(&node.links);
            orderings.extend_from_slice(&node.orderings);
        }
        let n = steps.len();
        let mut after = vec![FixedBitSet::with_capacity(n); n];
        for a in 2..n {
            for b in 2..n {
                if om.check_ordering(StepId::from(a), StepId::from(b)) {
                    after[a].insert(b);
                }
            }
        }
        PlanView {
            id,
            steps,
            supports,
            links,
            orderings,
            after,
        }
    }
}

/// A plan with all its steps, links and orderings.
#[derive(Clone, Debug)]
pub struct PlanView {
    pub id: PlanId,
    pub steps: Vec<Arc<Step>>,
    /// Support digest of each step.
    supports: Vec<u64>,
    pub links: Vec<CausalLink>,
    /// Explicit orderings between non-sentinel steps, including those of the links.
    pub orderings: Vec<(StepId, StepId)>,
    /// `after[a]` contains `b` iff `a` precedes `b` (non-sentinel steps only).
    after: Vec<FixedBitSet>,
}

impl PlanView {
    pub fn num_steps(&self) -> usize {
        self.steps.len()
    }

    /// Number of steps, sentinels excluded.
    pub fn g(&self) -> u32 {
        (self.steps.len() - 2) as u32
    }

    pub fn step(&self, id: StepId) -> &Step {
        &self.steps[usize::from(id)]
    }

    pub fn step_ids(&self) -> impl Iterator<Item = StepId> + use<> {
        (0..self.steps.len()).map(StepId::from)
    }

    /// Non-sentinel steps.
    pub fn inner_steps(&self) -> impl Iterator<Item = StepId> + use<> {
        (2..self.steps.len()).map(StepId::from)
    }

    /// True if `a` necessarily precedes `b`.
    pub fn before(&self, a: StepId, b: StepId) -> bool {
        if a == b {
            return false;
        }
        if a == StepId::INIT || b == StepId::GOAL {
            return true;
        }
        if a == StepId::GOAL || b == StepId::INIT {
            return false;
        }
        self.after[usize::from(a)].contains(usize::from(b))
    }

    /// Adds a step, unordered with respect to the others.
    pub fn push_step(&mut self, step: Arc<Step>, support: u64) -> StepId {
        let id = StepId::from(self.steps.len());
        self.steps.push(step);
        self.supports.push(support);
        let n = self.steps.len();
        for set in &mut self.after {
            set.grow(n);
        }
        self.after.push(FixedBitSet::with_capacity(n));
        id
    }

    /// Adds `a < b`. Returns false, leaving the plan unchanged, if `b` precedes `a`.
    pub fn add_ordering(&mut self, a: StepId, b: StepId) -> bool {
        if a.is_sentinel() || b.is_sentinel() {
            return a != b && a != StepId::GOAL && b != StepId::INIT;
        }
        if a == b || self.before(b, a) {
            return false;
        }
        if !self.orderings.contains(&(a, b)) {
            self.orderings.push((a, b));
        }
        if self.before(a, b) {
            return true;
        }
        let (ai, bi) = (usize::from(a), usize::from(b));
        let mut reach = self.after[bi].clone();
        reach.insert(bi);
        for x in 0..self.steps.len() {
            if x == ai || self.after[x].contains(ai) {
                self.after[x].union_with(&reach);
            }
        }
        true
    }

    /// Applies a refinement. Returns false if it would introduce a cycle.
    pub fn apply(&mut self, r: &Refinement) -> bool {
        if let Some(step) = &r.step {
            self.push_step(step.clone(), r.support);
        }
        for l in &r.links {
            if !self.add_ordering(l.producer, l.consumer) {
                return false;
            }
            self.links.push(*l);
        }
        r.orderings.iter().all(|&(a, b)| self.add_ordering(a, b))
    }

    pub fn extend(&self, r: &Refinement) -> Option<PlanView> {
        let mut child = self.clone();
        child.apply(r).then_some(child)
    }

    /// Steps, the final one excepted, having an effect that establishes the condition.
    pub fn supporters(&self, cond: &Condition) -> Vec<StepId> {
        self.step_ids()
            .filter(|&s| s != StepId::GOAL && self.step(s).supports(cond))
            .collect()
    }

    /// Steps that may invalidate the link: they assign another value to its variable and are
    /// not ordered before its producer or after its consumer.
    pub fn threats_to(&self, link: &CausalLink) -> Vec<StepId> {
        self.inner_steps()
            .filter(|&t| {
                t != link.producer
                    && t != link.consumer
                    && self.step(t).threatens(&link.cond)
                    && !self.before(t, link.producer)
                    && !self.before(link.consumer, t)
            })
            .collect()
    }

    pub fn threats(&self) -> Vec<(CausalLink, StepId)> {
        self.links
            .iter()
            .flat_map(|l| self.threats_to(l).into_iter().map(move |t| (*l, t)))
            .collect()
    }

    /// Goals not yet supported by a causal link.
    pub fn open_goals(&self) -> Vec<Condition> {
        self.step(StepId::GOAL)
            .preconditions
            .iter()
            .filter(|c| {
                !self
                    .links
                    .iter()
                    .any(|l| l.consumer == StepId::GOAL && l.cond == **c)
            })
            .copied()
            .collect()
    }

    /// A total order of the steps compatible with the plan, smallest index first among
    /// unordered steps.
    pub fn linearization(&self) -> Vec<StepId> {
        let n = self.steps.len();
        let mut preds = vec![0usize; n];
        for &(_, b) in &self.orderings {
            preds[usize::from(b)] += 1;
        }
        let mut ready: BinaryHeap<Reverse<usize>> = (2..n).filter(|&s| preds[s] == 0).map(Reverse).collect();
        let mut order = vec![StepId::INIT];
        while let Some(Reverse(s)) = ready.pop() {
            order.push(StepId::from(s));
            for &(a, b) in &self.orderings {
                if usize::from(a) == s {
                    let b = usize::from(b);
                    preds[b] -= 1;
                    if preds[b] == 0 {
                        ready.push(Reverse(b));
                    }
                }
            }
        }
        order.push(StepId::GOAL);
        order
    }

    /// Value of each variable after executing a linearization of the plan.
    pub fn frontier_state(&self, task: &GroundedTask) -> Vec<Option<ObjId>> {
        let mut state = task.initial_state();
        state.resize(task.vars().len(), None);
        for s in self.linearization() {
            if s == StepId::INIT {
                continue;
            }
            for e in &self.step(s).effects {
                state[usize::from(e.var)] = Some(e.value);
            }
        }
        state
    }

    /// Numeric variables after executing the plan. Steps touching a numeric variable are totally
    /// ordered with respect to its writers, so the result does not depend on the linearization.
    pub fn numeric_state(&self, task: &GroundedTask) -> Vec<Option<f64>> {
        let mut values = task.initial_numbers();
        values.resize(task.vars().len(), None);
        for s in self.linearization() {
            let step = self.step(s);
            let updates = step
                .numeric_effects
                .iter()
                .map(|e| (e.var, e.apply(&|v: VarId| values.get(usize::from(v)).copied().flatten())))
                .collect_vec();
            for (var, value) in updates {
                values[usize::from(var)] = value;
            }
        }
        values
    }

    pub fn numeric_goals_hold(&self, task: &GroundedTask) -> bool {
        let values = self.numeric_state(task);
        let value_of = |v: VarId| values.get(usize::from(v)).copied().flatten();
        task.numeric_goals.iter().all(|c| c.holds(&value_of))
    }

    /// True if no goal is open, no link is threatened and the numeric goals hold.
    pub fn is_solution(&self, task: &GroundedTask) -> bool {
        self.open_goals().is_empty() && self.threats().is_empty() && self.numeric_goals_hold(task)
    }

    /// Checks that every precondition of every step is established by exactly one causal link
    /// from a preceding step and that no link is threatened.
    pub fn validate(&self) -> Result<(), String> {
        for s in self.step_ids().filter(|&s| s != StepId::INIT) {
            for c in &self.step(s).preconditions {
                let links = self.links.iter().filter(|l| l.consumer == s && l.cond == *c).collect_vec();
                if links.len() != 1 {
                    return Err(format!("{} has {} links for {:?}", self.step(s).label, links.len(), c));
                }
                let l = links[0];
                if !self.before(l.producer, s) || !self.step(l.producer).supports(c) {
                    return Err(format!("invalid link {l:?}"));
                }
            }
        }
        match self.threats().first() {
            Some((l, t)) => Err(format!("{} threatens {l:?}", self.step(*t).label)),
            None => Ok(()),
        }
    }

    /// Digest of the links supporting a new step. Producers are identified by their label, so the
    /// digest does not depend on the order in which steps were added.
    pub fn support_digest(&self, links: &[CausalLink]) -> u64 {
        let mut hasher = DefaultHasher::new();
        for entry in links
            .iter()
            .map(|l| (&*self.step(l.producer).label, l.cond))
            .sorted()
        {
            entry.hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Canonical description of the plan, independent of the order in which steps were added.
    /// Two plans only differing by the supports of a step have different signatures.
    pub fn signature(&self) -> String {
        self.inner_steps()
            .map(|s| {
                let preds = self
                    .orderings
                    .iter()
                    .filter(|&&(_, b)| b == s)
                    .map(|&(a, _)| &*self.step(a).label)
                    .sorted()
                    .join(",");
                format!("{}#{:x}<{}>", self.step(s).label, self.supports[usize::from(s)], preds)
            })
            .sorted()
            .join(";")
    }
}
