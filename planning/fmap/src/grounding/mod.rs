//! Ground representation of a planning task: variables, values reached in the (distributed)
//! relaxed planning graph and ground actions.
//!
//! A [`GroundedTask`] is produced by the [`Grounder`], possibly extended by the distributed
//! grounding protocol, and then only read by the landmark extractor, the heuristics and the
//! partial-order planner.

pub mod distributed;
mod grounder;
pub mod numeric;
pub mod shared;
pub mod statics;

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use hashbrown::HashMap;
use itertools::Itertools;
use smallvec::SmallVec;

pub use grounder::{Grounder, ground_task};
pub use numeric::{ArithOp, NumExpr, NumericCondition, NumericEffect};

use crate::errors::TaskError;
use crate::ids::{ActionId, FunId, ObjId, TypeId, ValueId, VarId};
use crate::task::MetricDirection;
use crate::types::{Objects, Registry, TypeRegistry};
use shared::SharingPolicy;

/// How negative preconditions are matched during grounding.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum NegationPolicy {
    /// Closed world: a boolean variable with no true initial value is false at level 0.
    #[default]
    Failure,
    /// Only explicitly declared or produced false values are known.
    Unknown,
}

impl FromStr for NegationPolicy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "failure" => Ok(NegationPolicy::Failure),
            "unknown" => Ok(NegationPolicy::Unknown),
            _ => Err(format!("unknown negation policy `{s}` (expected failure|unknown)")),
        }
    }
}

impl Display for NegationPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            NegationPolicy::Failure => write!(f, "failure"),
            NegationPolicy::Unknown => write!(f, "unknown"),
        }
    }
}

/// Filtering of ground actions whose parameters alias objects in degenerate ways.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum SameObjects {
    #[default]
    None,
    /// Discard actions with an effect whose variable arguments and value repeat an object.
    Effects,
    /// Discard actions with an effect re-asserting the exact value a precondition requires.
    Precondition,
    Both,
}

impl SameObjects {
    pub fn forbids_repeated_effect_params(self) -> bool {
        matches!(self, SameObjects::Effects | SameObjects::Both)
    }
    pub fn forbids_precondition_equals_effect(self) -> bool {
        matches!(self, SameObjects::Precondition | SameObjects::Both)
    }
}

impl FromStr for SameObjects {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(SameObjects::None),
            "effects" => Ok(SameObjects::Effects),
            "precondition" => Ok(SameObjects::Precondition),
            "both" => Ok(SameObjects::Both),
            _ => Err(format!("unknown same-objects policy `{s}`")),
        }
    }
}

impl Display for SameObjects {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SameObjects::None => "none",
            SameObjects::Effects => "effects",
            SameObjects::Precondition => "precondition",
            SameObjects::Both => "both",
        };
        write!(f, "{s}")
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    Boolean,
    Object,
    Numeric,
}

/// Signature of a function. Multi-valued functions are stored in their folded, boolean form.
#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    /// Accepted types of each parameter (an empty list accepts any object).
    pub params: Vec<Vec<TypeId>>,
    pub domain: Vec<TypeId>,
    pub kind: FunctionKind,
    pub multi: bool,
}

#[derive(Clone, Debug)]
pub struct GroundVar {
    pub function: FunId,
    pub params: Vec<ObjId>,
    pub domain: Vec<TypeId>,
    pub init_true: Option<ObjId>,
    pub init_false: Vec<ObjId>,
    pub init_number: Option<f64>,
    pub numeric: bool,
}

/// A ground value: `variable = object`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fact {
    pub var: VarId,
    pub value: ObjId,
}

impl Fact {
    pub fn new(var: VarId, value: ObjId) -> Self {
        Fact { var, value }
    }
}

pub type Effect = Fact;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CondKind {
    Equal,
    Distinct,
}

/// Test on a ground variable: `var = value` or `var != value`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Condition {
    pub kind: CondKind,
    pub fact: Fact,
}

impl Condition {
    pub fn equal(fact: Fact) -> Self {
        Condition {
            kind: CondKind::Equal,
            fact,
        }
    }
    pub fn distinct(fact: Fact) -> Self {
        Condition {
            kind: CondKind::Distinct,
            fact,
        }
    }
    pub fn var(&self) -> VarId {
        self.fact.var
    }

    /// True if assigning `eff` makes the condition true.
    pub fn is_supported_by(&self, eff: Fact) -> bool {
        eff.var == self.fact.var
            && match self.kind {
                CondKind::Equal => eff.value == self.fact.value,
                CondKind::Distinct => eff.value != self.fact.value,
            }
    }

    /// True if assigning `eff` makes the condition false.
    pub fn is_violated_by(&self, eff: Fact) -> bool {
        eff.var == self.fact.var && !self.is_supported_by(eff)
    }

    /// True if the condition holds when the variable has value `value` (`None` if unknown).
    pub fn holds_with(&self, value: Option<ObjId>) -> bool {
        match (self.kind, value) {
            (CondKind::Equal, Some(v)) => v == self.fact.value,
            (CondKind::Distinct, Some(v)) => v != self.fact.value,
            (_, None) => false,
        }
    }
}

/// Level reported for a value an agent cannot establish.
pub const UNREACHED: u32 = u32::MAX;

/// A value reached in the disRPG, with the earliest level at which each agent can establish it.
#[derive(Clone, Debug)]
pub struct GroundValue {
    pub fact: Fact,
    pub min_time: SmallVec<[u32; 4]>,
    pub initial: bool,
    /// False value of a boolean variable assumed under negation by failure. Never sent to peers.
    pub implicit: bool,
}

impl GroundValue {
    /// Earliest level at which any agent can establish the value.
    pub fn time(&self) -> u32 {
        self.min_time.iter().copied().min().unwrap_or(UNREACHED)
    }

    pub fn time_for(&self, agent: usize) -> u32 {
        self.min_time.get(agent).copied().unwrap_or(UNREACHED)
    }
}

#[derive(Clone, Debug)]
pub struct GroundAction {
    pub id: ActionId,
    pub name: String,
    pub params: Vec<ObjId>,
    pub preconditions: Vec<Condition>,
    pub effects: Vec<Effect>,
    pub numeric_preconditions: Vec<NumericCondition>,
    pub numeric_effects: Vec<NumericEffect>,
    /// Level of the disRPG at which all preconditions are reached.
    pub min_time: u32,
    /// Variables on which the action had contradictory effects.
    pub mutex_vars: Vec<VarId>,
    /// `(name p1 ... pn)`
    pub label: Arc<str>,
}

impl GroundAction {
    pub fn touches_var(&self, var: VarId) -> bool {
        self.preconditions.iter().any(|c| c.var() == var) || self.effects.iter().any(|e| e.var == var)
    }

    pub fn numeric_writes(&self) -> impl Iterator<Item = VarId> + '_ {
        self.numeric_effects.iter().map(|e| e.var)
    }

    pub fn numeric_reads(&self) -> Vec<VarId> {
        let mut out = Vec::new();
        for c in &self.numeric_preconditions {
            for v in c.vars() {
                if !out.contains(&v) {
                    out.push(v)
                }
            }
        }
        for e in &self.numeric_effects {
            for v in e.reads() {
                if !out.contains(&v) {
                    out.push(v)
                }
            }
        }
        out
    }
}

/// A fact in symbolic form, exchanged between agents that do not share indices.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SymbolicFact {
    pub function: String,
    pub params: Vec<String>,
    pub value: String,
}

impl Display for SymbolicFact {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} {}) = {}", self.function, self.params.iter().join(" "), self.value)
    }
}

/// Output of grounding for one agent.
#[derive(Clone, Debug)]
pub struct GroundedTask {
    /// Names of all agents; indices into the per-agent `min_time` arrays.
    pub agents: Vec<String>,
    /// Index of this agent in `agents`.
    pub me: usize,
    pub registry: Registry,
    pub negation: NegationPolicy,
    functions: Vec<Function>,
    function_index: HashMap<String, FunId>,
    statics: Vec<bool>,
    vars: Vec<GroundVar>,
    var_index: HashMap<(FunId, Vec<ObjId>), VarId>,
    values: Vec<GroundValue>,
    value_index: HashMap<Fact, ValueId>,
    values_of_var: Vec<Vec<ValueId>>,
    values_of_function: Vec<Vec<ValueId>>,
    actions: Vec<GroundAction>,
    action_index: HashMap<String, ActionId>,
    achievers: Vec<Vec<ActionId>>,
    pub goals: Vec<Condition>,
    pub numeric_goals: Vec<NumericCondition>,
    pub metric: Option<(MetricDirection, NumExpr)>,
    pub preferences: Vec<(String, Condition)>,
    pub sharing: SharingPolicy,
    /// Set once the initial state is seeded: later boolean variables start false under negation by failure.
    seeded: bool,
}

impl GroundedTask {
    pub(crate) fn empty(agents: Vec<String>, me: usize, registry: Registry, negation: NegationPolicy) -> Self {
        GroundedTask {
            agents,
            me,
            registry,
            negation,
            functions: Vec::new(),
            function_index: HashMap::new(),
            statics: Vec::new(),
            vars: Vec::new(),
            var_index: HashMap::new(),
            values: Vec::new(),
            value_index: HashMap::new(),
            values_of_var: Vec::new(),
            values_of_function: Vec::new(),
            actions: Vec::new(),
            action_index: HashMap::new(),
            achievers: Vec::new(),
            goals: Vec::new(),
            numeric_goals: Vec::new(),
            metric: None,
            preferences: Vec::new(),
            sharing: SharingPolicy::default(),
            seeded: false,
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agents[self.me]
    }

    // ---------- functions ----------

    pub(crate) fn add_function(&mut self, function: Function, is_static: bool) -> FunId {
        let id = FunId::from(self.functions.len());
        self.function_index.insert(function.name.clone(), id);
        self.functions.push(function);
        self.statics.push(is_static);
        self.values_of_function.push(Vec::new());
        id
    }

    pub fn function(&self, id: FunId) -> &Function {
        &self.functions[id]
    }

    pub fn function_id(&self, name: &str) -> Result<FunId, TaskError> {
        self.function_index
            .get(name)
            .copied()
            .ok_or_else(|| TaskError::UnknownFunction(name.to_string()))
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn is_static(&self, fun: FunId) -> bool {
        self.statics[fun]
    }

    // ---------- variables ----------

    pub fn vars(&self) -> &[GroundVar] {
        &self.vars
    }

    pub fn var(&self, id: VarId) -> &GroundVar {
        &self.vars[id]
    }

    pub fn var_id(&self, fun: FunId, params: &[ObjId]) -> Option<VarId> {
        self.var_index.get(&(fun, params.to_vec())).copied()
    }

    /// Returns the variable, creating it if needed. Once the initial state is seeded, a new boolean
    /// variable is false at level 0 under negation by failure.
    pub(crate) fn var_or_create(&mut self, fun: FunId, params: &[ObjId]) -> VarId {
        let seed = self.seeded;
        self.create_var(fun, params, seed)
    }

    pub(crate) fn create_var(&mut self, fun: FunId, params: &[ObjId], seed_false: bool) -> VarId {
        if let Some(v) = self.var_id(fun, params) {
            return v;
        }
        let id = VarId::from(self.vars.len());
        let function = &self.functions[fun];
        let boolean = function.kind == FunctionKind::Boolean;
        self.vars.push(GroundVar {
            function: fun,
            params: params.to_vec(),
            domain: function.domain.clone(),
            init_true: None,
            init_false: Vec::new(),
            init_number: None,
            numeric: function.kind == FunctionKind::Numeric,
        });
        self.var_index.insert((fun, params.to_vec()), id);
        self.values_of_var.push(Vec::new());
        if seed_false && boolean {
            self.assume_false(id);
        }
        id
    }

    /// Reaches the initial values at level 0. Under negation by failure, boolean variables without
    /// a true initial value are false.
    pub(crate) fn seed_initial_state(&mut self) {
        for i in 0..self.vars.len() {
            let var = VarId::from(i);
            match self.vars[var].init_true {
                Some(value) => {
                    self.add_value(Fact::new(var, value), 0, true);
                }
                None if self.is_boolean(var) => self.assume_false(var),
                None => {}
            }
        }
        self.seeded = true;
    }

    fn assume_false(&mut self, var: VarId) {
        if self.negation != NegationPolicy::Failure {
            return;
        }
        let fact = Fact::new(var, Objects::FALSE);
        if self.value_id(fact).is_none() {
            self.add_value(fact, 0, true);
            if let Some(v) = self.value_id(fact) {
                self.values[v].implicit = true;
            }
        }
    }

    pub fn is_boolean(&self, var: VarId) -> bool {
        self.functions[self.vars[var].function].kind == FunctionKind::Boolean
    }

    /// Records an initial true value. A second true value revokes the previous one.
    pub(crate) fn set_initial(&mut self, var: VarId, value: ObjId) {
        let label = self.var_label(var);
        let v = &mut self.vars[var];
        if let Some(previous) = v.init_true {
            if previous != value {
                tracing::warn!("{label}: initial value {value} replaces {previous}");
            }
        }
        v.init_false.retain(|&f| f != value);
        v.init_true = Some(value);
    }

    /// Records an initial false value. Denying the current true value revokes it.
    pub(crate) fn set_initial_false(&mut self, var: VarId, value: ObjId) {
        let label = self.var_label(var);
        let v = &mut self.vars[var];
        if v.init_true == Some(value) {
            tracing::warn!("{label}: initial value {value} is both asserted and denied, revoking it");
            v.init_true = None;
        }
        if !v.init_false.contains(&value) {
            v.init_false.push(value);
        }
    }

    pub(crate) fn set_initial_number(&mut self, var: VarId, value: f64) {
        self.vars[var].init_number = Some(value);
    }

    // ---------- values ----------

    pub fn values(&self) -> &[GroundValue] {
        &self.values
    }

    pub fn value(&self, id: ValueId) -> &GroundValue {
        &self.values[id]
    }

    pub fn value_id(&self, fact: Fact) -> Option<ValueId> {
        self.value_index.get(&fact).copied()
    }

    pub fn values_of_var(&self, var: VarId) -> &[ValueId] {
        &self.values_of_var[var]
    }

    pub fn values_of_function(&self, fun: FunId) -> &[ValueId] {
        &self.values_of_function[fun]
    }

    pub fn is_reachable(&self, fact: Fact) -> bool {
        self.value_id(fact).is_some()
    }

    /// Earliest level at which `agent` can establish the fact.
    pub fn min_time(&self, fact: Fact, agent: usize) -> u32 {
        match self.value_id(fact) {
            Some(v) => self.values[v].time_for(agent),
            None => UNREACHED,
        }
    }

    /// Earliest level at which any agent can establish the fact.
    pub fn time(&self, fact: Fact) -> u32 {
        self.value_id(fact).map(|v| self.values[v].time()).unwrap_or(UNREACHED)
    }

    /// Records that `agent` can establish `fact` at level `time`.
    /// Returns true if the value is new or its level for this agent decreased.
    pub(crate) fn reach(&mut self, fact: Fact, agent: usize, time: u32, initial: bool) -> bool {
        match self.value_index.get(&fact) {
            Some(&id) => {
                let value = &mut self.values[id];
                value.initial |= initial;
                if time < value.min_time[agent] {
                    value.min_time[agent] = time;
                    true
                } else {
                    false
                }
            }
            None => {
                let id = ValueId::from(self.values.len());
                let mut min_time: SmallVec<[u32; 4]> = SmallVec::from_elem(UNREACHED, self.agents.len());
                min_time[agent] = time;
                self.values.push(GroundValue {
                    fact,
                    min_time,
                    initial,
                    implicit: false,
                });
                self.value_index.insert(fact, id);
                self.values_of_var[fact.var].push(id);
                let fun = self.vars[fact.var].function;
                self.values_of_function[fun].push(id);
                self.achievers.push(Vec::new());
                true
            }
        }
    }

    fn add_value(&mut self, fact: Fact, time: u32, initial: bool) -> bool {
        let me = self.me;
        self.reach(fact, me, time, initial)
    }

    /// Level at which a condition can first hold, or `None` if it cannot be satisfied in the disRPG.
    pub fn condition_time(&self, cond: &Condition) -> Option<u32> {
        match cond.kind {
            CondKind::Equal => match self.value_id(cond.fact) {
                Some(v) => Some(self.values[v].time()),
                None => None,
            },
            CondKind::Distinct => {
                let var = &self.vars[cond.fact.var];
                let assumed_false = self.negation == NegationPolicy::Failure
                    && var.init_true.is_none()
                    && self.functions[var.function].kind == FunctionKind::Boolean;
                if var.init_false.contains(&cond.fact.value) || assumed_false {
                    return Some(0);
                }
                self.values_of_var[cond.fact.var]
                    .iter()
                    .map(|&v| &self.values[v])
                    .filter(|v| v.fact.value != cond.fact.value)
                    .map(|v| v.time())
                    .min()
            }
        }
    }

    // ---------- actions ----------

    pub fn actions(&self) -> &[GroundAction] {
        &self.actions
    }

    pub fn action(&self, id: ActionId) -> &GroundAction {
        &self.actions[id]
    }

    pub fn action_by_key(&self, key: &str) -> Option<ActionId> {
        self.action_index.get(key).copied()
    }

    pub(crate) fn has_action_key(&self, key: &str) -> bool {
        self.action_index.contains_key(key)
    }

    pub(crate) fn push_action(&mut self, key: String, mut action: GroundAction) -> ActionId {
        let id = ActionId::from(self.actions.len());
        action.id = id;
        for eff in &action.effects {
            if let Some(v) = self.value_id(*eff) {
                self.achievers[v].push(id);
            }
        }
        self.action_index.insert(key, id);
        self.actions.push(action);
        id
    }

    pub(crate) fn actions_mut(&mut self) -> &mut [GroundAction] {
        &mut self.actions
    }

    /// Rebuilds the achievers of every value. Needed once effects of earlier actions became values.
    pub(crate) fn index_achievers(&mut self) {
        let mut achievers = vec![Vec::new(); self.values.len()];
        for a in &self.actions {
            for eff in &a.effects {
                if let Some(v) = self.value_id(*eff) {
                    achievers[v].push(a.id);
                }
            }
        }
        self.achievers = achievers;
    }

    /// Local actions having the value among their effects.
    pub fn achievers(&self, value: ValueId) -> &[ActionId] {
        &self.achievers[value]
    }

    /// True if the two actions cannot be executed concurrently: they assign different values to
    /// a variable, one invalidates a precondition of the other, or one of them had contradictory
    /// effects on a variable the other touches.
    pub fn is_mutex(&self, a: ActionId, b: ActionId) -> bool {
        let (a, b) = (&self.actions[a], &self.actions[b]);
        let conflicting_effects = a
            .effects
            .iter()
            .any(|e1| b.effects.iter().any(|e2| e1.var == e2.var && e1.value != e2.value));
        let interference = |x: &GroundAction, y: &GroundAction| {
            x.effects
                .iter()
                .any(|e| y.preconditions.iter().any(|c| c.is_violated_by(*e)))
        };
        let mutex_var = |x: &GroundAction, y: &GroundAction| x.mutex_vars.iter().any(|&v| y.touches_var(v));
        let numeric = |x: &GroundAction, y: &GroundAction| {
            let reads = y.numeric_reads();
            x.numeric_effects
                .iter()
                .any(|e| reads.contains(&e.var) && e.kind == crate::task::NumericEffectKind::Assign)
        };
        conflicting_effects
            || interference(a, b)
            || interference(b, a)
            || mutex_var(a, b)
            || mutex_var(b, a)
            || numeric(a, b)
            || numeric(b, a)
    }

    // ---------- initial state ----------

    /// Initial value of every variable that has one, under the task's negation policy.
    pub fn initial_state(&self) -> Vec<Option<ObjId>> {
        self.vars
            .iter()
            .map(|v| match v.init_true {
                Some(o) => Some(o),
                None if !v.numeric
                    && self.negation == NegationPolicy::Failure
                    && self.functions[v.function].kind == FunctionKind::Boolean =>
                {
                    Some(Objects::FALSE)
                }
                None => None,
            })
            .collect()
    }

    pub fn initial_numbers(&self) -> Vec<Option<f64>> {
        self.vars.iter().map(|v| v.init_number).collect()
    }

    // ---------- symbolic forms ----------

    pub fn var_label(&self, var: VarId) -> String {
        let v = &self.vars[var];
        let name = &self.functions[v.function].name;
        if v.params.is_empty() {
            format!("({name})")
        } else {
            let params = v.params.iter().map(|&o| self.registry.objects.name(o)).join(" ");
            format!("({name} {params})")
        }
    }

    pub fn fact_label(&self, fact: Fact) -> String {
        if self.is_boolean(fact.var) {
            if fact.value == Objects::TRUE {
                self.var_label(fact.var)
            } else {
                format!("(not {})", self.var_label(fact.var))
            }
        } else {
            format!(
                "(= {} {})",
                self.var_label(fact.var),
                self.registry.objects.name(fact.value)
            )
        }
    }

    pub fn condition_label(&self, cond: &Condition) -> String {
        match cond.kind {
            CondKind::Equal => self.fact_label(cond.fact),
            CondKind::Distinct => format!("(not {})", self.fact_label(cond.fact)),
        }
    }

    pub fn symbolic(&self, fact: Fact) -> SymbolicFact {
        let v = &self.vars[fact.var];
        SymbolicFact {
            function: self.functions[v.function].name.clone(),
            params: v
                .params
                .iter()
                .map(|&o| self.registry.objects.name(o).to_string())
                .collect(),
            value: self.registry.objects.name(fact.value).to_string(),
        }
    }

    /// Local form of a symbolic fact, if its function, objects and variable are known locally.
    pub fn resolve(&self, fact: &SymbolicFact) -> Option<Fact> {
        let fun = *self.function_index.get(&fact.function)?;
        let params: Option<Vec<ObjId>> = fact.params.iter().map(|p| self.registry.objects.id(p)).collect();
        let var = self.var_id(fun, &params?)?;
        let value = self.registry.objects.id(&fact.value)?;
        Some(Fact::new(var, value))
    }

    /// True if the fact may be disclosed to agent `dest`.
    pub fn can_share(&self, fact: Fact, dest: &str) -> bool {
        let v = &self.vars[fact.var];
        let function = &self.functions[v.function];
        self.sharing
            .can_share(&self.registry, function, &v.params, fact.value, dest)
    }

    pub(crate) fn type_ids(&self, names: &[String]) -> Result<Vec<TypeId>, TaskError> {
        names.iter().map(|n| self.registry.types.get(n)).collect()
    }

    pub fn boolean_domain() -> Vec<TypeId> {
        vec![TypeRegistry::BOOLEAN]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_semantics() {
        let var = VarId::from(0usize);
        let a = ObjId::from(5usize);
        let b = ObjId::from(6usize);
        let eq = Condition::equal(Fact::new(var, a));
        let ne = Condition::distinct(Fact::new(var, a));
        assert!(eq.is_supported_by(Fact::new(var, a)));
        assert!(eq.is_violated_by(Fact::new(var, b)));
        assert!(ne.is_supported_by(Fact::new(var, b)));
        assert!(ne.is_violated_by(Fact::new(var, a)));
        assert!(!eq.is_violated_by(Fact::new(VarId::from(1usize), b)));
        assert!(eq.holds_with(Some(a)));
        assert!(!ne.holds_with(None));
    }

    #[test]
    fn policies_parse() {
        assert_eq!("unknown".parse::<NegationPolicy>(), Ok(NegationPolicy::Unknown));
        assert_eq!("both".parse::<SameObjects>(), Ok(SameObjects::Both));
        assert!(SameObjects::Both.forbids_repeated_effect_params());
        assert!(!SameObjects::Effects.forbids_precondition_equals_effect());
        assert!("sometimes".parse::<NegationPolicy>().is_err());
    }
}
