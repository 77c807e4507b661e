use std::collections::BTreeSet;
use std::iter::once;

use hashbrown::{HashMap, HashSet};
use itertools::Itertools;

use super::distributed::SharedValue;
use super::*;
use crate::params::PlannerConfig;
use crate::task::{self, Comparator, Literal, NumericEffectKind, NumericExpr, OperatorDecl, Task};

/// Argument of a lifted literal: an operator parameter or a constant.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Term {
    Param(usize),
    Obj(ObjId),
}

impl Term {
    fn ground(self, binding: &[ObjId]) -> ObjId {
        match self {
            Term::Param(i) => binding[i],
            Term::Obj(o) => o,
        }
    }
}

fn ground_terms(terms: &[Term], binding: &[ObjId]) -> Vec<ObjId> {
    terms.iter().map(|t| t.ground(binding)).collect()
}

#[derive(Clone, Debug)]
struct LiftedCondition {
    fun: FunId,
    args: Vec<Term>,
    value: Term,
    kind: CondKind,
    is_static: bool,
}

#[derive(Clone, Debug)]
struct LiftedEffect {
    fun: FunId,
    args: Vec<Term>,
    value: Term,
}

#[derive(Clone, Debug)]
enum LiftedExpr {
    Const(f64),
    Fluent(FunId, Vec<Term>),
    Bin(ArithOp, Box<LiftedExpr>, Box<LiftedExpr>),
}

#[derive(Clone, Debug)]
struct LiftedNumericCondition {
    comparator: Comparator,
    lhs: LiftedExpr,
    rhs: LiftedExpr,
}

#[derive(Clone, Debug)]
struct LiftedNumericEffect {
    kind: NumericEffectKind,
    fun: FunId,
    args: Vec<Term>,
    expr: LiftedExpr,
}

/// An operator schema compiled against the function and object tables.
#[derive(Clone, Debug)]
struct LiftedOperator {
    name: String,
    param_types: Vec<Vec<TypeId>>,
    /// Conditions matched against reached values to bind parameters.
    positives: Vec<LiftedCondition>,
    /// `var != v` and `var = false` conditions, only checked once every parameter is bound.
    negatives: Vec<LiftedCondition>,
    effects: Vec<LiftedEffect>,
    numeric_preconditions: Vec<LiftedNumericCondition>,
    numeric_effects: Vec<LiftedNumericEffect>,
}

/// Partial assignment of operator parameters. Frames are cloned, never shared.
type Binding = Vec<Option<ObjId>>;

/// Resolves the names appearing in a literal or expression.
struct Scope<'a> {
    task: &'a GroundedTask,
    operator: &'a str,
    params: &'a [String],
}

impl Scope<'_> {
    fn term(&self, t: &str) -> Result<Term, TaskError> {
        if task::is_parameter(t) {
            self.params
                .iter()
                .position(|p| p == t)
                .map(Term::Param)
                .ok_or_else(|| TaskError::UnboundParameter {
                    operator: self.operator.to_string(),
                    param: t.to_string(),
                })
        } else {
            Ok(Term::Obj(self.task.registry.object(t)?))
        }
    }

    fn literal(&self, lit: &Literal) -> Result<LiftedCondition, TaskError> {
        let fun = self.task.function_id(&lit.function)?;
        let f = self.task.function(fun);
        if f.kind == FunctionKind::Numeric {
            return Err(TaskError::NumericInLiteral(lit.function.clone()));
        }
        let mut args = lit.params.iter().map(|p| self.term(p)).collect::<Result<Vec<_>, _>>()?;
        let value_name = lit.value.as_deref();
        let missing_value = || TaskError::Invalid(format!("`{}` requires a value in `{}`", lit.function, self.operator));
        let (value, kind) = if f.multi {
            args.push(self.term(value_name.ok_or_else(missing_value)?)?);
            let v = if lit.negated { Objects::FALSE } else { Objects::TRUE };
            (Term::Obj(v), CondKind::Equal)
        } else if f.kind == FunctionKind::Boolean {
            let v = match value_name {
                None => Term::Obj(Objects::TRUE),
                Some(v) => self.term(v)?,
            };
            match (lit.negated, v) {
                (false, v) => (v, CondKind::Equal),
                (true, Term::Obj(Objects::TRUE)) => (Term::Obj(Objects::FALSE), CondKind::Equal),
                (true, Term::Obj(Objects::FALSE)) => (Term::Obj(Objects::TRUE), CondKind::Equal),
                (true, v) => (v, CondKind::Distinct),
            }
        } else {
            let v = self.term(value_name.ok_or_else(missing_value)?)?;
            (v, if lit.negated { CondKind::Distinct } else { CondKind::Equal })
        };
        if args.len() != f.params.len() {
            return Err(TaskError::Arity {
                function: lit.function.clone(),
                expected: f.params.len(),
                got: args.len(),
            });
        }
        Ok(LiftedCondition {
            fun,
            args,
            value,
            kind,
            is_static: self.task.is_static(fun),
        })
    }

    fn numeric_fluent(&self, function: &str, params: &[String]) -> Result<(FunId, Vec<Term>), TaskError> {
        let fun = self.task.function_id(function)?;
        let f = self.task.function(fun);
        if f.kind != FunctionKind::Numeric {
            return Err(TaskError::NotNumeric(function.to_string()));
        }
        if params.len() != f.params.len() {
            return Err(TaskError::Arity {
                function: function.to_string(),
                expected: f.params.len(),
                got: params.len(),
            });
        }
        let args = params.iter().map(|p| self.term(p)).collect::<Result<Vec<_>, _>>()?;
        Ok((fun, args))
    }

    fn expr(&self, e: &NumericExpr) -> Result<LiftedExpr, TaskError> {
        let bin = |op, a: &NumericExpr, b: &NumericExpr| -> Result<LiftedExpr, TaskError> {
            Ok(LiftedExpr::Bin(op, Box::new(self.expr(a)?), Box::new(self.expr(b)?)))
        };
        match e {
            NumericExpr::Number(x) => Ok(LiftedExpr::Const(*x)),
            NumericExpr::Fluent { function, params } => {
                let (fun, args) = self.numeric_fluent(function, params)?;
                Ok(LiftedExpr::Fluent(fun, args))
            }
            NumericExpr::Add(a, b) => bin(ArithOp::Add, a, b),
            NumericExpr::Sub(a, b) => bin(ArithOp::Sub, a, b),
            NumericExpr::Mul(a, b) => bin(ArithOp::Mul, a, b),
            NumericExpr::Div(a, b) => bin(ArithOp::Div, a, b),
        }
    }

    fn operator(&self, op: &OperatorDecl) -> Result<LiftedOperator, TaskError> {
        let mut param_types = Vec::with_capacity(op.params.len());
        for p in &op.params {
            let types = self.task.type_ids(&p.types)?;
            param_types.push(if types.is_empty() { vec![TypeRegistry::OBJECT] } else { types });
        }
        let (mut positives, mut negatives) = (Vec::new(), Vec::new());
        for lit in &op.preconditions {
            let c = self.literal(lit)?;
            let is_false = self.task.function(c.fun).kind == FunctionKind::Boolean && c.value == Term::Obj(Objects::FALSE);
            if c.kind == CondKind::Distinct || is_false {
                negatives.push(c);
            } else {
                positives.push(c);
            }
        }
        // statics first: they bind parameters against a fixed set of values
        positives.sort_by_key(|c| !c.is_static);
        let mut effects = Vec::with_capacity(op.effects.len());
        for lit in &op.effects {
            let c = self.literal(lit)?;
            if c.kind == CondKind::Distinct {
                return Err(TaskError::Invalid(format!(
                    "negated effect on object fluent `{}` in `{}`",
                    lit.function, op.name
                )));
            }
            effects.push(LiftedEffect {
                fun: c.fun,
                args: c.args,
                value: c.value,
            });
        }
        let numeric_preconditions = op
            .numeric_preconditions
            .iter()
            .map(|c| {
                Ok(LiftedNumericCondition {
                    comparator: c.comparator,
                    lhs: self.expr(&c.lhs)?,
                    rhs: self.expr(&c.rhs)?,
                })
            })
            .collect::<Result<Vec<_>, TaskError>>()?;
        let numeric_effects = op
            .numeric_effects
            .iter()
            .map(|e| {
                let (fun, args) = self.numeric_fluent(&e.function, &e.params)?;
                Ok(LiftedNumericEffect {
                    kind: e.kind,
                    fun,
                    args,
                    expr: self.expr(&e.expr)?,
                })
            })
            .collect::<Result<Vec<_>, TaskError>>()?;
        Ok(LiftedOperator {
            name: op.name.clone(),
            param_types,
            positives,
            negatives,
            effects,
            numeric_preconditions,
            numeric_effects,
        })
    }
}

fn var_label(task: &GroundedTask, fun: FunId, args: &[ObjId]) -> String {
    let name = &task.function(fun).name;
    let args = args.iter().map(|&o| task.registry.objects.name(o)).join(" ");
    format!("({name} {args})")
}

/// Variable read or written by a ground action. Variables are created on demand only when every
/// argument has a type accepted by the function, anything else is a modelling error.
fn action_var(task: &mut GroundedTask, fun: FunId, args: &[ObjId]) -> Result<VarId, TaskError> {
    if let Some(var) = task.var_id(fun, args) {
        return Ok(var);
    }
    let function = task.function(fun);
    let typed = function.params.len() == args.len()
        && args
            .iter()
            .zip(&function.params)
            .all(|(&o, types)| task.registry.compatible_any(o, types));
    if !typed {
        return Err(TaskError::UnknownVariable(var_label(task, fun, args)));
    }
    Ok(task.var_or_create(fun, args))
}

/// Grounds an expression. A fluent without ground variable is a modelling error unless `create` is set.
fn ground_expr(task: &mut GroundedTask, e: &LiftedExpr, binding: &[ObjId], create: bool) -> Result<NumExpr, TaskError> {
    Ok(match e {
        LiftedExpr::Const(x) => NumExpr::Const(*x),
        LiftedExpr::Fluent(fun, args) => {
            let args = ground_terms(args, binding);
            match task.var_id(*fun, &args) {
                Some(v) => NumExpr::Var(v),
                None if create => NumExpr::Var(task.var_or_create(*fun, &args)),
                None => return Err(TaskError::UnknownVariable(var_label(task, *fun, &args))),
            }
        }
        LiftedExpr::Bin(op, a, b) => NumExpr::Bin(
            *op,
            Box::new(ground_expr(task, a, binding, create)?),
            Box::new(ground_expr(task, b, binding, create)?),
        ),
    })
}

/// Builds the ground variables and actions of one agent by a reachability fixed point over its
/// operators, starting from its initial state and from the values reported by peers.
pub struct Grounder {
    task: GroundedTask,
    operators: Vec<LiftedOperator>,
    same_objects: SameObjects,
    /// Keys of bindings discarded by the same-objects policy.
    rejected: HashSet<String>,
    /// Last level sent to each peer for each value.
    sent: HashMap<(usize, ValueId), u32>,
}

impl Grounder {
    /// Prepares grounding for agent `agents[me]`. `statics` are the functions every agent agreed
    /// are never modified.
    pub fn new(
        task: &Task,
        agents: Vec<String>,
        me: usize,
        statics: &BTreeSet<String>,
        config: &PlannerConfig,
    ) -> Result<Grounder, TaskError> {
        let registry = Registry::from_task(task)?;
        let mut g = GroundedTask::empty(agents, me, registry, config.negation);
        g.sharing = shared::SharingPolicy::new(task.shared_data.clone());

        for decl in &task.functions {
            let mut params = Vec::with_capacity(decl.params.len() + 1);
            for p in &decl.params {
                let types = g.type_ids(&p.types)?;
                params.push(if types.is_empty() { vec![TypeRegistry::OBJECT] } else { types });
            }
            let domain = g.type_ids(&decl.domain)?;
            let function = if decl.is_numeric() {
                Function {
                    name: decl.name.clone(),
                    params,
                    domain,
                    kind: FunctionKind::Numeric,
                    multi: false,
                }
            } else if decl.multi {
                params.push(domain);
                Function {
                    name: decl.name.clone(),
                    params,
                    domain: GroundedTask::boolean_domain(),
                    kind: FunctionKind::Boolean,
                    multi: true,
                }
            } else {
                let kind = if decl.is_boolean() { FunctionKind::Boolean } else { FunctionKind::Object };
                Function {
                    name: decl.name.clone(),
                    params,
                    domain,
                    kind,
                    multi: false,
                }
            };
            g.add_function(function, statics.contains(&decl.name));
        }

        let no_params: [String; 0] = [];
        let init_scope = |g: &GroundedTask| -> Result<Vec<(LiftedCondition, Vec<ObjId>, ObjId)>, TaskError> {
            let scope = Scope {
                task: g,
                operator: "init",
                params: &no_params,
            };
            task.init
                .iter()
                .map(|lit| {
                    let c = scope.literal(lit)?;
                    let args = ground_terms(&c.args, &[]);
                    let value = c.value.ground(&[]);
                    Ok((c, args, value))
                })
                .collect()
        };
        for (c, args, value) in init_scope(&g)? {
            let var = g.create_var(c.fun, &args, false);
            match c.kind {
                CondKind::Equal => g.set_initial(var, value),
                CondKind::Distinct => g.set_initial_false(var, value),
            }
        }
        for init in &task.numeric_init {
            let fun = g.function_id(&init.function)?;
            if g.function(fun).kind != FunctionKind::Numeric {
                return Err(TaskError::NotNumeric(init.function.clone()));
            }
            let args = init
                .params
                .iter()
                .map(|p| g.registry.object(p))
                .collect::<Result<Vec<_>, _>>()?;
            let var = g.create_var(fun, &args, false);
            g.set_initial_number(var, init.value);
        }
        g.seed_initial_state();

        let (goals, preferences, operators, numeric_goals, metric) = {
            let scope = Scope {
                task: &g,
                operator: "goal",
                params: &no_params,
            };
            let goals = task.goals.iter().map(|l| scope.literal(l)).collect::<Result<Vec<_>, _>>()?;
            let preferences = task
                .preferences
                .iter()
                .map(|p| Ok((p.name.clone(), scope.literal(&p.goal)?)))
                .collect::<Result<Vec<_>, TaskError>>()?;
            let numeric_goals = task
                .numeric_goals
                .iter()
                .map(|c| {
                    Ok(LiftedNumericCondition {
                        comparator: c.comparator,
                        lhs: scope.expr(&c.lhs)?,
                        rhs: scope.expr(&c.rhs)?,
                    })
                })
                .collect::<Result<Vec<_>, TaskError>>()?;
            let metric = match &task.metric {
                Some(m) => Some((m.direction, scope.expr(&m.expr)?)),
                None => None,
            };
            let mut operators = Vec::with_capacity(task.operators.len());
            for op in &task.operators {
                let param_names = op.params.iter().map(|p| p.name.clone()).collect_vec();
                let scope = Scope {
                    task: &g,
                    operator: &op.name,
                    params: &param_names,
                };
                operators.push(scope.operator(op)?);
            }
            (goals, preferences, operators, numeric_goals, metric)
        };
        let as_condition = |g: &mut GroundedTask, c: &LiftedCondition| {
            let var = g.var_or_create(c.fun, &ground_terms(&c.args, &[]));
            let fact = Fact::new(var, c.value.ground(&[]));
            match c.kind {
                CondKind::Equal => Condition::equal(fact),
                CondKind::Distinct => Condition::distinct(fact),
            }
        };
        for c in &goals {
            let cond = as_condition(&mut g, c);
            g.goals.push(cond);
        }
        for (name, c) in &preferences {
            let cond = as_condition(&mut g, c);
            g.preferences.push((name.clone(), cond));
        }
        for c in &numeric_goals {
            let cond = NumericCondition {
                comparator: c.comparator,
                lhs: ground_expr(&mut g, &c.lhs, &[], false)?,
                rhs: ground_expr(&mut g, &c.rhs, &[], false)?,
            };
            g.numeric_goals.push(cond);
        }
        if let Some((direction, e)) = metric {
            g.metric = Some((direction, ground_expr(&mut g, &e, &[], true)?));
        }

        Ok(Grounder {
            task: g,
            operators,
            same_objects: config.same_objects,
            rejected: HashSet::new(),
            sent: HashMap::new(),
        })
    }

    /// Grounder of an agent planning alone, with its locally computed static functions.
    pub fn single(task: &Task, agent: &str, config: &PlannerConfig) -> Result<Grounder, TaskError> {
        let statics = statics::local_static_functions(task);
        Grounder::new(task, vec![agent.to_string()], 0, &statics, config)
    }

    pub fn task(&self) -> &GroundedTask {
        &self.task
    }

    /// Instantiates operators until no new ground action appears, then recomputes the levels of
    /// the relaxed planning graph. Returns the number of new actions.
    pub fn ground(&mut self) -> Result<usize, TaskError> {
        let _span = tracing::span!(tracing::Level::DEBUG, "GROUNDING").entered();
        let mut total = 0;
        loop {
            let mut added = 0;
            for i in 0..self.operators.len() {
                let bindings = self.bindings(&self.operators[i]);
                for binding in bindings {
                    if Self::instantiate(
                        &mut self.task,
                        &mut self.rejected,
                        &self.operators[i],
                        &binding,
                        self.same_objects,
                    )? {
                        added += 1;
                    }
                }
            }
            tracing::trace!("fixpoint iteration: {added} new actions");
            if added == 0 {
                break;
            }
            total += added;
        }
        self.propagate_levels();
        tracing::debug!(
            "{} actions, {} variables, {} values ({} new actions)",
            self.task.actions().len(),
            self.task.vars().len(),
            self.task.values().len(),
            total
        );
        Ok(total)
    }

    /// Complete bindings of the operator whose preconditions hold in the current graph.
    fn bindings(&self, op: &LiftedOperator) -> Vec<Vec<ObjId>> {
        let mut out = Vec::new();
        self.extend(op, &op.positives, vec![None; op.param_types.len()], &mut out);
        out
    }

    fn extend(&self, op: &LiftedOperator, conds: &[LiftedCondition], binding: Binding, out: &mut Vec<Vec<ObjId>>) {
        let Some((cond, rest)) = conds.split_first() else {
            self.complete(op, binding, out);
            return;
        };
        for &v in self.task.values_of_function(cond.fun) {
            let fact = self.task.value(v).fact;
            let args = &self.task.var(fact.var).params;
            if let Some(frame) = self.unify(op, cond, args, fact.value, &binding) {
                self.extend(op, rest, frame, out);
            }
        }
    }

    fn unify(
        &self,
        op: &LiftedOperator,
        cond: &LiftedCondition,
        args: &[ObjId],
        value: ObjId,
        binding: &Binding,
    ) -> Option<Binding> {
        let mut frame = binding.clone();
        for (term, &obj) in cond.args.iter().chain(once(&cond.value)).zip(args.iter().chain(once(&value))) {
            match *term {
                Term::Obj(o) if o != obj => return None,
                Term::Obj(_) => {}
                Term::Param(i) => match frame[i] {
                    Some(bound) if bound != obj => return None,
                    Some(_) => {}
                    None => {
                        if !self.task.registry.compatible_any(obj, &op.param_types[i]) {
                            return None;
                        }
                        frame[i] = Some(obj);
                    }
                },
            }
        }
        Some(frame)
    }

    /// Enumerates the objects of the parameters left free by the positive preconditions.
    fn complete(&self, op: &LiftedOperator, binding: Binding, out: &mut Vec<Vec<ObjId>>) {
        match binding.iter().position(Option::is_none) {
            Some(i) => {
                for o in self.task.registry.objects_of(&op.param_types[i]) {
                    let mut frame = binding.clone();
                    frame[i] = Some(o);
                    self.complete(op, frame, out);
                }
            }
            None => {
                let params: Vec<ObjId> = binding.into_iter().flatten().collect();
                if op.negatives.iter().all(|c| self.negative_holds(c, &params)) {
                    out.push(params);
                }
            }
        }
    }

    fn negative_holds(&self, c: &LiftedCondition, params: &[ObjId]) -> bool {
        let args = ground_terms(&c.args, params);
        let value = c.value.ground(params);
        match self.task.var_id(c.fun, &args) {
            Some(var) => {
                let fact = Fact::new(var, value);
                match c.kind {
                    CondKind::Equal => self.task.is_reachable(fact),
                    CondKind::Distinct => self.task.condition_time(&Condition::distinct(fact)).is_some(),
                }
            }
            None => {
                self.task.negation == NegationPolicy::Failure
                    && self.task.function(c.fun).kind == FunctionKind::Boolean
            }
        }
    }

    /// Builds the ground action of a binding. Returns false if it already exists or is discarded.
    fn instantiate(
        task: &mut GroundedTask,
        rejected: &mut HashSet<String>,
        op: &LiftedOperator,
        params: &[ObjId],
        same_objects: SameObjects,
    ) -> Result<bool, TaskError> {
        let names = params.iter().map(|&o| task.registry.objects.name(o)).collect_vec();
        let key = once(op.name.as_str()).chain(names.iter().copied()).join(" ");
        if task.has_action_key(&key) || rejected.contains(&key) {
            return Ok(false);
        }

        let mut preconditions: Vec<Condition> = Vec::new();
        for c in op.positives.iter().chain(&op.negatives) {
            if c.is_static {
                continue;
            }
            let var = action_var(task, c.fun, &ground_terms(&c.args, params))?;
            let fact = Fact::new(var, c.value.ground(params));
            let cond = match c.kind {
                CondKind::Equal => Condition::equal(fact),
                CondKind::Distinct => Condition::distinct(fact),
            };
            if !preconditions.contains(&cond) {
                preconditions.push(cond);
            }
        }

        let mut effects: Vec<Effect> = Vec::new();
        let mut mutex_vars = Vec::new();
        for e in &op.effects {
            let var = action_var(task, e.fun, &ground_terms(&e.args, params))?;
            let fact = Fact::new(var, e.value.ground(params));
            match effects.iter().position(|f| f.var == var) {
                None => effects.push(fact),
                Some(i) if effects[i].value == fact.value => {}
                Some(i) => {
                    tracing::warn!("({key}): contradictory effects on {}", task.var_label(var));
                    if task.is_boolean(var) && fact.value == Objects::TRUE {
                        effects[i] = fact;
                    }
                    if !mutex_vars.contains(&var) {
                        mutex_vars.push(var);
                    }
                }
            }
        }

        if same_objects.forbids_repeated_effect_params() {
            let repeats = effects.iter().any(|e| {
                let var = task.var(e.var);
                let value = if task.is_boolean(e.var) { None } else { Some(e.value) };
                !var.params.iter().copied().chain(value).all_unique()
            });
            if repeats {
                tracing::trace!("({key}) discarded: effect repeats an object");
                rejected.insert(key);
                return Ok(false);
            }
        }
        if same_objects.forbids_precondition_equals_effect()
            && effects.iter().any(|e| preconditions.contains(&Condition::equal(*e)))
        {
            tracing::trace!("({key}) discarded: effect equals a precondition");
            rejected.insert(key);
            return Ok(false);
        }

        let mut numeric_preconditions = Vec::with_capacity(op.numeric_preconditions.len());
        for c in &op.numeric_preconditions {
            numeric_preconditions.push(NumericCondition {
                comparator: c.comparator,
                lhs: ground_expr(task, &c.lhs, params, false)?,
                rhs: ground_expr(task, &c.rhs, params, false)?,
            });
        }
        let mut numeric_effects = Vec::with_capacity(op.numeric_effects.len());
        for e in &op.numeric_effects {
            let args = ground_terms(&e.args, params);
            let var = task
                .var_id(e.fun, &args)
                .ok_or_else(|| TaskError::UnknownVariable(var_label(task, e.fun, &args)))?;
            numeric_effects.push(NumericEffect {
                kind: e.kind,
                var,
                expr: ground_expr(task, &e.expr, params, false)?,
            });
        }

        let time = preconditions
            .iter()
            .filter_map(|c| task.condition_time(c))
            .max()
            .unwrap_or(0);
        let me = task.me;
        for e in &effects {
            task.reach(*e, me, time + 1, false);
        }
        let action = GroundAction {
            id: ActionId::from(0usize),
            name: op.name.clone(),
            params: params.to_vec(),
            preconditions,
            effects,
            numeric_preconditions,
            numeric_effects,
            min_time: time,
            mutex_vars,
            label: format!("({key})").into(),
        };
        tracing::trace!("new action {}", action.label);
        task.push_action(key, action);
        Ok(true)
    }

    /// Lowers the level of every value to the earliest level at which one of its achievers can be
    /// applied, taking values reported by peers into account (h-max relaxation).
    fn propagate_levels(&mut self) {
        let me = self.task.me;
        loop {
            let mut changed = false;
            for i in 0..self.task.actions().len() {
                let action = &self.task.actions()[i];
                let time = action
                    .preconditions
                    .iter()
                    .map(|c| self.task.condition_time(c).unwrap_or(UNREACHED))
                    .max()
                    .unwrap_or(0);
                if time == UNREACHED {
                    continue;
                }
                let effects = action.effects.clone();
                self.task.actions_mut()[i].min_time = time;
                for e in effects {
                    changed |= self.task.reach(e, me, time + 1, false);
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// Values of this agent that were never sent to `peer`, or that it now reaches at an
    /// earlier level, restricted to those it may disclose to `peer`.
    pub fn shareable_updates(&mut self, peer: usize) -> Vec<SharedValue> {
        let me = self.task.me;
        let dest = self.task.agents[peer].clone();
        let mut updates = Vec::new();
        for (i, v) in self.task.values().iter().enumerate() {
            let id = ValueId::from(i);
            let level = v.time_for(me);
            if level == UNREACHED || v.implicit {
                continue;
            }
            if self.sent.get(&(peer, id)).is_some_and(|&sent| sent <= level) {
                continue;
            }
            if !self.task.can_share(v.fact, &dest) {
                continue;
            }
            let var = self.task.var(v.fact.var);
            let objects = var
                .params
                .iter()
                .copied()
                .chain(once(v.fact.value))
                .filter(|&o| o != Objects::TRUE && o != Objects::FALSE)
                .unique()
                .map(|o| {
                    (
                        self.task.registry.objects.name(o).to_string(),
                        self.task.registry.type_names_of(o),
                    )
                })
                .collect();
            updates.push(SharedValue {
                fact: self.task.symbolic(v.fact),
                objects,
                level,
                initial: v.initial && level == 0,
            });
            self.sent.insert((peer, id), level);
        }
        updates
    }

    /// Adds the values reported by agent `from` to the graph. Unknown objects are registered with
    /// the reported types; values of functions unknown to this agent are ignored.
    /// Returns the number of values that are new or were lowered.
    pub fn incorporate(&mut self, from: usize, values: &[SharedValue]) -> usize {
        let mut changed = 0;
        for sv in values {
            for (name, types) in &sv.objects {
                self.task.registry.learn_object(name, types);
            }
            let Ok(fun) = self.task.function_id(&sv.fact.function) else {
                tracing::trace!("ignoring {}: unknown function", sv.fact);
                continue;
            };
            let params: Option<Vec<ObjId>> = sv.fact.params.iter().map(|p| self.task.registry.objects.id(p)).collect();
            let (Some(params), Some(value)) = (params, self.task.registry.objects.id(&sv.fact.value)) else {
                tracing::trace!("ignoring {}: unknown object", sv.fact);
                continue;
            };
            if params.len() != self.task.function(fun).params.len() {
                tracing::warn!("ignoring {}: arity mismatch", sv.fact);
                continue;
            }
            let var = self.task.var_or_create(fun, &params);
            if sv.initial && self.task.var(var).init_true.is_none() {
                self.task.set_initial(var, value);
            }
            if self.task.reach(Fact::new(var, value), from, sv.level, sv.initial) {
                changed += 1;
            }
        }
        changed
    }

    /// Final levels and achiever index.
    pub fn finish(mut self) -> GroundedTask {
        self.propagate_levels();
        self.task.index_achievers();
        self.task
    }
}

/// Grounds the task of an agent planning alone.
pub fn ground_task(task: &Task, agent: &str, config: &PlannerConfig) -> Result<GroundedTask, TaskError> {
    let mut grounder = Grounder::single(task, agent, config)?;
    grounder.ground()?;
    Ok(grounder.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> Task {
        serde_json::from_value(value).unwrap()
    }

    fn items() -> serde_json::Value {
        json!([{"name": "x", "types": ["item"]}, {"name": "y", "types": ["item"]}])
    }

    /// `neg` needs `p` false, `tie` links two objects with `p`, `keep` re-asserts `p`.
    fn policies_task(init: serde_json::Value) -> Task {
        let one = || json!([{"name": "?a", "types": ["item"]}]);
        parse(json!({
            "domain": "policies",
            "types": [{"name": "item"}],
            "objects": items(),
            "functions": [
                {"name": "p", "params": one()},
                {"name": "linked", "params": [{"name": "?a", "types": ["item"]}, {"name": "?b", "types": ["item"]}]}
            ],
            "operators": [
                {
                    "name": "neg",
                    "params": one(),
                    "preconditions": [{"function": "p", "params": ["?a"], "negated": true}],
                    "effects": [{"function": "p", "params": ["?a"]}]
                },
                {
                    "name": "tie",
                    "params": [{"name": "?a", "types": ["item"]}, {"name": "?b", "types": ["item"]}],
                    "preconditions": [{"function": "p", "params": ["?a"]}, {"function": "p", "params": ["?b"]}],
                    "effects": [{"function": "linked", "params": ["?a", "?b"]}]
                },
                {
                    "name": "keep",
                    "params": one(),
                    "preconditions": [{"function": "p", "params": ["?a"]}],
                    "effects": [{"function": "p", "params": ["?a"]}]
                }
            ],
            "init": init
        }))
    }

    fn keys(task: &GroundedTask) -> Vec<String> {
        task.actions().iter().map(|a| a.label.to_string()).sorted().collect()
    }

    fn obj(task: &GroundedTask, name: &str) -> ObjId {
        task.registry.objects.id(name).unwrap()
    }

    fn var(task: &GroundedTask, fun: &str, args: &[&str]) -> VarId {
        let args = args.iter().map(|a| obj(task, a)).collect_vec();
        task.var_id(task.function_id(fun).unwrap(), &args).unwrap()
    }

    #[test]
    fn negation_by_failure_assumes_false() {
        let config = PlannerConfig::default().with_negation(NegationPolicy::Failure);
        let task = ground_task(&policies_task(json!([])), "agent", &config).unwrap();
        assert_eq!(task.actions().len(), 8);
        assert!(task.action_by_key("neg x").is_some());
    }

    #[test]
    fn unknown_negation_needs_explicit_false_values() {
        let config = PlannerConfig::default().with_negation(NegationPolicy::Unknown);
        let task = ground_task(&policies_task(json!([])), "agent", &config).unwrap();
        assert!(task.actions().is_empty());

        let init = json!([{"function": "p", "params": ["x"], "negated": true}]);
        let task = ground_task(&policies_task(init), "agent", &config).unwrap();
        assert_eq!(keys(&task), vec!["(keep x)", "(neg x)", "(tie x x)"]);
    }

    #[test]
    fn same_objects_filters() {
        let ground = |policy| {
            let config = PlannerConfig::default()
                .with_negation(NegationPolicy::Failure)
                .with_same_objects(policy);
            ground_task(&policies_task(json!([])), "agent", &config).unwrap()
        };

        let effects = ground(SameObjects::Effects);
        assert_eq!(effects.actions().len(), 6);
        assert!(effects.action_by_key("tie x x").is_none());
        assert!(effects.action_by_key("tie y y").is_none());
        assert!(effects.action_by_key("keep x").is_some());

        let precondition = ground(SameObjects::Precondition);
        assert_eq!(precondition.actions().len(), 6);
        assert!(precondition.action_by_key("keep x").is_none());
        assert!(precondition.action_by_key("tie x x").is_some());

        let both = ground(SameObjects::Both);
        assert_eq!(keys(&both), vec!["(neg x)", "(neg y)", "(tie x y)", "(tie y x)"]);
    }

    #[test]
    fn contradictory_effects_keep_true_and_are_mutex() {
        let task = parse(json!({
            "domain": "flip",
            "types": [{"name": "item"}],
            "objects": items(),
            "functions": [{"name": "p", "params": [{"name": "?a", "types": ["item"]}]}],
            "operators": [{
                "name": "flip",
                "params": [{"name": "?a", "types": ["item"]}],
                "effects": [
                    {"function": "p", "params": ["?a"], "negated": true},
                    {"function": "p", "params": ["?a"]}
                ]
            }]
        }));
        let task = ground_task(&task, "agent", &PlannerConfig::default()).unwrap();
        let flip = task.action(task.action_by_key("flip x").unwrap());
        let p = var(&task, "p", &["x"]);
        assert_eq!(flip.effects, vec![Fact::new(p, Objects::TRUE)]);
        assert_eq!(flip.mutex_vars, vec![p]);
        let other = task.action_by_key("flip y").unwrap();
        assert!(!task.is_mutex(task.action_by_key("flip x").unwrap(), other));
    }

    #[test]
    fn conflicting_initial_values_are_corrected() {
        let task = parse(json!({
            "domain": "init",
            "types": [{"name": "item"}, {"name": "place"}],
            "objects": [
                {"name": "x", "types": ["item"]},
                {"name": "y", "types": ["item"]},
                {"name": "home", "types": ["place"]},
                {"name": "shop", "types": ["place"]}
            ],
            "functions": [
                {"name": "p", "params": [{"name": "?a", "types": ["item"]}]},
                {"name": "loc", "params": [{"name": "?a", "types": ["item"]}], "domain": ["place"]}
            ],
            "init": [
                {"function": "p", "params": ["x"]},
                {"function": "p", "params": ["x"], "negated": true},
                {"function": "loc", "params": ["x"], "value": "home"},
                {"function": "loc", "params": ["x"], "value": "shop"},
                {"function": "loc", "params": ["y"], "value": "home"},
                {"function": "loc", "params": ["y"], "value": "home", "negated": true}
            ]
        }));
        let task = ground_task(&task, "agent", &PlannerConfig::default()).unwrap();
        // the later literal wins
        assert_eq!(task.var(var(&task, "p", &["x"])).init_true, Some(Objects::FALSE));
        assert_eq!(task.var(var(&task, "loc", &["x"])).init_true, Some(obj(&task, "shop")));
        // denying the asserted value revokes it
        let y = task.var(var(&task, "loc", &["y"]));
        assert_eq!(y.init_true, None);
        assert_eq!(y.init_false, vec![obj(&task, "home")]);
    }

    #[test]
    fn mistyped_variable_is_a_task_error() {
        let task = parse(json!({
            "domain": "stash",
            "types": [{"name": "item"}, {"name": "place"}],
            "objects": [{"name": "x", "types": ["item"]}, {"name": "home", "types": ["place"]}],
            "functions": [{"name": "holds", "params": [{"name": "?i", "types": ["item"]}]}],
            "operators": [{
                "name": "stash",
                "params": [{"name": "?p", "types": ["place"]}],
                "effects": [{"function": "holds", "params": ["?p"]}]
            }]
        }));
        let result = ground_task(&task, "agent", &PlannerConfig::default());
        assert_eq!(result.err(), Some(TaskError::UnknownVariable("(holds home)".to_string())));
    }

    #[test]
    fn peer_values_lower_levels() {
        let one = || json!([{"name": "?a", "types": ["item"]}]);
        let task = parse(json!({
            "domain": "levels",
            "types": [{"name": "item"}],
            "objects": [{"name": "x", "types": ["item"]}],
            "functions": [{"name": "p", "params": one()}, {"name": "q", "params": one()}],
            "operators": [
                {"name": "first", "params": one(), "effects": [{"function": "p", "params": ["?a"]}]},
                {
                    "name": "second",
                    "params": one(),
                    "preconditions": [{"function": "p", "params": ["?a"]}],
                    "effects": [{"function": "q", "params": ["?a"]}]
                }
            ]
        }));
        let agents = vec!["a".to_string(), "b".to_string()];
        let mut grounder = Grounder::new(&task, agents, 0, &BTreeSet::new(), &PlannerConfig::default()).unwrap();
        grounder.ground().unwrap();
        let p = Fact::new(var(grounder.task(), "p", &["x"]), Objects::TRUE);
        let q = Fact::new(var(grounder.task(), "q", &["x"]), Objects::TRUE);
        assert_eq!(grounder.task().min_time(p, 0), 1);
        assert_eq!(grounder.task().min_time(q, 0), 2);

        let shared = SharedValue {
            fact: SymbolicFact {
                function: "p".to_string(),
                params: vec!["x".to_string()],
                value: crate::task::TRUE.to_string(),
            },
            objects: vec![("x".to_string(), vec!["item".to_string()])],
            level: 0,
            initial: false,
        };
        assert_eq!(grounder.incorporate(1, std::slice::from_ref(&shared)), 1);
        assert_eq!(grounder.incorporate(1, &[shared]), 0);
        grounder.ground().unwrap();
        let task = grounder.finish();
        assert_eq!(task.min_time(p, 1), 0);
        assert_eq!(task.min_time(p, 0), 1);
        assert_eq!(task.min_time(q, 0), 1);
        assert_eq!(task.time(q), 1);
    }
}
