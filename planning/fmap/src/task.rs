//! Structured planning task, as produced by the (external) MAPDDL parser.
//!
//! The task is the boundary between this crate and the surrounding tooling. It is deserialized
//! from JSON and carries the lifted model of a single agent: its types, objects, functions,
//! operators, initial state, goals and the declarations of which data it may share with peers.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the built-in boolean type whose objects are `true` and `false`.
pub const BOOLEAN: &str = "boolean";
/// Name of the pseudo-type marking numeric functions.
pub const NUMBER: &str = "number";
/// Root of the type hierarchy.
pub const OBJECT: &str = "object";
pub const AGENT: &str = "agent";
pub const TRUE: &str = "true";
pub const FALSE: &str = "false";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Task {
    pub domain: String,
    #[serde(default)]
    pub problem: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub types: Vec<TypeDecl>,
    #[serde(default)]
    pub objects: Vec<ObjectDecl>,
    #[serde(default)]
    pub functions: Vec<FunctionDecl>,
    #[serde(default)]
    pub operators: Vec<OperatorDecl>,
    #[serde(default)]
    pub init: Vec<Literal>,
    #[serde(default)]
    pub numeric_init: Vec<NumericInit>,
    #[serde(default)]
    pub goals: Vec<Literal>,
    #[serde(default)]
    pub numeric_goals: Vec<NumericCondition>,
    #[serde(default)]
    pub metric: Option<Metric>,
    #[serde(default)]
    pub preferences: Vec<Preference>,
    /// Factored-privacy declarations. When absent, every fact may be shared with every agent.
    #[serde(default)]
    pub shared_data: Option<Vec<SharedData>>,
}

impl Task {
    pub fn from_json(text: &str) -> Result<Task, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Task> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let task = Task::from_json(&text).map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?;
        Ok(task)
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDecl> {
        self.functions.iter().find(|f| f.name == name)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TypeDecl {
    pub name: String,
    #[serde(default)]
    pub parents: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ObjectDecl {
    pub name: String,
    #[serde(default)]
    pub types: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ParamDecl {
    pub name: String,
    #[serde(default)]
    pub types: Vec<String>,
}

/// Signature of a predicate (domain `boolean`), object fluent or numeric fluent (domain `number`).
///
/// A `multi` function maps its arguments to a *set* of values. Its value is folded into
/// an extra trailing parameter when grounding, yielding boolean variables.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FunctionDecl {
    pub name: String,
    #[serde(default)]
    pub params: Vec<ParamDecl>,
    #[serde(default = "boolean_domain")]
    pub domain: Vec<String>,
    #[serde(default)]
    pub multi: bool,
}

fn boolean_domain() -> Vec<String> {
    vec![BOOLEAN.to_string()]
}

impl FunctionDecl {
    pub fn is_numeric(&self) -> bool {
        self.domain.iter().any(|t| t == NUMBER)
    }
    pub fn is_boolean(&self) -> bool {
        self.domain.len() == 1 && self.domain[0] == BOOLEAN
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OperatorDecl {
    pub name: String,
    #[serde(default)]
    pub params: Vec<ParamDecl>,
    #[serde(default)]
    pub preconditions: Vec<Literal>,
    #[serde(default)]
    pub effects: Vec<Literal>,
    #[serde(default)]
    pub numeric_preconditions: Vec<NumericCondition>,
    #[serde(default)]
    pub numeric_effects: Vec<NumericEffect>,
}

/// `(function params...) = value`, possibly negated.
///
/// Terms starting with `?` are operator parameters, anything else is an object name.
/// For predicates the value defaults to `true`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Literal {
    pub function: String,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub negated: bool,
}

impl Literal {
    pub fn new(function: &str, params: &[&str]) -> Self {
        Literal {
            function: function.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            value: None,
            negated: false,
        }
    }
    pub fn with_value(mut self, value: &str) -> Self {
        self.value = Some(value.to_string());
        self
    }
    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }
}

pub fn is_parameter(term: &str) -> bool {
    term.starts_with('?')
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum NumericExpr {
    Number(f64),
    Fluent {
        function: String,
        #[serde(default)]
        params: Vec<String>,
    },
    Add(Box<NumericExpr>, Box<NumericExpr>),
    Sub(Box<NumericExpr>, Box<NumericExpr>),
    Mul(Box<NumericExpr>, Box<NumericExpr>),
    Div(Box<NumericExpr>, Box<NumericExpr>),
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Comparator {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NumericCondition {
    pub comparator: Comparator,
    pub lhs: NumericExpr,
    pub rhs: NumericExpr,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NumericEffectKind {
    Increase,
    Decrease,
    Assign,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NumericEffect {
    pub kind: NumericEffectKind,
    pub function: String,
    #[serde(default)]
    pub params: Vec<String>,
    pub expr: NumericExpr,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NumericInit {
    pub function: String,
    #[serde(default)]
    pub params: Vec<String>,
    pub value: f64,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MetricDirection {
    Minimize,
    Maximize,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Metric {
    pub direction: MetricDirection,
    pub expr: NumericExpr,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Preference {
    pub name: String,
    pub goal: Literal,
}

/// Declares that values of `function` whose arguments match `params` (types) and whose value
/// matches `value_types` may be disclosed to each agent of `agents`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SharedData {
    pub function: String,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub value_types: Vec<String>,
    pub agents: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_task() {
        let text = r#"{
            "domain": "counters",
            "objects": [{"name": "c", "types": ["counter"]}],
            "types": [{"name": "counter"}],
            "functions": [{"name": "value", "params": [{"name": "?c", "types": ["counter"]}], "domain": ["number"]}],
            "numeric_goals": [{"comparator": "ge",
                               "lhs": {"fluent": {"function": "value", "params": ["c"]}},
                               "rhs": {"number": 2.0}}]
        }"#;
        let task = Task::from_json(text).unwrap();
        assert_eq!(task.domain, "counters");
        assert!(task.function("value").unwrap().is_numeric());
        assert!(task.shared_data.is_none());
        assert_eq!(task.numeric_goals[0].comparator, Comparator::Ge);
    }

    #[test]
    fn predicates_default_to_boolean() {
        let f: FunctionDecl = serde_json::from_str(r#"{"name": "on"}"#).unwrap();
        assert!(f.is_boolean());
        assert!(!f.is_numeric());
        assert!(is_parameter("?x"));
        assert!(!is_parameter("x"));
    }
}
