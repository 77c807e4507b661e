//! Plans handed to the caller, and their textual encodings.
//!
//! Each encoded line has the form `<time>: (<action-name> <param>*)` where the time of a step is
//! the length of the longest chain of steps that must precede it.

use std::fmt::{Display, Formatter, Write};
use std::str::FromStr;
use std::sync::Arc;

use itertools::Itertools;

use crate::grounding::GroundedTask;
use crate::ids::{StepId, VarId};

use super::plan::{CausalLink, PlanView};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum PlanFormat {
    /// All steps, one per line.
    #[default]
    Regular,
    /// Only the steps of one agent, with their global times.
    Distributed,
}

impl FromStr for PlanFormat {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "regular" => Ok(PlanFormat::Regular),
            "distributed" => Ok(PlanFormat::Distributed),
            _ => Err(format!("unknown plan format `{s}` (expected regular|distributed)")),
        }
    }
}

impl Display for PlanFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanFormat::Regular => write!(f, "regular"),
            PlanFormat::Distributed => write!(f, "distributed"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PlanStep {
    pub id: StepId,
    pub owner: String,
    pub label: Arc<str>,
    pub time: u32,
}

/// A partial-order plan, detached from the search that produced it.
#[derive(Clone, Debug)]
pub struct Plan {
    /// Non-sentinel steps, sorted by time then index.
    steps: Vec<PlanStep>,
    pub links: Vec<CausalLink>,
    pub orderings: Vec<(StepId, StepId)>,
    solution: bool,
    metric: Option<f64>,
}

impl Plan {
    pub fn from_view(task: &GroundedTask, view: &PlanView) -> Plan {
        let mut times = vec![0u32; view.num_steps()];
        for s in view.linearization() {
            for &(a, b) in &view.orderings {
                if a == s {
                    times[usize::from(b)] = times[usize::from(b)].max(times[usize::from(a)] + 1);
                }
            }
        }
        let steps = view
            .inner_steps()
            .map(|s| {
                let step = view.step(s);
                PlanStep {
                    id: s,
                    owner: task.agents.get(step.owner).cloned().unwrap_or_default(),
                    label: step.label.clone(),
                    time: times[usize::from(s)],
                }
            })
            .sorted_by_key(|s| (s.time, s.id))
            .collect();
        let numbers = view.numeric_state(task);
        let metric = task
            .metric
            .as_ref()
            .and_then(|(_, expr)| expr.eval(&|v: VarId| numbers.get(usize::from(v)).copied().flatten()));
        Plan {
            steps,
            links: view.links.clone(),
            orderings: view.orderings.clone(),
            solution: view.is_solution(task),
            metric,
        }
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    /// Number of steps, sentinels excluded.
    pub fn num_steps(&self) -> usize {
        self.steps.len()
    }

    pub fn is_solution(&self) -> bool {
        self.solution
    }

    /// Value of the task's metric in the final state, if the task has one.
    pub fn metric_value(&self) -> Option<f64> {
        self.metric
    }

    /// Latest time of a step, plus one.
    pub fn makespan(&self) -> u32 {
        self.steps.iter().map(|s| s.time + 1).max().unwrap_or(0)
    }

    pub fn print_plan(&self, format: PlanFormat, this_agent: &str, agents: &[String]) -> String {
        if format == PlanFormat::Distributed && !agents.iter().any(|a| a == this_agent) {
            tracing::warn!("agent `{this_agent}` is not part of {agents:?}");
        }
        let mut out = String::new();
        for s in &self.steps {
            if format == PlanFormat::Distributed && s.owner != this_agent {
                continue;
            }
            let _ = writeln!(out, "{}: {}", s.time, s.label);
        }
        out
    }
}

impl Display for Plan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.print_plan(PlanFormat::Regular, "", &[]))
    }
}
