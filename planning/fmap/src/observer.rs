//! Progress notifications for the host running an agent.

use derive_more::Display;

use crate::pop::Plan;

/// Lifecycle of an agent: `Starting → Parsing → Grounding → [Landmarks] → Planning → Idle`, or
/// `Error` from any phase.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display)]
pub enum Status {
    #[display("starting")]
    Starting,
    #[display("parsing")]
    Parsing,
    #[display("grounding")]
    Grounding,
    #[display("landmarks")]
    Landmarks,
    #[display("planning")]
    Planning,
    #[display("idle")]
    Idle,
    #[display("error")]
    Error,
}

/// Callbacks through which a host follows an agent. All methods default to doing nothing.
pub trait PlannerObserver: Send + Sync {
    fn on_status_changed(&self, _agent: &str, _status: Status) {}
    fn on_new_plan(&self, _agent: &str, _plan: &Plan) {}
    fn on_trace(&self, _agent: &str, _message: &str) {}
}

/// Forwards every notification to `tracing`.
#[derive(Copy, Clone, Debug, Default)]
pub struct TracingObserver;

impl PlannerObserver for TracingObserver {
    fn on_status_changed(&self, agent: &str, status: Status) {
        match status {
            Status::Error => tracing::error!(agent, "status: {status}"),
            _ => tracing::info!(agent, "status: {status}"),
        }
    }

    fn on_new_plan(&self, agent: &str, plan: &Plan) {
        tracing::info!(agent, steps = plan.num_steps(), solution = plan.is_solution(), "new plan");
    }

    fn on_trace(&self, agent: &str, message: &str) {
        tracing::debug!(agent, "{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_print_lowercase() {
        assert_eq!(Status::Landmarks.to_string(), "landmarks");
        assert_eq!(format!("{}", Status::Idle), "idle");
    }
}
