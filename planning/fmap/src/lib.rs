//! Distributed multi-agent forward partial-order planning.
//!
//! Each agent grounds its own view of the task, the agents jointly build a distributed relaxed
//! planning graph, extract landmarks, and then search together a partial-order plan whose steps
//! are contributed by all of them. Agents only ever disclose the facts their sharing policy allows.

pub mod agent;
pub mod comm;
pub mod errors;
pub mod grounding;
pub mod heuristics;
pub mod ids;
pub mod landmarks;
pub mod negotiation;
pub mod observer;
pub mod params;
pub mod pop;
pub mod task;
pub mod types;

pub use agent::{Agent, AgentOutcome};
pub use errors::{FmapError, Res};
pub use params::PlannerConfig;
