//! Forward partial-order planning: plans grow one step at a time, each new step being supported
//! by causal links from existing steps and protected against threats by ordering constraints.

pub mod ordering;
pub mod output;
pub mod plan;
pub mod refine;
pub mod search;

pub use ordering::OrderingManager;
pub use output::{Plan, PlanFormat};
pub use plan::{CausalLink, PlanArena, PlanNode, PlanView, Refinement};
pub use refine::{RefineLimits, Refiner};
pub use search::{Search, SearchOutcome, SearchStats, Step as SearchStep, in_parallel};
