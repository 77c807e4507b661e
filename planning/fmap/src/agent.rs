//! Driver running all the phases of one agent: parsing, grounding, landmark extraction and
//! (joint) planning.

use std::path::PathBuf;
use std::sync::Arc;

use crate::comm::{AgentComm, AgentRoster, ChannelHub};
use crate::errors::{Res, TaskError};
use crate::grounding::GroundedTask;
use crate::grounding::distributed::distributed_grounding;
use crate::grounding::ground_task;
use crate::heuristics::heuristic;
use crate::landmarks::LandmarkGraph;
use crate::landmarks::multi::extract_distributed;
use crate::negotiation::Negotiation;
use crate::observer::{PlannerObserver, Status, TracingObserver};
use crate::params::PlannerConfig;
use crate::pop::{Plan, Search, SearchOutcome, SearchStats};
use crate::task::Task;

pub enum TaskSource {
    Parsed(Box<Task>),
    File(PathBuf),
}

impl TaskSource {
    fn load(self) -> Result<Task, TaskError> {
        match self {
            TaskSource::Parsed(task) => Ok(*task),
            TaskSource::File(path) => {
                let text = std::fs::read_to_string(&path)
                    .map_err(|e| TaskError::Invalid(format!("{}: {e}", path.display())))?;
                Task::from_json(&text).map_err(|e| TaskError::Invalid(format!("{}: {e}", path.display())))
            }
        }
    }
}

/// What an agent ends up with.
pub struct AgentOutcome {
    /// Solution plan, if one was found.
    pub plan: Option<Plan>,
    pub grounded: GroundedTask,
    pub landmarks: Option<LandmarkGraph>,
    /// Rounds of the distributed grounding.
    pub rounds: u32,
    pub stats: SearchStats,
    /// True if the search was interrupted by the expansion budget.
    pub stopped: bool,
    /// True if no plan was found but the refinement limits pruned part of the search space.
    pub incomplete: bool,
}

pub struct Agent {
    name: String,
    source: TaskSource,
    config: PlannerConfig,
    observer: Arc<dyn PlannerObserver>,
    max_expansions: Option<usize>,
    wait_sync_start: bool,
}

impl Agent {
    pub fn new(name: &str, task: Task) -> Self {
        Self::with_source(name, TaskSource::Parsed(Box::new(task)))
    }

    pub fn from_file(name: &str, path: impl Into<PathBuf>) -> Self {
        Self::with_source(name, TaskSource::File(path.into()))
    }

    fn with_source(name: &str, source: TaskSource) -> Self {
        Agent {
            name: name.to_string(),
            source,
            config: PlannerConfig::default(),
            observer: Arc::new(TracingObserver),
            max_expansions: None,
            wait_sync_start: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_config(mut self, config: PlannerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PlannerObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Expansion budget. All agents of a session must use the same budget.
    pub fn with_max_expansions(mut self, max: Option<usize>) -> Self {
        self.max_expansions = max;
        self
    }

    pub fn with_roster(mut self, roster: &AgentRoster) -> Self {
        self.wait_sync_start = roster.wait_sync_start;
        self
    }

    fn status(&self, status: Status) {
        self.observer.on_status_changed(&self.name, status);
    }

    /// Runs the agent alone, without peers.
    pub fn run_alone(self) -> Res<AgentOutcome> {
        let roster = AgentRoster::local(&[self.name.as_str()], &self.name);
        let mut hub = ChannelHub::connect(&roster);
        let mut comm = hub.join(&self.name)?;
        self.run(&mut comm)
    }

    /// Runs all phases. Every agent of the session must run concurrently over the same hub.
    pub fn run(mut self, comm: &mut AgentComm) -> Res<AgentOutcome> {
        self.status(Status::Starting);
        let source = std::mem::replace(&mut self.source, TaskSource::Parsed(Box::default()));
        match self.phases(source, comm) {
            Ok(outcome) => {
                self.status(Status::Idle);
                Ok(outcome)
            }
            Err(e) => {
                self.observer.on_trace(&self.name, &e.to_string());
                self.status(Status::Error);
                Err(e)
            }
        }
    }

    fn phases(&self, source: TaskSource, comm: &mut AgentComm) -> Res<AgentOutcome> {
        if self.wait_sync_start {
            comm.synchronized_start()?;
        }
        self.status(Status::Parsing);
        let task = source.load()?;

        self.status(Status::Grounding);
        let (grounded, rounds) = if comm.len() > 1 {
            distributed_grounding(&task, comm, &self.config)?
        } else {
            (ground_task(&task, &self.name, &self.config)?, 1)
        };
        self.observer.on_trace(
            &self.name,
            &format!(
                "{} variables, {} values, {} actions",
                grounded.vars().len(),
                grounded.values().len(),
                grounded.actions().len()
            ),
        );

        let landmarks = if self.config.heuristic.uses_landmarks() {
            self.status(Status::Landmarks);
            let graph = extract_distributed(&grounded, comm)?;
            self.observer
                .on_trace(&self.name, &format!("{} landmarks", graph.len()));
            Some(graph)
        } else {
            None
        };

        self.status(Status::Planning);
        let max = self.max_expansions;
        let stop = move |stats: &SearchStats| max.is_some_and(|m| stats.expanded >= m);
        let h = heuristic(self.config.heuristic, &grounded, landmarks.as_ref());
        let (result, stats) = if comm.len() > 1 {
            let mut negotiation = Negotiation::new(&grounded, h, &self.config);
            let result = negotiation.run_with(comm, stop)?;
            (result, negotiation.stats.clone())
        } else {
            let mut search = Search::new(&grounded, h, &self.config);
            let result = search.run_with(stop);
            (result, search.stats.clone())
        };
        let (plan, stopped, incomplete) = match result {
            SearchOutcome::Solution(plan) => {
                self.observer.on_new_plan(&self.name, &plan);
                (Some(plan), false, false)
            }
            SearchOutcome::Exhausted => {
                self.observer.on_trace(&self.name, "no plan found");
                (None, false, false)
            }
            SearchOutcome::Incomplete => {
                self.observer.on_trace(&self.name, "no plan found within the refinement limits");
                (None, false, true)
            }
            SearchOutcome::Stopped => (None, true, false),
        };
        Ok(AgentOutcome {
            plan,
            grounded,
            landmarks,
            rounds,
            stats,
            stopped,
            incomplete,
        })
    }
}
