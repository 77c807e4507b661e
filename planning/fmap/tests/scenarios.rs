use std::sync::{Arc, Mutex};

use fmap::comm::{AgentRoster, ChannelHub};
use fmap::grounding::ground_task;
use fmap::heuristics::{HeuristicKind, heuristic};
use fmap::observer::{PlannerObserver, Status};
use fmap::pop::{PlanFormat, RefineLimits, Search, SearchOutcome};
use fmap::task::Task;
use fmap::{Agent, AgentOutcome, PlannerConfig};
use serde_json::json;

fn task(value: serde_json::Value) -> Task {
    serde_json::from_value(value).unwrap()
}

fn config(kind: HeuristicKind) -> PlannerConfig {
    PlannerConfig::default().with_threads(2).with_heuristic(kind)
}

fn counter_task() -> Task {
    task(json!({
        "domain": "counters",
        "types": [{"name": "counter"}],
        "objects": [{"name": "c", "types": ["counter"]}],
        "functions": [{"name": "value", "params": [{"name": "?c", "types": ["counter"]}], "domain": ["number"]}],
        "operators": [
            {
                "name": "increment",
                "params": [{"name": "?c", "types": ["counter"]}],
                "numeric_effects": [{"kind": "increase", "function": "value", "params": ["?c"], "expr": {"number": 1.0}}]
            },
            {
                "name": "decrement",
                "params": [{"name": "?c", "types": ["counter"]}],
                "numeric_preconditions": [{
                    "comparator": "ge",
                    "lhs": {"fluent": {"function": "value", "params": ["?c"]}},
                    "rhs": {"number": 1.0}
                }],
                "numeric_effects": [{"kind": "decrease", "function": "value", "params": ["?c"], "expr": {"number": 1.0}}]
            }
        ],
        "numeric_init": [{"function": "value", "params": ["c"], "value": 0.0}],
        "numeric_goals": [{
            "comparator": "ge",
            "lhs": {"fluent": {"function": "value", "params": ["c"]}},
            "rhs": {"number": 2.0}
        }]
    }))
}

fn heaters_task() -> Task {
    let heater = || json!([{"name": "?h", "types": ["heater"]}]);
    task(json!({
        "domain": "heaters",
        "types": [{"name": "heater"}, {"name": "job"}],
        "objects": [
            {"name": "h1", "types": ["heater"]},
            {"name": "h2", "types": ["heater"]},
            {"name": "j1", "types": ["job"]},
            {"name": "j2", "types": ["job"]}
        ],
        "functions": [
            {"name": "working", "params": heater()},
            {"name": "on", "params": heater()},
            {"name": "circuit-free"},
            {"name": "done", "params": [{"name": "?j", "types": ["job"]}]}
        ],
        "operators": [
            {
                "name": "switch_heater_on",
                "params": heater(),
                "preconditions": [
                    {"function": "circuit-free"},
                    {"function": "working", "params": ["?h"]}
                ],
                "effects": [
                    {"function": "on", "params": ["?h"]},
                    {"function": "circuit-free", "negated": true}
                ]
            },
            {
                "name": "switch_heater_off",
                "params": heater(),
                "preconditions": [
                    {"function": "on", "params": ["?h"]},
                    {"function": "working", "params": ["?h"]}
                ],
                "effects": [
                    {"function": "on", "params": ["?h"], "negated": true},
                    {"function": "circuit-free"}
                ]
            },
            {
                "name": "perform_job",
                "params": [{"name": "?j", "types": ["job"]}, {"name": "?h", "types": ["heater"]}],
                "preconditions": [
                    {"function": "on", "params": ["?h"]},
                    {"function": "working", "params": ["?h"]}
                ],
                "effects": [{"function": "done", "params": ["?j"]}]
            }
        ],
        "init": [
            {"function": "circuit-free"},
            {"function": "working", "params": ["h1"]},
            {"function": "working", "params": ["h2"]}
        ],
        "goals": [
            {"function": "done", "params": ["j1"]},
            {"function": "done", "params": ["j2"]}
        ]
    }))
}

/// Agent `a` waves from home, agent `b` passes the door that only `a` knows to be open.
fn door_tasks() -> Vec<(&'static str, Task)> {
    let shared = json!([{"function": "open", "params": ["door"], "agents": ["a", "b"]}]);
    let common_types = json!([{"name": "door"}, {"name": "robot", "parents": ["agent"]}]);
    let a = task(json!({
        "domain": "doors",
        "problem": "a",
        "types": common_types,
        "objects": [{"name": "door1", "types": ["door"]}, {"name": "a", "types": ["robot"]}],
        "functions": [
            {"name": "open", "params": [{"name": "?d", "types": ["door"]}]},
            {"name": "at-home", "params": [{"name": "?r", "types": ["robot"]}]},
            {"name": "waved", "params": [{"name": "?r", "types": ["robot"]}]}
        ],
        "operators": [{
            "name": "wave",
            "params": [{"name": "?r", "types": ["robot"]}],
            "preconditions": [{"function": "at-home", "params": ["?r"]}],
            "effects": [{"function": "waved", "params": ["?r"]}]
        }],
        "init": [
            {"function": "open", "params": ["door1"]},
            {"function": "at-home", "params": ["a"]}
        ],
        "goals": [{"function": "waved", "params": ["a"]}],
        "shared_data": shared
    }));
    let b = task(json!({
        "domain": "doors",
        "problem": "b",
        "types": common_types,
        "objects": [{"name": "door1", "types": ["door"]}, {"name": "b", "types": ["robot"]}],
        "functions": [
            {"name": "open", "params": [{"name": "?d", "types": ["door"]}]},
            {"name": "passed", "params": [{"name": "?r", "types": ["robot"]}]}
        ],
        "operators": [{
            "name": "pass",
            "params": [{"name": "?r", "types": ["robot"]}, {"name": "?d", "types": ["door"]}],
            "preconditions": [{"function": "open", "params": ["?d"]}],
            "effects": [{"function": "passed", "params": ["?r"]}]
        }],
        "goals": [{"function": "passed", "params": ["b"]}],
        "shared_data": shared
    }));
    vec![("a", a), ("b", b)]
}

/// Agent `c` hops on its own and shares nothing.
fn hopper_task() -> (&'static str, Task) {
    let robot = || json!([{"name": "?r", "types": ["robot"]}]);
    let c = task(json!({
        "domain": "doors",
        "problem": "c",
        "types": [{"name": "door"}, {"name": "robot", "parents": ["agent"]}],
        "objects": [{"name": "c", "types": ["robot"]}],
        "functions": [
            {"name": "at-home", "params": robot()},
            {"name": "hopped", "params": robot()}
        ],
        "operators": [{
            "name": "hop",
            "params": robot(),
            "preconditions": [{"function": "at-home", "params": ["?r"]}],
            "effects": [{"function": "hopped", "params": ["?r"]}]
        }],
        "init": [{"function": "at-home", "params": ["c"]}],
        "goals": [{"function": "hopped", "params": ["c"]}],
        "shared_data": []
    }));
    ("c", c)
}

fn run_agents(tasks: Vec<(&'static str, Task)>, config: &PlannerConfig) -> Vec<AgentOutcome> {
    let names: Vec<&str> = tasks.iter().map(|(n, _)| *n).collect();
    let roster = AgentRoster::local(&names, names[0]);
    let mut hub = ChannelHub::connect(&roster);
    let comms: Vec<_> = names.iter().map(|n| hub.join(n).unwrap()).collect();
    drop(hub);
    std::thread::scope(|scope| {
        let handles: Vec<_> = tasks
            .into_iter()
            .zip(comms)
            .map(|((name, task), mut comm)| {
                let agent = Agent::new(name, task).with_config(config.clone());
                scope.spawn(move || agent.run(&mut comm).unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

#[test]
fn counter_grounds_two_actions() {
    let grounded = ground_task(&counter_task(), "agent", &config(HeuristicKind::Ff)).unwrap();
    assert_eq!(grounded.actions().len(), 2);
    assert!(grounded.action_by_key("increment c").is_some());
    assert!(grounded.action_by_key("decrement c").is_some());
}

#[test]
fn counter_plan_increments_twice() {
    for kind in [HeuristicKind::Ff, HeuristicKind::FfLand] {
        let outcome = Agent::new("agent", counter_task())
            .with_config(config(kind))
            .run_alone()
            .unwrap();
        let plan = outcome.plan.expect("a plan");
        assert!(plan.is_solution());
        assert_eq!(plan.num_steps(), 2);
        let agents = vec!["agent".to_string()];
        assert_eq!(
            plan.print_plan(PlanFormat::Regular, "agent", &agents),
            "0: (increment c)\n1: (increment c)\n"
        );
    }
}

#[test]
fn heaters_ground_every_pair() {
    let grounded = ground_task(&heaters_task(), "agent", &config(HeuristicKind::Ff)).unwrap();
    for h in ["h1", "h2"] {
        assert!(grounded.action_by_key(&format!("switch_heater_on {h}")).is_some());
        assert!(grounded.action_by_key(&format!("switch_heater_off {h}")).is_some());
        for j in ["j1", "j2"] {
            assert!(grounded.action_by_key(&format!("perform_job {j} {h}")).is_some());
        }
    }
    // static preconditions are compiled away
    let on1 = grounded.action_by_key("switch_heater_on h1").unwrap();
    assert_eq!(grounded.action(on1).preconditions.len(), 1);
}

#[test]
fn heaters_grounding_is_sound_and_deterministic() {
    let config = config(HeuristicKind::Ff);
    let first = ground_task(&heaters_task(), "agent", &config).unwrap();
    let second = ground_task(&heaters_task(), "agent", &config).unwrap();
    let labels = |g: &fmap::grounding::GroundedTask| g.actions().iter().map(|a| a.label.to_string()).collect::<Vec<_>>();
    assert_eq!(labels(&first), labels(&second));
    for action in first.actions() {
        for cond in &action.preconditions {
            let time = first.condition_time(cond).unwrap();
            assert!(time <= action.min_time, "{}: precondition at {time}", action.label);
        }
    }
}

#[test]
fn heaters_switching_on_is_mutex() {
    let grounded = ground_task(&heaters_task(), "agent", &config(HeuristicKind::Ff)).unwrap();
    let id = |key: &str| grounded.action_by_key(key).unwrap();
    assert!(grounded.is_mutex(id("switch_heater_on h1"), id("switch_heater_on h2")));
    assert!(grounded.is_mutex(id("switch_heater_on h1"), id("switch_heater_off h1")));
    assert!(!grounded.is_mutex(id("perform_job j1 h1"), id("perform_job j2 h1")));
}

#[test]
fn heaters_plan_is_valid() {
    let config = config(HeuristicKind::Ff);
    let grounded = ground_task(&heaters_task(), "agent", &config).unwrap();
    let mut search = Search::new(&grounded, heuristic(HeuristicKind::Ff, &grounded, None), &config);
    let SearchOutcome::Solution(plan) = search.run() else {
        panic!("no plan found");
    };
    assert!(plan.is_solution());
    assert!(plan.num_steps() >= 3);
    let solution = search.solution().unwrap();
    assert_eq!(search.view(solution).validate(), Ok(()));
    let labels: Vec<&str> = plan.steps().iter().map(|s| &*s.label).collect();
    assert!(labels.contains(&"(perform_job j1 h1)") || labels.contains(&"(perform_job j1 h2)"));
    assert!(labels.contains(&"(perform_job j2 h1)") || labels.contains(&"(perform_job j2 h2)"));
}

#[test]
fn expansion_budget_stops_search() {
    let outcome = Agent::new("agent", heaters_task())
        .with_config(config(HeuristicKind::Ff))
        .with_max_expansions(Some(0))
        .run_alone()
        .unwrap();
    assert!(outcome.plan.is_none());
    assert!(outcome.stopped);
}

#[test]
fn door_agents_plan_jointly() {
    let outcomes = run_agents(door_tasks(), &config(HeuristicKind::Ff));
    assert_eq!(outcomes.len(), 2);
    let agents = vec!["a".to_string(), "b".to_string()];
    let mut printed = Vec::new();
    for (outcome, name) in outcomes.iter().zip(&agents) {
        assert_eq!(outcome.rounds, 2);
        let plan = outcome.plan.as_ref().expect("a joint plan");
        assert!(plan.is_solution());
        assert_eq!(plan.num_steps(), 2);
        assert!(plan.steps().iter().all(|s| s.time == 0));
        let inner = |s: fmap::ids::StepId| !s.is_sentinel();
        assert!(plan.orderings.iter().all(|&(x, y)| !(inner(x) && inner(y))));
        let owners: Vec<&str> = plan.steps().iter().map(|s| s.owner.as_str()).collect();
        assert!(owners.contains(&"a") && owners.contains(&"b"));
        printed.push(plan.print_plan(PlanFormat::Distributed, name, &agents));
    }
    assert_eq!(printed[0], "0: (wave a)\n");
    assert_eq!(printed[1], "0: (pass b door1)\n");
    assert!(outcomes.iter().all(|o| o.plan.as_ref().map(|p| p.makespan()) == Some(1)));
}

#[test]
fn private_agent_stays_in_grounding_until_everyone_is_done() {
    let mut tasks = door_tasks();
    tasks.push(hopper_task());
    let outcomes = run_agents(tasks, &config(HeuristicKind::Ff));
    assert_eq!(outcomes.len(), 3);
    let agents = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    for outcome in &outcomes {
        // c had nothing to send, yet left with the others
        assert_eq!(outcome.rounds, 2);
        let plan = outcome.plan.as_ref().expect("a joint plan");
        assert!(plan.is_solution());
        assert_eq!(plan.num_steps(), 3);
        assert!(plan.steps().iter().all(|s| s.time == 0));
    }
    let plan = outcomes[2].plan.as_ref().unwrap();
    assert_eq!(plan.print_plan(PlanFormat::Distributed, "c", &agents), "0: (hop c)\n");
    assert_eq!(
        outcomes[1].plan.as_ref().unwrap().print_plan(PlanFormat::Distributed, "b", &agents),
        "0: (pass b door1)\n"
    );
}

#[test]
fn door_agents_with_landmarks() {
    let outcomes = run_agents(door_tasks(), &config(HeuristicKind::FfLand));
    for outcome in &outcomes {
        assert!(outcome.landmarks.as_ref().is_some_and(|l| l.is_acyclic()));
        assert_eq!(outcome.plan.as_ref().map(|p| p.num_steps()), Some(2));
    }
}

#[test]
fn refinement_limits_report_incompleteness() {
    let limits = RefineLimits {
        support_combinations: None,
        threat_resolutions: Some(0),
    };
    let bounded = config(HeuristicKind::Ff).with_limits(limits);

    let outcome = Agent::new("agent", counter_task()).with_config(bounded.clone()).run_alone().unwrap();
    assert!(outcome.plan.is_none());
    assert!(outcome.incomplete && !outcome.stopped);

    for outcome in run_agents(door_tasks(), &bounded) {
        assert!(outcome.plan.is_none());
        assert!(outcome.incomplete);
    }

    // without limits the same search is complete and finds the plan
    let outcome = Agent::new("agent", counter_task())
        .with_config(config(HeuristicKind::Ff).with_limits(RefineLimits::UNBOUNDED))
        .run_alone()
        .unwrap();
    assert!(outcome.plan.is_some() && !outcome.incomplete);
}

#[derive(Default)]
struct Recorder(Mutex<Vec<Status>>);

impl PlannerObserver for Recorder {
    fn on_status_changed(&self, _agent: &str, status: Status) {
        self.0.lock().unwrap().push(status);
    }
}

#[test]
fn observer_follows_the_phases() {
    let recorder = Arc::new(Recorder::default());
    Agent::new("agent", counter_task())
        .with_config(config(HeuristicKind::FfLand))
        .with_observer(recorder.clone())
        .run_alone()
        .unwrap();
    assert_eq!(
        *recorder.0.lock().unwrap(),
        vec![
            Status::Starting,
            Status::Parsing,
            Status::Grounding,
            Status::Landmarks,
            Status::Planning,
            Status::Idle
        ]
    );
}

#[test]
fn broken_task_reports_error() {
    let mut broken = counter_task();
    broken.operators[0].params[0].types = vec!["no-such-type".to_string()];
    let recorder = Arc::new(Recorder::default());
    let result = Agent::new("agent", broken)
        .with_observer(recorder.clone())
        .run_alone();
    assert!(result.is_err());
    assert_eq!(recorder.0.lock().unwrap().last(), Some(&Status::Error));
}
