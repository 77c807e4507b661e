use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use fmap::comm::{AgentRoster, ChannelHub};
use fmap::grounding::{NegationPolicy, SameObjects, ground_task};
use fmap::heuristics::HeuristicKind;
use fmap::landmarks;
use fmap::pop::{PlanFormat, RefineLimits};
use fmap::task::Task;
use fmap::{Agent, AgentOutcome, PlannerConfig};

/// Distributed multi-agent partial-order planner.
#[derive(Parser, Debug)]
#[clap(about = "FMAP, multi-agent forward partial-order planner")]
struct App {
    /// Logging level to use: one of "error", "warn", "info", "debug", "trace"
    #[clap(short, long, default_value = "info")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Plans jointly for a set of agents, each running in its own thread.
    Run(RunArgs),
    /// Grounds the task of a single agent and prints the resulting actions and landmarks.
    Ground(GroundArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// An agent and its task file, as `name=task.json`. Repeat for each agent.
    #[clap(long = "agent", value_parser = parse_agent, required = true)]
    agents: Vec<(String, PathBuf)>,

    /// Number of plan expansions after which the search gives up.
    #[clap(long)]
    max_expansions: Option<usize>,

    /// Output format of the plan: "regular" or "distributed"
    #[clap(long, default_value = "regular")]
    format: PlanFormat,

    /// Agents wait for each other before grounding.
    #[clap(long)]
    wait_sync_start: bool,

    #[clap(flatten)]
    conf: ConfigArgs,
}

#[derive(Debug, Args)]
struct GroundArgs {
    /// Task file
    task: PathBuf,

    /// Name of the agent owning the task
    #[clap(long, default_value = "agent")]
    name: String,

    #[clap(flatten)]
    conf: ConfigArgs,
}

/// Overrides of the `FMAP_*` environment parameters.
#[derive(Debug, Args, Clone)]
struct ConfigArgs {
    /// Worker threads generating refinements
    #[clap(long)]
    threads: Option<usize>,

    /// Heuristic: "ff", "add", "land" or "ff-land"
    #[clap(long)]
    heuristic: Option<HeuristicKind>,

    /// Negative preconditions: "failure" or "unknown"
    #[clap(long)]
    negation: Option<NegationPolicy>,

    /// Same-objects filtering: "none", "effects", "precondition" or "both"
    #[clap(long)]
    same_objects: Option<SameObjects>,

    /// Support combinations tried per inserted step, 0 for no limit. A limit makes the search incomplete.
    #[clap(long)]
    max_support_combinations: Option<usize>,

    /// Threat resolutions kept per support combination, 0 for no limit
    #[clap(long)]
    max_threat_resolutions: Option<usize>,
}

impl ConfigArgs {
    fn config(&self) -> PlannerConfig {
        let mut config = PlannerConfig::default();
        if let Some(t) = self.threads {
            config = config.with_threads(t);
        }
        if let Some(h) = self.heuristic {
            config = config.with_heuristic(h);
        }
        if let Some(n) = self.negation {
            config = config.with_negation(n);
        }
        if let Some(s) = self.same_objects {
            config = config.with_same_objects(s);
        }
        let limit = |n: usize| (n > 0).then_some(n);
        let limits = RefineLimits {
            support_combinations: self
                .max_support_combinations
                .map_or(config.limits.support_combinations, limit),
            threat_resolutions: self
                .max_threat_resolutions
                .map_or(config.limits.threat_resolutions, limit),
        };
        config.with_limits(limits)
    }
}

fn parse_agent(arg: &str) -> Result<(String, PathBuf), String> {
    match arg.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => Ok((name.to_string(), PathBuf::from(path))),
        _ => Err(format!("expected `name=task.json`, got `{arg}`")),
    }
}

fn run(args: &RunArgs) -> Result<()> {
    let names: Vec<&str> = args.agents.iter().map(|(n, _)| n.as_str()).collect();
    let mut roster = AgentRoster::local(&names, names[0]);
    roster.wait_sync_start = args.wait_sync_start;
    let mut hub = ChannelHub::connect(&roster);
    let config = args.conf.config();
    tracing::info!("{} agents, {config}", names.len());

    let mut comms = Vec::with_capacity(names.len());
    for name in &names {
        comms.push(hub.join(name)?);
    }
    drop(hub);

    let start = Instant::now();
    let outcomes: Vec<(String, Result<AgentOutcome>)> = std::thread::scope(|scope| {
        let handles: Vec<_> = args
            .agents
            .iter()
            .zip(comms)
            .map(|((name, path), mut comm)| {
                let agent = Agent::from_file(name, path)
                    .with_config(config.clone())
                    .with_roster(&roster)
                    .with_max_expansions(args.max_expansions);
                let name = name.clone();
                let handle = std::thread::Builder::new()
                    .name(name.clone())
                    .spawn_scoped(scope, move || agent.run(&mut comm));
                (name, handle)
            })
            .collect();
        handles
            .into_iter()
            .map(|(name, handle)| {
                let result = match handle {
                    Ok(h) => match h.join() {
                        Ok(r) => r.with_context(|| format!("agent `{name}` failed")),
                        Err(_) => Err(anyhow::anyhow!("agent `{name}` panicked")),
                    },
                    Err(e) => Err(anyhow::Error::from(e).context(format!("could not start agent `{name}`"))),
                };
                (name, result)
            })
            .collect()
    });
    tracing::info!("planning time: {:.3}s", start.elapsed().as_secs_f64());

    let agents: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    let mut printed = false;
    for (name, outcome) in outcomes {
        let outcome = outcome?;
        tracing::info!("{name}: {} grounding rounds, {}", outcome.rounds, outcome.stats);
        let Some(plan) = outcome.plan else {
            if !printed {
                if outcome.stopped {
                    println!("Search stopped after {} expansions.", outcome.stats.expanded);
                } else if outcome.incomplete {
                    println!("No plan found within the refinement limits.");
                } else {
                    println!("No plan found.");
                }
                printed = true;
            }
            continue;
        };
        match args.format {
            PlanFormat::Regular if printed => {}
            PlanFormat::Regular => {
                print!("{}", plan.print_plan(PlanFormat::Regular, &name, &agents));
                println!("; makespan: {}", plan.makespan());
                if let Some(m) = plan.metric_value() {
                    println!("; metric: {m}");
                }
                printed = true;
            }
            PlanFormat::Distributed => {
                println!("; {name}");
                print!("{}", plan.print_plan(PlanFormat::Distributed, &name, &agents));
                printed = true;
            }
        }
    }
    Ok(())
}

fn ground(args: &GroundArgs) -> Result<()> {
    let task = Task::from_file(&args.task)?;
    let config = args.conf.config();
    let grounded = ground_task(&task, &args.name, &config)?;
    println!(
        "{} variables, {} values, {} actions",
        grounded.vars().len(),
        grounded.values().len(),
        grounded.actions().len()
    );
    for a in grounded.actions() {
        println!("{} [{}]", a.label, a.min_time);
    }
    let graph = landmarks::extract(&grounded);
    if !graph.is_acyclic() {
        bail!("landmark graph has a cycle after post-processing");
    }
    println!("{} landmarks", graph.len());
    for o in graph.all_orderings() {
        println!(
            "{} -> {} ({})",
            graph.node_label(&grounded, o.before),
            graph.node_label(&grounded, o.after),
            o.kind
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = App::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_timer(tracing_subscriber::fmt::time::Uptime::from(Instant::now()))
        .with_thread_ids(true)
        .with_max_level(args.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Terminate the process if a thread panics.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    match &args.command {
        Command::Run(run_args) => run(run_args),
        Command::Ground(ground_args) => ground(ground_args),
    }
}
