//! Distributed construction of the relaxed planning graph (disRPG).
//!
//! Before grounding, agents agree on the set of static functions: each proposes its local
//! statics, the baton merges the proposals and every agent rejects the candidates it modifies.
//! Grounding then proceeds in synchronized rounds. In each round every agent grounds to a local
//! fixed point, sends to each peer the values it newly reached and may disclose to it, and
//! incorporates the values received. The barrier closing each round carries whether the agent
//! sent or received anything: the protocol stops, for all agents at once, after the first round in
//! which none did.

use std::collections::BTreeSet;

use crate::comm::{AgentComm, Payload};
use crate::errors::Res;
use crate::params::PlannerConfig;
use crate::task::Task;

use super::statics::{confirms_static, local_static_functions};
use super::{GroundedTask, Grounder, SymbolicFact};

/// A value reached by an agent, as sent to a peer.
#[derive(Clone, Debug, PartialEq)]
pub struct SharedValue {
    pub fact: SymbolicFact,
    /// Objects of the fact with their type names, for peers that do not know them.
    pub objects: Vec<(String, Vec<String>)>,
    /// Level at which the sender reaches the value.
    pub level: u32,
    /// True if the value holds in the sender's initial state.
    pub initial: bool,
}

/// One-shot consensus on static functions.
///
/// A function is static iff no agent knowing it has an operator modifying it.
pub fn agree_on_statics(task: &Task, comm: &mut AgentComm) -> Res<BTreeSet<String>> {
    let local = local_static_functions(task);
    if comm.len() <= 1 {
        return Ok(local);
    }
    const PHASE: &str = "static functions";
    let rejected_locally = |candidates: &BTreeSet<String>| -> Vec<String> {
        candidates.iter().filter(|f| !confirms_static(task, f)).cloned().collect()
    };
    if comm.is_baton() {
        let mut candidates = local;
        for peer in comm.peers() {
            let proposal = comm.expect(peer, PHASE, "StaticProposal", |p| match p {
                Payload::StaticProposal(s) => Ok(s),
                p => Err(p),
            })?;
            candidates.extend(proposal);
        }
        comm.broadcast(Payload::StaticCandidates(candidates.iter().cloned().collect()))?;
        let mut rejected: BTreeSet<String> = rejected_locally(&candidates).into_iter().collect();
        for peer in comm.peers() {
            let r = comm.expect(peer, PHASE, "StaticRejections", |p| match p {
                Payload::StaticRejections(r) => Ok(r),
                p => Err(p),
            })?;
            rejected.extend(r);
        }
        let statics: BTreeSet<String> = candidates.difference(&rejected).cloned().collect();
        comm.broadcast(Payload::StaticResult(statics.iter().cloned().collect()))?;
        tracing::debug!("static functions: {statics:?}");
        Ok(statics)
    } else {
        comm.send(0, Payload::StaticProposal(local.into_iter().collect()))?;
        let candidates: BTreeSet<String> = comm
            .expect(0, PHASE, "StaticCandidates", |p| match p {
                Payload::StaticCandidates(c) => Ok(c),
                p => Err(p),
            })?
            .into_iter()
            .collect();
        comm.send(0, Payload::StaticRejections(rejected_locally(&candidates)))?;
        let statics = comm.expect(0, PHASE, "StaticResult", |p| match p {
            Payload::StaticResult(s) => Ok(s),
            p => Err(p),
        })?;
        Ok(statics.into_iter().collect())
    }
}

/// Runs the whole distributed grounding of this agent. Returns the grounded task and the number of
/// rounds it took.
pub fn distributed_grounding(task: &Task, comm: &mut AgentComm, config: &PlannerConfig) -> Res<(GroundedTask, u32)> {
    let _span = tracing::span!(tracing::Level::DEBUG, "DISRPG").entered();
    let statics = agree_on_statics(task, comm)?;
    let mut grounder = Grounder::new(task, comm.names().to_vec(), comm.me(), &statics, config)?;
    let mut round = 0;
    loop {
        round += 1;
        grounder.ground()?;

        let mut quiet = true;
        for peer in comm.peers() {
            let updates = grounder.shareable_updates(peer);
            let payload = if updates.is_empty() {
                Payload::NothingNew
            } else {
                quiet = false;
                tracing::trace!("round {round}: {} values for {}", updates.len(), comm.names()[peer]);
                Payload::Values(updates)
            };
            comm.send(peer, payload)?;
        }
        for peer in comm.peers() {
            let values = comm.expect(peer, "disRPG round", "Values or NothingNew", |p| match p {
                Payload::Values(v) => Ok(Some(v)),
                Payload::NothingNew => Ok(None),
                p => Err(p),
            })?;
            if let Some(values) = values {
                quiet = false;
                let changed = grounder.incorporate(peer, &values);
                tracing::trace!("round {round}: {changed} values changed from {}", comm.names()[peer]);
            }
        }
        // every agent leaves after the same round, once nobody had anything to exchange
        if !comm.round_barrier(round, !quiet)? {
            break;
        }
    }
    let grounded = grounder.finish();
    tracing::debug!(
        "disRPG converged in {round} rounds: {} actions, {} values",
        grounded.actions().len(),
        grounded.values().len()
    );
    Ok((grounded, round))
}
