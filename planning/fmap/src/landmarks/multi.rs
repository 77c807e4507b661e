//! Landmark extraction over the distributed planning graph.
//!
//! Each agent extracts landmarks from its own view of the disRPG, where values reached only by
//! peers count as externally achieved. The agents then exchange, in one synchronized round, the
//! part of their graph made only of facts they may disclose to each peer, and merge what they
//! receive into their own graph.

use crate::comm::{AgentComm, Payload};
use crate::errors::Res;
use crate::grounding::{GroundedTask, SymbolicFact};

use super::{LandmarkGraph, OrderingKind, extract};

/// Part of a landmark graph sent to one peer. Orderings index `nodes`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SharedLandmarks {
    pub nodes: Vec<(Vec<SymbolicFact>, bool)>,
    pub orderings: Vec<(usize, usize, OrderingKind)>,
}

/// Nodes whose facts may all be disclosed to `dest`, with the orderings between them.
pub fn shareable_part(graph: &LandmarkGraph, task: &GroundedTask, dest: &str) -> SharedLandmarks {
    let mut shared = SharedLandmarks::default();
    let mut position = vec![None; graph.len()];
    for node in graph.nodes() {
        if node.facts.iter().all(|&f| task.can_share(f, dest)) {
            position[node.id] = Some(shared.nodes.len());
            let facts = node.facts.iter().map(|&f| task.symbolic(f)).collect();
            shared.nodes.push((facts, node.is_goal));
        }
    }
    for o in graph.all_orderings() {
        if let (Some(a), Some(b)) = (position[o.before], position[o.after]) {
            shared.orderings.push((a, b, o.kind));
        }
    }
    shared
}

/// Adds the landmarks of a peer whose facts are all known locally. Returns the number of new nodes.
pub fn merge(graph: &mut LandmarkGraph, task: &GroundedTask, shared: &SharedLandmarks) -> usize {
    let mut added = 0;
    let mut ids = Vec::with_capacity(shared.nodes.len());
    for (facts, is_goal) in &shared.nodes {
        let local: Option<Vec<_>> = facts.iter().map(|f| task.resolve(f)).collect();
        ids.push(local.map(|facts| {
            let (id, new) = graph.add_node(facts, *is_goal);
            added += new as usize;
            id
        }));
    }
    for &(a, b, kind) in &shared.orderings {
        if let (Some(Some(a)), Some(Some(b))) = (ids.get(a), ids.get(b)) {
            graph.add_ordering(*a, *b, kind);
        }
    }
    added
}

/// Landmark graph of this agent, completed with the landmarks disclosed by its peers.
pub fn extract_distributed(task: &GroundedTask, comm: &mut AgentComm) -> Res<LandmarkGraph> {
    let mut graph = extract(task);
    if comm.len() <= 1 {
        return Ok(graph);
    }
    let _span = tracing::span!(tracing::Level::DEBUG, "LANDMARKS").entered();
    for peer in comm.peers() {
        let part = shareable_part(&graph, task, &comm.names()[peer]);
        comm.send(peer, Payload::Landmarks(part))?;
    }
    let mut received = Vec::new();
    for peer in comm.peers() {
        received.push(comm.expect(peer, "landmark exchange", "Landmarks", |p| match p {
            Payload::Landmarks(l) => Ok(l),
            p => Err(p),
        })?);
    }
    let added: usize = received.iter().map(|part| merge(&mut graph, task, part)).sum();
    comm.barrier(0)?;
    graph.remove_cycles();
    graph.filter_transitive_orders();
    tracing::debug!("{added} landmarks learned from peers, {} in total", graph.len());
    Ok(graph)
}
