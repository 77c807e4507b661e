//! Message passing between the agents of a planning session.
//!
//! Every agent owns one inbox. Exchanges are synchronous: an agent sends its contribution to
//! each peer, then blocks until it has received the contribution of each peer. Messages from a
//! peer that is not being waited on are buffered, so the order in which peers progress does not
//! matter. Between rounds, the baton agent (first agent of the roster) drives a barrier.

use std::collections::VecDeque;

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::errors::{CommError, ProtocolError, Res};
use crate::grounding::distributed::SharedValue;
use crate::landmarks::multi::SharedLandmarks;
use crate::negotiation::{Proposal, Verdict};

/// Participants of a session. The first agent holds the baton.
#[derive(Clone, Debug)]
pub struct AgentRoster {
    /// Name and endpoint of each agent.
    pub agents: Vec<(String, String)>,
    pub this_agent: String,
    /// If set, agents wait for each other before starting to ground.
    pub wait_sync_start: bool,
}

impl AgentRoster {
    /// Roster of in-process agents, whose endpoint is their name.
    pub fn local(names: &[&str], this_agent: &str) -> Self {
        AgentRoster {
            agents: names.iter().map(|n| (n.to_string(), format!("local://{n}"))).collect(),
            this_agent: this_agent.to_string(),
            wait_sync_start: false,
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.agents.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn index_of(&self, name: &str) -> Result<usize, CommError> {
        self.agents
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| CommError::UnknownAgent(name.to_string()))
    }

    pub fn me(&self) -> Result<usize, CommError> {
        self.index_of(&self.this_agent)
    }

    pub fn baton(&self) -> &str {
        &self.agents[0].0
    }
}

#[derive(Clone, Debug)]
pub enum Payload {
    Start,
    StaticProposal(Vec<String>),
    StaticCandidates(Vec<String>),
    StaticRejections(Vec<String>),
    StaticResult(Vec<String>),
    Values(Vec<SharedValue>),
    NothingNew,
    /// Arrival at the barrier of a round, telling whether the agent was busy in that round.
    Ready(u32, bool),
    /// Release from the barrier of a round, telling whether any agent was busy.
    Go(u32, bool),
    Landmarks(SharedLandmarks),
    Proposals(Vec<Proposal>),
    Verdicts(Vec<Verdict>),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Start => "Start",
            Payload::StaticProposal(_) => "StaticProposal",
            Payload::StaticCandidates(_) => "StaticCandidates",
            Payload::StaticRejections(_) => "StaticRejections",
            Payload::StaticResult(_) => "StaticResult",
            Payload::Values(_) => "Values",
            Payload::NothingNew => "NothingNew",
            Payload::Ready(..) => "Ready",
            Payload::Go(..) => "Go",
            Payload::Landmarks(_) => "Landmarks",
            Payload::Proposals(_) => "Proposals",
            Payload::Verdicts(_) => "Verdicts",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Message {
    pub from: usize,
    pub payload: Payload,
}

/// Creates the inboxes of all agents of a roster and hands them out.
pub struct ChannelHub {
    names: Vec<String>,
    senders: Vec<Sender<Message>>,
    receivers: Vec<Option<Receiver<Message>>>,
}

impl ChannelHub {
    pub fn connect(roster: &AgentRoster) -> ChannelHub {
        let names = roster.names();
        let (senders, receivers) = names
            .iter()
            .map(|_| {
                let (s, r) = unbounded();
                (s, Some(r))
            })
            .unzip();
        ChannelHub {
            names,
            senders,
            receivers,
        }
    }

    /// Endpoint of agent `name`. Each endpoint can only be taken once.
    pub fn join(&mut self, name: &str) -> Result<AgentComm, CommError> {
        let me = self
            .names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| CommError::UnknownAgent(name.to_string()))?;
        let inbox = self.receivers[me]
            .take()
            .ok_or_else(|| CommError::Disconnected(name.to_string()))?;
        // an agent holds no sender to its own inbox: it is disconnected once all peers are gone
        let outboxes = self
            .senders
            .iter()
            .enumerate()
            .map(|(i, s)| if i == me { None } else { Some(s.clone()) })
            .collect();
        Ok(AgentComm {
            me,
            names: self.names.clone(),
            outboxes,
            inbox,
            pending: vec![VecDeque::new(); self.names.len()],
        })
    }
}

/// Communication endpoint of one agent.
pub struct AgentComm {
    me: usize,
    names: Vec<String>,
    outboxes: Vec<Option<Sender<Message>>>,
    inbox: Receiver<Message>,
    pending: Vec<VecDeque<Payload>>,
}

impl AgentComm {
    pub fn me(&self) -> usize {
        self.me
    }

    pub fn name(&self) -> &str {
        &self.names[self.me]
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn is_baton(&self) -> bool {
        self.me == 0
    }

    pub fn peers(&self) -> impl Iterator<Item = usize> + use<> {
        let me = self.me;
        (0..self.names.len()).filter(move |&i| i != me)
    }

    pub fn send(&self, to: usize, payload: Payload) -> Result<(), CommError> {
        let dest = &self.names[to];
        let Some(outbox) = &self.outboxes[to] else {
            return Err(CommError::UnknownAgent(dest.clone()));
        };
        tracing::trace!("{} -> {}: {}", self.name(), dest, payload.kind());
        outbox
            .send(Message {
                from: self.me,
                payload,
            })
            .map_err(|_| CommError::Disconnected(dest.clone()))
    }

    pub fn broadcast(&self, payload: Payload) -> Result<(), CommError> {
        for peer in self.peers() {
            self.send(peer, payload.clone())?;
        }
        Ok(())
    }

    /// Blocks until a message from `peer` is available.
    pub fn receive_from(&mut self, peer: usize) -> Result<Payload, CommError> {
        if let Some(p) = self.pending[peer].pop_front() {
            return Ok(p);
        }
        loop {
            let msg = self
                .inbox
                .recv()
                .map_err(|_| CommError::Disconnected(self.names[peer].clone()))?;
            if msg.from == peer {
                return Ok(msg.payload);
            }
            self.pending[msg.from].push_back(msg.payload);
        }
    }

    /// Receives the next message of `peer` and extracts its content with `accept`, which hands
    /// back the payload if it is not the expected one.
    pub fn expect<T>(
        &mut self,
        peer: usize,
        phase: &'static str,
        expected: &'static str,
        accept: impl FnOnce(Payload) -> Result<T, Payload>,
    ) -> Res<T> {
        let payload = self.receive_from(peer)?;
        accept(payload).map_err(|got| {
            let err = ProtocolError {
                phase,
                peer: self.names[peer].clone(),
                expected,
                got: got.kind().to_string(),
            };
            tracing::error!("{err}");
            err.into()
        })
    }

    /// Synchronization point between rounds: nobody starts round `round + 1` before every agent
    /// reached the barrier of round `round`.
    pub fn barrier(&mut self, round: u32) -> Res<()> {
        self.round_barrier(round, false).map(|_| ())
    }

    /// Barrier deciding whether another round is needed. Each agent tells whether it was `busy`
    /// during the round; all of them get the same answer: true iff at least one agent was busy.
    pub fn round_barrier(&mut self, round: u32, busy: bool) -> Res<bool> {
        if self.is_baton() {
            let mut any = busy;
            for peer in self.peers() {
                any |= self.expect(peer, "barrier", "Ready", |p| match p {
                    Payload::Ready(r, b) if r == round => Ok(b),
                    p => Err(p),
                })?;
            }
            for peer in self.peers() {
                self.send(peer, Payload::Go(round, any))?;
            }
            Ok(any)
        } else {
            self.send(0, Payload::Ready(round, busy))?;
            self.expect(0, "barrier", "Go", |p| match p {
                Payload::Go(r, any) if r == round => Ok(any),
                p => Err(p),
            })
        }
    }

    /// Waits for every agent to be connected before starting.
    pub fn synchronized_start(&mut self) -> Res<()> {
        self.broadcast(Payload::Start)?;
        for peer in self.peers() {
            self.expect(peer, "start", "Start", |p| match p {
                Payload::Start => Ok(()),
                p => Err(p),
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_buffered_per_peer() {
        let roster = AgentRoster::local(&["a", "b", "c"], "a");
        let mut hub = ChannelHub::connect(&roster);
        let mut a = hub.join("a").unwrap();
        let b = hub.join("b").unwrap();
        let c = hub.join("c").unwrap();
        assert!(hub.join("a").is_err());
        c.send(0, Payload::Ready(1, false)).unwrap();
        b.send(0, Payload::Go(1, true)).unwrap();
        assert!(matches!(a.receive_from(1).unwrap(), Payload::Go(1, true)));
        assert!(matches!(a.receive_from(2).unwrap(), Payload::Ready(1, false)));
    }

    #[test]
    fn barrier_across_threads() {
        let roster = AgentRoster::local(&["a", "b", "c"], "a");
        let mut hub = ChannelHub::connect(&roster);
        let comms: Vec<AgentComm> = ["a", "b", "c"].iter().map(|n| hub.join(n).unwrap()).collect();
        std::thread::scope(|s| {
            for mut comm in comms {
                s.spawn(move || {
                    for round in 1..=3 {
                        comm.barrier(round).unwrap();
                    }
                });
            }
        });
    }

    #[test]
    fn round_barrier_shares_the_decision() {
        let roster = AgentRoster::local(&["a", "b", "c"], "a");
        let mut hub = ChannelHub::connect(&roster);
        let comms: Vec<AgentComm> = ["a", "b", "c"].iter().map(|n| hub.join(n).unwrap()).collect();
        let answers: Vec<Vec<bool>> = std::thread::scope(|s| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|mut comm| {
                    s.spawn(move || {
                        // only `c` is busy, and only in the first round
                        let is_c = comm.name() == "c";
                        let mut answers = Vec::new();
                        for round in 1..=2 {
                            answers.push(comm.round_barrier(round, is_c && round == 1).unwrap());
                        }
                        answers
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for a in answers {
            assert_eq!(a, vec![true, false]);
        }
    }

    #[test]
    fn unexpected_message_is_a_protocol_error() {
        let roster = AgentRoster::local(&["a", "b"], "a");
        let mut hub = ChannelHub::connect(&roster);
        let mut a = hub.join("a").unwrap();
        let b = hub.join("b").unwrap();
        b.send(0, Payload::NothingNew).unwrap();
        let err = a.barrier(1).unwrap_err();
        assert!(err.to_string().contains("expected Ready"));
    }

    #[test]
    fn closed_peer_disconnects() {
        let roster = AgentRoster::local(&["a", "b"], "a");
        let mut hub = ChannelHub::connect(&roster);
        let mut a = hub.join("a").unwrap();
        drop(hub);
        assert!(matches!(a.receive_from(1), Err(CommError::Disconnected(_))));
    }
}
