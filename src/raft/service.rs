use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;

use crate::config::Config;
use crate::hub::service::Hub;
use crate::hub::types::{Envelope, PeerId};

use super::protocol::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaftState {
    Follower,
    Candidate,
    Leader,
}

struct Shared {
    state: RaftState,
    current_term: u64,
    /// The known leader of `current_term`, if any.
    leader: Option<PeerId>,
}

pub struct RaftCluster {
    hub: Arc<Hub>,
    peers: Mutex<Vec<PeerId>>,
    shared: Mutex<Shared>,
    last_heartbeat: Mutex<Instant>,
    heartbeat_interval: Duration,
    election_timeout_ms: (u64, u64),
    running: AtomicBool,
}

impl RaftCluster {
    pub fn new(hub: Arc<Hub>, config: &Config) -> Arc<Self> {
        Arc::new(Self {
            hub,
            peers: Mutex::new(Vec::new()),
            shared: Mutex::new(Shared {
                state: RaftState::Follower,
                current_term: 0,
                leader: None,
            }),
            last_heartbeat: Mutex::new(Instant::now()),
            heartbeat_interval: config.heartbeat_interval,
            election_timeout_ms: config.election_timeout_ms,
            running: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> RaftState {
        self.shared.lock().unwrap().state
    }

    pub fn term(&self) -> u64 {
        self.shared.lock().unwrap().current_term
    }

    pub fn leader(&self) -> Option<PeerId> {
        self.shared.lock().unwrap().leader.clone()
    }

    pub fn is_leader(&self) -> bool {
        self.state() == RaftState::Leader
    }

    pub fn register_handlers(self: Arc<Self>) {
        let cluster = self.clone();
        self.hub.register_handler(MSG_HEARTBEAT, move |envelope: Envelope| {
            let cluster = cluster.clone();
            async move {
                let heartbeat: Heartbeat = match envelope.payload() {
                    Ok(heartbeat) => heartbeat,
                    Err(_) => return Envelope::invalid(),
                };
                cluster.handle_heartbeat(envelope.sender, heartbeat.term);
                Envelope::ack()
            }
        });

        let cluster = self.clone();
        self.hub.register_handler(MSG_VOTE, move |envelope: Envelope| {
            let cluster = cluster.clone();
            async move {
                let request: VoteRequest = match envelope.payload() {
                    Ok(request) => request,
                    Err(_) => return Envelope::invalid(),
                };
                let granted = cluster.handle_vote_request(&envelope.sender, request.term);
                Envelope::typed(MSG_VOTE_RESPONSE, &VoteResponse { granted })
                    .unwrap_or_else(|_| Envelope::invalid())
            }
        });
    }

    /// Fixes the peer set to the hub's current view and starts the
    /// background election/heartbeat task.
    pub fn start(self: Arc<Self>) {
        *self.peers.lock().unwrap() = self.hub.peers();
        *self.last_heartbeat.lock().unwrap() = Instant::now();
        self.running.store(true, Ordering::SeqCst);
        let cluster = self.clone();
        tokio::spawn(async move {
            cluster.run().await;
        });
        tracing::info!(
            "Raft started on {} with {} peers",
            self.hub.own_id(),
            self.peers.lock().unwrap().len()
        );
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn run(self: Arc<Self>) {
        let mut election_timeout = self.random_election_timeout();
        while self.running.load(Ordering::SeqCst) {
            let (state, term) = {
                let shared = self.shared.lock().unwrap();
                (shared.state, shared.current_term)
            };

            match state {
                RaftState::Leader => {
                    self.send_heartbeats(term);
                    tokio::time::sleep(self.heartbeat_interval).await;
                }
                RaftState::Follower | RaftState::Candidate => {
                    let since_heartbeat = self.last_heartbeat.lock().unwrap().elapsed();
                    if since_heartbeat >= election_timeout {
                        self.conduct_election().await;
                        // Renew every session.
                        election_timeout = self.random_election_timeout();
                        *self.last_heartbeat.lock().unwrap() = Instant::now();
                    } else {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                }
            }
        }
    }

    fn send_heartbeats(&self, term: u64) {
        let peers = self.peers.lock().unwrap().clone();
        for peer in peers {
            let hub = self.hub.clone();
            tokio::spawn(async move {
                hub.try_request(&peer, MSG_HEARTBEAT, &Heartbeat { term }).await;
            });
        }
    }

    async fn conduct_election(&self) {
        let term = {
            let mut shared = self.shared.lock().unwrap();
            shared.state = RaftState::Candidate;
            shared.current_term += 1;
            shared.leader = None;
            shared.current_term
        };
        let peers = self.peers.lock().unwrap().clone();
        tracing::debug!(
            "Peer {} is an election candidate for term {}",
            self.hub.own_id(),
            term
        );

        let mut ballots = Vec::new();
        for peer in &peers {
            let hub = self.hub.clone();
            let peer = peer.clone();
            ballots.push(tokio::spawn(async move {
                match hub.try_request(&peer, MSG_VOTE, &VoteRequest { term }).await {
                    Some(reply) if reply.is_type(MSG_VOTE_RESPONSE) => reply
                        .payload::<VoteResponse>()
                        .map(|response| response.granted)
                        .unwrap_or(false),
                    _ => false,
                }
            }));
        }
        let mut votes = 0usize;
        for ballot in ballots {
            if ballot.await.unwrap_or(false) {
                votes += 1;
            }
        }

        let mut shared = self.shared.lock().unwrap();
        if shared.state == RaftState::Candidate
            && shared.current_term == term
            && votes >= peers.len() / 2
        {
            shared.state = RaftState::Leader;
            shared.leader = Some(self.hub.own_id().clone());
            tracing::info!(
                "Peer {} elected as the leader for term {}",
                self.hub.own_id(),
                term
            );
        } else {
            shared.state = RaftState::Follower;
            shared.leader = None;
        }
    }

    pub(crate) fn handle_heartbeat(&self, sender: PeerId, term: u64) {
        let mut shared = self.shared.lock().unwrap();
        let unchanged = shared.leader.as_ref() == Some(&sender) && term == shared.current_term;
        if unchanged {
            drop(shared);
            *self.last_heartbeat.lock().unwrap() = Instant::now();
            return;
        }

        if term > shared.current_term || (term == shared.current_term && shared.leader.is_none()) {
            // A leader with a newer term, or the first leader of this term.
            shared.current_term = term;
            shared.leader = Some(sender);
            if shared.state == RaftState::Leader {
                shared.state = RaftState::Follower;
            }
            drop(shared);
            *self.last_heartbeat.lock().unwrap() = Instant::now();
        } else if shared.state == RaftState::Follower
            && term == shared.current_term
            && shared.current_term > 0
            && shared.leader.is_some()
        {
            panic!(
                "peer {} has found 2 leaders in term {}: {} (current) and {} (new)",
                self.hub.own_id(),
                shared.current_term,
                shared.leader.as_ref().unwrap(),
                sender
            );
        }
        // A heartbeat from an older term is ignored.
    }

    pub(crate) fn handle_vote_request(&self, candidate: &PeerId, term: u64) -> bool {
        let granted = {
            let mut shared = self.shared.lock().unwrap();
            if term > shared.current_term {
                shared.current_term = term;
                shared.leader = None;
                shared.state = RaftState::Follower;
                tracing::debug!(
                    "Peer {} is voting for {} in term {}",
                    self.hub.own_id(),
                    candidate,
                    term
                );
                true
            } else {
                tracing::debug!(
                    "Peer {} is declining vote for {} in term {}",
                    self.hub.own_id(),
                    candidate,
                    term
                );
                false
            }
        };
        *self.last_heartbeat.lock().unwrap() = Instant::now();
        granted
    }

    fn random_election_timeout(&self) -> Duration {
        let (low, high) = self.election_timeout_ms;
        Duration::from_millis(rand::thread_rng().gen_range(low..=high))
    }
}
