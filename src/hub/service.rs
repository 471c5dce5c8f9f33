use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use dashmap::DashMap;
use serde::Serialize;

use crate::config::Config;
use crate::time::{LogicalClock, LogicalTime};

use super::discovery::FileDiscovery;
use super::registry::MessageRegistry;
use super::types::{Envelope, PeerId, TYPE_INVALID};

/// The per-peer network hub: identity, clock, known peers, transport and
/// dispatch. Everything else in the crate holds an `Arc<Hub>`.
pub struct Hub {
    own_id: PeerId,
    clock: LogicalClock,
    peers: DashMap<PeerId, ()>,
    registry: Arc<MessageRegistry>,
    http_client: reqwest::Client,
    rpc_timeout: Duration,
    rpc_attempts: usize,
    discovery: Option<FileDiscovery>,
}

impl Hub {
    pub fn new(own_id: PeerId, config: &Config) -> Arc<Self> {
        Arc::new(Self {
            own_id,
            clock: LogicalClock::new(),
            peers: DashMap::new(),
            registry: MessageRegistry::new(),
            http_client: reqwest::Client::new(),
            rpc_timeout: config.rpc_timeout,
            rpc_attempts: config.rpc_attempts,
            discovery: config
                .discovery_file
                .as_ref()
                .map(|path| FileDiscovery::new(path.clone())),
        })
    }

    pub fn own_id(&self) -> &PeerId {
        &self.own_id
    }

    pub fn clock(&self) -> &LogicalClock {
        &self.clock
    }

    /// Shorthand for advancing the clock.
    pub fn sample(&self) -> LogicalTime {
        self.clock.sample()
    }

    pub fn register_handler<F, Fut>(&self, msg_type: &str, handler: F)
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Envelope> + Send + 'static,
    {
        self.registry.register(msg_type, handler);
    }

    pub fn registry(&self) -> &Arc<MessageRegistry> {
        &self.registry
    }

    pub fn add_peer(&self, peer: PeerId) {
        if peer != self.own_id {
            self.peers.insert(peer, ());
        }
    }

    pub fn remove_peer(&self, peer: &PeerId) {
        self.peers.remove(peer);
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.peers
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn peer_size(&self) -> usize {
        self.peers.len()
    }

    /// Sends a typed request and waits for the reply. Retries transport
    /// failures with jittered exponential backoff; an `invalid` reply is
    /// promoted to a hard error since it indicates protocol skew.
    pub async fn request<T: Serialize>(
        &self,
        to: &PeerId,
        msg_type: &str,
        payload: &T,
    ) -> Result<Envelope> {
        let mut envelope = Envelope::typed(msg_type, payload)?;
        envelope.sender = self.own_id.clone();
        envelope.logical_time = self.clock.sample().0;

        let reply = self.post_with_retry(to, &envelope).await?;
        self.clock.merge(LogicalTime(reply.logical_time));
        if reply.is_type(TYPE_INVALID) {
            anyhow::bail!("peer {} does not understand {}", to, msg_type);
        }
        Ok(reply)
    }

    /// Like [`Hub::request`] but swallows transport failures.
    pub async fn try_request<T: Serialize>(
        &self,
        to: &PeerId,
        msg_type: &str,
        payload: &T,
    ) -> Option<Envelope> {
        match self.request(to, msg_type, payload).await {
            Ok(reply) => Some(reply),
            Err(e) => {
                tracing::warn!("Request {} to {} failed: {}", msg_type, to, e);
                None
            }
        }
    }

    /// Sends the same request to every known peer and collects the results.
    pub async fn broadcast<T: Serialize>(
        &self,
        msg_type: &str,
        payload: &T,
    ) -> HashMap<PeerId, Result<Envelope>> {
        let mut responses = HashMap::new();
        for peer in self.peers() {
            let result = self.request(&peer, msg_type, payload).await;
            responses.insert(peer, result);
        }
        responses
    }

    /// Entry point for inbound envelopes: merges the sender's clock,
    /// dispatches, and stamps the reply.
    pub async fn handle(&self, envelope: Envelope) -> Envelope {
        self.clock.merge(LogicalTime(envelope.logical_time));
        let mut reply = self.registry.dispatch(envelope).await;
        reply.sender = self.own_id.clone();
        reply.logical_time = self.clock.sample().0;
        reply
    }

    /// Discovery bootstrap: register in the peer file, then announce to
    /// every discovered peer and every seed.
    pub async fn join_network(&self, seeds: &[PeerId]) -> Result<()> {
        let mut found: Vec<PeerId> = seeds.to_vec();
        if let Some(discovery) = &self.discovery {
            discovery.announce(&self.own_id).await?;
            found.extend(discovery.get_peers(&self.own_id).await?);
        }
        found.sort();
        found.dedup();

        for peer in found {
            if peer == self.own_id {
                continue;
            }
            tracing::info!("Found peer {}, announcing...", peer);
            match self.request(&peer, super::types::MSG_ANNOUNCE, &self.own_id).await {
                Ok(reply) if reply.is_ack() => self.add_peer(peer),
                Ok(reply) => {
                    tracing::warn!("Peer {} answered announce with {}", peer, reply.msg_type)
                }
                Err(e) => tracing::warn!("Could not announce to {}: {}", peer, e),
            }
        }
        Ok(())
    }

    /// Removes the own registration from the discovery file.
    pub async fn shutdown(&self) {
        if let Some(discovery) = &self.discovery {
            if let Err(e) = discovery.remove(&self.own_id).await {
                tracing::warn!("Failed to deregister from discovery: {}", e);
            }
        }
        self.peers.clear();
    }

    async fn post_with_retry(&self, to: &PeerId, envelope: &Envelope) -> Result<Envelope> {
        let url = to.rpc_url();
        let mut delay_ms = 150u64;

        for attempt in 0..self.rpc_attempts {
            let response = self
                .http_client
                .post(url.clone())
                .json(envelope)
                .timeout(self.rpc_timeout)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    return Ok(resp.json::<Envelope>().await?);
                }
                Ok(resp) => {
                    anyhow::bail!("peer {} answered HTTP {}", to, resp.status());
                }
                Err(e) => {
                    if attempt + 1 == self.rpc_attempts {
                        return Err(anyhow::anyhow!("can't reach {}: {}", to, e));
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(anyhow::anyhow!("retry attempts exhausted for {}", to))
    }
}
