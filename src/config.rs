//! Peer Configuration
//!
//! All tunables of a peer in one place. The binary fills this from command
//! line arguments and environment variables; tests construct it directly
//! with `Config::for_bind`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::hub::types::PeerId;

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the RPC listener binds to. Port 0 picks an ephemeral port;
    /// the peer's identity is derived from the resolved address.
    pub bind: SocketAddr,
    /// Peers to announce to at startup, in addition to discovery-file hits.
    pub seeds: Vec<PeerId>,
    /// Line-delimited peer file used for discovery, if any.
    pub discovery_file: Option<PathBuf>,
    /// Number of Chord fingers kept per ring. The keyspace is fixed at
    /// 2^16; fewer fingers only means slower routing.
    pub chord_fingers: usize,
    /// Raft leader heartbeat send period.
    pub heartbeat_interval: Duration,
    /// Raft election timeout range in milliseconds, re-randomized per
    /// election.
    pub election_timeout_ms: (u64, u64),
    /// When set, updated revisions carry previous/next links forming a
    /// versioned chain.
    pub cru_linked: bool,
    /// Per-attempt timeout of a single remote request.
    pub rpc_timeout: Duration,
    /// Attempts per remote request before giving up.
    pub rpc_attempts: usize,
    /// Overall time allowed for acquiring a distributed write lock.
    pub lock_timeout: Duration,
    /// Whether to run the experimental Raft cluster.
    pub enable_raft: bool,
}

impl Config {
    /// Defaults for a peer bound to `bind`.
    pub fn for_bind(bind: SocketAddr) -> Self {
        Self {
            bind,
            seeds: Vec::new(),
            discovery_file: None,
            chord_fingers: 16,
            heartbeat_interval: Duration::from_millis(25),
            election_timeout_ms: (50, 150),
            cru_linked: false,
            rpc_timeout: Duration::from_millis(500),
            rpc_attempts: 3,
            lock_timeout: Duration::from_secs(10),
            enable_raft: false,
        }
    }

    /// Parses `--bind <addr>` plus the optional flags understood by the peer
    /// binary. Unknown arguments are ignored so wrappers can pass extras.
    pub fn from_args(args: &[String]) -> anyhow::Result<Self> {
        let mut bind: Option<SocketAddr> = None;
        let mut seeds = Vec::new();
        let mut discovery_file = None;
        let mut cru_linked = false;
        let mut enable_raft = false;
        let mut chord_fingers = 16usize;
        let mut heartbeat_ms: Option<u64> = None;
        let mut election_timeout_ms: Option<(u64, u64)> = None;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--bind" => {
                    bind = Some(args[i + 1].parse()?);
                    i += 2;
                }
                "--seed" => {
                    seeds.push(PeerId::new(args[i + 1].clone()));
                    i += 2;
                }
                "--discovery-file" => {
                    discovery_file = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                }
                "--chord-fingers" => {
                    chord_fingers = args[i + 1].parse()?;
                    i += 2;
                }
                "--heartbeat-ms" => {
                    heartbeat_ms = Some(args[i + 1].parse()?);
                    i += 2;
                }
                "--election-timeout-ms" => {
                    // Range as "low..high".
                    let (low, high) = args[i + 1]
                        .split_once("..")
                        .ok_or_else(|| anyhow::anyhow!("expected <low>..<high>"))?;
                    election_timeout_ms = Some((low.parse()?, high.parse()?));
                    i += 2;
                }
                "--cru-linked" => {
                    cru_linked = true;
                    i += 1;
                }
                "--raft" => {
                    enable_raft = true;
                    i += 1;
                }
                _ => {
                    i += 1;
                }
            }
        }

        let bind = bind.ok_or_else(|| anyhow::anyhow!("--bind is required"))?;
        let mut config = Self::for_bind(bind);
        config.seeds = seeds;
        config.discovery_file = discovery_file;
        config.cru_linked = cru_linked;
        config.enable_raft = enable_raft;
        config.chord_fingers = chord_fingers.clamp(1, 16);
        if let Some(heartbeat_ms) = heartbeat_ms {
            config.heartbeat_interval = Duration::from_millis(heartbeat_ms);
        }
        if let Some((low, high)) = election_timeout_ms {
            anyhow::ensure!(low < high, "empty election timeout range");
            config.election_timeout_ms = (low, high);
        }

        if let Some(value) = std::env::var("RPC_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
        {
            config.rpc_timeout = Duration::from_millis(value);
        }
        if let Some(value) = std::env::var("LOCK_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
        {
            config.lock_timeout = Duration::from_millis(value);
        }

        Ok(config)
    }
}
