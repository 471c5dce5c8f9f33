//! Chunk Lock State Machine
//!
//! The per-holder, per-chunk lock state. Transitions:
//!
//! ```text
//! UNLOCKED          -- read_lock -->        READ_LOCKED(1)
//! READ_LOCKED(n)    -- read_lock -->        READ_LOCKED(n+1)
//! READ_LOCKED(n)    -- read_unlock -->      READ_LOCKED(n-1) | UNLOCKED
//! UNLOCKED          -- recv write_req(p) -> WRITE_REQUESTED(p)
//! WRITE_REQUESTED(p)-- all grants -->       WRITE_LOCKED(p)
//! WRITE_LOCKED(p)   -- recv unlock(p) -->   UNLOCKED
//! ```
//!
//! Waiting is a short poll loop; the distributed part of the protocol lives
//! in [`super::chunk::Chunk`].

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::hub::types::PeerId;
use crate::table::types::Id;

use super::protocol::LockVote;

const POLL_INTERVAL: Duration = Duration::from_millis(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    ReadLocked(usize),
    WriteRequested(PeerId),
    WriteLocked(PeerId),
}

pub struct ChunkLock {
    state: Mutex<LockState>,
    /// Request ids seen for this chunk, for spanning-tree cycle breaking.
    seen: Mutex<HashMap<Id, PeerId>>,
}

impl ChunkLock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LockState::Unlocked),
            seen: Mutex::new(HashMap::new()),
        }
    }

    pub async fn state(&self) -> LockState {
        self.state.lock().await.clone()
    }

    pub async fn is_write_locked_by(&self, peer: &PeerId) -> bool {
        matches!(&*self.state.lock().await, LockState::WriteLocked(holder) if holder == peer)
    }

    /// Local read lock. Readers wait for any write candidacy or lock to
    /// clear, then stack.
    pub async fn read_lock(&self, deadline: Instant) -> Result<()> {
        loop {
            {
                let mut state = self.state.lock().await;
                let readers = match &*state {
                    LockState::Unlocked => Some(1),
                    LockState::ReadLocked(n) => Some(*n + 1),
                    LockState::WriteRequested(_) | LockState::WriteLocked(_) => None,
                };
                if let Some(readers) = readers {
                    *state = LockState::ReadLocked(readers);
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                anyhow::bail!("read lock timed out");
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn read_unlock(&self) {
        let mut state = self.state.lock().await;
        let readers = match &*state {
            LockState::ReadLocked(n) => *n,
            other => panic!("read_unlock in state {:?}", other),
        };
        *state = if readers == 1 {
            LockState::Unlocked
        } else {
            LockState::ReadLocked(readers - 1)
        };
    }

    /// Begins the local candidacy of this peer: waits for UNLOCKED, then
    /// transitions to WRITE_REQUESTED(self).
    pub async fn begin_local_candidacy(&self, own: &PeerId, deadline: Instant) -> Result<()> {
        loop {
            {
                let mut state = self.state.lock().await;
                if *state == LockState::Unlocked {
                    *state = LockState::WriteRequested(own.clone());
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                anyhow::bail!("write lock timed out waiting for local state");
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// The candidacy won the vote.
    pub async fn promote(&self, own: &PeerId) {
        let mut state = self.state.lock().await;
        assert_eq!(
            *state,
            LockState::WriteRequested(own.clone()),
            "promote without candidacy"
        );
        *state = LockState::WriteLocked(own.clone());
    }

    /// The candidacy lost the vote.
    pub async fn revert(&self, own: &PeerId) {
        let mut state = self.state.lock().await;
        if *state == LockState::WriteRequested(own.clone()) {
            *state = LockState::Unlocked;
        }
    }

    /// Releases the own write lock after the writes made under it were
    /// propagated.
    pub async fn release_local(&self, own: &PeerId) {
        let mut state = self.state.lock().await;
        assert_eq!(
            *state,
            LockState::WriteLocked(own.clone()),
            "release without write lock"
        );
        *state = LockState::Unlocked;
    }

    /// One inbound distributed lock request, rules in tree order: known
    /// rival -> CONFLICT, local readers -> AM_READING, seen request ->
    /// HAVE_SEEN, else record and grant.
    pub async fn vote(&self, requester: &PeerId, request_id: &Id) -> LockVote {
        let mut seen = self.seen.lock().await;
        let mut state = self.state.lock().await;
        match &*state {
            LockState::WriteLocked(holder) if holder != requester => LockVote::Conflict {
                rival: holder.clone(),
                held: true,
            },
            LockState::WriteRequested(candidate) if candidate != requester => {
                LockVote::Conflict {
                    rival: candidate.clone(),
                    held: false,
                }
            }
            LockState::ReadLocked(_) => LockVote::AmReading,
            _ => {
                if seen.contains_key(request_id) {
                    LockVote::HaveSeen
                } else {
                    seen.insert(request_id.clone(), requester.clone());
                    if *state == LockState::Unlocked {
                        *state = LockState::WriteRequested(requester.clone());
                    }
                    LockVote::Granted
                }
            }
        }
    }

    /// Inbound unlock (or release of a lost candidacy) from `requester`.
    /// Idempotent: unlocking an already clean state is redundant.
    pub async fn remote_release(&self, requester: &PeerId) -> bool {
        let mut seen = self.seen.lock().await;
        let mut state = self.state.lock().await;
        seen.retain(|_, holder| holder != requester);
        match &*state {
            LockState::WriteLocked(holder) | LockState::WriteRequested(holder)
                if holder == requester =>
            {
                *state = LockState::Unlocked;
                true
            }
            _ => false,
        }
    }
}

impl Default for ChunkLock {
    fn default() -> Self {
        Self::new()
    }
}
