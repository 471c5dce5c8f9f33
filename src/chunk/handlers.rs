//! Chunk Handlers
//!
//! Wires the replication and lock RPCs into the hub's dispatch table,
//! routed `table -> chunk`. A request addressed to a chunk this peer does
//! not hold is declined, not forwarded; the requester consults the index
//! and retries elsewhere.

use std::sync::Arc;

use crate::hub::service::Hub;
use crate::hub::types::Envelope;
use crate::table::manager::TableManager;

use super::protocol::*;

pub fn register_handlers(hub: &Arc<Hub>, tables: &Arc<TableManager>) {
    let manager = tables.clone();
    hub.register_handler(MSG_CONNECT, move |envelope: Envelope| {
        let manager = manager.clone();
        async move {
            let request: ConnectRequest = match envelope.payload() {
                Ok(request) => request,
                Err(_) => return Envelope::invalid(),
            };
            let Some(chunk) = manager.chunk_of(&request.table, &request.chunk_id) else {
                return Envelope::decline();
            };
            match chunk.handle_connect(envelope.sender).await {
                Ok(snapshot) => Envelope::typed(MSG_CONNECT_RESPONSE, &snapshot)
                    .unwrap_or_else(|_| Envelope::invalid()),
                Err(e) => {
                    tracing::error!("Connect handling failed: {}", e);
                    Envelope::cant_reach()
                }
            }
        }
    });

    let manager = tables.clone();
    hub.register_handler(MSG_PARTICIPATION, move |envelope: Envelope| {
        let manager = manager.clone();
        async move {
            let request: ParticipationRequest = match envelope.payload() {
                Ok(request) => request,
                Err(_) => return Envelope::invalid(),
            };
            let Some(table) = manager.get_table(&request.table) else {
                return Envelope::decline();
            };
            if table.has_chunk(&request.chunk_id) {
                return Envelope::redundant();
            }
            match table.connect_to(&request.chunk_id, &envelope.sender).await {
                Ok(_) => Envelope::ack(),
                Err(e) => {
                    tracing::warn!(
                        "Could not join chunk {} offered by {}: {}",
                        request.chunk_id,
                        envelope.sender,
                        e
                    );
                    Envelope::cant_reach()
                }
            }
        }
    });

    let manager = tables.clone();
    hub.register_handler(MSG_INSERT, move |envelope: Envelope| {
        let manager = manager.clone();
        async move {
            let request: RevisionRequest = match envelope.payload() {
                Ok(request) => request,
                Err(_) => return Envelope::invalid(),
            };
            let Some(chunk) = manager.chunk_of(&request.table, &request.chunk_id) else {
                return Envelope::decline();
            };
            match chunk.handle_insert(request.revision) {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::error!("Replicated insert failed: {}", e);
                    Envelope::decline()
                }
            }
        }
    });

    let manager = tables.clone();
    hub.register_handler(MSG_UPDATE, move |envelope: Envelope| {
        let manager = manager.clone();
        async move {
            let request: RevisionRequest = match envelope.payload() {
                Ok(request) => request,
                Err(_) => return Envelope::invalid(),
            };
            let Some(chunk) = manager.chunk_of(&request.table, &request.chunk_id) else {
                return Envelope::decline();
            };
            match chunk.handle_update(request.revision) {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::error!("Replicated update failed: {}", e);
                    Envelope::decline()
                }
            }
        }
    });

    let manager = tables.clone();
    hub.register_handler(MSG_LOCK, move |envelope: Envelope| {
        let manager = manager.clone();
        async move {
            let request: LockRequest = match envelope.payload() {
                Ok(request) => request,
                Err(_) => return Envelope::invalid(),
            };
            let Some(chunk) = manager.chunk_of(&request.table, &request.chunk_id) else {
                return Envelope::decline();
            };
            let vote = chunk
                .handle_lock_request(request.requester, request.request_id, request.tree)
                .await;
            Envelope::typed(MSG_LOCK_RESPONSE, &LockResponse { vote })
                .unwrap_or_else(|_| Envelope::invalid())
        }
    });

    let manager = tables.clone();
    hub.register_handler(MSG_UNLOCK, move |envelope: Envelope| {
        let manager = manager.clone();
        async move {
            let request: UnlockRequest = match envelope.payload() {
                Ok(request) => request,
                Err(_) => return Envelope::invalid(),
            };
            let Some(chunk) = manager.chunk_of(&request.table, &request.chunk_id) else {
                return Envelope::decline();
            };
            chunk.handle_unlock(request.requester).await
        }
    });

    let manager = tables.clone();
    hub.register_handler(MSG_NEW_PEER, move |envelope: Envelope| {
        let manager = manager.clone();
        async move {
            let request: PeerRequest = match envelope.payload() {
                Ok(request) => request,
                Err(_) => return Envelope::invalid(),
            };
            let Some(chunk) = manager.chunk_of(&request.table, &request.chunk_id) else {
                return Envelope::decline();
            };
            chunk.handle_new_peer(request.peer)
        }
    });

    let manager = tables.clone();
    hub.register_handler(MSG_LEAVE, move |envelope: Envelope| {
        let manager = manager.clone();
        async move {
            let request: PeerRequest = match envelope.payload() {
                Ok(request) => request,
                Err(_) => return Envelope::invalid(),
            };
            let Some(chunk) = manager.chunk_of(&request.table, &request.chunk_id) else {
                return Envelope::decline();
            };
            chunk.handle_leave(request.peer).await
        }
    });
}
