//! Chord Handlers
//!
//! Wires the ring RPCs into the hub's dispatch table. Every handler routes
//! through the table manager; a peer that has no index for the named table
//! declines.

use std::sync::Arc;

use crate::hub::service::Hub;
use crate::hub::types::Envelope;
use crate::table::manager::TableManager;

use super::protocol::*;

pub fn register_handlers(hub: &Arc<Hub>, tables: &Arc<TableManager>) {
    let manager = tables.clone();
    hub.register_handler(MSG_FIND_SUCCESSOR, move |envelope: Envelope| {
        let manager = manager.clone();
        async move {
            let request: FindSuccessorRequest = match envelope.payload() {
                Ok(request) => request,
                Err(_) => return Envelope::invalid(),
            };
            let Some(index) = manager.index_of(&request.table) else {
                return Envelope::decline();
            };
            match index.handle_find_successor(request.key).await {
                Ok(peer) => Envelope::typed(MSG_PEER_RESPONSE, &PeerResponse { peer })
                    .unwrap_or_else(|_| Envelope::invalid()),
                Err(e) => {
                    tracing::warn!("find_successor failed: {}", e);
                    Envelope::cant_reach()
                }
            }
        }
    });

    let manager = tables.clone();
    hub.register_handler(MSG_GET_PREDECESSOR, move |envelope: Envelope| {
        let manager = manager.clone();
        async move {
            let request: GetPredecessorRequest = match envelope.payload() {
                Ok(request) => request,
                Err(_) => return Envelope::invalid(),
            };
            let Some(index) = manager.index_of(&request.table) else {
                return Envelope::decline();
            };
            match index.handle_get_predecessor() {
                Ok(peer) => Envelope::typed(MSG_PEER_RESPONSE, &PeerResponse { peer })
                    .unwrap_or_else(|_| Envelope::invalid()),
                Err(_) => Envelope::decline(),
            }
        }
    });

    let manager = tables.clone();
    hub.register_handler(MSG_NOTIFY, move |envelope: Envelope| {
        let manager = manager.clone();
        async move {
            let request: NotifyRequest = match envelope.payload() {
                Ok(request) => request,
                Err(_) => return Envelope::invalid(),
            };
            let Some(index) = manager.index_of(&request.table) else {
                return Envelope::decline();
            };
            index.handle_notify(request.peer);
            Envelope::ack()
        }
    });

    let manager = tables.clone();
    hub.register_handler(MSG_LEAVE, move |envelope: Envelope| {
        let manager = manager.clone();
        async move {
            let request: LeaveRequest = match envelope.payload() {
                Ok(request) => request,
                Err(_) => return Envelope::invalid(),
            };
            let Some(index) = manager.index_of(&request.table) else {
                return Envelope::decline();
            };
            index.handle_leave(&request.leaver, &request.predecessor, &request.successor);
            Envelope::ack()
        }
    });

    let manager = tables.clone();
    hub.register_handler(MSG_INDEX_ADD, move |envelope: Envelope| {
        let manager = manager.clone();
        async move {
            let request: IndexAddRequest = match envelope.payload() {
                Ok(request) => request,
                Err(_) => return Envelope::invalid(),
            };
            let Some(index) = manager.index_of(&request.table) else {
                return Envelope::decline();
            };
            let entry = index.handle_index_add(&request.key, request.peer, request.chunk);
            Envelope::typed(MSG_ENTRY_RESPONSE, &EntryResponse { entry })
                .unwrap_or_else(|_| Envelope::invalid())
        }
    });

    let manager = tables.clone();
    hub.register_handler(MSG_INDEX_GET, move |envelope: Envelope| {
        let manager = manager.clone();
        async move {
            let request: IndexGetRequest = match envelope.payload() {
                Ok(request) => request,
                Err(_) => return Envelope::invalid(),
            };
            let Some(index) = manager.index_of(&request.table) else {
                return Envelope::decline();
            };
            let entry = index.handle_index_get(&request.key);
            Envelope::typed(MSG_ENTRY_RESPONSE, &EntryResponse { entry })
                .unwrap_or_else(|_| Envelope::invalid())
        }
    });

    let manager = tables.clone();
    hub.register_handler(MSG_MIGRATE, move |envelope: Envelope| {
        let manager = manager.clone();
        async move {
            let request: MigrateRequest = match envelope.payload() {
                Ok(request) => request,
                Err(_) => return Envelope::invalid(),
            };
            let Some(index) = manager.index_of(&request.table) else {
                return Envelope::decline();
            };
            index.handle_migrate(request.entries);
            Envelope::ack()
        }
    });
}
