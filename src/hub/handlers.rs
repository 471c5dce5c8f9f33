//! Hub Handlers
//!
//! The single axum endpoint all envelopes arrive through, plus the hub's
//! own message handlers.

use std::sync::Arc;

use axum::extract::Extension;
use axum::Json;

use super::service::Hub;
use super::types::{Envelope, PeerId, MSG_ANNOUNCE};

/// `POST /rpc`: the one network entry point of a peer.
pub async fn handle_rpc(
    Extension(hub): Extension<Arc<Hub>>,
    Json(envelope): Json<Envelope>,
) -> Json<Envelope> {
    Json(hub.handle(envelope).await)
}

/// Registers the hub's own message types.
pub fn register_handlers(hub: &Arc<Hub>) {
    let announce_hub = hub.clone();
    hub.register_handler(MSG_ANNOUNCE, move |envelope: Envelope| {
        let hub = announce_hub.clone();
        async move {
            let peer: PeerId = match envelope.payload() {
                Ok(peer) => peer,
                Err(e) => {
                    tracing::error!("Bad announce payload: {}", e);
                    return Envelope::invalid();
                }
            };
            tracing::info!("Peer {} announced itself, connecting...", peer);
            hub.add_peer(peer);
            Envelope::ack()
        }
    });
}
