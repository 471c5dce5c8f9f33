use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;

use super::types::Envelope;

pub type MessageHandlerFn =
    Arc<dyn Fn(Envelope) -> Pin<Box<dyn Future<Output = Envelope> + Send>> + Send + Sync>;

/// Dispatch table from message type to handler. Populated explicitly at
/// startup; handlers are never replaced or removed while serving.
pub struct MessageRegistry {
    handlers: DashMap<String, MessageHandlerFn>,
}

impl MessageRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handlers: DashMap::new(),
        })
    }

    pub fn register<F, Fut>(&self, msg_type: &str, handler: F)
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Envelope> + Send + 'static,
    {
        let handler_fn: MessageHandlerFn = Arc::new(move |envelope: Envelope| {
            Box::pin(handler(envelope)) as Pin<Box<dyn Future<Output = Envelope> + Send>>
        });

        let previous = self.handlers.insert(msg_type.to_string(), handler_fn);
        assert!(
            previous.is_none(),
            "handler for message type {} registered twice",
            msg_type
        );

        tracing::debug!("Registered message handler: {}", msg_type);
    }

    pub async fn dispatch(&self, envelope: Envelope) -> Envelope {
        let handler_fn = match self.handlers.get(&envelope.msg_type) {
            Some(entry) => entry.value().clone(),
            None => {
                // Version skew: the sender speaks a protocol we don't.
                tracing::error!(
                    "No handler for message type {} from {}",
                    envelope.msg_type,
                    envelope.sender
                );
                return Envelope::invalid();
            }
        };
        handler_fn(envelope).await
    }

    pub fn has_handler(&self, msg_type: &str) -> bool {
        self.handlers.contains_key(msg_type)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn list_types(&self) -> Vec<String> {
        self.handlers
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }
}
