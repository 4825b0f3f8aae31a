//! Broker-backed broadcasting.

use super::frame::encode_frame;
use crate::broker::Broker;
use crate::schema::{EventSchemas, check_event};
use crate::RpcResult;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Publishes events to rooms through the broker.
///
/// Every session on every instance that joined a room receives what is emitted
/// to it, including the emitting session if it joined too.
#[derive(Clone)]
pub struct Io {
    broker: Arc<dyn Broker>,
    outgoing: Option<Arc<EventSchemas>>,
}

impl Io {
    pub(crate) fn new(broker: Arc<dyn Broker>, outgoing: Option<Arc<EventSchemas>>) -> Self {
        Self { broker, outgoing }
    }

    /// Target a room.
    pub fn to(&self, room: impl Into<String>) -> Room {
        Room {
            io: self.clone(),
            name: room.into(),
        }
    }

    pub(crate) fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }
}

impl fmt::Debug for Io {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Io")
            .field("outgoing", &self.outgoing)
            .finish_non_exhaustive()
    }
}

/// A room selected with [`Io::to`].
#[derive(Debug, Clone)]
pub struct Room {
    io: Io,
    name: String,
}

impl Room {
    /// Room name (the broker channel)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Validate `payload` against the outgoing schema and publish `[event, payload]`.
    pub async fn emit(&self, event: &str, payload: impl Serialize) -> RpcResult<()> {
        let payload = serde_json::to_value(payload)?;
        let payload = check_event(self.io.outgoing.as_deref(), event, payload)?;
        let frame = encode_frame(event, &payload)?;

        trace!(room = %self.name, event = %event, "Broadcasting to room");
        self.io.broker.publish(&self.name, &frame).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::schema::{Schema, TypeSchema};
    use crate::RpcErrorCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_room_emit_publishes_frame() {
        let broker = MemoryBroker::new();
        let mut sub = broker.subscribe("lobby").await.unwrap();
        let io = Io::new(Arc::new(broker), None);

        io.to("lobby").emit("chat", json!({"text": "hi"})).await.unwrap();
        assert_eq!(sub.recv().await.as_deref(), Some(r#"["chat",{"text":"hi"}]"#));
    }

    #[tokio::test]
    async fn test_room_emit_validates_outgoing() {
        let outgoing = EventSchemas::new().event("chat", Schema::of::<String>(TypeSchema::string()));
        let io = Io::new(Arc::new(MemoryBroker::new()), Some(Arc::new(outgoing)));

        let err = io.to("lobby").emit("chat", 42).await.unwrap_err();
        assert_eq!(err.code, RpcErrorCode::ValidationError);

        let err = io.to("lobby").emit("other", "x").await.unwrap_err();
        assert_eq!(err.code, RpcErrorCode::ValidationError);

        assert!(io.to("lobby").emit("chat", "hello").await.is_ok());
    }
}
