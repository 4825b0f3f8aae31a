//! The server side of one realtime connection.

use super::frame::encode_frame;
use super::io::Io;
use crate::schema::{EventSchemas, check_event};
use crate::{RpcError, RpcResult};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Message queued for the connection writer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum OutboundMessage {
    /// A text frame
    Text(String),
    /// Ask the peer to close
    Close,
}

type ListenerFuture = Pin<Box<dyn Future<Output = RpcResult<()>> + Send>>;
type EventListener = Arc<dyn Fn(Value) -> ListenerFuture + Send + Sync>;

/// Session object handed to [`SessionHandler`](super::SessionHandler) callbacks.
///
/// Cheap to clone; clones refer to the same connection.
#[derive(Clone)]
pub struct ServerSocket {
    inner: Arc<SocketInner>,
}

struct SocketInner {
    id: String,
    procedure: Arc<str>,
    outbound: mpsc::Sender<OutboundMessage>,
    incoming: Option<Arc<EventSchemas>>,
    outgoing: Option<Arc<EventSchemas>>,
    listeners: DashMap<String, Vec<EventListener>>,
    rooms: DashMap<String, JoinHandle<()>>,
    io: Io,
    closed: AtomicBool,
}

impl ServerSocket {
    pub(crate) fn new(
        procedure: Arc<str>,
        outbound: mpsc::Sender<OutboundMessage>,
        incoming: Option<Arc<EventSchemas>>,
        outgoing: Option<Arc<EventSchemas>>,
        io: Io,
    ) -> Self {
        let id = uuid::Uuid::new_v7(uuid::Timestamp::now(uuid::NoContext)).to_string();
        Self {
            inner: Arc::new(SocketInner {
                id,
                procedure,
                outbound,
                incoming,
                outgoing,
                listeners: DashMap::new(),
                rooms: DashMap::new(),
                io,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Unique session id
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Path of the realtime procedure that accepted this connection
    pub fn procedure(&self) -> &str {
        &self.inner.procedure
    }

    /// Register a listener for `event`.
    ///
    /// Listeners receive the payload after it passed the incoming schema. Several
    /// listeners for one event run in registration order; an error is logged and
    /// does not stop the others.
    pub fn on<F, Fut>(&self, event: impl Into<String>, listener: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<()>> + Send + 'static,
    {
        let listener: EventListener = Arc::new(move |payload| Box::pin(listener(payload)));
        self.inner
            .listeners
            .entry(event.into())
            .or_default()
            .push(listener);
    }

    /// Validate `payload` against the outgoing schema and send `[event, payload]`.
    pub async fn emit(&self, event: &str, payload: impl Serialize) -> RpcResult<()> {
        let payload = serde_json::to_value(payload)?;
        let payload = check_event(self.inner.outgoing.as_deref(), event, payload)?;
        let frame = encode_frame(event, &payload)?;
        self.send(OutboundMessage::Text(frame)).await
    }

    /// Publish `[event, payload]` to every session in `room`, on every instance.
    pub async fn broadcast(&self, room: &str, event: &str, payload: impl Serialize) -> RpcResult<()> {
        self.inner.io.to(room).emit(event, payload).await
    }

    /// Subscribe this connection to `room`. Joining twice is a no-op.
    pub async fn join(&self, room: &str) -> RpcResult<()> {
        if self.is_closed() {
            return Err(RpcError::subscription("Session is closed"));
        }
        if self.inner.rooms.contains_key(room) {
            return Ok(());
        }

        let mut subscription = self.inner.io.broker().subscribe(room).await?;
        let outbound = self.inner.outbound.clone();
        let session_id = self.inner.id.clone();
        let channel = room.to_owned();

        let task = tokio::spawn(async move {
            while let Some(message) = subscription.recv().await {
                trace!(session_id = %session_id, room = %channel, "Forwarding room message");
                if outbound.send(OutboundMessage::Text(message)).await.is_err() {
                    break;
                }
            }
        });

        match self.inner.rooms.entry(room.to_owned()) {
            dashmap::mapref::entry::Entry::Occupied(_) => task.abort(),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(task);
                debug!(session_id = %self.inner.id, room = %room, "Joined room");
            }
        }
        Ok(())
    }

    /// Stop receiving messages from `room`. Returns whether the socket was in it.
    pub fn leave(&self, room: &str) -> bool {
        match self.inner.rooms.remove(room) {
            Some((_, task)) => {
                task.abort();
                debug!(session_id = %self.inner.id, room = %room, "Left room");
                true
            }
            None => false,
        }
    }

    /// Rooms currently joined
    pub fn rooms(&self) -> Vec<String> {
        let mut rooms: Vec<_> = self.inner.rooms.iter().map(|e| e.key().clone()).collect();
        rooms.sort();
        rooms
    }

    /// Ask the peer to close the connection.
    pub async fn disconnect(&self) -> RpcResult<()> {
        self.send(OutboundMessage::Close).await
    }

    /// Release every broker subscription and drop all listeners.
    ///
    /// Idempotent. Emitting on a closed socket fails.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for entry in self.inner.rooms.iter() {
            entry.value().abort();
        }
        self.inner.rooms.clear();
        self.inner.listeners.clear();
        debug!(session_id = %self.inner.id, "Session torn down");
    }

    /// Whether [`close`](Self::close) has run
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub(crate) async fn send(&self, message: OutboundMessage) -> RpcResult<()> {
        if self.is_closed() {
            return Err(RpcError::subscription("Session is closed"));
        }
        self.inner
            .outbound
            .send(message)
            .await
            .map_err(|_| RpcError::subscription("Connection writer has stopped"))
    }

    /// Validate an inbound event and hand it to its listeners.
    pub(crate) async fn dispatch(&self, event: &str, payload: Value) -> RpcResult<()> {
        let payload = check_event(self.inner.incoming.as_deref(), event, payload)?;

        // Clone out of the map so no shard lock is held across listener awaits.
        let listeners = self
            .inner
            .listeners
            .get(event)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        if listeners.is_empty() {
            debug!(session_id = %self.inner.id, event = %event, "No listener for event, dropped");
            return Ok(());
        }

        for listener in listeners {
            if let Err(e) = listener(payload.clone()).await {
                warn!(
                    session_id = %self.inner.id,
                    event = %event,
                    error_code = %e.code,
                    error = %e.message,
                    "Event listener failed"
                );
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ServerSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSocket")
            .field("id", &self.inner.id)
            .field("procedure", &self.inner.procedure)
            .field("rooms", &self.rooms())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::schema::{Schema, TypeSchema};
    use crate::RpcErrorCode;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    fn socket_with(
        broker: MemoryBroker,
        incoming: Option<EventSchemas>,
        outgoing: Option<EventSchemas>,
    ) -> (ServerSocket, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(16);
        let outgoing = outgoing.map(Arc::new);
        let io = Io::new(Arc::new(broker), outgoing.clone());
        let socket = ServerSocket::new(Arc::from("chat"), tx, incoming.map(Arc::new), outgoing, io);
        (socket, rx)
    }

    #[tokio::test]
    async fn test_emit_queues_frame() {
        let (socket, mut rx) = socket_with(MemoryBroker::new(), None, None);
        socket.emit("welcome", json!({"id": 1})).await.unwrap();
        assert_eq!(
            rx.recv().await,
            Some(OutboundMessage::Text(r#"["welcome",{"id":1}]"#.into()))
        );
    }

    #[tokio::test]
    async fn test_emit_rejects_invalid_outgoing() {
        let outgoing = EventSchemas::new().event("count", Schema::of::<u64>(TypeSchema::integer()));
        let (socket, mut rx) = socket_with(MemoryBroker::new(), None, Some(outgoing));

        let err = socket.emit("count", "nope").await.unwrap_err();
        assert_eq!(err.code, RpcErrorCode::ValidationError);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dispatch_runs_listeners_in_order() {
        let (socket, _rx) = socket_with(MemoryBroker::new(), None, None);
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = seen.clone();
            socket.on("chat", move |payload| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push((tag, payload));
                    Ok::<_, RpcError>(())
                }
            });
        }

        socket.dispatch("chat", json!("hi")).await.unwrap();
        socket.dispatch("unknown", json!(null)).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![("first", json!("hi")), ("second", json!("hi"))]);
    }

    #[tokio::test]
    async fn test_dispatch_validates_incoming() {
        let incoming = EventSchemas::new().event("chat", Schema::of::<String>(TypeSchema::string()));
        let (socket, _rx) = socket_with(MemoryBroker::new(), Some(incoming), None);

        let err = socket.dispatch("chat", json!(5)).await.unwrap_err();
        assert_eq!(err.code, RpcErrorCode::ValidationError);
        let err = socket.dispatch("undeclared", json!("x")).await.unwrap_err();
        assert_eq!(err.code, RpcErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn test_join_forwards_room_messages() {
        let broker = MemoryBroker::new();
        let (socket, mut rx) = socket_with(broker.clone(), None, None);

        socket.join("lobby").await.unwrap();
        socket.join("lobby").await.unwrap();
        assert_eq!(socket.rooms(), vec!["lobby".to_string()]);
        assert_eq!(broker.subscriber_count("lobby"), 1);

        socket.broadcast("lobby", "chat", "hello").await.unwrap();
        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(received, Some(OutboundMessage::Text(r#"["chat","hello"]"#.into())));

        assert!(socket.leave("lobby"));
        assert!(!socket.leave("lobby"));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let (socket, _rx) = socket_with(MemoryBroker::new(), None, None);
        socket.join("lobby").await.unwrap();

        socket.close();
        socket.close();

        assert!(socket.is_closed());
        assert!(socket.rooms().is_empty());
        assert!(socket.emit("x", 1).await.is_err());
        assert!(socket.join("lobby").await.is_err());
    }
}
