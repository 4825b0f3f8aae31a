//! Real-time session manager
//!
//! A realtime procedure upgrades the HTTP request to a websocket. Its handler
//! runs during the HTTP phase and returns a [`SessionHandler`]; once the
//! upgrade completes a [`ServerSocket`] is created, `on_connect` runs, and
//! frames are processed until the connection ends.
//!
//! # Wire format
//!
//! Text frames carrying `[event, payload]` JSON arrays in both directions. The
//! client heartbeat `["ping", ..]` is answered with `["pong", null]` and never
//! reaches listeners. Malformed frames and payloads that fail the incoming
//! schema are logged and dropped; the connection stays open.
//!
//! # Example
//!
//! ```rust,ignore
//! struct Chat {
//!     io: Io,
//! }
//!
//! #[async_trait]
//! impl SessionHandler for Chat {
//!     async fn on_connect(&self, socket: &ServerSocket) {
//!         let io = self.io.clone();
//!         socket.on("message", move |payload| {
//!             let io = io.clone();
//!             async move { io.to("lobby").emit("message", payload).await }
//!         });
//!         let _ = socket.join("lobby").await;
//!     }
//! }
//!
//! let chat = procedure::<AppContext>()
//!     .incoming(EventSchemas::new().event("message", Schema::of::<String>(TypeSchema::string())))
//!     .realtime(|_req, _ctx, io| async move { Ok(Chat { io }) });
//! ```

mod frame;
mod io;
mod lifecycle;
mod session;
mod socket;

pub use frame::{Frame, FrameError, PING_EVENT, PONG_FRAME, decode_frame, encode_frame};
pub use io::{Io, Room};
pub use lifecycle::{SessionState, SessionSummary};
pub use socket::ServerSocket;

pub(crate) use session::{SessionSetup, run_session};

use crate::RpcError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;

/// Lifecycle callbacks of one realtime connection.
///
/// Exactly one of `on_disconnect` and `on_error` runs, after the socket has
/// been torn down.
#[async_trait]
pub trait SessionHandler: Send + Sync + 'static {
    /// The socket is open; register listeners and join rooms here.
    async fn on_connect(&self, _socket: &ServerSocket) {}

    /// The peer closed the connection.
    async fn on_disconnect(&self, _socket: &ServerSocket) {}

    /// The transport failed.
    async fn on_error(&self, _socket: &ServerSocket, _error: &RpcError) {}
}

type Callback = Box<dyn Fn(ServerSocket) -> BoxFuture<'static, ()> + Send + Sync>;
type ErrorCallback = Box<dyn Fn(ServerSocket, RpcError) -> BoxFuture<'static, ()> + Send + Sync>;

/// A [`SessionHandler`] assembled from closures.
///
/// ```rust,ignore
/// let session = SessionCallbacks::new()
///     .on_connect(|socket| async move { let _ = socket.emit("hello", "world").await; })
///     .on_disconnect(|socket| async move { tracing::info!(id = %socket.id(), "bye") });
/// ```
#[derive(Default)]
pub struct SessionCallbacks {
    connect: Option<Callback>,
    disconnect: Option<Callback>,
    error: Option<ErrorCallback>,
}

impl SessionCallbacks {
    /// No callbacks
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` when the socket opens
    pub fn on_connect<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ServerSocket) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.connect = Some(Box::new(move |socket| Box::pin(f(socket))));
        self
    }

    /// Run `f` when the peer closes
    pub fn on_disconnect<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ServerSocket) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.disconnect = Some(Box::new(move |socket| Box::pin(f(socket))));
        self
    }

    /// Run `f` when the transport fails
    pub fn on_error<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ServerSocket, RpcError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.error = Some(Box::new(move |socket, error| Box::pin(f(socket, error))));
        self
    }
}

#[async_trait]
impl SessionHandler for SessionCallbacks {
    async fn on_connect(&self, socket: &ServerSocket) {
        if let Some(f) = &self.connect {
            f(socket.clone()).await;
        }
    }

    async fn on_disconnect(&self, socket: &ServerSocket) {
        if let Some(f) = &self.disconnect {
            f(socket.clone()).await;
        }
    }

    async fn on_error(&self, socket: &ServerSocket, error: &RpcError) {
        if let Some(f) = &self.error {
            f(socket.clone(), error.clone()).await;
        }
    }
}
