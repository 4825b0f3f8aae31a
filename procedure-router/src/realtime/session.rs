//! Session runner
//!
//! Drives one upgraded connection from `Connecting` to `Closed`. Inbound frames
//! are processed one at a time in arrival order; outbound frames go through a
//! bounded queue drained by a dedicated writer task.

use super::frame::{Frame, PONG_FRAME, decode_frame};
use super::io::Io;
use super::lifecycle::{SessionLifecycle, SessionState};
use super::socket::{OutboundMessage, ServerSocket};
use super::SessionHandler;
use crate::schema::EventSchemas;
use crate::RpcError;
use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// How long the writer gets to flush the closing handshake.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Transport event seen by the session loop.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Inbound {
    Text(String),
    Binary,
    Control,
    Close,
}

/// Everything a session needs besides the transport.
pub(crate) struct SessionSetup {
    pub(crate) procedure: Arc<str>,
    pub(crate) handler: Arc<dyn SessionHandler>,
    pub(crate) incoming: Option<Arc<EventSchemas>>,
    pub(crate) outgoing: Option<Arc<EventSchemas>>,
    pub(crate) io: Io,
    pub(crate) buffer: usize,
    pub(crate) debug_logging: bool,
}

enum Termination {
    Closed,
    Failed(RpcError),
}

/// Run a session over an upgraded websocket until it closes.
pub(crate) async fn run_session(ws: WebSocket, setup: SessionSetup) {
    let (sink, stream) = ws.split();
    let (tx, rx) = mpsc::channel(setup.buffer.max(1));
    let closer = tx.clone();
    let mut writer = tokio::spawn(write_loop(sink, rx));

    let inbound = stream.map(|message| match message {
        Ok(Message::Text(text)) => Ok(Inbound::Text(text.as_str().to_owned())),
        Ok(Message::Binary(_)) => Ok(Inbound::Binary),
        Ok(Message::Ping(_) | Message::Pong(_)) => Ok(Inbound::Control),
        Ok(Message::Close(_)) => Ok(Inbound::Close),
        Err(e) => Err(RpcError::subscription("Connection failed").with_cause(e.to_string())),
    });

    drive_session(inbound, tx, setup).await;

    // The close reply goes out on the writer's next send, so the writer must
    // drain instead of being cut off.
    let flushed = tokio::time::timeout(CLOSE_GRACE, async {
        let _ = closer.send(OutboundMessage::Close).await;
        drop(closer);
        let _ = (&mut writer).await;
    })
    .await;
    if flushed.is_err() {
        debug!("Connection writer did not finish closing, aborting");
        writer.abort();
    }
}

async fn write_loop<S>(mut sink: S, mut rx: mpsc::Receiver<OutboundMessage>)
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(message) = rx.recv().await {
        let result = match message {
            OutboundMessage::Text(text) => sink.send(Message::Text(text.into())).await,
            OutboundMessage::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        };
        if let Err(e) = result {
            debug!(error = %e, "Connection writer stopped");
            break;
        }
    }
}

/// The transport-independent session loop.
pub(crate) async fn drive_session<S>(
    mut inbound: S,
    outbound: mpsc::Sender<OutboundMessage>,
    setup: SessionSetup,
) -> SessionState
where
    S: Stream<Item = Result<Inbound, RpcError>> + Unpin,
{
    let SessionSetup {
        procedure,
        handler,
        incoming,
        outgoing,
        io,
        debug_logging,
        ..
    } = setup;

    let socket = ServerSocket::new(procedure, outbound, incoming, outgoing, io);
    let mut lifecycle = SessionLifecycle::new(socket.id());

    lifecycle.transition(SessionState::Open);
    debug!(session_id = %socket.id(), procedure = %socket.procedure(), "Session open");
    handler.on_connect(&socket).await;

    let termination = loop {
        match inbound.next().await {
            None | Some(Ok(Inbound::Close)) => break Termination::Closed,
            Some(Err(e)) => break Termination::Failed(e),
            Some(Ok(Inbound::Text(text))) => {
                handle_text(&socket, &mut lifecycle, &text, debug_logging).await;
            }
            Some(Ok(Inbound::Binary)) => {
                warn!(session_id = %socket.id(), "Binary frame ignored");
            }
            Some(Ok(Inbound::Control)) => {}
        }
    };

    match termination {
        Termination::Closed => {
            lifecycle.transition(SessionState::Closing);
            socket.close();
            handler.on_disconnect(&socket).await;
        }
        Termination::Failed(e) => {
            lifecycle.transition(SessionState::Errored);
            error!(
                session_id = %socket.id(),
                error_code = %e.code,
                error = %e.message,
                "Session failed"
            );
            socket.close();
            handler.on_error(&socket, &e).await;
        }
    }

    lifecycle.transition(SessionState::Closed);
    let summary = lifecycle.summary();
    debug!(
        session_id = %socket.id(),
        events = summary.events_received,
        duration_ms = summary.duration_ms,
        "Session closed"
    );
    summary.final_state
}

async fn handle_text(socket: &ServerSocket, lifecycle: &mut SessionLifecycle, text: &str, debug_logging: bool) {
    let frame = match decode_frame(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(session_id = %socket.id(), error = %e, "Malformed frame dropped");
            return;
        }
    };

    match frame {
        Frame::Ping => {
            if let Err(e) = socket.send(OutboundMessage::Text(PONG_FRAME.to_owned())).await {
                debug!(session_id = %socket.id(), error = %e.message, "Pong not sent");
            }
        }
        Frame::Event { name, payload } => {
            lifecycle.record_event();
            if debug_logging {
                debug!(session_id = %socket.id(), event = %name, payload = %payload, "Inbound event");
            }
            if let Err(e) = socket.dispatch(&name, payload).await {
                warn!(
                    session_id = %socket.id(),
                    event = %name,
                    error_code = %e.code,
                    error = %e.message,
                    "Event rejected"
                );
            }
        }
    }
}
