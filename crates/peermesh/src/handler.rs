//! Per-connection relay handler: handshake, then message routing.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive `Hello` → register → send `Welcome { peer_id }`
//!   2. Loop: route `Join` / `Leave` / `Signal` through the registry, and
//!      forward whatever the registry queued for this participant
//!
//! When the loop ends, however it ends, the participant is unregistered,
//! which is an implicit leave with a `PeerLeft` broadcast.

use std::sync::Arc;

use peermesh_protocol::{ClientMessage, Codec, PeerId, RelayEvent};
use peermesh_transport::{Connection, WebSocketConnection};
use tokio::sync::mpsc;

use crate::server::RelayState;
use crate::{PeermeshError, RelayError};

/// Drop guard that unregisters a participant when the handler exits.
///
/// `Drop` is synchronous, so the async lock is taken in a spawned task.
struct MemberGuard {
    peer_id: PeerId,
    state: Arc<RelayState>,
}

impl Drop for MemberGuard {
    fn drop(&mut self) {
        let peer_id = self.peer_id.clone();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            state.registry.lock().await.unregister(&peer_id);
        });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection(
    conn: WebSocketConnection,
    state: Arc<RelayState>,
) -> Result<(), PeermeshError> {
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");

    // --- Step 1: Handshake ---
    let display_name = await_hello(&conn, &state).await?;

    let (outbox_tx, mut outbox) = mpsc::unbounded_channel();
    let peer_id = state
        .registry
        .lock()
        .await
        .register(display_name.clone(), outbox_tx);
    let _guard = MemberGuard {
        peer_id: peer_id.clone(),
        state: Arc::clone(&state),
    };

    send_event(
        &conn,
        &state,
        &RelayEvent::Welcome {
            peer_id: peer_id.clone(),
        },
    )
    .await?;
    tracing::info!(%conn_id, peer = %peer_id, name = ?display_name, "participant connected");

    // --- Step 2: Message loop ---
    loop {
        tokio::select! {
            received = conn.recv() => {
                let data = match received {
                    Ok(Some(data)) => data,
                    Ok(None) => {
                        tracing::info!(peer = %peer_id, "connection closed cleanly");
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(peer = %peer_id, error = %e, "recv error");
                        break;
                    }
                };
                handle_message(&conn, &state, &peer_id, &data).await?;
            }
            Some(event) = outbox.recv() => {
                send_event(&conn, &state, &event).await?;
            }
        }
    }

    // _guard drops here → implicit leave.
    Ok(())
}

/// Waits for the opening `Hello` and returns the display name it carries.
async fn await_hello(
    conn: &WebSocketConnection,
    state: &RelayState,
) -> Result<Option<String>, PeermeshError> {
    let data = match tokio::time::timeout(state.config.handshake_timeout, conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(PeermeshError::Handshake(
                "connection closed before hello".into(),
            ));
        }
        Ok(Err(e)) => return Err(PeermeshError::Transport(e)),
        Err(_) => {
            return Err(PeermeshError::Handshake("hello timed out".into()));
        }
    };

    match state.codec.decode::<ClientMessage>(&data) {
        Ok(ClientMessage::Hello { display_name }) => Ok(display_name),
        _ => {
            let refusal = RelayError::BadRequest("expected Hello".into());
            send_error(conn, state, &refusal).await?;
            Err(PeermeshError::Handshake(
                "first message must be Hello".into(),
            ))
        }
    }
}

/// Routes one client message through the registry.
async fn handle_message(
    conn: &WebSocketConnection,
    state: &RelayState,
    peer_id: &PeerId,
    data: &[u8],
) -> Result<(), PeermeshError> {
    let msg: ClientMessage = match state.codec.decode(data) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!(peer = %peer_id, error = %e, "failed to decode client message");
            let refusal = RelayError::BadRequest(format!("invalid message: {e}"));
            return send_error(conn, state, &refusal).await;
        }
    };

    // Lock only for the registry call, release before network I/O.
    let mut joining = None;
    let result = {
        let mut registry = state.registry.lock().await;
        match msg {
            ClientMessage::Join { room } => {
                joining = Some(room.clone());
                registry.join(peer_id, room)
            }
            ClientMessage::Leave { room } => {
                if !registry.leave(peer_id, &room) {
                    tracing::debug!(peer = %peer_id, %room, "leave for a room the peer isn't in");
                }
                Ok(())
            }
            ClientMessage::Signal { target, payload } => {
                registry.signal(peer_id, target, payload)
            }
            ClientMessage::Hello { .. } => {
                Err(RelayError::BadRequest("already said hello".into()))
            }
        }
    };

    match result {
        Ok(()) => Ok(()),
        Err(refusal) => {
            tracing::debug!(peer = %peer_id, error = %refusal, "request refused");
            match joining {
                Some(room) => {
                    let event = RelayEvent::JoinRefused {
                        room,
                        code: refusal.code(),
                        message: refusal.to_string(),
                    };
                    send_event(conn, state, &event).await
                }
                None => send_error(conn, state, &refusal).await,
            }
        }
    }
}

async fn send_event(
    conn: &WebSocketConnection,
    state: &RelayState,
    event: &RelayEvent,
) -> Result<(), PeermeshError> {
    let bytes = state.codec.encode(event)?;
    conn.send(&bytes).await?;
    Ok(())
}

/// Sends a `RelayEvent::Error` reply to the client.
async fn send_error(
    conn: &WebSocketConnection,
    state: &RelayState,
    refusal: &RelayError,
) -> Result<(), PeermeshError> {
    send_event(
        conn,
        state,
        &RelayEvent::Error {
            code: refusal.code(),
            message: refusal.to_string(),
        },
    )
    .await
}
