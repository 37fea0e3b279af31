//! Integration tests for the relay server, over real WebSockets.
//!
//! The first half drives the relay with raw JSON clients; the second half
//! runs full participants (`MeshClient`) whose direct channels use the
//! in-memory network.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use peermesh::prelude::*;
use peermesh::protocol::{ClientMessage, RelayEvent};
use serde_json::json;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Starts a relay on a random port and returns its address.
async fn start_relay(builder: RelayServerBuilder) -> String {
    let server = builder
        .bind("127.0.0.1:0")
        .build()
        .await
        .expect("relay should build");
    let addr = server
        .local_addr()
        .expect("should have local addr")
        .to_string();

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    // Give the accept loop a moment to start.
    tokio::time::sleep(Duration::from_millis(10)).await;
    addr
}

async fn connect(addr: &str) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("should connect");
    ws
}

async fn send(ws: &mut ClientWs, msg: &ClientMessage) {
    let bytes = serde_json::to_vec(msg).expect("encode");
    ws.send(Message::Binary(bytes.into())).await.expect("send");
}

/// Next relay event, skipping control frames. `None` once closed.
async fn recv(ws: &mut ClientWs) -> Option<RelayEvent> {
    timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Binary(data))) => {
                    return Some(serde_json::from_slice(&data).expect("decode"));
                }
                Some(Ok(Message::Text(text))) => {
                    return Some(serde_json::from_str(text.as_str()).expect("decode"));
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .expect("timed out waiting for relay")
}

/// Connects, says hello and returns the socket and the assigned id.
async fn hello(addr: &str, name: &str) -> (ClientWs, PeerId) {
    let mut ws = connect(addr).await;
    send(
        &mut ws,
        &ClientMessage::Hello {
            display_name: Some(name.into()),
        },
    )
    .await;
    match recv(&mut ws).await {
        Some(RelayEvent::Welcome { peer_id }) => (ws, peer_id),
        other => panic!("expected Welcome, got {other:?}"),
    }
}

async fn join(ws: &mut ClientWs, room: &str) {
    send(ws, &ClientMessage::Join { room: RoomId::new(room) }).await;
}

// =========================================================================
// Relay protocol
// =========================================================================

#[tokio::test]
async fn test_hello_gets_welcome_with_hex_id() {
    let addr = start_relay(RelayServer::builder()).await;
    let (_ws, id) = hello(&addr, "ana").await;
    assert_eq!(id.as_str().len(), 32);
}

#[tokio::test]
async fn test_first_message_must_be_hello() {
    let addr = start_relay(RelayServer::builder()).await;
    let mut ws = connect(&addr).await;
    join(&mut ws, "lobby").await;

    match recv(&mut ws).await {
        Some(RelayEvent::Error { code, .. }) => assert_eq!(code, 400),
        other => panic!("expected Error, got {other:?}"),
    }
    assert_eq!(recv(&mut ws).await, None);
}

#[tokio::test]
async fn test_silent_connection_is_dropped() {
    let addr = start_relay(
        RelayServer::builder().handshake_timeout(Duration::from_millis(100)),
    )
    .await;
    let mut ws = connect(&addr).await;
    assert_eq!(recv(&mut ws).await, None);
}

#[tokio::test]
async fn test_join_reports_existing_peers_and_announces_joiner() {
    let addr = start_relay(RelayServer::builder()).await;
    let (mut a, a_id) = hello(&addr, "ana").await;
    let (mut b, b_id) = hello(&addr, "bo").await;

    join(&mut a, "lobby").await;
    assert_eq!(
        recv(&mut a).await,
        Some(RelayEvent::ExistingPeers {
            room: RoomId::new("lobby"),
            peers: vec![],
        })
    );

    join(&mut b, "lobby").await;
    assert_eq!(
        recv(&mut b).await,
        Some(RelayEvent::ExistingPeers {
            room: RoomId::new("lobby"),
            peers: vec![PeerInfo::new(a_id, Some("ana".into()))],
        })
    );
    assert_eq!(
        recv(&mut a).await,
        Some(RelayEvent::PeerJoined {
            peer: PeerInfo::new(b_id, Some("bo".into())),
        })
    );
}

#[tokio::test]
async fn test_signal_is_forwarded_with_sender_name() {
    let addr = start_relay(RelayServer::builder()).await;
    let (mut a, a_id) = hello(&addr, "ana").await;
    let (mut b, b_id) = hello(&addr, "bo").await;
    join(&mut a, "lobby").await;
    recv(&mut a).await;
    join(&mut b, "lobby").await;
    recv(&mut b).await;
    recv(&mut a).await;

    send(
        &mut b,
        &ClientMessage::Signal {
            target: a_id,
            payload: json!({"type": "offer", "conn": 7}),
        },
    )
    .await;
    assert_eq!(
        recv(&mut a).await,
        Some(RelayEvent::Signal {
            from: b_id,
            display_name: Some("bo".into()),
            payload: json!({"type": "offer", "conn": 7}),
        })
    );
}

#[tokio::test]
async fn test_signal_to_stranger_is_refused() {
    let addr = start_relay(RelayServer::builder()).await;
    let (mut a, _) = hello(&addr, "ana").await;
    let (_b, b_id) = hello(&addr, "bo").await;
    join(&mut a, "lobby").await;
    recv(&mut a).await;

    send(
        &mut a,
        &ClientMessage::Signal {
            target: b_id,
            payload: json!({}),
        },
    )
    .await;
    match recv(&mut a).await {
        Some(RelayEvent::Error { code, .. }) => assert_eq!(code, 404),
        other => panic!("expected Error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_full_room_is_refused() {
    let addr = start_relay(RelayServer::builder().max_room_peers(1)).await;
    let (mut a, _) = hello(&addr, "ana").await;
    let (mut b, _) = hello(&addr, "bo").await;
    join(&mut a, "lobby").await;
    recv(&mut a).await;

    join(&mut b, "lobby").await;
    match recv(&mut b).await {
        Some(RelayEvent::JoinRefused {
            room,
            code,
            message,
        }) => {
            assert_eq!(room, RoomId::new("lobby"));
            assert_eq!(code, 409);
            assert!(message.contains("lobby"));
        }
        other => panic!("expected JoinRefused, got {other:?}"),
    }
}

#[tokio::test]
async fn test_disconnect_is_implicit_leave() {
    let addr = start_relay(RelayServer::builder()).await;
    let (mut a, _) = hello(&addr, "ana").await;
    let (mut b, b_id) = hello(&addr, "bo").await;
    join(&mut a, "lobby").await;
    recv(&mut a).await;
    join(&mut b, "lobby").await;
    recv(&mut b).await;
    recv(&mut a).await;

    b.close(None).await.expect("close");
    drop(b);

    match recv(&mut a).await {
        Some(RelayEvent::PeerLeft { peer }) => assert_eq!(peer.id, b_id),
        other => panic!("expected PeerLeft, got {other:?}"),
    }
}

#[tokio::test]
async fn test_explicit_leave_broadcasts_peer_left() {
    let addr = start_relay(RelayServer::builder()).await;
    let (mut a, _) = hello(&addr, "ana").await;
    let (mut b, b_id) = hello(&addr, "bo").await;
    join(&mut a, "lobby").await;
    recv(&mut a).await;
    join(&mut b, "lobby").await;
    recv(&mut b).await;
    recv(&mut a).await;

    send(&mut b, &ClientMessage::Leave { room: RoomId::new("lobby") }).await;
    assert_eq!(
        recv(&mut a).await,
        Some(RelayEvent::PeerLeft {
            peer: PeerInfo::new(b_id, Some("bo".into())),
        })
    );
}

// =========================================================================
// Full participants
// =========================================================================

async fn participant(
    addr: &str,
    net: &MemoryNetwork,
    name: &str,
) -> (MeshClient, MeshEvents) {
    MeshClient::connect(
        &format!("ws://{addr}"),
        Some(name.into()),
        |id| Arc::new(net.endpoint(id.as_str())),
        MeshConfig::default(),
    )
    .await
    .expect("participant should connect")
}

async fn wait_for(events: &mut MeshEvents, pred: impl Fn(&MeshEvent) -> bool) -> MeshEvent {
    timeout(Duration::from_secs(3), async {
        loop {
            let event = events.recv().await.expect("mesh stopped");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for mesh event")
}

#[tokio::test]
async fn test_participants_chat_through_direct_channel() {
    let addr = start_relay(RelayServer::builder()).await;
    let net = MemoryNetwork::new();
    let (ana, mut ana_events) = participant(&addr, &net, "Ana").await;
    let (bo, mut bo_events) = participant(&addr, &net, "Bo").await;

    ana.handle().join("lobby").await.unwrap();
    wait_for(&mut ana_events, |e| matches!(e, MeshEvent::Joined { .. })).await;
    bo.handle().join("lobby").await.unwrap();

    let connected = wait_for(&mut bo_events, |e| matches!(e, MeshEvent::PeerConnected { .. })).await;
    assert_eq!(connected.to_string(), "connection established with Ana");
    wait_for(&mut ana_events, |e| matches!(e, MeshEvent::PeerConnected { .. })).await;

    assert_eq!(bo.handle().send_text("hola").await.unwrap(), 1);
    let msg = wait_for(&mut ana_events, |e| matches!(e, MeshEvent::Message { .. })).await;
    assert_eq!(msg.to_string(), "Bo: hola");
}

#[tokio::test]
async fn test_participants_exchange_file_and_notice_departure() {
    let addr = start_relay(RelayServer::builder()).await;
    let net = MemoryNetwork::new();
    let (ana, mut ana_events) = participant(&addr, &net, "Ana").await;
    let (bo, mut bo_events) = participant(&addr, &net, "Bo").await;

    ana.handle().join("lobby").await.unwrap();
    wait_for(&mut ana_events, |e| matches!(e, MeshEvent::Joined { .. })).await;
    bo.handle().join("lobby").await.unwrap();
    wait_for(&mut bo_events, |e| matches!(e, MeshEvent::PeerConnected { .. })).await;
    wait_for(&mut ana_events, |e| matches!(e, MeshEvent::PeerConnected { .. })).await;

    let data: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
    let sent = ana
        .handle()
        .send_file(MemorySource::new("notes.bin", "application/octet-stream", data.clone()))
        .await
        .unwrap();
    assert_eq!(sent, 1);

    match wait_for(&mut bo_events, |e| matches!(e, MeshEvent::FileReceived { .. })).await {
        MeshEvent::FileReceived { from, file } => {
            assert_eq!(from.label(), "Ana");
            assert_eq!(file.meta.name, "notes.bin");
            assert_eq!(file.data, data);
        }
        other => panic!("unexpected event {other:?}"),
    }

    let ana_id = ana.peer_id().clone();
    ana.shutdown().await.unwrap();
    let gone = wait_for(&mut bo_events, |e| {
        matches!(e, MeshEvent::PeerLeft { .. } | MeshEvent::PeerDisconnected { .. })
    })
    .await;
    assert_eq!(gone.peer().map(|p| &p.id), Some(&ana_id));
}

#[tokio::test]
async fn test_connect_to_missing_relay_fails() {
    let net = MemoryNetwork::new();
    let result = MeshClient::connect(
        "ws://127.0.0.1:1",
        None,
        |id| Arc::new(net.endpoint(id.as_str())),
        MeshConfig::default(),
    )
    .await;
    assert!(matches!(result, Err(PeermeshError::Transport(_))));
}
