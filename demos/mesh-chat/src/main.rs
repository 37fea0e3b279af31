//! Three participants in one room: a relay on localhost, direct channels
//! over the in-memory network. Ana says hello, Bo sends a file, Cy saves
//! it, then Ana leaves.
//!
//! Run with `cargo run -p mesh-chat`; `RUST_LOG=debug` shows the wiring.

use std::sync::Arc;
use std::time::Duration;

use peermesh::prelude::*;

// ---------------------------------------------------------------------------
// Participants
// ---------------------------------------------------------------------------

async fn participant(
    url: &str,
    net: &MemoryNetwork,
    name: &str,
) -> Result<(MeshClient, MeshEvents), PeermeshError> {
    MeshClient::connect(
        url,
        Some(name.to_string()),
        |id| Arc::new(net.endpoint(id.as_str())),
        MeshConfig::default(),
    )
    .await
}

/// Prints a participant's status lines and saves incoming files.
fn narrate(name: &'static str, mut events: MeshEvents, mut sink: DirectorySink) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("[{name}] {event}");
            if let MeshEvent::FileReceived { file, .. } = event {
                match sink.save(&file.meta.name, &file.data).await {
                    Ok(path) => println!("[{name}] saved {}", path.display()),
                    Err(e) => println!("[{name}] could not save {}: {e}", file.meta.name),
                }
            }
        }
    });
}

/// Lets the mesh settle between steps.
async fn pause() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let relay = RelayServer::builder().bind("127.0.0.1:0").build().await?;
    let url = format!("ws://{}", relay.local_addr()?);
    tokio::spawn(relay.run());
    tracing::info!(%url, "demo relay started");

    let downloads = std::env::temp_dir().join("mesh-chat-downloads");
    tokio::fs::create_dir_all(&downloads).await?;

    let net = MemoryNetwork::new();
    let (ana, ana_events) = participant(&url, &net, "Ana").await?;
    let (bo, bo_events) = participant(&url, &net, "Bo").await?;
    let (cy, cy_events) = participant(&url, &net, "Cy").await?;
    narrate("Ana", ana_events, DirectorySink::new(&downloads));
    narrate("Bo", bo_events, DirectorySink::new(&downloads));
    narrate("Cy", cy_events, DirectorySink::new(&downloads));

    for client in [&ana, &bo, &cy] {
        client.handle().join("lobby").await?;
        pause().await;
    }

    ana.handle().send_text("hello everyone").await?;
    pause().await;

    let notes: Vec<u8> = b"peermesh demo file\n".repeat(2_000);
    let delivered = bo
        .handle()
        .send_file(MemorySource::new("notes.txt", "text/plain", notes))
        .await?;
    println!("[Bo] file reached {delivered} peer(s)");
    pause().await;

    ana.handle().leave().await?;
    pause().await;

    for peer in cy.handle().peers().await? {
        println!("[Cy] still connected to {}", peer.peer.label());
    }

    ana.shutdown().await?;
    bo.shutdown().await?;
    cy.shutdown().await?;
    pause().await;
    Ok(())
}
