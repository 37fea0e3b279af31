//! Mesh actor: an isolated Tokio task that owns a [`MeshCoordinator`].
//!
//! Relay events, channel events and local commands all funnel into one
//! `select!` loop, so the session map has a single owner and needs no
//! locks. The outside world talks to the actor through a cloneable
//! [`MeshHandle`].
//!
//! Outgoing files are read by a separate task and handed to the actor one
//! chunk at a time through a small bounded queue. The actor keeps serving
//! channel events between chunks, so a peer that drops out mid-transfer is
//! noticed before the next chunk. Dropping the queue stops the reader and
//! releases the source.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

use peermesh_protocol::{ClientMessage, FileMeta, RelayEvent, RoomId};
use peermesh_transport::{ChannelEventReceiver, ChannelFactory};
use tokio::sync::{mpsc, oneshot};

use crate::coordinator::{OutgoingTransfer, PeerStatus};
use crate::file::ByteSource;
use crate::{MeshConfig, MeshCoordinator, MeshEvent, RelayBinding, RoomError};

/// The stream of events a mesh publishes.
pub type MeshEvents = mpsc::UnboundedReceiver<MeshEvent>;

/// Chunks read ahead of the actor per outgoing file.
const READ_AHEAD: usize = 2;

type ChunkReceiver = mpsc::Receiver<io::Result<Vec<u8>>>;
type Reply<T> = oneshot::Sender<Result<T, RoomError>>;

/// Commands sent to a mesh actor through its channel.
pub(crate) enum MeshCommand {
    Join { room: RoomId, reply: Reply<()> },
    Leave { reply: Reply<RoomId> },
    SendText { text: String, reply: Reply<usize> },
    SendFile {
        meta: FileMeta,
        chunks: ChunkReceiver,
        reply: Reply<usize>,
    },
    Peers { reply: oneshot::Sender<Vec<PeerStatus>> },
    Shutdown,
}

/// Handle to a running mesh actor.
///
/// Cheap to clone; every clone talks to the same actor.
#[derive(Clone)]
pub struct MeshHandle {
    sender: mpsc::Sender<MeshCommand>,
    chunk_size: usize,
}

impl MeshHandle {
    /// Joins a room.
    pub async fn join(&self, room: impl Into<RoomId>) -> Result<(), RoomError> {
        let room = room.into();
        self.request(|reply| MeshCommand::Join { room, reply }).await?
    }

    /// Leaves the current room.
    pub async fn leave(&self) -> Result<RoomId, RoomError> {
        self.request(|reply| MeshCommand::Leave { reply }).await?
    }

    /// Sends a chat message to every connected peer. Returns how many
    /// peers it was sent to.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<usize, RoomError> {
        let text = text.into();
        self.request(|reply| MeshCommand::SendText { text, reply })
            .await?
    }

    /// Sends a file to every connected peer. Returns how many peers
    /// received all of it.
    ///
    /// Files are sent one after another, never interleaved.
    pub async fn send_file<S>(&self, source: S) -> Result<usize, RoomError>
    where
        S: ByteSource + 'static,
    {
        let meta = source.meta();
        let (tx, chunks) = mpsc::channel(READ_AHEAD);
        tokio::spawn(read_source(source, self.chunk_size, tx));
        self.request(|reply| MeshCommand::SendFile { meta, chunks, reply })
            .await?
    }

    /// A snapshot of every peer session.
    pub async fn peers(&self) -> Result<Vec<PeerStatus>, RoomError> {
        self.request(|reply| MeshCommand::Peers { reply }).await
    }

    /// Stops the actor. Every session is closed.
    pub async fn shutdown(&self) -> Result<(), RoomError> {
        self.sender
            .send(MeshCommand::Shutdown)
            .await
            .map_err(|_| RoomError::Unavailable)
    }

    /// Sends a command carrying a reply channel and waits for the reply.
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> MeshCommand,
    ) -> Result<T, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(make(reply_tx))
            .await
            .map_err(|_| RoomError::Unavailable)?;
        reply_rx.await.map_err(|_| RoomError::Unavailable)
    }
}

/// Feeds a source into the actor until it is exhausted or the actor
/// stops listening.
async fn read_source<S: ByteSource>(
    mut source: S,
    chunk_size: usize,
    tx: mpsc::Sender<io::Result<Vec<u8>>>,
) {
    loop {
        match source.next_chunk(chunk_size).await {
            Ok(Some(chunk)) => {
                if tx.send(Ok(chunk)).await.is_err() {
                    tracing::debug!("file send abandoned, source released");
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        }
    }
}

/// A file waiting for its turn.
struct QueuedFile {
    meta: FileMeta,
    chunks: ChunkReceiver,
    reply: Reply<usize>,
}

/// The file currently being sent.
struct ActiveFile {
    transfer: OutgoingTransfer,
    chunks: ChunkReceiver,
    reply: Reply<usize>,
}

/// The internal actor state. Runs inside a Tokio task.
struct MeshActor {
    mesh: MeshCoordinator,
    binding: RelayBinding,
    commands: mpsc::Receiver<MeshCommand>,
    relay_in: mpsc::UnboundedReceiver<RelayEvent>,
    channels: ChannelEventReceiver,
    active: Option<ActiveFile>,
    queued: VecDeque<QueuedFile>,
}

impl MeshActor {
    async fn run(mut self) {
        tracing::info!("mesh actor started");
        let mut relay_open = true;

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(MeshCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd),
                },
                event = self.relay_in.recv(), if relay_open => match event {
                    Some(event) => self.binding.dispatch(&mut self.mesh, event),
                    None => {
                        relay_open = false;
                        tracing::warn!("relay link closed");
                        self.mesh.notice("lost connection to the relay");
                    }
                },
                Some((id, event)) = self.channels.recv() => {
                    self.mesh.on_channel_event(id, event);
                }
                chunk = next_chunk(&mut self.active), if self.active.is_some() => {
                    self.on_chunk(chunk);
                }
            }
        }

        self.abort_files();
        if self.mesh.room().is_some() {
            let _ = self.mesh.leave();
        }
        tracing::info!("mesh actor stopped");
    }

    fn handle_command(&mut self, cmd: MeshCommand) {
        match cmd {
            MeshCommand::Join { room, reply } => {
                let _ = reply.send(self.mesh.join(room));
            }
            MeshCommand::Leave { reply } => {
                self.abort_files();
                let _ = reply.send(self.mesh.leave());
            }
            MeshCommand::SendText { text, reply } => {
                let _ = reply.send(self.mesh.send_text(text));
            }
            MeshCommand::SendFile { meta, chunks, reply } => {
                self.queued.push_back(QueuedFile { meta, chunks, reply });
                if self.active.is_none() {
                    self.start_next_file();
                }
            }
            MeshCommand::Peers { reply } => {
                let _ = reply.send(self.mesh.peers());
            }
            MeshCommand::Shutdown => {}
        }
    }

    fn on_chunk(&mut self, chunk: Option<io::Result<Vec<u8>>>) {
        let Some(mut file) = self.active.take() else {
            return;
        };

        match chunk {
            Some(Ok(bytes)) => {
                if self.mesh.send_chunk(&mut file.transfer, bytes) {
                    self.active = Some(file);
                    return;
                }
                let name = file.transfer.meta().name.clone();
                tracing::info!(file = %name, "no recipients left, transfer aborted");
                let _ = file.reply.send(Err(RoomError::TransferAborted(name)));
            }
            Some(Err(e)) => {
                tracing::warn!(file = %file.transfer.meta().name, error = %e, "file read failed");
                let _ = file.reply.send(Err(RoomError::Io(e)));
            }
            None => {
                let delivered = self.mesh.finish_file(file.transfer);
                let _ = file.reply.send(Ok(delivered));
            }
        }
        self.start_next_file();
    }

    fn start_next_file(&mut self) {
        while let Some(next) = self.queued.pop_front() {
            match self.mesh.begin_file(next.meta) {
                Ok(transfer) if !transfer.is_abandoned() => {
                    self.active = Some(ActiveFile {
                        transfer,
                        chunks: next.chunks,
                        reply: next.reply,
                    });
                    return;
                }
                Ok(_) => {
                    let _ = next.reply.send(Ok(0));
                }
                Err(e) => {
                    let _ = next.reply.send(Err(e));
                }
            }
        }
    }

    fn abort_files(&mut self) {
        if let Some(file) = self.active.take() {
            let name = file.transfer.meta().name.clone();
            let _ = file.reply.send(Err(RoomError::TransferAborted(name)));
        }
        for file in self.queued.drain(..) {
            let _ = file.reply.send(Err(RoomError::TransferAborted(file.meta.name)));
        }
    }
}

/// Waits for the next chunk of the active file. Only polled while one is
/// active.
async fn next_chunk(active: &mut Option<ActiveFile>) -> Option<io::Result<Vec<u8>>> {
    match active {
        Some(file) => file.chunks.recv().await,
        None => std::future::pending().await,
    }
}

/// Starts a mesh actor.
///
/// `relay_out` receives everything the mesh wants sent to the relay;
/// `relay_in` must be fed with everything the relay sends. Returns the
/// handle and the event stream.
pub fn spawn_mesh(
    factory: Arc<dyn ChannelFactory>,
    config: MeshConfig,
    relay_out: mpsc::UnboundedSender<ClientMessage>,
    relay_in: mpsc::UnboundedReceiver<RelayEvent>,
) -> Result<(MeshHandle, MeshEvents), RoomError> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let chunk_size = config.chunk_size;
    let command_buffer = config.command_buffer;
    let (mesh, channels) = MeshCoordinator::new(factory, config, relay_out, events_tx)?;
    let (tx, rx) = mpsc::channel(command_buffer);

    let actor = MeshActor {
        mesh,
        binding: RelayBinding::new(),
        commands: rx,
        relay_in,
        channels,
        active: None,
        queued: VecDeque::new(),
    };
    tokio::spawn(actor.run());

    Ok((
        MeshHandle {
            sender: tx,
            chunk_size,
        },
        events_rx,
    ))
}
