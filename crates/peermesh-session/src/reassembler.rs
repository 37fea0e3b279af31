//! File-transfer reassembly: the per-peer receive state machine.
//!
//! ```text
//!            FileMeta                 FileEnd
//!   Idle ───────────────→ Receiving ───────────→ Idle  (TransferComplete)
//!    │ ↺ FileChunk/FileEnd   │ ↺ FileChunk (append)
//!    │   (ignored, error)    │ ↺ FileMeta (discard partial, restart, error)
//! ```
//!
//! Each peer session owns exactly one reassembler; nothing here is shared
//! between peers, so concurrent transfers from different peers never see
//! each other's chunks.

use peermesh_protocol::FileMeta;

use crate::SequenceError;

/// Where the reassembler currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// No transfer in progress.
    Idle,
    /// Metadata received, collecting chunks.
    Receiving,
}

/// A fully received file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedTransfer {
    /// Metadata of the transfer, as declared by the sender.
    pub meta: FileMeta,
    /// Every chunk, concatenated in arrival order.
    pub data: Vec<u8>,
}

impl CompletedTransfer {
    /// `true` if the received byte count equals the declared size.
    pub fn size_matches(&self) -> bool {
        self.data.len() as u64 == self.meta.size
    }
}

/// The transfer currently being received.
#[derive(Debug)]
struct PartialTransfer {
    meta: FileMeta,
    chunks: Vec<Vec<u8>>,
    received: u64,
}

/// Accumulates chunks between a metadata frame and an end-of-file frame.
///
/// The presence of a partial transfer is the only thing that tells
/// `Receiving` from `Idle`.
#[derive(Debug, Default)]
pub struct TransferReassembler {
    active: Option<PartialTransfer>,
}

impl TransferReassembler {
    /// Creates an idle reassembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> TransferState {
        match self.active {
            Some(_) => TransferState::Receiving,
            None => TransferState::Idle,
        }
    }

    /// Metadata of the transfer in progress.
    pub fn meta(&self) -> Option<&FileMeta> {
        self.active.as_ref().map(|t| &t.meta)
    }

    /// Bytes received so far in the transfer in progress.
    pub fn received_bytes(&self) -> u64 {
        self.active.as_ref().map_or(0, |t| t.received)
    }

    /// Starts a transfer.
    ///
    /// # Errors
    /// [`SequenceError::UnexpectedMeta`] if a transfer was already in
    /// progress. The new transfer is started anyway; only the old partial
    /// data is lost.
    pub fn on_meta(&mut self, meta: FileMeta) -> Result<(), SequenceError> {
        let previous = self.active.replace(PartialTransfer {
            meta,
            chunks: Vec::new(),
            received: 0,
        });
        match previous {
            Some(old) => Err(SequenceError::UnexpectedMeta {
                discarded: old.meta.name,
            }),
            None => Ok(()),
        }
    }

    /// Appends a chunk and returns the running byte count.
    ///
    /// # Errors
    /// [`SequenceError::ChunkWithoutMeta`] when idle; the chunk is dropped.
    pub fn on_chunk(&mut self, chunk: Vec<u8>) -> Result<u64, SequenceError> {
        let transfer = self
            .active
            .as_mut()
            .ok_or(SequenceError::ChunkWithoutMeta)?;
        transfer.received += chunk.len() as u64;
        transfer.chunks.push(chunk);
        Ok(transfer.received)
    }

    /// Finishes the transfer in progress and returns to idle.
    ///
    /// # Errors
    /// [`SequenceError::EndWithoutMeta`] when idle.
    pub fn on_end(&mut self) -> Result<CompletedTransfer, SequenceError> {
        let transfer = self
            .active
            .take()
            .ok_or(SequenceError::EndWithoutMeta)?;
        Ok(CompletedTransfer {
            meta: transfer.meta,
            data: transfer.chunks.concat(),
        })
    }

    /// Drops any partial transfer. Returns its metadata if there was one.
    pub fn abort(&mut self) -> Option<FileMeta> {
        self.active.take().map(|t| t.meta)
    }
}
