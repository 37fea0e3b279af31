//! Per-peer sessions for peermesh.
//!
//! Every participant keeps one [`PeerSession`] per remote participant in
//! its room. A session owns:
//!
//! 1. **The direct channel** to that peer, and its negotiation state
//! 2. **A [`TransferReassembler`]**, the receive side of file transfers
//!    from that peer
//!
//! # How it fits in the stack
//!
//! ```text
//! Mesh Layer (above)      ← one session per remote peer, routes events
//!     ↕
//! Session Layer (this crate)  ← channel lifecycle, frame send/receive
//!     ↕
//! Protocol + Transport (below)  ← Frame codec, PeerChannel trait
//! ```
//!
//! Sessions are plain synchronous state machines. They are driven by
//! whoever owns the channel event queue.

mod config;
mod error;
mod reassembler;
mod session;

pub use config::SessionConfig;
pub use error::{SequenceError, SessionError};
pub use reassembler::{CompletedTransfer, TransferReassembler, TransferState};
pub use session::{ChannelState, PeerSession, SessionEvent};
