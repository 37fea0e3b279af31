//! Error types for the protocol layer.
//!
//! Each crate in peermesh defines its own error enum. When you see a
//! `ProtocolError`, the problem is in how bytes were framed or
//! serialized, not in networking or session management.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serializing a relay message or frame body failed.
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// A relay message could not be deserialized.
    ///
    /// Common causes: malformed JSON, missing required fields, or an
    /// unknown `type` tag.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// A peer payload doesn't map to any [`Frame`](crate::Frame).
    ///
    /// Raised for an empty payload, an unknown tag byte, a text body that
    /// isn't UTF-8, or a file-metadata body that isn't valid JSON with
    /// `name` and `size`. Receivers log and drop the payload.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}
