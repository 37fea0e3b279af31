//! Peer frames and their tagged wire format.
//!
//! Everything two peers exchange over their direct channel is a [`Frame`].
//! One channel carries both chat text and file transfers, so every payload
//! starts with a one-byte tag that says what follows:
//!
//! ```text
//! ┌──────┬──────────────────────────────────────────────┐
//! │ 0x01 │ UTF-8 text                                   │  Text
//! │ 0x02 │ UTF-8 JSON {"name","size","contentType"}     │  FileMeta
//! │ 0x03 │ raw bytes                                    │  FileChunk
//! │ 0x04 │ (nothing)                                    │  FileEnd
//! └──────┴──────────────────────────────────────────────┘
//! ```
//!
//! Decoding reads the tag first and never guesses from the body. A file
//! chunk whose bytes happen to spell `"FILEEND"` (or are empty, or are
//! plain ASCII) is still a chunk.

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Tag byte for [`Frame::Text`].
pub const TAG_TEXT: u8 = 0x01;
/// Tag byte for [`Frame::FileMeta`].
pub const TAG_FILE_META: u8 = 0x02;
/// Tag byte for [`Frame::FileChunk`].
pub const TAG_FILE_CHUNK: u8 = 0x03;
/// Tag byte for [`Frame::FileEnd`].
pub const TAG_FILE_END: u8 = 0x04;

/// Declared properties of a file about to be transferred.
///
/// Serialized as `{"name": .., "size": .., "contentType": ..}`.
/// `contentType` may be missing on the wire (browsers report an empty
/// type for unknown files); it then decodes as `""`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    /// Suggested file name. Untrusted: may contain path separators.
    pub name: String,
    /// Declared total size in bytes.
    pub size: u64,
    /// MIME type, possibly empty.
    #[serde(rename = "contentType", default)]
    pub content_type: String,
}

impl FileMeta {
    /// Builds metadata from its parts.
    pub fn new(
        name: impl Into<String>,
        size: u64,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            size,
            content_type: content_type.into(),
        }
    }
}

/// One self-describing unit of the peer protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A chat message.
    Text(String),
    /// Starts a file transfer.
    FileMeta(FileMeta),
    /// One piece of the file currently being transferred.
    FileChunk(Vec<u8>),
    /// Ends the file transfer in progress.
    FileEnd,
}

impl Frame {
    /// The tag byte this frame is encoded with.
    pub fn tag(&self) -> u8 {
        match self {
            Self::Text(_) => TAG_TEXT,
            Self::FileMeta(_) => TAG_FILE_META,
            Self::FileChunk(_) => TAG_FILE_CHUNK,
            Self::FileEnd => TAG_FILE_END,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::FileMeta(_) => "file-meta",
            Self::FileChunk(_) => "file-chunk",
            Self::FileEnd => "file-end",
        }
    }
}

/// Encodes and decodes [`Frame`]s.
///
/// Stateless; one instance can serve every channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Encodes a frame into one channel payload.
    ///
    /// # Errors
    /// [`ProtocolError::Encode`] if the metadata can't be serialized.
    pub fn encode(&self, frame: &Frame) -> Result<Vec<u8>, ProtocolError> {
        let mut out = vec![frame.tag()];
        match frame {
            Frame::Text(text) => out.extend_from_slice(text.as_bytes()),
            Frame::FileMeta(meta) => {
                serde_json::to_writer(&mut out, meta)
                    .map_err(ProtocolError::Encode)?;
            }
            Frame::FileChunk(bytes) => {
                out.reserve(bytes.len());
                out.extend_from_slice(bytes);
            }
            Frame::FileEnd => {}
        }
        Ok(out)
    }

    /// Decodes one channel payload.
    ///
    /// # Errors
    /// [`ProtocolError::MalformedFrame`] if the payload is empty, the tag
    /// is unknown, or the body doesn't fit the tag.
    pub fn decode(&self, payload: &[u8]) -> Result<Frame, ProtocolError> {
        let (&tag, body) = payload.split_first().ok_or_else(|| {
            ProtocolError::MalformedFrame("empty payload".into())
        })?;

        match tag {
            TAG_TEXT => std::str::from_utf8(body)
                .map(|s| Frame::Text(s.to_owned()))
                .map_err(|e| {
                    ProtocolError::MalformedFrame(format!(
                        "text body is not UTF-8: {e}"
                    ))
                }),
            TAG_FILE_META => serde_json::from_slice::<FileMeta>(body)
                .map(Frame::FileMeta)
                .map_err(|e| {
                    ProtocolError::MalformedFrame(format!(
                        "bad file metadata: {e}"
                    ))
                }),
            TAG_FILE_CHUNK => Ok(Frame::FileChunk(body.to_vec())),
            // Trailing bytes after an end tag carry no meaning.
            TAG_FILE_END => Ok(Frame::FileEnd),
            other => Err(ProtocolError::MalformedFrame(format!(
                "unknown tag 0x{other:02x}"
            ))),
        }
    }
}
