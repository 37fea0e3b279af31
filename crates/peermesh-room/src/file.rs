//! Byte sources for outgoing files and sinks for incoming ones.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use peermesh_protocol::FileMeta;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Something a file can be read from, one chunk at a time.
pub trait ByteSource: Send {
    /// Name, size and type announced before the first chunk.
    fn meta(&self) -> FileMeta;

    /// Reads the next chunk of at most `max_len` bytes.
    ///
    /// Returns `Ok(None)` once the source is exhausted.
    fn next_chunk(
        &mut self,
        max_len: usize,
    ) -> impl Future<Output = io::Result<Option<Vec<u8>>>> + Send;
}

/// Streams a file from disk.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    meta: FileMeta,
}

impl FileSource {
    /// Opens `path` for sending. The announced name is the file name
    /// without its directory; the content type starts out empty.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).await?;
        let size = file.metadata().await?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        Ok(Self {
            file,
            meta: FileMeta::new(name, size, ""),
        })
    }

    /// Sets the MIME type announced to receivers.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.meta.content_type = content_type.into();
        self
    }
}

impl ByteSource for FileSource {
    fn meta(&self) -> FileMeta {
        self.meta.clone()
    }

    async fn next_chunk(&mut self, max_len: usize) -> io::Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; max_len];
        let mut filled = 0;
        // Short reads are normal; fill the chunk unless the file ends.
        while filled < max_len {
            let n = self.file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        Ok(Some(buf))
    }
}

/// Serves an in-memory blob.
#[derive(Debug, Clone)]
pub struct MemorySource {
    meta: FileMeta,
    data: Vec<u8>,
    pos: usize,
}

impl MemorySource {
    /// Wraps `data` under the given name and MIME type.
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            meta: FileMeta::new(name, data.len() as u64, content_type),
            data,
            pos: 0,
        }
    }
}

impl ByteSource for MemorySource {
    fn meta(&self) -> FileMeta {
        self.meta.clone()
    }

    async fn next_chunk(&mut self, max_len: usize) -> io::Result<Option<Vec<u8>>> {
        if self.pos >= self.data.len() || max_len == 0 {
            return Ok(None);
        }
        let end = self.data.len().min(self.pos + max_len);
        let chunk = self.data[self.pos..end].to_vec();
        self.pos = end;
        Ok(Some(chunk))
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Somewhere a received file can be stored.
pub trait ByteSink: Send {
    /// Stores `data` under (a sanitized form of) `suggested_name` and
    /// returns where it ended up.
    fn save(
        &mut self,
        suggested_name: &str,
        data: &[u8],
    ) -> impl Future<Output = io::Result<PathBuf>> + Send;
}

/// Saves received files into one directory.
///
/// Remote-declared names are untrusted. Only their final path component
/// is used, so nothing is ever written outside the directory, and an
/// existing file is never overwritten: `a.txt` becomes `a (1).txt`.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    /// Creates a sink writing into `dir` (created on first save).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The target directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ByteSink for DirectorySink {
    async fn save(&mut self, suggested_name: &str, data: &[u8]) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir).await?;
        let name = safe_file_name(suggested_name);

        for attempt in 0u32.. {
            let path = self.dir.join(numbered(&name, attempt));
            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(mut file) => {
                    file.write_all(data).await?;
                    file.flush().await?;
                    tracing::debug!(path = %path.display(), bytes = data.len(), "file saved");
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
        Err(io::Error::other("no free file name"))
    }
}

/// Last component of a remote-declared name, split on both separators.
fn safe_file_name(name: &str) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .find(|part| !part.is_empty())
        .unwrap_or("");
    match last.trim() {
        "" | "." | ".." => "download".to_string(),
        other => other.to_string(),
    }
}

/// `name` for attempt 0, `stem (n).ext` afterwards.
fn numbered(name: &str, attempt: u32) -> String {
    if attempt == 0 {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem} ({attempt}).{ext}"),
        _ => format!("{name} ({attempt})"),
    }
}
