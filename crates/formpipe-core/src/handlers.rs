//! Upload handlers: the capability set and the built-in storage chain.
//!
//! File content never accumulates inside the driver; it is pushed, chunk by
//! chunk, through an ordered chain of [`UploadHandler`]s. Each handler sees
//! the (possibly transformed) output of the previous one and can consume
//! the chunk, rewrite it, skip the rest of the file, or abort the upload —
//! all as explicit return values, never as unwinding.
//!
//! The default chain buffers small uploads in memory and spools everything
//! else to a temp file: [`MemoryFileHandler`] activates only when the
//! declared body length fits its threshold, and while active it claims each
//! file (stop-future-handlers) and consumes its chunks, so the
//! [`TempFileHandler`] behind it never touches disk.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use encoding_rs::Encoding;

use crate::config::DEFAULT_CHUNK_SIZE;
use crate::error::MultipartError;
use crate::forms::{FieldMap, FileMap};
use crate::scanner::Boundary;

/// Default threshold below which uploads stay in memory (2.5MB).
pub const DEFAULT_MEMORY_THRESHOLD: usize = 2_621_440;

/// Metadata for a file part, passed to each handler's `new_file`.
#[derive(Debug, Clone)]
pub struct FileMeta {
    /// The form field name.
    pub field_name: String,
    /// The sanitized filename.
    pub filename: String,
    /// The part's Content-Type, if any.
    pub content_type: Option<String>,
    /// The part's declared Content-Length, if any.
    pub content_length: Option<u64>,
    /// The charset parameter of the part's Content-Type, if any.
    pub charset: Option<String>,
    /// Remaining Content-Type parameters.
    pub content_type_extra: Vec<(String, String)>,
}

/// Outcome of a `new_file` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewFileOutcome {
    /// Keep notifying the remaining handlers.
    Accept,
    /// Skip the remaining `new_file` notifications for this file; handlers
    /// past this one receive no chunks for it either.
    StopFutureHandlers,
    /// Abort the whole parse.
    StopUpload {
        /// True when the connection is already unusable and the remaining
        /// input must not be drained.
        connection_reset: bool,
    },
}

/// Outcome of a `receive_data_chunk` call.
#[derive(Debug, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Pass this (possibly transformed) chunk to the next handler.
    Forward(Vec<u8>),
    /// The chunk was consumed; later handlers do not see it.
    Consumed,
    /// Abandon the rest of this file: partial state is discarded and the
    /// body drained, but the parse continues.
    SkipFile,
    /// Abort the whole parse.
    StopUpload {
        /// True when the connection is already unusable and the remaining
        /// input must not be drained.
        connection_reset: bool,
    },
}

/// The capability set the parse driver dispatches file content through.
///
/// Handlers are invoked in registration order for every callback.
pub trait UploadHandler {
    /// Preferred physical chunk size. The driver uses the minimum across
    /// all handlers that express a preference.
    fn preferred_chunk_size(&self) -> Option<usize> {
        None
    }

    /// Full-bypass hook, checked in handler order before the decode
    /// pipeline is constructed. Returning `Some` short-circuits the entire
    /// parse with the given collections.
    fn handle_raw_input(
        &mut self,
        _source: &mut dyn Read,
        _content_length: u64,
        _boundary: &Boundary,
        _encoding: &'static Encoding,
    ) -> Option<(FieldMap, FileMap)> {
        None
    }

    /// A new file part has started. Any per-file state (including the
    /// running byte counter kept by the driver) is reset before this call.
    fn new_file(&mut self, meta: &FileMeta) -> Result<NewFileOutcome, MultipartError>;

    /// Receive a chunk of (decoded) file content. `start` is this handler's
    /// running byte offset for the current file.
    fn receive_data_chunk(
        &mut self,
        chunk: Vec<u8>,
        start: u64,
    ) -> Result<ChunkOutcome, MultipartError>;

    /// The current file part is complete; `size` is the total number of
    /// bytes this handler received. The first handler returning a file
    /// object wins and later handlers are not asked.
    fn file_complete(&mut self, size: u64) -> Result<Option<UploadedFile>, MultipartError>;

    /// The whole upload finished. Returning `true` skips the remaining
    /// handlers' notifications; the result is advisory only.
    fn upload_complete(&mut self) -> bool {
        false
    }

    /// The current file or the whole upload was cut short. Discard any
    /// partial state (buffers, temp files).
    fn upload_interrupted(&mut self) {}
}

// ============================================================================
// Stored files
// ============================================================================

#[derive(Debug)]
enum FileStorage {
    Memory(Vec<u8>),
    TempFile { path: PathBuf },
}

/// A completed upload, backed by memory or by a temp file on disk.
#[derive(Debug)]
pub struct UploadedFile {
    field_name: String,
    filename: String,
    content_type: Option<String>,
    charset: Option<String>,
    size: u64,
    storage: FileStorage,
    closed: bool,
}

impl UploadedFile {
    /// Build a memory-backed upload.
    #[must_use]
    pub fn from_memory(meta: &FileMeta, data: Vec<u8>, size: u64) -> Self {
        Self {
            field_name: meta.field_name.clone(),
            filename: meta.filename.clone(),
            content_type: meta.content_type.clone(),
            charset: meta.charset.clone(),
            size,
            storage: FileStorage::Memory(data),
            closed: false,
        }
    }

    /// Build a temp-file-backed upload. The file at `path` is owned by the
    /// returned object and removed on close or drop.
    #[must_use]
    pub fn from_temp_file(meta: &FileMeta, path: PathBuf, size: u64) -> Self {
        Self {
            field_name: meta.field_name.clone(),
            filename: meta.filename.clone(),
            content_type: meta.content_type.clone(),
            charset: meta.charset.clone(),
            size,
            storage: FileStorage::TempFile { path },
            closed: false,
        }
    }

    /// The form field name this file arrived under.
    #[must_use]
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// The sanitized filename.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// The part's Content-Type, if any.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// The charset parameter of the part's Content-Type, if any.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    /// Total content size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns true when the content lives in a temp file on disk.
    #[must_use]
    pub fn is_spooled(&self) -> bool {
        matches!(self.storage, FileStorage::TempFile { .. })
    }

    /// Path to the backing temp file, if spooled.
    #[must_use]
    pub fn spooled_path(&self) -> Option<&Path> {
        match &self.storage {
            FileStorage::Memory(_) => None,
            FileStorage::TempFile { path } => Some(path.as_path()),
        }
    }

    /// Read the full content regardless of backing.
    pub fn bytes(&self) -> std::io::Result<Vec<u8>> {
        match &self.storage {
            FileStorage::Memory(data) => Ok(data.clone()),
            FileStorage::TempFile { path } => std::fs::read(path),
        }
    }

    /// Close the upload, removing any backing temp file. Idempotent.
    pub fn close(&mut self) -> std::io::Result<()> {
        if self.closed {
            return Ok(());
        }
        if let FileStorage::TempFile { path } = &self.storage {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }
        self.closed = true;
        Ok(())
    }
}

impl Drop for UploadedFile {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let FileStorage::TempFile { path } = &self.storage {
            let _ = std::fs::remove_file(path);
        }
    }
}

static UPLOAD_TEMP_COUNTER: AtomicU64 = AtomicU64::new(1);

fn create_upload_tempfile() -> std::io::Result<(PathBuf, std::fs::File)> {
    let temp_dir = std::env::temp_dir();
    let ts_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();

    for _ in 0..32 {
        let counter = UPLOAD_TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let candidate = temp_dir.join(format!(
            "formpipe-upload-{}-{ts_nanos}-{counter}.tmp",
            std::process::id()
        ));

        match OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&candidate)
        {
            Ok(file) => return Ok((candidate, file)),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        "failed to allocate unique upload temp file",
    ))
}

// ============================================================================
// Built-in handlers
// ============================================================================

/// Buffers uploads in memory when the declared body length fits a
/// threshold. While active it consumes chunks, so handlers behind it see
/// nothing; when inactive it forwards chunks untouched and produces no file.
#[derive(Debug)]
pub struct MemoryFileHandler {
    threshold: usize,
    activated: bool,
    buf: Vec<u8>,
    current: Option<FileMeta>,
}

impl MemoryFileHandler {
    /// Create a handler with [`DEFAULT_MEMORY_THRESHOLD`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_MEMORY_THRESHOLD)
    }

    /// Create a handler with a custom activation threshold.
    #[must_use]
    pub fn with_threshold(threshold: usize) -> Self {
        Self {
            threshold,
            activated: false,
            buf: Vec::new(),
            current: None,
        }
    }

    /// Returns true when the declared body length fit the threshold.
    #[must_use]
    pub fn is_activated(&self) -> bool {
        self.activated
    }
}

impl Default for MemoryFileHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadHandler for MemoryFileHandler {
    fn handle_raw_input(
        &mut self,
        _source: &mut dyn Read,
        content_length: u64,
        _boundary: &Boundary,
        _encoding: &'static Encoding,
    ) -> Option<(FieldMap, FileMap)> {
        // Only used to decide, up front, whether this body is small enough
        // to buffer; the parse itself is never bypassed.
        self.activated = content_length <= self.threshold as u64;
        None
    }

    fn new_file(&mut self, meta: &FileMeta) -> Result<NewFileOutcome, MultipartError> {
        if self.activated {
            self.current = Some(meta.clone());
            self.buf.clear();
            // Claim the file: handlers further down the chain are not told
            // about it and never allocate storage for it.
            return Ok(NewFileOutcome::StopFutureHandlers);
        }
        Ok(NewFileOutcome::Accept)
    }

    fn receive_data_chunk(
        &mut self,
        chunk: Vec<u8>,
        _start: u64,
    ) -> Result<ChunkOutcome, MultipartError> {
        if self.activated {
            self.buf.extend_from_slice(&chunk);
            Ok(ChunkOutcome::Consumed)
        } else {
            Ok(ChunkOutcome::Forward(chunk))
        }
    }

    fn file_complete(&mut self, size: u64) -> Result<Option<UploadedFile>, MultipartError> {
        if !self.activated {
            return Ok(None);
        }
        let Some(meta) = self.current.take() else {
            return Ok(None);
        };
        let data = std::mem::take(&mut self.buf);
        Ok(Some(UploadedFile::from_memory(&meta, data, size)))
    }

    fn upload_interrupted(&mut self) {
        self.buf.clear();
        self.current = None;
    }
}

/// Streams every upload into a temp file on disk.
#[derive(Debug, Default)]
pub struct TempFileHandler {
    current: Option<PendingTempFile>,
}

#[derive(Debug)]
struct PendingTempFile {
    meta: FileMeta,
    path: PathBuf,
    file: std::fs::File,
}

impl TempFileHandler {
    /// Create a temp-file handler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn discard_current(&mut self) {
        if let Some(pending) = self.current.take() {
            drop(pending.file);
            if let Err(err) = std::fs::remove_file(&pending.path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %pending.path.display(), error = %err,
                        "failed to remove abandoned upload temp file");
                }
            }
        }
    }
}

impl UploadHandler for TempFileHandler {
    fn preferred_chunk_size(&self) -> Option<usize> {
        Some(DEFAULT_CHUNK_SIZE)
    }

    fn new_file(&mut self, meta: &FileMeta) -> Result<NewFileOutcome, MultipartError> {
        self.discard_current();
        let (path, file) = create_upload_tempfile()?;
        self.current = Some(PendingTempFile {
            meta: meta.clone(),
            path,
            file,
        });
        Ok(NewFileOutcome::Accept)
    }

    fn receive_data_chunk(
        &mut self,
        chunk: Vec<u8>,
        _start: u64,
    ) -> Result<ChunkOutcome, MultipartError> {
        match &mut self.current {
            Some(pending) => {
                pending.file.write_all(&chunk)?;
                Ok(ChunkOutcome::Consumed)
            }
            None => Ok(ChunkOutcome::Forward(chunk)),
        }
    }

    fn file_complete(&mut self, size: u64) -> Result<Option<UploadedFile>, MultipartError> {
        let Some(mut pending) = self.current.take() else {
            return Ok(None);
        };
        pending.file.flush()?;
        drop(pending.file);
        Ok(Some(UploadedFile::from_temp_file(
            &pending.meta,
            pending.path,
            size,
        )))
    }

    fn upload_interrupted(&mut self) {
        self.discard_current();
    }
}

/// The default handler chain: memory buffering for small bodies, temp-file
/// spooling for everything else.
#[must_use]
pub fn default_handler_chain() -> Vec<Box<dyn UploadHandler>> {
    vec![
        Box::new(MemoryFileHandler::new()),
        Box::new(TempFileHandler::new()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(field: &str, filename: &str) -> FileMeta {
        FileMeta {
            field_name: field.to_string(),
            filename: filename.to_string(),
            content_type: Some("text/plain".to_string()),
            content_length: None,
            charset: None,
            content_type_extra: Vec::new(),
        }
    }

    fn boundary() -> Boundary {
        Boundary::new("b").unwrap()
    }

    #[test]
    fn memory_handler_consumes_when_activated() {
        let mut handler = MemoryFileHandler::with_threshold(1024);
        let mut empty: &[u8] = b"";
        let _ = handler.handle_raw_input(&mut empty, 10, &boundary(), encoding_rs::UTF_8);
        assert!(handler.is_activated());

        let outcome = handler.new_file(&meta("f", "a.txt")).unwrap();
        assert_eq!(outcome, NewFileOutcome::StopFutureHandlers);
        let outcome = handler.receive_data_chunk(b"hello".to_vec(), 0).unwrap();
        assert_eq!(outcome, ChunkOutcome::Consumed);

        let file = handler.file_complete(5).unwrap().expect("memory file");
        assert_eq!(file.size(), 5);
        assert!(!file.is_spooled());
        assert_eq!(file.bytes().unwrap(), b"hello");
        assert_eq!(file.filename(), "a.txt");
        assert_eq!(file.field_name(), "f");
    }

    #[test]
    fn memory_handler_forwards_when_inactive() {
        let mut handler = MemoryFileHandler::with_threshold(4);
        let mut empty: &[u8] = b"";
        let _ = handler.handle_raw_input(&mut empty, 100, &boundary(), encoding_rs::UTF_8);
        assert!(!handler.is_activated());

        let outcome = handler.new_file(&meta("f", "a.txt")).unwrap();
        assert_eq!(outcome, NewFileOutcome::Accept);
        let outcome = handler.receive_data_chunk(b"data".to_vec(), 0).unwrap();
        assert_eq!(outcome, ChunkOutcome::Forward(b"data".to_vec()));
        assert!(handler.file_complete(4).unwrap().is_none());
    }

    #[test]
    fn temp_handler_spools_to_disk() {
        let mut handler = TempFileHandler::new();
        handler.new_file(&meta("f", "big.bin")).unwrap();
        handler.receive_data_chunk(b"chunk one ".to_vec(), 0).unwrap();
        handler.receive_data_chunk(b"chunk two".to_vec(), 10).unwrap();

        let mut file = handler.file_complete(19).unwrap().expect("temp file");
        assert!(file.is_spooled());
        assert_eq!(file.size(), 19);
        let path = file.spooled_path().unwrap().to_path_buf();
        assert!(path.exists());
        assert_eq!(file.bytes().unwrap(), b"chunk one chunk two");

        file.close().unwrap();
        assert!(!path.exists());
        // Idempotent.
        file.close().unwrap();
    }

    #[test]
    fn temp_handler_interrupt_removes_file() {
        let mut handler = TempFileHandler::new();
        handler.new_file(&meta("f", "x.bin")).unwrap();
        handler.receive_data_chunk(b"partial".to_vec(), 0).unwrap();

        let path = handler.current.as_ref().unwrap().path.clone();
        assert!(path.exists());
        handler.upload_interrupted();
        assert!(!path.exists());
        assert!(handler.file_complete(7).unwrap().is_none());
    }

    #[test]
    fn dropping_uploaded_file_removes_temp_file() {
        let mut handler = TempFileHandler::new();
        handler.new_file(&meta("f", "x.bin")).unwrap();
        handler.receive_data_chunk(b"abc".to_vec(), 0).unwrap();
        let file = handler.file_complete(3).unwrap().unwrap();
        let path = file.spooled_path().unwrap().to_path_buf();
        assert!(path.exists());
        drop(file);
        assert!(!path.exists());
    }

    #[test]
    fn default_chain_prefers_memory_for_small_bodies() {
        let mut handlers = default_handler_chain();
        let mut empty: &[u8] = b"";
        for handler in &mut handlers {
            assert!(
                handler
                    .handle_raw_input(&mut empty, 64, &boundary(), encoding_rs::UTF_8)
                    .is_none()
            );
        }

        // The activated memory handler claims the file, so the temp handler
        // is never notified and allocates nothing on disk.
        let outcome = handlers[0].new_file(&meta("f", "s.txt")).unwrap();
        assert_eq!(outcome, NewFileOutcome::StopFutureHandlers);

        let outcome = handlers[0].receive_data_chunk(b"tiny".to_vec(), 0).unwrap();
        assert_eq!(outcome, ChunkOutcome::Consumed);

        let file = handlers[0].file_complete(4).unwrap().expect("memory file");
        assert!(!file.is_spooled());
        assert!(handlers[1].file_complete(0).unwrap().is_none());
    }
}
