//! Streaming multipart/form-data parsing.
//!
//! formpipe decodes `multipart/form-data` request bodies into ordered
//! collections of fields and uploaded files:
//!
//! - **Streaming** — the body is never buffered whole; file content flows
//!   through a chain of upload handlers in bounded chunks
//! - **Hard limits** — field count, file count, in-memory bytes, and header
//!   size ceilings are enforced mid-stream
//! - **Pluggable storage** — in-memory buffering and temp-file spooling ship
//!   by default; custom handlers implement one trait
//! - **Connection-safe** — the transport is fully drained on every exit
//!   path, success or failure
//!
//! # Quick Start
//!
//! ```
//! use formpipe::prelude::*;
//!
//! let body = concat!(
//!     "--XYZ\r\n",
//!     "Content-Disposition: form-data; name=\"greeting\"\r\n",
//!     "\r\n",
//!     "hello\r\n",
//!     "--XYZ--\r\n",
//! );
//!
//! let config = ParserConfig::default().with_max_fields(Some(256));
//! let parser = MultipartParser::new(
//!     "multipart/form-data; boundary=XYZ",
//!     body.len() as i64,
//!     config,
//! )?;
//! let mut handlers = default_handler_chain();
//! let (fields, files) = parser.parse(body.as_bytes(), &mut handlers)?;
//!
//! assert_eq!(fields.get("greeting").map(String::as_str), Some("hello"));
//! assert!(files.is_empty());
//! # Ok::<(), MultipartError>(())
//! ```
//!
//! # Crate Structure
//!
//! - [`formpipe_core`] — the decode pipeline: chunk source, boundary
//!   scanner, part header decoding, parse driver, upload handler chain

#![forbid(unsafe_code)]

use std::io::Read;

// Re-export the implementation crate
pub use formpipe_core as core;

// Re-export commonly used types
pub use formpipe_core::{
    Boundary, ChunkOutcome, FieldMap, FileMap, FileMeta, HeaderValue, MemoryFileHandler,
    MultiValueMap, MultipartError, MultipartParser, NewFileOutcome, ParserConfig, PartHeaders,
    PartKind, TempFileHandler, UploadHandler, UploadedFile, default_handler_chain,
    parse_header_parameters, sanitize_filename,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        Boundary, ChunkOutcome, FieldMap, FileMap, FileMeta, MultipartError, MultipartParser,
        NewFileOutcome, ParserConfig, UploadHandler, UploadedFile, default_handler_chain,
    };
}

/// Parse a multipart body with the default configuration and handler chain.
///
/// Small uploads are buffered in memory; larger ones are spooled to temp
/// files owned by the returned [`UploadedFile`] objects.
///
/// # Example
///
/// ```
/// let body = concat!(
///     "--b\r\n",
///     "Content-Disposition: form-data; name=\"file\"; filename=\"note.txt\"\r\n",
///     "\r\n",
///     "contents\r\n",
///     "--b--\r\n",
/// );
/// let (fields, files) = formpipe::parse_form(
///     "multipart/form-data; boundary=b",
///     body.len() as i64,
///     body.as_bytes(),
/// )?;
/// assert_eq!(files.get("file").unwrap().size(), 8);
/// # Ok::<(), formpipe::MultipartError>(())
/// ```
pub fn parse_form<R: Read>(
    content_type: &str,
    content_length: i64,
    source: R,
) -> Result<(FieldMap, FileMap), MultipartError> {
    let parser = MultipartParser::new(content_type, content_length, ParserConfig::default())?;
    let mut handlers = default_handler_chain();
    parser.parse(source, &mut handlers)
}
