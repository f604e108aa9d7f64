//! Streaming multipart/form-data decoding.
//!
//! This crate provides the decode pipeline:
//! - [`ChunkSource`] / [`LookaheadStream`] — bounded chunk reads with pushback
//! - [`BoundaryScanner`] — splits the stream into parts at boundary tokens
//! - [`PartHeaders`] — part header decoding and classification
//! - [`MultipartParser`] — the parse driver: limits, base64, handler dispatch
//! - [`UploadHandler`] — the pluggable storage chain for file content
//!
//! # Design Principles
//!
//! - The body is never buffered whole; file content streams through the
//!   handler chain in bounded chunks
//! - Boundary tokens and base64 alignment are detected across physical
//!   chunk edges
//! - Resource ceilings (fields, files, bytes, header size) are enforced
//!   mid-stream
//! - The transport is fully drained on every exit path, so the connection
//!   stays reusable
//! - Handler abort signals are plain return values, never unwinding

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod forms;
pub mod handlers;
pub mod headers;
pub mod parser;
pub mod scanner;
pub mod source;

pub use config::{
    DEFAULT_CHUNK_SIZE, DEFAULT_MAX_FIELD_BYTES, DEFAULT_MAX_FIELDS, DEFAULT_MAX_FILES,
    DEFAULT_MAX_HEADER_BYTES, MAX_CHUNK_SIZE, ParserConfig,
};
pub use error::MultipartError;
pub use forms::{FieldMap, FileMap, MultiValueMap};
pub use handlers::{
    ChunkOutcome, DEFAULT_MEMORY_THRESHOLD, FileMeta, MemoryFileHandler, NewFileOutcome,
    TempFileHandler, UploadHandler, UploadedFile, default_handler_chain,
};
pub use headers::{HeaderValue, PartHeaders, PartKind, parse_header_parameters, sanitize_filename};
pub use parser::MultipartParser;
pub use scanner::{Boundary, BoundaryScanner};
pub use source::{ChunkSource, LookaheadStream};
