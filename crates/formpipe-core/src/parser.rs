//! The multipart parse driver.
//!
//! [`MultipartParser`] drives exactly one pass over a request body: it
//! validates the Content-Type and boundary up front, walks the scanner's
//! part sequence, enforces the configured ceilings mid-stream, applies
//! base64 transfer-decoding, routes file content through the handler chain,
//! and assembles the ordered field and file collections. The transport is
//! fully drained on every exit path — success, limit rejection, or
//! handler-initiated abort — unless a handler reports the connection itself
//! is already gone.

use std::io::Read;

use base64::Engine as _;

use crate::config::{MAX_CHUNK_SIZE, ParserConfig};
use crate::error::MultipartError;
use crate::forms::{FieldMap, FileMap};
use crate::handlers::{ChunkOutcome, FileMeta, NewFileOutcome, UploadHandler};
use crate::headers::{PartHeaders, PartKind, parse_header_parameters, sanitize_filename};
use crate::scanner::{Boundary, BoundaryScanner};
use crate::source::{ChunkSource, LookaheadStream};

/// Streaming multipart/form-data parser.
#[derive(Debug)]
pub struct MultipartParser {
    boundary: Boundary,
    content_length: u64,
    config: ParserConfig,
}

impl MultipartParser {
    /// Validate the request metadata and build a parser.
    ///
    /// The Content-Type must be a 7-bit ASCII `multipart/*` value carrying a
    /// valid `boundary` parameter, and the declared content length must not
    /// be negative.
    pub fn new(
        content_type: &str,
        content_length: i64,
        config: ParserConfig,
    ) -> Result<Self, MultipartError> {
        if content_length < 0 {
            return Err(MultipartError::InvalidContentLength {
                length: content_length,
            });
        }
        if !content_type.is_ascii() {
            return Err(MultipartError::InvalidContentType {
                detail: "content type is not 7-bit ascii".to_string(),
            });
        }
        let (primary, params) = parse_header_parameters(content_type);
        if !primary.to_ascii_lowercase().starts_with("multipart/") {
            return Err(MultipartError::InvalidContentType {
                detail: format!("expected a multipart media type, got {primary:?}"),
            });
        }
        let boundary = params
            .iter()
            .find(|(k, _)| k == "boundary")
            .map(|(_, v)| v.as_str())
            .ok_or(MultipartError::InvalidBoundary)
            .and_then(Boundary::new)?;

        Ok(Self {
            boundary,
            content_length: u64::try_from(content_length).unwrap_or(0),
            config,
        })
    }

    /// The validated boundary token.
    #[must_use]
    pub fn boundary(&self) -> &Boundary {
        &self.boundary
    }

    /// Parse the body, returning the ordered field and file collections.
    ///
    /// Fatal errors discard any partial results; file objects already
    /// collected are closed before the error propagates.
    pub fn parse<R: Read>(
        &self,
        mut source: R,
        handlers: &mut [Box<dyn UploadHandler>],
    ) -> Result<(FieldMap, FileMap), MultipartError> {
        // A declared length of zero yields empty output without touching
        // the handlers or building the pipeline.
        if self.content_length == 0 {
            return Ok((FieldMap::new(), FileMap::new()));
        }

        for handler in handlers.iter_mut() {
            if let Some((fields, files)) = handler.handle_raw_input(
                &mut source,
                self.content_length,
                &self.boundary,
                self.config.encoding(),
            ) {
                tracing::debug!("upload handler bypassed the multipart pipeline");
                return Ok((fields, files));
            }
        }

        let chunk_size = self.effective_chunk_size(handlers);
        let chunk_source = ChunkSource::new(source, self.content_length, chunk_size);
        let mut scanner = BoundaryScanner::new(
            LookaheadStream::new(chunk_source),
            &self.boundary,
            self.config.max_header_bytes(),
        );

        let mut fields = FieldMap::new();
        let mut files = FileMap::new();
        match self.run(&mut scanner, handlers, chunk_size, &mut fields, &mut files) {
            Ok(()) => Ok((fields, files)),
            Err(err) => {
                tracing::debug!(error = %err, "multipart parse failed");
                for handler in handlers.iter_mut() {
                    handler.upload_interrupted();
                }
                for file in files.values_mut() {
                    let _ = file.close();
                }
                // Leave the transport reusable unless the handler reported
                // the connection itself is gone (draining would block).
                if !matches!(
                    err,
                    MultipartError::Aborted {
                        connection_reset: true
                    }
                ) {
                    let _ = scanner.drain_source();
                }
                Err(err)
            }
        }
    }

    /// The physical chunk size: the configured size bounded by every
    /// handler preference, capped below 2^31 and kept divisible by 4.
    fn effective_chunk_size(&self, handlers: &[Box<dyn UploadHandler>]) -> usize {
        let mut size = self.config.chunk_size().min(MAX_CHUNK_SIZE);
        for handler in handlers {
            if let Some(preferred) = handler.preferred_chunk_size() {
                size = size.min(preferred);
            }
        }
        (size & !3).max(4)
    }

    #[allow(clippy::too_many_lines)]
    fn run<R: Read>(
        &self,
        scanner: &mut BoundaryScanner<R>,
        handlers: &mut [Box<dyn UploadHandler>],
        chunk_size: usize,
        fields: &mut FieldMap,
        files: &mut FileMap,
    ) -> Result<(), MultipartError> {
        let mut field_count = 0usize;
        let mut file_count = 0usize;
        let mut bytes_read = 0usize;
        // A file part is only complete once the next part begins (or the
        // stream ends), so completion is finalized one iteration late.
        let mut pending: Option<(String, Vec<u64>)> = None;

        loop {
            let block = scanner.next_part()?;
            if let Some((field_name, counters)) = pending.take() {
                finalize_pending(&field_name, &counters, handlers, files)?;
            }
            let Some(block) = block else { break };

            let headers = PartHeaders::parse(&block);
            match PartKind::classify(&headers) {
                PartKind::Raw => {
                    tracing::debug!("skipping part without a usable content-disposition");
                    scanner.drain_body()?;
                }
                PartKind::Field { name } => {
                    field_count += 1;
                    if let Some(max) = self.config.max_fields() {
                        if field_count > max {
                            return Err(MultipartError::TooManyFields {
                                count: field_count,
                                max,
                            });
                        }
                    }
                    let name = name.to_string();
                    // Name plus separator overhead counts against the
                    // ceiling, for parity with URL-encoded body accounting.
                    if let Some(max) = self.config.max_field_bytes() {
                        bytes_read += name.len() + 2;
                        if bytes_read > max {
                            return Err(MultipartError::PayloadTooLarge {
                                size: bytes_read,
                                max,
                            });
                        }
                    }

                    let is_base64 = transfer_encoding_is_base64(&headers);
                    let mut value = Vec::new();
                    while let Some(chunk) = scanner.read_body(chunk_size)? {
                        if let Some(max) = self.config.max_field_bytes() {
                            bytes_read += chunk.len();
                            if bytes_read > max {
                                return Err(MultipartError::PayloadTooLarge {
                                    size: bytes_read,
                                    max,
                                });
                            }
                        }
                        value.extend_from_slice(&chunk);
                    }
                    if is_base64 {
                        value = decode_base64_field(value);
                    }
                    let (text, _, _) = self.config.encoding().decode(&value);
                    fields.append(name, text.into_owned());
                }
                PartKind::File { name, filename } => {
                    file_count += 1;
                    if let Some(max) = self.config.max_files() {
                        if file_count > max {
                            return Err(MultipartError::TooManyFiles {
                                count: file_count,
                                max,
                            });
                        }
                    }
                    let Some(filename) = sanitize_filename(filename) else {
                        tracing::debug!(field = name, "dropping file part with unusable filename");
                        scanner.drain_body()?;
                        continue;
                    };
                    let field_name = name.to_string();
                    let meta = file_meta(&headers, &field_name, filename);
                    let is_base64 = transfer_encoding_is_base64(&headers);

                    let mut counters = vec![0u64; handlers.len()];
                    // Stop-future-handlers short-circuits only the remaining
                    // new_file notifications; chunk delivery still walks the
                    // full chain.
                    for handler in handlers.iter_mut() {
                        match handler.new_file(&meta)? {
                            NewFileOutcome::Accept => {}
                            NewFileOutcome::StopFutureHandlers => break,
                            NewFileOutcome::StopUpload { connection_reset } => {
                                return Err(MultipartError::Aborted { connection_reset });
                            }
                        }
                    }

                    let mut skipped = false;
                    'body: while let Some(chunk) = scanner.read_body(chunk_size)? {
                        let chunk = if is_base64 {
                            decode_base64_chunk(scanner, chunk)?
                        } else {
                            chunk
                        };
                        let mut carried = chunk;
                        for i in 0..handlers.len() {
                            let received = carried.len() as u64;
                            match handlers[i].receive_data_chunk(carried, counters[i])? {
                                ChunkOutcome::Forward(next) => {
                                    counters[i] += received;
                                    carried = next;
                                }
                                ChunkOutcome::Consumed => {
                                    counters[i] += received;
                                    break;
                                }
                                ChunkOutcome::SkipFile => {
                                    tracing::debug!(
                                        field = %field_name,
                                        "handler skipped the rest of the file"
                                    );
                                    for handler in handlers.iter_mut() {
                                        handler.upload_interrupted();
                                    }
                                    scanner.drain_body()?;
                                    skipped = true;
                                    break 'body;
                                }
                                ChunkOutcome::StopUpload { connection_reset } => {
                                    return Err(MultipartError::Aborted { connection_reset });
                                }
                            }
                        }
                    }
                    if !skipped {
                        pending = Some((field_name, counters));
                    }
                }
            }
        }

        // Advisory completion notification; the first handler returning
        // true short-circuits the rest.
        for handler in handlers.iter_mut() {
            if handler.upload_complete() {
                break;
            }
        }
        // Defensive: the transport is fully consumed even if a handler
        // returned early.
        scanner.drain_source()?;
        Ok(())
    }
}

/// Ask each handler, in order, for the completed file; the first non-empty
/// answer wins.
fn finalize_pending(
    field_name: &str,
    counters: &[u64],
    handlers: &mut [Box<dyn UploadHandler>],
    files: &mut FileMap,
) -> Result<(), MultipartError> {
    for (i, handler) in handlers.iter_mut().enumerate() {
        if let Some(file) = handler.file_complete(counters[i])? {
            files.append(field_name.to_string(), file);
            break;
        }
    }
    Ok(())
}

fn transfer_encoding_is_base64(headers: &PartHeaders) -> bool {
    headers
        .get("content-transfer-encoding")
        .is_some_and(|h| h.value().trim().eq_ignore_ascii_case("base64"))
}

fn file_meta(headers: &PartHeaders, field_name: &str, filename: String) -> FileMeta {
    let (content_type, charset, content_type_extra) = match headers.get("content-type") {
        Some(h) => (
            Some(h.value().trim().to_string()).filter(|v| !v.is_empty()),
            h.param("charset").map(str::to_string),
            h.params()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ),
        None => (None, None, Vec::new()),
    };
    let content_length = headers
        .get("content-length")
        .and_then(|h| h.value().trim().parse::<u64>().ok());

    FileMeta {
        field_name: field_name.to_string(),
        filename,
        content_type,
        content_length,
        charset,
        content_type_extra,
    }
}

/// Field values tolerate broken base64: the raw bytes are used as-is.
fn decode_base64_field(raw: Vec<u8>) -> Vec<u8> {
    let stripped: Vec<u8> = raw
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    match base64::engine::general_purpose::STANDARD.decode(&stripped) {
        Ok(decoded) => decoded,
        Err(_) => raw,
    }
}

/// Strip interior whitespace and realign to a 4-byte multiple by pulling up
/// to 3 extra bytes at a time from the body, then decode strictly. A broken
/// chunk mid-file is fatal: downstream handlers have already started
/// writing.
fn decode_base64_chunk<R: Read>(
    scanner: &mut BoundaryScanner<R>,
    chunk: Vec<u8>,
) -> Result<Vec<u8>, MultipartError> {
    let mut stripped: Vec<u8> = chunk
        .into_iter()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    while stripped.len() % 4 != 0 {
        let missing = 4 - stripped.len() % 4;
        match scanner.read_body(missing)? {
            None => break,
            Some(extra) => {
                stripped.extend(extra.into_iter().filter(|b| !b.is_ascii_whitespace()));
            }
        }
    }
    base64::engine::general_purpose::STANDARD
        .decode(&stripped)
        .map_err(|err| MultipartError::InvalidBase64 {
            detail: err.to_string(),
        })
}
