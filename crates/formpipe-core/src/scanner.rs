//! Boundary scanning: splitting the byte stream into parts.
//!
//! [`BoundaryScanner`] walks a [`LookaheadStream`] and exposes the body as
//! a sequence of parts: [`next_part`](BoundaryScanner::next_part) advances
//! past the next boundary and returns the raw header block,
//! [`read_body`](BoundaryScanner::read_body) hands out the current part's
//! body in bounded slices up to (but excluding) the next boundary. A
//! delimiter split across two physical chunks is still detected: the
//! scanner keeps the trailing `delimiter + 2` bytes of its window unsettled
//! until more data arrives.

use std::io::Read;

use memchr::memmem;

use crate::error::MultipartError;
use crate::source::LookaheadStream;

/// Granularity used when draining an unwanted body.
const DRAIN_CHUNK: usize = 8 * 1024;

/// A validated multipart boundary token.
///
/// Boundaries are 1 to 200 printable ASCII characters and may not start or
/// end with a space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boundary(String);

impl Boundary {
    /// Longest accepted boundary.
    pub const MAX_LEN: usize = 200;

    /// Validate a boundary token.
    pub fn new(value: &str) -> Result<Self, MultipartError> {
        let bytes = value.as_bytes();
        let valid = !bytes.is_empty()
            && bytes.len() <= Self::MAX_LEN
            && bytes.iter().all(|b| (0x20..=0x7e).contains(b))
            && bytes[0] != b' '
            && bytes[bytes.len() - 1] != b' ';
        if valid {
            Ok(Self(value.to_string()))
        } else {
            Err(MultipartError::InvalidBoundary)
        }
    }

    /// The boundary token as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The boundary token as bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Display for Boundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Nothing consumed yet; the first boundary may omit its leading CRLF.
    Preamble,
    /// A boundary and its CRLF were consumed; a header block comes next.
    AtHeaders,
    /// A header block was handed out; body bytes are being read.
    InBody,
    /// The terminal boundary was consumed.
    Epilogue,
}

enum Located {
    Found { pos: usize, terminal: bool },
    NeedMore,
}

/// Splits the lookahead stream into parts at `--boundary` occurrences.
///
/// The sequence is lazy, finite, and non-restartable: each part's body must
/// be fully read (or drained) before the next call to `next_part`.
#[derive(Debug)]
pub struct BoundaryScanner<R> {
    stream: LookaheadStream<R>,
    /// `CRLF "--" boundary`.
    delimiter: Vec<u8>,
    max_header_bytes: usize,
    window: Vec<u8>,
    state: ScanState,
    /// Body bytes left before a located boundary, and whether that boundary
    /// is the terminal one.
    pending_boundary: Option<(usize, bool)>,
}

impl<R: Read> BoundaryScanner<R> {
    /// Create a scanner over `stream` for the given boundary.
    #[must_use]
    pub fn new(stream: LookaheadStream<R>, boundary: &Boundary, max_header_bytes: usize) -> Self {
        let mut delimiter = Vec::with_capacity(boundary.as_bytes().len() + 4);
        delimiter.extend_from_slice(b"\r\n--");
        delimiter.extend_from_slice(boundary.as_bytes());
        Self {
            stream,
            delimiter,
            max_header_bytes,
            window: Vec::new(),
            state: ScanState::Preamble,
            pending_boundary: None,
        }
    }

    /// Advance to the next part and return its raw header block, or `None`
    /// once the terminal boundary has been reached. An unfinished body from
    /// the previous part is drained first.
    pub fn next_part(&mut self) -> Result<Option<Vec<u8>>, MultipartError> {
        loop {
            match self.state {
                ScanState::Preamble => self.advance_past_first_boundary()?,
                ScanState::InBody => self.drain_body()?,
                ScanState::AtHeaders => {
                    let block = self.read_header_block()?;
                    self.state = ScanState::InBody;
                    self.pending_boundary = None;
                    return Ok(Some(block));
                }
                ScanState::Epilogue => return Ok(None),
            }
        }
    }

    /// Read up to `max` bytes of the current part's body. Returns `None`
    /// once the body is exhausted (the next boundary has been consumed).
    pub fn read_body(&mut self, max: usize) -> Result<Option<Vec<u8>>, MultipartError> {
        if self.state != ScanState::InBody {
            return Ok(None);
        }
        let max = max.max(1);
        loop {
            if let Some((remaining, terminal)) = self.pending_boundary {
                if remaining == 0 {
                    self.pending_boundary = None;
                    self.window.drain(..self.delimiter.len() + 2);
                    if terminal {
                        self.state = ScanState::Epilogue;
                    } else {
                        self.state = ScanState::AtHeaders;
                    }
                    return Ok(None);
                }
                let take = remaining.min(max);
                let out: Vec<u8> = self.window.drain(..take).collect();
                self.pending_boundary = Some((remaining - take, terminal));
                return Ok(Some(out));
            }

            match self.locate_delimiter() {
                Located::Found { pos, terminal } => {
                    self.pending_boundary = Some((pos, terminal));
                }
                Located::NeedMore => {
                    // Bytes this far back can no longer be part of a split
                    // delimiter; they are settled and may be handed out.
                    let keep = self.delimiter.len() + 2;
                    if self.window.len() > keep {
                        let settled = self.window.len() - keep;
                        let take = settled.min(max);
                        let out: Vec<u8> = self.window.drain(..take).collect();
                        return Ok(Some(out));
                    }
                    if !self.pull_chunk()? {
                        return Err(MultipartError::MalformedStream {
                            detail: "stream ended inside a part body",
                        });
                    }
                }
            }
        }
    }

    /// Read and discard the rest of the current part's body.
    pub fn drain_body(&mut self) -> Result<(), MultipartError> {
        while self.read_body(DRAIN_CHUNK)?.is_some() {}
        Ok(())
    }

    /// Discard everything left in the underlying source, up to the declared
    /// content length.
    pub fn drain_source(&mut self) -> Result<(), MultipartError> {
        self.window.clear();
        self.pending_boundary = None;
        self.stream.exhaust()
    }

    /// Consume the preamble and the first boundary, which may omit the
    /// leading CRLF.
    fn advance_past_first_boundary(&mut self) -> Result<(), MultipartError> {
        let head_len = self.delimiter.len() - 2;
        let filled = self.fill_window(head_len + 2)?;
        if filled && self.window.starts_with(&self.delimiter[2..]) {
            match &self.window[head_len..head_len + 2] {
                b"\r\n" => {
                    self.window.drain(..head_len + 2);
                    self.state = ScanState::AtHeaders;
                    return Ok(());
                }
                b"--" => {
                    self.window.drain(..head_len + 2);
                    self.state = ScanState::Epilogue;
                    return Ok(());
                }
                _ => {}
            }
        }

        // Anything before a CRLF-prefixed boundary is preamble; discard it.
        loop {
            match self.locate_delimiter() {
                Located::Found { pos, terminal } => {
                    self.window.drain(..pos + self.delimiter.len() + 2);
                    self.state = if terminal {
                        ScanState::Epilogue
                    } else {
                        ScanState::AtHeaders
                    };
                    return Ok(());
                }
                Located::NeedMore => {
                    let keep = self.delimiter.len() + 2;
                    if self.window.len() > keep {
                        let cut = self.window.len() - keep;
                        self.window.drain(..cut);
                    }
                    if !self.pull_chunk()? {
                        return Err(MultipartError::MalformedStream {
                            detail: "no multipart boundary found",
                        });
                    }
                }
            }
        }
    }

    /// Collect header lines until the blank line, capping total consumed
    /// bytes. Returns the block without its terminating blank line.
    fn read_header_block(&mut self) -> Result<Vec<u8>, MultipartError> {
        let mut block = Vec::new();
        let mut consumed = 0usize;
        loop {
            match memmem::find(&self.window, b"\r\n") {
                Some(0) => {
                    self.window.drain(..2);
                    return Ok(block);
                }
                Some(pos) => {
                    consumed += pos + 2;
                    if consumed > self.max_header_bytes {
                        return Err(MultipartError::HeaderTooLarge {
                            size: consumed,
                            max: self.max_header_bytes,
                        });
                    }
                    if !block.is_empty() {
                        block.extend_from_slice(b"\r\n");
                    }
                    block.extend_from_slice(&self.window[..pos]);
                    self.window.drain(..pos + 2);
                }
                None => {
                    if consumed + self.window.len() > self.max_header_bytes {
                        return Err(MultipartError::HeaderTooLarge {
                            size: consumed + self.window.len(),
                            max: self.max_header_bytes,
                        });
                    }
                    if !self.pull_chunk()? {
                        return Err(MultipartError::MalformedStream {
                            detail: "stream ended inside a part header block",
                        });
                    }
                }
            }
        }
    }

    /// Find the next delimiter in the window. An occurrence only counts
    /// when followed by CRLF (next part) or `--` (terminal boundary);
    /// anything else is literal body data.
    fn locate_delimiter(&self) -> Located {
        let dlen = self.delimiter.len();
        let mut from = 0;
        while let Some(off) = memmem::find(&self.window[from..], &self.delimiter) {
            let pos = from + off;
            let suffix_at = pos + dlen;
            if suffix_at + 2 > self.window.len() {
                return Located::NeedMore;
            }
            match &self.window[suffix_at..suffix_at + 2] {
                b"\r\n" => return Located::Found { pos, terminal: false },
                b"--" => return Located::Found { pos, terminal: true },
                _ => from = pos + 1,
            }
        }
        Located::NeedMore
    }

    fn fill_window(&mut self, want: usize) -> Result<bool, MultipartError> {
        while self.window.len() < want {
            let got = self.stream.read_exact_or_fewer(want - self.window.len())?;
            if got.is_empty() {
                return Ok(false);
            }
            self.window.extend_from_slice(&got);
        }
        Ok(true)
    }

    fn pull_chunk(&mut self) -> Result<bool, MultipartError> {
        match self.stream.next_chunk()? {
            Some(chunk) => {
                self.window.extend_from_slice(&chunk);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
