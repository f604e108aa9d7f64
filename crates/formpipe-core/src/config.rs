//! Parser configuration and resource ceilings.

use encoding_rs::Encoding;

/// Default size of a physical read from the byte source (64KB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default ceiling on cumulative in-memory field bytes (2.5MB).
pub const DEFAULT_MAX_FIELD_BYTES: usize = 2_621_440;

/// Default ceiling on the number of form fields.
pub const DEFAULT_MAX_FIELDS: usize = 1000;

/// Default ceiling on the number of file parts.
pub const DEFAULT_MAX_FILES: usize = 100;

/// Default ceiling on a single part's header block (16KB).
pub const DEFAULT_MAX_HEADER_BYTES: usize = 16 * 1024;

/// Upper bound on any chunk size. Kept below 2^31 for compatibility with
/// 32-bit network APIs, and divisible by 4 so base64 realignment stays cheap.
pub const MAX_CHUNK_SIZE: usize = (1 << 31) - 4;

/// Configuration for multipart parsing.
///
/// Ceilings expressed as `Option` are disabled when `None`.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Bytes per physical read from the source.
    chunk_size: usize,
    /// Ceiling on cumulative in-memory field bytes.
    max_field_bytes: Option<usize>,
    /// Ceiling on the number of form fields.
    max_fields: Option<usize>,
    /// Ceiling on the number of file parts.
    max_files: Option<usize>,
    /// Ceiling on a single part's header block.
    max_header_bytes: usize,
    /// Encoding used to decode field values, with replacement on invalid
    /// sequences.
    encoding: &'static Encoding,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_field_bytes: Some(DEFAULT_MAX_FIELD_BYTES),
            max_fields: Some(DEFAULT_MAX_FIELDS),
            max_files: Some(DEFAULT_MAX_FILES),
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            encoding: encoding_rs::UTF_8,
        }
    }
}

impl ParserConfig {
    /// Create a new configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the physical chunk size.
    #[must_use]
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Set the ceiling on cumulative in-memory field bytes.
    #[must_use]
    pub fn with_max_field_bytes(mut self, max: Option<usize>) -> Self {
        self.max_field_bytes = max;
        self
    }

    /// Set the ceiling on the number of form fields.
    #[must_use]
    pub fn with_max_fields(mut self, max: Option<usize>) -> Self {
        self.max_fields = max;
        self
    }

    /// Set the ceiling on the number of file parts.
    #[must_use]
    pub fn with_max_files(mut self, max: Option<usize>) -> Self {
        self.max_files = max;
        self
    }

    /// Set the ceiling on a single part's header block.
    #[must_use]
    pub fn with_max_header_bytes(mut self, max: usize) -> Self {
        self.max_header_bytes = max;
        self
    }

    /// Set the encoding used to decode field values.
    #[must_use]
    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Set the field-value encoding from a charset label such as `"utf-8"`
    /// or `"iso-8859-1"`. Unknown labels fall back to UTF-8.
    #[must_use]
    pub fn with_encoding_label(mut self, label: &str) -> Self {
        self.encoding = Encoding::for_label(label.as_bytes()).unwrap_or(encoding_rs::UTF_8);
        self
    }

    /// Returns the configured chunk size.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Returns the field-byte ceiling.
    #[must_use]
    pub fn max_field_bytes(&self) -> Option<usize> {
        self.max_field_bytes
    }

    /// Returns the field-count ceiling.
    #[must_use]
    pub fn max_fields(&self) -> Option<usize> {
        self.max_fields
    }

    /// Returns the file-count ceiling.
    #[must_use]
    pub fn max_files(&self) -> Option<usize> {
        self.max_files
    }

    /// Returns the header-block ceiling.
    #[must_use]
    pub fn max_header_bytes(&self) -> usize {
        self.max_header_bytes
    }

    /// Returns the field-value encoding.
    #[must_use]
    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }
}
