//! Error types for multipart decoding.

/// Errors that can occur while decoding a multipart/form-data body.
///
/// Every variant is fatal to the parse call. Before one of these propagates,
/// the driver closes any file objects it has already placed in the output
/// collection and notifies the upload handlers.
#[derive(Debug)]
pub enum MultipartError {
    /// Content-Type is not a multipart media type, is not 7-bit ASCII, or
    /// could not be tokenized.
    InvalidContentType {
        /// Description of the problem.
        detail: String,
    },
    /// Boundary parameter absent or failing the boundary grammar.
    InvalidBoundary,
    /// Declared content length is negative.
    InvalidContentLength {
        /// The declared length.
        length: i64,
    },
    /// A part's header block exceeds the configured ceiling.
    HeaderTooLarge {
        /// Bytes consumed by the header block so far.
        size: usize,
        /// The configured ceiling.
        max: usize,
    },
    /// Too many form fields.
    TooManyFields {
        /// Fields seen, including the one that tripped the ceiling.
        count: usize,
        /// The configured ceiling.
        max: usize,
    },
    /// Too many file parts.
    TooManyFiles {
        /// Files seen, including the one that tripped the ceiling.
        count: usize,
        /// The configured ceiling.
        max: usize,
    },
    /// Cumulative in-memory field bytes exceed the configured ceiling.
    PayloadTooLarge {
        /// Bytes accounted so far.
        size: usize,
        /// The configured ceiling.
        max: usize,
    },
    /// Base64 transfer-encoded file content failed to decode.
    InvalidBase64 {
        /// Decoder failure description.
        detail: String,
    },
    /// The stream ended before the terminal boundary was found.
    MalformedStream {
        /// Description of where synchronization was lost.
        detail: &'static str,
    },
    /// An upload handler aborted the parse.
    Aborted {
        /// True when the connection is already unusable, in which case the
        /// remaining input is not drained.
        connection_reset: bool,
    },
    /// I/O failure reading the source or writing spooled file data.
    Io {
        /// Underlying error description.
        detail: String,
    },
}

impl std::fmt::Display for MultipartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidContentType { detail } => {
                write!(f, "invalid multipart content type: {detail}")
            }
            Self::InvalidBoundary => write!(f, "invalid multipart boundary"),
            Self::InvalidContentLength { length } => {
                write!(f, "invalid content length: {length}")
            }
            Self::HeaderTooLarge { size, max } => {
                write!(f, "part header block too large: {size} bytes exceeds limit of {max}")
            }
            Self::TooManyFields { count, max } => {
                write!(f, "too many fields: {count} exceeds limit of {max}")
            }
            Self::TooManyFiles { count, max } => {
                write!(f, "too many files: {count} exceeds limit of {max}")
            }
            Self::PayloadTooLarge { size, max } => {
                write!(f, "field data too large: {size} bytes exceeds limit of {max}")
            }
            Self::InvalidBase64 { detail } => {
                write!(f, "could not decode base64 data: {detail}")
            }
            Self::MalformedStream { detail } => {
                write!(f, "malformed multipart stream: {detail}")
            }
            Self::Aborted { connection_reset } => {
                if *connection_reset {
                    write!(f, "upload aborted by handler (connection reset)")
                } else {
                    write!(f, "upload aborted by handler")
                }
            }
            Self::Io { detail } => write!(f, "multipart I/O error: {detail}"),
        }
    }
}

impl std::error::Error for MultipartError {}

impl From<std::io::Error> for MultipartError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            detail: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = MultipartError::TooManyFields { count: 11, max: 10 };
        assert_eq!(format!("{err}"), "too many fields: 11 exceeds limit of 10");

        let err = MultipartError::PayloadTooLarge {
            size: 2048,
            max: 1024,
        };
        assert_eq!(
            format!("{err}"),
            "field data too large: 2048 bytes exceeds limit of 1024"
        );

        let err = MultipartError::Aborted {
            connection_reset: true,
        };
        assert_eq!(
            format!("{err}"),
            "upload aborted by handler (connection reset)"
        );
    }

    #[test]
    fn io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = MultipartError::from(io);
        assert!(matches!(err, MultipartError::Io { .. }));
        assert_eq!(format!("{err}"), "multipart I/O error: pipe closed");
    }
}
