//! Part header decoding.
//!
//! A part's header block is a short run of `Name: value` lines terminated
//! by a blank line. Values may carry `; key=value` parameters with MIME
//! quoting and RFC 2231 `key*=charset''pct-encoded` extended values. Header
//! names are matched case-insensitively and kept in arrival order.

use encoding_rs::Encoding;
use memchr::memmem;

/// A decoded header value: the primary value plus its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderValue {
    value: String,
    params: Vec<(String, String)>,
}

impl HeaderValue {
    /// The primary value, before the first `;`.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Look up a parameter by name (case-insensitive).
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Iterate over all parameters in arrival order.
    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// The decoded headers of one part: a case-insensitive ordered map.
#[derive(Debug, Default)]
pub struct PartHeaders {
    entries: Vec<(String, HeaderValue)>,
}

impl PartHeaders {
    /// Decode a raw header block (CRLF-separated lines, no trailing blank
    /// line). Lines that are not `Name: value` shaped are ignored; bytes
    /// that are not valid UTF-8 are decoded with replacement.
    #[must_use]
    pub fn parse(block: &[u8]) -> Self {
        let mut entries = Vec::new();
        let mut rest = block;
        while !rest.is_empty() {
            let (line, tail) = match memmem::find(rest, b"\r\n") {
                Some(pos) => (&rest[..pos], &rest[pos + 2..]),
                None => (rest, &rest[rest.len()..]),
            };
            rest = tail;

            let line = String::from_utf8_lossy(line);
            let Some((name, raw_value)) = line.split_once(':') else {
                continue;
            };
            let (value, params) = parse_header_parameters(raw_value.trim());
            entries.push((
                name.trim().to_ascii_lowercase(),
                HeaderValue { value, params },
            ));
        }
        Self { entries }
    }

    /// Look up a header by name (case-insensitive). When a name repeats,
    /// the first occurrence wins.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// Iterate over all `(name, value)` entries in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the number of header entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the block held no usable header lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// How a part is handled, derived from its `Content-Disposition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartKind<'a> {
    /// An ordinary form field.
    Field {
        /// The field name.
        name: &'a str,
    },
    /// A file upload. The filename is as sent, not yet sanitized.
    File {
        /// The field name.
        name: &'a str,
        /// The client-supplied filename.
        filename: &'a str,
    },
    /// No usable `Content-Disposition`: the part is drained and discarded.
    Raw,
}

impl<'a> PartKind<'a> {
    /// Classify a part from its decoded headers. A part without a
    /// `Content-Disposition` header or without a non-empty `name` parameter
    /// is `Raw`; a `filename` parameter makes it a `File`.
    #[must_use]
    pub fn classify(headers: &'a PartHeaders) -> Self {
        let Some(disposition) = headers.get("content-disposition") else {
            return Self::Raw;
        };
        let name = disposition.param("name").map(str::trim).unwrap_or("");
        if name.is_empty() {
            return Self::Raw;
        }
        match disposition.param("filename") {
            Some(filename) => Self::File { name, filename },
            None => Self::Field { name },
        }
    }
}

/// Split a header value into its primary value and parameters.
///
/// Parameters are `; key=value` with optional double-quoting (backslash
/// escapes honored) and RFC 2231 `key*=charset'lang'pct-encoded` extended
/// values. Parameter names are lowercased; a repeated name overwrites the
/// earlier value in place.
#[must_use]
pub fn parse_header_parameters(raw: &str) -> (String, Vec<(String, String)>) {
    let mut segments = split_on_unquoted_semicolons(raw);
    let primary = segments.next().unwrap_or_default().trim().to_string();

    let mut params: Vec<(String, String)> = Vec::new();
    for segment in segments {
        let Some((key, value)) = segment.split_once('=') else {
            continue;
        };
        let mut key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        // RFC 2231 extended value: charset'lang'pct-encoded
        let extended = key.ends_with('*') && value.matches('\'').count() == 2;
        if key.ends_with('*') {
            key.pop();
        }
        let value = if extended {
            decode_extended_value(value)
        } else {
            unquote(value)
        };

        match params.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => params.push((key, value)),
        }
    }
    (primary, params)
}

/// Strip any directory prefix from a client-supplied filename.
///
/// Returns `None` for names that sanitize to nothing usable (empty, `.`,
/// `..`), which callers treat as "no file".
#[must_use]
pub fn sanitize_filename(filename: &str) -> Option<String> {
    let base = filename.rsplit('/').next().unwrap_or("");
    let base = base.rsplit('\\').next().unwrap_or("");
    match base {
        "" | "." | ".." => None,
        name => Some(name.to_string()),
    }
}

/// Split on `;` outside of double quotes, honoring backslash escapes.
fn split_on_unquoted_semicolons(raw: &str) -> impl Iterator<Item = &str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in raw.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                segments.push(&raw[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    segments.push(&raw[start..]);
    segments.into_iter()
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value[1..value.len() - 1]
            .replace("\\\\", "\\")
            .replace("\\\"", "\"")
    } else {
        value.to_string()
    }
}

fn decode_extended_value(value: &str) -> String {
    let mut pieces = value.splitn(3, '\'');
    let charset = pieces.next().unwrap_or("");
    let _lang = pieces.next();
    let encoded = pieces.next().unwrap_or("");

    let bytes = percent_decode(encoded);
    let encoding = Encoding::for_label(charset.as_bytes()).unwrap_or(encoding_rs::UTF_8);
    let (decoded, _, _) = encoding.decode(&bytes);
    decoded.into_owned()
}

fn percent_decode(encoded: &str) -> Vec<u8> {
    let raw = encoded.as_bytes();
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                raw.get(i + 1).copied().and_then(hex_val),
                raw.get(i + 2).copied().and_then(hex_val),
            ) {
                out.push(hi * 16 + lo);
                i += 3;
                continue;
            }
        }
        out.push(raw[i]);
        i += 1;
    }
    out
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
