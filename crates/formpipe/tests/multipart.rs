//! End-to-end parsing tests over the public API.

use std::io::Read;

use proptest::prelude::*;

use formpipe::prelude::*;
use formpipe::{MemoryFileHandler, TempFileHandler};

/// Feeds at most `step` bytes per read call, forcing physical chunk splits
/// at arbitrary offsets.
struct DribbleReader<'a> {
    data: &'a [u8],
    pos: usize,
    step: usize,
}

impl<'a> DribbleReader<'a> {
    fn new(data: &'a [u8], step: usize) -> Self {
        Self { data, pos: 0, step }
    }
}

impl Read for DribbleReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self
            .step
            .min(buf.len())
            .min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

fn mixed_body() -> Vec<u8> {
    concat!(
        "--XYZ\r\n",
        "Content-Disposition: form-data; name=\"foo\"\r\n",
        "\r\n",
        "bar\r\n",
        "--XYZ\r\n",
        "Content-Disposition: form-data; name=\"tags\"\r\n",
        "\r\n",
        "first\r\n",
        "--XYZ\r\n",
        "Content-Disposition: form-data; name=\"tags\"\r\n",
        "\r\n",
        "second\r\n",
        "--XYZ\r\n",
        "Content-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\n",
        "Content-Type: text/plain\r\n",
        "\r\n",
        "hello\r\n",
        "--XYZ--\r\n"
    )
    .as_bytes()
    .to_vec()
}

const MIXED_CONTENT_TYPE: &str = "multipart/form-data; boundary=XYZ";

#[test]
fn parses_the_worked_example() {
    let body = mixed_body();
    let (fields, files) =
        formpipe::parse_form(MIXED_CONTENT_TYPE, body.len() as i64, &body[..]).unwrap();

    assert_eq!(fields.get("foo").map(String::as_str), Some("bar"));
    let tags: Vec<_> = fields.get_all("tags").map(String::as_str).collect();
    assert_eq!(tags, vec!["first", "second"]);

    let file = files.get("upload").unwrap();
    assert_eq!(file.filename(), "a.txt");
    assert_eq!(file.size(), 5);
    assert_eq!(file.bytes().unwrap(), b"hello");
}

#[test]
fn utf8_field_values_decode_with_replacement() {
    let mut body = Vec::new();
    body.extend_from_slice(b"--XYZ\r\nContent-Disposition: form-data; name=\"text\"\r\n\r\n");
    body.extend_from_slice("gr\u{fc}n ".as_bytes());
    // An invalid UTF-8 byte decodes to the replacement character.
    body.extend_from_slice(&[0xFF]);
    body.extend_from_slice(b"\r\n--XYZ--\r\n");

    let (fields, _) =
        formpipe::parse_form(MIXED_CONTENT_TYPE, body.len() as i64, &body[..]).unwrap();
    assert_eq!(
        fields.get("text").map(String::as_str),
        Some("gr\u{fc}n \u{fffd}")
    );
}

#[test]
fn large_upload_spools_through_the_temp_file_handler() {
    let payload = vec![b'x'; 64 * 1024];
    let mut body = Vec::new();
    body.extend_from_slice(b"--XYZ\r\n");
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"blob\"; filename=\"blob.bin\"\r\n\r\n",
    );
    body.extend_from_slice(&payload);
    body.extend_from_slice(b"\r\n--XYZ--\r\n");

    let parser =
        MultipartParser::new(MIXED_CONTENT_TYPE, body.len() as i64, ParserConfig::default())
            .unwrap();
    // A tiny memory threshold pushes the upload to the temp-file handler.
    let mut handlers: Vec<Box<dyn UploadHandler>> = vec![
        Box::new(MemoryFileHandler::with_threshold(1024)),
        Box::new(TempFileHandler::new()),
    ];
    let (_, files) = parser.parse(&body[..], &mut handlers).unwrap();

    let file = files.get("blob").unwrap();
    assert!(file.is_spooled());
    assert_eq!(file.size(), payload.len() as u64);
    let path = file.spooled_path().unwrap().to_path_buf();
    assert!(path.exists());
    assert_eq!(file.bytes().unwrap(), payload);
    drop(files);
    assert!(!path.exists(), "temp file should be cleaned up on drop");
}

#[test]
fn reparsing_is_idempotent() {
    let body = mixed_body();
    let parse = || {
        let (fields, files) =
            formpipe::parse_form(MIXED_CONTENT_TYPE, body.len() as i64, &body[..]).unwrap();
        let fields: Vec<_> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let files: Vec<_> = files
            .iter()
            .map(|(k, f)| (k.to_string(), f.filename().to_string(), f.size()))
            .collect();
        (fields, files)
    };
    assert_eq!(parse(), parse());
}

proptest! {
    /// The same logical body yields identical output at every physical
    /// chunk split.
    #[test]
    fn output_is_invariant_to_physical_chunking(step in 1usize..=160) {
        let body = mixed_body();
        let reader = DribbleReader::new(&body, step);
        let (fields, files) =
            formpipe::parse_form(MIXED_CONTENT_TYPE, body.len() as i64, reader).unwrap();

        prop_assert_eq!(fields.get("foo").map(String::as_str), Some("bar"));
        let tags: Vec<_> = fields.get_all("tags").map(String::as_str).collect();
        prop_assert_eq!(tags, vec!["first", "second"]);
        let file = files.get("upload").unwrap();
        prop_assert_eq!(file.size(), 5);
        prop_assert_eq!(file.bytes().unwrap(), b"hello".to_vec());
    }

    /// Base64 file content decodes identically at every chunk split point.
    #[test]
    fn base64_decoding_is_invariant_to_chunking(step in 1usize..=97) {
        use base64::Engine as _;

        let payload: Vec<u8> = (0u8..=255).collect();
        let encoded = base64::engine::general_purpose::STANDARD.encode(&payload);
        let wrapped: Vec<u8> = encoded
            .as_bytes()
            .chunks(57)
            .flat_map(|line| line.iter().copied().chain(*b"\r\n"))
            .collect();

        let mut body = Vec::new();
        body.extend_from_slice(b"--XYZ\r\n");
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"up\"; filename=\"blob.bin\"\r\n",
        );
        body.extend_from_slice(b"Content-Transfer-Encoding: base64\r\n\r\n");
        body.extend_from_slice(&wrapped);
        body.extend_from_slice(b"--XYZ--\r\n");

        let reader = DribbleReader::new(&body, step);
        let (_, files) =
            formpipe::parse_form(MIXED_CONTENT_TYPE, body.len() as i64, reader).unwrap();
        prop_assert_eq!(files.get("up").unwrap().bytes().unwrap(), payload);
    }
}
