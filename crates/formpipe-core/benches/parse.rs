//! End-to-end parse throughput.

use criterion::{Criterion, Throughput, criterion_group, criterion_main};

use formpipe_core::{MultipartParser, ParserConfig, default_handler_chain};

fn build_body(file_size: usize) -> Vec<u8> {
    let mut body = Vec::new();
    for i in 0..8 {
        body.extend_from_slice(
            format!("--bench\r\nContent-Disposition: form-data; name=\"field{i}\"\r\n\r\nvalue number {i}\r\n")
                .as_bytes(),
        );
    }
    body.extend_from_slice(b"--bench\r\n");
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"payload\"; filename=\"payload.bin\"\r\n",
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(&vec![0xAB; file_size]);
    body.extend_from_slice(b"\r\n--bench--\r\n");
    body
}

fn bench_parse(c: &mut Criterion) {
    let body = build_body(256 * 1024);
    let mut group = c.benchmark_group("multipart_parse");
    group.throughput(Throughput::Bytes(body.len() as u64));
    group.bench_function("fields_and_file_256k", |b| {
        b.iter(|| {
            let parser = MultipartParser::new(
                "multipart/form-data; boundary=bench",
                body.len() as i64,
                ParserConfig::default(),
            )
            .unwrap();
            let mut handlers = default_handler_chain();
            parser.parse(&body[..], &mut handlers).unwrap()
        });
    });
    group.finish();
}

criterion_group!(benches, bench_parse);
criterion_main!(benches);
