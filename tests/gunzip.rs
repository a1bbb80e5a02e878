#![allow(non_snake_case)]
use httap::decompressors::ContentEncoding;
use httap::log::LogCode;
use httap::transaction::TxProgress;
use std::io::Write;

mod common;
use common::{test_config, Chunk, Test};

const PLAIN: &[u8] = b"The five boxing wizards jump quickly.";

fn gzip_compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn deflate_compress(data: &[u8]) -> Vec<u8> {
    let mut encoder =
        flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn zlib_compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn response_with_body(encoding: &str, body: &[u8]) -> Vec<u8> {
    let mut response = Vec::new();
    response.extend_from_slice(b"HTTP/1.1 200 OK\r\n");
    response.extend_from_slice(format!("Content-Encoding: {}\r\n", encoding).as_bytes());
    response.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
    response.extend_from_slice(body);
    response
}

fn run_exchange(response: &[u8]) -> Test {
    let mut t = Test::default();
    t.run(vec![
        Chunk::client(b"GET /compressed HTTP/1.1\r\nHost: x\r\n\r\n"),
        Chunk::server(response),
    ]);
    t
}

#[test]
fn GzipResponse() {
    let compressed = gzip_compress(PLAIN);
    let t = run_exchange(&response_with_body("gzip", &compressed));

    let tx = t.tx(0);
    assert_eq!(tx.response_content_encoding, ContentEncoding::Gzip);
    assert_eq!(
        tx.response_content_encoding_processing,
        ContentEncoding::Gzip
    );
    assert_eq!(t.response_body(0), PLAIN);
    assert_eq!(tx.response_entity_len, PLAIN.len() as i64);
    assert_eq!(tx.response_message_len, compressed.len() as i64);
    assert_eq!(tx.progress, TxProgress::Done);
}

#[test]
fn XGzipResponse() {
    let compressed = gzip_compress(PLAIN);
    let t = run_exchange(&response_with_body("x-gzip", &compressed));
    assert_eq!(t.tx(0).response_content_encoding, ContentEncoding::Gzip);
    assert_eq!(t.response_body(0), PLAIN);
}

#[test]
fn DeflateResponse() {
    let compressed = deflate_compress(PLAIN);
    let t = run_exchange(&response_with_body("deflate", &compressed));
    assert_eq!(t.tx(0).response_content_encoding, ContentEncoding::Deflate);
    assert_eq!(t.response_body(0), PLAIN);
}

#[test]
fn ZlibDeclaredAsDeflate() {
    // Many servers send RFC1950 zlib data under "deflate"; the restart
    // logic has to recover it.
    let compressed = zlib_compress(PLAIN);
    let t = run_exchange(&response_with_body("deflate", &compressed));
    assert_eq!(t.response_body(0), PLAIN);
}

#[test]
fn GzipResponseSplitAcrossChunks() {
    let compressed = gzip_compress(PLAIN);
    let response = response_with_body("gzip", &compressed);

    let mut t = Test::default();
    t.request(b"GET /compressed HTTP/1.1\r\nHost: x\r\n\r\n");
    for chunk in response.chunks(5) {
        t.response(chunk);
    }
    assert_eq!(t.response_body(0), PLAIN);
    assert_eq!(t.tx(0).progress, TxProgress::Done);
}

#[test]
fn ChunkedGzipResponse() {
    let compressed = gzip_compress(PLAIN);
    let mut response = Vec::new();
    response.extend_from_slice(
        b"HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nTransfer-Encoding: chunked\r\n\r\n",
    );
    for piece in compressed.chunks(10) {
        response.extend_from_slice(format!("{:x}\r\n", piece.len()).as_bytes());
        response.extend_from_slice(piece);
        response.extend_from_slice(b"\r\n");
    }
    response.extend_from_slice(b"0\r\n\r\n");

    let t = run_exchange(&response);
    assert_eq!(t.response_body(0), PLAIN);
    assert_eq!(t.tx(0).response_entity_len, PLAIN.len() as i64);
}

#[test]
fn UnknownEncodingPassesThrough() {
    let t = run_exchange(&response_with_body("br", PLAIN));
    let tx = t.tx(0);
    assert_eq!(tx.response_content_encoding, ContentEncoding::None);
    assert_eq!(
        tx.response_content_encoding_processing,
        ContentEncoding::None
    );
    assert_eq!(t.response_body(0), PLAIN);
    assert!(t
        .connp
        .conn
        .get_logs()
        .iter()
        .any(|m| m.code == LogCode::ContentEncodingUnknown));
}

#[test]
fn DecompressionDisabled() {
    let compressed = gzip_compress(PLAIN);
    let mut cfg = test_config();
    cfg.set_response_decompression(false);
    let mut t = Test::new(cfg);
    t.run(vec![
        Chunk::client(b"GET /compressed HTTP/1.1\r\nHost: x\r\n\r\n"),
        Chunk::server(&response_with_body("gzip", &compressed)),
    ]);
    let tx = t.tx(0);
    // The declared encoding is recorded, but the body flows through raw.
    assert_eq!(tx.response_content_encoding, ContentEncoding::Gzip);
    assert_eq!(
        tx.response_content_encoding_processing,
        ContentEncoding::None
    );
    assert_eq!(t.response_body(0), compressed.as_slice());
}

#[test]
fn GzipWithFilenameHeader() {
    // A gzip stream with FNAME set; the tolerant header parser must skip it.
    let mut compressed = Vec::new();
    compressed.extend_from_slice(b"\x1f\x8b\x08\x08\x00\x00\x00\x00\x00\x00name\x00");
    let mut encoder =
        flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(PLAIN).unwrap();
    compressed.extend_from_slice(&encoder.finish().unwrap());
    // Trailer: CRC32 and ISIZE are not validated.
    compressed.extend_from_slice(&[0u8; 8]);

    let t = run_exchange(&response_with_body("gzip", &compressed));
    assert_eq!(t.response_body(0), PLAIN);
}
