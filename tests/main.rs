#![allow(non_snake_case)]
use httap::config::ServerPersonality;
use httap::connection_parser::StreamState;
use httap::log::LogCode;
use httap::request::Method;
use httap::transaction::{AuthType, Protocol, TransferCoding, TxProgress};
use httap::util::{ConnectionFlags, FlagOperations, TxFlags};

mod common;
use common::{test_config, Chunk, Test};

#[test]
fn SimpleGet() {
    let mut t = Test::default();
    t.request(b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n");

    assert_eq!(t.connp.conn.tx_size(), 1);
    let tx = t.tx(0);
    assert_eq!(tx.request_method.as_ref().unwrap(), &"GET");
    assert_eq!(tx.request_method_number, Method::Get);
    assert_eq!(tx.request_method_number.number(), 0);
    assert_eq!(tx.request_uri.as_ref().unwrap(), &"/a");
    assert_eq!(tx.request_protocol_number, Protocol::V1_1);
    assert_eq!(tx.request_protocol_number.number(), 101);
    assert_request_header_eq!(tx, "host", "x");
    assert_eq!(tx.request_entity_len, 0);
    assert_eq!(tx.progress, TxProgress::Wait);
}

#[test]
fn SimpleGetWithResponse() {
    let mut t = Test::default();
    t.run(vec![
        Chunk::client(b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n"),
        Chunk::server(b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nabc"),
    ]);

    let tx = t.tx(0);
    assert_eq!(tx.response_status_number, 200);
    assert_eq!(tx.response_protocol_number, Protocol::V1_1);
    assert_eq!(tx.response_message.as_ref().unwrap(), &"OK");
    assert_eq!(tx.response_content_length, 3);
    assert_eq!(tx.progress, TxProgress::Done);
    assert_eq!(t.response_body(0), b"abc");
}

#[test]
fn ChunkedRequest() {
    let mut t = Test::default();
    t.request(
        b"POST /p HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nHELLO\r\n0\r\n\r\n",
    );

    let tx = t.tx(0);
    assert_eq!(tx.request_transfer_coding, TransferCoding::Chunked);
    assert!(!tx.flags.is_set(TxFlags::INVALID_CHUNKING));
    assert_eq!(tx.request_entity_len, 5);
    assert_eq!(t.request_body(0), b"HELLO");
    assert_eq!(tx.progress, TxProgress::Wait);
}

#[test]
fn ChunkedRequestSplitAcrossChunks() {
    // The same message in any partition of chunk sizes produces identical
    // transaction state.
    let message: &[u8] =
        b"POST /p HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nHELLO\r\n0\r\n\r\n";
    for size in [1usize, 2, 3, 7, 11] {
        let mut t = Test::default();
        for chunk in message.chunks(size) {
            t.request(chunk);
        }
        let tx = t.tx(0);
        assert_eq!(tx.request_line.as_ref().unwrap(), &"POST /p HTTP/1.1");
        assert_request_header_eq!(tx, "host", "x");
        assert_eq!(tx.request_transfer_coding, TransferCoding::Chunked);
        assert_eq!(t.request_body(0), b"HELLO", "chunk size {}", size);
        assert_eq!(tx.progress, TxProgress::Wait);
        // Splitting the head across packets is recorded, never fatal.
        if size < message.len() {
            assert!(tx.flags.is_set(TxFlags::MULTI_PACKET_HEAD));
        }
    }
}

#[test]
fn ChunkedImmediateEnd() {
    let mut t = Test::default();
    t.request(b"POST /p HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n0\r\n\r\n");

    let tx = t.tx(0);
    assert_eq!(tx.request_transfer_coding, TransferCoding::Chunked);
    assert_eq!(tx.request_entity_len, 0);
    assert_eq!(t.request_body(0), b"");
    assert_eq!(tx.progress, TxProgress::Wait);
}

#[test]
fn ChunkedTrailer() {
    let mut t = Test::default();
    t.request(
        b"POST /p HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nHELLO\r\n0\r\nX-Trailer: v\r\n\r\n",
    );

    let tx = t.tx(0);
    assert_eq!(t.request_body(0), b"HELLO");
    assert_request_header_eq!(tx, "x-trailer", "v");
    assert_eq!(tx.progress, TxProgress::Wait);
}

#[test]
fn InvalidChunkLengthIsFatal() {
    let mut t = Test::default();
    let rc = t.connp.request_data(
        b"POST /p HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nnothex\r\n\r\n",
        None,
    );
    assert_eq!(rc, StreamState::Error);
    assert!(t.tx(0).flags.is_set(TxFlags::INVALID_CHUNKING));
    // The direction stays latched.
    assert_eq!(
        t.connp.request_data(b"GET / HTTP/1.1\r\n\r\n", None),
        StreamState::Error
    );
    assert!(t.connp.conn.last_error().is_some());
}

#[test]
fn RequestSmuggling() {
    let mut t = Test::default();
    t.request(
        b"POST /p HTTP/1.1\r\nContent-Length: 0\r\nTransfer-Encoding: chunked\r\n\r\n0\r\n\r\n",
    );

    let tx = t.tx(0);
    assert!(tx.flags.is_set(TxFlags::REQUEST_SMUGGLING));
    // Transfer-Encoding wins over Content-Length.
    assert_eq!(tx.request_transfer_coding, TransferCoding::Chunked);
}

#[test]
fn InterimContinueThenOk() {
    let mut t = Test::default();
    t.run(vec![
        Chunk::client(b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n"),
        Chunk::server(
            b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nabc",
        ),
    ]);

    let tx = t.tx(0);
    assert_eq!(tx.seen_100continue, 1);
    assert_eq!(tx.response_status_number, 200);
    assert_eq!(t.response_body(0), b"abc");
    assert_eq!(tx.progress, TxProgress::Done);
}

#[test]
fn DoubleContinueIsFatal() {
    let mut t = Test::default();
    t.request(b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n");
    let rc = t.connp.response_data(
        b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 100 Continue\r\n\r\n",
        None,
    );
    assert_eq!(rc, StreamState::Error);
}

#[test]
fn Http09() {
    let mut t = Test::default();
    t.request(b"GET /x\r\n");
    let tx = t.tx(0);
    assert!(tx.protocol_is_simple);
    assert_eq!(tx.request_protocol_number, Protocol::V0_9);
    assert_eq!(tx.request_protocol_number.number(), 9);
    assert_eq!(tx.request_uri.as_ref().unwrap(), &"/x");
    assert_eq!(tx.progress, TxProgress::Wait);

    // The response is body-only, from the very first byte.
    t.response(b"<html>hello");
    t.response(b" world</html>");
    t.close();

    let tx = t.tx(0);
    assert_eq!(tx.response_headers.size(), 0);
    assert_eq!(t.response_body(0), b"<html>hello world</html>");
    assert_eq!(tx.progress, TxProgress::Done);
}

#[test]
fn Http09ExtraRequestData() {
    let mut t = Test::default();
    t.request(b"GET /x\r\nmore-bytes-after");
    assert!(t
        .connp
        .conn
        .flags
        .is_set(ConnectionFlags::HTTP_0_9_EXTRA));
}

#[test]
fn FoldedHeader() {
    let mut t = Test::default();
    t.request(b"GET / HTTP/1.1\r\nX: a\r\n b\r\n\r\n");

    let tx = t.tx(0);
    assert_request_header_eq!(tx, "x", "a b");
    assert!(tx.flags.is_set(TxFlags::FIELD_FOLDED));
    let header = &tx.request_headers.get_nocase("x").unwrap().1;
    assert!(header.flags.is_set(TxFlags::FIELD_FOLDED));
    // The raw continuation line keeps its folded marker.
    assert!(tx
        .request_header_lines
        .iter()
        .any(|line| line.flags.is_set(TxFlags::FIELD_FOLDED)));
}

#[test]
fn InvalidFolding() {
    let mut t = Test::default();
    t.request(b"GET / HTTP/1.1\r\n  lead: x\r\nHost: y\r\n\r\n");
    let tx = t.tx(0);
    assert!(tx.flags.is_set(TxFlags::INVALID_FOLDING));
}

#[test]
fn ColonOnlyHeader() {
    let mut t = Test::default();
    t.request(b"GET / HTTP/1.1\r\n:value\r\n\r\n");

    let tx = t.tx(0);
    assert!(tx.flags.is_set(TxFlags::FIELD_INVALID));
    let header = &tx.request_headers.get_nocase("").unwrap().1;
    assert_eq!(header.value, "value");
}

#[test]
fn MissingColonHeader() {
    let mut t = Test::default();
    t.request(b"GET / HTTP/1.1\r\nno colon here\r\n\r\n");

    let tx = t.tx(0);
    assert!(tx.flags.is_set(TxFlags::FIELD_UNPARSEABLE));
    // The whole line is stored as a value under an empty name.
    let header = &tx.request_headers.get_nocase("").unwrap().1;
    assert_eq!(header.value, "no colon here");
}

#[test]
fn RepeatedHeadersAreJoined() {
    let mut t = Test::default();
    t.request(b"GET / HTTP/1.1\r\nX-Pick: one\r\nX-Pick: two\r\n\r\n");

    let tx = t.tx(0);
    assert_request_header_eq!(tx, "x-pick", "one, two");
    let header = &tx.request_headers.get_nocase("x-pick").unwrap().1;
    assert!(header.flags.is_set(TxFlags::FIELD_REPEATED));
    assert!(tx.flags.is_set(TxFlags::FIELD_REPEATED));
}

#[test]
fn HeaderWithNulByte() {
    let mut t = Test::default();
    t.request(b"GET / HTTP/1.1\r\nX-Odd: a\x00b\r\n\r\n");

    let tx = t.tx(0);
    assert!(tx.flags.is_set(TxFlags::FIELD_RAW_NUL));
    let line = tx
        .request_header_lines
        .iter()
        .find(|line| line.has_nulls > 0)
        .expect("expected a line with a NUL");
    assert_eq!(line.has_nulls, 1);
    assert!(line.first_nul_offset >= 0);
    assert!((line.first_nul_offset as usize) < line.line.len());
}

#[test]
fn SoftFieldLimit() {
    let mut cfg = test_config();
    cfg.set_field_limits(32, 4096).unwrap();
    let mut t = Test::new(cfg);
    let mut request = Vec::new();
    request.extend_from_slice(b"GET / HTTP/1.1\r\nX-Long: ");
    request.extend_from_slice(&vec![b'a'; 64]);
    request.extend_from_slice(b"\r\n\r\n");
    t.request(&request);

    let tx = t.tx(0);
    assert!(tx.flags.is_set(TxFlags::FIELD_LONG));
    // Parsing continued past the long field.
    assert_eq!(tx.progress, TxProgress::Wait);
    // The soft limit logs once per transaction.
    let soft_logs = t
        .connp
        .conn
        .get_logs()
        .iter()
        .filter(|m| m.code == LogCode::RequestFieldSoftLimit)
        .count();
    assert_eq!(soft_logs, 1);
}

#[test]
fn HardFieldLimit() {
    let mut cfg = test_config();
    cfg.set_field_limits(32, 64).unwrap();
    let mut t = Test::new(cfg);
    let mut request = Vec::new();
    request.extend_from_slice(b"GET / HTTP/1.1\r\nX-Long: ");
    request.extend_from_slice(&vec![b'a'; 128]);
    request.extend_from_slice(b"\r\n\r\n");
    let rc = t.connp.request_data(&request, None);
    assert_eq!(rc, StreamState::Error);
    assert_eq!(
        t.connp.conn.last_error().unwrap().code,
        LogCode::RequestFieldTooLong
    );
}

#[test]
fn Pipelining() {
    let mut t = Test::default();
    t.run(vec![
        Chunk::client(
            b"GET /first HTTP/1.1\r\nHost: x\r\n\r\nGET /second HTTP/1.1\r\nHost: x\r\n\r\n",
        ),
        Chunk::server(
            b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\naHTTP/1.1 404 Not Found\r\nContent-Length: 2\r\n\r\nbc",
        ),
    ]);

    assert_eq!(t.connp.conn.tx_size(), 2);
    assert!(t.connp.conn.flags.is_set(ConnectionFlags::PIPELINED));
    assert_eq!(t.tx(0).request_uri.as_ref().unwrap(), &"/first");
    assert_eq!(t.tx(0).response_status_number, 200);
    assert_eq!(t.response_body(0), b"a");
    assert_eq!(t.tx(1).request_uri.as_ref().unwrap(), &"/second");
    assert_eq!(t.tx(1).response_status_number, 404);
    assert_eq!(t.response_body(1), b"bc");
    assert_eq!(t.tx(1).progress, TxProgress::Done);
}

#[test]
fn ResponseWithoutRequestIsFatal() {
    let mut t = Test::default();
    let rc = t
        .connp
        .response_data(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n", None);
    assert_eq!(rc, StreamState::Error);
    assert_eq!(
        t.connp.conn.last_error().unwrap().code,
        LogCode::UnableToMatchResponseToRequest
    );
}

#[test]
fn CloseDelimitedResponse() {
    let mut t = Test::default();
    t.run(vec![
        Chunk::client(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n"),
        Chunk::server(b"HTTP/1.1 200 OK\r\n\r\npart one "),
        Chunk::server(b"part two"),
    ]);
    // Not finished until the stream closes.
    assert_eq!(t.tx(0).progress, TxProgress::ResponseBody);
    t.close();
    let tx = t.tx(0);
    assert_eq!(tx.response_transfer_coding, TransferCoding::Identity);
    assert_eq!(t.response_body(0), b"part one part two");
    assert_eq!(tx.progress, TxProgress::Done);
}

#[test]
fn ChunkedResponse() {
    let mut t = Test::default();
    t.run(vec![
        Chunk::client(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n"),
        Chunk::server(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n",
        ),
    ]);
    let tx = t.tx(0);
    assert_eq!(tx.response_transfer_coding, TransferCoding::Chunked);
    assert_eq!(t.response_body(0), b"Wikipedia");
    assert_eq!(tx.response_entity_len, 9);
    assert_eq!(tx.progress, TxProgress::Done);
}

#[test]
fn HeadResponseHasNoBody() {
    let mut t = Test::default();
    t.run(vec![
        Chunk::client(b"HEAD / HTTP/1.1\r\nHost: x\r\n\r\n"),
        Chunk::server(b"HTTP/1.1 200 OK\r\nContent-Length: 12\r\n\r\n"),
    ]);
    let tx = t.tx(0);
    assert_eq!(tx.response_transfer_coding, TransferCoding::NoBody);
    assert_eq!(t.response_body(0), b"");
    assert_eq!(tx.progress, TxProgress::Done);
}

#[test]
fn NoContentResponseHasNoBody() {
    for status in ["204 No Content", "304 Not Modified"] {
        let mut t = Test::default();
        let response = format!("HTTP/1.1 {}\r\n\r\n", status);
        t.run(vec![
            Chunk::client(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n"),
            Chunk::server(response.as_bytes()),
        ]);
        let tx = t.tx(0);
        assert_eq!(tx.response_transfer_coding, TransferCoding::NoBody);
        assert_eq!(t.response_body(0), b"");
        assert_eq!(tx.progress, TxProgress::Done);
    }
}

#[test]
fn InvalidStatusLine() {
    let mut t = Test::default();
    t.run(vec![
        Chunk::client(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n"),
        Chunk::server(b"HTTP/1.1 QQQ Strange\r\nContent-Length: 0\r\n\r\n"),
    ]);
    let tx = t.tx(0);
    assert!(tx.flags.is_set(TxFlags::STATUS_LINE_INVALID));
    assert_eq!(tx.response_status_number, -1);
    assert_eq!(tx.progress, TxProgress::Done);
}

#[test]
fn Cookies() {
    let mut t = Test::default();
    t.request(b"GET / HTTP/1.1\r\nHost: x\r\nCookie: a=1; b=2; bare; =skipme; c=\r\n\r\n");
    let tx = t.tx(0);
    assert_eq!(tx.request_cookies.size(), 3);
    assert_eq!(tx.request_cookies.get_nocase("a").unwrap().1, "1");
    assert_eq!(tx.request_cookies.get_nocase("b").unwrap().1, "2");
    assert_eq!(tx.request_cookies.get_nocase("c").unwrap().1, "");
}

#[test]
fn AuthBasic() {
    let mut t = Test::default();
    // "user:pass" in base64.
    t.request(b"GET / HTTP/1.1\r\nHost: x\r\nAuthorization: Basic dXNlcjpwYXNz\r\n\r\n");
    let tx = t.tx(0);
    assert_eq!(tx.request_auth_type, AuthType::Basic);
    assert_eq!(tx.request_auth_username.as_ref().unwrap(), &"user");
    assert_eq!(tx.request_auth_password.as_ref().unwrap(), &"pass");
}

#[test]
fn AuthDigest() {
    let mut t = Test::default();
    t.request(
        b"GET / HTTP/1.1\r\nHost: x\r\nAuthorization: Digest username=\"ivanr\", realm=\"r\"\r\n\r\n",
    );
    let tx = t.tx(0);
    assert_eq!(tx.request_auth_type, AuthType::Digest);
    assert_eq!(tx.request_auth_username.as_ref().unwrap(), &"ivanr");
}

#[test]
fn QueryStringParameters() {
    let mut t = Test::default();
    t.request(b"GET /search?q=hello+world&lang= HTTP/1.1\r\nHost: x\r\n\r\n");
    let tx = t.tx(0);
    assert_eq!(tx.request_params.get_nocase("q").unwrap().1.value, "hello world");
    assert_eq!(tx.request_params.get_nocase("lang").unwrap().1.value, "");
    assert_eq!(tx.parsed_uri.as_ref().unwrap().query.as_ref().unwrap(), &"q=hello+world&lang=");
}

#[test]
fn UrlencodedBody() {
    let mut t = Test::default();
    t.request(
        b"POST /form HTTP/1.1\r\nHost: x\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 7\r\n\r\na=1&b=2",
    );
    let tx = t.tx(0);
    assert_eq!(tx.request_params.get_nocase("a").unwrap().1.value, "1");
    assert_eq!(tx.request_params.get_nocase("b").unwrap().1.value, "2");
    assert_eq!(t.request_body(0), b"a=1&b=2");
}

#[test]
fn MultipartBody() {
    let body: &[u8] = b"--xyz\r\n\
Content-Disposition: form-data; name=\"field1\"\r\n\
\r\n\
value-1\r\n\
--xyz\r\n\
Content-Disposition: form-data; name=\"field2\"\r\n\
\r\n\
value-2\r\n\
--xyz--\r\n";
    let mut request = Vec::new();
    request.extend_from_slice(b"POST /upload HTTP/1.1\r\nHost: x\r\n");
    request.extend_from_slice(b"Content-Type: multipart/form-data; boundary=xyz\r\n");
    request.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
    request.extend_from_slice(body);

    let mut t = Test::default();
    t.request(&request);
    let tx = t.tx(0);
    assert_eq!(tx.request_params.get_nocase("field1").unwrap().1.value, "value-1");
    assert_eq!(tx.request_params.get_nocase("field2").unwrap().1.value, "value-2");
}

#[test]
fn HostAndUriDisagree() {
    let mut t = Test::default();
    t.request(b"GET http://site-a.example/ HTTP/1.1\r\nHost: site-b.example\r\n\r\n");
    let tx = t.tx(0);
    assert!(tx.flags.is_set(TxFlags::HOST_AMBIGUOUS));
}

#[test]
fn MissingHost() {
    let mut t = Test::default();
    t.request(b"GET / HTTP/1.1\r\n\r\n");
    let tx = t.tx(0);
    assert!(tx.flags.is_set(TxFlags::HOST_MISSING));
}

#[test]
fn HostFillsUri() {
    let mut t = Test::default();
    t.request(b"GET /p HTTP/1.1\r\nHost: www.example.com:8080\r\n\r\n");
    let uri = t.tx(0).parsed_uri.as_ref().unwrap();
    assert_eq!(uri.hostname.as_ref().unwrap(), &"www.example.com");
    assert_eq!(uri.port_number, Some(8080));
    assert_eq!(uri.scheme.as_ref().unwrap(), &"http");
    assert_eq!(uri.path.as_ref().unwrap(), &"/p");
}

#[test]
fn IgnorableLinesBeforeRequest() {
    let mut t = Test::default();
    t.request(b"\r\n\r\nGET / HTTP/1.1\r\nHost: x\r\n\r\n");
    let tx = t.tx(0);
    assert_eq!(tx.request_ignored_lines, 2);
    assert_eq!(tx.request_method_number, Method::Get);
}

#[test]
fn LeadingRequestLineWhitespace() {
    let mut t = Test::default();
    t.request(b"   GET / HTTP/1.1\r\nHost: x\r\n\r\n");
    let tx = t.tx(0);
    assert_eq!(tx.request_method_number, Method::Get);
    assert!(t
        .connp
        .conn
        .get_logs()
        .iter()
        .any(|m| m.code == LogCode::RequestLineLeadingWhitespace));
}

#[test]
fn LoneLfLineTermination() {
    let mut t = Test::default();
    t.request(b"GET /a HTTP/1.1\nHost: x\n\n");
    let tx = t.tx(0);
    assert_eq!(tx.request_uri.as_ref().unwrap(), &"/a");
    assert_request_header_eq!(tx, "host", "x");
    assert_eq!(tx.progress, TxProgress::Wait);
}

#[test]
fn KeepAliveSequentialTransactions() {
    let mut t = Test::default();
    t.run(vec![
        Chunk::client(b"GET /one HTTP/1.1\r\nHost: x\r\n\r\n"),
        Chunk::server(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"),
        Chunk::client(b"GET /two HTTP/1.1\r\nHost: x\r\n\r\n"),
        Chunk::server(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"),
    ]);
    assert_eq!(t.connp.conn.tx_size(), 2);
    assert_eq!(t.tx(0).progress, TxProgress::Done);
    assert_eq!(t.tx(1).progress, TxProgress::Done);
    assert!(!t.connp.conn.flags.is_set(ConnectionFlags::PIPELINED));
}

#[test]
fn IisWhitespaceTerminatorLeniency() {
    let mut cfg = test_config();
    cfg.set_server_personality(ServerPersonality::Iis5_0).unwrap();
    let mut t = Test::new(cfg);
    // A whitespace-only line terminates the headers for IIS 5.0.
    t.request(b"GET / HTTP/1.1\r\nHost: x\r\n \r\n");
    assert_eq!(t.tx(0).progress, TxProgress::Wait);
}

#[test]
fn ZeroLengthChunksRejectedWhileOpen() {
    let mut t = Test::default();
    assert_eq!(t.connp.request_data(b"", None), StreamState::Closed);
}

#[test]
fn PostWithExpectContinue() {
    let mut t = Test::default();
    t.run(vec![
        Chunk::client(
            b"POST /p HTTP/1.1\r\nHost: x\r\nExpect: 100-continue\r\nContent-Length: 5\r\n\r\n",
        ),
        Chunk::server(b"HTTP/1.1 100 Continue\r\n\r\n"),
        Chunk::client(b"HELLO"),
        Chunk::server(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"),
    ]);
    let tx = t.tx(0);
    assert_eq!(tx.seen_100continue, 1);
    assert_eq!(t.request_body(0), b"HELLO");
    assert_eq!(tx.response_status_number, 200);
    assert_eq!(tx.progress, TxProgress::Done);
}

#[test]
fn ConnectTunnel() {
    let mut t = Test::default();
    t.request(b"CONNECT www.example.com:443 HTTP/1.1\r\nHost: www.example.com\r\n\r\n");
    t.response(b"HTTP/1.1 200 Connection Established\r\n\r\n");
    // Post-establishment bytes are not HTTP; both directions tunnel.
    let rc = t.connp.request_data(b"\x16\x03\x01\x02\x00tls-looking-bytes", None);
    assert_eq!(rc, StreamState::Tunnel);
    let tx = t.tx(0);
    assert_eq!(tx.request_method_number, Method::Connect);
    assert_eq!(
        tx.parsed_uri.as_ref().unwrap().hostname.as_ref().unwrap(),
        &"www.example.com"
    );
    assert_eq!(tx.parsed_uri.as_ref().unwrap().port_number, Some(443));
}

#[test]
fn FailedConnectContinuesParsing() {
    let mut t = Test::default();
    t.request(b"CONNECT www.example.com:443 HTTP/1.1\r\nHost: www.example.com\r\n\r\n");
    t.response(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n");
    t.run(vec![
        Chunk::client(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n"),
        Chunk::server(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"),
    ]);
    assert_eq!(t.connp.conn.tx_size(), 2);
    assert_eq!(t.tx(0).response_status_number, 403);
    assert_eq!(t.tx(1).response_status_number, 200);
}

#[test]
fn ResponseLineAsBody() {
    let mut t = Test::default();
    t.request(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
    t.response(b"not an http response at all\r\n");
    t.close();
    let tx = t.tx(0);
    assert_eq!(t.response_body(0), b"not an http response at all");
    assert_eq!(tx.progress, TxProgress::Done);
}

#[test]
fn MultipartByterangesFallsBackToCloseDelimited() {
    let mut t = Test::default();
    t.run(vec![
        Chunk::client(b"GET /r HTTP/1.1\r\nHost: x\r\n\r\n"),
        Chunk::server(
            b"HTTP/1.1 206 Partial Content\r\nContent-Type: multipart/byteranges; boundary=B\r\n\r\nsome bytes",
        ),
    ]);
    t.close();
    let tx = t.tx(0);
    assert_eq!(tx.response_transfer_coding, TransferCoding::Identity);
    assert_eq!(t.response_body(0), b"some bytes");
    assert!(t
        .connp
        .conn
        .last_error()
        .map(|m| m.code == LogCode::ResponseMultipartByteranges)
        .unwrap_or(false));
}

#[test]
fn TxAutoDestroy() {
    let mut cfg = test_config();
    cfg.tx_auto_destroy = true;
    let mut t = Test::new(cfg);
    t.run(vec![
        Chunk::client(b"GET /one HTTP/1.1\r\nHost: x\r\n\r\n"),
        Chunk::server(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"),
        Chunk::client(b"GET /two HTTP/1.1\r\nHost: x\r\n\r\n"),
    ]);
    // The completed transaction was detached; its slot remains.
    assert_eq!(t.connp.conn.tx_size(), 2);
    assert!(t.connp.conn.tx(0).is_none());
    assert!(t.connp.conn.tx(1).is_some());
}

#[test]
fn PutBodyIsFileData() {
    let mut t = Test::default();
    t.request(b"PUT /file.bin HTTP/1.1\r\nHost: x\r\nContent-Length: 4\r\n\r\nDATA");
    let tx = t.tx(0);
    assert_eq!(tx.request_method_number, Method::Put);
    assert_eq!(t.request_body(0), b"DATA");
    assert_eq!(tx.progress, TxProgress::Wait);
}
