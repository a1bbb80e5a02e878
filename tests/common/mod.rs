#![allow(dead_code)]
use httap::config::{Config, ServerPersonality};
use httap::connection_parser::{ConnectionParser, StreamState};
use httap::transaction::{Data, Transaction};
use httap::Result;
use std::net::{IpAddr, Ipv4Addr};
use time::OffsetDateTime;

/// One direction's worth of input.
#[derive(Debug)]
pub enum Chunk {
    Client(Vec<u8>),
    Server(Vec<u8>),
}

impl Chunk {
    pub fn client<B: AsRef<[u8]>>(data: B) -> Self {
        Chunk::Client(data.as_ref().to_vec())
    }

    pub fn server<B: AsRef<[u8]>>(data: B) -> Self {
        Chunk::Server(data.as_ref().to_vec())
    }
}

/// Body bytes collected through the body-data hooks, attached to each
/// transaction as user data.
pub struct CollectedBodies {
    pub request: Vec<u8>,
    pub response: Vec<u8>,
}

impl CollectedBodies {
    fn new() -> Self {
        Self {
            request: Vec::new(),
            response: Vec::new(),
        }
    }
}

fn ensure_user_data(tx: &mut Transaction) {
    if tx.user_data::<CollectedBodies>().is_none() {
        tx.set_user_data(CollectedBodies::new());
    }
}

fn collect_request_body(d: &mut Data) -> Result<()> {
    let bytes = d.data().map(|b| b.to_vec());
    if let Some(bytes) = bytes {
        ensure_user_data(d.tx);
        if let Some(bodies) = d.tx.user_data_mut::<CollectedBodies>() {
            bodies.request.extend_from_slice(&bytes);
        }
    }
    Ok(())
}

fn collect_response_body(d: &mut Data) -> Result<()> {
    let bytes = d.data().map(|b| b.to_vec());
    if let Some(bytes) = bytes {
        ensure_user_data(d.tx);
        if let Some(bodies) = d.tx.user_data_mut::<CollectedBodies>() {
            bodies.response.extend_from_slice(&bytes);
        }
    }
    Ok(())
}

/// The baseline test configuration: Apache personality, body collection,
/// urlencoded and multipart parsing on.
pub fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.set_server_personality(ServerPersonality::Apache2).unwrap();
    cfg.set_parse_urlencoded(true);
    cfg.set_parse_multipart(true);
    cfg.register_request_body_data(collect_request_body);
    cfg.register_response_body_data(collect_response_body);
    cfg
}

/// Drives a single connection through a parser.
pub struct Test {
    pub connp: ConnectionParser,
}

impl Test {
    pub fn new(cfg: Config) -> Self {
        let mut connp = ConnectionParser::new(cfg);
        connp.open(
            Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
            Some(32768),
            Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))),
            Some(80),
            Some(OffsetDateTime::now_utc()),
        );
        Test { connp }
    }

    pub fn default() -> Self {
        Self::new(test_config())
    }

    /// Feed one request chunk, asserting the parser accepted it.
    pub fn request<B: AsRef<[u8]>>(&mut self, data: B) -> StreamState {
        let rc = self.connp.request_data(data.as_ref(), None);
        assert_ne!(rc, StreamState::Error, "request feed failed");
        rc
    }

    /// Feed one response chunk, asserting the parser accepted it.
    pub fn response<B: AsRef<[u8]>>(&mut self, data: B) -> StreamState {
        let rc = self.connp.response_data(data.as_ref(), None);
        assert_ne!(rc, StreamState::Error, "response feed failed");
        rc
    }

    /// Feed a whole conversation.
    pub fn run(&mut self, chunks: Vec<Chunk>) {
        for chunk in chunks {
            match chunk {
                Chunk::Client(data) => {
                    self.request(data);
                }
                Chunk::Server(data) => {
                    self.response(data);
                }
            }
        }
    }

    pub fn close(&mut self) {
        self.connp.close(Some(OffsetDateTime::now_utc()));
    }

    /// Transaction by index; panics when absent.
    pub fn tx(&self, index: usize) -> &Transaction {
        self.connp.conn.tx(index).expect("expected a transaction")
    }

    /// Request body bytes collected for a transaction.
    pub fn request_body(&self, index: usize) -> &[u8] {
        self.tx(index)
            .user_data::<CollectedBodies>()
            .map(|bodies| bodies.request.as_slice())
            .unwrap_or(b"")
    }

    /// Response body bytes collected for a transaction.
    pub fn response_body(&self, index: usize) -> &[u8] {
        self.tx(index)
            .user_data::<CollectedBodies>()
            .map(|bodies| bodies.response.as_slice())
            .unwrap_or(b"")
    }
}

/// Asserts that a transaction's header equals the expected value.
#[macro_export]
macro_rules! assert_header_eq {
    ($tx:expr, $attr:ident, $key:expr, $val:expr) => {{
        let header = &$tx
            .$attr
            .get_nocase_nozero($key)
            .unwrap_or_else(|| panic!("expected header '{}' to exist", $key))
            .1;
        assert_eq!(header.value, $val);
    }};
}

/// Asserts that a transaction's request header equals the expected value.
#[macro_export]
macro_rules! assert_request_header_eq {
    ($tx:expr, $key:expr, $val:expr) => {
        assert_header_eq!($tx, request_headers, $key, $val)
    };
}

/// Asserts that a transaction's response header equals the expected value.
#[macro_export]
macro_rules! assert_response_header_eq {
    ($tx:expr, $key:expr, $val:expr) => {
        assert_header_eq!($tx, response_headers, $key, $val)
    };
}
