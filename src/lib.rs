//! httap is a security-aware parser for the HTTP/1.x protocol family,
//! built for passive inspection of network traffic: intrusion detection,
//! application firewalls, and traffic analytics.
//!
//! The parser consumes arbitrary byte chunks belonging to one TCP
//! connection, request bytes in one direction and response bytes in the
//! other, and reconstructs the transactions carried on it: request and
//! response lines, header fields, body boundaries, decoded entities, and a
//! large set of anomaly flags matching the observed behavior of real-world
//! HTTP servers.
//!
//! The entry point is [`connection_parser::ConnectionParser`]: open it,
//! feed it request and response data as the capture delivers it, and
//! observe transactions either through hooks registered on the
//! [`config::Config`] or by walking [`connection::Connection`] afterwards.
//!
//! ```no_run
//! use httap::config::{Config, ServerPersonality};
//! use httap::connection_parser::ConnectionParser;
//!
//! let mut cfg = Config::default();
//! cfg.set_server_personality(ServerPersonality::Apache2).unwrap();
//! let mut parser = ConnectionParser::new(cfg);
//! parser.open(None, None, None, None, None);
//! parser.request_data(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n", None);
//! parser.response_data(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n", None);
//! parser.close(None);
//! for tx in (0..parser.conn.tx_size()).filter_map(|i| parser.conn.tx(i)) {
//!     println!("{:?} -> {}", tx.request_method_number, tx.response_status_number);
//! }
//! ```

#[macro_use]
pub mod log;

pub mod bstr;
pub mod config;
pub mod connection;
pub mod connection_parser;
mod content_handlers;
pub mod decompressors;
pub mod error;
pub mod headers;
pub mod hook;
pub mod multipart;
pub mod parsers;
pub mod request;
mod request_generic;
pub mod response;
mod response_generic;
pub mod table;
pub mod transaction;
pub mod uri;
pub mod urlencoded;
pub mod util;

pub use crate::error::{Result, Status};
