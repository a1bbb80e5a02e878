use crate::bstr::Bstr;
use crate::config::{Config, ServerPersonality};
use crate::connection::Connection;
use crate::error::{Result, Status};
use crate::log::{LogCode, Logger};
use crate::request_generic::{
    parse_request_line_apache_2_2, parse_request_line_generic, process_request_header_generic,
};
use crate::response_generic::{parse_response_line_generic, process_response_header_generic};
use crate::transaction::Transaction;
use crate::util::{ConnectionFlags, FlagOperations};
use crate::{log_error, log_info};
use std::io::Cursor;
use std::net::IpAddr;
use time::OffsetDateTime;

/// Parser states shared by the two directions. Some states are used by one
/// direction only.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum State {
    None,
    Idle,
    Line,
    Headers,
    BodyDetermine,
    BodyChunkedLength,
    BodyChunkedData,
    BodyChunkedDataEnd,
    Finalize,
    // Request-only states.
    Protocol,
    BodyIdentity,
    ConnectCheck,
    ConnectWaitResponse,
    ConnectProbeData,
    IgnoreDataAfterHttp09,
    // Response-only states.
    BodyIdentityClKnown,
    BodyIdentityStreamClose,
}

/// State of one direction of the stream, as reported back to the driver.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum StreamState {
    /// The connection has not been opened yet.
    New,
    /// Open, no data processed so far.
    Open,
    /// The stream was closed.
    Closed,
    /// A fatal error has latched this direction.
    Error,
    /// This direction is now a tunnel and is no longer parsed.
    Tunnel,
    /// Parsing is suspended until the other direction progresses.
    DataOther,
    /// A callback asked us to stop following this connection.
    Stop,
    /// All supplied data was consumed; feed more when available.
    Data,
}

/// The personality-specific parsing capabilities, bound once when the
/// parser is created.
#[derive(Copy, Clone)]
pub(crate) struct PersonalityHandlers {
    pub parse_request_line: fn(&mut ConnectionParser, &[u8]) -> Result<()>,
    pub parse_response_line: fn(&mut ConnectionParser, &[u8]) -> Result<()>,
    pub process_request_header: fn(&mut ConnectionParser, &[u8], bool) -> Result<()>,
    pub process_response_header: fn(&mut ConnectionParser, &[u8], bool) -> Result<()>,
}

impl PersonalityHandlers {
    fn bind(personality: ServerPersonality) -> Self {
        Self {
            parse_request_line: match personality {
                ServerPersonality::Apache2 => parse_request_line_apache_2_2,
                _ => parse_request_line_generic,
            },
            parse_response_line: parse_response_line_generic,
            process_request_header: process_request_header_generic,
            process_response_header: process_response_header_generic,
        }
    }
}

/// The bidirectional streaming parser for one TCP connection.
///
/// The driver feeds request bytes and response bytes separately; each feed
/// advances the per-direction state machine until it runs out of data or
/// hits a fatal condition.
pub struct ConnectionParser {
    /// Parser configuration (the parser's own copy).
    pub cfg: Config,
    /// The connection this parser belongs to.
    pub conn: Connection,
    /// Log sink.
    pub(crate) logger: Logger,
    /// Personality-bound parsing functions.
    pub(crate) personality: PersonalityHandlers,

    /// Inbound stream status.
    pub request_status: StreamState,
    /// Timestamp of the most recent request chunk.
    pub request_timestamp: Option<OffsetDateTime>,
    /// The request chunk being processed.
    pub(crate) request_curr_data: Cursor<Vec<u8>>,
    /// Number of request chunks seen on this connection.
    pub(crate) request_chunk_count: usize,
    /// The chunk number at which the current request started.
    pub(crate) request_chunk_request_index: usize,
    /// Spill buffer for lines crossing chunk boundaries.
    pub(crate) request_buf: Bstr,
    /// Partially assembled (possibly folded) request header.
    pub(crate) request_header: Option<(Bstr, bool)>,
    /// Ongoing inbound transaction index.
    request_tx: Option<usize>,
    /// Declared request content length.
    pub(crate) request_content_length: i64,
    /// Request body bytes still expected.
    pub(crate) request_body_data_left: i64,
    /// Bytes left in the current request body chunk.
    pub(crate) request_chunked_length: i64,
    /// Current request parser state.
    pub(crate) request_state: State,

    /// Outbound stream status.
    pub response_status: StreamState,
    /// Timestamp of the most recent response chunk.
    pub response_timestamp: Option<OffsetDateTime>,
    /// The response chunk being processed.
    pub(crate) response_curr_data: Cursor<Vec<u8>>,
    /// Spill buffer for response lines crossing chunk boundaries.
    pub(crate) response_buf: Bstr,
    /// Partially assembled (possibly folded) response header.
    pub(crate) response_header: Option<(Bstr, bool)>,
    /// Ongoing outbound transaction index.
    response_tx: Option<usize>,
    /// Declared response content length.
    pub(crate) response_content_length: i64,
    /// Response body bytes still expected.
    pub(crate) response_body_data_left: i64,
    /// Bytes left in the current response body chunk.
    pub(crate) response_chunked_length: i64,
    /// Current response parser state.
    pub(crate) response_state: State,
    /// Index of the transaction the next response belongs to.
    pub(crate) response_next_tx_index: usize,
    /// Stop response parsing at the end of the current transaction because
    /// unparsed request data is waiting.
    pub(crate) response_data_other_at_tx_end: bool,
}

impl ConnectionParser {
    pub fn new(cfg: Config) -> Self {
        let conn = Connection::new();
        let logger = conn.logger(cfg.hook_log.clone());
        let personality = PersonalityHandlers::bind(cfg.server_personality);
        Self {
            cfg,
            conn,
            logger,
            personality,
            request_status: StreamState::New,
            request_timestamp: None,
            request_curr_data: Cursor::new(Vec::new()),
            request_chunk_count: 0,
            request_chunk_request_index: 0,
            request_buf: Bstr::new(),
            request_header: None,
            request_tx: None,
            request_content_length: -1,
            request_body_data_left: -1,
            request_chunked_length: 0,
            request_state: State::Idle,
            response_status: StreamState::New,
            response_timestamp: None,
            response_curr_data: Cursor::new(Vec::new()),
            response_buf: Bstr::new(),
            response_header: None,
            response_tx: None,
            response_content_length: -1,
            response_body_data_left: -1,
            response_chunked_length: 0,
            response_state: State::Idle,
            response_next_tx_index: 0,
            response_data_other_at_tx_end: false,
        }
    }

    /// Opens the connection, storing endpoints and the open timestamp.
    pub fn open(
        &mut self,
        client_addr: Option<IpAddr>,
        client_port: Option<u16>,
        server_addr: Option<IpAddr>,
        server_port: Option<u16>,
        timestamp: Option<OffsetDateTime>,
    ) {
        if self.request_status != StreamState::New || self.response_status != StreamState::New {
            log_error!(
                self.logger,
                LogCode::ConnectionAlreadyOpen,
                "Connection is already open"
            );
            return;
        }
        self.conn
            .open(client_addr, client_port, server_addr, server_port, timestamp);
        self.request_status = StreamState::Open;
        self.response_status = StreamState::Open;
    }

    /// Marks the inbound stream closed and runs pending request
    /// finalization.
    pub fn request_close(&mut self, timestamp: Option<OffsetDateTime>) {
        if self.request_status != StreamState::Error {
            self.request_status = StreamState::Closed;
        }
        self.request_data(b"", timestamp);
    }

    /// Closes the connection: both directions are finalized with
    /// zero-length feeds.
    pub fn close(&mut self, timestamp: Option<OffsetDateTime>) {
        self.conn.close(timestamp);
        if self.request_status != StreamState::Error {
            self.request_status = StreamState::Closed;
        }
        if self.response_status != StreamState::Error {
            self.response_status = StreamState::Closed;
        }
        self.request_data(b"", timestamp);
        self.response_data(b"", timestamp);
    }

    /// Creates a transaction, making it the active inbound transaction.
    pub(crate) fn create_tx(&mut self) -> Result<usize> {
        // Requests outpacing responses means the client is pipelining.
        if self.conn.tx_size() > self.response_next_tx_index {
            self.conn.flags.set(ConnectionFlags::PIPELINED);
        }
        let index = self.conn.tx_size();
        let tx = Transaction::new(index, self.cfg.tx_cfg());
        self.conn.push_tx(tx);
        self.request_tx = Some(index);
        self.request_reset();
        Ok(index)
    }

    /// Detach a transaction and forget any direction references to it.
    pub fn destroy_tx(&mut self, index: usize) {
        self.conn.detach_tx(index);
        if self.request_tx == Some(index) {
            self.request_tx = None;
        }
        if self.response_tx == Some(index) {
            self.response_tx = None;
        }
    }

    /// The active inbound transaction.
    pub fn request_tx(&self) -> Option<&Transaction> {
        self.request_tx.and_then(|index| self.conn.tx(index))
    }

    /// The active inbound transaction, mutably.
    pub fn request_tx_mut(&mut self) -> Option<&mut Transaction> {
        let index = self.request_tx?;
        self.conn.tx_mut(index)
    }

    /// The active inbound transaction, or an error when there is none.
    pub(crate) fn request_tx_mut_ok(&mut self) -> Result<&mut Transaction> {
        self.request_tx_mut().ok_or(Status::Error)
    }

    /// The active outbound transaction.
    pub fn response_tx(&self) -> Option<&Transaction> {
        self.response_tx.and_then(|index| self.conn.tx(index))
    }

    /// The active outbound transaction, mutably.
    pub fn response_tx_mut(&mut self) -> Option<&mut Transaction> {
        let index = self.response_tx?;
        self.conn.tx_mut(index)
    }

    /// The active outbound transaction, or an error when there is none.
    pub(crate) fn response_tx_mut_ok(&mut self) -> Result<&mut Transaction> {
        self.response_tx_mut().ok_or(Status::Error)
    }

    pub(crate) fn set_response_tx_id(&mut self, index: Option<usize>) {
        self.response_tx = index;
    }

    /// Reset per-request parsing state.
    pub(crate) fn request_reset(&mut self) {
        self.request_content_length = -1;
        self.request_body_data_left = -1;
        self.request_chunked_length = 0;
        self.request_chunk_request_index = self.request_chunk_count;
    }

    /// Reset per-response parsing state.
    pub(crate) fn response_reset(&mut self) {
        self.response_content_length = -1;
        self.response_body_data_left = -1;
        self.response_chunked_length = 0;
    }

    /// Total length of the current request chunk.
    pub(crate) fn request_curr_len(&self) -> i64 {
        self.request_curr_data.get_ref().len() as i64
    }

    /// Total length of the current response chunk.
    pub(crate) fn response_curr_len(&self) -> i64 {
        self.response_curr_data.get_ref().len() as i64
    }

    /// Bytes consumed from the most recent request chunk.
    pub fn request_data_consumed(&self) -> i64 {
        self.request_curr_data.position() as i64
    }

    /// Bytes consumed from the most recent response chunk. Normally a feed
    /// consumes the whole chunk, but `DataOther` leaves a remainder the
    /// caller must keep.
    pub fn response_data_consumed(&self) -> i64 {
        self.response_curr_data.position() as i64
    }

    /// Run the state function for the current request state.
    fn handle_request_state(&mut self, data: &[u8]) -> Result<()> {
        let pos = std::cmp::min(self.request_curr_data.position() as usize, data.len());
        let input = &data[pos..];
        match self.request_state {
            State::None => Err(Status::Error),
            State::Idle => self.request_idle(),
            State::Line => self.request_line(input),
            State::Protocol => self.request_protocol(input),
            State::Headers => self.request_headers(input),
            State::BodyDetermine => self.request_body_determine(),
            State::BodyIdentity => self.request_body_identity(input),
            State::BodyChunkedLength => self.request_body_chunked_length(input),
            State::BodyChunkedData => self.request_body_chunked_data(input),
            State::BodyChunkedDataEnd => self.request_body_chunked_data_end(input),
            State::ConnectCheck => self.request_connect_check(),
            State::ConnectWaitResponse => self.request_connect_wait_response(),
            State::ConnectProbeData => self.request_connect_probe_data(input),
            State::IgnoreDataAfterHttp09 => self.request_ignore_data_after_http_0_9(),
            State::Finalize => self.request_finalize(input),
            _ => Err(Status::Error),
        }
    }

    /// Run the state function for the current response state.
    fn handle_response_state(&mut self, data: &[u8]) -> Result<()> {
        let pos = std::cmp::min(self.response_curr_data.position() as usize, data.len());
        let input = &data[pos..];
        match self.response_state {
            State::None => Err(Status::Error),
            State::Idle => self.response_idle(),
            State::Line => self.response_line(input),
            State::Headers => self.response_headers(input),
            State::BodyDetermine => self.response_body_determine(),
            State::BodyChunkedLength => self.response_body_chunked_length(input),
            State::BodyChunkedData => self.response_body_chunked_data(input),
            State::BodyChunkedDataEnd => self.response_body_chunked_data_end(input),
            State::BodyIdentityClKnown => self.response_body_identity_cl_known(input),
            State::BodyIdentityStreamClose => self.response_body_identity_stream_close(input),
            State::Finalize => self.response_finalize(input),
            _ => Err(Status::Error),
        }
    }

    /// Process a chunk of inbound (request) data.
    pub fn request_data(
        &mut self,
        data: &[u8],
        timestamp: Option<OffsetDateTime>,
    ) -> StreamState {
        if self.request_status == StreamState::Stop {
            log_info!(
                self.logger,
                LogCode::ParserStateError,
                "Inbound parser is in Stop state"
            );
            return StreamState::Stop;
        }
        if self.request_status == StreamState::Error {
            log_error!(
                self.logger,
                LogCode::ParserStateError,
                "Inbound parser is in Error state"
            );
            return StreamState::Error;
        }
        if self.request_tx.is_none()
            && self.request_state != State::Idle
            && self.request_state != State::ConnectProbeData
        {
            self.request_status = StreamState::Error;
            log_error!(
                self.logger,
                LogCode::MissingInboundTransactionData,
                "Missing inbound transaction data"
            );
            return StreamState::Error;
        }
        // Zero-length chunks are used internally to force finalization and
        // are only valid once the stream has closed.
        if data.is_empty() && self.request_status != StreamState::Closed {
            log_error!(
                self.logger,
                LogCode::ZeroLengthDataChunks,
                "Zero-length data chunks are not allowed"
            );
            return StreamState::Closed;
        }
        if timestamp.is_some() {
            self.request_timestamp = timestamp;
        }
        self.request_curr_data = Cursor::new(data.to_vec());
        self.request_chunk_count = self.request_chunk_count.wrapping_add(1);
        self.conn.track_request_data(data.len());

        if self.request_status == StreamState::Tunnel {
            // Tunnel traffic is not parsed.
            return StreamState::Tunnel;
        }
        if self.response_status == StreamState::DataOther {
            self.response_status = StreamState::Data;
        }

        // Invoke the state functions in a loop until an error occurs or we
        // run out of data. State functions supply their own log messages.
        loop {
            let rc = self.handle_request_state(data);
            if rc.is_ok() && self.request_status == StreamState::Tunnel {
                return StreamState::Tunnel;
            }
            match rc {
                Ok(()) => {}
                Err(Status::Data) | Err(Status::DataBuffer) => {
                    self.request_status = StreamState::Data;
                    return StreamState::Data;
                }
                Err(Status::DataOther) => {
                    if self.request_curr_data.position() as i64 >= self.request_curr_len() {
                        // The entire chunk was consumed; nothing to hold.
                        self.request_status = StreamState::Data;
                        return StreamState::Data;
                    } else {
                        self.request_status = StreamState::DataOther;
                        return StreamState::DataOther;
                    }
                }
                Err(Status::Stop) => {
                    self.request_status = StreamState::Stop;
                    return StreamState::Stop;
                }
                Err(_) => {
                    self.request_status = StreamState::Error;
                    return StreamState::Error;
                }
            }
        }
    }

    /// Process a chunk of outbound (response) data.
    pub fn response_data(
        &mut self,
        data: &[u8],
        timestamp: Option<OffsetDateTime>,
    ) -> StreamState {
        if self.response_status == StreamState::Stop {
            log_info!(
                self.logger,
                LogCode::ParserStateError,
                "Outbound parser is in Stop state"
            );
            return StreamState::Stop;
        }
        if self.response_status == StreamState::Error {
            log_error!(
                self.logger,
                LogCode::ParserStateError,
                "Outbound parser is in Error state"
            );
            return StreamState::Error;
        }
        if data.is_empty() && self.response_status != StreamState::Closed {
            log_error!(
                self.logger,
                LogCode::ZeroLengthDataChunks,
                "Zero-length data chunks are not allowed"
            );
            return StreamState::Closed;
        }
        if timestamp.is_some() {
            self.response_timestamp = timestamp;
        }
        self.response_curr_data = Cursor::new(data.to_vec());
        self.conn.track_response_data(data.len());

        if self.response_status == StreamState::Tunnel {
            return StreamState::Tunnel;
        }

        loop {
            let rc = self.handle_response_state(data);
            if rc.is_ok() && self.response_status == StreamState::Tunnel {
                return StreamState::Tunnel;
            }
            match rc {
                Ok(()) => {}
                Err(Status::Data) | Err(Status::DataBuffer) => {
                    self.response_status = StreamState::Data;
                    return StreamState::Data;
                }
                Err(Status::DataOther) => {
                    if self.response_curr_data.position() as i64 >= self.response_curr_len() {
                        self.response_status = StreamState::Data;
                        return StreamState::Data;
                    } else {
                        self.response_status = StreamState::DataOther;
                        return StreamState::DataOther;
                    }
                }
                Err(Status::Stop) => {
                    self.response_status = StreamState::Stop;
                    return StreamState::Stop;
                }
                Err(_) => {
                    self.response_status = StreamState::Error;
                    return StreamState::Error;
                }
            }
        }
    }
}

impl std::fmt::Debug for ConnectionParser {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ConnectionParser")
            .field("request_status", &self.request_status)
            .field("response_status", &self.response_status)
            .field("request_state", &self.request_state)
            .field("response_state", &self.response_state)
            .field("request_tx", &self.request_tx)
            .field("response_tx", &self.response_tx)
            .finish()
    }
}
