use crate::hook::LogHook;
use crate::log::{Logger, Message};
use crate::transaction::Transaction;
use std::cell::RefCell;
use std::net::IpAddr;
use std::rc::Rc;
use std::sync::mpsc::{channel, Receiver, Sender};
use time::OffsetDateTime;

/// Per-connection state: the transaction list, the log channel, endpoints
/// and data counters.
///
/// Transactions live in an append-only list of optional slots so that
/// indices stay stable when a transaction is detached early.
pub struct Connection {
    /// Client IP address.
    pub client_addr: Option<IpAddr>,
    /// Client port.
    pub client_port: Option<u16>,
    /// Server IP address.
    pub server_addr: Option<IpAddr>,
    /// Server port.
    pub server_port: Option<u16>,

    /// Transactions carried by this connection.
    transactions: Vec<Option<Transaction>>,

    /// Log messages emitted while parsing this connection.
    log_channel: (Sender<Message>, Receiver<Message>),
    /// The most recent error-level message.
    last_error: Rc<RefCell<Option<Message>>>,

    /// Parsing flags, see [`ConnectionFlags`](crate::util::ConnectionFlags).
    pub flags: u8,
    /// When the connection was opened.
    pub open_timestamp: Option<OffsetDateTime>,
    /// When the connection was closed.
    pub close_timestamp: Option<OffsetDateTime>,
    /// Inbound data counter.
    pub request_data_counter: u64,
    /// Outbound data counter.
    pub response_data_counter: u64,
}

impl Default for Connection {
    fn default() -> Self {
        Self {
            client_addr: None,
            client_port: None,
            server_addr: None,
            server_port: None,
            transactions: Vec::new(),
            log_channel: channel(),
            last_error: Rc::new(RefCell::new(None)),
            flags: 0,
            open_timestamp: None,
            close_timestamp: None,
            request_data_counter: 0,
            response_data_counter: 0,
        }
    }
}

impl Connection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the connection endpoints and the open timestamp.
    pub fn open(
        &mut self,
        client_addr: Option<IpAddr>,
        client_port: Option<u16>,
        server_addr: Option<IpAddr>,
        server_port: Option<u16>,
        timestamp: Option<OffsetDateTime>,
    ) {
        self.client_addr = client_addr;
        self.client_port = client_port;
        self.server_addr = server_addr;
        self.server_port = server_port;
        if timestamp.is_some() {
            self.open_timestamp = timestamp;
        }
    }

    /// Record the close timestamp.
    pub fn close(&mut self, timestamp: Option<OffsetDateTime>) {
        if timestamp.is_some() {
            self.close_timestamp = timestamp;
        }
    }

    /// Append a transaction, returning its index.
    pub(crate) fn push_tx(&mut self, tx: Transaction) -> usize {
        self.transactions.push(Some(tx));
        self.transactions.len() - 1
    }

    /// Number of transaction slots, detached ones included.
    pub fn tx_size(&self) -> usize {
        self.transactions.len()
    }

    /// Borrow a transaction by index. `None` for out-of-range indices and
    /// detached slots alike.
    pub fn tx(&self, index: usize) -> Option<&Transaction> {
        self.transactions.get(index).and_then(|t| t.as_ref())
    }

    /// Mutably borrow a transaction by index.
    pub fn tx_mut(&mut self, index: usize) -> Option<&mut Transaction> {
        self.transactions.get_mut(index).and_then(|t| t.as_mut())
    }

    /// Detach a transaction, freeing its resources while preserving the
    /// indices of the others.
    pub fn detach_tx(&mut self, index: usize) -> Option<Transaction> {
        self.transactions.get_mut(index).and_then(|t| t.take())
    }

    /// Keep track of inbound bytes.
    pub fn track_request_data(&mut self, len: usize) {
        self.request_data_counter = self.request_data_counter.wrapping_add(len as u64);
    }

    /// Keep track of outbound bytes.
    pub fn track_response_data(&mut self, len: usize) {
        self.response_data_counter = self.response_data_counter.wrapping_add(len as u64);
    }

    /// Build a logger feeding this connection's channel.
    pub(crate) fn logger(&self, hook: LogHook) -> Logger {
        Logger::new(self.log_channel.0.clone(), self.last_error.clone(), hook)
    }

    /// Drain and return all queued log messages.
    pub fn get_logs(&self) -> Vec<Message> {
        let mut logs = Vec::with_capacity(8);
        while let Ok(message) = self.log_channel.1.try_recv() {
            logs.push(message)
        }
        logs
    }

    /// The next queued log message, if any.
    pub fn get_next_log(&self) -> Option<Message> {
        self.log_channel.1.try_recv().ok()
    }

    /// The most recent error-level message, retained until cleared.
    pub fn last_error(&self) -> Option<Message> {
        self.last_error.borrow().clone()
    }

    /// Forget the retained error.
    pub fn clear_last_error(&mut self) {
        self.last_error.borrow_mut().take();
    }
}

impl PartialEq for Connection {
    /// Two connections are the same when their endpoints match.
    fn eq(&self, rhs: &Self) -> bool {
        self.client_addr == rhs.client_addr
            && self.client_port == rhs.client_port
            && self.server_addr == rhs.server_addr
            && self.server_port == rhs.server_port
    }
}
