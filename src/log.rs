use crate::hook::LogHook;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::mpsc::Sender;

/// Severity of a parser message.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Debug)]
pub enum LogLevel {
    /// Fatal conditions that latch a direction.
    Error,
    /// Protocol anomalies that parsing recovers from.
    Warning,
    /// Informational notices.
    Info,
}

/// Stable identifier of a message category, independent of the message text.
///
/// Inspection rules key on these rather than on the human-readable string.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum LogCode {
    Unknown,
    ConnectionAlreadyOpen,
    ZeroLengthDataChunks,
    ParserStateError,
    MissingInboundTransactionData,
    MissingOutboundTransactionData,
    UnableToMatchResponseToRequest,
    RequestFieldTooLong,
    ResponseFieldTooLong,
    RequestFieldSoftLimit,
    ResponseFieldSoftLimit,
    RequestLineLeadingWhitespace,
    RequestLineMissingProtocol,
    RequestLineUnknownMethod,
    RequestLineUnknownMethodNoProtocol,
    RequestLineUnknownMethodInvalidProtocol,
    MethodDelimNonCompliant,
    UriDelimNonCompliant,
    InvalidProtocol,
    RequestFieldMissingColon,
    ResponseFieldMissingColon,
    RequestInvalidEmptyName,
    ResponseInvalidEmptyName,
    RequestInvalidLwsAfterName,
    ResponseInvalidLwsAfterName,
    RequestHeaderInvalid,
    ResponseHeaderInvalid,
    RequestFieldNul,
    ResponseFieldNul,
    InvalidRequestFieldFolding,
    InvalidResponseFieldFolding,
    RequestHeaderRepetition,
    ResponseHeaderRepetition,
    DuplicateContentLengthFieldInRequest,
    DuplicateContentLengthFieldInResponse,
    ContentLengthExtraDataStart,
    ContentLengthExtraDataEnd,
    InvalidContentLengthFieldInRequest,
    InvalidContentLengthFieldInResponse,
    InvalidRequestChunkLen,
    InvalidResponseChunkLen,
    RequestSmuggling,
    RequestAbnormalTransferEncoding,
    ResponseAbnormalTransferEncoding,
    ResponseChunkedOldProto,
    ResponseInvalidStatus,
    ContinueAlreadySeen,
    SwitchingProtoWithContentLength,
    ResponseMultipartByteranges,
    RequestBodyUnexpected,
    ResponseBodyUnexpected,
    RequestHostAmbiguous,
    HostMissing,
    InvalidHostname,
    ContentEncodingUnknown,
    CompressionBomb,
    DecompressionFailed,
    InvalidUrlEncoding,
    MultipartInvalidBoundary,
    Http09ExtraData,
    InvalidGap,
}

/// One structured log record emitted by the parser.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// Severity.
    pub level: LogLevel,
    /// Message category.
    pub code: LogCode,
    /// Human-readable text.
    pub msg: String,
    /// Source file that emitted the message.
    pub file: &'static str,
    /// Source line that emitted the message.
    pub line: u32,
}

/// Cheap handle for emitting messages into a connection's log channel.
///
/// Cloned freely by the parser internals; the receiving end lives on the
/// [`Connection`](crate::connection::Connection).
#[derive(Clone)]
pub struct Logger {
    sender: Sender<Message>,
    last_error: Rc<RefCell<Option<Message>>>,
    hook: LogHook,
}

impl Logger {
    pub(crate) fn new(
        sender: Sender<Message>,
        last_error: Rc<RefCell<Option<Message>>>,
        hook: LogHook,
    ) -> Self {
        Self {
            sender,
            last_error,
            hook,
        }
    }

    /// Record one message: run the log hook, retain the most recent error,
    /// and queue the message on the connection's log channel.
    pub fn log(
        &self,
        level: LogLevel,
        code: LogCode,
        msg: String,
        file: &'static str,
        line: u32,
    ) {
        let message = Message {
            level,
            code,
            msg,
            file,
            line,
        };
        // Hook outcomes do not influence parsing.
        let _ = self.hook.run_all(&message);
        if level == LogLevel::Error {
            self.last_error.borrow_mut().replace(message.clone());
        }
        let _ = self.sender.send(message);
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Logger").finish()
    }
}

/// Log a fatal condition.
#[macro_export]
macro_rules! log_error {
    ($logger:expr, $code:expr, $msg:expr) => {
        $logger.log(
            $crate::log::LogLevel::Error,
            $code,
            $msg.to_string(),
            file!(),
            line!(),
        )
    };
}

/// Log a recoverable protocol anomaly.
#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $code:expr, $msg:expr) => {
        $logger.log(
            $crate::log::LogLevel::Warning,
            $code,
            $msg.to_string(),
            file!(),
            line!(),
        )
    };
}

/// Log an informational notice.
#[macro_export]
macro_rules! log_info {
    ($logger:expr, $code:expr, $msg:expr) => {
        $logger.log(
            $crate::log::LogLevel::Info,
            $code,
            $msg.to_string(),
            file!(),
            line!(),
        )
    };
}
