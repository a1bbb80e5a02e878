use crate::bstr::Bstr;
use crate::config::TxConfig;
use crate::connection_parser::{ConnectionParser, State};
use crate::decompressors::{ContentEncoding, Decompressor};
use crate::error::{Result, Status};
use crate::hook::DataHook;
use crate::log::LogCode;
use crate::parsers::{
    parse_authorization, parse_content_length, parse_content_type, parse_cookies_v0,
    parse_hostport,
};
use crate::request::Method;
use crate::table::Table;
use crate::uri::Uri;
use crate::util::{
    decode_uri_path_inplace, normalize_uri_path_inplace, validate_hostname, File, FileSource,
    FlagOperations, TxFlags,
};
use crate::{log_error, log_warn};
use std::cell::RefCell;
use std::rc::Rc;

/// Protocol version numbers.
#[repr(i16)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Protocol {
    /// The version is not known or did not parse.
    Unknown = -1,
    V0_9 = 9,
    V1_0 = 100,
    V1_1 = 101,
}

impl Protocol {
    /// The numeric protocol code.
    pub fn number(self) -> i16 {
        self as i16
    }
}

/// Body framing in use for one message.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TransferCoding {
    /// Not yet determined.
    Unknown,
    /// The message has no body.
    NoBody,
    /// Identity body, length known or close-delimited.
    Identity,
    /// Chunked body framing.
    Chunked,
}

/// Authentication scheme seen in the Authorization request header.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AuthType {
    /// The header has not been examined.
    Unknown,
    /// No Authorization header was present.
    None,
    Basic,
    Digest,
    /// A scheme we do not recognize.
    Unrecognized,
}

/// Transaction progress. Strictly ordered; a transaction never moves
/// backward.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum TxProgress {
    New,
    RequestLine,
    RequestHeaders,
    RequestBody,
    RequestTrailer,
    Wait,
    ResponseLine,
    ResponseHeaders,
    ResponseBody,
    ResponseTrailer,
    Done,
}

/// Where a parameter was found.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum DataSource {
    QueryString,
    Body,
}

/// Which parser produced a parameter.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ParserId {
    Urlencoded,
    Multipart,
}

/// One request parameter with its provenance.
#[derive(Clone, Debug)]
pub struct Param {
    pub name: Bstr,
    pub value: Bstr,
    pub source: DataSource,
    pub parser_id: ParserId,
}

impl Param {
    pub fn new(name: Bstr, value: Bstr, source: DataSource, parser_id: ParserId) -> Self {
        Self {
            name,
            value,
            source,
            parser_id,
        }
    }
}

/// A parsed header owned by a transaction.
#[derive(Clone, Debug)]
pub struct Header {
    pub name: Bstr,
    pub value: Bstr,
    pub flags: u64,
}

impl Header {
    pub fn new(name: Bstr, value: Bstr) -> Self {
        Self::new_with_flags(name, value, 0)
    }

    pub fn new_with_flags(name: Bstr, value: Bstr, flags: u64) -> Self {
        Self { name, value, flags }
    }
}

/// One raw header line as it appeared on the wire, with NUL accounting and
/// a link to the parsed header it contributed to.
#[derive(Clone, Debug)]
pub struct HeaderLine {
    /// The raw line, terminator chomped.
    pub line: Bstr,
    /// Number of NUL bytes on the line.
    pub has_nulls: u32,
    /// Offset of the first NUL byte, -1 when there is none.
    pub first_nul_offset: i64,
    /// Anomaly flags raised for this line.
    pub flags: u64,
    /// Index into the parsed-header table, when known.
    pub header_index: Option<usize>,
}

impl HeaderLine {
    pub fn new(line: &[u8], flags: u64, header_index: Option<usize>) -> Self {
        let has_nulls = line.iter().filter(|&&c| c == 0).count() as u32;
        let first_nul_offset = line
            .iter()
            .position(|&c| c == 0)
            .map(|p| p as i64)
            .unwrap_or(-1);
        Self {
            line: Bstr::from(line),
            has_nulls,
            first_nul_offset,
            flags,
            header_index,
        }
    }
}

/// A chunk of body data passed to data hooks. `data` of `None` marks the
/// end of the entity.
pub struct Data<'a> {
    /// The transaction the data belongs to.
    pub tx: &'a mut Transaction,
    data: Option<&'a [u8]>,
    is_last: bool,
}

impl<'a> Data<'a> {
    pub fn new(tx: &'a mut Transaction, data: Option<&'a [u8]>, is_last: bool) -> Self {
        Self { tx, data, is_last }
    }

    /// The data chunk, `None` at end of entity.
    pub fn data(&self) -> Option<&[u8]> {
        self.data
    }

    /// Length of the data chunk.
    pub fn len(&self) -> usize {
        self.data.map(|d| d.len()).unwrap_or(0)
    }

    /// True when the chunk is absent or empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True for the final data event of the entity.
    pub fn is_last(&self) -> bool {
        self.is_last
    }
}

/// One request/response pair within a connection.
pub struct Transaction {
    /// Position of this transaction in the connection's transaction list.
    pub index: usize,
    /// Anomaly flags.
    pub flags: u64,
    /// Progress, which only ever moves forward.
    pub progress: TxProgress,
    /// Per-transaction configuration slice.
    pub(crate) cfg: TxConfig,

    /// Ignorable empty lines seen before the request line.
    pub request_ignored_lines: u32,
    /// The raw request line.
    pub request_line: Option<Bstr>,
    /// Request method as written.
    pub request_method: Option<Bstr>,
    /// Request method code.
    pub request_method_number: Method,
    /// Request URI as written.
    pub request_uri: Option<Bstr>,
    /// Parsed and normalized request URI.
    pub parsed_uri: Option<Uri>,
    /// Request protocol as written, e.g. "HTTP/1.1".
    pub request_protocol: Option<Bstr>,
    /// Request protocol number.
    pub request_protocol_number: Protocol,
    /// True for short-form HTTP/0.9 requests.
    pub protocol_is_simple: bool,
    /// Raw request header lines in wire order.
    pub request_header_lines: Vec<HeaderLine>,
    /// Parsed request headers.
    pub request_headers: Table<Header>,
    /// Request body framing.
    pub request_transfer_coding: TransferCoding,
    /// Declared request content encoding.
    pub request_content_encoding: ContentEncoding,
    /// Value of a valid request Content-Length header, -1 otherwise.
    pub request_content_length: i64,
    /// Lowercased MIME type of the request body, when declared.
    pub request_content_type: Option<Bstr>,
    /// Bytes of request message seen on the wire, including framing.
    pub request_message_len: i64,
    /// Bytes of request entity after de-chunking and decoding.
    pub request_entity_len: i64,
    /// Parsed request cookies.
    pub request_cookies: Table<Bstr>,
    /// Authentication scheme.
    pub request_auth_type: AuthType,
    pub request_auth_username: Option<Bstr>,
    pub request_auth_password: Option<Bstr>,
    /// Request parameters from the query string and body parsers.
    pub request_params: Table<Param>,
    /// Streaming urlencoded body parser, when attached.
    pub(crate) request_urlenp_body: Option<crate::urlencoded::UrlencodedParser>,
    /// Streaming multipart body parser, when attached.
    pub(crate) request_mpartp: Option<crate::multipart::MultipartParser>,
    /// File backing a PUT request body.
    pub(crate) put_file: Option<File>,
    /// Transaction-level request body hook, used by body parsers.
    pub hook_request_body_data: DataHook,

    /// Ignorable empty lines seen before the status line.
    pub response_ignored_lines: u32,
    /// The raw status line.
    pub response_line: Option<Bstr>,
    /// Response protocol as written.
    pub response_protocol: Option<Bstr>,
    /// Response protocol number.
    pub response_protocol_number: Protocol,
    /// Response status code as written.
    pub response_status: Option<Bstr>,
    /// Response status code, -1 until parsed.
    pub response_status_number: i32,
    /// Status text following the code.
    pub response_message: Option<Bstr>,
    /// Number of interim 100 responses seen.
    pub seen_100continue: u32,
    /// Raw response header lines in wire order.
    pub response_header_lines: Vec<HeaderLine>,
    /// Parsed response headers.
    pub response_headers: Table<Header>,
    /// Response body framing.
    pub response_transfer_coding: TransferCoding,
    /// Content encoding declared by the response headers.
    pub response_content_encoding: ContentEncoding,
    /// Content encoding actually applied while processing the body.
    pub response_content_encoding_processing: ContentEncoding,
    /// Value of a valid response Content-Length header, -1 otherwise.
    pub response_content_length: i64,
    /// Lowercased MIME type of the response body, when declared.
    pub response_content_type: Option<Bstr>,
    /// Bytes of response message seen on the wire, including framing.
    pub response_message_len: i64,
    /// Bytes of response entity after de-chunking and decompression.
    pub response_entity_len: i64,
    /// Active response body decompressor.
    pub(crate) response_decompressor: Option<Decompressor>,
    /// Shared sink the decompressor callback writes into.
    pub(crate) response_decompress_sink: Rc<RefCell<Vec<u8>>>,

    /// Same-name request header repetitions accepted so far.
    pub(crate) request_header_repetitions: u16,
    /// Same-name response header repetitions accepted so far.
    pub(crate) response_header_repetitions: u16,

    /// Opaque user data attached to the transaction.
    pub user_data: Option<Box<dyn std::any::Any>>,
}

impl Transaction {
    pub(crate) fn new(index: usize, cfg: TxConfig) -> Self {
        Self {
            index,
            flags: 0,
            progress: TxProgress::New,
            cfg,
            request_ignored_lines: 0,
            request_line: None,
            request_method: None,
            request_method_number: Method::Unknown,
            request_uri: None,
            parsed_uri: None,
            request_protocol: None,
            request_protocol_number: Protocol::Unknown,
            protocol_is_simple: false,
            request_header_lines: Vec::new(),
            request_headers: Table::with_capacity(16),
            request_transfer_coding: TransferCoding::Unknown,
            request_content_encoding: ContentEncoding::None,
            request_content_length: -1,
            request_content_type: None,
            request_message_len: 0,
            request_entity_len: 0,
            request_cookies: Table::with_capacity(4),
            request_auth_type: AuthType::Unknown,
            request_auth_username: None,
            request_auth_password: None,
            request_params: Table::with_capacity(8),
            request_urlenp_body: None,
            request_mpartp: None,
            put_file: None,
            hook_request_body_data: DataHook::new(),
            response_ignored_lines: 0,
            response_line: None,
            response_protocol: None,
            response_protocol_number: Protocol::Unknown,
            response_status: None,
            response_status_number: -1,
            response_message: None,
            seen_100continue: 0,
            response_header_lines: Vec::new(),
            response_headers: Table::with_capacity(16),
            response_transfer_coding: TransferCoding::Unknown,
            response_content_encoding: ContentEncoding::None,
            response_content_encoding_processing: ContentEncoding::None,
            response_content_length: -1,
            response_content_type: None,
            response_message_len: 0,
            response_entity_len: 0,
            response_decompressor: None,
            response_decompress_sink: Rc::new(RefCell::new(Vec::new())),
            request_header_repetitions: 0,
            response_header_repetitions: 0,
            user_data: None,
        }
    }

    /// Advance progress; progress never moves backward.
    pub fn set_progress(&mut self, progress: TxProgress) {
        if progress > self.progress {
            self.progress = progress;
        }
    }

    /// True once the request side of this transaction is complete.
    pub fn is_request_complete(&self) -> bool {
        self.progress >= TxProgress::Wait
    }

    /// True once both sides of this transaction are complete.
    pub fn is_complete(&self) -> bool {
        self.progress == TxProgress::Done
    }

    /// Typed access to attached user data.
    pub fn user_data<T: 'static>(&self) -> Option<&T> {
        self.user_data.as_ref().and_then(|d| d.downcast_ref())
    }

    /// Typed mutable access to attached user data.
    pub fn user_data_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.user_data.as_mut().and_then(|d| d.downcast_mut())
    }

    /// Attach user data to the transaction.
    pub fn set_user_data<T: 'static>(&mut self, data: T) {
        self.user_data = Some(Box::new(data));
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::new(0, TxConfig::default())
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("index", &self.index)
            .field("progress", &self.progress)
            .field("request_line", &self.request_line)
            .field("response_status_number", &self.response_status_number)
            .finish()
    }
}

impl ConnectionParser {
    /// A new inbound transaction has been created: run the
    /// transaction-start hook and move to request-line parsing.
    pub(crate) fn state_request_start(&mut self) -> Result<()> {
        let hook = self.cfg.hook_transaction_start.clone();
        let tx = self.request_tx_mut_ok()?;
        hook.run_all(tx)?;
        tx.set_progress(TxProgress::RequestLine);
        self.request_state = State::Line;
        Ok(())
    }

    /// The request line has been parsed: parse and normalize the URI and
    /// run the request-line hooks.
    pub(crate) fn state_request_line(&mut self) -> Result<()> {
        let normalize_hook = self.cfg.hook_request_uri_normalize.clone();
        let line_hook = self.cfg.hook_request_line.clone();

        let tx = self.request_tx_mut_ok()?;
        if let Some(request_uri) = &tx.request_uri {
            let (uri, uri_flags) = if tx.request_method_number == Method::Connect {
                Uri::parse_authority(request_uri.as_slice())
            } else {
                Uri::parse(request_uri.as_slice())
            };
            tx.flags.set(uri_flags);
            tx.parsed_uri = Some(uri);
        }
        hook_then_normalize(tx, &normalize_hook)?;
        let tx = self.request_tx_mut_ok()?;
        line_hook.run_all(tx)?;
        Ok(())
    }

    /// All request headers have been seen: determine body framing, parse
    /// the headers that feed the transaction context, and run the
    /// request-headers hook.
    pub(crate) fn state_request_headers(&mut self) -> Result<()> {
        let logger = self.logger.clone();
        let headers_hook = self.cfg.hook_request_headers.clone();
        let trailer_hook = self.cfg.hook_request_trailer.clone();
        let parse_cookies = self.cfg.parse_request_cookies;
        let parse_auth = self.cfg.parse_request_auth;

        let server_port = self.conn.server_port;
        let tx = self.request_tx_mut_ok()?;

        // A trailer terminator: run the trailer hook and finish the request.
        if tx.progress == TxProgress::RequestTrailer {
            trailer_hook.run_all(tx)?;
            self.request_state = State::Finalize;
            return Ok(());
        }

        // Host reconciliation between the URI and the Host header.
        reconcile_host(tx, &logger, server_port)?;

        // Content type of the request body, when declared.
        if let Some((_, ct)) = tx.request_headers.get_nocase_nozero("content-type") {
            tx.request_content_type = Some(parse_content_type(ct.value.as_slice())?);
        }

        // Declared request content encoding, recorded but not decoded.
        if let Some((_, ce)) = tx.request_headers.get_nocase_nozero("content-encoding") {
            tx.request_content_encoding = content_encoding_from_header(ce.value.as_slice());
        }

        // Body framing.
        let te = tx
            .request_headers
            .get_nocase_nozero("transfer-encoding")
            .map(|(_, h)| h.value.clone());
        let cl = tx
            .request_headers
            .get_nocase_nozero("content-length")
            .map(|(_, h)| h.value.clone());

        if te.is_some() && cl.is_some() && !tx.flags.is_set(TxFlags::REQUEST_SMUGGLING) {
            tx.flags.set(TxFlags::REQUEST_SMUGGLING);
            log_warn!(
                logger,
                LogCode::RequestSmuggling,
                "Both Transfer-Encoding and Content-Length present"
            );
        }

        if let Some(te) = &te {
            if te.index_of_nocase_nozero("chunked").is_some() {
                if !te.eq_nocase("chunked") {
                    log_warn!(
                        logger,
                        LogCode::RequestAbnormalTransferEncoding,
                        "Transfer-encoding has abnormal chunked value"
                    );
                }
                tx.request_transfer_coding = TransferCoding::Chunked;
            } else {
                tx.flags.set(TxFlags::REQUEST_INVALID_TE);
                log_warn!(
                    logger,
                    LogCode::RequestAbnormalTransferEncoding,
                    "Unknown transfer encoding in request"
                );
                tx.request_transfer_coding = TransferCoding::NoBody;
            }
        } else if let Some(cl) = &cl {
            match parse_content_length(cl.as_slice(), Some(&logger)) {
                Some(len) if len >= 0 => {
                    tx.request_transfer_coding = TransferCoding::Identity;
                    tx.request_content_length = len;
                }
                _ => {
                    tx.flags.set(TxFlags::REQUEST_INVALID_CL);
                    log_warn!(
                        logger,
                        LogCode::InvalidContentLengthFieldInRequest,
                        "Invalid C-L field in request"
                    );
                    tx.request_transfer_coding = TransferCoding::NoBody;
                }
            }
        } else {
            tx.request_transfer_coding = TransferCoding::NoBody;
        }

        if parse_cookies {
            parse_cookies_v0(tx)?;
        }
        if parse_auth && parse_authorization(tx) == Err(Status::Declined) {
            tx.flags.set(TxFlags::AUTH_INVALID);
        }

        // A PUT body is exposed through the file-data hook.
        if tx.request_method_number == Method::Put
            && tx.request_transfer_coding != TransferCoding::NoBody
        {
            let mut file = File::new(FileSource::Put, None);
            if tx.cfg.extract_request_files {
                file.create(&tx.cfg.tmpdir.clone())?;
            }
            tx.put_file = Some(file);
        }

        headers_hook.run_all(tx)?;
        let is_connect = tx.request_method_number == Method::Connect;

        self.request_state = if is_connect {
            State::ConnectCheck
        } else {
            State::BodyDetermine
        };
        Ok(())
    }

    /// The request is complete: finalize body parsers, run the
    /// request-complete hook and return the request side to idle.
    pub(crate) fn state_request_complete(&mut self) -> Result<()> {
        let had_body = {
            let tx = self.request_tx_mut_ok()?;
            !matches!(
                tx.request_transfer_coding,
                TransferCoding::Unknown | TransferCoding::NoBody
            )
        };
        if had_body {
            // End-of-entity sentinel for the body parsers.
            self.request_process_body_data(None)?;
        }
        let complete_hook = self.cfg.hook_request_complete.clone();
        let tx = self.request_tx_mut_ok()?;
        tx.set_progress(TxProgress::Wait);
        complete_hook.run_all(tx)?;
        let protocol_is_simple = tx.protocol_is_simple;
        // Nothing after an HTTP/0.9 exchange can be another request.
        self.request_state = if protocol_is_simple {
            State::IgnoreDataAfterHttp09
        } else {
            State::Idle
        };
        self.request_reset();
        Ok(())
    }

    /// Deliver request body data (or the end-of-entity sentinel) to the
    /// transaction and configuration body hooks.
    pub(crate) fn request_process_body_data(&mut self, data: Option<&[u8]>) -> Result<()> {
        // Empty chunks are internal artifacts; callbacks never see them.
        if let Some(d) = data {
            if d.is_empty() {
                return Ok(());
            }
        }
        let cfg_hook = self.cfg.hook_request_body_data.clone();
        let tx = self.request_tx_mut_ok()?;
        let tx_hook = tx.hook_request_body_data.clone();
        if let Some(d) = data {
            tx.request_entity_len = tx.request_entity_len.wrapping_add(d.len() as i64);
        }
        let is_last = data.is_none();
        let mut tx_data = Data::new(&mut *tx, data, is_last);
        tx_hook.run_all(&mut tx_data)?;
        cfg_hook.run_all(&mut tx_data)?;
        drop(tx_data);
        // A PUT body is also file data.
        if let Some(mut file) = tx.put_file.take() {
            let hook = tx.cfg.hook_request_file_data.clone();
            file.handle_file_data(&hook, data)?;
            if data.is_some() {
                tx.put_file = Some(file);
            }
        }
        Ok(())
    }

    /// A new outbound transaction is active: run the response-start hook.
    pub(crate) fn state_response_start(&mut self) -> Result<()> {
        let hook = self.cfg.hook_response_start.clone();
        let tx = self.response_tx_mut_ok()?;
        hook.run_all(tx)?;
        tx.set_progress(TxProgress::ResponseLine);
        self.response_state = State::Line;
        Ok(())
    }

    /// The status line has been parsed: run the response-line hook.
    pub(crate) fn state_response_line(&mut self) -> Result<()> {
        let hook = self.cfg.hook_response_line.clone();
        let tx = self.response_tx_mut_ok()?;
        hook.run_all(tx)?;
        Ok(())
    }

    /// All response headers have been seen: record the content type and
    /// encoding, set up decompression, and run the response-headers hook.
    pub(crate) fn state_response_headers(&mut self) -> Result<()> {
        let logger = self.logger.clone();
        let headers_hook = self.cfg.hook_response_headers.clone();
        let trailer_hook = self.cfg.hook_response_trailer.clone();
        let decompression_enabled = self.cfg.response_decompression_enabled;
        let options = self.cfg.compression_options;

        let tx = self.response_tx_mut_ok()?;

        // A trailer terminator: run the trailer hook and finish.
        if tx.progress == TxProgress::ResponseTrailer {
            trailer_hook.run_all(tx)?;
            self.response_state = State::Finalize;
            return Ok(());
        }

        if let Some((_, ct)) = tx.response_headers.get_nocase_nozero("content-type") {
            tx.response_content_type = Some(parse_content_type(ct.value.as_slice())?);
        }

        if let Some((_, ce)) = tx.response_headers.get_nocase_nozero("content-encoding") {
            let declared = content_encoding_from_header(ce.value.as_slice());
            if declared == ContentEncoding::Error {
                log_warn!(
                    logger,
                    LogCode::ContentEncodingUnknown,
                    "Unknown response content encoding"
                );
                tx.response_content_encoding = ContentEncoding::None;
            } else {
                tx.response_content_encoding = declared;
            }
        }

        // Attach a decompressor when there is a compressed body to read.
        tx.response_content_encoding_processing = if decompression_enabled
            && tx.response_transfer_coding != TransferCoding::NoBody
        {
            tx.response_content_encoding
        } else {
            ContentEncoding::None
        };
        if tx.response_content_encoding_processing != ContentEncoding::None {
            let sink = Rc::new(RefCell::new(Vec::new()));
            tx.response_decompress_sink = sink.clone();
            let callback = Box::new(move |data: Option<&[u8]>| {
                if let Some(data) = data {
                    sink.borrow_mut().extend_from_slice(data);
                    Ok(data.len())
                } else {
                    Ok(0)
                }
            });
            match Decompressor::new_with_callback(
                tx.response_content_encoding_processing,
                callback,
                options,
            ) {
                Ok(decompressor) => tx.response_decompressor = Some(decompressor),
                Err(_) => {
                    log_error!(
                        logger,
                        LogCode::DecompressionFailed,
                        "Unable to set up response decompression"
                    );
                    return Err(Status::Error);
                }
            }
        }

        headers_hook.run_all(tx)?;
        Ok(())
    }

    /// The response is complete: flush the decompressor, run the
    /// response-complete hook, and return the response side to idle.
    pub(crate) fn state_response_complete(&mut self) -> Result<()> {
        let had_body = {
            let tx = self.response_tx_mut_ok()?;
            !matches!(
                tx.response_transfer_coding,
                TransferCoding::Unknown | TransferCoding::NoBody
            )
        };
        if had_body {
            self.response_process_body_data(None)?;
        }
        let complete_hook = self.cfg.hook_response_complete.clone();
        let auto_destroy = self.cfg.tx_auto_destroy;
        let tx = self.response_tx_mut_ok()?;
        tx.set_progress(TxProgress::Done);
        complete_hook.run_all(tx)?;
        let index = tx.index;
        if auto_destroy {
            self.destroy_tx(index);
        }
        self.response_state = State::Idle;
        self.response_reset();
        if self.response_data_other_at_tx_end {
            // Unparsed request data is waiting; let it be processed before
            // the next response.
            self.response_data_other_at_tx_end = false;
            return Err(Status::DataOther);
        }
        Ok(())
    }

    /// Deliver response body data through the decompressor (when present)
    /// to the response body hooks. A `None` chunk finalizes the entity and
    /// tears the decompressor down.
    pub(crate) fn response_process_body_data(&mut self, data: Option<&[u8]>) -> Result<()> {
        if let Some(d) = data {
            if d.is_empty() {
                return Ok(());
            }
        }
        let logger = self.logger.clone();
        let cfg_hook = self.cfg.hook_response_body_data.clone();
        let time_limit = self.cfg.compression_options.get_time_limit();
        let bomb_limit = self.cfg.compression_options.get_bomb_limit();
        let bomb_ratio = self.cfg.compression_options.get_bomb_ratio();

        let tx = self.response_tx_mut_ok()?;

        match data {
            Some(d) => {
                if let Some(mut decompressor) = tx.response_decompressor.take() {
                    if decompressor.decompress(d).is_err() {
                        log_error!(
                            logger,
                            LogCode::DecompressionFailed,
                            "Response decompression failed"
                        );
                        return Err(Status::Error);
                    }
                    let out = std::mem::take(&mut *tx.response_decompress_sink.borrow_mut());
                    tx.response_entity_len = tx.response_entity_len.wrapping_add(out.len() as i64);

                    // Compression bomb guards.
                    if decompressor.time_spent() > u64::from(time_limit) {
                        log_error!(
                            logger,
                            LogCode::CompressionBomb,
                            format!(
                                "Compression bomb: spent {} us decompressing",
                                decompressor.time_spent()
                            )
                        );
                        return Err(Status::Error);
                    }
                    if tx.response_entity_len > bomb_limit
                        && tx.response_entity_len
                            > bomb_ratio.saturating_mul(std::cmp::max(tx.response_message_len, 1))
                    {
                        log_error!(
                            logger,
                            LogCode::CompressionBomb,
                            format!(
                                "Compression bomb: decompressed {} bytes out of {}",
                                tx.response_entity_len, tx.response_message_len
                            )
                        );
                        return Err(Status::Error);
                    }
                    tx.response_decompressor = Some(decompressor);
                    if !out.is_empty() {
                        let mut tx_data = Data::new(&mut *tx, Some(&out), false);
                        cfg_hook.run_all(&mut tx_data)?;
                    }
                } else {
                    tx.response_entity_len = tx.response_entity_len.wrapping_add(d.len() as i64);
                    let mut tx_data = Data::new(&mut *tx, Some(d), false);
                    cfg_hook.run_all(&mut tx_data)?;
                }
            }
            None => {
                if let Some(mut decompressor) = tx.response_decompressor.take() {
                    if decompressor.finish().is_err() {
                        log_error!(
                            logger,
                            LogCode::DecompressionFailed,
                            "Response decompression failed at end of stream"
                        );
                        return Err(Status::Error);
                    }
                    let out = std::mem::take(&mut *tx.response_decompress_sink.borrow_mut());
                    tx.response_entity_len = tx.response_entity_len.wrapping_add(out.len() as i64);
                    if !out.is_empty() {
                        let mut tx_data = Data::new(&mut *tx, Some(&out), false);
                        cfg_hook.run_all(&mut tx_data)?;
                    }
                }
                let mut tx_data = Data::new(&mut *tx, None, true);
                cfg_hook.run_all(&mut tx_data)?;
            }
        }
        Ok(())
    }
}

/// Map a Content-Encoding header value to an encoding, tolerating the
/// legacy `x-` prefixes. Unknown tokens map to `Error` so the caller can
/// decide between warning and passthrough.
pub(crate) fn content_encoding_from_header(value: &[u8]) -> ContentEncoding {
    let mut token = Bstr::from(value);
    token.make_ascii_lowercase();
    let token = crate::util::chomp(token.as_slice());
    match token {
        b"gzip" | b"x-gzip" => ContentEncoding::Gzip,
        b"deflate" | b"x-deflate" => ContentEncoding::Deflate,
        b"identity" | b"" | b"none" => ContentEncoding::None,
        _ => ContentEncoding::Error,
    }
}

/// Run the URI-normalize hook, then fill in normalization defaults: decode
/// and normalize the path, default the scheme and path.
fn hook_then_normalize(tx: &mut Transaction, normalize_hook: &crate::hook::TxHook) -> Result<()> {
    normalize_hook.run_all(tx)?;
    let decoder = tx.cfg.decoder;
    let mut tx_flags = tx.flags;
    if let Some(uri) = &mut tx.parsed_uri {
        if let Some(path) = &mut uri.path {
            decode_uri_path_inplace(&decoder, &mut tx_flags, path);
            normalize_uri_path_inplace(path);
        }
        if uri.scheme.is_none() {
            uri.scheme = Some(Bstr::from("http"));
        }
        if uri.path.is_none() {
            uri.path = Some(Bstr::from("/"));
        }
    }
    tx.flags = tx_flags;
    Ok(())
}

/// Reconcile the URI authority with the Host header, flagging a missing or
/// ambiguous host. The effective port falls back to the connection's server
/// port when neither the URI nor the Host header carries one.
fn reconcile_host(
    tx: &mut Transaction,
    logger: &crate::log::Logger,
    server_port: Option<u16>,
) -> Result<()> {
    let host_header = tx
        .request_headers
        .get_nocase_nozero("host")
        .map(|(_, h)| h.value.clone());
    match host_header {
        Some(host_value) => {
            let mut header_host: Option<Bstr> = None;
            if let Ok((_, (host, port, valid))) = parse_hostport(host_value.as_slice()) {
                if !valid || !validate_hostname(host) {
                    tx.flags.set(TxFlags::HOSTH_INVALID);
                    log_warn!(logger, LogCode::InvalidHostname, "Invalid Host header");
                }
                let mut host = Bstr::from(host);
                host.make_ascii_lowercase();
                header_host = Some(host);
                if let Some(uri) = &mut tx.parsed_uri {
                    if uri.port_number.is_none() {
                        uri.port_number = port.and_then(|(_, n)| n);
                    }
                }
            }
            if let (Some(header_host), Some(uri)) = (header_host, &mut tx.parsed_uri) {
                match &uri.hostname {
                    None => uri.hostname = Some(header_host),
                    Some(uri_host) => {
                        if !uri_host.eq_nocase(header_host.as_slice())
                            && !tx.flags.is_set(TxFlags::HOST_AMBIGUOUS)
                        {
                            tx.flags.set(TxFlags::HOST_AMBIGUOUS);
                            log_warn!(
                                logger,
                                LogCode::RequestHostAmbiguous,
                                "Host information in request headers and URI do not match"
                            );
                        }
                    }
                }
            }
        }
        None => {
            let uri_has_host = tx
                .parsed_uri
                .as_ref()
                .map(|uri| uri.hostname.is_some())
                .unwrap_or(false);
            if !uri_has_host && tx.request_protocol_number >= Protocol::V1_1 {
                tx.flags.set(TxFlags::HOST_MISSING);
                log_warn!(logger, LogCode::HostMissing, "Host information missing");
            }
        }
    }
    if let Some(uri) = &mut tx.parsed_uri {
        if uri.port_number.is_none() {
            uri.port_number = server_port;
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;

    #[test]
    fn ProgressIsMonotonic() {
        let mut tx = Transaction::for_tests();
        tx.set_progress(TxProgress::RequestHeaders);
        assert_eq!(tx.progress, TxProgress::RequestHeaders);
        tx.set_progress(TxProgress::RequestLine);
        assert_eq!(tx.progress, TxProgress::RequestHeaders);
        tx.set_progress(TxProgress::Done);
        assert_eq!(tx.progress, TxProgress::Done);
    }

    #[test]
    fn HeaderLineNulAccounting() {
        let line = HeaderLine::new(b"X: a\x00b\x00", 0, None);
        assert_eq!(line.has_nulls, 2);
        assert_eq!(line.first_nul_offset, 4);

        let clean = HeaderLine::new(b"X: ab", 0, None);
        assert_eq!(clean.has_nulls, 0);
        assert_eq!(clean.first_nul_offset, -1);
    }

    #[test]
    fn ContentEncodingFromHeader() {
        assert_eq!(content_encoding_from_header(b"gzip"), ContentEncoding::Gzip);
        assert_eq!(
            content_encoding_from_header(b"X-GZIP"),
            ContentEncoding::Gzip
        );
        assert_eq!(
            content_encoding_from_header(b"deflate"),
            ContentEncoding::Deflate
        );
        assert_eq!(
            content_encoding_from_header(b"identity"),
            ContentEncoding::None
        );
        assert_eq!(
            content_encoding_from_header(b"br"),
            ContentEncoding::Error
        );
    }

    #[test]
    fn ProtocolOrdering() {
        assert!(Protocol::V0_9 < Protocol::V1_0);
        assert!(Protocol::V1_0 < Protocol::V1_1);
        assert!(Protocol::Unknown < Protocol::V0_9);
        assert_eq!(Protocol::V1_1.number(), 101);
        assert_eq!(Protocol::V0_9.number(), 9);
        assert_eq!(Protocol::Unknown.number(), -1);
    }
}
