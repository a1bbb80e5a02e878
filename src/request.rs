use crate::bstr::Bstr;
use crate::connection_parser::{ConnectionParser, State, StreamState};
use crate::error::{Result, Status};
use crate::log::LogCode;
use crate::parsers::parse_chunked_length;
use crate::transaction::{HeaderLine, TransferCoding, TxProgress};
use crate::util::{
    chomp, convert_to_method, is_line_folded, is_line_ignorable, is_line_terminator, take_is_space,
    take_lws, take_not_is_space, take_till_lf, ConnectionFlags, FlagOperations, TxFlags,
};
use crate::{log_error, log_warn};
use nom::{
    bytes::complete::take_until, character::complete::char, sequence::tuple,
};
use std::io::{Seek, SeekFrom};

/// Request method codes.
#[repr(i32)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Method {
    Get,
    Head,
    Put,
    Post,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
    Propfind,
    Proppatch,
    Mkcol,
    Copy,
    Move,
    Lock,
    Unlock,
    VersionControl,
    Checkout,
    Uncheckout,
    Checkin,
    Update,
    Label,
    Report,
    Mkworkspace,
    Mkactivity,
    BaselineControl,
    Merge,
    /// The method string did not match anything we know.
    Unknown,
}

impl Method {
    /// The numeric method code.
    pub fn number(self) -> i32 {
        self as i32
    }
}

impl ConnectionParser {
    /// Enforce the soft and hard field-length limits against an assembled
    /// line length. Crossing the soft limit flags the transaction once;
    /// crossing the hard limit is fatal for the direction.
    pub(crate) fn check_request_field_limit(&mut self, len: usize) -> Result<()> {
        let soft = self.cfg.field_limit_soft;
        let hard = self.cfg.field_limit_hard;
        let logger = self.logger.clone();
        if len > hard {
            log_error!(
                logger,
                LogCode::RequestFieldTooLong,
                format!("Request field over the hard limit: size {} limit {}.", len, hard)
            );
            return Err(Status::Error);
        }
        if len >= soft {
            if let Ok(tx) = self.request_tx_mut_ok() {
                if !tx.flags.is_set(TxFlags::FIELD_LONG) {
                    tx.flags.set(TxFlags::FIELD_LONG);
                    log_warn!(
                        logger,
                        LogCode::RequestFieldSoftLimit,
                        format!("Request field over the soft limit: size {} limit {}.", len, soft)
                    );
                }
            }
        }
        Ok(())
    }

    /// Buffer a partial line for the next chunk and ask for more data.
    pub(crate) fn handle_request_absent_lf(&mut self, data: &[u8]) -> Result<()> {
        self.request_curr_data.seek(SeekFrom::End(0))?;
        self.check_request_field_limit(self.request_buf.len() + data.len())?;
        self.request_buf.add(data);
        // The message head now spans more than one chunk.
        if matches!(self.request_state, State::Line | State::Headers) {
            if let Ok(tx) = self.request_tx_mut_ok() {
                tx.flags.set(TxFlags::MULTI_PACKET_HEAD);
            }
        }
        Err(Status::DataBuffer)
    }

    /// The idle state starts a new transaction as soon as a byte of the
    /// next request is available.
    pub(crate) fn request_idle(&mut self) -> Result<()> {
        // Start parsing a new request only once at least one byte of data
        // is available; otherwise structures would be created for requests
        // that never arrive.
        if self.request_curr_data.position() as i64 >= self.request_curr_len() {
            return Err(Status::Data);
        }
        self.create_tx()?;
        self.state_request_start()
    }

    /// Accumulate and process the request line.
    pub(crate) fn request_line(&mut self, data: &[u8]) -> Result<()> {
        match take_till_lf(data) {
            Ok((_, line)) => {
                self.request_curr_data
                    .seek(SeekFrom::Current(line.len() as i64))?;
                self.request_line_complete(line)
            }
            _ => {
                if self.request_status == StreamState::Closed {
                    self.request_curr_data.seek(SeekFrom::End(0))?;
                    self.request_line_complete(data)
                } else {
                    self.handle_request_absent_lf(data)
                }
            }
        }
    }

    /// Parse one complete request line.
    fn request_line_complete(&mut self, line: &[u8]) -> Result<()> {
        self.check_request_field_limit(self.request_buf.len() + line.len())?;
        let mut data = std::mem::take(&mut self.request_buf);
        data.add(line);
        if data.is_empty() {
            return Err(Status::Data);
        }
        if is_line_ignorable(self.cfg.server_personality, &data) {
            // An empty or whitespace line before the request line: note it
            // and move on.
            let tx = self.request_tx_mut_ok()?;
            tx.request_ignored_lines = tx.request_ignored_lines.wrapping_add(1);
            return Ok(());
        }
        let data = chomp(&data);
        self.request_tx_mut_ok()?.request_line = Some(Bstr::from(data));
        let parse_request_line = self.personality.parse_request_line;
        parse_request_line(self, data)?;
        self.state_request_line()?;
        self.request_state = State::Protocol;
        Ok(())
    }

    /// Decide between header parsing and the body-less HTTP/0.9 short form.
    pub(crate) fn request_protocol(&mut self, data: &[u8]) -> Result<()> {
        let logger = self.logger.clone();
        let tx = self.request_tx_mut_ok()?;
        if !tx.protocol_is_simple {
            tx.set_progress(TxProgress::RequestHeaders);
            self.request_state = State::Headers;
            return Ok(());
        }
        // Two tokens but followed by something that looks like a header:
        // treat the request as missing its protocol rather than as 0.9.
        let mut header_probe = tuple::<_, _, nom::error::Error<&[u8]>, _>((take_until(":"), char(':')));
        match header_probe(data) {
            Ok(_) => {
                log_warn!(
                    logger,
                    LogCode::RequestLineMissingProtocol,
                    "Request line: missing protocol"
                );
                let tx = self.request_tx_mut_ok()?;
                tx.protocol_is_simple = false;
                tx.set_progress(TxProgress::RequestHeaders);
                self.request_state = State::Headers;
            }
            Err(_) => {
                // A true short-form request has no headers and no body.
                self.request_state = State::Finalize;
            }
        }
        Ok(())
    }

    /// Accumulate request header lines, merging folded continuations, until
    /// the header-section terminator.
    pub(crate) fn request_headers(&mut self, data: &[u8]) -> Result<()> {
        let personality = self.cfg.server_personality;
        let process_request_header = self.personality.process_request_header;
        let mut rest = data;
        loop {
            if self.request_status == StreamState::Closed {
                // Parse the pending header, if any, and wrap up.
                if let Some((header, folded)) = self.request_header.take() {
                    process_request_header(self, header.as_slice(), folded)?;
                }
                self.request_buf.clear();
                self.request_tx_mut_ok()?
                    .set_progress(TxProgress::RequestTrailer);
                return self.state_request_headers();
            }
            match take_till_lf(rest) {
                Ok((remaining, line)) => {
                    self.request_curr_data
                        .seek(SeekFrom::Current(line.len() as i64))?;
                    self.check_request_field_limit(self.request_buf.len() + line.len())?;
                    let mut data = std::mem::take(&mut self.request_buf);
                    data.add(line);
                    rest = remaining;

                    if is_line_terminator(personality, &data, false) {
                        // End of the header section.
                        if let Some((header, folded)) = self.request_header.take() {
                            process_request_header(self, header.as_slice(), folded)?;
                        }
                        return self.state_request_headers();
                    }

                    let chomped = chomp(&data);
                    let folded_line = is_line_folded(chomped);
                    self.record_request_header_line(chomped, folded_line)?;

                    if !folded_line {
                        // A new header: flush the previous one first.
                        if let Some((header, folded)) = self.request_header.take() {
                            process_request_header(self, header.as_slice(), folded)?;
                        }
                        self.request_header = Some((Bstr::from(chomped), false));
                    } else if let Some((header, folded)) = &mut self.request_header {
                        // A continuation: join with a single space.
                        let (value, _) =
                            take_lws(chomped).unwrap_or((chomped, b"".as_ref()));
                        header.add(b" ".as_ref());
                        header.add(value);
                        *folded = true;
                    } else {
                        // A continuation with nothing to continue.
                        let logger = self.logger.clone();
                        let tx = self.request_tx_mut_ok()?;
                        if !tx.flags.is_set(TxFlags::INVALID_FOLDING) {
                            tx.flags.set(TxFlags::INVALID_FOLDING);
                            log_warn!(
                                logger,
                                LogCode::InvalidRequestFieldFolding,
                                "Invalid request field folding"
                            );
                        }
                        self.request_header = Some((Bstr::from(chomped), false));
                    }
                }
                _ => return self.handle_request_absent_lf(rest),
            }
        }
    }

    /// Record one raw request header line with NUL accounting.
    fn record_request_header_line(&mut self, line: &[u8], folded: bool) -> Result<()> {
        let logger = self.logger.clone();
        let mut flags = 0u64;
        if folded {
            flags.set(TxFlags::FIELD_FOLDED);
        }
        let record = HeaderLine::new(line, flags, None);
        let has_nulls = record.has_nulls > 0;
        let tx = self.request_tx_mut_ok()?;
        tx.request_header_lines.push(record);
        if has_nulls && !tx.flags.is_set(TxFlags::FIELD_RAW_NUL) {
            tx.flags.set(TxFlags::FIELD_RAW_NUL);
            log_warn!(
                logger,
                LogCode::RequestFieldNul,
                "Request header contains a NUL byte"
            );
        }
        Ok(())
    }

    /// Decide the request body framing.
    pub(crate) fn request_body_determine(&mut self) -> Result<()> {
        let (coding, content_length) = {
            let tx = self.request_tx_mut_ok()?;
            (tx.request_transfer_coding, tx.request_content_length)
        };
        match coding {
            TransferCoding::Chunked => {
                self.request_tx_mut_ok()?.set_progress(TxProgress::RequestBody);
                self.request_state = State::BodyChunkedLength;
            }
            TransferCoding::Identity => {
                self.request_content_length = content_length;
                self.request_body_data_left = content_length;
                if content_length != 0 {
                    self.request_tx_mut_ok()?.set_progress(TxProgress::RequestBody);
                    self.request_state = State::BodyIdentity;
                } else {
                    self.request_state = State::Finalize;
                }
            }
            TransferCoding::NoBody => {
                self.request_state = State::Finalize;
            }
            TransferCoding::Unknown => return Err(Status::Error),
        }
        Ok(())
    }

    /// Forward identity body bytes to the body-data hooks.
    pub(crate) fn request_body_identity(&mut self, data: &[u8]) -> Result<()> {
        let bytes_to_consume = std::cmp::min(data.len(), self.request_body_data_left as usize);
        if bytes_to_consume == 0 {
            return Err(Status::Data);
        }
        self.request_process_body_data(Some(&data[..bytes_to_consume]))?;
        self.request_curr_data
            .seek(SeekFrom::Current(bytes_to_consume as i64))?;
        let tx = self.request_tx_mut_ok()?;
        tx.request_message_len = tx.request_message_len.wrapping_add(bytes_to_consume as i64);
        self.request_body_data_left -= bytes_to_consume as i64;
        if self.request_body_data_left == 0 {
            // End of the request body.
            self.request_state = State::Finalize;
            return Ok(());
        }
        Err(Status::Data)
    }

    /// Extract a chunk length.
    pub(crate) fn request_body_chunked_length(&mut self, data: &[u8]) -> Result<()> {
        match take_till_lf(data) {
            Ok((_, line)) => {
                self.request_curr_data
                    .seek(SeekFrom::Current(line.len() as i64))?;
                self.check_request_field_limit(self.request_buf.len() + line.len())?;
                let mut data = std::mem::take(&mut self.request_buf);
                data.add(line);
                let tx = self.request_tx_mut_ok()?;
                tx.request_message_len = tx.request_message_len.wrapping_add(data.len() as i64);
                let chunked_length = parse_chunked_length(chomp(&data));
                self.request_chunked_length = chunked_length;
                if chunked_length > 0 {
                    // Chunk data follows.
                    self.request_state = State::BodyChunkedData;
                } else if chunked_length == 0 {
                    // End of the body; a trailer may follow.
                    self.request_state = State::Headers;
                    self.request_tx_mut_ok()?
                        .set_progress(TxProgress::RequestTrailer);
                } else {
                    let logger = self.logger.clone();
                    let tx = self.request_tx_mut_ok()?;
                    tx.flags.set(TxFlags::INVALID_CHUNKING);
                    log_error!(
                        logger,
                        LogCode::InvalidRequestChunkLen,
                        "Request chunk encoding: invalid chunk length"
                    );
                    return Err(Status::Error);
                }
                Ok(())
            }
            _ => self.handle_request_absent_lf(data),
        }
    }

    /// Forward chunk data to the body-data hooks.
    pub(crate) fn request_body_chunked_data(&mut self, data: &[u8]) -> Result<()> {
        let bytes_to_consume = std::cmp::min(data.len(), self.request_chunked_length as usize);
        if bytes_to_consume == 0 {
            return Err(Status::Data);
        }
        self.request_process_body_data(Some(&data[..bytes_to_consume]))?;
        self.request_curr_data
            .seek(SeekFrom::Current(bytes_to_consume as i64))?;
        let tx = self.request_tx_mut_ok()?;
        tx.request_message_len = tx.request_message_len.wrapping_add(bytes_to_consume as i64);
        self.request_chunked_length -= bytes_to_consume as i64;
        if self.request_chunked_length == 0 {
            // End of this chunk.
            self.request_state = State::BodyChunkedDataEnd;
            return Ok(());
        }
        Err(Status::Data)
    }

    /// Consume the line terminator after chunk data.
    pub(crate) fn request_body_chunked_data_end(&mut self, data: &[u8]) -> Result<()> {
        match take_till_lf(data) {
            Ok((_, line)) => {
                self.request_curr_data
                    .seek(SeekFrom::Current(line.len() as i64))?;
                let tx = self.request_tx_mut_ok()?;
                tx.request_message_len = tx.request_message_len.wrapping_add(line.len() as i64);
                self.request_state = State::BodyChunkedLength;
                Ok(())
            }
            _ => {
                let tx = self.request_tx_mut_ok()?;
                tx.request_message_len = tx.request_message_len.wrapping_add(data.len() as i64);
                self.handle_request_absent_lf(data)
            }
        }
    }

    /// A CONNECT request has no body, but parsing must wait for the
    /// response before deciding whether the tunnel was established.
    pub(crate) fn request_connect_check(&mut self) -> Result<()> {
        if self.request_tx_mut_ok()?.request_method_number == Method::Connect {
            self.request_state = State::ConnectWaitResponse;
            self.request_status = StreamState::DataOther;
            return Err(Status::DataOther);
        }
        self.request_state = State::BodyDetermine;
        Ok(())
    }

    /// Waits for the CONNECT response: a 2xx means a tunnel, anything else
    /// resumes normal parsing.
    pub(crate) fn request_connect_wait_response(&mut self) -> Result<()> {
        let tx = self.request_tx_mut_ok()?;
        if tx.progress < TxProgress::ResponseHeaders {
            return Err(Status::DataOther);
        }
        if (200..=299).contains(&tx.response_status_number) {
            // The tunnel was established: probe the remaining stream data
            // to decide whether to parse or ignore it.
            self.request_state = State::ConnectProbeData;
        } else {
            self.request_state = State::Finalize;
        }
        Ok(())
    }

    /// Look at post-CONNECT data: plain HTTP keeps being parsed, anything
    /// else switches both directions into tunnel mode.
    pub(crate) fn request_connect_probe_data(&mut self, data: &[u8]) -> Result<()> {
        let line = match take_till_lf(data) {
            Ok((_, line)) => line,
            Err(_) => {
                if data.is_empty() {
                    return Err(Status::Data);
                }
                data
            }
        };
        if !self.request_buf.is_empty() {
            self.check_request_field_limit(self.request_buf.len() + line.len())?;
        }
        // Copy; the buffered data is still needed for the next state.
        let mut buffered = self.request_buf.clone();
        buffered.add(line);

        let mut probe = tuple::<_, _, nom::error::Error<&[u8]>, _>((take_is_space, take_not_is_space));
        if let Ok((_, (_, method))) = probe(buffered.as_slice()) {
            if convert_to_method(method) == Method::Unknown {
                self.request_status = StreamState::Tunnel;
                self.response_status = StreamState::Tunnel;
            } else {
                return self.state_request_complete();
            }
        }
        Ok(())
    }

    /// Consume and ignore whatever follows an HTTP/0.9 exchange.
    pub(crate) fn request_ignore_data_after_http_0_9(&mut self) -> Result<()> {
        let bytes_left = self.request_curr_len() - self.request_curr_data.position() as i64;
        if bytes_left > 0 {
            self.conn.flags.set(ConnectionFlags::HTTP_0_9_EXTRA);
        }
        self.request_curr_data.seek(SeekFrom::End(0))?;
        Err(Status::Data)
    }

    /// Wrap up a request, probing whether trailing bytes belong to the next
    /// pipelined request or are stray body data.
    pub(crate) fn request_finalize(&mut self, data: &[u8]) -> Result<()> {
        let logger = self.logger.clone();
        // Nothing follows an HTTP/0.9 request; whatever remains is handled
        // by the ignore state.
        if self.request_tx_mut_ok()?.protocol_is_simple {
            return self.state_request_complete();
        }
        let mut work = data;
        if self.request_status != StreamState::Closed {
            let next_byte = data.first();
            if next_byte.is_none() {
                return self.state_request_complete();
            }
            if next_byte != Some(&b'\n') {
                match take_till_lf(data) {
                    Ok((_, line)) => {
                        self.request_curr_data
                            .seek(SeekFrom::Current(line.len() as i64))?;
                        work = line;
                    }
                    _ => return self.handle_request_absent_lf(data),
                }
            }
        }

        if !self.request_buf.is_empty() {
            self.check_request_field_limit(self.request_buf.len() + work.len())?;
        }
        let buf_len = self.request_buf.len();
        let mut data = std::mem::take(&mut self.request_buf);
        data.add(work);
        if data.is_empty() {
            return self.state_request_complete();
        }

        let mut probe = tuple::<_, _, nom::error::Error<&[u8]>, _>((take_is_space, take_not_is_space));
        if let Ok((_, (_, method))) = probe(data.as_slice()) {
            if method.is_empty() {
                // A whitespace-only line: treat it as stray body data.
                return self.request_process_body_data(Some(data.as_slice()));
            }
            if convert_to_method(method) == Method::Unknown {
                if self.request_body_data_left <= 0 {
                    log_warn!(
                        logger,
                        LogCode::RequestBodyUnexpected,
                        "Unexpected request body"
                    );
                } else {
                    self.request_body_data_left = 1;
                }
                // Interpret the remaining bytes as body data.
                return self.request_process_body_data(Some(data.as_slice()));
            }
            self.request_body_data_left = -1;
        }

        // This looks like the next request: restore what was buffered and
        // unread the line so the idle state picks it up.
        self.request_buf.add(&data[..buf_len]);
        let unread = data.len() as i64;
        if (self.request_curr_data.position() as i64) < unread {
            self.request_curr_data.set_position(0);
        } else {
            self.request_curr_data.seek(SeekFrom::Current(-unread))?;
        }
        self.state_request_complete()
    }
}
