use crate::bstr::Bstr;
use crate::connection_parser::{ConnectionParser, State, StreamState};
use crate::error::{Result, Status};
use crate::log::LogCode;
use crate::parsers::parse_chunked_length;
use crate::parsers::parse_content_length;
use crate::request::Method;
use crate::transaction::{HeaderLine, Protocol, TransferCoding, TxProgress};
use crate::util::{
    chomp, is_line_folded, is_line_ignorable, is_line_terminator, take_lws, take_till_lf,
    treat_response_line_as_body, FlagOperations, TxFlags,
};
use crate::{log_error, log_warn};
use std::io::{Seek, SeekFrom};

impl ConnectionParser {
    /// Enforce the soft and hard field-length limits on the response side.
    pub(crate) fn check_response_field_limit(&mut self, len: usize) -> Result<()> {
        let soft = self.cfg.field_limit_soft;
        let hard = self.cfg.field_limit_hard;
        let logger = self.logger.clone();
        if len > hard {
            log_error!(
                logger,
                LogCode::ResponseFieldTooLong,
                format!("Response field over the hard limit: size {} limit {}.", len, hard)
            );
            return Err(Status::Error);
        }
        if len >= soft {
            if let Ok(tx) = self.response_tx_mut_ok() {
                if !tx.flags.is_set(TxFlags::FIELD_LONG) {
                    tx.flags.set(TxFlags::FIELD_LONG);
                    log_warn!(
                        logger,
                        LogCode::ResponseFieldSoftLimit,
                        format!(
                            "Response field over the soft limit: size {} limit {}.",
                            len, soft
                        )
                    );
                }
            }
        }
        Ok(())
    }

    /// Buffer a partial response line for the next chunk.
    pub(crate) fn handle_response_absent_lf(&mut self, data: &[u8]) -> Result<()> {
        self.response_curr_data.seek(SeekFrom::End(0))?;
        self.check_response_field_limit(self.response_buf.len() + data.len())?;
        self.response_buf.add(data);
        Err(Status::DataBuffer)
    }

    /// The response idle state matches the upcoming response with the next
    /// transaction produced by the request side.
    pub(crate) fn response_idle(&mut self) -> Result<()> {
        if self.response_curr_data.position() as i64 >= self.response_curr_len() {
            return Err(Status::Data);
        }
        let index = self.response_next_tx_index;
        if self.conn.tx(index).is_none() {
            // Nothing on the request side to pair this response with: the
            // two directions are desynchronized.
            log_error!(
                self.logger,
                LogCode::UnableToMatchResponseToRequest,
                "Unable to match response to request"
            );
            return Err(Status::Error);
        }
        self.set_response_tx_id(Some(index));
        self.response_next_tx_index += 1;
        self.response_reset();
        self.state_response_start()
    }

    /// Accumulate and process the status line.
    pub(crate) fn response_line(&mut self, data: &[u8]) -> Result<()> {
        match take_till_lf(data) {
            Ok((_, line)) => {
                self.response_curr_data
                    .seek(SeekFrom::Current(line.len() as i64))?;
                self.response_line_complete(line)
            }
            _ => {
                if self.response_status == StreamState::Closed {
                    self.response_curr_data.seek(SeekFrom::End(0))?;
                    self.response_line_complete(data)
                } else {
                    self.handle_response_absent_lf(data)
                }
            }
        }
    }

    /// Parse one complete status line, or reinterpret the bytes as body
    /// data when they cannot be a status line.
    fn response_line_complete(&mut self, line: &[u8]) -> Result<()> {
        self.check_response_field_limit(self.response_buf.len() + line.len())?;
        let mut data = std::mem::take(&mut self.response_buf);
        data.add(line);
        if data.is_empty() {
            return Err(Status::Data);
        }

        // The response to an HTTP/0.9 request is all body, from the very
        // first byte.
        if self.response_tx_mut_ok()?.protocol_is_simple {
            let tx = self.response_tx_mut_ok()?;
            tx.response_transfer_coding = TransferCoding::Identity;
            tx.set_progress(TxProgress::ResponseBody);
            tx.response_message_len = tx.response_message_len.wrapping_add(data.len() as i64);
            self.response_body_data_left = -1;
            self.response_state = State::BodyIdentityStreamClose;
            return self.response_process_body_data(Some(data.as_slice()));
        }

        if is_line_ignorable(self.cfg.server_personality, &data) {
            if self.response_status == StreamState::Closed {
                self.response_state = State::Finalize;
            }
            let tx = self.response_tx_mut_ok()?;
            tx.response_ignored_lines = tx.response_ignored_lines.wrapping_add(1);
            return Ok(());
        }

        let data = chomp(&data);
        // If the line does not even look like a status line, process it as
        // a body because that is what browsers do.
        if treat_response_line_as_body(data) {
            let tx = self.response_tx_mut_ok()?;
            tx.response_transfer_coding = TransferCoding::Identity;
            tx.set_progress(TxProgress::ResponseBody);
            tx.response_message_len = tx.response_message_len.wrapping_add(data.len() as i64);
            self.response_body_data_left = -1;
            self.response_state = State::BodyIdentityStreamClose;
            return self.response_process_body_data(Some(data));
        }

        self.response_tx_mut_ok()?.response_line = Some(Bstr::from(data));
        let parse_response_line = self.personality.parse_response_line;
        parse_response_line(self, data)?;
        self.state_response_line()?;
        self.response_state = State::Headers;
        self.response_tx_mut_ok()?
            .set_progress(TxProgress::ResponseHeaders);
        Ok(())
    }

    /// Accumulate response header lines until the terminator.
    pub(crate) fn response_headers(&mut self, data: &[u8]) -> Result<()> {
        let personality = self.cfg.server_personality;
        let process_response_header = self.personality.process_response_header;
        let mut rest = data;
        loop {
            if self.response_status == StreamState::Closed {
                if let Some((header, folded)) = self.response_header.take() {
                    process_response_header(self, header.as_slice(), folded)?;
                }
                self.response_buf.clear();
                self.response_tx_mut_ok()?
                    .set_progress(TxProgress::ResponseTrailer);
                return self.state_response_headers();
            }
            match take_till_lf(rest) {
                Ok((remaining, line)) => {
                    self.response_curr_data
                        .seek(SeekFrom::Current(line.len() as i64))?;
                    self.check_response_field_limit(self.response_buf.len() + line.len())?;
                    let mut data = std::mem::take(&mut self.response_buf);
                    data.add(line);
                    rest = remaining;

                    if is_line_terminator(personality, &data, false) {
                        // End of this header section.
                        if let Some((header, folded)) = self.response_header.take() {
                            process_response_header(self, header.as_slice(), folded)?;
                        }
                        let in_trailer = self.response_tx_mut_ok()?.progress
                            == TxProgress::ResponseTrailer;
                        if in_trailer {
                            return self.state_response_headers();
                        }
                        self.response_state = State::BodyDetermine;
                        return Ok(());
                    }

                    let chomped = chomp(&data);
                    let folded_line = is_line_folded(chomped);
                    self.record_response_header_line(chomped, folded_line)?;

                    if !folded_line {
                        if let Some((header, folded)) = self.response_header.take() {
                            process_response_header(self, header.as_slice(), folded)?;
                        }
                        self.response_header = Some((Bstr::from(chomped), false));
                    } else if let Some((header, folded)) = &mut self.response_header {
                        let (value, _) = take_lws(chomped).unwrap_or((chomped, b"".as_ref()));
                        header.add(b" ".as_ref());
                        header.add(value);
                        *folded = true;
                    } else {
                        let logger = self.logger.clone();
                        let tx = self.response_tx_mut_ok()?;
                        if !tx.flags.is_set(TxFlags::INVALID_FOLDING) {
                            tx.flags.set(TxFlags::INVALID_FOLDING);
                            log_warn!(
                                logger,
                                LogCode::InvalidResponseFieldFolding,
                                "Invalid response field folding"
                            );
                        }
                        self.response_header = Some((Bstr::from(chomped), false));
                    }
                }
                _ => return self.handle_response_absent_lf(rest),
            }
        }
    }

    /// Record one raw response header line with NUL accounting.
    fn record_response_header_line(&mut self, line: &[u8], folded: bool) -> Result<()> {
        let logger = self.logger.clone();
        let mut flags = 0u64;
        if folded {
            flags.set(TxFlags::FIELD_FOLDED);
        }
        let record = HeaderLine::new(line, flags, None);
        let has_nulls = record.has_nulls > 0;
        let tx = self.response_tx_mut_ok()?;
        tx.response_header_lines.push(record);
        if has_nulls && !tx.flags.is_set(TxFlags::FIELD_RAW_NUL) {
            tx.flags.set(TxFlags::FIELD_RAW_NUL);
            log_warn!(
                logger,
                LogCode::ResponseFieldNul,
                "Response header contains a NUL byte"
            );
        }
        Ok(())
    }

    /// Decide the response body framing, in the order prescribed by the
    /// message-length rules.
    pub(crate) fn response_body_determine(&mut self) -> Result<()> {
        let logger = self.logger.clone();

        let (method, status, protocol, te, cl, seen_100continue, multipart_byteranges) = {
            let tx = self.response_tx_mut_ok()?;
            let te = tx
                .response_headers
                .get_nocase_nozero("transfer-encoding")
                .map(|(_, h)| h.value.clone());
            let cl = tx
                .response_headers
                .get_nocase_nozero("content-length")
                .map(|(_, h)| (h.value.clone(), h.flags));
            let multipart_byteranges = tx
                .response_headers
                .get_nocase_nozero("content-type")
                .and_then(|(_, ct)| crate::parsers::parse_content_type(ct.value.as_slice()).ok())
                .map(|mime| mime.index_of_nocase("multipart/byteranges").is_some())
                .unwrap_or(false);
            (
                tx.request_method_number,
                tx.response_status_number,
                tx.response_protocol_number,
                te,
                cl,
                tx.seen_100continue,
                multipart_byteranges,
            )
        };

        // A CONNECT response decides the fate of the whole stream.
        if method == Method::Connect {
            if (200..=299).contains(&status) {
                // Tunnel established: wrap this transaction up; the request
                // side will probe the remaining stream data.
                self.response_tx_mut_ok()?.response_transfer_coding = TransferCoding::NoBody;
                self.response_state = State::Finalize;
                return self.state_response_headers();
            } else if status == 407 {
                // Proxy authentication required; request parsing resumes.
                if self.request_status != StreamState::Error {
                    self.request_status = StreamState::Data;
                }
            } else {
                // Failed CONNECT: unblock request parsing, but stop at the
                // end of this transaction so the stream stays in sync.
                if self.request_status != StreamState::Error {
                    self.request_status = StreamState::Data;
                }
                self.response_data_other_at_tx_end = true;
            }
        }

        // "101 Switching Protocols" means the stream stops being HTTP after
        // the empty line; treat it like a tunnel.
        if status == 101 {
            if te.is_none() && cl.is_none() {
                self.response_tx_mut_ok()?.response_transfer_coding = TransferCoding::NoBody;
                self.response_state = State::Finalize;
                if self.request_status != StreamState::Error {
                    self.request_status = StreamState::Tunnel;
                }
                self.response_status = StreamState::Tunnel;
                return self.state_response_headers();
            }
            log_warn!(
                logger,
                LogCode::SwitchingProtoWithContentLength,
                "Switching protocols with Content-Length"
            );
        }
        // An interim 1xx response: discard what was collected and expect
        // another status line. A second interim response is an error.
        else if (100..=199).contains(&status)
            && method != Method::Head
            && te.is_none()
            && cl.is_none()
        {
            if seen_100continue > 0 {
                log_error!(
                    logger,
                    LogCode::ContinueAlreadySeen,
                    "Already seen 100-Continue"
                );
                return Err(Status::Error);
            }
            let tx = self.response_tx_mut_ok()?;
            tx.response_headers.clear();
            tx.response_header_lines.clear();
            tx.seen_100continue += 1;
            self.response_state = State::Line;
            return Ok(());
        }

        // Messages that never carry a body: any response to HEAD, plus
        // 1xx/204/304 (unless a server sends body framing headers anyway).
        let mut no_body = false;
        if method == Method::Head {
            no_body = true;
        } else if (100..=199).contains(&status) || status == 204 || status == 304 {
            if te.is_none() && cl.is_none() {
                no_body = true;
            } else {
                log_warn!(
                    logger,
                    LogCode::ResponseBodyUnexpected,
                    "Unexpected response body"
                );
            }
        }
        if no_body {
            self.response_tx_mut_ok()?.response_transfer_coding = TransferCoding::NoBody;
            self.response_state = State::Finalize;
            return self.state_response_headers();
        }

        // There is a body.
        let chunked = te
            .as_ref()
            .map(|te| te.index_of_nocase_nozero("chunked").is_some())
            .unwrap_or(false);
        if chunked {
            let te = te.as_ref().ok_or(Status::Error)?;
            if !te.eq_nocase("chunked") {
                log_warn!(
                    logger,
                    LogCode::ResponseAbnormalTransferEncoding,
                    "Transfer-encoding has abnormal chunked value"
                );
            }
            // Chunked is HTTP/1.1 only, but browsers accept it from older
            // protocols as well.
            if protocol < Protocol::V1_1 {
                log_warn!(
                    logger,
                    LogCode::ResponseChunkedOldProto,
                    "Chunked transfer-encoding on HTTP/0.9 or HTTP/1.0"
                );
            }
            let has_cl = cl.is_some();
            let tx = self.response_tx_mut_ok()?;
            tx.response_transfer_coding = TransferCoding::Chunked;
            if has_cl {
                tx.flags.set(TxFlags::REQUEST_SMUGGLING);
            }
            tx.set_progress(TxProgress::ResponseBody);
            self.response_state = State::BodyChunkedLength;
        } else if let Some((cl_value, cl_flags)) = cl {
            match parse_content_length(cl_value.as_slice(), Some(&logger)) {
                Some(len) => {
                    let tx = self.response_tx_mut_ok()?;
                    tx.response_transfer_coding = TransferCoding::Identity;
                    if cl_flags.is_set(TxFlags::FIELD_REPEATED) {
                        tx.flags.set(TxFlags::REQUEST_SMUGGLING);
                    }
                    tx.response_content_length = len;
                    if len != 0 {
                        tx.set_progress(TxProgress::ResponseBody);
                    }
                    self.response_content_length = len;
                    self.response_body_data_left = len;
                    self.response_state = if len != 0 {
                        State::BodyIdentityClKnown
                    } else {
                        State::Finalize
                    };
                }
                None => {
                    log_error!(
                        logger,
                        LogCode::InvalidContentLengthFieldInResponse,
                        "Invalid C-L field in response"
                    );
                    return Err(Status::Error);
                }
            }
        } else {
            // Neither framing header is present.
            if multipart_byteranges {
                // Self-delimiting multipart/byteranges bodies are not
                // supported; fall back to reading until close.
                log_error!(
                    logger,
                    LogCode::ResponseMultipartByteranges,
                    "C-T multipart/byteranges in responses not supported"
                );
            }
            let tx = self.response_tx_mut_ok()?;
            tx.response_transfer_coding = TransferCoding::Identity;
            tx.set_progress(TxProgress::ResponseBody);
            self.response_body_data_left = -1;
            self.response_state = State::BodyIdentityStreamClose;
        }
        self.state_response_headers()
    }

    /// Extract a response chunk length.
    pub(crate) fn response_body_chunked_length(&mut self, data: &[u8]) -> Result<()> {
        match take_till_lf(data) {
            Ok((_, line)) => {
                self.response_curr_data
                    .seek(SeekFrom::Current(line.len() as i64))?;
                self.check_response_field_limit(self.response_buf.len() + line.len())?;
                let mut data = std::mem::take(&mut self.response_buf);
                data.add(line);
                let tx = self.response_tx_mut_ok()?;
                tx.response_message_len = tx.response_message_len.wrapping_add(data.len() as i64);
                let chunked_length = parse_chunked_length(chomp(&data));
                self.response_chunked_length = chunked_length;
                if chunked_length > 0 {
                    self.response_state = State::BodyChunkedData;
                } else if chunked_length == 0 {
                    self.response_state = State::Headers;
                    self.response_tx_mut_ok()?
                        .set_progress(TxProgress::ResponseTrailer);
                } else {
                    let logger = self.logger.clone();
                    let tx = self.response_tx_mut_ok()?;
                    tx.flags.set(TxFlags::INVALID_CHUNKING);
                    log_error!(
                        logger,
                        LogCode::InvalidResponseChunkLen,
                        "Response chunk encoding: invalid chunk length"
                    );
                    return Err(Status::Error);
                }
                Ok(())
            }
            _ => self.handle_response_absent_lf(data),
        }
    }

    /// Forward response chunk data to the body hooks.
    pub(crate) fn response_body_chunked_data(&mut self, data: &[u8]) -> Result<()> {
        let bytes_to_consume = std::cmp::min(data.len(), self.response_chunked_length as usize);
        if bytes_to_consume == 0 {
            return Err(Status::Data);
        }
        self.response_process_body_data(Some(&data[..bytes_to_consume]))?;
        self.response_curr_data
            .seek(SeekFrom::Current(bytes_to_consume as i64))?;
        let tx = self.response_tx_mut_ok()?;
        tx.response_message_len = tx
            .response_message_len
            .wrapping_add(bytes_to_consume as i64);
        self.response_chunked_length -= bytes_to_consume as i64;
        if self.response_chunked_length == 0 {
            self.response_state = State::BodyChunkedDataEnd;
            return Ok(());
        }
        Err(Status::Data)
    }

    /// Consume the line terminator after response chunk data.
    pub(crate) fn response_body_chunked_data_end(&mut self, data: &[u8]) -> Result<()> {
        match take_till_lf(data) {
            Ok((_, line)) => {
                self.response_curr_data
                    .seek(SeekFrom::Current(line.len() as i64))?;
                let tx = self.response_tx_mut_ok()?;
                tx.response_message_len = tx.response_message_len.wrapping_add(line.len() as i64);
                self.response_state = State::BodyChunkedLength;
                Ok(())
            }
            _ => {
                let tx = self.response_tx_mut_ok()?;
                tx.response_message_len = tx.response_message_len.wrapping_add(data.len() as i64);
                self.handle_response_absent_lf(data)
            }
        }
    }

    /// Identity response body of known length.
    pub(crate) fn response_body_identity_cl_known(&mut self, data: &[u8]) -> Result<()> {
        if self.response_status == StreamState::Closed {
            // The stream ended before the declared length was seen.
            if !data.is_empty() {
                self.response_process_body_data(Some(data))?;
                let len = data.len() as i64;
                self.response_curr_data.seek(SeekFrom::End(0))?;
                let tx = self.response_tx_mut_ok()?;
                tx.response_message_len = tx.response_message_len.wrapping_add(len);
            }
            self.response_state = State::Finalize;
            return Ok(());
        }
        let bytes_to_consume = std::cmp::min(data.len(), self.response_body_data_left as usize);
        if bytes_to_consume == 0 {
            return Err(Status::Data);
        }
        self.response_process_body_data(Some(&data[..bytes_to_consume]))?;
        self.response_curr_data
            .seek(SeekFrom::Current(bytes_to_consume as i64))?;
        let tx = self.response_tx_mut_ok()?;
        tx.response_message_len = tx
            .response_message_len
            .wrapping_add(bytes_to_consume as i64);
        self.response_body_data_left -= bytes_to_consume as i64;
        if self.response_body_data_left == 0 {
            self.response_state = State::Finalize;
            return Ok(());
        }
        Err(Status::Data)
    }

    /// Identity response body of unknown length: everything until the
    /// stream closes belongs to the body.
    pub(crate) fn response_body_identity_stream_close(&mut self, data: &[u8]) -> Result<()> {
        if !data.is_empty() {
            self.response_process_body_data(Some(data))?;
            let len = data.len() as i64;
            self.response_curr_data.seek(SeekFrom::End(0))?;
            let tx = self.response_tx_mut_ok()?;
            tx.response_message_len = tx.response_message_len.wrapping_add(len);
        }
        if self.response_status == StreamState::Closed {
            self.response_state = State::Finalize;
            return Ok(());
        }
        Err(Status::Data)
    }

    /// Wrap up a response, checking whether trailing bytes look like
    /// another status line or stray body data.
    pub(crate) fn response_finalize(&mut self, data: &[u8]) -> Result<()> {
        let logger = self.logger.clone();
        let mut work = data;
        if self.response_status != StreamState::Closed {
            let next_byte = data.first();
            if next_byte.is_none() {
                return self.state_response_complete();
            }
            if next_byte == Some(&b'\n') {
                self.response_curr_data
                    .seek(SeekFrom::Current(work.len() as i64))?;
            } else {
                match take_till_lf(data) {
                    Ok((_, line)) => {
                        self.response_curr_data
                            .seek(SeekFrom::Current(line.len() as i64))?;
                        work = line;
                    }
                    _ => return self.handle_response_absent_lf(data),
                }
            }
        }
        if !self.response_buf.is_empty() {
            self.check_response_field_limit(self.response_buf.len() + work.len())?;
        }
        let buf_len = self.response_buf.len();
        let mut data = std::mem::take(&mut self.response_buf);
        data.add(work);
        if data.is_empty() {
            // Closing.
            return self.state_response_complete();
        }
        if treat_response_line_as_body(&data) {
            log_warn!(
                logger,
                LogCode::ResponseBodyUnexpected,
                "Unexpected response body"
            );
            return self.response_process_body_data(Some(data.as_slice()));
        }
        // The bytes were not used: restore the buffer and unread the line
        // so that the next response sees it.
        self.response_buf.add(&data[..buf_len]);
        let unread = data.len() as i64;
        if (self.response_curr_data.position() as i64) < unread {
            self.response_curr_data.set_position(0);
        } else {
            self.response_curr_data.seek(SeekFrom::Current(-unread))?;
        }
        self.state_response_complete()
    }
}
