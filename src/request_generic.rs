use crate::bstr::Bstr;
use crate::config::Unwanted;
use crate::connection_parser::ConnectionParser;
use crate::error::Result;
use crate::headers::{parse_header_line, Flags as HeaderFlags};
use crate::log::LogCode;
use crate::log_warn;
use crate::parsers::{parse_content_length, parse_protocol};
use crate::request::Method;
use crate::transaction::{Header, Protocol};
use crate::util::{
    convert_to_method, is_space, take_ascii_whitespace, take_is_space, take_not_is_space,
    take_until_null, FlagOperations, TxFlags,
};
use nom::{bytes::complete::take_while, sequence::tuple};

/// Generic tolerant request-line parser.
pub(crate) fn parse_request_line_generic(
    connp: &mut ConnectionParser,
    request_line: &[u8],
) -> Result<()> {
    parse_request_line_generic_ex(connp, request_line, false)
}

/// Apache 2.2 request-line parser: identical to the generic one, except
/// that a NUL byte terminates the line.
pub(crate) fn parse_request_line_apache_2_2(
    connp: &mut ConnectionParser,
    request_line: &[u8],
) -> Result<()> {
    parse_request_line_generic_ex(connp, request_line, true)
}

fn parse_request_line_generic_ex(
    connp: &mut ConnectionParser,
    request_line: &[u8],
    nul_terminates: bool,
) -> Result<()> {
    let logger = connp.logger.clone();
    let leading_whitespace_unwanted = connp.cfg.requestline_leading_whitespace_unwanted;
    let mut data: &[u8] = request_line;
    if nul_terminates {
        if let Ok((_, before_null)) = take_until_null(data) {
            data = before_null;
        }
    }

    // The request method starts at the beginning of the line and ends with
    // the first whitespace character. Leading whitespace is skipped because
    // IIS accepts it. The delimiter after the method is any whitespace:
    // the RFC allows one SP but suggests tolerating SP and HT, and Apache
    // uses isspace(), which is even more permissive.
    let mut method_parser = tuple::<_, _, nom::error::Error<&[u8]>, _>((
        take_is_space,
        take_not_is_space,
        take_ascii_whitespace(),
    ));

    let (remaining, (ls, method, ws)) = match method_parser(data) {
        Ok(parsed) => parsed,
        Err(_) => return Ok(()),
    };

    let mut include_leading_whitespace = false;
    if !ls.is_empty() {
        log_warn!(
            logger,
            LogCode::RequestLineLeadingWhitespace,
            "Request line: leading whitespace"
        );
        if leading_whitespace_unwanted != Unwanted::Ignore {
            // A strict server would reject this line; keep the whitespace
            // as part of the method so inspection sees what it saw.
            include_leading_whitespace = true;
        }
    }

    let tx = connp.request_tx_mut_ok()?;
    if include_leading_whitespace {
        tx.request_method = Some(Bstr::from([ls, method].concat()));
    } else {
        tx.request_method = Some(Bstr::from(method));
    }
    tx.request_method_number = convert_to_method(method);

    if ws.iter().any(|&c| c != 0x20) {
        log_warn!(
            logger,
            LogCode::MethodDelimNonCompliant,
            "Request line: non-compliant delimiter between method and URI"
        );
    }

    if remaining.is_empty() {
        // Just a method: a short-style HTTP/0.9 request.
        tx.protocol_is_simple = true;
        tx.request_protocol_number = Protocol::V0_9;
        if tx.request_method_number == Method::Unknown {
            log_warn!(
                logger,
                LogCode::RequestLineUnknownMethod,
                "Request line: unknown method only"
            );
        }
        return Ok(());
    }

    // The URI ends at the first space; if that leaves spaces inside what
    // should be the URI, retry with the permissive whitespace set and warn.
    let mut uri_protocol_parser =
        tuple::<_, _, nom::error::Error<&[u8]>, _>((take_while(|c: u8| c != 0x20), take_is_space));
    if let Ok((mut protocol, (mut uri, _))) = uri_protocol_parser(remaining) {
        if uri.len() == remaining.len() && uri.iter().any(|&c| is_space(c)) {
            log_warn!(
                logger,
                LogCode::UriDelimNonCompliant,
                "Request line: URI contains non-compliant delimiter"
            );
            let mut retry_parser =
                tuple::<_, _, nom::error::Error<&[u8]>, _>((take_not_is_space, take_is_space));
            if let Ok((protocol2, (uri2, _))) = retry_parser(remaining) {
                uri = uri2;
                protocol = protocol2;
            }
        }
        tx.request_uri = Some(Bstr::from(uri));

        if protocol.is_empty() {
            // Method and URI only: HTTP/0.9.
            tx.protocol_is_simple = true;
            tx.request_protocol_number = Protocol::V0_9;
            if tx.request_method_number == Method::Unknown {
                log_warn!(
                    logger,
                    LogCode::RequestLineUnknownMethodNoProtocol,
                    "Request line: unknown method and no protocol"
                );
            }
            return Ok(());
        }
        // The protocol stretches to the end of the line.
        tx.request_protocol = Some(Bstr::from(protocol));
        tx.request_protocol_number = parse_protocol(protocol);
        if tx.request_protocol_number == Protocol::Unknown {
            if tx.request_method_number == Method::Unknown {
                log_warn!(
                    logger,
                    LogCode::RequestLineUnknownMethodInvalidProtocol,
                    "Request line: unknown method and invalid protocol"
                );
            } else {
                log_warn!(
                    logger,
                    LogCode::InvalidProtocol,
                    "Request line: invalid protocol"
                );
            }
        }
    }
    Ok(())
}

/// Generic request header processor: maps line anomalies onto the
/// transaction, then stores the header, joining repeated names.
pub(crate) fn process_request_header_generic(
    connp: &mut ConnectionParser,
    data: &[u8],
    folded: bool,
) -> Result<()> {
    let logger = connp.logger.clone();
    let parsed = parse_header_line(data);
    let name_flags = parsed.name.flags;
    let mut flags = 0u64;
    if folded {
        flags.set(TxFlags::FIELD_FOLDED);
    }

    let tx = connp.request_tx_mut_ok()?;
    if folded {
        tx.flags.set(TxFlags::FIELD_FOLDED);
    }
    if name_flags.is_set(HeaderFlags::NAME_TRAILING_WHITESPACE) {
        // Log only once per transaction.
        flags.set(TxFlags::FIELD_INVALID);
        if !tx.flags.is_set(TxFlags::FIELD_INVALID) {
            tx.flags.set(TxFlags::FIELD_INVALID);
            log_warn!(
                logger,
                LogCode::RequestInvalidLwsAfterName,
                "Request field invalid: LWS after name"
            );
        }
    }
    if name_flags.is_set(HeaderFlags::NAME_NON_TOKEN_CHARS) {
        flags.set(TxFlags::FIELD_INVALID);
        if !tx.flags.is_set(TxFlags::FIELD_INVALID) {
            tx.flags.set(TxFlags::FIELD_INVALID);
            log_warn!(
                logger,
                LogCode::RequestHeaderInvalid,
                "Request header name is not a token"
            );
        }
    }
    if name_flags.is_set(HeaderFlags::MISSING_COLON) {
        // The line is kept as a header with an empty name and the whole
        // line as the value, to keep the content inspectable.
        flags.set(TxFlags::FIELD_UNPARSEABLE);
        flags.set(TxFlags::FIELD_INVALID);
        if !tx.flags.is_set(TxFlags::FIELD_UNPARSEABLE) {
            tx.flags.set(TxFlags::FIELD_UNPARSEABLE);
            tx.flags.set(TxFlags::FIELD_INVALID);
            log_warn!(
                logger,
                LogCode::RequestFieldMissingColon,
                "Request field invalid: colon missing"
            );
        }
    } else if name_flags.is_set(HeaderFlags::NAME_EMPTY) {
        flags.set(TxFlags::FIELD_INVALID);
        if !tx.flags.is_set(TxFlags::FIELD_INVALID) {
            tx.flags.set(TxFlags::FIELD_INVALID);
            log_warn!(
                logger,
                LogCode::RequestInvalidEmptyName,
                "Request field invalid: empty name"
            );
        }
    }

    let header = Header::new_with_flags(
        Bstr::from(parsed.name.name),
        Bstr::from(parsed.value.value),
        flags,
    );

    let mut repeated = false;
    let reps = tx.request_header_repetitions;
    let mut update_reps = false;
    let existing_index = tx.request_headers.position_nocase(header.name.as_slice());
    if let Some((_, existing)) = tx.request_headers.get_nocase_mut(header.name.as_slice()) {
        if !existing.flags.is_set(TxFlags::FIELD_REPEATED) {
            // Second occurrence of this name.
            repeated = true;
        } else if reps < 64 {
            update_reps = true;
        } else {
            return Ok(());
        }
        // Keep track of repeated same-name headers.
        existing.flags.set(TxFlags::FIELD_REPEATED);
        // Multiple C-L headers are against the RFC, but servers may accept
        // them when the values agree; compare numerically rather than as
        // strings to ignore formatting differences.
        if header.name.cmp_nocase("content-length") == std::cmp::Ordering::Equal {
            let existing_cl = parse_content_length(existing.value.as_slice(), None);
            let new_cl = parse_content_length(header.value.as_slice(), None);
            if existing_cl.is_none() || new_cl.is_none() || existing_cl != new_cl {
                log_warn!(
                    logger,
                    LogCode::DuplicateContentLengthFieldInRequest,
                    "Ambiguous request C-L value"
                );
            }
        } else {
            existing.value.add(b", ".as_ref());
            existing.value.add(header.value.as_slice());
        }
    } else {
        let key = header.name.clone();
        tx.request_headers.add(key, header);
    }
    if update_reps {
        tx.request_header_repetitions = tx.request_header_repetitions.wrapping_add(1);
    }
    if repeated {
        tx.flags.set(TxFlags::FIELD_REPEATED);
        log_warn!(
            logger,
            LogCode::RequestHeaderRepetition,
            "Repetition for header"
        );
    }

    // Link the raw lines that built this header to its table slot.
    let header_index = existing_index.unwrap_or(tx.request_headers.size() - 1);
    for line in tx.request_header_lines.iter_mut() {
        if line.header_index.is_none() {
            line.header_index = Some(header_index);
        }
    }
    Ok(())
}
