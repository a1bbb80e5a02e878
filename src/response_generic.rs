use crate::bstr::Bstr;
use crate::connection_parser::ConnectionParser;
use crate::error::Result;
use crate::headers::{parse_header_line, Flags as HeaderFlags};
use crate::log::LogCode;
use crate::log_warn;
use crate::parsers::{parse_content_length, parse_protocol, parse_status};
use crate::transaction::{Header, Protocol};
use crate::util::{take_is_space, take_not_is_space, FlagOperations, TxFlags};
use nom::{sequence::tuple};

/// Generic response status-line parser: protocol, status code, message.
pub(crate) fn parse_response_line_generic(
    connp: &mut ConnectionParser,
    response_line: &[u8],
) -> Result<()> {
    let logger = connp.logger.clone();
    let tx = connp.response_tx_mut_ok()?;
    tx.response_protocol = None;
    tx.response_protocol_number = Protocol::Unknown;
    tx.response_status = None;
    tx.response_status_number = -1;
    tx.response_message = None;

    let mut parser = tuple::<_, _, nom::error::Error<&[u8]>, _>((
        take_is_space,
        take_not_is_space,
        take_is_space,
        take_not_is_space,
        take_is_space,
    ));
    let (message, (_, protocol, _, status, _)) = match parser(response_line) {
        Ok(parsed) => parsed,
        Err(_) => return Ok(()),
    };
    if protocol.is_empty() {
        return Ok(());
    }
    tx.response_protocol = Some(Bstr::from(protocol));
    tx.response_protocol_number = parse_protocol(protocol);
    if tx.response_protocol_number == Protocol::Unknown {
        log_warn!(
            logger,
            LogCode::InvalidProtocol,
            "Response line: invalid protocol"
        );
    }
    if status.is_empty() {
        return Ok(());
    }
    tx.response_status = Some(Bstr::from(status));
    match parse_status(status) {
        Some(code) => tx.response_status_number = i32::from(code),
        None => {
            tx.response_status_number = -1;
            if !tx.flags.is_set(TxFlags::STATUS_LINE_INVALID) {
                tx.flags.set(TxFlags::STATUS_LINE_INVALID);
                log_warn!(
                    logger,
                    LogCode::ResponseInvalidStatus,
                    "Response line: invalid response status"
                );
            }
        }
    }
    // The message stretches to the end of the line.
    tx.response_message = Some(Bstr::from(message));
    Ok(())
}

/// Generic response header processor; mirrors the request-side processing
/// with response-specific message codes.
pub(crate) fn process_response_header_generic(
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

    let tx = connp.response_tx_mut_ok()?;
    if folded {
        tx.flags.set(TxFlags::FIELD_FOLDED);
    }
    if name_flags.is_set(HeaderFlags::NAME_TRAILING_WHITESPACE) {
        flags.set(TxFlags::FIELD_INVALID);
        if !tx.flags.is_set(TxFlags::FIELD_INVALID) {
            tx.flags.set(TxFlags::FIELD_INVALID);
            log_warn!(
                logger,
                LogCode::ResponseInvalidLwsAfterName,
                "Response field invalid: LWS after name"
            );
        }
    }
    if name_flags.is_set(HeaderFlags::NAME_NON_TOKEN_CHARS) {
        flags.set(TxFlags::FIELD_INVALID);
        if !tx.flags.is_set(TxFlags::FIELD_INVALID) {
            tx.flags.set(TxFlags::FIELD_INVALID);
            log_warn!(
                logger,
                LogCode::ResponseHeaderInvalid,
                "Response header name is not a token"
            );
        }
    }
    if name_flags.is_set(HeaderFlags::MISSING_COLON) {
        flags.set(TxFlags::FIELD_UNPARSEABLE);
        flags.set(TxFlags::FIELD_INVALID);
        if !tx.flags.is_set(TxFlags::FIELD_UNPARSEABLE) {
            tx.flags.set(TxFlags::FIELD_UNPARSEABLE);
            tx.flags.set(TxFlags::FIELD_INVALID);
            log_warn!(
                logger,
                LogCode::ResponseFieldMissingColon,
                "Response field invalid: colon missing"
            );
        }
    } else if name_flags.is_set(HeaderFlags::NAME_EMPTY) {
        flags.set(TxFlags::FIELD_INVALID);
        if !tx.flags.is_set(TxFlags::FIELD_INVALID) {
            tx.flags.set(TxFlags::FIELD_INVALID);
            log_warn!(
                logger,
                LogCode::ResponseInvalidEmptyName,
                "Response field invalid: empty name"
            );
        }
    }

    let header = Header::new_with_flags(
        Bstr::from(parsed.name.name),
        Bstr::from(parsed.value.value),
        flags,
    );

    let mut repeated = false;
    let reps = tx.response_header_repetitions;
    let mut update_reps = false;
    let existing_index = tx.response_headers.position_nocase(header.name.as_slice());
    if let Some((_, existing)) = tx.response_headers.get_nocase_mut(header.name.as_slice()) {
        if !existing.flags.is_set(TxFlags::FIELD_REPEATED) {
            repeated = true;
        } else if reps < 64 {
            update_reps = true;
        } else {
            return Ok(());
        }
        existing.flags.set(TxFlags::FIELD_REPEATED);
        if header.name.cmp_nocase("content-length") == std::cmp::Ordering::Equal {
            let existing_cl = parse_content_length(existing.value.as_slice(), None);
            let new_cl = parse_content_length(header.value.as_slice(), None);
            if existing_cl.is_none() || new_cl.is_none() || existing_cl != new_cl {
                log_warn!(
                    logger,
                    LogCode::DuplicateContentLengthFieldInResponse,
                    "Ambiguous response C-L value"
                );
            }
        } else {
            existing.value.add(b", ".as_ref());
            existing.value.add(header.value.as_slice());
        }
    } else {
        let key = header.name.clone();
        tx.response_headers.add(key, header);
    }
    if update_reps {
        tx.response_header_repetitions = tx.response_header_repetitions.wrapping_add(1);
    }
    if repeated {
        tx.flags.set(TxFlags::FIELD_REPEATED);
        log_warn!(
            logger,
            LogCode::ResponseHeaderRepetition,
            "Repetition for header"
        );
    }

    let header_index = existing_index.unwrap_or(tx.response_headers.size() - 1);
    for line in tx.response_header_lines.iter_mut() {
        if line.header_index.is_none() {
            line.header_index = Some(header_index);
        }
    }
    Ok(())
}
