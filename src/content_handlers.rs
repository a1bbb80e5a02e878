use crate::error::{Result, Status};
use crate::multipart::{self, MultipartParser, PartType};
use crate::transaction::{Data, DataSource, Param, ParserId, Transaction};
use crate::urlencoded::UrlencodedParser;
use crate::util::FlagOperations;

/// Parses the request query string, when there is one, into the parameter
/// table. Registered on the request-line hook.
pub(crate) fn urlencoded_callback_request_line(tx: &mut Transaction) -> Result<()> {
    let query = match tx.parsed_uri.as_ref().and_then(|uri| uri.query.clone()) {
        Some(query) if !query.is_empty() => query,
        _ => return Err(Status::Declined),
    };
    let mut parser = UrlencodedParser::new(tx.cfg.decoder);
    parser.parse_complete(query.as_slice());
    tx.flags.set(parser.flags);
    let processor = tx.cfg.parameter_processor;
    for (name, value) in parser.params {
        let name = processor.process_name(name.as_slice());
        tx.request_params.add(
            name.clone(),
            Param::new(name, value, DataSource::QueryString, ParserId::Urlencoded),
        );
    }
    Ok(())
}

/// Attaches a urlencoded body parser when the request announces a
/// urlencoded body. Registered on the request-headers hook.
pub(crate) fn urlencoded_callback_request_headers(tx: &mut Transaction) -> Result<()> {
    match &tx.request_content_type {
        Some(ct) if ct.starts_with(b"application/x-www-form-urlencoded".as_ref()) => {}
        _ => return Err(Status::Declined),
    }
    tx.request_urlenp_body = Some(UrlencodedParser::new(tx.cfg.decoder));
    tx.hook_request_body_data
        .register(urlencoded_callback_request_body_data);
    Ok(())
}

/// Feeds request body data to the urlencoded parser; on the end-of-entity
/// sentinel the parsed parameters move onto the transaction.
pub(crate) fn urlencoded_callback_request_body_data(d: &mut Data) -> Result<()> {
    let chunk = d.data().map(|bytes| bytes.to_vec());
    let tx = &mut *d.tx;
    let mut parser = match tx.request_urlenp_body.take() {
        Some(parser) => parser,
        None => return Err(Status::Declined),
    };
    match chunk {
        Some(bytes) => {
            parser.parse_partial(&bytes);
            tx.request_urlenp_body = Some(parser);
        }
        None => {
            parser.finalize();
            tx.flags.set(parser.flags);
            let processor = tx.cfg.parameter_processor;
            for (name, value) in parser.params {
                let name = processor.process_name(name.as_slice());
                tx.request_params.add(
                    name.clone(),
                    Param::new(name, value, DataSource::Body, ParserId::Urlencoded),
                );
            }
        }
    }
    Ok(())
}

/// Attaches a multipart parser when the request announces a
/// multipart/form-data body. Registered on the request-headers hook.
pub(crate) fn multipart_callback_request_headers(tx: &mut Transaction) -> Result<()> {
    match &tx.request_content_type {
        Some(ct) if ct.starts_with(b"multipart/form-data".as_ref()) => {}
        _ => return Err(Status::Declined),
    }
    // The stored content type is cut at the first delimiter, so the
    // boundary has to come from the full header value.
    let ct_value = tx
        .request_headers
        .get_nocase_nozero("content-type")
        .map(|(_, header)| header.value.clone())
        .ok_or(Status::Declined)?;
    let (boundary, flags) = match multipart::find_boundary(ct_value.as_slice()) {
        Some(found) => found,
        None => return Err(Status::Declined),
    };
    let parser = MultipartParser::new(
        boundary,
        flags,
        tx.cfg.hook_request_file_data.clone(),
        tx.cfg.extract_request_files,
        tx.cfg.tmpdir.clone(),
    );
    tx.request_mpartp = Some(parser);
    tx.hook_request_body_data
        .register(multipart_callback_request_body_data);
    Ok(())
}

/// Feeds request body data to the multipart parser; text parts become
/// request parameters when the entity ends.
pub(crate) fn multipart_callback_request_body_data(d: &mut Data) -> Result<()> {
    let chunk = d.data().map(|bytes| bytes.to_vec());
    let tx = &mut *d.tx;
    let mut parser = match tx.request_mpartp.take() {
        Some(parser) => parser,
        None => return Err(Status::Declined),
    };
    match chunk {
        Some(bytes) => {
            parser.parse_partial(&bytes)?;
            tx.request_mpartp = Some(parser);
        }
        None => {
            parser.finalize()?;
            let processor = tx.cfg.parameter_processor;
            for part in &parser.parts {
                if part.part_type == PartType::Text {
                    let name = processor.process_name(part.name.as_slice());
                    tx.request_params.add(
                        name.clone(),
                        Param::new(
                            name,
                            part.value.clone(),
                            DataSource::Body,
                            ParserId::Multipart,
                        ),
                    );
                }
            }
            // Keep the parser so file parts remain inspectable.
            tx.request_mpartp = Some(parser);
        }
    }
    Ok(())
}
