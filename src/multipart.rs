use crate::bstr::Bstr;
use crate::error::Result;
use crate::headers::parse_header_line;
use crate::hook::FileDataHook;
use crate::table::Table;
use crate::util::{chomp, is_lws, take_till_lf, File, FileSource, FlagOperations};
use bstr::ByteSlice;
use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_till, take_while, take_while1},
    combinator::{map, opt},
    sequence::tuple,
    IResult,
};
use std::path::PathBuf;

/// Multipart parsing anomalies.
pub struct MultipartFlags;

impl MultipartFlags {
    /// The boundary parameter was quoted.
    pub const BOUNDARY_QUOTED: u64 = 0x0001;
    /// The boundary parameter looked unusual (empty, or with odd characters).
    pub const BOUNDARY_INVALID: u64 = 0x0002;
    /// The body ended without a closing boundary.
    pub const INCOMPLETE: u64 = 0x0004;
    /// A part had an unparseable header.
    pub const PART_HEADER_INVALID: u64 = 0x0008;
    /// A part without a Content-Disposition name.
    pub const PART_UNKNOWN: u64 = 0x0010;
}

/// The kind of one body part.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PartType {
    /// A form field carrying an inline value.
    Text,
    /// A file upload.
    File,
    /// A part whose disposition we could not read.
    Unknown,
}

/// One part of a multipart/form-data body.
pub struct Part {
    pub part_type: PartType,
    /// Field name from Content-Disposition.
    pub name: Bstr,
    /// Accumulated value, for text parts.
    pub value: Bstr,
    /// File name from Content-Disposition, for file parts.
    pub filename: Option<Bstr>,
    /// Part headers.
    pub headers: Table<Bstr>,
    /// Backing file, for file parts.
    pub file: Option<File>,
}

impl Part {
    fn new() -> Self {
        Self {
            part_type: PartType::Unknown,
            name: Bstr::new(),
            value: Bstr::new(),
            filename: None,
            headers: Table::with_capacity(4),
            file: None,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum ParserState {
    /// Looking for the first boundary.
    Preamble,
    /// Reading part headers.
    PartHeaders,
    /// Reading part data.
    PartData,
    /// Past the closing boundary.
    Done,
}

/// Streaming multipart/form-data parser.
///
/// Text part values accumulate on the part; file part data streams through
/// the file-data hook (and to disk when extraction is enabled) as it
/// arrives.
pub struct MultipartParser {
    /// The boundary, without the leading `--`.
    pub boundary: Bstr,
    /// Parsing anomalies.
    pub flags: u64,
    /// Completed parts.
    pub parts: Vec<Part>,
    buffer: Bstr,
    state: ParserState,
    current: Option<Part>,
    hook_file_data: FileDataHook,
    extract_files: bool,
    tmpdir: PathBuf,
}

/// Extract the boundary parameter from a Content-Type header value.
///
/// Returns the boundary and the anomaly flags raised while reading it.
pub fn find_boundary(content_type: &[u8]) -> Option<(Bstr, u64)> {
    let lowered = content_type.to_ascii_lowercase();
    let at = lowered.find(b"boundary")?;
    let mut flags = 0;
    let rest = &content_type[at + b"boundary".len()..];
    let parsed: IResult<&[u8], (&[u8], Option<&[u8]>, &[u8], Option<&[u8]>)> = tuple((
        take_while(is_lws),
        opt(tag(b"=" as &[u8])),
        take_while(is_lws),
        opt(tag(b"\"" as &[u8])),
    ))(rest);
    let (rest, (_, equals, _, quote)) = parsed.ok()?;
    if equals.is_none() {
        flags.set(MultipartFlags::BOUNDARY_INVALID);
    }
    if quote.is_some() {
        flags.set(MultipartFlags::BOUNDARY_QUOTED);
    }
    let value: IResult<&[u8], &[u8]> = if quote.is_some() {
        take_till(|c| c == b'"')(rest)
    } else {
        take_till(|c| c == b';' || c == b',' || is_lws(c) || c == b'\r' || c == b'\n')(rest)
    };
    let (_, boundary) = value.ok()?;
    if boundary.is_empty() {
        flags.set(MultipartFlags::BOUNDARY_INVALID);
        return None;
    }
    if !boundary
        .iter()
        .all(|&c| c.is_ascii_alphanumeric() || b"'()+_,-./:=? ".contains(&c))
    {
        flags.set(MultipartFlags::BOUNDARY_INVALID);
    }
    Some((Bstr::from(boundary), flags))
}

/// Parse a Content-Disposition part header value into (name, filename).
fn parse_content_disposition(value: &[u8]) -> Option<(Option<Bstr>, Option<Bstr>)> {
    let parsed: IResult<&[u8], &[u8]> = tag_no_case("form-data")(value);
    let (mut rest, _) = parsed.ok()?;
    let mut name = None;
    let mut filename = None;
    loop {
        let param: IResult<&[u8], (&[u8], &[u8], &[u8], &[u8], &[u8])> = tuple((
            take_while(|c| is_lws(c) || c == b';'),
            take_while1(|c: u8| c.is_ascii_alphanumeric() || c == b'-' || c == b'_'),
            take_while(is_lws),
            tag(b"=" as &[u8]),
            take_while(is_lws),
        ))(rest);
        let (after, (_, key, _, _, _)) = match param {
            Ok(parsed) => parsed,
            Err(_) => break,
        };
        let value_parser: IResult<&[u8], &[u8]> = alt((
            map(
                tuple((tag(b"\"" as &[u8]), take_till(|c| c == b'"'), opt(tag(b"\"" as &[u8])))),
                |(_, v, _): (&[u8], &[u8], Option<&[u8]>)| v,
            ),
            take_till(|c| c == b';'),
        ))(after);
        let (after, v) = match value_parser {
            Ok(parsed) => parsed,
            Err(_) => break,
        };
        if key.eq_ignore_ascii_case(b"name") {
            name = Some(Bstr::from(v));
        } else if key.eq_ignore_ascii_case(b"filename") {
            filename = Some(Bstr::from(v));
        }
        rest = after;
        if rest.is_empty() {
            break;
        }
    }
    Some((name, filename))
}

impl MultipartParser {
    pub fn new(
        boundary: Bstr,
        flags: u64,
        hook_file_data: FileDataHook,
        extract_files: bool,
        tmpdir: PathBuf,
    ) -> Self {
        Self {
            boundary,
            flags,
            parts: Vec::new(),
            buffer: Bstr::new(),
            state: ParserState::Preamble,
            current: None,
            hook_file_data,
            extract_files,
            tmpdir,
        }
    }

    /// Process one chunk of body data.
    pub fn parse_partial(&mut self, data: &[u8]) -> Result<()> {
        self.buffer.add(data);
        self.process_buffer(false)
    }

    /// Signal end of data: close whatever is in progress.
    pub fn finalize(&mut self) -> Result<()> {
        self.process_buffer(true)?;
        if self.state != ParserState::Done {
            self.flags.set(MultipartFlags::INCOMPLETE);
        }
        if self.current.is_some() {
            let leftover = std::mem::take(&mut self.buffer);
            self.append_part_data(leftover.as_slice())?;
            self.close_part()?;
        }
        self.buffer.clear();
        Ok(())
    }

    /// The delimiter as it appears on a boundary line.
    fn delimiter(&self) -> Vec<u8> {
        let mut d = Vec::with_capacity(self.boundary.len() + 2);
        d.extend_from_slice(b"--");
        d.extend_from_slice(self.boundary.as_slice());
        d
    }

    fn process_buffer(&mut self, at_end: bool) -> Result<()> {
        let delimiter = self.delimiter();
        loop {
            match self.state {
                ParserState::Preamble => {
                    let found = self.buffer.as_slice().find(&delimiter);
                    match found {
                        Some(at) => {
                            if !self.consume_boundary_line(at, at + delimiter.len(), at_end)? {
                                return Ok(());
                            }
                        }
                        None => {
                            if at_end {
                                // No boundary in the whole body.
                                self.flags.set(MultipartFlags::INCOMPLETE);
                                self.state = ParserState::Done;
                                self.buffer.clear();
                                return Ok(());
                            }
                            // Keep only a tail that could hold a partial
                            // delimiter.
                            let keep = delimiter.len() + 2;
                            if self.buffer.len() > keep {
                                let tail =
                                    self.buffer.as_slice()[self.buffer.len() - keep..].to_vec();
                                self.buffer = Bstr::from(tail);
                            }
                            return Ok(());
                        }
                    }
                }
                ParserState::PartHeaders => {
                    if !self.process_part_headers(at_end)? {
                        return Ok(());
                    }
                }
                ParserState::PartData => {
                    if !self.process_part_data(at_end, &delimiter)? {
                        return Ok(());
                    }
                }
                ParserState::Done => {
                    // Anything after the closing boundary is epilogue.
                    self.buffer.clear();
                    return Ok(());
                }
            }
        }
    }

    /// Consume a boundary line whose delimiter ends at `delim_end`. Returns
    /// false when more data is needed.
    fn consume_boundary_line(
        &mut self,
        _delim_start: usize,
        delim_end: usize,
        at_end: bool,
    ) -> Result<bool> {
        let rest = &self.buffer.as_slice()[delim_end..];
        if rest.starts_with(b"--") {
            // The closing boundary.
            self.state = ParserState::Done;
            self.buffer.clear();
            return Ok(true);
        }
        match take_till_lf(rest) {
            Ok((_, line)) => {
                let consumed = delim_end + line.len();
                self.buffer = Bstr::from(self.buffer.as_slice()[consumed..].to_vec());
                self.state = ParserState::PartHeaders;
                Ok(true)
            }
            Err(_) => {
                if at_end {
                    self.flags.set(MultipartFlags::INCOMPLETE);
                    self.state = ParserState::Done;
                    self.buffer.clear();
                    return Ok(true);
                }
                Ok(false)
            }
        }
    }

    /// Parse part headers until the empty line. Returns false when more
    /// data is needed.
    fn process_part_headers(&mut self, at_end: bool) -> Result<bool> {
        let mut part = self.current.take().unwrap_or_else(Part::new);
        let mut view = self.buffer.as_slice();
        loop {
            match take_till_lf(view) {
                Ok((remaining, line)) => {
                    let chomped = chomp(line);
                    if chomped.is_empty() {
                        // End of part headers; classify the part.
                        let new_buffer = remaining.to_vec();
                        self.start_part_body(&mut part)?;
                        self.buffer = Bstr::from(new_buffer);
                        self.current = Some(part);
                        self.state = ParserState::PartData;
                        return Ok(true);
                    }
                    let header = parse_header_line(chomped);
                    if header.name.name.is_empty() {
                        self.flags.set(MultipartFlags::PART_HEADER_INVALID);
                    } else {
                        part.headers
                            .add(Bstr::from(header.name.name), Bstr::from(header.value.value));
                    }
                    view = remaining;
                }
                Err(_) => {
                    if at_end {
                        self.flags.set(MultipartFlags::PART_HEADER_INVALID);
                        self.buffer.clear();
                        self.current = Some(part);
                        self.state = ParserState::Done;
                        return Ok(true);
                    }
                    // Wait for the rest of the header section.
                    self.buffer = Bstr::from(view.to_vec());
                    self.current = Some(part);
                    return Ok(false);
                }
            }
        }
    }

    /// Classify a part from its headers and open its backing file when
    /// needed.
    fn start_part_body(&mut self, part: &mut Part) -> Result<()> {
        let disposition = part
            .headers
            .get_nocase("content-disposition")
            .map(|(_, v)| v.clone());
        match disposition.and_then(|v| parse_content_disposition(v.as_slice())) {
            Some((name, filename)) => {
                if let Some(name) = name {
                    part.name = name;
                } else {
                    self.flags.set(MultipartFlags::PART_UNKNOWN);
                }
                match filename {
                    Some(filename) => {
                        part.part_type = PartType::File;
                        let mut file = File::new(FileSource::Multipart, Some(filename.clone()));
                        if self.extract_files {
                            file.create(&self.tmpdir)?;
                        }
                        part.filename = Some(filename);
                        part.file = Some(file);
                    }
                    None => part.part_type = PartType::Text,
                }
            }
            None => {
                self.flags.set(MultipartFlags::PART_UNKNOWN);
                part.part_type = PartType::Unknown;
            }
        }
        Ok(())
    }

    /// Process part data up to the next boundary. Returns false when more
    /// data is needed.
    fn process_part_data(&mut self, at_end: bool, delimiter: &[u8]) -> Result<bool> {
        // A boundary line is preceded by a line break that belongs to the
        // delimiter, not to the part data.
        let view = self.buffer.as_slice();
        if let Some(at) = view.find(delimiter) {
            // Trim the line break before the delimiter from the data.
            let mut data_end = at;
            if data_end >= 1 && view[data_end - 1] == b'\n' {
                data_end -= 1;
                if data_end >= 1 && view[data_end - 1] == b'\r' {
                    data_end -= 1;
                }
            }
            let data = view[..data_end].to_vec();
            self.append_part_data(&data)?;
            self.close_part()?;
            let delim_end = at + delimiter.len();
            return self.consume_boundary_line(at, delim_end, at_end);
        }
        if at_end {
            let leftover = std::mem::take(&mut self.buffer);
            self.append_part_data(leftover.as_slice())?;
            self.close_part()?;
            self.flags.set(MultipartFlags::INCOMPLETE);
            self.state = ParserState::Done;
            return Ok(true);
        }
        // Stream out everything that cannot be part of a split delimiter.
        let keep = delimiter.len() + 4;
        if view.len() > keep {
            let emit = view[..view.len() - keep].to_vec();
            let tail = view[view.len() - keep..].to_vec();
            self.append_part_data(&emit)?;
            self.buffer = Bstr::from(tail);
        }
        Ok(false)
    }

    /// Route data to the current part: text parts accumulate, file parts
    /// stream through the file-data hook.
    fn append_part_data(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let hook = self.hook_file_data.clone();
        if let Some(part) = &mut self.current {
            match part.part_type {
                PartType::File => {
                    if let Some(file) = &mut part.file {
                        file.handle_file_data(&hook, Some(data))?;
                    }
                }
                _ => part.value.add(data),
            }
        }
        Ok(())
    }

    /// Close the current part and move it to the completed list.
    fn close_part(&mut self) -> Result<()> {
        let hook = self.hook_file_data.clone();
        if let Some(mut part) = self.current.take() {
            if let Some(file) = &mut part.file {
                // End-of-file event.
                file.handle_file_data(&hook, None)?;
            }
            self.parts.push(part);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;

    fn parser(boundary: &str) -> MultipartParser {
        MultipartParser::new(
            Bstr::from(boundary),
            0,
            FileDataHook::new(),
            false,
            std::env::temp_dir(),
        )
    }

    #[test]
    fn FindBoundary() {
        let (b, flags) =
            find_boundary(b"multipart/form-data; boundary=0123456789").unwrap();
        assert_eq!(b, "0123456789");
        assert_eq!(flags, 0);

        let (b, flags) =
            find_boundary(b"multipart/form-data; boundary=\"quoted\" ").unwrap();
        assert_eq!(b, "quoted");
        assert!(flags.is_set(MultipartFlags::BOUNDARY_QUOTED));

        assert!(find_boundary(b"multipart/form-data").is_none());
        assert!(find_boundary(b"multipart/form-data; boundary=").is_none());
    }

    #[test]
    fn ContentDisposition() {
        let (name, filename) =
            parse_content_disposition(b"form-data; name=\"field1\"").unwrap();
        assert_eq!(name.unwrap(), "field1");
        assert!(filename.is_none());

        let (name, filename) =
            parse_content_disposition(b"form-data; name=\"f\"; filename=\"pic.jpg\"").unwrap();
        assert_eq!(name.unwrap(), "f");
        assert_eq!(filename.unwrap(), "pic.jpg");

        assert!(parse_content_disposition(b"attachment; name=\"x\"").is_none());
    }

    #[test]
    fn TwoTextParts() {
        let mut p = parser("xyz");
        let body = b"--xyz\r\n\
Content-Disposition: form-data; name=\"a\"\r\n\
\r\n\
value-a\r\n\
--xyz\r\n\
Content-Disposition: form-data; name=\"b\"\r\n\
\r\n\
value-b\r\n\
--xyz--\r\n";
        p.parse_partial(body).unwrap();
        p.finalize().unwrap();
        assert_eq!(p.parts.len(), 2);
        assert_eq!(p.parts[0].name, "a");
        assert_eq!(p.parts[0].value, "value-a");
        assert_eq!(p.parts[1].name, "b");
        assert_eq!(p.parts[1].value, "value-b");
        assert!(!p.flags.is_set(MultipartFlags::INCOMPLETE));
    }

    #[test]
    fn PartsSurviveChunkBoundaries() {
        let mut p = parser("xyz");
        let body: &[u8] = b"--xyz\r\n\
Content-Disposition: form-data; name=\"a\"\r\n\
\r\n\
split value here\r\n\
--xyz--\r\n";
        for chunk in body.chunks(7) {
            p.parse_partial(chunk).unwrap();
        }
        p.finalize().unwrap();
        assert_eq!(p.parts.len(), 1);
        assert_eq!(p.parts[0].value, "split value here");
    }

    #[test]
    fn FilePart() {
        let mut p = parser("bnd");
        let body = b"--bnd\r\n\
Content-Disposition: form-data; name=\"up\"; filename=\"f.bin\"\r\n\
Content-Type: application/octet-stream\r\n\
\r\n\
FILEDATA\r\n\
--bnd--\r\n";
        p.parse_partial(body).unwrap();
        p.finalize().unwrap();
        assert_eq!(p.parts.len(), 1);
        assert_eq!(p.parts[0].part_type, PartType::File);
        assert_eq!(p.parts[0].filename.as_ref().unwrap(), &"f.bin");
        assert_eq!(p.parts[0].file.as_ref().unwrap().len, 8);
        // File data does not accumulate on the part value.
        assert!(p.parts[0].value.is_empty());
    }

    #[test]
    fn MissingClosingBoundary() {
        let mut p = parser("xyz");
        p.parse_partial(b"--xyz\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\npartial")
            .unwrap();
        p.finalize().unwrap();
        assert!(p.flags.is_set(MultipartFlags::INCOMPLETE));
        assert_eq!(p.parts.len(), 1);
        assert_eq!(p.parts[0].value, "partial");
    }
}
