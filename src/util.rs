use crate::bstr::Bstr;
use crate::config::{DecoderConfig, ServerPersonality, UrlEncodingHandling};
use crate::error::Result;
use crate::hook::FileDataHook;
use crate::request::Method;
use nom::{
    bytes::complete::{take_till as complete_take_till, take_while as complete_take_while},
    bytes::streaming::{take as streaming_take, take_till as streaming_take_till},
    combinator::map,
    sequence::tuple,
    IResult,
};
use std::io::Write;
use std::path::Path;
use tempfile::{Builder, NamedTempFile};

/// Helpers for setting and testing bit flags.
pub trait FlagOperations<T> {
    /// Inserts the specified flags.
    fn set(&mut self, other: T);
    /// Removes the specified flags.
    fn unset(&mut self, other: T);
    /// Determine if the specified flags are set.
    fn is_set(&self, other: T) -> bool;
}

impl FlagOperations<u8> for u8 {
    fn set(&mut self, other: u8) {
        *self |= other;
    }
    fn unset(&mut self, other: u8) {
        *self &= !other;
    }
    fn is_set(&self, other: u8) -> bool {
        self & other != 0
    }
}

impl FlagOperations<u64> for u64 {
    fn set(&mut self, other: u64) {
        *self |= other;
    }
    fn unset(&mut self, other: u64) {
        *self &= !other;
    }
    fn is_set(&self, other: u64) -> bool {
        self & other != 0
    }
}

/// Transaction anomaly flags.
///
/// Header flags and transaction flags share this namespace: the same bit may
/// be raised on the offending header and on the transaction that carries it.
pub struct TxFlags;

impl TxFlags {
    /// A field could not be split into name and value.
    pub const FIELD_UNPARSEABLE: u64 = 0x0000_0000_0004;
    /// A field name broke the token rules.
    pub const FIELD_INVALID: u64 = 0x0000_0000_0008;
    /// A field value was continued over multiple lines.
    pub const FIELD_FOLDED: u64 = 0x0000_0000_0010;
    /// The same field name appeared more than once.
    pub const FIELD_REPEATED: u64 = 0x0000_0000_0020;
    /// A field crossed the soft length limit.
    pub const FIELD_LONG: u64 = 0x0000_0000_0040;
    /// A raw NUL byte appeared inside a field line.
    pub const FIELD_RAW_NUL: u64 = 0x0000_0000_0080;
    /// Both Content-Length and Transfer-Encoding were present.
    pub const REQUEST_SMUGGLING: u64 = 0x0000_0000_0100;
    /// A continuation line appeared with no header to continue.
    pub const INVALID_FOLDING: u64 = 0x0000_0000_0200;
    /// The transfer-encoding was not something we recognize.
    pub const REQUEST_INVALID_TE: u64 = 0x0000_0000_0400;
    /// The message head spanned more than one input chunk.
    pub const MULTI_PACKET_HEAD: u64 = 0x0000_0000_0800;
    /// Neither the URI nor a Host header supplied a host.
    pub const HOST_MISSING: u64 = 0x0000_0000_1000;
    /// URI host and Host header disagree.
    pub const HOST_AMBIGUOUS: u64 = 0x0000_0000_2000;
    /// A chunk length could not be parsed.
    pub const INVALID_CHUNKING: u64 = 0x0000_0000_4000;
    pub const PATH_ENCODED_NUL: u64 = 0x0000_0000_8000;
    pub const PATH_RAW_NUL: u64 = 0x0000_0001_0000;
    pub const PATH_INVALID_ENCODING: u64 = 0x0000_0002_0000;
    pub const PATH_INVALID: u64 = 0x0000_0004_0000;
    pub const PATH_OVERLONG_U: u64 = 0x0000_0008_0000;
    pub const PATH_ENCODED_SEPARATOR: u64 = 0x0000_0010_0000;
    /// Range U+FF00 - U+FFEF detected.
    pub const PATH_HALF_FULL_RANGE: u64 = 0x0000_0020_0000;
    /// The response status line did not parse.
    pub const STATUS_LINE_INVALID: u64 = 0x0000_0040_0000;
    /// Host in the URI is invalid.
    pub const HOSTU_INVALID: u64 = 0x0000_0080_0000;
    /// Host in the Host header is invalid.
    pub const HOSTH_INVALID: u64 = 0x0000_0100_0000;
    pub const HOST_INVALID: u64 = Self::HOSTU_INVALID | Self::HOSTH_INVALID;
    pub const URLEN_ENCODED_NUL: u64 = 0x0000_0200_0000;
    pub const URLEN_INVALID_ENCODING: u64 = 0x0000_0400_0000;
    pub const URLEN_OVERLONG_U: u64 = 0x0000_0800_0000;
    /// Range U+FF00 - U+FFEF detected.
    pub const URLEN_HALF_FULL_RANGE: u64 = 0x0000_1000_0000;
    pub const URLEN_RAW_NUL: u64 = 0x0000_2000_0000;
    pub const REQUEST_INVALID: u64 = 0x0000_4000_0000;
    pub const REQUEST_INVALID_CL: u64 = 0x0000_8000_0000;
    pub const AUTH_INVALID: u64 = 0x0001_0000_0000;
}

/// Connection-level flags.
pub struct ConnectionFlags;

impl ConnectionFlags {
    /// Default, no flags raised.
    pub const UNKNOWN: u8 = 0x00;
    /// Seen pipelined requests.
    pub const PIPELINED: u8 = 0x01;
    /// Seen extra data after an HTTP/0.9 exchange.
    pub const HTTP_0_9_EXTRA: u8 = 0x02;
}

/// Is the byte linear white space (SP or HT)?
pub fn is_lws(c: u8) -> bool {
    c == b' ' || c == b'\t'
}

/// Is the byte an HTTP field separator?
pub fn is_separator(c: u8) -> bool {
    // separators = "(" | ")" | "<" | ">" | "@"
    // | "," | ";" | ":" | "\" | <">
    // | "/" | "[" | "]" | "?" | "="
    // | "{" | "}" | SP | HT
    matches!(
        c,
        b'(' | b')'
            | b'<'
            | b'>'
            | b'@'
            | b','
            | b';'
            | b':'
            | b'\\'
            | b'"'
            | b'/'
            | b'['
            | b']'
            | b'?'
            | b'='
            | b'{'
            | b'}'
            | b' '
            | b'\t'
    )
}

/// Is the byte a token character?
pub fn is_token(c: u8) -> bool {
    // token = 1*<any CHAR except CTLs or separators>
    (32..=126).contains(&c) && !is_separator(c)
}

/// Is the byte allowed in field content?
pub fn is_text(c: u8) -> bool {
    c >= 32 || c == b'\t'
}

/// Is the byte a white space character (SP, HT, VT, FF, CR, LF)?
pub fn is_space(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\r' | b'\n' | b'\x0b' | b'\x0c')
}

/// Remove all line terminators (LF, CR or CRLF) from the end of the line.
pub fn chomp(mut data: &[u8]) -> &[u8] {
    loop {
        match data.last() {
            Some(&b'\n') | Some(&b'\r') => data = &data[..data.len() - 1],
            _ => break,
        }
    }
    data
}

/// Is the given line empty (just a line terminator)?
pub fn is_line_empty(data: &[u8]) -> bool {
    matches!(data, b"\x0d" | b"\x0a" | b"\x0d\x0a")
}

/// Does the line consist entirely of whitespace characters?
pub fn is_line_whitespace(data: &[u8]) -> bool {
    !data.iter().any(|&c| !is_space(c))
}

/// Does the byte start a folded (continuation) line?
pub fn is_folding_char(c: u8) -> bool {
    is_lws(c) || c == 0
}

/// Is the given line a continuation of the previous one?
pub fn is_line_folded(data: &[u8]) -> bool {
    !data.is_empty() && is_folding_char(data[0])
}

/// Is the given line a header-section terminator?
///
/// IIS 5.0 accepts a whitespace-only line as a terminator; everything else
/// requires an empty line.
pub fn is_line_terminator(
    server_personality: ServerPersonality,
    data: &[u8],
    next_no_lf: bool,
) -> bool {
    if server_personality == ServerPersonality::Iis5_0 && is_line_whitespace(data) {
        return true;
    }
    if is_line_empty(data) {
        return true;
    }
    if data.len() == 2 && is_lws(data[0]) && data[1] == b'\n' {
        return next_no_lf;
    }
    false
}

/// Can the line be ignored when it appears before a request line?
pub fn is_line_ignorable(server_personality: ServerPersonality, data: &[u8]) -> bool {
    is_line_terminator(server_personality, data, false)
}

/// Take bytes up to and including the next LF; incomplete without one.
pub fn take_till_lf(data: &[u8]) -> IResult<&[u8], &[u8]> {
    map(
        tuple((streaming_take_till(|c| c == b'\n'), streaming_take(1usize))),
        |(line, lf): (&[u8], &[u8])| &data[..line.len() + lf.len()],
    )(data)
}

/// Take bytes until a NUL byte is found (or everything when there is none).
pub fn take_until_null(data: &[u8]) -> IResult<&[u8], &[u8]> {
    complete_take_till(|c| c == 0)(data)
}

/// Take any whitespace bytes (SP, HT, VT, FF, CR, LF).
pub fn take_is_space(data: &[u8]) -> IResult<&[u8], &[u8]> {
    complete_take_while(is_space)(data)
}

/// Take bytes until the next whitespace byte.
pub fn take_not_is_space(data: &[u8]) -> IResult<&[u8], &[u8]> {
    complete_take_while(|c: u8| !is_space(c))(data)
}

/// Take any linear white space (SP, HT).
pub fn take_lws(data: &[u8]) -> IResult<&[u8], &[u8]> {
    complete_take_while(is_lws)(data)
}

/// Take any ascii whitespace.
pub fn take_ascii_whitespace<'a>() -> impl Fn(&'a [u8]) -> IResult<&'a [u8], &'a [u8]> {
    move |input| complete_take_while(|c: u8| c.is_ascii_whitespace())(input)
}

/// Sentinel: input was empty after leading whitespace.
pub const NUMBER_EMPTY: i64 = -1001;
/// Sentinel: non-whitespace garbage followed the number.
pub const NUMBER_TRAILING_GARBAGE: i64 = -1002;
/// Sentinel: the number did not fit into an i64.
pub const NUMBER_OVERFLOW: i64 = -1;

/// Parse a positive integer surrounded by optional linear whitespace.
///
/// Only bases 10 and 16 are supported. Returns the parsed value, or
/// `NUMBER_EMPTY` when nothing but whitespace was supplied,
/// `NUMBER_TRAILING_GARBAGE` when something other than whitespace follows the
/// digits, and `NUMBER_OVERFLOW` when the value does not fit.
pub fn parse_positive_integer_whitespace(data: &[u8], base: u32) -> i64 {
    let (rest, _) = match take_lws(data) {
        Ok(parsed) => parsed,
        Err(_) => return NUMBER_EMPTY,
    };
    if rest.is_empty() {
        return NUMBER_EMPTY;
    }
    let mut value: i64 = 0;
    let mut digits = 0usize;
    let mut pos = 0usize;
    while pos < rest.len() {
        match (rest[pos] as char).to_digit(base) {
            Some(d) => {
                value = match value
                    .checked_mul(base as i64)
                    .and_then(|v| v.checked_add(d as i64))
                {
                    Some(v) => v,
                    None => return NUMBER_OVERFLOW,
                };
                digits += 1;
                pos += 1;
            }
            None => break,
        }
    }
    if digits == 0 {
        return NUMBER_TRAILING_GARBAGE;
    }
    // Only whitespace may follow.
    if rest[pos..].iter().any(|&c| !is_lws(c)) {
        return NUMBER_TRAILING_GARBAGE;
    }
    value
}

/// Convert a request method string into a method code.
pub fn convert_to_method(method: &[u8]) -> Method {
    match method {
        b"GET" => Method::Get,
        b"HEAD" => Method::Head,
        b"PUT" => Method::Put,
        b"POST" => Method::Post,
        b"DELETE" => Method::Delete,
        b"CONNECT" => Method::Connect,
        b"OPTIONS" => Method::Options,
        b"TRACE" => Method::Trace,
        b"PATCH" => Method::Patch,
        b"PROPFIND" => Method::Propfind,
        b"PROPPATCH" => Method::Proppatch,
        b"MKCOL" => Method::Mkcol,
        b"COPY" => Method::Copy,
        b"MOVE" => Method::Move,
        b"LOCK" => Method::Lock,
        b"UNLOCK" => Method::Unlock,
        b"VERSION-CONTROL" => Method::VersionControl,
        b"CHECKOUT" => Method::Checkout,
        b"UNCHECKOUT" => Method::Uncheckout,
        b"CHECKIN" => Method::Checkin,
        b"UPDATE" => Method::Update,
        b"LABEL" => Method::Label,
        b"REPORT" => Method::Report,
        b"MKWORKSPACE" => Method::Mkworkspace,
        b"MKACTIVITY" => Method::Mkactivity,
        b"BASELINE-CONTROL" => Method::BaselineControl,
        b"MERGE" => Method::Merge,
        _ => Method::Unknown,
    }
}

/// Convert a port slice to a number; `None` when invalid or zero.
pub fn convert_port(port: &[u8]) -> Option<u16> {
    if port.is_empty() {
        return None;
    }
    let s = std::str::from_utf8(port).ok()?;
    match s.parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(n) => Some(n),
    }
}

/// Sanity check a hostname: either a bracketed IPv6 literal or labels of
/// alphanumeric/hyphen/underscore characters separated by dots.
pub fn validate_hostname(host: &[u8]) -> bool {
    if host.is_empty() || host.len() > 255 {
        return false;
    }
    if host.starts_with(b"[") {
        if !host.ends_with(b"]") {
            return false;
        }
        return host[1..host.len() - 1]
            .iter()
            .all(|&c| c.is_ascii_hexdigit() || c == b':' || c == b'.');
    }
    for label in host.split(|&c| c == b'.') {
        if label.len() > 63 {
            return false;
        }
        if !label
            .iter()
            .all(|&c| c.is_ascii_alphanumeric() || c == b'-' || c == b'_')
        {
            return false;
        }
    }
    true
}

/// Decide whether a would-be response line is really body data. Browsers
/// render anything that does not start with `HTTP` as a body, and so do we.
pub fn treat_response_line_as_body(data: &[u8]) -> bool {
    let mut pos = 0;
    while pos < data.len() && (is_space(data[pos]) || data[pos] == 0) {
        pos += 1;
    }
    !data[pos..].starts_with(b"HTTP")
}

/// Where an extracted file came from.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FileSource {
    /// A multipart/form-data file part.
    Multipart,
    /// The body of a PUT request.
    Put,
}

/// A file observed inside HTTP traffic, optionally spooled to disk.
#[derive(Debug)]
pub struct File {
    /// Where this file came from.
    pub source: FileSource,
    /// File name, as provided in the Content-Disposition part header.
    pub filename: Option<Bstr>,
    /// Number of file bytes seen so far.
    pub len: usize,
    /// The backing temporary file, when extraction is enabled.
    tmpfile: Option<NamedTempFile>,
}

impl File {
    /// New file record with no backing storage.
    pub fn new(source: FileSource, filename: Option<Bstr>) -> File {
        File {
            source,
            filename,
            len: 0,
            tmpfile: None,
        }
    }

    /// Create the backing temporary file in the given directory.
    pub fn create(&mut self, dir: &Path) -> Result<()> {
        self.tmpfile = Some(
            Builder::new()
                .prefix("httap-extracted-file-")
                .rand_bytes(5)
                .tempfile_in(dir)?,
        );
        Ok(())
    }

    /// Append data to the backing file, when one exists.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if let Some(tmpfile) = &mut self.tmpfile {
            tmpfile.write_all(data)?;
        }
        Ok(())
    }

    /// Path of the backing file, when one exists.
    pub fn tmpfile_path(&self) -> Option<&Path> {
        self.tmpfile.as_ref().map(|t| t.path())
    }

    /// Account for new data, spool it, and run the file-data hook.
    pub fn handle_file_data(&mut self, hook: &FileDataHook, data: Option<&[u8]>) -> Result<()> {
        if let Some(data) = data {
            self.len = self.len.wrapping_add(data.len());
            self.write(data)?;
        }
        let mut file_data = FileData::new(self, data);
        hook.run_all(&mut file_data)
    }
}

/// One chunk of file data handed to the file-data hook. A `None` data chunk
/// signals the end of the file.
pub struct FileData<'a> {
    /// File information.
    pub file: &'a File,
    /// The data chunk, or `None` at end of file.
    pub data: Option<&'a [u8]>,
}

impl<'a> FileData<'a> {
    pub fn new(file: &'a File, data: Option<&'a [u8]>) -> Self {
        FileData { file, data }
    }
}

/// Convert two hexadecimal characters into a byte. The caller guarantees the
/// input holds at least two bytes; invalid input decodes happily.
fn x2c(data: &[u8]) -> u8 {
    let hi = data[0];
    let lo = data[1];
    let hi = if hi >= b'A' { (hi & 0xdf) - b'A' + 10 } else { hi - b'0' };
    let lo = if lo >= b'A' { (lo & 0xdf) - b'A' + 10 } else { lo - b'0' };
    hi.wrapping_mul(16).wrapping_add(lo)
}

/// Decode a `%uHHHH` sequence to a single byte, flagging overlong and
/// half/full-width range use. The caller guarantees four hex digits.
fn decode_u_encoding(hex: &[u8]) -> (u8, u64) {
    let c1 = x2c(&hex[0..2]);
    let c2 = x2c(&hex[2..4]);
    let mut flags = 0;
    if c1 == 0 {
        flags.set(TxFlags::URLEN_OVERLONG_U);
        (c2, flags)
    } else {
        if c1 == 0xff && c2 <= 0xef {
            flags.set(TxFlags::URLEN_HALF_FULL_RANGE);
        }
        // Without a transcoder map the low byte is the best approximation.
        (c2, flags)
    }
}

/// Decode a URL-encoded parameter value in place, following the decoder
/// configuration for `%u`, NUL, and invalid-encoding handling. Raised
/// `URLEN_*` flags are merged into `flags`.
pub fn urldecode_inplace(cfg: &DecoderConfig, input: &mut Bstr, flags: &mut u64) {
    let data = input.as_slice();
    let mut out = Vec::with_capacity(data.len());
    let mut pos = 0;
    while pos < data.len() {
        let c = data[pos];
        if c == b'%' {
            let rest = &data[pos + 1..];
            if cfg.u_encoding_decode
                && rest.len() >= 5
                && (rest[0] == b'u' || rest[0] == b'U')
                && rest[1..5].iter().all(|b| b.is_ascii_hexdigit())
            {
                let (byte, f) = decode_u_encoding(&rest[1..5]);
                flags.set(f);
                if byte == 0 {
                    flags.set(TxFlags::URLEN_ENCODED_NUL);
                    if cfg.nul_encoded_terminates {
                        break;
                    }
                }
                out.push(byte);
                pos += 6;
            } else if rest.len() >= 2
                && rest[0].is_ascii_hexdigit()
                && rest[1].is_ascii_hexdigit()
            {
                let byte = x2c(&rest[0..2]);
                if byte == 0 {
                    flags.set(TxFlags::URLEN_ENCODED_NUL);
                    if cfg.nul_encoded_terminates {
                        break;
                    }
                }
                out.push(byte);
                pos += 3;
            } else {
                // Invalid encoding.
                flags.set(TxFlags::URLEN_INVALID_ENCODING);
                match cfg.url_encoding_invalid_handling {
                    UrlEncodingHandling::PreservePercent => {
                        out.push(b'%');
                        pos += 1;
                    }
                    UrlEncodingHandling::RemovePercent => {
                        pos += 1;
                    }
                    UrlEncodingHandling::ProcessInvalid => {
                        if rest.len() >= 2 {
                            out.push(x2c(&rest[0..2]));
                            pos += 3;
                        } else {
                            out.push(b'%');
                            pos += 1;
                        }
                    }
                }
            }
        } else if c == b'+' && cfg.plusspace_decode {
            out.push(b' ');
            pos += 1;
        } else if c == 0 {
            flags.set(TxFlags::URLEN_RAW_NUL);
            if cfg.nul_raw_terminates {
                break;
            }
            out.push(c);
            pos += 1;
        } else {
            out.push(c);
            pos += 1;
        }
    }
    input.clear();
    input.add(out);
}

/// Decode a request path in place, mapping anomalies to `PATH_*` flags and
/// applying the configured separator conversions.
pub fn decode_uri_path_inplace(cfg: &DecoderConfig, flags: &mut u64, path: &mut Bstr) {
    let data = path.as_slice();
    let mut out: Vec<u8> = Vec::with_capacity(data.len());
    let mut pos = 0;
    while pos < data.len() {
        let c = data[pos];
        if c == b'%' {
            let rest = &data[pos + 1..];
            if cfg.u_encoding_decode
                && rest.len() >= 5
                && (rest[0] == b'u' || rest[0] == b'U')
                && rest[1..5].iter().all(|b| b.is_ascii_hexdigit())
            {
                let (byte, uflags) = decode_u_encoding(&rest[1..5]);
                if uflags.is_set(TxFlags::URLEN_OVERLONG_U) {
                    flags.set(TxFlags::PATH_OVERLONG_U);
                }
                if uflags.is_set(TxFlags::URLEN_HALF_FULL_RANGE) {
                    flags.set(TxFlags::PATH_HALF_FULL_RANGE);
                }
                push_path_byte(cfg, flags, &mut out, byte, true);
                pos += 6;
            } else if rest.len() >= 2
                && rest[0].is_ascii_hexdigit()
                && rest[1].is_ascii_hexdigit()
            {
                let byte = x2c(&rest[0..2]);
                push_path_byte(cfg, flags, &mut out, byte, true);
                pos += 3;
            } else {
                flags.set(TxFlags::PATH_INVALID_ENCODING);
                match cfg.url_encoding_invalid_handling {
                    UrlEncodingHandling::PreservePercent => {
                        out.push(b'%');
                        pos += 1;
                    }
                    UrlEncodingHandling::RemovePercent => {
                        pos += 1;
                    }
                    UrlEncodingHandling::ProcessInvalid => {
                        if rest.len() >= 2 {
                            let byte = x2c(&rest[0..2]);
                            push_path_byte(cfg, flags, &mut out, byte, true);
                            pos += 3;
                        } else {
                            out.push(b'%');
                            pos += 1;
                        }
                    }
                }
            }
        } else {
            push_path_byte(cfg, flags, &mut out, c, false);
            pos += 1;
        }
    }
    if cfg.path_separators_compress {
        let mut compressed: Vec<u8> = Vec::with_capacity(out.len());
        for b in out {
            if b == b'/' && compressed.last() == Some(&b'/') {
                continue;
            }
            compressed.push(b);
        }
        out = compressed;
    }
    path.clear();
    path.add(out);
}

/// Append one (possibly decoded) path byte, applying NUL policy, backslash
/// conversion, encoded-separator policy and lowercase conversion.
fn push_path_byte(cfg: &DecoderConfig, flags: &mut u64, out: &mut Vec<u8>, byte: u8, encoded: bool) {
    let mut byte = byte;
    if byte == 0 {
        if encoded {
            flags.set(TxFlags::PATH_ENCODED_NUL);
            if cfg.nul_encoded_terminates {
                return;
            }
        } else {
            flags.set(TxFlags::PATH_RAW_NUL);
            if cfg.nul_raw_terminates {
                return;
            }
        }
    }
    if byte == b'\\' && cfg.backslash_convert_slashes {
        byte = b'/';
    }
    if encoded && (byte == b'/' || (byte == b'\\' && cfg.backslash_convert_slashes)) {
        flags.set(TxFlags::PATH_ENCODED_SEPARATOR);
        if !cfg.path_separators_decode {
            // Keep the original percent form for an encoded separator.
            out.extend_from_slice(if byte == b'/' { b"%2f" } else { b"%5c" });
            return;
        }
    }
    if cfg.convert_lowercase {
        byte = byte.to_ascii_lowercase();
    }
    out.push(byte);
}

/// RFC 3986 remove-dot-segments, performed in place.
pub fn normalize_uri_path_inplace(path: &mut Bstr) {
    let data = path.as_slice();
    let absolute = data.starts_with(b"/");
    let mut segments: Vec<&[u8]> = Vec::new();
    for segment in data.split(|&c| c == b'/') {
        match segment {
            b"." => {}
            b".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    let mut out: Vec<u8> = Vec::with_capacity(data.len());
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            out.push(b'/');
        }
        out.extend_from_slice(segment);
    }
    if absolute && !out.starts_with(b"/") {
        out.insert(0, b'/');
    }
    path.clear();
    path.add(out);
}
