use crate::util::{is_token, is_lws, FlagOperations};
use nom::{
    bytes::complete::{tag, take_till, take_while},
    combinator::map,
    sequence::tuple,
    IResult,
};

/// Anomaly flags raised while splitting a header line into name and value.
#[derive(Debug, PartialEq, Eq)]
pub struct Flags;

impl Flags {
    /// The value was continued across multiple lines.
    pub const FOLDING: u64 = 0x0001;
    /// The name was empty (a line beginning with a colon).
    pub const NAME_EMPTY: u64 = 0x0004;
    /// The value was empty.
    pub const VALUE_EMPTY: u64 = 0x0008;
    /// The name contains bytes that are not token characters.
    pub const NAME_NON_TOKEN_CHARS: u64 = 0x0010;
    /// Whitespace between the name and the colon.
    pub const NAME_TRAILING_WHITESPACE: u64 = 0x0020;
    /// Whitespace before the name.
    pub const NAME_LEADING_WHITESPACE: u64 = 0x0040;
    /// The line had no colon at all; it is treated as a value under an
    /// empty name.
    pub const MISSING_COLON: u64 = 0x0100 | Self::NAME_EMPTY;
}

/// A parsed header name and the anomalies seen while parsing it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Name {
    pub name: Vec<u8>,
    pub flags: u64,
}

/// A parsed header value and the anomalies seen while parsing it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Value {
    pub value: Vec<u8>,
    pub flags: u64,
}

/// A parsed header line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub name: Name,
    pub value: Value,
}

impl Header {
    pub fn new_with_flags(name: &[u8], name_flags: u64, value: &[u8], value_flags: u64) -> Self {
        Self {
            name: Name {
                name: name.to_vec(),
                flags: name_flags,
            },
            value: Value {
                value: value.to_vec(),
                flags: value_flags,
            },
        }
    }
}

/// Trim linear whitespace from both ends of a slice.
fn trimmed(input: &[u8]) -> &[u8] {
    let start = input.iter().position(|&c| !is_lws(c)).unwrap_or(input.len());
    let end = input
        .iter()
        .rposition(|&c| !is_lws(c))
        .map(|p| p + 1)
        .unwrap_or(start);
    &input[start..end]
}

/// Split a line at the first colon.
fn name_value_split(input: &[u8]) -> IResult<&[u8], (&[u8], &[u8])> {
    map(
        tuple((take_till(|c| c == b':'), tag(":"), take_while(|_| true))),
        |(name, _, value): (&[u8], &[u8], &[u8])| (name, value),
    )(input)
}

/// Parse one complete, already unfolded header line into a name and a value.
///
/// The input must have its line terminator chomped. This never fails: a line
/// with no colon comes back as an empty name with `MISSING_COLON` and the
/// whole line as the value, which keeps malformed content inspectable.
pub fn parse_header_line(line: &[u8]) -> Header {
    match name_value_split(line) {
        Ok((_, (raw_name, raw_value))) => {
            let mut name_flags = 0;
            let name = trimmed(raw_name);
            if name.is_empty() {
                name_flags.set(Flags::NAME_EMPTY);
            } else {
                if is_lws(raw_name[0]) {
                    name_flags.set(Flags::NAME_LEADING_WHITESPACE);
                }
                if is_lws(raw_name[raw_name.len() - 1]) {
                    name_flags.set(Flags::NAME_TRAILING_WHITESPACE);
                }
                if !name.iter().all(|&c| is_token(c)) {
                    name_flags.set(Flags::NAME_NON_TOKEN_CHARS);
                }
            }
            let mut value_flags = 0;
            let value = trimmed(raw_value);
            if value.is_empty() {
                value_flags.set(Flags::VALUE_EMPTY);
            }
            Header::new_with_flags(name, name_flags, value, value_flags)
        }
        Err(_) => {
            // No colon on the line.
            Header::new_with_flags(
                b"",
                Flags::MISSING_COLON,
                trimmed(line),
                Flags::MISSING_COLON,
            )
        }
    }
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::simple(b"Host: www.example.com", Header::new_with_flags(b"Host", 0, b"www.example.com", 0))]
    #[case::no_space(b"Host:www.example.com", Header::new_with_flags(b"Host", 0, b"www.example.com", 0))]
    #[case::extra_lws(b"Host:   www.example.com  ", Header::new_with_flags(b"Host", 0, b"www.example.com", 0))]
    #[case::empty_name(b":value", Header::new_with_flags(b"", Flags::NAME_EMPTY, b"value", 0))]
    #[case::empty_value(b"K:", Header::new_with_flags(b"K", 0, b"", Flags::VALUE_EMPTY))]
    #[case::colon_only(b":", Header::new_with_flags(b"", Flags::NAME_EMPTY, b"", Flags::VALUE_EMPTY))]
    #[case::missing_colon(b"K V", Header::new_with_flags(b"", Flags::MISSING_COLON, b"K V", Flags::MISSING_COLON))]
    #[case::lws_after_name(b"K : V", Header::new_with_flags(b"K", Flags::NAME_TRAILING_WHITESPACE, b"V", 0))]
    #[case::lws_before_name(b" K: V", Header::new_with_flags(b"K", Flags::NAME_LEADING_WHITESPACE, b"V", 0))]
    #[case::non_token(b"K()y: V", Header::new_with_flags(b"K()y", Flags::NAME_NON_TOKEN_CHARS, b"V", 0))]
    #[case::nul_in_name(b"K\x00ey: V", Header::new_with_flags(b"K\x00ey", Flags::NAME_NON_TOKEN_CHARS, b"V", 0))]
    #[case::value_keeps_nul(b"K: V before\x00V after", Header::new_with_flags(b"K", 0, b"V before\x00V after", 0))]
    fn ParseHeaderLine(#[case] input: &[u8], #[case] expected: Header) {
        assert_eq!(parse_header_line(input), expected);
    }

    #[test]
    fn MissingColonFlagImpliesEmptyName() {
        let header = parse_header_line(b"no colon here");
        assert!(header.name.flags.is_set(Flags::NAME_EMPTY));
        assert!(header.name.flags.is_set(Flags::MISSING_COLON));
    }
}
