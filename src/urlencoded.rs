use crate::bstr::Bstr;
use crate::config::DecoderConfig;
use crate::table::Table;
use crate::util::{urldecode_inplace, FlagOperations};

/// Streaming parser for `application/x-www-form-urlencoded` data.
///
/// Fed arbitrary byte chunks, it assembles name/value pairs across chunk
/// boundaries and percent-decodes them according to the decoder
/// configuration. Empty names and values are preserved whenever their
/// separators were present on the wire.
pub struct UrlencodedParser {
    /// Parsed parameters, in wire order.
    pub params: Table<Bstr>,
    /// Accumulated `URLEN_*` decoding anomalies.
    pub flags: u64,
    decoder: DecoderConfig,
    name: Bstr,
    value: Bstr,
    in_value: bool,
    /// True once the current pair has any presence on the wire.
    active: bool,
}

impl UrlencodedParser {
    pub fn new(decoder: DecoderConfig) -> Self {
        Self {
            params: Table::with_capacity(8),
            flags: 0,
            decoder,
            name: Bstr::new(),
            value: Bstr::new(),
            in_value: false,
            active: false,
        }
    }

    /// Process one chunk of data.
    pub fn parse_partial(&mut self, data: &[u8]) {
        for &byte in data {
            match byte {
                b'&' => {
                    self.flush_pair();
                    // A separator promises another field after it.
                    self.active = true;
                }
                b'=' if !self.in_value => {
                    self.in_value = true;
                    self.active = true;
                }
                _ => {
                    if self.in_value {
                        self.value.push(byte);
                    } else {
                        self.name.push(byte);
                    }
                    self.active = true;
                }
            }
        }
    }

    /// Process a complete buffer in one call.
    pub fn parse_complete(&mut self, data: &[u8]) {
        self.parse_partial(data);
        self.finalize();
    }

    /// Signal the end of data, flushing the pair in progress.
    pub fn finalize(&mut self) {
        if self.active {
            self.flush_pair();
        }
    }

    fn flush_pair(&mut self) {
        let mut name = std::mem::take(&mut self.name);
        let mut value = std::mem::take(&mut self.value);
        urldecode_inplace(&self.decoder, &mut name, &mut self.flags);
        urldecode_inplace(&self.decoder, &mut value, &mut self.flags);
        self.params.add(name, value);
        self.in_value = false;
        self.active = false;
    }
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;
    use crate::util::TxFlags;
    use rstest::rstest;

    fn parse(input: &[u8]) -> Vec<(Bstr, Bstr)> {
        let mut parser = UrlencodedParser::new(DecoderConfig::default());
        parser.parse_complete(input);
        parser.params.into_iter().collect()
    }

    fn pair(name: &str, value: &str) -> (Bstr, Bstr) {
        (Bstr::from(name), Bstr::from(value))
    }

    #[rstest]
    #[case::empty(b"", vec![])]
    #[case::simple(b"a=1&b=2", vec![pair("a", "1"), pair("b", "2")])]
    #[case::name_only(b"key", vec![pair("key", "")])]
    #[case::empty_value(b"a=", vec![pair("a", "")])]
    #[case::empty_name(b"=b", vec![pair("", "b")])]
    #[case::lone_separator(b"&", vec![pair("", ""), pair("", "")])]
    #[case::equals_in_value(b"a=1=2", vec![pair("a", "1=2")])]
    #[case::plus_decodes(b"a=one+two", vec![pair("a", "one two")])]
    #[case::percent(b"n%61me=v%61lue", vec![pair("name", "value")])]
    fn Parse(#[case] input: &[u8], #[case] expected: Vec<(Bstr, Bstr)>) {
        assert_eq!(parse(input), expected);
    }

    #[test]
    fn PairsSurviveChunkBoundaries() {
        let mut parser = UrlencodedParser::new(DecoderConfig::default());
        parser.parse_partial(b"na");
        parser.parse_partial(b"me=va");
        parser.parse_partial(b"lue&x");
        parser.parse_partial(b"=y");
        parser.finalize();
        let params: Vec<_> = parser.params.into_iter().collect();
        assert_eq!(params, vec![pair("name", "value"), pair("x", "y")]);
    }

    #[test]
    fn InvalidEncodingFlagged()  {
        let mut parser = UrlencodedParser::new(DecoderConfig::default());
        parser.parse_complete(b"a=%zz");
        assert!(parser.flags.is_set(TxFlags::URLEN_INVALID_ENCODING));
        let params: Vec<_> = parser.params.into_iter().collect();
        assert_eq!(params, vec![pair("a", "%zz")]);
    }
}
