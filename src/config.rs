use crate::bstr::Bstr;
use crate::content_handlers;
use crate::decompressors;
use crate::error::{Result, Status};
use crate::hook::{
    DataCallbackFn, DataHook, FileDataCallbackFn, FileDataHook, LogCallbackFn, LogHook,
    TxCallbackFn, TxHook,
};
use std::path::PathBuf;

/// A preset selecting the tolerance rules of a named HTTP server.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ServerPersonality {
    /// Minimal personality: no personality-specific quirks.
    Minimal,
    /// Generic tolerant parsing.
    Generic,
    /// Intrusion-detection-oriented: most permissive settings.
    Ids,
    /// Apache 2.2 and compatible.
    Apache2,
    Iis4_0,
    Iis5_0,
    Iis5_1,
    Iis6_0,
    Iis7_0,
    Iis7_5,
}

/// The response status code an anomaly is expected to draw from the server,
/// used to fine-tune inspection.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Unwanted {
    /// The anomaly is not expected to change the response.
    Ignore,
    /// The server is expected to reply with a 400.
    Code400,
}

/// How to handle invalid percent escapes found while decoding.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum UrlEncodingHandling {
    /// Leave the `%` in place and continue.
    PreservePercent,
    /// Drop the `%` and continue with the next byte.
    RemovePercent,
    /// Decode the two bytes after the `%` as if they were valid.
    ProcessInvalid,
}

/// Transformation applied to parameter and cookie names before they are
/// stored on the transaction.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ParameterProcessor {
    /// Store names untouched.
    None,
    /// PHP-style: trim leading whitespace, convert remaining whitespace and
    /// dots to underscores.
    PhpStyle,
}

impl ParameterProcessor {
    /// Apply this processor to a raw name.
    pub fn process_name(&self, name: &[u8]) -> Bstr {
        match self {
            ParameterProcessor::None => Bstr::from(name),
            ParameterProcessor::PhpStyle => {
                let start = name
                    .iter()
                    .position(|c| !c.is_ascii_whitespace())
                    .unwrap_or(name.len());
                let mut out = Vec::with_capacity(name.len() - start);
                for &c in &name[start..] {
                    if c.is_ascii_whitespace() || c == b'.' {
                        out.push(b'_');
                    } else {
                        out.push(c);
                    }
                }
                Bstr::from(out)
            }
        }
    }
}

/// Settings controlling URL and path decoding.
#[derive(Copy, Clone, Debug)]
pub struct DecoderConfig {
    /// Treat backslashes as path separators.
    pub backslash_convert_slashes: bool,
    /// Lowercase the path while decoding.
    pub convert_lowercase: bool,
    /// Collapse consecutive path separators into one.
    pub path_separators_compress: bool,
    /// Decode `%2F` into a path separator.
    pub path_separators_decode: bool,
    /// Decode `+` into a space in parameters.
    pub plusspace_decode: bool,
    /// Decode `%uHHHH` sequences.
    pub u_encoding_decode: bool,
    /// Stop at a raw NUL byte.
    pub nul_raw_terminates: bool,
    /// Stop at an encoded NUL byte.
    pub nul_encoded_terminates: bool,
    /// What to do with invalid percent escapes.
    pub url_encoding_invalid_handling: UrlEncodingHandling,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            backslash_convert_slashes: false,
            convert_lowercase: false,
            path_separators_compress: false,
            path_separators_decode: false,
            plusspace_decode: true,
            u_encoding_decode: false,
            nul_raw_terminates: false,
            nul_encoded_terminates: false,
            url_encoding_invalid_handling: UrlEncodingHandling::PreservePercent,
        }
    }
}

/// The per-transaction slice of the configuration, copied onto each
/// transaction at creation so content handlers can reach it without a
/// back-reference to the parser.
#[derive(Clone, Debug)]
pub struct TxConfig {
    pub decoder: DecoderConfig,
    pub parameter_processor: ParameterProcessor,
    pub extract_request_files: bool,
    pub tmpdir: PathBuf,
    pub hook_request_file_data: FileDataHook,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            decoder: DecoderConfig::default(),
            parameter_processor: ParameterProcessor::None,
            extract_request_files: false,
            tmpdir: std::env::temp_dir(),
            hook_request_file_data: FileDataHook::new(),
        }
    }
}

/// Parser configuration.
///
/// A configuration value is built up front and handed to each
/// [`ConnectionParser`](crate::connection_parser::ConnectionParser), which
/// takes its own copy; it is not meant to change while parsing is under way.
#[derive(Clone, Debug)]
pub struct Config {
    /// Soft field limit: crossing it flags the transaction and logs once.
    pub field_limit_soft: usize,
    /// Hard field limit: crossing it aborts the direction.
    pub field_limit_hard: usize,
    /// Server personality in effect.
    pub server_personality: ServerPersonality,
    /// URL/path decoding settings.
    pub decoder_cfg: DecoderConfig,
    /// Decompression guard rails.
    pub compression_options: decompressors::Options,
    /// Whether response bodies are decompressed.
    pub response_decompression_enabled: bool,
    /// Whether the Cookie request header is parsed.
    pub parse_request_cookies: bool,
    /// Whether the Authorization request header is parsed.
    pub parse_request_auth: bool,
    /// Whether urlencoded bodies and query strings feed the parameter table.
    pub parse_urlencoded: bool,
    /// Whether multipart/form-data bodies are parsed.
    pub parse_multipart: bool,
    /// Whether file parts (and PUT bodies) are extracted to disk.
    pub extract_request_files: bool,
    /// Directory for extracted files.
    pub tmpdir: PathBuf,
    /// Destroy transactions as soon as they complete.
    pub tx_auto_destroy: bool,
    /// Name transformation for parameters and cookies.
    pub parameter_processor: ParameterProcessor,
    /// Expected server reaction to leading request-line whitespace.
    pub requestline_leading_whitespace_unwanted: Unwanted,

    pub hook_transaction_start: TxHook,
    pub hook_request_line: TxHook,
    pub hook_request_uri_normalize: TxHook,
    pub hook_request_headers: TxHook,
    pub hook_request_body_data: DataHook,
    pub hook_request_file_data: FileDataHook,
    pub hook_request_trailer: TxHook,
    pub hook_request_complete: TxHook,
    pub hook_response_start: TxHook,
    pub hook_response_line: TxHook,
    pub hook_response_headers: TxHook,
    pub hook_response_body_data: DataHook,
    pub hook_response_trailer: TxHook,
    pub hook_response_complete: TxHook,
    pub hook_log: LogHook,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            field_limit_soft: 9000,
            field_limit_hard: 18000,
            server_personality: ServerPersonality::Minimal,
            decoder_cfg: DecoderConfig::default(),
            compression_options: decompressors::Options::default(),
            response_decompression_enabled: true,
            parse_request_cookies: true,
            parse_request_auth: true,
            parse_urlencoded: false,
            parse_multipart: false,
            extract_request_files: false,
            tmpdir: std::env::temp_dir(),
            tx_auto_destroy: false,
            parameter_processor: ParameterProcessor::None,
            requestline_leading_whitespace_unwanted: Unwanted::Ignore,
            hook_transaction_start: TxHook::new(),
            hook_request_line: TxHook::new(),
            hook_request_uri_normalize: TxHook::new(),
            hook_request_headers: TxHook::new(),
            hook_request_body_data: DataHook::new(),
            hook_request_file_data: FileDataHook::new(),
            hook_request_trailer: TxHook::new(),
            hook_request_complete: TxHook::new(),
            hook_response_start: TxHook::new(),
            hook_response_line: TxHook::new(),
            hook_response_headers: TxHook::new(),
            hook_response_body_data: DataHook::new(),
            hook_response_trailer: TxHook::new(),
            hook_response_complete: TxHook::new(),
            hook_log: LogHook::new(),
        }
    }
}

impl Config {
    /// Select a server personality, adjusting the decoder settings to match
    /// its observed behavior.
    pub fn set_server_personality(&mut self, personality: ServerPersonality) -> Result<()> {
        match personality {
            ServerPersonality::Minimal | ServerPersonality::Generic | ServerPersonality::Ids => {}
            ServerPersonality::Apache2 => {
                self.decoder_cfg.backslash_convert_slashes = false;
                self.decoder_cfg.path_separators_decode = false;
                self.decoder_cfg.convert_lowercase = false;
            }
            ServerPersonality::Iis4_0 | ServerPersonality::Iis5_0 => {
                self.decoder_cfg.backslash_convert_slashes = true;
                self.decoder_cfg.path_separators_decode = true;
                self.decoder_cfg.path_separators_compress = true;
                self.decoder_cfg.convert_lowercase = true;
            }
            ServerPersonality::Iis5_1 | ServerPersonality::Iis6_0 => {
                self.decoder_cfg.backslash_convert_slashes = true;
                self.decoder_cfg.path_separators_decode = true;
                self.decoder_cfg.path_separators_compress = true;
                self.decoder_cfg.convert_lowercase = true;
                self.decoder_cfg.u_encoding_decode = true;
            }
            ServerPersonality::Iis7_0 | ServerPersonality::Iis7_5 => {
                self.decoder_cfg.backslash_convert_slashes = true;
                self.decoder_cfg.path_separators_decode = true;
            }
        }
        self.server_personality = personality;
        Ok(())
    }

    /// Enable or disable urlencoded parsing. When enabled, query strings and
    /// `application/x-www-form-urlencoded` bodies feed the parameter table.
    pub fn set_parse_urlencoded(&mut self, enabled: bool) {
        if enabled && !self.parse_urlencoded {
            self.hook_request_line
                .register(content_handlers::urlencoded_callback_request_line);
            self.hook_request_headers
                .register(content_handlers::urlencoded_callback_request_headers);
        }
        self.parse_urlencoded = enabled;
    }

    /// Enable or disable multipart/form-data parsing.
    pub fn set_parse_multipart(&mut self, enabled: bool) {
        if enabled && !self.parse_multipart {
            self.hook_request_headers
                .register(content_handlers::multipart_callback_request_headers);
        }
        self.parse_multipart = enabled;
    }

    /// Set the soft and hard field limits.
    pub fn set_field_limits(&mut self, soft: usize, hard: usize) -> Result<()> {
        if soft > hard {
            return Err(Status::Error);
        }
        self.field_limit_soft = soft;
        self.field_limit_hard = hard;
        Ok(())
    }

    /// Enable or disable response body decompression.
    pub fn set_response_decompression(&mut self, enabled: bool) {
        self.response_decompression_enabled = enabled;
    }

    /// Enable or disable Cookie header parsing.
    pub fn set_parse_request_cookies(&mut self, enabled: bool) {
        self.parse_request_cookies = enabled;
    }

    /// Enable or disable Authorization header parsing.
    pub fn set_parse_request_auth(&mut self, enabled: bool) {
        self.parse_request_auth = enabled;
    }

    /// Enable or disable extraction of uploaded files to disk.
    pub fn set_extract_request_files(&mut self, enabled: bool, tmpdir: Option<PathBuf>) {
        self.extract_request_files = enabled;
        if let Some(tmpdir) = tmpdir {
            self.tmpdir = tmpdir;
        }
    }

    /// Select the parameter-name processor.
    pub fn set_parameter_processor(&mut self, processor: ParameterProcessor) {
        self.parameter_processor = processor;
    }

    /// The per-transaction slice of this configuration.
    pub(crate) fn tx_cfg(&self) -> TxConfig {
        TxConfig {
            decoder: self.decoder_cfg,
            parameter_processor: self.parameter_processor,
            extract_request_files: self.extract_request_files,
            tmpdir: self.tmpdir.clone(),
            hook_request_file_data: self.hook_request_file_data.clone(),
        }
    }

    pub fn register_transaction_start(&mut self, cbk: TxCallbackFn) {
        self.hook_transaction_start.register(cbk);
    }

    pub fn register_request_line(&mut self, cbk: TxCallbackFn) {
        self.hook_request_line.register(cbk);
    }

    pub fn register_request_uri_normalize(&mut self, cbk: TxCallbackFn) {
        self.hook_request_uri_normalize.register(cbk);
    }

    pub fn register_request_headers(&mut self, cbk: TxCallbackFn) {
        self.hook_request_headers.register(cbk);
    }

    pub fn register_request_body_data(&mut self, cbk: DataCallbackFn) {
        self.hook_request_body_data.register(cbk);
    }

    pub fn register_request_file_data(&mut self, cbk: FileDataCallbackFn) {
        self.hook_request_file_data.register(cbk);
    }

    pub fn register_request_trailer(&mut self, cbk: TxCallbackFn) {
        self.hook_request_trailer.register(cbk);
    }

    pub fn register_request_complete(&mut self, cbk: TxCallbackFn) {
        self.hook_request_complete.register(cbk);
    }

    pub fn register_response_start(&mut self, cbk: TxCallbackFn) {
        self.hook_response_start.register(cbk);
    }

    pub fn register_response_line(&mut self, cbk: TxCallbackFn) {
        self.hook_response_line.register(cbk);
    }

    pub fn register_response_headers(&mut self, cbk: TxCallbackFn) {
        self.hook_response_headers.register(cbk);
    }

    pub fn register_response_body_data(&mut self, cbk: DataCallbackFn) {
        self.hook_response_body_data.register(cbk);
    }

    pub fn register_response_trailer(&mut self, cbk: TxCallbackFn) {
        self.hook_response_trailer.register(cbk);
    }

    pub fn register_response_complete(&mut self, cbk: TxCallbackFn) {
        self.hook_response_complete.register(cbk);
    }

    pub fn register_log(&mut self, cbk: LogCallbackFn) {
        self.hook_log.register(cbk);
    }
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;

    #[test]
    fn PhpStyleParameterNames() {
        let p = ParameterProcessor::PhpStyle;
        assert_eq!(p.process_name(b"  name"), Bstr::from("name"));
        assert_eq!(p.process_name(b"a b.c"), Bstr::from("a_b_c"));
        assert_eq!(
            ParameterProcessor::None.process_name(b"  a b"),
            Bstr::from("  a b")
        );
    }

    #[test]
    fn FieldLimits() {
        let mut cfg = Config::default();
        assert!(cfg.set_field_limits(100, 50).is_err());
        assert!(cfg.set_field_limits(50, 100).is_ok());
        assert_eq!(cfg.field_limit_soft, 50);
        assert_eq!(cfg.field_limit_hard, 100);
    }

    #[test]
    fn UrlencodedRegistrationIsIdempotent() {
        let mut cfg = Config::default();
        cfg.set_parse_urlencoded(true);
        cfg.set_parse_urlencoded(true);
        assert_eq!(cfg.hook_request_headers.len(), 1);
        assert_eq!(cfg.hook_request_line.len(), 1);
    }
}
