use std::io::{Cursor, Write};
use std::time::Instant;

/// Buffer decompression output to this chunk size.
const ENCODING_CHUNK_SIZE: usize = 8192;

/// Default max output size before a stream is considered a compression bomb.
const DEFAULT_BOMB_LIMIT: i64 = 1_048_576;
/// Default decompressed-to-compressed ratio that should not be exceeded.
const DEFAULT_BOMB_RATIO: i64 = 2048;
/// Default time limit for decompressing one stream, in microseconds.
const DEFAULT_TIME_LIMIT: u32 = 100_000;
/// Default number of callbacks between time limit checks.
const DEFAULT_TIME_FREQ_TEST: u32 = 256;

/// Decompression options.
#[derive(Copy, Clone, Debug)]
pub struct Options {
    /// Max output size before the stream is treated as a compression bomb.
    bomb_limit: i64,
    /// Max decompressed-to-compressed ratio.
    bomb_ratio: i64,
    /// Max time spent decompressing one stream, in microseconds.
    time_limit: u32,
    /// Number of callbacks between time limit checks.
    time_test_freq: u32,
}

impl Options {
    /// Get the compression bomb limit.
    pub fn get_bomb_limit(&self) -> i64 {
        self.bomb_limit
    }

    /// Set the compression bomb limit.
    pub fn set_bomb_limit(&mut self, bomb_limit: i64) {
        self.bomb_limit = bomb_limit;
    }

    /// Get the bomb ratio.
    pub fn get_bomb_ratio(&self) -> i64 {
        self.bomb_ratio
    }

    /// Set the bomb ratio.
    pub fn set_bomb_ratio(&mut self, bomb_ratio: i64) {
        self.bomb_ratio = bomb_ratio;
    }

    /// Get the decompression time limit in microseconds.
    pub fn get_time_limit(&self) -> u32 {
        self.time_limit
    }

    /// Set the decompression time limit in microseconds.
    pub fn set_time_limit(&mut self, time_limit: u32) {
        self.time_limit = time_limit
    }

    /// Get the time test frequency.
    pub fn get_time_test_freq(&self) -> u32 {
        self.time_test_freq
    }

    /// Set the time test frequency.
    pub fn set_time_test_freq(&mut self, time_test_freq: u32) {
        self.time_test_freq = time_test_freq;
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            bomb_limit: DEFAULT_BOMB_LIMIT,
            bomb_ratio: DEFAULT_BOMB_RATIO,
            time_limit: DEFAULT_TIME_LIMIT,
            time_test_freq: DEFAULT_TIME_FREQ_TEST,
        }
    }
}

/// Describes a decompressor that is able to restart and pass through data.
/// Actual decompression is done using the `Write` trait.
pub trait Decompress: Write {
    /// Restarts the decompressor to try the same one again or a different one.
    fn restart(&mut self) -> std::io::Result<()>;

    /// Tells all decompressors to pass their data through instead of
    /// decompressing, directly calling the callback.
    fn set_passthrough(&mut self, passthrough: bool);

    /// Indicates that the end of stream was reached.
    fn finish(&mut self) -> std::io::Result<()>;
}

/// Type alias for the decompressed-data callback. A `None` chunk signals the
/// end of the stream.
pub type CallbackFn = Box<dyn FnMut(Option<&[u8]>) -> Result<usize, std::io::Error>>;

/// Simple wrapper around a closure, chaining it to the other decompressors.
pub struct CallbackWriter(CallbackFn);

impl CallbackWriter {
    /// Create a new CallbackWriter.
    pub fn new(cbk: CallbackFn) -> Self {
        CallbackWriter(cbk)
    }
}

impl Write for CallbackWriter {
    fn write(&mut self, data: &[u8]) -> std::result::Result<usize, std::io::Error> {
        (self.0)(Some(data))
    }

    fn flush(&mut self) -> std::result::Result<(), std::io::Error> {
        Ok(())
    }
}

impl Decompress for CallbackWriter {
    fn restart(&mut self) -> std::io::Result<()> {
        Ok(())
    }

    fn set_passthrough(&mut self, _passthrough: bool) {}

    fn finish(&mut self) -> std::io::Result<()> {
        (self.0)(None)?;
        Ok(())
    }
}

/// Type of content compression.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ContentEncoding {
    /// No compression.
    None,
    /// Gzip compression (RFC 1952).
    Gzip,
    /// Raw deflate compression (RFC 1951).
    Deflate,
    /// Deflate compression with a zlib header (RFC 1950).
    Zlib,
    /// The content encoding could not be determined.
    Error,
}

/// The outer decompressor tracks the number of callbacks and the time spent
/// decompressing.
pub struct Decompressor {
    /// First decompressor to call.
    inner: Box<dyn Decompress>,
    /// Time we started decompression.
    time_before: Option<Instant>,
    /// Time spent decompressing so far, in microseconds.
    time_spent: u64,
    /// Number of times the callback was called.
    nb_callbacks: u32,
}

impl Decompressor {
    /// Creates a new decompressor from a struct implementing the Decompress trait.
    fn new(inner: Box<dyn Decompress>) -> Self {
        Self {
            inner,
            time_before: None,
            time_spent: 0,
            nb_callbacks: 0,
        }
    }

    /// Creates a new decompressor that only calls the callback.
    fn callback(callback: CallbackFn) -> Self {
        Self::new(Box::new(CallbackWriter::new(callback)))
    }

    /// Prepends a decompressor to this chain by consuming `self.inner`.
    ///
    /// Decompressors are added in the order the data was compressed,
    /// starting from the callback: for `Content-Encoding: gzip, deflate`
    /// the deflate layer is prepended after the gzip layer.
    pub fn prepend(self, encoding: ContentEncoding, options: Options) -> std::io::Result<Self> {
        match encoding {
            ContentEncoding::None => Ok(Decompressor::new(self.inner)),
            ContentEncoding::Gzip | ContentEncoding::Deflate | ContentEncoding::Zlib => Ok(
                Decompressor::new(Box::new(InnerDecompressor::new(encoding, self.inner, options)?)),
            ),
            ContentEncoding::Error => Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "expected a valid encoding",
            )),
        }
    }

    /// Creates a new decompressor for `encoding` with a callback to call
    /// when data is ready.
    pub fn new_with_callback(
        encoding: ContentEncoding,
        callback: CallbackFn,
        options: Options,
    ) -> std::io::Result<Self> {
        Self::callback(callback).prepend(encoding, options)
    }

    /// Starts the decompression timer.
    fn timer_start(&mut self) {
        self.time_before.replace(Instant::now());
    }

    /// Stops the decompression timer, updates and returns the time spent
    /// decompressing in microseconds.
    pub fn timer_reset(&mut self) -> Option<u64> {
        let now = Instant::now();
        if let Some(time_before) = self.time_before.replace(now) {
            self.time_spent += now.duration_since(time_before).as_micros() as u64;
            Some(self.time_spent)
        } else {
            None
        }
    }

    /// Increments the number of times the callback was called.
    pub fn callback_inc(&mut self) -> u32 {
        self.nb_callbacks = self.nb_callbacks.wrapping_add(1);
        self.nb_callbacks
    }

    /// Returns the time spent decompressing in microseconds.
    pub fn time_spent(&self) -> u64 {
        self.time_spent
    }

    /// Decompress the input `data` through the chain of decompressors and
    /// into the data callback.
    pub fn decompress(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.nb_callbacks = 0;
        self.timer_start();
        let result = self.inner.write_all(data).and_then(|_| self.inner.flush());
        self.timer_reset();
        result
    }

    /// Notify the chain that the end of stream was reached.
    pub fn finish(&mut self) -> std::io::Result<()> {
        self.inner.finish()
    }
}

impl std::fmt::Debug for Decompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Decompressor")
            .field("time_spent", &self.time_spent)
            .field("nb_callbacks", &self.nb_callbacks)
            .finish()
    }
}

/// The decompression writers (gzip, deflate, zlib) plus the methods needed
/// to drain their temporary output buffer.
trait BufWriter: Write {
    /// Get a mutable reference to the output buffer.
    fn get_mut(&mut self) -> Option<&mut Cursor<Box<[u8]>>>;
    /// Notify end of data.
    fn finish(self: Box<Self>) -> std::io::Result<Cursor<Box<[u8]>>>;
}

/// A BufWriter that does not consume any data; used with passthrough mode.
struct NullBufWriter(Cursor<Box<[u8]>>);

impl Write for NullBufWriter {
    fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
        Ok(0)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl BufWriter for NullBufWriter {
    fn get_mut(&mut self) -> Option<&mut Cursor<Box<[u8]>>> {
        Some(&mut self.0)
    }

    fn finish(self: Box<Self>) -> std::io::Result<Cursor<Box<[u8]>>> {
        Ok(self.0)
    }
}

/// A parsed gzip member header.
#[derive(PartialEq, Eq, Clone, Debug, Default)]
pub struct GzHeader {
    extra: Option<Vec<u8>>,
    filename: Option<Vec<u8>>,
    comment: Option<Vec<u8>>,
    operating_system: u8,
    mtime: i32,
    crc: Option<u16>,
    flags: u8,
    xfl: u8,
}

impl GzHeader {
    const FHCRC: u8 = 1 << 1;
    const FEXTRA: u8 = 1 << 2;
    const FNAME: u8 = 1 << 3;
    const FCOMMENT: u8 = 1 << 4;

    fn parse(data: &[u8]) -> nom::IResult<&[u8], Self> {
        use nom::bytes::streaming::{tag, take, take_until};
        use nom::number::streaming::{le_i32, le_u16, le_u8};
        use nom::sequence::tuple;
        let rest: &[u8] = data;
        let (rest, (_, flags, mtime, xfl, operating_system)) =
            tuple((tag(b"\x1f\x8b\x08"), le_u8, le_i32, le_u8, le_u8))(rest)?;

        let (rest, extra) = match flags & Self::FEXTRA {
            0 => (rest, None),
            _ => {
                let (rest, len) = le_u16(rest)?;
                let (rest, extra) = take(len as usize)(rest)?;
                (rest, Some(extra.into()))
            }
        };

        let (rest, filename) = match flags & Self::FNAME {
            0 => (rest, None),
            _ => {
                let (rest, (filename, _)) = tuple((take_until(b"\0" as &[u8]), tag(b"\0")))(rest)?;
                (rest, Some(filename.into()))
            }
        };

        let (rest, comment) = match flags & Self::FCOMMENT {
            0 => (rest, None),
            _ => {
                let (rest, (comment, _)) = tuple((take_until(b"\0" as &[u8]), tag(b"\0")))(rest)?;
                (rest, Some(comment.into()))
            }
        };

        let (rest, crc) = match flags & Self::FHCRC {
            0 => (rest, None),
            _ => {
                let (rest, crc) = le_u16(rest)?;
                (rest, Some(crc))
            }
        };

        Ok((
            rest,
            GzHeader {
                extra,
                filename,
                comment,
                operating_system,
                mtime,
                crc,
                flags,
                xfl,
            },
        ))
    }
}

/// Wrapper around a gzip header parser and a raw deflate decoder.
///
/// The header is parsed separately so that checksum and other header errors
/// that do not affect our ability to decompress the stream are tolerated,
/// because browsers tolerate them.
struct GzipBufWriter {
    buffer: Vec<u8>,
    header: Option<GzHeader>,
    inner: flate2::write::DeflateDecoder<Cursor<Box<[u8]>>>,
}

impl GzipBufWriter {
    fn new(buf: Cursor<Box<[u8]>>) -> Self {
        GzipBufWriter {
            buffer: Vec::with_capacity(10),
            header: None,
            inner: flate2::write::DeflateDecoder::new(buf),
        }
    }

    fn parse_gz_header(&mut self, data: &[u8]) -> std::io::Result<usize> {
        let parse = if !self.buffer.is_empty() {
            self.buffer.extend_from_slice(data);
            self.buffer.as_ref()
        } else {
            data
        };

        match GzHeader::parse(parse) {
            Ok((rest, header)) => {
                self.header = Some(header);
                if let Some(readlen) = data.len().checked_sub(rest.len()) {
                    Ok(readlen)
                } else {
                    // The header must have been parseable from the stored
                    // buffer alone, which should have happened earlier.
                    Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "unexpected remaining data",
                    ))
                }
            }
            Err(nom::Err::Incomplete(_)) => {
                // Cache for later.
                self.buffer.extend_from_slice(data);
                Ok(data.len())
            }
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "could not parse gzip header",
            )),
        }
    }
}

impl Write for GzipBufWriter {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        if self.header.is_none() {
            self.parse_gz_header(data)
        } else {
            self.inner.write(data)
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl BufWriter for GzipBufWriter {
    fn get_mut(&mut self) -> Option<&mut Cursor<Box<[u8]>>> {
        Some(self.inner.get_mut())
    }

    fn finish(self: Box<Self>) -> std::io::Result<Cursor<Box<[u8]>>> {
        self.inner.finish()
    }
}

/// Simple wrapper around a raw deflate decoder.
struct DeflateBufWriter(flate2::write::DeflateDecoder<Cursor<Box<[u8]>>>);

impl Write for DeflateBufWriter {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.0.write(data)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl BufWriter for DeflateBufWriter {
    fn get_mut(&mut self) -> Option<&mut Cursor<Box<[u8]>>> {
        Some(self.0.get_mut())
    }

    fn finish(self: Box<Self>) -> std::io::Result<Cursor<Box<[u8]>>> {
        self.0.finish()
    }
}

/// Simple wrapper around a zlib decoder.
struct ZlibBufWriter(flate2::write::ZlibDecoder<Cursor<Box<[u8]>>>);

impl Write for ZlibBufWriter {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.0.write(data)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl BufWriter for ZlibBufWriter {
    fn get_mut(&mut self) -> Option<&mut Cursor<Box<[u8]>>> {
        Some(self.0.get_mut())
    }

    fn finish(self: Box<Self>) -> std::io::Result<Cursor<Box<[u8]>>> {
        self.0.finish()
    }
}

/// One decompressor in the chain.
struct InnerDecompressor {
    /// Decoder implementation writing to a temporary buffer.
    writer: Option<Box<dyn BufWriter>>,
    /// Next decompressor to call.
    inner: Option<Box<dyn Decompress>>,
    /// Encoding type of this decompressor.
    encoding: ContentEncoding,
    /// Next encoding to try when decompression fails.
    next_encoding: ContentEncoding,
    /// Whether to pass data through without calling the writer.
    passthrough: bool,
    /// Number of restarts so far.
    restarts: u8,
    /// Options for decompression.
    options: Options,
}

impl InnerDecompressor {
    /// Returns a new writer for the content encoding type, and whether to
    /// pass data through.
    fn writer(encoding: ContentEncoding) -> std::io::Result<(Box<dyn BufWriter>, bool)> {
        let buf = Cursor::new(Box::new([0u8; ENCODING_CHUNK_SIZE]) as Box<[u8]>);

        match encoding {
            ContentEncoding::Gzip => Ok((Box::new(GzipBufWriter::new(buf)), false)),
            ContentEncoding::Deflate => Ok((
                Box::new(DeflateBufWriter(flate2::write::DeflateDecoder::new(buf))),
                false,
            )),
            ContentEncoding::Zlib => Ok((
                Box::new(ZlibBufWriter(flate2::write::ZlibDecoder::new(buf))),
                false,
            )),
            ContentEncoding::None | ContentEncoding::Error => Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "expected a valid encoding",
            )),
        }
    }

    fn new(
        encoding: ContentEncoding,
        inner: Box<dyn Decompress>,
        options: Options,
    ) -> std::io::Result<Self> {
        let (writer, passthrough) = Self::writer(encoding)?;
        Ok(Self {
            inner: Some(inner),
            encoding,
            next_encoding: encoding,
            writer: Some(writer),
            passthrough,
            restarts: 0,
            options,
        })
    }

    /// Tries to pass data to the callback instead of calling the writers.
    ///
    /// This sets passthrough mode on success and reverts on error.
    fn try_passthrough(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.set_passthrough(true);
        if let Some(inner) = &mut self.inner {
            let result = inner.write(data);
            if result.is_err() {
                self.set_passthrough(false);
            }
            result
        } else {
            Ok(data.len())
        }
    }

    /// Flushes the writer and the temporary buffer it writes to.
    ///
    /// The writer is taken out of its slot and passed directly instead of
    /// through `self.writer` to avoid holding multiple mutable references.
    fn flush_writer(&mut self, writer: &mut Box<dyn BufWriter>) -> std::io::Result<()> {
        if let Some(mut inner) = self.inner.take() {
            while {
                let result = writer.flush();

                // Drain whatever the writer has placed into the temporary
                // buffer of fixed size.
                if let Some(cursor) = writer.get_mut() {
                    inner.write_all(&cursor.get_ref()[0..cursor.position() as usize])?;
                    cursor.set_position(0);
                }

                // Continue flushing on `WriteZero`: it indicates the writer
                // could not fit all bytes into the temporary buffer.
                if let Err(e) = result {
                    match e.kind() {
                        std::io::ErrorKind::WriteZero => true,
                        _ => {
                            self.restart()?;
                            false
                        }
                    }
                } else {
                    false
                }
            } {}
            self.inner.replace(inner);
            Ok(())
        } else {
            Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "nothing to flush to",
            ))
        }
    }
}

impl Write for InnerDecompressor {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        // Passthrough mode.
        if self.passthrough {
            if let Some(inner) = &mut self.inner {
                inner.write(data)
            } else {
                Ok(data.len())
            }

        // Take the writer out of its slot to avoid holding multiple mutable
        // references. Calls using `self.writer` must be avoided while the
        // writer is in this state.
        } else if let Some(mut writer) = self.writer.take() {
            match writer.write(data) {
                Ok(consumed) => {
                    let result = if consumed == 0 {
                        // Could be the end of the stream; anything after the
                        // first end of stream (as in multi-member gzip) is
                        // ignored and we pretend to have consumed it.
                        Ok(data.len())
                    } else {
                        Ok(consumed)
                    };
                    self.writer.replace(writer);
                    result
                }
                Err(e) => {
                    match e.kind() {
                        std::io::ErrorKind::WriteZero => {
                            self.flush_writer(&mut writer)?;
                            // Recursion: the buffer was flushed until
                            // `WriteZero` stopped occurring.
                            self.writer.replace(writer);
                            self.write(data)
                        }
                        _ => {
                            // Try to restart; any data in the temporary
                            // buffer is discarded.
                            if self.restart().is_err() {
                                self.try_passthrough(data)
                            } else {
                                // Recursion: restart fails after a small
                                // number of attempts.
                                self.write(data)
                            }
                        }
                    }
                }
            }
        } else {
            Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "writer was not initialized",
            ))
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if let Some(mut writer) = self.writer.take() {
            self.flush_writer(&mut writer)?;
            self.writer.replace(writer);
        }
        if let Some(inner) = &mut self.inner {
            inner.flush()
        } else {
            Ok(())
        }
    }
}

impl Decompress for InnerDecompressor {
    fn restart(&mut self) -> std::io::Result<()> {
        if self.restarts < 3 {
            // First retry the same encoding type, then the others we know.
            self.next_encoding = if self.restarts == 0 {
                self.encoding
            } else {
                match self.next_encoding {
                    ContentEncoding::Gzip => ContentEncoding::Deflate,
                    ContentEncoding::Deflate => ContentEncoding::Zlib,
                    ContentEncoding::Zlib => ContentEncoding::Gzip,
                    ContentEncoding::None | ContentEncoding::Error => {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::Other,
                            "expected a valid encoding",
                        ))
                    }
                }
            };
            let (writer, passthrough) = Self::writer(self.next_encoding)?;
            self.writer = Some(writer);
            if passthrough {
                self.passthrough = passthrough;
            }
            self.restarts += 1;
            Ok(())
        } else {
            Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "too many restart attempts",
            ))
        }
    }

    fn set_passthrough(&mut self, passthrough: bool) {
        self.passthrough = passthrough;
        if let Some(inner) = &mut self.inner {
            inner.set_passthrough(passthrough);
        }
    }

    fn finish(&mut self) -> std::io::Result<()> {
        let output = if let Some(mut writer) = self.writer.take() {
            self.flush_writer(&mut writer)?;
            Some(writer.finish()?)
        } else {
            None
        };

        if let Some(mut inner) = self.inner.take() {
            if let Some(output) = output {
                inner.write_all(&output.get_ref()[..output.position() as usize])?;
            }
            inner.finish()
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn GzHeaderPlain() {
        let input = b"\x1f\x8b\x08\x00\x00\x00\x00\x00\x00\x00";
        assert_eq!(
            GzHeader::parse(input),
            Ok((b"" as &[u8], GzHeader::default()))
        );
    }

    #[test]
    fn GzHeaderWithFields() {
        // Extra, filename, comment and CRC all present.
        let input =
            b"\x1f\x8b\x08\x1e\x00\x00\x00\x00\x00\x00\x05\x00extrafilename\x00comment\x00\x34\x12";
        assert_eq!(
            GzHeader::parse(input),
            Ok((
                b"" as &[u8],
                GzHeader {
                    extra: Some(b"extra".to_vec()),
                    filename: Some(b"filename".to_vec()),
                    comment: Some(b"comment".to_vec()),
                    operating_system: 0,
                    mtime: 0,
                    crc: Some(0x1234),
                    flags: 0b0001_1110,
                    xfl: 0,
                }
            ))
        );
    }

    #[test]
    fn GzHeaderTooShort() {
        let input = b"\x1f\x8b\x08\x01\x00\x00\x00\x00\x00";
        assert!(GzHeader::parse(input).is_err());
    }

    fn collecting_decompressor(encoding: ContentEncoding) -> (Decompressor, Rc<RefCell<Vec<u8>>>) {
        let sink = Rc::new(RefCell::new(Vec::new()));
        let inner = sink.clone();
        let d = Decompressor::new_with_callback(
            encoding,
            Box::new(move |data: Option<&[u8]>| {
                if let Some(data) = data {
                    inner.borrow_mut().extend_from_slice(data);
                    Ok(data.len())
                } else {
                    Ok(0)
                }
            }),
            Options::default(),
        )
        .unwrap();
        (d, sink)
    }

    #[test]
    fn RoundTripGzip() {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"hello decompression world").unwrap();
        let compressed = encoder.finish().unwrap();

        let (mut d, sink) = collecting_decompressor(ContentEncoding::Gzip);
        d.decompress(&compressed).unwrap();
        d.finish().unwrap();
        assert_eq!(sink.borrow().as_slice(), b"hello decompression world");
    }

    #[test]
    fn RoundTripDeflate() {
        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"raw deflate stream").unwrap();
        let compressed = encoder.finish().unwrap();

        let (mut d, sink) = collecting_decompressor(ContentEncoding::Deflate);
        d.decompress(&compressed).unwrap();
        d.finish().unwrap();
        assert_eq!(sink.borrow().as_slice(), b"raw deflate stream");
    }

    #[test]
    fn DeflateRestartsAsZlib() {
        // Declared deflate but actually zlib-wrapped; the restart path must
        // recover it.
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"zlib pretending to be deflate").unwrap();
        let compressed = encoder.finish().unwrap();

        let (mut d, sink) = collecting_decompressor(ContentEncoding::Deflate);
        d.decompress(&compressed).unwrap();
        d.finish().unwrap();
        assert_eq!(sink.borrow().as_slice(), b"zlib pretending to be deflate");
    }
}
