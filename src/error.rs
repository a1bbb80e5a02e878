/// Result codes shared by the parser internals and callbacks.
///
/// Success is expressed as `Ok(())`; everything else travels in the error
/// position so that state functions can propagate dispositions with `?`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Status {
    /// A callback was not interested in doing any work for the given data.
    Declined,
    /// All supplied data was consumed; the caller should come back with more.
    Data,
    /// Supplied data was consumed and partially buffered; more data is needed
    /// to make progress.
    DataBuffer,
    /// Parsing of this direction is suspended until the other direction
    /// makes progress (e.g., a CONNECT request waiting for its response).
    DataOther,
    /// A callback asked for the transaction to no longer be followed.
    Stop,
    /// Fatal processing error; the direction is latched.
    Error,
}

/// Alias for the result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Status>;

/// Alias for the default nom error type over byte input.
pub type NomError<'a> = nom::error::Error<&'a [u8]>;

impl From<std::io::Error> for Status {
    fn from(_: std::io::Error) -> Self {
        Status::Error
    }
}

impl<E> From<nom::Err<E>> for Status {
    fn from(_: nom::Err<E>) -> Self {
        Status::Error
    }
}

impl Status {
    /// Whether this status means the caller should feed more data.
    pub fn wants_data(self) -> bool {
        self == Status::Data || self == Status::DataBuffer
    }
}
