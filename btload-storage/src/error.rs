use crate::row::RowID;
use btload_datatype::error::Error as DataTypeError;
use std::array::TryFromSliceError;
use std::io::ErrorKind;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("internal error")]
    InternalError,
    #[error("invalid state")]
    InvalidState,
    #[error("Invalid format")]
    InvalidFormat,
    #[error("Checksum mismatch")]
    ChecksumMismatch,
    #[error("IO Error({0:?})")]
    IOError(ErrorKind),
    #[error("Invalid datatype")]
    InvalidDatatype,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
    // page store errors
    #[error("page allocation failed")]
    PageAllocFailed,
    #[error("page {0} not found")]
    PageNotFound(u64),
    #[error("file {0} not found")]
    FileNotFound(u64),
    #[error("overflow key storage unavailable")]
    OverflowKeyStorage,
    #[error("record does not fit into page")]
    RecordTooLarge,
    // data errors
    #[error("unique violation on key {key}: rows {first} and {second}")]
    UniqueViolation {
        key: String,
        first: RowID,
        second: RowID,
    },
    #[error("foreign key {name} violated by value {value}")]
    ForeignKeyViolation { name: String, value: String },
    #[error("not null violation on indexed column")]
    NotNullViolation,
    #[error("duplicate row identity {0} in sort input")]
    DuplicateRowIdentity(RowID),
    #[error("row filter failed: {0}")]
    FilterFailed(String),
    // concurrency errors
    #[error("operation interrupted")]
    Interrupted,
    #[error("lock timeout")]
    LockTimeout,
    #[error("lock not held")]
    LockNotHeld,
    #[error("index worker failed")]
    WorkerFailed,
    #[error("channel send error")]
    SendError,
}

impl Error {
    /// Whether the error leaves the caller free to retry a lock request.
    #[inline]
    pub fn is_retryable_lock_error(&self) -> bool {
        matches!(self, Error::LockTimeout | Error::Interrupted)
    }
}

impl From<TryFromSliceError> for Error {
    #[inline]
    fn from(_src: TryFromSliceError) -> Error {
        Error::InvalidFormat
    }
}

impl From<DataTypeError> for Error {
    #[inline]
    fn from(src: DataTypeError) -> Self {
        match src {
            DataTypeError::InvalidFormat | DataTypeError::UnexpectedEnd => Error::InvalidFormat,
        }
    }
}

impl From<std::io::Error> for Error {
    #[inline]
    fn from(src: std::io::Error) -> Self {
        Error::IOError(src.kind())
    }
}

impl From<std::str::Utf8Error> for Error {
    #[inline]
    fn from(_src: std::str::Utf8Error) -> Error {
        Error::InvalidFormat
    }
}

impl<T> From<flume::SendError<T>> for Error {
    #[inline]
    fn from(_src: flume::SendError<T>) -> Self {
        Error::SendError
    }
}
