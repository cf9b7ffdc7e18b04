use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("Invalid format")]
    InvalidFormat,
    #[error("Unexpected end of key")]
    UnexpectedEnd,
}
