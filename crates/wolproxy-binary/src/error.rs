use thiserror::Error;

#[derive(Error, Debug)]
pub enum BinaryError {
    /// Not enough bytes remaining in the buffer for the requested operation.
    #[error("Not enough bytes in buffer: needed {needed}, remaining {remaining}")]
    UnexpectedEof { needed: usize, remaining: usize },

    /// VarInt exceeded the maximum allowed encoding length.
    #[error("VarInt is too long (max bytes: {max_bytes})")]
    VarIntTooLong { max_bytes: usize },

    /// VarInts only carry non-negative values on this protocol surface.
    #[error("VarInt cannot encode a negative value")]
    VarIntNegative,

    /// Attempted to read a string that was not valid UTF-8.
    #[error("Invalid UTF-8 string data: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// An invalid value was encountered.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, BinaryError>;
