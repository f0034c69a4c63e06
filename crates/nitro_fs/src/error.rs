//! Error types that can be emitted from this library

use miette::Diagnostic;
use thiserror::Error;

use crate::compression::CompressionKind;

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent warpper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Transparent warpper for [`binrw::Error`]
    #[error(transparent)]
    BinRWError(#[from] binrw::Error),

    /// the container tables are inconsistent with the data they describe
    #[error("malformed container: {0}")]
    MalformedContainer(String),

    /// a compressed stream could not be decoded
    #[error("corrupt compressed stream")]
    CorruptCompression(#[from] CorruptionError),

    /// the stream uses a compression scheme that can't be decoded
    #[error("unsupported compression {0:?}")]
    UnsupportedCompression(CompressionKind),

    /// re-encoded data does not fit into the span reserved for it
    #[error("re-encoded data needs {needed} bytes but only {reserved} are reserved")]
    ReencodeOverflow {
        /// Size of the re-encoded data
        needed: usize,
        /// Size of the span available in the container
        reserved: usize,
    },

    /// unable to find requested node
    #[error("unable to find requested node")]
    NodeNotFound(#[from] NodeNotFoundError),

    /// {0}
    #[error("{0}")]
    CustomError(String),
}

/// Further information on why a compressed stream was rejected
#[derive(Error, Diagnostic, Debug, PartialEq, Eq)]
pub enum CorruptionError {
    /// back-reference points before the start of the output
    #[error("displacement {displacement} at output position {position} points before the start")]
    DisplacementUnderflow {
        /// Output position the token was decoded at
        position: usize,
        /// Backwards distance requested by the token
        displacement: usize,
    },

    /// input ended before the declared size was produced
    #[error("input ended before the declared size was produced")]
    UnexpectedEnd,

    /// decoded size does not match the declared size
    #[error("expected {expected} bytes, decoded {actual}")]
    SizeMismatch {
        /// Size declared by the stream or the size pass
        expected: usize,
        /// Size actually produced
        actual: usize,
    },

    /// {0}
    #[error("invalid footer: {0}")]
    BadFooter(&'static str),
}

/// Error type to provide further information when a node has not been found
#[derive(Error, Diagnostic, Debug)]
#[error("unable to find requested node")]
pub enum NodeNotFoundError {
    /// at index {0}
    #[error("at index {0}")]
    Index(usize),

    /// by path {0}
    #[error("by path {0}")]
    Path(String),
}

impl Error {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Error::MalformedContainer(message.into())
    }
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;
