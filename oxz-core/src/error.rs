//! Error and status types for OXZ decoding.
//!
//! Fatal conditions are reported through [`XzError`]; the two non-error
//! outcomes of a decode call ("call me again" and "stream finished") are
//! carried by [`Status`] so that public entry points can return
//! `Result<Status, XzError>`.

use thiserror::Error;

/// The error type for XZ decoding operations.
///
/// Errors are latched: once a decode call has returned an error, further
/// calls on the same decoder are unsupported until it is reset.
#[derive(Debug, Error)]
pub enum XzError {
    /// The input does not start with the XZ Stream Header magic.
    ///
    /// Callers that probe several formats can treat this as "try the next
    /// decoder"; nothing has been consumed beyond the magic bytes.
    #[error("not an XZ stream: invalid header magic")]
    Format,

    /// The stream is valid XZ but uses a feature this decoder does not
    /// support (check type other than none/CRC32, unknown filter ID,
    /// reserved flag bits, non-empty BCJ properties, ...).
    #[error("unsupported options in XZ headers: {message}")]
    Options {
        /// Description of the unsupported feature.
        message: String,
    },

    /// The Block requests a larger dictionary than was preallocated.
    ///
    /// Only possible in multi-call mode; single-call mode uses the output
    /// buffer as the dictionary.
    #[error("dictionary of {requested} bytes exceeds preallocated {allocated} bytes")]
    MemLimit {
        /// Dictionary size requested by the LZMA2 filter properties.
        requested: u32,
        /// Dictionary size preallocated at decoder creation.
        allocated: u32,
    },

    /// The stream is corrupt: a CRC mismatch, an out-of-range field, a
    /// non-minimal integer encoding, or a desynchronized range coder.
    #[error("corrupt XZ data: {message}")]
    Data {
        /// Description of the corruption.
        message: String,
    },

    /// No progress is possible with the buffers provided.
    ///
    /// In multi-call mode this is returned only after two consecutive
    /// calls that consumed no input and produced no output. In
    /// single-call mode it means the output buffer was too small.
    #[error("cannot make progress: input or output buffer too small")]
    Buf,
}

impl XzError {
    /// Create an unsupported-options error.
    pub fn options(message: impl Into<String>) -> Self {
        Self::Options {
            message: message.into(),
        }
    }

    /// Create a memory-limit error.
    pub fn mem_limit(requested: u32, allocated: u32) -> Self {
        Self::MemLimit {
            requested,
            allocated,
        }
    }

    /// Create a corrupt-data error.
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data {
            message: message.into(),
        }
    }
}

/// Result type alias for OXZ operations.
pub type Result<T> = std::result::Result<T, XzError>;

/// Outcome of a successful decode call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The decoder consumed and produced as much as it could and needs
    /// more input or more output space.
    NeedsMore,
    /// The end of the stream was reached and every integrity check
    /// passed.
    StreamEnd,
}

impl Status {
    /// True if this status marks the end of the stream.
    pub fn is_stream_end(self) -> bool {
        matches!(self, Status::StreamEnd)
    }
}
