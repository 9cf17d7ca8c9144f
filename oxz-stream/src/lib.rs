//! # OXZ Stream
//!
//! Streaming decoder for the XZ container format.
//!
//! - [`stream`]: the Stream/Block/Index/Footer state machine and the
//!   [`stream::XzDecoder`] facade
//! - [`bcj`]: the Branch/Call/Jump pre-filter bank (x86, PowerPC,
//!   IA-64, ARM, ARM-Thumb, SPARC)
//! - [`vli`]: variable-length integers
//!
//! ## Example
//!
//! ```
//! use oxz_stream::{Status, XzBuf, XzDecoder};
//!
//! // Single-call mode: dict_max == 0, the output buffer is the
//! // dictionary. `data` must hold a complete XZ stream.
//! # fn decode(data: &[u8]) -> Result<Vec<u8>, oxz_stream::XzError> {
//! let mut decoder = XzDecoder::new(0);
//! let mut out = vec![0u8; 1 << 20];
//! let mut buf = XzBuf::new(data, &mut out);
//! let status = decoder.run(&mut buf)?;
//! assert_eq!(status, Status::StreamEnd);
//! let produced = buf.out_pos;
//! out.truncate(produced);
//! # Ok(out)
//! # }
//! ```
//!
//! Multi-call mode (`dict_max > 0`) streams arbitrarily large files
//! through fixed buffers; see `oxz-cli` for a complete drive loop.
//!
//! Only single streams with check type none or CRC32 are supported;
//! everything else is reported as an options error, never decoded
//! unchecked.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bcj;
pub mod stream;
pub mod vli;

// Re-exports
pub use bcj::{BcjDecoder, BcjFilter};
pub use oxz_core::{Mode, Status, XzBuf, XzError};
pub use stream::{FOOTER_MAGIC, HEADER_MAGIC, XzDecoder};
pub use vli::{VLI_UNKNOWN, Vli};
