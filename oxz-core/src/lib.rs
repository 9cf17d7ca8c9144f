//! # OXZ Core
//!
//! Core components shared by the OXZ decoder crates:
//!
//! - [`buf`]: the push-style buffer descriptor and decoder mode
//! - [`crc`]: CRC-32 checksums used by the XZ framing
//! - [`error`]: error and status types
//!
//! ## Architecture
//!
//! OXZ is layered the way the container format is:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ oxz-cli: streaming command line tool                    │
//! ├─────────────────────────────────────────────────────────┤
//! │ oxz-stream: XZ container, BCJ filters, facade           │
//! ├─────────────────────────────────────────────────────────┤
//! │ oxz-lzma: LZMA2 framing, LZMA symbols, dictionary       │
//! ├─────────────────────────────────────────────────────────┤
//! │ oxz-core (this crate): buffers, CRC, errors             │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Every decoder in the stack shares one convention: it consumes and
//! produces as much as the [`buf::XzBuf`] allows, then returns
//! [`error::Status::NeedsMore`] without blocking.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buf;
pub mod crc;
pub mod error;

// Re-exports for convenience
pub use buf::{Mode, XzBuf};
pub use crc::Crc32;
pub use error::{Result, Status, XzError};
