//! # OXZ LZMA
//!
//! Incremental LZMA2 decoding for the OXZ stack.
//!
//! The crate is organized the way the format is layered:
//!
//! - [`range_coder`]: the bit-level arithmetic decoder
//! - [`model`]: LZMA's adaptive probability tables and state machine
//! - [`dict`]: the sliding dictionary window (and output, in
//!   single-call mode)
//! - [`decoder`]: the LZMA symbol decoder
//! - [`lzma2`]: the chunk framer that drives all of the above
//!
//! Everything is push-driven: [`lzma2::Lzma2Decoder::run`] consumes and
//! produces as much as the caller's buffers allow and suspends at byte
//! boundaries of the framing or between LZMA symbols, never inside a
//! range coder operation. No allocation happens outside
//! [`lzma2::Lzma2Decoder::new`].
//!
//! This crate handles the raw LZMA2 stream only; the XZ container
//! around it (Blocks, Index, checksums) lives in `oxz-stream`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod decoder;
pub mod dict;
pub mod lzma2;
pub mod model;
pub mod range_coder;

// Re-exports
pub use lzma2::{Lzma2Decoder, dict_size_from_props};
pub use model::LzmaProps;
pub use range_coder::RangeDecoder;
