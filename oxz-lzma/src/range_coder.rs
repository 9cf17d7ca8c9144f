//! Range decoder for LZMA decompression.
//!
//! The range coder is an entropy coding method similar to arithmetic
//! coding. LZMA uses a variant with:
//! - 32-bit range tracking
//! - Normalization when the range drops below 2^24
//! - 11-bit adaptive probabilities (2048 = 100%, 1024 = 50%)
//!
//! Unlike a reader-backed decoder, this one works on a borrowed input
//! slice through a cursor (`in_pos`) bounded by `in_limit`. The caller
//! guarantees that at least [`LZMA_IN_REQUIRED`] bytes past `in_limit`
//! are readable, which is what allows one LZMA symbol (at most 21 input
//! bytes) to be decoded without any bounds checking mid-symbol. That
//! guarantee is the reason the decoder can suspend only on symbol
//! boundaries, never inside a bit operation.

use oxz_core::error::{Result, XzError};
use oxz_core::XzBuf;

/// Number of bits in the probability model.
pub const PROB_BITS: u32 = 11;

/// Probability value representing 50%.
pub const PROB_INIT: u16 = 1 << (PROB_BITS - 1);

/// Maximum probability value (100%).
pub const PROB_MAX: u16 = 1 << PROB_BITS;

/// Number of bits to shift for probability adaptation.
const MOVE_BITS: u32 = 5;

/// Top value for range normalization.
const TOP_VALUE: u32 = 1 << 24;

/// Number of bytes consumed by the initial range decoder load.
pub const RC_INIT_BYTES: u32 = 5;

/// Maximum number of input bytes a single LZMA symbol can consume.
pub const LZMA_IN_REQUIRED: usize = 21;

/// Incremental range decoder.
#[derive(Debug)]
pub struct RangeDecoder {
    range: u32,
    code: u32,
    /// Bytes still missing from the 5-byte initial load.
    init_bytes_left: u32,
    /// Read cursor into the input slice passed to the decode primitives.
    pub in_pos: usize,
    /// Symbol decoding may start only while `in_pos < in_limit`.
    pub in_limit: usize,
}

impl RangeDecoder {
    /// Create a decoder ready for the initial 5-byte load.
    pub fn new() -> Self {
        Self {
            range: u32::MAX,
            code: 0,
            init_bytes_left: RC_INIT_BYTES,
            in_pos: 0,
            in_limit: 0,
        }
    }

    /// Reset for the next chunk's initial load.
    pub fn reset(&mut self) {
        self.range = u32::MAX;
        self.code = 0;
        self.init_bytes_left = RC_INIT_BYTES;
    }

    /// Consume the five initial bytes from `b`, as many as are available.
    ///
    /// Returns `Ok(true)` once all five have been read. The first byte of
    /// a valid stream is always zero; anything else is corruption.
    pub fn read_init(&mut self, b: &mut XzBuf<'_>) -> Result<bool> {
        while self.init_bytes_left > 0 {
            if b.in_exhausted() {
                return Ok(false);
            }

            let byte = b.input[b.in_pos];
            b.in_pos += 1;

            if self.init_bytes_left == RC_INIT_BYTES && byte != 0x00 {
                return Err(XzError::data("invalid first byte of range coded data"));
            }

            self.code = (self.code << 8) | byte as u32;
            self.init_bytes_left -= 1;
        }

        Ok(true)
    }

    /// Refill when the range gets small. Called before every bit
    /// operation and once after a symbol completes, so the decoder is
    /// always normalized between symbols.
    #[inline(always)]
    pub fn normalize(&mut self, input: &[u8]) {
        if self.range < TOP_VALUE {
            self.range <<= 8;
            self.code = (self.code << 8) | input[self.in_pos] as u32;
            self.in_pos += 1;
        }
    }

    /// Decode one bit with an adaptive probability.
    #[inline(always)]
    pub fn bit(&mut self, prob: &mut u16, input: &[u8]) -> bool {
        self.normalize(input);

        let bound = (self.range >> PROB_BITS) * (*prob as u32);

        if self.code < bound {
            self.range = bound;
            *prob += (PROB_MAX - *prob) >> MOVE_BITS;
            false
        } else {
            self.range -= bound;
            self.code -= bound;
            *prob -= *prob >> MOVE_BITS;
            true
        }
    }

    /// Decode a bit tree MSB-first. Returns the raw tree index, i.e. the
    /// decoded value plus `limit`; callers subtract or truncate.
    #[inline]
    pub fn bittree(&mut self, probs: &mut [u16], limit: u32, input: &[u8]) -> u32 {
        let mut symbol: u32 = 1;

        loop {
            if self.bit(&mut probs[symbol as usize], input) {
                symbol = (symbol << 1) + 1;
            } else {
                symbol <<= 1;
            }
            if symbol >= limit {
                break;
            }
        }

        symbol
    }

    /// Decode a bit tree LSB-first, adding the decoded bits into `dest`.
    #[inline]
    pub fn bittree_reverse(&mut self, probs: &mut [u16], dest: &mut u32, limit: u32, input: &[u8]) {
        let mut symbol: u32 = 1;

        for i in 0..limit {
            if self.bit(&mut probs[symbol as usize], input) {
                symbol = (symbol << 1) + 1;
                *dest += 1 << i;
            } else {
                symbol <<= 1;
            }
        }
    }

    /// Decode `limit` bits with fixed 50% probability, shifting them into
    /// `dest`.
    pub fn direct(&mut self, dest: &mut u32, limit: u32, input: &[u8]) {
        for _ in 0..limit {
            self.normalize(input);
            self.range >>= 1;
            self.code = self.code.wrapping_sub(self.range);
            let mask = 0u32.wrapping_sub(self.code >> 31);
            self.code = self.code.wrapping_add(self.range & mask);
            *dest = (*dest << 1).wrapping_add(mask.wrapping_add(1));
        }
    }

    /// True when the chunk ended exactly on a symbol boundary.
    pub fn is_finished(&self) -> bool {
        self.code == 0
    }
}

impl Default for RangeDecoder {
    fn default() -> Self {
        Self::new()
    }
}
