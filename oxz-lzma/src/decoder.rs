//! LZMA symbol decoder.
//!
//! Decodes the alternating literal/match symbol stream of one LZMA2
//! chunk into the dictionary window. The decoder itself holds only the
//! probability model, the state machine, the four most-recent distances
//! and a pending match length; the range coder and the window are passed
//! in by the chunk framer, which also guarantees that enough contiguous
//! input is available for at least one full symbol (see
//! [`crate::range_coder::LZMA_IN_REQUIRED`]).

use crate::dict::DictView;
use crate::model::{
    ALIGN_BITS, DIST_MODEL_END, DIST_MODEL_START, DIST_SLOTS, DIST_STATES, LEN_HIGH_SYMBOLS,
    LEN_LOW_SYMBOLS, LEN_MID_SYMBOLS, LengthDecoder, LzmaModel, LzmaProps, MATCH_LEN_MIN, State,
};
use crate::range_coder::RangeDecoder;
use oxz_core::error::{Result, XzError};

/// Distance slot context from the match length.
fn dist_state(len: u32) -> usize {
    if len < DIST_STATES as u32 + MATCH_LEN_MIN {
        (len - MATCH_LEN_MIN) as usize
    } else {
        DIST_STATES - 1
    }
}

/// Decode one length through the low/mid/high gate bits.
fn decode_len(
    rc: &mut RangeDecoder,
    l: &mut LengthDecoder,
    pos_state: usize,
    input: &[u8],
) -> u32 {
    let (len_base, symbol) = if !rc.bit(&mut l.choice, input) {
        let limit = LEN_LOW_SYMBOLS as u32;
        (MATCH_LEN_MIN, rc.bittree(&mut l.low[pos_state], limit, input) - limit)
    } else if !rc.bit(&mut l.choice2, input) {
        let limit = LEN_MID_SYMBOLS as u32;
        (
            MATCH_LEN_MIN + LEN_LOW_SYMBOLS as u32,
            rc.bittree(&mut l.mid[pos_state], limit, input) - limit,
        )
    } else {
        let limit = LEN_HIGH_SYMBOLS as u32;
        (
            MATCH_LEN_MIN + LEN_LOW_SYMBOLS as u32 + LEN_MID_SYMBOLS as u32,
            rc.bittree(&mut l.high, limit, input) - limit,
        )
    };

    len_base + symbol
}

/// LZMA decoder state for one Block.
#[derive(Debug)]
pub struct LzmaDec {
    /// Most recent match distances, rep0 first.
    rep0: u32,
    rep1: u32,
    rep2: u32,
    rep3: u32,
    /// State machine over recent symbol kinds.
    state: State,
    /// Length still to copy when the window filled mid-match.
    len: u32,
    /// Properties from the current chunk.
    props: LzmaProps,
    /// Probability tables. Boxed: ~28 KiB.
    probs: Box<LzmaModel>,
}

impl LzmaDec {
    /// Create a decoder with default properties; the first chunk of a
    /// Block always carries a properties byte that overwrites them.
    pub fn new() -> Self {
        Self {
            rep0: 0,
            rep1: 0,
            rep2: 0,
            rep3: 0,
            state: State::new(),
            len: 0,
            props: LzmaProps::default(),
            probs: Box::new(LzmaModel::new()),
        }
    }

    /// Reset the state machine, distances and all probabilities.
    pub fn reset(&mut self) {
        self.state = State::new();
        self.rep0 = 0;
        self.rep1 = 0;
        self.rep2 = 0;
        self.rep3 = 0;
        self.len = 0;
        self.probs.reset();
    }

    /// Parse a chunk properties byte and reset the decoder.
    pub fn set_props(&mut self, byte: u8) -> Result<()> {
        let props = LzmaProps::from_byte(byte)
            .ok_or_else(|| XzError::data("invalid LZMA properties byte"))?;
        self.props = props;
        self.reset();
        Ok(())
    }

    /// Match length left over from the previous call.
    pub fn pending_len(&self) -> u32 {
        self.len
    }

    /// Decode symbols until the window limit or the input limit is hit.
    pub fn run(
        &mut self,
        rc: &mut RangeDecoder,
        dict: &mut DictView<'_>,
        input: &[u8],
    ) -> Result<()> {
        // Finish a match that ran into the window limit last time.
        if dict.has_space() && self.len > 0 {
            let mut len = self.len;
            dict.repeat(&mut len, self.rep0);
            self.len = len;
        }

        // One symbol consumes at most 21 input bytes and produces at
        // most 273 output bytes.
        while dict.has_space() && rc.in_pos < rc.in_limit {
            let pos_state = dict.pos() & self.props.pos_mask as usize;

            if !rc.bit(&mut self.probs.is_match[self.state.value()][pos_state], input) {
                self.literal(rc, dict, input);
            } else {
                if rc.bit(&mut self.probs.is_rep[self.state.value()], input) {
                    self.rep_match(rc, pos_state, input);
                } else {
                    self.match_dist(rc, pos_state, input);
                }

                let mut len = self.len;
                let ok = dict.repeat(&mut len, self.rep0);
                self.len = len;
                if !ok {
                    return Err(XzError::data("match distance exceeds dictionary"));
                }
            }
        }

        // Keep the range decoder normalized between calls so the end of
        // the chunk can be detected with a plain code comparison.
        rc.normalize(input);

        Ok(())
    }

    /// Decode a literal, with the match-byte context when the previous
    /// symbol was a match.
    fn literal(&mut self, rc: &mut RangeDecoder, dict: &mut DictView<'_>, input: &[u8]) {
        let prev_byte = dict.get(0) as u32;
        let low = (prev_byte >> (8 - self.props.lc)) as usize;
        let high = (dict.pos() & self.props.literal_pos_mask as usize) << self.props.lc;
        let coder = low + high;

        let symbol = if self.state.is_literal() {
            rc.bittree(&mut self.probs.literal[coder], 0x100, input)
        } else {
            let mut symbol: u32 = 1;
            let mut match_byte = (dict.get(self.rep0) as u32) << 1;
            let mut offset: u32 = 0x100;

            while symbol < 0x100 {
                let match_bit = match_byte & offset;
                match_byte <<= 1;
                let i = (offset + match_bit + symbol) as usize;

                if rc.bit(&mut self.probs.literal[coder][i], input) {
                    symbol = (symbol << 1) + 1;
                    offset &= match_bit;
                } else {
                    symbol <<= 1;
                    offset &= !match_bit;
                }
            }

            symbol
        };

        dict.put(symbol as u8);
        self.state.update_literal();
    }

    /// Decode a new match: length, then distance through the slot,
    /// special or align trees.
    fn match_dist(&mut self, rc: &mut RangeDecoder, pos_state: usize, input: &[u8]) {
        self.state.update_match();

        self.rep3 = self.rep2;
        self.rep2 = self.rep1;
        self.rep1 = self.rep0;

        self.len = decode_len(rc, &mut self.probs.match_len, pos_state, input);

        let slot_probs = &mut self.probs.dist_slot[dist_state(self.len)];
        let dist_slot = rc.bittree(slot_probs, DIST_SLOTS as u32, input) - DIST_SLOTS as u32;

        if dist_slot < DIST_MODEL_START {
            self.rep0 = dist_slot;
        } else {
            let limit = (dist_slot >> 1) - 1;
            self.rep0 = 2 + (dist_slot & 1);

            if dist_slot < DIST_MODEL_END {
                self.rep0 <<= limit;
                let base = (self.rep0 - dist_slot - 1) as usize;
                rc.bittree_reverse(
                    &mut self.probs.dist_special[base..],
                    &mut self.rep0,
                    limit,
                    input,
                );
            } else {
                rc.direct(&mut self.rep0, limit - ALIGN_BITS, input);
                self.rep0 <<= ALIGN_BITS;
                rc.bittree_reverse(&mut self.probs.dist_align, &mut self.rep0, ALIGN_BITS, input);
            }
        }
    }

    /// Decode a rep match: one of the four most recent distances, or a
    /// single byte at rep0 (short rep).
    fn rep_match(&mut self, rc: &mut RangeDecoder, pos_state: usize, input: &[u8]) {
        if !rc.bit(&mut self.probs.is_rep0[self.state.value()], input) {
            if !rc.bit(
                &mut self.probs.is_rep0_long[self.state.value()][pos_state],
                input,
            ) {
                self.state.update_short_rep();
                self.len = 1;
                return;
            }
        } else {
            let tmp;

            if !rc.bit(&mut self.probs.is_rep1[self.state.value()], input) {
                tmp = self.rep1;
            } else {
                if !rc.bit(&mut self.probs.is_rep2[self.state.value()], input) {
                    tmp = self.rep2;
                } else {
                    tmp = self.rep3;
                    self.rep3 = self.rep2;
                }
                self.rep2 = self.rep1;
            }

            self.rep1 = self.rep0;
            self.rep0 = tmp;
        }

        self.state.update_long_rep();
        self.len = decode_len(rc, &mut self.probs.rep_len, pos_state, input);
    }
}

impl Default for LzmaDec {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dist_state() {
        assert_eq!(dist_state(2), 0);
        assert_eq!(dist_state(3), 1);
        assert_eq!(dist_state(4), 2);
        assert_eq!(dist_state(5), 3);
        assert_eq!(dist_state(273), 3);
    }

    #[test]
    fn test_set_props_rejects_garbage() {
        let mut dec = LzmaDec::new();
        assert!(dec.set_props(0xFF).is_err());
        assert!(dec.set_props(0x5D).is_ok());
        assert_eq!(dec.props.lc, 3);
    }
}
