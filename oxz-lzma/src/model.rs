//! LZMA probability models.
//!
//! LZMA drives every decision through context-dependent adaptive
//! probabilities:
//! - literal coding (context = previous byte bits + position bits)
//! - match/rep selection flags per state
//! - match length coding
//! - distance slot, special-distance and alignment coding
//!
//! The topology is fixed at the LZMA2 maximum (`lc + lp <= 4`), so all
//! tables are plain arrays and a reset never allocates.

use crate::range_coder::PROB_INIT;

/// Maximum number of position states (`pb <= 4`).
pub const POS_STATES_MAX: usize = 1 << 4;

/// Number of states in the LZMA state machine.
pub const STATES: usize = 12;

/// States below this decode literals.
const LIT_STATES: u8 = 7;

/// Size of one literal coder (256 plain + 2*256 matched contexts).
pub const LITERAL_CODER_SIZE: usize = 0x300;

/// Maximum number of literal coders (`lc + lp <= 4`).
pub const LITERAL_CODERS_MAX: usize = 1 << 4;

/// Minimum match length.
pub const MATCH_LEN_MIN: u32 = 2;

/// Bits and symbol counts of the three length coder paths.
pub const LEN_LOW_BITS: u32 = 3;
/// Number of symbols on the low length path.
pub const LEN_LOW_SYMBOLS: usize = 1 << LEN_LOW_BITS;
/// Bits of the mid length path.
pub const LEN_MID_BITS: u32 = 3;
/// Number of symbols on the mid length path.
pub const LEN_MID_SYMBOLS: usize = 1 << LEN_MID_BITS;
/// Bits of the high length path.
pub const LEN_HIGH_BITS: u32 = 8;
/// Number of symbols on the high length path.
pub const LEN_HIGH_SYMBOLS: usize = 1 << LEN_HIGH_BITS;

/// Number of length-conditioned distance slot contexts.
pub const DIST_STATES: usize = 4;

/// Number of distance slots.
pub const DIST_SLOTS: usize = 64;

/// Distance slots below this encode the distance directly.
pub const DIST_MODEL_START: u32 = 4;

/// Distance slots from this one upward use direct bits plus the align
/// tree; below it, the special-distance reverse trees.
pub const DIST_MODEL_END: u32 = 14;

/// Number of distances covered by the special-distance trees.
pub const FULL_DISTANCES: usize = 1 << (DIST_MODEL_END / 2);

/// Bits decoded through the alignment tree.
pub const ALIGN_BITS: u32 = 4;
/// Size of the alignment tree.
pub const ALIGN_SIZE: usize = 1 << ALIGN_BITS;

/// LZMA state machine state (0..11).
///
/// The state encodes the kinds of the last one or two symbols and
/// selects the probability context for the next match/literal decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct State(u8);

impl State {
    /// Initial state.
    pub const fn new() -> Self {
        Self(0)
    }

    /// Get the state value as an index.
    pub fn value(self) -> usize {
        self.0 as usize
    }

    /// Check if the previous symbol was a literal.
    pub fn is_literal(self) -> bool {
        self.0 < LIT_STATES
    }

    /// Update state after a literal.
    pub fn update_literal(&mut self) {
        self.0 = match self.0 {
            0..=3 => 0,
            4..=9 => self.0 - 3,
            _ => self.0 - 6,
        };
    }

    /// Update state after a match.
    pub fn update_match(&mut self) {
        self.0 = if self.0 < LIT_STATES { 7 } else { 10 };
    }

    /// Update state after a long rep.
    pub fn update_long_rep(&mut self) {
        self.0 = if self.0 < LIT_STATES { 8 } else { 11 };
    }

    /// Update state after a short rep.
    pub fn update_short_rep(&mut self) {
        self.0 = if self.0 < LIT_STATES { 9 } else { 11 };
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

/// LZMA properties (lc, lp, pb) decoded from the packed chunk byte.
#[derive(Debug, Clone, Copy)]
pub struct LzmaProps {
    /// Literal context bits.
    pub lc: u32,
    /// Literal position bits, kept as a mask.
    pub literal_pos_mask: u32,
    /// Position bits, kept as a mask.
    pub pos_mask: u32,
}

impl LzmaProps {
    /// Parse a packed properties byte (`(pb * 5 + lp) * 9 + lc`).
    ///
    /// LZMA2 additionally requires `lc + lp <= 4`, which is also what
    /// bounds the literal coder table.
    pub fn from_byte(byte: u8) -> Option<Self> {
        let mut props = byte as u32;
        if props > (4 * 5 + 4) * 9 + 8 {
            return None;
        }

        let mut pb = 0;
        while props >= 9 * 5 {
            props -= 9 * 5;
            pb += 1;
        }

        let mut lp = 0;
        while props >= 9 {
            props -= 9;
            lp += 1;
        }

        let lc = props;
        if lc + lp > 4 {
            return None;
        }

        Some(Self {
            lc,
            literal_pos_mask: (1 << lp) - 1,
            pos_mask: (1 << pb) - 1,
        })
    }
}

impl Default for LzmaProps {
    fn default() -> Self {
        // lc=3, lp=0, pb=2
        Self {
            lc: 3,
            literal_pos_mask: 0,
            pos_mask: 3,
        }
    }
}

/// Length decoder model (shared shape for matches and reps).
#[derive(Debug, Clone)]
pub struct LengthDecoder {
    /// Gate bit: low path vs mid/high.
    pub choice: u16,
    /// Gate bit: mid path vs high.
    pub choice2: u16,
    /// Low length tree per position state (lengths 2..9).
    pub low: [[u16; LEN_LOW_SYMBOLS]; POS_STATES_MAX],
    /// Mid length tree per position state (lengths 10..17).
    pub mid: [[u16; LEN_MID_SYMBOLS]; POS_STATES_MAX],
    /// High length tree, shared (lengths 18..273).
    pub high: [u16; LEN_HIGH_SYMBOLS],
}

impl LengthDecoder {
    fn new() -> Self {
        Self {
            choice: PROB_INIT,
            choice2: PROB_INIT,
            low: [[PROB_INIT; LEN_LOW_SYMBOLS]; POS_STATES_MAX],
            mid: [[PROB_INIT; LEN_MID_SYMBOLS]; POS_STATES_MAX],
            high: [PROB_INIT; LEN_HIGH_SYMBOLS],
        }
    }

    fn reset(&mut self) {
        self.choice = PROB_INIT;
        self.choice2 = PROB_INIT;
        for arr in &mut self.low {
            arr.fill(PROB_INIT);
        }
        for arr in &mut self.mid {
            arr.fill(PROB_INIT);
        }
        self.high.fill(PROB_INIT);
    }
}

/// All probability tables of the LZMA decoder.
#[derive(Debug, Clone)]
pub struct LzmaModel {
    /// Literal vs match decision per (state, position state).
    pub is_match: [[u16; POS_STATES_MAX]; STATES],
    /// Match vs rep decision per state.
    pub is_rep: [u16; STATES],
    /// rep0 vs rep1..3 decision per state.
    pub is_rep0: [u16; STATES],
    /// rep1 vs rep2..3 decision per state.
    pub is_rep1: [u16; STATES],
    /// rep2 vs rep3 decision per state.
    pub is_rep2: [u16; STATES],
    /// Short rep vs long rep0 decision per (state, position state).
    pub is_rep0_long: [[u16; POS_STATES_MAX]; STATES],
    /// Distance slot trees, one per length context.
    pub dist_slot: [[u16; DIST_SLOTS]; DIST_STATES],
    /// Reverse trees for distances below `FULL_DISTANCES`.
    pub dist_special: [u16; FULL_DISTANCES - DIST_MODEL_END as usize],
    /// Reverse tree for the low four distance bits of large distances.
    pub dist_align: [u16; ALIGN_SIZE],
    /// Match length decoder.
    pub match_len: LengthDecoder,
    /// Rep length decoder.
    pub rep_len: LengthDecoder,
    /// Literal coders, selected by position and previous-byte bits.
    pub literal: [[u16; LITERAL_CODER_SIZE]; LITERAL_CODERS_MAX],
}

impl LzmaModel {
    /// Create a model with every probability at the 50% midpoint.
    pub fn new() -> Self {
        Self {
            is_match: [[PROB_INIT; POS_STATES_MAX]; STATES],
            is_rep: [PROB_INIT; STATES],
            is_rep0: [PROB_INIT; STATES],
            is_rep1: [PROB_INIT; STATES],
            is_rep2: [PROB_INIT; STATES],
            is_rep0_long: [[PROB_INIT; POS_STATES_MAX]; STATES],
            dist_slot: [[PROB_INIT; DIST_SLOTS]; DIST_STATES],
            dist_special: [PROB_INIT; FULL_DISTANCES - DIST_MODEL_END as usize],
            dist_align: [PROB_INIT; ALIGN_SIZE],
            match_len: LengthDecoder::new(),
            rep_len: LengthDecoder::new(),
            literal: [[PROB_INIT; LITERAL_CODER_SIZE]; LITERAL_CODERS_MAX],
        }
    }

    /// Reset every probability back to the midpoint.
    pub fn reset(&mut self) {
        for arr in &mut self.is_match {
            arr.fill(PROB_INIT);
        }
        self.is_rep.fill(PROB_INIT);
        self.is_rep0.fill(PROB_INIT);
        self.is_rep1.fill(PROB_INIT);
        self.is_rep2.fill(PROB_INIT);
        for arr in &mut self.is_rep0_long {
            arr.fill(PROB_INIT);
        }
        for arr in &mut self.dist_slot {
            arr.fill(PROB_INIT);
        }
        self.dist_special.fill(PROB_INIT);
        self.dist_align.fill(PROB_INIT);
        self.match_len.reset();
        self.rep_len.reset();
        for coder in &mut self.literal {
            coder.fill(PROB_INIT);
        }
    }
}

impl Default for LzmaModel {
    fn default() -> Self {
        Self::new()
    }
}
