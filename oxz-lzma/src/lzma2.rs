//! LZMA2 chunk framing.
//!
//! LZMA2 is a container around LZMA that adds uncompressed chunks,
//! dictionary/state reset control and chunk-based streaming.
//!
//! ## Chunk format
//!
//! Each chunk starts with a control byte:
//! - `0x00`: end of the LZMA2 stream
//! - `0x01`: uncompressed chunk, dictionary reset
//! - `0x02`: uncompressed chunk, no reset
//! - `0x80..=0xFF`: LZMA chunk; bits 5..6 select the reset flavor
//!   (none / state / state+props / state+props+dict) and the low five
//!   bits are bits 16..20 of the uncompressed size minus one
//!
//! Sizes follow as 16-bit big-endian "minus one" fields, then a
//! properties byte when the flavor says so, then the range coded
//! payload.
//!
//! ## Suspension
//!
//! The decoder can stop at any byte boundary of the framing, but the
//! range coder cannot stop inside a symbol. A 63-byte bounce buffer
//! absorbs fragmented chunk payloads: symbol decoding only starts when
//! either 21 contiguous bytes are available or the buffered tail is the
//! entire rest of the chunk (zero padded, so overreads are defined).

use crate::decoder::LzmaDec;
use crate::dict::{DictView, Dictionary};
use crate::range_coder::{LZMA_IN_REQUIRED, RC_INIT_BYTES, RangeDecoder};
use log::trace;
use oxz_core::error::{Result, Status, XzError};
use oxz_core::{Mode, XzBuf};

/// Control byte constants.
pub mod control {
    /// End of the LZMA2 stream.
    pub const END: u8 = 0x00;
    /// Uncompressed chunk with dictionary reset.
    pub const UNCOMPRESSED_RESET: u8 = 0x01;
    /// Uncompressed chunk without reset.
    pub const UNCOMPRESSED: u8 = 0x02;
    /// First LZMA chunk value (no reset).
    pub const LZMA: u8 = 0x80;
    /// LZMA chunk values from here reset the state.
    pub const LZMA_STATE_RESET: u8 = 0xA0;
    /// LZMA chunk values from here also carry new properties.
    pub const LZMA_PROPS_RESET: u8 = 0xC0;
    /// LZMA chunk values from here also reset the dictionary.
    pub const LZMA_DICT_RESET: u8 = 0xE0;
}

/// Decode the dictionary size encoded in the Block Header filter
/// properties. Forty values are defined: `(2 | (props & 1)) <<
/// (props / 2 + 11)`, from 4 KiB up to 3 GiB.
pub fn dict_size_from_props(props: u8) -> Option<u32> {
    if props > 39 {
        return None;
    }

    Some((2 + (props & 1) as u32) << (props / 2 + 11))
}

/// Chunk framer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lzma2Seq {
    Control,
    Uncompressed1,
    Uncompressed2,
    Compressed0,
    Compressed1,
    Properties,
    LzmaPrepare,
    LzmaRun,
    Copy,
}

/// Bounce buffer for fragmented chunk payloads. Three times the symbol
/// maximum: up to two symbols' worth of buffered input plus the zero
/// padding overreads may touch.
#[derive(Debug)]
struct ChunkTemp {
    size: usize,
    buf: [u8; 3 * LZMA_IN_REQUIRED],
}

/// Incremental LZMA2 decoder for one filter chain slot.
#[derive(Debug)]
pub struct Lzma2Decoder {
    rc: RangeDecoder,
    dict: Dictionary,
    lzma: LzmaDec,
    sequence: Lzma2Seq,
    next_sequence: Lzma2Seq,
    /// Uncompressed bytes remaining in the current chunk.
    uncompressed: u32,
    /// Compressed bytes remaining in the current chunk. Also used as
    /// the byte counter of uncompressed chunks.
    compressed: u32,
    /// The first chunk after a Block Header must reset the dictionary.
    need_dict_reset: bool,
    /// No properties seen yet; a chunk without them is an error.
    need_props: bool,
    temp: ChunkTemp,
}

impl Lzma2Decoder {
    /// Create a decoder. In multi-call mode `dict_max` bytes of
    /// dictionary are allocated once, here; single-call mode allocates
    /// nothing.
    pub fn new(mode: Mode, dict_max: u32) -> Self {
        Self {
            rc: RangeDecoder::new(),
            dict: Dictionary::new(mode, dict_max),
            lzma: LzmaDec::new(),
            sequence: Lzma2Seq::Control,
            next_sequence: Lzma2Seq::Control,
            uncompressed: 0,
            compressed: 0,
            need_dict_reset: true,
            need_props: true,
            temp: ChunkTemp {
                size: 0,
                buf: [0; 3 * LZMA_IN_REQUIRED],
            },
        }
    }

    /// Decode the Block Header dictionary-size properties byte and
    /// prepare for the Block's first chunk.
    pub fn reset(&mut self, props: u8) -> Result<()> {
        let size = dict_size_from_props(props)
            .ok_or_else(|| XzError::options(format!("unsupported dictionary size 0x{props:02x}")))?;

        self.dict.size = size;

        if !self.dict.is_single() {
            if size > self.dict.size_max {
                return Err(XzError::mem_limit(size, self.dict.size_max));
            }
            self.dict.end = size as usize;
        }

        trace!("lzma2 reset, dictionary size {size}");

        self.sequence = Lzma2Seq::Control;
        self.need_dict_reset = true;
        self.need_props = true;
        self.temp.size = 0;

        Ok(())
    }

    /// Decode from `b.input` into `b.output` until one of them runs
    /// out or the LZMA2 end marker is reached.
    pub fn run(&mut self, b: &mut XzBuf<'_>) -> Result<Status> {
        let mut backing = std::mem::take(&mut self.dict.buf);
        let ret = self.run_inner(b, &mut backing);
        self.dict.buf = backing;
        ret
    }

    fn run_inner(&mut self, b: &mut XzBuf<'_>, backing: &mut [u8]) -> Result<Status> {
        while !b.in_exhausted()
            || matches!(self.sequence, Lzma2Seq::LzmaRun | Lzma2Seq::LzmaPrepare)
        {
            match self.sequence {
                Lzma2Seq::Control => {
                    let ctrl = b.input[b.in_pos];
                    b.in_pos += 1;

                    if ctrl == control::END {
                        return Ok(Status::StreamEnd);
                    }

                    trace!("lzma2 chunk, control 0x{ctrl:02x}");

                    if ctrl >= control::LZMA_DICT_RESET || ctrl == control::UNCOMPRESSED_RESET {
                        self.need_props = true;
                        self.need_dict_reset = false;
                        self.dict.reset(b.output.len(), b.out_pos);
                    } else if self.need_dict_reset {
                        return Err(XzError::data(
                            "first LZMA2 chunk of a Block must reset the dictionary",
                        ));
                    }

                    if ctrl >= control::LZMA {
                        self.uncompressed = ((ctrl & 0x1F) as u32) << 16;
                        self.sequence = Lzma2Seq::Uncompressed1;

                        if ctrl >= control::LZMA_PROPS_RESET {
                            self.need_props = false;
                            self.next_sequence = Lzma2Seq::Properties;
                        } else if self.need_props {
                            return Err(XzError::data("LZMA2 chunk without properties"));
                        } else {
                            self.next_sequence = Lzma2Seq::LzmaPrepare;
                            if ctrl >= control::LZMA_STATE_RESET {
                                self.lzma.reset();
                                self.rc.reset();
                            }
                        }
                    } else {
                        if ctrl > control::UNCOMPRESSED {
                            return Err(XzError::data("invalid LZMA2 control byte"));
                        }

                        self.sequence = Lzma2Seq::Compressed0;
                        self.next_sequence = Lzma2Seq::Copy;
                    }
                }

                Lzma2Seq::Uncompressed1 => {
                    self.uncompressed += (b.input[b.in_pos] as u32) << 8;
                    b.in_pos += 1;
                    self.sequence = Lzma2Seq::Uncompressed2;
                }

                Lzma2Seq::Uncompressed2 => {
                    self.uncompressed += b.input[b.in_pos] as u32 + 1;
                    b.in_pos += 1;
                    self.sequence = Lzma2Seq::Compressed0;
                }

                Lzma2Seq::Compressed0 => {
                    self.compressed = (b.input[b.in_pos] as u32) << 8;
                    b.in_pos += 1;
                    self.sequence = Lzma2Seq::Compressed1;
                }

                Lzma2Seq::Compressed1 => {
                    self.compressed += b.input[b.in_pos] as u32 + 1;
                    b.in_pos += 1;
                    self.sequence = self.next_sequence;
                }

                Lzma2Seq::Properties => {
                    self.lzma.set_props(b.input[b.in_pos])?;
                    b.in_pos += 1;
                    self.rc.reset();
                    self.sequence = Lzma2Seq::LzmaPrepare;
                }

                Lzma2Seq::LzmaPrepare => {
                    if self.compressed < RC_INIT_BYTES {
                        return Err(XzError::data("LZMA2 chunk shorter than range coder init"));
                    }

                    if !self.rc.read_init(b)? {
                        return Ok(Status::NeedsMore);
                    }

                    self.compressed -= RC_INIT_BYTES;
                    self.sequence = Lzma2Seq::LzmaRun;
                }

                Lzma2Seq::LzmaRun => {
                    let out_max = b.out_avail().min(self.uncompressed as usize);
                    self.dict.set_limit(out_max);

                    self.lzma_run_chunk(b, backing)?;

                    let flushed = dict_flush(&mut self.dict, backing, b);
                    self.uncompressed -= flushed as u32;

                    if self.uncompressed == 0 {
                        if self.compressed > 0
                            || self.lzma.pending_len() > 0
                            || !self.rc.is_finished()
                        {
                            return Err(XzError::data("LZMA2 chunk did not end cleanly"));
                        }

                        self.rc.reset();
                        self.sequence = Lzma2Seq::Control;
                    } else if self.compressed == 0
                        && self.temp.size == 0
                        && self.lzma.pending_len() == 0
                    {
                        // All payload consumed, nothing pending, yet
                        // the declared uncompressed size was not met.
                        return Err(XzError::data(
                            "LZMA2 chunk ended before its uncompressed size",
                        ));
                    } else if b.out_full()
                        || (b.in_exhausted() && (self.temp.size as u32) < self.compressed)
                    {
                        return Ok(Status::NeedsMore);
                    }
                }

                Lzma2Seq::Copy => {
                    dict_uncompressed(&mut self.dict, backing, b, &mut self.compressed);
                    if self.compressed > 0 {
                        return Ok(Status::NeedsMore);
                    }

                    self.sequence = Lzma2Seq::Control;
                }
            }
        }

        Ok(Status::NeedsMore)
    }

    /// Drive the symbol decoder over the current chunk, bouncing
    /// fragmented input through the temp buffer so a symbol never
    /// straddles a push boundary.
    fn lzma_run_chunk(&mut self, b: &mut XzBuf<'_>, backing: &mut [u8]) -> Result<()> {
        let mut in_avail = b.in_avail();

        if self.temp.size > 0 || self.compressed == 0 {
            let mut tmp = 2 * LZMA_IN_REQUIRED - self.temp.size;
            if tmp > self.compressed as usize - self.temp.size {
                tmp = self.compressed as usize - self.temp.size;
            }
            if tmp > in_avail {
                tmp = in_avail;
            }

            self.temp.buf[self.temp.size..self.temp.size + tmp]
                .copy_from_slice(&b.input[b.in_pos..b.in_pos + tmp]);

            if self.temp.size + tmp == self.compressed as usize {
                // The whole rest of the chunk is buffered; pad with
                // zeros so overreads past the chunk end are defined.
                self.temp.buf[self.temp.size + tmp..].fill(0);
                self.rc.in_limit = self.temp.size + tmp;
            } else if self.temp.size + tmp < LZMA_IN_REQUIRED {
                self.temp.size += tmp;
                b.in_pos += tmp;
                return Ok(());
            } else {
                self.rc.in_limit = self.temp.size + tmp - LZMA_IN_REQUIRED;
            }

            self.rc.in_pos = 0;

            {
                let single = self.dict.is_single();
                let mem: &mut [u8] = if single { &mut *b.output } else { &mut *backing };
                let mut dict = DictView::new(mem, &mut self.dict);
                self.lzma.run(&mut self.rc, &mut dict, &self.temp.buf)?;
            }

            if self.rc.in_pos > self.temp.size + tmp {
                return Err(XzError::data("range coder overran the LZMA2 chunk"));
            }

            self.compressed -= self.rc.in_pos as u32;

            if self.rc.in_pos < self.temp.size {
                self.temp.size -= self.rc.in_pos;
                self.temp.buf.copy_within(self.rc.in_pos..self.rc.in_pos + self.temp.size, 0);
                return Ok(());
            }

            b.in_pos += self.rc.in_pos - self.temp.size;
            self.temp.size = 0;
        }

        in_avail = b.in_avail();
        if in_avail >= LZMA_IN_REQUIRED {
            self.rc.in_pos = b.in_pos;

            if in_avail >= self.compressed as usize + LZMA_IN_REQUIRED {
                self.rc.in_limit = b.in_pos + self.compressed as usize;
            } else {
                self.rc.in_limit = b.input.len() - LZMA_IN_REQUIRED;
            }

            {
                let single = self.dict.is_single();
                let mem: &mut [u8] = if single { &mut *b.output } else { &mut *backing };
                let mut dict = DictView::new(mem, &mut self.dict);
                self.lzma.run(&mut self.rc, &mut dict, b.input)?;
            }

            let used = self.rc.in_pos - b.in_pos;
            if used > self.compressed as usize {
                return Err(XzError::data("range coder overran the LZMA2 chunk"));
            }

            self.compressed -= used as u32;
            b.in_pos = self.rc.in_pos;
        }

        in_avail = b.in_avail();
        if in_avail < LZMA_IN_REQUIRED {
            let copy = in_avail.min(self.compressed as usize);
            self.temp.buf[..copy].copy_from_slice(&b.input[b.in_pos..b.in_pos + copy]);
            self.temp.size = copy;
            b.in_pos += copy;
        }

        Ok(())
    }
}

/// Copy the bytes of an uncompressed chunk straight through input,
/// window and output.
fn dict_uncompressed(d: &mut Dictionary, backing: &mut [u8], b: &mut XzBuf<'_>, left: &mut u32) {
    while *left > 0 && !b.in_exhausted() && !b.out_full() {
        let mut copy_size = b.in_avail().min(b.out_avail());
        if copy_size > d.end - d.pos {
            copy_size = d.end - d.pos;
        }
        if copy_size > *left as usize {
            copy_size = *left as usize;
        }

        *left -= copy_size as u32;

        if d.mode.is_single() {
            // The window is the output buffer; one copy does both.
            let dst = d.base + d.pos;
            b.output[dst..dst + copy_size]
                .copy_from_slice(&b.input[b.in_pos..b.in_pos + copy_size]);
            d.pos += copy_size;
            if d.full < d.pos {
                d.full = d.pos;
            }
        } else {
            backing[d.pos..d.pos + copy_size]
                .copy_from_slice(&b.input[b.in_pos..b.in_pos + copy_size]);
            d.pos += copy_size;
            if d.full < d.pos {
                d.full = d.pos;
            }
            if d.pos == d.end {
                d.pos = 0;
            }

            b.output[b.out_pos..b.out_pos + copy_size]
                .copy_from_slice(&b.input[b.in_pos..b.in_pos + copy_size]);
        }

        d.start = d.pos;
        b.out_pos += copy_size;
        b.in_pos += copy_size;
    }
}

/// Hand freshly decoded window bytes to the caller. In single-call mode
/// the bytes are already in place and only the position advances.
fn dict_flush(d: &mut Dictionary, backing: &[u8], b: &mut XzBuf<'_>) -> usize {
    let copy_size = d.pos - d.start;

    if !d.mode.is_single() {
        if d.pos == d.end {
            d.pos = 0;
        }

        b.output[b.out_pos..b.out_pos + copy_size]
            .copy_from_slice(&backing[d.start..d.start + copy_size]);
    }

    d.start = d.pos;
    b.out_pos += copy_size;
    copy_size
}
