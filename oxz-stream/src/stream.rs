//! XZ Stream state machine and decoder facade.
//!
//! An XZ Stream is framed as:
//!
//! ```text
//! Stream Header (12) | Block* | Index | Stream Footer (12)
//! Block = Block Header (8..1024) | Compressed Data | Padding | Check
//! ```
//!
//! The parser is an explicit state machine: every state remembers where
//! it suspended through a position cursor, so the decoder can be driven
//! a byte at a time. Variable-sized framing fields (headers, footer)
//! are first collected into a scratch buffer and decoded from there,
//! which keeps the field parsers simple.
//!
//! While Blocks are decoded, the machine folds per-Block sizes into a
//! running hash triple; the Index must reproduce the same triple, and
//! the Stream Footer must agree with the Index size and the Stream
//! Flags. A CRC32 of each Block's uncompressed output is verified when
//! the Stream Flags enable it.

use crate::bcj::{BcjDecoder, BcjFilter};
use crate::vli::{VLI_UNKNOWN, Vli};
use log::{debug, trace};
use oxz_core::crc::Crc32;
use oxz_core::error::{Result, Status, XzError};
use oxz_core::{Mode, XzBuf};
use oxz_lzma::Lzma2Decoder;

/// Stream Header magic bytes: 0xFD, '7', 'z', 'X', 'Z', 0x00.
pub const HEADER_MAGIC: [u8; 6] = [0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00];

/// Stream Footer magic bytes: 'Y', 'Z'.
pub const FOOTER_MAGIC: [u8; 2] = [0x59, 0x5A];

/// Size of Stream Header and Stream Footer.
const STREAM_HEADER_SIZE: usize = 12;

/// Maximum Block Header size; also the scratch buffer size.
const BLOCK_HEADER_SIZE_MAX: usize = 1024;

fn read_le32(buf: &[u8]) -> u32 {
    u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
}

/// Parse position within the Stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Seq {
    StreamHeader,
    BlockStart,
    BlockHeader,
    BlockUncompress,
    BlockPadding,
    BlockCheck,
    IndexCount,
    IndexUnpadded,
    IndexUncompressed,
    IndexPadding,
    IndexCrc32,
    StreamFooter,
}

/// Hash triple used to cross-validate the Index against the decoded
/// Blocks: additive sums plus a CRC32 folded over each record.
#[derive(Debug, Default, PartialEq, Eq)]
struct DecHash {
    unpadded: u64,
    uncompressed: u64,
    crc32: u32,
}

impl DecHash {
    fn fold(&mut self) {
        let mut crc = Crc32::resume(self.crc32);
        crc.update(&self.unpadded.to_le_bytes());
        crc.update(&self.uncompressed.to_le_bytes());
        crc.update(&self.crc32.to_le_bytes());
        self.crc32 = crc.value();
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Sizes declared in the current Block Header.
#[derive(Debug)]
struct BlockHeader {
    /// Compressed Size field, or `VLI_UNKNOWN` when absent.
    compressed: u64,
    /// Uncompressed Size field, or `VLI_UNKNOWN` when absent.
    uncompressed: u64,
    /// Size of the Block Header itself.
    size: u32,
    /// BCJ filter preceding LZMA2, if any.
    bcj: Option<BcjFilter>,
}

/// Running accounting for the decoded Blocks.
#[derive(Debug, Default)]
struct BlockInfo {
    /// Observed compressed size of the current Block.
    compressed: u64,
    /// Observed uncompressed size of the current Block.
    uncompressed: u64,
    /// Blocks decoded so far.
    count: u64,
    hash: DecHash,
}

/// Running accounting for the Index field.
#[derive(Debug, Default)]
struct IndexInfo {
    /// Bytes of the Index parsed so far (excluding its CRC32).
    size: u64,
    /// Records still expected.
    count: u64,
    hash: DecHash,
}

/// Scratch buffer for fixed-size framing fields.
#[derive(Debug)]
struct Temp {
    pos: usize,
    size: usize,
    buf: [u8; BLOCK_HEADER_SIZE_MAX],
}

/// Streaming XZ decoder.
///
/// Created once with [`XzDecoder::new`]; all memory is allocated there.
/// [`XzDecoder::run`] never blocks: it consumes and produces what the
/// buffers allow and returns [`Status::NeedsMore`] at a suspension
/// point.
#[derive(Debug)]
pub struct XzDecoder {
    mode: Mode,
    sequence: Seq,
    /// Byte offset inside the CRC32 check fields.
    pos: u32,
    vli: Vli,
    /// Input position at the start of this run step, for Index size and
    /// Block size accounting.
    in_start: usize,
    out_start: usize,
    /// CRC32 over Block output or Index bytes.
    crc: Crc32,
    /// Stream Flags said check = CRC32.
    has_crc32: bool,
    /// Two-strike progress latch (multi-call only).
    allow_buf_error: bool,
    block_header: BlockHeader,
    block: BlockInfo,
    index: IndexInfo,
    temp: Temp,
    lzma2: Lzma2Decoder,
    bcj: BcjDecoder,
}

impl XzDecoder {
    /// Create a decoder. `dict_max == 0` selects single-call mode where
    /// the caller's output buffer doubles as the dictionary; any other
    /// value preallocates a dictionary of that many bytes for
    /// multi-call streaming.
    pub fn new(dict_max: u32) -> Self {
        let mode = if dict_max == 0 {
            Mode::SingleCall
        } else {
            Mode::MultiCall
        };

        let mut s = Self {
            mode,
            sequence: Seq::StreamHeader,
            pos: 0,
            vli: Vli::default(),
            in_start: 0,
            out_start: 0,
            crc: Crc32::new(),
            has_crc32: false,
            allow_buf_error: false,
            block_header: BlockHeader {
                compressed: VLI_UNKNOWN,
                uncompressed: VLI_UNKNOWN,
                size: 0,
                bcj: None,
            },
            block: BlockInfo::default(),
            index: IndexInfo::default(),
            temp: Temp {
                pos: 0,
                size: 0,
                buf: [0; BLOCK_HEADER_SIZE_MAX],
            },
            lzma2: Lzma2Decoder::new(mode, dict_max),
            bcj: BcjDecoder::new(mode),
        };
        s.reset();
        s
    }

    /// Return to the start-of-stream state. In multi-call mode this
    /// permits decoding another stream with the same allocations; in
    /// single-call mode it happens implicitly on every run.
    pub fn reset(&mut self) {
        self.sequence = Seq::StreamHeader;
        self.allow_buf_error = false;
        self.pos = 0;
        self.vli = Vli::default();
        self.crc.reset();

        self.block.compressed = 0;
        self.block.uncompressed = 0;
        self.block.count = 0;
        self.block.hash.reset();

        self.index.size = 0;
        self.index.count = 0;
        self.index.hash.reset();

        self.temp.pos = 0;
        self.temp.size = STREAM_HEADER_SIZE;
    }

    /// Decode as much as the buffers allow.
    ///
    /// `Ok(Status::StreamEnd)` means the whole Stream was decoded and
    /// every integrity check passed. `Ok(Status::NeedsMore)` asks the
    /// caller to refill input or drain output. Errors are terminal
    /// until [`XzDecoder::reset`].
    pub fn run(&mut self, b: &mut XzBuf<'_>) -> Result<Status> {
        if self.mode.is_single() {
            self.reset();
        }

        let in_start = b.in_pos;
        let out_start = b.out_pos;
        let mut ret = self.dec_main(b);

        if self.mode.is_single() {
            if let Ok(Status::NeedsMore) = ret {
                ret = Err(if b.in_exhausted() {
                    XzError::data("truncated stream")
                } else {
                    XzError::Buf
                });
            }

            if !matches!(ret, Ok(Status::StreamEnd)) {
                // The output buffer was the decoding workspace; without
                // a successful end it holds nothing usable.
                b.in_pos = in_start;
                b.out_pos = out_start;
            }
        } else if matches!(ret, Ok(Status::NeedsMore))
            && in_start == b.in_pos
            && out_start == b.out_pos
        {
            // Two consecutive calls without any progress mean the
            // caller cannot supply what is missing.
            if self.allow_buf_error {
                ret = Err(XzError::Buf);
            }

            self.allow_buf_error = true;
        } else {
            self.allow_buf_error = false;
        }

        ret
    }

    fn dec_main(&mut self, b: &mut XzBuf<'_>) -> Result<Status> {
        self.in_start = b.in_pos;

        loop {
            match self.sequence {
                Seq::StreamHeader => {
                    if !self.fill_temp(b) {
                        return Ok(Status::NeedsMore);
                    }

                    self.dec_stream_header()?;
                    self.sequence = Seq::BlockStart;
                }

                Seq::BlockStart => {
                    if b.in_exhausted() {
                        return Ok(Status::NeedsMore);
                    }

                    if b.input[b.in_pos] == 0 {
                        // Index indicator. It is part of the Index
                        // field, so the size/CRC accounting starts at
                        // this byte.
                        self.in_start = b.in_pos;
                        b.in_pos += 1;
                        self.sequence = Seq::IndexCount;
                    } else {
                        self.block_header.size = (b.input[b.in_pos] as u32 + 1) * 4;
                        self.temp.size = self.block_header.size as usize;
                        self.temp.pos = 0;
                        self.sequence = Seq::BlockHeader;
                    }
                }

                Seq::BlockHeader => {
                    if !self.fill_temp(b) {
                        return Ok(Status::NeedsMore);
                    }

                    self.dec_block_header()?;
                    self.sequence = Seq::BlockUncompress;
                }

                Seq::BlockUncompress => {
                    self.in_start = b.in_pos;
                    self.out_start = b.out_pos;

                    let ret = self.dec_raw(b);

                    self.block.compressed += (b.in_pos - self.in_start) as u64;
                    self.block.uncompressed += (b.out_pos - self.out_start) as u64;

                    // Bounds against declared sizes hold during the
                    // Block, not only at its end. VLI_UNKNOWN is the
                    // maximum value, so absent fields never trip this.
                    if self.block.compressed > self.block_header.compressed
                        || self.block.uncompressed > self.block_header.uncompressed
                    {
                        return Err(XzError::data("Block grew past its declared sizes"));
                    }

                    if self.has_crc32 {
                        self.crc.update(&b.output[self.out_start..b.out_pos]);
                    }

                    if ret? != Status::StreamEnd {
                        return Ok(Status::NeedsMore);
                    }

                    if self.block_header.compressed != VLI_UNKNOWN
                        && self.block_header.compressed != self.block.compressed
                    {
                        return Err(XzError::data("Compressed Size does not match"));
                    }

                    if self.block_header.uncompressed != VLI_UNKNOWN
                        && self.block_header.uncompressed != self.block.uncompressed
                    {
                        return Err(XzError::data("Uncompressed Size does not match"));
                    }

                    self.block.hash.unpadded +=
                        self.block_header.size as u64 + self.block.compressed;
                    if self.has_crc32 {
                        self.block.hash.unpadded += 4;
                    }
                    self.block.hash.uncompressed += self.block.uncompressed;
                    self.block.hash.fold();

                    self.block.count += 1;
                    debug!(
                        "block {} done: {} -> {} bytes",
                        self.block.count, self.block.compressed, self.block.uncompressed
                    );

                    self.sequence = Seq::BlockPadding;
                }

                Seq::BlockPadding => {
                    // Compressed Data plus Block Padding is a multiple
                    // of four; block.compressed has served its purpose
                    // and counts the padding here.
                    while self.block.compressed & 3 != 0 {
                        if b.in_exhausted() {
                            return Ok(Status::NeedsMore);
                        }

                        let byte = b.input[b.in_pos];
                        b.in_pos += 1;

                        if byte != 0 {
                            return Err(XzError::data("non-zero Block Padding"));
                        }

                        self.block.compressed += 1;
                    }

                    self.sequence = Seq::BlockCheck;
                }

                Seq::BlockCheck => {
                    if self.has_crc32 && self.crc32_validate(b)? != Status::StreamEnd {
                        return Ok(Status::NeedsMore);
                    }

                    self.sequence = Seq::BlockStart;
                }

                Seq::IndexCount | Seq::IndexUnpadded | Seq::IndexUncompressed => {
                    loop {
                        match self.vli.decode(b.input, &mut b.in_pos) {
                            Ok(Status::StreamEnd) => {}
                            Ok(Status::NeedsMore) => {
                                self.index_update(b);
                                return Ok(Status::NeedsMore);
                            }
                            Err(e) => {
                                self.index_update(b);
                                return Err(e);
                            }
                        }

                        match self.sequence {
                            Seq::IndexCount => {
                                self.index.count = self.vli.value;

                                if self.index.count != self.block.count {
                                    return Err(XzError::data(
                                        "Index record count does not match Block count",
                                    ));
                                }

                                self.sequence = Seq::IndexUnpadded;
                            }
                            Seq::IndexUnpadded => {
                                self.index.hash.unpadded += self.vli.value;
                                self.sequence = Seq::IndexUncompressed;
                            }
                            Seq::IndexUncompressed => {
                                self.index.hash.uncompressed += self.vli.value;
                                self.index.hash.fold();
                                self.index.count -= 1;
                                self.sequence = Seq::IndexUnpadded;
                            }
                            _ => unreachable!(),
                        }

                        if self.index.count == 0 {
                            break;
                        }
                    }

                    self.sequence = Seq::IndexPadding;
                }

                Seq::IndexPadding => {
                    while (self.index.size + (b.in_pos - self.in_start) as u64) & 3 != 0 {
                        if b.in_exhausted() {
                            self.index_update(b);
                            return Ok(Status::NeedsMore);
                        }

                        let byte = b.input[b.in_pos];
                        b.in_pos += 1;

                        if byte != 0 {
                            return Err(XzError::data("non-zero Index padding"));
                        }
                    }

                    self.index_update(b);

                    if self.block.hash != self.index.hash {
                        return Err(XzError::data("Index does not match the decoded Blocks"));
                    }

                    self.sequence = Seq::IndexCrc32;
                }

                Seq::IndexCrc32 => {
                    if self.crc32_validate(b)? != Status::StreamEnd {
                        return Ok(Status::NeedsMore);
                    }

                    self.temp.size = STREAM_HEADER_SIZE;
                    self.sequence = Seq::StreamFooter;
                }

                Seq::StreamFooter => {
                    if !self.fill_temp(b) {
                        return Ok(Status::NeedsMore);
                    }

                    return self.dec_stream_footer();
                }
            }
        }
    }

    /// Run the Block's filter chain: BCJ then LZMA2, or LZMA2 alone.
    fn dec_raw(&mut self, b: &mut XzBuf<'_>) -> Result<Status> {
        if self.block_header.bcj.is_some() {
            self.bcj.run(&mut self.lzma2, b)
        } else {
            self.lzma2.run(b)
        }
    }

    /// Collect bytes into the scratch buffer; true once `temp.size`
    /// bytes are there.
    fn fill_temp(&mut self, b: &mut XzBuf<'_>) -> bool {
        let copy_size = b.in_avail().min(self.temp.size - self.temp.pos);

        self.temp.buf[self.temp.pos..self.temp.pos + copy_size]
            .copy_from_slice(&b.input[b.in_pos..b.in_pos + copy_size]);
        b.in_pos += copy_size;
        self.temp.pos += copy_size;

        if self.temp.pos == self.temp.size {
            self.temp.pos = 0;
            return true;
        }

        false
    }

    /// Compare four input bytes against the running CRC32,
    /// little-endian, resumable per byte.
    fn crc32_validate(&mut self, b: &mut XzBuf<'_>) -> Result<Status> {
        let value = self.crc.value();

        loop {
            if b.in_exhausted() {
                return Ok(Status::NeedsMore);
            }

            if ((value >> self.pos) & 0xFF) as u8 != b.input[b.in_pos] {
                return Err(XzError::data("CRC32 mismatch"));
            }

            b.in_pos += 1;
            self.pos += 8;

            if self.pos == 32 {
                break;
            }
        }

        self.crc.reset();
        self.pos = 0;

        Ok(Status::StreamEnd)
    }

    /// Account Index bytes consumed in this step into the Index size
    /// and its CRC32.
    fn index_update(&mut self, b: &XzBuf<'_>) {
        let in_used = b.in_pos - self.in_start;
        self.index.size += in_used as u64;
        self.crc.update(&b.input[self.in_start..b.in_pos]);
    }

    /// Decode the Stream Header collected in the scratch buffer.
    fn dec_stream_header(&mut self) -> Result<()> {
        if self.temp.buf[..6] != HEADER_MAGIC {
            return Err(XzError::Format);
        }

        if Crc32::compute(&self.temp.buf[6..8]) != read_le32(&self.temp.buf[8..12]) {
            return Err(XzError::data("Stream Header CRC32 mismatch"));
        }

        // Of the check types only none (0x00) and CRC32 (0x01) are
        // supported.
        if self.temp.buf[6] != 0 {
            return Err(XzError::options("reserved Stream Flags bits set"));
        }

        if self.temp.buf[7] > 1 {
            return Err(XzError::options(format!(
                "unsupported check type 0x{:02x}",
                self.temp.buf[7]
            )));
        }

        self.has_crc32 = self.temp.buf[7] != 0;
        trace!("stream header ok, crc32 check: {}", self.has_crc32);

        Ok(())
    }

    /// Decode the Stream Footer collected in the scratch buffer.
    fn dec_stream_footer(&mut self) -> Result<Status> {
        if self.temp.buf[10..12] != FOOTER_MAGIC {
            return Err(XzError::data("Stream Footer magic mismatch"));
        }

        if Crc32::compute(&self.temp.buf[4..10]) != read_le32(&self.temp.buf[..4]) {
            return Err(XzError::data("Stream Footer CRC32 mismatch"));
        }

        // index.size never counted the Index CRC32 field, hence the
        // missing minus one against the stored Backward Size.
        if self.index.size / 4 != read_le32(&self.temp.buf[4..8]) as u64 {
            return Err(XzError::data("Backward Size does not match the Index"));
        }

        if self.temp.buf[8] != 0 || self.temp.buf[9] != self.has_crc32 as u8 {
            return Err(XzError::data("Stream Flags differ between header and footer"));
        }

        debug!(
            "stream end: {} block(s), {} bytes of index",
            self.block.count, self.index.size
        );

        Ok(Status::StreamEnd)
    }

    /// Decode the Block Header collected in the scratch buffer and
    /// reset the filter chain.
    fn dec_block_header(&mut self) -> Result<()> {
        // The CRC32 field is the last four bytes.
        self.temp.size -= 4;
        if Crc32::compute(&self.temp.buf[..self.temp.size])
            != read_le32(&self.temp.buf[self.temp.size..])
        {
            return Err(XzError::data("Block Header CRC32 mismatch"));
        }

        self.temp.pos = 2;

        // One or two filters; anything else, or reserved flag bits,
        // is unsupported.
        if self.temp.buf[1] & 0x3E != 0 {
            return Err(XzError::options("unsupported Block Header flags"));
        }

        if self.temp.buf[1] & 0x40 != 0 {
            if self.dec_vli_temp()? != Status::StreamEnd {
                return Err(XzError::data("truncated Compressed Size field"));
            }
            self.block_header.compressed = self.vli.value;
        } else {
            self.block_header.compressed = VLI_UNKNOWN;
        }

        if self.temp.buf[1] & 0x80 != 0 {
            if self.dec_vli_temp()? != Status::StreamEnd {
                return Err(XzError::data("truncated Uncompressed Size field"));
            }
            self.block_header.uncompressed = self.vli.value;
        } else {
            self.block_header.uncompressed = VLI_UNKNOWN;
        }

        // With two filters the first must be a BCJ filter.
        if self.temp.buf[1] & 0x01 != 0 {
            if self.temp.size - self.temp.pos < 2 {
                return Err(XzError::options("truncated Filter Flags"));
            }

            let id = self.temp.buf[self.temp.pos];
            self.temp.pos += 1;

            let filter = BcjFilter::from_id(id)
                .ok_or_else(|| XzError::options(format!("unsupported filter id 0x{id:02x}")))?;

            // Custom start offsets are not supported, so Size of
            // Properties must be zero.
            if self.temp.buf[self.temp.pos] != 0x00 {
                return Err(XzError::options("BCJ filter with non-empty properties"));
            }
            self.temp.pos += 1;

            self.bcj.reset(filter);
            self.block_header.bcj = Some(filter);
        } else {
            self.block_header.bcj = None;
        }

        // Valid Filter Flags always take at least two bytes.
        if self.temp.size - self.temp.pos < 2 {
            return Err(XzError::data("truncated Block Header"));
        }

        if self.temp.buf[self.temp.pos] != 0x21 {
            return Err(XzError::options(format!(
                "filter id 0x{:02x} where LZMA2 was required",
                self.temp.buf[self.temp.pos]
            )));
        }
        self.temp.pos += 1;

        if self.temp.buf[self.temp.pos] != 0x01 {
            return Err(XzError::options("LZMA2 properties must be one byte"));
        }
        self.temp.pos += 1;

        if self.temp.size - self.temp.pos < 1 {
            return Err(XzError::data("missing LZMA2 properties"));
        }

        self.lzma2.reset(self.temp.buf[self.temp.pos])?;
        self.temp.pos += 1;

        // The rest is Header Padding.
        while self.temp.pos < self.temp.size {
            if self.temp.buf[self.temp.pos] != 0x00 {
                return Err(XzError::options("non-zero Block Header padding"));
            }
            self.temp.pos += 1;
        }

        self.temp.pos = 0;
        self.block.compressed = 0;
        self.block.uncompressed = 0;

        trace!(
            "block header ok: compressed {:?}, uncompressed {:?}, bcj {:?}",
            self.block_header.compressed, self.block_header.uncompressed, self.block_header.bcj
        );

        Ok(())
    }

    /// Decode one VLI out of the scratch buffer.
    fn dec_vli_temp(&mut self) -> Result<Status> {
        let mut pos = self.temp.pos;
        let ret = self.vli.decode(&self.temp.buf[..self.temp.size], &mut pos);
        self.temp.pos = pos;
        ret
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_constants() {
        assert_eq!(HEADER_MAGIC, [0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00]);
        assert_eq!(FOOTER_MAGIC, [0x59, 0x5A]);
    }

    #[test]
    fn test_hash_triple_comparison() {
        let mut a = DecHash::default();
        let mut b = DecHash::default();

        a.unpadded = 24;
        a.uncompressed = 100;
        a.fold();

        b.unpadded = 24;
        b.uncompressed = 100;
        b.fold();
        assert_eq!(a, b);

        b.unpadded += 4;
        b.fold();
        assert_ne!(a, b);
    }

    #[test]
    fn test_idle_call_is_legal() {
        let mut dec = XzDecoder::new(4096);
        let mut out = [0u8; 0];
        let mut b = XzBuf::new(&[], &mut out);
        assert_eq!(dec.run(&mut b).unwrap(), Status::NeedsMore);
    }

    #[test]
    fn test_bad_magic_is_format_error() {
        let mut dec = XzDecoder::new(4096);
        let data = [0x00u8; 12];
        let mut out = [0u8; 16];
        let mut b = XzBuf::new(&data, &mut out);
        assert!(matches!(dec.run(&mut b), Err(XzError::Format)));
    }

    #[test]
    fn test_two_no_progress_calls_are_buf_error() {
        let mut dec = XzDecoder::new(4096);

        // a valid prefix, then nothing more to give
        let mut out = [0u8; 16];
        let mut b = XzBuf::new(&HEADER_MAGIC, &mut out);
        assert_eq!(dec.run(&mut b).unwrap(), Status::NeedsMore);

        let mut b = XzBuf::new(&[], &mut out);
        assert_eq!(dec.run(&mut b).unwrap(), Status::NeedsMore);

        let mut b = XzBuf::new(&[], &mut out);
        assert!(matches!(dec.run(&mut b), Err(XzError::Buf)));

        // progress clears the latch
        let mut dec = XzDecoder::new(4096);
        let mut b = XzBuf::new(&HEADER_MAGIC[..3], &mut out);
        assert_eq!(dec.run(&mut b).unwrap(), Status::NeedsMore);
        let mut b = XzBuf::new(&HEADER_MAGIC[3..], &mut out);
        assert_eq!(dec.run(&mut b).unwrap(), Status::NeedsMore);
        let mut b = XzBuf::new(&[], &mut out);
        assert_eq!(dec.run(&mut b).unwrap(), Status::NeedsMore);
        let mut b = XzBuf::new(&[], &mut out);
        assert!(matches!(dec.run(&mut b), Err(XzError::Buf)));
    }
}
