//! Shared helpers: a minimal XZ stream writer and decode drivers.
#![allow(dead_code)] // not every test binary uses every helper
//!
//! The writer emits real, self-consistent streams (computed CRCs,
//! correct Index and Footer) but only uses uncompressed LZMA2 chunks,
//! so no encoder is needed for the container machinery to be exercised
//! end to end.

use oxz_core::crc::Crc32;
use oxz_core::error::{Status, XzError};
use oxz_core::XzBuf;
use oxz_stream::XzDecoder;

/// Check type carried in the Stream Flags.
#[derive(Clone, Copy, PartialEq)]
pub enum Check {
    None,
    Crc32,
}

impl Check {
    fn id(self) -> u8 {
        match self {
            Check::None => 0x00,
            Check::Crc32 => 0x01,
        }
    }

    fn size(self) -> usize {
        match self {
            Check::None => 0,
            Check::Crc32 => 4,
        }
    }
}

/// One Block to be written: its payload and the filter chain.
pub struct Block<'a> {
    pub payload: &'a [u8],
    /// BCJ filter ID (0x04..0x09) to declare before LZMA2, if any. The
    /// payload is written as-is; the decoder will run the named filter
    /// over it.
    pub bcj: Option<u8>,
    /// Bytes the decoder is expected to emit for this Block; the
    /// integrity check is computed over these. `None` means the payload
    /// itself (no filter, or the check is not verified).
    pub decoded: Option<&'a [u8]>,
}

impl<'a> Block<'a> {
    pub fn plain(payload: &'a [u8]) -> Self {
        Self {
            payload,
            bcj: None,
            decoded: None,
        }
    }

    pub fn filtered(bcj: u8, payload: &'a [u8], decoded: &'a [u8]) -> Self {
        Self {
            payload,
            bcj: Some(bcj),
            decoded: Some(decoded),
        }
    }
}

fn write_vli(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

/// LZMA2 stream made of uncompressed chunks plus the end marker.
fn lzma2_uncompressed(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();

    if payload.is_empty() {
        out.push(0x00);
        return out;
    }

    for (i, chunk) in payload.chunks(1 << 16).enumerate() {
        out.push(if i == 0 { 0x01 } else { 0x02 });
        out.extend_from_slice(&((chunk.len() - 1) as u16).to_be_bytes());
        out.extend_from_slice(chunk);
    }

    out.push(0x00);
    out
}

/// Serialize a whole single-stream XZ file.
///
/// `dict_props` is the dictionary-size byte placed in the LZMA2 filter
/// properties of every Block Header (8 = 64 KiB).
pub fn xz_stream(blocks: &[Block<'_>], check: Check, dict_props: u8) -> Vec<u8> {
    let mut out = Vec::new();

    // Stream Header
    let flags = [0x00, check.id()];
    out.extend_from_slice(&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00]);
    out.extend_from_slice(&flags);
    out.extend_from_slice(&Crc32::compute(&flags).to_le_bytes());

    let mut records: Vec<(u64, u64)> = Vec::new();

    for block in blocks {
        // Block Header: flags, optional BCJ filter, LZMA2 filter,
        // padding, CRC32.
        let mut header = Vec::new();
        header.push(if block.bcj.is_some() { 0x01 } else { 0x00 });
        if let Some(id) = block.bcj {
            header.push(id);
            header.push(0x00); // empty properties
        }
        header.push(0x21); // LZMA2
        header.push(0x01); // one property byte
        header.push(dict_props);

        // total size = 1 (size byte) + header + padding + 4 (CRC)
        let header_size = (header.len() + 4).div_ceil(4) * 4 + 4;
        let size_byte = (header_size / 4 - 1) as u8;
        header.resize(header_size - 1 - 4, 0x00);

        let mut with_size = vec![size_byte];
        with_size.extend_from_slice(&header);
        let crc = Crc32::compute(&with_size);
        out.extend_from_slice(&with_size);
        out.extend_from_slice(&crc.to_le_bytes());

        // Compressed Data
        let data = lzma2_uncompressed(block.payload);
        out.extend_from_slice(&data);

        // Block Padding
        let padding = (4 - data.len() % 4) % 4;
        out.extend_from_slice(&vec![0u8; padding]);

        // Check, over what the decoder will emit
        if check == Check::Crc32 {
            let decoded = block.decoded.unwrap_or(block.payload);
            out.extend_from_slice(&Crc32::compute(decoded).to_le_bytes());
        }

        let unpadded = (header_size + data.len() + check.size()) as u64;
        records.push((unpadded, block.payload.len() as u64));
    }

    // Index
    let mut index = vec![0x00];
    write_vli(&mut index, records.len() as u64);
    for &(unpadded, uncompressed) in &records {
        write_vli(&mut index, unpadded);
        write_vli(&mut index, uncompressed);
    }
    while (index.len() + 4) % 4 != 0 {
        index.push(0x00);
    }
    let index_crc = Crc32::compute(&index);
    index.extend_from_slice(&index_crc.to_le_bytes());
    out.extend_from_slice(&index);

    // Stream Footer
    let backward_size = (index.len() / 4 - 1) as u32;
    let mut footer_body = Vec::new();
    footer_body.extend_from_slice(&backward_size.to_le_bytes());
    footer_body.extend_from_slice(&flags);
    out.extend_from_slice(&Crc32::compute(&footer_body).to_le_bytes());
    out.extend_from_slice(&footer_body);
    out.extend_from_slice(&[0x59, 0x5A]);

    out
}

/// Decode everything in one single-call run.
pub fn decode_single(data: &[u8], out_cap: usize) -> Result<Vec<u8>, XzError> {
    let mut dec = XzDecoder::new(0);
    let mut out = vec![0u8; out_cap];
    let mut b = XzBuf::new(data, &mut out);
    let status = dec.run(&mut b)?;
    assert_eq!(status, Status::StreamEnd);
    let produced = b.out_pos;
    out.truncate(produced);
    Ok(out)
}

/// Drive a multi-call decoder with fixed input/output slice sizes.
/// Returns the collected output on `StreamEnd`.
pub fn decode_multi(
    data: &[u8],
    dict_max: u32,
    in_chunk: usize,
    out_chunk: usize,
) -> Result<Vec<u8>, XzError> {
    let mut dec = XzDecoder::new(dict_max);
    let mut collected = Vec::new();
    let mut in_off = 0;

    loop {
        let end = (in_off + in_chunk).min(data.len());
        let mut out = vec![0u8; out_chunk];
        let mut b = XzBuf::new(&data[in_off..end], &mut out);

        let status = dec.run(&mut b)?;
        let produced = b.out_pos;
        let consumed = b.in_pos;
        collected.extend_from_slice(&out[..produced]);
        in_off += consumed;

        if status == Status::StreamEnd {
            return Ok(collected);
        }
    }
}

/// Deterministic pseudo-random bytes (64-bit LCG).
pub fn pseudo_random(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}
