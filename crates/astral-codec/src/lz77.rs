//! LZ77-style compressor used for the snapshot payload.
//!
//! Literals are written verbatim. A back-reference is framed as four bytes:
//! `0x00, length, offset_hi, offset_lo`. The literal byte `0x00` in the
//! input therefore collides with the match marker; round-trip identity is
//! guaranteed only for inputs that contain no `0x00` byte. The snapshot
//! text grammar never produces one, so the storage pipeline is unaffected.

use std::collections::HashMap;

/// Sliding-window size. Offsets are encoded in 16 bits, so matches may
/// reach back at most `MAX_WINDOW - 1` bytes.
const MAX_WINDOW: usize = 64 * 1024;

/// Minimum length worth encoding as a match.
const MIN_MATCH: usize = 4;

/// Maximum encodable match length (one byte).
const MAX_MATCH: usize = 255;

fn hash4(data: &[u8], at: usize) -> u32 {
    let mut h: u32 = 0;
    for k in 0..MIN_MATCH {
        h = h.wrapping_mul(257).wrapping_add(u32::from(data[at + k]));
    }
    h
}

/// Compress `data`.
pub fn compress(data: &[u8]) -> Vec<u8> {
    if data.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(data.len() / 2 + 16);
    let mut positions: HashMap<u32, usize> = HashMap::new();
    let mut i = 0;
    while i < data.len() {
        let mut best_len = 0;
        let mut best_offset = 0;
        if i + MIN_MATCH <= data.len() {
            let h = hash4(data, i);
            if let Some(&j) = positions.get(&h) {
                let dist = i - j;
                if dist > 0 && dist < MAX_WINDOW {
                    let mut len = 0;
                    while i + len < data.len() && data[j + len] == data[i + len] && len < MAX_MATCH
                    {
                        len += 1;
                    }
                    if len >= MIN_MATCH {
                        best_len = len;
                        best_offset = dist;
                    }
                }
            }
            positions.insert(h, i);
        }
        if best_len >= MIN_MATCH {
            out.push(0x00);
            out.push(best_len as u8);
            out.push((best_offset >> 8) as u8);
            out.push((best_offset & 0xFF) as u8);
            i += best_len;
        } else {
            out.push(data[i]);
            i += 1;
        }
    }
    out
}

/// Decompress `data`.
///
/// The decoder is lenient: a `0x00` byte that is not followed by a
/// satisfiable match record (three more bytes, nonzero offset within the
/// produced output) is passed through as a literal.
pub fn decompress(data: &[u8]) -> Vec<u8> {
    if data.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(data.len() * 2);
    let mut i = 0;
    while i < data.len() {
        if data[i] == 0x00 && i + 3 < data.len() {
            let len = data[i + 1] as usize;
            let offset = ((data[i + 2] as usize) << 8) | data[i + 3] as usize;
            if offset > 0 && out.len() >= offset {
                let start = out.len() - offset;
                for k in 0..len {
                    let byte = out[start + k];
                    out.push(byte);
                }
                i += 4;
                continue;
            }
        }
        out.push(data[i]);
        i += 1;
    }
    out
}
