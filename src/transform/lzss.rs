//! LZSS sliding-window compression transform.
//!
//! The classic 12-bit-window/4-bit-length scheme found all over late-80s and
//! 90s game data: a flag byte announces eight items, each item is either a
//! literal byte or a (position, length) pair into a 4096-byte ring buffer
//! initialized with spaces. `forward` decompresses, `reverse` recompresses
//! with a greedy longest-match search, so blocks behind this transform stay
//! writable.

use crate::error::CodecResult;
use crate::transform::{Transform, TransformContext, TransformOutput};

const WINDOW: usize = 4096;
const LOOKAHEAD: usize = 18;
const THRESHOLD: usize = 2;

/// LZSS codec over a 4096-byte ring buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LzssTransform;

impl LzssTransform {
    pub fn new() -> Self {
        Self
    }
}

impl Transform for LzssTransform {
    fn name(&self) -> &'static str {
        "lzss"
    }

    fn forward(&self, data: &[u8], ctx: &TransformContext) -> CodecResult<TransformOutput> {
        let mut text_buf = [0x20u8; WINDOW];
        let mut r = WINDOW - LOOKAHEAD;
        let mut result = Vec::with_capacity(ctx.length_hint.unwrap_or(data.len() * 2));
        let mut index = 0;
        let mut flags: u32 = 0;

        loop {
            if let Some(limit) = ctx.length_hint {
                if result.len() >= limit {
                    break;
                }
            }
            flags >>= 1;
            if flags & 0x100 == 0 {
                if index >= data.len() {
                    break;
                }
                flags = u32::from(data[index]) | 0xff00;
                index += 1;
            }
            if flags & 1 != 0 {
                // literal byte
                if index >= data.len() {
                    break;
                }
                let byte = data[index];
                index += 1;
                result.push(byte);
                text_buf[r] = byte;
                r = (r + 1) & (WINDOW - 1);
            } else {
                // (position, length) pair into the ring buffer
                if index + 1 >= data.len() {
                    break;
                }
                let lo = usize::from(data[index]);
                let hi = usize::from(data[index + 1]);
                index += 2;
                let position = lo | ((hi & 0xf0) << 4);
                let length = (hi & 0x0f) + THRESHOLD + 1;
                for k in 0..length {
                    let byte = text_buf[(position + k) & (WINDOW - 1)];
                    result.push(byte);
                    text_buf[r] = byte;
                    r = (r + 1) & (WINDOW - 1);
                }
            }
        }

        Ok(TransformOutput {
            payload: result,
            consumed: index,
        })
    }

    fn reverse(&self, data: &[u8], _ctx: &TransformContext) -> CodecResult<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len() + data.len() / 8 + 1);
        // item buffer for the current flag group: flag byte slot first
        let mut group: Vec<u8> = vec![0];
        let mut flag_bit = 0u8;
        let mut pos = 0;

        while pos < data.len() {
            let max_len = LOOKAHEAD.min(data.len() - pos);
            let (match_pos, match_len) = longest_match(data, pos, max_len);

            if match_len > THRESHOLD {
                // ring-buffer index of the match start; the decoder's write
                // cursor begins at WINDOW - LOOKAHEAD
                let ring = (WINDOW - LOOKAHEAD + match_pos) & (WINDOW - 1);
                group.push((ring & 0xff) as u8);
                group.push((((ring >> 4) & 0xf0) | (match_len - THRESHOLD - 1)) as u8);
                pos += match_len;
            } else {
                group[0] |= 1 << flag_bit;
                group.push(data[pos]);
                pos += 1;
            }

            flag_bit += 1;
            if flag_bit == 8 {
                out.extend_from_slice(&group);
                group.clear();
                group.push(0);
                flag_bit = 0;
            }
        }
        if flag_bit > 0 {
            out.extend_from_slice(&group);
        }
        Ok(out)
    }
}

/// Greedy longest-match search over the trailing window of already-emitted
/// bytes. Comparing directly against the uncompressed data is equivalent to
/// searching the decoder's ring buffer, including overlapping matches, and
/// sidesteps ring wraparound entirely.
fn longest_match(data: &[u8], pos: usize, max_len: usize) -> (usize, usize) {
    let start = pos.saturating_sub(WINDOW - LOOKAHEAD);
    let mut best = (0, 0);
    for candidate in start..pos {
        let mut len = 0;
        while len < max_len && data[candidate + len] == data[pos + len] {
            len += 1;
        }
        if len > best.1 {
            best = (candidate, len);
            if len == max_len {
                break;
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(plain: &[u8]) {
        let codec = LzssTransform::new();
        let packed = codec.reverse(plain, &TransformContext::new()).unwrap();
        let unpacked = codec
            .forward(&packed, &TransformContext::with_length_hint(plain.len()))
            .unwrap();
        assert_eq!(unpacked.payload.as_slice(), plain);
        assert_eq!(unpacked.consumed, packed.len());
    }

    #[test]
    fn test_roundtrip_text() {
        roundtrip(b"the rain in spain falls mainly on the plain, plainly");
    }

    #[test]
    fn test_roundtrip_repeats_compress() {
        let plain: Vec<u8> = std::iter::repeat(b"ABCD".as_slice())
            .take(64)
            .flatten()
            .copied()
            .collect();
        let codec = LzssTransform::new();
        let packed = codec.reverse(&plain, &TransformContext::new()).unwrap();
        assert!(packed.len() < plain.len());
        roundtrip(&plain);
    }

    #[test]
    fn test_roundtrip_incompressible() {
        // no repeats: every item is a literal, one flag byte per 8 bytes
        let plain: Vec<u8> = (0u16..256).map(|v| (v ^ (v >> 3)) as u8).collect();
        roundtrip(&plain);
    }

    #[test]
    fn test_roundtrip_empty() {
        let codec = LzssTransform::new();
        let packed = codec.reverse(b"", &TransformContext::new()).unwrap();
        assert!(packed.is_empty());
        let unpacked = codec.forward(&packed, &TransformContext::new()).unwrap();
        assert!(unpacked.payload.is_empty());
    }

    #[test]
    fn test_forward_stops_at_length_hint() {
        let codec = LzssTransform::new();
        let packed = codec.reverse(b"abcdefgh", &TransformContext::new()).unwrap();
        let out = codec
            .forward(&packed, &TransformContext::with_length_hint(4))
            .unwrap();
        assert_eq!(out.payload.as_slice(), b"abcd");
    }

    #[test]
    fn test_forward_tolerates_truncated_pair() {
        // flag byte announcing a pair, but only one byte of it present
        let data = [0x00u8, 0x12];
        let out = LzssTransform::new()
            .forward(&data, &TransformContext::new())
            .unwrap();
        assert!(out.payload.is_empty());
    }
}
