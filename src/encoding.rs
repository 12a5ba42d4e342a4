//! Byte-level encoding primitives.
//!
//! Pure conversions between byte slices and scalar values: integers of
//! widths 1/2/3/4/8 in either byte order, IEEE 754 floats, and a small set
//! of text encodings. Nothing here knows about fields or blocks.

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, CodecResult};

// ============================================================================
// Endianness
// ============================================================================

/// Byte order for multi-byte values. Always explicit; the engine never
/// guesses from the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Endian {
    /// Big-endian (network byte order).
    Big,
    /// Little-endian.
    #[default]
    Little,
}

impl Endian {
    #[inline]
    pub fn is_little(self) -> bool {
        matches!(self, Endian::Little)
    }

    #[inline]
    pub fn is_big(self) -> bool {
        !self.is_little()
    }
}

// ============================================================================
// Integer packing
// ============================================================================

/// Read an unsigned integer of `width` bytes (1..=8) from `data`.
///
/// `data` must be exactly `width` bytes; the caller is responsible for
/// bounds-checking against the source buffer.
pub fn unpack_uint(data: &[u8], endian: Endian) -> u64 {
    debug_assert!((1..=8).contains(&data.len()));
    let mut value: u64 = 0;
    match endian {
        Endian::Big => {
            for &byte in data {
                value = (value << 8) | u64::from(byte);
            }
        }
        Endian::Little => {
            for &byte in data.iter().rev() {
                value = (value << 8) | u64::from(byte);
            }
        }
    }
    value
}

/// Read a signed two's-complement integer of `data.len()` bytes.
pub fn unpack_int(data: &[u8], endian: Endian) -> i64 {
    let width = data.len();
    let raw = unpack_uint(data, endian);
    if width == 8 {
        return raw as i64;
    }
    let sign_bit = 1u64 << (width * 8 - 1);
    if raw & sign_bit != 0 {
        // sign-extend
        (raw | !((sign_bit << 1) - 1)) as i64
    } else {
        raw as i64
    }
}

/// Write an unsigned integer into `out` (exactly `out.len()` bytes wide).
///
/// Fails if `value` does not fit in the target width.
pub fn pack_uint(value: u64, out: &mut [u8], endian: Endian) -> CodecResult<()> {
    let width = out.len();
    debug_assert!((1..=8).contains(&width));
    if width < 8 && value >= 1u64 << (width * 8) {
        return Err(CodecError::Encode {
            detail: format!("value {} does not fit in {} unsigned bytes", value, width),
        });
    }
    let mut v = value;
    match endian {
        Endian::Little => {
            for slot in out.iter_mut() {
                *slot = (v & 0xff) as u8;
                v >>= 8;
            }
        }
        Endian::Big => {
            for slot in out.iter_mut().rev() {
                *slot = (v & 0xff) as u8;
                v >>= 8;
            }
        }
    }
    Ok(())
}

/// Write a signed two's-complement integer into `out`.
pub fn pack_int(value: i64, out: &mut [u8], endian: Endian) -> CodecResult<()> {
    let width = out.len();
    let (min, max) = int_bounds(width);
    if value < min || value > max {
        return Err(CodecError::Encode {
            detail: format!("value {} does not fit in {} signed bytes", value, width),
        });
    }
    let mask = if width == 8 {
        u64::MAX
    } else {
        (1u64 << (width * 8)) - 1
    };
    // two's complement truncated to the target width
    pack_uint((value as u64) & mask, out, endian)
}

/// Inclusive bounds of a signed integer of `width` bytes.
pub fn int_bounds(width: usize) -> (i64, i64) {
    if width == 8 {
        (i64::MIN, i64::MAX)
    } else {
        let max = (1i64 << (width * 8 - 1)) - 1;
        (-max - 1, max)
    }
}

/// Inclusive upper bound of an unsigned integer of `width` bytes.
pub fn uint_max(width: usize) -> u64 {
    if width == 8 {
        u64::MAX
    } else {
        (1u64 << (width * 8)) - 1
    }
}

// ============================================================================
// Floats
// ============================================================================

pub fn unpack_f32(data: &[u8; 4], endian: Endian) -> f32 {
    if endian.is_little() {
        f32::from_le_bytes(*data)
    } else {
        f32::from_be_bytes(*data)
    }
}

pub fn unpack_f64(data: &[u8; 8], endian: Endian) -> f64 {
    if endian.is_little() {
        f64::from_le_bytes(*data)
    } else {
        f64::from_be_bytes(*data)
    }
}

pub fn pack_f32(value: f32, endian: Endian) -> [u8; 4] {
    if endian.is_little() {
        value.to_le_bytes()
    } else {
        value.to_be_bytes()
    }
}

pub fn pack_f64(value: f64, endian: Endian) -> [u8; 8] {
    if endian.is_little() {
        value.to_le_bytes()
    } else {
        value.to_be_bytes()
    }
}

// ============================================================================
// Text encodings
// ============================================================================

/// Text encodings understood by string fields.
///
/// Proprietary formats overwhelmingly use one of these; adding another
/// encoding is one match arm in `decode` and one in `encode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TextEncoding {
    /// 7-bit ASCII; any byte >= 0x80 is a decode error.
    Ascii,
    /// ISO 8859-1; every byte maps to the same code point.
    Latin1,
    #[default]
    Utf8,
    Utf16Le,
    Utf16Be,
}

impl TextEncoding {
    /// Decode `data` into a string. Malformed content is a decode error,
    /// never a silent replacement character.
    pub fn decode(self, data: &[u8]) -> CodecResult<String> {
        match self {
            TextEncoding::Ascii => {
                if let Some(pos) = data.iter().position(|&b| b >= 0x80) {
                    return Err(CodecError::Decode {
                        detail: format!(
                            "byte {:#04x} at position {} is not valid ASCII",
                            data[pos], pos
                        ),
                    });
                }
                Ok(data.iter().map(|&b| b as char).collect())
            }
            TextEncoding::Latin1 => Ok(data.iter().map(|&b| b as char).collect()),
            TextEncoding::Utf8 => String::from_utf8(data.to_vec()).map_err(|e| CodecError::Decode {
                detail: format!("invalid UTF-8: {}", e),
            }),
            TextEncoding::Utf16Le | TextEncoding::Utf16Be => {
                if data.len() % 2 != 0 {
                    return Err(CodecError::Decode {
                        detail: format!("UTF-16 data has odd length {}", data.len()),
                    });
                }
                let units: Vec<u16> = data
                    .chunks_exact(2)
                    .map(|pair| {
                        let arr = [pair[0], pair[1]];
                        if self == TextEncoding::Utf16Le {
                            u16::from_le_bytes(arr)
                        } else {
                            u16::from_be_bytes(arr)
                        }
                    })
                    .collect();
                String::from_utf16(&units).map_err(|e| CodecError::Decode {
                    detail: format!("invalid UTF-16: {}", e),
                })
            }
        }
    }

    /// Encode `text` into bytes. Characters outside the encoding's
    /// repertoire are an encode error.
    pub fn encode(self, text: &str) -> CodecResult<Vec<u8>> {
        match self {
            TextEncoding::Ascii => {
                if let Some(ch) = text.chars().find(|c| !c.is_ascii()) {
                    return Err(CodecError::Encode {
                        detail: format!("character {:?} is not representable in ASCII", ch),
                    });
                }
                Ok(text.bytes().collect())
            }
            TextEncoding::Latin1 => {
                let mut out = Vec::with_capacity(text.len());
                for ch in text.chars() {
                    let cp = ch as u32;
                    if cp > 0xff {
                        return Err(CodecError::Encode {
                            detail: format!("character {:?} is not representable in Latin-1", ch),
                        });
                    }
                    out.push(cp as u8);
                }
                Ok(out)
            }
            TextEncoding::Utf8 => Ok(text.as_bytes().to_vec()),
            TextEncoding::Utf16Le => Ok(text
                .encode_utf16()
                .flat_map(|unit| unit.to_le_bytes())
                .collect()),
            TextEncoding::Utf16Be => Ok(text
                .encode_utf16()
                .flat_map(|unit| unit.to_be_bytes())
                .collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpack_uint_endianness() {
        assert_eq!(unpack_uint(&[0x01, 0x02], Endian::Big), 0x0102);
        assert_eq!(unpack_uint(&[0x01, 0x02], Endian::Little), 0x0201);
        assert_eq!(unpack_uint(&[0x12, 0x34, 0x56], Endian::Big), 0x123456);
    }

    #[test]
    fn test_unpack_int_sign_extension() {
        assert_eq!(unpack_int(&[0xff], Endian::Big), -1);
        assert_eq!(unpack_int(&[0x80, 0x00], Endian::Big), -32768);
        assert_eq!(unpack_int(&[0x7f, 0xff], Endian::Big), 32767);
        assert_eq!(unpack_int(&[0xff, 0xff, 0xff], Endian::Little), -1);
    }

    #[test]
    fn test_pack_uint_roundtrip() {
        let mut buf = [0u8; 3];
        pack_uint(0x123456, &mut buf, Endian::Big).unwrap();
        assert_eq!(buf, [0x12, 0x34, 0x56]);
        assert_eq!(unpack_uint(&buf, Endian::Big), 0x123456);
    }

    #[test]
    fn test_pack_uint_overflow() {
        let mut buf = [0u8; 1];
        let result = pack_uint(256, &mut buf, Endian::Little);
        assert!(result.is_err());
    }

    #[test]
    fn test_pack_int_bounds() {
        let mut buf = [0u8; 2];
        pack_int(-32768, &mut buf, Endian::Little).unwrap();
        assert_eq!(unpack_int(&buf, Endian::Little), -32768);
        assert!(pack_int(-32769, &mut buf, Endian::Little).is_err());
        assert!(pack_int(32768, &mut buf, Endian::Little).is_err());
    }

    #[test]
    fn test_int_bounds_widths() {
        assert_eq!(int_bounds(1), (-128, 127));
        assert_eq!(int_bounds(3), (-8388608, 8388607));
        assert_eq!(int_bounds(8), (i64::MIN, i64::MAX));
        assert_eq!(uint_max(3), 0xffffff);
    }

    #[test]
    fn test_float_roundtrip() {
        let bytes = pack_f32(1.5, Endian::Big);
        assert_eq!(unpack_f32(&bytes, Endian::Big), 1.5);
        let bytes = pack_f64(-0.25, Endian::Little);
        assert_eq!(unpack_f64(&bytes, Endian::Little), -0.25);
    }

    #[test]
    fn test_ascii_rejects_high_bytes() {
        assert!(TextEncoding::Ascii.decode(b"hello").is_ok());
        assert!(TextEncoding::Ascii.decode(&[0x68, 0xc3]).is_err());
        assert!(TextEncoding::Ascii.encode("caf\u{e9}").is_err());
    }

    #[test]
    fn test_latin1_full_range() {
        let all: Vec<u8> = (0..=255).collect();
        let text = TextEncoding::Latin1.decode(&all).unwrap();
        assert_eq!(TextEncoding::Latin1.encode(&text).unwrap(), all);
    }

    #[test]
    fn test_utf16_roundtrip() {
        let text = "p\u{e5}t\u{e9}";
        let le = TextEncoding::Utf16Le.encode(text).unwrap();
        assert_eq!(TextEncoding::Utf16Le.decode(&le).unwrap(), text);
        let be = TextEncoding::Utf16Be.encode(text).unwrap();
        assert_ne!(le, be);
        assert_eq!(TextEncoding::Utf16Be.decode(&be).unwrap(), text);
    }

    #[test]
    fn test_utf16_odd_length() {
        assert!(TextEncoding::Utf16Le.decode(&[0x41]).is_err());
    }
}
