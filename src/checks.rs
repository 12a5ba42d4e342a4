//! Block-level checks: verify on import, rewrite on export.
//!
//! A check is an invariant over the byte image that fields alone cannot
//! express: a magic number, a checksum over other fields, a fill pattern.
//! On import `verify` runs against the source buffer after all fields have
//! parsed; failures are never silently recovered. On export `fixup`
//! rewrites the affected region so the invariant holds by construction
//! (a recomputed checksum, a stamped-in constant).

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, CodecResult};
use crate::refs::Scope;
use crate::value::Value;

/// Checksum algorithms available to [`Check::Checksum`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChecksumAlgo {
    /// Byte sum modulo 256.
    Sum8,
    /// XOR of all bytes.
    Xor8,
    /// CRC-32 (IEEE).
    Crc32,
}

impl ChecksumAlgo {
    fn compute(self, data: &[u8]) -> u64 {
        match self {
            ChecksumAlgo::Sum8 => u64::from(
                data.iter()
                    .fold(0u8, |acc, &byte| acc.wrapping_add(byte)),
            ),
            ChecksumAlgo::Xor8 => u64::from(data.iter().fold(0u8, |acc, &byte| acc ^ byte)),
            ChecksumAlgo::Crc32 => {
                let mut hasher = crc32fast::Hasher::new();
                hasher.update(data);
                u64::from(hasher.finalize())
            }
        }
    }
}

/// An immutable verify/fixup rule attached to a block schema.
#[derive(Debug, Clone)]
pub enum Check {
    /// A field must hold a constant. Verified against the decoded value on
    /// import; stamped into the byte image on export.
    Const { field: String, expected: Value },

    /// A raw byte pattern at a fixed offset. With `assert_only` the export
    /// asserts the pattern instead of writing it.
    Magic {
        offset: usize,
        bytes: Vec<u8>,
        assert_only: bool,
    },

    /// A checksum over the byte regions of `over`, stored in `target`.
    /// Import verifies the stored value; export recomputes it from the
    /// freshly written payload.
    Checksum {
        algo: ChecksumAlgo,
        over: Vec<String>,
        target: String,
    },

    /// A region that must hold a repeating byte pattern. Export restores
    /// the pattern. `length: None` covers to the end of the buffer.
    Fill {
        offset: usize,
        length: Option<usize>,
        pattern: Vec<u8>,
    },
}

impl Check {
    /// Fields this check reads or writes; resolved at schema build time.
    pub(crate) fn fields_used(&self) -> Vec<&str> {
        match self {
            Check::Const { field, .. } => vec![field],
            Check::Magic { .. } | Check::Fill { .. } => Vec::new(),
            Check::Checksum { over, target, .. } => {
                let mut names: Vec<&str> = over.iter().map(String::as_str).collect();
                names.push(target);
                names
            }
        }
    }

    /// Concatenated bytes of the covered field regions, in declared order.
    fn covered_bytes(over: &[String], data: &[u8], scope: &Scope<'_>) -> CodecResult<Vec<u8>> {
        let mut out = Vec::new();
        for name in over {
            let (offset, size) = scope.block().field_span(name, scope)?;
            let end = offset + size;
            if end > data.len() {
                return Err(CodecError::ShortBuffer {
                    offset,
                    needed: size,
                    available: data.len().saturating_sub(offset),
                });
            }
            out.extend_from_slice(&data[offset..end]);
        }
        Ok(out)
    }

    fn fill_region(offset: usize, length: Option<usize>, len: usize) -> (usize, usize) {
        let end = match length {
            Some(length) => offset + length,
            None => len.max(offset),
        };
        (offset, end)
    }

    /// Import-side hook: test the invariant against the source buffer.
    pub(crate) fn verify(&self, data: &[u8], scope: &Scope<'_>) -> CodecResult<()> {
        match self {
            Check::Const { field, expected } => {
                let actual = scope.block().get(field).ok_or_else(|| CodecError::Ref {
                    detail: format!("check names unknown field `{}`", field),
                })?;
                if actual != expected {
                    let (offset, _) = scope.block().field_span(field, scope)?;
                    return Err(CodecError::CheckFailed {
                        offset,
                        detail: format!(
                            "field `{}` expected {:?}, found {:?}",
                            field, expected, actual
                        ),
                    });
                }
                Ok(())
            }
            Check::Magic { offset, bytes, .. } => {
                let end = offset + bytes.len();
                let found = data.get(*offset..end);
                if found != Some(bytes.as_slice()) {
                    return Err(CodecError::CheckFailed {
                        offset: *offset,
                        detail: format!(
                            "magic mismatch: expected {}, found {}",
                            hex::encode(bytes),
                            hex::encode(found.unwrap_or(&[]))
                        ),
                    });
                }
                Ok(())
            }
            Check::Checksum {
                algo,
                over,
                target,
            } => {
                let computed = algo.compute(&Self::covered_bytes(over, data, scope)?);
                let stored = scope
                    .block()
                    .get(target)
                    .and_then(Value::as_uint)
                    .ok_or_else(|| CodecError::Ref {
                        detail: format!("checksum target `{}` is not an integer field", target),
                    })?;
                if stored != computed {
                    let (offset, _) = scope.block().field_span(target, scope)?;
                    return Err(CodecError::CheckFailed {
                        offset,
                        detail: format!(
                            "checksum mismatch: stored {:#x}, computed {:#x}",
                            stored, computed
                        ),
                    });
                }
                Ok(())
            }
            Check::Fill {
                offset,
                length,
                pattern,
            } => {
                let (start, end) = Self::fill_region(*offset, *length, data.len());
                let region = data.get(start..end).ok_or(CodecError::ShortBuffer {
                    offset: start,
                    needed: end - start,
                    available: data.len().saturating_sub(start),
                })?;
                let expected = pattern.iter().cycle();
                if region.iter().zip(expected).any(|(a, b)| a != b) {
                    return Err(CodecError::CheckFailed {
                        offset: start,
                        detail: format!(
                            "region does not hold fill pattern {}",
                            hex::encode(pattern)
                        ),
                    });
                }
                Ok(())
            }
        }
    }

    /// Export-side hook: rewrite the freshly rendered buffer so the
    /// invariant holds.
    pub(crate) fn fixup(&self, out: &mut Vec<u8>, scope: &Scope<'_>) -> CodecResult<()> {
        match self {
            Check::Const { field, expected } => {
                let (_, descriptor) =
                    scope
                        .block()
                        .schema()
                        .field(field)
                        .ok_or_else(|| CodecError::Ref {
                            detail: format!("check names unknown field `{}`", field),
                        })?;
                let (offset, _) = scope.block().field_span(field, scope)?;
                descriptor.write(expected, out, offset, scope)
            }
            Check::Magic {
                offset,
                bytes,
                assert_only,
            } => {
                if *assert_only {
                    return self.verify(out, scope);
                }
                let end = offset + bytes.len();
                if out.len() < end {
                    out.resize(end, 0);
                }
                out[*offset..end].copy_from_slice(bytes);
                Ok(())
            }
            Check::Checksum {
                algo,
                over,
                target,
            } => {
                let computed = algo.compute(&Self::covered_bytes(over, out, scope)?);
                let (_, descriptor) =
                    scope
                        .block()
                        .schema()
                        .field(target)
                        .ok_or_else(|| CodecError::Ref {
                            detail: format!("checksum target `{}` is unknown", target),
                        })?;
                let (offset, _) = scope.block().field_span(target, scope)?;
                descriptor.write(&Value::UInt(computed), out, offset, scope)
            }
            Check::Fill {
                offset,
                length,
                pattern,
            } => {
                let (start, end) = Self::fill_region(*offset, *length, out.len());
                if out.len() < end {
                    out.resize(end, 0);
                }
                let mut source = pattern.iter().cycle();
                for slot in &mut out[start..end] {
                    *slot = *source.next().expect("cycled pattern is never empty");
                }
                Ok(())
            }
        }
    }

    /// Highest byte this check touches; feeds the block size computation.
    pub(crate) fn end_offset(&self, scope: &Scope<'_>) -> CodecResult<usize> {
        match self {
            Check::Const { field, .. } => {
                let (offset, size) = scope.block().field_span(field, scope)?;
                Ok(offset + size)
            }
            Check::Magic { offset, bytes, .. } => Ok(offset + bytes.len()),
            Check::Checksum { target, .. } => {
                let (offset, size) = scope.block().field_span(target, scope)?;
                Ok(offset + size)
            }
            Check::Fill { offset, length, .. } => Ok(offset + length.unwrap_or(0)),
        }
    }

    pub(crate) fn internal_checks(&self) -> CodecResult<()> {
        match self {
            Check::Magic { bytes, .. } if bytes.is_empty() => Err(CodecError::Schema {
                detail: "magic check has an empty byte pattern".to_string(),
            }),
            Check::Checksum { over, .. } if over.is_empty() => Err(CodecError::Schema {
                detail: "checksum check covers no fields".to_string(),
            }),
            Check::Fill { pattern, .. } if pattern.is_empty() => Err(CodecError::Schema {
                detail: "fill check has an empty pattern".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum8_wraps() {
        assert_eq!(ChecksumAlgo::Sum8.compute(&[0xff, 0x02]), 0x01);
        assert_eq!(ChecksumAlgo::Sum8.compute(&[1, 2, 3, 4]), 10);
    }

    #[test]
    fn test_xor8() {
        assert_eq!(ChecksumAlgo::Xor8.compute(&[0xf0, 0x0f]), 0xff);
        assert_eq!(ChecksumAlgo::Xor8.compute(&[0xaa, 0xaa]), 0x00);
    }

    #[test]
    fn test_crc32_known_vector() {
        // standard IEEE CRC-32 of "123456789"
        assert_eq!(ChecksumAlgo::Crc32.compute(b"123456789"), 0xcbf43926);
    }

    #[test]
    fn test_internal_checks() {
        let empty_magic = Check::Magic {
            offset: 0,
            bytes: Vec::new(),
            assert_only: false,
        };
        assert!(empty_magic.internal_checks().is_err());

        let empty_sum = Check::Checksum {
            algo: ChecksumAlgo::Sum8,
            over: Vec::new(),
            target: "sum".to_string(),
        };
        assert!(empty_sum.internal_checks().is_err());
    }
}
