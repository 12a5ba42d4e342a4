//! Bit-packed field groups.
//!
//! One storage word of 1..=8 bytes carved into named sub-fields, each
//! described by a bit mask. Sub-field values are the mask's set bits
//! compacted together, so non-contiguous masks work: mask `0b1001_0000`
//! gives a two-bit value. Bits outside every mask are preserved across a
//! round-trip by read-modify-write against the prefilled output buffer.

use crate::encoding::{pack_uint, unpack_uint, Endian};
use crate::error::{CodecError, CodecResult};
use crate::field::{reserve, take};
use crate::value::Value;

/// Value domain of one bit-group member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BitDomain {
    /// Unsigned integer of the mask's width.
    UInt,
    /// Single flag; the mask must have exactly one set bit.
    Bool,
    /// Unsigned integer restricted to an allowed set.
    Enum(Vec<u64>),
}

#[derive(Debug, Clone)]
pub(crate) struct BitSub {
    pub(crate) name: String,
    pub(crate) mask: u64,
    pub(crate) domain: BitDomain,
}

/// Descriptor payload for bit groups.
#[derive(Debug, Clone)]
pub struct BitsField {
    storage: usize,
    endian: Endian,
    subs: Vec<BitSub>,
}

impl BitsField {
    pub(crate) fn new(storage: usize, endian: Endian) -> Self {
        Self {
            storage,
            endian,
            subs: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, name: &str, mask: u64, domain: BitDomain) {
        self.subs.push(BitSub {
            name: name.to_string(),
            mask,
            domain,
        });
    }

    pub(crate) fn storage(&self) -> usize {
        self.storage
    }

    pub(crate) fn check(&self) -> CodecResult<()> {
        if !(1..=8).contains(&self.storage) {
            return Err(CodecError::Schema {
                detail: format!("bit group storage must be 1..=8 bytes, got {}", self.storage),
            });
        }
        if self.subs.is_empty() {
            return Err(CodecError::Schema {
                detail: "bit group has no members".to_string(),
            });
        }
        let capacity = if self.storage == 8 {
            u64::MAX
        } else {
            (1u64 << (self.storage * 8)) - 1
        };
        let mut seen: u64 = 0;
        for sub in &self.subs {
            if sub.mask == 0 {
                return Err(CodecError::Schema {
                    detail: format!("bit member `{}` has an empty mask", sub.name),
                });
            }
            if sub.mask & !capacity != 0 {
                return Err(CodecError::Schema {
                    detail: format!(
                        "bit member `{}` mask {:#x} exceeds {} byte(s) of storage",
                        sub.name, sub.mask, self.storage
                    ),
                });
            }
            if sub.mask & seen != 0 {
                return Err(CodecError::Schema {
                    detail: format!("bit member `{}` overlaps an earlier member", sub.name),
                });
            }
            if matches!(sub.domain, BitDomain::Bool) && sub.mask.count_ones() != 1 {
                return Err(CodecError::Schema {
                    detail: format!(
                        "boolean bit member `{}` needs a single-bit mask",
                        sub.name
                    ),
                });
            }
            seen |= sub.mask;
        }
        Ok(())
    }

    pub(crate) fn read(&self, buf: &[u8], offset: usize) -> CodecResult<(Value, usize)> {
        let data = take(buf, offset, self.storage)?;
        let raw = unpack_uint(data, self.endian);

        let mut entries = Vec::with_capacity(self.subs.len());
        for sub in &self.subs {
            let bits = extract(raw, sub.mask);
            let value = match &sub.domain {
                BitDomain::UInt => Value::UInt(bits),
                BitDomain::Bool => Value::Bool(bits != 0),
                BitDomain::Enum(allowed) => {
                    if !allowed.contains(&bits) {
                        return Err(CodecError::Constraint {
                            detail: format!(
                                "bit member `{}` value {} not in allowed set {:?}",
                                sub.name, bits, allowed
                            ),
                        });
                    }
                    Value::UInt(bits)
                }
            };
            entries.push((sub.name.clone(), value));
        }
        Ok((Value::Group(entries), self.storage))
    }

    pub(crate) fn write(&self, value: &Value, out: &mut Vec<u8>, offset: usize) -> CodecResult<()> {
        let composed = self.compose(value)?;
        reserve(out, offset + self.storage);

        // keep bits outside every member mask as the caller prefilled them
        let union: u64 = self.subs.iter().fold(0, |acc, sub| acc | sub.mask);
        let existing = unpack_uint(&out[offset..offset + self.storage], self.endian);
        let merged = (existing & !union) | composed;
        pack_uint(merged, &mut out[offset..offset + self.storage], self.endian)
    }

    fn compose(&self, value: &Value) -> CodecResult<u64> {
        let mut composed: u64 = 0;
        for sub in &self.subs {
            let member = value.group_get(&sub.name).ok_or_else(|| CodecError::Encode {
                detail: format!("bit group value is missing member `{}`", sub.name),
            })?;
            let bits = match (&sub.domain, member) {
                (BitDomain::Bool, member) => {
                    u64::from(member.as_bool().ok_or_else(|| CodecError::Encode {
                        detail: format!("bit member `{}` expects a boolean", sub.name),
                    })?)
                }
                (BitDomain::Enum(allowed), member) => {
                    let v = member.as_uint().ok_or_else(|| CodecError::Encode {
                        detail: format!("bit member `{}` expects an integer", sub.name),
                    })?;
                    if !allowed.contains(&v) {
                        return Err(CodecError::Encode {
                            detail: format!(
                                "bit member `{}` value {} not in allowed set {:?}",
                                sub.name, v, allowed
                            ),
                        });
                    }
                    v
                }
                (BitDomain::UInt, member) => member.as_uint().ok_or_else(|| CodecError::Encode {
                    detail: format!("bit member `{}` expects an integer", sub.name),
                })?,
            };
            let width = sub.mask.count_ones();
            if width < 64 && bits >= 1u64 << width {
                return Err(CodecError::Encode {
                    detail: format!(
                        "bit member `{}` value {} does not fit {} bit(s)",
                        sub.name, bits, width
                    ),
                });
            }
            composed |= insert(bits, sub.mask);
        }
        Ok(composed)
    }

    pub(crate) fn validate(&self, value: &Value) -> CodecResult<()> {
        self.compose(value).map(|_| ())
    }

    pub(crate) fn default_value(&self) -> Value {
        let entries = self
            .subs
            .iter()
            .map(|sub| {
                let value = match sub.domain {
                    BitDomain::Bool => Value::Bool(false),
                    _ => Value::UInt(0),
                };
                (sub.name.clone(), value)
            })
            .collect();
        Value::Group(entries)
    }
}

/// Compact the bits of `raw` selected by `mask` into a dense value.
fn extract(raw: u64, mask: u64) -> u64 {
    let mut out = 0;
    let mut out_bit = 0;
    for bit in 0..64 {
        if mask >> bit & 1 == 1 {
            if raw >> bit & 1 == 1 {
                out |= 1 << out_bit;
            }
            out_bit += 1;
        }
    }
    out
}

/// Spread a dense value back over the set bits of `mask`.
fn insert(value: u64, mask: u64) -> u64 {
    let mut out = 0;
    let mut in_bit = 0;
    for bit in 0..64 {
        if mask >> bit & 1 == 1 {
            if value >> in_bit & 1 == 1 {
                out |= 1 << bit;
            }
            in_bit += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags_field() -> BitsField {
        let mut field = BitsField::new(1, Endian::Little);
        field.push("compressed", 0b0000_0001, BitDomain::Bool);
        field.push("kind", 0b0000_0110, BitDomain::UInt);
        field.push("level", 0b1100_0000, BitDomain::UInt);
        field
    }

    #[test]
    fn test_extract_and_insert_are_inverse() {
        let mask = 0b1001_0110;
        for value in 0..16 {
            assert_eq!(extract(insert(value, mask), mask), value);
        }
    }

    #[test]
    fn test_read_splits_members() {
        let field = flags_field();
        // 0b1000_0101: compressed=1, kind=0b10, level=0b10
        let (value, consumed) = field.read(&[0b1000_0101], 0).unwrap();
        assert_eq!(consumed, 1);
        assert_eq!(value.group_get("compressed"), Some(&Value::Bool(true)));
        assert_eq!(value.group_get("kind"), Some(&Value::UInt(0b10)));
        assert_eq!(value.group_get("level"), Some(&Value::UInt(0b10)));
    }

    #[test]
    fn test_write_preserves_unmasked_bits() {
        let field = flags_field();
        let (value, _) = field.read(&[0b0000_0101], 0).unwrap();
        // bit 5 and bit 3 are outside every mask; prefill sets them
        let mut out = vec![0b0010_1000];
        field.write(&value, &mut out, 0).unwrap();
        assert_eq!(out[0], 0b0010_1101);
    }

    #[test]
    fn test_roundtrip_two_byte_group() {
        let mut field = BitsField::new(2, Endian::Big);
        field.push("high", 0xff00, BitDomain::UInt);
        field.push("low", 0x00ff, BitDomain::UInt);
        field.check().unwrap();

        let (value, consumed) = field.read(&[0x12, 0x34], 0).unwrap();
        assert_eq!(consumed, 2);
        assert_eq!(value.group_get("high"), Some(&Value::UInt(0x12)));
        assert_eq!(value.group_get("low"), Some(&Value::UInt(0x34)));

        let mut out = Vec::new();
        field.write(&value, &mut out, 0).unwrap();
        assert_eq!(out, vec![0x12, 0x34]);
    }

    #[test]
    fn test_overflowing_member_rejected() {
        let field = flags_field();
        let mut value = field.default_value();
        value.group_set("kind", Value::UInt(4)).unwrap();
        let mut out = Vec::new();
        let err = field.write(&value, &mut out, 0).unwrap_err();
        assert!(matches!(err, CodecError::Encode { .. }));
    }

    #[test]
    fn test_enum_domain_checked_on_read() {
        let mut field = BitsField::new(1, Endian::Little);
        field.push("mode", 0b0000_0111, BitDomain::Enum(vec![0, 1, 2]));
        let err = field.read(&[0b0000_0101], 0).unwrap_err();
        assert!(matches!(err, CodecError::Constraint { .. }));
    }

    #[test]
    fn test_schema_checks() {
        let mut overlapping = BitsField::new(1, Endian::Little);
        overlapping.push("a", 0b0000_0011, BitDomain::UInt);
        overlapping.push("b", 0b0000_0110, BitDomain::UInt);
        assert!(overlapping.check().is_err());

        let mut too_wide = BitsField::new(1, Endian::Little);
        too_wide.push("a", 0x100, BitDomain::UInt);
        assert!(too_wide.check().is_err());

        let mut bad_bool = BitsField::new(1, Endian::Little);
        bad_bool.push("a", 0b0000_0011, BitDomain::Bool);
        assert!(bad_bool.check().is_err());
    }
}
