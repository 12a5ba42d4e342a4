//! Numeric field codec.
//!
//! Unsigned and signed integers of widths 8/16/24/32/64, floats of 32/64,
//! explicit endianness, optional fixed or ref-counted arrays, and declared
//! value constraints (inclusive range or explicit allowed set). All integer
//! arithmetic is two's complement within the declared width; there is no
//! implicit widening on serialization.

use serde::{Deserialize, Serialize};

use crate::encoding::{
    int_bounds, pack_f32, pack_f64, pack_int, pack_uint, uint_max, unpack_f32, unpack_f64,
    unpack_int, unpack_uint, Endian,
};
use crate::error::{CodecError, CodecResult};
use crate::field::{reserve, take, IntProp};
use crate::refs::Scope;
use crate::value::Value;

/// Numeric value domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NumberType {
    U8,
    U16,
    U24,
    U32,
    U64,
    I8,
    I16,
    I24,
    I32,
    I64,
    F32,
    F64,
}

impl NumberType {
    /// Size in bytes of one element.
    pub fn width(self) -> usize {
        match self {
            NumberType::U8 | NumberType::I8 => 1,
            NumberType::U16 | NumberType::I16 => 2,
            NumberType::U24 | NumberType::I24 => 3,
            NumberType::U32 | NumberType::I32 | NumberType::F32 => 4,
            NumberType::U64 | NumberType::I64 | NumberType::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, NumberType::F32 | NumberType::F64)
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            NumberType::I8
                | NumberType::I16
                | NumberType::I24
                | NumberType::I32
                | NumberType::I64
                | NumberType::F32
                | NumberType::F64
        )
    }
}

/// Descriptor payload for numeric fields.
#[derive(Debug, Clone)]
pub struct NumberField {
    pub(crate) ty: NumberType,
    pub(crate) endian: Endian,
    /// `Some` turns the field into an array of that many elements.
    pub(crate) count: Option<IntProp>,
    /// Inclusive allowed range.
    pub(crate) range: Option<(i64, i64)>,
    /// Explicit allowed value set.
    pub(crate) one_of: Option<Vec<i64>>,
}

impl NumberField {
    pub(crate) fn new(ty: NumberType, endian: Endian) -> Self {
        Self {
            ty,
            endian,
            count: None,
            range: None,
            one_of: None,
        }
    }

    fn decode_one(&self, data: &[u8]) -> Value {
        match self.ty {
            NumberType::F32 => {
                let arr: [u8; 4] = data.try_into().unwrap();
                Value::Float(f64::from(unpack_f32(&arr, self.endian)))
            }
            NumberType::F64 => {
                let arr: [u8; 8] = data.try_into().unwrap();
                Value::Float(unpack_f64(&arr, self.endian))
            }
            ty if ty.is_signed() => Value::Int(unpack_int(data, self.endian)),
            _ => Value::UInt(unpack_uint(data, self.endian)),
        }
    }

    fn encode_one(&self, value: &Value, out: &mut [u8]) -> CodecResult<()> {
        match self.ty {
            NumberType::F32 => {
                let v = value.as_float().ok_or_else(|| self.type_error(value))?;
                out.copy_from_slice(&pack_f32(v as f32, self.endian));
                Ok(())
            }
            NumberType::F64 => {
                let v = value.as_float().ok_or_else(|| self.type_error(value))?;
                out.copy_from_slice(&pack_f64(v, self.endian));
                Ok(())
            }
            ty if ty.is_signed() => {
                let v = value.as_int().ok_or_else(|| self.type_error(value))?;
                pack_int(v, out, self.endian)
            }
            _ => {
                let v = value.as_uint().ok_or_else(|| self.type_error(value))?;
                pack_uint(v, out, self.endian)
            }
        }
    }

    fn type_error(&self, value: &Value) -> CodecError {
        CodecError::Encode {
            detail: format!(
                "expected a {:?} value, found {}",
                self.ty,
                value.type_name()
            ),
        }
    }

    /// Declared-constraint check for one element. Import and export both
    /// reject out-of-constraint values.
    fn check_constraints(&self, value: &Value) -> CodecResult<()> {
        if self.ty.is_float() {
            // range/one_of are integer constraints; floats carry none
            return Ok(());
        }
        let v = match value.as_int() {
            Some(v) => v,
            // u64 values above i64::MAX cannot satisfy an i64 constraint
            None => {
                if self.range.is_some() || self.one_of.is_some() {
                    return Err(CodecError::Constraint {
                        detail: format!("value {:?} is outside the declared constraint", value),
                    });
                }
                return Ok(());
            }
        };
        if let Some((min, max)) = self.range {
            if v < min || v > max {
                return Err(CodecError::Constraint {
                    detail: format!("value {} not in range {}..={}", v, min, max),
                });
            }
        }
        if let Some(allowed) = &self.one_of {
            if !allowed.contains(&v) {
                return Err(CodecError::Constraint {
                    detail: format!("value {} not in allowed set {:?}", v, allowed),
                });
            }
        }
        Ok(())
    }

    pub(crate) fn read(
        &self,
        buf: &[u8],
        offset: usize,
        scope: &Scope<'_>,
    ) -> CodecResult<(Value, usize)> {
        let width = self.ty.width();
        match &self.count {
            None => {
                let data = take(buf, offset, width)?;
                let value = self.decode_one(data);
                self.check_constraints(&value)?;
                Ok((value, width))
            }
            Some(count) => {
                let count = count.resolve(scope)?;
                let mut items = Vec::with_capacity(count);
                for i in 0..count {
                    let data = take(buf, offset + width * i, width)?;
                    let value = self.decode_one(data);
                    self.check_constraints(&value)?;
                    items.push(value);
                }
                Ok((Value::List(items), width * count))
            }
        }
    }

    pub(crate) fn write(
        &self,
        value: &Value,
        out: &mut Vec<u8>,
        offset: usize,
        _scope: &Scope<'_>,
    ) -> CodecResult<()> {
        let width = self.ty.width();
        let items: &[Value] = match (&self.count, value) {
            (None, single) => std::slice::from_ref(single),
            (Some(_), Value::List(items)) => items,
            (Some(_), other) => {
                return Err(CodecError::Encode {
                    detail: format!("expected a list, found {}", other.type_name()),
                })
            }
        };
        reserve(out, offset + width * items.len());
        for (i, item) in items.iter().enumerate() {
            self.check_constraints(item)
                .map_err(|e| constraint_to_encode(e))?;
            let start = offset + width * i;
            self.encode_one(item, &mut out[start..start + width])?;
        }
        Ok(())
    }

    pub(crate) fn size_of(&self, scope: &Scope<'_>) -> CodecResult<usize> {
        let width = self.ty.width();
        match &self.count {
            None => Ok(width),
            Some(count) => Ok(width * count.resolve(scope)?),
        }
    }

    pub(crate) fn validate(&self, value: &Value, scope: &Scope<'_>) -> CodecResult<()> {
        match (&self.count, value) {
            (None, single) => {
                self.check_type(single)?;
                self.check_constraints(single)
            }
            (Some(count), Value::List(items)) => {
                // a constant count is a hard shape requirement; a ref count
                // is re-derived from the list on export
                if let Some(expected) = count.as_const() {
                    if items.len() != expected {
                        return Err(CodecError::Encode {
                            detail: format!(
                                "count declared as {}, list has {} entries",
                                expected,
                                items.len()
                            ),
                        });
                    }
                }
                let _ = scope;
                for item in items {
                    self.check_type(item)?;
                    self.check_constraints(item)?;
                }
                Ok(())
            }
            (Some(_), other) => Err(CodecError::Encode {
                detail: format!("expected a list, found {}", other.type_name()),
            }),
        }
    }

    fn check_type(&self, value: &Value) -> CodecResult<()> {
        let ok = match self.ty {
            NumberType::F32 | NumberType::F64 => value.as_float().is_some(),
            ty if ty.is_signed() => {
                let (min, max) = int_bounds(ty.width());
                value.as_int().map(|v| v >= min && v <= max).unwrap_or(false)
            }
            ty => value
                .as_uint()
                .map(|v| v <= uint_max(ty.width()))
                .unwrap_or(false),
        };
        if ok {
            Ok(())
        } else {
            Err(CodecError::Encode {
                detail: format!(
                    "value {:?} is not representable as {:?}",
                    value, self.ty
                ),
            })
        }
    }

    pub(crate) fn default_value(&self) -> Value {
        let zero = match self.ty {
            NumberType::F32 | NumberType::F64 => Value::Float(0.0),
            ty if ty.is_signed() => Value::Int(0),
            _ => Value::UInt(0),
        };
        match &self.count {
            None => zero,
            Some(count) => {
                let n = count.as_const().unwrap_or(0);
                Value::List(vec![zero; n])
            }
        }
    }
}

/// A constraint failure found while exporting is an encode error: the
/// caller supplied the value, the buffer did not.
fn constraint_to_encode(err: CodecError) -> CodecError {
    match err {
        CodecError::Constraint { detail } => CodecError::Encode { detail },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::schema::SchemaBuilder;

    fn empty_scope_block() -> Block {
        let schema = SchemaBuilder::new("Empty").build().unwrap();
        Block::new(&schema)
    }

    #[test]
    fn test_u16_be_read() {
        let field = NumberField::new(NumberType::U16, Endian::Big);
        let block = empty_scope_block();
        let scope = Scope::root(&block);
        let (value, consumed) = field.read(&[0x01, 0x02], 0, &scope).unwrap();
        assert_eq!(value, Value::UInt(258));
        assert_eq!(consumed, 2);
    }

    #[test]
    fn test_u24_roundtrip() {
        let field = NumberField::new(NumberType::U24, Endian::Little);
        let block = empty_scope_block();
        let scope = Scope::root(&block);
        let mut out = Vec::new();
        field
            .write(&Value::UInt(0x123456), &mut out, 0, &scope)
            .unwrap();
        assert_eq!(out, vec![0x56, 0x34, 0x12]);
        let (value, _) = field.read(&out, 0, &scope).unwrap();
        assert_eq!(value, Value::UInt(0x123456));
    }

    #[test]
    fn test_i16_negative_roundtrip() {
        let field = NumberField::new(NumberType::I16, Endian::Big);
        let block = empty_scope_block();
        let scope = Scope::root(&block);
        let mut out = Vec::new();
        field.write(&Value::Int(-2), &mut out, 0, &scope).unwrap();
        assert_eq!(out, vec![0xff, 0xfe]);
        let (value, _) = field.read(&out, 0, &scope).unwrap();
        assert_eq!(value, Value::Int(-2));
    }

    #[test]
    fn test_short_buffer() {
        let field = NumberField::new(NumberType::U32, Endian::Little);
        let block = empty_scope_block();
        let scope = Scope::root(&block);
        let err = field.read(&[0x01, 0x02], 0, &scope).unwrap_err();
        assert!(matches!(err, CodecError::ShortBuffer { needed: 4, .. }));
    }

    #[test]
    fn test_range_rejects_on_read() {
        let mut field = NumberField::new(NumberType::U16, Endian::Big);
        field.range = Some((0, 250));
        let block = empty_scope_block();
        let scope = Scope::root(&block);
        // 0x00fb == 251
        let err = field.read(&[0x00, 0xfb], 0, &scope).unwrap_err();
        assert!(matches!(err, CodecError::Constraint { .. }));
    }

    #[test]
    fn test_one_of_rejects() {
        let mut field = NumberField::new(NumberType::U8, Endian::Little);
        field.one_of = Some(vec![1, 2, 4]);
        let block = empty_scope_block();
        let scope = Scope::root(&block);
        assert!(field.read(&[0x02], 0, &scope).is_ok());
        assert!(field.read(&[0x03], 0, &scope).is_err());
    }

    #[test]
    fn test_write_overflow_is_encode_error() {
        let field = NumberField::new(NumberType::U8, Endian::Little);
        let block = empty_scope_block();
        let scope = Scope::root(&block);
        let mut out = Vec::new();
        let err = field
            .write(&Value::UInt(256), &mut out, 0, &scope)
            .unwrap_err();
        assert!(matches!(err, CodecError::Encode { .. }));
    }

    #[test]
    fn test_fixed_count_array() {
        let mut field = NumberField::new(NumberType::U16, Endian::Little);
        field.count = Some(IntProp::Const(3));
        let block = empty_scope_block();
        let scope = Scope::root(&block);
        let data = [0x01, 0x00, 0x02, 0x00, 0x03, 0x00];
        let (value, consumed) = field.read(&data, 0, &scope).unwrap();
        assert_eq!(consumed, 6);
        assert_eq!(
            value,
            Value::List(vec![Value::UInt(1), Value::UInt(2), Value::UInt(3)])
        );

        let mut out = Vec::new();
        field.write(&value, &mut out, 0, &scope).unwrap();
        assert_eq!(out.as_slice(), &data);
    }

    #[test]
    fn test_validate_const_count_mismatch() {
        let mut field = NumberField::new(NumberType::U8, Endian::Little);
        field.count = Some(IntProp::Const(2));
        let block = empty_scope_block();
        let scope = Scope::root(&block);
        let err = field
            .validate(&Value::List(vec![Value::UInt(1)]), &scope)
            .unwrap_err();
        assert!(matches!(err, CodecError::Encode { .. }));
    }

    #[test]
    fn test_f32_roundtrip() {
        let field = NumberField::new(NumberType::F32, Endian::Big);
        let block = empty_scope_block();
        let scope = Scope::root(&block);
        let mut out = Vec::new();
        field
            .write(&Value::Float(1.5), &mut out, 0, &scope)
            .unwrap();
        let (value, _) = field.read(&out, 0, &scope).unwrap();
        assert_eq!(value, Value::Float(1.5));
    }
}
