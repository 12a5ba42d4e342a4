//! Raw byte-run field codec.

use std::sync::Arc;

use crate::error::{CodecError, CodecResult};
use crate::field::{reserve, take, IntProp};
use crate::refs::Scope;
use crate::transform::{Transform, TransformContext};
use crate::value::Value;

/// Descriptor payload for raw byte runs.
///
/// Exactly one sizing mode applies: a declared `length` (constant or ref),
/// a `stream_end` marker, or `stream` mode consuming to the end of the
/// buffer. A transform, when present, wraps the raw region on both
/// directions.
#[derive(Debug, Clone)]
pub struct BytesField {
    pub(crate) length: Option<IntProp>,
    pub(crate) stream: bool,
    pub(crate) alignment: Option<usize>,
    pub(crate) transform: Option<Arc<dyn Transform>>,
    pub(crate) stream_end: Option<Vec<u8>>,
}

impl BytesField {
    pub(crate) fn fixed(length: IntProp) -> Self {
        Self {
            length: Some(length),
            stream: false,
            alignment: None,
            transform: None,
            stream_end: None,
        }
    }

    pub(crate) fn stream() -> Self {
        Self {
            length: None,
            stream: true,
            alignment: None,
            transform: None,
            stream_end: None,
        }
    }

    pub(crate) fn check(&self) -> CodecResult<()> {
        if self.length.is_none() && !self.stream && self.stream_end.is_none() {
            return Err(CodecError::Schema {
                detail: "bytes field needs a length, a stream_end marker, or stream mode"
                    .to_string(),
            });
        }
        if let Some(0) = self.alignment {
            return Err(CodecError::Schema {
                detail: "alignment must be non-zero".to_string(),
            });
        }
        if let Some(marker) = &self.stream_end {
            if marker.is_empty() {
                return Err(CodecError::Schema {
                    detail: "stream_end marker must be non-empty".to_string(),
                });
            }
        }
        Ok(())
    }

    fn pad(&self, size: usize) -> usize {
        match self.alignment {
            Some(alignment) => size.div_ceil(alignment) * alignment,
            None => size,
        }
    }

    pub(crate) fn read(
        &self,
        buf: &[u8],
        offset: usize,
        scope: &Scope<'_>,
    ) -> CodecResult<(Value, usize)> {
        // carve out the raw region
        let (raw, mut consumed) = if let Some(length) = &self.length {
            let length = length.resolve(scope)?;
            (take(buf, offset, length)?, length)
        } else {
            let rest = buf.get(offset..).unwrap_or(&[]);
            (rest, rest.len())
        };

        let (raw, marker_len) = match &self.stream_end {
            Some(marker) => match find(raw, marker) {
                Some(pos) => (&raw[..pos], marker.len()),
                // a missing marker means the run extends to the region end
                None => (raw, 0),
            },
            None => (raw, 0),
        };
        if self.length.is_none() {
            consumed = raw.len() + marker_len;
        }

        let payload = match &self.transform {
            Some(transform) => {
                let ctx = TransformContext::new();
                let out = transform.forward(raw, &ctx)?;
                if self.length.is_none() && self.stream_end.is_none() {
                    // the transform's own framing decides how much raw data
                    // belongs to this field
                    consumed = out.consumed;
                }
                out.payload
            }
            None => raw.to_vec(),
        };

        Ok((Value::Bytes(payload), self.pad(consumed)))
    }

    pub(crate) fn write(
        &self,
        value: &Value,
        out: &mut Vec<u8>,
        offset: usize,
        scope: &Scope<'_>,
    ) -> CodecResult<()> {
        let data = value.as_bytes().ok_or_else(|| CodecError::Encode {
            detail: format!("expected bytes, found {}", value.type_name()),
        })?;

        let raw = match &self.transform {
            Some(transform) => transform.reverse(data, &TransformContext::new())?,
            None => data.to_vec(),
        };

        if let Some(length) = &self.length {
            let length = length.resolve(scope)?;
            if raw.len() != length {
                return Err(CodecError::Encode {
                    detail: format!(
                        "declared length is {} bytes, value serializes to {}",
                        length,
                        raw.len()
                    ),
                });
            }
        }

        let mut end = offset + raw.len();
        if let Some(marker) = &self.stream_end {
            end += marker.len();
        }
        let padded_end = offset + self.pad(end - offset);
        reserve(out, padded_end);
        out[offset..offset + raw.len()].copy_from_slice(&raw);
        if let Some(marker) = &self.stream_end {
            out[offset + raw.len()..end].copy_from_slice(marker);
        }
        // alignment slack beyond `end` stays as prefilled by the caller
        Ok(())
    }

    /// Serialized size of the raw region, before alignment.
    pub(crate) fn raw_size(&self, value: &Value, scope: &Scope<'_>) -> CodecResult<usize> {
        let data = value.as_bytes().ok_or_else(|| CodecError::Encode {
            detail: format!("expected bytes, found {}", value.type_name()),
        })?;
        let _ = scope;
        match &self.transform {
            Some(transform) => Ok(transform.reverse(data, &TransformContext::new())?.len()),
            None => Ok(data.len()),
        }
    }

    pub(crate) fn size_of(&self, value: &Value, scope: &Scope<'_>) -> CodecResult<usize> {
        let mut size = match &self.length {
            Some(length) => length.resolve(scope)?,
            None => self.raw_size(value, scope)?,
        };
        if self.length.is_none() {
            if let Some(marker) = &self.stream_end {
                size += marker.len();
            }
        }
        Ok(self.pad(size))
    }

    pub(crate) fn validate(&self, value: &Value) -> CodecResult<()> {
        if value.as_bytes().is_none() {
            return Err(CodecError::Encode {
                detail: format!("expected bytes, found {}", value.type_name()),
            });
        }
        Ok(())
    }

    pub(crate) fn default_value(&self) -> Value {
        // a constant length must be satisfiable by a fresh block
        let len = match (&self.transform, &self.length) {
            (None, Some(IntProp::Const(length))) => *length,
            _ => 0,
        };
        Value::Bytes(vec![0; len])
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::schema::SchemaBuilder;
    use crate::transform::XorTransform;

    fn scope_block() -> Block {
        let schema = SchemaBuilder::new("Empty").build().unwrap();
        Block::new(&schema)
    }

    #[test]
    fn test_fixed_length_read_write() {
        let field = BytesField::fixed(IntProp::Const(4));
        let block = scope_block();
        let scope = Scope::root(&block);
        let (value, consumed) = field.read(&[1, 2, 3, 4, 5], 0, &scope).unwrap();
        assert_eq!(value, Value::Bytes(vec![1, 2, 3, 4]));
        assert_eq!(consumed, 4);

        let mut out = Vec::new();
        field.write(&value, &mut out, 0, &scope).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_fixed_length_short_buffer() {
        let field = BytesField::fixed(IntProp::Const(8));
        let block = scope_block();
        let scope = Scope::root(&block);
        let err = field.read(&[1, 2, 3], 0, &scope).unwrap_err();
        assert!(matches!(err, CodecError::ShortBuffer { .. }));
    }

    #[test]
    fn test_stream_consumes_rest() {
        let field = BytesField::stream();
        let block = scope_block();
        let scope = Scope::root(&block);
        let (value, consumed) = field.read(&[9, 8, 7], 1, &scope).unwrap();
        assert_eq!(value, Value::Bytes(vec![8, 7]));
        assert_eq!(consumed, 2);
    }

    #[test]
    fn test_stream_with_no_remaining_bytes() {
        let field = BytesField::stream();
        let block = scope_block();
        let scope = Scope::root(&block);
        let (value, consumed) = field.read(&[1, 2], 2, &scope).unwrap();
        assert_eq!(value, Value::Bytes(Vec::new()));
        assert_eq!(consumed, 0);
    }

    #[test]
    fn test_stream_end_marker() {
        let mut field = BytesField::stream();
        field.stream_end = Some(vec![0xff, 0xff]);
        let block = scope_block();
        let scope = Scope::root(&block);
        let (value, consumed) = field.read(&[1, 2, 0xff, 0xff, 9], 0, &scope).unwrap();
        assert_eq!(value, Value::Bytes(vec![1, 2]));
        assert_eq!(consumed, 4);

        let mut out = Vec::new();
        field.write(&value, &mut out, 0, &scope).unwrap();
        assert_eq!(out, vec![1, 2, 0xff, 0xff]);
    }

    #[test]
    fn test_length_mismatch_on_write() {
        let field = BytesField::fixed(IntProp::Const(4));
        let block = scope_block();
        let scope = Scope::root(&block);
        let mut out = Vec::new();
        let err = field
            .write(&Value::Bytes(vec![1, 2]), &mut out, 0, &scope)
            .unwrap_err();
        assert!(matches!(err, CodecError::Encode { .. }));
    }

    #[test]
    fn test_transform_applies_both_ways() {
        let mut field = BytesField::fixed(IntProp::Const(4));
        field.transform = Some(Arc::new(XorTransform::new(0x5a)));
        let block = scope_block();
        let scope = Scope::root(&block);

        let raw = [0x5a ^ 1, 0x5a ^ 2, 0x5a ^ 3, 0x5a ^ 4];
        let (value, consumed) = field.read(&raw, 0, &scope).unwrap();
        assert_eq!(value, Value::Bytes(vec![1, 2, 3, 4]));
        assert_eq!(consumed, 4);

        let mut out = Vec::new();
        field.write(&value, &mut out, 0, &scope).unwrap();
        assert_eq!(out.as_slice(), &raw);
    }

    #[test]
    fn test_alignment_pads_size() {
        let mut field = BytesField::stream();
        field.alignment = Some(4);
        let block = scope_block();
        let scope = Scope::root(&block);
        let size = field
            .size_of(&Value::Bytes(vec![1, 2, 3, 4, 5]), &scope)
            .unwrap();
        assert_eq!(size, 8);
    }

    #[test]
    fn test_default_matches_const_length() {
        let field = BytesField::fixed(IntProp::Const(3));
        assert_eq!(field.default_value(), Value::Bytes(vec![0, 0, 0]));
        assert_eq!(BytesField::stream().default_value(), Value::Bytes(Vec::new()));
    }
}
