//! Nested block and chunk sequence fields.
//!
//! `BlockListField` drops one block of a named schema, a fixed or
//! ref-counted sequence, or a stream of them into the parent. A nested
//! region that fails to parse never kills the import: the slot degrades to
//! `BlockSlot::Unknown` carrying the raw bytes, which re-serialize
//! verbatim.
//!
//! `ChunkField` handles tagged-union sequences: each element carries an
//! identifier (raw bytes or an unsigned integer) and optionally a length
//! prefix; the engine dispatches to a schema per identifier.

use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::block::Block;
use crate::encoding::{pack_uint, unpack_uint, Endian};
use crate::error::{CodecError, CodecResult};
use crate::field::{reserve, take, IntProp, NumberType};
use crate::refs::Scope;
use crate::schema::Schema;
use crate::transform::{Transform, TransformContext};
use crate::value::{BlockSlot, ChunkId, ChunkValue, Value};

/// Caller-supplied end-of-stream predicate over `(buffer, offset)`.
///
/// Runs before each element of a streamed sequence; returning `true` ends
/// the stream. For formats whose terminator is more involved than a byte
/// marker.
#[derive(Clone)]
pub struct StopCheck(Arc<dyn Fn(&[u8], usize) -> bool + Send + Sync>);

impl StopCheck {
    pub fn new(predicate: impl Fn(&[u8], usize) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }

    fn hit(&self, buf: &[u8], offset: usize) -> bool {
        (self.0)(buf, offset)
    }
}

impl fmt::Debug for StopCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StopCheck(..)")
    }
}

/// How many nested blocks a field holds.
#[derive(Debug, Clone)]
pub enum Arity {
    /// Exactly one block.
    Single,
    /// A list of a constant or ref-computed count.
    Count(IntProp),
    /// Read blocks until the region runs out or a stream-end marker.
    Stream,
}

/// Descriptor payload for nested block fields.
#[derive(Debug, Clone)]
pub struct BlockListField {
    pub(crate) schema: Arc<Schema>,
    pub(crate) arity: Arity,
    /// Byte limit of the region the blocks live in.
    pub(crate) length: Option<IntProp>,
    /// Byte pattern standing in for an empty list entry.
    pub(crate) fill: Option<Vec<u8>>,
    pub(crate) alignment: Option<usize>,
    pub(crate) transform: Option<Arc<dyn Transform>>,
    pub(crate) stream_end: Option<Vec<u8>>,
    pub(crate) stop_check: Option<StopCheck>,
}

impl BlockListField {
    pub(crate) fn single(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            arity: Arity::Single,
            length: None,
            fill: None,
            alignment: None,
            transform: None,
            stream_end: None,
            stop_check: None,
        }
    }

    pub(crate) fn counted(schema: Arc<Schema>, count: IntProp) -> Self {
        Self {
            arity: Arity::Count(count),
            ..Self::single(schema)
        }
    }

    pub(crate) fn stream(schema: Arc<Schema>) -> Self {
        Self {
            arity: Arity::Stream,
            ..Self::single(schema)
        }
    }

    fn pad(&self, size: usize) -> usize {
        match self.alignment {
            Some(alignment) => size.div_ceil(alignment) * alignment,
            None => size,
        }
    }

    fn region<'a>(&self, buf: &'a [u8], offset: usize, scope: &Scope<'_>) -> CodecResult<&'a [u8]> {
        match &self.length {
            Some(length) => take(buf, offset, length.resolve(scope)?),
            None => Ok(buf.get(offset..).unwrap_or(&[])),
        }
    }

    /// Parse one element from the start of `region`. Returns the slot and
    /// the number of raw bytes consumed; a failed parse degrades to the
    /// unknown fallback over the whole remaining region.
    fn read_element(&self, region: &[u8], scope: &Scope<'_>) -> (BlockSlot, usize) {
        let attempt = || -> CodecResult<(BlockSlot, usize)> {
            match &self.transform {
                Some(transform) => {
                    let out = transform.forward(region, &TransformContext::new())?;
                    let (block, _) = Block::parse_with_scope(&self.schema, &out.payload, Some(scope))?;
                    Ok((BlockSlot::Known(block), out.consumed))
                }
                None => {
                    let (block, consumed) = Block::parse_with_scope(&self.schema, region, Some(scope))?;
                    Ok((BlockSlot::Known(block), consumed))
                }
            }
        };
        match attempt() {
            Ok(parsed) => parsed,
            Err(error) => {
                warn!(
                    schema = self.schema.name(),
                    %error,
                    "nested block failed to parse, preserving raw bytes"
                );
                (BlockSlot::Unknown(region.to_vec()), region.len())
            }
        }
    }

    pub(crate) fn read(
        &self,
        buf: &[u8],
        offset: usize,
        scope: &Scope<'_>,
    ) -> CodecResult<(Value, usize)> {
        let region = self.region(buf, offset, scope)?;

        if let Arity::Single = self.arity {
            let (slot, consumed) = self.read_element(region, scope);
            return Ok((Value::Block(slot), consumed));
        }

        let count = match &self.arity {
            Arity::Count(count) => Some(count.resolve(scope)?),
            _ => None,
        };

        let mut items = Vec::new();
        let mut pointer = 0;
        while pointer < region.len() {
            if count == Some(items.len()) {
                break;
            }
            if let Some(stop) = &self.stop_check {
                if stop.hit(region, pointer) {
                    break;
                }
            }
            let rest = &region[pointer..];
            if let Some(marker) = &self.stream_end {
                if rest.starts_with(marker) {
                    pointer += marker.len();
                    break;
                }
            }
            if let Some(fill) = &self.fill {
                if rest.starts_with(fill) {
                    items.push(Value::Null);
                    pointer += self.pad(fill.len());
                    continue;
                }
            }

            let (slot, consumed) = self.read_element(rest, scope);
            if consumed == 0 {
                if matches!(self.arity, Arity::Stream) {
                    return Err(CodecError::Decode {
                        detail: format!(
                            "cannot stream zero-size `{}` blocks",
                            self.schema.name()
                        ),
                    });
                }
                warn!(
                    schema = self.schema.name(),
                    "reading zero-size blocks from a counted list"
                );
            }
            let failed = matches!(slot, BlockSlot::Unknown(_));
            items.push(Value::Block(slot));
            pointer += self.pad(consumed);
            if failed {
                break;
            }
        }

        Ok((Value::List(items), pointer))
    }

    fn render_element(&self, slot: &Value, scope: &Scope<'_>) -> CodecResult<Vec<u8>> {
        match slot {
            Value::Block(BlockSlot::Known(block)) => {
                let data = block.render(Some(scope))?;
                match &self.transform {
                    Some(transform) => transform.reverse(&data, &TransformContext::new()),
                    None => Ok(data),
                }
            }
            // unknown regions go back out exactly as they came in
            Value::Block(BlockSlot::Unknown(raw)) => Ok(raw.clone()),
            Value::Null => self.fill.clone().ok_or_else(|| CodecError::Encode {
                detail: "a fill pattern is needed to serialize an empty list entry".to_string(),
            }),
            other => Err(CodecError::Encode {
                detail: format!("expected a block, found {}", other.type_name()),
            }),
        }
    }

    pub(crate) fn write(
        &self,
        value: &Value,
        out: &mut Vec<u8>,
        offset: usize,
        scope: &Scope<'_>,
    ) -> CodecResult<()> {
        let mut rendered = Vec::new();
        match (&self.arity, value) {
            (Arity::Single, slot) => {
                rendered.extend_from_slice(&self.render_element(slot, scope)?);
            }
            (_, Value::List(items)) => {
                for item in items {
                    let element = self.render_element(item, scope)?;
                    rendered.extend_from_slice(&element);
                    let slack = self.pad(element.len()) - element.len();
                    rendered.extend(std::iter::repeat(0).take(slack));
                }
                if let Some(marker) = &self.stream_end {
                    rendered.extend_from_slice(marker);
                }
            }
            (_, other) => {
                return Err(CodecError::Encode {
                    detail: format!("expected a block list, found {}", other.type_name()),
                })
            }
        }
        reserve(out, offset + rendered.len());
        out[offset..offset + rendered.len()].copy_from_slice(&rendered);
        Ok(())
    }

    pub(crate) fn size_of(&self, value: &Value, scope: &Scope<'_>) -> CodecResult<usize> {
        match (&self.arity, value) {
            (Arity::Single, slot) => self.element_size(slot, scope),
            (_, Value::List(items)) => {
                let mut size = 0;
                for item in items {
                    size += self.pad(self.element_size(item, scope)?);
                }
                if let Some(marker) = &self.stream_end {
                    size += marker.len();
                }
                Ok(size)
            }
            (_, other) => Err(CodecError::Encode {
                detail: format!("expected a block list, found {}", other.type_name()),
            }),
        }
    }

    fn element_size(&self, slot: &Value, scope: &Scope<'_>) -> CodecResult<usize> {
        match slot {
            Value::Block(BlockSlot::Known(block)) => match &self.transform {
                Some(transform) => {
                    let data = block.render(Some(scope))?;
                    Ok(transform.reverse(&data, &TransformContext::new())?.len())
                }
                None => block.render_size(Some(scope)),
            },
            Value::Block(BlockSlot::Unknown(raw)) => Ok(raw.len()),
            Value::Null => self
                .fill
                .as_ref()
                .map(|fill| fill.len())
                .ok_or_else(|| CodecError::Encode {
                    detail: "a fill pattern is needed to size an empty list entry".to_string(),
                }),
            other => Err(CodecError::Encode {
                detail: format!("expected a block, found {}", other.type_name()),
            }),
        }
    }

    pub(crate) fn validate(&self, value: &Value, scope: &Scope<'_>) -> CodecResult<()> {
        match (&self.arity, value) {
            (Arity::Single, Value::Block(slot)) => self.validate_slot_schema(slot),
            (Arity::Single, other) => Err(CodecError::Encode {
                detail: format!("expected a block, found {}", other.type_name()),
            }),
            (arity, Value::List(items)) => {
                if let Arity::Count(count) = arity {
                    // constant counts are binding; ref counts re-derive
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
                }
                let _ = scope;
                for item in items {
                    match item {
                        Value::Block(slot) => self.validate_slot_schema(slot)?,
                        Value::Null => {
                            if self.fill.is_none() {
                                return Err(CodecError::Encode {
                                    detail: "empty list entry without a fill pattern".to_string(),
                                });
                            }
                        }
                        other => {
                            return Err(CodecError::Encode {
                                detail: format!(
                                    "expected a block list entry, found {}",
                                    other.type_name()
                                ),
                            })
                        }
                    }
                }
                Ok(())
            }
            (_, other) => Err(CodecError::Encode {
                detail: format!("expected a block list, found {}", other.type_name()),
            }),
        }
    }

    fn validate_slot_schema(&self, slot: &BlockSlot) -> CodecResult<()> {
        if let BlockSlot::Known(block) = slot {
            if !Arc::ptr_eq(block.schema(), &self.schema) {
                return Err(CodecError::Encode {
                    detail: format!(
                        "expected a `{}` block, found `{}`",
                        self.schema.name(),
                        block.schema().name()
                    ),
                });
            }
        }
        Ok(())
    }

    pub(crate) fn default_value(&self) -> Value {
        match &self.arity {
            Arity::Single => Value::Block(BlockSlot::Known(Block::new(&self.schema))),
            Arity::Count(count) => {
                let n = count.as_const().unwrap_or(0);
                let items = (0..n)
                    .map(|_| Value::Block(BlockSlot::Known(Block::new(&self.schema))))
                    .collect();
                Value::List(items)
            }
            Arity::Stream => Value::List(Vec::new()),
        }
    }
}

// ============================================================================
// Chunk sequences
// ============================================================================

/// How chunk identifiers are laid out on the wire.
#[derive(Debug, Clone)]
pub enum ChunkIdSpec {
    /// Fixed-width raw identifier, e.g. 4-byte FourCCs.
    Bytes(usize),
    /// Unsigned numeric identifier.
    Number(NumberType, Endian),
}

/// Descriptor payload for tagged-union chunk sequences.
#[derive(Debug, Clone)]
pub struct ChunkField {
    pub(crate) id: ChunkIdSpec,
    /// Length prefix read after the identifier; without one each chunk's
    /// payload schema decides its own size.
    pub(crate) length_prefix: Option<(NumberType, Endian)>,
    pub(crate) map: Vec<(ChunkId, Arc<Schema>)>,
    pub(crate) default_schema: Option<Arc<Schema>>,
    pub(crate) length: Option<IntProp>,
    pub(crate) alignment: Option<usize>,
}

impl ChunkField {
    pub(crate) fn new(id: ChunkIdSpec) -> Self {
        Self {
            id,
            length_prefix: None,
            map: Vec::new(),
            default_schema: None,
            length: None,
            alignment: None,
        }
    }

    pub(crate) fn check(&self) -> CodecResult<()> {
        match &self.id {
            ChunkIdSpec::Bytes(0) => {
                return Err(CodecError::Schema {
                    detail: "chunk identifier width must be non-zero".to_string(),
                })
            }
            ChunkIdSpec::Number(ty, _) if ty.is_float() || ty.is_signed() => {
                return Err(CodecError::Schema {
                    detail: "chunk identifiers must be unsigned integers".to_string(),
                })
            }
            _ => {}
        }
        if let Some((ty, _)) = &self.length_prefix {
            if ty.is_float() || ty.is_signed() {
                return Err(CodecError::Schema {
                    detail: "chunk length prefixes must be unsigned integers".to_string(),
                });
            }
        }
        if self.map.is_empty() && self.default_schema.is_none() {
            return Err(CodecError::Schema {
                detail: "chunk field has no identifier map and no default schema".to_string(),
            });
        }
        Ok(())
    }

    fn pad(&self, size: usize) -> usize {
        match self.alignment {
            Some(alignment) => size.div_ceil(alignment) * alignment,
            None => size,
        }
    }

    fn id_size(&self) -> usize {
        match &self.id {
            ChunkIdSpec::Bytes(width) => *width,
            ChunkIdSpec::Number(ty, _) => ty.width(),
        }
    }

    fn read_id(&self, region: &[u8], pointer: usize) -> CodecResult<ChunkId> {
        match &self.id {
            ChunkIdSpec::Bytes(width) => {
                Ok(ChunkId::Bytes(take(region, pointer, *width)?.to_vec()))
            }
            ChunkIdSpec::Number(ty, endian) => {
                let data = take(region, pointer, ty.width())?;
                Ok(ChunkId::UInt(unpack_uint(data, *endian)))
            }
        }
    }

    fn schema_for(&self, id: &ChunkId) -> Option<&Arc<Schema>> {
        self.map
            .iter()
            .find(|(key, _)| key == id)
            .map(|(_, schema)| schema)
            .or(self.default_schema.as_ref())
    }

    pub(crate) fn read(
        &self,
        buf: &[u8],
        offset: usize,
        scope: &Scope<'_>,
    ) -> CodecResult<(Value, usize)> {
        let region = match &self.length {
            Some(length) => take(buf, offset, length.resolve(scope)?)?,
            None => buf.get(offset..).unwrap_or(&[]),
        };

        let mut items = Vec::new();
        let mut pointer = 0;
        while pointer < region.len() {
            let start = pointer;
            let id = self.read_id(region, pointer)?;
            pointer += self.id_size();

            let schema = self.schema_for(&id).ok_or_else(|| CodecError::Decode {
                detail: format!("no chunk schema for identifier {} at offset {}", id, start),
            })?;

            let payload = match &self.length_prefix {
                Some((ty, endian)) => {
                    let data = take(region, pointer, ty.width())?;
                    let size = unpack_uint(data, *endian) as usize;
                    pointer += ty.width();
                    if size == 0 {
                        None
                    } else {
                        let body = take(region, pointer, size)?;
                        pointer += size;
                        let slot = match Block::parse_with_scope(schema, body, Some(scope)) {
                            Ok((block, _)) => BlockSlot::Known(block),
                            Err(error) => {
                                warn!(
                                    schema = schema.name(),
                                    %error,
                                    "chunk payload failed to parse, preserving raw bytes"
                                );
                                BlockSlot::Unknown(body.to_vec())
                            }
                        };
                        Some(slot)
                    }
                }
                None => {
                    let rest = &region[pointer..];
                    match Block::parse_with_scope(schema, rest, Some(scope)) {
                        Ok((block, consumed)) => {
                            pointer += consumed;
                            Some(BlockSlot::Known(block))
                        }
                        Err(error) => {
                            warn!(
                                schema = schema.name(),
                                %error,
                                "chunk payload failed to parse, preserving raw bytes"
                            );
                            pointer = region.len();
                            Some(BlockSlot::Unknown(rest.to_vec()))
                        }
                    }
                }
            };

            items.push(Value::Chunk(ChunkValue { id, payload }));
            pointer = start + self.pad(pointer - start);
        }

        Ok((Value::List(items), pointer))
    }

    fn write_id(&self, id: &ChunkId, out: &mut Vec<u8>) -> CodecResult<()> {
        match (&self.id, id) {
            (ChunkIdSpec::Bytes(width), ChunkId::Bytes(data)) => {
                if data.len() != *width {
                    return Err(CodecError::Encode {
                        detail: format!(
                            "chunk identifier is {} bytes, expected {}",
                            data.len(),
                            width
                        ),
                    });
                }
                out.extend_from_slice(data);
                Ok(())
            }
            (ChunkIdSpec::Number(ty, endian), ChunkId::UInt(value)) => {
                let start = out.len();
                out.resize(start + ty.width(), 0);
                pack_uint(*value, &mut out[start..], *endian)
            }
            (_, id) => Err(CodecError::Encode {
                detail: format!("chunk identifier {} does not match the declared layout", id),
            }),
        }
    }

    fn render_payload(&self, chunk: &ChunkValue, scope: &Scope<'_>) -> CodecResult<Vec<u8>> {
        match &chunk.payload {
            None => Ok(Vec::new()),
            Some(BlockSlot::Unknown(raw)) => Ok(raw.clone()),
            Some(BlockSlot::Known(block)) => block.render(Some(scope)),
        }
    }

    pub(crate) fn write(
        &self,
        value: &Value,
        out: &mut Vec<u8>,
        offset: usize,
        scope: &Scope<'_>,
    ) -> CodecResult<()> {
        let items = value.as_list().ok_or_else(|| CodecError::Encode {
            detail: format!("expected a chunk list, found {}", value.type_name()),
        })?;

        let mut rendered = Vec::new();
        for item in items {
            let chunk = match item {
                Value::Chunk(chunk) => chunk,
                other => {
                    return Err(CodecError::Encode {
                        detail: format!("expected a chunk, found {}", other.type_name()),
                    })
                }
            };
            let start = rendered.len();
            self.write_id(&chunk.id, &mut rendered)?;
            let payload = self.render_payload(chunk, scope)?;
            if let Some((ty, endian)) = &self.length_prefix {
                // the prefix always restates the payload's current size
                let at = rendered.len();
                rendered.resize(at + ty.width(), 0);
                pack_uint(payload.len() as u64, &mut rendered[at..], *endian)?;
            }
            rendered.extend_from_slice(&payload);
            let slack = self.pad(rendered.len() - start) - (rendered.len() - start);
            rendered.extend(std::iter::repeat(0).take(slack));
        }

        reserve(out, offset + rendered.len());
        out[offset..offset + rendered.len()].copy_from_slice(&rendered);
        Ok(())
    }

    pub(crate) fn size_of(&self, value: &Value, scope: &Scope<'_>) -> CodecResult<usize> {
        let items = value.as_list().ok_or_else(|| CodecError::Encode {
            detail: format!("expected a chunk list, found {}", value.type_name()),
        })?;
        let mut size = 0;
        for item in items {
            let chunk = match item {
                Value::Chunk(chunk) => chunk,
                other => {
                    return Err(CodecError::Encode {
                        detail: format!("expected a chunk, found {}", other.type_name()),
                    })
                }
            };
            let mut element = self.id_size();
            if let Some((ty, _)) = &self.length_prefix {
                element += ty.width();
            }
            element += match &chunk.payload {
                None => 0,
                Some(BlockSlot::Unknown(raw)) => raw.len(),
                Some(BlockSlot::Known(block)) => block.render_size(Some(scope))?,
            };
            size += self.pad(element);
        }
        Ok(size)
    }

    pub(crate) fn validate(&self, value: &Value) -> CodecResult<()> {
        let items = value.as_list().ok_or_else(|| CodecError::Encode {
            detail: format!("expected a chunk list, found {}", value.type_name()),
        })?;
        for item in items {
            match item {
                Value::Chunk(chunk) => {
                    if chunk.payload.is_none() && self.length_prefix.is_none() {
                        return Err(CodecError::Encode {
                            detail: format!(
                                "chunk {} has no payload and the layout has no length prefix",
                                chunk.id
                            ),
                        });
                    }
                }
                other => {
                    return Err(CodecError::Encode {
                        detail: format!("expected a chunk, found {}", other.type_name()),
                    })
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Endian;
    use crate::field::Field;
    use crate::schema::SchemaBuilder;

    fn item_schema() -> Arc<Schema> {
        SchemaBuilder::new("Item")
            .field("value", Field::u8())
            .build()
            .unwrap()
    }

    fn pair_schema() -> Arc<Schema> {
        SchemaBuilder::new("Pair")
            .field("a", Field::u8())
            .field("b", Field::u8())
            .build()
            .unwrap()
    }

    fn outer_block() -> Block {
        let schema = SchemaBuilder::new("Outer").build().unwrap();
        Block::new(&schema)
    }

    #[test]
    fn test_counted_list_read() {
        let field = BlockListField::counted(item_schema(), IntProp::Const(2));
        let outer = outer_block();
        let scope = Scope::root(&outer);
        let (value, consumed) = field.read(&[0xaa, 0xbb, 0xcc], 0, &scope).unwrap();
        assert_eq!(consumed, 2);
        let items = value.as_list().unwrap();
        assert_eq!(items.len(), 2);
        let first = items[0].as_block().unwrap().known().unwrap();
        assert_eq!(first.get("value"), Some(&Value::UInt(0xaa)));
    }

    #[test]
    fn test_single_falls_back_to_unknown() {
        let field = BlockListField::single(pair_schema());
        let outer = outer_block();
        let scope = Scope::root(&outer);
        // one byte cannot satisfy the two-byte Pair schema
        let (value, consumed) = field.read(&[0x42], 0, &scope).unwrap();
        assert_eq!(consumed, 1);
        let slot = value.as_block().unwrap();
        assert_eq!(slot.unknown(), Some(&[0x42][..]));
    }

    #[test]
    fn test_unknown_writes_verbatim() {
        let field = BlockListField::single(pair_schema());
        let outer = outer_block();
        let scope = Scope::root(&outer);
        let value = Value::Block(BlockSlot::Unknown(vec![0xde, 0xad, 0xbe]));
        let mut out = Vec::new();
        field.write(&value, &mut out, 0, &scope).unwrap();
        assert_eq!(out, vec![0xde, 0xad, 0xbe]);
    }

    #[test]
    fn test_fill_entries() {
        let mut field = BlockListField::counted(pair_schema(), IntProp::Const(3));
        field.fill = Some(vec![0xff, 0xff]);
        let outer = outer_block();
        let scope = Scope::root(&outer);
        let data = [0x01, 0x02, 0xff, 0xff, 0x03, 0x04];
        let (value, consumed) = field.read(&data, 0, &scope).unwrap();
        assert_eq!(consumed, 6);
        let items = value.as_list().unwrap();
        assert!(items[1].is_null());

        let mut out = Vec::new();
        field.write(&value, &mut out, 0, &scope).unwrap();
        assert_eq!(out.as_slice(), &data);
    }

    #[test]
    fn test_stream_reads_until_region_ends() {
        let field = BlockListField::stream(pair_schema());
        let outer = outer_block();
        let scope = Scope::root(&outer);
        let (value, consumed) = field.read(&[1, 2, 3, 4], 0, &scope).unwrap();
        assert_eq!(consumed, 4);
        assert_eq!(value.as_list().unwrap().len(), 2);
    }

    #[test]
    fn test_stream_empty_region_is_empty_list() {
        let field = BlockListField::stream(pair_schema());
        let outer = outer_block();
        let scope = Scope::root(&outer);
        let (value, consumed) = field.read(&[], 0, &scope).unwrap();
        assert_eq!(consumed, 0);
        assert_eq!(value, Value::List(Vec::new()));
    }

    #[test]
    fn test_stop_check_ends_stream() {
        let mut field = BlockListField::stream(pair_schema());
        field.stop_check = Some(StopCheck::new(|buf, offset| buf[offset] == 0xfe));
        let outer = outer_block();
        let scope = Scope::root(&outer);
        let (value, consumed) = field.read(&[1, 2, 0xfe, 0xff], 0, &scope).unwrap();
        assert_eq!(consumed, 2);
        assert_eq!(value.as_list().unwrap().len(), 1);
    }

    #[test]
    fn test_stream_end_marker_stops_list() {
        let mut field = BlockListField::stream(pair_schema());
        field.stream_end = Some(vec![0x00, 0x00]);
        let outer = outer_block();
        let scope = Scope::root(&outer);
        let (value, consumed) = field.read(&[1, 2, 0x00, 0x00, 9], 0, &scope).unwrap();
        assert_eq!(consumed, 4);
        assert_eq!(value.as_list().unwrap().len(), 1);
    }

    #[test]
    fn test_wrong_schema_rejected_on_validate() {
        let field = BlockListField::single(pair_schema());
        let outer = outer_block();
        let scope = Scope::root(&outer);
        let stray = Value::Block(BlockSlot::Known(Block::new(&item_schema())));
        assert!(field.validate(&stray, &scope).is_err());
    }

    #[test]
    fn test_chunks_with_length_prefix() {
        let field = ChunkField {
            id: ChunkIdSpec::Bytes(4),
            length_prefix: Some((NumberType::U32, Endian::Big)),
            map: vec![(ChunkId::Bytes(b"DATA".to_vec()), pair_schema())],
            default_schema: None,
            length: None,
            alignment: None,
        };
        let outer = outer_block();
        let scope = Scope::root(&outer);

        let mut data = Vec::new();
        data.extend_from_slice(b"DATA");
        data.extend_from_slice(&2u32.to_be_bytes());
        data.extend_from_slice(&[0x11, 0x22]);
        // a zero-length chunk carries no payload
        data.extend_from_slice(b"DATA");
        data.extend_from_slice(&0u32.to_be_bytes());

        let (value, consumed) = field.read(&data, 0, &scope).unwrap();
        assert_eq!(consumed, data.len());
        let items = value.as_list().unwrap();
        assert_eq!(items.len(), 2);
        match &items[1] {
            Value::Chunk(chunk) => assert!(chunk.payload.is_none()),
            other => panic!("expected a chunk, got {:?}", other),
        }

        let mut out = Vec::new();
        field.write(&value, &mut out, 0, &scope).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_chunks_unknown_id_is_decode_error() {
        let field = ChunkField {
            id: ChunkIdSpec::Bytes(4),
            length_prefix: Some((NumberType::U32, Endian::Big)),
            map: vec![(ChunkId::Bytes(b"DATA".to_vec()), pair_schema())],
            default_schema: None,
            length: None,
            alignment: None,
        };
        let outer = outer_block();
        let scope = Scope::root(&outer);
        let mut data = Vec::new();
        data.extend_from_slice(b"JUNK");
        data.extend_from_slice(&0u32.to_be_bytes());
        let err = field.read(&data, 0, &scope).unwrap_err();
        assert!(matches!(err, CodecError::Decode { .. }));
    }

    #[test]
    fn test_chunks_numeric_id_roundtrip() {
        let field = ChunkField {
            id: ChunkIdSpec::Number(NumberType::U16, Endian::Little),
            length_prefix: Some((NumberType::U8, Endian::Little)),
            map: vec![(ChunkId::UInt(0x0001), item_schema())],
            default_schema: None,
            length: None,
            alignment: None,
        };
        let outer = outer_block();
        let scope = Scope::root(&outer);
        let data = [0x01, 0x00, 0x01, 0x7f];
        let (value, consumed) = field.read(&data, 0, &scope).unwrap();
        assert_eq!(consumed, 4);

        let mut out = Vec::new();
        field.write(&value, &mut out, 0, &scope).unwrap();
        assert_eq!(out.as_slice(), &data);
    }
}
