//! Field descriptors.
//!
//! A [`Field`] is an immutable, class-level rule describing how one
//! contiguous byte region decodes into a typed value and encodes back.
//! Descriptors are shared by every block instance of their schema and hold
//! no per-instance state: every operation takes the block context (a
//! [`Scope`]) as an argument.
//!
//! The per-kind codecs live in the submodules; this module carries the
//! options common to all kinds (offset policy, default value) and the
//! dispatch layer.

use std::sync::Arc;

use crate::error::{CodecError, CodecResult};
use crate::refs::{Ref, Scope};
use crate::schema::Schema;
use crate::transform::Transform;
use crate::value::Value;

mod bits;
mod bytes;
mod nested;
mod number;
mod string;

pub use bits::{BitDomain, BitsField};
pub use bytes::BytesField;
pub use nested::{Arity, BlockListField, ChunkField, ChunkIdSpec, StopCheck};
pub use number::{NumberField, NumberType};
pub use string::TextField;

use crate::encoding::{Endian, TextEncoding};
use crate::value::ChunkId;

// ============================================================================
// Common option types
// ============================================================================

/// Where a field starts, relative to the block.
#[derive(Debug, Clone, Default)]
pub enum Offset {
    /// Immediately after the previous field's resolved end (the default).
    #[default]
    Chain,
    /// Fixed block-relative position.
    Const(usize),
    /// Position computed from sibling or parent fields.
    Ref(Ref),
}

/// An integer-valued option that may be constant or ref-computed
/// (counts, lengths).
#[derive(Debug, Clone)]
pub enum IntProp {
    Const(usize),
    Ref(Ref),
}

impl IntProp {
    pub(crate) fn resolve(&self, scope: &Scope<'_>) -> CodecResult<usize> {
        match self {
            IntProp::Const(value) => Ok(*value),
            IntProp::Ref(r) => r.evaluate_usize(scope),
        }
    }

    pub(crate) fn as_const(&self) -> Option<usize> {
        match self {
            IntProp::Const(value) => Some(*value),
            IntProp::Ref(_) => None,
        }
    }
}

// ============================================================================
// Field
// ============================================================================

/// The kind-specific half of a field descriptor.
#[derive(Debug, Clone)]
pub enum FieldKind {
    Number(NumberField),
    Bytes(BytesField),
    Text(TextField),
    Bits(BitsField),
    Block(BlockListField),
    Chunks(ChunkField),
}

impl FieldKind {
    fn name(&self) -> &'static str {
        match self {
            FieldKind::Number(_) => "number",
            FieldKind::Bytes(_) => "bytes",
            FieldKind::Text(_) => "text",
            FieldKind::Bits(_) => "bits",
            FieldKind::Block(_) => "block",
            FieldKind::Chunks(_) => "chunks",
        }
    }
}

/// An immutable field descriptor: offset policy, default, and the
/// kind-specific codec.
#[derive(Debug, Clone)]
pub struct Field {
    kind: FieldKind,
    offset: Offset,
    default: Option<Value>,
    // builder misuse is collected here and surfaced at schema build, so
    // chained construction stays infallible
    build_errors: Vec<String>,
}

impl Field {
    fn from_kind(kind: FieldKind) -> Field {
        Field {
            kind,
            offset: Offset::Chain,
            default: None,
            build_errors: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------

    /// Numeric field of the given type and byte order.
    pub fn number(ty: NumberType, endian: Endian) -> Field {
        Field::from_kind(FieldKind::Number(NumberField::new(ty, endian)))
    }

    /// Single unsigned byte.
    pub fn u8() -> Field {
        Field::number(NumberType::U8, Endian::Little)
    }

    /// Raw byte run of a fixed length.
    pub fn bytes(length: usize) -> Field {
        Field::from_kind(FieldKind::Bytes(BytesField::fixed(IntProp::Const(length))))
    }

    /// Raw byte run whose length is computed from another field.
    pub fn bytes_ref(length: Ref) -> Field {
        Field::from_kind(FieldKind::Bytes(BytesField::fixed(IntProp::Ref(length))))
    }

    /// Raw byte run consuming everything to the end of the buffer.
    /// Terminal fields only.
    pub fn bytes_stream() -> Field {
        Field::from_kind(FieldKind::Bytes(BytesField::stream()))
    }

    /// Text field in the given encoding. Combine with `terminated`,
    /// `with_length` and `with_max_length`.
    pub fn text(encoding: TextEncoding) -> Field {
        Field::from_kind(FieldKind::Text(TextField::new(encoding)))
    }

    /// Bit-packed group over `storage` bytes (1..=8). Add members with
    /// `bit`, `bit_bool` and `bit_enum`.
    pub fn bits(storage: usize, endian: Endian) -> Field {
        Field::from_kind(FieldKind::Bits(BitsField::new(storage, endian)))
    }

    /// One nested block of the given schema.
    pub fn block(schema: &Arc<Schema>) -> Field {
        Field::from_kind(FieldKind::Block(BlockListField::single(schema.clone())))
    }

    /// Fixed-count sequence of nested blocks.
    pub fn block_list(schema: &Arc<Schema>, count: usize) -> Field {
        Field::from_kind(FieldKind::Block(BlockListField::counted(
            schema.clone(),
            IntProp::Const(count),
        )))
    }

    /// Sequence of nested blocks whose count is computed from another field.
    pub fn block_list_ref(schema: &Arc<Schema>, count: Ref) -> Field {
        Field::from_kind(FieldKind::Block(BlockListField::counted(
            schema.clone(),
            IntProp::Ref(count),
        )))
    }

    /// Nested blocks read until the region runs out (or a stream-end
    /// marker). Terminal fields only, unless a region length is declared.
    pub fn block_stream(schema: &Arc<Schema>) -> Field {
        Field::from_kind(FieldKind::Block(BlockListField::stream(schema.clone())))
    }

    /// Tagged-union chunk sequence; add per-identifier schemas with
    /// `chunk`.
    pub fn chunks(id: ChunkIdSpec) -> Field {
        Field::from_kind(FieldKind::Chunks(ChunkField::new(id)))
    }

    // ------------------------------------------------------------------
    // Common options
    // ------------------------------------------------------------------

    /// Fixed block-relative offset.
    pub fn at(mut self, offset: usize) -> Field {
        self.offset = Offset::Const(offset);
        self
    }

    /// Offset computed from sibling or parent fields.
    pub fn at_ref(mut self, offset: Ref) -> Field {
        self.offset = Offset::Ref(offset);
        self
    }

    /// Offset at the resolved end of a named earlier field.
    pub fn at_end_of(self, field: &str) -> Field {
        self.at_ref(Ref::end_offset(field))
    }

    /// Value used when constructing a fresh block.
    pub fn with_default(mut self, value: impl Into<Value>) -> Field {
        self.default = Some(value.into());
        self
    }

    // ------------------------------------------------------------------
    // Kind-specific options; misuse surfaces at schema build
    // ------------------------------------------------------------------

    fn option_error(&mut self, option: &str) {
        self.build_errors.push(format!(
            "option `{}` does not apply to {} fields",
            option,
            self.kind.name()
        ));
    }

    /// Inclusive allowed range; violations on import are constraint errors.
    pub fn with_range(mut self, min: i64, max: i64) -> Field {
        match &mut self.kind {
            FieldKind::Number(number) => number.range = Some((min, max)),
            _ => self.option_error("range"),
        }
        self
    }

    /// Explicit allowed value set (enum-style validation).
    pub fn one_of(mut self, allowed: &[i64]) -> Field {
        match &mut self.kind {
            FieldKind::Number(number) => number.one_of = Some(allowed.to_vec()),
            _ => self.option_error("one_of"),
        }
        self
    }

    /// Interpret a numeric field as a fixed-count array.
    pub fn with_count(mut self, count: usize) -> Field {
        match &mut self.kind {
            FieldKind::Number(number) => number.count = Some(IntProp::Const(count)),
            _ => self.option_error("count"),
        }
        self
    }

    /// Interpret a numeric field as an array counted by another field.
    pub fn with_count_ref(mut self, count: Ref) -> Field {
        match &mut self.kind {
            FieldKind::Number(number) => number.count = Some(IntProp::Ref(count)),
            _ => self.option_error("count"),
        }
        self
    }

    /// Region byte limit for text, block and chunk fields.
    pub fn with_length(mut self, length: usize) -> Field {
        match &mut self.kind {
            FieldKind::Text(text) => text.length = Some(IntProp::Const(length)),
            FieldKind::Block(list) => list.length = Some(IntProp::Const(length)),
            FieldKind::Chunks(chunks) => chunks.length = Some(IntProp::Const(length)),
            FieldKind::Bytes(bytes) => bytes.length = Some(IntProp::Const(length)),
            _ => self.option_error("length"),
        }
        self
    }

    /// Ref-computed region byte limit.
    pub fn with_length_ref(mut self, length: Ref) -> Field {
        match &mut self.kind {
            FieldKind::Text(text) => text.length = Some(IntProp::Ref(length)),
            FieldKind::Block(list) => list.length = Some(IntProp::Ref(length)),
            FieldKind::Chunks(chunks) => chunks.length = Some(IntProp::Ref(length)),
            FieldKind::Bytes(bytes) => bytes.length = Some(IntProp::Ref(length)),
            _ => self.option_error("length"),
        }
        self
    }

    /// Transform applied to the field's bytes before decode / after encode.
    pub fn with_transform(mut self, transform: Arc<dyn Transform>) -> Field {
        match &mut self.kind {
            FieldKind::Bytes(bytes) => bytes.transform = Some(transform),
            FieldKind::Block(list) => list.transform = Some(transform),
            _ => self.option_error("transform"),
        }
        self
    }

    /// Pad the serialized length of each element up to a multiple.
    pub fn aligned(mut self, alignment: usize) -> Field {
        match &mut self.kind {
            FieldKind::Bytes(bytes) => bytes.alignment = Some(alignment),
            FieldKind::Block(list) => list.alignment = Some(alignment),
            FieldKind::Chunks(chunks) => chunks.alignment = Some(alignment),
            _ => self.option_error("alignment"),
        }
        self
    }

    /// Byte pattern standing in for an empty entry in a fixed-count list.
    pub fn with_fill(mut self, fill: Vec<u8>) -> Field {
        match &mut self.kind {
            FieldKind::Block(list) => list.fill = Some(fill),
            _ => self.option_error("fill"),
        }
        self
    }

    /// Byte marker denoting the end of a streamed sequence.
    pub fn with_stream_end(mut self, marker: Vec<u8>) -> Field {
        match &mut self.kind {
            FieldKind::Bytes(bytes) => bytes.stream_end = Some(marker),
            FieldKind::Block(list) => list.stream_end = Some(marker),
            _ => self.option_error("stream_end"),
        }
        self
    }

    /// End-of-stream predicate for streamed block sequences.
    pub fn with_stop_check(
        mut self,
        predicate: impl Fn(&[u8], usize) -> bool + Send + Sync + 'static,
    ) -> Field {
        match &mut self.kind {
            FieldKind::Block(list) => list.stop_check = Some(StopCheck::new(predicate)),
            _ => self.option_error("stop_check"),
        }
        self
    }

    /// Terminator byte for text fields (usually NUL).
    pub fn terminated(mut self, terminator: u8) -> Field {
        match &mut self.kind {
            FieldKind::Text(text) => text.terminator = Some(terminator),
            _ => self.option_error("terminator"),
        }
        self
    }

    /// Maximum encoded byte length for text fields, both directions.
    pub fn with_max_length(mut self, max: usize) -> Field {
        match &mut self.kind {
            FieldKind::Text(text) => text.max_length = Some(max),
            _ => self.option_error("max_length"),
        }
        self
    }

    /// Add an unsigned-integer member to a bit group.
    pub fn bit(mut self, name: &str, mask: u64) -> Field {
        match &mut self.kind {
            FieldKind::Bits(bits) => bits.push(name, mask, BitDomain::UInt),
            _ => self.option_error("bit"),
        }
        self
    }

    /// Add a boolean member to a bit group.
    pub fn bit_bool(mut self, name: &str, mask: u64) -> Field {
        match &mut self.kind {
            FieldKind::Bits(bits) => bits.push(name, mask, BitDomain::Bool),
            _ => self.option_error("bit_bool"),
        }
        self
    }

    /// Add an enum-constrained member to a bit group.
    pub fn bit_enum(mut self, name: &str, mask: u64, allowed: &[u64]) -> Field {
        match &mut self.kind {
            FieldKind::Bits(bits) => bits.push(name, mask, BitDomain::Enum(allowed.to_vec())),
            _ => self.option_error("bit_enum"),
        }
        self
    }

    /// Map a chunk identifier to its payload schema.
    pub fn chunk(mut self, id: ChunkId, schema: &Arc<Schema>) -> Field {
        match &mut self.kind {
            FieldKind::Chunks(chunks) => chunks.map.push((id, schema.clone())),
            _ => self.option_error("chunk"),
        }
        self
    }

    /// Length prefix read after each chunk identifier.
    pub fn chunk_length(mut self, ty: NumberType, endian: Endian) -> Field {
        match &mut self.kind {
            FieldKind::Chunks(chunks) => chunks.length_prefix = Some((ty, endian)),
            _ => self.option_error("chunk_length"),
        }
        self
    }

    /// Fallback schema for chunk identifiers missing from the map.
    pub fn chunk_default(mut self, schema: &Arc<Schema>) -> Field {
        match &mut self.kind {
            FieldKind::Chunks(chunks) => chunks.default_schema = Some(schema.clone()),
            _ => self.option_error("chunk_default"),
        }
        self
    }

    // ------------------------------------------------------------------
    // Descriptor contract
    // ------------------------------------------------------------------

    /// Resolve the field's start offset given the running cursor.
    pub(crate) fn resolve_offset(&self, cursor: usize, scope: &Scope<'_>) -> CodecResult<usize> {
        match &self.offset {
            Offset::Chain => Ok(cursor),
            Offset::Const(offset) => Ok(*offset),
            Offset::Ref(r) => r.evaluate_usize(scope),
        }
    }

    /// Decode the field from `buf` at `offset`. Returns the value and the
    /// number of bytes consumed.
    pub fn read(&self, buf: &[u8], offset: usize, scope: &Scope<'_>) -> CodecResult<(Value, usize)> {
        match &self.kind {
            FieldKind::Number(number) => number.read(buf, offset, scope),
            FieldKind::Bytes(bytes) => bytes.read(buf, offset, scope),
            FieldKind::Text(text) => text.read(buf, offset, scope),
            FieldKind::Bits(bits) => bits.read(buf, offset),
            FieldKind::Block(list) => list.read(buf, offset, scope),
            FieldKind::Chunks(chunks) => chunks.read(buf, offset, scope),
        }
    }

    /// Encode `value` into `out` at `offset`, growing the buffer as needed.
    pub fn write(
        &self,
        value: &Value,
        out: &mut Vec<u8>,
        offset: usize,
        scope: &Scope<'_>,
    ) -> CodecResult<()> {
        match &self.kind {
            FieldKind::Number(number) => number.write(value, out, offset, scope),
            FieldKind::Bytes(bytes) => bytes.write(value, out, offset, scope),
            FieldKind::Text(text) => text.write(value, out, offset, scope),
            FieldKind::Bits(bits) => bits.write(value, out, offset),
            FieldKind::Block(list) => list.write(value, out, offset, scope),
            FieldKind::Chunks(chunks) => chunks.write(value, out, offset, scope),
        }
    }

    /// Serialized size of `value` at the block's current state.
    pub fn size_of(&self, value: &Value, scope: &Scope<'_>) -> CodecResult<usize> {
        match &self.kind {
            FieldKind::Number(number) => number.size_of(scope),
            FieldKind::Bytes(bytes) => bytes.size_of(value, scope),
            FieldKind::Text(text) => text.size_of(value, scope),
            FieldKind::Bits(bits) => Ok(bits.storage()),
            FieldKind::Block(list) => list.size_of(value, scope),
            FieldKind::Chunks(chunks) => chunks.size_of(value, scope),
        }
    }

    /// Constraint validation before export (type shape, declared ranges,
    /// constant counts).
    pub(crate) fn validate(&self, value: &Value, scope: &Scope<'_>) -> CodecResult<()> {
        match &self.kind {
            FieldKind::Number(number) => number.validate(value, scope),
            FieldKind::Bytes(bytes) => bytes.validate(value),
            FieldKind::Text(text) => text.validate(value),
            FieldKind::Bits(bits) => bits.validate(value),
            FieldKind::Block(list) => list.validate(value, scope),
            FieldKind::Chunks(chunks) => chunks.validate(value),
        }
    }

    /// Ref assignments that re-derive counts and lengths from the current
    /// in-memory value. Run at the start of export: refs used as counts
    /// describe the serialized form, the sequence itself dictates it.
    pub(crate) fn deps(&self, value: &Value, scope: &Scope<'_>) -> CodecResult<Vec<(Ref, Value)>> {
        let mut out = Vec::new();
        match &self.kind {
            FieldKind::Number(number) => {
                if let (Some(IntProp::Ref(r)), Some(len)) = (&number.count, value.len()) {
                    out.push((r.clone(), Value::UInt(len as u64)));
                }
            }
            FieldKind::Bytes(bytes) => {
                if let Some(IntProp::Ref(r)) = &bytes.length {
                    let size = bytes.raw_size(value, scope)?;
                    out.push((r.clone(), Value::UInt(size as u64)));
                }
            }
            FieldKind::Block(list) => {
                if let (Arity::Count(IntProp::Ref(r)), Some(len)) = (&list.arity, value.len()) {
                    out.push((r.clone(), Value::UInt(len as u64)));
                }
                if let Some(IntProp::Ref(r)) = &list.length {
                    let size = list.size_of(value, scope)?;
                    out.push((r.clone(), Value::UInt(size as u64)));
                }
            }
            FieldKind::Chunks(chunks) => {
                if let Some(IntProp::Ref(r)) = &chunks.length {
                    let size = chunks.size_of(value, scope)?;
                    out.push((r.clone(), Value::UInt(size as u64)));
                }
            }
            FieldKind::Text(_) | FieldKind::Bits(_) => {}
        }
        Ok(out)
    }

    /// Value a fresh block starts with.
    pub fn default_value(&self) -> Value {
        if let Some(default) = &self.default {
            return default.clone();
        }
        match &self.kind {
            FieldKind::Number(number) => number.default_value(),
            FieldKind::Bytes(bytes) => bytes.default_value(),
            FieldKind::Text(_) => Value::Str(String::new()),
            FieldKind::Bits(bits) => bits.default_value(),
            FieldKind::Block(list) => list.default_value(),
            FieldKind::Chunks(_) => Value::List(Vec::new()),
        }
    }

    /// All refs reachable from this descriptor, for schema validation.
    pub(crate) fn collect_refs<'a>(&'a self, out: &mut Vec<&'a Ref>) {
        if let Offset::Ref(r) = &self.offset {
            out.push(r);
        }
        let push = |prop: &'a Option<IntProp>, out: &mut Vec<&'a Ref>| {
            if let Some(IntProp::Ref(r)) = prop {
                out.push(r);
            }
        };
        match &self.kind {
            FieldKind::Number(number) => push(&number.count, out),
            FieldKind::Bytes(bytes) => push(&bytes.length, out),
            FieldKind::Text(text) => push(&text.length, out),
            FieldKind::Bits(_) => {}
            FieldKind::Block(list) => {
                if let Arity::Count(IntProp::Ref(r)) = &list.arity {
                    out.push(r);
                }
                push(&list.length, out);
            }
            FieldKind::Chunks(chunks) => push(&chunks.length, out),
        }
    }

    /// Whether this field consumes to end-of-buffer with no declared bound.
    pub(crate) fn is_unbounded_stream(&self) -> bool {
        match &self.kind {
            FieldKind::Bytes(bytes) => {
                bytes.stream && bytes.length.is_none() && bytes.stream_end.is_none()
            }
            FieldKind::Block(list) => {
                matches!(list.arity, Arity::Stream)
                    && list.length.is_none()
                    && list.stream_end.is_none()
            }
            FieldKind::Chunks(chunks) => chunks.length.is_none(),
            _ => false,
        }
    }

    pub(crate) fn build_errors(&self) -> &[String] {
        &self.build_errors
    }

    pub(crate) fn internal_checks(&self) -> CodecResult<()> {
        match &self.kind {
            FieldKind::Bits(bits) => bits.check(),
            FieldKind::Bytes(bytes) => bytes.check(),
            FieldKind::Text(text) => text.check(),
            FieldKind::Chunks(chunks) => chunks.check(),
            _ => Ok(()),
        }
    }
}

/// Extend `out` with zero bytes so `out[..end]` is addressable.
pub(crate) fn reserve(out: &mut Vec<u8>, end: usize) {
    if out.len() < end {
        out.resize(end, 0);
    }
}

/// Bounds-check a read of `needed` bytes at `offset`.
pub(crate) fn take<'a>(buf: &'a [u8], offset: usize, needed: usize) -> CodecResult<&'a [u8]> {
    let end = offset.checked_add(needed).ok_or(CodecError::ShortBuffer {
        offset,
        needed,
        available: buf.len().saturating_sub(offset),
    })?;
    if end > buf.len() {
        return Err(CodecError::ShortBuffer {
            offset,
            needed,
            available: buf.len().saturating_sub(offset),
        });
    }
    Ok(&buf[offset..end])
}
