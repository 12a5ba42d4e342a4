//! Block instances: the composite records the engine parses and exports.
//!
//! A block binds a shared schema to concrete decoded values. Import walks
//! the fields in declaration order, resolving each offset by explicit
//! value, ref, or chaining after the previous field, and annotates any
//! failure with `(block, field, offset)`. Export re-derives ref-computed
//! counts and lengths from the in-memory sequences, lays the fields back
//! down, and runs the checks in rewrite mode.
//!
//! Blocks imported from bytes retain their source image so that gaps in a
//! non-contiguous layout round-trip verbatim; fields always overwrite
//! their own regions, so mutations stay local.

use std::ops::Range;
use std::sync::Arc;

use tracing::debug;

use crate::error::{CodecError, CodecResult};
use crate::refs::Scope;
use crate::schema::Schema;
use crate::value::{BlockSlot, Value};

/// Observable lifecycle state of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Default-constructed, never bound to bytes.
    Empty,
    /// Populated by a successful import or export.
    Bound,
    /// Mutated since the last import or export.
    Dirty,
}

/// A composite record: one schema, one set of decoded values.
#[derive(Debug, Clone)]
pub struct Block {
    schema: Arc<Schema>,
    values: Vec<Value>,
    /// Source byte range per field, recorded at import for diagnostics.
    ranges: Vec<Option<Range<usize>>>,
    /// Retained source image; prefilled into the export buffer so layout
    /// gaps round-trip verbatim.
    source: Option<Vec<u8>>,
    state: BlockState,
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.schema, &other.schema) && self.values == other.values
    }
}

impl Block {
    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Default-construct an empty block: every field takes its declared
    /// default. The result always exports successfully.
    pub fn new(schema: &Arc<Schema>) -> Block {
        let values = schema
            .fields()
            .iter()
            .map(|(_, field)| field.default_value())
            .collect();
        Block {
            schema: schema.clone(),
            values,
            ranges: vec![None; schema.len()],
            source: None,
            state: BlockState::Empty,
        }
    }

    /// Parse a root block from bytes.
    pub fn parse(schema: &Arc<Schema>, data: &[u8]) -> CodecResult<Block> {
        Ok(Self::parse_with_scope(schema, data, None)?.0)
    }

    /// Parse a block, optionally inside a parent scope. Returns the block
    /// and the number of bytes it covered.
    pub(crate) fn parse_with_scope(
        schema: &Arc<Schema>,
        data: &[u8],
        outer: Option<&Scope<'_>>,
    ) -> CodecResult<(Block, usize)> {
        if schema.uses_parent() && outer.is_none() {
            return Err(CodecError::Schema {
                detail: format!(
                    "schema `{}` uses `_parent` refs and cannot be parsed standalone",
                    schema.name()
                ),
            });
        }
        debug!(schema = schema.name(), bytes = data.len(), "importing block");

        let mut block = Block::new(schema);
        let mut cursor = 0usize;

        for (i, (name, field)) in schema.fields().iter().enumerate() {
            // scope borrows the partially populated block, so refs see the
            // siblings parsed so far; the borrow ends before the slot is
            // assigned
            let (offset, value, consumed) = {
                let scope = Scope::new(&block, outer);
                let offset = field
                    .resolve_offset(cursor, &scope)
                    .map_err(|e| e.annotate(schema.name(), name, cursor))?;
                let (value, consumed) = field
                    .read(data, offset, &scope)
                    .map_err(|e| e.annotate(schema.name(), name, offset))?;
                (offset, value, consumed)
            };
            block.values[i] = value;
            block.ranges[i] = Some(offset..offset + consumed);
            cursor = cursor.max(offset + consumed);
        }

        for check in schema.checks() {
            let scope = Scope::new(&block, outer);
            check.verify(data, &scope)?;
            cursor = cursor.max(check.end_offset(&scope)?);
        }

        let covered = cursor.min(data.len());
        block.source = Some(data[..covered].to_vec());
        block.state = BlockState::Bound;
        Ok((block, cursor))
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn state(&self) -> BlockState {
        self.state
    }

    /// Decoded value of a field.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.schema
            .field_index(name)
            .map(|index| &self.values[index])
    }

    /// Mutable access to a field's value; marks the block dirty.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        let index = self.schema.field_index(name)?;
        self.state = BlockState::Dirty;
        Some(&mut self.values[index])
    }

    /// Replace a field's value; marks the block dirty.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> CodecResult<()> {
        self.set_raw(name, value.into())?;
        self.state = BlockState::Dirty;
        Ok(())
    }

    pub(crate) fn set_raw(&mut self, name: &str, value: Value) -> CodecResult<()> {
        let index = self
            .schema
            .field_index(name)
            .ok_or_else(|| CodecError::Ref {
                detail: format!(
                    "block `{}` has no field `{}`",
                    self.schema.name(),
                    name
                ),
            })?;
        self.values[index] = value;
        Ok(())
    }

    /// Source byte range a field was decoded from, if the block was
    /// imported. Debug accessor.
    pub fn field_range(&self, name: &str) -> Option<Range<usize>> {
        self.schema
            .field_index(name)
            .and_then(|index| self.ranges[index].clone())
    }

    // ------------------------------------------------------------------
    // Layout
    // ------------------------------------------------------------------

    /// Resolved `(offset, size)` of a field at the block's current state,
    /// replaying the chain layout. `scope` must be a frame over this block.
    pub(crate) fn field_span(&self, name: &str, scope: &Scope<'_>) -> CodecResult<(usize, usize)> {
        let mut cursor = 0usize;
        for (i, (field_name, field)) in self.schema.fields().iter().enumerate() {
            let offset = field.resolve_offset(cursor, scope)?;
            let size = field.size_of(&self.values[i], scope)?;
            if field_name == name {
                return Ok((offset, size));
            }
            cursor = cursor.max(offset + size);
        }
        Err(CodecError::Ref {
            detail: format!(
                "block `{}` has no field `{}`",
                self.schema.name(),
                name
            ),
        })
    }

    /// Projected size of the exported image: the maximum end offset over
    /// all fields and checks.
    pub fn size(&self) -> CodecResult<usize> {
        self.render_size(None)
    }

    pub(crate) fn render_size(&self, outer: Option<&Scope<'_>>) -> CodecResult<usize> {
        let mut cursor = 0usize;
        let mut size = 0usize;
        for (i, (name, field)) in self.schema.fields().iter().enumerate() {
            let scope = Scope::new(self, outer);
            let offset = field
                .resolve_offset(cursor, &scope)
                .map_err(|e| e.annotate(self.schema.name(), name, cursor))?;
            let field_size = field
                .size_of(&self.values[i], &scope)
                .map_err(|e| e.annotate(self.schema.name(), name, offset))?;
            cursor = cursor.max(offset + field_size);
            size = size.max(cursor);
        }
        for check in self.schema.checks() {
            let scope = Scope::new(self, outer);
            size = size.max(check.end_offset(&scope)?);
        }
        Ok(size)
    }

    // ------------------------------------------------------------------
    // Export
    // ------------------------------------------------------------------

    /// Rebuild the byte image of this block.
    pub fn export(&mut self) -> CodecResult<Vec<u8>> {
        self.prepare_export()?;
        let out = self.render(None)?;
        self.state = BlockState::Bound;
        Ok(out)
    }

    /// The update-deps pass: counts and lengths expressed as refs are
    /// re-derived from the in-memory sequences, recursively. A ref used as
    /// a count describes the serialized form; the sequence dictates it.
    fn prepare_export(&mut self) -> CodecResult<()> {
        let schema = self.schema.clone();
        for (i, (name, field)) in schema.fields().iter().enumerate() {
            let deps = {
                let scope = Scope::root(&*self);
                field.deps(&self.values[i], &scope)?
            };
            for (target, value) in deps {
                // counts and lengths held in the containing block (or
                // behind arithmetic) cannot be written from here; they
                // stay whatever the caller set them to
                if target.is_writable() {
                    target.assign(self, value)?;
                } else {
                    debug!(
                        schema = schema.name(),
                        field = name.as_str(),
                        "skipping re-derivation through a non-writable ref"
                    );
                }
            }
        }
        for value in &mut self.values {
            prepare_value(value)?;
        }
        Ok(())
    }

    /// Lay the fields down into a fresh buffer. Pure with respect to this
    /// block; child blocks render through the scope chain.
    pub(crate) fn render(&self, outer: Option<&Scope<'_>>) -> CodecResult<Vec<u8>> {
        let total = self.render_size(outer)?;
        debug!(schema = self.schema.name(), bytes = total, "exporting block");
        let mut out = vec![0u8; total];

        // layout gaps keep their imported bytes; fields overwrite their
        // own regions below
        if let Some(source) = &self.source {
            let n = source.len().min(total);
            out[..n].copy_from_slice(&source[..n]);
        }

        let mut cursor = 0usize;
        for (i, (name, field)) in self.schema.fields().iter().enumerate() {
            let scope = Scope::new(self, outer);
            let offset = field
                .resolve_offset(cursor, &scope)
                .map_err(|e| e.annotate(self.schema.name(), name, cursor))?;
            field
                .validate(&self.values[i], &scope)
                .map_err(|e| e.annotate(self.schema.name(), name, offset))?;
            field
                .write(&self.values[i], &mut out, offset, &scope)
                .map_err(|e| e.annotate(self.schema.name(), name, offset))?;
            let size = field
                .size_of(&self.values[i], &scope)
                .map_err(|e| e.annotate(self.schema.name(), name, offset))?;
            cursor = cursor.max(offset + size);
        }

        for check in self.schema.checks() {
            let scope = Scope::new(self, outer);
            check.fixup(&mut out, &scope)?;
        }
        Ok(out)
    }
}

/// Recurse the update-deps pass into nested blocks.
fn prepare_value(value: &mut Value) -> CodecResult<()> {
    match value {
        Value::Block(BlockSlot::Known(block)) => block.prepare_export(),
        Value::List(items) => {
            for item in items {
                prepare_value(item)?;
            }
            Ok(())
        }
        Value::Chunk(chunk) => {
            if let Some(BlockSlot::Known(block)) = &mut chunk.payload {
                block.prepare_export()?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Endian;
    use crate::field::{Field, NumberType};
    use crate::refs::Ref;
    use crate::schema::SchemaBuilder;

    fn header_schema() -> Arc<Schema> {
        SchemaBuilder::new("Header")
            .field("width", Field::number(NumberType::U16, Endian::Big))
            .field("height", Field::number(NumberType::U16, Endian::Big))
            .build()
            .unwrap()
    }

    #[test]
    fn test_parse_chains_offsets() {
        let schema = header_schema();
        let block = Block::parse(&schema, &[0x00, 0x10, 0x00, 0x20]).unwrap();
        assert_eq!(block.get("width"), Some(&Value::UInt(16)));
        assert_eq!(block.get("height"), Some(&Value::UInt(32)));
        assert_eq!(block.field_range("height"), Some(2..4));
        assert_eq!(block.state(), BlockState::Bound);
    }

    #[test]
    fn test_parse_error_is_annotated() {
        let schema = header_schema();
        let err = Block::parse(&schema, &[0x00, 0x10, 0x00]).unwrap_err();
        let rendered = err.to_string();
        assert!(rendered.contains("Header.height"), "got: {}", rendered);
        assert!(matches!(
            err.root(),
            CodecError::ShortBuffer { offset: 2, .. }
        ));
    }

    #[test]
    fn test_empty_block_exports() {
        let schema = header_schema();
        let mut block = Block::new(&schema);
        assert_eq!(block.state(), BlockState::Empty);
        let out = block.export().unwrap();
        assert_eq!(out, vec![0, 0, 0, 0]);
        assert_eq!(block.state(), BlockState::Bound);
    }

    #[test]
    fn test_mutation_marks_dirty_and_exports_locally() {
        let schema = header_schema();
        let data = [0x00, 0x10, 0x00, 0x20];
        let mut block = Block::parse(&schema, &data).unwrap();
        block.set("width", 17u64).unwrap();
        assert_eq!(block.state(), BlockState::Dirty);

        let out = block.export().unwrap();
        assert_eq!(out, vec![0x00, 0x11, 0x00, 0x20]);
        assert_eq!(block.state(), BlockState::Bound);
    }

    #[test]
    fn test_explicit_offsets_leave_gap_preserved() {
        let schema = SchemaBuilder::new("Gapped")
            .field("head", Field::u8())
            .field("tail", Field::u8().at(3))
            .build()
            .unwrap();
        let data = [0x01, 0xaa, 0xbb, 0x02];
        let mut block = Block::parse(&schema, &data).unwrap();
        assert_eq!(block.size().unwrap(), 4);

        // the gap bytes 0xaa 0xbb came from the source image
        let out = block.export().unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_gap_zero_filled_without_source() {
        let schema = SchemaBuilder::new("Gapped")
            .field("head", Field::u8().with_default(1u64))
            .field("tail", Field::u8().at(3).with_default(2u64))
            .build()
            .unwrap();
        let mut block = Block::new(&schema);
        let out = block.export().unwrap();
        assert_eq!(out, vec![0x01, 0x00, 0x00, 0x02]);
    }

    #[test]
    fn test_offset_ref_follows_sibling() {
        let schema = SchemaBuilder::new("Indexed")
            .field("start", Field::u8())
            .field(
                "value",
                Field::u8().at_ref(Ref::field("start")),
            )
            .build()
            .unwrap();
        let block = Block::parse(&schema, &[0x02, 0xff, 0x42]).unwrap();
        assert_eq!(block.get("value"), Some(&Value::UInt(0x42)));
        assert_eq!(block.field_range("value"), Some(2..3));
    }

    #[test]
    fn test_parent_schema_refuses_standalone_parse() {
        let schema = SchemaBuilder::new("Child")
            .field(
                "data",
                Field::bytes_ref(Ref::parse("_parent.len").unwrap()),
            )
            .build()
            .unwrap();
        let err = Block::parse(&schema, &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, CodecError::Schema { .. }));
    }

    #[test]
    fn test_size_is_max_end_offset() {
        let schema = SchemaBuilder::new("Sparse")
            .field("a", Field::u8().at(10))
            .field("b", Field::u8())
            .build()
            .unwrap();
        let block = Block::new(&schema);
        // `b` chains after `a` (offset 11), so the image is 12 bytes
        assert_eq!(block.size().unwrap(), 12);
    }
}
