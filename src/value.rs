//! Dynamic value type for decoded field data.
//!
//! Schemas are data, so decoded values need a runtime representation that
//! covers every field kind: scalars, byte runs, strings, bit groups, nested
//! blocks and chunk sequences. [`Value`] is that representation, with the
//! usual family of fallible accessors.

use std::fmt;

use crate::block::Block;
use crate::error::{CodecError, CodecResult};

/// A decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Unsigned integer, any declared width up to 64 bits.
    UInt(u64),
    /// Signed two's-complement integer.
    Int(i64),
    /// IEEE 754 float, either width.
    Float(f64),
    Bool(bool),
    /// Raw byte run.
    Bytes(Vec<u8>),
    /// Decoded text.
    Str(String),
    /// A single nested block slot.
    Block(BlockSlot),
    /// Sequence of values (numeric arrays, block lists, chunk lists).
    List(Vec<Value>),
    /// Ordered named sub-values, produced by bit-group fields.
    Group(Vec<(String, Value)>),
    /// One element of a chunk sequence.
    Chunk(ChunkValue),
    /// An empty slot: a fill-pattern entry in a fixed list, or a chunk
    /// with no payload.
    Null,
}

/// A nested block position: either a successfully parsed block, or the raw
/// bytes of a region that failed to parse. Both variants serialize, so a
/// file with regions the schema cannot yet explain still round-trips.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockSlot {
    Known(Block),
    Unknown(Vec<u8>),
}

impl BlockSlot {
    /// The parsed block, if this slot is known.
    pub fn known(&self) -> Option<&Block> {
        match self {
            BlockSlot::Known(block) => Some(block),
            BlockSlot::Unknown(_) => None,
        }
    }

    pub fn known_mut(&mut self) -> Option<&mut Block> {
        match self {
            BlockSlot::Known(block) => Some(block),
            BlockSlot::Unknown(_) => None,
        }
    }

    /// Raw bytes preserved by the unknown fallback.
    pub fn unknown(&self) -> Option<&[u8]> {
        match self {
            BlockSlot::Known(_) => None,
            BlockSlot::Unknown(data) => Some(data),
        }
    }
}

/// Identifier of a chunk in a tagged-union sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChunkId {
    Bytes(Vec<u8>),
    UInt(u64),
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkId::Bytes(data) => write!(f, "{:?}", String::from_utf8_lossy(data)),
            ChunkId::UInt(id) => write!(f, "{:#x}", id),
        }
    }
}

/// One element of a chunk sequence: an identifier plus an optional payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkValue {
    pub id: ChunkId,
    /// `None` for identifier-only chunks.
    pub payload: Option<BlockSlot>,
}

impl Value {
    /// Short type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::UInt(_) => "uint",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Bytes(_) => "bytes",
            Value::Str(_) => "str",
            Value::Block(_) => "block",
            Value::List(_) => "list",
            Value::Group(_) => "group",
            Value::Chunk(_) => "chunk",
            Value::Null => "null",
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Value::UInt(v) => Some(*v),
            Value::Int(v) => u64::try_from(*v).ok(),
            Value::Bool(b) => Some(u64::from(*b)),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::UInt(v) => Some(*v != 0),
            Value::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_block(&self) -> Option<&BlockSlot> {
        match self {
            Value::Block(slot) => Some(slot),
            _ => None,
        }
    }

    /// Element count for lists, byte length for byte runs, character count
    /// for strings.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::List(items) => Some(items.len()),
            Value::Bytes(data) => Some(data.len()),
            Value::Str(text) => Some(text.chars().count()),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len().map(|n| n == 0).unwrap_or(false)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Member lookup inside a bit group.
    pub fn group_get(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Group(entries) => entries
                .iter()
                .find(|(entry_name, _)| entry_name == name)
                .map(|(_, value)| value),
            _ => None,
        }
    }

    pub fn group_set(&mut self, name: &str, value: Value) -> CodecResult<()> {
        match self {
            Value::Group(entries) => {
                for (entry_name, slot) in entries.iter_mut() {
                    if entry_name == name {
                        *slot = value;
                        return Ok(());
                    }
                }
                Err(CodecError::Ref {
                    detail: format!("bit group has no member `{}`", name),
                })
            }
            other => Err(CodecError::Ref {
                detail: format!("cannot set member `{}` on {}", name, other.type_name()),
            }),
        }
    }

    /// `as_uint` that fails with a typed error instead of `None`.
    pub fn expect_uint(&self, context: &str) -> CodecResult<u64> {
        self.as_uint().ok_or_else(|| CodecError::Ref {
            detail: format!("{}: expected an integer, found {}", context, self.type_name()),
        })
    }

    /// Coerce to a usize for offsets, counts and lengths.
    pub fn expect_usize(&self, context: &str) -> CodecResult<usize> {
        let raw = self.expect_uint(context)?;
        usize::try_from(raw).map_err(|_| CodecError::Ref {
            detail: format!("{}: value {} does not fit a usize", context, raw),
        })
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}
