//! binforge - a declarative, bidirectional binary codec engine
//!
//! A schema-driven toolkit for reverse engineering proprietary binary
//! formats. Declare the layout of an artifact as an ordered composition of
//! typed fields; the engine interprets raw bytes into an editable block
//! graph and serializes that graph back into bytes that reconstruct the
//! original:
//!
//! 1. **Fields** - immutable, shareable parse/serialize/size rules:
//!    numbers, byte runs, text, bit groups, nested blocks, chunk unions
//! 2. **Blocks** - composite records with deterministic layout, deferred
//!    offsets and two-way binding
//! 3. **Refs** - lazy cross-field expressions for counts, offsets and
//!    parent lookups
//! 4. **Checks** - verify-on-import / rewrite-on-export invariants
//!    (magic numbers, checksums, fill patterns)
//! 5. **Transforms** - reversible byte-region codecs for compression and
//!    obfuscation layers
//!
//! ```
//! use binforge::{Block, Endian, Field, NumberType, Ref, SchemaBuilder};
//!
//! let item = SchemaBuilder::new("Item")
//!     .field("value", Field::u8())
//!     .build()
//!     .unwrap();
//! let schema = SchemaBuilder::new("File")
//!     .field("count", Field::number(NumberType::U32, Endian::Little))
//!     .field("items", Field::block_list_ref(&item, Ref::field("count")))
//!     .build()
//!     .unwrap();
//!
//! let data = [0x02, 0x00, 0x00, 0x00, 0xaa, 0xbb];
//! let mut file = Block::parse(&schema, &data).unwrap();
//! assert_eq!(file.get("count").unwrap().as_uint(), Some(2));
//! assert_eq!(file.export().unwrap(), data);
//! ```

pub mod block;
pub mod checks;
pub mod encoding;
pub mod error;
pub mod field;
pub mod refs;
pub mod schema;
pub mod transform;
pub mod value;

// Re-export the working surface
pub use block::{Block, BlockState};
pub use checks::{Check, ChecksumAlgo};
pub use encoding::{Endian, TextEncoding};
pub use error::{CodecError, CodecResult, ErrorKind};
pub use field::{BitDomain, ChunkIdSpec, Field, NumberType, StopCheck};
pub use refs::{Ref, Scope};
pub use schema::{Schema, SchemaBuilder};
pub use transform::{
    LzssTransform, Transform, TransformContext, TransformOutput, XorTransform,
};
pub use value::{BlockSlot, ChunkId, ChunkValue, Value};
