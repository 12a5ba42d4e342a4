//! Error taxonomy for the codec engine.
//!
//! Every failure in the engine is a [`CodecError`]. Field-level errors get
//! wrapped in [`CodecError::Annotated`] with the block class, field name and
//! resolved byte offset, so a failure deep inside a nested parse still tells
//! you exactly where in the file it happened.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Machine-inspectable error category, independent of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Not enough bytes to satisfy a field's resolved size.
    ShortBuffer,
    /// Decoded value outside a declared range or allowed set.
    Constraint,
    /// Malformed content (bad text encoding, unknown chunk id, ...).
    Decode,
    /// Caller-supplied value cannot be represented (overflow, oversize).
    Encode,
    /// A check's verify hook rejected the import buffer.
    CheckFailed,
    /// A ref path did not resolve, or resolved to the wrong type.
    Ref,
    /// Ref graph has a cycle or forward reference; detected at schema build.
    CyclicRef,
    /// Export attempted through a one-way transform.
    TransformNotInvertible,
    /// Illegal schema construction.
    Schema,
}

/// Errors raised while parsing, exporting or validating binary data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    /// Buffer ran out before the field's resolved size was satisfied.
    #[error("short buffer: need {needed} bytes at offset {offset}, have {available}")]
    ShortBuffer {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// Value is outside the declared range / allowed set.
    #[error("constraint violation: {detail}")]
    Constraint { detail: String },

    /// Content could not be decoded into the field's value domain.
    #[error("decode error: {detail}")]
    Decode { detail: String },

    /// Value cannot be represented in the field's byte domain.
    #[error("encode error: {detail}")]
    Encode { detail: String },

    /// A check's verify hook failed on import.
    #[error("check failed at offset {offset}: {detail}")]
    CheckFailed { offset: usize, detail: String },

    /// A ref expression failed to evaluate.
    #[error("ref error: {detail}")]
    Ref { detail: String },

    /// A field's ref points at itself or at a later sibling.
    #[error("cyclic ref: field `{field}` depends on `{target}`, which is not declared earlier")]
    CyclicRef { field: String, target: String },

    /// Export requires the reverse direction of a one-way transform.
    #[error("transform `{name}` is not invertible; block is read-only")]
    TransformNotInvertible { name: String },

    /// The schema itself is illegal.
    #[error("schema error: {detail}")]
    Schema { detail: String },

    /// A field-level error annotated with its position in the block tree.
    #[error("{block}.{field} at offset {offset:#x}: {source}")]
    Annotated {
        block: String,
        field: String,
        offset: usize,
        #[source]
        source: Box<CodecError>,
    },
}

impl CodecError {
    /// The category of this error, looking through any annotation wrappers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CodecError::ShortBuffer { .. } => ErrorKind::ShortBuffer,
            CodecError::Constraint { .. } => ErrorKind::Constraint,
            CodecError::Decode { .. } => ErrorKind::Decode,
            CodecError::Encode { .. } => ErrorKind::Encode,
            CodecError::CheckFailed { .. } => ErrorKind::CheckFailed,
            CodecError::Ref { .. } => ErrorKind::Ref,
            CodecError::CyclicRef { .. } => ErrorKind::CyclicRef,
            CodecError::TransformNotInvertible { .. } => ErrorKind::TransformNotInvertible,
            CodecError::Schema { .. } => ErrorKind::Schema,
            CodecError::Annotated { source, .. } => source.kind(),
        }
    }

    /// Wrap a field-level error with its position in the block tree.
    pub fn annotate(self, block: &str, field: &str, offset: usize) -> Self {
        CodecError::Annotated {
            block: block.to_string(),
            field: field.to_string(),
            offset,
            source: Box::new(self),
        }
    }

    /// The innermost error, with all annotation layers stripped.
    pub fn root(&self) -> &CodecError {
        match self {
            CodecError::Annotated { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_sees_through_annotation() {
        let err = CodecError::ShortBuffer {
            offset: 4,
            needed: 2,
            available: 0,
        }
        .annotate("Header", "width", 4)
        .annotate("File", "header", 0);

        assert_eq!(err.kind(), ErrorKind::ShortBuffer);
        assert!(matches!(err.root(), CodecError::ShortBuffer { .. }));
    }

    #[test]
    fn test_annotated_display_includes_path() {
        let err = CodecError::Constraint {
            detail: "value 251 not in 0..=250".to_string(),
        }
        .annotate("Header", "level", 0);

        let rendered = err.to_string();
        assert!(rendered.contains("Header.level"));
        assert!(rendered.contains("251"));
    }
}
