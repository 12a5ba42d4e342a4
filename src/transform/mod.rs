//! Reversible byte-region transforms.
//!
//! A transform bridges a "raw" byte layout and a "decoded" one: compression,
//! obfuscation, interleaving. `forward` runs on import, `reverse` on export.
//! A transform without a usable `reverse` makes every block that depends on
//! it read-only; export fails with `TransformNotInvertible` instead of
//! producing bytes that cannot round-trip.

use std::fmt;

use crate::error::{CodecError, CodecResult};

mod lzss;
mod xor;

pub use lzss::LzssTransform;
pub use xor::XorTransform;

/// Side data available to a transform invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransformContext {
    /// Declared size of the decoded payload, when the schema knows it
    /// (e.g. an uncompressed-length header field). Decompressors may use it
    /// to preallocate or to stop early.
    pub length_hint: Option<usize>,
}

impl TransformContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_length_hint(length: usize) -> Self {
        Self {
            length_hint: Some(length),
        }
    }
}

/// Result of running a transform forward over a raw region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    /// The decoded bytes.
    pub payload: Vec<u8>,
    /// How many raw bytes were consumed. Transforms with an embedded end
    /// marker may consume less than the region they were offered.
    pub consumed: usize,
}

/// A reversible byte-region codec.
///
/// Both directions are pure functions over bytes plus the context; a
/// transform is shared by every block instance of its schema and must hold
/// no per-invocation state.
pub trait Transform: fmt::Debug + Send + Sync {
    /// Short name used in error messages.
    fn name(&self) -> &'static str;

    /// Raw bytes to decoded payload (import direction).
    fn forward(&self, data: &[u8], ctx: &TransformContext) -> CodecResult<TransformOutput>;

    /// Decoded payload back to raw bytes (export direction).
    ///
    /// The default marks the transform one-way: any block whose schema
    /// uses it cannot be exported.
    fn reverse(&self, _data: &[u8], _ctx: &TransformContext) -> CodecResult<Vec<u8>> {
        Err(CodecError::TransformNotInvertible {
            name: self.name().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct OneWay;

    impl Transform for OneWay {
        fn name(&self) -> &'static str {
            "one-way"
        }

        fn forward(&self, data: &[u8], _ctx: &TransformContext) -> CodecResult<TransformOutput> {
            Ok(TransformOutput {
                payload: data.to_vec(),
                consumed: data.len(),
            })
        }
    }

    #[test]
    fn test_default_reverse_is_not_invertible() {
        let err = OneWay.reverse(b"abc", &TransformContext::new()).unwrap_err();
        assert_eq!(
            err,
            CodecError::TransformNotInvertible {
                name: "one-way".to_string()
            }
        );
    }
}
