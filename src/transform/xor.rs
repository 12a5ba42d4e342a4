//! XOR obfuscation transform.

use crate::error::{CodecError, CodecResult};
use crate::transform::{Transform, TransformContext, TransformOutput};

/// XOR every byte against a repeating key. A common obfuscation layer in
/// proprietary formats; the transform is its own inverse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XorTransform {
    key: Vec<u8>,
}

impl XorTransform {
    /// Single-byte key, the overwhelmingly common case.
    pub fn new(key: u8) -> Self {
        Self { key: vec![key] }
    }

    /// Repeating multi-byte key.
    pub fn with_key(key: Vec<u8>) -> CodecResult<Self> {
        if key.is_empty() {
            return Err(CodecError::Schema {
                detail: "XOR transform requires a non-empty key".to_string(),
            });
        }
        Ok(Self { key })
    }

    fn apply(&self, data: &[u8]) -> Vec<u8> {
        data.iter()
            .zip(self.key.iter().cycle())
            .map(|(&byte, &key)| byte ^ key)
            .collect()
    }
}

impl Transform for XorTransform {
    fn name(&self) -> &'static str {
        "xor"
    }

    fn forward(&self, data: &[u8], _ctx: &TransformContext) -> CodecResult<TransformOutput> {
        Ok(TransformOutput {
            payload: self.apply(data),
            consumed: data.len(),
        })
    }

    fn reverse(&self, data: &[u8], _ctx: &TransformContext) -> CodecResult<Vec<u8>> {
        Ok(self.apply(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xor_is_self_inverse() {
        let transform = XorTransform::new(0x5a);
        let plain = b"The quick brown fox";
        let ctx = TransformContext::new();

        let masked = transform.forward(plain, &ctx).unwrap();
        assert_eq!(masked.consumed, plain.len());
        assert_ne!(masked.payload.as_slice(), plain.as_slice());

        let unmasked = transform.reverse(&masked.payload, &ctx).unwrap();
        assert_eq!(unmasked.as_slice(), plain.as_slice());
    }

    #[test]
    fn test_multi_byte_key_cycles() {
        let transform = XorTransform::with_key(vec![0x01, 0x02]).unwrap();
        let out = transform
            .forward(&[0x00, 0x00, 0x00], &TransformContext::new())
            .unwrap();
        assert_eq!(out.payload, vec![0x01, 0x02, 0x01]);
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(XorTransform::with_key(Vec::new()).is_err());
    }
}
