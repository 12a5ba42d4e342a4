//! Text field codec.
//!
//! A byte run decoded through a named text encoding, with an optional
//! terminator byte and maximum length. With a declared region length the
//! field consumes exactly that many bytes and pads on write (the classic
//! fixed-size name slot); without one it scans to the terminator.

use crate::encoding::TextEncoding;
use crate::error::{CodecError, CodecResult};
use crate::field::{reserve, take, IntProp};
use crate::refs::Scope;
use crate::value::Value;

/// Descriptor payload for text fields.
#[derive(Debug, Clone)]
pub struct TextField {
    pub(crate) encoding: TextEncoding,
    /// Fixed region size in bytes.
    pub(crate) length: Option<IntProp>,
    /// Terminator byte; decoding stops before it, encoding appends it.
    pub(crate) terminator: Option<u8>,
    /// Maximum encoded byte length, enforced on both directions.
    pub(crate) max_length: Option<usize>,
}

impl TextField {
    pub(crate) fn new(encoding: TextEncoding) -> Self {
        Self {
            encoding,
            length: None,
            terminator: None,
            max_length: None,
        }
    }

    pub(crate) fn check(&self) -> CodecResult<()> {
        if self.length.is_none() && self.terminator.is_none() {
            return Err(CodecError::Schema {
                detail: "text field needs a length or a terminator".to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn read(
        &self,
        buf: &[u8],
        offset: usize,
        scope: &Scope<'_>,
    ) -> CodecResult<(Value, usize)> {
        let (raw, consumed) = match &self.length {
            Some(length) => {
                let length = length.resolve(scope)?;
                let region = take(buf, offset, length)?;
                let raw = match self.terminator {
                    Some(terminator) => match region.iter().position(|&b| b == terminator) {
                        Some(pos) => &region[..pos],
                        None => region,
                    },
                    None => region,
                };
                (raw, length)
            }
            None => {
                let terminator = self.terminator.expect("checked at schema build");
                let rest = buf.get(offset..).unwrap_or(&[]);
                match rest.iter().position(|&b| b == terminator) {
                    Some(pos) => (&rest[..pos], pos + 1),
                    // unterminated run extends to the end of the buffer
                    None => (rest, rest.len()),
                }
            }
        };

        if let Some(max) = self.max_length {
            if raw.len() > max {
                return Err(CodecError::Constraint {
                    detail: format!("text run of {} bytes exceeds max length {}", raw.len(), max),
                });
            }
        }

        let text = self.encoding.decode(raw)?;
        Ok((Value::Str(text), consumed))
    }

    pub(crate) fn write(
        &self,
        value: &Value,
        out: &mut Vec<u8>,
        offset: usize,
        scope: &Scope<'_>,
    ) -> CodecResult<()> {
        let encoded = self.encode_value(value)?;

        match &self.length {
            Some(length) => {
                let length = length.resolve(scope)?;
                if encoded.len() > length {
                    return Err(CodecError::Encode {
                        detail: format!(
                            "text encodes to {} bytes, region is {}",
                            encoded.len(),
                            length
                        ),
                    });
                }
                reserve(out, offset + length);
                out[offset..offset + encoded.len()].copy_from_slice(&encoded);
                // pad the slack with the terminator byte (or NUL)
                let pad = self.terminator.unwrap_or(0);
                for slot in &mut out[offset + encoded.len()..offset + length] {
                    *slot = pad;
                }
            }
            None => {
                let terminator = self.terminator.expect("checked at schema build");
                reserve(out, offset + encoded.len() + 1);
                out[offset..offset + encoded.len()].copy_from_slice(&encoded);
                out[offset + encoded.len()] = terminator;
            }
        }
        Ok(())
    }

    pub(crate) fn size_of(&self, value: &Value, scope: &Scope<'_>) -> CodecResult<usize> {
        match &self.length {
            Some(length) => length.resolve(scope),
            None => Ok(self.encode_value(value)?.len() + 1),
        }
    }

    pub(crate) fn validate(&self, value: &Value) -> CodecResult<()> {
        self.encode_value(value).map(|_| ())
    }

    fn encode_value(&self, value: &Value) -> CodecResult<Vec<u8>> {
        let text = value.as_str().ok_or_else(|| CodecError::Encode {
            detail: format!("expected text, found {}", value.type_name()),
        })?;
        let encoded = self.encoding.encode(text)?;
        if let Some(max) = self.max_length {
            if encoded.len() > max {
                return Err(CodecError::Encode {
                    detail: format!(
                        "text encodes to {} bytes, max length is {}",
                        encoded.len(),
                        max
                    ),
                });
            }
        }
        if let Some(terminator) = self.terminator {
            if encoded.contains(&terminator) {
                return Err(CodecError::Encode {
                    detail: format!("text contains the terminator byte {:#04x}", terminator),
                });
            }
        }
        Ok(encoded)
    }
}
