//! Cross-field reference expressions.
//!
//! A [`Ref`] is a small immutable expression tree evaluated against a block
//! at parse or export time: a dotted attribute path, the end offset or size
//! of a sibling field, a literal, or arithmetic over those. Refs hold no
//! state and never cache; schemas share them freely across instances.
//!
//! `_parent` is realized as a [`Scope`]: a borrowed chain of block
//! references that exists only for the duration of an engine-driven
//! operation. Blocks themselves never store parent pointers, so ownership
//! stays a tree.

use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::error::{CodecError, CodecResult};
use crate::value::{BlockSlot, Value};

/// One segment of a dotted path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathSeg {
    /// Field or group-member name.
    Name(String),
    /// Step up to the containing block.
    Parent,
    /// List element index.
    Index(usize),
}

/// Arithmetic operators permitted inside a ref.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// An immutable reference expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Ref {
    /// Dotted attribute path, e.g. `header.count` or `_parent.width`.
    Path(Vec<PathSeg>),
    /// Resolved end offset (start + size) of a named sibling field.
    EndOffset(String),
    /// Resolved size of a named sibling field.
    Size(String),
    /// Literal value.
    Const(i64),
    /// Binary arithmetic over two refs.
    Arith(Box<Ref>, ArithOp, Box<Ref>),
}

impl Ref {
    /// Parse a dotted path string. Segments are identifiers, `_parent`, or
    /// decimal list indices: `"_parent.entries.0.length"`.
    pub fn parse(path: &str) -> CodecResult<Ref> {
        if path.is_empty() {
            return Err(CodecError::Schema {
                detail: "ref path is empty".to_string(),
            });
        }
        let mut segs = Vec::new();
        for part in path.split('.') {
            if part.is_empty() {
                return Err(CodecError::Schema {
                    detail: format!("ref path `{}` has an empty segment", path),
                });
            }
            if part == "_parent" {
                if segs.iter().any(|seg| !matches!(seg, PathSeg::Parent)) {
                    return Err(CodecError::Schema {
                        detail: format!("ref path `{}`: `_parent` is only legal as a prefix", path),
                    });
                }
                segs.push(PathSeg::Parent);
            } else if part.bytes().all(|b| b.is_ascii_digit()) {
                let index = part.parse::<usize>().map_err(|_| CodecError::Schema {
                    detail: format!("ref path `{}`: index `{}` out of range", path, part),
                })?;
                segs.push(PathSeg::Index(index));
            } else {
                segs.push(PathSeg::Name(part.to_string()));
            }
        }
        if segs.iter().all(|seg| matches!(seg, PathSeg::Parent)) {
            return Err(CodecError::Schema {
                detail: format!("ref path `{}` must name a field", path),
            });
        }
        Ok(Ref::Path(segs))
    }

    /// Path ref for a single sibling field; the common case.
    pub fn field(name: &str) -> Ref {
        Ref::Path(vec![PathSeg::Name(name.to_string())])
    }

    /// End offset (start + size) of a sibling field.
    pub fn end_offset(name: &str) -> Ref {
        Ref::EndOffset(name.to_string())
    }

    /// Size of a sibling field.
    pub fn size(name: &str) -> Ref {
        Ref::Size(name.to_string())
    }

    pub fn constant(value: i64) -> Ref {
        Ref::Const(value)
    }

    pub fn add(self, other: Ref) -> Ref {
        Ref::Arith(Box::new(self), ArithOp::Add, Box::new(other))
    }

    pub fn sub(self, other: Ref) -> Ref {
        Ref::Arith(Box::new(self), ArithOp::Sub, Box::new(other))
    }

    pub fn mul(self, other: Ref) -> Ref {
        Ref::Arith(Box::new(self), ArithOp::Mul, Box::new(other))
    }

    pub fn div(self, other: Ref) -> Ref {
        Ref::Arith(Box::new(self), ArithOp::Div, Box::new(other))
    }

    /// Evaluate against a block scope. Missing attributes are a hard
    /// [`CodecError::Ref`], never a silent zero.
    pub fn evaluate(&self, scope: &Scope<'_>) -> CodecResult<Value> {
        match self {
            Ref::Path(segs) => evaluate_path(segs, scope),
            Ref::EndOffset(name) => {
                let (start, size) = scope.block().field_span(name, scope)?;
                Ok(Value::UInt((start + size) as u64))
            }
            Ref::Size(name) => {
                let (_, size) = scope.block().field_span(name, scope)?;
                Ok(Value::UInt(size as u64))
            }
            Ref::Const(value) => Ok(Value::Int(*value)),
            Ref::Arith(lhs, op, rhs) => {
                let left = lhs.evaluate(scope)?.as_int().ok_or_else(|| CodecError::Ref {
                    detail: format!("left side of {:?} is not numeric", op),
                })?;
                let right = rhs.evaluate(scope)?.as_int().ok_or_else(|| CodecError::Ref {
                    detail: format!("right side of {:?} is not numeric", op),
                })?;
                let result = match op {
                    ArithOp::Add => left.checked_add(right),
                    ArithOp::Sub => left.checked_sub(right),
                    ArithOp::Mul => left.checked_mul(right),
                    ArithOp::Div => {
                        if right == 0 {
                            return Err(CodecError::Ref {
                                detail: "division by zero in ref expression".to_string(),
                            });
                        }
                        left.checked_div(right)
                    }
                };
                let value = result.ok_or_else(|| CodecError::Ref {
                    detail: format!("arithmetic overflow: {} {:?} {}", left, op, right),
                })?;
                Ok(Value::Int(value))
            }
        }
    }

    /// Evaluate and coerce to a usize, for offsets, counts and lengths.
    pub fn evaluate_usize(&self, scope: &Scope<'_>) -> CodecResult<usize> {
        self.evaluate(scope)?.expect_usize("ref expression")
    }

    /// Whether any part of the expression escapes to `_parent`.
    pub fn uses_parent(&self) -> bool {
        match self {
            Ref::Path(segs) => segs.iter().any(|seg| matches!(seg, PathSeg::Parent)),
            Ref::EndOffset(_) | Ref::Size(_) | Ref::Const(_) => false,
            Ref::Arith(lhs, _, rhs) => lhs.uses_parent() || rhs.uses_parent(),
        }
    }

    /// Sibling field names this expression reads in the *current* block.
    /// Used at schema build time to reject forward and cyclic references.
    pub(crate) fn local_deps<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Ref::Path(segs) => {
                // a path that escapes to _parent puts no ordering constraint
                // on the current block's fields
                if let Some(PathSeg::Name(name)) = segs.first() {
                    out.push(name);
                }
            }
            Ref::EndOffset(name) | Ref::Size(name) => out.push(name),
            Ref::Const(_) => {}
            Ref::Arith(lhs, _, rhs) => {
                lhs.local_deps(out);
                rhs.local_deps(out);
            }
        }
    }

    /// Whether [`Ref::assign`] can write through this expression: a
    /// single-segment path naming a field of the same block.
    pub(crate) fn is_writable(&self) -> bool {
        matches!(self, Ref::Path(segs) if matches!(segs.as_slice(), [PathSeg::Name(_)]))
    }

    /// Write `value` through the ref. Only single-segment paths are
    /// writable; they are the targets of count/length re-derivation on
    /// export.
    pub(crate) fn assign(&self, block: &mut Block, value: Value) -> CodecResult<()> {
        match self {
            Ref::Path(segs) => match segs.as_slice() {
                [PathSeg::Name(name)] => block.set_raw(name, value),
                _ => Err(CodecError::Ref {
                    detail: "only single-segment ref paths are writable".to_string(),
                }),
            },
            _ => Err(CodecError::Ref {
                detail: "ref expression is not writable".to_string(),
            }),
        }
    }
}

fn evaluate_path(segs: &[PathSeg], scope: &Scope<'_>) -> CodecResult<Value> {
    // leading _parent segments move up the scope chain
    let mut frame = scope;
    let mut rest = segs;
    while let Some(PathSeg::Parent) = rest.first() {
        frame = frame.parent().ok_or_else(|| CodecError::Ref {
            detail: "`_parent` used above the root block".to_string(),
        })?;
        rest = &rest[1..];
    }

    let first = match rest.first() {
        Some(PathSeg::Name(name)) => name,
        _ => {
            return Err(CodecError::Ref {
                detail: "ref path must name a field".to_string(),
            })
        }
    };
    let mut current = frame.block().get(first).ok_or_else(|| CodecError::Ref {
        detail: format!(
            "block `{}` has no field `{}`",
            frame.block().schema().name(),
            first
        ),
    })?;

    for seg in &rest[1..] {
        current = match (seg, current) {
            (PathSeg::Name(name), Value::Block(BlockSlot::Known(block))) => {
                block.get(name).ok_or_else(|| CodecError::Ref {
                    detail: format!(
                        "block `{}` has no field `{}`",
                        block.schema().name(),
                        name
                    ),
                })?
            }
            (PathSeg::Name(_), Value::Block(BlockSlot::Unknown(_))) => {
                return Err(CodecError::Ref {
                    detail: "cannot path into an unknown block".to_string(),
                })
            }
            (PathSeg::Name(name), group @ Value::Group(_)) => {
                group.group_get(name).ok_or_else(|| CodecError::Ref {
                    detail: format!("bit group has no member `{}`", name),
                })?
            }
            (PathSeg::Index(index), Value::List(items)) => {
                items.get(*index).ok_or_else(|| CodecError::Ref {
                    detail: format!("list index {} out of bounds ({})", index, items.len()),
                })?
            }
            (PathSeg::Parent, _) => {
                return Err(CodecError::Ref {
                    detail: "`_parent` is only legal as a path prefix".to_string(),
                })
            }
            (seg, other) => {
                return Err(CodecError::Ref {
                    detail: format!("cannot apply {:?} to a {} value", seg, other.type_name()),
                })
            }
        };
    }
    Ok(current.clone())
}

/// Borrowed chain of blocks from the current block up to the root.
///
/// A scope lives only for the duration of one engine operation (parse,
/// export, size or ref evaluation); it is how `_parent` resolves without
/// blocks owning back-pointers.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    block: &'a Block,
    parent: Option<&'a Scope<'a>>,
}

impl<'a> Scope<'a> {
    /// Scope for a root block.
    pub fn root(block: &'a Block) -> Scope<'a> {
        Scope {
            block,
            parent: None,
        }
    }

    /// Scope for a block nested inside `parent`.
    pub fn child_of(parent: &'a Scope<'a>, block: &'a Block) -> Scope<'a> {
        Scope {
            block,
            parent: Some(parent),
        }
    }

    pub(crate) fn new(block: &'a Block, parent: Option<&'a Scope<'a>>) -> Scope<'a> {
        Scope { block, parent }
    }

    /// The block this frame is evaluating against.
    pub fn block(&self) -> &'a Block {
        self.block
    }

    /// The containing frame, if any.
    pub fn parent(&self) -> Option<&'a Scope<'a>> {
        self.parent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_path() {
        let parsed = Ref::parse("header.count").unwrap();
        assert_eq!(
            parsed,
            Ref::Path(vec![
                PathSeg::Name("header".to_string()),
                PathSeg::Name("count".to_string()),
            ])
        );
    }

    #[test]
    fn test_parse_parent_and_index() {
        let parsed = Ref::parse("_parent.entries.3").unwrap();
        assert_eq!(
            parsed,
            Ref::Path(vec![
                PathSeg::Parent,
                PathSeg::Name("entries".to_string()),
                PathSeg::Index(3),
            ])
        );
    }

    #[test]
    fn test_parse_rejects_bad_paths() {
        assert!(Ref::parse("").is_err());
        assert!(Ref::parse("a..b").is_err());
        assert!(Ref::parse("_parent").is_err());
        assert!(Ref::parse("a._parent.b").is_err());
    }

    #[test]
    fn test_uses_parent() {
        assert!(Ref::parse("_parent.count").unwrap().uses_parent());
        assert!(!Ref::field("count").uses_parent());
        assert!(Ref::field("a").add(Ref::parse("_parent.b").unwrap()).uses_parent());
    }

    #[test]
    fn test_local_deps_skips_parent_paths() {
        let mut deps = Vec::new();
        let binding = Ref::field("len").add(Ref::end_offset("data"));
        binding.local_deps(&mut deps);
        assert_eq!(deps, vec!["len", "data"]);

        deps.clear();
        let binding = Ref::parse("_parent.len").unwrap();
        binding.local_deps(&mut deps);
        assert!(deps.is_empty());
    }
}
