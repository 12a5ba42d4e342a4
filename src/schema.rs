//! Schema construction and load-time validation.
//!
//! A schema is a value: an ordered list of `(name, field)` pairs plus
//! checks, built once, frozen behind an `Arc`, and shared by every block
//! instance. Declaration order is the wire order unless a field carries an
//! explicit offset. All structural legality is decided here, at build time,
//! so parsing never trips over a malformed schema:
//!
//! - duplicate field names
//! - refs pointing at undeclared fields
//! - refs pointing at the field itself or a later sibling (parse populates
//!   strictly in declaration order, so forward refs can never resolve; this
//!   rule also makes ref cycles unrepresentable)
//! - unbounded stream fields anywhere but the terminal position
//! - kind-specific option misuse

use std::collections::HashMap;
use std::sync::Arc;

use crate::checks::Check;
use crate::error::{CodecError, CodecResult};
use crate::field::Field;
use crate::refs::Ref;

/// A frozen block schema.
#[derive(Debug)]
pub struct Schema {
    name: String,
    fields: Vec<(String, Field)>,
    checks: Vec<Check>,
    index: HashMap<String, usize>,
    uses_parent: bool,
}

impl Schema {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ordered `(name, field)` pairs in declaration order.
    pub fn fields(&self) -> &[(String, Field)] {
        &self.fields
    }

    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    /// Lookup a field by interned name.
    pub fn field(&self, name: &str) -> Option<(usize, &Field)> {
        self.index
            .get(name)
            .map(|&index| (index, &self.fields[index].1))
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Whether any ref in this schema escapes to `_parent`. Such schemas
    /// cannot be parsed standalone.
    pub fn uses_parent(&self) -> bool {
        self.uses_parent
    }
}

/// Chained builder for [`Schema`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    name: String,
    fields: Vec<(String, Field)>,
    checks: Vec<Check>,
}

impl SchemaBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: Vec::new(),
            checks: Vec::new(),
        }
    }

    /// Append a field; declaration order is wire order.
    pub fn field(mut self, name: &str, field: Field) -> Self {
        self.fields.push((name.to_string(), field));
        self
    }

    pub fn check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    /// Validate and freeze the schema.
    pub fn build(self) -> CodecResult<Arc<Schema>> {
        let mut index = HashMap::with_capacity(self.fields.len());
        for (position, (name, _)) in self.fields.iter().enumerate() {
            if name.is_empty() || name.starts_with('_') {
                return Err(CodecError::Schema {
                    detail: format!("`{}`: illegal field name `{}`", self.name, name),
                });
            }
            if index.insert(name.clone(), position).is_some() {
                return Err(CodecError::Schema {
                    detail: format!("`{}`: duplicate field `{}`", self.name, name),
                });
            }
        }

        let mut uses_parent = false;
        for (position, (name, field)) in self.fields.iter().enumerate() {
            if let Some(detail) = field.build_errors().first() {
                return Err(CodecError::Schema {
                    detail: format!("`{}`.`{}`: {}", self.name, name, detail),
                });
            }
            field.internal_checks().map_err(|e| match e {
                CodecError::Schema { detail } => CodecError::Schema {
                    detail: format!("`{}`.`{}`: {}", self.name, name, detail),
                },
                other => other,
            })?;

            let mut refs = Vec::new();
            field.collect_refs(&mut refs);
            for r in &refs {
                if r.uses_parent() {
                    uses_parent = true;
                }
                check_backward_only(&self.name, name, position, r, &index)?;
            }

            if field.is_unbounded_stream() && position + 1 != self.fields.len() {
                return Err(CodecError::Schema {
                    detail: format!(
                        "`{}`.`{}`: unbounded stream fields must be terminal",
                        self.name, name
                    ),
                });
            }
        }

        for check in &self.checks {
            check.internal_checks()?;
            for used in check.fields_used() {
                if !index.contains_key(used) {
                    return Err(CodecError::Schema {
                        detail: format!(
                            "`{}`: check names unknown field `{}`",
                            self.name, used
                        ),
                    });
                }
            }
        }

        Ok(Arc::new(Schema {
            name: self.name,
            fields: self.fields,
            checks: self.checks,
            index,
            uses_parent,
        }))
    }
}

/// Every local dependency of `r` must be declared strictly before
/// `position`: the parse loop populates fields in declaration order, so a
/// self or forward reference would read an unparsed slot. Rejecting them
/// here also rules out reference cycles entirely.
fn check_backward_only(
    schema: &str,
    field: &str,
    position: usize,
    r: &Ref,
    index: &HashMap<String, usize>,
) -> CodecResult<()> {
    let mut deps = Vec::new();
    r.local_deps(&mut deps);
    for dep in deps {
        match index.get(dep) {
            None => {
                return Err(CodecError::Schema {
                    detail: format!(
                        "`{}`.`{}`: ref names unknown field `{}`",
                        schema, field, dep
                    ),
                })
            }
            Some(&target) if target >= position => {
                return Err(CodecError::CyclicRef {
                    field: field.to_string(),
                    target: dep.to_string(),
                });
            }
            Some(_) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Endian;
    use crate::field::NumberType;
    use crate::refs::Ref;

    #[test]
    fn test_declaration_order_is_kept() {
        let schema = SchemaBuilder::new("Header")
            .field("magic", Field::bytes(4))
            .field("version", Field::number(NumberType::U16, Endian::Little))
            .build()
            .unwrap();
        assert_eq!(schema.fields()[0].0, "magic");
        assert_eq!(schema.field_index("version"), Some(1));
        assert!(!schema.uses_parent());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let result = SchemaBuilder::new("Header")
            .field("a", Field::u8())
            .field("a", Field::u8())
            .build();
        assert!(matches!(result, Err(CodecError::Schema { .. })));
    }

    #[test]
    fn test_underscore_names_reserved() {
        let result = SchemaBuilder::new("Header")
            .field("_parent", Field::u8())
            .build();
        assert!(matches!(result, Err(CodecError::Schema { .. })));
    }

    #[test]
    fn test_forward_ref_is_cyclic_error() {
        let result = SchemaBuilder::new("Header")
            .field("data", Field::bytes_ref(Ref::field("len")))
            .field("len", Field::u8())
            .build();
        assert!(matches!(result, Err(CodecError::CyclicRef { .. })));
    }

    #[test]
    fn test_self_ref_is_cyclic_error() {
        let result = SchemaBuilder::new("Header")
            .field("data", Field::bytes_ref(Ref::field("data")))
            .build();
        assert!(matches!(result, Err(CodecError::CyclicRef { .. })));
    }

    #[test]
    fn test_unknown_ref_target_rejected() {
        let result = SchemaBuilder::new("Header")
            .field("data", Field::bytes_ref(Ref::field("missing")))
            .build();
        assert!(matches!(result, Err(CodecError::Schema { .. })));
    }

    #[test]
    fn test_backward_ref_accepted_and_parent_flagged() {
        let schema = SchemaBuilder::new("Body")
            .field("len", Field::u8())
            .field("data", Field::bytes_ref(Ref::field("len")))
            .field(
                "extra",
                Field::bytes_ref(Ref::parse("_parent.extra_len").unwrap()),
            )
            .build()
            .unwrap();
        assert!(schema.uses_parent());
    }

    #[test]
    fn test_stream_must_be_terminal() {
        let result = SchemaBuilder::new("File")
            .field("body", Field::bytes_stream())
            .field("tail", Field::u8())
            .build();
        assert!(matches!(result, Err(CodecError::Schema { .. })));

        let ok = SchemaBuilder::new("File")
            .field("head", Field::u8())
            .field("body", Field::bytes_stream())
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn test_option_misuse_surfaces_at_build() {
        let result = SchemaBuilder::new("Header")
            .field("value", Field::u8().terminated(0))
            .build();
        assert!(matches!(result, Err(CodecError::Schema { .. })));
    }

    #[test]
    fn test_check_on_unknown_field_rejected() {
        let result = SchemaBuilder::new("Header")
            .field("a", Field::u8())
            .check(Check::Const {
                field: "missing".to_string(),
                expected: crate::value::Value::UInt(1),
            })
            .build();
        assert!(matches!(result, Err(CodecError::Schema { .. })));
    }
}
