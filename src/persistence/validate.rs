use crate::entity::{Entity, FieldValue};
use crate::error::{GraphError, Result, Violation};
use crate::schema::EntityType;

/// Checks an entity against its type before any write.
///
/// Required fields fail fast. Type and rule failures are collected so one
/// error reports all of them.
pub(crate) fn validate(ty: &EntityType, entity: &Entity, is_new: bool) -> Result<()> {
    for field in ty.fields().iter().filter(|f| f.is_required()) {
        let missing = match entity.get(&field.name) {
            None => is_new,
            Some(FieldValue::Value(value)) => value.is_blank(),
            Some(value) => value.is_default(),
        };
        if missing {
            return Err(GraphError::MissingRequired {
                entity: ty.name().to_owned(),
                field: field.name.clone(),
            });
        }
    }

    let mut violations = Vec::new();
    for field in ty.fields() {
        let Some(value) = entity.get(&field.name) else {
            continue;
        };
        match value {
            FieldValue::Value(value) if field.is_related() => {
                if !value.is_null() {
                    violations.push(Violation::new(&field.name, "expects related entities"));
                }
            }
            FieldValue::Value(value) => {
                if !field.field_type.accepts(value) {
                    violations.push(Violation::new(
                        &field.name,
                        format!("expects {:?}, got {value}", field.field_type),
                    ));
                }
                for rule in &field.annotations.rules {
                    if let Some(message) = rule.check(value) {
                        violations.push(Violation::new(&field.name, message));
                    }
                }
            }
            _ if !field.is_related() => {
                violations.push(Violation::new(&field.name, "expects a scalar value"));
            }
            _ => {}
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(GraphError::ConstraintViolation {
            entity: ty.name().to_owned(),
            violations,
        })
    }
}
