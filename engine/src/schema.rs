//! Payload schemas for document kinds.
//!
//! The engine itself never looks inside a payload. Callers register a
//! [`KindSchema`] per document kind and the facade checks writes against it
//! before they reach a store or the offline queue.

use crate::{document::Payload, error::Result, Error, SchemaVersion};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Value types a field may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    /// Milliseconds since epoch or an RFC 3339 string
    Timestamp,
    /// Anything, including nested objects
    Json,
}

impl FieldType {
    fn accepts(self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Timestamp => crate::document::parse_timestamp(value).is_some(),
            FieldType::Json => true,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "String",
            FieldType::Int => "Int",
            FieldType::Float => "Float",
            FieldType::Bool => "Bool",
            FieldType::Timestamp => "Timestamp",
            FieldType::Json => "Json",
        };
        f.write_str(name)
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        Value::Number(_) => "Float",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldSpec {
    field_type: FieldType,
    required: bool,
}

/// Field rules for one document kind. Unlisted fields are allowed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindSchema {
    fields: HashMap<String, FieldSpec>,
}

impl KindSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(
            name.into(),
            FieldSpec {
                field_type,
                required: true,
            },
        );
        self
    }

    pub fn optional(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(
            name.into(),
            FieldSpec {
                field_type,
                required: false,
            },
        );
        self
    }

    /// Check a complete payload.
    pub fn validate(&self, payload: &Payload) -> Result<()> {
        for (name, spec) in &self.fields {
            match payload.get(name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(Error::MissingRequiredField(name.clone()))
                }
                None | Some(Value::Null) => {}
                Some(value) => check_type(name, spec, value)?,
            }
        }
        Ok(())
    }

    /// Check only the fields a patch touches.
    pub fn validate_patch(&self, patch: &Payload) -> Result<()> {
        for (name, value) in patch {
            let Some(spec) = self.fields.get(name) else {
                continue;
            };
            if value.is_null() {
                if spec.required {
                    return Err(Error::MissingRequiredField(name.clone()));
                }
                continue;
            }
            check_type(name, spec, value)?;
        }
        Ok(())
    }
}

fn check_type(name: &str, spec: &FieldSpec, value: &Value) -> Result<()> {
    if spec.field_type.accepts(value) {
        return Ok(());
    }
    Err(Error::TypeMismatch {
        field: name.to_string(),
        expected: spec.field_type.to_string(),
        got: describe(value).to_string(),
    })
}

/// Registered kinds for a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    pub version: SchemaVersion,
    kinds: HashMap<String, KindSchema>,
    /// Accept kinds that were never registered
    #[serde(default)]
    permissive: bool,
}

impl Schema {
    /// A strict schema: only registered kinds may be written.
    pub fn new(version: SchemaVersion) -> Self {
        Self {
            version,
            kinds: HashMap::new(),
            permissive: false,
        }
    }

    /// A schema that accepts any kind and any payload.
    pub fn permissive() -> Self {
        Self {
            version: 1,
            kinds: HashMap::new(),
            permissive: true,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>, schema: KindSchema) -> Self {
        self.kinds.insert(kind.into(), schema);
        self
    }

    pub fn kind(&self, kind: &str) -> Option<&KindSchema> {
        self.kinds.get(kind)
    }

    /// Validate a full payload for `kind`.
    pub fn validate(&self, kind: &str, payload: &Payload) -> Result<()> {
        match self.kinds.get(kind) {
            Some(schema) => schema.validate(payload),
            None if self.permissive => Ok(()),
            None => Err(Error::UnknownKind(kind.to_string())),
        }
    }

    /// Validate a partial update for `kind`.
    pub fn validate_patch(&self, kind: &str, patch: &Payload) -> Result<()> {
        match self.kinds.get(kind) {
            Some(schema) => schema.validate_patch(patch),
            None if self.permissive => Ok(()),
            None => Err(Error::UnknownKind(kind.to_string())),
        }
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::permissive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    fn hr_schema() -> Schema {
        Schema::new(1).with_kind(
            "employee",
            KindSchema::new()
                .required("name", FieldType::String)
                .required("grade", FieldType::Int)
                .optional("hiredAt", FieldType::Timestamp),
        )
    }

    #[test]
    fn accepts_valid_payload() {
        let schema = hr_schema();
        assert!(schema
            .validate("employee", &payload(json!({"name": "Ada", "grade": 3})))
            .is_ok());
        assert!(schema
            .validate(
                "employee",
                &payload(json!({"name": "Ada", "grade": 3, "hiredAt": "2023-01-05T09:00:00Z"}))
            )
            .is_ok());
    }

    #[test]
    fn missing_required_field() {
        let result = hr_schema().validate("employee", &payload(json!({"name": "Ada"})));
        assert!(matches!(result, Err(Error::MissingRequiredField(f)) if f == "grade"));
    }

    #[test]
    fn null_required_field() {
        let result = hr_schema().validate("employee", &payload(json!({"name": null, "grade": 1})));
        assert!(matches!(result, Err(Error::MissingRequiredField(f)) if f == "name"));
    }

    #[test]
    fn wrong_type() {
        let result =
            hr_schema().validate("employee", &payload(json!({"name": "Ada", "grade": "high"})));
        assert!(matches!(
            result,
            Err(Error::TypeMismatch { field, expected, got })
                if field == "grade" && expected == "Int" && got == "String"
        ));
    }

    #[test]
    fn unknown_kind_in_strict_schema() {
        let result = hr_schema().validate("payslip", &Payload::new());
        assert!(matches!(result, Err(Error::UnknownKind(k)) if k == "payslip"));
        assert!(Schema::permissive()
            .validate("payslip", &Payload::new())
            .is_ok());
    }

    #[test]
    fn patch_checks_only_touched_fields() {
        let schema = hr_schema();
        assert!(schema
            .validate_patch("employee", &payload(json!({"grade": 4})))
            .is_ok());
        assert!(schema
            .validate_patch("employee", &payload(json!({"grade": 4.5})))
            .is_err());
        assert!(schema
            .validate_patch("employee", &payload(json!({"name": null})))
            .is_err());
    }

    #[test]
    fn schema_serialization() {
        let schema = hr_schema();
        let json = serde_json::to_string(&schema).unwrap();
        let parsed: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, parsed);
    }
}
