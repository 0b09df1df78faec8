use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Checks an entity before it is inserted.
///
/// Returns Ok(()) if valid, Err(String) with a message if invalid.
pub trait EntityValidator: Send + Sync {
    fn validate(&self, entity: &JsonValue) -> Result<(), String>;
}

/// Default validator: everything passes.
pub struct AcceptAll;

impl EntityValidator for AcceptAll {
    fn validate(&self, _entity: &JsonValue) -> Result<(), String> {
        Ok(())
    }
}

impl<F> EntityValidator for F
where
    F: Fn(&JsonValue) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, entity: &JsonValue) -> Result<(), String> {
        self(entity)
    }
}

/// Value type accepted by a [`SchemaValidator`] field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

impl FieldType {
    fn matches(self, value: &JsonValue) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Any => "any",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldRule {
    kind: FieldType,
    optional: bool,
}

/// Validates top-level fields against a `field -> type` schema.
///
/// Type names are `string`, `number`, `boolean`, `object`, `array` and `any`.
/// A trailing `?` (`"number?"`) makes the field optional; an optional field
/// may also be `null`. Fields not named in the schema are allowed.
#[derive(Debug, Clone, Default)]
pub struct SchemaValidator {
    fields: BTreeMap<String, FieldRule>,
}

impl SchemaValidator {
    pub fn from_schema(schema: &BTreeMap<String, String>) -> Result<Self, String> {
        let mut fields = BTreeMap::new();
        for (field, declared) in schema {
            let declared = declared.trim();
            let (name, optional) = match declared.strip_suffix('?') {
                Some(name) => (name, true),
                None => (declared, false),
            };
            let kind = match name.to_ascii_lowercase().as_str() {
                "string" => FieldType::String,
                "number" => FieldType::Number,
                "boolean" | "bool" => FieldType::Boolean,
                "object" => FieldType::Object,
                "array" => FieldType::Array,
                "any" => FieldType::Any,
                other => return Err(format!("unknown type '{}' for field '{}'", other, field)),
            };
            fields.insert(field.clone(), FieldRule { kind, optional });
        }
        Ok(Self { fields })
    }
}

impl EntityValidator for SchemaValidator {
    fn validate(&self, entity: &JsonValue) -> Result<(), String> {
        let Some(doc) = entity.as_object() else {
            return Err("entity must be an object".to_string());
        };

        for (field, rule) in &self.fields {
            match doc.get(field) {
                None | Some(JsonValue::Null) if rule.optional => {}
                None | Some(JsonValue::Null) => {
                    return Err(format!("field '{}' is required", field));
                }
                Some(value) if !rule.kind.matches(value) => {
                    return Err(format!("field '{}' must be of type {}", field, rule.kind.name()));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}
