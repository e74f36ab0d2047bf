//! Semantic argument validation.
//!
//! Each tool declares its parameters once as a [`ToolSchema`]; the registry
//! validates inbound arguments before execution. Unknown extra fields are a
//! soft failure (warn and pass through — models decorate inputs), while a
//! missing required field or a type mismatch is hard and fails the call.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
}

impl FieldType {
    fn json_name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub field_type: FieldType,
    pub required: bool,
    pub description: &'static str,
}

#[derive(Debug, Clone, Default)]
pub struct ToolSchema {
    pub fields: Vec<FieldSpec>,
}

impl ToolSchema {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn field(
        mut self,
        name: &'static str,
        field_type: FieldType,
        required: bool,
        description: &'static str,
    ) -> Self {
        self.fields.push(FieldSpec {
            name,
            field_type,
            required,
            description,
        });
        self
    }

    /// Render as a JSON Schema object for the provider API.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for field in &self.fields {
            properties.insert(
                field.name.to_string(),
                serde_json::json!({
                    "type": field.field_type.json_name(),
                    "description": field.description,
                }),
            );
            if field.required {
                required.push(Value::String(field.name.to_string()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Validate arguments. `Ok(warnings)` passes through (possibly with soft
    /// warnings); `Err` describes a hard schema violation.
    pub fn validate(&self, input: &Value) -> Result<Vec<String>, String> {
        let Some(obj) = input.as_object() else {
            return Err("arguments must be a JSON object".to_string());
        };

        for field in &self.fields {
            match obj.get(field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(format!("missing required parameter: {}", field.name));
                }
                Some(value) if !value.is_null() && !field.field_type.matches(value) => {
                    return Err(format!(
                        "parameter '{}' must be a {}",
                        field.name,
                        field.field_type.json_name()
                    ));
                }
                _ => {}
            }
        }

        let known: Vec<&str> = self.fields.iter().map(|f| f.name).collect();
        let warnings = obj
            .keys()
            .filter(|k| !known.contains(&k.as_str()))
            .map(|k| format!("ignoring unknown parameter: {k}"))
            .collect();

        Ok(warnings)
    }
}
