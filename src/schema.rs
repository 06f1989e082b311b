//! Schema normalizer (spec.md §4.3): parses both upstream tool-schema shapes
//! into one internal `ToolDescriptor` list, and classifies parameter
//! complexity for the `invoke` convenience path. Generalizes the teacher's
//! `backend::map_tools_to_entries` (one fixed upstream shape) to the two
//! shapes a Gradio MCP schema endpoint can return.

use serde_json::Value;
use thiserror::Error;

use crate::model::ToolDescriptor;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("upstream schema has no usable tools after filtering")]
    Empty,
    #[error("tool '{0}' has a non-object input schema")]
    NotObjectSchema(String),
}

/// Parse and normalize an upstream schema response (array or object shape).
pub fn normalize(raw: &Value) -> Result<Vec<ToolDescriptor>, NormalizeError> {
    let parsed = match raw {
        Value::Array(items) => parse_array(items),
        Value::Object(map) => parse_object(map),
        _ => Vec::new(),
    };

    let descriptors: Vec<ToolDescriptor> = parsed
        .into_iter()
        .filter(|(name, _, _)| !name.to_lowercase().contains("<lambda"))
        .map(|(name, description, schema)| -> Result<ToolDescriptor, NormalizeError> {
            let schema = validate_schema(&name, schema)?;
            let description = description
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| format!("{name} tool"));
            Ok(ToolDescriptor {
                name,
                description,
                input_schema: schema,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if descriptors.is_empty() {
        return Err(NormalizeError::Empty);
    }
    Ok(descriptors)
}

fn parse_array(items: &[Value]) -> Vec<(String, Option<String>, Value)> {
    items
        .iter()
        .filter_map(|item| {
            let name = item.get("name")?.as_str()?.to_string();
            let description = item
                .get("description")
                .and_then(|d| d.as_str())
                .map(str::to_string);
            let schema = item.get("inputSchema").cloned().unwrap_or(Value::Null);
            Some((name, description, schema))
        })
        .collect()
}

fn parse_object(map: &serde_json::Map<String, Value>) -> Vec<(String, Option<String>, Value)> {
    map.iter()
        .map(|(name, schema)| {
            let description = schema
                .get("description")
                .and_then(|d| d.as_str())
                .map(str::to_string);
            (name.clone(), description, schema.clone())
        })
        .collect()
}

/// Ensure the schema is an object-typed JSON Schema with `properties` and
/// `required`, defaulting both to empty when absent (spec.md §4.3 step 5).
fn validate_schema(name: &str, mut schema: Value) -> Result<Value, NormalizeError> {
    if schema.is_null() {
        schema = serde_json::json!({});
    }
    let obj = schema
        .as_object_mut()
        .ok_or_else(|| NormalizeError::NotObjectSchema(name.to_string()))?;
    obj.entry("type").or_insert_with(|| Value::String("object".to_string()));
    obj.entry("properties")
        .or_insert_with(|| Value::Object(Default::default()));
    obj.entry("required").or_insert_with(|| Value::Array(Vec::new()));
    Ok(schema)
}

/// Whether every property of a schema is primitive-shaped: string, number,
/// integer, boolean, an enum of primitives, or a tagged `FileData`/`ImageData`
/// parameter (URL string). Used by the `invoke` convenience path (spec.md §4.3).
pub fn is_simple_schema(schema: &Value) -> bool {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return true;
    };
    properties.values().all(is_simple_property)
}

fn is_simple_property(prop: &Value) -> bool {
    let Some(obj) = prop.as_object() else {
        return false;
    };

    if let Some(tag) = obj.get("$tag").or_else(|| obj.get("x-tag")).and_then(Value::as_str)
        && (tag == "FileData" || tag == "ImageData")
    {
        return true;
    }

    match obj.get("type").and_then(Value::as_str) {
        Some("string") | Some("number") | Some("integer") | Some("boolean") => true,
        Some("array") | Some("object") => false,
        _ => obj.contains_key("enum") && is_primitive_enum(obj.get("enum")),
    }
}

fn is_primitive_enum(values: Option<&Value>) -> bool {
    match values {
        Some(Value::Array(items)) => items
            .iter()
            .all(|v| matches!(v, Value::String(_) | Value::Number(_) | Value::Bool(_))),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn array_and_object_shapes_normalize_equal() {
        let array_form = json!([
            {"name": "generate", "description": "Generate an image", "inputSchema": {
                "type": "object", "properties": {"prompt": {"type": "string"}}, "required": ["prompt"]
            }}
        ]);
        let object_form = json!({
            "generate": {
                "type": "object",
                "description": "Generate an image",
                "properties": {"prompt": {"type": "string"}},
                "required": ["prompt"]
            }
        });

        let a = normalize(&array_form).unwrap();
        let b = normalize(&object_form).unwrap();
        assert_eq!(a.len(), b.len());
        assert_eq!(a[0].name, b[0].name);
        assert_eq!(a[0].description, b[0].description);
        assert_eq!(a[0].input_schema["properties"], b[0].input_schema["properties"]);
    }

    #[test]
    fn lambda_tools_are_dropped() {
        let array_form = json!([
            {"name": "<lambda at 0x123>", "inputSchema": {"type": "object"}},
            {"name": "generate", "inputSchema": {"type": "object"}}
        ]);
        let result = normalize(&array_form).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].name, "generate");
    }

    #[test]
    fn lambda_match_is_case_insensitive() {
        let array_form = json!([{"name": "<LAMBDA_fn>", "inputSchema": {"type": "object"}}]);
        assert_eq!(normalize(&array_form).unwrap_err(), NormalizeError::Empty);
    }

    #[test]
    fn missing_description_is_synthesised() {
        let array_form = json!([{"name": "generate", "inputSchema": {"type": "object"}}]);
        let result = normalize(&array_form).unwrap();
        assert_eq!(result[0].description, "generate tool");
    }

    #[test]
    fn empty_result_is_rejected() {
        let array_form = json!([]);
        assert_eq!(normalize(&array_form).unwrap_err(), NormalizeError::Empty);
    }

    #[test]
    fn validate_schema_fills_defaults() {
        let array_form = json!([{"name": "t", "inputSchema": {}}]);
        let result = normalize(&array_form).unwrap();
        assert_eq!(result[0].input_schema["properties"], json!({}));
        assert_eq!(result[0].input_schema["required"], json!([]));
    }

    #[test]
    fn simple_schema_classification() {
        let simple = json!({"properties": {"prompt": {"type": "string"}, "n": {"type": "integer"}}});
        assert!(is_simple_schema(&simple));

        let with_file = json!({"properties": {"image": {"$tag": "ImageData", "type": "string"}}});
        assert!(is_simple_schema(&with_file));

        let enum_prop = json!({"properties": {"mode": {"enum": ["fast", "slow"]}}});
        assert!(is_simple_schema(&enum_prop));
    }

    #[test]
    fn complex_schema_classification() {
        let nested_object = json!({"properties": {"opts": {"type": "object"}}});
        assert!(!is_simple_schema(&nested_object));

        let array_of_object = json!({"properties": {"items": {"type": "array", "items": {"type": "object"}}}});
        assert!(!is_simple_schema(&array_of_object));
    }
}
