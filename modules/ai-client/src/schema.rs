use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;

/// Types that can be requested as strict-JSON model output.
///
/// Automatically implemented for any `JsonSchema + DeserializeOwned` type.
/// The generated schema is embedded in the prompt so JSON-mode models
/// know the exact expected shape.
pub trait StructuredOutput: JsonSchema + DeserializeOwned {
    fn json_schema() -> serde_json::Value {
        let schema = schema_for!(Self);
        let mut value = serde_json::to_value(schema).unwrap_or_default();
        if let serde_json::Value::Object(map) = &mut value {
            map.remove("$schema");
        }
        value
    }

    /// Parse model output, tolerating markdown code fences.
    fn parse_output(raw: &str) -> anyhow::Result<Self> {
        let trimmed = strip_fences(raw);
        Ok(serde_json::from_str(trimmed)?)
    }
}

impl<T: JsonSchema + DeserializeOwned> StructuredOutput for T {}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(body) = trimmed.strip_prefix("```json") {
        return body.trim_end_matches("```").trim();
    }
    if let Some(body) = trimmed.strip_prefix("```") {
        return body.trim_end_matches("```").trim();
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, JsonSchema, PartialEq)]
    struct Sample {
        value: i32,
    }

    #[test]
    fn parses_plain_json() {
        let parsed = Sample::parse_output("{\"value\": 3}").unwrap();
        assert_eq!(parsed, Sample { value: 3 });
    }

    #[test]
    fn parses_fenced_json() {
        let parsed = Sample::parse_output("```json\n{\"value\": 7}\n```").unwrap();
        assert_eq!(parsed, Sample { value: 7 });
    }

    #[test]
    fn rejects_non_json() {
        assert!(Sample::parse_output("NOT-JSON").is_err());
    }

    #[test]
    fn schema_names_properties() {
        let schema = Sample::json_schema();
        assert!(schema["properties"]["value"].is_object());
    }
}
