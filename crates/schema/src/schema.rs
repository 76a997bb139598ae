//! JSON schema definitions for externally produced documents.

/// JSON Schema for the narrative interpretation returned by the LLM service.
pub const NARRATIVE_SCHEMA: &str = r#"{
  "$schema": "http://json-schema.org/draft-07/schema#",
  "$id": "https://repolens.dev/schemas/narrative.json",
  "title": "RepoLens Narrative Summary",
  "type": "object",
  "required": ["summary", "strengths", "weaknesses", "recommendations", "readiness"],
  "properties": {
    "summary": { "type": "string", "minLength": 1 },
    "strengths": { "type": "array", "items": { "type": "string" } },
    "weaknesses": { "type": "array", "items": { "type": "string" } },
    "recommendations": { "type": "array", "items": { "type": "string" } },
    "readiness": { "type": "string", "enum": ["Ready", "Needs Work", "Not Ready"] }
  }
}"#;

/// JSON Schema for raw analyzer output: a flat object or a table of entries.
pub const METRICS_SCHEMA: &str = r#"{
  "$schema": "http://json-schema.org/draft-07/schema#",
  "$id": "https://repolens.dev/schemas/metrics.json",
  "title": "RepoLens Metrics Document",
  "oneOf": [
    {
      "type": "object",
      "additionalProperties": { "type": ["boolean", "number", "string", "null"] }
    },
    {
      "type": "array",
      "items": {
        "type": "object",
        "required": ["name"],
        "properties": {
          "name": { "type": "string" },
          "id": { "type": ["string", "null"] },
          "result": {}
        }
      }
    }
  ]
}"#;

/// Parse the narrative schema.
pub fn narrative_schema() -> serde_json::Result<serde_json::Value> {
    serde_json::from_str(NARRATIVE_SCHEMA)
}

/// Parse the metrics schema.
pub fn metrics_schema() -> serde_json::Result<serde_json::Value> {
    serde_json::from_str(METRICS_SCHEMA)
}
