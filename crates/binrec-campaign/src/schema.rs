use binrec_core::{Error, Result};
use include_dir::{include_dir, Dir};
use jsonschema::JSONSchema;
use serde_json::Value;

static SCHEMAS: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/schemas");

pub const CAMPAIGN_SCHEMA: &str = "campaign_v1.jsonschema";

pub fn schema_names() -> Vec<&'static str> {
    SCHEMAS
        .files()
        .filter_map(|f| f.path().to_str())
        .collect()
}

pub fn compile_schema(name: &str) -> Result<JSONSchema> {
    let file = SCHEMAS
        .get_file(name)
        .ok_or_else(|| Error::not_found("schema", name))?;
    let text = file
        .contents_utf8()
        .ok_or_else(|| Error::invalid(format!("schema {}: not valid utf-8", name)))?;
    let value: Value = serde_json::from_str(text)?;
    JSONSchema::compile(&value).map_err(|e| Error::Schema(format!("{}: {}", name, e)))
}

/// Check a raw campaign document against the campaign schema, reporting
/// every violation at once.
pub fn validate_campaign_document(document: &Value) -> Result<()> {
    let compiled = compile_schema(CAMPAIGN_SCHEMA)?;
    let result = compiled.validate(document);
    if let Err(errors) = result {
        let messages = errors
            .map(|e| {
                let at = e.instance_path.to_string();
                if at.is_empty() {
                    e.to_string()
                } else {
                    format!("{}: {}", at, e)
                }
            })
            .collect::<Vec<_>>();
        return Err(Error::Schema(messages.join("; ")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn embedded_campaign_schema_compiles() {
        assert!(schema_names().contains(&CAMPAIGN_SCHEMA));
        compile_schema(CAMPAIGN_SCHEMA).expect("schema compiles");
        assert!(matches!(
            compile_schema("missing.jsonschema"),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn accepts_full_and_shorthand_documents() {
        let doc = json!({
            "project": "cat",
            "binary": "/bin/cat",
            "setup": ["touch x"],
            "teardown": [],
            "traces": [
                {
                    "name": "basic",
                    "args": ["-n", {"kind": "symbolic", "value": "abc"}],
                    "stdin": "hello",
                    "input_files": ["/tmp/a", {"source": "/tmp/b", "permissions": "644"}],
                    "match_stdout": true,
                    "match_stderr": "^usage"
                },
                {}
            ]
        });
        validate_campaign_document(&doc).expect("valid document");
    }

    #[test]
    fn reports_every_violation() {
        let doc = json!({
            "traces": [
                {"args": [{"kind": "weird"}]},
                {"input_files": [{"source": "/tmp/a", "permissions": "8888"}]},
                {"unexpected": 1}
            ]
        });
        let err = validate_campaign_document(&doc).expect_err("invalid document");
        let msg = err.to_string();
        assert!(msg.contains("/traces/0"), "missing first trace: {}", msg);
        assert!(msg.contains("/traces/1"), "missing second trace: {}", msg);
        assert!(msg.contains("/traces/2"), "missing third trace: {}", msg);
    }

    #[test]
    fn requires_traces_array() {
        assert!(validate_campaign_document(&json!({"project": "x"})).is_err());
        assert!(validate_campaign_document(&json!({"traces": {}})).is_err());
    }
}
