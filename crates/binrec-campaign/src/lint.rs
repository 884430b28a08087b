use binrec_core::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::model::Trace;
use crate::schema::validate_campaign_document;

/// Problems found in one campaign file. An empty `problems` list means
/// the file is a loadable campaign or template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LintReport {
    pub path: PathBuf,
    pub problems: Vec<String>,
}

impl LintReport {
    pub fn ok(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Lint a campaign file, or every `*.json` file directly inside a directory.
pub fn lint_path(path: &Path) -> Result<Vec<LintReport>> {
    if path.is_file() {
        return Ok(vec![lint_file(path)]);
    }
    if !path.is_dir() {
        return Err(Error::not_found("campaign file", path.display()));
    }
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(path).min_depth(1).max_depth(1) {
        let entry = entry.map_err(std::io::Error::from)?;
        let is_json = entry.path().extension().and_then(|e| e.to_str()) == Some("json");
        if entry.file_type().is_file() && is_json {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files.iter().map(|f| lint_file(f)).collect())
}

pub fn lint_file(path: &Path) -> LintReport {
    LintReport {
        path: path.to_path_buf(),
        problems: lint_problems(path),
    }
}

fn lint_problems(path: &Path) -> Vec<String> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) => return vec![format!("unreadable: {}", e)],
    };
    let document: Value = match serde_json::from_slice(&bytes) {
        Ok(v) => v,
        Err(e) => return vec![format!("invalid json: {}", e)],
    };
    if let Err(e) = validate_campaign_document(&document) {
        return match e {
            Error::Schema(msg) => msg.split("; ").map(|s| s.to_string()).collect(),
            other => vec![other.to_string()],
        };
    }

    let mut problems = Vec::new();
    let traces = document
        .get("traces")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for (i, raw) in traces.into_iter().enumerate() {
        let trace: Trace = match serde_json::from_value(raw) {
            Ok(t) => t,
            Err(e) => {
                problems.push(format!("/traces/{}: {}", i, e));
                continue;
            }
        };
        for (j, file) in trace.input_files.iter().enumerate() {
            if file.destination.as_deref().map_or(false, Path::is_absolute) {
                problems.push(format!(
                    "/traces/{}/input_files/{}: destination must be a relative path",
                    i, j
                ));
            }
        }
    }
    problems
}
