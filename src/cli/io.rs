//! JSON I/O handling for CLI
//!
//! - Input: a dataset file holding one JSON array, and JSON arguments
//! - Output: one JSON value per line
//! - UTF-8 only

use std::fs;
use std::io::Write;
use std::path::Path;

use serde_json::Value;

use super::errors::{CliError, CliResult};

/// Read a dataset: a JSON array of documents
pub fn read_documents(path: &Path) -> CliResult<Vec<Value>> {
    let content = fs::read_to_string(path)
        .map_err(|e| CliError::data_error(format!("Failed to read {}: {}", path.display(), e)))?;
    match serde_json::from_str(&content)? {
        Value::Array(docs) => Ok(docs),
        _ => Err(CliError::data_error(format!(
            "{} must hold a JSON array of documents",
            path.display()
        ))),
    }
}

/// Parse a JSON object given on the command line
pub fn parse_object_arg(name: &str, text: &str) -> CliResult<Value> {
    let value: Value = serde_json::from_str(text).map_err(|e| CliError::invalid_argument(name, e))?;
    if !value.is_object() {
        return Err(CliError::invalid_argument(name, "expected a JSON object"));
    }
    Ok(value)
}

/// Write one JSON value as a line
pub fn write_json_line(out: &mut impl Write, value: &Value) -> CliResult<()> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_object_arg() {
        assert_eq!(parse_object_arg("query", r#"{"a": 1}"#).unwrap(), json!({"a": 1}));
        assert!(parse_object_arg("query", "[1]").is_err());
        assert!(parse_object_arg("sort", "{").is_err());
    }

    #[test]
    fn test_write_json_line() {
        let mut out = Vec::new();
        write_json_line(&mut out, &json!({"_id": 1})).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "{\"_id\":1}\n");
    }
}
