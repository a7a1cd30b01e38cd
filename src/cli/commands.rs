//! CLI command implementations
//!
//! `find` builds a throwaway in-memory database from a dataset file, opens a
//! cursor for the query and streams every result as a JSON line, followed by
//! a summary or explain line.

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use serde_json::json;

use crate::config::CursorConfig;
use crate::cursor::CursorFactory;
use crate::index::IndexSpec;
use crate::observability::{Logger, Severity};
use crate::storage::{CollectionOptions, Database};

use super::args::{Cli, Command, FindArgs};
use super::errors::{CliError, CliErrorCode, CliResult};
use super::io::{parse_object_arg, read_documents, write_json_line};

/// Parse arguments and run the selected command
pub fn run() -> CliResult<()> {
    run_command(Cli::parse_args().command)
}

pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Find(args) => {
            if args.verbose {
                Logger::set_min_severity(Severity::Trace);
            }
            let stdout = io::stdout();
            let mut out = stdout.lock();
            find(&args, &mut out)?;
            out.flush()?;
            Ok(())
        }
    }
}

/// Load the cursor configuration, or the defaults without a file
pub fn load_config(path: Option<&Path>) -> CliResult<CursorConfig> {
    let Some(path) = path else {
        return Ok(CursorConfig::default());
    };
    let content = fs::read_to_string(path)
        .map_err(|e| CliError::config_error(format!("Failed to read config: {}", e)))?;
    CursorConfig::from_json_str(&content)
        .map_err(|e| CliError::config_error(format!("Invalid config JSON: {}", e)))
}

/// Run one query and write its results to `out`.
///
/// Returns the number of documents written.
pub fn find(args: &FindArgs, out: &mut impl Write) -> CliResult<u64> {
    let config = load_config(args.config.as_deref())?;
    let query = parse_object_arg("query", &args.query)?;
    let sort = args
        .sort
        .as_deref()
        .map(|text| parse_object_arg("sort", text))
        .transpose()?;

    let db = Arc::new(Database::new());
    db.create_collection(&args.collection, CollectionOptions::normal())?;
    for field in &args.indexes {
        db.ensure_index(&args.collection, IndexSpec::btree(&[field.as_str()]))?;
    }
    for field in &args.geo_indexes {
        db.ensure_index(&args.collection, IndexSpec::geo(field))?;
    }
    for document in read_documents(&args.data)? {
        db.insert(&args.collection, document)?;
    }

    let factory = CursorFactory::new(db, config);
    let Some(mut cursor) = factory.open(&args.collection, &query, sort.as_ref())? else {
        return Err(CliError::new(
            CliErrorCode::QueryFailed,
            "no index can produce the requested order",
        ));
    };

    let mut returned = 0;
    while cursor.ok() {
        write_json_line(out, &cursor.current()?)?;
        returned += 1;
        cursor.advance()?;
    }

    if args.explain {
        write_json_line(out, &json!({ "explain": cursor.explain().to_json() }))?;
    } else {
        write_json_line(
            out,
            &json!({ "returned": returned, "nscanned": cursor.nscanned() }),
        )?;
    }
    Ok(returned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    fn dataset(docs: serde_json::Value) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", docs).unwrap();
        file
    }

    fn args(data: &Path, query: &str) -> FindArgs {
        FindArgs {
            data: data.to_path_buf(),
            collection: "test.data".into(),
            indexes: vec!["a".into()],
            geo_indexes: Vec::new(),
            query: query.into(),
            sort: None,
            explain: false,
            config: None,
            verbose: false,
        }
    }

    #[test]
    fn test_find_writes_results_and_summary() {
        let file = dataset(json!([{"_id": 1, "a": 5}, {"_id": 2, "a": 1}, {"_id": 3, "a": 7}]));
        let mut out = Vec::new();
        let returned = find(&args(file.path(), r#"{"a": {"$gt": 2}}"#), &mut out).unwrap();
        assert_eq!(returned, 2);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[2].contains("\"returned\":2"));
    }

    #[test]
    fn test_find_rejects_bad_query() {
        let file = dataset(json!([]));
        let err = find(&args(file.path(), "[]"), &mut Vec::new()).unwrap_err();
        assert_eq!(err.code(), &CliErrorCode::InvalidArgument);
    }

    #[test]
    fn test_unsatisfiable_sort_fails() {
        let file = dataset(json!([{"b": 1}]));
        let mut find_args = args(file.path(), "{}");
        find_args.sort = Some(r#"{"b": 1}"#.into());
        let err = find(&find_args, &mut Vec::new()).unwrap_err();
        assert_eq!(err.code(), &CliErrorCode::QueryFailed);
    }

    #[test]
    fn test_config_file_is_loaded() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"takeover_threshold": 5}}"#).unwrap();
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.takeover_threshold, 5);

        let mut bad = NamedTempFile::new().unwrap();
        write!(bad, r#"{{"bogus": 1}}"#).unwrap();
        let err = load_config(Some(bad.path())).unwrap_err();
        assert_eq!(err.code(), &CliErrorCode::ConfigError);
    }
}
