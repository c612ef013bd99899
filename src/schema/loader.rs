//! Schema loader for reading a database schema from a JSON file

use std::fs;
use std::path::Path;

use super::errors::{SchemaError, SchemaResult};
use super::types::DatabaseSchema;
use crate::observability::{log_event, Event};

/// Loads `DatabaseSchema` definitions from disk.
pub struct SchemaLoader;

impl SchemaLoader {
    /// Reads and validates a schema file.
    pub fn load(path: &Path) -> SchemaResult<DatabaseSchema> {
        let content = fs::read_to_string(path).map_err(|e| {
            SchemaError::malformed(
                path.display().to_string(),
                format!("Failed to read file: {}", e),
            )
        })?;

        let schema = Self::parse(&content).map_err(|e| match e {
            SchemaError::Malformed { reason, .. } => {
                SchemaError::malformed(path.display().to_string(), reason)
            }
            other => other,
        })?;

        let stores = schema.stores.len().to_string();
        log_event(
            Event::SchemaLoaded,
            &[("path", &path.display().to_string()), ("stores", &stores)],
        );
        Ok(schema)
    }

    /// Parses and validates a schema from JSON text.
    pub fn parse(content: &str) -> SchemaResult<DatabaseSchema> {
        let schema: DatabaseSchema = serde_json::from_str(content)
            .map_err(|e| SchemaError::malformed("<input>", format!("Invalid JSON: {}", e)))?;
        schema.validate_structure()?;
        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaCatalog;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"stores": [{{"name": "animals", "key_path": "id", "indexes": [{{"name": "color"}}]}}]}}"#
        )
        .unwrap();

        let schema = SchemaLoader::load(file.path()).unwrap();
        assert!(schema.store("animals").unwrap().has_index("color"));
    }

    #[test]
    fn test_missing_file_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let result = SchemaLoader::load(&dir.path().join("missing.json"));
        assert_eq!(result.unwrap_err().code(), "QUARRY_SCHEMA_MALFORMED");
    }

    #[test]
    fn test_invalid_json_reports_path() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();

        let err = SchemaLoader::load(file.path()).unwrap_err();
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }

    #[test]
    fn test_parse_rejects_duplicate_store() {
        let result = SchemaLoader::parse(r#"{"stores": [{"name": "a"}, {"name": "a"}]}"#);
        assert!(matches!(result, Err(SchemaError::DuplicateStore(_))));
    }
}
