//! Database schema definitions
//!
//! The compiler only ever reads the schema: store existence, store key path
//! and index existence. Nothing here is mutated after construction.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::errors::{SchemaError, SchemaResult};

/// Index declared on a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSchema {
    /// Index name; also the indexed field unless `key_path` says otherwise
    pub name: String,
    /// Field path the index is built over
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
    #[serde(default)]
    pub unique: bool,
    /// Array values produce one index entry per element
    #[serde(default)]
    pub multi_entry: bool,
}

impl IndexSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: None,
            unique: false,
            multi_entry: false,
        }
    }

    pub fn with_key_path(mut self, key_path: impl Into<String>) -> Self {
        self.key_path = Some(key_path.into());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn multi_entry(mut self) -> Self {
        self.multi_entry = true;
        self
    }

    /// Field path the index covers
    pub fn key_path(&self) -> &str {
        self.key_path.as_deref().unwrap_or(&self.name)
    }
}

/// Object store definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSchema {
    pub name: String,
    /// In-line primary key path; `None` means out-of-line keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
    #[serde(default)]
    pub indexes: Vec<IndexSchema>,
}

impl StoreSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: None,
            indexes: Vec::new(),
        }
    }

    pub fn with_key_path(mut self, key_path: impl Into<String>) -> Self {
        self.key_path = Some(key_path.into());
        self
    }

    pub fn with_index(mut self, index: IndexSchema) -> Self {
        self.indexes.push(index);
        self
    }

    /// Shorthand for adding plain indexes by name
    pub fn with_indexes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indexes
            .extend(names.into_iter().map(|n| IndexSchema::new(n)));
        self
    }

    /// Returns true if an index with this name exists on the store
    pub fn has_index(&self, name: &str) -> bool {
        self.indexes.iter().any(|i| i.name == name)
    }

    pub fn index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// First index built over the field path `field`
    pub fn index_on(&self, field: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|i| i.key_path() == field)
    }

    pub fn index_names(&self) -> Vec<String> {
        self.indexes.iter().map(|i| i.name.clone()).collect()
    }
}

/// Read-only view of a database schema.
pub trait SchemaCatalog {
    /// Look up a store by name
    fn store(&self, name: &str) -> Option<&StoreSchema>;

    /// Store names in declaration order
    fn store_names(&self) -> Vec<String>;

    fn has_store(&self, name: &str) -> bool {
        self.store(name).is_some()
    }
}

/// Full database schema: an ordered list of stores.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSchema {
    #[serde(default)]
    pub stores: Vec<StoreSchema>,
}

impl DatabaseSchema {
    pub fn new(stores: Vec<StoreSchema>) -> SchemaResult<Self> {
        let schema = Self { stores };
        schema.validate_structure()?;
        Ok(schema)
    }

    /// Store and index names must be unique and non-empty.
    pub fn validate_structure(&self) -> SchemaResult<()> {
        let mut seen = HashSet::new();
        for store in &self.stores {
            if store.name.is_empty() {
                return Err(SchemaError::malformed("<schema>", "store name is empty"));
            }
            if !seen.insert(store.name.as_str()) {
                return Err(SchemaError::DuplicateStore(store.name.clone()));
            }
            let mut indexes = HashSet::new();
            for index in &store.indexes {
                if index.name.is_empty() {
                    return Err(SchemaError::malformed(
                        store.name.clone(),
                        "index name is empty",
                    ));
                }
                if !indexes.insert(index.name.as_str()) {
                    return Err(SchemaError::DuplicateIndex {
                        store: store.name.clone(),
                        index: index.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl SchemaCatalog for DatabaseSchema {
    fn store(&self, name: &str) -> Option<&StoreSchema> {
        self.stores.iter().find(|s| s.name == name)
    }

    fn store_names(&self) -> Vec<String> {
        self.stores.iter().map(|s| s.name.clone()).collect()
    }
}
