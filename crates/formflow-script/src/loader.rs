//! RON schema loader

use crate::error::{Error, Result};
use crate::mixin::{Mixin, MixinRegistry};
use formflow_core::Schema;
use indexmap::IndexMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Loaded schema definitions
#[derive(Debug, Default)]
pub struct SchemaDefs {
    /// Schemas by name, in load order, with mixins not yet applied
    pub schemas: IndexMap<String, Schema>,
    pub mixins: MixinRegistry,
}

impl SchemaDefs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_schema(&self, name: &str) -> Option<&Schema> {
        self.schemas.get(name)
    }

    /// The named schema with its mixins applied and structure checked
    pub fn compose(&self, name: &str) -> Result<Schema> {
        let schema = self
            .get_schema(name)
            .ok_or_else(|| Error::UnknownSchema(name.to_string()))?;
        self.mixins.compose(schema.clone())
    }
}

/// Loader for RON schema and mixin files
///
/// A file holds either one schema, one mixin, or a list of either:
///
/// ```text
/// (schemas: [ (name: "contact", fields: [...]) ])
/// (mixins:  [ (id: "audit", name: "Audit", fields: [...]) ])
/// ```
pub struct SchemaLoader {
    defs: SchemaDefs,
}

impl SchemaLoader {
    pub fn new() -> Self {
        Self {
            defs: SchemaDefs::new(),
        }
    }

    /// Start from an existing registry, e.g. one with built-in mixins
    pub fn with_mixins(mixins: MixinRegistry) -> Self {
        Self {
            defs: SchemaDefs {
                schemas: IndexMap::new(),
                mixins,
            },
        }
    }

    /// Load a single RON file
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        debug!(file = %path.display(), "loading schema file");

        match first_key(&content) {
            Some("schemas") => self.load_schemas_str(&content),
            Some("mixins") => self.load_mixins_str(&content),
            Some("id") => self.load_mixin_str(&content),
            _ if in_mixin_location(path) => self.load_mixin_str(&content),
            _ => self.load_schema_str(&content),
        }
    }

    /// Load one schema from a RON string
    pub fn load_schema_str(&mut self, content: &str) -> Result<()> {
        let schema: Schema = ron::from_str(content)?;
        self.add_schema(schema)
    }

    /// Load `(schemas: [...])` from a RON string
    pub fn load_schemas_str(&mut self, content: &str) -> Result<()> {
        #[derive(serde::Deserialize)]
        struct SchemaFile {
            schemas: Vec<Schema>,
        }

        let file: SchemaFile = ron::from_str(content)?;
        for schema in file.schemas {
            self.add_schema(schema)?;
        }
        Ok(())
    }

    /// Load one mixin from a RON string
    pub fn load_mixin_str(&mut self, content: &str) -> Result<()> {
        let mixin: Mixin = ron::from_str(content)?;
        self.defs.mixins.register(mixin)
    }

    /// Load `(mixins: [...])` from a RON string
    pub fn load_mixins_str(&mut self, content: &str) -> Result<()> {
        #[derive(serde::Deserialize)]
        struct MixinFile {
            mixins: Vec<Mixin>,
        }

        let file: MixinFile = ron::from_str(content)?;
        for mixin in file.mixins {
            self.defs.mixins.register(mixin)?;
        }
        Ok(())
    }

    fn add_schema(&mut self, schema: Schema) -> Result<()> {
        if self.defs.schemas.contains_key(&schema.name) {
            return Err(Error::DuplicateDefinition(format!("schema '{}'", schema.name)));
        }
        self.defs.schemas.insert(schema.name.clone(), schema);
        Ok(())
    }

    /// Load all RON files under a directory, recursing into subdirectories
    ///
    /// Entries are visited in name order so duplicate errors are stable.
    pub fn load_directory(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if !path.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Not a directory: {:?}", path),
            )));
        }

        let mut entries = fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        entries.sort();

        for file_path in entries {
            if file_path.extension().map(|e| e == "ron").unwrap_or(false) {
                self.load_file(&file_path)?;
            } else if file_path.is_dir() {
                self.load_directory(&file_path)?;
            }
        }

        Ok(())
    }

    /// Finish loading and return the definitions
    pub fn finish(self) -> SchemaDefs {
        self.defs
    }

    /// Definitions loaded so far
    pub fn defs(&self) -> &SchemaDefs {
        &self.defs
    }
}

impl Default for SchemaLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// First struct key of a RON document, skipping line comments
///
/// `(schemas: [...])` yields `schemas`; only a schema-list or mixin-list
/// wrapper and a mixin's `id` are told apart this way.
fn first_key(content: &str) -> Option<&str> {
    let body = skip_comments(content).strip_prefix('(')?;
    let key = skip_comments(body).split(':').next()?.trim();
    key.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
        .then_some(key)
}

fn skip_comments(content: &str) -> &str {
    let mut rest = content.trim_start();
    while rest.starts_with("//") {
        rest = rest.find('\n').map_or("", |i| &rest[i + 1..]).trim_start();
    }
    rest
}

/// Files named `*mixin*` or placed under a `mixins` directory
fn in_mixin_location(path: &Path) -> bool {
    let named = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.contains("mixin"));
    let under = path
        .parent()
        .and_then(|p| p.file_name())
        .is_some_and(|d| d == "mixins");
    named || under
}
