use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::Path;

use jsonschema::Validator;
use serde_json::Value;

use crate::config::RegistryConfig;
use crate::error::{Result, SchemaError};
use crate::strict::close_objects;
use crate::validator::validate_result;

const SCHEMA_SUFFIX: &str = ".schema.json";

/// Procedure-keyed registry of compiled JSON Schema validators for results.
pub struct SchemaRegistry {
    validators: HashMap<String, Validator>,
    config: RegistryConfig,
}

impl SchemaRegistry {
    /// Create an empty registry with default config.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create an empty registry with explicit config.
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            validators: HashMap::new(),
            config,
        }
    }

    /// Register a result schema for a procedure from a JSON string.
    pub fn register(&mut self, procedure: &str, schema_json: &str) -> Result<()> {
        let schema: Value = serde_json::from_str(schema_json)?;
        self.register_value(procedure, &schema)
    }

    /// Register a result schema for a procedure from a JSON value.
    pub fn register_value(&mut self, procedure: &str, schema: &Value) -> Result<()> {
        let mut schema = schema.clone();
        if self.config.strict_mode {
            close_objects(&mut schema);
        }

        let compiled =
            jsonschema::validator_for(&schema).map_err(|err| SchemaError::CompileFailed {
                procedure: procedure.to_string(),
                message: err.to_string(),
            })?;

        tracing::debug!(procedure, "registered result schema");
        self.validators.insert(procedure.to_string(), compiled);
        Ok(())
    }

    /// Load `<procedure>.schema.json` files from a directory.
    pub fn from_directory(path: &Path) -> Result<Self> {
        Self::from_directory_with_config(path, RegistryConfig::default())
    }

    /// Load `<procedure>.schema.json` files from a directory with explicit config.
    ///
    /// Other files are skipped. Symlinked schema files, unusable procedure
    /// names and files over the size limit are rejected.
    pub fn from_directory_with_config(path: &Path, config: RegistryConfig) -> Result<Self> {
        let mut registry = Self::with_config(config);

        let entries = fs::read_dir(path)
            .map_err(|err| SchemaError::LoadFailed(format!("{}: {err}", path.display())))?;

        for entry in entries {
            let entry = entry.map_err(|err| SchemaError::LoadFailed(err.to_string()))?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some(stem) = file_name.strip_suffix(SCHEMA_SUFFIX) else {
                continue;
            };

            let entry_path = entry.path();
            let file_type = fs::symlink_metadata(&entry_path)
                .map_err(|err| SchemaError::LoadFailed(err.to_string()))?
                .file_type();
            if file_type.is_symlink() {
                return Err(SchemaError::LoadFailed(format!(
                    "refusing to load schema symlink: {file_name}"
                )));
            }
            if !file_type.is_file() {
                continue;
            }
            if !is_procedure_name(stem) {
                return Err(SchemaError::LoadFailed(format!(
                    "schema filename does not name a procedure: {file_name}"
                )));
            }

            if registry.validators.len() >= registry.config.max_schemas_from_directory {
                return Err(SchemaError::LoadFailed(format!(
                    "schema count exceeds configured max ({})",
                    registry.config.max_schemas_from_directory
                )));
            }

            let content = read_limited(&entry_path, registry.config.max_schema_file_size)?;
            registry.register(stem, &content)?;
        }

        Ok(registry)
    }

    /// Load from embedded `(procedure, schema)` pairs.
    pub fn from_embedded(schemas: &[(&str, &str)]) -> Result<Self> {
        let mut registry = Self::new();
        for (procedure, schema) in schemas {
            registry.register(procedure, schema)?;
        }
        Ok(registry)
    }

    /// Validate a procedure result against its schema.
    pub fn validate(&self, procedure: &str, result: &Value) -> Result<()> {
        match self.validators.get(procedure) {
            Some(validator) => validate_result(procedure, result, validator),
            None if self.config.fail_on_missing_schema => {
                Err(SchemaError::NoSchema(procedure.to_string()))
            }
            None => Ok(()),
        }
    }

    /// Check if a procedure has a registered schema.
    pub fn has_schema(&self, procedure: &str) -> bool {
        self.validators.contains_key(procedure)
    }

    /// Procedures that have registered schemas, sorted.
    pub fn procedures(&self) -> Vec<&str> {
        let mut procedures: Vec<&str> = self.validators.keys().map(String::as_str).collect();
        procedures.sort_unstable();
        procedures
    }

    /// Get registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("procedures", &self.procedures())
            .field("config", &self.config)
            .finish()
    }
}

fn is_procedure_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
}

fn read_limited(path: &Path, max_bytes: usize) -> Result<String> {
    let file = fs::File::open(path).map_err(|err| {
        SchemaError::LoadFailed(format!("failed opening schema {}: {err}", path.display()))
    })?;

    let read_limit = u64::try_from(max_bytes.saturating_add(1)).unwrap_or(u64::MAX);
    let mut content = String::new();
    file.take(read_limit)
        .read_to_string(&mut content)
        .map_err(|err| {
            SchemaError::LoadFailed(format!("failed reading schema {}: {err}", path.display()))
        })?;

    if content.len() > max_bytes {
        return Err(SchemaError::LoadFailed(format!(
            "schema file too large (max {max_bytes} bytes): {}",
            path.display()
        )));
    }
    Ok(content)
}
