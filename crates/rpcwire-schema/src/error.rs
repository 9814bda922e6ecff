/// Errors that can occur during schema loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The schema file could not be loaded.
    #[error("failed to load schema: {0}")]
    LoadFailed(String),

    /// The schema could not be compiled.
    #[error("failed to compile schema for {procedure}: {message}")]
    CompileFailed { procedure: String, message: String },

    /// A result failed schema validation.
    #[error("result of {procedure} violates its schema: {message}")]
    ValidationFailed { procedure: String, message: String },

    /// The schema text is not valid JSON.
    #[error("schema is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// No schema registered for the procedure.
    #[error("no schema registered for procedure {0}")]
    NoSchema(String),
}

pub type Result<T> = std::result::Result<T, SchemaError>;
