use jsonschema::Validator;
use serde_json::Value;

use crate::error::{Result, SchemaError};

/// Most errors folded into one validation message.
const MAX_REPORTED_ERRORS: usize = 4;

pub(crate) fn validate_result(procedure: &str, result: &Value, validator: &Validator) -> Result<()> {
    let messages: Vec<String> = validator
        .iter_errors(result)
        .take(MAX_REPORTED_ERRORS)
        .map(|err| err.to_string())
        .collect();

    if messages.is_empty() {
        return Ok(());
    }

    Err(SchemaError::ValidationFailed {
        procedure: procedure.to_string(),
        message: messages.join("; "),
    })
}
