//! Input validation against node schemas

use crate::error::{RawError, Result};
use crate::nodes::{InputKind, NodeSchema};
use serde_json::Value;

/// Validate node inputs against the node's declared widgets
///
/// File inputs are required; every other input falls back to its default.
/// Combo values are not checked against their options, unknown keys resolve
/// to the table default at decode time.
pub fn validate_inputs(inputs: &Value, schema: &NodeSchema) -> Result<()> {
    let obj = inputs
        .as_object()
        .ok_or_else(|| RawError::Validation("Inputs must be a JSON object".to_string()))?;

    for spec in &schema.inputs {
        match obj.get(&spec.name) {
            Some(value) => validate_value(&spec.name, value, &spec.kind)?,
            None if matches!(spec.kind, InputKind::File { .. }) => {
                return Err(RawError::Validation(format!("Missing required field: {}", spec.name)));
            }
            None => {}
        }
    }

    Ok(())
}

fn validate_value(name: &str, value: &Value, kind: &InputKind) -> Result<()> {
    let mismatch = |expected: &str| {
        RawError::Validation(format!("Type mismatch for {}: expected {}, got {}", name, expected, value))
    };

    match kind {
        InputKind::File { .. } | InputKind::Combo { .. } => {
            value.as_str().ok_or_else(|| mismatch("string"))?;
        }
        InputKind::Boolean { .. } => {
            value.as_bool().ok_or_else(|| mismatch("boolean"))?;
        }
        InputKind::Float { min, max, .. } => {
            let v = value.as_f64().ok_or_else(|| mismatch("number"))?;
            check_range(name, v, *min, *max)?;
        }
        InputKind::Int { min, max, .. } => {
            let v = value.as_i64().ok_or_else(|| mismatch("integer"))?;
            check_range(name, v as f64, *min as f64, *max as f64)?;
        }
    }

    Ok(())
}

fn check_range(name: &str, value: f64, min: f64, max: f64) -> Result<()> {
    if value < min || value > max {
        return Err(RawError::Validation(format!(
            "{} = {} is outside [{}, {}]",
            name, value, min, max
        )));
    }
    Ok(())
}
