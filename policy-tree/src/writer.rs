use std::fs;
use std::path::Path;

use serde::Serialize;
use serde_yaml::Value;
use thiserror::Error;

use crate::parser::Format;

/// Errors that can occur while serializing a document.
#[derive(Debug, Error)]
pub enum WriteError {
    /// Failed to serialize YAML.
    #[error("failed to write YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// Failed to serialize JSON.
    #[error("failed to write JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Failed to write output file.
    #[error("failed to write document file: {0}")]
    Io(#[from] std::io::Error),
}

/// Serialize a value as a YAML document or pretty-printed JSON.
pub fn write<T: Serialize>(value: &T, format: Format) -> Result<String, WriteError> {
    match format {
        Format::Yaml => Ok(serde_yaml::to_string(value)?),
        Format::Json => {
            let mut out = serde_json::to_string_pretty(value)?;
            out.push('\n');
            Ok(out)
        }
    }
}

/// Serialize several documents.
///
/// YAML output is a `---` separated stream; JSON output is a single array.
pub fn write_stream<T: Serialize>(values: &[T], format: Format) -> Result<String, WriteError> {
    match format {
        Format::Json => write(&values, Format::Json),
        Format::Yaml => {
            let mut out = String::new();
            for (idx, value) in values.iter().enumerate() {
                if idx > 0 {
                    out.push_str("---\n");
                }
                out.push_str(&serde_yaml::to_string(value)?);
            }
            Ok(out)
        }
    }
}

/// Serialize a value and write it to `path`.
pub fn write_file<T: Serialize>(value: &T, format: Format, path: &Path) -> Result<(), WriteError> {
    let text = write(value, format)?;
    fs::write(path, text)?;
    Ok(())
}

/// Convert any serializable value into a document tree.
pub fn to_tree<T: Serialize>(value: &T) -> Result<Value, WriteError> {
    Ok(serde_yaml::to_value(value)?)
}
