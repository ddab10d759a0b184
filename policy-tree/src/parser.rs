use std::fmt::{self, Display, Formatter};
use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_yaml::Value;
use thiserror::Error;

/// Textual format of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Yaml,
}

impl Format {
    /// Guess the format from the first significant byte.
    ///
    /// Input opening with `{` or `[` is treated as JSON; everything else as YAML.
    pub fn sniff(bytes: &[u8]) -> Self {
        let first = bytes
            .strip_prefix(b"\xEF\xBB\xBF")
            .unwrap_or(bytes)
            .iter()
            .copied()
            .find(|b| !b.is_ascii_whitespace());
        match first {
            Some(b'{') | Some(b'[') => Format::Json,
            _ => Format::Yaml,
        }
    }
}

impl Display for Format {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Format::Json => write!(f, "JSON"),
            Format::Yaml => write!(f, "YAML"),
        }
    }
}

/// Errors that can occur while parsing a document into a [`Value`] tree.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Input was not well-formed JSON/YAML.
    #[error("{format} syntax error: {message}")]
    Syntax {
        format: Format,
        message: String,
        /// One-based line of the failure, when the parser reports it.
        line: Option<usize>,
        /// One-based column of the failure, when the parser reports it.
        column: Option<usize>,
    },
    /// Input bytes were not valid UTF-8.
    #[error("invalid UTF-8 in document: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    /// Failed to read input file.
    #[error("failed to read document file: {0}")]
    Io(#[from] std::io::Error),
}

impl ParseError {
    /// Line/column of a syntax error, if known.
    pub fn position(&self) -> Option<(usize, usize)> {
        match self {
            ParseError::Syntax {
                line: Some(line),
                column: Some(column),
                ..
            } => Some((*line, *column)),
            _ => None,
        }
    }
}

/// Parse one JSON or YAML document into a [`Value`] tree.
///
/// Empty input parses as [`Value::Null`]. YAML input holding more than one
/// document is rejected; use [`parse_stream`] for streams.
pub fn parse(bytes: &[u8]) -> Result<Value, ParseError> {
    let text = std::str::from_utf8(bytes)?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }

    match Format::sniff(bytes) {
        Format::Json => match serde_json::from_str::<Value>(text) {
            Ok(value) => Ok(value),
            // Flow-style YAML also opens with `{` or `[`.
            Err(json_err) => serde_yaml::from_str::<Value>(text).map_err(|_| json_error(&json_err)),
        },
        Format::Yaml => serde_yaml::from_str::<Value>(text).map_err(|err| yaml_error(&err)),
    }
}

/// Parse a JSON document or a `---` separated YAML stream.
///
/// Always returns at least one document.
pub fn parse_stream(bytes: &[u8]) -> Result<Vec<Value>, ParseError> {
    if Format::sniff(bytes) == Format::Json {
        return parse(bytes).map(|value| vec![value]);
    }

    let text = std::str::from_utf8(bytes)?;
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        documents.push(Value::deserialize(document).map_err(|err| yaml_error(&err))?);
    }
    if documents.is_empty() {
        documents.push(Value::Null);
    }
    Ok(documents)
}

/// Parse a single-document file into a [`Value`] tree.
pub fn parse_file(path: &Path) -> Result<Value, ParseError> {
    let bytes = fs::read(path)?;
    parse(&bytes)
}

fn yaml_error(err: &serde_yaml::Error) -> ParseError {
    let location = err.location();
    ParseError::Syntax {
        format: Format::Yaml,
        message: err.to_string(),
        line: location.as_ref().map(|l| l.line()),
        column: location.as_ref().map(|l| l.column()),
    }
}

fn json_error(err: &serde_json::Error) -> ParseError {
    // serde_json reports line 0 when no position is known.
    let known = err.line() > 0;
    ParseError::Syntax {
        format: Format::Json,
        message: err.to_string(),
        line: known.then(|| err.line()),
        column: known.then(|| err.column()),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse, parse_stream, Format, ParseError};

    #[test]
    fn sniffs_json_and_yaml() {
        assert_eq!(Format::sniff(b"  [1, 2]"), Format::Json);
        assert_eq!(Format::sniff(b"\n{\"a\": 1}"), Format::Json);
        assert_eq!(Format::sniff(b"a: 1"), Format::Yaml);
        assert_eq!(Format::sniff(b""), Format::Yaml);
    }

    #[test]
    fn empty_input_is_null() {
        assert!(parse(b"  \n").expect("parse").is_null());
    }

    #[test]
    fn json_error_carries_position() {
        let err = parse(b"{\n  \"a\": [1, 2,\n}").expect_err("should fail");
        assert!(matches!(err, ParseError::Syntax { .. }));
        assert!(err.position().is_some());
    }

    #[test]
    fn stream_yields_each_document() {
        let docs = parse_stream(b"a: 1\n---\nb: 2\n").expect("stream");
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].get("b").and_then(|v| v.as_u64()), Some(2));
    }

    #[test]
    fn single_parse_rejects_stream() {
        assert!(parse(b"a: 1\n---\nb: 2\n").is_err());
    }
}
