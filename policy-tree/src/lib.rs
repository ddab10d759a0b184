//! Generic JSON/YAML document primitives used by higher-level policy tools.
//!
//! Documents are held as [`serde_yaml::Value`] trees, which keep mapping keys
//! in the order they were written. On top of that this crate offers:
//!
//! - [`parse`], [`parse_stream`] and [`parse_file`] with positioned syntax errors
//! - [`NodePath`] for addressing nodes (`ingress[2].toPorts[0]`)
//! - [`TreeExt`] for lookups and document-order positions
//! - [`write`] and [`write_file`] for YAML/JSON output, including YAML streams

pub mod parser;
pub mod path;
pub mod tree;
pub mod writer;

pub use parser::{parse, parse_file, parse_stream, Format, ParseError};
pub use path::{NodePath, Segment};
pub use serde_yaml::{Mapping, Value};
pub use tree::TreeExt;
pub use writer::{to_tree, write, write_file, write_stream, WriteError};
