use std::path::PathBuf;

use crate::ir::DType;
use crate::pack::OffsetWidth;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure is fatal for the model being compiled.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid tensor sizes, lifetimes or references in the input graph.
    #[error("malformed graph: {entity}: {reason}")]
    MalformedGraph { entity: String, reason: String },

    /// No kernel in the capability table matches the node.
    #[error("unresolved operator #{index} '{name}' ({op_type}, {dtype:?})")]
    UnresolvedOperator {
        index: usize,
        name: String,
        op_type: String,
        dtype: DType,
    },

    /// A packed offset or length does not fit the configured width.
    #[error("packing overflow: field '{field}' value {value} exceeds {width} offsets")]
    PackingOverflow {
        field: String,
        value: u64,
        width: OffsetWidth,
    },

    /// A record value does not match its schema.
    #[error("record mismatch: field '{field}' expected {expected}")]
    RecordMismatch { field: String, expected: String },

    /// Packed bytes could not be read back.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Generated tokens did not form a valid Rust file.
    #[error("codegen: {0}")]
    Codegen(String),
}

impl Error {
    pub(crate) fn malformed(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MalformedGraph {
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
