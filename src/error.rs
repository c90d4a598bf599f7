//! Error taxonomy for the cursor pipeline.
//!
//! [`CursorError`] covers everything a cursor operation can report. Coercion
//! failures carry a [`TransformError`] describing why a single cell could not
//! be converted; they are scoped to the read that triggered them and never
//! poison the row or the stream.

use thiserror::Error;

pub type Result<T, E = CursorError> = std::result::Result<T, E>;

/// Which side of a column mapping produced an ambiguous match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingSide {
    Source,
    Destination,
}

impl std::fmt::Display for MappingSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MappingSide::Source => write!(f, "source"),
            MappingSide::Destination => write!(f, "destination"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CursorError {
    #[error("Ambiguous column mapping: more than one {side} column matches '{column}'")]
    AmbiguousMapping { column: String, side: MappingSide },

    #[error("Failed to convert column '{column}' (ordinal {ordinal}) value '{value}' to {target}: {source}")]
    Coercion {
        ordinal: usize,
        column: String,
        value: String,
        target: String,
        #[source]
        source: TransformError,
    },

    #[error("Cursor is not positioned on a row")]
    NotPositioned,

    #[error("Column ordinal {ordinal} is out of range for {count} column(s)")]
    OrdinalOutOfRange { ordinal: usize, count: usize },

    #[error("Column '{0}' not found")]
    UnknownColumn(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Source(#[from] anyhow::Error),
}

impl CursorError {
    pub fn is_coercion(&self) -> bool {
        matches!(self, CursorError::Coercion { .. })
    }
}

/// Failure of a single value conversion inside a transform group.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("input '{value}' was not in a correct format for {target}")]
    Format { value: String, target: String },

    #[error("value '{value}' overflows {target}")]
    Overflow { value: String, target: String },

    #[error("no conversion from {from} to {target}")]
    Unsupported { from: String, target: String },
}

impl TransformError {
    pub(crate) fn format(value: impl Into<String>, target: impl Into<String>) -> Self {
        TransformError::Format {
            value: value.into(),
            target: target.into(),
        }
    }

    pub(crate) fn overflow(value: impl Into<String>, target: impl Into<String>) -> Self {
        TransformError::Overflow {
            value: value.into(),
            target: target.into(),
        }
    }
}
