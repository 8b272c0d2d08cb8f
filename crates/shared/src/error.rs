//! Error types shared across Staffly crates

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SharedError {
    #[error("Invalid {kind}: {value}")]
    InvalidValue { kind: &'static str, value: String },
}

impl SharedError {
    pub fn invalid(kind: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            kind,
            value: value.into(),
        }
    }
}
