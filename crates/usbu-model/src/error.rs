//! Error types for the snapshot model

use thiserror::Error;

/// Errors raised while interpreting model values
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Text is not a 16-bit hexadecimal USB identifier
    #[error("invalid USB identifier: {0:?}")]
    InvalidUsbId(String),
}
