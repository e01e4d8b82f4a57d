use thiserror::Error;

/// Errors raised while building field sets or loading configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldsError {
    /// A key position of a flat field list held something other than text.
    #[error("type mismatch: key at position {index} is {found}, expected string")]
    TypeMismatch { index: usize, found: &'static str },

    #[error("invalid log level: {0}")]
    InvalidLevel(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, FieldsError>;
