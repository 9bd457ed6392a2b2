use thiserror::Error;

pub type Result<T> = std::result::Result<T, DataError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("Format error: {0}")]
    Format(String),

    #[error("Value '{value}' in column '{column}' is not one of the declared levels")]
    UnknownLevel { column: String, value: String },

    #[error("Column '{column}' has a missing value in row {row}; categorical cells must be observed")]
    MissingLevel { column: String, row: usize },

    #[error("Column '{0}' not found")]
    UnknownColumn(String),

    #[error("Failed to read {path}: {message}")]
    Io { path: String, message: String },
}
