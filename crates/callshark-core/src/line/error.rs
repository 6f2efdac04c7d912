use thiserror::Error;

/// Reasons a descriptor line could not be turned into a packet record.
#[derive(Debug, Error, PartialEq)]
pub enum LineError {
    #[error("line too short: need {needed} tokens, got {actual}")]
    TooShort { needed: usize, actual: usize },
    #[error("invalid {field} token '{token}'")]
    InvalidNumber { field: &'static str, token: String },
    #[error("invalid {field} address token '{token}'")]
    InvalidAddress { field: &'static str, token: String },
}
