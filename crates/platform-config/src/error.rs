use thiserror::Error;

/// Semantic problems in an otherwise well-formed configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no sign-in method is enabled")]
    NoSignInMethod,

    #[error("google sign-in is enabled but client_id is missing or a placeholder ('{client_id}')")]
    PlaceholderClientId { client_id: String },

    #[error("test phone number '{number}' is not in E.164 format")]
    InvalidPhoneNumber { number: String },

    #[error("index on '{collection}' has {count} field(s); composite indexes need at least two")]
    TooFewFields { collection: String, count: usize },

    #[error("index on '{collection}' lists field '{field}' more than once")]
    DuplicateField { collection: String, field: String },

    #[error("index on '{collection}' is defined more than once")]
    DuplicateIndex { collection: String },

    #[error("empty {what} in index definition")]
    EmptyName { what: &'static str },

    #[error(transparent)]
    Regex(#[from] regex::Error),
}
