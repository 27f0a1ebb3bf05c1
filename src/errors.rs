use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("CACHE_UNAVAILABLE: {0}")]
    Cache(String),
    #[error("STORE_FAILURE: {0}")]
    Store(String),
    #[error("QUEUE_FAILURE: {0}")]
    Queue(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("INVALID_PATCH: {0}")]
    InvalidPatch(String),
    #[error("CONFIG_INVALID: {0}")]
    Config(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    pub fn poisoned(what: &str) -> Self {
        Self::Internal(format!("{what} mutex poisoned"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Store(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Config(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
