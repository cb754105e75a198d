use thiserror::Error;

/// Error type shared by every plater package
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A config value parsed but is out of range
    #[error("Invalid config value for {key}: {reason}")]
    InvalidConfig { key: &'static str, reason: String },
}

pub type CommonResult<T> = Result<T, CommonError>;

impl CommonError {
    pub fn invalid_config(key: &'static str, reason: impl Into<String>) -> Self {
        CommonError::InvalidConfig {
            key,
            reason: reason.into(),
        }
    }
}
