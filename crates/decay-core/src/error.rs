use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecayError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Malformed record for {key}: {reason}")]
    MalformedRecord { key: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Metrics source error: {0}")]
    MetricsSource(String),

    #[error("Attribution error: {0}")]
    Attribution(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DecayError {
    pub fn malformed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        DecayError::MalformedRecord {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
