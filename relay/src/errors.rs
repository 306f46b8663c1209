use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("Publish not acknowledged within {0}ms")]
    PublishTimeout(u64),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Base64 decoding error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("UTF-8 decoding error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Limit(#[from] std::num::ParseIntError),

    #[error("Channel closed")]
    ChannelClosed,
}

impl Error {
    /// True for failures caused by the message content itself. Redelivering
    /// such a message can never succeed.
    pub fn is_poison(&self) -> bool {
        matches!(
            self,
            Error::Json(_) | Error::Base64(_) | Error::Utf8(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poison_errors() {
        assert!(Error::Base64(base64::DecodeError::InvalidLength(3)).is_poison());
        assert!(!Error::ChannelClosed.is_poison());
        assert!(!Error::PublishTimeout(10).is_poison());
    }

    #[test]
    fn test_limit_error_message_is_bare() {
        let err: Error = "abc".parse::<usize>().unwrap_err().into();
        assert_eq!(err.to_string(), "invalid digit found in string");
    }
}
