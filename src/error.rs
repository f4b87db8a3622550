use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("API error: {0}")]
    Api(String),

    #[error("no source feed configured: {0}")]
    NoSource(String),

    #[error("transcode failure: {0}")]
    TranscodeFailure(String),

    #[error("unknown recipient: {0}")]
    UnknownRecipient(String),

    #[error("attachment too large: {0}")]
    AttachmentTooLarge(String),

    #[error("invalid step: {0}")]
    InvalidStep(String),

    #[error("stale state: {0}")]
    StaleState(String),

    #[error("webhook failure: {0}")]
    WebhookFailure(String),

    #[error("ingestion error: {0}")]
    Ingestion(String),

    #[error("streaming error: {0}")]
    Streaming(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
