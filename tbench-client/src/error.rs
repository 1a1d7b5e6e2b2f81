use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Collector answered {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("Collector returned an invalid run id: '{0}'")]
    InvalidRunId(String),
    #[error("Invalid collector URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ClientError>;
