use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("HTTP error: {0}")]
    Http(String),

    /// The service answered the initial request with a non-success status.
    #[error("Transport error: status {status}: {response_body}")]
    Transport {
        status: u16,
        request_body: String,
        response_body: String,
    },

    /// A response body or streamed line did not match the expected JSON shape.
    #[error("Decode error: {message} (payload: {payload})")]
    Decode { payload: String, message: String },

    /// The response parsed but carried no choices.
    #[error("Empty result: status {status} returned no choices (body: {body})")]
    EmptyResult { status: u16, body: String },
}

impl CompletionError {
    pub fn status(&self) -> Option<u16> {
        match self {
            CompletionError::Transport { status, .. }
            | CompletionError::EmptyResult { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for CompletionError {
    fn from(err: reqwest::Error) -> Self {
        CompletionError::Http(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CompletionError>;
