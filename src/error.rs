//! Request-level failures of the streaming pipeline

use actix_web::http::StatusCode;

/// Everything that can end a request before or during streaming
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Malformed conversation or max_tokens; `index` names the first bad message
    #[error("{}", invalid_input_message(.index, .reason))]
    InvalidInput {
        index: Option<usize>,
        reason: String,
    },

    #[error("Failed to render prompt: {0}")]
    Templating(String),

    #[error("Failed to tokenize prompt: {0}")]
    Tokenization(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    /// A fragment could not be delivered to the client
    #[error("Failed to emit response: {0}")]
    Emission(String),
}

fn invalid_input_message(index: &Option<usize>, reason: &str) -> String {
    match index {
        Some(i) => format!("Invalid conversation at message {}: {}", i, reason),
        None => format!("Invalid input: {}", reason),
    }
}

impl StreamError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        StreamError::InvalidInput {
            index: None,
            reason: reason.into(),
        }
    }

    pub fn invalid_at(index: usize, reason: impl Into<String>) -> Self {
        StreamError::InvalidInput {
            index: Some(index),
            reason: reason.into(),
        }
    }

    /// Metric label for this error
    pub fn kind(&self) -> &'static str {
        match self {
            StreamError::InvalidInput { .. } => "invalid_input",
            StreamError::Templating(_) => "templating",
            StreamError::Tokenization(_) => "tokenization",
            StreamError::Generation(_) => "generation",
            StreamError::Emission(_) => "emission",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            StreamError::InvalidInput { .. } | StreamError::Templating(_) => {
                StatusCode::BAD_REQUEST
            }
            StreamError::Tokenization(_) | StreamError::Emission(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            StreamError::Generation(_) => StatusCode::BAD_GATEWAY,
        }
    }
}
