use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `/v2/models/{model}/generate[_stream]`
///
/// Both fields stay loosely typed until the validator has looked at them, so a
/// malformed conversation is reported as invalid input rather than a JSON
/// deserialization error.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerateRequest {
    pub conversation: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<Value>,
}

impl GenerateRequest {
    pub fn new(conversation: Value) -> Self {
        Self {
            conversation,
            max_tokens: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(Value::from(max_tokens));
        self
    }
}

/// One streamed response message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub text_output: String,
    pub is_final: bool,
}

impl GenerateResponse {
    pub fn fragment(text: impl Into<String>) -> Self {
        Self {
            text_output: text.into(),
            is_final: false,
        }
    }

    /// Completion marker: empty text, `is_final` set
    pub fn completion() -> Self {
        Self {
            text_output: String::new(),
            is_final: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
