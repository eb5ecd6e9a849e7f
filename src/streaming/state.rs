/// Per-request decode bookkeeping, threaded through every generation step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeState {
    /// Full decode of prompt + generated ids as of the last successful step
    pub previous_text: String,
    /// Whitespace held back until a non-whitespace delta arrives; never holds a newline
    pub pending_whitespace: String,
    /// Non-empty deltas seen so far
    pub emitted_count: usize,
}

impl DecodeState {
    pub fn new(prompt_text: String) -> Self {
        Self {
            previous_text: prompt_text,
            pending_whitespace: String::new(),
            emitted_count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFragment {
    pub text: String,
    pub is_final: bool,
}

impl TextFragment {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }
}
