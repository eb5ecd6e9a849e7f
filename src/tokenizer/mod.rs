use std::{ops::Deref, sync::Arc};

use anyhow::Result;

pub mod chat_template;
pub mod huggingface;
pub mod mock;
pub mod traits;


pub use chat_template::{ChatTemplateProcessor, DEFAULT_CHAT_TEMPLATE};
pub use huggingface::HuggingFaceTokenizer;
pub use traits::{
    DecodeOptions, Decoder, Encoder, Encoding, SpecialTokens, TokenIdType,
    Tokenizer as TokenizerTrait,
};

/// Main tokenizer wrapper that provides a unified interface for different tokenizer implementations
#[derive(Clone)]
pub struct Tokenizer(Arc<dyn traits::Tokenizer>);

impl Tokenizer {
    /// Create a tokenizer from a `tokenizer.json` path with an optional chat template file
    pub fn from_file(file_path: &str, chat_template_path: Option<&str>) -> Result<Tokenizer> {
        let tokenizer =
            HuggingFaceTokenizer::from_file_with_chat_template(file_path, chat_template_path)?;
        Ok(Tokenizer(Arc::new(tokenizer)))
    }

    /// Create a tokenizer from an Arc<dyn Tokenizer>
    pub fn from_arc(tokenizer: Arc<dyn traits::Tokenizer>) -> Self {
        Tokenizer(tokenizer)
    }

    /// Direct encode method
    pub fn encode(&self, input: &str, add_special_tokens: bool) -> Result<Encoding> {
        self.0.encode(input, add_special_tokens)
    }

    /// Direct decode method
    pub fn decode(&self, token_ids: &[u32], options: DecodeOptions) -> Result<String> {
        self.0.decode(token_ids, options)
    }

    /// Get vocabulary size
    pub fn vocab_size(&self) -> usize {
        self.0.vocab_size()
    }

    /// Get special tokens
    pub fn get_special_tokens(&self) -> &SpecialTokens {
        self.0.get_special_tokens()
    }

    pub fn eos_token_id(&self) -> Option<u32> {
        self.0.eos_token_id()
    }

    pub fn pad_token_id(&self) -> Option<u32> {
        self.0.pad_token_id()
    }

    /// Convert token string to ID
    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.0.token_to_id(token)
    }

    /// Convert ID to token string
    pub fn id_to_token(&self, id: u32) -> Option<String> {
        self.0.id_to_token(id)
    }
}

impl Deref for Tokenizer {
    type Target = Arc<dyn traits::Tokenizer>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Arc<dyn traits::Tokenizer>> for Tokenizer {
    fn from(tokenizer: Arc<dyn traits::Tokenizer>) -> Self {
        Tokenizer(tokenizer)
    }
}

/// Undo the spaces word-piece style tokenizers leave before punctuation and
/// English contractions (transformers' `clean_up_tokenization`).
pub fn clean_up_tokenization(text: &str) -> String {
    const REPLACEMENTS: [(&str, &str); 10] = [
        (" .", "."),
        (" ?", "?"),
        (" !", "!"),
        (" ,", ","),
        (" ' ", "'"),
        (" n't", "n't"),
        (" 'm", "'m"),
        (" 's", "'s"),
        (" 've", "'ve"),
        (" 're", "'re"),
    ];

    REPLACEMENTS
        .iter()
        .fold(text.to_string(), |acc, (from, to)| acc.replace(from, to))
}
