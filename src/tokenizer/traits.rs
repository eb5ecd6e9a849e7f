use anyhow::Result;

/// Type alias for token IDs
pub type TokenIdType = u32;

/// Flags controlling how token ids are turned back into text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    pub skip_special_tokens: bool,
    pub clean_up_tokenization_spaces: bool,
    pub spaces_between_special_tokens: bool,
}

impl DecodeOptions {
    /// The only combination that reconstructs word boundaries correctly when
    /// cumulative decodes are diffed against each other.
    pub const STREAMING: DecodeOptions = DecodeOptions {
        skip_special_tokens: true,
        clean_up_tokenization_spaces: false,
        spaces_between_special_tokens: false,
    };
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self::STREAMING
    }
}

/// Core encoding trait - separate from decoding for modularity
pub trait Encoder: Send + Sync {
    fn encode(&self, input: &str, add_special_tokens: bool) -> Result<Encoding>;
}

/// Core decoding trait - can be implemented independently
pub trait Decoder: Send + Sync {
    fn decode(&self, token_ids: &[TokenIdType], options: DecodeOptions) -> Result<String>;
}

/// Combined tokenizer trait
pub trait Tokenizer: Encoder + Decoder {
    fn vocab_size(&self) -> usize;
    fn get_special_tokens(&self) -> &SpecialTokens;
    fn token_to_id(&self, token: &str) -> Option<TokenIdType>;
    fn id_to_token(&self, id: TokenIdType) -> Option<String>;

    /// Chat template shipped with the tokenizer, if any
    fn chat_template(&self) -> Option<&str> {
        None
    }

    fn eos_token_id(&self) -> Option<TokenIdType> {
        self.get_special_tokens()
            .eos_token
            .as_deref()
            .and_then(|token| self.token_to_id(token))
    }

    /// Padding id; tokenizers without a pad token pad with end-of-sequence
    fn pad_token_id(&self) -> Option<TokenIdType> {
        self.get_special_tokens()
            .pad_token
            .as_deref()
            .and_then(|token| self.token_to_id(token))
            .or_else(|| self.eos_token_id())
    }

    fn is_special_id(&self, id: TokenIdType) -> bool {
        self.id_to_token(id)
            .is_some_and(|token| self.get_special_tokens().contains(&token))
    }
}

/// Contains the results of tokenizing text
#[derive(Debug, Clone)]
pub enum Encoding {
    /// Hugging Face
    Hf(Box<tokenizers::tokenizer::Encoding>),
    /// Sentence Piece
    Sp(Vec<TokenIdType>),
}

impl Encoding {
    /// Returns a reference to token IDs - zero-copy operation
    #[inline]
    pub fn token_ids(&self) -> &[TokenIdType] {
        match self {
            Encoding::Hf(inner) => inner.get_ids(),
            Encoding::Sp(inner) => inner,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SpecialTokens {
    pub bos_token: Option<String>,
    pub eos_token: Option<String>,
    pub unk_token: Option<String>,
    pub pad_token: Option<String>,
    pub additional_special_tokens: Vec<String>,
}

impl SpecialTokens {
    pub fn contains(&self, token: &str) -> bool {
        [
            &self.bos_token,
            &self.eos_token,
            &self.unk_token,
            &self.pad_token,
        ]
        .into_iter()
        .flatten()
        .any(|t| t == token)
            || self.additional_special_tokens.iter().any(|t| t == token)
    }
}
