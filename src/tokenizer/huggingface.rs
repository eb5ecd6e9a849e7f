use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

use anyhow::{Error, Result};
use tokenizers::tokenizer::Tokenizer as HfTokenizer;
use tracing::debug;

use super::{
    clean_up_tokenization,
    traits::{
        DecodeOptions, Decoder, Encoder, Encoding, SpecialTokens, TokenIdType,
        Tokenizer as TokenizerTrait,
    },
};

/// HuggingFace tokenizer wrapper
pub struct HuggingFaceTokenizer {
    tokenizer: HfTokenizer,
    special_tokens: SpecialTokens,
    special_ids: HashSet<TokenIdType>,
    vocab: HashMap<String, TokenIdType>,
    reverse_vocab: HashMap<TokenIdType, String>,
    chat_template: Option<String>,
}

/// Settings read from the `tokenizer_config.json` sitting next to `tokenizer.json`
#[derive(Debug, Default)]
struct TokenizerConfigFile {
    chat_template: Option<String>,
    bos_token: Option<String>,
    eos_token: Option<String>,
    pad_token: Option<String>,
}

impl HuggingFaceTokenizer {
    /// Create a tokenizer from a HuggingFace tokenizer JSON file
    pub fn from_file(file_path: &str) -> Result<Self> {
        Self::from_file_with_chat_template(file_path, None)
    }

    /// Create a tokenizer from a HuggingFace tokenizer JSON file with an optional chat template
    pub fn from_file_with_chat_template(
        file_path: &str,
        chat_template_path: Option<&str>,
    ) -> Result<Self> {
        let tokenizer = HfTokenizer::from_file(file_path)
            .map_err(|e| Error::msg(format!("Failed to load tokenizer: {}", e)))?;

        let config = Self::load_tokenizer_config(file_path);
        let mut special_tokens = Self::extract_special_tokens(&tokenizer);
        // tokenizer_config.json is authoritative when it names the tokens
        if config.bos_token.is_some() {
            special_tokens.bos_token = config.bos_token.clone();
        }
        if config.eos_token.is_some() {
            special_tokens.eos_token = config.eos_token.clone();
        }
        if config.pad_token.is_some() {
            special_tokens.pad_token = config.pad_token.clone();
        }

        let chat_template = match chat_template_path {
            Some(template_path) => Some(Self::load_chat_template_from_file(template_path)?),
            None => config.chat_template,
        };

        let mut this = Self::from_tokenizer(tokenizer);
        this.special_tokens = special_tokens;
        this.chat_template = chat_template;

        debug!(
            path = file_path,
            vocab_size = this.vocab.len(),
            eos = ?this.special_tokens.eos_token,
            has_chat_template = this.chat_template.is_some(),
            "Loaded HuggingFace tokenizer"
        );

        Ok(this)
    }

    /// Create from an existing HuggingFace tokenizer
    pub fn from_tokenizer(tokenizer: HfTokenizer) -> Self {
        let special_tokens = Self::extract_special_tokens(&tokenizer);
        let vocab = tokenizer.get_vocab(true);
        let reverse_vocab: HashMap<TokenIdType, String> = vocab
            .iter()
            .map(|(token, &id)| (id, token.clone()))
            .collect();
        let special_ids = tokenizer
            .get_added_tokens_decoder()
            .iter()
            .filter(|(_id, token)| token.special)
            .map(|(id, _token)| *id)
            .collect();

        HuggingFaceTokenizer {
            tokenizer,
            special_tokens,
            special_ids,
            vocab,
            reverse_vocab,
            chat_template: None,
        }
    }

    /// Extract special tokens from the tokenizer
    fn extract_special_tokens(tokenizer: &HfTokenizer) -> SpecialTokens {
        let vocab = tokenizer.get_vocab(true);

        let find_token = |patterns: &[&str]| -> Option<String> {
            patterns
                .iter()
                .find(|pattern| vocab.contains_key(**pattern))
                .map(|pattern| pattern.to_string())
        };

        let additional_special_tokens: Vec<String> = tokenizer
            .get_added_tokens_decoder()
            .iter()
            .filter(|(_id, token)| token.special)
            .map(|(_id, token)| token.content.clone())
            .collect();

        SpecialTokens {
            bos_token: find_token(&["<s>", "<|startoftext|>", "<BOS>", "[CLS]"]),
            eos_token: find_token(&["</s>", "<|endoftext|>", "<EOS>", "[SEP]"]),
            unk_token: find_token(&["<unk>", "<UNK>", "[UNK]"]),
            pad_token: find_token(&["<pad>", "<PAD>", "[PAD]"]),
            additional_special_tokens,
        }
    }

    fn load_tokenizer_config(tokenizer_path: &str) -> TokenizerConfigFile {
        (|| {
            let config_path = Path::new(tokenizer_path)
                .parent()?
                .join("tokenizer_config.json");
            let content = std::fs::read_to_string(config_path).ok()?;
            let config: serde_json::Value = serde_json::from_str(&content).ok()?;

            // Special tokens are either plain strings or {"content": "..."} objects
            let token_field = |name: &str| -> Option<String> {
                let value = config.get(name)?;
                value
                    .as_str()
                    .or_else(|| value.get("content").and_then(|c| c.as_str()))
                    .map(str::to_string)
            };

            Some(TokenizerConfigFile {
                chat_template: config
                    .get("chat_template")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                bos_token: token_field("bos_token"),
                eos_token: token_field("eos_token"),
                pad_token: token_field("pad_token"),
            })
        })()
        .unwrap_or_default()
    }

    /// Load chat template from a file (.jinja or .json containing Jinja)
    fn load_chat_template_from_file(template_path: &str) -> Result<String> {
        let content = std::fs::read_to_string(template_path)
            .map_err(|e| Error::msg(format!("Failed to read chat template file: {}", e)))?;

        if template_path.ends_with(".json") {
            let json_value: serde_json::Value = serde_json::from_str(&content)
                .map_err(|e| Error::msg(format!("Failed to parse chat template JSON: {}", e)))?;

            return json_value
                .as_str()
                .or_else(|| json_value.get("chat_template").and_then(|v| v.as_str()))
                .map(str::to_string)
                .ok_or_else(|| Error::msg("chat template JSON does not contain a valid template"));
        }

        Ok(content.trim().replace("\\n", "\n"))
    }

    /// Set or override the chat template
    pub fn set_chat_template(&mut self, template: String) {
        self.chat_template = Some(template);
    }

    /// Decode runs of ordinary tokens separately from special tokens and join
    /// every piece with a single space.
    fn decode_spaced_specials(&self, token_ids: &[TokenIdType]) -> Result<String> {
        let mut pieces: Vec<String> = Vec::new();
        let mut run: Vec<TokenIdType> = Vec::new();

        for &id in token_ids {
            if self.special_ids.contains(&id) {
                if !run.is_empty() {
                    pieces.push(self.raw_decode(&run, false)?);
                    run.clear();
                }
                if let Some(token) = self.reverse_vocab.get(&id) {
                    pieces.push(token.clone());
                }
            } else {
                run.push(id);
            }
        }
        if !run.is_empty() {
            pieces.push(self.raw_decode(&run, false)?);
        }

        Ok(pieces.join(" "))
    }

    fn raw_decode(&self, token_ids: &[TokenIdType], skip_special_tokens: bool) -> Result<String> {
        self.tokenizer
            .decode(token_ids, skip_special_tokens)
            .map_err(|e| Error::msg(format!("Decoding failed: {}", e)))
    }
}

impl Encoder for HuggingFaceTokenizer {
    fn encode(&self, input: &str, add_special_tokens: bool) -> Result<Encoding> {
        self.tokenizer
            .encode(input, add_special_tokens)
            .map_err(|e| Error::msg(format!("Encoding failed: {}", e)))
            .map(|encoding| Encoding::Hf(Box::new(encoding)))
    }
}

impl Decoder for HuggingFaceTokenizer {
    fn decode(&self, token_ids: &[TokenIdType], options: DecodeOptions) -> Result<String> {
        let keeps_specials = !options.skip_special_tokens
            && token_ids.iter().any(|id| self.special_ids.contains(id));

        let text = if keeps_specials && options.spaces_between_special_tokens {
            self.decode_spaced_specials(token_ids)?
        } else {
            self.raw_decode(token_ids, options.skip_special_tokens)?
        };

        Ok(if options.clean_up_tokenization_spaces {
            clean_up_tokenization(&text)
        } else {
            text
        })
    }
}

impl TokenizerTrait for HuggingFaceTokenizer {
    fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(false)
    }

    fn get_special_tokens(&self) -> &SpecialTokens {
        &self.special_tokens
    }

    fn token_to_id(&self, token: &str) -> Option<TokenIdType> {
        self.vocab.get(token).copied()
    }

    fn id_to_token(&self, id: TokenIdType) -> Option<String> {
        self.reverse_vocab.get(&id).cloned()
    }

    fn chat_template(&self) -> Option<&str> {
        self.chat_template.as_deref()
    }

    fn is_special_id(&self, id: TokenIdType) -> bool {
        self.special_ids.contains(&id)
    }
}
