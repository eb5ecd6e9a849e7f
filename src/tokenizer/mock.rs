//! Mock tokenizer implementation for testing
//!
//! Behaves like a small SentencePiece/Llama tokenizer: pieces carry `▁` as the
//! word-boundary marker, `<0x0A>` is the newline byte piece, and the decoder
//! strips exactly one leading space from the decoded string.

use std::collections::HashMap;

use anyhow::Result;

use super::{
    clean_up_tokenization,
    traits::{DecodeOptions, Decoder, Encoder, Encoding, SpecialTokens, Tokenizer as TokenizerTrait},
};

const SPACE_MARKER: char = '\u{2581}';

pub const UNK_ID: u32 = 0;
pub const BOS_ID: u32 = 1;
pub const EOS_ID: u32 = 2;
pub const INST_ID: u32 = 3;
pub const INST_END_ID: u32 = 4;

/// Mock tokenizer for testing purposes
pub struct MockTokenizer {
    vocab: HashMap<String, u32>,
    reverse_vocab: HashMap<u32, String>,
    special_tokens: SpecialTokens,
    chat_template: Option<String>,
}

impl Default for MockTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTokenizer {
    pub fn new() -> Self {
        let mut vocab = HashMap::new();
        let mut reverse_vocab = HashMap::new();

        let tokens = [
            ("<unk>", UNK_ID),
            ("<s>", BOS_ID),
            ("</s>", EOS_ID),
            ("[INST]", INST_ID),
            ("[/INST]", INST_END_ID),
            ("▁Hello", 10),
            ("!", 11),
            ("▁The", 12),
            ("▁sky", 13),
            ("▁is", 14),
            ("▁blue", 15),
            (".", 16),
            ("<0x0A>", 17),
            ("▁", 18),
            ("▁Hi", 19),
            ("▁world", 20),
            ("▁How", 21),
            ("▁are", 22),
            ("▁you", 23),
            ("?", 24),
            ("▁▁", 25),
            (",", 26),
            ("▁Why", 27),
        ];

        for (token, id) in tokens {
            vocab.insert(token.to_string(), id);
            reverse_vocab.insert(id, token.to_string());
        }

        let special_tokens = SpecialTokens {
            bos_token: Some("<s>".to_string()),
            eos_token: Some("</s>".to_string()),
            unk_token: Some("<unk>".to_string()),
            pad_token: None,
            additional_special_tokens: vec!["[INST]".to_string(), "[/INST]".to_string()],
        };

        Self {
            vocab,
            reverse_vocab,
            special_tokens,
            chat_template: None,
        }
    }

    pub fn with_chat_template(mut self, template: impl Into<String>) -> Self {
        self.chat_template = Some(template.into());
        self
    }

    fn render_piece(piece: &str) -> String {
        if piece == "<0x0A>" {
            "\n".to_string()
        } else {
            piece.replace(SPACE_MARKER, " ")
        }
    }

    fn lookup_word(&self, word: &str) -> u32 {
        if self.special_tokens.contains(word) {
            return self.vocab.get(word).copied().unwrap_or(UNK_ID);
        }
        let marked = format!("{}{}", SPACE_MARKER, word);
        self.vocab
            .get(&marked)
            .or_else(|| self.vocab.get(word))
            .copied()
            .unwrap_or(UNK_ID)
    }
}

impl Encoder for MockTokenizer {
    fn encode(&self, input: &str, add_special_tokens: bool) -> Result<Encoding> {
        // Whitespace-separated words; every word is looked up with its boundary
        // marker first, punctuation falls back to the bare piece.
        let mut tokens = Vec::new();
        if add_special_tokens {
            tokens.push(BOS_ID);
        }
        for (line_no, line) in input.split('\n').enumerate() {
            if line_no > 0 {
                tokens.push(17);
            }
            // Special tokens are matched even when glued to neighbouring text
            let spaced = ["<s>", "</s>", "[INST]", "[/INST]"]
                .iter()
                .fold(line.to_string(), |acc, special| {
                    acc.replace(special, &format!(" {} ", special))
                });
            tokens.extend(spaced.split_whitespace().map(|word| self.lookup_word(word)));
        }

        Ok(Encoding::Sp(tokens))
    }
}

impl Decoder for MockTokenizer {
    fn decode(&self, token_ids: &[u32], options: DecodeOptions) -> Result<String> {
        let mut text = String::new();

        for id in token_ids {
            let Some(piece) = self.reverse_vocab.get(id) else {
                continue;
            };
            if self.special_tokens.contains(piece) {
                if options.skip_special_tokens {
                    continue;
                }
                if options.spaces_between_special_tokens && !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(piece);
                if options.spaces_between_special_tokens {
                    text.push(' ');
                }
                continue;
            }
            text.push_str(&Self::render_piece(piece));
        }

        // Strip(start=1) decoder step
        if text.starts_with(' ') {
            text.remove(0);
        }

        Ok(if options.clean_up_tokenization_spaces {
            clean_up_tokenization(&text)
        } else {
            text
        })
    }
}

impl TokenizerTrait for MockTokenizer {
    fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    fn get_special_tokens(&self) -> &SpecialTokens {
        &self.special_tokens
    }

    fn token_to_id(&self, token: &str) -> Option<u32> {
        self.vocab.get(token).copied()
    }

    fn id_to_token(&self, id: u32) -> Option<String> {
        self.reverse_vocab.get(&id).cloned()
    }

    fn chat_template(&self) -> Option<&str> {
        self.chat_template.as_deref()
    }
}

/// Tokenizer whose decode is the plain concatenation of fixed pieces
///
/// Lets tests pin the exact cumulative decode of every prefix. Encoding is
/// greedy longest-piece matching; decoding fails when a `fail_on` id is present.
pub struct ScriptedTokenizer {
    pieces: HashMap<u32, String>,
    special_tokens: SpecialTokens,
    fail_on: Option<u32>,
}

impl ScriptedTokenizer {
    /// `<s>` is id 1 and `</s>` is id 2; `pieces` supplies everything else.
    pub fn new(pieces: &[(u32, &str)]) -> Self {
        let mut map: HashMap<u32, String> = pieces
            .iter()
            .map(|(id, piece)| (*id, piece.to_string()))
            .collect();
        map.insert(BOS_ID, "<s>".to_string());
        map.insert(EOS_ID, "</s>".to_string());

        Self {
            pieces: map,
            special_tokens: SpecialTokens {
                bos_token: Some("<s>".to_string()),
                eos_token: Some("</s>".to_string()),
                ..Default::default()
            },
            fail_on: None,
        }
    }

    pub fn fail_on(mut self, id: u32) -> Self {
        self.fail_on = Some(id);
        self
    }
}

impl Encoder for ScriptedTokenizer {
    fn encode(&self, input: &str, add_special_tokens: bool) -> Result<Encoding> {
        let mut tokens = Vec::new();
        if add_special_tokens {
            tokens.push(BOS_ID);
        }

        let mut rest = input;
        while !rest.is_empty() {
            let (id, piece) = self
                .pieces
                .iter()
                .filter(|(_, piece)| !piece.is_empty() && rest.starts_with(piece.as_str()))
                .max_by_key(|(_, piece)| piece.len())
                .ok_or_else(|| anyhow::anyhow!("no piece matches {:?}", rest))?;
            tokens.push(*id);
            rest = &rest[piece.len()..];
        }

        Ok(Encoding::Sp(tokens))
    }
}

impl Decoder for ScriptedTokenizer {
    fn decode(&self, token_ids: &[u32], options: DecodeOptions) -> Result<String> {
        if let Some(bad) = self.fail_on.filter(|bad| token_ids.contains(bad)) {
            anyhow::bail!("cannot decode token {}", bad);
        }

        let mut text = String::new();
        for id in token_ids {
            let Some(piece) = self.pieces.get(id) else {
                continue;
            };
            if options.skip_special_tokens && self.special_tokens.contains(piece) {
                continue;
            }
            text.push_str(piece);
        }
        Ok(text)
    }
}

impl TokenizerTrait for ScriptedTokenizer {
    fn vocab_size(&self) -> usize {
        self.pieces.len()
    }

    fn get_special_tokens(&self) -> &SpecialTokens {
        &self.special_tokens
    }

    fn token_to_id(&self, token: &str) -> Option<u32> {
        self.pieces
            .iter()
            .find(|(_, piece)| piece.as_str() == token)
            .map(|(id, _)| *id)
    }

    fn id_to_token(&self, id: u32) -> Option<String> {
        self.pieces.get(&id).cloned()
    }
}
