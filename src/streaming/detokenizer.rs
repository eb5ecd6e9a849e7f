use std::time::Instant;

use anyhow::Result;
use tracing::{debug, warn};

use super::state::DecodeState;
use crate::{
    metrics::StreamMetrics,
    tokenizer::{DecodeOptions, TokenIdType, Tokenizer},
};

const REPLACEMENT_CHAR: char = '\u{FFFD}';

/// Result of feeding one token id to the detokenizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// New text since the previous step; may be empty
    Delta(String),
    /// End-of-sequence seen; the id was not decoded
    Terminated,
}

/// Cumulative decode-and-diff over prompt + generated ids
///
/// Decoding only the new id loses the word-boundary spaces SentencePiece
/// tokenizers attach to the following piece, so every step decodes the whole
/// sequence and returns the suffix past the previous decode.
pub struct IncrementalDetokenizer {
    tokenizer: Tokenizer,
    options: DecodeOptions,
    /// Prompt ids followed by every generated id
    all_token_ids: Vec<TokenIdType>,
    prompt_len: usize,
    eos_token_id: Option<TokenIdType>,
    strip_first_leading_space: bool,
    /// Last decode ended in U+FFFD that was left out of `previous_text`
    held_back: bool,
}

impl IncrementalDetokenizer {
    pub fn new(
        tokenizer: Tokenizer,
        prompt_ids: &[TokenIdType],
        strip_first_leading_space: bool,
    ) -> Self {
        let eos_token_id = tokenizer.eos_token_id();
        Self {
            tokenizer,
            options: DecodeOptions::STREAMING,
            all_token_ids: prompt_ids.to_vec(),
            prompt_len: prompt_ids.len(),
            eos_token_id,
            strip_first_leading_space,
            held_back: false,
        }
    }

    /// Override the end-of-sequence id the tokenizer reports
    pub fn with_eos_token_id(mut self, eos_token_id: Option<TokenIdType>) -> Self {
        self.eos_token_id = eos_token_id;
        self
    }

    /// Decode the prompt alone; the baseline every later decode is diffed against
    pub fn initial_state(&self) -> Result<DecodeState> {
        let prompt_text = self
            .tokenizer
            .decode(&self.all_token_ids[..self.prompt_len], self.options)?;
        Ok(DecodeState::new(prompt_text))
    }

    pub fn generated_ids(&self) -> &[TokenIdType] {
        &self.all_token_ids[self.prompt_len..]
    }

    /// Feed one generated token id
    pub fn step(&mut self, state: &mut DecodeState, token_id: TokenIdType) -> StepOutcome {
        if Some(token_id) == self.eos_token_id {
            debug!(generated = self.generated_ids().len(), "end-of-sequence token");
            return StepOutcome::Terminated;
        }

        let start = Instant::now();
        self.all_token_ids.push(token_id);
        StreamMetrics::record_token();

        let mut full_text = match self.tokenizer.decode(&self.all_token_ids, self.options) {
            Ok(text) => text,
            Err(e) => {
                warn!(token_id, error = %e, "decode failed, emitting empty delta");
                StreamMetrics::record_decode_failure();
                StreamMetrics::record_step_duration(start.elapsed());
                return StepOutcome::Delta(String::new());
            }
        };

        // A trailing U+FFFD run may be a multi-byte character still being
        // completed by byte-fallback tokens; commit only the text before it
        let stable_len = full_text.trim_end_matches(REPLACEMENT_CHAR).len();
        self.held_back = stable_len < full_text.len();
        if self.held_back {
            StreamMetrics::record_incomplete_utf8();
            full_text.truncate(stable_len);
        }

        let delta = self.commit(state, full_text);
        StreamMetrics::record_step_duration(start.elapsed());
        debug!(token_id, delta = %delta, "decoded step");
        StepOutcome::Delta(delta)
    }

    /// Text still owed after the source is exhausted mid-character
    pub fn finish(&mut self, state: &mut DecodeState) -> String {
        if !self.held_back {
            return String::new();
        }
        self.held_back = false;

        match self.tokenizer.decode(&self.all_token_ids, self.options) {
            Ok(full_text) => self.commit(state, full_text),
            Err(e) => {
                warn!(error = %e, "final decode failed");
                StreamMetrics::record_decode_failure();
                String::new()
            }
        }
    }

    fn commit(&self, state: &mut DecodeState, full_text: String) -> String {
        let previous_len = state.previous_text.len();
        let mut delta = if full_text.starts_with(state.previous_text.as_str()) {
            full_text[previous_len..].to_string()
        } else {
            // Earlier text changed under the new token; resume from the same byte offset
            warn!(
                previous = %state.previous_text,
                current = %full_text,
                "decode does not extend previous text"
            );
            full_text
                .get(previous_len..)
                .map(str::to_string)
                .unwrap_or_default()
        };

        if !delta.is_empty() {
            if state.emitted_count == 0 && self.strip_first_leading_space && delta.starts_with(' ')
            {
                delta.remove(0);
            }
            state.emitted_count += 1;
        }

        state.previous_text = full_text;
        delta
    }
}
