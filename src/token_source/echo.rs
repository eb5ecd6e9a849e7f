use std::time::Duration;

use super::local::Generator;
use crate::tokenizer::{TokenIdType, Tokenizer};

/// Loopback generator: replays the prompt's ordinary tokens, then end-of-sequence
///
/// Exercises the full streaming path without a model.
pub struct EchoGenerator {
    tokenizer: Tokenizer,
    token_delay: Duration,
}

impl EchoGenerator {
    pub fn new(tokenizer: Tokenizer) -> Self {
        Self {
            tokenizer,
            token_delay: Duration::ZERO,
        }
    }

    /// Pause between tokens, to make streaming visible
    pub fn with_token_delay(mut self, token_delay: Duration) -> Self {
        self.token_delay = token_delay;
        self
    }
}

impl Generator for EchoGenerator {
    fn generate(
        &self,
        prompt_ids: &[TokenIdType],
        max_new_tokens: u32,
        emit: &mut dyn FnMut(TokenIdType) -> bool,
    ) -> anyhow::Result<()> {
        let mut produced = 0u32;
        for &token_id in prompt_ids
            .iter()
            .filter(|&&id| !self.tokenizer.is_special_id(id))
            .take(max_new_tokens as usize)
        {
            if !self.token_delay.is_zero() {
                std::thread::sleep(self.token_delay);
            }
            if !emit(token_id) {
                return Ok(());
            }
            produced += 1;
        }

        if produced < max_new_tokens {
            if let Some(eos) = self.tokenizer.eos_token_id() {
                emit(eos);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::tokenizer::mock::{MockTokenizer, BOS_ID, EOS_ID, INST_END_ID, INST_ID};

    fn collect(generator: &EchoGenerator, prompt: &[TokenIdType], max: u32) -> Vec<TokenIdType> {
        let mut out = Vec::new();
        generator
            .generate(prompt, max, &mut |id| {
                out.push(id);
                true
            })
            .unwrap();
        out
    }

    #[test]
    fn test_replays_ordinary_prompt_tokens_then_eos() {
        let generator = EchoGenerator::new(Tokenizer::from_arc(Arc::new(MockTokenizer::new())));
        let prompt = [BOS_ID, INST_ID, 19, 20, INST_END_ID];
        assert_eq!(collect(&generator, &prompt, 16), vec![19, 20, EOS_ID]);
    }

    #[test]
    fn test_respects_max_new_tokens() {
        let generator = EchoGenerator::new(Tokenizer::from_arc(Arc::new(MockTokenizer::new())));
        let prompt = [10, 20, 11];
        assert_eq!(collect(&generator, &prompt, 2), vec![10, 20]);
    }

    #[test]
    fn test_stops_when_emit_refuses() {
        let generator = EchoGenerator::new(Tokenizer::from_arc(Arc::new(MockTokenizer::new())));
        let mut seen = Vec::new();
        generator
            .generate(&[10, 20, 11], 16, &mut |id| {
                seen.push(id);
                false
            })
            .unwrap();
        assert_eq!(seen, vec![10]);
    }
}
