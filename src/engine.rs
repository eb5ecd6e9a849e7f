//! Request pipeline: validate, render, encode, generate, detokenize, emit

use std::{sync::Arc, time::Instant};

use futures::StreamExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::{GenerationConfig, ServerConfig},
    error::StreamError,
    metrics::StreamMetrics,
    protocols::{
        conversation::{Conversation, ConversationValidator},
        generate::GenerateRequest,
    },
    sink::ResponseSink,
    streaming::{DeltaDispatcher, IncrementalDetokenizer, StepOutcome, TextFragment},
    token_source::{create_token_source, TokenEvent, TokenSource, TokenStream},
    tokenizer::{ChatTemplateProcessor, TokenIdType, Tokenizer, DEFAULT_CHAT_TEMPLATE},
};

/// A request that passed validation and has its prompt ids
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub request_id: String,
    pub conversation: Conversation,
    pub prompt: String,
    pub prompt_ids: Vec<TokenIdType>,
    pub max_tokens: u32,
}

/// What one request produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriveSummary {
    /// Generated ids fed to the detokenizer; end-of-sequence is not counted
    pub tokens: usize,
    pub fragments: usize,
    /// Ended on end-of-sequence rather than source exhaustion
    pub saw_eos: bool,
}

/// Shared, read-only state for all requests
pub struct StreamingEngine {
    tokenizer: Tokenizer,
    template: ChatTemplateProcessor,
    source: Arc<dyn TokenSource>,
    generation: GenerationConfig,
}

impl StreamingEngine {
    /// The tokenizer's own chat template is used when it ships one
    pub fn new(
        tokenizer: Tokenizer,
        source: Arc<dyn TokenSource>,
        generation: GenerationConfig,
    ) -> Self {
        let template = tokenizer
            .chat_template()
            .unwrap_or(DEFAULT_CHAT_TEMPLATE)
            .to_string();
        let special = tokenizer.get_special_tokens();
        let template = ChatTemplateProcessor::new(
            template,
            special.bos_token.clone(),
            special.eos_token.clone(),
        );

        Self {
            tokenizer,
            template,
            source,
            generation,
        }
    }

    /// Replace the chat template, keeping the tokenizer's BOS/EOS strings
    pub fn with_chat_template(mut self, template: impl Into<String>) -> Self {
        let special = self.tokenizer.get_special_tokens();
        self.template = ChatTemplateProcessor::new(
            template.into(),
            special.bos_token.clone(),
            special.eos_token.clone(),
        );
        self
    }

    pub fn from_config(config: &ServerConfig) -> anyhow::Result<Self> {
        let tokenizer = Tokenizer::from_file(
            &config.tokenizer_path,
            config.chat_template_path.as_deref(),
        )?;
        let source = create_token_source(&config.backend, &tokenizer, config.request_timeout())?;

        info!(
            tokenizer = %config.tokenizer_path,
            backend = source.backend_name(),
            vocab_size = tokenizer.vocab_size(),
            "streaming engine ready"
        );
        Ok(Self::new(tokenizer, source, config.generation.clone()))
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn backend_name(&self) -> &'static str {
        self.source.backend_name()
    }

    /// Validate the request, render the conversation and encode the prompt
    pub fn prepare(&self, request: &GenerateRequest) -> Result<PreparedRequest, StreamError> {
        let conversation = ConversationValidator::validate(&request.conversation)?;
        let max_tokens = ConversationValidator::resolve_max_tokens(
            request.max_tokens.as_ref(),
            self.generation.default_max_tokens,
        )?;

        let prompt = self
            .template
            .apply_chat_template(conversation.messages(), true)
            .map_err(|e| StreamError::Templating(e.to_string()))?;

        // A template that already wrote BOS must not get a second one
        let starts_with_bos = self
            .tokenizer
            .get_special_tokens()
            .bos_token
            .as_deref()
            .is_some_and(|bos| prompt.starts_with(bos));
        let add_special_tokens = self.generation.add_special_tokens && !starts_with_bos;

        let prompt_ids = self
            .tokenizer
            .encode(&prompt, add_special_tokens)
            .map_err(|e| StreamError::Tokenization(e.to_string()))?
            .token_ids()
            .to_vec();

        let request_id = format!("gen-{}", Uuid::new_v4());
        debug!(
            request_id = %request_id,
            messages = conversation.len(),
            prompt_len = prompt_ids.len(),
            max_tokens,
            "prepared request"
        );

        Ok(PreparedRequest {
            request_id,
            conversation,
            prompt,
            prompt_ids,
            max_tokens,
        })
    }

    /// Start generation for a prepared request
    pub async fn open(&self, prepared: &PreparedRequest) -> Result<TokenStream, StreamError> {
        self.source
            .open(&prepared.prompt_ids, prepared.max_tokens)
            .await
    }

    /// Consume the token stream and emit fragments, then exactly one terminal marker
    pub async fn drive<S>(
        &self,
        prepared: &PreparedRequest,
        mut stream: TokenStream,
        sink: &mut S,
    ) -> Result<DriveSummary, StreamError>
    where
        S: ResponseSink + ?Sized,
    {
        let start = Instant::now();
        let request_id = prepared.request_id.as_str();
        let mut detokenizer = IncrementalDetokenizer::new(
            self.tokenizer.clone(),
            &prepared.prompt_ids,
            self.generation.strip_first_leading_space,
        );
        let mut state = match detokenizer.initial_state() {
            Ok(state) => state,
            Err(e) => {
                let err = StreamError::Tokenization(format!("failed to decode prompt: {}", e));
                return Err(Self::fail(request_id, sink, err).await);
            }
        };

        let mut summary = DriveSummary::default();
        while let Some(event) = stream.next().await {
            let token_id = match event {
                TokenEvent::Token(token_id) => token_id,
                TokenEvent::Error(message) => {
                    return Err(
                        Self::fail(request_id, sink, StreamError::Generation(message)).await,
                    );
                }
            };

            let delta = match detokenizer.step(&mut state, token_id) {
                StepOutcome::Delta(delta) => {
                    summary.tokens += 1;
                    delta
                }
                StepOutcome::Terminated => {
                    summary.saw_eos = true;
                    break;
                }
            };

            if let Some(fragment) = DeltaDispatcher::submit(&mut state, &delta) {
                self.emit(request_id, sink, fragment, &mut summary, start)
                    .await?;
            }
        }
        // Stop the source before the final flush
        drop(stream);

        let tail = detokenizer.finish(&mut state);
        let fragments = DeltaDispatcher::submit(&mut state, &tail)
            .into_iter()
            .chain(DeltaDispatcher::flush(&mut state));
        for fragment in fragments {
            self.emit(request_id, sink, fragment, &mut summary, start)
                .await?;
        }

        if let Err(e) = sink.send_final().await {
            let err = StreamError::Emission(e.to_string());
            return Err(Self::fail(request_id, sink, err).await);
        }

        info!(
            request_id,
            tokens = summary.tokens,
            fragments = summary.fragments,
            saw_eos = summary.saw_eos,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "request completed"
        );
        Ok(summary)
    }

    /// Prepare, open and drive in one call
    ///
    /// Every outcome, including setup failures, reaches the sink as exactly
    /// one terminal marker.
    pub async fn run<S>(
        &self,
        request: &GenerateRequest,
        sink: &mut S,
    ) -> Result<DriveSummary, StreamError>
    where
        S: ResponseSink + ?Sized,
    {
        let prepared = match self.prepare(request) {
            Ok(prepared) => prepared,
            Err(e) => return Err(Self::fail("-", sink, e).await),
        };
        let stream = match self.open(&prepared).await {
            Ok(stream) => stream,
            Err(e) => return Err(Self::fail(&prepared.request_id, sink, e).await),
        };
        self.drive(&prepared, stream, sink).await
    }

    async fn emit<S>(
        &self,
        request_id: &str,
        sink: &mut S,
        fragment: TextFragment,
        summary: &mut DriveSummary,
        start: Instant,
    ) -> Result<(), StreamError>
    where
        S: ResponseSink + ?Sized,
    {
        if let Err(e) = sink.send_fragment(&fragment.text).await {
            let err = StreamError::Emission(e.to_string());
            return Err(Self::fail(request_id, sink, err).await);
        }
        if summary.fragments == 0 {
            StreamMetrics::record_time_to_first_fragment(start.elapsed());
        }
        summary.fragments += 1;
        StreamMetrics::record_fragment();
        Ok(())
    }

    /// Send the single error response; a failure here only gets logged
    async fn fail<S>(request_id: &str, sink: &mut S, err: StreamError) -> StreamError
    where
        S: ResponseSink + ?Sized,
    {
        match &err {
            StreamError::InvalidInput { .. } => warn!(request_id, error = %err, "rejected request"),
            _ => error!(request_id, error = %err, "request failed"),
        }

        if let Err(e) = sink.send_error(&err.to_string()).await {
            warn!(request_id, error = %e, "could not deliver error response, abandoning request");
        }
        err
    }
}
