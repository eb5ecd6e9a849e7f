// These modules are used by tests and benchmarks
#![allow(dead_code)]

pub mod mock_inference;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use sgl_token_streamer::{
    config::GenerationConfig,
    sink::{ResponseSink, SinkError, SinkMessage},
    token_source::{
        EchoGenerator, LocalTokenSource, TokenEvent, TokenSource, TokenStream,
    },
    tokenizer::{
        mock::{MockTokenizer, ScriptedTokenizer},
        TokenIdType, Tokenizer,
    },
    StreamError, StreamingEngine,
};

/// Renders every message's content followed by a space
pub const PLAIN_TEMPLATE: &str = "{% for m in messages %}{{ m.content }} {% endfor %}";

pub fn mistral_tokenizer() -> Tokenizer {
    Tokenizer::from_arc(Arc::new(MockTokenizer::new()))
}

/// Prompt "Hello! " is id 100; 101..104 spell "The sky is blue."
pub fn sky_tokenizer() -> Tokenizer {
    Tokenizer::from_arc(Arc::new(ScriptedTokenizer::new(&[
        (100, "Hello! "),
        (101, "The"),
        (102, " sky"),
        (103, " is"),
        (104, " blue."),
        (105, " "),
        (106, "\n"),
    ])))
}

pub fn hello_conversation() -> serde_json::Value {
    serde_json::Value::String(r#"[{"role":"user","content":"Hello!"}]"#.to_string())
}

/// Engine over the sky tokenizer and a fixed event script
pub fn scripted_engine(source: Arc<ScriptedSource>) -> StreamingEngine {
    StreamingEngine::new(sky_tokenizer(), source, GenerationConfig::default())
        .with_chat_template(PLAIN_TEMPLATE)
}

/// Engine that echoes the prompt through the local backend
pub fn echo_engine() -> StreamingEngine {
    let tokenizer = mistral_tokenizer();
    let source = LocalTokenSource::new(
        Arc::new(EchoGenerator::new(tokenizer.clone())),
        4,
        std::time::Duration::from_secs(30),
    );
    StreamingEngine::new(tokenizer, Arc::new(source), GenerationConfig::default())
}

/// Token source that replays a fixed list of events
#[derive(Default)]
pub struct ScriptedSource {
    events: Vec<TokenEvent>,
    open_error: Option<String>,
    opened: Mutex<Vec<(Vec<TokenIdType>, u32)>>,
}

impl ScriptedSource {
    pub fn tokens(ids: &[TokenIdType]) -> Self {
        Self::events(ids.iter().copied().map(TokenEvent::Token).collect())
    }

    pub fn events(events: Vec<TokenEvent>) -> Self {
        Self {
            events,
            ..Default::default()
        }
    }

    pub fn failing_open(message: &str) -> Self {
        Self {
            open_error: Some(message.to_string()),
            ..Default::default()
        }
    }

    /// `(prompt_ids, max_tokens)` of every open call
    pub fn opened(&self) -> Vec<(Vec<TokenIdType>, u32)> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenSource for ScriptedSource {
    async fn open(
        &self,
        prompt_ids: &[TokenIdType],
        max_tokens: u32,
    ) -> Result<TokenStream, StreamError> {
        self.opened
            .lock()
            .unwrap()
            .push((prompt_ids.to_vec(), max_tokens));
        if let Some(message) = &self.open_error {
            return Err(StreamError::Generation(message.clone()));
        }
        Ok(Box::pin(stream::iter(self.events.clone())))
    }

    fn backend_name(&self) -> &'static str {
        "scripted"
    }
}

/// Sink whose `send_fragment` fails from the n-th call on
pub struct FailingSink {
    fail_from: usize,
    fragment_calls: usize,
    pub messages: Vec<SinkMessage>,
    pub error_attempts: usize,
}

impl FailingSink {
    pub fn new(fail_from: usize) -> Self {
        Self {
            fail_from,
            fragment_calls: 0,
            messages: Vec::new(),
            error_attempts: 0,
        }
    }
}

#[async_trait]
impl ResponseSink for FailingSink {
    async fn send_fragment(&mut self, text: &str) -> Result<(), SinkError> {
        self.fragment_calls += 1;
        if self.fragment_calls >= self.fail_from {
            return Err(SinkError::Disconnected);
        }
        self.messages.push(SinkMessage::Fragment(text.to_string()));
        Ok(())
    }

    async fn send_final(&mut self) -> Result<(), SinkError> {
        self.messages.push(SinkMessage::Final);
        Ok(())
    }

    async fn send_error(&mut self, _message: &str) -> Result<(), SinkError> {
        // The transport is gone; only the attempt is recorded
        self.error_attempts += 1;
        Err(SinkError::Disconnected)
    }
}
