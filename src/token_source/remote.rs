use std::{
    collections::VecDeque,
    pin::Pin,
    task::{ready, Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{TokenEvent, TokenSource, TokenStream};
use crate::{error::StreamError, metrics::StreamMetrics, tokenizer::TokenIdType};

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>>;

/// Client for a Triton-style `generate_stream` endpoint
pub struct RemoteTokenSource {
    client: reqwest::Client,
    endpoint: String,
}

impl RemoteTokenSource {
    pub fn new(url: &str, model_name: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/v2/models/{}/generate_stream",
                url.trim_end_matches('/'),
                model_name
            ),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body(prompt_ids: &[TokenIdType], max_tokens: u32) -> Value {
        json!({
            "input_ids": [prompt_ids],
            "input_lengths": [[prompt_ids.len()]],
            "request_output_len": [[max_tokens]],
            "streaming": [[true]],
        })
    }
}

#[async_trait]
impl TokenSource for RemoteTokenSource {
    async fn open(
        &self,
        prompt_ids: &[TokenIdType],
        max_tokens: u32,
    ) -> Result<TokenStream, StreamError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Accept", "text/event-stream")
            .json(&Self::request_body(prompt_ids, max_tokens))
            .send()
            .await
            .map_err(|e| {
                StreamError::Generation(format!("request to {} failed: {}", self.endpoint, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StreamError::Generation(format!(
                "inference server returned {}: {}",
                status, body
            )));
        }

        debug!(endpoint = %self.endpoint, prompt_len = prompt_ids.len(), max_tokens, "opened remote stream");
        let bytes = response.bytes_stream().map(|chunk| chunk.map_err(|e| e.to_string()));
        Ok(Box::pin(RemoteTokenStream::from_byte_stream(bytes)))
    }

    fn backend_name(&self) -> &'static str {
        "remote"
    }
}

/// Token events parsed out of a server-sent-event body
///
/// Each `data:` payload is one inference response. Events may be split across
/// chunks arbitrarily; bytes are buffered until a blank line closes the event.
/// Dropping the stream drops the connection, which cancels the remote call.
pub struct RemoteTokenStream {
    inner: ByteStream,
    buffer: Vec<u8>,
    queue: VecDeque<TokenEvent>,
    inner_done: bool,
    completed: bool,
}

impl RemoteTokenStream {
    pub fn from_byte_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, String>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
            buffer: Vec::new(),
            queue: VecDeque::new(),
            inner_done: false,
            completed: false,
        }
    }

    fn drain_events(&mut self) {
        while let Some((end, sep_len)) = find_event_boundary(&self.buffer) {
            let event: Vec<u8> = self.buffer.drain(..end + sep_len).take(end).collect();
            self.handle_event(&String::from_utf8_lossy(&event));
        }
    }

    fn handle_event(&mut self, event: &str) {
        let data = event
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|payload| payload.strip_prefix(' ').unwrap_or(payload))
            .collect::<Vec<_>>()
            .join("\n");
        if data.is_empty() || data == "[DONE]" {
            return;
        }

        let payload: Value = match serde_json::from_str(&data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "skipping unparseable inference message");
                StreamMetrics::record_skipped_message("invalid_json");
                return;
            }
        };

        if let Some(error) = payload.get("error").filter(|e| !e.is_null()) {
            let message = error
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            self.queue.push_back(TokenEvent::Error(message));
            return;
        }

        match newest_token(&payload) {
            Ok(token_id) => self.queue.push_back(TokenEvent::Token(token_id)),
            Err(reason) => {
                warn!(reason, "skipping malformed inference message");
                StreamMetrics::record_skipped_message(reason);
            }
        }
    }
}

/// Last id along the sequence axis of a `[batch][beam][sequence]` tensor
fn newest_token(payload: &Value) -> Result<TokenIdType, &'static str> {
    let output_ids = payload.get("output_ids").ok_or("missing_output_ids")?;

    let sequence = output_ids
        .as_array()
        .and_then(|batch| batch.first())
        .and_then(Value::as_array)
        .and_then(|beams| beams.first())
        .and_then(Value::as_array)
        .ok_or("not_rank_3")?;

    let last = sequence.last().ok_or("empty_sequence")?;
    if last.is_array() {
        return Err("not_rank_3");
    }
    last.as_u64()
        .and_then(|id| TokenIdType::try_from(id).ok())
        .ok_or("invalid_token_id")
}

/// Position and length of the first blank-line separator
fn find_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

impl Stream for RemoteTokenStream {
    type Item = TokenEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(event) = this.queue.pop_front() {
                if matches!(event, TokenEvent::Error(_)) {
                    this.queue.clear();
                    this.inner_done = true;
                    this.completed = true;
                }
                return Poll::Ready(Some(event));
            }

            if this.inner_done {
                this.completed = true;
                return Poll::Ready(None);
            }

            match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) => {
                    this.buffer.extend_from_slice(&chunk);
                    this.drain_events();
                }
                Some(Err(e)) => {
                    this.queue
                        .push_back(TokenEvent::Error(format!("inference stream interrupted: {}", e)));
                }
                None => {
                    // Final event without a trailing blank line
                    let tail = std::mem::take(&mut this.buffer);
                    if !tail.is_empty() {
                        this.handle_event(&String::from_utf8_lossy(&tail));
                    }
                    this.inner_done = true;
                }
            }
        }
    }
}

impl Drop for RemoteTokenStream {
    fn drop(&mut self) {
        if !self.completed {
            debug!("remote token stream dropped before completion, closing connection");
            StreamMetrics::record_source_cancelled("remote");
        }
    }
}
