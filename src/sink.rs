//! Transport-level emission of fragments and terminal markers

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::protocols::generate::{ErrorResponse, GenerateResponse};

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("client disconnected")]
    Disconnected,

    #[error("failed to serialize response: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Receives one request's output, in order
///
/// The engine calls exactly one of `send_final` / `send_error` per request.
#[async_trait]
pub trait ResponseSink: Send {
    async fn send_fragment(&mut self, text: &str) -> Result<(), SinkError>;

    async fn send_final(&mut self) -> Result<(), SinkError>;

    async fn send_error(&mut self, message: &str) -> Result<(), SinkError>;
}

/// Server-sent events over an unbounded channel feeding the HTTP body
pub struct SseSink {
    tx: mpsc::UnboundedSender<Result<Bytes, io::Error>>,
}

impl SseSink {
    pub fn new(tx: mpsc::UnboundedSender<Result<Bytes, io::Error>>) -> Self {
        Self { tx }
    }

    fn send_event<T: Serialize>(&self, payload: &T) -> Result<(), SinkError> {
        let json = serde_json::to_string(payload)?;
        self.tx
            .send(Ok(Bytes::from(format!("data: {}\n\n", json))))
            .map_err(|_| SinkError::Disconnected)
    }
}

#[async_trait]
impl ResponseSink for SseSink {
    async fn send_fragment(&mut self, text: &str) -> Result<(), SinkError> {
        self.send_event(&GenerateResponse::fragment(text))
    }

    async fn send_final(&mut self) -> Result<(), SinkError> {
        self.send_event(&GenerateResponse::completion())
    }

    async fn send_error(&mut self, message: &str) -> Result<(), SinkError> {
        self.send_event(&ErrorResponse {
            error: message.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkMessage {
    Fragment(String),
    Final,
    Error(String),
}

/// Buffers everything in memory; backs the non-streaming endpoint
#[derive(Debug, Default)]
pub struct CollectingSink {
    messages: Vec<SinkMessage>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[SinkMessage] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<SinkMessage> {
        self.messages
    }

    /// Concatenated fragment text
    pub fn text(&self) -> String {
        self.messages
            .iter()
            .filter_map(|m| match m {
                SinkMessage::Fragment(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn error(&self) -> Option<&str> {
        self.messages.iter().find_map(|m| match m {
            SinkMessage::Error(message) => Some(message.as_str()),
            _ => None,
        })
    }
}

#[async_trait]
impl ResponseSink for CollectingSink {
    async fn send_fragment(&mut self, text: &str) -> Result<(), SinkError> {
        self.messages.push(SinkMessage::Fragment(text.to_string()));
        Ok(())
    }

    async fn send_final(&mut self) -> Result<(), SinkError> {
        self.messages.push(SinkMessage::Final);
        Ok(())
    }

    async fn send_error(&mut self, message: &str) -> Result<(), SinkError> {
        self.messages.push(SinkMessage::Error(message.to_string()));
        Ok(())
    }
}
