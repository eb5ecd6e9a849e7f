//! Where generated token ids come from
//!
//! One [`TokenSource`] interface, picked at construction time: an in-process
//! [`Generator`] on a blocking thread ([`LocalTokenSource`]) or a decoupled
//! streaming inference server ([`RemoteTokenSource`]). Both hand back a lazy,
//! single-pass [`TokenStream`]; dropping it stops generation.

use std::{pin::Pin, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::Stream;

use crate::{
    config::BackendConfig,
    error::StreamError,
    tokenizer::{TokenIdType, Tokenizer},
};

pub mod echo;
pub mod local;
pub mod remote;

pub use echo::EchoGenerator;
pub use local::{Generator, LocalTokenSource};
pub use remote::RemoteTokenSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEvent {
    Token(TokenIdType),
    /// Terminal; nothing follows it
    Error(String),
}

pub type TokenStream = Pin<Box<dyn Stream<Item = TokenEvent> + Send>>;

#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Start generation for one request
    async fn open(
        &self,
        prompt_ids: &[TokenIdType],
        max_tokens: u32,
    ) -> Result<TokenStream, StreamError>;

    /// Backend label for logs and metrics
    fn backend_name(&self) -> &'static str;
}

/// Build the configured token source
///
/// The local backend runs the built-in [`EchoGenerator`]; embedders with a real
/// model construct [`LocalTokenSource`] around their own [`Generator`].
pub fn create_token_source(
    backend: &BackendConfig,
    tokenizer: &Tokenizer,
    request_timeout: Duration,
) -> anyhow::Result<Arc<dyn TokenSource>> {
    match backend {
        BackendConfig::Local {
            channel_capacity,
            max_generation_secs,
        } => Ok(Arc::new(LocalTokenSource::new(
            Arc::new(EchoGenerator::new(tokenizer.clone())),
            *channel_capacity,
            Duration::from_secs(*max_generation_secs),
        ))),
        BackendConfig::Remote { url, model_name } => Ok(Arc::new(RemoteTokenSource::new(
            url,
            model_name,
            request_timeout,
        )?)),
    }
}
