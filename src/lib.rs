pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod protocols;
pub mod server;
pub mod sink;
pub mod streaming;
pub mod token_source;
pub mod tokenizer;

pub use engine::{DriveSummary, PreparedRequest, StreamingEngine};
pub use error::StreamError;
