//! Incremental token-to-text streaming
//!
//! [`IncrementalDetokenizer`] turns each new token id into a text delta by
//! decoding the whole prompt + generated sequence and diffing it against the
//! previous decode. [`DeltaDispatcher`] then decides when a delta becomes a
//! fragment the client sees. Both operate on a [`DecodeState`] owned by the
//! request.

pub mod detokenizer;
pub mod dispatcher;
pub mod state;


pub use detokenizer::{IncrementalDetokenizer, StepOutcome};
pub use dispatcher::DeltaDispatcher;
pub use state::{DecodeState, TextFragment};
