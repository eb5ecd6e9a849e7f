use super::state::{DecodeState, TextFragment};

/// Whitespace-coalescing, newline-flushing policy between the detokenizer and
/// the sink
///
/// Whitespace-only deltas are held until something visible follows them, so a
/// client never receives a fragment that is nothing but spaces mid-stream.
/// Any delta carrying a line break goes out immediately.
pub struct DeltaDispatcher;

impl DeltaDispatcher {
    /// Route one delta; yields at most one fragment
    pub fn submit(state: &mut DecodeState, delta: &str) -> Option<TextFragment> {
        if delta.is_empty() {
            return None;
        }

        if delta.contains(['\n', '\r']) || !delta.chars().all(char::is_whitespace) {
            return Some(Self::take_with(state, delta));
        }

        state.pending_whitespace.push_str(delta);
        None
    }

    /// Emit whatever whitespace is still held; called once at termination
    pub fn flush(state: &mut DecodeState) -> Option<TextFragment> {
        if state.pending_whitespace.is_empty() {
            return None;
        }
        Some(TextFragment::new(std::mem::take(
            &mut state.pending_whitespace,
        )))
    }

    fn take_with(state: &mut DecodeState, delta: &str) -> TextFragment {
        let mut text = std::mem::take(&mut state.pending_whitespace);
        text.push_str(delta);
        TextFragment::new(text)
    }
}
