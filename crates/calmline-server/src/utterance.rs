//! Utterance boundaries for one session.
//!
//! Interim fragments replace the current utterance; a final fragment ends
//! it. Only one turn runs at a time: a final that arrives while a turn is in
//! flight waits as the single pending utterance, and a newer one replaces it.

use calmline_voice::TranscriptFragment;

#[derive(Debug, Default)]
pub struct UtteranceAggregator {
    current: String,
    pending: Option<String>,
    in_flight: bool,
}

impl UtteranceAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes a fragment. Returns an utterance that should start a turn now.
    pub fn on_fragment(&mut self, fragment: TranscriptFragment) -> Option<String> {
        let text = fragment.text.trim();
        if !fragment.is_final {
            if !text.is_empty() {
                self.current = text.to_string();
            }
            return None;
        }

        let utterance = if text.is_empty() {
            std::mem::take(&mut self.current)
        } else {
            self.current.clear();
            text.to_string()
        };
        if utterance.is_empty() {
            return None;
        }

        if self.in_flight {
            if let Some(replaced) = self.pending.replace(utterance) {
                tracing::debug!(
                    session_id = %fragment.session_id,
                    replaced = %replaced,
                    "pending utterance superseded"
                );
            }
            None
        } else {
            self.in_flight = true;
            Some(utterance)
        }
    }

    /// Marks the running turn finished. Returns the pending utterance, if
    /// any, which starts the next turn immediately.
    pub fn finish_turn(&mut self) -> Option<String> {
        match self.pending.take() {
            Some(next) => Some(next),
            None => {
                self.in_flight = false;
                None
            }
        }
    }

    /// Drops the partial utterance after the recognition connection dropped.
    pub fn interrupt(&mut self) {
        self.current.clear();
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}
