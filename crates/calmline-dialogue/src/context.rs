use calmline_types::CallerInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::accessibility::AccessibilityNeeds;
use crate::intent::Intent;

/// Turns kept as generation context.
pub const MAX_HISTORY_TURNS: usize = 20;

/// One caller utterance and the response it received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub caller_text: String,
    pub assistant_text: String,
    pub intent: Option<Intent>,
    pub at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(
        caller_text: impl Into<String>,
        assistant_text: impl Into<String>,
        intent: Option<Intent>,
    ) -> Self {
        Self {
            caller_text: caller_text.into(),
            assistant_text: assistant_text.into(),
            intent,
            at: Utc::now(),
        }
    }
}

/// Per-call conversation state owned by the session's dialogue task.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub call_id: String,
    pub tenant_id: String,
    pub caller: CallerInfo,
    pub history: Vec<ConversationTurn>,
    pub accessibility: AccessibilityNeeds,
    /// Turns appended so far, including ones rolled out of `history`.
    pub turn_count: usize,
}

impl CallContext {
    pub fn new(call_id: impl Into<String>, tenant_id: impl Into<String>, caller: CallerInfo) -> Self {
        Self {
            call_id: call_id.into(),
            tenant_id: tenant_id.into(),
            caller,
            history: Vec::new(),
            accessibility: AccessibilityNeeds::default(),
            turn_count: 0,
        }
    }

    /// Appends a completed turn, dropping the oldest beyond the window.
    pub fn push_turn(&mut self, turn: ConversationTurn) {
        self.history.push(turn);
        self.turn_count += 1;
        if self.history.len() > MAX_HISTORY_TURNS {
            let excess = self.history.len() - MAX_HISTORY_TURNS;
            self.history.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_a_rolling_window() {
        let mut ctx = CallContext::new("CA1", "default", CallerInfo::default());
        for n in 0..(MAX_HISTORY_TURNS + 5) {
            ctx.push_turn(ConversationTurn::new(format!("q{}", n), "a", None));
        }
        assert_eq!(ctx.history.len(), MAX_HISTORY_TURNS);
        assert_eq!(ctx.history[0].caller_text, "q5");
        assert_eq!(ctx.turn_count, MAX_HISTORY_TURNS + 5);
    }
}
