//! Durable records written by the dialogue layer.
//!
//! Every write is append-only. The async wrappers run on the blocking pool
//! and their failures are logged by the caller, never surfaced to the
//! conversation.

use std::time::Duration;

use calmline_db::DbPool;
use calmline_types::{EmotionalState, Priority};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::crisis::{EscalationAction, EscalationDecision};
use crate::error::DialogueError;
use crate::intake::IntakeRecord;

const EXCERPT_MAX_CHARS: usize = 500;

/// A turn as persisted for the call log.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnRecord {
    pub call_id: String,
    pub tenant_id: String,
    pub turn_index: usize,
    pub caller_text: String,
    pub assistant_text: String,
    pub intent: Option<String>,
    pub confidence: f32,
    pub emotional_state: EmotionalState,
}

/// Immutable record of an escalation decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationEvent {
    pub event_id: String,
    pub call_id: String,
    pub tenant_id: String,
    pub priority: Priority,
    pub reason: String,
    pub action: EscalationAction,
    pub transcript_excerpt: String,
    pub follow_up_required: bool,
    pub occurred_at: DateTime<Utc>,
}

impl EscalationEvent {
    /// Builds an event for an escalating decision. Returns `None` when the
    /// decision carries no priority.
    pub fn from_decision(
        call_id: &str,
        tenant_id: &str,
        transcript: &str,
        decision: &EscalationDecision,
    ) -> Option<Self> {
        let priority = decision.priority?;
        Some(Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            call_id: call_id.to_string(),
            tenant_id: tenant_id.to_string(),
            priority,
            reason: decision.reason.clone(),
            action: decision.action,
            transcript_excerpt: transcript.chars().take(EXCERPT_MAX_CHARS).collect(),
            follow_up_required: decision.follow_up_required,
            occurred_at: Utc::now(),
        })
    }
}

pub fn insert_turn(conn: &Connection, turn: &TurnRecord) -> Result<(), DialogueError> {
    conn.execute(
        "INSERT INTO conversation_turns
            (call_id, tenant_id, turn_index, caller_text, assistant_text, intent, confidence,
             emotional_state)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            turn.call_id,
            turn.tenant_id,
            turn.turn_index as i64,
            turn.caller_text,
            turn.assistant_text,
            turn.intent,
            f64::from(turn.confidence),
            turn.emotional_state.as_str(),
        ],
    )?;
    Ok(())
}

pub fn insert_escalation(conn: &Connection, event: &EscalationEvent) -> Result<(), DialogueError> {
    conn.execute(
        "INSERT INTO escalation_events
            (event_id, call_id, tenant_id, priority, reason, action, transcript_excerpt,
             follow_up_required, occurred_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            event.event_id,
            event.call_id,
            event.tenant_id,
            event.priority.as_str(),
            event.reason,
            event.action.as_str(),
            event.transcript_excerpt,
            event.follow_up_required,
            event.occurred_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Writes a confirmed intake record. Incomplete records are rejected.
pub fn insert_intake(
    conn: &Connection,
    call_id: &str,
    tenant_id: &str,
    record: &IntakeRecord,
) -> Result<i64, DialogueError> {
    fn required<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, DialogueError> {
        value
            .as_deref()
            .ok_or(DialogueError::IncompleteIntake(field))
    }

    let service_type = record
        .service_type
        .ok_or(DialogueError::IncompleteIntake("service_type"))?;

    conn.execute(
        "INSERT INTO intake_records
            (call_id, tenant_id, full_name, phone, email, state, service_type, insurance,
             availability, partner_name, child_name, child_age)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            call_id,
            tenant_id,
            required(&record.full_name, "full_name")?,
            required(&record.phone, "phone")?,
            required(&record.email, "email")?,
            required(&record.state, "state")?,
            service_type.as_str(),
            required(&record.insurance, "insurance")?,
            required(&record.availability, "availability")?,
            record.partner_name,
            record.child_name,
            record.child_age,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// True if a turn for `call_id` was recorded within `window`.
pub fn recent_turn_exists(
    conn: &Connection,
    call_id: &str,
    window: Duration,
) -> Result<bool, DialogueError> {
    let modifier = format!("-{} seconds", window.as_secs());
    let exists = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM conversation_turns
            WHERE call_id = ?1 AND created_at >= datetime('now', ?2)
         )",
        params![call_id, modifier],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Pool-backed wrappers for the async call path.
#[derive(Clone)]
pub struct DialogueStore {
    pool: DbPool,
}

impl DialogueStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn run<T, F>(&self, f: F) -> Result<T, DialogueError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, DialogueError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await?
    }

    pub async fn record_turn(&self, turn: TurnRecord) -> Result<(), DialogueError> {
        self.run(move |conn| insert_turn(conn, &turn)).await
    }

    pub async fn record_escalation(&self, event: EscalationEvent) -> Result<(), DialogueError> {
        self.run(move |conn| insert_escalation(conn, &event)).await
    }

    pub async fn record_intake(
        &self,
        call_id: String,
        tenant_id: String,
        record: IntakeRecord,
    ) -> Result<i64, DialogueError> {
        self.run(move |conn| insert_intake(conn, &call_id, &tenant_id, &record))
            .await
    }

    pub async fn recent_turn_exists(
        &self,
        call_id: String,
        window: Duration,
    ) -> Result<bool, DialogueError> {
        self.run(move |conn| recent_turn_exists(conn, &call_id, window))
            .await
    }
}
