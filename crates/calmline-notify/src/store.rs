//! Persistence for staff notifications.
//!
//! A notification is inserted as `pending` before any delivery attempt and
//! updated exactly once with the outcome. The update only applies to rows
//! still pending, so a repeated completion is a no-op.

use calmline_types::{CallerInfo, NotificationType, Urgency};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::NotifyError;
use crate::{DeliveryResult, NotificationStatus, StaffNotification};

/// Inserts a new notification in the `pending` state.
///
/// # Errors
///
/// Returns `NotifyError::Database` on SQL failure or
/// `NotifyError::Serialization` if the caller snapshot or plan cannot be
/// serialized.
pub fn insert_pending(conn: &Connection, notification: &StaffNotification) -> Result<(), NotifyError> {
    conn.execute(
        "INSERT INTO staff_notifications
            (notification_id, notification_type, urgency, caller_json, content, plan_json, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending')",
        params![
            notification.notification_id,
            notification.kind.as_str(),
            notification.urgency.as_str(),
            serde_json::to_string(&notification.caller)?,
            notification.content,
            serde_json::to_string(&notification.plan)?,
        ],
    )?;
    Ok(())
}

/// Records the final outcome. Returns `false` if the row was not pending.
pub fn complete(
    conn: &Connection,
    notification_id: &str,
    status: NotificationStatus,
    results: &[DeliveryResult],
) -> Result<bool, NotifyError> {
    let changed = conn.execute(
        "UPDATE staff_notifications
         SET status = ?2, results_json = ?3, completed_at = datetime('now')
         WHERE notification_id = ?1 AND status = 'pending'",
        params![notification_id, status.as_str(), serde_json::to_string(results)?],
    )?;
    Ok(changed == 1)
}

/// Loads a notification by id.
pub fn load(conn: &Connection, notification_id: &str) -> Result<Option<StaffNotification>, NotifyError> {
    let row = conn
        .query_row(
            "SELECT notification_type, urgency, caller_json, content, plan_json, results_json,
                    status, created_at
             FROM staff_notifications WHERE notification_id = ?1",
            params![notification_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            },
        )
        .optional()?;

    let Some((kind, urgency, caller_json, content, plan_json, results_json, status, created_at)) =
        row
    else {
        return Ok(None);
    };

    let kind: NotificationType = serde_json::from_value(serde_json::Value::String(kind))?;
    let urgency: Urgency = serde_json::from_value(serde_json::Value::String(urgency))?;
    let caller: CallerInfo = serde_json::from_str(&caller_json)?;
    let results: Vec<DeliveryResult> = match results_json {
        Some(json) => serde_json::from_str(&json)?,
        None => Vec::new(),
    };

    Ok(Some(StaffNotification {
        notification_id: notification_id.to_string(),
        kind,
        urgency,
        caller,
        content,
        plan: serde_json::from_str(&plan_json)?,
        results,
        status: NotificationStatus::parse(&status),
        created_at,
    }))
}

/// Counts notifications of a type, for operators and tests.
pub fn count_by_type(conn: &Connection, kind: NotificationType) -> Result<i64, NotifyError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM staff_notifications WHERE notification_type = ?1",
        params![kind.as_str()],
        |row| row.get(0),
    )?)
}
