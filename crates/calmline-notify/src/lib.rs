//! Staff notification for the Calmline call engine.
//!
//! When a call needs a person, the dialogue layer hands a
//! [`NotificationRequest`] to a [`Notifier`]. The [`NotificationRouter`]
//! looks the notification type up in the [`RouteTable`], formats an SMS and
//! an HTML email, attempts both channels independently and records the
//! outcome in `staff_notifications`.
//!
//! | Type | SMS (critical/high only) | Email |
//! |------|--------------------------|-------|
//! | `crisis` | on-call | clinical, cc front desk |
//! | `billing` | billing | billing |
//! | `care_management` | on-call | clinical, cc front desk |
//! | `new_intake` | none | intake |
//! | `appointment_change`, `callback`, `general` | front desk | front desk |
//!
//! Notification never blocks the audio path: [`Notifier::notify`] is fire
//! and forget.

mod error;
pub mod format;
mod provider;
mod router;
mod routing;
pub mod store;

use std::collections::HashMap;

use calmline_types::{CallerInfo, NotificationType, Urgency};
use serde::{Deserialize, Serialize};

pub use error::NotifyError;
pub use provider::{
    EmailMessage, EmailProviderConfig, EmailSender, HttpEmailSender, SmsProviderConfig,
    SmsSender, TwilioSmsSender,
};
pub use router::NotificationRouter;
pub use routing::{DeliveryPlan, Route, RouteTable, StaffContacts};

/// A request for staff attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    pub kind: NotificationType,
    pub urgency: Urgency,
    pub caller: CallerInfo,
    pub content: String,
    pub call_id: Option<String>,
}

/// Fire-and-forget notification sink.
pub trait Notifier: Send + Sync {
    fn notify(&self, request: NotificationRequest);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Sms,
    Email,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Email => "email",
        }
    }
}

/// Outcome of one channel attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub channel: Channel,
    pub destination: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryResult {
    fn from_attempt(channel: Channel, destination: &str, attempt: Result<(), NotifyError>) -> Self {
        Self {
            channel,
            destination: destination.to_string(),
            success: attempt.is_ok(),
            error: attempt.err().map(|e| e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Delivered,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    /// Unknown labels read back as `Failed`.
    pub fn parse(label: &str) -> Self {
        match label {
            "pending" => Self::Pending,
            "delivered" => Self::Delivered,
            _ => Self::Failed,
        }
    }
}

/// A routed notification with its plan and delivery outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaffNotification {
    pub notification_id: String,
    pub kind: NotificationType,
    pub urgency: Urgency,
    pub caller: CallerInfo,
    pub content: String,
    pub plan: DeliveryPlan,
    pub results: Vec<DeliveryResult>,
    pub status: NotificationStatus,
    pub created_at: String,
}

/// `[notifications]` configuration section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub sms: SmsProviderConfig,
    #[serde(default)]
    pub email: EmailProviderConfig,
    #[serde(default)]
    pub contacts: StaffContacts,
    /// Per-type overrides of the built-in routes.
    #[serde(default)]
    pub routes: HashMap<NotificationType, Route>,
}

impl NotificationConfig {
    pub fn route_table(&self) -> RouteTable {
        RouteTable::from_contacts(&self.contacts).with_overrides(&self.routes)
    }
}
