//! Notification routing and delivery.

use std::sync::Arc;

use calmline_db::DbPool;

use crate::error::NotifyError;
use crate::format::{email_html, email_subject, sms_body};
use crate::provider::{EmailMessage, EmailSender, SmsSender};
use crate::routing::RouteTable;
use crate::store;
use crate::{
    Channel, DeliveryResult, NotificationRequest, NotificationStatus, Notifier, StaffNotification,
};

/// Routes staff notifications to SMS and email and records the outcome.
#[derive(Clone)]
pub struct NotificationRouter {
    routes: Arc<RouteTable>,
    sms: Arc<dyn SmsSender>,
    email: Arc<dyn EmailSender>,
    pool: Option<DbPool>,
}

impl NotificationRouter {
    pub fn new(routes: RouteTable, sms: Arc<dyn SmsSender>, email: Arc<dyn EmailSender>) -> Self {
        Self {
            routes: Arc::new(routes),
            sms,
            email,
            pool: None,
        }
    }

    /// Persists notifications and their outcomes in `staff_notifications`.
    pub fn with_store(mut self, pool: DbPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Plans, delivers and records one notification.
    ///
    /// Channels are attempted independently; the status is `delivered` only
    /// when every attempted channel succeeded. Store failures are logged and
    /// do not stop delivery.
    pub async fn route(&self, request: NotificationRequest) -> StaffNotification {
        let plan = self.routes.plan(request.kind, request.urgency);
        let mut notification = StaffNotification {
            notification_id: uuid::Uuid::new_v4().to_string(),
            kind: request.kind,
            urgency: request.urgency,
            caller: request.caller.clone(),
            content: request.content.clone(),
            plan: plan.clone(),
            results: Vec::new(),
            status: NotificationStatus::Pending,
            created_at: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        };

        let persisted = match self.persist_pending(&notification).await {
            Ok(persisted) => persisted,
            Err(e) => {
                tracing::warn!(
                    notification_id = %notification.notification_id,
                    error = %e,
                    "failed to persist pending notification"
                );
                false
            }
        };

        let sms_attempt = async {
            match &plan.sms {
                Some(number) => Some(DeliveryResult::from_attempt(
                    Channel::Sms,
                    number,
                    self.sms.send_sms(number, &sms_body(&request)).await,
                )),
                None => None,
            }
        };
        let email_attempt = async {
            let message = EmailMessage {
                to: plan.email.clone(),
                cc: plan.cc.clone(),
                subject: email_subject(&request),
                html_body: email_html(&request),
            };
            DeliveryResult::from_attempt(
                Channel::Email,
                &plan.email,
                self.email.send_email(&message).await,
            )
        };
        let (sms_result, email_result) = tokio::join!(sms_attempt, email_attempt);

        notification.results = sms_result.into_iter().chain(Some(email_result)).collect();
        notification.status = if notification.results.iter().all(|r| r.success) {
            NotificationStatus::Delivered
        } else {
            NotificationStatus::Failed
        };

        for failure in notification.results.iter().filter(|r| !r.success) {
            tracing::warn!(
                notification_id = %notification.notification_id,
                channel = failure.channel.as_str(),
                error = failure.error.as_deref().unwrap_or(""),
                "notification channel failed"
            );
        }
        tracing::info!(
            notification_id = %notification.notification_id,
            kind = notification.kind.as_str(),
            urgency = notification.urgency.as_str(),
            status = notification.status.as_str(),
            "notification routed"
        );

        if persisted {
            if let Err(e) = self.persist_outcome(&notification).await {
                tracing::warn!(
                    notification_id = %notification.notification_id,
                    error = %e,
                    "failed to record notification outcome"
                );
            }
        }

        notification
    }

    async fn persist_pending(&self, notification: &StaffNotification) -> Result<bool, NotifyError> {
        let Some(pool) = self.pool.clone() else {
            return Ok(false);
        };
        let notification = notification.clone();
        tokio::task::spawn_blocking(move || -> Result<bool, NotifyError> {
            let conn = pool.get()?;
            store::insert_pending(&conn, &notification)?;
            Ok(true)
        })
        .await?
    }

    async fn persist_outcome(&self, notification: &StaffNotification) -> Result<(), NotifyError> {
        let Some(pool) = self.pool.clone() else {
            return Ok(());
        };
        let id = notification.notification_id.clone();
        let status = notification.status;
        let results = notification.results.clone();
        tokio::task::spawn_blocking(move || -> Result<(), NotifyError> {
            let conn = pool.get()?;
            store::complete(&conn, &id, status, &results)?;
            Ok(())
        })
        .await?
    }
}

impl Notifier for NotificationRouter {
    fn notify(&self, request: NotificationRequest) {
        let router = self.clone();
        tokio::spawn(async move {
            router.route(request).await;
        });
    }
}
