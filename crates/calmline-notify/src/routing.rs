//! Routing table: which channels and addresses each notification type uses.

use std::collections::HashMap;

use calmline_types::{NotificationType, Urgency};
use serde::{Deserialize, Serialize};

/// Delivery destinations for one notification type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// SMS number, used only for urgent notifications.
    #[serde(default)]
    pub sms: Option<String>,
    pub email: String,
    #[serde(default)]
    pub cc: Vec<String>,
}

/// Staff addresses the built-in routes are derived from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffContacts {
    #[serde(default)]
    pub front_desk_email: String,
    #[serde(default)]
    pub front_desk_sms: Option<String>,
    #[serde(default)]
    pub clinical_email: String,
    #[serde(default)]
    pub on_call_sms: Option<String>,
    #[serde(default)]
    pub billing_email: String,
    #[serde(default)]
    pub billing_sms: Option<String>,
    #[serde(default)]
    pub intake_email: String,
}

/// The channels a single notification will be attempted on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryPlan {
    pub sms: Option<String>,
    pub email: String,
    pub cc: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTable {
    routes: HashMap<NotificationType, Route>,
}

impl RouteTable {
    /// Built-in routes for every notification type.
    pub fn from_contacts(contacts: &StaffContacts) -> Self {
        let front_desk = contacts.front_desk_email.clone();
        let clinical = or_fallback(&contacts.clinical_email, &front_desk);
        let billing = or_fallback(&contacts.billing_email, &front_desk);
        let intake = or_fallback(&contacts.intake_email, &front_desk);

        let route = |sms: Option<&String>, email: &str, cc: Vec<String>| Route {
            sms: sms.cloned(),
            email: email.to_string(),
            cc,
        };

        let routes = NotificationType::all()
            .into_iter()
            .map(|kind| {
                let r = match kind {
                    NotificationType::Crisis => route(
                        contacts.on_call_sms.as_ref(),
                        &clinical,
                        cc_unless_same(&front_desk, &clinical),
                    ),
                    NotificationType::Billing => route(
                        contacts.billing_sms.as_ref().or(contacts.front_desk_sms.as_ref()),
                        &billing,
                        Vec::new(),
                    ),
                    NotificationType::CareManagement => route(
                        contacts.on_call_sms.as_ref(),
                        &clinical,
                        cc_unless_same(&front_desk, &clinical),
                    ),
                    NotificationType::NewIntake => route(None, &intake, Vec::new()),
                    NotificationType::AppointmentChange
                    | NotificationType::Callback
                    | NotificationType::General => {
                        route(contacts.front_desk_sms.as_ref(), &front_desk, Vec::new())
                    }
                };
                (kind, r)
            })
            .collect();

        Self { routes }
    }

    /// Replaces built-in routes with configured ones.
    pub fn with_overrides(mut self, overrides: &HashMap<NotificationType, Route>) -> Self {
        for (kind, route) in overrides {
            self.routes.insert(*kind, route.clone());
        }
        self
    }

    pub fn route(&self, kind: NotificationType) -> Option<&Route> {
        self.routes.get(&kind)
    }

    /// Email is always attempted; SMS only for urgent notifications with a
    /// configured number.
    pub fn plan(&self, kind: NotificationType, urgency: Urgency) -> DeliveryPlan {
        let route = self.routes.get(&kind).cloned().unwrap_or_default();
        let sms = route
            .sms
            .filter(|number| urgency.allows_sms() && !number.trim().is_empty());
        DeliveryPlan {
            sms,
            email: route.email,
            cc: route.cc,
        }
    }
}

fn or_fallback(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

fn cc_unless_same(cc: &str, to: &str) -> Vec<String> {
    if cc.is_empty() || cc == to {
        Vec::new()
    } else {
        vec![cc.to_string()]
    }
}
