//! Process-wide table of active call sessions.
//!
//! Sessions are keyed by session id, with a reverse index from call id.
//! Creation goes through a [`Reservation`]: the call id is claimed first
//! (`Initializing`), the session is built, then the slot becomes `Active`.
//! A second create for the same call id while the first is still
//! initializing is rejected, as is a create for a call that already has a
//! live session.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::session::{Session, SessionInit};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Another create for this call is in progress; retry shortly.
    #[error("session for call {0} is still initializing")]
    Initializing(String),

    #[error("call {0} already has an active session")]
    Duplicate(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CallSlot {
    Initializing,
    Active(String),
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, Arc<Session>>>,
    calls: Arc<DashMap<String, CallSlot>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `call_id` for a session about to be built.
    pub fn reserve(&self, call_id: &str) -> Result<Reservation, RegistryError> {
        match self.calls.entry(call_id.to_string()) {
            Entry::Occupied(slot) => match slot.get() {
                CallSlot::Initializing => Err(RegistryError::Initializing(call_id.to_string())),
                CallSlot::Active(_) => Err(RegistryError::Duplicate(call_id.to_string())),
            },
            Entry::Vacant(slot) => {
                slot.insert(CallSlot::Initializing);
                Ok(Reservation {
                    registry: self.clone(),
                    call_id: call_id.to_string(),
                    session_id: uuid::Uuid::new_v4().to_string(),
                    activated: false,
                })
            }
        }
    }

    /// Reserves and activates in one step.
    pub fn create(
        &self,
        init: SessionInit,
        outbound: mpsc::Sender<String>,
    ) -> Result<Arc<Session>, RegistryError> {
        let reservation = self.reserve(&init.call_id)?;
        Ok(reservation.activate(init, outbound))
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Session id currently serving `call_id`.
    pub fn session_for_call(&self, call_id: &str) -> Option<String> {
        self.calls.get(call_id).and_then(|slot| match slot.value() {
            CallSlot::Active(id) => Some(id.clone()),
            CallSlot::Initializing => None,
        })
    }

    /// Removes and closes a session. Removing an unknown id is a no-op.
    pub fn remove(&self, session_id: &str) -> Option<Arc<Session>> {
        let (_, session) = self.sessions.remove(session_id)?;
        self.calls.remove_if(session.call_id(), |_, slot| {
            *slot == CallSlot::Active(session_id.to_string())
        });
        session.close();
        tracing::info!(
            session_id,
            call_id = session.call_id(),
            "session removed"
        );
        Some(session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Ids of sessions without transport activity for at least `max_idle`.
    pub fn idle_sessions(&self, max_idle: Duration) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().idle_for() >= max_idle)
            .map(|entry| entry.key().clone())
            .collect()
    }
}

/// A claimed call id. Dropping it without activating releases the claim.
pub struct Reservation {
    registry: SessionRegistry,
    call_id: String,
    session_id: String,
    activated: bool,
}

impl Reservation {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn activate(mut self, init: SessionInit, outbound: mpsc::Sender<String>) -> Arc<Session> {
        let session = Arc::new(Session::new(self.session_id.clone(), init, outbound));
        self.registry
            .sessions
            .insert(self.session_id.clone(), Arc::clone(&session));
        self.registry
            .calls
            .insert(self.call_id.clone(), CallSlot::Active(self.session_id.clone()));
        self.activated = true;
        tracing::info!(
            session_id = %self.session_id,
            call_id = %self.call_id,
            "session created"
        );
        session
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.activated {
            self.registry
                .calls
                .remove_if(&self.call_id, |_, slot| *slot == CallSlot::Initializing);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calmline_types::CallerInfo;

    fn init(call_id: &str) -> SessionInit {
        SessionInit {
            call_id: call_id.to_string(),
            stream_id: format!("MZ-{}", call_id),
            tenant_id: "default".to_string(),
            caller: CallerInfo::default(),
            queue_capacity: 10,
        }
    }

    fn outbound() -> mpsc::Sender<String> {
        mpsc::channel(1).0
    }

    #[test]
    fn create_indexes_by_session_and_call() {
        let registry = SessionRegistry::new();
        let session = registry.create(init("CA1"), outbound()).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.session_for_call("CA1").as_deref(),
            Some(session.session_id())
        );
        assert!(registry.get(session.session_id()).is_some());
    }

    #[test]
    fn create_during_initialization_is_rejected() {
        let registry = SessionRegistry::new();
        let reservation = registry.reserve("CA1").unwrap();
        assert_eq!(
            registry.create(init("CA1"), outbound()).err(),
            Some(RegistryError::Initializing("CA1".to_string()))
        );
        assert!(registry.session_for_call("CA1").is_none());

        reservation.activate(init("CA1"), outbound());
        assert_eq!(
            registry.create(init("CA1"), outbound()).err(),
            Some(RegistryError::Duplicate("CA1".to_string()))
        );
    }

    #[test]
    fn abandoned_reservation_releases_the_call() {
        let registry = SessionRegistry::new();
        drop(registry.reserve("CA1").unwrap());
        assert!(registry.create(init("CA1"), outbound()).is_ok());
    }

    #[test]
    fn remove_is_idempotent_and_closes() {
        let registry = SessionRegistry::new();
        let session = registry.create(init("CA1"), outbound()).unwrap();
        let id = session.session_id().to_string();

        assert!(registry.remove(&id).is_some());
        assert!(registry.remove(&id).is_none());
        assert!(session.is_closed());
        assert!(registry.is_empty());
        assert!(registry.session_for_call("CA1").is_none());
        assert!(registry.create(init("CA1"), outbound()).is_ok());
    }

    #[test]
    fn stale_remove_keeps_the_replacement_index() {
        let registry = SessionRegistry::new();
        let first = registry.create(init("CA1"), outbound()).unwrap();
        let first_id = first.session_id().to_string();
        registry.remove(&first_id);
        let second = registry.create(init("CA1"), outbound()).unwrap();

        assert!(registry.remove(&first_id).is_none());
        assert_eq!(
            registry.session_for_call("CA1").as_deref(),
            Some(second.session_id())
        );
    }
}
