//! Concurrency tests for the SessionRegistry.
//!
//! These tests verify that concurrent creates for the same call id yield
//! exactly one session and that concurrent teardown leaves no orphaned
//! call index entries.

use calmline_server::registry::{RegistryError, SessionRegistry};
use calmline_server::session::SessionInit;
use calmline_types::CallerInfo;
use std::sync::Arc;
use tokio::sync::mpsc;

fn dummy_sender() -> mpsc::Sender<String> {
    mpsc::channel::<String>(1).0
}

fn init(call_id: &str) -> SessionInit {
    SessionInit {
        call_id: call_id.to_string(),
        stream_id: format!("MZ-{}", call_id),
        tenant_id: "default".to_string(),
        caller: CallerInfo::default(),
        queue_capacity: 16,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_create_same_call_yields_one_session() {
    let registry = Arc::new(SessionRegistry::new());
    let mut handles = Vec::new();

    for _ in 0..50 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            registry.create(init("CA-race"), dummy_sender())
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.expect("task should not panic") {
            Ok(_) => created += 1,
            Err(RegistryError::Duplicate(call)) | Err(RegistryError::Initializing(call)) => {
                assert_eq!(call, "CA-race");
            }
        }
    }

    assert_eq!(created, 1);
    assert_eq!(registry.len(), 1);
    assert!(registry.session_for_call("CA-race").is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_remove_is_idempotent() {
    let registry = Arc::new(SessionRegistry::new());
    let session = registry.create(init("CA-stop"), dummy_sender()).unwrap();
    let session_id = session.session_id().to_string();

    let mut handles = Vec::new();
    for _ in 0..20 {
        let registry = registry.clone();
        let session_id = session_id.clone();
        handles.push(tokio::spawn(async move {
            registry.remove(&session_id).is_some()
        }));
    }

    let mut removed = 0;
    for handle in handles {
        if handle.await.expect("task should not panic") {
            removed += 1;
        }
    }

    assert_eq!(removed, 1);
    assert!(registry.is_empty());
    assert!(registry.session_for_call("CA-stop").is_none());
    assert!(session.is_closed());

    // The call id is free again once the old session is gone.
    assert!(registry.create(init("CA-stop"), dummy_sender()).is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_calls_create_and_remove_without_orphans() {
    let registry = Arc::new(SessionRegistry::new());
    let mut handles = Vec::new();

    for i in 0..100 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            let call_id = format!("CA{}", i);
            let session = registry
                .create(init(&call_id), dummy_sender())
                .expect("distinct call ids should not collide");
            if i % 2 == 0 {
                registry.remove(session.session_id());
            }
        }));
    }

    for handle in handles {
        handle.await.expect("task should not panic");
    }

    assert_eq!(registry.len(), 50);
    for i in 0..100 {
        let indexed = registry.session_for_call(&format!("CA{}", i)).is_some();
        assert_eq!(indexed, i % 2 == 1, "call CA{} index mismatch", i);
    }
}

#[tokio::test]
async fn test_dropped_reservation_releases_call() {
    let registry = SessionRegistry::new();
    {
        let _reservation = registry.reserve("CA-abandoned").unwrap();
        assert_eq!(
            registry.reserve("CA-abandoned").err(),
            Some(RegistryError::Initializing("CA-abandoned".to_string()))
        );
    }
    assert!(registry.reserve("CA-abandoned").is_ok());
}
