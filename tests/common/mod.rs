//! Common test utilities for all integration tests.
//!
//! Provides event recorders, secret fixtures and wiremock helpers for a fake
//! Vault server.

#![allow(dead_code)]
#![allow(clippy::duplicate_mod)]

pub mod vault;

use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vault_lifecycle::events::{LifecycleEvent, ListenerResult};
use vault_lifecycle::{Lease, SecretResponse};

/// Collects every event it receives, in delivery order.
pub struct EventLog<E> {
    events: Arc<Mutex<Vec<E>>>,
}

impl<E> Clone for EventLog<E> {
    fn clone(&self) -> Self {
        Self { events: Arc::clone(&self.events) }
    }
}

impl<E: LifecycleEvent + Clone> EventLog<E> {
    pub fn new() -> Self {
        Self { events: Arc::new(Mutex::new(Vec::new())) }
    }

    /// A listener appending to this log.
    pub fn listener(&self) -> impl Fn(&E) -> ListenerResult + Send + Sync + 'static {
        let events = Arc::clone(&self.events);
        move |event: &E| -> ListenerResult {
            events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    pub fn events(&self) -> Vec<E> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|event| event.kind()).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }
}

/// A database-style secret with a username and password.
pub fn database_secret(
    lease_id: &str,
    ttl_secs: u64,
    renewable: bool,
    password: &str,
) -> SecretResponse {
    let data = json!({ "username": "app", "password": password });
    SecretResponse::new(
        data.as_object().cloned().unwrap(),
        Lease::of(lease_id, Duration::from_secs(ttl_secs), renewable),
    )
}

/// Listener that always fails.
pub fn failing_listener<E: 'static>() -> impl Fn(&E) -> ListenerResult + Send + Sync + 'static {
    |_event: &E| -> ListenerResult { Err("listener failure".into()) }
}

/// Listener that always panics.
pub fn panicking_listener<E: 'static>() -> impl Fn(&E) -> ListenerResult + Send + Sync + 'static {
    |_event: &E| -> ListenerResult { panic!("listener panic") }
}
