//! # pipedoc-server
//!
//! The upload HTTP surface and the per-session background worker.
//!
//! One worker task runs per uploaded session, strictly ordered: render →
//! extract → vision analysis → reconcile → report. Sessions run
//! concurrently but share nothing beyond the store; the legend reference a
//! BOM session consumes is resolved from the most recent completed P&ID
//! session rather than any process-global cache. Each session's flag in
//! the cancellation registry interrupts its pipeline at the next
//! suspension point.

pub mod chat;
pub mod config;
pub mod routes;
pub mod worker;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use pipedoc_core::CancelFlag;
use pipedoc_store::Store;

use crate::config::Config;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub config: Arc<Config>,
    /// Per-session cancellation flags, registered while a worker runs.
    pub cancel_flags: Arc<Mutex<HashMap<String, CancelFlag>>>,
}

impl AppState {
    /// Build state from config, opening the store.
    ///
    /// # Errors
    ///
    /// Returns an error when the store cannot be opened.
    pub fn new(config: Config) -> pipedoc_core::Result<Self> {
        let store = Store::open(&config.db_path)?;
        Ok(Self {
            store: Arc::new(store),
            config: Arc::new(config),
            cancel_flags: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Register a fresh cancellation flag for a session.
    #[must_use]
    pub fn register_cancel(&self, session_id: &str) -> CancelFlag {
        let flag = CancelFlag::new();
        self.cancel_flags
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(session_id.to_string(), flag.clone());
        flag
    }

    /// Drop a finished session's flag.
    pub fn unregister_cancel(&self, session_id: &str) {
        self.cancel_flags
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(session_id);
    }

    /// Request cancellation of a running session. Returns false when the
    /// session has no active worker.
    #[must_use]
    pub fn cancel_session(&self, session_id: &str) -> bool {
        self.cancel_flags
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(session_id)
            .map(|flag| {
                flag.cancel();
                true
            })
            .unwrap_or(false)
    }
}
