//! Per-thread cancellation tokens.
//!
//! Each running turn registers a token keyed by thread id. The cancel
//! endpoint looks it up and fires it; every suspension point in the turn
//! observes the token, which bounds cancel-to-close latency.

use std::collections::HashMap;

use parking_lot::Mutex;

use wv_domain::cancel::CancelToken;

/// Tracks active cancellation tokens per thread.
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Create and register a new cancel token for a thread. A previous
    /// token for the same thread is replaced (orphaned, not cancelled).
    pub fn register(&self, thread_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens
            .lock()
            .insert(thread_id.to_owned(), token.clone());
        token
    }

    /// Cancel a running turn. Idempotent; returns true if a token existed.
    pub fn cancel(&self, thread_id: &str) -> bool {
        if let Some(token) = self.tokens.lock().get(thread_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Remove the token (called when a turn completes).
    pub fn remove(&self, thread_id: &str) {
        self.tokens.lock().remove(thread_id);
    }

    /// Whether a thread has an active (running) turn.
    pub fn is_running(&self, thread_id: &str) -> bool {
        self.tokens.lock().contains_key(thread_id)
    }
}
