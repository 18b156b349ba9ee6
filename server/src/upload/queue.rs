//! Bounded concurrency tracking for upload scopes.

use std::collections::{HashSet, VecDeque};

use serde::Serialize;
use tokio::sync::Mutex;

/// What happens to a session that finds every slot taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionPolicy {
    /// Append to the FIFO wait list; promoted when a slot frees up.
    Queue,
    /// Turn the session away.
    Reject,
}

/// Point-in-time view of a queue, used for slot-availability responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotStatus {
    pub active: usize,
    pub queued: usize,
    pub max: usize,
    pub available: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    active: HashSet<String>,
    waiting: VecDeque<String>,
}

/// Active set plus FIFO wait list for one upload scope.
#[derive(Debug)]
pub struct AdmissionQueue {
    scope: &'static str,
    max_concurrent: usize,
    policy: AdmissionPolicy,
    state: Mutex<QueueState>,
}

impl AdmissionQueue {
    pub fn new(scope: &'static str, max_concurrent: usize, policy: AdmissionPolicy) -> Self {
        Self {
            scope,
            max_concurrent: max_concurrent.max(1),
            policy,
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn scope(&self) -> &'static str {
        self.scope
    }

    pub fn policy(&self) -> AdmissionPolicy {
        self.policy
    }

    /// Returns true if the session is (now) active. A false result means
    /// "queued" under [`AdmissionPolicy::Queue`] and "rejected" otherwise.
    pub async fn try_acquire(&self, id: &str) -> bool {
        let mut state = self.state.lock().await;
        if state.active.contains(id) {
            return true;
        }
        // Waiting sessions only get in through promotion, never by jumping the line.
        if state.waiting.iter().any(|w| w == id) {
            return false;
        }
        if state.active.len() < self.max_concurrent {
            state.active.insert(id.to_string());
            tracing::debug!(
                "[{}] slot granted to {id} ({}/{})",
                self.scope,
                state.active.len(),
                self.max_concurrent
            );
            return true;
        }
        if self.policy == AdmissionPolicy::Queue {
            state.waiting.push_back(id.to_string());
            tracing::info!(
                "[{}] upload {id} queued at position {}",
                self.scope,
                state.waiting.len()
            );
        }
        false
    }

    /// Drop the session from the active set and the wait list. If that frees
    /// a slot, the head of the wait list is activated and returned.
    pub async fn release(&self, id: &str) -> Option<String> {
        let mut state = self.state.lock().await;
        state.active.remove(id);
        state.waiting.retain(|w| w != id);

        if state.active.len() >= self.max_concurrent {
            return None;
        }
        let promoted = state.waiting.pop_front()?;
        state.active.insert(promoted.clone());
        tracing::info!("[{}] upload {promoted} promoted from queue", self.scope);
        Some(promoted)
    }

    /// 1-based position in the wait list.
    pub async fn queue_position(&self, id: &str) -> Option<usize> {
        self.state
            .lock()
            .await
            .waiting
            .iter()
            .position(|w| w == id)
            .map(|p| p + 1)
    }

    pub async fn snapshot(&self) -> SlotStatus {
        let state = self.state.lock().await;
        SlotStatus {
            active: state.active.len(),
            queued: state.waiting.len(),
            max: self.max_concurrent,
            available: state.active.len() < self.max_concurrent,
        }
    }
}
