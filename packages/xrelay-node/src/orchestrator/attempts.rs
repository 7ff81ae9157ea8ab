use std::collections::VecDeque;
use std::sync::Mutex;

use crate::types::RelayAttempt;

/// Bounded ring of recent relay attempts, newest last
pub struct AttemptLog {
    capacity: usize,
    entries: Mutex<VecDeque<RelayAttempt>>,
}

impl AttemptLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    pub fn record(&self, attempt: RelayAttempt) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(attempt);
    }

    /// Up to `limit` attempts, newest first
    pub fn recent(&self, limit: usize) -> Vec<RelayAttempt> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
