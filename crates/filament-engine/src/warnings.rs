//! Idempotent tracker for currently-active diagnostic conditions
//!
//! Warnings are keyed by `(subject, key)` and carry an opaque payload.
//! The boolean returns tell the observer exactly when a notification is
//! warranted: repeated identical warnings never spam, and clears report
//! whether anything was actually active.

use std::collections::HashMap;

/// Tracks the set of currently-active warnings per subject
#[derive(Debug, Default)]
pub struct WarningTracker {
    entries: HashMap<String, HashMap<String, serde_json::Value>>,
}

impl WarningTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning for `(subject, key)`.
    ///
    /// Returns `true` if the entry is new or its payload changed (the
    /// observer should be notified), `false` if the exact same payload
    /// is already active.
    pub fn set_warning(
        &mut self,
        subject: impl Into<String>,
        key: impl Into<String>,
        payload: serde_json::Value,
    ) -> bool {
        let subject_entries = self.entries.entry(subject.into()).or_default();
        let key = key.into();
        if subject_entries.get(&key) == Some(&payload) {
            return false;
        }
        subject_entries.insert(key, payload);
        true
    }

    /// Remove one warning. Returns `true` iff an entry existed.
    pub fn clear_warning(&mut self, subject: &str, key: &str) -> bool {
        let Some(subject_entries) = self.entries.get_mut(subject) else {
            return false;
        };
        let removed = subject_entries.remove(key).is_some();
        if subject_entries.is_empty() {
            self.entries.remove(subject);
        }
        removed
    }

    /// Remove every warning for a subject. Returns `true` iff at least
    /// one entry existed.
    pub fn clear_warnings(&mut self, subject: &str) -> bool {
        match self.entries.remove(subject) {
            Some(entries) => !entries.is_empty(),
            None => false,
        }
    }

    /// Currently-active warnings for a subject, if any
    pub fn active(&self, subject: &str) -> Option<&HashMap<String, serde_json::Value>> {
        self.entries.get(subject)
    }

    /// Total number of active warnings across all subjects
    pub fn len(&self) -> usize {
        self.entries.values().map(|e| e.len()).sum()
    }

    /// Whether no warnings are active
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
