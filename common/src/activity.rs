use std::collections::VecDeque;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::types::TransitionSource;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub message: String,
    pub source: String,
    pub timestamp: DateTime<Local>,
}

impl ActivityEntry {
    pub fn new(message: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: source.into(),
            timestamp: Local::now(),
        }
    }

    pub fn for_transition(on: bool, source: TransitionSource) -> Self {
        let state = if on { "ON" } else { "OFF" };
        Self::new(
            format!("WiFi turned {state} (via {})", source.describe()),
            source.as_str(),
        )
    }
}

/// Fixed-capacity, append-only log. The oldest entry is dropped on overflow.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    capacity: usize,
    entries: VecDeque<ActivityEntry>,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Keeps only the most recent `capacity` entries of `history`.
    pub fn with_history(capacity: usize, history: Vec<ActivityEntry>) -> Self {
        let mut log = Self::new(capacity);
        let skip = history.len().saturating_sub(log.capacity);
        log.entries.extend(history.into_iter().skip(skip));
        log
    }

    pub fn push(&mut self, entry: ActivityEntry) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn entries(&self) -> Vec<ActivityEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_drops_oldest_entries() {
        let mut log = ActivityLog::new(3);
        for i in 0..5 {
            log.push(ActivityEntry::new(format!("event {i}"), "system"));
        }

        let messages: Vec<String> = log.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["event 2", "event 3", "event 4"]);
    }

    #[test]
    fn history_is_trimmed_to_most_recent() {
        let history: Vec<_> = (0..30)
            .map(|i| ActivityEntry::new(format!("old {i}"), "system"))
            .collect();
        let log = ActivityLog::with_history(25, history);

        assert_eq!(log.len(), 25);
        assert_eq!(log.entries()[0].message, "old 5");
        assert_eq!(log.entries()[24].message, "old 29");
    }

    #[test]
    fn transition_entries_name_the_trigger() {
        let entry = ActivityEntry::for_transition(true, TransitionSource::ButtonOn);
        assert_eq!(entry.message, "WiFi turned ON (via physical button)");
        assert_eq!(entry.source, "button-on");

        let entry = ActivityEntry::for_transition(false, TransitionSource::AutoOff);
        assert_eq!(entry.message, "WiFi turned OFF (via auto-off timer)");
    }
}
