//! Event Registry
//!
//! Per-worker table of the output patterns a test cares about and whether
//! each one has been seen yet. The watcher task is the only writer; tests
//! and the waiter read it concurrently through cheap clones.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;

use crate::error::{HarnessError, HarnessResult};

/// The output line that first satisfied a pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObservedEvent {
    pub pattern: String,
    pub line: String,
    /// 1-based position of the line in the worker's combined output
    pub line_number: u64,
    pub observed_at: DateTime<Utc>,
}

/// Point-in-time view of one registry entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventStatus {
    pub pattern: String,
    pub observed: Option<ObservedEvent>,
}

#[derive(Debug)]
struct Entry {
    pattern: String,
    regex: Regex,
    observed: Option<ObservedEvent>,
}

#[derive(Debug, Clone)]
pub struct EventRegistry {
    entries: Arc<Mutex<Vec<Entry>>>,
}

impl EventRegistry {
    /// Compile every pattern; all start unobserved
    pub fn new(patterns: &[String]) -> HarnessResult<Self> {
        let mut entries = Vec::with_capacity(patterns.len());

        for pattern in patterns {
            if entries.iter().any(|entry: &Entry| entry.pattern == *pattern) {
                return Err(HarnessError::config(
                    "event_patterns",
                    format!("pattern '{pattern}' is listed more than once"),
                ));
            }
            let regex = Regex::new(pattern).map_err(|source| HarnessError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })?;
            entries.push(Entry {
                pattern: pattern.clone(),
                regex,
                observed: None,
            });
        }

        Ok(Self {
            entries: Arc::new(Mutex::new(entries)),
        })
    }

    // A panicking reader cannot leave an entry half-written, so the data
    // behind a poisoned lock is still consistent.
    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, pattern: &str) -> bool {
        self.lock().iter().any(|entry| entry.pattern == pattern)
    }

    /// `false` for patterns that are not registered
    pub fn is_observed(&self, pattern: &str) -> bool {
        self.observed(pattern).is_some()
    }

    pub fn observed(&self, pattern: &str) -> Option<ObservedEvent> {
        self.lock()
            .iter()
            .find(|entry| entry.pattern == pattern)
            .and_then(|entry| entry.observed.clone())
    }

    /// Registered patterns in configuration order
    pub fn patterns(&self) -> Vec<String> {
        self.lock().iter().map(|entry| entry.pattern.clone()).collect()
    }

    pub fn pending(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|entry| entry.observed.is_none())
            .map(|entry| entry.pattern.clone())
            .collect()
    }

    pub fn all_observed(&self) -> bool {
        self.lock().iter().all(|entry| entry.observed.is_some())
    }

    pub fn snapshot(&self) -> Vec<EventStatus> {
        self.lock()
            .iter()
            .map(|entry| EventStatus {
                pattern: entry.pattern.clone(),
                observed: entry.observed.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Match one output line against every unobserved pattern.
    ///
    /// Returns the patterns that became observed because of this line.
    /// Observed patterns stay observed; later matches do not replace the
    /// recorded line.
    pub(crate) fn observe(&self, line: &str, line_number: u64) -> Vec<String> {
        let mut entries = self.lock();
        let mut newly_observed = Vec::new();

        for entry in entries.iter_mut() {
            if entry.observed.is_some() || !entry.regex.is_match(line) {
                continue;
            }
            entry.observed = Some(ObservedEvent {
                pattern: entry.pattern.clone(),
                line: line.to_string(),
                line_number,
                observed_at: Utc::now(),
            });
            newly_observed.push(entry.pattern.clone());
        }

        newly_observed
    }
}
