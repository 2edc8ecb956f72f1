//! Per-document validation gate.
//!
//! A leaky-bucket-of-one: a validation attempt inside the minimum interval
//! since the last admitted attempt for the same document is dropped, not
//! queued. The next edit triggers a fresh attempt anyway.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::types::DocumentId;

pub(crate) struct Debouncer {
    min_interval: Duration,
    last_run: HashMap<DocumentId, Instant>,
}

impl Debouncer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_run: HashMap::new(),
        }
    }

    /// Whether a validation run for `document` may start now. Records the
    /// admission time on success.
    pub fn admit(&mut self, document: &DocumentId) -> bool {
        let now = Instant::now();
        if let Some(last) = self.last_run.get(document)
            && now.duration_since(*last) < self.min_interval
        {
            return false;
        }
        self.last_run.insert(document.clone(), now);
        true
    }

    /// Drop the entry for a closed document so the map does not grow without
    /// bound over an editing session.
    pub fn forget(&mut self, document: &DocumentId) {
        self.last_run.remove(document);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn doc(name: &str) -> DocumentId {
        DocumentId::from_path(Path::new(name))
    }

    #[test]
    fn test_first_attempt_is_admitted() {
        let mut debouncer = Debouncer::new(Duration::from_secs(60));
        assert!(debouncer.admit(&doc("/a.psl")));
    }

    #[test]
    fn test_second_attempt_within_interval_is_dropped() {
        let mut debouncer = Debouncer::new(Duration::from_secs(60));
        assert!(debouncer.admit(&doc("/a.psl")));
        assert!(!debouncer.admit(&doc("/a.psl")));
    }

    #[test]
    fn test_attempt_after_interval_is_admitted() {
        let mut debouncer = Debouncer::new(Duration::from_millis(20));
        assert!(debouncer.admit(&doc("/a.psl")));
        std::thread::sleep(Duration::from_millis(30));
        assert!(debouncer.admit(&doc("/a.psl")));
    }

    #[test]
    fn test_documents_are_independent() {
        let mut debouncer = Debouncer::new(Duration::from_secs(60));
        assert!(debouncer.admit(&doc("/a.psl")));
        assert!(debouncer.admit(&doc("/b.psl")));
        assert!(!debouncer.admit(&doc("/a.psl")));
    }

    #[test]
    fn test_forget_resets_the_gate() {
        let mut debouncer = Debouncer::new(Duration::from_secs(60));
        assert!(debouncer.admit(&doc("/a.psl")));
        debouncer.forget(&doc("/a.psl"));
        assert!(debouncer.admit(&doc("/a.psl")));
    }

    #[test]
    fn test_zero_interval_always_admits() {
        let mut debouncer = Debouncer::new(Duration::ZERO);
        assert!(debouncer.admit(&doc("/a.psl")));
        assert!(debouncer.admit(&doc("/a.psl")));
    }
}
