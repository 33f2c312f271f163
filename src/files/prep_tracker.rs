//! Logs holding prepared transactions that have not been committed yet.

use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Counts outstanding prepare sections per log number.
///
/// A log with an outstanding prepare section is needed to recover the
/// transaction and must not be reclaimed.
#[derive(Debug, Default)]
pub struct PrepSectionTracker {
    sections: Mutex<BTreeMap<u64, u64>>,
}

impl PrepSectionTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a prepare section written to `log`.
    pub fn mark(&self, log: u64) {
        assert_ne!(log, 0, "log numbers start at 1");
        *self.sections.lock().entry(log).or_insert(0) += 1;
    }

    /// Records that a prepare section of `log` was committed or rolled back
    /// and its data flushed.
    pub fn unmark(&self, log: u64) {
        assert_ne!(log, 0, "log numbers start at 1");
        let mut sections = self.sections.lock();
        match sections.get_mut(&log) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                sections.remove(&log);
            }
            None => log::warn!("unmarking log {} without an outstanding prepare section", log),
        }
    }

    /// Smallest log with an outstanding prepare section.
    pub fn min_outstanding(&self) -> Option<u64> {
        self.sections.lock().keys().next().copied()
    }

    /// Whether `log` has an outstanding prepare section.
    pub fn contains(&self, log: u64) -> bool {
        self.sections.lock().contains_key(&log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_unmark() {
        let tracker = PrepSectionTracker::new();
        assert_eq!(tracker.min_outstanding(), None);

        tracker.mark(9);
        tracker.mark(4);
        tracker.mark(4);
        assert_eq!(tracker.min_outstanding(), Some(4));

        tracker.unmark(4);
        assert!(tracker.contains(4));
        tracker.unmark(4);
        assert!(!tracker.contains(4));
        assert_eq!(tracker.min_outstanding(), Some(9));

        // Unbalanced unmark is ignored.
        tracker.unmark(5);
        assert_eq!(tracker.min_outstanding(), Some(9));
    }

    #[test]
    fn test_concurrent_marks() {
        let tracker = PrepSectionTracker::new();
        crossbeam::scope(|s| {
            for t in 0..4u64 {
                let tracker = &tracker;
                s.spawn(move |_| {
                    for _ in 0..100 {
                        tracker.mark(10 + t);
                    }
                    for _ in 0..100 {
                        tracker.unmark(10 + t);
                    }
                });
            }
        })
        .unwrap();
        assert_eq!(tracker.min_outstanding(), None);
    }
}
