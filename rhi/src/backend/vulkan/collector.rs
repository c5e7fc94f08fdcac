//! Retirement of objects referenced by in-flight GPU work.
//!
//! Objects handed to a queue (command lists, the resources they reference,
//! timelines they wait on) cannot be dropped while the GPU may still touch
//! them. Each queue signals an internal timeline semaphore with every
//! submission; the collector holds the submitted objects tagged with that
//! value and drops them once the timeline has passed it.
//!
//! ```text
//! submit #41 ──► pending: [(41, objs)]
//! submit #42 ──► pending: [(41, objs), (42, objs)]
//! timeline = 41 ──► collect(41) drops objs of #41
//! ```

use std::collections::VecDeque;

use parking_lot::Mutex;

/// Objects waiting for a timeline value.
pub struct ObjectCollector<T> {
    pending: Mutex<VecDeque<(u64, T)>>,
}

impl<T> ObjectCollector<T> {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Hold `objects` until the timeline reaches `value`. Values must be
    /// pushed in increasing order.
    pub fn push(&self, value: u64, objects: T) {
        let mut pending = self.pending.lock();
        debug_assert!(
            pending.back().is_none_or(|(last, _)| *last <= value),
            "collector values must not decrease"
        );
        pending.push_back((value, objects));
    }

    /// Drop everything whose value is at or below `completed_value`.
    /// Returns the number of entries released.
    pub fn collect(&self, completed_value: u64) -> usize {
        let released: Vec<T> = {
            let mut pending = self.pending.lock();
            let count = pending
                .iter()
                .take_while(|(value, _)| *value <= completed_value)
                .count();
            pending.drain(..count).map(|(_, objects)| objects).collect()
        };
        // Dropped outside the lock
        released.len()
    }

    /// Drop everything. The caller must ensure the device is idle.
    pub fn collect_all(&self) -> usize {
        let released: Vec<(u64, T)> = self.pending.lock().drain(..).collect();
        released.len()
    }

    /// Number of entries still waiting.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl<T> Default for ObjectCollector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for ObjectCollector<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCollector")
            .field("pending_count", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_collect_releases_completed_values() {
        let collector = ObjectCollector::new();
        let object = Arc::new(());
        collector.push(1, Arc::clone(&object));
        collector.push(2, Arc::clone(&object));
        collector.push(5, Arc::clone(&object));
        assert_eq!(Arc::strong_count(&object), 4);

        assert_eq!(collector.collect(0), 0);
        assert_eq!(collector.collect(2), 2);
        assert_eq!(Arc::strong_count(&object), 2);
        assert_eq!(collector.pending_count(), 1);

        assert_eq!(collector.collect_all(), 1);
        assert_eq!(Arc::strong_count(&object), 1);
    }
}
