//! Reference counts for frame buffers handed out to stream clients.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    NoConsumers,
    /// The id is still held by clients; the existing record is kept.
    Duplicate,
}

/// Tracks in-flight HAL buffers and how many clients still hold each one.
///
/// A buffer is released to the HAL exactly once: when `acknowledge` brings its
/// count to zero. Records with a zero count are never stored.
#[derive(Debug, Default)]
pub struct FrameLedger {
    records: HashMap<u32, usize>,
}

impl FrameLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a frame held by `consumers` clients. Anything but
    /// [`RecordOutcome::Recorded`] means the caller returns the frame to the
    /// HAL at once without delivering it.
    pub fn record(&mut self, frame_id: u32, consumers: usize) -> RecordOutcome {
        if consumers == 0 {
            return RecordOutcome::NoConsumers;
        }
        if let Some(outstanding) = self.records.get(&frame_id) {
            tracing::warn!(
                frame_id,
                outstanding,
                "HAL reused a buffer id that is still outstanding; dropping the frame"
            );
            return RecordOutcome::Duplicate;
        }
        self.records.insert(frame_id, consumers);
        RecordOutcome::Recorded
    }

    /// Drops one reference. Returns the remaining count, or `None` for an
    /// unknown frame id. A return of `Some(0)` means the frame must be released.
    pub fn acknowledge(&mut self, frame_id: u32) -> Option<usize> {
        let Some(count) = self.records.get_mut(&frame_id) else {
            tracing::debug!(frame_id, "Ignoring acknowledgement for unknown buffer");
            return None;
        };
        *count -= 1;
        let remaining = *count;
        if remaining == 0 {
            self.records.remove(&frame_id);
        }
        Some(remaining)
    }

    pub fn outstanding(&self, frame_id: u32) -> Option<usize> {
        self.records.get(&frame_id).copied()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        if !self.records.is_empty() {
            tracing::debug!(outstanding = self.records.len(), "Clearing frame ledger");
        }
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn releases_after_all_consumers_acknowledge() {
        let mut ledger = FrameLedger::new();
        assert_eq!(ledger.record(7, 3), RecordOutcome::Recorded);
        assert_eq!(ledger.acknowledge(7), Some(2));
        assert_eq!(ledger.acknowledge(7), Some(1));
        assert_eq!(ledger.acknowledge(7), Some(0));
        assert!(ledger.is_empty());
    }

    #[test]
    fn zero_consumers_are_not_recorded() {
        let mut ledger = FrameLedger::new();
        assert_eq!(ledger.record(1, 0), RecordOutcome::NoConsumers);
        assert_eq!(ledger.outstanding(1), None);
    }

    #[test]
    fn unknown_and_duplicate_acknowledgements_are_ignored() {
        let mut ledger = FrameLedger::new();
        assert_eq!(ledger.acknowledge(99), None);

        let _ = ledger.record(5, 1);
        assert_eq!(ledger.acknowledge(5), Some(0));
        // Second acknowledgement must not release the frame again.
        assert_eq!(ledger.acknowledge(5), None);
    }

    #[test]
    fn reused_outstanding_id_keeps_the_original_count() {
        let mut ledger = FrameLedger::new();
        assert_eq!(ledger.record(4, 2), RecordOutcome::Recorded);
        assert_eq!(ledger.record(4, 1), RecordOutcome::Duplicate);
        assert_eq!(ledger.outstanding(4), Some(2));

        // The late acknowledgement of the first frame does not release it early.
        assert_eq!(ledger.acknowledge(4), Some(1));
        assert_eq!(ledger.acknowledge(4), Some(0));
    }

    #[test]
    fn clear_drops_all_records() {
        let mut ledger = FrameLedger::new();
        let _ = ledger.record(1, 2);
        let _ = ledger.record(2, 1);
        assert_eq!(ledger.len(), 2);
        ledger.clear();
        assert!(ledger.is_empty());
        assert_eq!(ledger.acknowledge(1), None);
    }
}
