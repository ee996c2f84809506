//! Pipeline counters
//!
//! Shared across all stages; cheap to update, read for the end-of-run
//! summary and the periodic progress log.

use parking_lot::RwLock;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Items queued for recognition.
    pub captured: u64,
    /// Raw captures whose bytes were not a decodable image.
    pub decode_failures: u64,
    /// Items that went through recognition, successful or not.
    pub recognized: u64,
    /// Recognitions below the low-confidence threshold.
    pub low_confidence: u64,
    /// Inference calls that errored out.
    pub engine_failures: u64,
    /// Records committed to the store.
    pub persisted: u64,
}

#[derive(Default)]
pub struct PipelineStats {
    inner: RwLock<StatsSnapshot>,
}

impl PipelineStats {
    pub fn record_captured(&self) {
        self.inner.write().captured += 1;
    }

    pub fn record_decode_failure(&self) {
        self.inner.write().decode_failures += 1;
    }

    pub fn record_recognized(&self, low_confidence: bool) {
        let mut inner = self.inner.write();
        inner.recognized += 1;
        if low_confidence {
            inner.low_confidence += 1;
        }
    }

    pub fn record_engine_failure(&self) {
        self.inner.write().engine_failures += 1;
    }

    pub fn add_persisted(&self, count: u64) {
        self.inner.write().persisted += count;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.inner.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = PipelineStats::default();
        stats.record_captured();
        stats.record_captured();
        stats.record_recognized(true);
        stats.record_recognized(false);
        stats.add_persisted(2);

        let snap = stats.snapshot();
        assert_eq!(snap.captured, 2);
        assert_eq!(snap.recognized, 2);
        assert_eq!(snap.low_confidence, 1);
        assert_eq!(snap.persisted, 2);
        assert_eq!(snap.engine_failures, 0);
    }
}
