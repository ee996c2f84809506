//! Pipeline orchestration
//!
//! Wires capture workers, recognition workers, and the persistence writer
//! together over bounded channels and owns the shutdown order: stop capture
//! first, drain recognition with one sentinel per worker, then let the
//! writer flush and exit.

pub mod messages;
pub mod stats;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::capture::{spawn_capture_workers, CaptureSource};
use crate::capture::worker::CaptureWorkerSettings;
use crate::config::AppConfig;
use crate::ocr::{confidence, decode, filter_allowed, OcrEngine};
use crate::storage::{
    run_writer, CaptchaRecord, CaptchaStore, WriterInput, WriterSettings,
};
use crate::vision::{blank_canonical, encode_png, render_overlay};

use messages::{CaptureItem, RecognitionInput};
use stats::{PipelineStats, StatsSnapshot};

pub struct PipelineHandle {
    cancel: Arc<AtomicBool>,
    capture_handles: Vec<JoinHandle<()>>,
    recognition_handles: Vec<JoinHandle<()>>,
    writer_handle: Option<JoinHandle<()>>,
    recognition_tx: Sender<RecognitionInput>,
    writer_tx: Sender<WriterInput>,
    stats: Arc<PipelineStats>,
}

impl PipelineHandle {
    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    /// Flag that stops capture when set. Suitable for wiring to a signal
    /// handler; a `wait()` already in progress then drains and returns.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Wait for every capture source to finish naturally, then drain the
    /// rest of the pipeline. Never drops queued work.
    pub fn wait(mut self) -> StatsSnapshot {
        self.drain()
    }

    /// Stop capture as soon as possible, then drain everything already
    /// queued through recognition and persistence.
    pub fn shutdown(mut self) -> StatsSnapshot {
        self.cancel.store(true, Ordering::Relaxed);
        self.drain()
    }

    fn drain(&mut self) -> StatsSnapshot {
        for handle in self.capture_handles.drain(..) {
            let _ = handle.join();
        }

        for _ in 0..self.recognition_handles.len() {
            let _ = self.recognition_tx.send(RecognitionInput::Shutdown);
        }
        for handle in self.recognition_handles.drain(..) {
            let _ = handle.join();
        }

        let _ = self.writer_tx.send(WriterInput::Shutdown);
        if let Some(handle) = self.writer_handle.take() {
            let _ = handle.join();
        }

        let snapshot = self.stats.snapshot();
        info!(
            captured = snapshot.captured,
            recognized = snapshot.recognized,
            persisted = snapshot.persisted,
            low_confidence = snapshot.low_confidence,
            "Pipeline drained"
        );
        snapshot
    }
}

/// Start the full pipeline over the given sources. The engine is shared by
/// every recognition worker; the store belongs to the writer thread alone.
pub fn start(
    config: &AppConfig,
    sources: Vec<Box<dyn CaptureSource>>,
    engine: Arc<dyn OcrEngine>,
    store: CaptchaStore,
) -> PipelineHandle {
    let stats = Arc::new(PipelineStats::default());
    let cancel = Arc::new(AtomicBool::new(false));
    let queue_capacity = config.pipeline.queue_capacity.max(1);

    let (recognition_tx, recognition_rx) = bounded::<RecognitionInput>(queue_capacity);
    let (writer_tx, writer_rx) = bounded::<WriterInput>(queue_capacity);

    let capture_count = sources.len();
    let capture_handles = spawn_capture_workers(
        sources,
        recognition_tx.clone(),
        cancel.clone(),
        CaptureWorkerSettings::from(&config.capture),
        stats.clone(),
    );

    let recognition_count = config.recognition.workers.max(1);
    let low_threshold = config.recognition.low_confidence_threshold;
    let recognition_handles = (0..recognition_count)
        .map(|worker_idx| {
            let rx = recognition_rx.clone();
            let tx = writer_tx.clone();
            let engine = engine.clone();
            let stats = stats.clone();
            thread::spawn(move || {
                recognition_loop(worker_idx, rx, tx, engine, stats, low_threshold)
            })
        })
        .collect();

    let writer_settings = WriterSettings {
        batch_size: config.storage.batch_size,
        save_interval: config.storage.save_interval,
    };
    let writer_stats = stats.clone();
    let writer_handle =
        thread::spawn(move || run_writer(writer_rx, store, writer_settings, writer_stats));

    info!(
        capture_workers = capture_count,
        recognition_workers = recognition_count,
        queue_capacity,
        "Pipeline started"
    );

    PipelineHandle {
        cancel,
        capture_handles,
        recognition_handles,
        writer_handle: Some(writer_handle),
        recognition_tx,
        writer_tx,
        stats,
    }
}

fn recognition_loop(
    worker_idx: usize,
    rx: Receiver<RecognitionInput>,
    tx: Sender<WriterInput>,
    engine: Arc<dyn OcrEngine>,
    stats: Arc<PipelineStats>,
    low_threshold: f32,
) {
    info!(worker = worker_idx, "Recognition worker starting");
    loop {
        match rx.recv() {
            Ok(RecognitionInput::Item(item)) => {
                let record = recognize_item(item, engine.as_ref(), &stats, low_threshold);
                if tx.send(WriterInput::Record(record)).is_err() {
                    error!(
                        worker = worker_idx,
                        "Persistence writer is gone, stopping recognition"
                    );
                    break;
                }
            }
            Ok(RecognitionInput::Shutdown) | Err(_) => break,
        }
    }
    info!(worker = worker_idx, "Recognition worker exiting");
}

/// Every item becomes exactly one record. Engine failures and undecodable
/// captures degrade to empty text at zero confidence rather than dropping
/// the capture.
fn recognize_item(
    item: CaptureItem,
    engine: &dyn OcrEngine,
    stats: &PipelineStats,
    low_threshold: f32,
) -> CaptchaRecord {
    match item {
        CaptureItem::Undecodable(raw) => {
            // Empty-text records still count toward the recognition totals
            // so captured, recognized and persisted reconcile.
            stats.record_recognized(true);
            CaptchaRecord {
                processed_png: encode_png(&blank_canonical()).unwrap_or_default(),
                overlay_png: None,
                text: String::new(),
                raw_b64: BASE64.encode(&raw.raw_bytes),
                confidence: 0.0,
                timestamp: raw.captured_at,
            }
        }
        CaptureItem::Normalized(normalized) => {
            let (text, overall) = match engine.infer(&normalized.canonical) {
                Ok(probs) => {
                    let (raw_text, char_confs) = decode(&probs);
                    let overall = confidence::score(&char_confs);
                    let corrected = confidence::correct(&raw_text, &char_confs);
                    (filter_allowed(&corrected), overall)
                }
                Err(e) => {
                    error!("Inference failed: {e}");
                    stats.record_engine_failure();
                    (String::new(), 0.0)
                }
            };

            let low = overall < low_threshold;
            if low {
                warn!(text = %text, confidence = overall, "Low confidence recognition");
            } else {
                debug!(text = %text, confidence = overall, "Recognized captcha");
            }
            stats.record_recognized(low);

            let overlay = render_overlay(&normalized.canonical, &text);
            CaptchaRecord {
                processed_png: encode_png(&normalized.canonical).unwrap_or_default(),
                overlay_png: encode_png(&overlay).ok(),
                text,
                raw_b64: BASE64.encode(&normalized.raw.raw_bytes),
                confidence: overall,
                timestamp: normalized.raw.captured_at,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::RawCapture;
    use crate::ocr::{EngineError, StepProbabilities, ALPHABET};
    use crate::storage::timestamp_now;
    use crate::vision::NormalizedImage;
    use image::RgbImage;
    use ndarray::Array2;

    struct FixedEngine {
        classes: Vec<usize>,
    }

    impl OcrEngine for FixedEngine {
        fn infer(&self, _canonical: &RgbImage) -> Result<StepProbabilities, EngineError> {
            let n = ALPHABET.len() + 1;
            let mut arr = Array2::<f32>::zeros((self.classes.len() + 1, n));
            for (step, &class) in self.classes.iter().enumerate() {
                arr[[step, class]] = 0.95;
            }
            arr[[self.classes.len(), 0]] = 0.99;
            Ok(StepProbabilities::new(arr))
        }
    }

    struct BrokenEngine;

    impl OcrEngine for BrokenEngine {
        fn infer(&self, _canonical: &RgbImage) -> Result<StepProbabilities, EngineError> {
            Err(EngineError::BadOutput("broken".into()))
        }
    }

    fn normalized_item() -> CaptureItem {
        CaptureItem::Normalized(NormalizedImage {
            canonical: blank_canonical(),
            raw: RawCapture {
                source_id: 0,
                raw_bytes: vec![1, 2, 3],
                captured_at: timestamp_now(),
            },
        })
    }

    #[test]
    fn test_recognize_item_produces_text_and_overlay() {
        let stats = PipelineStats::default();
        // Classes 1 and 2 are 'A' and 'B'.
        let engine = FixedEngine { classes: vec![1, 2] };

        let record = recognize_item(normalized_item(), &engine, &stats, 70.0);
        assert_eq!(record.text, "AB");
        assert!(record.confidence > 90.0);
        assert!(record.overlay_png.is_some());
        assert!(!record.processed_png.is_empty());
        assert_eq!(stats.snapshot().recognized, 1);
        assert_eq!(stats.snapshot().low_confidence, 0);
    }

    #[test]
    fn test_engine_failure_degrades_to_empty_record() {
        let stats = PipelineStats::default();
        let record = recognize_item(normalized_item(), &BrokenEngine, &stats, 70.0);

        assert!(record.text.is_empty());
        assert_eq!(record.confidence, 0.0);
        assert_eq!(stats.snapshot().engine_failures, 1);
        // Still counted as recognized (and low confidence) so totals balance.
        assert_eq!(stats.snapshot().recognized, 1);
        assert_eq!(stats.snapshot().low_confidence, 1);
    }

    #[test]
    fn test_undecodable_capture_still_becomes_record() {
        let stats = PipelineStats::default();
        let item = CaptureItem::Undecodable(RawCapture {
            source_id: 3,
            raw_bytes: b"not an image".to_vec(),
            captured_at: timestamp_now(),
        });

        let record = recognize_item(item, &BrokenEngine, &stats, 70.0);
        assert!(record.text.is_empty());
        assert!(record.overlay_png.is_none());
        assert_eq!(record.raw_b64, BASE64.encode(b"not an image"));
        assert!(!record.processed_png.is_empty());
        // Counted as a low-confidence recognition so totals reconcile.
        assert_eq!(stats.snapshot().recognized, 1);
        assert_eq!(stats.snapshot().low_confidence, 1);
    }
}
