//! Capture worker threads
//!
//! One thread per capture source. Each worker connects with bounded retries,
//! then loops: fetch raw bytes, stamp, normalize, queue for recognition,
//! refresh the source, pause. Per-item failures back off and continue; only
//! exhausted connect retries or an exhausted source end the worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{SendTimeoutError, Sender};
use tracing::{debug, error, info, warn};

use super::{CaptureSource, RawCapture, SourceError};
use crate::config::CaptureSettings;
use crate::pipeline::messages::{CaptureItem, RecognitionInput};
use crate::pipeline::stats::PipelineStats;
use crate::storage::timestamp_now;
use crate::vision::{normalize, NormalizedImage};

#[derive(Debug, Clone)]
pub struct CaptureWorkerSettings {
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub transient_backoff: Duration,
    pub fetch_delay: Duration,
    pub image_timeout: Duration,
}

impl From<&CaptureSettings> for CaptureWorkerSettings {
    fn from(cfg: &CaptureSettings) -> Self {
        Self {
            max_retries: cfg.max_retries,
            retry_backoff: Duration::from_secs(cfg.retry_backoff_secs),
            transient_backoff: Duration::from_secs(cfg.transient_backoff_secs),
            fetch_delay: Duration::from_millis(cfg.fetch_delay_ms),
            image_timeout: Duration::from_secs(cfg.image_timeout_secs),
        }
    }
}

/// Spawn one worker thread per source. Workers stop on the cancel flag, on
/// source exhaustion, or alone when their connect retries run out; the rest
/// of the pipeline keeps running.
pub fn spawn_capture_workers(
    sources: Vec<Box<dyn CaptureSource>>,
    tx: Sender<RecognitionInput>,
    cancel: Arc<AtomicBool>,
    settings: CaptureWorkerSettings,
    stats: Arc<PipelineStats>,
) -> Vec<JoinHandle<()>> {
    sources
        .into_iter()
        .enumerate()
        .map(|(worker_idx, source)| {
            let tx = tx.clone();
            let cancel = cancel.clone();
            let settings = settings.clone();
            let stats = stats.clone();
            thread::spawn(move || capture_loop(worker_idx, source, tx, cancel, settings, stats))
        })
        .collect()
}

fn capture_loop(
    worker_idx: usize,
    mut source: Box<dyn CaptureSource>,
    tx: Sender<RecognitionInput>,
    cancel: Arc<AtomicBool>,
    settings: CaptureWorkerSettings,
    stats: Arc<PipelineStats>,
) {
    info!(worker = worker_idx, "Capture worker starting");

    if !connect_with_retries(worker_idx, source.as_mut(), &settings, &cancel) {
        source.close();
        return;
    }

    let mut captured = 0u64;
    while !cancel.load(Ordering::Relaxed) {
        let raw_bytes = match source.next_raw_image(settings.image_timeout) {
            Ok(bytes) => bytes,
            Err(SourceError::Exhausted) => {
                info!(worker = worker_idx, "Capture source exhausted");
                break;
            }
            Err(e) => {
                warn!(worker = worker_idx, "Capture failed, backing off: {e}");
                thread::sleep(settings.transient_backoff);
                continue;
            }
        };

        let raw = RawCapture {
            source_id: worker_idx,
            raw_bytes,
            captured_at: timestamp_now(),
        };

        // Undecodable bytes still flow downstream so every capture ends up
        // as exactly one stored record.
        let item = match normalize(&raw.raw_bytes) {
            Ok(canonical) => CaptureItem::Normalized(NormalizedImage { canonical, raw }),
            Err(e) => {
                warn!(worker = worker_idx, "Raw image failed to decode: {e}");
                stats.record_decode_failure();
                CaptureItem::Undecodable(raw)
            }
        };

        if !send_until_cancelled(&tx, RecognitionInput::Item(item), &cancel) {
            break;
        }
        captured += 1;
        stats.record_captured();
        debug!(worker = worker_idx, captured, "Queued captcha for recognition");

        if let Err(e) = source.refresh() {
            warn!(worker = worker_idx, "Refresh failed: {e}");
        }
        thread::sleep(settings.fetch_delay);
    }

    source.close();
    info!(worker = worker_idx, captured, "Capture worker exiting");
}

fn connect_with_retries(
    worker_idx: usize,
    source: &mut dyn CaptureSource,
    settings: &CaptureWorkerSettings,
    cancel: &AtomicBool,
) -> bool {
    let attempts = settings.max_retries.max(1);
    for attempt in 1..=attempts {
        if cancel.load(Ordering::Relaxed) {
            return false;
        }
        match source.connect() {
            Ok(()) => {
                info!(worker = worker_idx, "Capture source connected");
                return true;
            }
            Err(e) => {
                error!(
                    worker = worker_idx,
                    "Connect attempt {attempt}/{attempts} failed: {e}"
                );
                if attempt < attempts {
                    thread::sleep(settings.retry_backoff);
                }
            }
        }
    }
    error!(worker = worker_idx, "Connect retries exhausted, worker giving up");
    false
}

/// Blocking send that stays responsive to cancellation. Returns false when
/// cancelled or when the recognition side is gone.
fn send_until_cancelled(
    tx: &Sender<RecognitionInput>,
    msg: RecognitionInput,
    cancel: &AtomicBool,
) -> bool {
    let mut msg = msg;
    loop {
        if cancel.load(Ordering::Relaxed) {
            return false;
        }
        match tx.send_timeout(msg, Duration::from_millis(100)) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(returned)) => msg = returned,
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}
