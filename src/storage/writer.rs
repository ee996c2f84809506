//! Persistence writer thread
//!
//! Single consumer of completed records. Batches inserts and flushes when
//! the batch fills or enough records have passed since the last commit. A
//! failed flush keeps the batch in memory and retries on the next trigger,
//! so a transient database error never drops records.

use std::sync::Arc;

use crossbeam_channel::Receiver;
use tracing::{debug, error, info};

use super::{CaptchaRecord, CaptchaStore};
use crate::pipeline::stats::PipelineStats;

/// Input to the writer thread. `Shutdown` drains nothing further; whatever
/// is buffered gets a final flush.
pub enum WriterInput {
    Record(CaptchaRecord),
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct WriterSettings {
    /// Flush once this many records are buffered.
    pub batch_size: usize,
    /// Flush at least every this many records even if batches stay short.
    pub save_interval: usize,
}

/// Run the writer until shutdown. Takes ownership of the store; nothing else
/// touches the connection while the writer lives.
pub fn run_writer(
    rx: Receiver<WriterInput>,
    mut store: CaptchaStore,
    settings: WriterSettings,
    stats: Arc<PipelineStats>,
) {
    match store.next_sequence() {
        Ok(next) => info!("Persistence writer ready. Next sequence: {next}"),
        Err(e) => error!("Persistence writer could not read sequence state: {e}"),
    }

    let batch_size = settings.batch_size.max(1);
    let save_interval = settings.save_interval.max(1);
    let mut batch: Vec<CaptchaRecord> = Vec::new();
    let mut since_flush = 0usize;
    let mut total = 0u64;

    loop {
        match rx.recv() {
            Ok(WriterInput::Record(record)) => {
                batch.push(record);
                since_flush += 1;
                total += 1;

                if batch.len() >= batch_size || since_flush >= save_interval {
                    if flush(&mut store, &mut batch, &stats) {
                        since_flush = 0;
                    }
                }
            }
            Ok(WriterInput::Shutdown) | Err(_) => break,
        }
    }

    if !flush(&mut store, &mut batch, &stats) {
        error!(
            "Final flush failed; {} records were not committed",
            batch.len()
        );
    }
    info!("Persistence writer exiting. {total} records received");
}

/// Returns true when the batch is fully committed (or was empty).
fn flush(store: &mut CaptchaStore, batch: &mut Vec<CaptchaRecord>, stats: &PipelineStats) -> bool {
    if batch.is_empty() {
        return true;
    }

    let start = match store.next_sequence() {
        Ok(start) => start,
        Err(e) => {
            error!("Could not read next sequence, retaining {} records: {e}", batch.len());
            return false;
        }
    };

    match store.insert_batch(start, batch) {
        Ok(()) => {
            debug!("Committed {} records starting at slno {start}", batch.len());
            stats.add_persisted(batch.len() as u64);
            batch.clear();
            true
        }
        Err(e) => {
            error!("Commit failed, retaining {} records: {e}", batch.len());
            false
        }
    }
}
