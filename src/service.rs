//! Line-oriented recognition service
//!
//! One base64-encoded image per stdin line, one recognized text per stdout
//! line. Stdout carries nothing else besides the single `OCR_READY` banner
//! printed once initialization is done; diagnostics go to the log on stderr.
//! Every request also lands in the store like pipeline output. End-of-input
//! and an interrupt both end the loop cleanly: the in-flight request is
//! finished and persisted before the process exits.

use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tracing::{debug, error, info};

use crate::capture::RawCapture;
use crate::ocr::{confidence, decode, filter_allowed, OcrEngine};
use crate::storage::{timestamp_now, CaptchaRecord, CaptchaStore};
use crate::vision::{encode_png, normalize, render_overlay};

/// Run the service until stdin closes or the stop flag is raised.
pub fn run(engine: Arc<dyn OcrEngine>, store: CaptchaStore, stop: Arc<AtomicBool>) -> Result<()> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    serve(engine.as_ref(), store, stdin.lock(), stdout.lock(), &stop)
}

fn serve(
    engine: &dyn OcrEngine,
    mut store: CaptchaStore,
    input: impl BufRead,
    mut out: impl Write,
    stop: &AtomicBool,
) -> Result<()> {
    // The caller waits for this exact banner before sending requests.
    writeln!(out, "OCR_READY").context("could not write readiness banner")?;
    out.flush().context("could not flush readiness banner")?;
    info!("Recognition service ready");

    let mut served = 0u64;
    for line in input.lines() {
        if stop.load(Ordering::Relaxed) {
            info!("Interrupt received, service exiting");
            break;
        }

        let line = line.context("failed reading request line")?;
        let request = line.trim();
        if request.is_empty() {
            continue;
        }

        let text = match handle_request(request, engine, &mut store) {
            Ok(text) => text,
            Err(e) => {
                error!("Request failed: {e:#}");
                String::new()
            }
        };

        writeln!(out, "{text}").context("could not write response")?;
        out.flush().context("could not flush response")?;
        served += 1;
    }

    info!("Service exiting. {served} requests served");
    Ok(())
}

/// Strip an optional `data:*;base64,` prefix; browsers hand captchas over as
/// data URIs.
fn strip_data_uri(request: &str) -> &str {
    if request.starts_with("data:") {
        match request.split_once(',') {
            Some((_, payload)) => payload,
            None => request,
        }
    } else {
        request
    }
}

fn handle_request(
    request: &str,
    engine: &dyn OcrEngine,
    store: &mut CaptchaStore,
) -> Result<String> {
    let payload = strip_data_uri(request);
    let raw_bytes = BASE64
        .decode(payload)
        .context("request is not valid base64")?;

    let canonical = normalize(&raw_bytes).context("raw bytes did not decode as an image")?;

    let probs = engine.infer(&canonical).context("inference failed")?;
    let (raw_text, char_confs) = decode(&probs);
    let overall = confidence::score(&char_confs);
    let text = filter_allowed(&confidence::correct(&raw_text, &char_confs));
    debug!(text = %text, confidence = overall, "Service recognition");

    let raw = RawCapture {
        source_id: 0,
        raw_bytes,
        captured_at: timestamp_now(),
    };
    let overlay = render_overlay(&canonical, &text);
    let record = CaptchaRecord {
        processed_png: encode_png(&canonical).unwrap_or_default(),
        overlay_png: encode_png(&overlay).ok(),
        text: text.clone(),
        raw_b64: BASE64.encode(&raw.raw_bytes),
        confidence: overall,
        timestamp: raw.captured_at,
    };

    let start = store.next_sequence().context("sequence lookup failed")?;
    store
        .insert_batch(start, std::slice::from_ref(&record))
        .context("could not persist record")?;

    Ok(text)
}
