//! Storage layer
//!
//! Durable persistence of completed captcha records in SQLite, owned
//! exclusively by the single persistence writer thread.

pub mod database;
pub mod writer;

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, FixedOffset, Utc};

pub use database::{CaptchaStore, PersistenceError};
pub use writer::{run_writer, WriterInput, WriterSettings};

/// Fixed +05:30 offset used for all stored timestamps.
pub fn store_offset() -> FixedOffset {
    FixedOffset::east_opt(5 * 3600 + 30 * 60).expect("fixed +05:30 offset is valid")
}

pub fn timestamp_now() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&store_offset())
}

/// Millisecond-precision timestamp string as stored in the database.
pub fn format_timestamp(ts: &DateTime<FixedOffset>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

/// Get the application data directory
pub fn get_data_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "captchaharvester", "CaptchaHarvester")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;

    let data_dir = proj_dirs.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;

    Ok(data_dir)
}

/// Default database location under the application data directory.
pub fn default_database_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("captchas.db"))
}

/// A completed record waiting to be committed. The sequence number is not
/// part of the record; the writer assigns it at flush time.
#[derive(Debug, Clone)]
pub struct CaptchaRecord {
    /// Canonical normalized image, PNG-encoded.
    pub processed_png: Vec<u8>,
    /// Debug overlay, PNG-encoded. Absent when the raw bytes never decoded.
    pub overlay_png: Option<Vec<u8>>,
    /// Recognized text; empty on decode or engine failure.
    pub text: String,
    /// Original raw capture, base64-encoded.
    pub raw_b64: String,
    /// Overall recognition confidence, 0-100.
    pub confidence: f32,
    pub timestamp: DateTime<FixedOffset>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_format_millisecond_precision() {
        let ts = store_offset()
            .with_ymd_and_hms(2024, 3, 5, 10, 20, 30)
            .unwrap()
            + chrono::Duration::milliseconds(45);
        assert_eq!(format_timestamp(&ts), "2024-03-05 10:20:30.045");
    }

    #[test]
    fn test_store_offset_is_plus_0530() {
        assert_eq!(store_offset().local_minus_utc(), 5 * 3600 + 30 * 60);
    }
}
