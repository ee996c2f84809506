//! Capture Source layer
//!
//! A capture source yields raw encoded captcha images on demand and can be
//! asked to refresh. The site-specific automation that feeds a production
//! deployment lives behind this trait; the built-in [`DirectorySource`]
//! replays previously saved captcha files for offline runs and testing.

pub mod worker;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use thiserror::Error;

pub use worker::spawn_capture_workers;

/// A single raw captcha as it came off the source. Consumed exactly once by
/// the normalizer; only derived artifacts persist.
pub struct RawCapture {
    pub source_id: usize,
    pub raw_bytes: Vec<u8>,
    pub captured_at: DateTime<FixedOffset>,
}

/// Capture-source failures. Connect failures are retried with bounded
/// attempts at the worker level; per-item failures back off without killing
/// the worker.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("capture source unreachable: {0}")]
    Connect(String),
    #[error("timed out after {0:?} waiting for the next image")]
    Timeout(Duration),
    #[error("refresh failed: {0}")]
    Refresh(String),
    #[error("source has no more images")]
    Exhausted,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Collaborator yielding raw captcha images.
pub trait CaptureSource: Send {
    /// Establish the session. Called once per connect attempt.
    fn connect(&mut self) -> Result<(), SourceError>;

    /// Fetch the next raw encoded image, waiting up to `timeout`.
    fn next_raw_image(&mut self, timeout: Duration) -> Result<Vec<u8>, SourceError>;

    /// Ask the source to present a fresh captcha.
    fn refresh(&mut self) -> Result<(), SourceError>;

    /// Tear the session down. Must be safe to call after a failed connect.
    fn close(&mut self);
}

/// Replays encoded captcha images from a directory, in sorted filename
/// order. With several capture workers over the same directory, each worker
/// takes a strided slice so no image is queued twice.
pub struct DirectorySource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
    offset: usize,
    stride: usize,
}

impl DirectorySource {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self::strided(dir, 0, 1)
    }

    /// A source that serves files at positions `offset, offset+stride, ...`.
    pub fn strided(dir: impl AsRef<Path>, offset: usize, stride: usize) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            files: Vec::new(),
            next: 0,
            offset,
            stride: stride.max(1),
        }
    }
}

impl CaptureSource for DirectorySource {
    fn connect(&mut self) -> Result<(), SourceError> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(SourceError::Connect(format!(
                "no files in {}",
                self.dir.display()
            )));
        }

        self.files = files;
        self.next = self.offset;
        Ok(())
    }

    fn next_raw_image(&mut self, _timeout: Duration) -> Result<Vec<u8>, SourceError> {
        let Some(path) = self.files.get(self.next) else {
            return Err(SourceError::Exhausted);
        };
        let bytes = std::fs::read(path)?;
        self.next += self.stride;
        Ok(bytes)
    }

    fn refresh(&mut self) -> Result<(), SourceError> {
        // Replay sources advance on read; nothing to refresh.
        Ok(())
    }

    fn close(&mut self) {
        self.files.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_source_replays_in_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.png"), b"second").unwrap();
        std::fs::write(dir.path().join("a.png"), b"first").unwrap();

        let mut source = DirectorySource::new(dir.path());
        source.connect().unwrap();
        assert_eq!(
            source.next_raw_image(Duration::from_secs(1)).unwrap(),
            b"first"
        );
        assert_eq!(
            source.next_raw_image(Duration::from_secs(1)).unwrap(),
            b"second"
        );
        assert!(matches!(
            source.next_raw_image(Duration::from_secs(1)),
            Err(SourceError::Exhausted)
        ));
    }

    #[test]
    fn test_directory_source_strides_partition_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a", "b", "c", "d"] {
            std::fs::write(dir.path().join(name), name.as_bytes()).unwrap();
        }

        let mut first = DirectorySource::strided(dir.path(), 0, 2);
        let mut second = DirectorySource::strided(dir.path(), 1, 2);
        first.connect().unwrap();
        second.connect().unwrap();

        let t = Duration::from_secs(1);
        assert_eq!(first.next_raw_image(t).unwrap(), b"a");
        assert_eq!(second.next_raw_image(t).unwrap(), b"b");
        assert_eq!(first.next_raw_image(t).unwrap(), b"c");
        assert_eq!(second.next_raw_image(t).unwrap(), b"d");
    }

    #[test]
    fn test_empty_directory_fails_connect() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = DirectorySource::new(dir.path());
        assert!(matches!(source.connect(), Err(SourceError::Connect(_))));
    }
}
