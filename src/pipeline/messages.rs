//! Messages flowing between pipeline stages

use crate::capture::RawCapture;
use crate::vision::NormalizedImage;

/// What a capture worker hands to recognition. Captures whose bytes never
/// decoded still travel the full pipeline and end up as empty-text records.
pub enum CaptureItem {
    Normalized(NormalizedImage),
    Undecodable(RawCapture),
}

/// Input to a recognition worker. One `Shutdown` sentinel per worker ends it
/// after the queue ahead of the sentinel has drained.
pub enum RecognitionInput {
    Item(CaptureItem),
    Shutdown,
}
