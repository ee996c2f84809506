//! Confidence scoring and low-confidence character correction

/// Per-step probabilities at or below this mark the end of usable signal.
const SIGNAL_FLOOR: f32 = 0.10;
/// Characters below this confidence are candidates for confusion correction.
const CORRECTION_THRESHOLD: f32 = 0.6;

/// Overall confidence as a 0-100 percentage: the geometric mean of the
/// leading run of per-character probabilities above the signal floor. An
/// immediate sub-floor step means the sequence carried no signal at all.
pub fn score(char_confidences: &[f32]) -> f32 {
    let run: Vec<f32> = char_confidences
        .iter()
        .copied()
        .take_while(|&p| p > SIGNAL_FLOOR)
        .collect();

    if run.is_empty() {
        return 0.0;
    }

    let mean_log: f32 = run.iter().map(|p| p.ln()).sum::<f32>() / run.len() as f32;
    mean_log.exp() * 100.0
}

/// Fixed symmetric confusion table for visually similar characters.
///
/// The source data also paired '0' with 'Q', which collides with '0'/'O' in
/// a plain mapping; only the '0'/'O' pairing is kept here.
pub fn confusion_substitute(ch: char) -> Option<char> {
    let sub = match ch {
        '0' => 'O',
        'O' => '0',
        '1' => 'I',
        'I' => '1',
        '5' => 'S',
        'S' => '5',
        '8' => 'B',
        'B' => '8',
        '6' => 'G',
        'G' => '6',
        '2' => 'Z',
        'Z' => '2',
        'b' => 'd',
        'd' => 'b',
        'p' => 'q',
        'q' => 'p',
        '9' => 'g',
        'g' => '9',
        _ => return None,
    };
    Some(sub)
}

/// Substitute low-confidence characters through the confusion table. Applied
/// only when a confidence is available for every character; letter case is
/// never forced.
pub fn correct(text: &str, char_confidences: &[f32]) -> String {
    if text.is_empty() || text.chars().count() != char_confidences.len() {
        return text.to_string();
    }

    text.chars()
        .zip(char_confidences)
        .map(|(ch, &conf)| {
            if conf < CORRECTION_THRESHOLD {
                confusion_substitute(ch).unwrap_or(ch)
            } else {
                ch
            }
        })
        .collect()
}
