//! Confidence gate.
//!
//! Blocks execution only when the translator *reports* a confidence below the
//! threshold. A missing confidence passes: not every translator scores its
//! output.

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Copy)]
pub struct ConfidenceGate {
    threshold: f64,
}

impl ConfidenceGate {
    /// `threshold` is clamped to `[0.0, 1.0]`.
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn should_execute(&self, confidence: Option<f64>) -> bool {
        match confidence {
            Some(c) => c >= self.threshold,
            None => true,
        }
    }

    /// Whole percentage to report for a blocked confidence. Rounded like
    /// [`confidence_percent`], but never shown at or above the threshold.
    pub fn blocked_percent(&self, confidence: f64) -> u32 {
        let threshold = confidence_percent(self.threshold);
        confidence_percent(confidence).min(threshold.saturating_sub(1))
    }
}

impl Default for ConfidenceGate {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

/// Confidence as a whole percentage, e.g. `0.4` → `40`.
pub fn confidence_percent(confidence: f64) -> u32 {
    (confidence.clamp(0.0, 1.0) * 100.0).round() as u32
}
