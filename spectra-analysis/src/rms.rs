//! Time-domain energy-change detection function

/// Scores each block by its relative RMS change against the previous block
#[derive(Debug, Default, Clone)]
pub struct RmsDetector {
    previous_rms: f32,
}

impl RmsDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// RMS of the last block seen
    #[inline]
    pub fn previous_rms(&self) -> f32 {
        self.previous_rms
    }

    /// Score one block as `1 - exp(-0.5 * Δ)` with `Δ = (rms - prev) / prev`.
    ///
    /// A silent previous block makes `Δ` non-finite; it counts as no change.
    pub fn evaluate(&mut self, block: &[f32]) -> f32 {
        let rms = block_rms(block);
        let delta = (rms - self.previous_rms) / self.previous_rms;
        let delta = if delta.is_finite() { delta } else { 0.0 };
        self.previous_rms = rms;
        1.0 - (-0.5 * delta).exp()
    }

    pub fn reset(&mut self) {
        self.previous_rms = 0.0;
    }
}

/// Root mean square of a block, 0 for an empty block
pub fn block_rms(block: &[f32]) -> f32 {
    if block.is_empty() {
        return 0.0;
    }
    let sum: f32 = block.iter().map(|&s| if s.is_finite() { s * s } else { 0.0 }).sum();
    (sum / block.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_rms() {
        assert_eq!(block_rms(&[]), 0.0);
        assert!((block_rms(&[0.5; 64]) - 0.5).abs() < 1e-6);
        assert!((block_rms(&[1.0, -1.0, 1.0, -1.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_first_block_counts_as_no_change() {
        let mut detector = RmsDetector::new();
        assert_eq!(detector.evaluate(&[0.3; 64]), 0.0);
        assert!((detector.previous_rms() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_silence_after_silence_is_zero() {
        let mut detector = RmsDetector::new();
        for _ in 0..4 {
            assert_eq!(detector.evaluate(&[0.0; 64]), 0.0);
        }
    }

    #[test]
    fn test_energy_jump() {
        let mut detector = RmsDetector::new();
        detector.evaluate(&[0.1; 64]);
        // RMS triples: Δ = 2, score = 1 - e^-1
        let score = detector.evaluate(&[0.3; 64]);
        assert!((score - (1.0 - (-1.0f32).exp())).abs() < 1e-5);
    }

    #[test]
    fn test_energy_drop_is_negative() {
        let mut detector = RmsDetector::new();
        detector.evaluate(&[0.4; 64]);
        let score = detector.evaluate(&[0.2; 64]);
        assert!(score < 0.0);
        assert!(score.is_finite());
    }

    #[test]
    fn test_steady_level_is_zero() {
        let mut detector = RmsDetector::new();
        detector.evaluate(&[0.25; 128]);
        assert!(detector.evaluate(&[0.25; 128]).abs() < 1e-6);
    }
}
