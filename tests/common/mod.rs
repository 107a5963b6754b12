// Test utilities and helper functions for SFORZATO voice engine tests

/// Root mean square of a signal.
pub fn calculate_rms(signal: &[f32]) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = signal.iter().map(|s| s * s).sum();
    (sum_sq / signal.len() as f32).sqrt()
}

/// Peak absolute value of a signal.
pub fn calculate_peak(signal: &[f32]) -> f32 {
    signal.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()))
}

/// Asserts every sample is finite (no NaN/Inf leaked out of a stage).
pub fn assert_samples_are_finite(signal: &[f32]) {
    for (i, sample) in signal.iter().enumerate() {
        assert!(sample.is_finite(), "non-finite sample {} at {}", sample, i);
    }
}

/// Estimates the dominant frequency of a (mostly) sinusoidal signal by
/// counting rising zero crossings.
pub fn dominant_frequency(signal: &[f32], sample_rate: f32) -> f32 {
    let mut crossings = 0usize;
    let mut first = None;
    let mut last = None;
    for i in 1..signal.len() {
        if signal[i - 1] <= 0.0 && signal[i] > 0.0 {
            crossings += 1;
            if first.is_none() {
                first = Some(i);
            }
            last = Some(i);
        }
    }
    match (first, last) {
        (Some(first), Some(last)) if crossings > 1 => {
            let periods = (crossings - 1) as f32;
            periods * sample_rate / (last - first) as f32
        }
        _ => 0.0,
    }
}
