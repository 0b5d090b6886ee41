//! Band Layouts and Gain-Vector Adaptation
//!
//! Stored gain vectors carry no frequency tags: the layout is implied by
//! the vector length. Every vector read from storage goes through
//! [`adapt_gains`] before it touches a filter chain, so presets saved
//! under the old 7-band layout keep working on the 10-band chain.

use std::ops::RangeInclusive;

/// Current EQ band frequencies (Hz) - ISO octave centers
pub const EQ_BANDS: [f32; 10] = [
    31.0,    // Sub-bass
    62.0,    // Bass
    125.0,   // Low-mid
    250.0,   // Mid
    500.0,   // Mid
    1000.0,  // Upper-mid
    2000.0,  // Presence
    4000.0,  // Brilliance
    8000.0,  // High
    16000.0, // Air
];

/// Band centers of the legacy 7-band layout
pub const LEGACY_EQ_BANDS: [f32; 7] = [60.0, 150.0, 400.0, 1000.0, 2400.0, 6000.0, 15000.0];

/// Allowed gain per band in dB
pub const GAIN_RANGE_DB: RangeInclusive<f32> = -24.0..=24.0;

/// Clamp a band gain into [`GAIN_RANGE_DB`]. NaN is treated as flat.
pub fn clamp_gain(gain_db: f32) -> f32 {
    if gain_db.is_nan() {
        return 0.0;
    }
    gain_db.clamp(*GAIN_RANGE_DB.start(), *GAIN_RANGE_DB.end())
}

/// Frequency layout implied by a stored vector of `len` gains.
///
/// 10 and 7 map to the known layouts; any other length is assumed to be
/// log-spaced across the current band range.
pub fn layout_for_len(len: usize) -> Vec<f32> {
    match len {
        0 => Vec::new(),
        n if n == EQ_BANDS.len() => EQ_BANDS.to_vec(),
        n if n == LEGACY_EQ_BANDS.len() => LEGACY_EQ_BANDS.to_vec(),
        1 => vec![(EQ_BANDS[0] * EQ_BANDS[EQ_BANDS.len() - 1]).sqrt()],
        n => log_space(EQ_BANDS[0], EQ_BANDS[EQ_BANDS.len() - 1], n),
    }
}

/// `count` log-spaced points from `min_hz` to `max_hz` inclusive
pub fn log_space(min_hz: f32, max_hz: f32, count: usize) -> Vec<f32> {
    match count {
        0 => Vec::new(),
        1 => vec![min_hz],
        _ => {
            let lo = min_hz.ln();
            let step = (max_hz.ln() - lo) / (count - 1) as f32;
            (0..count).map(|i| (lo + step * i as f32).exp()).collect()
        }
    }
}

/// Sample a gain curve, defined by `gains` at `from_hz`, at each of `at_hz`.
///
/// Linear in log-frequency between neighbouring points; values outside the
/// source range hold the nearest end value.
pub fn interpolate_log(gains: &[f32], from_hz: &[f32], at_hz: &[f32]) -> Vec<f32> {
    let n = gains.len().min(from_hz.len());
    if n == 0 {
        return vec![0.0; at_hz.len()];
    }
    let gains: Vec<f32> = gains[..n]
        .iter()
        .map(|g| if g.is_finite() { *g } else { 0.0 })
        .collect();
    if n == 1 {
        return vec![gains[0]; at_hz.len()];
    }

    let logs: Vec<f32> = from_hz[..n].iter().map(|f| f.max(f32::MIN_POSITIVE).ln()).collect();

    at_hz
        .iter()
        .map(|&f| {
            let x = f.max(f32::MIN_POSITIVE).ln();
            if x <= logs[0] {
                return gains[0];
            }
            if x >= logs[n - 1] {
                return gains[n - 1];
            }
            // First source band above x
            let hi = logs.partition_point(|&l| l < x).clamp(1, n - 1);
            let lo = hi - 1;
            let span = logs[hi] - logs[lo];
            if span <= 0.0 {
                return gains[lo];
            }
            let t = (x - logs[lo]) / span;
            gains[lo] + (gains[hi] - gains[lo]) * t
        })
        .collect()
}

/// Normalise a stored gain vector to the `target_hz` layout.
///
/// A vector whose length already matches is only clamped; anything else is
/// resampled from the layout implied by its length.
pub fn adapt_gains(gains: &[f32], target_hz: &[f32]) -> Vec<f32> {
    if gains.len() == target_hz.len() {
        return gains.iter().copied().map(clamp_gain).collect();
    }
    let source = layout_for_len(gains.len());
    interpolate_log(gains, &source, target_hz)
        .into_iter()
        .map(clamp_gain)
        .collect()
}

/// Lower/upper analysis edges for each band center.
///
/// Inner edges are the geometric mean of neighbouring centers; the outer
/// edges mirror the nearest inner half-band.
pub fn band_edges(centers: &[f32]) -> Vec<(f32, f32)> {
    let n = centers.len();
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        let c = centers[0];
        return vec![(c / std::f32::consts::SQRT_2, c * std::f32::consts::SQRT_2)];
    }

    let mids: Vec<f32> = centers.windows(2).map(|w| (w[0] * w[1]).sqrt()).collect();
    (0..n)
        .map(|i| {
            let low = if i == 0 {
                centers[0] * centers[0] / mids[0]
            } else {
                mids[i - 1]
            };
            let high = if i == n - 1 {
                centers[n - 1] * centers[n - 1] / mids[n - 2]
            } else {
                mids[i]
            };
            (low, high)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_layout_lookup() {
        assert_eq!(layout_for_len(10), EQ_BANDS.to_vec());
        assert_eq!(layout_for_len(7), LEGACY_EQ_BANDS.to_vec());
        assert!(layout_for_len(0).is_empty());

        let five = layout_for_len(5);
        assert_eq!(five.len(), 5);
        assert!((five[0] - 31.0).abs() < 0.01);
        assert!((five[4] - 16000.0).abs() < 1.0);
    }

    #[test]
    fn test_interpolation_hits_source_points() {
        let gains = [1.0, -2.0, 3.0];
        let freqs = [100.0, 1000.0, 10000.0];
        let out = interpolate_log(&gains, &freqs, &freqs);
        for (a, b) in out.iter().zip(gains.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_interpolation_is_linear_in_log_frequency() {
        let out = interpolate_log(&[0.0, 10.0], &[100.0, 10000.0], &[1000.0]);
        assert!((out[0] - 5.0).abs() < 1e-3, "got {}", out[0]);
    }

    #[test]
    fn test_interpolation_holds_ends() {
        let out = interpolate_log(&[4.0, -4.0], &[100.0, 1000.0], &[10.0, 20000.0]);
        assert_eq!(out, vec![4.0, -4.0]);
    }

    #[test]
    fn test_legacy_vector_round_trip() {
        let legacy = [6.0, 4.0, 2.0, 0.0, -1.0, -2.0, -3.0];
        let current = adapt_gains(&legacy, &EQ_BANDS);
        assert_eq!(current.len(), 10);

        let back = interpolate_log(&current, &EQ_BANDS, &LEGACY_EQ_BANDS);
        for (orig, got) in legacy.iter().zip(back.iter()) {
            assert!((orig - got).abs() < 0.5, "expected {orig}, got {got}");
        }
    }

    #[test]
    fn test_adapt_same_length_only_clamps() {
        let gains = [30.0, -30.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let out = adapt_gains(&gains, &EQ_BANDS);
        assert_eq!(out[0], 24.0);
        assert_eq!(out[1], -24.0);
        assert_eq!(out[2], 1.0);
    }

    #[test]
    fn test_adapt_empty_vector_is_flat() {
        assert_eq!(adapt_gains(&[], &EQ_BANDS), vec![0.0; 10]);
    }

    #[test]
    fn test_band_edges_are_contiguous() {
        let edges = band_edges(&EQ_BANDS);
        assert_eq!(edges.len(), 10);
        for w in edges.windows(2) {
            assert!((w[0].1 - w[1].0).abs() < 1e-3);
        }
        for (i, (lo, hi)) in edges.iter().enumerate() {
            assert!(*lo < EQ_BANDS[i] && EQ_BANDS[i] < *hi);
        }
    }

    proptest! {
        #[test]
        fn prop_adapted_gains_stay_in_range(gains in prop::collection::vec(-100.0f32..100.0, 0..16)) {
            for g in adapt_gains(&gains, &EQ_BANDS) {
                prop_assert!(GAIN_RANGE_DB.contains(&g));
            }
        }

        #[test]
        fn prop_clamp_gain_never_escapes(g in prop::num::f32::ANY) {
            let c = clamp_gain(g);
            prop_assert!(GAIN_RANGE_DB.contains(&c));
        }
    }
}
