//! Parametric Peaking-Filter Chain
//!
//! One peaking BiQuad per band, cascaded in series between a media
//! source and the output, with an analyser tap before and after the
//! cascade. Based on the RBJ (Robert Bristow-Johnson) Audio EQ Cookbook.

use std::ops::RangeInclusive;

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};
use rustfft::num_complex::Complex;

use crate::analyser::AnalyserTap;
use crate::bands::{adapt_gains, clamp_gain, log_space};
use crate::error::DspError;

/// Shared band Q used when nothing has been persisted yet
pub const DEFAULT_Q: f32 = 1.0;

/// Default allowed range for the shared Q
pub const DEFAULT_Q_RANGE: RangeInclusive<f32> = 0.3..=8.0;

/// Clamp a Q value into `range`. NaN falls back to [`DEFAULT_Q`].
pub fn clamp_q(q: f32, range: &RangeInclusive<f32>) -> f32 {
    if q.is_nan() {
        return DEFAULT_Q.clamp(*range.start(), *range.end());
    }
    q.clamp(*range.start(), *range.end())
}

/// Single EQ band configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub frequency: f32,
    pub gain_db: f32,
    pub q: f32,
}

impl Band {
    pub fn new(frequency: f32, q: f32) -> Self {
        Self {
            frequency,
            gain_db: 0.0,
            q,
        }
    }

    /// Generate BiQuad coefficients for this band
    fn to_coefficients(self, sample_rate: f32) -> Result<Coefficients<f32>, DspError> {
        Coefficients::<f32>::from_params(
            Type::PeakingEQ(self.gain_db),
            sample_rate.hz(),
            self.frequency.hz(),
            self.q,
        )
        .map_err(|_| DspError::InvalidCoefficients {
            frequency: self.frequency,
            sample_rate,
        })
    }
}

/// Magnitude of one biquad's transfer function at `freq_hz`
fn magnitude_at(coeffs: &Coefficients<f32>, freq_hz: f32, sample_rate: f32) -> f32 {
    let w = 2.0 * std::f32::consts::PI * freq_hz / sample_rate;
    // z^-1 and z^-2 on the unit circle
    let z1 = Complex::from_polar(1.0, -w);
    let z2 = Complex::from_polar(1.0, -2.0 * w);
    let num = Complex::new(coeffs.b0, 0.0) + z1 * coeffs.b1 + z2 * coeffs.b2;
    let den = Complex::new(1.0, 0.0) + z1 * coeffs.a1 + z2 * coeffs.a2;
    let den_norm = den.norm();
    if den_norm <= f32::EPSILON {
        return 1.0;
    }
    num.norm() / den_norm
}

/// Combined analytic response of a chain
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyResponse {
    pub frequencies: Vec<f32>,
    pub magnitudes_db: Vec<f32>,
}

/// The per-media filter chain
///
/// Holds filter state and the two analysis taps. Processing performs no
/// allocations; coefficient updates happen between buffers.
pub struct FilterChain {
    bands: Vec<Band>,
    coefficients: Vec<Coefficients<f32>>,
    // DirectForm2Transposed: better numerical stability than DF1
    filters_left: Vec<DirectForm2Transposed<f32>>,
    filters_right: Vec<DirectForm2Transposed<f32>>,
    sample_rate: f32,
    pre: AnalyserTap,
    post: AnalyserTap,
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain")
            .field("bands", &self.bands)
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

impl FilterChain {
    /// Build a flat chain with one peaking filter per frequency
    pub fn new(sample_rate: f32, frequencies: &[f32], q: f32) -> Result<Self, DspError> {
        if sample_rate.is_nan() || sample_rate <= 0.0 {
            return Err(DspError::InvalidSampleRate(sample_rate));
        }
        if frequencies.is_empty() {
            return Err(DspError::EmptyLayout);
        }

        let bands: Vec<Band> = frequencies.iter().map(|&f| Band::new(f, q)).collect();
        let coefficients = bands
            .iter()
            .map(|b| b.to_coefficients(sample_rate))
            .collect::<Result<Vec<_>, _>>()?;

        let filters_left = coefficients
            .iter()
            .map(|c| DirectForm2Transposed::<f32>::new(*c))
            .collect();
        let filters_right = coefficients
            .iter()
            .map(|c| DirectForm2Transposed::<f32>::new(*c))
            .collect();

        Ok(Self {
            bands,
            coefficients,
            filters_left,
            filters_right,
            sample_rate,
            pre: AnalyserTap::new(sample_rate),
            post: AnalyserTap::new(sample_rate),
        })
    }

    fn update_band(&mut self, index: usize) -> Result<(), DspError> {
        let coeffs = self.bands[index].to_coefficients(self.sample_rate)?;
        self.coefficients[index] = coeffs;
        self.filters_left[index].update_coefficients(coeffs);
        self.filters_right[index].update_coefficients(coeffs);
        Ok(())
    }

    /// Set gain for one band, clamped to the allowed dB range.
    ///
    /// Returns the stored (clamped) value.
    pub fn set_band_gain(&mut self, index: usize, gain_db: f32) -> Result<f32, DspError> {
        if index >= self.bands.len() {
            return Err(DspError::InvalidBandIndex {
                index,
                bands: self.bands.len(),
            });
        }
        let clamped = clamp_gain(gain_db);
        self.bands[index].gain_db = clamped;
        self.update_band(index)?;
        Ok(clamped)
    }

    /// Apply a whole gain vector, adapting its layout to this chain first
    pub fn set_gains(&mut self, gains: &[f32]) -> Result<(), DspError> {
        let adapted = adapt_gains(gains, &self.frequencies());
        for (i, gain) in adapted.into_iter().enumerate() {
            self.bands[i].gain_db = gain;
            self.update_band(i)?;
        }
        Ok(())
    }

    /// Update the shared Q of every band
    pub fn set_q(&mut self, q: f32) -> Result<(), DspError> {
        for i in 0..self.bands.len() {
            self.bands[i].q = q;
            self.update_band(i)?;
        }
        Ok(())
    }

    pub fn q(&self) -> f32 {
        self.bands.first().map(|b| b.q).unwrap_or(DEFAULT_Q)
    }

    pub fn gains(&self) -> Vec<f32> {
        self.bands.iter().map(|b| b.gain_db).collect()
    }

    pub fn frequencies(&self) -> Vec<f32> {
        self.bands.iter().map(|b| b.frequency).collect()
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Process a stereo sample pair through the chain
    ///
    /// # Real-time Safety
    /// No allocations, no locks. Both taps see a mono mix.
    #[inline]
    pub fn process_sample(&mut self, left: f32, right: f32) -> (f32, f32) {
        self.pre.push_sample(left, right);

        let mut l = left;
        let mut r = right;
        for (fl, fr) in self.filters_left.iter_mut().zip(self.filters_right.iter_mut()) {
            l = fl.run(l);
            r = fr.run(r);
        }

        self.post.push_sample(l, r);
        (l, r)
    }

    /// Process an interleaved stereo buffer in-place
    ///
    /// Buffer format: [L0, R0, L1, R1, L2, R2, ...]
    #[inline]
    pub fn process_interleaved(&mut self, buffer: &mut [f32]) {
        for frame in buffer.chunks_exact_mut(2) {
            let (l, r) = self.process_sample(frame[0], frame[1]);
            frame[0] = l;
            frame[1] = r;
        }
    }

    /// Analytic response of the whole chain at `points` log-spaced
    /// frequencies between `min_hz` and `max_hz`.
    ///
    /// Pure function of the coefficients; independent of any audio.
    pub fn frequency_response(&self, points: usize, min_hz: f32, max_hz: f32) -> FrequencyResponse {
        let min_hz = if min_hz.is_finite() { min_hz.max(1.0) } else { 20.0 };
        let max_hz = if max_hz.is_finite() { max_hz.max(min_hz) } else { min_hz };
        let frequencies = log_space(min_hz, max_hz, points);

        let magnitudes_db = frequencies
            .iter()
            .map(|&f| {
                let combined: f32 = self
                    .coefficients
                    .iter()
                    .map(|c| magnitude_at(c, f, self.sample_rate))
                    .product();
                20.0 * combined.max(1e-12).log10()
            })
            .collect();

        FrequencyResponse {
            frequencies,
            magnitudes_db,
        }
    }

    /// Tap before any filtering
    pub fn pre_tap(&mut self) -> &mut AnalyserTap {
        &mut self.pre
    }

    /// Tap after the last filter
    pub fn post_tap(&mut self) -> &mut AnalyserTap {
        &mut self.post
    }

    /// Reset filter state (clear delay lines)
    ///
    /// Call when switching audio sources to prevent filter ringing
    pub fn reset(&mut self) {
        for f in self.filters_left.iter_mut().chain(self.filters_right.iter_mut()) {
            f.reset_state();
        }
        self.pre.reset();
        self.post.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bands::EQ_BANDS;

    fn chain() -> FilterChain {
        FilterChain::new(48000.0, &EQ_BANDS, DEFAULT_Q).unwrap()
    }

    #[test]
    fn test_default_chain_is_flat() {
        let chain = chain();
        assert_eq!(chain.gains(), vec![0.0; 10]);
        assert_eq!(chain.frequencies(), EQ_BANDS.to_vec());
    }

    #[test]
    fn test_invalid_sample_rate() {
        assert!(matches!(
            FilterChain::new(0.0, &EQ_BANDS, 1.0),
            Err(DspError::InvalidSampleRate(_))
        ));
        assert!(matches!(
            FilterChain::new(48000.0, &[], 1.0),
            Err(DspError::EmptyLayout)
        ));
    }

    #[test]
    fn test_gain_clamping() {
        let mut chain = chain();

        assert_eq!(chain.set_band_gain(0, 100.0).unwrap(), 24.0);
        assert_eq!(chain.gains()[0], 24.0);

        assert_eq!(chain.set_band_gain(0, -100.0).unwrap(), -24.0);
        assert_eq!(chain.gains()[0], -24.0);
    }

    #[test]
    fn test_invalid_band_index() {
        let mut chain = chain();
        assert!(chain.set_band_gain(10, 0.0).is_err());
        assert!(chain.set_band_gain(100, 0.0).is_err());
    }

    #[test]
    fn test_legacy_vector_is_adapted() {
        let mut chain = chain();
        chain.set_gains(&[3.0; 7]).unwrap();
        assert_eq!(chain.gains().len(), 10);
        for g in chain.gains() {
            assert!((g - 3.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_flat_response_is_zero_db() {
        let chain = chain();
        let resp = chain.frequency_response(64, 20.0, 20000.0);
        assert_eq!(resp.frequencies.len(), 64);
        for db in resp.magnitudes_db {
            assert!(db.abs() < 0.01, "flat chain should be 0dB, got {db}");
        }
    }

    #[test]
    fn test_response_peaks_at_boosted_band() {
        let mut chain = chain();
        chain.set_band_gain(5, 12.0).unwrap();

        let resp = chain.frequency_response(1, 1000.0, 1000.0);
        assert!((resp.magnitudes_db[0] - 12.0).abs() < 0.5, "got {}", resp.magnitudes_db[0]);

        let far = chain.frequency_response(1, 31.0, 31.0);
        assert!(far.magnitudes_db[0].abs() < 1.0);
    }

    #[test]
    fn test_response_endpoints() {
        let chain = chain();
        let resp = chain.frequency_response(3, 20.0, 20000.0);
        assert!((resp.frequencies[0] - 20.0).abs() < 0.01);
        assert!((resp.frequencies[2] - 20000.0).abs() < 1.0);
        assert!(chain.frequency_response(0, 20.0, 20000.0).frequencies.is_empty());
    }

    #[test]
    fn test_q_updates_every_band() {
        let mut chain = chain();
        chain.set_band_gain(3, 6.0).unwrap();
        let wide = chain.frequency_response(1, 350.0, 350.0).magnitudes_db[0];

        chain.set_q(4.0).unwrap();
        assert!(chain.bands().iter().all(|b| b.q == 4.0));
        let narrow = chain.frequency_response(1, 350.0, 350.0).magnitudes_db[0];
        assert!(narrow < wide, "higher Q should narrow the bell");
    }

    #[test]
    fn test_clamp_q() {
        assert_eq!(clamp_q(100.0, &DEFAULT_Q_RANGE), 8.0);
        assert_eq!(clamp_q(0.0, &DEFAULT_Q_RANGE), 0.3);
        assert_eq!(clamp_q(f32::NAN, &DEFAULT_Q_RANGE), DEFAULT_Q);
    }

    #[test]
    fn test_boost_increases_amplitude() {
        let mut chain = chain();
        chain.set_band_gain(5, 12.0).unwrap();

        let sample_rate = 48000.0;
        let freq = 1000.0;
        let mut max_input = 0.0_f32;
        let mut max_output = 0.0_f32;

        for i in 0..4800 {
            let t = i as f32 / sample_rate;
            let sample = (2.0 * std::f32::consts::PI * freq * t).sin() * 0.25;
            max_input = max_input.max(sample.abs());

            let (out, _) = chain.process_sample(sample, sample);
            max_output = max_output.max(out.abs());
        }

        assert!(max_output > max_input, "Boost should increase amplitude");
    }

    #[test]
    fn test_reset_doesnt_panic() {
        let mut chain = chain();
        let mut buffer = vec![0.5, -0.5, 0.3, -0.3];
        chain.process_interleaved(&mut buffer);
        chain.reset();
        let (l, r) = chain.process_sample(0.5, -0.5);
        assert!(l.is_finite() && r.is_finite());
    }
}
