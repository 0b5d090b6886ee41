//! Analyser Taps and Band Spectrum Sampling
//!
//! An [`AnalyserTap`] sits on the signal path without altering it and
//! produces byte-scaled frequency data on demand, the same shape a
//! browser analyser node reports. [`band_amplitudes`] then folds that
//! linear-bin data into one 0..1 amplitude per EQ band.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::bands::band_edges;

/// FFT size (must be power of 2)
/// 2048 samples at 48kHz = ~42ms window, ~23Hz resolution
pub const FFT_SIZE: usize = 2048;

/// Number of frequency bins reported by [`AnalyserTap::frequency_data`]
pub const NUM_BINS: usize = FFT_SIZE / 2;

/// Averaging constant between successive analyses (0.0 = none)
const SMOOTHING_TIME_CONSTANT: f32 = 0.8;

/// dB window mapped onto 0..=255
const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Hann window coefficient
/// Hann window reduces spectral leakage in FFT analysis
fn hann_window(n: usize, size: usize) -> f32 {
    0.5 * (1.0 - (2.0 * std::f32::consts::PI * n as f32 / (size - 1) as f32).cos())
}

/// Non-destructive analysis tap
pub struct AnalyserTap {
    /// Ring buffer of mono samples
    samples: Vec<f32>,
    write_pos: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
    /// Smoothed linear magnitudes, one per bin
    smoothed: Vec<f32>,
    sample_rate: f32,
}

impl AnalyserTap {
    pub fn new(sample_rate: f32) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);

        Self {
            samples: vec![0.0; FFT_SIZE],
            write_pos: 0,
            window: (0..FFT_SIZE).map(|i| hann_window(i, FFT_SIZE)).collect(),
            fft,
            scratch: vec![Complex::new(0.0, 0.0); FFT_SIZE],
            smoothed: vec![0.0; NUM_BINS],
            sample_rate,
        }
    }

    /// Push a stereo sample pair (mixed to mono)
    #[inline]
    pub fn push_sample(&mut self, left: f32, right: f32) {
        self.samples[self.write_pos] = (left + right) * 0.5;
        self.write_pos = (self.write_pos + 1) % FFT_SIZE;
    }

    /// Analyse the most recent [`FFT_SIZE`] samples.
    ///
    /// Returns [`NUM_BINS`] bytes; bin `i` covers `i * sample_rate / FFT_SIZE` Hz.
    pub fn frequency_data(&mut self) -> Vec<u8> {
        for i in 0..FFT_SIZE {
            // Oldest sample first
            let sample = self.samples[(self.write_pos + i) % FFT_SIZE];
            self.scratch[i] = Complex::new(sample * self.window[i], 0.0);
        }
        self.fft.process(&mut self.scratch);

        let scale = 1.0 / FFT_SIZE as f32;
        let range = MAX_DECIBELS - MIN_DECIBELS;

        self.smoothed
            .iter_mut()
            .zip(self.scratch.iter())
            .map(|(smoothed, bin)| {
                let magnitude = bin.norm() * scale;
                *smoothed = SMOOTHING_TIME_CONSTANT * *smoothed
                    + (1.0 - SMOOTHING_TIME_CONSTANT) * magnitude;
                let db = 20.0 * smoothed.max(1e-12).log10();
                let scaled = 255.0 * (db - MIN_DECIBELS) / range;
                scaled.clamp(0.0, 255.0) as u8
            })
            .collect()
    }

    /// Center frequency of FFT bin `index`
    pub fn bin_frequency(&self, index: usize) -> f32 {
        index as f32 * self.sample_rate / FFT_SIZE as f32
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Reset the analyser state
    pub fn reset(&mut self) {
        self.samples.iter_mut().for_each(|s| *s = 0.0);
        self.smoothed.iter_mut().for_each(|s| *s = 0.0);
        self.write_pos = 0;
    }
}

/// Per-band amplitude (0.0..=1.0) from byte frequency data.
///
/// Each band averages the bins whose frequency lies inside its half-band
/// window (edges at the geometric mean of neighbouring centers). A band
/// too narrow to contain a bin falls back to the nearest bin.
pub fn band_amplitudes(data: &[u8], sample_rate: f32, centers: &[f32]) -> Vec<f32> {
    if data.is_empty() {
        return vec![0.0; centers.len()];
    }
    // data covers 0..nyquist in data.len() bins
    let bin_hz = sample_rate / (2 * data.len()) as f32;

    band_edges(centers)
        .into_iter()
        .zip(centers.iter())
        .map(|((low, high), &center)| {
            let (sum, count) = data
                .iter()
                .enumerate()
                .filter(|(i, _)| {
                    let f = *i as f32 * bin_hz;
                    f >= low && f < high
                })
                .fold((0.0_f32, 0_usize), |(s, c), (_, &v)| (s + v as f32, c + 1));

            if count > 0 {
                sum / count as f32 / 255.0
            } else {
                let nearest = ((center / bin_hz).round() as usize).min(data.len() - 1);
                data[nearest] as f32 / 255.0
            }
        })
        .collect()
}
