//! Tabdeck DSP - Digital Signal Processing Module
//!
//! This crate provides the equalizer signal path used on every page:
//! - 10-band parametric equalizer built from peaking BiQuad filters
//! - Adaptation of stored gain vectors between band layouts (7 -> 10)
//! - Analyser taps before and after the chain, folded into band amplitudes
//! - Analytic frequency response of the whole chain
//! - Built-in presets and approximate preset matching
//!
//! # Architecture
//!
//! ```text
//!  source ──▶ pre tap ──▶ peak(31Hz) ──▶ … ──▶ peak(16kHz) ──▶ post tap ──▶ out
//! ```
//!
//! All bands share a single Q; gains are per band and clamped to ±24 dB.

mod analyser;
mod bands;
mod eq;
mod error;
mod presets;

pub use analyser::{band_amplitudes, AnalyserTap, FFT_SIZE, NUM_BINS};
pub use bands::{
    adapt_gains, band_edges, clamp_gain, interpolate_log, layout_for_len, log_space, EQ_BANDS,
    GAIN_RANGE_DB, LEGACY_EQ_BANDS,
};
pub use eq::{clamp_q, Band, FilterChain, FrequencyResponse, DEFAULT_Q, DEFAULT_Q_RANGE};
pub use error::DspError;
pub use presets::{builtin_preset, match_preset, Preset, PresetRef, PRESETS};
