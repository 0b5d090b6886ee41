//! DSP Error Types

use thiserror::Error;

/// Errors that can occur during DSP operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DspError {
    #[error("Invalid band index: {index} (chain has {bands} bands)")]
    InvalidBandIndex { index: usize, bands: usize },

    #[error("Invalid filter coefficients for frequency {frequency}Hz at sample rate {sample_rate}Hz")]
    InvalidCoefficients { frequency: f32, sample_rate: f32 },

    #[error("Sample rate must be positive, got {0}")]
    InvalidSampleRate(f32),

    #[error("Filter chain needs at least one band")]
    EmptyLayout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DspError::InvalidBandIndex { index: 15, bands: 10 };
        assert!(err.to_string().contains("15"));
        assert!(err.to_string().contains("10 bands"));

        let err = DspError::InvalidCoefficients {
            frequency: 1000.0,
            sample_rate: 48000.0,
        };
        assert!(err.to_string().contains("1000"));
    }
}
