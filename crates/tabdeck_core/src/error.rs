//! Core Error Types
//!
//! Absence (no media, unknown tab, missing preset) is modelled as data in
//! the message replies. These errors cover the transport and capability
//! failures that callers swallow at the smallest scope.

use thiserror::Error;

use crate::host::TabId;

/// Failures reported by a host capability (tabs, DOM, audio graph)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HostError {
    #[error("Tab {0} no longer exists")]
    TabClosed(TabId),

    #[error("Tab {0} has no page agent listening")]
    NoReceiver(TabId),

    #[error("Media element is detached from its document")]
    Detached,

    #[error("Cross-origin media cannot be routed through an audio graph")]
    CrossOrigin,

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Host operation failed: {0}")]
    Failed(String),
}

/// Key-value storage failures
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Could not determine a config directory")]
    NoConfigDir,

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Equalizer engine failures
#[derive(Error, Debug)]
pub enum EqError {
    #[error("No media element to equalize")]
    NoMedia,

    #[error("EQ unavailable for this media: {0}")]
    Unavailable(String),

    #[error("Preset not found: {0}")]
    PresetNotFound(String),

    #[error("Preset name must not be empty")]
    EmptyPresetName,

    #[error("DSP error: {0}")]
    Dsp(#[from] tabdeck_dsp::DspError),

    #[error("Host error: {0}")]
    Host(#[from] HostError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type alias for host capability calls
pub type HostResult<T> = Result<T, HostError>;

/// Result type alias for equalizer operations
pub type EqResult<T> = Result<T, EqError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HostError::TabClosed(TabId(7));
        assert!(err.to_string().contains("Tab 7"));

        let err = EqError::PresetNotFound("Rock".into());
        assert!(err.to_string().contains("Rock"));
    }

    #[test]
    fn test_error_from_dsp() {
        let dsp_err = tabdeck_dsp::DspError::InvalidBandIndex { index: 10, bands: 10 };
        let eq_err: EqError = dsp_err.into();
        assert!(matches!(eq_err, EqError::Dsp(_)));
    }

    #[test]
    fn test_error_from_host() {
        let eq_err: EqError = HostError::CrossOrigin.into();
        assert!(eq_err.to_string().contains("Cross-origin"));
    }
}
