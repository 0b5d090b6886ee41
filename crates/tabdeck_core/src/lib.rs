//! Tabdeck Core - Cross-Tab Media Control
//!
//! This crate provides everything above the signal path:
//! - Page media discovery and ranking (locator)
//! - The on-page overlay with sequence/op-id staleness gating
//! - The per-page equalizer engine and its persisted memory
//! - The cross-tab coordinator with debounced, commit-once seeking
//! - The command router shared by shortcuts, popup and page fallbacks
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Background                             │
//! │  shortcut/popup ──▶ CommandRouter ──▶ Coordinator            │
//! │                                        │  ▲                  │
//! └────────────────────────────────────────┼──┼──────────────────┘
//!                              TabHost::send│  │PageReply
//!                                           ▼  │
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Page (per tab)                           │
//! │   PageAgent ──▶ MediaLocator ──▶ MediaElement                │
//! │      │    └───▶ EqualizerEngine ──▶ AudioHost (FilterChain)  │
//! │      └──▶ OverlayRenderer ◀── TabHost::push_overlay          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The browser itself sits behind the traits in [`host`]; [`sim`] provides
//! an in-process implementation used by the tests.

mod config;
mod coordinator;
mod equalizer;
mod error;
mod format;
mod gate;
pub mod host;
mod locator;
mod media_list;
mod message;
mod overlay;
mod page;
mod router;
pub mod sim;
pub mod storage;

pub use config::{
    clamp_rate, clamp_volume, CoordinatorConfig, EqSettings, LocatorConfig,
    MiniPreviewThresholds, OverlayConfig, PageConfig, StepSettings, TabdeckConfig,
    MAX_PLAYBACK_RATE, MIN_PLAYBACK_RATE,
};
pub use coordinator::{
    collect_media, reconcile_selection, seek_target, ControlOutcome, Coordinator, TabMediaEntry,
};
pub use equalizer::{EqualizerEngine, SpectrumFrame, SpectrumPoll};
pub use error::{EqError, EqResult, HostError, HostResult, StorageError};
pub use format::{format_time, percent, tab_title, truncate_chars, UNKNOWN_TIME};
pub use gate::{CounterGate, CounterSource};
pub use host::{
    AudioHost, MediaDocument, MediaElement, MediaId, MediaKind, ReadyState, Rect, TabDescriptor,
    TabHost, TabId, Viewport,
};
pub use locator::{is_mini_preview, MediaLocator};
pub use media_list::{
    CardPatch, ListFeed, ListRefresh, ListUpdate, TabLocks, TimePatch, LIST_REFRESH_INTERVAL,
};
pub use message::{
    Command, CommandOrigin, ControlAction, EqReply, EqRequest, EqState, LocalAction, MediaCommand,
    MediaInfo, MuteScope, OverlayMode, OverlayUpdate, PageReply, PageRequest, RouterMessage,
    RouterReply, SpeedAction, VolumeAction,
};
pub use overlay::{BarStyle, OverlayEvent, OverlayRenderer, OverlayView, Rejection};
pub use page::{next_cycle_rate, screenshot_file_name, seek_within, PageAgent};
pub use router::CommandRouter;
pub use storage::{JsonFileStore, KeyValueStore, MemoryStore};

// Re-export DSP types for convenience
pub use tabdeck_dsp::{FilterChain, PresetRef, EQ_BANDS, PRESETS};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        // Verify public API is accessible
        let config = TabdeckConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(EQ_BANDS.len(), 10);
    }
}
