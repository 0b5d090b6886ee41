//! Coordinator, Page and Equalizer Configuration

use std::ops::RangeInclusive;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Playback-rate bounds applied to every rate mutation
pub const MIN_PLAYBACK_RATE: f64 = 0.06;
pub const MAX_PLAYBACK_RATE: f64 = 16.0;

/// Clamp a playback rate to the supported range, rounded to 2 decimals
pub fn clamp_rate(rate: f64) -> f64 {
    if !rate.is_finite() {
        return 1.0;
    }
    let rounded = (rate * 100.0).round() / 100.0;
    rounded.clamp(MIN_PLAYBACK_RATE, MAX_PLAYBACK_RATE)
}

/// Clamp a volume to [0, 1], rounded to 3 decimals
pub fn clamp_volume(volume: f64) -> f64 {
    if !volume.is_finite() {
        return 0.0;
    }
    let rounded = (volume * 1000.0).round() / 1000.0;
    rounded.clamp(0.0, 1.0)
}

/// Cross-tab coordinator timing and presets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// A scan within this window reuses the cached media list
    pub scan_ttl_ms: u64,

    /// Quiet period after the last seek input before the seek is committed
    pub seek_debounce_ms: u64,

    /// Background overlay sync period while the selection is on another tab
    pub sync_interval_ms: u64,

    /// Rates visited by the speed-cycle command
    pub speed_presets: Vec<f64>,

    /// Page fallback commands this soon after a shortcut are ignored
    pub command_suppress_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            scan_ttl_ms: 4000,
            seek_debounce_ms: 550,
            sync_interval_ms: 200,
            speed_presets: vec![0.75, 1.0, 1.25, 1.5, 2.0],
            command_suppress_ms: 300,
        }
    }
}

impl CoordinatorConfig {
    pub fn scan_ttl(&self) -> Duration {
        Duration::from_millis(self.scan_ttl_ms)
    }

    pub fn seek_debounce(&self) -> Duration {
        Duration::from_millis(self.seek_debounce_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn command_suppress(&self) -> Duration {
        Duration::from_millis(self.command_suppress_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.seek_debounce_ms == 0 {
            return Err("Seek debounce must be non-zero".to_string());
        }
        if self.sync_interval_ms == 0 {
            return Err("Sync interval must be non-zero".to_string());
        }
        if self.speed_presets.is_empty() {
            return Err("At least one speed preset is required".to_string());
        }
        if let Some(bad) = self
            .speed_presets
            .iter()
            .find(|r| !(MIN_PLAYBACK_RATE..=MAX_PLAYBACK_RATE).contains(*r))
        {
            return Err(format!("Speed preset out of range: {}", bad));
        }
        Ok(())
    }
}

/// User-tunable step sizes shared by the coordinator and the settings UI
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSettings {
    /// Seconds per seek-forward / seek-back
    pub seek_step: f64,
    /// Rate delta per speed-up / speed-down
    pub speed_step: f64,
    /// Volume delta per volume-up / volume-down
    pub volume_step: f64,
}

impl Default for StepSettings {
    fn default() -> Self {
        Self {
            seek_step: 5.0,
            speed_step: 0.25,
            volume_step: 0.05,
        }
    }
}

impl StepSettings {
    pub const MAX_VOLUME_STEP: f64 = 0.5;

    /// Accept a stored seek step if usable
    pub fn accept_seek_step(&mut self, value: f64) -> bool {
        let ok = value.is_finite() && value > 0.0;
        if ok {
            self.seek_step = value;
        }
        ok
    }

    pub fn accept_speed_step(&mut self, value: f64) -> bool {
        let ok = value.is_finite() && value > 0.0;
        if ok {
            self.speed_step = value;
        }
        ok
    }

    pub fn accept_volume_step(&mut self, value: f64) -> bool {
        let ok = value.is_finite() && value > 0.0 && value <= Self::MAX_VOLUME_STEP;
        if ok {
            self.volume_step = value;
        }
        ok
    }
}

/// Heuristic for autoplay thumbnail previews
///
/// A muted (or zero-volume) video is a mini preview when it is small or
/// tiny and still near the start of playback.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MiniPreviewThresholds {
    pub small_width: f64,
    pub small_height: f64,
    pub tiny_width: f64,
    pub tiny_height: f64,
    /// Seconds
    pub max_current_time: f64,
}

impl Default for MiniPreviewThresholds {
    fn default() -> Self {
        Self {
            small_width: 240.0,
            small_height: 180.0,
            tiny_width: 160.0,
            tiny_height: 120.0,
            max_current_time: 3.0,
        }
    }
}

/// Page media locator filtering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatorConfig {
    /// Minimum rendered width and height in CSS pixels
    pub min_visible_size: f64,
    pub mini_preview: MiniPreviewThresholds,
    /// Page URLs (exact match) that never report media
    pub blacklist: Vec<String>,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            min_visible_size: 60.0,
            mini_preview: MiniPreviewThresholds::default(),
            // Home feed opens a second player card for the same video
            blacklist: vec!["https://www.bilibili.com/".to_string()],
        }
    }
}

impl LocatorConfig {
    pub fn is_blacklisted(&self, url: &str) -> bool {
        self.blacklist.iter().any(|b| b == url)
    }
}

/// On-page overlay behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    pub auto_hide_ms: u64,
    pub title_max_chars: usize,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            auto_hide_ms: 2500,
            title_max_chars: 80,
        }
    }
}

impl OverlayConfig {
    pub fn auto_hide(&self) -> Duration {
        Duration::from_millis(self.auto_hide_ms)
    }
}

/// Page-local keyboard behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageConfig {
    /// Seconds moved per fine-seek step
    pub fine_seek_step: f64,
    pub fine_seek_interval_ms: u64,
    /// Initial speed-cycle list; unknown rates get inserted on use
    pub speed_cycle: Vec<f64>,
    pub screenshot_prefix: String,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            fine_seek_step: 0.2,
            fine_seek_interval_ms: 90,
            speed_cycle: vec![0.75, 1.0, 1.25, 1.5, 2.0],
            screenshot_prefix: "tabdeck".to_string(),
        }
    }
}

impl PageConfig {
    pub fn fine_seek_interval(&self) -> Duration {
        Duration::from_millis(self.fine_seek_interval_ms)
    }
}

/// Equalizer engine limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EqSettings {
    pub q_min: f32,
    pub q_max: f32,
    pub default_q: f32,
    pub max_custom_presets: usize,
    /// Saved-gain restore polling on page load
    pub restore_attempts: u32,
    pub restore_interval_ms: u64,
    /// Per-band tolerance when matching presets
    pub match_tolerance_db: f32,
}

impl Default for EqSettings {
    fn default() -> Self {
        Self {
            q_min: 0.3,
            q_max: 8.0,
            default_q: 1.0,
            max_custom_presets: 30,
            restore_attempts: 20,
            restore_interval_ms: 500,
            match_tolerance_db: 0.25,
        }
    }
}

impl EqSettings {
    pub fn q_range(&self) -> RangeInclusive<f32> {
        self.q_min..=self.q_max
    }

    pub fn restore_interval(&self) -> Duration {
        Duration::from_millis(self.restore_interval_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.q_min > 0.0 && self.q_min <= self.q_max) {
            return Err(format!("Invalid Q range: {}..={}", self.q_min, self.q_max));
        }
        if !self.q_range().contains(&self.default_q) {
            return Err(format!("Default Q {} outside range", self.default_q));
        }
        if self.max_custom_presets == 0 {
            return Err("Custom preset cap must be non-zero".to_string());
        }
        Ok(())
    }
}

/// Overall configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TabdeckConfig {
    pub coordinator: CoordinatorConfig,
    pub locator: LocatorConfig,
    pub overlay: OverlayConfig,
    pub page: PageConfig,
    pub eq: EqSettings,
}

impl TabdeckConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.coordinator.validate()?;
        self.eq.validate()
    }
}
