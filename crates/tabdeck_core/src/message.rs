//! Message Contracts
//!
//! Requests flow background -> page agent (media info, mutations, EQ),
//! overlay updates flow background -> page renderer, and router messages
//! flow popup/shortcut/page -> background. Every variant serializes to the
//! JSON shape the extension surfaces exchange.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::format::{format_time, percent};
use crate::host::{MediaElement, MediaKind, TabId};
use crate::storage::StoredPreset;

/// Non-finite durations (live streams) travel as `null`
mod non_finite {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_some(value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}

/// Status of a page's active media
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    pub kind: MediaKind,
    pub name: String,
    pub is_live: bool,
    pub paused: bool,
    pub current_time: String,
    pub raw_current_time: f64,
    pub duration: String,
    #[serde(with = "non_finite")]
    pub raw_duration: f64,
    pub playback_rate: f64,
    pub volume: f64,
    pub muted: bool,
    pub thumbnail: Option<String>,
    pub pip_supported: bool,
    pub pip_active: bool,
}

impl MediaInfo {
    pub fn from_element(media: &dyn MediaElement, name: String, pip_active: bool) -> Self {
        let current = media.current_time();
        let duration = media.duration();
        let kind = media.kind();
        Self {
            kind,
            name,
            is_live: duration.is_infinite(),
            paused: media.paused(),
            current_time: format_time(current),
            raw_current_time: current,
            duration: format_time(duration),
            raw_duration: duration,
            playback_rate: media.playback_rate(),
            volume: media.volume(),
            muted: media.muted(),
            thumbnail: match kind {
                MediaKind::Video => media.poster(),
                MediaKind::Audio => None,
            },
            pip_supported: media.pip_supported(),
            pip_active,
        }
    }

    pub fn percent(&self) -> f64 {
        percent(self.raw_current_time, self.raw_duration)
    }
}

/// Mutations a page agent applies to its active media
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum MediaCommand {
    Play,
    Pause,
    Mute,
    Unmute,
    /// 0..=1
    SetVolume(f64),
    /// Relative seconds
    Seek(f64),
    /// Absolute seconds
    SetCurrentTime(f64),
    SetPlaybackRate(f64),
    /// currentTime = 0, playbackRate = 1
    Reset,
    TogglePip,
}

/// Page-local keyboard actions (no cross-tab coordination)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum LocalAction {
    SeekForward,
    SeekBack,
    SpeedUp,
    SpeedDown,
    SpeedReset,
    SpeedCycle,
    TogglePlay,
    CycleMedia,
    Screenshot,
    /// Direction: +1 forward, -1 back
    FineSeekStart(i8),
    FineSeekStop(i8),
}

/// Background -> page agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum PageRequest {
    GetMediaInfo,
    Control {
        command: MediaCommand,
        /// Suppress the page's own overlay feedback
        silent: bool,
    },
    Local(LocalAction),
    Eq(EqRequest),
}

impl PageRequest {
    pub fn silent(command: MediaCommand) -> Self {
        PageRequest::Control {
            command,
            silent: true,
        }
    }
}

/// Page agent -> background
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum PageReply {
    Media(MediaInfo),
    Ok,
    /// No qualifying media, blacklisted page or nested frame
    NotOk,
    Eq(EqReply),
}

impl PageReply {
    pub fn into_media(self) -> Option<MediaInfo> {
        match self {
            PageReply::Media(info) => Some(info),
            _ => None,
        }
    }
}

/// What produced an overlay update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverlayMode {
    Select,
    Sync,
    SeekPreview,
    Final,
    PlayToggle,
    MuteToggle,
    SpeedSet,
    VolumeSet,
    /// Short text message ("no media", ...)
    Notice,
}

/// Background -> overlay renderer on the active tab
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayUpdate {
    pub mode: OverlayMode,
    /// 1-based position of the selection in the cross-tab list
    pub index: usize,
    pub total: usize,
    pub title: String,
    pub paused: bool,
    pub duration: String,
    pub current_time: String,
    pub percent: f64,
    pub is_live: bool,
    pub preview: bool,
    pub preview_seconds: Option<f64>,
    pub playback_rate: f64,
    pub volume: f64,
    pub muted: bool,
    /// Assigned by the coordinator at push time
    pub seq: u64,
    pub op_id: Option<u64>,
    pub message: Option<String>,
}

impl OverlayUpdate {
    pub fn from_info(
        mode: OverlayMode,
        index: usize,
        total: usize,
        title: String,
        info: &MediaInfo,
    ) -> Self {
        Self {
            mode,
            index,
            total,
            title,
            paused: info.paused,
            duration: info.duration.clone(),
            current_time: info.current_time.clone(),
            percent: info.percent(),
            is_live: info.is_live,
            preview: false,
            preview_seconds: None,
            playback_rate: info.playback_rate,
            volume: info.volume,
            muted: info.muted,
            seq: 0,
            op_id: None,
            message: None,
        }
    }

    pub fn notice(message: impl Into<String>) -> Self {
        Self {
            mode: OverlayMode::Notice,
            index: 0,
            total: 0,
            title: String::new(),
            paused: true,
            duration: format_time(f64::NAN),
            current_time: format_time(f64::NAN),
            percent: 0.0,
            is_live: false,
            preview: false,
            preview_seconds: None,
            playback_rate: 1.0,
            volume: 1.0,
            muted: false,
            seq: 0,
            op_id: None,
            message: Some(message.into()),
        }
    }

    pub fn with_op(mut self, op_id: u64) -> Self {
        self.op_id = Some(op_id);
        self
    }

    /// Mark as a provisional seek target
    pub fn with_preview(mut self, seconds: f64, percent: f64) -> Self {
        self.preview = true;
        self.preview_seconds = Some(seconds);
        self.percent = percent;
        self
    }
}

/// Named commands bindable to shortcuts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Command {
    CycleVideo,
    TogglePlayPause,
    SeekForward,
    SeekBack,
    VolumeUp,
    VolumeDown,
    ToggleMute,
    SpeedUp,
    SpeedDown,
    SpeedReset,
    SpeedCycle,
    Screenshot,
}

impl Command {
    pub const ALL: [Command; 12] = [
        Command::CycleVideo,
        Command::TogglePlayPause,
        Command::SeekForward,
        Command::SeekBack,
        Command::VolumeUp,
        Command::VolumeDown,
        Command::ToggleMute,
        Command::SpeedUp,
        Command::SpeedDown,
        Command::SpeedReset,
        Command::SpeedCycle,
        Command::Screenshot,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Command::CycleVideo => "cycle-video",
            Command::TogglePlayPause => "toggle-play-pause",
            Command::SeekForward => "seek-forward",
            Command::SeekBack => "seek-back",
            Command::VolumeUp => "volume-up",
            Command::VolumeDown => "volume-down",
            Command::ToggleMute => "toggle-mute",
            Command::SpeedUp => "speed-up",
            Command::SpeedDown => "speed-down",
            Command::SpeedReset => "speed-reset",
            Command::SpeedCycle => "speed-cycle",
            Command::Screenshot => "screenshot",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| format!("Unknown command: {}", s))
    }
}

/// Where a command came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandOrigin {
    /// Browser-level keyboard shortcut
    Shortcut,
    /// In-page key handler forwarding a command it could not handle itself
    PageFallback,
    /// Popup button
    Popup,
}

/// Tab-addressed control from the popup list
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "value", rename_all = "kebab-case")]
pub enum ControlAction {
    PlayToggle,
    SeekDelta(f64),
    #[serde(rename = "set-currentTime")]
    SetCurrentTime(f64),
    SetSpeed(f64),
    SetVolume(f64),
    ToggleMute,
    TogglePip,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpeedAction {
    Up,
    Down,
    Reset,
    Cycle,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VolumeAction {
    Up,
    Down,
}

/// Anything -> command router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum RouterMessage {
    Command {
        command: Command,
        origin: CommandOrigin,
    },
    Control {
        tab: TabId,
        action: ControlAction,
    },
    GlobalSpeed(SpeedAction),
    GlobalVolume(VolumeAction),
    ToggleMute,
    OverlayHidden,
    /// Whether a page has a non-flat saved EQ (icon tint)
    EqModifiedState {
        url: String,
    },
}

/// Whose media a toggle-mute affected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MuteScope {
    /// Explicitly cycled selection
    Global,
    /// Auto-focused on the active tab
    ActiveAuto,
}

/// Command router replies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum RouterReply {
    Ok,
    NotOk,
    /// Page fallback ignored right after the same shortcut
    Suppressed,
    TabNotFound,
    Muted { scope: MuteScope },
    EqModified { modified: bool },
}

/// Popup/page -> equalizer engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum EqRequest {
    Init,
    GetState,
    SetBand { index: usize, value: f32 },
    ApplyPreset { name: String },
    SavePreset { name: String },
    DeletePreset { name: String },
    Reset,
    GetQ,
    SetQ { q: f32 },
    SpectrumInit,
    SpectrumSample,
    GetResponse { points: usize, min_hz: f32, max_hz: f32 },
}

/// Snapshot of a page's EQ for the control surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EqState {
    pub frequencies: Vec<f32>,
    pub gains: Vec<f32>,
    pub q: f32,
    pub builtin_presets: Vec<StoredPreset>,
    pub custom_presets: Vec<StoredPreset>,
    /// Preset the live state matches, if any
    pub matched_preset: Option<String>,
    pub modified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum EqReply {
    State(EqState),
    Q { q: f32 },
    Spectrum { pre: Vec<f32>, post: Vec<f32> },
    Response { frequencies: Vec<f32>, magnitudes_db: Vec<f32> },
    Ok,
    /// EQ cannot run on this page/media
    Unavailable { reason: String },
    NotFound { name: String },
    /// Request understood but refused (bad name, out-of-range band)
    Rejected { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> MediaInfo {
        MediaInfo {
            kind: MediaKind::Video,
            name: "clip".into(),
            is_live: false,
            paused: false,
            current_time: "0:25".into(),
            raw_current_time: 25.0,
            duration: "1:40".into(),
            raw_duration: 100.0,
            playback_rate: 1.0,
            volume: 0.5,
            muted: false,
            thumbnail: None,
            pip_supported: true,
            pip_active: false,
        }
    }

    #[test]
    fn test_command_names() {
        for command in Command::ALL {
            assert_eq!(command.name().parse::<Command>().unwrap(), command);
            let json = serde_json::to_string(&command).unwrap();
            assert_eq!(json, format!("\"{}\"", command.name()));
        }
        assert!("warp-speed".parse::<Command>().is_err());
    }

    #[test]
    fn test_overlay_from_info() {
        let update = OverlayUpdate::from_info(OverlayMode::Final, 2, 3, "Tab".into(), &info());
        assert_eq!(update.percent, 25.0);
        assert!(!update.preview);
        assert_eq!(update.op_id, None);

        let preview = update.with_op(4).with_preview(30.0, 30.0);
        assert!(preview.preview);
        assert_eq!(preview.op_id, Some(4));
        assert_eq!(preview.preview_seconds, Some(30.0));
    }

    #[test]
    fn test_live_duration_survives_json() {
        let mut live = info();
        live.raw_duration = f64::INFINITY;
        live.is_live = true;
        let json = serde_json::to_string(&live).unwrap();
        assert!(json.contains("\"rawDuration\":null"));
        let back: MediaInfo = serde_json::from_str(&json).unwrap();
        assert!(back.raw_duration.is_infinite());
        assert_eq!(back.percent(), 0.0);
    }

    #[test]
    fn test_control_action_wire_names() {
        let json = serde_json::to_string(&ControlAction::SetCurrentTime(12.5)).unwrap();
        assert_eq!(json, r#"{"action":"set-currentTime","value":12.5}"#);
        let json = serde_json::to_string(&ControlAction::PlayToggle).unwrap();
        assert_eq!(json, r#"{"action":"play-toggle"}"#);
    }

    #[test]
    fn test_page_request_shape() {
        let json = serde_json::to_string(&PageRequest::GetMediaInfo).unwrap();
        assert_eq!(json, r#"{"type":"get-media-info"}"#);
        let req = PageRequest::silent(MediaCommand::SetCurrentTime(8.0));
        let back: PageRequest = serde_json::from_str(&serde_json::to_string(&req).unwrap()).unwrap();
        assert_eq!(back, req);
    }
}
