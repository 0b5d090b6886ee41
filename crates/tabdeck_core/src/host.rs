//! Host Capability Traits
//!
//! The browser is an external collaborator. Everything the core needs from
//! it is expressed here: tabs and message delivery on the background side,
//! the document and its media elements on the page side, and the audio
//! graph used by the equalizer.
//!
//! Media elements behave like DOM nodes: shared, interior-mutable and
//! possibly detached at any moment. The core only ever holds them through
//! `Arc` while working and `Weak` while remembering.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tabdeck_dsp::FilterChain;

use crate::error::HostResult;
use crate::message::{OverlayUpdate, PageReply, PageRequest};

/// Browser tab identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub u32);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identity of one media element within its page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaId(pub u64);

/// What the background knows about a tab
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabDescriptor {
    pub id: TabId,
    pub title: String,
    pub url: String,
}

impl TabDescriptor {
    pub fn new(id: u32, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: TabId(id),
            title: title.into(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

/// HTMLMediaElement.readyState
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReadyState {
    HaveNothing = 0,
    HaveMetadata = 1,
    HaveCurrentData = 2,
    HaveFutureData = 3,
    HaveEnoughData = 4,
}

/// Bounding box in viewport coordinates (CSS pixels)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn top(&self) -> f64 {
        self.y
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn center_y(&self) -> f64 {
        self.y + self.height / 2.0
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 720.0,
        }
    }
}

/// One `<video>` or `<audio>` element
pub trait MediaElement: Send + Sync {
    fn id(&self) -> MediaId;
    fn kind(&self) -> MediaKind;

    fn rect(&self) -> Rect;
    /// Rendered size (clientWidth, clientHeight)
    fn client_size(&self) -> (f64, f64);
    /// Decoded frame size (videoWidth, videoHeight); zero for audio
    fn intrinsic_size(&self) -> (f64, f64);

    fn paused(&self) -> bool;
    fn ended(&self) -> bool;
    fn ready_state(&self) -> ReadyState;
    fn current_time(&self) -> f64;
    /// Seconds; `f64::INFINITY` for live streams, NaN before metadata
    fn duration(&self) -> f64;
    fn playback_rate(&self) -> f64;
    fn volume(&self) -> f64;
    fn muted(&self) -> bool;
    /// Still attached to its document
    fn is_connected(&self) -> bool;

    /// aria-label / title / data-title of the element or a near ancestor
    fn label(&self) -> Option<String>;
    fn poster(&self) -> Option<String>;
    fn pip_supported(&self) -> bool;

    fn play(&self) -> HostResult<()>;
    fn pause(&self);
    fn set_current_time(&self, seconds: f64);
    fn set_playback_rate(&self, rate: f64);
    fn set_volume(&self, volume: f64);
    fn set_muted(&self, muted: bool);
    fn request_pip(&self) -> HostResult<()>;
}

/// The top-level document (or a frame) a page agent runs in
pub trait MediaDocument: Send + Sync {
    fn url(&self) -> String;
    fn is_top_frame(&self) -> bool;
    fn viewport(&self) -> Viewport;
    /// All media elements currently in the document, in tree order
    fn media_elements(&self) -> Vec<Arc<dyn MediaElement>>;
    /// Element currently shown picture-in-picture, if any
    fn pip_element(&self) -> Option<Arc<dyn MediaElement>>;
    fn exit_pip(&self) -> HostResult<()>;
    /// Capture the element's current frame and save it as a PNG download
    fn save_screenshot(&self, element: &dyn MediaElement, file_name: &str) -> HostResult<()>;
}

/// Background-side view of the browser's tabs
#[async_trait]
pub trait TabHost: Send + Sync {
    async fn query_tabs(&self) -> Vec<TabDescriptor>;

    /// Active tab of the focused window
    async fn active_tab(&self) -> Option<TabDescriptor>;

    /// Deliver a request to the tab's top-level page agent and await its reply
    async fn send(&self, tab: TabId, request: PageRequest) -> HostResult<PageReply>;

    /// Fire-and-forget overlay push; delivery failures are ignored
    async fn push_overlay(&self, tab: TabId, update: OverlayUpdate);
}

/// Page-side audio graph
pub trait AudioHost: Send + Sync {
    /// Create the page's audio context, returning its sample rate
    fn create_context(&self) -> HostResult<f32>;

    /// Route `element` through `chain` to the output
    fn attach(&self, element: &dyn MediaElement, chain: Arc<Mutex<FilterChain>>) -> HostResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_geometry() {
        let r = Rect::new(0.0, 100.0, 640.0, 360.0);
        assert_eq!(r.center_y(), 280.0);
        assert_eq!(r.bottom(), 460.0);
        assert_eq!(r.area(), 640.0 * 360.0);
        assert_eq!(Rect::new(0.0, 0.0, -5.0, 10.0).area(), 0.0);
    }

    #[test]
    fn test_ready_state_ordering() {
        assert!(ReadyState::HaveEnoughData >= ReadyState::HaveCurrentData);
        assert!(ReadyState::HaveMetadata < ReadyState::HaveCurrentData);
    }

    #[test]
    fn test_tab_id_serializes_as_number() {
        let json = serde_json::to_string(&TabId(42)).unwrap();
        assert_eq!(json, "42");
    }
}
