//! In-memory browser for tests, benches and headless runs
//!
//! [`SimMedia`] and [`SimDocument`] stand in for DOM nodes, [`SimAudio`]
//! for the Web Audio graph and [`SimBrowser`] for the tabs API. The
//! browser records every request and overlay push so callers can assert
//! on the traffic.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tabdeck_dsp::FilterChain;

use crate::config::{StepSettings, TabdeckConfig};
use crate::error::{HostError, HostResult};
use crate::host::{
    AudioHost, MediaDocument, MediaElement, MediaId, MediaKind, ReadyState, Rect, TabDescriptor,
    TabHost, TabId, Viewport,
};
use crate::message::{OverlayUpdate, PageReply, PageRequest};
use crate::page::PageAgent;

/// Mutable state of a simulated media element
#[derive(Debug, Clone, PartialEq)]
pub struct SimMediaState {
    pub rect: Rect,
    pub client_size: (f64, f64),
    pub intrinsic_size: (f64, f64),
    pub paused: bool,
    pub ended: bool,
    pub ready_state: ReadyState,
    pub current_time: f64,
    pub duration: f64,
    pub playback_rate: f64,
    pub volume: f64,
    pub muted: bool,
    pub connected: bool,
    pub label: Option<String>,
    pub poster: Option<String>,
    pub pip_supported: bool,
    pub pip_active: bool,
    /// play() rejects, as with autoplay policies
    pub play_blocked: bool,
}

pub struct SimMedia {
    id: MediaId,
    kind: MediaKind,
    state: Mutex<SimMediaState>,
}

impl SimMedia {
    fn with_kind(id: u64, kind: MediaKind, rect: Rect, intrinsic: (f64, f64)) -> Self {
        Self {
            id: MediaId(id),
            kind,
            state: Mutex::new(SimMediaState {
                rect,
                client_size: (rect.width, rect.height),
                intrinsic_size: intrinsic,
                paused: true,
                ended: false,
                ready_state: ReadyState::HaveEnoughData,
                current_time: 0.0,
                duration: 100.0,
                playback_rate: 1.0,
                volume: 1.0,
                muted: false,
                connected: true,
                label: None,
                poster: None,
                pip_supported: true,
                pip_active: false,
                play_blocked: false,
            }),
        }
    }

    /// Paused 100 s video rendered at the top-left of the viewport
    pub fn video(id: u64, width: f64, height: f64) -> Self {
        Self::with_kind(
            id,
            MediaKind::Video,
            Rect::new(0.0, 0.0, width, height),
            (width, height),
        )
    }

    /// Audio element with visible controls
    pub fn audio(id: u64) -> Self {
        let media = Self::with_kind(
            id,
            MediaKind::Audio,
            Rect::new(0.0, 0.0, 300.0, 80.0),
            (0.0, 0.0),
        );
        media.update(|s| s.pip_supported = false);
        media
    }

    fn with(self, f: impl FnOnce(&mut SimMediaState)) -> Self {
        f(&mut *self.state.lock());
        self
    }

    /// Also updates the rendered size
    pub fn with_rect(self, rect: Rect) -> Self {
        self.with(|s| {
            s.rect = rect;
            s.client_size = (rect.width, rect.height);
        })
    }

    pub fn with_intrinsic_size(self, width: f64, height: f64) -> Self {
        self.with(|s| s.intrinsic_size = (width, height))
    }

    pub fn with_playing(self, playing: bool) -> Self {
        self.with(|s| s.paused = !playing)
    }

    pub fn with_time(self, seconds: f64) -> Self {
        self.with(|s| s.current_time = seconds)
    }

    pub fn with_duration(self, seconds: f64) -> Self {
        self.with(|s| s.duration = seconds)
    }

    pub fn with_muted(self, muted: bool) -> Self {
        self.with(|s| s.muted = muted)
    }

    pub fn with_volume(self, volume: f64) -> Self {
        self.with(|s| s.volume = volume)
    }

    pub fn with_ended(self, ended: bool) -> Self {
        self.with(|s| s.ended = ended)
    }

    pub fn with_ready_state(self, ready_state: ReadyState) -> Self {
        self.with(|s| s.ready_state = ready_state)
    }

    pub fn with_label(self, label: &str) -> Self {
        let label = label.to_string();
        self.with(|s| s.label = Some(label))
    }

    pub fn with_pip_active(self, active: bool) -> Self {
        self.with(|s| s.pip_active = active)
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn update(&self, f: impl FnOnce(&mut SimMediaState)) {
        f(&mut *self.state.lock());
    }

    pub fn snapshot(&self) -> SimMediaState {
        self.state.lock().clone()
    }

    /// Play forward by `seconds` of wall time
    pub fn advance(&self, seconds: f64) {
        let mut s = self.state.lock();
        if s.paused || s.ended {
            return;
        }
        let next = s.current_time + seconds * s.playback_rate;
        if s.duration.is_finite() && next >= s.duration {
            s.current_time = s.duration;
            s.ended = true;
            s.paused = true;
        } else {
            s.current_time = next;
        }
    }
}

impl MediaElement for SimMedia {
    fn id(&self) -> MediaId {
        self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn rect(&self) -> Rect {
        self.state.lock().rect
    }

    fn client_size(&self) -> (f64, f64) {
        self.state.lock().client_size
    }

    fn intrinsic_size(&self) -> (f64, f64) {
        self.state.lock().intrinsic_size
    }

    fn paused(&self) -> bool {
        self.state.lock().paused
    }

    fn ended(&self) -> bool {
        self.state.lock().ended
    }

    fn ready_state(&self) -> ReadyState {
        self.state.lock().ready_state
    }

    fn current_time(&self) -> f64 {
        self.state.lock().current_time
    }

    fn duration(&self) -> f64 {
        self.state.lock().duration
    }

    fn playback_rate(&self) -> f64 {
        self.state.lock().playback_rate
    }

    fn volume(&self) -> f64 {
        self.state.lock().volume
    }

    fn muted(&self) -> bool {
        self.state.lock().muted
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn label(&self) -> Option<String> {
        self.state.lock().label.clone()
    }

    fn poster(&self) -> Option<String> {
        self.state.lock().poster.clone()
    }

    fn pip_supported(&self) -> bool {
        self.state.lock().pip_supported
    }

    fn play(&self) -> HostResult<()> {
        let mut s = self.state.lock();
        if s.play_blocked {
            return Err(HostError::Failed("play() was blocked".to_string()));
        }
        s.paused = false;
        s.ended = false;
        Ok(())
    }

    fn pause(&self) {
        self.state.lock().paused = true;
    }

    fn set_current_time(&self, seconds: f64) {
        let mut s = self.state.lock();
        s.current_time = seconds;
        if s.duration.is_finite() && seconds < s.duration {
            s.ended = false;
        }
    }

    fn set_playback_rate(&self, rate: f64) {
        self.state.lock().playback_rate = rate;
    }

    fn set_volume(&self, volume: f64) {
        self.state.lock().volume = volume;
    }

    fn set_muted(&self, muted: bool) {
        self.state.lock().muted = muted;
    }

    fn request_pip(&self) -> HostResult<()> {
        let mut s = self.state.lock();
        if !s.pip_supported {
            return Err(HostError::Unsupported("picture-in-picture".to_string()));
        }
        if !s.connected {
            return Err(HostError::Detached);
        }
        s.pip_active = true;
        Ok(())
    }
}

pub struct SimDocument {
    url: Mutex<String>,
    top_frame: bool,
    viewport: Viewport,
    media: Mutex<Vec<Arc<SimMedia>>>,
    screenshots: Mutex<Vec<String>>,
}

impl SimDocument {
    pub fn new(url: &str) -> Self {
        Self {
            url: Mutex::new(url.to_string()),
            top_frame: true,
            viewport: Viewport::default(),
            media: Mutex::new(Vec::new()),
            screenshots: Mutex::new(Vec::new()),
        }
    }

    /// Mark as an embedded frame
    pub fn nested(mut self) -> Self {
        self.top_frame = false;
        self
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn add(&self, media: Arc<SimMedia>) {
        self.media.lock().push(media);
    }

    /// Detach and drop an element
    pub fn remove(&self, id: MediaId) {
        let mut media = self.media.lock();
        if let Some(pos) = media.iter().position(|m| m.id == id) {
            let removed = media.remove(pos);
            removed.update(|s| {
                s.connected = false;
                s.pip_active = false;
            });
        }
    }

    pub fn navigate(&self, url: &str) {
        *self.url.lock() = url.to_string();
    }

    pub fn screenshots(&self) -> Vec<String> {
        self.screenshots.lock().clone()
    }
}

impl MediaDocument for SimDocument {
    fn url(&self) -> String {
        self.url.lock().clone()
    }

    fn is_top_frame(&self) -> bool {
        self.top_frame
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn media_elements(&self) -> Vec<Arc<dyn MediaElement>> {
        self.media
            .lock()
            .iter()
            .map(|m| Arc::clone(m) as Arc<dyn MediaElement>)
            .collect()
    }

    fn pip_element(&self) -> Option<Arc<dyn MediaElement>> {
        self.media
            .lock()
            .iter()
            .find(|m| m.state.lock().pip_active)
            .map(|m| Arc::clone(m) as Arc<dyn MediaElement>)
    }

    fn exit_pip(&self) -> HostResult<()> {
        for media in self.media.lock().iter() {
            media.update(|s| s.pip_active = false);
        }
        Ok(())
    }

    fn save_screenshot(&self, element: &dyn MediaElement, file_name: &str) -> HostResult<()> {
        if !element.is_connected() {
            return Err(HostError::Detached);
        }
        self.screenshots.lock().push(file_name.to_string());
        Ok(())
    }
}

/// Audio graph that processes on demand
pub struct SimAudio {
    sample_rate: Option<f32>,
    denied: Mutex<HashSet<MediaId>>,
    attached: Mutex<Vec<(MediaId, Arc<Mutex<FilterChain>>)>>,
    contexts: AtomicUsize,
}

impl SimAudio {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate: Some(sample_rate),
            denied: Mutex::new(HashSet::new()),
            attached: Mutex::new(Vec::new()),
            contexts: AtomicUsize::new(0),
        }
    }

    /// A page where audio contexts cannot be created
    pub fn unsupported() -> Self {
        Self {
            sample_rate: None,
            ..Self::new(0.0)
        }
    }

    /// Refuse routing for one element (cross-origin media)
    pub fn deny(&self, id: MediaId) {
        self.denied.lock().insert(id);
    }

    pub fn contexts_created(&self) -> usize {
        self.contexts.load(Ordering::SeqCst)
    }

    pub fn attached_count(&self) -> usize {
        self.attached.lock().len()
    }

    pub fn chains(&self) -> Vec<Arc<Mutex<FilterChain>>> {
        self.attached.lock().iter().map(|(_, c)| Arc::clone(c)).collect()
    }

    /// Push interleaved stereo through the element's chain
    pub fn render(&self, id: MediaId, samples: &[f32]) -> bool {
        let chain = self
            .attached
            .lock()
            .iter()
            .find(|(m, _)| *m == id)
            .map(|(_, c)| Arc::clone(c));
        let Some(chain) = chain else {
            return false;
        };
        let mut buffer = samples.to_vec();
        chain.lock().process_interleaved(&mut buffer);
        true
    }
}

impl AudioHost for SimAudio {
    fn create_context(&self) -> HostResult<f32> {
        let rate = self
            .sample_rate
            .ok_or_else(|| HostError::Unsupported("AudioContext".to_string()))?;
        self.contexts.fetch_add(1, Ordering::SeqCst);
        Ok(rate)
    }

    fn attach(&self, element: &dyn MediaElement, chain: Arc<Mutex<FilterChain>>) -> HostResult<()> {
        if self.denied.lock().contains(&element.id()) {
            return Err(HostError::CrossOrigin);
        }
        if !element.is_connected() {
            return Err(HostError::Detached);
        }
        self.attached.lock().push((element.id(), chain));
        Ok(())
    }
}

struct SimTab {
    descriptor: TabDescriptor,
    agent: Option<Arc<PageAgent>>,
}

/// A page opened in a [`SimBrowser`]
pub struct SimPage {
    pub tab: TabId,
    pub document: Arc<SimDocument>,
    pub agent: Arc<PageAgent>,
}

/// Tabs API over in-process page agents
#[derive(Default)]
pub struct SimBrowser {
    tabs: Mutex<Vec<SimTab>>,
    active: Mutex<Option<TabId>>,
    requests: Mutex<Vec<(TabId, PageRequest)>>,
    overlays: Mutex<Vec<(TabId, OverlayUpdate)>>,
}

impl SimBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tab; `None` models a page without an agent (e.g. chrome:// pages)
    pub fn add_tab(&self, descriptor: TabDescriptor, agent: Option<Arc<PageAgent>>) {
        self.tabs.lock().push(SimTab { descriptor, agent });
    }

    /// Open a top-level page with default settings and the given media
    pub fn open_page(&self, id: u32, title: &str, url: &str, media: &[Arc<SimMedia>]) -> SimPage {
        let document = SimDocument::new(url).shared();
        for m in media {
            document.add(Arc::clone(m));
        }
        let agent = Arc::new(PageAgent::new(
            document.clone(),
            &TabdeckConfig::default(),
            StepSettings::default(),
        ));
        self.add_tab(TabDescriptor::new(id, title, url), Some(agent.clone()));
        SimPage {
            tab: TabId(id),
            document,
            agent,
        }
    }

    pub fn close_tab(&self, id: TabId) {
        self.tabs.lock().retain(|t| t.descriptor.id != id);
        let mut active = self.active.lock();
        if *active == Some(id) {
            *active = None;
        }
    }

    pub fn activate(&self, id: TabId) {
        *self.active.lock() = Some(id);
    }

    pub fn agent(&self, id: TabId) -> Option<Arc<PageAgent>> {
        self.tabs
            .lock()
            .iter()
            .find(|t| t.descriptor.id == id)
            .and_then(|t| t.agent.clone())
    }

    pub fn requests(&self) -> Vec<(TabId, PageRequest)> {
        self.requests.lock().clone()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }

    pub fn overlays(&self) -> Vec<(TabId, OverlayUpdate)> {
        self.overlays.lock().clone()
    }

    pub fn last_overlay(&self) -> Option<OverlayUpdate> {
        self.overlays.lock().last().map(|(_, u)| u.clone())
    }
}

#[async_trait]
impl TabHost for SimBrowser {
    async fn query_tabs(&self) -> Vec<TabDescriptor> {
        self.tabs.lock().iter().map(|t| t.descriptor.clone()).collect()
    }

    async fn active_tab(&self) -> Option<TabDescriptor> {
        let active = (*self.active.lock())?;
        self.tabs
            .lock()
            .iter()
            .find(|t| t.descriptor.id == active)
            .map(|t| t.descriptor.clone())
    }

    async fn send(&self, tab: TabId, request: PageRequest) -> HostResult<PageReply> {
        self.requests.lock().push((tab, request.clone()));
        let agent = {
            let tabs = self.tabs.lock();
            let entry = tabs
                .iter()
                .find(|t| t.descriptor.id == tab)
                .ok_or(HostError::TabClosed(tab))?;
            entry.agent.clone().ok_or(HostError::NoReceiver(tab))?
        };
        Ok(agent.handle(request))
    }

    async fn push_overlay(&self, tab: TabId, update: OverlayUpdate) {
        if let Some(agent) = self.agent(tab) {
            let _ = agent.receive_overlay(&update);
        }
        self.overlays.lock().push((tab, update));
    }
}
