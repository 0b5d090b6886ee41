//! Page Agent
//!
//! Runs once per top-level page. Answers background requests about the
//! page's active media, applies mutations with clamping, drives the local
//! overlay and hosts the page's equalizer.

use std::sync::{Arc, Weak};

use chrono::Local;
use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{clamp_rate, clamp_volume, PageConfig, StepSettings, TabdeckConfig};
use crate::equalizer::EqualizerEngine;
use crate::format::media_name;
use crate::host::{MediaDocument, MediaElement, MediaKind};
use crate::locator::{is_mini_preview, MediaLocator};
use crate::message::{
    EqReply, EqRequest, LocalAction, MediaCommand, MediaInfo, OverlayMode, OverlayUpdate,
    PageReply, PageRequest,
};
use crate::overlay::{OverlayEvent, OverlayRenderer, OverlayView, Rejection};

/// Seek relative to the current position, clamped to `[0, duration]`.
///
/// Non-finite durations (live, unknown) make this a no-op.
pub fn seek_within(media: &dyn MediaElement, delta: f64) -> bool {
    let duration = media.duration();
    if !duration.is_finite() || !delta.is_finite() {
        return false;
    }
    let target = (media.current_time() + delta).clamp(0.0, duration.max(0.0));
    media.set_current_time(target);
    true
}

/// Next entry of a rate cycle, inserting `current` first if it is unknown
pub fn next_cycle_rate(cycle: &mut Vec<f64>, current: f64) -> f64 {
    if cycle.is_empty() {
        return 1.0;
    }
    let pos = match cycle.iter().position(|r| (r - current).abs() < 1e-3) {
        Some(pos) => pos,
        None => {
            cycle.push(current);
            cycle.sort_by(|a, b| a.total_cmp(b));
            cycle
                .iter()
                .position(|r| (r - current).abs() < 1e-3)
                .unwrap_or(0)
        }
    };
    cycle[(pos + 1) % cycle.len()]
}

/// `prefix_YYYYMMDD_HHMMSS.png` in local time
pub fn screenshot_file_name(prefix: &str) -> String {
    format!("{}_{}.png", prefix, Local::now().format("%Y%m%d_%H%M%S"))
}

#[derive(Default)]
struct FineSeek {
    direction: i8,
    task: Option<AbortHandle>,
}

pub struct PageAgent {
    document: Arc<dyn MediaDocument>,
    config: PageConfig,
    steps: Mutex<StepSettings>,
    locator: Mutex<MediaLocator>,
    overlay: Mutex<OverlayRenderer>,
    speed_cycle: Mutex<Vec<f64>>,
    fine_seek: Mutex<FineSeek>,
    equalizer: Option<Arc<EqualizerEngine>>,
}

impl PageAgent {
    pub fn new(document: Arc<dyn MediaDocument>, config: &TabdeckConfig, steps: StepSettings) -> Self {
        Self {
            document,
            steps: Mutex::new(steps),
            locator: Mutex::new(MediaLocator::new(config.locator.clone())),
            overlay: Mutex::new(OverlayRenderer::new(config.overlay.clone())),
            speed_cycle: Mutex::new(config.page.speed_cycle.clone()),
            fine_seek: Mutex::new(FineSeek::default()),
            config: config.page.clone(),
            equalizer: None,
        }
    }

    pub fn with_equalizer(mut self, equalizer: Arc<EqualizerEngine>) -> Self {
        self.equalizer = Some(equalizer);
        self
    }

    pub fn document(&self) -> &Arc<dyn MediaDocument> {
        &self.document
    }

    pub fn equalizer(&self) -> Option<&Arc<EqualizerEngine>> {
        self.equalizer.as_ref()
    }

    pub fn set_steps(&self, steps: StepSettings) {
        *self.steps.lock() = steps;
    }

    /// The element page-local commands act on
    pub fn active_media(&self) -> Option<Arc<dyn MediaElement>> {
        self.locator.lock().resolve_active(self.document.as_ref())
    }

    fn position(&self) -> (usize, usize) {
        let (index, total) = self.locator.lock().position();
        (index + 1, total.max(1))
    }

    /// Serve one background request
    pub fn handle(self: &Arc<Self>, request: PageRequest) -> PageReply {
        match request {
            PageRequest::GetMediaInfo => self.media_info(),
            PageRequest::Control { command, silent } => self.control(command, silent),
            PageRequest::Local(action) => self.local(action),
            PageRequest::Eq(request) => PageReply::Eq(self.eq(request)),
        }
    }

    fn media_info(&self) -> PageReply {
        let locator_config = {
            let locator = self.locator.lock();
            if !locator.reporting_allowed(self.document.as_ref()) {
                return PageReply::NotOk;
            }
            locator.config().mini_preview
        };
        let Some(media) = self.active_media() else {
            return PageReply::NotOk;
        };
        if is_mini_preview(media.as_ref(), &locator_config) {
            return PageReply::NotOk;
        }
        PageReply::Media(self.describe(media.as_ref()))
    }

    fn describe(&self, media: &dyn MediaElement) -> MediaInfo {
        let pip_active = self
            .document
            .pip_element()
            .is_some_and(|pip| pip.id() == media.id());
        MediaInfo::from_element(media, media_name(media), pip_active)
    }

    fn control(&self, command: MediaCommand, silent: bool) -> PageReply {
        if !self.locator.lock().reporting_allowed(self.document.as_ref()) {
            return PageReply::NotOk;
        }
        let Some(media) = self.active_media() else {
            return PageReply::NotOk;
        };
        let media = media.as_ref();

        let mode = match command {
            MediaCommand::Play => {
                if let Err(e) = media.play() {
                    debug!("play() rejected: {}", e);
                }
                OverlayMode::PlayToggle
            }
            MediaCommand::Pause => {
                media.pause();
                OverlayMode::PlayToggle
            }
            MediaCommand::Mute => {
                media.set_muted(true);
                OverlayMode::MuteToggle
            }
            MediaCommand::Unmute => {
                media.set_muted(false);
                OverlayMode::MuteToggle
            }
            MediaCommand::SetVolume(volume) => {
                media.set_volume(clamp_volume(volume));
                OverlayMode::VolumeSet
            }
            MediaCommand::Seek(delta) => {
                seek_within(media, delta);
                OverlayMode::Final
            }
            MediaCommand::SetCurrentTime(seconds) => {
                let duration = media.duration();
                if duration.is_finite() && seconds.is_finite() {
                    media.set_current_time(seconds.clamp(0.0, duration.max(0.0)));
                }
                OverlayMode::Final
            }
            MediaCommand::SetPlaybackRate(rate) => {
                media.set_playback_rate(clamp_rate(rate));
                OverlayMode::SpeedSet
            }
            MediaCommand::Reset => {
                if media.duration().is_finite() {
                    media.set_current_time(0.0);
                }
                media.set_playback_rate(1.0);
                OverlayMode::SpeedSet
            }
            MediaCommand::TogglePip => {
                let showing = self
                    .document
                    .pip_element()
                    .is_some_and(|pip| pip.id() == media.id());
                let result = if showing {
                    self.document.exit_pip()
                } else {
                    media.request_pip()
                };
                if let Err(e) = result {
                    debug!("Picture-in-picture toggle failed: {}", e);
                    return PageReply::NotOk;
                }
                return PageReply::Ok;
            }
        };

        if !silent {
            self.show_local(mode, media);
        }
        PageReply::Ok
    }

    /// Page-local feedback for an action on `media`
    fn show_local(&self, mode: OverlayMode, media: &dyn MediaElement) {
        let info = self.describe(media);
        let (index, total) = self.position();
        let update = OverlayUpdate::from_info(mode, index, total, info.name.clone(), &info);
        self.overlay.lock().apply_local(&update, Instant::now());
    }

    fn show_notice(&self, message: impl Into<String>) {
        self.overlay
            .lock()
            .apply_local(&OverlayUpdate::notice(message), Instant::now());
    }

    fn local(self: &Arc<Self>, action: LocalAction) -> PageReply {
        if !self.locator.lock().reporting_allowed(self.document.as_ref()) {
            return PageReply::NotOk;
        }
        if action == LocalAction::CycleMedia {
            return self.cycle_media();
        }
        if let LocalAction::FineSeekStop(direction) = action {
            self.stop_fine_seek(direction);
            return PageReply::Ok;
        }

        let Some(media) = self.active_media() else {
            self.show_notice("No media found");
            return PageReply::NotOk;
        };
        let steps = *self.steps.lock();

        match action {
            LocalAction::SeekForward | LocalAction::SeekBack => {
                let delta = if action == LocalAction::SeekForward {
                    steps.seek_step
                } else {
                    -steps.seek_step
                };
                if !seek_within(media.as_ref(), delta) {
                    return PageReply::NotOk;
                }
                self.show_local(OverlayMode::Final, media.as_ref());
            }
            LocalAction::SpeedUp | LocalAction::SpeedDown | LocalAction::SpeedReset => {
                let rate = match action {
                    LocalAction::SpeedUp => media.playback_rate() + steps.speed_step,
                    LocalAction::SpeedDown => media.playback_rate() - steps.speed_step,
                    _ => 1.0,
                };
                media.set_playback_rate(clamp_rate(rate));
                self.show_local(OverlayMode::SpeedSet, media.as_ref());
            }
            LocalAction::SpeedCycle => {
                let next = next_cycle_rate(&mut self.speed_cycle.lock(), media.playback_rate());
                media.set_playback_rate(clamp_rate(next));
                self.show_local(OverlayMode::SpeedSet, media.as_ref());
            }
            LocalAction::TogglePlay => {
                if media.paused() {
                    if let Err(e) = media.play() {
                        debug!("play() rejected: {}", e);
                    }
                } else {
                    media.pause();
                }
                self.show_local(OverlayMode::PlayToggle, media.as_ref());
            }
            LocalAction::Screenshot => return self.screenshot(media.as_ref()),
            LocalAction::FineSeekStart(direction) => self.start_fine_seek(direction),
            LocalAction::CycleMedia | LocalAction::FineSeekStop(_) => {}
        }
        PageReply::Ok
    }

    fn cycle_media(&self) -> PageReply {
        let cycled = self.locator.lock().cycle(self.document.as_ref());
        let Some((index, total, media)) = cycled else {
            self.show_notice("No media found");
            return PageReply::NotOk;
        };
        let info = self.describe(media.as_ref());
        let title = format!("({}/{}) {}", index + 1, total, info.name);
        info!("Selected {}", title);
        let mut update = OverlayUpdate::from_info(OverlayMode::Select, index + 1, total, info.name.clone(), &info);
        update.message = Some(title);
        self.overlay.lock().apply_local(&update, Instant::now());
        PageReply::Ok
    }

    fn screenshot(&self, media: &dyn MediaElement) -> PageReply {
        if media.kind() != MediaKind::Video {
            self.show_notice("Screenshots need a video");
            return PageReply::NotOk;
        }
        let name = screenshot_file_name(&self.config.screenshot_prefix);
        match self.document.save_screenshot(media, &name) {
            Ok(()) => {
                info!("Saved screenshot {}", name);
                self.show_notice(format!("Saved {}", name));
                PageReply::Ok
            }
            Err(e) => {
                warn!("Screenshot failed: {}", e);
                self.show_notice("Screenshot failed");
                PageReply::NotOk
            }
        }
    }

    fn fine_seek_step(&self, direction: i8) -> bool {
        let Some(media) = self.active_media() else {
            return false;
        };
        let moved = seek_within(media.as_ref(), f64::from(direction) * self.config.fine_seek_step);
        if moved {
            self.show_local(OverlayMode::Final, media.as_ref());
        }
        moved
    }

    /// Begin continuous seeking; one step happens immediately
    pub fn start_fine_seek(self: &Arc<Self>, direction: i8) {
        let direction = direction.signum();
        if direction == 0 {
            return;
        }
        {
            let mut state = self.fine_seek.lock();
            if state.direction == direction && state.task.is_some() {
                return;
            }
            if let Some(task) = state.task.take() {
                task.abort();
            }
            state.direction = direction;
        }
        self.overlay.lock().set_interacting(true, Instant::now());
        self.fine_seek_step(direction);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime; fine seek limited to a single step");
            return;
        };
        let agent: Weak<Self> = Arc::downgrade(self);
        let period = self.config.fine_seek_interval();
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(agent) = agent.upgrade() else {
                    break;
                };
                agent.fine_seek_step(direction);
            }
        });
        self.fine_seek.lock().task = Some(task.abort_handle());
    }

    /// Stop continuous seeking. `0` stops any direction.
    pub fn stop_fine_seek(&self, direction: i8) {
        {
            let mut state = self.fine_seek.lock();
            if state.direction == 0 {
                return;
            }
            if direction != 0 && direction.signum() != state.direction {
                return;
            }
            if let Some(task) = state.task.take() {
                task.abort();
            }
            state.direction = 0;
        }
        self.overlay.lock().set_interacting(false, Instant::now());
    }

    pub fn fine_seek_active(&self) -> bool {
        self.fine_seek.lock().direction != 0
    }

    fn eq(&self, request: EqRequest) -> EqReply {
        let Some(equalizer) = &self.equalizer else {
            return EqReply::Unavailable {
                reason: "equalizer not enabled on this page".to_string(),
            };
        };
        let media = self.active_media();
        equalizer.handle(request, media.as_deref())
    }

    /// Re-apply saved EQ once media appears
    pub async fn restore_eq(self: &Arc<Self>) -> bool {
        let Some(equalizer) = self.equalizer.clone() else {
            return false;
        };
        let agent = Arc::clone(self);
        equalizer.restore(move || agent.active_media()).await
    }

    /// Overlay update pushed by the background
    pub fn receive_overlay(&self, update: &OverlayUpdate) -> Result<(), Rejection> {
        let result = self.overlay.lock().apply_remote(update, Instant::now());
        if let Err(rejection) = result {
            debug!("Dropped overlay update seq={}: {:?}", update.seq, rejection);
        }
        result
    }

    pub fn overlay_view(&self) -> Option<OverlayView> {
        self.overlay.lock().view().cloned()
    }

    /// Animation-frame tick: follow the active media, then check auto-hide
    pub fn tick_overlay(&self, now: Instant) -> Option<OverlayEvent> {
        let media = self.active_media();
        let mut overlay = self.overlay.lock();
        if let Some(media) = media {
            overlay.tick(media.as_ref());
        }
        overlay.poll(now)
    }
}
