//! Cross-Tab Coordinator
//!
//! Background-side owner of the cross-tab media list and the current
//! selection. All browser interaction goes through [`TabHost`]; every
//! mutation follows the same shape: fetch fresh state from the selected
//! tab, send a silent command, re-fetch, then push an overlay update.
//!
//! # Selection modes
//! - **Auto-focus** (`force_global == false`): commands act on the media of
//!   whichever tab the user is looking at.
//! - **Global** (`force_global == true`): set by an explicit cycle; the
//!   selection stays put across tab switches until the overlay hides.
//!
//! State lives behind a `parking_lot::Mutex` that is never held across an
//! `.await`.

mod seek;
mod sync;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{clamp_rate, clamp_volume, CoordinatorConfig, StepSettings, TabdeckConfig};
use crate::format::{tab_title, UNKNOWN_TIME};
use crate::gate::CounterSource;
use crate::host::{TabDescriptor, TabHost, TabId};
use crate::message::{
    ControlAction, MediaCommand, MediaInfo, MuteScope, OverlayMode, OverlayUpdate, PageReply,
    PageRequest, SpeedAction,
};
use crate::storage::{apply_step_value, KeyValueStore};

pub use seek::seek_target;

/// One tab with controllable media
#[derive(Debug, Clone, PartialEq)]
pub struct TabMediaEntry {
    pub tab: TabDescriptor,
    pub info: MediaInfo,
}

/// Selection after the list was rebuilt with `len` entries
pub fn reconcile_selection(selected: Option<usize>, len: usize) -> Option<usize> {
    match selected {
        _ if len == 0 => None,
        Some(index) if index < len => Some(index),
        _ => Some(0),
    }
}

/// Ask every tab for its active media, keeping tab order
pub async fn collect_media(host: &Arc<dyn TabHost>) -> Vec<TabMediaEntry> {
    let tabs = host.query_tabs().await;
    let mut requests = JoinSet::new();
    for (order, tab) in tabs.into_iter().enumerate() {
        let host = Arc::clone(host);
        requests.spawn(async move {
            let reply = host.send(tab.id, PageRequest::GetMediaInfo).await;
            (order, tab, reply)
        });
    }

    let mut found = Vec::new();
    while let Some(joined) = requests.join_next().await {
        match joined {
            Ok((order, tab, Ok(reply))) => {
                if let Some(info) = reply.into_media() {
                    found.push((order, TabMediaEntry { tab, info }));
                }
            }
            Ok((_, tab, Err(e))) => debug!("Skipping tab {}: {}", tab.id, e),
            Err(e) => debug!("Media query aborted: {}", e),
        }
    }
    found.sort_by_key(|(order, _)| *order);
    found.into_iter().map(|(_, entry)| entry).collect()
}

/// Result of a tab-addressed control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    Done,
    TabNotFound,
    Failed,
}

/// Debounced seek accumulation
#[derive(Default)]
struct SeekSession {
    accumulated: f64,
    /// A session is open from its first delta until its commit finishes
    open: bool,
    ops: CounterSource,
    op_id: u64,
    base_time: Option<f64>,
    timer: Option<(u64, AbortHandle)>,
    timers: CounterSource,
}

impl SeekSession {
    fn cancel_timer(&mut self) {
        if let Some((_, handle)) = self.timer.take() {
            handle.abort();
        }
    }

    /// Drop any pending accumulation and the known base time
    fn clear(&mut self) {
        self.cancel_timer();
        self.accumulated = 0.0;
        self.open = false;
        self.base_time = None;
    }
}

struct CoordinatorState {
    media: Vec<TabMediaEntry>,
    selected: Option<usize>,
    last_scan: Option<Instant>,
    force_global: bool,
    seek: SeekSession,
    overlay_seq: CounterSource,
    steps: StepSettings,
    speed_preset: usize,
    watch: Option<AbortHandle>,
}

pub struct Coordinator {
    host: Arc<dyn TabHost>,
    config: CoordinatorConfig,
    title_max_chars: usize,
    state: Mutex<CoordinatorState>,
}

impl Coordinator {
    pub fn new(host: Arc<dyn TabHost>, config: &TabdeckConfig, steps: StepSettings) -> Self {
        // Start on the 1x preset so the first cycle moves up
        let speed_preset = 1usize.min(config.coordinator.speed_presets.len().saturating_sub(1));
        Self {
            host,
            config: config.coordinator.clone(),
            title_max_chars: config.overlay.title_max_chars,
            state: Mutex::new(CoordinatorState {
                media: Vec::new(),
                selected: None,
                last_scan: None,
                force_global: false,
                seek: SeekSession::default(),
                overlay_seq: CounterSource::new(),
                steps,
                speed_preset,
                watch: None,
            }),
        }
    }

    pub fn host(&self) -> &Arc<dyn TabHost> {
        &self.host
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    // --- snapshots -------------------------------------------------------

    pub fn media_list(&self) -> Vec<TabMediaEntry> {
        self.state.lock().media.clone()
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.state.lock().selected
    }

    pub fn selected_entry(&self) -> Option<(usize, TabMediaEntry)> {
        let st = self.state.lock();
        let index = st.selected?;
        st.media.get(index).map(|e| (index, e.clone()))
    }

    pub fn force_global(&self) -> bool {
        self.state.lock().force_global
    }

    pub fn base_time(&self) -> Option<f64> {
        self.state.lock().seek.base_time
    }

    pub fn accumulated_seek(&self) -> f64 {
        self.state.lock().seek.accumulated
    }

    pub fn current_op_id(&self) -> u64 {
        self.state.lock().seek.op_id
    }

    pub fn has_pending_commit(&self) -> bool {
        self.state.lock().seek.timer.is_some()
    }

    pub fn steps(&self) -> StepSettings {
        self.state.lock().steps
    }

    pub fn set_steps(&self, steps: StepSettings) {
        self.state.lock().steps = steps;
    }

    /// Keep step sizes in sync with storage changes
    pub fn follow_step_settings(self: &Arc<Self>, store: &dyn KeyValueStore) -> JoinHandle<()> {
        let mut changes = store.subscribe();
        let coordinator = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let change = match changes.recv().await {
                    Ok(change) => change,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Missed {} storage changes", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(coordinator) = coordinator.upgrade() else {
                    break;
                };
                let mut st = coordinator.state.lock();
                if apply_step_value(&mut st.steps, &change.key, change.value.as_ref()) {
                    debug!("Step setting {} updated", change.key);
                }
            }
        })
    }

    // --- host plumbing ---------------------------------------------------

    async fn fetch_info(&self, tab: TabId) -> Option<MediaInfo> {
        match self.host.send(tab, PageRequest::GetMediaInfo).await {
            Ok(reply) => reply.into_media(),
            Err(e) => {
                debug!("Media info from tab {} unavailable: {}", tab, e);
                None
            }
        }
    }

    async fn send_command(&self, tab: TabId, command: MediaCommand) -> bool {
        match self.host.send(tab, PageRequest::silent(command)).await {
            Ok(PageReply::Ok) => true,
            Ok(reply) => {
                debug!("Tab {} declined {:?}: {:?}", tab, command, reply);
                false
            }
            Err(e) => {
                debug!("Command {:?} to tab {} failed: {}", command, tab, e);
                false
            }
        }
    }

    /// Stamp with the next sequence number and deliver to the active tab
    async fn push_overlay(&self, mut update: OverlayUpdate) {
        update.seq = self.state.lock().overlay_seq.mint();
        match self.host.active_tab().await {
            Some(tab) => self.host.push_overlay(tab.id, update).await,
            None => debug!("No active tab to show overlay seq={}", update.seq),
        }
    }

    fn overlay_update(
        &self,
        mode: OverlayMode,
        index: usize,
        tab: &TabDescriptor,
        info: &MediaInfo,
    ) -> OverlayUpdate {
        let total = self.state.lock().media.len();
        OverlayUpdate::from_info(
            mode,
            index + 1,
            total,
            tab_title(tab, self.title_max_chars),
            info,
        )
    }

    /// Cached info for `tab`, if a rescan has not moved it from `index`
    fn cached_info(&self, index: usize, tab: TabId) -> Option<MediaInfo> {
        self.state
            .lock()
            .media
            .get(index)
            .filter(|e| e.tab.id == tab)
            .map(|e| e.info.clone())
    }

    /// Write fresh info back into the cache if the entry is still there
    fn record_info(&self, index: usize, tab: TabId, info: &MediaInfo, update_base: bool) {
        let mut st = self.state.lock();
        if update_base {
            st.seek.base_time = Some(info.raw_current_time);
        }
        if let Some(entry) = st.media.get_mut(index).filter(|e| e.tab.id == tab) {
            entry.info = info.clone();
        }
    }

    // --- discovery and selection ------------------------------------------

    /// Rebuild the media list unless a recent one can be reused.
    ///
    /// Returns the list length.
    pub async fn scan(&self, force: bool) -> usize {
        {
            let st = self.state.lock();
            let fresh = st
                .last_scan
                .is_some_and(|t| t.elapsed() < self.config.scan_ttl());
            if !force && fresh && !st.media.is_empty() {
                return st.media.len();
            }
        }

        let found = collect_media(&self.host).await;

        let mut st = self.state.lock();
        st.media = found;
        st.last_scan = Some(Instant::now());
        st.selected = reconcile_selection(st.selected, st.media.len());
        debug!(
            "Scanned {} tabs with media, selection {:?}",
            st.media.len(),
            st.selected
        );
        st.media.len()
    }

    /// In auto-focus mode, point the selection at the active tab's media
    pub fn ensure_active_selection(&self, active: TabId) {
        let mut st = self.state.lock();
        if st.force_global || st.media.is_empty() {
            return;
        }
        let current = st.selected.and_then(|i| st.media.get(i)).map(|e| e.tab.id);
        if current == Some(active) {
            return;
        }
        if let Some(index) = st.media.iter().position(|e| e.tab.id == active) {
            st.selected = Some(index);
            st.seek.base_time = None;
            debug!("Auto-focused tab {}", active);
        }
    }

    /// Explicit cycle to the next tab's media; enters global mode
    pub async fn cycle_global_selection(&self) -> Option<usize> {
        self.scan(true).await;
        let picked = {
            let mut st = self.state.lock();
            if st.media.is_empty() {
                st.selected = None;
                None
            } else {
                let next = st.selected.map_or(0, |i| (i + 1) % st.media.len());
                st.selected = Some(next);
                st.seek.clear();
                Some((next, st.media[next].clone()))
            }
        };

        let Some((index, entry)) = picked else {
            self.push_overlay(OverlayUpdate::notice("No controllable media found"))
                .await;
            return None;
        };

        let update = match self.fetch_info(entry.tab.id).await {
            Some(fresh) => {
                self.record_info(index, entry.tab.id, &fresh, true);
                self.overlay_update(OverlayMode::Select, index, &entry.tab, &fresh)
            }
            None => {
                let mut placeholder =
                    self.overlay_update(OverlayMode::Select, index, &entry.tab, &entry.info);
                placeholder.current_time = UNKNOWN_TIME.to_string();
                placeholder.percent = 0.0;
                placeholder.preview = true;
                placeholder
            }
        };
        self.push_overlay(update).await;

        self.state.lock().force_global = true;
        info!("Global selection on tab {} ({})", entry.tab.id, index + 1);
        Some(index)
    }

    /// The overlay went away: back to auto-focus
    pub fn overlay_hidden(&self) {
        {
            let mut st = self.state.lock();
            st.force_global = false;
            st.seek.base_time = None;
        }
        self.stop_overlay_watch();
        debug!("Overlay hidden, auto-focus restored");
    }

    // --- mutations -------------------------------------------------------

    /// Run `command` on the selected tab, re-fetch and report with `mode`
    async fn command_and_report(&self, mode: OverlayMode, command: MediaCommand) -> bool {
        let Some((index, entry)) = self.selected_entry() else {
            return false;
        };
        if !self.send_command(entry.tab.id, command).await {
            return false;
        }
        let Some(after) = self.fetch_info(entry.tab.id).await else {
            return false;
        };
        self.record_info(index, entry.tab.id, &after, mode == OverlayMode::Final);
        let update = self.overlay_update(mode, index, &entry.tab, &after);
        self.push_overlay(update).await;
        true
    }

    /// Fetch current state, derive a command from it, then report
    async fn mutate_selected<F>(&self, mode: OverlayMode, decide: F) -> bool
    where
        F: FnOnce(&MediaInfo) -> MediaCommand,
    {
        let Some((_, entry)) = self.selected_entry() else {
            return false;
        };
        let Some(before) = self.fetch_info(entry.tab.id).await else {
            return false;
        };
        self.command_and_report(mode, decide(&before)).await
    }

    pub async fn toggle_play(&self) -> bool {
        self.mutate_selected(OverlayMode::PlayToggle, |info| {
            if info.paused {
                MediaCommand::Play
            } else {
                MediaCommand::Pause
            }
        })
        .await
    }

    /// Returns which selection mode the toggle applied in
    pub async fn toggle_mute(&self) -> Option<MuteScope> {
        let scope = if self.force_global() {
            MuteScope::Global
        } else {
            MuteScope::ActiveAuto
        };
        let done = self
            .mutate_selected(OverlayMode::MuteToggle, |info| {
                if info.muted {
                    MediaCommand::Unmute
                } else {
                    MediaCommand::Mute
                }
            })
            .await;
        done.then_some(scope)
    }

    pub async fn apply_volume(&self, volume: f64) -> bool {
        let volume = clamp_volume(volume);
        self.mutate_selected(OverlayMode::VolumeSet, move |_| MediaCommand::SetVolume(volume))
            .await
    }

    pub async fn adjust_volume(&self, delta: f64) -> bool {
        self.mutate_selected(OverlayMode::VolumeSet, move |info| {
            MediaCommand::SetVolume(clamp_volume(info.volume + delta))
        })
        .await
    }

    pub async fn apply_playback_rate(&self, rate: f64) -> bool {
        let rate = clamp_rate(rate);
        self.mutate_selected(OverlayMode::SpeedSet, move |_| MediaCommand::SetPlaybackRate(rate))
            .await
    }

    pub async fn adjust_playback_rate(&self, delta: f64) -> bool {
        self.mutate_selected(OverlayMode::SpeedSet, move |info| {
            MediaCommand::SetPlaybackRate(clamp_rate(info.playback_rate + delta))
        })
        .await
    }

    /// Advance through the configured speed presets
    pub async fn cycle_playback_preset(&self) -> bool {
        let presets = &self.config.speed_presets;
        if presets.is_empty() {
            return false;
        }
        let rate = {
            let mut st = self.state.lock();
            st.speed_preset = (st.speed_preset + 1) % presets.len();
            presets[st.speed_preset]
        };
        self.apply_playback_rate(rate).await
    }

    pub async fn speed(&self, action: SpeedAction) -> bool {
        let step = self.steps().speed_step;
        match action {
            SpeedAction::Up => self.adjust_playback_rate(step).await,
            SpeedAction::Down => self.adjust_playback_rate(-step).await,
            SpeedAction::Reset => self.apply_playback_rate(1.0).await,
            SpeedAction::Cycle => self.cycle_playback_preset().await,
        }
    }

    /// Tab-addressed control from the popup list
    pub async fn control(&self, tab: TabId, action: ControlAction) -> ControlOutcome {
        self.scan(false).await;
        {
            let mut st = self.state.lock();
            let Some(index) = st.media.iter().position(|e| e.tab.id == tab) else {
                return ControlOutcome::TabNotFound;
            };
            if st.selected != Some(index) {
                st.selected = Some(index);
                st.seek.base_time = None;
            }
        }

        let done = match action {
            ControlAction::PlayToggle => self.toggle_play().await,
            ControlAction::SeekDelta(delta) => {
                self.command_and_report(OverlayMode::Final, MediaCommand::Seek(delta))
                    .await
            }
            ControlAction::SetCurrentTime(seconds) => {
                self.command_and_report(OverlayMode::Final, MediaCommand::SetCurrentTime(seconds))
                    .await
            }
            ControlAction::SetSpeed(rate) => self.apply_playback_rate(rate).await,
            ControlAction::SetVolume(volume) => self.apply_volume(volume).await,
            ControlAction::ToggleMute => self.toggle_mute().await.is_some(),
            ControlAction::TogglePip => self.send_command(tab, MediaCommand::TogglePip).await,
        };
        if done {
            ControlOutcome::Done
        } else {
            ControlOutcome::Failed
        }
    }
}
