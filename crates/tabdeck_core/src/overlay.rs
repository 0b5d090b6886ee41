//! Overlay Renderer
//!
//! Page-side model of the floating status overlay. Updates arrive either
//! from the background coordinator (remote) or from the page agent itself
//! (local feedback for page-only actions).
//!
//! Remote updates are gated twice:
//! - by `seq`, so a stale push never overwrites a newer one
//! - by `op_id` per category, so a late seek preview cannot overwrite the
//!   final result of the same or a newer seek
//!
//! While a remote or preview update is shown the local progress ticker is
//! suppressed; the background owns the numbers until the overlay hides.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::OverlayConfig;
use crate::format::{format_time, percent, truncate_chars, UNKNOWN_TIME};
use crate::gate::CounterGate;
use crate::host::MediaElement;
use crate::message::{OverlayMode, OverlayUpdate};

/// Progress bar styling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarStyle {
    Normal,
    /// Provisional seek target
    Preview,
    /// Live stream: full bar, no position
    Live,
    /// Text-only notice
    Hidden,
}

/// What the overlay currently displays
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayView {
    pub mode: OverlayMode,
    /// "(i/n) title" header
    pub header: String,
    pub left_label: String,
    pub right_label: String,
    pub percent: f64,
    pub bar: BarStyle,
    pub paused: bool,
    pub playback_rate: f64,
    pub volume: f64,
    pub muted: bool,
    pub message: Option<String>,
    /// Driven by the background rather than the page
    pub remote: bool,
}

impl OverlayView {
    fn build(update: &OverlayUpdate, title_max: usize, remote: bool) -> Self {
        let title = truncate_chars(&update.title, title_max);
        let header = if update.total > 0 {
            format!("({}/{}) {}", update.index, update.total, title)
        } else {
            title
        };

        let (left_label, right_label, pct, bar) = if update.mode == OverlayMode::Notice {
            (String::new(), String::new(), 0.0, BarStyle::Hidden)
        } else if update.is_live {
            // No seek offset or percentage for live streams
            (update.current_time.clone(), "LIVE".to_string(), 100.0, BarStyle::Live)
        } else if update.preview {
            let target = update
                .preview_seconds
                .map(format_time)
                .unwrap_or_else(|| UNKNOWN_TIME.to_string());
            let left = format!("{} \u{2192} {}", update.current_time, target);
            (left, update.duration.clone(), update.percent, BarStyle::Preview)
        } else {
            (
                update.current_time.clone(),
                update.duration.clone(),
                update.percent,
                BarStyle::Normal,
            )
        };

        Self {
            mode: update.mode,
            header,
            left_label,
            right_label,
            percent: pct.clamp(0.0, 100.0),
            bar,
            paused: update.paused,
            playback_rate: update.playback_rate,
            volume: update.volume,
            muted: update.muted,
            message: update.message.clone(),
            remote,
        }
    }
}

/// Emitted when the overlay disappears
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayEvent {
    /// Auto-hidden; `remote` tells whether the background was driving it
    Hidden { remote: bool },
}

/// Why a remote update was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    StaleSeq,
    StalePreview,
    StaleFinal,
}

pub struct OverlayRenderer {
    config: OverlayConfig,
    seq_gate: CounterGate,
    preview_gate: CounterGate,
    final_gate: CounterGate,
    /// Operation id of the last rendered commit
    committed_op: Option<u64>,
    view: Option<OverlayView>,
    shown_at: Option<Instant>,
    /// Fine-seek or similar continuous interaction defers auto-hide
    interacting: bool,
}

impl OverlayRenderer {
    pub fn new(config: OverlayConfig) -> Self {
        Self {
            config,
            seq_gate: CounterGate::new(),
            preview_gate: CounterGate::new(),
            final_gate: CounterGate::new(),
            committed_op: None,
            view: None,
            shown_at: None,
            interacting: false,
        }
    }

    pub fn view(&self) -> Option<&OverlayView> {
        self.view.as_ref()
    }

    pub fn is_visible(&self) -> bool {
        self.view.is_some()
    }

    /// Apply an update pushed by the background
    pub fn apply_remote(&mut self, update: &OverlayUpdate, now: Instant) -> Result<(), Rejection> {
        if !self.seq_gate.admits(update.seq) {
            return Err(Rejection::StaleSeq);
        }

        if let Some(op) = update.op_id {
            match update.mode {
                OverlayMode::SeekPreview => {
                    // A session's previews are dead once its commit landed
                    let after_commit = self.committed_op.map_or(true, |last| op > last);
                    if !self.preview_gate.admits(op) || !after_commit {
                        return Err(Rejection::StalePreview);
                    }
                    self.preview_gate.accept(op);
                }
                OverlayMode::Final | OverlayMode::Sync => {
                    if !self.final_gate.accept(op) {
                        return Err(Rejection::StaleFinal);
                    }
                    if update.mode == OverlayMode::Final {
                        self.committed_op = Some(op);
                    }
                }
                _ => {}
            }
        }

        self.seq_gate.accept(update.seq);
        self.show(OverlayView::build(update, self.config.title_max_chars, true), now);
        Ok(())
    }

    /// Apply page-local feedback; bypasses the remote gates
    pub fn apply_local(&mut self, update: &OverlayUpdate, now: Instant) {
        self.show(OverlayView::build(update, self.config.title_max_chars, false), now);
    }

    fn show(&mut self, view: OverlayView, now: Instant) {
        self.view = Some(view);
        self.shown_at = Some(now);
    }

    /// Local progress ticker; returns whether the view changed.
    ///
    /// Only local, non-preview views follow the element.
    pub fn tick(&mut self, media: &dyn MediaElement) -> bool {
        let Some(view) = self.view.as_mut() else {
            return false;
        };
        if view.remote || view.bar != BarStyle::Normal {
            return false;
        }
        let current = media.current_time();
        let duration = media.duration();
        view.left_label = format_time(current);
        view.right_label = format_time(duration);
        view.percent = percent(current, duration).clamp(0.0, 100.0);
        view.paused = media.paused();
        view.playback_rate = media.playback_rate();
        true
    }

    /// Start or end a continuous interaction. Ending restarts the hide timer.
    pub fn set_interacting(&mut self, active: bool, now: Instant) {
        if self.interacting && !active && self.view.is_some() {
            self.shown_at = Some(now);
        }
        self.interacting = active;
    }

    pub fn is_interacting(&self) -> bool {
        self.interacting
    }

    /// Time left before auto-hide, if visible and not deferred
    pub fn hide_deadline(&self) -> Option<Instant> {
        if self.interacting {
            return None;
        }
        self.shown_at.map(|t| t + self.config.auto_hide())
    }

    /// Hide if the auto-hide delay has elapsed
    pub fn poll(&mut self, now: Instant) -> Option<OverlayEvent> {
        let deadline = self.hide_deadline()?;
        if now < deadline || self.view.is_none() {
            return None;
        }
        self.hide()
    }

    pub fn hide(&mut self) -> Option<OverlayEvent> {
        let view = self.view.take()?;
        self.shown_at = None;
        Some(OverlayEvent::Hidden {
            remote: view.remote,
        })
    }

    pub fn auto_hide(&self) -> Duration {
        self.config.auto_hide()
    }
}
