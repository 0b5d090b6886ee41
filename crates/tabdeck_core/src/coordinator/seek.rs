//! Debounced cross-tab seeking
//!
//! Rapid seek presses accumulate into one session that shares an op id.
//! Each press pushes a preview of the target; the real seek is committed
//! once, after the input has been quiet for the debounce period.

use std::sync::Arc;

use tracing::debug;

use super::Coordinator;
use crate::format::percent;
use crate::message::{MediaCommand, OverlayMode};

/// Seek destination, clamped to `[0, duration]` when the duration is known
pub fn seek_target(base: f64, delta: f64, duration: f64) -> f64 {
    let target = (base + delta).max(0.0);
    if duration.is_finite() && duration > 0.0 {
        target.min(duration)
    } else {
        target
    }
}

impl Coordinator {
    /// Move the selected media by one seek step
    pub async fn seek_by_step(self: &Arc<Self>, forward: bool) -> bool {
        let step = self.steps().seek_step;
        self.accumulate_seek(if forward { step } else { -step }).await
    }

    /// Add `delta` seconds to the open seek session, opening one if needed
    pub async fn accumulate_seek(self: &Arc<Self>, delta: f64) -> bool {
        let Some((index, entry)) = self.selected_entry() else {
            return false;
        };
        if entry.info.is_live {
            return false;
        }

        let (op, opening) = {
            let mut st = self.state.lock();
            let seek = &mut st.seek;
            // Presses that cancelled out leave nothing to build on
            if seek.open && seek.accumulated != 0.0 {
                (seek.op_id, false)
            } else {
                seek.open = true;
                seek.op_id = seek.ops.mint();
                seek.base_time = None;
                (seek.op_id, true)
            }
        };

        if opening {
            if let Some(info) = self.fetch_info(entry.tab.id).await {
                self.record_info(index, entry.tab.id, &info, true);
            }
        }
        self.ensure_base_time(op).await;

        let (base, accumulated) = {
            let mut st = self.state.lock();
            st.seek.accumulated += delta;
            (st.seek.base_time, st.seek.accumulated)
        };
        let info = self
            .cached_info(index, entry.tab.id)
            .unwrap_or_else(|| entry.info.clone());

        let target = seek_target(
            base.unwrap_or(info.raw_current_time),
            accumulated,
            info.raw_duration,
        );
        let update = self
            .overlay_update(OverlayMode::SeekPreview, index, &entry.tab, &info)
            .with_op(op)
            .with_preview(target, percent(target, info.raw_duration));
        self.push_overlay(update).await;
        debug!("Seek op {} accumulated {:+}s -> {:.1}", op, accumulated, target);

        self.start_overlay_watch().await;
        self.schedule_commit();
        true
    }

    /// Fetch a base time for `op` if the session has none yet
    pub(super) async fn ensure_base_time(&self, op: u64) {
        if self.state.lock().seek.base_time.is_some() {
            return;
        }
        let Some((index, entry)) = self.selected_entry() else {
            return;
        };
        let Some(info) = self.fetch_info(entry.tab.id).await else {
            return;
        };
        self.record_info(index, entry.tab.id, &info, true);
        let update = self
            .overlay_update(OverlayMode::Sync, index, &entry.tab, &info)
            .with_op(op);
        self.push_overlay(update).await;
    }

    /// Restart the debounce timer
    fn schedule_commit(self: &Arc<Self>) {
        let mut st = self.state.lock();
        st.seek.cancel_timer();
        let timer_id = st.seek.timers.mint();
        let coordinator = Arc::clone(self);
        let debounce = self.config.seek_debounce();
        let task = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            coordinator.commit_seek(timer_id).await;
        });
        st.seek.timer = Some((timer_id, task.abort_handle()));
    }

    /// Apply the accumulated offset once and report the result
    async fn commit_seek(self: &Arc<Self>, timer_id: u64) {
        // Drain the session up front; presses arriving mid-commit open a new one
        let (accumulated, op, base) = {
            let mut st = self.state.lock();
            let current = st.seek.timer.as_ref().map(|(id, _)| *id);
            if current != Some(timer_id) {
                return;
            }
            st.seek.timer = None;
            st.seek.open = false;
            let accumulated = std::mem::take(&mut st.seek.accumulated);
            (accumulated, st.seek.op_id, st.seek.base_time)
        };
        if accumulated == 0.0 {
            return;
        }
        let Some((index, entry)) = self.selected_entry() else {
            return;
        };

        let target = seek_target(
            base.unwrap_or(entry.info.raw_current_time),
            accumulated,
            entry.info.raw_duration,
        );
        if !self
            .send_command(entry.tab.id, MediaCommand::SetCurrentTime(target))
            .await
        {
            return;
        }
        debug!("Seek op {} committed at {:.1}s on tab {}", op, target, entry.tab.id);

        if let Some(after) = self.fetch_info(entry.tab.id).await {
            self.record_info(index, entry.tab.id, &after, true);
            let update = self
                .overlay_update(OverlayMode::Final, index, &entry.tab, &after)
                .with_op(op);
            self.push_overlay(update).await;
        }
        self.start_overlay_watch().await;
    }
}
