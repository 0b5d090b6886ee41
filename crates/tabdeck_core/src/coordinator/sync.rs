//! Background overlay sync
//!
//! While the selection lives on a tab other than the one being viewed, its
//! playback position is polled and mirrored into the visible overlay.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::debug;

use super::Coordinator;
use crate::host::TabId;
use crate::message::OverlayMode;

impl Coordinator {
    /// Poll the selected tab into the overlay unless it is the active tab
    pub async fn start_overlay_watch(self: &Arc<Self>) {
        self.stop_overlay_watch();
        let Some((_, entry)) = self.selected_entry() else {
            return;
        };
        let active = self.host.active_tab().await;
        if active.is_some_and(|t| t.id == entry.tab.id) {
            return;
        }

        let period = self.config.sync_interval();
        let coordinator = Arc::downgrade(self);
        let tab = entry.tab.id;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(coordinator) = coordinator.upgrade() else {
                    break;
                };
                if !coordinator.sync_tick(tab).await {
                    debug!("Overlay sync for tab {} ended", tab);
                    break;
                }
            }
        });

        if let Some(previous) = self.state.lock().watch.replace(task.abort_handle()) {
            previous.abort();
        }
    }

    pub fn stop_overlay_watch(&self) {
        if let Some(watch) = self.state.lock().watch.take() {
            watch.abort();
        }
    }

    pub fn is_watching(&self) -> bool {
        self.state
            .lock()
            .watch
            .as_ref()
            .is_some_and(|w| !w.is_finished())
    }

    /// One sync round; false once `tab` is no longer selected
    async fn sync_tick(&self, tab: TabId) -> bool {
        let (index, descriptor, seeking) = {
            let st = self.state.lock();
            let selected = st
                .selected
                .and_then(|i| st.media.get(i).map(|e| (i, e)))
                .filter(|(_, e)| e.tab.id == tab);
            let Some((index, entry)) = selected else {
                return false;
            };
            (index, entry.tab.clone(), st.seek.open)
        };
        // An open seek session owns the overlay until its commit lands
        if seeking {
            return true;
        }

        let Some(info) = self.fetch_info(tab).await else {
            return true;
        };
        self.record_info(index, tab, &info, false);
        let update = self.overlay_update(OverlayMode::Sync, index, &descriptor, &info);
        self.push_overlay(update).await;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StepSettings, TabdeckConfig};
    use crate::message::OverlayUpdate;
    use crate::sim::{SimBrowser, SimMedia};
    use std::time::Duration;

    fn syncs(browser: &SimBrowser) -> Vec<(TabId, OverlayUpdate)> {
        browser
            .overlays()
            .into_iter()
            .filter(|(_, u)| u.mode == OverlayMode::Sync && u.op_id.is_none())
            .collect()
    }

    /// Media on tab 1, user looking at tab 2
    async fn setup() -> (Arc<SimBrowser>, Arc<SimMedia>, Arc<Coordinator>) {
        let browser = Arc::new(SimBrowser::new());
        let media = SimMedia::video(1, 1280.0, 720.0).with_time(30.0).shared();
        browser.open_page(1, "Film", "https://a.example/", &[media.clone()]);
        browser.open_page(2, "Docs", "https://b.example/", &[]);
        browser.activate(TabId(2));
        let coord = Arc::new(Coordinator::new(
            browser.clone(),
            &TabdeckConfig::default(),
            StepSettings::default(),
        ));
        coord.scan(false).await;
        (browser, media, coord)
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_mirrors_remote_position() {
        let (browser, media, coord) = setup().await;

        coord.start_overlay_watch().await;
        assert!(coord.is_watching());
        assert!(syncs(&browser).is_empty());

        media.update(|s| s.current_time = 31.0);
        tokio::time::sleep(Duration::from_millis(210)).await;
        let pushed = syncs(&browser);
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].0, TabId(2));
        assert_eq!(pushed[0].1.current_time, "0:31");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(syncs(&browser).len(), 2);

        coord.stop_overlay_watch();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(syncs(&browser).len(), 2);
        assert!(!coord.is_watching());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_watch_for_active_tab() {
        let (browser, _media, coord) = setup().await;
        browser.activate(TabId(1));

        coord.start_overlay_watch().await;
        assert!(!coord.is_watching());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_ends_when_selection_leaves() {
        let (browser, _media, coord) = setup().await;
        coord.start_overlay_watch().await;

        browser.close_tab(TabId(1));
        coord.scan(true).await;
        assert_eq!(coord.selected_index(), None);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!coord.is_watching());
        assert!(syncs(&browser).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlay_hidden_stops_watch() {
        let (_browser, _media, coord) = setup().await;
        coord.start_overlay_watch().await;
        coord.overlay_hidden();
        assert!(!coord.is_watching());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_holds_off_during_seek() {
        let (browser, _media, coord) = setup().await;

        coord.accumulate_seek(10.0).await;
        assert!(coord.is_watching());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(syncs(&browser).is_empty());

        // Commit at 550 ms restarts the watch; its first tick is 200 ms later
        tokio::time::sleep(Duration::from_millis(300)).await;
        let last_final = browser
            .overlays()
            .into_iter()
            .rposition(|(_, u)| u.mode == OverlayMode::Final);
        assert!(last_final.is_some());
        let pushed = syncs(&browser);
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].1.current_time, "0:40");
    }
}
