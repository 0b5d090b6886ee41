//! Popup media list model
//!
//! The list re-queries every tab once a second. When the set of tabs is
//! unchanged it emits per-card patches instead of a rebuild, and leaves the
//! time fields of cards whose seek bar is being dragged alone.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::coordinator::{collect_media, TabMediaEntry};
use crate::host::{TabHost, TabId};

/// Default refresh period of an open list
pub const LIST_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Advisory per-tab locks held while the user drags a seek bar
#[derive(Debug, Clone, Default)]
pub struct TabLocks {
    locked: Arc<Mutex<HashSet<TabId>>>,
}

impl TabLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self, tab: TabId) {
        self.locked.lock().insert(tab);
    }

    pub fn unlock(&self, tab: TabId) {
        self.locked.lock().remove(&tab);
    }

    pub fn is_locked(&self, tab: TabId) -> bool {
        self.locked.lock().contains(&tab)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimePatch {
    pub current_time: String,
    pub duration: String,
    pub raw_current_time: f64,
}

/// In-place update for one existing card
#[derive(Debug, Clone, PartialEq)]
pub struct CardPatch {
    pub tab: TabId,
    pub paused: bool,
    pub playback_rate: f64,
    /// `None` while the card is locked
    pub time: Option<TimePatch>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ListUpdate {
    Rebuild(Vec<TabMediaEntry>),
    Patch(Vec<CardPatch>),
}

/// Decides between rebuilding and patching the rendered list
#[derive(Debug, Default)]
pub struct ListRefresh {
    locks: TabLocks,
    shown: Vec<TabId>,
}

impl ListRefresh {
    pub fn new(locks: TabLocks) -> Self {
        Self {
            locks,
            shown: Vec::new(),
        }
    }

    pub fn locks(&self) -> &TabLocks {
        &self.locks
    }

    pub fn plan(&mut self, entries: Vec<TabMediaEntry>, full: bool) -> ListUpdate {
        let same_tabs = entries.iter().map(|e| e.tab.id).eq(self.shown.iter().copied());
        if full || !same_tabs {
            self.shown = entries.iter().map(|e| e.tab.id).collect();
            return ListUpdate::Rebuild(entries);
        }

        let patches = entries
            .into_iter()
            .map(|entry| {
                let time = (!self.locks.is_locked(entry.tab.id)).then(|| TimePatch {
                    current_time: entry.info.current_time.clone(),
                    duration: entry.info.duration.clone(),
                    raw_current_time: entry.info.raw_current_time,
                });
                CardPatch {
                    tab: entry.tab.id,
                    paused: entry.info.paused,
                    playback_rate: entry.info.playback_rate,
                    time,
                }
            })
            .collect();
        ListUpdate::Patch(patches)
    }

    /// Query all tabs and plan the next update
    pub async fn refresh(&mut self, host: &Arc<dyn TabHost>, full: bool) -> ListUpdate {
        let entries = collect_media(host).await;
        self.plan(entries, full)
    }

    /// Emit a full list now and patches every `period` until dropped
    pub fn spawn(mut self, host: Arc<dyn TabHost>, period: Duration) -> ListFeed {
        let (tx, updates) = mpsc::channel(4);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut full = true;
            loop {
                let update = self.refresh(&host, full).await;
                full = false;
                if tx.send(update).await.is_err() {
                    debug!("Media list closed");
                    break;
                }
                ticker.tick().await;
            }
        });
        ListFeed {
            updates,
            task: task.abort_handle(),
        }
    }
}

/// Running list refresh
pub struct ListFeed {
    pub updates: mpsc::Receiver<ListUpdate>,
    task: AbortHandle,
}

impl ListFeed {
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for ListFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimBrowser, SimMedia};

    fn host_with_two() -> (Arc<SimBrowser>, Arc<SimMedia>) {
        let browser = Arc::new(SimBrowser::new());
        let media = SimMedia::video(1, 1280.0, 720.0).with_time(5.0).shared();
        browser.open_page(1, "One", "https://a.example/", &[media.clone()]);
        browser.open_page(2, "Two", "https://b.example/", &[SimMedia::audio(2).shared()]);
        (browser, media)
    }

    #[tokio::test]
    async fn test_rebuild_then_patch() {
        let (browser, media) = host_with_two();
        let host: Arc<dyn TabHost> = browser.clone();
        let mut list = ListRefresh::default();

        let ListUpdate::Rebuild(entries) = list.refresh(&host, false).await else {
            panic!("first refresh should rebuild");
        };
        assert_eq!(entries.len(), 2);

        media.update(|s| s.current_time = 65.0);
        let ListUpdate::Patch(patches) = list.refresh(&host, false).await else {
            panic!("unchanged tabs should patch");
        };
        assert_eq!(patches.len(), 2);
        let time = patches[0].time.as_ref().unwrap();
        assert_eq!(time.current_time, "1:05");

        browser.close_tab(TabId(2));
        assert!(matches!(list.refresh(&host, false).await, ListUpdate::Rebuild(_)));
        assert!(matches!(list.refresh(&host, true).await, ListUpdate::Rebuild(_)));
    }

    #[tokio::test]
    async fn test_locked_card_keeps_time() {
        let (browser, media) = host_with_two();
        let host: Arc<dyn TabHost> = browser.clone();
        let locks = TabLocks::new();
        let mut list = ListRefresh::new(locks.clone());
        list.refresh(&host, true).await;

        locks.lock(TabId(1));
        media.update(|s| {
            s.current_time = 50.0;
            s.paused = false;
            s.playback_rate = 1.5;
        });
        let ListUpdate::Patch(patches) = list.refresh(&host, false).await else {
            panic!("expected patch");
        };
        assert_eq!(patches[0].time, None);
        assert!(!patches[0].paused);
        assert_eq!(patches[0].playback_rate, 1.5);
        assert!(patches[1].time.is_some());

        locks.unlock(TabId(1));
        assert!(!list.locks().is_locked(TabId(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_emits_periodically() {
        let (browser, _media) = host_with_two();
        let mut feed = ListRefresh::default().spawn(browser, LIST_REFRESH_INTERVAL);

        assert!(matches!(feed.updates.recv().await, Some(ListUpdate::Rebuild(_))));
        let started = Instant::now();
        assert!(matches!(feed.updates.recv().await, Some(ListUpdate::Patch(_))));
        assert!(started.elapsed() >= LIST_REFRESH_INTERVAL);
        feed.stop();
    }
}
