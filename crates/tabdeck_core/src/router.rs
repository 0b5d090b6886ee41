//! Command Router
//!
//! Entry point for everything that asks the background to act: browser
//! shortcuts, popup buttons and in-page fallbacks. Commands are resolved
//! against the coordinator's selection; screenshots go straight to the
//! active tab's page agent.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::coordinator::{ControlOutcome, Coordinator};
use crate::host::TabId;
use crate::message::{
    Command, CommandOrigin, LocalAction, PageReply, PageRequest, RouterMessage, RouterReply,
    SpeedAction, VolumeAction,
};
use crate::storage::{page_eq_modified, KeyValueStore};

fn reply(done: bool) -> RouterReply {
    if done {
        RouterReply::Ok
    } else {
        RouterReply::NotOk
    }
}

pub struct CommandRouter {
    coordinator: Arc<Coordinator>,
    store: Arc<dyn KeyValueStore>,
    suppress: Duration,
    last_shortcut: Mutex<Option<Instant>>,
}

impl CommandRouter {
    pub fn new(coordinator: Arc<Coordinator>, store: Arc<dyn KeyValueStore>) -> Self {
        let suppress = coordinator.config().command_suppress();
        Self {
            coordinator,
            store,
            suppress,
            last_shortcut: Mutex::new(None),
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub async fn handle(&self, message: RouterMessage) -> RouterReply {
        match message {
            RouterMessage::Command { command, origin } => self.command(command, origin).await,
            RouterMessage::Control { tab, action } => {
                match self.coordinator.control(tab, action).await {
                    ControlOutcome::Done => RouterReply::Ok,
                    ControlOutcome::TabNotFound => RouterReply::TabNotFound,
                    ControlOutcome::Failed => RouterReply::NotOk,
                }
            }
            RouterMessage::GlobalSpeed(action) => {
                self.coordinator.scan(false).await;
                if self.coordinator.selected_index().is_none() {
                    return RouterReply::NotOk;
                }
                reply(self.coordinator.speed(action).await)
            }
            RouterMessage::GlobalVolume(action) => {
                self.focus_active().await;
                if self.coordinator.selected_index().is_none() {
                    return RouterReply::NotOk;
                }
                reply(self.adjust_volume(action).await)
            }
            RouterMessage::ToggleMute => {
                if self.focus_active().await.is_none()
                    || self.coordinator.selected_index().is_none()
                {
                    return RouterReply::NotOk;
                }
                match self.coordinator.toggle_mute().await {
                    Some(scope) => RouterReply::Muted { scope },
                    None => RouterReply::NotOk,
                }
            }
            RouterMessage::OverlayHidden => {
                self.coordinator.overlay_hidden();
                RouterReply::Ok
            }
            RouterMessage::EqModifiedState { url } => RouterReply::EqModified {
                modified: page_eq_modified(self.store.as_ref(), &url),
            },
        }
    }

    /// Refresh the list and auto-focus the active tab; returns the active tab
    async fn focus_active(&self) -> Option<TabId> {
        let active = self.coordinator.host().active_tab().await.map(|t| t.id);
        self.coordinator.scan(false).await;
        if let Some(tab) = active {
            self.coordinator.ensure_active_selection(tab);
        }
        active
    }

    /// Page fallbacks right after a shortcut are the same keypress seen twice
    fn suppressed(&self, origin: CommandOrigin) -> bool {
        let mut last = self.last_shortcut.lock();
        match origin {
            CommandOrigin::Shortcut => {
                *last = Some(Instant::now());
                false
            }
            CommandOrigin::PageFallback => last.is_some_and(|t| t.elapsed() < self.suppress),
            CommandOrigin::Popup => false,
        }
    }

    async fn command(&self, command: Command, origin: CommandOrigin) -> RouterReply {
        if self.suppressed(origin) {
            debug!("Suppressed {} fallback after shortcut", command);
            return RouterReply::Suppressed;
        }

        if command == Command::CycleVideo {
            return reply(self.coordinator.cycle_global_selection().await.is_some());
        }

        let Some(active) = self.focus_active().await else {
            return RouterReply::NotOk;
        };
        if command == Command::Screenshot {
            return self.screenshot(active).await;
        }
        if self.coordinator.selected_index().is_none() {
            return RouterReply::NotOk;
        }

        let coordinator = &self.coordinator;
        let done = match command {
            Command::TogglePlayPause => coordinator.toggle_play().await,
            Command::SeekForward => coordinator.seek_by_step(true).await,
            Command::SeekBack => coordinator.seek_by_step(false).await,
            Command::VolumeUp => self.adjust_volume(VolumeAction::Up).await,
            Command::VolumeDown => self.adjust_volume(VolumeAction::Down).await,
            Command::ToggleMute => {
                return match coordinator.toggle_mute().await {
                    Some(scope) => RouterReply::Muted { scope },
                    None => RouterReply::NotOk,
                };
            }
            Command::SpeedUp => coordinator.speed(SpeedAction::Up).await,
            Command::SpeedDown => coordinator.speed(SpeedAction::Down).await,
            Command::SpeedReset => coordinator.speed(SpeedAction::Reset).await,
            Command::SpeedCycle => coordinator.speed(SpeedAction::Cycle).await,
            Command::CycleVideo | Command::Screenshot => false,
        };
        reply(done)
    }

    async fn adjust_volume(&self, action: VolumeAction) -> bool {
        let step = self.coordinator.steps().volume_step;
        let delta = match action {
            VolumeAction::Up => step,
            VolumeAction::Down => -step,
        };
        self.coordinator.adjust_volume(delta).await
    }

    async fn screenshot(&self, tab: TabId) -> RouterReply {
        let request = PageRequest::Local(LocalAction::Screenshot);
        match self.coordinator.host().send(tab, request).await {
            Ok(PageReply::Ok) => RouterReply::Ok,
            Ok(_) => RouterReply::NotOk,
            Err(e) => {
                debug!("Screenshot on tab {} failed: {}", tab, e);
                RouterReply::NotOk
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StepSettings, TabdeckConfig};
    use crate::message::{ControlAction, MuteScope};
    use crate::sim::{SimBrowser, SimMedia};
    use crate::storage::{save_page_memory, MemoryStore};

    fn router(browser: &Arc<SimBrowser>, store: Arc<MemoryStore>) -> CommandRouter {
        let coordinator = Arc::new(Coordinator::new(
            browser.clone(),
            &TabdeckConfig::default(),
            StepSettings::default(),
        ));
        CommandRouter::new(coordinator, store)
    }

    fn command(command: Command, origin: CommandOrigin) -> RouterMessage {
        RouterMessage::Command { command, origin }
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_fallback_suppressed_after_shortcut() {
        let browser = Arc::new(SimBrowser::new());
        let media = SimMedia::video(1, 1280.0, 720.0).shared();
        browser.open_page(1, "Film", "https://a.example/", &[media.clone()]);
        browser.activate(TabId(1));
        let router = router(&browser, Arc::new(MemoryStore::new()));

        let first = router
            .handle(command(Command::TogglePlayPause, CommandOrigin::Shortcut))
            .await;
        assert_eq!(first, RouterReply::Ok);
        assert!(!media.snapshot().paused);

        let echo = router
            .handle(command(Command::TogglePlayPause, CommandOrigin::PageFallback))
            .await;
        assert_eq!(echo, RouterReply::Suppressed);
        assert!(!media.snapshot().paused);

        tokio::time::advance(Duration::from_millis(301)).await;
        let later = router
            .handle(command(Command::TogglePlayPause, CommandOrigin::PageFallback))
            .await;
        assert_eq!(later, RouterReply::Ok);
        assert!(media.snapshot().paused);
    }

    #[tokio::test]
    async fn test_commands_follow_active_tab() {
        let browser = Arc::new(SimBrowser::new());
        let first = SimMedia::video(1, 1280.0, 720.0).shared();
        let second = SimMedia::video(2, 1280.0, 720.0).shared();
        browser.open_page(1, "One", "https://a.example/", &[first.clone()]);
        browser.open_page(2, "Two", "https://b.example/", &[second.clone()]);
        browser.activate(TabId(2));
        let router = router(&browser, Arc::new(MemoryStore::new()));

        let reply = router
            .handle(command(Command::VolumeDown, CommandOrigin::Popup))
            .await;
        assert_eq!(reply, RouterReply::Ok);
        assert_eq!(second.snapshot().volume, 0.95);
        assert_eq!(first.snapshot().volume, 1.0);

        let reply = router.handle(RouterMessage::GlobalVolume(VolumeAction::Up)).await;
        assert_eq!(reply, RouterReply::Ok);
        assert_eq!(second.snapshot().volume, 1.0);
    }

    #[tokio::test]
    async fn test_toggle_mute_reports_scope() {
        let browser = Arc::new(SimBrowser::new());
        let media = SimMedia::video(1, 1280.0, 720.0).shared();
        browser.open_page(1, "One", "https://a.example/", &[media.clone()]);
        browser.activate(TabId(1));
        let router = router(&browser, Arc::new(MemoryStore::new()));

        assert_eq!(
            router.handle(RouterMessage::ToggleMute).await,
            RouterReply::Muted {
                scope: MuteScope::ActiveAuto
            }
        );
        router
            .handle(command(Command::CycleVideo, CommandOrigin::Shortcut))
            .await;
        assert_eq!(
            router.handle(RouterMessage::ToggleMute).await,
            RouterReply::Muted {
                scope: MuteScope::Global
            }
        );
        assert!(!media.snapshot().muted);

        assert_eq!(router.handle(RouterMessage::OverlayHidden).await, RouterReply::Ok);
        assert!(!router.coordinator().force_global());
    }

    #[tokio::test]
    async fn test_no_media_and_no_active_tab() {
        let browser = Arc::new(SimBrowser::new());
        browser.open_page(1, "Blank", "https://a.example/", &[]);
        let router = router(&browser, Arc::new(MemoryStore::new()));

        assert_eq!(
            router.handle(command(Command::SeekForward, CommandOrigin::Shortcut)).await,
            RouterReply::NotOk
        );
        browser.activate(TabId(1));
        assert_eq!(
            router.handle(command(Command::SeekForward, CommandOrigin::Popup)).await,
            RouterReply::NotOk
        );
        assert_eq!(
            router.handle(RouterMessage::GlobalSpeed(SpeedAction::Up)).await,
            RouterReply::NotOk
        );
        assert_eq!(
            router
                .handle(RouterMessage::Control {
                    tab: TabId(1),
                    action: ControlAction::PlayToggle,
                })
                .await,
            RouterReply::TabNotFound
        );
    }

    #[tokio::test]
    async fn test_screenshot_goes_to_active_tab() {
        let browser = Arc::new(SimBrowser::new());
        let page = browser.open_page(
            1,
            "Film",
            "https://a.example/",
            &[SimMedia::video(1, 1280.0, 720.0).shared()],
        );
        browser.activate(TabId(1));
        let router = router(&browser, Arc::new(MemoryStore::new()));

        assert_eq!(
            router.handle(command(Command::Screenshot, CommandOrigin::Shortcut)).await,
            RouterReply::Ok
        );
        assert_eq!(page.document.screenshots().len(), 1);
    }

    #[tokio::test]
    async fn test_eq_modified_state() {
        let browser = Arc::new(SimBrowser::new());
        let store = Arc::new(MemoryStore::new());
        let url = "https://a.example/watch?v=1";
        let mut gains = vec![0.0; 10];
        gains[3] = 2.5;
        save_page_memory(store.as_ref(), url, &gains).unwrap();
        let router = router(&browser, store);

        assert_eq!(
            router
                .handle(RouterMessage::EqModifiedState { url: url.to_string() })
                .await,
            RouterReply::EqModified { modified: true }
        );
        assert_eq!(
            router
                .handle(RouterMessage::EqModifiedState {
                    url: "https://other.example/".to_string()
                })
                .await,
            RouterReply::EqModified { modified: false }
        );
    }
}
