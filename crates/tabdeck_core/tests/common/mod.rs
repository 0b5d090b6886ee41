#![allow(dead_code)]

use std::sync::Arc;

use tabdeck_core::sim::{SimBrowser, SimMedia, SimPage};
use tabdeck_core::{CommandRouter, Coordinator, MemoryStore, StepSettings, TabdeckConfig};
use tracing_subscriber::EnvFilter;

/// Route `tracing` output through the test harness; safe to call repeatedly
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tabdeck_core=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub struct Harness {
    pub browser: Arc<SimBrowser>,
    pub store: Arc<MemoryStore>,
    pub router: CommandRouter,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        let browser = Arc::new(SimBrowser::new());
        let store = Arc::new(MemoryStore::new());
        let coordinator = Arc::new(Coordinator::new(
            browser.clone(),
            &TabdeckConfig::default(),
            StepSettings::default(),
        ));
        let router = CommandRouter::new(coordinator, store.clone());
        Self {
            browser,
            store,
            router,
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        self.router.coordinator()
    }

    pub fn open(&self, id: u32, title: &str, media: Arc<SimMedia>) -> SimPage {
        let url = format!("https://site{}.example/watch", id);
        self.browser.open_page(id, title, &url, &[media])
    }
}

pub fn video(id: u64) -> SimMedia {
    SimMedia::video(id, 1280.0, 720.0)
}
