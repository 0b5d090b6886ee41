mod common;

use std::time::Duration;

use common::{video, Harness};
use tabdeck_core::{
    BarStyle, Command, CommandOrigin, MediaCommand, OverlayEvent, OverlayMode, PageRequest,
    RouterMessage, RouterReply, TabId,
};
use tokio::time::Instant;

fn shortcut(command: Command) -> RouterMessage {
    RouterMessage::Command {
        command,
        origin: CommandOrigin::Shortcut,
    }
}

fn absolute_seeks(h: &Harness) -> Vec<f64> {
    h.browser
        .requests()
        .into_iter()
        .filter_map(|(_, request)| match request {
            PageRequest::Control {
                command: MediaCommand::SetCurrentTime(t),
                ..
            } => Some(t),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn cycle_video_walks_all_tabs_in_global_mode() {
    let h = Harness::new();
    h.open(1, "Paused", video(1).shared());
    h.open(2, "Playing A", video(2).with_playing(true).shared());
    h.open(3, "Playing B", video(3).with_playing(true).shared());
    h.browser.activate(TabId(1));

    // The first scan selects index 0; each cycle then moves one step
    let mut visited = Vec::new();
    for _ in 0..3 {
        assert_eq!(h.router.handle(shortcut(Command::CycleVideo)).await, RouterReply::Ok);
        assert!(h.coordinator().force_global());
        visited.push(h.coordinator().selected_index());
    }
    assert_eq!(visited, vec![Some(1), Some(2), Some(0)]);

    let last = h.browser.last_overlay().unwrap();
    assert_eq!(last.mode, OverlayMode::Select);
    assert_eq!((last.index, last.total), (1, 3));
    assert_eq!(last.title, "Paused");
}

#[tokio::test(start_paused = true)]
async fn seek_forward_previews_then_commits() {
    let h = Harness::new();
    let media = video(1).with_time(10.0).with_duration(100.0).shared();
    let page = h.open(1, "Film", media.clone());
    h.browser.activate(TabId(1));

    assert_eq!(h.router.handle(shortcut(Command::SeekForward)).await, RouterReply::Ok);
    let preview = h.browser.last_overlay().unwrap();
    assert_eq!(preview.mode, OverlayMode::SeekPreview);
    assert!(preview.preview);
    assert_eq!(preview.preview_seconds, Some(15.0));
    assert!((preview.percent - 15.0).abs() < 1e-9);

    let view = page.agent.overlay_view().unwrap();
    assert_eq!(view.bar, BarStyle::Preview);
    assert_eq!(view.left_label, "0:10 \u{2192} 0:15");
    assert_eq!(media.snapshot().current_time, 10.0);

    tokio::time::sleep(Duration::from_millis(600)).await;
    let committed = h.browser.last_overlay().unwrap();
    assert_eq!(committed.mode, OverlayMode::Final);
    assert!(!committed.preview);
    assert_eq!(committed.current_time, "0:15");
    assert_eq!(committed.op_id, preview.op_id);
    assert_eq!(media.snapshot().current_time, 15.0);

    let view = page.agent.overlay_view().unwrap();
    assert_eq!(view.bar, BarStyle::Normal);
    assert_eq!(view.left_label, "0:15");
}

#[tokio::test(start_paused = true)]
async fn burst_of_seeks_sends_one_absolute_target() {
    let h = Harness::new();
    h.open(1, "Film", video(1).with_time(40.0).shared());
    h.browser.activate(TabId(1));

    h.router.handle(shortcut(Command::SeekForward)).await;
    h.router.handle(shortcut(Command::SeekForward)).await;
    h.router.handle(shortcut(Command::SeekBack)).await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(absolute_seeks(&h), vec![45.0]);
    let relative = h.browser.requests().into_iter().any(|(_, r)| {
        matches!(
            r,
            PageRequest::Control {
                command: MediaCommand::Seek(_),
                ..
            }
        )
    });
    assert!(!relative);
}

#[tokio::test(start_paused = true)]
async fn live_stream_ignores_seek_and_shows_live() {
    let h = Harness::new();
    let page = h.open(1, "Live", video(1).with_duration(f64::INFINITY).shared());
    h.browser.activate(TabId(1));

    assert_eq!(h.router.handle(shortcut(Command::SeekForward)).await, RouterReply::NotOk);
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(absolute_seeks(&h).is_empty());

    assert_eq!(
        h.router.handle(shortcut(Command::TogglePlayPause)).await,
        RouterReply::Ok
    );
    let view = page.agent.overlay_view().unwrap();
    assert_eq!(view.right_label, "LIVE");
    assert_eq!(view.bar, BarStyle::Live);
    assert_eq!(view.percent, 100.0);
}

#[tokio::test(start_paused = true)]
async fn global_selection_holds_until_overlay_hides() {
    let h = Harness::new();
    let first = video(1).shared();
    let second = video(2).shared();
    let first_page = h.open(1, "One", first.clone());
    h.open(2, "Two", second.clone());
    h.browser.activate(TabId(1));

    // Cycle to tab 2 while looking at tab 1
    h.router.handle(shortcut(Command::CycleVideo)).await;
    assert_eq!(h.coordinator().selected_index(), Some(1));

    h.router.handle(shortcut(Command::TogglePlayPause)).await;
    assert!(!second.snapshot().paused);
    assert!(first.snapshot().paused);

    // The overlay on the viewed tab times out and reports back
    let event = first_page.agent.tick_overlay(Instant::now() + Duration::from_millis(2600));
    assert_eq!(event, Some(OverlayEvent::Hidden { remote: true }));
    h.router.handle(RouterMessage::OverlayHidden).await;
    assert!(!h.coordinator().force_global());
    assert_eq!(h.coordinator().base_time(), None);

    h.router.handle(shortcut(Command::TogglePlayPause)).await;
    assert!(!first.snapshot().paused);
    assert_eq!(h.coordinator().selected_index(), Some(0));
}

#[tokio::test(start_paused = true)]
async fn auto_focus_is_idempotent() {
    let h = Harness::new();
    h.open(1, "One", video(1).shared());
    h.open(2, "Two", video(2).shared());
    h.coordinator().scan(false).await;

    h.coordinator().ensure_active_selection(TabId(2));
    let once = h.coordinator().selected_index();
    h.coordinator().ensure_active_selection(TabId(2));
    assert_eq!(h.coordinator().selected_index(), once);
    assert_eq!(once, Some(1));
}

#[tokio::test(start_paused = true)]
async fn closed_tab_mid_session_is_tolerated() {
    let h = Harness::new();
    h.open(1, "One", video(1).with_time(20.0).shared());
    h.open(2, "Two", video(2).shared());
    h.browser.activate(TabId(1));

    h.router.handle(shortcut(Command::SeekForward)).await;
    h.browser.close_tab(TabId(1));
    tokio::time::sleep(Duration::from_millis(600)).await;

    // The commit went nowhere; the session is still drained
    assert_eq!(absolute_seeks(&h), vec![25.0]);
    assert_eq!(h.coordinator().accumulated_seek(), 0.0);

    h.browser.activate(TabId(2));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(
        h.router.handle(shortcut(Command::TogglePlayPause)).await,
        RouterReply::Ok
    );
    assert_eq!(h.coordinator().media_list().len(), 1);
    assert_eq!(h.coordinator().selected_index(), Some(0));
}

#[tokio::test(start_paused = true)]
async fn page_fallback_echo_is_suppressed() {
    let h = Harness::new();
    let media = video(1).shared();
    h.open(1, "One", media.clone());
    h.browser.activate(TabId(1));

    h.router.handle(shortcut(Command::VolumeDown)).await;
    let echo = h
        .router
        .handle(RouterMessage::Command {
            command: Command::VolumeDown,
            origin: CommandOrigin::PageFallback,
        })
        .await;
    assert_eq!(echo, RouterReply::Suppressed);
    assert_eq!(media.snapshot().volume, 0.95);
}
