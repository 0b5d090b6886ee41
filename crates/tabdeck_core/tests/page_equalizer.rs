mod common;

use std::sync::Arc;

use common::{init_tracing, video};
use tabdeck_core::sim::{SimAudio, SimDocument};
use tabdeck_core::storage::save_page_memory;
use tabdeck_core::{
    EqReply, EqRequest, EqSettings, EqState, EqualizerEngine, KeyValueStore, MemoryStore,
    PageAgent, PageReply, PageRequest, StepSettings, TabdeckConfig,
};

const URL: &str = "https://music.example/album/7?t=30";

fn load_page(store: Arc<MemoryStore>, audio: Arc<SimAudio>) -> Arc<PageAgent> {
    let document = SimDocument::new(URL).shared();
    document.add(video(1).with_playing(true).shared());
    let engine = EqualizerEngine::new(audio, store, EqSettings::default(), URL);
    Arc::new(
        PageAgent::new(document, &TabdeckConfig::default(), StepSettings::default())
            .with_equalizer(Arc::new(engine)),
    )
}

fn eq(agent: &Arc<PageAgent>, request: EqRequest) -> EqReply {
    match agent.handle(PageRequest::Eq(request)) {
        PageReply::Eq(reply) => reply,
        other => panic!("unexpected reply {:?}", other),
    }
}

fn state(agent: &Arc<PageAgent>) -> EqState {
    match eq(agent, EqRequest::GetState) {
        EqReply::State(state) => state,
        other => panic!("unexpected reply {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn saved_gains_survive_a_reload() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());

    let first = load_page(store.clone(), Arc::new(SimAudio::new(48_000.0)));
    eq(&first, EqRequest::SetBand { index: 3, value: 6.0 });
    eq(&first, EqRequest::SetBand { index: 9, value: 40.0 });
    let before = state(&first);
    assert_eq!(before.gains[3], 6.0);
    assert_eq!(before.gains[9], 24.0);
    assert!(before.modified);

    // Same URL with a fresh audio graph
    let audio = Arc::new(SimAudio::new(44_100.0));
    let second = load_page(store.clone(), audio.clone());
    assert_eq!(audio.attached_count(), 0);
    assert!(second.restore_eq().await);
    assert_eq!(audio.attached_count(), 1);
    assert_eq!(state(&second).gains, before.gains);
}

#[tokio::test(start_paused = true)]
async fn legacy_seven_band_memory_is_adapted() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    save_page_memory(store.as_ref(), URL, &[0.0, 0.0, 0.0, 6.0, 0.0, 0.0, 0.0]).unwrap();

    let agent = load_page(store.clone(), Arc::new(SimAudio::new(48_000.0)));
    assert!(agent.restore_eq().await);
    let restored = state(&agent);
    assert_eq!(restored.gains.len(), 10);
    // 1 kHz exists in both layouts
    assert!((restored.gains[5] - 6.0).abs() < 1e-3);
    assert!(restored.modified);
}

#[tokio::test(start_paused = true)]
async fn presets_and_q_are_shared_across_pages() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let agent = load_page(store.clone(), Arc::new(SimAudio::new(48_000.0)));

    eq(&agent, EqRequest::Init);
    eq(&agent, EqRequest::SetBand { index: 0, value: 4.0 });
    let saved = eq(&agent, EqRequest::SavePreset { name: "  Night  ".to_string() });
    assert!(matches!(saved, EqReply::State(_)));
    assert_eq!(eq(&agent, EqRequest::SetQ { q: 50.0 }), EqReply::Q { q: 8.0 });

    let other = load_page(store.clone(), Arc::new(SimAudio::new(48_000.0)));
    eq(&other, EqRequest::Init);
    assert_eq!(eq(&other, EqRequest::GetQ), EqReply::Q { q: 8.0 });
    let shared = state(&other);
    assert!(shared.custom_presets.iter().any(|p| p.name == "Night"));

    eq(&other, EqRequest::ApplyPreset { name: "Night".to_string() });
    assert_eq!(state(&other).matched_preset.as_deref(), Some("Night"));
    assert!(store.keys().iter().any(|k| k.starts_with("eqMem:")));
}
