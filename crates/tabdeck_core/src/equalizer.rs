//! Equalizer Engine
//!
//! Page-side owner of the audio graph. One audio context is created lazily
//! on the first EQ request; each media element gets its own
//! [`FilterChain`] the first time it is equalized. Chains are kept in an
//! iterable registry so a Q change can reach every chain on the page.
//!
//! Failure to create the context or to route an element (cross-origin
//! media) degrades to [`EqReply::Unavailable`] and the page keeps playing
//! unprocessed audio.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tabdeck_dsp::{
    band_amplitudes, clamp_q, match_preset, FilterChain, PresetRef, EQ_BANDS, PRESETS,
};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::config::EqSettings;
use crate::error::{EqError, EqResult};
use crate::host::{AudioHost, MediaElement, MediaId};
use crate::message::{EqReply, EqRequest, EqState};
use crate::storage::{
    load_custom_presets, load_global_q, load_page_memory, page_eq_modified, save_custom_presets,
    save_global_q, save_page_memory, KeyValueStore, StoredPreset,
};

/// Sample rate used for curves drawn before any audio context exists
const DISPLAY_SAMPLE_RATE: f32 = 48_000.0;

enum AudioContext {
    Pending,
    Ready(f32),
    Failed(String),
}

struct ChainSlot {
    media: MediaId,
    chain: Arc<Mutex<FilterChain>>,
}

struct EqInner {
    context: AudioContext,
    chains: Vec<ChainSlot>,
    /// Elements that refused routing, with the reason
    refused: Vec<(MediaId, String)>,
    q: f32,
    custom_presets: Vec<StoredPreset>,
    spectrum_enabled: bool,
}

pub struct EqualizerEngine {
    audio: Arc<dyn AudioHost>,
    store: Arc<dyn KeyValueStore>,
    settings: EqSettings,
    page_url: String,
    inner: Mutex<EqInner>,
}

impl EqualizerEngine {
    pub fn new(
        audio: Arc<dyn AudioHost>,
        store: Arc<dyn KeyValueStore>,
        settings: EqSettings,
        page_url: impl Into<String>,
    ) -> Self {
        let q = load_global_q(store.as_ref(), &settings);
        let custom_presets = load_custom_presets(store.as_ref());
        Self {
            audio,
            store,
            settings,
            page_url: page_url.into(),
            inner: Mutex::new(EqInner {
                context: AudioContext::Pending,
                chains: Vec::new(),
                refused: Vec::new(),
                q,
                custom_presets,
                spectrum_enabled: false,
            }),
        }
    }

    pub fn page_url(&self) -> &str {
        &self.page_url
    }

    pub fn q(&self) -> f32 {
        self.inner.lock().q
    }

    pub fn chain_count(&self) -> usize {
        self.inner.lock().chains.len()
    }

    pub fn spectrum_enabled(&self) -> bool {
        self.inner.lock().spectrum_enabled
    }

    /// Saved non-flat gains exist for this page
    pub fn is_modified(&self) -> bool {
        page_eq_modified(self.store.as_ref(), &self.page_url)
    }

    /// Serve one control-surface request against the page's active media
    pub fn handle(&self, request: EqRequest, media: Option<&dyn MediaElement>) -> EqReply {
        let result = match request {
            EqRequest::Init => self.init(media),
            EqRequest::GetState => Ok(EqReply::State(self.state(media))),
            EqRequest::SetBand { index, value } => self.set_band(media, index, value),
            EqRequest::ApplyPreset { name } => self.apply_preset(media, &name),
            EqRequest::SavePreset { name } => self.save_preset(media, &name),
            EqRequest::DeletePreset { name } => self.delete_preset(media, &name),
            EqRequest::Reset => self.reset(media),
            EqRequest::GetQ => Ok(EqReply::Q { q: self.q() }),
            EqRequest::SetQ { q } => self.set_q(q).map(|q| EqReply::Q { q }),
            EqRequest::SpectrumInit => self.spectrum_init(media),
            EqRequest::SpectrumSample => self.spectrum_sample(media),
            EqRequest::GetResponse {
                points,
                min_hz,
                max_hz,
            } => Ok(self.response(media, points, min_hz, max_hz)),
        };
        result.unwrap_or_else(error_reply)
    }

    fn init(&self, media: Option<&dyn MediaElement>) -> EqResult<EqReply> {
        let media = media.ok_or(EqError::NoMedia)?;
        self.ensure_chain(media)?;
        Ok(EqReply::State(self.state(Some(media))))
    }

    /// Chain for `media`, creating the context and routing on first use
    pub fn ensure_chain(&self, media: &dyn MediaElement) -> EqResult<Arc<Mutex<FilterChain>>> {
        let id = media.id();
        let mut inner = self.inner.lock();
        if let Some(slot) = inner.chains.iter().find(|s| s.media == id) {
            return Ok(Arc::clone(&slot.chain));
        }
        if let Some((_, reason)) = inner.refused.iter().find(|(m, _)| *m == id) {
            return Err(EqError::Unavailable(reason.clone()));
        }

        let existing = match &inner.context {
            AudioContext::Ready(rate) => Some(*rate),
            AudioContext::Failed(reason) => return Err(EqError::Unavailable(reason.clone())),
            AudioContext::Pending => None,
        };
        let sample_rate = match existing {
            Some(rate) => rate,
            None => match self.audio.create_context() {
                Ok(rate) => {
                    info!("Audio context created at {} Hz", rate);
                    inner.context = AudioContext::Ready(rate);
                    rate
                }
                Err(e) => {
                    warn!("Audio context unavailable: {}", e);
                    let reason = e.to_string();
                    inner.context = AudioContext::Failed(reason.clone());
                    return Err(EqError::Unavailable(reason));
                }
            },
        };

        let mut chain = FilterChain::new(sample_rate, &EQ_BANDS, inner.q)?;
        if let Some(memory) = load_page_memory(self.store.as_ref(), &self.page_url) {
            chain.set_gains(&memory.gains)?;
        }
        let chain = Arc::new(Mutex::new(chain));

        if let Err(e) = self.audio.attach(media, Arc::clone(&chain)) {
            warn!("Media {:?} cannot be equalized: {}", id, e);
            let reason = e.to_string();
            inner.refused.push((id, reason.clone()));
            return Err(EqError::Unavailable(reason));
        }

        debug!("EQ chain attached to media {:?}", id);
        inner.chains.push(ChainSlot {
            media: id,
            chain: Arc::clone(&chain),
        });
        Ok(chain)
    }

    fn chain_for(&self, media: Option<&dyn MediaElement>) -> Option<Arc<Mutex<FilterChain>>> {
        let id = media?.id();
        self.inner
            .lock()
            .chains
            .iter()
            .find(|s| s.media == id)
            .map(|s| Arc::clone(&s.chain))
    }

    /// Live gains, else the page's saved gains, else flat
    fn current_gains(&self, media: Option<&dyn MediaElement>) -> Vec<f32> {
        if let Some(chain) = self.chain_for(media) {
            return chain.lock().gains();
        }
        match load_page_memory(self.store.as_ref(), &self.page_url) {
            Some(memory) => tabdeck_dsp::adapt_gains(&memory.gains, &EQ_BANDS),
            None => vec![0.0; EQ_BANDS.len()],
        }
    }

    pub fn state(&self, media: Option<&dyn MediaElement>) -> EqState {
        let gains = self.current_gains(media);
        let inner = self.inner.lock();
        let refs: Vec<PresetRef<'_>> = PRESETS
            .iter()
            .map(PresetRef::from)
            .chain(inner.custom_presets.iter().map(StoredPreset::as_preset_ref))
            .collect();
        let matched_preset = match_preset(&gains, inner.q, &refs, self.settings.match_tolerance_db)
            .map(str::to_string);
        let modified = gains.iter().any(|g| g.abs() > 1e-4);

        EqState {
            frequencies: EQ_BANDS.to_vec(),
            gains,
            q: inner.q,
            builtin_presets: PRESETS.iter().map(StoredPreset::from).collect(),
            custom_presets: inner.custom_presets.clone(),
            matched_preset,
            modified,
        }
    }

    fn remember_gains(&self, gains: &[f32]) {
        if let Err(e) = save_page_memory(self.store.as_ref(), &self.page_url, gains) {
            warn!("Failed to save EQ for {}: {}", self.page_url, e);
        }
    }

    fn set_band(
        &self,
        media: Option<&dyn MediaElement>,
        index: usize,
        value: f32,
    ) -> EqResult<EqReply> {
        let media = media.ok_or(EqError::NoMedia)?;
        let chain = self.ensure_chain(media)?;
        let gains = {
            let mut chain = chain.lock();
            chain.set_band_gain(index, value)?;
            chain.gains()
        };
        self.remember_gains(&gains);
        Ok(EqReply::State(self.state(Some(media))))
    }

    fn find_preset(&self, name: &str) -> Option<StoredPreset> {
        if let Some(builtin) = tabdeck_dsp::builtin_preset(name) {
            return Some(StoredPreset::from(builtin));
        }
        self.inner
            .lock()
            .custom_presets
            .iter()
            .find(|p| p.name == name)
            .cloned()
    }

    fn apply_preset(&self, media: Option<&dyn MediaElement>, name: &str) -> EqResult<EqReply> {
        let preset = self
            .find_preset(name)
            .ok_or_else(|| EqError::PresetNotFound(name.to_string()))?;
        let media = media.ok_or(EqError::NoMedia)?;
        let chain = self.ensure_chain(media)?;
        let gains = {
            let mut chain = chain.lock();
            chain.set_gains(&preset.gains)?;
            chain.gains()
        };
        if let Some(q) = preset.q {
            self.set_q(q)?;
        }
        self.remember_gains(&gains);
        info!("Applied EQ preset '{}'", name);
        Ok(EqReply::State(self.state(Some(media))))
    }

    fn save_preset(&self, media: Option<&dyn MediaElement>, name: &str) -> EqResult<EqReply> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EqError::EmptyPresetName);
        }
        let gains = self.current_gains(media);
        let snapshot = {
            let mut inner = self.inner.lock();
            let preset = StoredPreset {
                name: name.to_string(),
                gains,
                q: Some(inner.q),
            };
            match inner.custom_presets.iter_mut().find(|p| p.name == name) {
                Some(existing) => *existing = preset,
                None => inner.custom_presets.push(preset),
            }
            let cap = self.settings.max_custom_presets;
            let excess = inner.custom_presets.len().saturating_sub(cap);
            if excess > 0 {
                debug!("Dropping {} oldest custom presets", excess);
                inner.custom_presets.drain(..excess);
            }
            inner.custom_presets.clone()
        };
        save_custom_presets(self.store.as_ref(), &snapshot)?;
        Ok(EqReply::State(self.state(media)))
    }

    fn delete_preset(&self, media: Option<&dyn MediaElement>, name: &str) -> EqResult<EqReply> {
        let snapshot = {
            let mut inner = self.inner.lock();
            let pos = inner
                .custom_presets
                .iter()
                .position(|p| p.name == name)
                .ok_or_else(|| EqError::PresetNotFound(name.to_string()))?;
            inner.custom_presets.remove(pos);
            inner.custom_presets.clone()
        };
        save_custom_presets(self.store.as_ref(), &snapshot)?;
        Ok(EqReply::State(self.state(media)))
    }

    fn reset(&self, media: Option<&dyn MediaElement>) -> EqResult<EqReply> {
        let flat = vec![0.0; EQ_BANDS.len()];
        if let Some(chain) = self.chain_for(media) {
            chain.lock().set_gains(&flat)?;
        }
        self.remember_gains(&flat);
        Ok(EqReply::State(self.state(media)))
    }

    /// Clamp, broadcast to every chain on the page and persist
    pub fn set_q(&self, q: f32) -> EqResult<f32> {
        let q = clamp_q(q, &self.settings.q_range());
        {
            let mut inner = self.inner.lock();
            inner.q = q;
            for slot in &inner.chains {
                slot.chain.lock().set_q(q)?;
            }
        }
        save_global_q(self.store.as_ref(), q)?;
        Ok(q)
    }

    fn spectrum_init(&self, media: Option<&dyn MediaElement>) -> EqResult<EqReply> {
        let media = media.ok_or(EqError::NoMedia)?;
        self.ensure_chain(media)?;
        self.inner.lock().spectrum_enabled = true;
        Ok(EqReply::Ok)
    }

    fn spectrum_sample(&self, media: Option<&dyn MediaElement>) -> EqResult<EqReply> {
        let chain = self
            .chain_for(media)
            .ok_or_else(|| EqError::Unavailable("spectrum not initialized".to_string()))?;
        let mut chain = chain.lock();
        let sample_rate = chain.sample_rate();
        let centers = chain.frequencies();
        let pre_data = chain.pre_tap().frequency_data();
        let post_data = chain.post_tap().frequency_data();
        Ok(EqReply::Spectrum {
            pre: band_amplitudes(&pre_data, sample_rate, &centers),
            post: band_amplitudes(&post_data, sample_rate, &centers),
        })
    }

    /// Response curve; works without an audio context
    fn response(
        &self,
        media: Option<&dyn MediaElement>,
        points: usize,
        min_hz: f32,
        max_hz: f32,
    ) -> EqReply {
        let curve = match self.chain_for(media) {
            Some(chain) => chain.lock().frequency_response(points, min_hz, max_hz),
            None => {
                let gains = self.current_gains(media);
                let built = FilterChain::new(DISPLAY_SAMPLE_RATE, &EQ_BANDS, self.q())
                    .and_then(|mut chain| chain.set_gains(&gains).map(|_| chain));
                match built {
                    Ok(chain) => chain.frequency_response(points, min_hz, max_hz),
                    Err(e) => {
                        return EqReply::Rejected {
                            reason: e.to_string(),
                        }
                    }
                }
            }
        };
        EqReply::Response {
            frequencies: curve.frequencies,
            magnitudes_db: curve.magnitudes_db,
        }
    }

    /// Re-apply the page's saved gains once media shows up.
    ///
    /// Polls `locate` a bounded number of times; gives up early when there
    /// is nothing to restore or the media cannot be equalized.
    pub async fn restore<F>(&self, locate: F) -> bool
    where
        F: Fn() -> Option<Arc<dyn MediaElement>>,
    {
        match load_page_memory(self.store.as_ref(), &self.page_url) {
            Some(memory) if memory.is_modified() => {}
            _ => return false,
        }

        for attempt in 1..=self.settings.restore_attempts {
            if let Some(media) = locate() {
                return match self.ensure_chain(media.as_ref()) {
                    Ok(_) => {
                        info!("Restored saved EQ for {} (attempt {})", self.page_url, attempt);
                        true
                    }
                    Err(e) => {
                        warn!("EQ restore abandoned: {}", e);
                        false
                    }
                };
            }
            tokio::time::sleep(self.settings.restore_interval()).await;
        }
        debug!("No media appeared for EQ restore on {}", self.page_url);
        false
    }

    /// Sample the spectrum of `media` every `interval` until stopped
    pub fn spawn_spectrum_poll(
        self: &Arc<Self>,
        media: Arc<dyn MediaElement>,
        interval: Duration,
    ) -> SpectrumPoll {
        let (tx, rx) = mpsc::channel(4);
        let engine: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                let reply = engine.handle(EqRequest::SpectrumSample, Some(media.as_ref()));
                drop(engine);
                if let EqReply::Spectrum { pre, post } = reply {
                    if tx.send(SpectrumFrame { pre, post }).await.is_err() {
                        break;
                    }
                }
            }
        });
        SpectrumPoll {
            frames: rx,
            task: task.abort_handle(),
        }
    }
}

fn error_reply(error: EqError) -> EqReply {
    match error {
        EqError::NoMedia | EqError::Host(_) => EqReply::Unavailable {
            reason: error.to_string(),
        },
        EqError::Unavailable(reason) => EqReply::Unavailable { reason },
        EqError::PresetNotFound(name) => EqReply::NotFound { name },
        EqError::EmptyPresetName | EqError::Dsp(_) | EqError::Storage(_) => EqReply::Rejected {
            reason: error.to_string(),
        },
    }
}

/// Per-band amplitudes before and after the EQ
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumFrame {
    pub pre: Vec<f32>,
    pub post: Vec<f32>,
}

/// Running spectrum poll; stops when stopped or dropped
pub struct SpectrumPoll {
    frames: mpsc::Receiver<SpectrumFrame>,
    task: AbortHandle,
}

impl SpectrumPoll {
    pub async fn next_frame(&mut self) -> Option<SpectrumFrame> {
        self.frames.recv().await
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for SpectrumPoll {
    fn drop(&mut self) {
        self.task.abort();
    }
}
