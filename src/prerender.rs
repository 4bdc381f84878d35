//! Background note rendering into a byte-bounded LRU cache.
//!
//! Notes are keyed by [`NoteKey`], which ignores start time, so the same
//! note played anywhere in a song hits the same entry. Workers render each
//! job through a private [`ScheduledSignalSourceMixer`] and strip the lead-in
//! silence that the note's start offset produces.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace};

use crate::config::{AudioConfig, CHANNELS, PreRenderConfig};
use crate::error::{Result, SynthError};
use crate::mixer::ScheduledSignalSourceMixer;
use crate::note::{NoteExpression, Song};

const WORKER_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NoteKey {
    pub midi_note: u8,
    pub velocity: u8,
    pub duration_micro_beats: i64,
    pub instrument: String,
}

impl NoteKey {
    pub fn from_note(note: &NoteExpression) -> Result<Self> {
        let instrument = note
            .instrument_name()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| SynthError::InvalidInstrument("note has no named instrument".to_string()))?;
        Ok(NoteKey {
            midi_note: note.midi_note,
            velocity: note.velocity,
            duration_micro_beats: (note.duration_beats * 1e6).round() as i64,
            instrument: instrument.to_string(),
        })
    }
}

/// A rendered note as interleaved stereo, starting at the note's onset.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedWave {
    samples: Arc<[f32]>,
}

impl CachedWave {
    pub fn new(samples: Vec<f32>) -> Self {
        CachedWave { samples: samples.into() }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / CHANNELS
    }

    pub fn size_bytes(&self) -> usize {
        self.samples.len() * std::mem::size_of::<f32>()
    }
}

#[derive(Default)]
struct Lru {
    stamps: HashMap<NoteKey, u64>,
    order: BTreeMap<u64, NoteKey>, // oldest stamp first
    next_stamp: u64,
    bytes: usize,
}

impl Lru {
    fn touch(&mut self, key: &NoteKey) {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        if let Some(old) = self.stamps.insert(key.clone(), stamp) {
            self.order.remove(&old);
        }
        self.order.insert(stamp, key.clone());
    }
}

struct Cache {
    waves: RwLock<HashMap<NoteKey, Arc<CachedWave>>>,
    in_flight: Mutex<HashSet<NoteKey>>,
    lru: Mutex<Lru>,
    max_bytes: AtomicUsize,
}

impl Cache {
    fn new(max_bytes: usize) -> Self {
        Cache {
            waves: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            lru: Mutex::new(Lru::default()),
            max_bytes: AtomicUsize::new(max_bytes),
        }
    }

    fn store(&self, key: NoteKey, wave: CachedWave) {
        let mut lru = self.lru.lock();
        let size = wave.size_bytes();
        if let Some(old) = self.waves.write().insert(key.clone(), Arc::new(wave)) {
            lru.bytes -= old.size_bytes();
        }
        lru.bytes += size;
        lru.touch(&key);
        self.evict(&mut lru);
    }

    fn evict(&self, lru: &mut Lru) {
        let max = self.max_bytes.load(Ordering::Relaxed);
        while lru.bytes > max {
            let Some((_, key)) = lru.order.pop_first() else { break };
            lru.stamps.remove(&key);
            if let Some(wave) = self.waves.write().remove(&key) {
                lru.bytes -= wave.size_bytes();
                debug!(?key, bytes = wave.size_bytes(), "evicted cached note");
            }
        }
    }
}

struct RenderJob {
    key: NoteKey,
    note: NoteExpression,
}

struct WorkerPool {
    jobs: Sender<RenderJob>,
    inbox: Receiver<RenderJob>,
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn idle() -> Self {
        let (jobs, inbox) = unbounded();
        WorkerPool { jobs, inbox, stop: Arc::new(AtomicBool::new(false)), handles: Vec::new() }
    }
}

/// Renders notes ahead of playback on a small thread pool.
///
/// Construct one per application and share it by reference; dropping it
/// stops the workers.
pub struct AudioPreRenderer {
    config: PreRenderConfig,
    cache: Arc<Cache>,
    pool: Mutex<WorkerPool>,
}

impl AudioPreRenderer {
    /// A cache with no running workers. Call [`start_workers`](Self::start_workers)
    /// to begin rendering queued notes.
    pub fn new(config: PreRenderConfig) -> Self {
        AudioPreRenderer {
            cache: Arc::new(Cache::new(config.max_bytes)),
            pool: Mutex::new(WorkerPool::idle()),
            config,
        }
    }

    pub fn with_workers(config: PreRenderConfig) -> Result<Self> {
        let renderer = AudioPreRenderer::new(config);
        renderer.start_workers()?;
        Ok(renderer)
    }

    pub fn config(&self) -> &PreRenderConfig {
        &self.config
    }

    /// Schedule `note` for background rendering. Already cached or in-flight
    /// notes are ignored.
    pub fn queue(&self, note: &NoteExpression) -> Result<()> {
        let key = NoteKey::from_note(note)?;
        if self.cache.waves.read().contains_key(&key) {
            return Ok(());
        }
        if !self.cache.in_flight.lock().insert(key.clone()) {
            return Ok(());
        }
        trace!(?key, "queued note for pre-render");
        let job = RenderJob { key, note: note.clone() };
        if let Err(err) = self.pool.lock().jobs.send(job) {
            self.cache.in_flight.lock().remove(&err.into_inner().key);
        }
        Ok(())
    }

    /// Look up a rendered note and mark it most recently used.
    pub fn try_get(&self, note: &NoteExpression) -> Option<Arc<CachedWave>> {
        let key = NoteKey::from_note(note).ok()?;
        self.get(&key)
    }

    pub fn get(&self, key: &NoteKey) -> Option<Arc<CachedWave>> {
        let wave = self.cache.waves.read().get(key).cloned()?;
        let mut lru = self.cache.lru.lock();
        if lru.stamps.contains_key(key) {
            lru.touch(key);
        }
        Some(wave)
    }

    /// Store a wave rendered elsewhere, evicting as needed.
    pub fn insert(&self, key: NoteKey, wave: CachedWave) {
        self.cache.store(key, wave);
    }

    pub fn contains(&self, key: &NoteKey) -> bool {
        self.cache.waves.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.cache.waves.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn resident_bytes(&self) -> usize {
        self.cache.lru.lock().bytes
    }

    pub fn in_flight_count(&self) -> usize {
        self.cache.in_flight.lock().len()
    }

    pub fn max_bytes(&self) -> usize {
        self.cache.max_bytes.load(Ordering::Relaxed)
    }

    /// Change the budget and evict down to it immediately.
    pub fn set_max_bytes(&self, max_bytes: usize) {
        self.cache.max_bytes.store(max_bytes, Ordering::Relaxed);
        let mut lru = self.cache.lru.lock();
        self.cache.evict(&mut lru);
    }

    pub fn clear_cache(&self) {
        let mut lru = self.cache.lru.lock();
        self.cache.waves.write().clear();
        self.cache.in_flight.lock().clear();
        *lru = Lru::default();
        debug!("pre-render cache cleared");
    }

    pub fn worker_count(&self) -> usize {
        self.pool.lock().handles.len()
    }

    /// Spawn the worker threads. No-op if they are already running.
    pub fn start_workers(&self) -> Result<()> {
        let mut pool = self.pool.lock();
        if !pool.handles.is_empty() {
            return Ok(());
        }
        pool.stop.store(false, Ordering::Relaxed);

        for id in 0..self.config.workers.max(1) {
            let inbox = pool.inbox.clone();
            let stop = Arc::clone(&pool.stop);
            let cache = Arc::clone(&self.cache);
            let audio = self.config.audio;
            let handle = thread::Builder::new()
                .name(format!("prerender-{id}"))
                .spawn(move || run_worker(id, inbox, stop, cache, audio))?;
            pool.handles.push(handle);
        }
        info!(workers = pool.handles.len(), "pre-render workers started");
        Ok(())
    }

    /// Stop and join the workers and start over with an empty queue. Jobs
    /// that were queued but not yet picked up are discarded and their keys
    /// may be queued again.
    pub fn stop_workers(&self) {
        let mut pool = self.pool.lock();
        pool.stop.store(true, Ordering::Relaxed);
        let old = std::mem::replace(&mut *pool, WorkerPool::idle());
        drop(pool);

        let mut discarded = 0usize;
        while let Ok(job) = old.inbox.try_recv() {
            self.cache.in_flight.lock().remove(&job.key);
            discarded += 1;
        }
        drop(old.jobs);
        let workers = old.handles.len();
        for handle in old.handles {
            let _ = handle.join();
        }
        if workers > 0 || discarded > 0 {
            info!(workers, discarded, "pre-render workers stopped");
        }
    }
}

impl Default for AudioPreRenderer {
    fn default() -> Self {
        AudioPreRenderer::new(PreRenderConfig::default())
    }
}

impl Drop for AudioPreRenderer {
    fn drop(&mut self) {
        self.stop_workers();
    }
}

fn run_worker(
    id: usize,
    inbox: Receiver<RenderJob>,
    stop: Arc<AtomicBool>,
    cache: Arc<Cache>,
    audio: AudioConfig,
) {
    trace!(id, "pre-render worker running");
    loop {
        match inbox.recv_timeout(WORKER_POLL) {
            Ok(job) => {
                if stop.load(Ordering::Relaxed) {
                    cache.in_flight.lock().remove(&job.key);
                    break;
                }
                let wave = render_note(&job.note, audio);
                trace!(id, key = ?job.key, frames = wave.frames(), "note pre-rendered");
                cache.store(job.key.clone(), wave);
                cache.in_flight.lock().remove(&job.key);
            }
            Err(RecvTimeoutError::Timeout) => {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Render one note on its own and drop the silence before its onset.
pub fn render_note(note: &NoteExpression, audio: AudioConfig) -> CachedWave {
    let mut mixer = ScheduledSignalSourceMixer::new(audio);
    mixer.schedule_song(Song::new(vec![note.clone()]), None);
    let mut samples = mixer.render_to_end();
    let lead_in = audio.seconds_to_frames(note.start_seconds()) as usize * CHANNELS;
    samples.drain(..lead_in.min(samples.len()));
    CachedWave::new(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Adsr;
    use crate::note::Instrument;
    use crate::patch::SynthPatch;
    use crate::waveform::WaveformType;

    fn keyed(midi_note: u8) -> NoteKey {
        NoteKey { midi_note, velocity: 100, duration_micro_beats: 1_000_000, instrument: "lead".to_string() }
    }

    fn wave(floats: usize) -> CachedWave {
        CachedWave::new(vec![0.0; floats])
    }

    #[test]
    fn key_ignores_start_and_rounds_duration() {
        let lead = Instrument::new("lead", |_| SynthPatch::builder(WaveformType::Sine).envelope(Adsr::gate()).into_patch());
        let a = NoteExpression::new(60, 90, 0.0, 0.5).with_instrument(lead.clone());
        let b = NoteExpression::new(60, 90, 7.25, 0.500_000_01).with_instrument(lead);
        assert_eq!(NoteKey::from_note(&a).unwrap(), NoteKey::from_note(&b).unwrap());
    }

    #[test]
    fn key_requires_instrument() {
        let note = NoteExpression::new(60, 90, 0.0, 0.5);
        assert!(matches!(NoteKey::from_note(&note), Err(SynthError::InvalidInstrument(_))));
    }

    #[test]
    fn lowering_budget_evicts_oldest() {
        let cache = AudioPreRenderer::new(PreRenderConfig { max_bytes: 1_000, ..PreRenderConfig::default() });
        cache.insert(keyed(60), wave(100));
        cache.insert(keyed(61), wave(100));
        assert_eq!(cache.resident_bytes(), 800);
        cache.set_max_bytes(500);
        assert!(!cache.contains(&keyed(60)));
        assert!(cache.contains(&keyed(61)));
        assert_eq!(cache.resident_bytes(), 400);
    }

    #[test]
    fn replacing_entry_keeps_byte_count() {
        let cache = AudioPreRenderer::default();
        cache.insert(keyed(60), wave(100));
        cache.insert(keyed(60), wave(50));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.resident_bytes(), 200);
    }

    #[test]
    fn clear_resets_everything() {
        let cache = AudioPreRenderer::default();
        cache.insert(keyed(60), wave(100));
        cache.clear_cache();
        assert!(cache.is_empty());
        assert_eq!(cache.resident_bytes(), 0);
        assert_eq!(cache.in_flight_count(), 0);
    }
}
