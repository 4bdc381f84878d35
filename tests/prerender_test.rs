use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chime::{
    Adsr, AudioConfig, AudioPreRenderer, CachedWave, Instrument, NoteExpression, NoteKey, PreRenderConfig, SynthError,
    SynthPatch, WaveformType,
};
use pretty_assertions::assert_eq;

fn lead() -> Arc<Instrument> {
    Instrument::new("lead", |_| SynthPatch::builder(WaveformType::Triangle).envelope(Adsr::gate()).into_patch())
}

fn config(max_bytes: usize, workers: usize) -> PreRenderConfig {
    PreRenderConfig { audio: AudioConfig::default(), max_bytes, workers }
}

fn hash_of(key: &NoteKey) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

fn wait_for(renderer: &AudioPreRenderer, note: &NoteExpression) -> Option<Arc<CachedWave>> {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if let Some(wave) = renderer.try_get(note) {
            return Some(wave);
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    None
}

#[test]
fn equal_notes_share_key_and_hash() {
    let lead = lead();
    let other = Instrument::new("lead", |_| SynthPatch::builder(WaveformType::Sine).envelope(Adsr::pad()).into_patch());
    let a = NoteExpression::new(64, 80, 0.0, 1.25).with_instrument(lead);
    let b = NoteExpression::new(64, 80, 12.0, 1.250_000_4).with_instrument(other);

    let ka = NoteKey::from_note(&a).unwrap();
    let kb = NoteKey::from_note(&b).unwrap();
    assert_eq!(ka, kb);
    assert_eq!(hash_of(&ka), hash_of(&kb));

    let louder = NoteKey::from_note(&NoteExpression::new(64, 81, 0.0, 1.25).with_instrument(self::lead())).unwrap();
    assert!(ka != louder);
}

#[test]
fn touched_entries_survive_eviction() {
    let lead = lead();
    let notes: Vec<NoteExpression> =
        (60..64).map(|midi| NoteExpression::new(midi, 100, 0.0, 1.0).with_instrument(Arc::clone(&lead))).collect();
    let renderer = AudioPreRenderer::new(config(1_200, 1));

    for note in &notes[..3] {
        renderer.insert(NoteKey::from_note(note).unwrap(), CachedWave::new(vec![0.1; 100]));
    }
    assert_eq!(renderer.resident_bytes(), 1_200);

    assert!(renderer.try_get(&notes[0]).is_some());
    renderer.insert(NoteKey::from_note(&notes[3]).unwrap(), CachedWave::new(vec![0.1; 100]));

    assert!(renderer.resident_bytes() <= renderer.max_bytes());
    assert!(renderer.try_get(&notes[0]).is_some());
    assert!(renderer.try_get(&notes[1]).is_none());
    assert!(renderer.try_get(&notes[2]).is_some());
    assert!(renderer.try_get(&notes[3]).is_some());
}

#[test]
fn queue_rejects_notes_without_instrument() {
    let renderer = AudioPreRenderer::new(config(1 << 20, 1));
    let result = renderer.queue(&NoteExpression::new(60, 100, 0.0, 1.0));
    assert!(matches!(result, Err(SynthError::InvalidInstrument(_))));
    assert_eq!(renderer.in_flight_count(), 0);
}

#[test]
fn queue_dedups_in_flight_notes() {
    let renderer = AudioPreRenderer::new(config(1 << 20, 1));
    let note = NoteExpression::new(60, 100, 0.0, 1.0).with_instrument(lead());
    renderer.queue(&note).unwrap();
    renderer.queue(&note.clone().with_bpm(120.0)).unwrap();
    assert_eq!(renderer.in_flight_count(), 1);
}

#[test]
fn workers_render_notes_from_their_onset() {
    let renderer = AudioPreRenderer::with_workers(config(64 << 20, 2)).unwrap();
    assert_eq!(renderer.worker_count(), 2);

    let note = NoteExpression::new(69, 127, 1.5, 0.25).with_instrument(lead());
    renderer.queue(&note).unwrap();
    let wave = wait_for(&renderer, &note).expect("note was not rendered in time");

    assert!(wave.frames() >= 11_025 && wave.frames() < 11_025 + 512, "frames {}", wave.frames());
    assert!(wave.samples()[..64].iter().any(|s| *s != 0.0));
    assert!(wave.samples()[11_025 * 2..].iter().all(|s| *s == 0.0));
    assert_eq!(renderer.in_flight_count(), 0);

    // a later occurrence of the same note hits the cache
    let later = NoteExpression::new(69, 127, 9.0, 0.25).with_instrument(lead());
    assert_eq!(renderer.try_get(&later), Some(wave));
}

#[test]
fn stopping_discards_queued_jobs() {
    let renderer = AudioPreRenderer::new(config(64 << 20, 1));
    let lead = lead();
    let notes: Vec<NoteExpression> =
        (60..63).map(|midi| NoteExpression::new(midi, 100, 0.0, 0.1).with_instrument(Arc::clone(&lead))).collect();
    for note in &notes {
        renderer.queue(note).unwrap();
    }
    assert_eq!(renderer.in_flight_count(), 3);

    renderer.stop_workers();
    assert_eq!(renderer.in_flight_count(), 0);

    renderer.start_workers().unwrap();
    std::thread::sleep(Duration::from_millis(100));
    assert!(renderer.is_empty());

    renderer.queue(&notes[0]).unwrap();
    assert!(wait_for(&renderer, &notes[0]).is_some());
    renderer.stop_workers();
    assert_eq!(renderer.worker_count(), 0);
}

#[test]
fn clear_cache_drops_rendered_notes() {
    let renderer = AudioPreRenderer::new(config(1 << 20, 1));
    let note = NoteExpression::new(60, 100, 0.0, 1.0).with_instrument(lead());
    renderer.insert(NoteKey::from_note(&note).unwrap(), CachedWave::new(vec![0.5; 64]));
    assert!(renderer.try_get(&note).is_some());
    renderer.clear_cache();
    assert!(renderer.try_get(&note).is_none());
    assert_eq!(renderer.resident_bytes(), 0);
}
