use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, Sender, unbounded};
use tracing::{debug, error, trace, warn};

use crate::analysis::RenderAnalysis;
use crate::cancel::CancellationToken;
use crate::config::{AudioConfig, CHANNELS};
use crate::controls::MasterControls;
use crate::error::Result;
use crate::note::{NoteContext, NoteExpression, Song};
use crate::patch::{Patch, SpawnContext};
use crate::pool::{Arena, ArenaId, Recyclable};
use crate::voice::SynthSignalSource;
use crate::wav::WavSink;

struct ScheduledSong {
    song: Song,
    cancel: Option<CancellationToken>,
}

/// One note placed on the timeline. Owns its patch; dropping the event
/// recycles its lease, which stops any voice still holding it.
struct ScheduledNoteEvent {
    start_sample: u64,
    duration_samples: u64,
    note: Arc<NoteContext>,
    patch: Patch,
    cancel: Option<CancellationToken>,
    remaining_voices: usize,
    owner: Recyclable,
}

impl ScheduledNoteEvent {
    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}

impl Drop for ScheduledNoteEvent {
    fn drop(&mut self) {
        self.owner.recycle();
    }
}

struct ActiveVoice {
    event: ArenaId,
    voice: SynthSignalSource,
    start_sample: u64,
    release_sample: u64,
    frames_played: u64,
    released: bool,
}

/// Clonable producer handle; songs sent here are picked up by the next
/// `read` on the mixer's thread.
#[derive(Clone)]
pub struct SongScheduler {
    songs: Sender<ScheduledSong>,
}

impl SongScheduler {
    pub fn schedule_song(&self, song: Song, cancel: Option<CancellationToken>) {
        if self.songs.send(ScheduledSong { song, cancel }).is_err() {
            debug!("mixer dropped, song discarded");
        }
    }
}

/// The real-time engine. Turns scheduled songs into voices at the right
/// sample and mixes them into interleaved stereo on every [`read`](Self::read).
pub struct ScheduledSignalSourceMixer {
    config: AudioConfig,
    song_tx: Sender<ScheduledSong>,
    song_rx: Receiver<ScheduledSong>,
    events: Arena<ScheduledNoteEvent>,
    pending: VecDeque<(u64, ArenaId)>, // sorted by start sample, ties in arrival order
    active: Vec<ActiveVoice>,
    spawned: Vec<SynthSignalSource>,
    scratch: Vec<f32>,
    controls: Arc<MasterControls>,
    sample_clock: u64,
    voices_started: u64,
    analysis: Option<RenderAnalysis>,
}

impl ScheduledSignalSourceMixer {
    pub fn new(config: AudioConfig) -> Self {
        let (song_tx, song_rx) = unbounded();
        ScheduledSignalSourceMixer {
            config,
            song_tx,
            song_rx,
            events: Arena::new(),
            pending: VecDeque::new(),
            active: Vec::new(),
            spawned: Vec::new(),
            scratch: vec![0.0; config.block_frames * CHANNELS],
            controls: Arc::new(MasterControls::default()),
            sample_clock: 0,
            voices_started: 0,
            analysis: None,
        }
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    pub fn controls(&self) -> Arc<MasterControls> {
        Arc::clone(&self.controls)
    }

    pub fn scheduler(&self) -> SongScheduler {
        SongScheduler { songs: self.song_tx.clone() }
    }

    /// Thread-safe; the song is expanded on the next `read`.
    pub fn schedule_song(&self, song: Song, cancel: Option<CancellationToken>) {
        self.scheduler().schedule_song(song, cancel);
    }

    pub fn sample_clock(&self) -> u64 {
        self.sample_clock
    }

    pub fn active_voice_count(&self) -> usize {
        self.active.len()
    }

    pub fn scheduled_count(&self) -> usize {
        self.pending.len()
    }

    pub fn voices_started(&self) -> u64 {
        self.voices_started
    }

    pub fn has_work(&self) -> bool {
        !self.song_rx.is_empty() || !self.pending.is_empty() || !self.active.is_empty()
    }

    pub fn enable_analysis(&mut self) {
        self.analysis.get_or_insert_with(RenderAnalysis::new);
    }

    pub fn analysis(&self) -> Option<&RenderAnalysis> {
        self.analysis.as_ref()
    }

    /// Mix the next `count` floats (frames x channels) into
    /// `buffer[offset..offset + count]`, overwriting it. Always returns `count`.
    pub fn read(&mut self, buffer: &mut [f32], offset: usize, count: usize) -> usize {
        let started = self.analysis.is_some().then(Instant::now);
        let out = &mut buffer[offset..offset + count];
        out.fill(0.0);

        let frames = count / CHANNELS;
        let window_end = self.sample_clock + frames as u64;

        self.drain_songs();
        self.purge_cancelled();
        self.drain_due(window_end);
        self.mix(out, frames, window_end);

        self.sample_clock = window_end;

        if let (Some(analysis), Some(started)) = (self.analysis.as_mut(), started) {
            let audio = Duration::from_secs_f64(frames as f64 / self.config.sample_rate as f64);
            analysis.record(started.elapsed(), audio);
        }
        count
    }

    fn drain_songs(&mut self) {
        while let Ok(ScheduledSong { song, cancel }) = self.song_rx.try_recv() {
            if cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                trace!("song cancelled before scheduling");
                continue;
            }
            self.schedule_notes(song, cancel);
        }
    }

    fn schedule_notes(&mut self, song: Song, cancel: Option<CancellationToken>) {
        let sample_rate = self.config.sample_rate as f64;
        let mut track_index: HashMap<String, usize> = HashMap::new();
        let mut tracks: Vec<Vec<NoteExpression>> = Vec::new();

        for note in song.notes {
            let Some(name) = note.instrument_name() else {
                warn!(midi_note = note.midi_note, "note has no instrument, skipping");
                continue;
            };
            let index = *track_index.entry(name.to_string()).or_insert_with(|| {
                tracks.push(Vec::new());
                tracks.len() - 1
            });
            tracks[index].push(note);
        }

        let mut scheduled = 0usize;
        for track in &tracks {
            for (i, note) in track.iter().enumerate() {
                let Some(instrument) = note.instrument.as_ref() else { continue };
                let patch = match instrument.create_patch(note) {
                    Ok(patch) => patch,
                    Err(err) => {
                        error!(instrument = %instrument.name, %err, "patch factory failed, skipping note");
                        continue;
                    }
                };
                if !patch.is_playable(note.midi_note) {
                    debug!(instrument = %instrument.name, midi_note = note.midi_note, "note not playable by patch");
                    continue;
                }

                let (start, duration) = (note.start_seconds(), note.duration_seconds());
                if !(note.bpm > 0.0 && start.is_finite() && duration.is_finite()) {
                    warn!(midi_note = note.midi_note, bpm = note.bpm, "note time is not finite, skipping");
                    continue;
                }

                let context = NoteContext {
                    note: note.clone(),
                    previous: i.checked_sub(1).map(|p| track[p].clone()),
                    next: track.get(i + 1).cloned(),
                };
                let start_sample = self.sample_clock.saturating_add((start.max(0.0) * sample_rate).round() as u64);
                let event = ScheduledNoteEvent {
                    start_sample,
                    duration_samples: (duration.max(0.0) * sample_rate).round() as u64,
                    note: Arc::new(context),
                    patch,
                    cancel: cancel.clone(),
                    remaining_voices: 0,
                    owner: Recyclable::new(),
                };
                let id = self.events.insert(event);
                let position = self.pending.partition_point(|(start, _)| *start <= start_sample);
                self.pending.insert(position, (start_sample, id));
                scheduled += 1;
            }
        }
        debug!(tracks = tracks.len(), notes = scheduled, "song scheduled");
    }

    fn purge_cancelled(&mut self) {
        let events = &mut self.events;
        self.pending.retain(|(_, id)| {
            let cancelled = events.get(*id).is_none_or(ScheduledNoteEvent::is_cancelled);
            if cancelled {
                events.remove(*id);
            }
            !cancelled
        });
    }

    fn drain_due(&mut self, window_end: u64) {
        loop {
            let id = match self.pending.front() {
                Some((start, id)) if *start < window_end => *id,
                _ => break,
            };
            self.pending.pop_front();

            let Some(event) = self.events.get_mut(id) else { continue };
            if event.is_cancelled() {
                self.events.remove(id);
                continue;
            }

            let ctx = SpawnContext {
                sample_rate: self.config.sample_rate as f32,
                controls: Arc::clone(&self.controls),
                note: Arc::clone(&event.note),
                lease: event.owner.lease(),
            };
            self.spawned.clear();
            if let Err(err) = event.patch.spawn_voices(event.note.note.frequency(), &ctx, &mut self.spawned) {
                error!(%err, "voice spawn failed, dropping note");
                self.events.remove(id);
                continue;
            }
            if self.spawned.is_empty() {
                self.events.remove(id);
                continue;
            }

            event.remaining_voices = self.spawned.len();
            let start_sample = event.start_sample;
            let release_sample = event.start_sample.saturating_add(event.duration_samples);
            self.voices_started += self.spawned.len() as u64;
            for voice in self.spawned.drain(..) {
                self.active.push(ActiveVoice {
                    event: id,
                    voice,
                    start_sample,
                    release_sample,
                    frames_played: 0,
                    released: false,
                });
            }
        }
    }

    fn mix(&mut self, out: &mut [f32], frames: usize, window_end: u64) {
        let window_start = window_end - frames as u64;
        if self.scratch.len() < frames * CHANNELS {
            self.scratch.resize(frames * CHANNELS, 0.0);
        }

        let mut i = 0;
        while i < self.active.len() {
            let active = &mut self.active[i];
            let position = active.start_sample + active.frames_played;
            if position >= window_end {
                i += 1;
                continue;
            }

            let cancelled = self.events.get(active.event).is_none_or(ScheduledNoteEvent::is_cancelled);
            if cancelled {
                trace!("voice cancelled mid-note");
                active.voice.dispose();
                let event = active.event;
                self.active.swap_remove(i);
                Self::finish_voice(&mut self.events, event);
                continue;
            }

            let frame_offset = position.saturating_sub(window_start) as usize;
            let count = frames - frame_offset;
            let scratch = &mut self.scratch[..count * CHANNELS];

            let mut written = 0;
            if !active.released && active.release_sample < position + count as u64 {
                let before = active.release_sample.saturating_sub(position) as usize;
                let (head, tail) = scratch.split_at_mut(before * CHANNELS);
                if !head.is_empty() {
                    written += active.voice.render(head);
                }
                active.voice.release_note();
                active.released = true;
                written += active.voice.render(tail);
            } else {
                written += active.voice.render(scratch);
            }

            if written > 0 {
                let target = &mut out[frame_offset * CHANNELS..(frame_offset + count) * CHANNELS];
                for (dst, src) in target.iter_mut().zip(scratch.iter()) {
                    *dst += *src;
                }
            }
            active.frames_played += count as u64;

            if active.voice.is_done() {
                let event = active.event;
                self.active.swap_remove(i);
                Self::finish_voice(&mut self.events, event);
                continue;
            }
            i += 1;
        }
    }

    fn finish_voice(events: &mut Arena<ScheduledNoteEvent>, id: ArenaId) {
        let Some(event) = events.get_mut(id) else { return };
        event.remaining_voices = event.remaining_voices.saturating_sub(1);
        if event.remaining_voices == 0 {
            events.remove(id);
        }
    }

    /// Drop everything scheduled or playing. The sample clock keeps running.
    pub fn clear(&mut self) {
        while self.song_rx.try_recv().is_ok() {}
        self.pending.clear();
        for active in &mut self.active {
            active.voice.dispose();
        }
        self.active.clear();
        self.events.clear();
    }

    /// Drive `read` in `block_frames` blocks until there is no work left.
    pub fn render_to_end(&mut self) -> Vec<f32> {
        let block = self.config.block_frames * CHANNELS;
        let mut buffer = vec![0.0; block];
        let mut rendered = Vec::new();
        while self.has_work() {
            self.read(&mut buffer, 0, block);
            rendered.extend_from_slice(&buffer);
        }
        rendered
    }

    /// Offline render into a 16-bit WAV file followed by `trailing_silence`.
    /// Returns the number of frames written.
    pub fn render_to_wav(&mut self, path: impl AsRef<Path>, trailing_silence: Duration) -> Result<u64> {
        let mut sink = WavSink::create(path.as_ref(), self.config.sample_rate)?;
        let block = self.config.block_frames * CHANNELS;
        let mut buffer = vec![0.0; block];
        while self.has_work() {
            self.read(&mut buffer, 0, block);
            sink.write(&buffer)?;
        }
        sink.write_silence(self.config.seconds_to_frames(trailing_silence.as_secs_f64()))?;
        let frames = sink.frames_written();
        sink.finalize()?;
        debug!(frames, path = %path.as_ref().display(), "wav written");
        Ok(frames)
    }
}

impl Default for ScheduledSignalSourceMixer {
    fn default() -> Self {
        ScheduledSignalSourceMixer::new(AudioConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Adsr;
    use crate::note::Instrument;
    use crate::patch::SynthPatch;
    use crate::waveform::WaveformType;

    fn gate_instrument(name: &str) -> Arc<crate::note::Instrument> {
        Instrument::new(name, |_| SynthPatch::builder(WaveformType::Square).envelope(Adsr::gate()).into_patch())
    }

    #[test]
    fn notes_are_sorted_across_tracks() {
        let mut mixer = ScheduledSignalSourceMixer::default();
        let a = gate_instrument("a");
        let b = gate_instrument("b");
        mixer.schedule_song(
            Song::new(vec![
                NoteExpression::new(60, 100, 0.0, 0.1).with_instrument(a.clone()),
                NoteExpression::new(62, 100, 2.0, 0.1).with_instrument(a),
                NoteExpression::new(64, 100, 1.0, 0.1).with_instrument(b),
            ]),
            None,
        );
        let mut buffer = vec![0.0; 8];
        mixer.read(&mut buffer, 0, 8);
        let starts: Vec<u64> = mixer.pending.iter().map(|(start, _)| *start).collect();
        assert_eq!(starts, vec![44_100, 88_200]);
        assert_eq!(mixer.active_voice_count(), 1);
    }

    #[test]
    fn neighbours_are_linked_within_track() {
        let mut mixer = ScheduledSignalSourceMixer::default();
        let lead = gate_instrument("lead");
        mixer.schedule_song(
            Song::new(vec![
                NoteExpression::new(60, 100, 0.0, 1.0).with_instrument(lead.clone()),
                NoteExpression::new(64, 100, 1.0, 1.0).with_instrument(lead.clone()),
                NoteExpression::new(67, 100, 2.0, 1.0).with_instrument(lead),
            ]),
            None,
        );
        mixer.drain_songs();
        let (_, middle) = mixer.pending[1];
        let context = &mixer.events.get(middle).unwrap().note;
        assert_eq!(context.previous.as_ref().map(|n| n.midi_note), Some(60));
        assert_eq!(context.next.as_ref().map(|n| n.midi_note), Some(67));
    }

    #[test]
    fn read_without_work_is_silent() {
        let mut mixer = ScheduledSignalSourceMixer::default();
        let mut buffer = vec![1.0; 64];
        assert_eq!(mixer.read(&mut buffer, 0, 64), 64);
        assert!(buffer.iter().all(|s| *s == 0.0));
        assert_eq!(mixer.sample_clock(), 32);
        assert!(!mixer.has_work());
    }

    #[test]
    fn far_future_start_saturates() {
        let mut mixer = ScheduledSignalSourceMixer::default();
        let mut buffer = vec![0.0; 64];
        mixer.read(&mut buffer, 0, 64);
        mixer.schedule_song(
            Song::new(vec![NoteExpression::new(60, 100, 1.0e300, 1.0e300).with_instrument(gate_instrument("far"))]),
            None,
        );
        mixer.read(&mut buffer, 0, 64);
        assert_eq!(mixer.pending.front().map(|(start, _)| *start), Some(u64::MAX));
        assert_eq!(mixer.active_voice_count(), 0);
    }

    #[test]
    fn clear_drops_everything() {
        let mut mixer = ScheduledSignalSourceMixer::default();
        let lead = gate_instrument("lead");
        mixer.schedule_song(
            Song::new(vec![
                NoteExpression::new(60, 100, 0.0, 1.0).with_instrument(lead.clone()),
                NoteExpression::new(60, 100, 4.0, 1.0).with_instrument(lead),
            ]),
            None,
        );
        let mut buffer = vec![0.0; 64];
        mixer.read(&mut buffer, 0, 64);
        assert!(mixer.has_work());
        mixer.clear();
        assert!(!mixer.has_work());
        assert!(mixer.events.is_empty());
    }
}
