use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::patch::Patch;

pub const DEFAULT_BPM: f64 = 60.0;

/// Builds a fresh patch for one note.
pub type PatchFactory = Arc<dyn Fn(&NoteExpression) -> Result<Patch> + Send + Sync>;

#[derive(Clone)]
pub struct Instrument {
    pub name: String,
    pub patch_func: PatchFactory,
}

impl Instrument {
    pub fn new<F>(name: impl Into<String>, patch_func: F) -> Arc<Self>
    where
        F: Fn(&NoteExpression) -> Result<Patch> + Send + Sync + 'static,
    {
        Arc::new(Instrument { name: name.into(), patch_func: Arc::new(patch_func) })
    }

    pub fn create_patch(&self, note: &NoteExpression) -> Result<Patch> {
        (self.patch_func)(note)
    }
}

impl fmt::Debug for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Instrument").field("name", &self.name).finish_non_exhaustive()
    }
}

/// One authored note. Times are in beats at `bpm`.
#[derive(Debug, Clone)]
pub struct NoteExpression {
    pub midi_note: u8,
    pub velocity: u8, // 0..=127
    pub start_beat: f64,
    pub duration_beats: f64,
    pub bpm: f64,
    pub instrument: Option<Arc<Instrument>>,
    pub frequency_override: Option<f32>,
}

impl NoteExpression {
    pub fn new(midi_note: u8, velocity: u8, start_beat: f64, duration_beats: f64) -> Self {
        NoteExpression {
            midi_note,
            velocity: velocity.min(127),
            start_beat,
            duration_beats,
            bpm: DEFAULT_BPM,
            instrument: None,
            frequency_override: None,
        }
    }

    pub fn with_instrument(mut self, instrument: Arc<Instrument>) -> Self {
        self.instrument = Some(instrument);
        self
    }

    pub fn with_bpm(mut self, bpm: f64) -> Self {
        self.bpm = bpm;
        self
    }

    pub fn with_frequency(mut self, frequency: f32) -> Self {
        self.frequency_override = Some(frequency);
        self
    }

    pub fn seconds_per_beat(&self) -> f64 {
        60.0 / self.bpm
    }

    pub fn start_seconds(&self) -> f64 {
        self.start_beat * self.seconds_per_beat()
    }

    pub fn duration_seconds(&self) -> f64 {
        self.duration_beats * self.seconds_per_beat()
    }

    pub fn frequency(&self) -> f32 {
        self.frequency_override.unwrap_or_else(|| midi_to_frequency(self.midi_note))
    }

    pub fn velocity_unit(&self) -> f32 {
        self.velocity as f32 / 127.0
    }

    pub fn instrument_name(&self) -> Option<&str> {
        self.instrument.as_ref().map(|i| i.name.as_str())
    }
}

/// A note plus its neighbours on the same track, for patches that need
/// note-to-note context such as portamento.
#[derive(Debug, Clone)]
pub struct NoteContext {
    pub note: NoteExpression,
    pub previous: Option<NoteExpression>,
    pub next: Option<NoteExpression>,
}

impl NoteContext {
    pub fn solo(note: NoteExpression) -> Self {
        NoteContext { note, previous: None, next: None }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Song {
    pub notes: Vec<NoteExpression>,
}

impl Song {
    pub fn new(notes: Vec<NoteExpression>) -> Self {
        Song { notes }
    }

    pub fn push(&mut self, note: NoteExpression) {
        self.notes.push(note);
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// End of the last note in seconds.
    pub fn duration_seconds(&self) -> f64 {
        self.notes
            .iter()
            .map(|n| n.start_seconds() + n.duration_seconds())
            .fold(0.0, f64::max)
    }
}

pub fn midi_to_frequency(midi_note: u8) -> f32 {
    440.0 * ((midi_note as f32 - 69.0) / 12.0).exp2()
}
