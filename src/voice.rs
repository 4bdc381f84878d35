use std::f32::consts::TAU;
use std::sync::Arc;

use crate::config::CHANNELS;
use crate::controls::{MasterControls, effective_pan, effective_volume};
use crate::effects::{Effect, EffectContext, EffectSpec};
use crate::envelope::Envelope;
use crate::error::{Result, SynthError};
use crate::modulation::{
    LfoBank, LfoFrame, ModInputs, PitchDrift, SubOscillatorConfig, TransientConfig, Vibrato, apply_cents,
};
use crate::note::NoteContext;
use crate::oscillator::Oscillator;
use crate::patch::{SpawnContext, SynthPatch, VoiceShape};
use crate::pool::Lease;
use crate::waveform::WaveformType;

enum Stage {
    SubOscillator,
    TransientNoise,
    Effect(Box<dyn Effect>),
    Envelope,
}

struct SubOscillator {
    config: SubOscillatorConfig,
    waveform: WaveformType,
    ratio: f32,
    phase: f32,
}

/// One note's synthesis state: oscillator, modulators, effect pipeline and
/// stereo output stage. Finished once its envelope reports done.
pub struct SynthSignalSource {
    frequency: f32,
    sample_rate: f32,
    inv_sample_rate: f32,
    radians_per_sample: f32,
    oscillator: Oscillator,
    sub: Option<SubOscillator>,
    transient: Option<TransientConfig>,
    drift: Option<PitchDrift>,
    vibrato: Option<Vibrato>,
    lfos: LfoBank,
    stages: Vec<Stage>,
    has_pitch_mods: bool,
    envelope: Envelope,
    note: Arc<NoteContext>,
    controls: Arc<MasterControls>,
    controls_version: u64,
    sample_volume: f32,
    sample_pan: f32,
    effective_volume: f32,
    effective_pan: f32,
    frame_index: u64,
    lease: Lease,
    released: bool,
    done: bool,
    disposed: bool,
}

impl SynthSignalSource {
    pub fn new(frequency: f32, leaf: &SynthPatch, ctx: &SpawnContext, shape: &VoiceShape) -> Result<Self> {
        leaf.validate()?;
        if !(frequency.is_finite() && frequency > 0.0) {
            return Err(SynthError::InvalidPatch(format!("voice frequency must be positive, got {frequency}")));
        }

        let sample_rate = ctx.sample_rate;
        let velocity = ctx.note.note.velocity_unit();

        // stable: envelope to the tail, everything else keeps authored order
        let mut specs: Vec<EffectSpec> = leaf.effects.iter().chain(&shape.extra_effects).cloned().collect();
        specs.sort_by_key(EffectSpec::is_envelope);

        let adsr = leaf.envelope().copied().ok_or(SynthError::MissingEnvelope)?;
        let mut envelope = Envelope::new(adsr);
        envelope.trigger(0.0);

        let mut stages = Vec::with_capacity(specs.len() + 2);
        if leaf.sub_oscillator.is_some() {
            stages.push(Stage::SubOscillator);
        }
        if leaf.transient.is_some() {
            stages.push(Stage::TransientNoise);
        }
        for spec in &specs {
            match spec.build(sample_rate) {
                Some(effect) => stages.push(Stage::Effect(effect)),
                None => stages.push(Stage::Envelope),
            }
        }

        let mut voice = SynthSignalSource {
            frequency,
            sample_rate,
            inv_sample_rate: 1.0 / sample_rate,
            radians_per_sample: TAU * frequency / sample_rate,
            oscillator: Oscillator::new(leaf.waveform, frequency, sample_rate),
            sub: leaf.sub_oscillator.map(|config| SubOscillator {
                waveform: if config.waveform.is_periodic() { config.waveform } else { WaveformType::Sine },
                ratio: config.frequency_ratio(),
                config,
                phase: 0.0,
            }),
            transient: leaf.transient,
            drift: leaf.drift.map(|config| PitchDrift::new(config, sample_rate)),
            vibrato: leaf.vibrato.map(|config| Vibrato::new(config, sample_rate)),
            lfos: LfoBank::new(&leaf.lfos, velocity, sample_rate),
            has_pitch_mods: specs.iter().any(EffectSpec::is_pitch_mod),
            stages,
            envelope,
            note: Arc::clone(&ctx.note),
            controls: Arc::clone(&ctx.controls),
            controls_version: u64::MAX,
            sample_volume: (leaf.volume * shape.volume * velocity).clamp(0.0, 1.0),
            sample_pan: (leaf.pan + shape.pan).clamp(-1.0, 1.0),
            effective_volume: 0.0,
            effective_pan: 0.0,
            frame_index: 0,
            lease: ctx.lease.clone(),
            released: false,
            done: false,
            disposed: false,
        };
        voice.refresh_controls();
        Ok(voice)
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    pub fn sample_volume(&self) -> f32 {
        self.sample_volume
    }

    pub fn sample_pan(&self) -> f32 {
        self.sample_pan
    }

    pub fn effective_volume(&self) -> f32 {
        self.effective_volume
    }

    pub fn effective_pan(&self) -> f32 {
        self.effective_pan
    }

    pub fn note(&self) -> &NoteContext {
        &self.note
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frame_index
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn is_done(&self) -> bool {
        self.done || self.disposed
    }

    pub fn set_sample_volume(&mut self, volume: f32) {
        self.sample_volume = volume.clamp(0.0, 1.0);
        self.controls_version = u64::MAX;
        self.refresh_controls();
    }

    pub fn set_sample_pan(&mut self, pan: f32) {
        self.sample_pan = pan.clamp(-1.0, 1.0);
        self.controls_version = u64::MAX;
        self.refresh_controls();
    }

    /// Start the envelope's release tail at the voice's current time.
    /// Only the first call has an effect.
    pub fn release_note(&mut self) {
        if self.released || self.disposed {
            return;
        }
        self.released = true;
        self.envelope.release(self.time());
    }

    pub fn dispose(&mut self) {
        self.disposed = true;
        self.done = true;
        self.stages.clear();
    }

    /// Seconds since the voice started.
    pub fn time(&self) -> f32 {
        (self.frame_index as f64 / self.sample_rate as f64) as f32
    }

    /// Fill `buffer` (interleaved stereo) with the next frames. Frames past
    /// the end of the note are zeroed. Returns the number of floats written,
    /// or 0 if the voice's lease went stale.
    pub fn render(&mut self, buffer: &mut [f32]) -> usize {
        if self.disposed || !self.lease.is_valid() {
            self.dispose();
            return 0;
        }
        self.refresh_controls();

        let frames = buffer.len() / CHANNELS;
        let velocity = self.note.note.velocity_unit();
        let midi_note = self.note.note.midi_note as f32;

        for frame in 0..frames {
            let time = self.time();
            if self.done || self.envelope.is_done(time) {
                self.done = true;
                buffer[frame * CHANNELS..].fill(0.0);
                break;
            }

            let lfo = if self.lfos.is_empty() { LfoFrame::default() } else { self.lfos.next() };
            let mut ctx = EffectContext {
                input: 0.0,
                frame_index: self.frame_index,
                time,
                note: &self.note,
                frequency: self.frequency,
                mod_inputs: ModInputs { velocity, midi_note, time },
                cutoff_octaves: lfo.cutoff_octaves,
            };

            let mut cents = lfo.pitch_cents;
            if let Some(drift) = self.drift.as_mut() {
                cents += drift.next_cents();
            }
            if let Some(vibrato) = self.vibrato.as_mut() {
                cents += vibrato.next_cents(time);
            }
            if self.has_pitch_mods {
                for stage in self.stages.iter_mut() {
                    if let Stage::Effect(effect) = stage {
                        cents += effect.pitch_offset_cents(&ctx);
                    }
                }
            }

            let step = if cents == 0.0 {
                self.radians_per_sample
            } else {
                TAU * apply_cents(self.frequency, cents) * self.inv_sample_rate
            };

            let raw = self.oscillator.next(step);
            ctx.input = raw;

            let mut sample = raw;
            for stage in self.stages.iter_mut() {
                match stage {
                    Stage::SubOscillator => {
                        if let Some(sub) = self.sub.as_mut() {
                            sample += sub.waveform.periodic_sample(sub.phase) * sub.config.level;
                            sub.phase += step * sub.ratio;
                            if sub.phase >= TAU {
                                sub.phase -= TAU * (sub.phase / TAU).floor();
                            }
                        }
                    }
                    Stage::TransientNoise => {
                        if let Some(transient) = self.transient {
                            if time < transient.duration {
                                let fade = 1.0 - time / transient.duration;
                                sample += (fastrand::f32() * 2.0 - 1.0) * transient.level * fade;
                            }
                        }
                    }
                    Stage::Effect(effect) => sample = effect.process(sample, &ctx),
                    Stage::Envelope => sample *= self.envelope.level(time),
                }
            }

            sample *= 1.0 + lfo.amplitude;
            let pan = (self.effective_pan + lfo.pan).clamp(-1.0, 1.0);
            let left = (sample * (1.0 - pan) * self.effective_volume).clamp(-1.0, 1.0);
            let right = (sample * (1.0 + pan) * self.effective_volume).clamp(-1.0, 1.0);

            buffer[frame * CHANNELS] = left;
            buffer[frame * CHANNELS + 1] = right;
            self.frame_index += 1;
        }

        frames * CHANNELS
    }

    fn refresh_controls(&mut self) {
        let version = self.controls.version();
        if version == self.controls_version {
            return;
        }
        self.controls_version = version;
        self.effective_volume = effective_volume(self.controls.volume(), self.sample_volume);
        self.effective_pan = effective_pan(self.controls.pan(), self.sample_pan);
    }
}
