//! Modulation building blocks: routed parameters, LFOs and the pitch
//! modulators (vibrato, drift) a leaf patch can carry.

use std::f32::consts::TAU;

use crate::waveform::{WaveformType, sine};

/// Where a [`ModParam`] reads its modulation value from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModSource {
    /// No modulation, the parameter is its base value.
    Constant,
    /// Note velocity, 0.0..=1.0.
    Velocity,
    /// Octaves away from middle C (MIDI 60), signed.
    KeyTrack,
    /// Seconds since note-on, saturating at `ramp` seconds and scaled to 0.0..=1.0.
    NoteTime { ramp: f32 },
}

/// Per-sample inputs a [`ModParam`] can be routed to.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModInputs {
    pub velocity: f32,
    pub midi_note: f32,
    pub time: f32,
}

/// A parameter value `base + depth * source`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModParam {
    pub base: f32,
    pub depth: f32,
    pub source: ModSource,
}

impl ModParam {
    pub fn constant(value: f32) -> Self {
        ModParam { base: value, depth: 0.0, source: ModSource::Constant }
    }

    pub fn routed(base: f32, depth: f32, source: ModSource) -> Self {
        ModParam { base, depth, source }
    }

    pub fn resolve(&self, inputs: &ModInputs) -> f32 {
        let source = match self.source {
            ModSource::Constant => return self.base,
            ModSource::Velocity => inputs.velocity,
            ModSource::KeyTrack => (inputs.midi_note - 60.0) / 12.0,
            ModSource::NoteTime { ramp } => {
                if ramp <= 0.0 { 1.0 } else { (inputs.time / ramp).min(1.0) }
            }
        };
        self.base + self.depth * source
    }
}

impl From<f32> for ModParam {
    fn from(value: f32) -> Self {
        ModParam::constant(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LfoShape {
    Sine,
    Triangle,
}

/// What an LFO's output is added to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LfoTarget {
    /// Cents.
    Pitch,
    /// Octaves of cutoff shift, consumed by filter effects.
    FilterCutoff,
    /// Fractional gain, applied as `sample * (1 + value)`.
    Amplitude,
    /// Added to the voice pan before clamping.
    Pan,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lfo {
    pub target: LfoTarget,
    pub rate_hz: f32,
    pub depth: f32,
    pub shape: LfoShape,
    /// Scale depth by note velocity.
    pub velocity_scaled: bool,
}

impl Lfo {
    pub fn new(target: LfoTarget, rate_hz: f32, depth: f32) -> Self {
        Lfo { target, rate_hz, depth, shape: LfoShape::Sine, velocity_scaled: false }
    }

    pub fn with_shape(mut self, shape: LfoShape) -> Self {
        self.shape = shape;
        self
    }

    pub fn velocity_scaled(mut self) -> Self {
        self.velocity_scaled = true;
        self
    }
}

/// Summed LFO contributions for one sample.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LfoFrame {
    pub pitch_cents: f32,
    pub cutoff_octaves: f32,
    pub amplitude: f32,
    pub pan: f32,
}

/// Running phases for a voice's LFO list.
#[derive(Debug, Clone)]
pub struct LfoBank {
    lfos: Vec<Lfo>,
    phases: Vec<f32>,
    depth_scale: Vec<f32>,
    inv_sample_rate: f32,
}

impl LfoBank {
    pub fn new(lfos: &[Lfo], velocity: f32, sample_rate: f32) -> Self {
        LfoBank {
            lfos: lfos.to_vec(),
            phases: vec![0.0; lfos.len()],
            depth_scale: lfos
                .iter()
                .map(|lfo| if lfo.velocity_scaled { velocity } else { 1.0 })
                .collect(),
            inv_sample_rate: 1.0 / sample_rate,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lfos.is_empty()
    }

    pub fn next(&mut self) -> LfoFrame {
        let mut frame = LfoFrame::default();
        for ((lfo, phase), scale) in self.lfos.iter().zip(self.phases.iter_mut()).zip(&self.depth_scale) {
            let value = match lfo.shape {
                LfoShape::Sine => sine(*phase * TAU),
                LfoShape::Triangle => WaveformType::Triangle.periodic_sample(*phase * TAU),
            } * lfo.depth
                * scale;

            match lfo.target {
                LfoTarget::Pitch => frame.pitch_cents += value,
                LfoTarget::FilterCutoff => frame.cutoff_octaves += value,
                LfoTarget::Amplitude => frame.amplitude += value,
                LfoTarget::Pan => frame.pan += value,
            }

            *phase = (*phase + lfo.rate_hz * self.inv_sample_rate).rem_euclid(1.0);
        }
        frame
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VibratoConfig {
    pub rate_hz: f32,
    pub depth_cents: f32,
    /// Seconds before the vibrato fades in.
    pub delay: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchDriftConfig {
    pub rate_hz: f32,
    pub depth_cents: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubOscillatorConfig {
    pub octave_offset: i32,
    pub level: f32,
    /// Non periodic shapes fall back to sine.
    pub waveform: WaveformType,
}

impl SubOscillatorConfig {
    pub fn frequency_ratio(&self) -> f32 {
        2.0_f32.powi(self.octave_offset)
    }
}

/// Short white-noise burst mixed over the attack.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransientConfig {
    pub duration: f32,
    pub level: f32,
}

/// Slow pitch wander: a sine at `rate_hz` starting from a random phase.
#[derive(Debug, Clone)]
pub struct PitchDrift {
    config: PitchDriftConfig,
    phase: f32,
    step: f32,
}

impl PitchDrift {
    pub fn new(config: PitchDriftConfig, sample_rate: f32) -> Self {
        PitchDrift {
            config,
            phase: fastrand::f32() * TAU,
            step: TAU * config.rate_hz / sample_rate,
        }
    }

    pub fn next_cents(&mut self) -> f32 {
        let cents = sine(self.phase) * self.config.depth_cents;
        self.phase = (self.phase + self.step) % TAU;
        cents
    }
}

#[derive(Debug, Clone)]
pub struct Vibrato {
    config: VibratoConfig,
    phase: f32,
    step: f32,
}

impl Vibrato {
    pub fn new(config: VibratoConfig, sample_rate: f32) -> Self {
        Vibrato { config, phase: 0.0, step: TAU * config.rate_hz / sample_rate }
    }

    pub fn next_cents(&mut self, time: f32) -> f32 {
        let cents = if time < self.config.delay {
            0.0
        } else {
            sine(self.phase) * self.config.depth_cents
        };
        self.phase = (self.phase + self.step) % TAU;
        cents
    }
}

/// `frequency * 2^(cents / 1200)`.
#[inline]
pub fn apply_cents(frequency: f32, cents: f32) -> f32 {
    if cents == 0.0 { frequency } else { frequency * (cents / 1200.0).exp2() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mod_param_routes() {
        let inputs = ModInputs { velocity: 0.5, midi_note: 72.0, time: 0.25 };
        assert_eq!(ModParam::constant(3.0).resolve(&inputs), 3.0);
        assert_eq!(ModParam::routed(100.0, 50.0, ModSource::Velocity).resolve(&inputs), 125.0);
        assert_eq!(ModParam::routed(1.0, 1.0, ModSource::KeyTrack).resolve(&inputs), 2.0);
        assert_eq!(ModParam::routed(0.0, 1.0, ModSource::NoteTime { ramp: 0.5 }).resolve(&inputs), 0.5);
    }

    #[test]
    fn lfo_bank_routes_to_targets() {
        let lfos = [
            Lfo::new(LfoTarget::Pitch, 5.0, 10.0),
            Lfo::new(LfoTarget::Pan, 1.0, 0.5).with_shape(LfoShape::Triangle),
        ];
        let mut bank = LfoBank::new(&lfos, 1.0, 1000.0);
        // triangle starts at its trough, sine at zero
        let first = bank.next();
        assert!(first.pitch_cents.abs() < 1e-4);
        assert!((first.pan + 0.5).abs() < 1e-4);
        assert_eq!(first.amplitude, 0.0);
        for _ in 0..49 {
            bank.next();
        }
        // quarter of a 5 Hz cycle at 1 kHz
        assert!((bank.next().pitch_cents - 10.0).abs() < 0.01);
    }

    #[test]
    fn velocity_scales_depth() {
        let lfos = [Lfo::new(LfoTarget::Amplitude, 250.0, 1.0).velocity_scaled()];
        let mut bank = LfoBank::new(&lfos, 0.5, 1000.0);
        bank.next();
        assert!((bank.next().amplitude - 0.5).abs() < 1e-4);
    }

    #[test]
    fn negative_rate_stays_in_range() {
        let lfos = [Lfo::new(LfoTarget::Amplitude, -3.0, 1.0).with_shape(LfoShape::Triangle)];
        let mut bank = LfoBank::new(&lfos, 1.0, 1000.0);
        for _ in 0..2000 {
            let value = bank.next().amplitude;
            assert!((-1.0..=1.0).contains(&value), "{value}");
        }
    }

    #[test]
    fn cents_convert_to_ratio() {
        assert!((apply_cents(440.0, 1200.0) - 880.0).abs() < 1e-3);
        assert!((apply_cents(440.0, -1200.0) - 220.0).abs() < 1e-3);
    }
}
