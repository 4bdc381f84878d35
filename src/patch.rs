//! Patch trees. A [`SynthPatch`] leaf describes one voice; composite
//! [`Patch`] variants fan a note out to several leaves with per-child
//! pitch, volume and pan adjustments.

use std::ops::RangeInclusive;
use std::sync::Arc;

use crate::controls::MasterControls;
use crate::effects::{EffectSpec, ReverbParams};
use crate::envelope::Adsr;
use crate::error::{Result, SynthError};
use crate::modulation::{Lfo, PitchDriftConfig, SubOscillatorConfig, TransientConfig, VibratoConfig, apply_cents};
use crate::note::NoteContext;
use crate::pool::Lease;
use crate::voice::SynthSignalSource;
use crate::waveform::WaveformType;

#[derive(Debug, Clone, PartialEq)]
pub struct SynthPatch {
    pub waveform: WaveformType,
    pub volume: f32,
    pub pan: f32,
    pub sub_oscillator: Option<SubOscillatorConfig>,
    pub drift: Option<PitchDriftConfig>,
    pub vibrato: Option<VibratoConfig>,
    pub transient: Option<TransientConfig>,
    pub effects: Vec<EffectSpec>,
    pub lfos: Vec<Lfo>,
    pub key_range: Option<RangeInclusive<u8>>,
}

impl SynthPatch {
    pub fn builder(waveform: WaveformType) -> SynthPatchBuilder {
        SynthPatchBuilder {
            patch: SynthPatch {
                waveform,
                volume: 1.0,
                pan: 0.0,
                sub_oscillator: None,
                drift: None,
                vibrato: None,
                transient: None,
                effects: Vec::new(),
                lfos: Vec::new(),
                key_range: None,
            },
        }
    }

    /// Exactly one envelope effect is required.
    pub fn validate(&self) -> Result<()> {
        match self.effects.iter().filter(|e| e.is_envelope()).count() {
            0 => Err(SynthError::MissingEnvelope),
            1 => Ok(()),
            n => Err(SynthError::MultipleEnvelopes(n)),
        }
    }

    pub fn envelope(&self) -> Option<&Adsr> {
        self.effects.iter().find_map(|e| match e {
            EffectSpec::Envelope(adsr) => Some(adsr),
            _ => None,
        })
    }

    pub fn is_playable(&self, midi_note: u8) -> bool {
        self.key_range.as_ref().is_none_or(|range| range.contains(&midi_note))
    }
}

pub struct SynthPatchBuilder {
    patch: SynthPatch,
}

impl SynthPatchBuilder {
    pub fn volume(mut self, volume: f32) -> Self {
        self.patch.volume = volume.clamp(0.0, 1.0);
        self
    }

    pub fn pan(mut self, pan: f32) -> Self {
        self.patch.pan = pan.clamp(-1.0, 1.0);
        self
    }

    pub fn envelope(mut self, adsr: Adsr) -> Self {
        self.patch.effects.push(EffectSpec::Envelope(adsr));
        self
    }

    pub fn effect(mut self, effect: EffectSpec) -> Self {
        self.patch.effects.push(effect);
        self
    }

    pub fn lfo(mut self, lfo: Lfo) -> Self {
        self.patch.lfos.push(lfo);
        self
    }

    pub fn sub_oscillator(mut self, config: SubOscillatorConfig) -> Self {
        self.patch.sub_oscillator = Some(config);
        self
    }

    pub fn drift(mut self, config: PitchDriftConfig) -> Self {
        self.patch.drift = Some(config);
        self
    }

    pub fn vibrato(mut self, config: VibratoConfig) -> Self {
        self.patch.vibrato = Some(config);
        self
    }

    pub fn transient(mut self, config: TransientConfig) -> Self {
        self.patch.transient = Some(config);
        self
    }

    pub fn key_range(mut self, range: RangeInclusive<u8>) -> Self {
        self.patch.key_range = Some(range);
        self
    }

    pub fn build(self) -> Result<SynthPatch> {
        self.patch.validate()?;
        Ok(self.patch)
    }

    /// Build straight into a single-leaf [`Patch`].
    pub fn into_patch(self) -> Result<Patch> {
        self.build().map(Patch::Synth)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub patch: Patch,
    pub volume: f32,
    pub pan: f32,
    pub transpose_semitones: f32,
}

impl Layer {
    pub fn new(patch: Patch) -> Self {
        Layer { patch, volume: 1.0, pan: 0.0, transpose_semitones: 0.0 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
    Synth(SynthPatch),
    /// Detuned copies spread across the stereo field.
    Unison { inner: Box<Patch>, voices: usize, detune_cents: f32, pan_spread: f32 },
    /// One copy per interval, in semitones above the note.
    PowerChord { inner: Box<Patch>, intervals: Vec<f32> },
    Layered { layers: Vec<Layer> },
    /// Dry copy at `1 - wet`, reverberated copy at `wet`.
    Reverb { inner: Box<Patch>, params: ReverbParams },
}

/// Shared inputs for spawning all voices of one note.
#[derive(Clone)]
pub struct SpawnContext {
    pub sample_rate: f32,
    pub controls: Arc<MasterControls>,
    pub note: Arc<NoteContext>,
    pub lease: Lease,
}

/// Accumulated adjustments from the composite nodes above a leaf.
#[derive(Debug, Clone)]
pub struct VoiceShape {
    pub volume: f32,
    pub pan: f32,
    pub extra_effects: Vec<EffectSpec>,
}

impl Default for VoiceShape {
    fn default() -> Self {
        VoiceShape { volume: 1.0, pan: 0.0, extra_effects: Vec::new() }
    }
}

impl VoiceShape {
    fn scaled(&self, volume: f32, pan: f32) -> Self {
        VoiceShape {
            volume: self.volume * volume,
            pan: (self.pan + pan).clamp(-1.0, 1.0),
            extra_effects: self.extra_effects.clone(),
        }
    }
}

impl Patch {
    pub fn unison(inner: Patch, voices: usize, detune_cents: f32, pan_spread: f32) -> Result<Patch> {
        if voices == 0 {
            return Err(SynthError::InvalidPatch("unison needs at least one voice".to_string()));
        }
        inner.validate()?;
        Ok(Patch::Unison { inner: Box::new(inner), voices, detune_cents, pan_spread })
    }

    pub fn power_chord(inner: Patch, intervals: Vec<f32>) -> Result<Patch> {
        if intervals.is_empty() {
            return Err(SynthError::InvalidPatch("power chord needs at least one interval".to_string()));
        }
        inner.validate()?;
        Ok(Patch::PowerChord { inner: Box::new(inner), intervals })
    }

    pub fn layered(layers: Vec<Layer>) -> Result<Patch> {
        if layers.is_empty() {
            return Err(SynthError::InvalidPatch("layered patch needs at least one layer".to_string()));
        }
        for layer in &layers {
            layer.patch.validate()?;
        }
        Ok(Patch::Layered { layers })
    }

    pub fn reverb(inner: Patch, params: ReverbParams) -> Result<Patch> {
        inner.validate()?;
        Ok(Patch::Reverb { inner: Box::new(inner), params })
    }

    /// Walk the tree; every leaf must carry exactly one envelope.
    pub fn validate(&self) -> Result<()> {
        match self {
            Patch::Synth(leaf) => leaf.validate(),
            Patch::Unison { inner, .. } | Patch::PowerChord { inner, .. } | Patch::Reverb { inner, .. } => {
                inner.validate()
            }
            Patch::Layered { layers } => {
                if layers.is_empty() {
                    return Err(SynthError::InvalidPatch("layered patch needs at least one layer".to_string()));
                }
                layers.iter().try_for_each(|layer| layer.patch.validate())
            }
        }
    }

    /// The leaf that answers shared property queries for the whole tree.
    pub fn leaf(&self) -> Option<&SynthPatch> {
        match self {
            Patch::Synth(leaf) => Some(leaf),
            Patch::Unison { inner, .. } | Patch::PowerChord { inner, .. } | Patch::Reverb { inner, .. } => {
                inner.leaf()
            }
            Patch::Layered { layers } => layers.first().and_then(|layer| layer.patch.leaf()),
        }
    }

    pub fn waveform(&self) -> Option<WaveformType> {
        self.leaf().map(|leaf| leaf.waveform)
    }

    /// True when any leaf in the tree accepts `midi_note`.
    pub fn is_playable(&self, midi_note: u8) -> bool {
        match self {
            Patch::Synth(leaf) => leaf.is_playable(midi_note),
            Patch::Unison { inner, .. } | Patch::PowerChord { inner, .. } | Patch::Reverb { inner, .. } => {
                inner.is_playable(midi_note)
            }
            Patch::Layered { layers } => layers.iter().any(|layer| layer.patch.is_playable(midi_note)),
        }
    }

    /// Create every voice this patch produces for one note.
    pub fn spawn_voices(
        &self,
        frequency: f32,
        ctx: &SpawnContext,
        out: &mut Vec<SynthSignalSource>,
    ) -> Result<()> {
        self.spawn_shaped(frequency, ctx, &VoiceShape::default(), out)
    }

    fn spawn_shaped(
        &self,
        frequency: f32,
        ctx: &SpawnContext,
        shape: &VoiceShape,
        out: &mut Vec<SynthSignalSource>,
    ) -> Result<()> {
        match self {
            Patch::Synth(leaf) => {
                if leaf.is_playable(ctx.note.note.midi_note) {
                    out.push(SynthSignalSource::new(frequency, leaf, ctx, shape)?);
                }
            }
            Patch::Unison { inner, voices, detune_cents, pan_spread } => {
                let gain = 1.0 / (*voices as f32).sqrt();
                for i in 0..*voices {
                    let spread = if *voices == 1 {
                        0.0
                    } else {
                        i as f32 / (*voices - 1) as f32 * 2.0 - 1.0
                    };
                    let child = shape.scaled(gain, spread * pan_spread);
                    inner.spawn_shaped(apply_cents(frequency, spread * detune_cents), ctx, &child, out)?;
                }
            }
            Patch::PowerChord { inner, intervals } => {
                let child = shape.scaled(1.0 / (intervals.len() as f32).sqrt(), 0.0);
                for interval in intervals {
                    inner.spawn_shaped(apply_cents(frequency, interval * 100.0), ctx, &child, out)?;
                }
            }
            Patch::Layered { layers } => {
                for layer in layers {
                    let child = shape.scaled(layer.volume, layer.pan);
                    let transposed = apply_cents(frequency, layer.transpose_semitones * 100.0);
                    layer.patch.spawn_shaped(transposed, ctx, &child, out)?;
                }
            }
            Patch::Reverb { inner, params } => {
                let wet = params.wet.clamp(0.0, 1.0);
                if wet < 1.0 {
                    inner.spawn_shaped(frequency, ctx, &shape.scaled(1.0 - wet, 0.0), out)?;
                }
                if wet > 0.0 {
                    let mut wet_shape = shape.scaled(wet, 0.0);
                    wet_shape
                        .extra_effects
                        .push(EffectSpec::Reverb(ReverbParams { wet: 1.0, ..params.clone() }));
                    inner.spawn_shaped(frequency, ctx, &wet_shape, out)?;
                }
            }
        }
        Ok(())
    }
}

impl From<SynthPatch> for Patch {
    fn from(leaf: SynthPatch) -> Self {
        Patch::Synth(leaf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::note::NoteExpression;

    fn sine() -> Patch {
        SynthPatch::builder(WaveformType::Sine).envelope(Adsr::gate()).into_patch().unwrap()
    }

    fn ctx() -> SpawnContext {
        SpawnContext {
            sample_rate: 44_100.0,
            controls: Arc::new(MasterControls::default()),
            note: Arc::new(NoteContext::solo(NoteExpression::new(69, 127, 0.0, 1.0))),
            lease: Lease::detached(),
        }
    }

    #[test]
    fn leaf_without_envelope_fails_fast() {
        let result = SynthPatch::builder(WaveformType::Sine).build();
        assert!(matches!(result, Err(SynthError::MissingEnvelope)));

        let twice = SynthPatch::builder(WaveformType::Sine)
            .envelope(Adsr::gate())
            .envelope(Adsr::pad())
            .build();
        assert!(matches!(twice, Err(SynthError::MultipleEnvelopes(2))));
    }

    #[test]
    fn composite_rejects_leaf_without_envelope() {
        let bare = Patch::Synth(SynthPatch {
            effects: Vec::new(),
            ..sine().leaf().unwrap().clone()
        });
        assert!(matches!(Patch::unison(bare.clone(), 3, 10.0, 0.5), Err(SynthError::MissingEnvelope)));
        assert!(matches!(Patch::layered(vec![Layer::new(bare)]), Err(SynthError::MissingEnvelope)));
    }

    #[test]
    fn composites_fan_out() {
        let mut voices = Vec::new();
        Patch::unison(sine(), 3, 10.0, 0.5).unwrap().spawn_voices(440.0, &ctx(), &mut voices).unwrap();
        assert_eq!(voices.len(), 3);

        voices.clear();
        let chord = Patch::power_chord(sine(), vec![0.0, 7.0, 12.0]).unwrap();
        chord.spawn_voices(440.0, &ctx(), &mut voices).unwrap();
        let frequencies: Vec<f32> = voices.iter().map(|v| v.frequency()).collect();
        assert!((frequencies[2] - 880.0).abs() < 1e-2);

        voices.clear();
        let wet = Patch::reverb(sine(), ReverbParams { wet: 0.4, ..ReverbParams::default() }).unwrap();
        wet.spawn_voices(440.0, &ctx(), &mut voices).unwrap();
        assert_eq!(voices.len(), 2);
    }

    #[test]
    fn unison_spreads_detune_and_pan() {
        let mut voices = Vec::new();
        Patch::unison(sine(), 3, 100.0, 1.0).unwrap().spawn_voices(440.0, &ctx(), &mut voices).unwrap();
        let pans: Vec<f32> = voices.iter().map(|v| v.sample_pan()).collect();
        assert_eq!(pans, vec![-1.0, 0.0, 1.0]);
        assert!(voices[0].frequency() < 440.0 && voices[2].frequency() > 440.0);
    }

    #[test]
    fn key_range_limits_playability() {
        let patch = SynthPatch::builder(WaveformType::Sine)
            .envelope(Adsr::gate())
            .key_range(36..=48)
            .into_patch()
            .unwrap();
        assert!(patch.is_playable(40));
        assert!(!patch.is_playable(69));
        let layered = Patch::layered(vec![Layer::new(patch)]).unwrap();
        assert!(!layered.is_playable(69));
    }

    #[test]
    fn split_layers_spawn_only_matching_leaf() {
        let ranged = |range: RangeInclusive<u8>| {
            SynthPatch::builder(WaveformType::Sine).envelope(Adsr::gate()).key_range(range).into_patch().unwrap()
        };
        let split = Patch::layered(vec![Layer::new(ranged(28..=55)), Layer::new(ranged(56..=90))]).unwrap();
        assert!(split.is_playable(40));
        assert!(split.is_playable(70));
        assert!(!split.is_playable(100));

        for midi in [40, 70] {
            let ctx = SpawnContext {
                note: Arc::new(NoteContext::solo(NoteExpression::new(midi, 127, 0.0, 1.0))),
                ..ctx()
            };
            let mut voices = Vec::new();
            split.spawn_voices(440.0, &ctx, &mut voices).unwrap();
            assert_eq!(voices.len(), 1, "note {midi}");
        }
    }
}
