use std::collections::VecDeque;
use std::f32::consts::TAU;

use crate::envelope::Adsr;
use crate::modulation::{ModInputs, ModParam};
use crate::note::NoteContext;

#[derive(Debug, Clone, PartialEq)]
pub struct ReverbParams {
    pub room_size: f32,
    pub damping: f32,
    pub wet: f32,
}

impl Default for ReverbParams {
    fn default() -> Self {
        ReverbParams {
            room_size: 0.5,
            damping: 0.5,
            wet: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DelayParams {
    pub time: f32,
    pub feedback: f32,
    pub wet: f32,
}

impl Default for DelayParams {
    fn default() -> Self {
        DelayParams {
            time: 0.25,
            feedback: 0.4,
            wet: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DistortionParams {
    pub drive: ModParam,
    pub tone: f32,
    pub wet: f32,
}

impl Default for DistortionParams {
    fn default() -> Self {
        DistortionParams {
            drive: ModParam::constant(2.0),
            tone: 0.7,
            wet: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterParams {
    pub cutoff: ModParam, // Hz, before LFO cutoff shift
    pub resonance: f32,   // Q factor
    pub filter_type: FilterType,
}

impl Default for FilterParams {
    fn default() -> Self {
        FilterParams {
            cutoff: ModParam::constant(1000.0),
            resonance: std::f32::consts::FRAC_1_SQRT_2,
            filter_type: FilterType::LowPass,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    LowPass,
    HighPass,
    BandPass,
}

/// Declarative effect description held by a patch. Each voice builds its
/// own stateful [`Effect`] from it.
#[derive(Debug, Clone, PartialEq)]
pub enum EffectSpec {
    Envelope(Adsr),
    Filter(FilterParams),
    Distortion(DistortionParams),
    Delay(DelayParams),
    Reverb(ReverbParams),
    Gain(ModParam),
    /// Ramp pitch by `cents` over `duration` seconds, then hold.
    PitchBend { cents: f32, duration: f32 },
    /// Glide in from the previous note of the same track over `glide` seconds.
    Portamento { glide: f32 },
}

impl EffectSpec {
    pub fn is_envelope(&self) -> bool {
        matches!(self, EffectSpec::Envelope(_))
    }

    pub fn is_pitch_mod(&self) -> bool {
        matches!(self, EffectSpec::PitchBend { .. } | EffectSpec::Portamento { .. })
    }

    /// The envelope is owned by the voice directly, so it builds to `None`.
    pub fn build(&self, sample_rate: f32) -> Option<Box<dyn Effect>> {
        let effect: Box<dyn Effect> = match self {
            EffectSpec::Envelope(_) => return None,
            EffectSpec::Filter(params) => Box::new(BiquadFilter::new(params.clone(), sample_rate)),
            EffectSpec::Distortion(params) => Box::new(Distortion::new(params.clone())),
            EffectSpec::Delay(params) => Box::new(Delay::new(params.clone(), sample_rate)),
            EffectSpec::Reverb(params) => Box::new(Reverb::new(params.clone(), sample_rate)),
            EffectSpec::Gain(amount) => Box::new(Gain { amount: *amount }),
            EffectSpec::PitchBend { cents, duration } => {
                Box::new(PitchBend { cents: *cents, duration: *duration })
            }
            EffectSpec::Portamento { glide } => Box::new(Portamento { glide: *glide, from_cents: None }),
        };
        Some(effect)
    }
}

/// What every pipeline stage sees besides the running sample.
pub struct EffectContext<'a> {
    /// Raw oscillator output for this frame.
    pub input: f32,
    pub frame_index: u64,
    /// Seconds since the voice started.
    pub time: f32,
    pub note: &'a NoteContext,
    pub frequency: f32,
    pub mod_inputs: ModInputs,
    /// Summed cutoff LFO for this frame, in octaves.
    pub cutoff_octaves: f32,
}

pub trait Effect: Send {
    fn process(&mut self, sample: f32, ctx: &EffectContext) -> f32;

    /// Pitch contribution in cents, queried before the oscillator runs.
    fn pitch_offset_cents(&mut self, _ctx: &EffectContext) -> f32 {
        0.0
    }
}

pub struct BiquadFilter {
    params: FilterParams,
    sample_rate: f32,
    coefficients: [f32; 5], // b0, b1, b2, a1, a2 normalised by a0
    last_cutoff: f32,
    x: (f32, f32),
    y: (f32, f32),
}

impl BiquadFilter {
    pub fn new(params: FilterParams, sample_rate: f32) -> Self {
        BiquadFilter {
            params,
            sample_rate,
            coefficients: [1.0, 0.0, 0.0, 0.0, 0.0],
            last_cutoff: f32::NAN,
            x: (0.0, 0.0),
            y: (0.0, 0.0),
        }
    }

    fn update_coefficients(&mut self, cutoff: f32) {
        let nyquist = self.sample_rate * 0.49;
        let cutoff = cutoff.clamp(10.0, nyquist);
        if cutoff == self.last_cutoff {
            return;
        }
        self.last_cutoff = cutoff;

        let omega = TAU * cutoff / self.sample_rate;
        let cos_omega = omega.cos();
        let alpha = omega.sin() / (2.0 * self.params.resonance.max(0.05));

        let (b0, b1, b2) = match self.params.filter_type {
            FilterType::LowPass => ((1.0 - cos_omega) / 2.0, 1.0 - cos_omega, (1.0 - cos_omega) / 2.0),
            FilterType::HighPass => ((1.0 + cos_omega) / 2.0, -(1.0 + cos_omega), (1.0 + cos_omega) / 2.0),
            FilterType::BandPass => (alpha, 0.0, -alpha),
        };
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_omega;
        let a2 = 1.0 - alpha;

        self.coefficients = [b0 / a0, b1 / a0, b2 / a0, a1 / a0, a2 / a0];
    }
}

impl Effect for BiquadFilter {
    fn process(&mut self, sample: f32, ctx: &EffectContext) -> f32 {
        let cutoff = self.params.cutoff.resolve(&ctx.mod_inputs) * ctx.cutoff_octaves.exp2();
        self.update_coefficients(cutoff);

        let [b0, b1, b2, a1, a2] = self.coefficients;
        let output = b0 * sample + b1 * self.x.0 + b2 * self.x.1 - a1 * self.y.0 - a2 * self.y.1;

        self.x = (sample, self.x.0);
        self.y = (output, self.y.0);
        output
    }
}

pub struct Distortion {
    params: DistortionParams,
    lowpass_state: f32,
}

impl Distortion {
    pub fn new(params: DistortionParams) -> Self {
        Distortion { params, lowpass_state: 0.0 }
    }
}

impl Effect for Distortion {
    fn process(&mut self, sample: f32, ctx: &EffectContext) -> f32 {
        let driven = sample * self.params.drive.resolve(&ctx.mod_inputs);
        let distorted = if driven > 1.0 {
            2.0 / 3.0
        } else if driven < -1.0 {
            -2.0 / 3.0
        } else {
            driven - (driven.powi(3) / 3.0)
        };

        let alpha = 1.0 - self.params.tone;
        self.lowpass_state = self.lowpass_state * alpha + distorted * (1.0 - alpha);

        sample * (1.0 - self.params.wet) + self.lowpass_state * self.params.wet
    }
}

pub struct Delay {
    params: DelayParams,
    delay_samples: usize,
    buffer: VecDeque<f32>,
}

impl Delay {
    pub fn new(params: DelayParams, sample_rate: f32) -> Self {
        let delay_samples = ((params.time.max(0.0) * sample_rate).round() as usize).max(1);
        Delay {
            params,
            delay_samples,
            buffer: VecDeque::from(vec![0.0; delay_samples + 1]),
        }
    }
}

impl Effect for Delay {
    fn process(&mut self, sample: f32, _ctx: &EffectContext) -> f32 {
        let delayed = self.buffer[self.delay_samples - 1];
        cycle_buffer(&mut self.buffer, sample + delayed * self.params.feedback);
        sample * (1.0 - self.params.wet) + delayed * self.params.wet
    }
}

/// Freeverb-style: eight damped combs into four allpasses.
pub struct Reverb {
    params: ReverbParams,
    comb_buffers: Vec<VecDeque<f32>>,
    comb_filter_state: Vec<f32>,
    allpass_buffers: Vec<VecDeque<f32>>,
}

impl Reverb {
    pub fn new(params: ReverbParams, sample_rate: f32) -> Self {
        let scale = sample_rate / 44100.0;
        let sized = |length: f32| VecDeque::from(vec![0.0; ((length * scale) as usize).max(1)]);
        Reverb {
            params,
            comb_buffers: [1116.0, 1188.0, 1277.0, 1356.0, 1422.0, 1491.0, 1557.0, 1617.0]
                .into_iter()
                .map(sized)
                .collect(),
            comb_filter_state: vec![0.0; 8],
            allpass_buffers: [556.0, 441.0, 341.0, 225.0].into_iter().map(sized).collect(),
        }
    }
}

impl Effect for Reverb {
    fn process(&mut self, sample: f32, _ctx: &EffectContext) -> f32 {
        let mut output = 0.0;
        let params = &self.params;

        for (buffer, state) in self.comb_buffers.iter_mut().zip(self.comb_filter_state.iter_mut()) {
            let delayed = buffer.back().copied().unwrap_or(0.0);
            *state = delayed * (1.0 - params.damping) + *state * params.damping;
            cycle_buffer(buffer, sample + *state * params.room_size);
            output += delayed;
        }
        output /= 8.0;

        for buffer in &mut self.allpass_buffers {
            let delayed = buffer.back().copied().unwrap_or(0.0);
            cycle_buffer(buffer, output + delayed * 0.5);
            output = delayed - output * 0.5;
        }

        sample * (1.0 - params.wet) + output * params.wet
    }
}

pub struct Gain {
    amount: ModParam,
}

impl Effect for Gain {
    fn process(&mut self, sample: f32, ctx: &EffectContext) -> f32 {
        sample * self.amount.resolve(&ctx.mod_inputs)
    }
}

pub struct PitchBend {
    cents: f32,
    duration: f32,
}

impl Effect for PitchBend {
    fn process(&mut self, sample: f32, _ctx: &EffectContext) -> f32 {
        sample
    }

    fn pitch_offset_cents(&mut self, ctx: &EffectContext) -> f32 {
        if self.duration <= 0.0 {
            self.cents
        } else {
            self.cents * (ctx.time / self.duration).min(1.0)
        }
    }
}

pub struct Portamento {
    glide: f32,
    from_cents: Option<f32>,
}

impl Effect for Portamento {
    fn process(&mut self, sample: f32, _ctx: &EffectContext) -> f32 {
        sample
    }

    fn pitch_offset_cents(&mut self, ctx: &EffectContext) -> f32 {
        let from_cents = *self.from_cents.get_or_insert_with(|| match &ctx.note.previous {
            Some(previous) => 1200.0 * (previous.frequency() / ctx.note.note.frequency()).log2(),
            None => 0.0,
        });
        if self.glide <= 0.0 || ctx.time >= self.glide {
            0.0
        } else {
            from_cents * (1.0 - ctx.time / self.glide)
        }
    }
}

#[inline]
fn cycle_buffer(buffer: &mut VecDeque<f32>, new_value: f32) {
    buffer.pop_back();
    buffer.push_front(new_value);
}
