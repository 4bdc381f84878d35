use std::f32::consts::TAU;

use crate::waveform::WaveformType;

const PLUCK_DAMPING: f32 = 0.996;
const PLUCK_JITTER: f32 = 0.0001;
const DENORMAL_FLOOR: f32 = 1.0e-20;

#[inline]
fn white() -> f32 {
    fastrand::f32() * 2.0 - 1.0
}

/// Running filter state for the coloured noise shapes. One per voice.
#[derive(Debug, Clone, Default)]
pub struct NoiseState {
    pink: [f32; 3],
    brown: f32,
    previous: f32,
    previous2: f32,
    held: f32,
    hold_remaining: usize,
}

impl NoiseState {
    /// Paul Kellet's economy pink filter: three leaky poles over white noise.
    pub fn pink(&mut self) -> f32 {
        let w = white();
        self.pink[0] = 0.99765 * self.pink[0] + w * 0.0990460;
        self.pink[1] = 0.96300 * self.pink[1] + w * 0.2965164;
        self.pink[2] = 0.57000 * self.pink[2] + w * 1.0526913;
        (self.pink[0] + self.pink[1] + self.pink[2] + w * 0.1848) * 0.11
    }

    pub fn brown(&mut self) -> f32 {
        self.brown = ((self.brown + 0.02 * white()) / 1.02).clamp(-1.0, 1.0);
        (self.brown * 3.5).clamp(-1.0, 1.0)
    }

    pub fn blue(&mut self) -> f32 {
        let w = white();
        let out = ((w - self.previous) * 2.0).clamp(-1.0, 1.0);
        self.previous = w;
        out
    }

    pub fn violet(&mut self) -> f32 {
        let w = white();
        let out = ((w - 2.0 * self.previous + self.previous2) * 4.0).clamp(-1.0, 1.0);
        self.previous2 = self.previous;
        self.previous = w;
        out
    }

    /// Holds one random value for `period` samples.
    pub fn sample_and_hold(&mut self, period: usize) -> f32 {
        if self.hold_remaining == 0 {
            self.held = white();
            self.hold_remaining = period.max(1);
        }
        self.hold_remaining -= 1;
        self.held
    }
}

/// Karplus-Strong string: a noise-filled delay line averaged tap to tap.
#[derive(Debug, Clone)]
pub struct PluckString {
    line: Vec<f32>,
    index: usize,
}

impl PluckString {
    pub fn new(frequency: f32, sample_rate: f32) -> Self {
        let len = ((sample_rate / frequency.max(1.0)).round() as usize).max(2);
        PluckString {
            line: (0..len).map(|_| white()).collect(),
            index: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.line.len()
    }

    pub fn next(&mut self) -> f32 {
        let len = self.line.len();
        let out = self.line[self.index];
        let following = self.line[(self.index + 1) % len];
        let damping = PLUCK_DAMPING + (fastrand::f32() * 2.0 - 1.0) * PLUCK_JITTER;
        let mut fed_back = (out + following) * 0.5 * damping;
        if fed_back.abs() < DENORMAL_FLOOR {
            fed_back = 0.0;
        }
        self.line[self.index] = fed_back;
        self.index = (self.index + 1) % len;
        out
    }
}

/// Phase accumulator plus whatever per-shape state the waveform needs.
#[derive(Debug, Clone)]
pub struct Oscillator {
    waveform: WaveformType,
    phase: f32,
    noise: NoiseState,
    pluck: Option<PluckString>,
    hold_period: usize,
}

impl Oscillator {
    pub fn new(waveform: WaveformType, frequency: f32, sample_rate: f32) -> Self {
        let pluck = (waveform == WaveformType::PluckedString)
            .then(|| PluckString::new(frequency, sample_rate));
        Oscillator {
            waveform,
            phase: 0.0,
            noise: NoiseState::default(),
            pluck,
            hold_period: ((sample_rate / frequency.max(1.0)).round() as usize).max(1),
        }
    }

    pub fn phase(&self) -> f32 {
        self.phase
    }

    pub fn pluck_len(&self) -> Option<usize> {
        self.pluck.as_ref().map(PluckString::len)
    }

    /// Produce one sample, then advance phase by `radians_per_sample`.
    pub fn next(&mut self, radians_per_sample: f32) -> f32 {
        let out = match self.waveform {
            WaveformType::Sine
            | WaveformType::Square
            | WaveformType::Triangle
            | WaveformType::Sawtooth => self.waveform.periodic_sample(self.phase),
            WaveformType::WhiteNoise => white(),
            WaveformType::PinkNoise => self.noise.pink(),
            WaveformType::BrownNoise => self.noise.brown(),
            WaveformType::BlueNoise => self.noise.blue(),
            WaveformType::VioletNoise => self.noise.violet(),
            WaveformType::SampleAndHold => self.noise.sample_and_hold(self.hold_period),
            WaveformType::PluckedString => match self.pluck.as_mut() {
                Some(string) => string.next(),
                None => 0.0,
            },
        };

        self.phase += radians_per_sample;
        if self.phase >= TAU {
            self.phase -= TAU * (self.phase / TAU).floor();
        }
        out
    }
}
