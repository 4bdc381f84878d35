use std::f32::consts::TAU;
use std::sync::LazyLock;

const SINE_TABLE_SIZE: usize = 4096;

static SINE_TABLE: LazyLock<Vec<f32>> = LazyLock::new(|| {
    (0..=SINE_TABLE_SIZE)
        .map(|i| (i as f32 / SINE_TABLE_SIZE as f32 * TAU).sin())
        .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveformType {
    Sine,
    Square,
    Triangle,
    Sawtooth,
    WhiteNoise,
    PinkNoise,
    BrownNoise,
    BlueNoise,
    VioletNoise,
    SampleAndHold,
    PluckedString,
}

impl WaveformType {
    pub fn is_periodic(&self) -> bool {
        matches!(
            self,
            WaveformType::Sine | WaveformType::Square | WaveformType::Triangle | WaveformType::Sawtooth
        )
    }

    /// Periodic shapes only; phase is in radians within [0, TAU).
    pub fn periodic_sample(&self, phase: f32) -> f32 {
        match self {
            WaveformType::Sine => sine(phase),
            WaveformType::Square => if sine(phase) >= 0.0 { 1.0 } else { -1.0 },
            WaveformType::Sawtooth => 2.0 * (phase / TAU) - 1.0,
            WaveformType::Triangle => {
                let p = phase / TAU;
                1.0 - 4.0 * (p - 0.5).abs()
            }
            _ => sine(phase),
        }
    }
}

/// Table-interpolated sine. `phase` is in radians; any value is accepted.
#[inline]
pub fn sine(phase: f32) -> f32 {
    let normalized = (phase / TAU).rem_euclid(1.0);
    let position = normalized * SINE_TABLE_SIZE as f32;
    let index = (position as usize).min(SINE_TABLE_SIZE - 1);
    let frac = position - index as f32;
    let table = &*SINE_TABLE;
    table[index] + (table[index + 1] - table[index]) * frac
}
