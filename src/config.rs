use std::str::FromStr;

use crate::error::{Result, SynthError};

/// Interleaved output channel count. Every buffer in the crate is stereo.
pub const CHANNELS: usize = 2;

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
pub const DEFAULT_BLOCK_FRAMES: usize = 512;
pub const DEFAULT_CACHE_MAX_BYTES: usize = 800 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub block_frames: usize, // frames pulled per read() by offline renderers
}

impl Default for AudioConfig {
    fn default() -> Self {
        AudioConfig {
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_frames: DEFAULT_BLOCK_FRAMES,
        }
    }
}

impl AudioConfig {
    /// Defaults overridden by `CHIME_SAMPLE_RATE` and `CHIME_BLOCK_FRAMES`.
    pub fn from_env() -> Result<Self> {
        let mut config = AudioConfig::default();
        if let Some(rate) = env_value::<u32>("CHIME_SAMPLE_RATE")? {
            config.sample_rate = rate;
        }
        if let Some(frames) = env_value::<usize>("CHIME_BLOCK_FRAMES")? {
            config.block_frames = frames;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(SynthError::Config("sample rate must be positive".to_string()));
        }
        if self.block_frames == 0 {
            return Err(SynthError::Config("block size must be positive".to_string()));
        }
        Ok(())
    }

    pub fn seconds_to_frames(&self, seconds: f64) -> u64 {
        (seconds.max(0.0) * self.sample_rate as f64).round() as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreRenderConfig {
    pub audio: AudioConfig,
    pub max_bytes: usize,
    pub workers: usize,
}

impl Default for PreRenderConfig {
    fn default() -> Self {
        PreRenderConfig {
            audio: AudioConfig::default(),
            max_bytes: DEFAULT_CACHE_MAX_BYTES,
            workers: default_worker_count(),
        }
    }
}

impl PreRenderConfig {
    /// Defaults overridden by `CHIME_CACHE_MAX_BYTES` and `CHIME_PRERENDER_WORKERS`,
    /// on top of [`AudioConfig::from_env`].
    pub fn from_env() -> Result<Self> {
        let mut config = PreRenderConfig {
            audio: AudioConfig::from_env()?,
            ..PreRenderConfig::default()
        };
        if let Some(bytes) = env_value::<usize>("CHIME_CACHE_MAX_BYTES")? {
            config.max_bytes = bytes;
        }
        if let Some(workers) = env_value::<usize>("CHIME_PRERENDER_WORKERS")? {
            if workers == 0 {
                return Err(SynthError::Config("CHIME_PRERENDER_WORKERS must be at least 1".to_string()));
            }
            config.workers = workers;
        }
        Ok(config)
    }
}

/// One worker per spare core, at least one and never more than six.
pub fn default_worker_count() -> usize {
    num_cpus::get().saturating_sub(1).clamp(1, 6)
}

fn env_value<T: FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| SynthError::Config(format!("{key} has an invalid value: {raw:?}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_is_bounded() {
        let workers = default_worker_count();
        assert!((1..=6).contains(&workers));
    }

    #[test]
    fn zero_sample_rate_is_rejected() {
        let config = AudioConfig { sample_rate: 0, ..AudioConfig::default() };
        assert!(matches!(config.validate(), Err(SynthError::Config(_))));
    }

    #[test]
    fn seconds_round_to_nearest_frame() {
        let config = AudioConfig::default();
        assert_eq!(config.seconds_to_frames(0.5), 22_050);
        assert_eq!(config.seconds_to_frames(-1.0), 0);
    }
}
