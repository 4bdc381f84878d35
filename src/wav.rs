use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::config::CHANNELS;
use crate::error::Result;

/// Interleaved stereo floats to 16-bit PCM.
pub struct WavSink {
    writer: WavWriter<BufWriter<File>>,
    floats_written: u64,
}

impl WavSink {
    pub fn create(path: &Path, sample_rate: u32) -> Result<Self> {
        let spec = WavSpec {
            channels: CHANNELS as u16,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        Ok(WavSink { writer: WavWriter::create(path, spec)?, floats_written: 0 })
    }

    pub fn write(&mut self, samples: &[f32]) -> Result<()> {
        for sample in samples {
            self.writer.write_sample(to_pcm16(*sample))?;
        }
        self.floats_written += samples.len() as u64;
        Ok(())
    }

    pub fn write_silence(&mut self, frames: u64) -> Result<()> {
        for _ in 0..frames * CHANNELS as u64 {
            self.writer.write_sample(0i16)?;
        }
        self.floats_written += frames * CHANNELS as u64;
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.floats_written / CHANNELS as u64
    }

    pub fn finalize(self) -> Result<()> {
        self.writer.finalize()?;
        Ok(())
    }
}

#[inline]
pub fn to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_conversion_clamps() {
        assert_eq!(to_pcm16(0.0), 0);
        assert_eq!(to_pcm16(1.5), i16::MAX);
        assert_eq!(to_pcm16(-2.0), -i16::MAX);
        assert_eq!(to_pcm16(0.5), 16384);
    }

    #[test]
    fn sink_writes_header_and_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let mut sink = WavSink::create(&path, 22_050).unwrap();
        sink.write(&[0.25, -0.25, 1.0, -1.0]).unwrap();
        sink.write_silence(3).unwrap();
        assert_eq!(sink.frames_written(), 5);
        sink.finalize().unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 22_050);
        assert_eq!(spec.bits_per_sample, 16);
        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 10);
        assert_eq!(&samples[..4], &[8192, -8192, i16::MAX, -i16::MAX]);
        assert!(samples[4..].iter().all(|s| *s == 0));
    }
}
