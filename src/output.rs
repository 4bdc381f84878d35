use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use parking_lot::Mutex;
use tracing::{error, info, trace};

use crate::config::{AudioConfig, CHANNELS};
use crate::controls::MasterControls;
use crate::error::{Result, SynthError};
use crate::mixer::{ScheduledSignalSourceMixer, SongScheduler};

/// Plays a mixer through the default output device. The mixer lives inside
/// the stream callback; songs reach it through the [`SongScheduler`].
pub struct AudioOutput {
    stream: Option<Stream>,
    stream_config: StreamConfig,
    mixer: Arc<Mutex<ScheduledSignalSourceMixer>>,
    scheduler: SongScheduler,
    controls: Arc<MasterControls>,
    paused: Arc<AtomicBool>,
}

impl AudioOutput {
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| SynthError::AudioError("No output device found".to_string()))?;
        let config = device
            .default_output_config()
            .map_err(|e| SynthError::AudioError(e.to_string()))?;
        let mut stream_config = config.config();
        stream_config.channels = CHANNELS as u16;

        let audio = AudioConfig { sample_rate: stream_config.sample_rate.0, ..AudioConfig::default() };
        let mixer = ScheduledSignalSourceMixer::new(audio);
        info!(sample_rate = audio.sample_rate, device = ?device.name().ok(), "audio output ready");

        Ok(AudioOutput {
            stream: None,
            stream_config,
            scheduler: mixer.scheduler(),
            controls: mixer.controls(),
            mixer: Arc::new(Mutex::new(mixer)),
            paused: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.stream_config.sample_rate.0
    }

    pub fn scheduler(&self) -> SongScheduler {
        self.scheduler.clone()
    }

    pub fn controls(&self) -> Arc<MasterControls> {
        Arc::clone(&self.controls)
    }

    pub fn is_playing(&self) -> bool {
        self.stream.is_some() && !self.paused.load(Ordering::Relaxed)
    }

    pub fn play(&mut self) -> Result<()> {
        self.paused.store(false, Ordering::Relaxed);
        if self.stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| SynthError::AudioError("No output device".to_string()))?;

        let mixer = Arc::clone(&self.mixer);
        let paused = Arc::clone(&self.paused);
        let stream = device
            .build_output_stream(
                &self.stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if paused.load(Ordering::Relaxed) {
                        data.fill(0.0);
                        return;
                    }
                    match mixer.try_lock() {
                        Some(mut mixer) => {
                            let len = data.len();
                            mixer.read(data, 0, len);
                        }
                        None => {
                            trace!("mixer busy, writing silence");
                            data.fill(0.0);
                        }
                    }
                },
                |err| error!(%err, "stream error"),
                None,
            )
            .map_err(|e| SynthError::AudioError(e.to_string()))?;

        stream.play().map_err(|e| SynthError::AudioError(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    /// The mixer clock stops while paused.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
        }
        self.mixer.lock().clear();
    }
}
