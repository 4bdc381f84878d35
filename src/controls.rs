use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Master volume and pan shared between the mixer owner and every voice.
/// Voices compare [`version`](MasterControls::version) to pick up changes.
#[derive(Debug)]
pub struct MasterControls {
    volume: AtomicU32,
    pan: AtomicU32,
    version: AtomicU64,
}

impl MasterControls {
    pub fn new(volume: f32, pan: f32) -> Self {
        MasterControls {
            volume: AtomicU32::new(volume.clamp(0.0, 1.0).to_bits()),
            pan: AtomicU32::new(pan.clamp(-1.0, 1.0).to_bits()),
            version: AtomicU64::new(0),
        }
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    pub fn pan(&self) -> f32 {
        f32::from_bits(self.pan.load(Ordering::Relaxed))
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume.store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
        self.version.fetch_add(1, Ordering::Release);
    }

    pub fn set_pan(&self, pan: f32) {
        self.pan.store(pan.clamp(-1.0, 1.0).to_bits(), Ordering::Relaxed);
        self.version.fetch_add(1, Ordering::Release);
    }
}

impl Default for MasterControls {
    fn default() -> Self {
        MasterControls::new(1.0, 0.0)
    }
}

/// Perceptual volume curve.
#[inline]
pub fn perceptual(volume: f32) -> f32 {
    volume.max(0.0).powf(1.2)
}

/// `perceptual(master) * perceptual(sample)`, clamped to 0..=1.
pub fn effective_volume(master: f32, sample: f32) -> f32 {
    (perceptual(master) * perceptual(sample)).clamp(0.0, 1.0)
}

pub fn effective_pan(master: f32, sample: f32) -> f32 {
    (master + sample).clamp(-1.0, 1.0)
}
