/// ADSR parameters. Times in seconds, sustain in 0.0..=1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adsr {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

impl Adsr {
    pub fn new(attack: f32, decay: f32, sustain: f32, release: f32) -> Self {
        Adsr {
            attack: attack.max(0.0),
            decay: decay.max(0.0),
            sustain: sustain.clamp(0.0, 1.0),
            release: release.max(0.0),
        }
    }

    /// Instant on, full sustain, instant off.
    pub fn gate() -> Self {
        Adsr::new(0.0, 0.0, 1.0, 0.0)
    }

    pub fn pluck() -> Self {
        Adsr::new(0.002, 0.4, 0.0, 0.05)
    }

    pub fn pad() -> Self {
        Adsr::new(0.4, 0.3, 0.8, 1.2)
    }
}

impl Default for Adsr {
    fn default() -> Self {
        Adsr::new(0.01, 0.1, 0.8, 0.2)
    }
}

/// Time-addressed envelope: the voice asks for a level at its own clock.
/// A voice is finished exactly when its envelope reports done.
#[derive(Debug, Clone)]
pub struct Envelope {
    params: Adsr,
    triggered_at: Option<f32>,
    released_at: Option<f32>,
    release_level: f32,
}

impl Envelope {
    pub fn new(params: Adsr) -> Self {
        Envelope { params, triggered_at: None, released_at: None, release_level: 0.0 }
    }

    pub fn trigger(&mut self, time: f32) {
        self.triggered_at = Some(time);
        self.released_at = None;
    }

    /// Begin the release tail. Later calls are ignored.
    pub fn release(&mut self, time: f32) {
        if self.released_at.is_some() {
            return;
        }
        self.release_level = self.held_level(time);
        self.released_at = Some(time);
    }

    pub fn level(&self, time: f32) -> f32 {
        match self.released_at {
            None => self.held_level(time),
            Some(released_at) => {
                let elapsed = time - released_at;
                if self.params.release <= 0.0 || elapsed >= self.params.release {
                    0.0
                } else {
                    self.release_level * (1.0 - elapsed / self.params.release)
                }
            }
        }
    }

    pub fn is_done(&self, time: f32) -> bool {
        match self.released_at {
            Some(released_at) => time - released_at >= self.params.release,
            None => false,
        }
    }

    fn held_level(&self, time: f32) -> f32 {
        let Some(start) = self.triggered_at else {
            return 0.0;
        };
        let t = time - start;
        let Adsr { attack, decay, sustain, .. } = self.params;

        if t < 0.0 {
            0.0
        } else if t < attack {
            t / attack
        } else if t < attack + decay {
            1.0 - (t - attack) / decay * (1.0 - sustain)
        } else {
            sustain
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_is_full_until_release() {
        let mut env = Envelope::new(Adsr::gate());
        env.trigger(0.0);
        assert_eq!(env.level(0.0), 1.0);
        assert_eq!(env.level(3.0), 1.0);
        assert!(!env.is_done(100.0));
        env.release(0.5);
        assert!(env.is_done(0.5));
        assert_eq!(env.level(0.5), 0.0);
    }

    #[test]
    fn adsr_shape() {
        let mut env = Envelope::new(Adsr::new(0.1, 0.1, 0.5, 0.2));
        env.trigger(0.0);
        assert!((env.level(0.05) - 0.5).abs() < 1e-6);
        assert!((env.level(0.15) - 0.75).abs() < 1e-6);
        assert!((env.level(1.0) - 0.5).abs() < 1e-6);
        env.release(1.0);
        assert!((env.level(1.1) - 0.25).abs() < 1e-6);
        assert!(!env.is_done(1.1));
        assert!(env.is_done(1.2));
    }

    #[test]
    fn release_during_attack_starts_from_current_level() {
        let mut env = Envelope::new(Adsr::new(1.0, 0.0, 1.0, 1.0));
        env.trigger(0.0);
        env.release(0.5);
        env.release(0.9);
        assert!((env.level(0.5) - 0.5).abs() < 1e-6);
        assert!((env.level(1.0) - 0.25).abs() < 1e-6);
    }
}
