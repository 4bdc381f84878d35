use std::time::Duration;

/// Wall-clock cost of each `read` against the audio time it produced.
/// A ratio above 1.0 means that block rendered slower than real time.
#[derive(Debug, Clone, Default)]
pub struct RenderAnalysis {
    ratios: Vec<f64>,
    render_time: Duration,
    audio_time: Duration,
}

impl RenderAnalysis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, render: Duration, audio: Duration) {
        if audio.is_zero() {
            return;
        }
        self.ratios.push(render.as_secs_f64() / audio.as_secs_f64());
        self.render_time += render;
        self.audio_time += audio;
    }

    pub fn blocks(&self) -> usize {
        self.ratios.len()
    }

    pub fn worst_ratio(&self) -> f64 {
        self.ratios.iter().copied().fold(0.0, f64::max)
    }

    pub fn mean_ratio(&self) -> f64 {
        if self.audio_time.is_zero() {
            return 0.0;
        }
        self.render_time.as_secs_f64() / self.audio_time.as_secs_f64()
    }

    /// True while every block stayed under `threshold` (1.0 is real time).
    pub fn keeps_up(&self, threshold: f64) -> bool {
        self.worst_ratio() < threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_worst_and_mean() {
        let mut analysis = RenderAnalysis::new();
        analysis.record(Duration::from_millis(1), Duration::from_millis(10));
        analysis.record(Duration::from_millis(5), Duration::from_millis(10));
        analysis.record(Duration::from_millis(1), Duration::ZERO);
        assert_eq!(analysis.blocks(), 2);
        assert!((analysis.worst_ratio() - 0.5).abs() < 1e-9);
        assert!((analysis.mean_ratio() - 0.3).abs() < 1e-9);
        assert!(analysis.keeps_up(1.0));
        assert!(!analysis.keeps_up(0.4));
    }
}
