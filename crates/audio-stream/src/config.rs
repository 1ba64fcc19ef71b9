use crate::format::AudioSpec;

/// Tuning for the frame queue and its producer thread.
#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// Capacity in frames; the producer blocks once this many frames are queued.
    pub max_frames: usize,
    /// Consecutive producer errors tolerated before the loop gives up (0 = never give up).
    pub max_consecutive_errors: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_frames: 200,
            max_consecutive_errors: 64,
        }
    }
}

/// Quality/CPU trade-off of the time-stretch engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StretchPreset {
    #[default]
    Default,
    /// Shorter analysis blocks: noticeably cheaper, slightly lower quality.
    Cheaper,
}

/// Configuration of the effects stage.
#[derive(Clone, Debug)]
pub struct EffectsConfig {
    pub spec: AudioSpec,
    pub min_tempo: f32,
    pub max_tempo: f32,
    pub stretch: StretchPreset,
}

impl EffectsConfig {
    pub fn new(spec: AudioSpec) -> Self {
        let defaults = PipelineConfig::default();
        Self {
            spec,
            min_tempo: defaults.min_tempo,
            max_tempo: defaults.max_tempo,
            stretch: defaults.stretch,
        }
    }
}

/// Pipeline tuning shared by the queue, effects and source stages.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub queue: QueueConfig,
    /// Lower tempo bound applied by `set_tempo`.
    pub min_tempo: f32,
    /// Upper tempo bound applied by `set_tempo`.
    pub max_tempo: f32,
    pub stretch: StretchPreset,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            min_tempo: 0.5,
            max_tempo: 2.0,
            stretch: StretchPreset::default(),
        }
    }
}

impl PipelineConfig {
    pub fn effects(&self, spec: AudioSpec) -> EffectsConfig {
        EffectsConfig {
            spec,
            min_tempo: self.min_tempo,
            max_tempo: self.max_tempo,
            stretch: self.stretch,
        }
    }
}
