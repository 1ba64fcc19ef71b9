use crate::format::AudioSpec;
use crate::source::StreamPhase;

/// Point-in-time view of a running pipeline, for logs and CLI output.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineStatus {
    pub phase: StreamPhase,
    /// Bytes delivered to the caller so far.
    pub bytes_read: u64,
    /// Playback position derived from `bytes_read`.
    pub elapsed_ms: u64,
    /// Bytes waiting in the queue, the alignment carry and the effects stage.
    pub bytes_available: usize,
    pub queued_frames: usize,
    pub max_frames: usize,
    pub producer_finished: bool,
    /// Transformed bytes still held by the time-stretch engine.
    pub effects_buffered_bytes: usize,
    pub tempo: f32,
    pub semitones: i32,
    pub volume: f32,
    pub balance: f32,
}

impl PipelineStatus {
    /// Duration of the audio buffered ahead of the reader.
    pub fn buffered_ms(&self, spec: &AudioSpec) -> u64 {
        spec.bytes_to_ms(self.bytes_available as u64)
    }

    /// Queue fill level in `[0, 1]`.
    pub fn fill_ratio(&self) -> f32 {
        if self.max_frames == 0 {
            return 0.0;
        }
        (self.queued_frames as f32 / self.max_frames as f32).min(1.0)
    }
}
