//! Streaming PCM pipeline: a bounded frame queue fed by a decoder thread, an in-place
//! effects stage (volume, balance, tempo, pitch) and a frame-aligned pull interface.

pub mod config;
pub mod decode;
pub mod effects;
pub mod error;
pub mod format;
pub mod frame;
pub mod pipeline;
pub mod queue;
pub mod source;
pub mod status;

pub use config::{EffectsConfig, PipelineConfig, QueueConfig, StretchPreset};
pub use decode::{OutputFormat, SourceInfo, SymphoniaProducer};
pub use effects::{Channel, EffectsTransform, ProcessResult};
pub use error::StreamError;
pub use format::{AudioSpec, SampleFormat};
pub use frame::{BufferPool, DropRelease, Frame, FrameProducer, FrameRelease};
pub use pipeline::StreamPipeline;
pub use queue::{FrameQueue, QueueStats};
pub use source::{DataSource, StreamPhase, StreamSource};
pub use status::PipelineStatus;
