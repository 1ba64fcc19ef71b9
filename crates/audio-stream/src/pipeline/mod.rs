//! Pipeline wiring: decoder → frame queue → effects → stream source.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};

use crate::config::PipelineConfig;
use crate::decode::{OutputFormat, SourceInfo, SymphoniaProducer};
use crate::effects::{Channel, EffectsTransform};
use crate::error::StreamError;
use crate::format::AudioSpec;
use crate::frame::FrameProducer;
use crate::queue::FrameQueue;
use crate::source::{QueueSource, StreamSource};
use crate::status::PipelineStatus;

/// A decoding, effects-processing byte stream ready to be pulled by a sink.
///
/// The producer thread runs from construction until [`close`](Self::close) or drop.
pub struct StreamPipeline {
    queue: Arc<FrameQueue>,
    effects: Arc<EffectsTransform>,
    source: StreamSource,
    info: SourceInfo,
    bytes_read: u64,
}

impl StreamPipeline {
    /// Decode `path` with Symphonia and start streaming it.
    pub fn open_file(path: &Path, output: OutputFormat, config: &PipelineConfig) -> Result<Self> {
        let (producer, info) = SymphoniaProducer::open(path, output)?;
        let spec = producer.spec();
        tracing::info!(
            path = %path.display(),
            duration_ms = info.duration_ms,
            "opening stream pipeline"
        );
        Self::from_producer(Box::new(producer), spec, info, config)
    }

    /// Wire any producer emitting `spec`-formatted frames and start it.
    pub fn from_producer(
        producer: Box<dyn FrameProducer>,
        spec: AudioSpec,
        info: SourceInfo,
        config: &PipelineConfig,
    ) -> Result<Self> {
        let queue = Arc::new(FrameQueue::new(producer, &config.queue));
        let effects = Arc::new(EffectsTransform::new(&config.effects(spec)));
        let mut source = StreamSource::new(Box::new(QueueSource::new(queue.clone())), spec)
            .with_effects(effects.clone());
        source.open().context("start frame producer")?;
        Ok(Self {
            queue,
            effects,
            source,
            info,
            bytes_read: 0,
        })
    }

    /// Pull up to `buf.len()` processed bytes (whole sample-frames).
    ///
    /// Blocks while the decoder is behind. `Ok(0)` with [`is_end`](Self::is_end) false means
    /// try again.
    pub fn read(&mut self, buf: &mut [u8]) -> std::result::Result<usize, StreamError> {
        let n = self.source.read(buf)?;
        self.bytes_read += n as u64;
        Ok(n)
    }

    pub fn is_end(&self) -> bool {
        self.source.is_end()
    }

    /// Jump to `ms` into the source.
    ///
    /// Queued frames and buffered effect samples are dropped, the producer is repositioned and
    /// restarted, and the elapsed position is rebased to `ms`. Works after the end too. When the
    /// producer refuses, streaming continues from its current position and the error is
    /// returned.
    pub fn seek(&mut self, ms: u64) -> Result<()> {
        if !self.source.is_open() {
            bail!("seek on a closed pipeline");
        }
        let sought = self.queue.seek(ms);
        self.source.rewind();
        sought?;
        self.bytes_read = self.spec().ms_to_bytes(ms);
        tracing::info!(ms, "pipeline seek");
        Ok(())
    }

    /// Stop and join the producer thread and drop queued frames.
    pub fn close(&mut self) {
        self.source.close();
        self.queue.clear();
    }

    /// Live controls for volume, balance, tempo and pitch.
    pub fn effects(&self) -> &Arc<EffectsTransform> {
        &self.effects
    }

    pub fn spec(&self) -> AudioSpec {
        self.source.spec()
    }

    pub fn info(&self) -> &SourceInfo {
        &self.info
    }

    pub fn status(&self) -> PipelineStatus {
        let stats = self.queue.stats();
        PipelineStatus {
            phase: self.source.phase(),
            bytes_read: self.bytes_read,
            elapsed_ms: self.spec().bytes_to_ms(self.bytes_read),
            bytes_available: self.source.bytes_available(),
            queued_frames: stats.frames,
            max_frames: stats.max_frames,
            producer_finished: stats.producer_finished,
            effects_buffered_bytes: self.effects.buffered_bytes(),
            tempo: self.effects.tempo(),
            semitones: self.effects.semitones(),
            volume: self.effects.volume(Channel::All).unwrap_or(1.0),
            balance: self.effects.volume_balance(),
        }
    }
}

impl Drop for StreamPipeline {
    fn drop(&mut self) {
        self.close();
    }
}
