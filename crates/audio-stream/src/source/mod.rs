//! Pull interface for the playback sink.
//!
//! A [`StreamSource`] reads frame-aligned bytes from a [`DataSource`], passes them through an
//! optional [`EffectsTransform`] and drains the transform's tail once the source is exhausted:
//!
//! ```text
//! Streaming --(source ended, 0 bytes)--> Draining --(tail empty)--> Ended
//! ```
//!
//! `Ended` is terminal until the source is closed or reopened.

mod callback;
mod file;
mod memory;
mod queue;

pub use callback::CallbackSource;
pub use file::FileSource;
pub use memory::MemorySource;
pub use queue::QueueSource;

use std::sync::Arc;

use crate::effects::{EffectsTransform, ProcessResult};
use crate::error::{Result, StreamError};
use crate::format::AudioSpec;

/// Byte stream feeding a [`StreamSource`].
///
/// `read` returning 0 is either temporary or permanent; `is_end` tells them apart.
pub trait DataSource: Send {
    fn open(&mut self) -> Result<()>;
    fn close(&mut self);
    fn is_end(&self) -> bool;
    /// Bytes that can be read without blocking (best-effort).
    fn bytes_available(&self) -> usize;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamPhase {
    Streaming,
    Draining,
    Ended,
}

pub struct StreamSource {
    source: Box<dyn DataSource>,
    effects: Option<Arc<EffectsTransform>>,
    spec: AudioSpec,
    phase: StreamPhase,
    opened: bool,
    /// Trailing bytes of an incomplete sample-frame returned by the source.
    carry: Vec<u8>,
}

impl StreamSource {
    pub fn new(source: Box<dyn DataSource>, spec: AudioSpec) -> Self {
        Self {
            source,
            effects: None,
            spec,
            phase: StreamPhase::Streaming,
            opened: false,
            carry: Vec::new(),
        }
    }

    /// Route every read through `effects`, whose spec replaces the one given to `new`.
    pub fn with_effects(mut self, effects: Arc<EffectsTransform>) -> Self {
        self.spec = effects.spec();
        self.effects = Some(effects);
        self
    }

    /// Open the data source and reset the transform and the state machine. Idempotent.
    pub fn open(&mut self) -> Result<()> {
        if self.opened {
            return Ok(());
        }
        self.source.open()?;
        self.reset();
        self.opened = true;
        tracing::debug!(frame_bytes = self.spec.frame_bytes(), "stream source opened");
        Ok(())
    }

    /// Close the data source (stopping any producer thread). Idempotent.
    pub fn close(&mut self) {
        if !self.opened {
            return;
        }
        self.source.close();
        self.reset();
        self.opened = false;
        tracing::debug!("stream source closed");
    }

    /// Forget partial frames, buffered effect samples and the end-of-stream state.
    ///
    /// For use after the data source was repositioned underneath an open stream.
    pub fn rewind(&mut self) {
        self.reset();
        tracing::debug!("stream source rewound");
    }

    pub fn is_open(&self) -> bool {
        self.opened
    }

    fn reset(&mut self) {
        if let Some(effects) = &self.effects {
            effects.reset();
        }
        self.carry.clear();
        self.phase = StreamPhase::Streaming;
    }

    /// Fill `buf` with up to `buf.len()` bytes rounded down to whole sample-frames.
    ///
    /// Returns `Ok(0)` when nothing is ready yet or the stream is over; check
    /// [`is_end`](Self::is_end). A transform failure ends the stream and is returned as
    /// [`StreamError::Transform`].
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let len = self.spec.align_down(buf.len());
        if len == 0 {
            return Ok(0);
        }
        if !self.opened {
            tracing::debug!("read on a closed stream source");
            return Ok(0);
        }
        let buf = &mut buf[..len];
        match self.phase {
            StreamPhase::Ended => return Ok(0),
            StreamPhase::Draining => return Ok(self.drain(buf)),
            StreamPhase::Streaming => {}
        }

        let Some(effects) = self.effects.clone() else {
            let n = self.fill(buf)?;
            if n == 0 && self.source.is_end() {
                self.phase = StreamPhase::Ended;
            }
            return Ok(n);
        };

        if effects.buffered_bytes() >= len {
            return self.check(effects.process(buf, 0));
        }

        loop {
            let n = self.fill(buf)?;
            if n == 0 {
                if !self.source.is_end() {
                    return Ok(0);
                }
                tracing::debug!("source ended, draining effects tail");
                self.phase = StreamPhase::Draining;
                return Ok(self.drain(buf));
            }
            match effects.process(buf, n) {
                ProcessResult::Again => continue,
                result => return self.check(result),
            }
        }
    }

    fn check(&mut self, result: ProcessResult) -> Result<usize> {
        match result {
            ProcessResult::Success(n) => Ok(n),
            ProcessResult::Again => Ok(0),
            ProcessResult::Error => {
                tracing::error!("effects transform failed, ending stream");
                self.phase = StreamPhase::Ended;
                Err(StreamError::Transform)
            }
        }
    }

    /// Read whole sample-frames from the source, keeping any partial frame for next time.
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let frame_bytes = self.spec.frame_bytes();
        let mut total = self.carry.len();
        buf[..total].copy_from_slice(&self.carry);
        self.carry.clear();
        loop {
            let n = self.source.read(&mut buf[total..])?;
            total += n;
            if n == 0 || total >= frame_bytes {
                break;
            }
        }
        let aligned = self.spec.align_down(total);
        self.carry.extend_from_slice(&buf[aligned..total]);
        Ok(aligned)
    }

    fn drain(&mut self, buf: &mut [u8]) -> usize {
        let n = match &self.effects {
            Some(effects) => {
                effects.flush_remaining();
                effects.receive_remaining(buf)
            }
            None => 0,
        };
        if n == 0 {
            if !self.carry.is_empty() {
                tracing::debug!(bytes = self.carry.len(), "dropping incomplete trailing frame");
                self.carry.clear();
            }
            self.phase = StreamPhase::Ended;
            tracing::debug!("stream ended");
        }
        n
    }

    /// True once the source ended and the effects tail was fully drained.
    pub fn is_end(&self) -> bool {
        self.phase == StreamPhase::Ended
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    /// Bytes readable from the source plus output buffered in the transform.
    pub fn bytes_available(&self) -> usize {
        let buffered = self.effects.as_ref().map_or(0, |e| e.buffered_bytes());
        self.source.bytes_available() + self.carry.len() + buffered
    }

    pub fn frame_bytes(&self) -> usize {
        self.spec.frame_bytes()
    }

    pub fn spec(&self) -> AudioSpec {
        self.spec
    }

    pub fn effects(&self) -> Option<&Arc<EffectsTransform>> {
        self.effects.as_ref()
    }
}

impl Drop for StreamSource {
    fn drop(&mut self) {
        self.close();
    }
}
