//! Frames and the producer contract consumed by [`FrameQueue`](crate::queue::FrameQueue).
//!
//! A producer hands out owned [`Frame`]s. The queue owns each frame from enqueue until it is
//! fully read, then gives it back through the producer's [`FrameRelease`] capability, so a
//! decoder can recycle its buffers instead of allocating one per packet.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender};

/// One decoded chunk of PCM bytes; the atomic unit of producer output.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
}

impl Frame {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Drop the first `n` bytes (already delivered to a reader).
    pub(crate) fn consume_front(&mut self, n: usize) {
        let n = n.min(self.data.len());
        self.data.drain(..n);
    }
}

impl From<Vec<u8>> for Frame {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

/// Deallocation capability supplied by a producer.
///
/// Called exactly once per frame, from whichever thread retires it.
pub trait FrameRelease: Send + Sync {
    fn release(&self, frame: Frame);
}

/// Release policy that simply frees the buffer.
#[derive(Debug, Default, Clone, Copy)]
pub struct DropRelease;

impl FrameRelease for DropRelease {
    fn release(&self, _frame: Frame) {}
}

/// Source of decoded frames driven by the queue's background thread.
///
/// `produce_next` may return an empty batch without being finished (for example while
/// skipping packets of another track). Errors are treated as transient: the queue logs them
/// and polls again unless `is_finished` reports `true`.
pub trait FrameProducer: Send {
    fn produce_next(&mut self) -> Result<Vec<Frame>>;

    fn is_finished(&self) -> bool;

    /// Reposition so the next `produce_next` starts at `ms` into the stream.
    ///
    /// Called only while the producer is parked (queue stopped). Producers that cannot seek
    /// keep the default, which leaves their position unchanged.
    fn seek(&mut self, _ms: u64) -> Result<()> {
        Ok(())
    }

    /// Capability used by the queue to hand retired frames back.
    fn releaser(&self) -> Arc<dyn FrameRelease> {
        Arc::new(DropRelease)
    }
}

/// Bounded pool of recycled frame buffers.
///
/// Retired frames flow back to the producer over a channel; when the pool is full extra
/// buffers are simply freed.
#[derive(Debug)]
pub struct BufferPool {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl BufferPool {
    pub fn new(max_buffers: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(max_buffers.max(1));
        Self { tx, rx }
    }

    /// Take an empty buffer with room for at least `len` bytes.
    pub fn take(&self, len: usize) -> Vec<u8> {
        match self.rx.try_recv() {
            Ok(mut buf) => {
                buf.reserve(len);
                buf
            }
            Err(_) => Vec::with_capacity(len),
        }
    }

    /// Number of buffers waiting to be reused.
    pub fn idle(&self) -> usize {
        self.rx.len()
    }
}

impl FrameRelease for BufferPool {
    fn release(&self, frame: Frame) {
        let mut buf = frame.into_bytes();
        buf.clear();
        let _ = self.tx.try_send(buf);
    }
}

/// Producer over frames that are already in memory.
///
/// Each call to `produce_next` yields the next batch; `Err` entries are returned as transient
/// producer errors. Finished once every batch has been handed out.
pub struct VecProducer {
    batches: VecDeque<Result<Vec<Frame>>>,
    releaser: Arc<dyn FrameRelease>,
}

impl VecProducer {
    pub fn new(batches: impl IntoIterator<Item = Result<Vec<Frame>>>) -> Self {
        Self {
            batches: batches.into_iter().collect(),
            releaser: Arc::new(DropRelease),
        }
    }

    /// One frame per batch.
    pub fn from_frames(frames: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self::new(frames.into_iter().map(|f| Ok(vec![Frame::new(f)])))
    }

    pub fn with_releaser(mut self, releaser: Arc<dyn FrameRelease>) -> Self {
        self.releaser = releaser;
        self
    }
}

impl FrameProducer for VecProducer {
    fn produce_next(&mut self) -> Result<Vec<Frame>> {
        self.batches.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }

    fn is_finished(&self) -> bool {
        self.batches.is_empty()
    }

    fn releaser(&self) -> Arc<dyn FrameRelease> {
        self.releaser.clone()
    }
}
