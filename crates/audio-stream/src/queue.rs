//! Bounded frame queue between a decode thread and a pull-based reader.
//!
//! The queue owns a [`FrameProducer`] and runs it on one background thread:
//! - producer thread → [`FrameQueue::push`] (blocks while the queue holds `max_frames` frames)
//! - reader → [`FrameQueue::read`] (blocks while empty, unless the stream has ended)
//!
//! Reads are byte-granular: a read may stop in the middle of the head frame, and the next read
//! continues from `front_offset`. Shutdown is deterministic: [`FrameQueue::stop`] raises the
//! abort flag, wakes every waiter and joins the producer thread before returning.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::QueueConfig;
use crate::frame::{Frame, FrameProducer, FrameRelease};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn wait<'a, T>(cv: &Condvar, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    cv.wait(guard).unwrap_or_else(PoisonError::into_inner)
}

/// Point-in-time view of the queue, for status reporting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub frames: usize,
    pub max_frames: usize,
    pub bytes_available: usize,
    pub aborted: bool,
    pub producer_finished: bool,
}

struct QueueState {
    frames: VecDeque<Frame>,
    /// Bytes of the head frame already handed to the reader.
    front_offset: usize,
    /// Sum of the lengths of all queued frames, including the consumed prefix of the head.
    queued_bytes: usize,
}

struct Shared {
    state: Mutex<QueueState>,
    readable: Condvar,
    writable: Condvar,
    aborted: AtomicBool,
    producer_finished: AtomicBool,
    max_frames: usize,
    releaser: Arc<dyn FrameRelease>,
    low_watermark_ms: AtomicU64,
}

impl Shared {
    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn is_producer_finished(&self) -> bool {
        self.producer_finished.load(Ordering::SeqCst)
    }

    /// Raise `flag` while holding the state lock so no waiter can miss the wake-up.
    fn raise(&self, flag: &AtomicBool) {
        let guard = lock(&self.state);
        flag.store(true, Ordering::SeqCst);
        drop(guard);
        self.readable.notify_all();
        self.writable.notify_all();
    }

    fn release_all(&self, frames: impl IntoIterator<Item = Frame>) {
        for frame in frames {
            self.releaser.release(frame);
        }
    }

    fn push(&self, frames: Vec<Frame>) -> bool {
        let (empty, frames): (Vec<Frame>, Vec<Frame>) =
            frames.into_iter().partition(|f| f.is_empty());
        self.release_all(empty);
        if frames.is_empty() {
            return !self.is_aborted();
        }

        let mut g = lock(&self.state);
        while g.frames.len() >= self.max_frames && !self.is_aborted() {
            g = wait(&self.writable, g);
        }
        if self.is_aborted() {
            drop(g);
            tracing::debug!(frames = frames.len(), "queue aborted; dropping frames");
            self.release_all(frames);
            return false;
        }

        for frame in frames {
            g.queued_bytes += frame.len();
            g.frames.push_back(frame);
        }
        drop(g);
        self.readable.notify_one();
        true
    }

    /// Block until a frame is queued or the stream ended. Returns `None` on end.
    fn wait_readable(&self) -> Option<MutexGuard<'_, QueueState>> {
        let mut g = lock(&self.state);
        while g.frames.is_empty() {
            if self.is_aborted() || self.is_producer_finished() {
                return None;
            }
            g = wait(&self.readable, g);
        }
        if self.is_aborted() {
            return None;
        }
        Some(g)
    }

    fn log_low_watermark(&self, queued: usize) {
        let threshold = (self.max_frames / 8).max(1);
        if queued >= threshold || self.is_producer_finished() || self.is_aborted() {
            return;
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_millis(0))
            .as_millis() as u64;
        let last = self.low_watermark_ms.load(Ordering::Relaxed);
        if now.saturating_sub(last) > 1000 {
            self.low_watermark_ms.store(now, Ordering::Relaxed);
            tracing::info!(
                queued_frames = queued,
                threshold_frames = threshold,
                "frame queue low watermark"
            );
        }
    }
}

/// Marks the producer as finished when the loop exits, even by panic.
struct FinishOnDrop<'a>(&'a Shared);

impl Drop for FinishOnDrop<'_> {
    fn drop(&mut self) {
        self.0.raise(&self.0.producer_finished);
    }
}

/// Bounded FIFO of decoded frames fed by a background producer thread.
///
/// ## Design
/// - **One producer thread, one reader.** Reads from several threads are serialized by the
///   internal mutex but byte order is only meaningful for a single reader.
/// - **Bounded by frame count**, not bytes, so backpressure does not depend on frame sizes.
///   A single `push` may overshoot the bound by the size of its batch.
/// - Two condition variables: `readable` (data, finish, abort) and `writable` (space, abort).
/// - `aborted` and `producer_finished` are atomics, flipped under the state mutex.
pub struct FrameQueue {
    shared: Arc<Shared>,
    producer: Mutex<Option<Box<dyn FrameProducer>>>,
    worker: Mutex<Option<JoinHandle<Box<dyn FrameProducer>>>>,
    max_consecutive_errors: u32,
}

impl FrameQueue {
    pub fn new(producer: Box<dyn FrameProducer>, config: &QueueConfig) -> Self {
        let releaser = producer.releaser();
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    frames: VecDeque::new(),
                    front_offset: 0,
                    queued_bytes: 0,
                }),
                readable: Condvar::new(),
                writable: Condvar::new(),
                aborted: AtomicBool::new(false),
                producer_finished: AtomicBool::new(false),
                max_frames: config.max_frames.max(1),
                releaser,
                low_watermark_ms: AtomicU64::new(0),
            }),
            producer: Mutex::new(Some(producer)),
            worker: Mutex::new(None),
            max_consecutive_errors: config.max_consecutive_errors,
        }
    }

    /// Spawn the producer thread and clear the abort/finished flags.
    ///
    /// Starting an already running queue is a no-op; call [`stop`](Self::stop) first.
    pub fn start(&self) -> io::Result<()> {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            tracing::warn!("frame queue already running");
            return Ok(());
        }
        let Some(producer) = lock(&self.producer).take() else {
            tracing::warn!("frame queue has no producer to start");
            return Ok(());
        };

        {
            let _g = lock(&self.shared.state);
            self.shared.aborted.store(false, Ordering::SeqCst);
            self.shared.producer_finished.store(false, Ordering::SeqCst);
        }

        let shared = self.shared.clone();
        let max_errors = self.max_consecutive_errors;
        let spawned = thread::Builder::new()
            .name("frame-producer".to_string())
            .spawn(move || produce_loop(&shared, producer, max_errors));
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                tracing::debug!(max_frames = self.shared.max_frames, "frame producer started");
                Ok(())
            }
            Err(e) => {
                tracing::error!("failed to spawn frame producer thread: {e}");
                self.shared.raise(&self.shared.producer_finished);
                Err(e)
            }
        }
    }

    /// Abort, wake every waiter and join the producer thread.
    ///
    /// Queued frames are kept (see [`clear`](Self::clear)). Idempotent.
    pub fn stop(&self) {
        self.shared.raise(&self.shared.aborted);
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            match handle.join() {
                Ok(producer) => *lock(&self.producer) = Some(producer),
                Err(_) => tracing::error!("frame producer thread panicked"),
            }
        }
    }

    /// Release every queued frame and reset the byte accounting.
    pub fn clear(&self) {
        let frames = {
            let mut g = lock(&self.shared.state);
            g.front_offset = 0;
            g.queued_bytes = 0;
            std::mem::take(&mut g.frames)
        };
        self.shared.writable.notify_all();
        self.shared.release_all(frames);
    }

    /// `stop` + `clear` + `start`.
    pub fn restart(&self) -> io::Result<()> {
        self.stop();
        self.clear();
        self.start()
    }

    /// Drop everything queued, reposition the producer at `ms` and run it again from there.
    ///
    /// The producer thread is restarted even when the producer refuses the seek, so playback
    /// continues from wherever the producer stands; the seek error is still returned.
    pub fn seek(&self, ms: u64) -> anyhow::Result<()> {
        self.stop();
        self.clear();
        let sought = match lock(&self.producer).as_mut() {
            Some(producer) => producer.seek(ms),
            None => Err(anyhow::anyhow!("frame queue has no producer to seek")),
        };
        self.start()?;
        tracing::debug!(ms, ok = sought.is_ok(), "frame queue seek");
        sought
    }

    /// Mark the producer side as finished without a producer thread.
    ///
    /// Used when frames are pushed directly; readers drain what is queued and then see the end.
    pub fn finish(&self) {
        self.shared.raise(&self.shared.producer_finished);
    }

    /// Enqueue frames, blocking while the queue is at capacity.
    ///
    /// Returns `false` if the queue was aborted; the frames are then released.
    pub fn push(&self, frames: Vec<Frame>) -> bool {
        self.shared.push(frames)
    }

    /// Copy up to `buf.len()` bytes, spanning frames as needed.
    ///
    /// Blocks while the queue is empty and the producer is alive. Returns 0 when `buf` is
    /// empty, on abort, or once the producer finished and everything was read.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        let Some(mut g) = self.shared.wait_readable() else {
            return 0;
        };

        let mut read = 0;
        let mut retired = Vec::new();
        while read < buf.len() {
            let (n, exhausted) = {
                let Some(front) = g.frames.front() else {
                    break;
                };
                let start = g.front_offset;
                let n = (front.len() - start).min(buf.len() - read);
                buf[read..read + n].copy_from_slice(&front.as_bytes()[start..start + n]);
                (n, start + n == front.len())
            };
            read += n;
            if exhausted {
                if let Some(frame) = g.frames.pop_front() {
                    g.queued_bytes -= frame.len();
                    retired.push(frame);
                }
                g.front_offset = 0;
            } else {
                g.front_offset += n;
            }
        }
        let queued = g.frames.len();
        drop(g);

        for _ in 0..retired.len() {
            self.shared.writable.notify_one();
        }
        self.shared.release_all(retired);
        self.shared.log_low_watermark(queued);
        read
    }

    /// Keep reading until `buf` is full or the stream ended.
    pub fn read_until(&self, buf: &mut [u8]) -> usize {
        let mut total = 0;
        while total < buf.len() {
            let n = self.read(&mut buf[total..]);
            if n == 0 {
                break;
            }
            total += n;
        }
        total
    }

    /// Dequeue the next whole frame (minus any bytes already read from it).
    ///
    /// Blocks like [`read`](Self::read); `None` once the stream ended.
    pub fn pop(&self) -> Option<Frame> {
        let mut g = self.shared.wait_readable()?;
        let mut frame = g.frames.pop_front()?;
        g.queued_bytes -= frame.len();
        let consumed = std::mem::take(&mut g.front_offset);
        drop(g);
        self.shared.writable.notify_one();
        frame.consume_front(consumed);
        Some(frame)
    }

    /// Bytes queued and not yet read.
    pub fn bytes_available(&self) -> usize {
        let g = lock(&self.shared.state);
        g.queued_bytes - g.front_offset
    }

    /// Bytes of the head frame already read.
    pub fn front_offset(&self) -> usize {
        lock(&self.shared.state).front_offset
    }

    /// Number of queued frames.
    pub fn len(&self) -> usize {
        lock(&self.shared.state).frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_frames(&self) -> usize {
        self.shared.max_frames
    }

    pub fn aborted(&self) -> bool {
        self.shared.is_aborted()
    }

    pub fn producer_finished(&self) -> bool {
        self.shared.is_producer_finished()
    }

    /// `aborted || (empty && producer finished)`.
    pub fn stream_ended(&self) -> bool {
        self.aborted() || (self.is_empty() && self.producer_finished())
    }

    pub fn stats(&self) -> QueueStats {
        let g = lock(&self.shared.state);
        QueueStats {
            frames: g.frames.len(),
            max_frames: self.shared.max_frames,
            bytes_available: g.queued_bytes - g.front_offset,
            aborted: self.shared.is_aborted(),
            producer_finished: self.shared.is_producer_finished(),
        }
    }
}

impl Drop for FrameQueue {
    fn drop(&mut self) {
        self.stop();
        self.clear();
    }
}

/// Producer thread body. Returns the producer so the queue can be restarted.
fn produce_loop(
    shared: &Shared,
    mut producer: Box<dyn FrameProducer>,
    max_errors: u32,
) -> Box<dyn FrameProducer> {
    let _finish = FinishOnDrop(shared);
    let mut errors = 0u32;
    let mut produced = 0u64;

    while !shared.is_aborted() {
        let frames = match producer.produce_next() {
            Ok(frames) => {
                errors = 0;
                frames
            }
            Err(e) => {
                if producer.is_finished() {
                    tracing::warn!("frame producer failed at end of stream: {e:#}");
                    break;
                }
                errors += 1;
                if max_errors > 0 && errors >= max_errors {
                    tracing::error!(errors, "frame producer keeps failing; giving up: {e:#}");
                    break;
                }
                tracing::warn!(errors, "frame producer error: {e:#}");
                thread::yield_now();
                continue;
            }
        };

        if shared.is_aborted() {
            shared.release_all(frames);
            break;
        }
        if frames.is_empty() {
            if producer.is_finished() {
                break;
            }
            thread::yield_now();
            continue;
        }

        produced += frames.len() as u64;
        if !shared.push(frames) || producer.is_finished() {
            break;
        }
    }

    tracing::debug!(
        frames = produced,
        aborted = shared.is_aborted(),
        "frame producer loop exited"
    );
    producer
}
