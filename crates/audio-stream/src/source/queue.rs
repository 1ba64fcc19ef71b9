use std::sync::Arc;

use super::DataSource;
use crate::error::Result;
use crate::queue::FrameQueue;

/// Decode-backed source: reads the bytes a [`FrameQueue`]'s producer thread enqueues.
///
/// The first `open` starts the producer; later ones restart it from a cleared queue.
pub struct QueueSource {
    queue: Arc<FrameQueue>,
    started: bool,
}

impl QueueSource {
    pub fn new(queue: Arc<FrameQueue>) -> Self {
        Self {
            queue,
            started: false,
        }
    }

    pub fn queue(&self) -> &Arc<FrameQueue> {
        &self.queue
    }
}

impl DataSource for QueueSource {
    fn open(&mut self) -> Result<()> {
        if self.started {
            self.queue.restart()?;
        } else {
            self.queue.start()?;
            self.started = true;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.queue.stop();
    }

    fn is_end(&self) -> bool {
        self.queue.stream_ended()
    }

    fn bytes_available(&self) -> usize {
        self.queue.bytes_available()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.queue.read(buf))
    }
}
