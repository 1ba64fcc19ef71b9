use std::sync::Arc;

use super::DataSource;
use crate::error::Result;

/// PCM bytes held in memory. Reopening rewinds to the start.
pub struct MemorySource {
    data: Arc<[u8]>,
    pos: usize,
}

impl MemorySource {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }
}

impl DataSource for MemorySource {
    fn open(&mut self) -> Result<()> {
        self.pos = 0;
        Ok(())
    }

    fn close(&mut self) {}

    fn is_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn bytes_available(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = buf.len().min(self.bytes_available());
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
