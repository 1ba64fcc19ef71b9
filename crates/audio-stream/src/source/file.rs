use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use super::DataSource;
use crate::error::Result;

/// Raw interleaved PCM read from a file (no header parsing).
pub struct FileSource {
    path: PathBuf,
    file: Option<File>,
    len: u64,
    pos: u64,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: None,
            len: 0,
            pos: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DataSource for FileSource {
    fn open(&mut self) -> Result<()> {
        let file = File::open(&self.path)?;
        self.len = file.metadata()?.len();
        self.pos = 0;
        self.file = Some(file);
        tracing::debug!(path = %self.path.display(), bytes = self.len, "pcm file opened");
        Ok(())
    }

    fn close(&mut self) {
        self.file = None;
    }

    fn is_end(&self) -> bool {
        self.file.is_none() || self.pos >= self.len
    }

    fn bytes_available(&self) -> usize {
        usize::try_from(self.len.saturating_sub(self.pos)).unwrap_or(usize::MAX)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Some(file) = self.file.as_mut() else {
            return Ok(0);
        };
        let n = file.read(buf)?;
        if n == 0 && !buf.is_empty() {
            // Truncated underneath us.
            self.pos = self.len;
        }
        self.pos += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;
    use std::io::Write;

    fn temp_pcm(name: &str, bytes: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("{name}-{}.pcm", std::process::id()));
        let mut f = File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn reads_file_contents() {
        let path = temp_pcm("file-source-read", &[9, 8, 7, 6]);
        let mut source = FileSource::new(&path);
        source.open().unwrap();
        assert_eq!(source.bytes_available(), 4);

        let mut buf = [0u8; 8];
        let n = source.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[9, 8, 7, 6]);
        assert!(source.is_end());

        source.close();
        assert!(source.is_end());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let mut source = FileSource::new("/nonexistent/definitely-missing.pcm");
        assert!(matches!(source.open(), Err(StreamError::Io(_))));
    }
}
