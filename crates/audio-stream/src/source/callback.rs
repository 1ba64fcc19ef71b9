use super::DataSource;
use crate::error::Result;

type ReadFn = Box<dyn FnMut(&mut [u8]) -> usize + Send>;
type EndFn = Box<dyn Fn() -> bool + Send>;
type HookFn = Box<dyn FnMut() + Send>;

/// Data source backed by caller-supplied closures.
pub struct CallbackSource {
    read: ReadFn,
    is_end: EndFn,
    available: Option<Box<dyn Fn() -> usize + Send>>,
    on_open: Option<HookFn>,
    on_close: Option<HookFn>,
}

impl CallbackSource {
    pub fn new<R, E>(read: R, is_end: E) -> Self
    where
        R: FnMut(&mut [u8]) -> usize + Send + 'static,
        E: Fn() -> bool + Send + 'static,
    {
        Self {
            read: Box::new(read),
            is_end: Box::new(is_end),
            available: None,
            on_open: None,
            on_close: None,
        }
    }

    pub fn with_available(mut self, f: impl Fn() -> usize + Send + 'static) -> Self {
        self.available = Some(Box::new(f));
        self
    }

    pub fn on_open(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.on_open = Some(Box::new(f));
        self
    }

    pub fn on_close(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(f));
        self
    }
}

impl DataSource for CallbackSource {
    fn open(&mut self) -> Result<()> {
        if let Some(f) = self.on_open.as_mut() {
            f();
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Some(f) = self.on_close.as_mut() {
            f();
        }
    }

    fn is_end(&self) -> bool {
        (self.is_end)()
    }

    fn bytes_available(&self) -> usize {
        self.available.as_ref().map_or(0, |f| f())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok((self.read)(buf).min(buf.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn delegates_to_closures() {
        let ended = Arc::new(AtomicBool::new(false));
        let opens = Arc::new(AtomicUsize::new(0));
        let ended_flag = ended.clone();
        let open_count = opens.clone();
        let mut source = CallbackSource::new(
            |buf: &mut [u8]| {
                buf.fill(0xAB);
                buf.len()
            },
            move || ended_flag.load(Ordering::SeqCst),
        )
        .with_available(|| 42)
        .on_open(move || {
            open_count.fetch_add(1, Ordering::SeqCst);
        });

        source.open().unwrap();
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(source.bytes_available(), 42);

        let mut buf = [0u8; 3];
        assert_eq!(source.read(&mut buf).unwrap(), 3);
        assert_eq!(buf, [0xAB; 3]);

        assert!(!source.is_end());
        ended.store(true, Ordering::SeqCst);
        assert!(source.is_end());
    }

    #[test]
    fn overlong_read_count_is_clamped() {
        let mut source = CallbackSource::new(|_: &mut [u8]| 100, || false);
        let mut buf = [0u8; 4];
        assert_eq!(source.read(&mut buf).unwrap(), 4);
    }
}
