//! In-memory sources for engine tests.

use folio_source::{
    DocumentSource, OpenSource, PageEntry, RgbaImage, SourceError, SourceFormat, SourceOpener,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub struct FakeSource {
    entries: Vec<PageEntry>,
    broken: Vec<u32>,
    delay: Duration,
    decoded: Mutex<Vec<u32>>,
    decodes: AtomicUsize,
    closes: AtomicUsize,
}

impl FakeSource {
    pub fn new(pages: u32) -> Self {
        Self {
            entries: (0..pages)
                .map(|index| PageEntry {
                    physical_index: index,
                    name: format!("{index:04}.png"),
                    size_hint: 16,
                })
                .collect(),
            broken: Vec::new(),
            delay: Duration::ZERO,
            decoded: Mutex::new(Vec::new()),
            decodes: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn with_broken(mut self, broken: &[u32]) -> Self {
        self.broken = broken.to_vec();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn decode_count(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }

    /// Physical indices in the order they were decoded.
    pub fn decoded(&self) -> Vec<u32> {
        self.decoded.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl DocumentSource for FakeSource {
    fn format(&self) -> SourceFormat {
        SourceFormat::Archive
    }

    fn entries(&self) -> &[PageEntry] {
        &self.entries
    }

    fn decode_page(&self, physical_index: u32) -> Result<RgbaImage, SourceError> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.decoded.lock().unwrap().push(physical_index);

        if self.broken.contains(&physical_index) {
            return Err(SourceError::DecodeFailed {
                index: physical_index,
                reason: "corrupt image".to_owned(),
            });
        }
        Ok(RgbaImage::new(2, 3))
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Opener handing out a prepared source, optionally after a delay.
pub struct FakeOpener {
    source: Arc<FakeSource>,
    delay: Duration,
    fail: Option<String>,
    opens: AtomicUsize,
}

impl FakeOpener {
    pub fn new(source: Arc<FakeSource>) -> Self {
        Self { source, delay: Duration::ZERO, fail: None, opens: AtomicUsize::new(0) }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self, reason: &str) -> Self {
        self.fail = Some(reason.to_owned());
        self
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl SourceOpener for FakeOpener {
    fn open(&self, _source: OpenSource) -> Result<Arc<dyn DocumentSource>, SourceError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        match &self.fail {
            Some(reason) => Err(SourceError::Corrupt(reason.clone())),
            None => Ok(self.source.clone()),
        }
    }
}
