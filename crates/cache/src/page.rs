//! Decoded page rasters and their release hooks.

use folio_source::RgbaImage;
use std::fmt;

/// Callback run once when a decoded page's raster is released.
///
/// Receives the physical index of the released page.
pub type ReleaseHook = Box<dyn FnOnce(u32) + Send>;

/// A decoded page raster owned by exactly one cache slot.
///
/// Dropping the page releases its raster and runs the release hook. Because
/// the cache only lends `&DecodedPage`, no caller can hold a page past the
/// eviction of its slot.
pub struct DecodedPage {
    physical_index: u32,
    image: RgbaImage,
    release: Option<ReleaseHook>,
}

impl DecodedPage {
    pub fn new(physical_index: u32, image: RgbaImage) -> Self {
        Self { physical_index, image, release: None }
    }

    /// Attach a hook that runs when the raster is released.
    pub fn with_release_hook(mut self, hook: ReleaseHook) -> Self {
        self.release = Some(hook);
        self
    }

    pub fn physical_index(&self) -> u32 {
        self.physical_index
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Raster size in bytes.
    pub fn memory_size(&self) -> usize {
        self.image.as_raw().len()
    }
}

impl fmt::Debug for DecodedPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedPage")
            .field("physical_index", &self.physical_index)
            .field("width", &self.width())
            .field("height", &self.height())
            .field("has_release_hook", &self.release.is_some())
            .finish()
    }
}

impl Drop for DecodedPage {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(self.physical_index);
        }
    }
}
