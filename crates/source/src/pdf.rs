//! PDF document source backed by lopdf.
//!
//! lopdf reads the page tree but does not rasterize content streams, so a
//! decoded page is a blank sheet of the page's MediaBox size with a thin
//! border. Page geometry, ordering, and failure behavior are real.

use crate::{DocumentSource, PageEntry, RgbaImage, SourceError, SourceFormat};
use image::Rgba;
use lopdf::{Document, Object, ObjectId};
use std::sync::atomic::{AtomicBool, Ordering};

const DEFAULT_PAGE_SIZE: PageSize = PageSize { width_pt: 612.0, height_pt: 792.0 };
const BORDER: Rgba<u8> = Rgba([220, 220, 220, 255]);

/// Largest raster a page may decode to, 16384 x 16384 pixels.
const MAX_RASTER_PIXELS: f64 = 16384.0 * 16384.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

impl PageSize {
    /// Pixel size at `scale`, or `None` when the raster would exceed
    /// [`MAX_RASTER_PIXELS`].
    fn raster_dimensions(self, scale: f32) -> Option<(u32, u32)> {
        let width = (f64::from(self.width_pt) * f64::from(scale)).round().max(1.0);
        let height = (f64::from(self.height_pt) * f64::from(scale)).round().max(1.0);
        if !width.is_finite() || !height.is_finite() || width * height > MAX_RASTER_PIXELS {
            return None;
        }
        Some((width as u32, height as u32))
    }
}

pub struct PdfSource {
    entries: Vec<PageEntry>,
    page_sizes: Vec<PageSize>,
    scale: f32,
    closed: AtomicBool,
}

impl PdfSource {
    pub fn from_bytes(bytes: &[u8], scale: f32) -> Result<Self, SourceError> {
        if bytes.windows("/Encrypt".len()).any(|window| window == b"/Encrypt") {
            return Err(SourceError::UnsupportedFormat("encrypted PDF".to_owned()));
        }

        let doc = Document::load_mem(bytes)
            .map_err(|err| SourceError::Corrupt(format!("PDF parse error: {err}")))?;

        let scale = if scale <= 0.0 { 1.0 } else { scale };
        let page_sizes = parse_sizes(&doc)?;
        let entries = page_sizes
            .iter()
            .enumerate()
            .map(|(index, size)| {
                let size_hint = size
                    .raster_dimensions(scale)
                    .map_or(0, |(width, height)| u64::from(width) * u64::from(height) * 4);
                PageEntry { physical_index: index as u32, name: format!("page-{}", index + 1), size_hint }
            })
            .collect();

        tracing::debug!(pages = page_sizes.len(), scale, "opened PDF document");

        Ok(Self { entries, page_sizes, scale, closed: AtomicBool::new(false) })
    }

    pub fn page_size(&self, physical_index: u32) -> Result<PageSize, SourceError> {
        self.page_sizes.get(physical_index as usize).copied().ok_or(SourceError::PageOutOfRange {
            page: physical_index,
            page_count: self.page_sizes.len() as u32,
        })
    }
}

impl DocumentSource for PdfSource {
    fn format(&self) -> SourceFormat {
        SourceFormat::Pdf
    }

    fn entries(&self) -> &[PageEntry] {
        &self.entries
    }

    fn decode_page(&self, physical_index: u32) -> Result<RgbaImage, SourceError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SourceError::Closed);
        }

        let size = self.page_size(physical_index)?;
        let (width, height) =
            size.raster_dimensions(self.scale).ok_or_else(|| SourceError::DecodeFailed {
                index: physical_index,
                reason: format!(
                    "{}x{} pt page at scale {} exceeds the raster limit",
                    size.width_pt, size.height_pt, self.scale
                ),
            })?;
        let mut image = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));

        if width >= 4 && height >= 4 {
            for x in 0..width {
                image.put_pixel(x, 0, BORDER);
                image.put_pixel(x, height - 1, BORDER);
            }
            for y in 0..height {
                image.put_pixel(0, y, BORDER);
                image.put_pixel(width - 1, y, BORDER);
            }
        }

        Ok(image)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

fn parse_sizes(doc: &Document) -> Result<Vec<PageSize>, SourceError> {
    let pages = doc.get_pages();
    let mut sizes = Vec::with_capacity(pages.len());

    for (_, object_id) in pages {
        sizes.push(media_box(doc, object_id).unwrap_or(DEFAULT_PAGE_SIZE));
    }

    if sizes.is_empty() {
        return Err(SourceError::Corrupt("document has no pages".to_owned()));
    }

    Ok(sizes)
}

/// MediaBox of a page, following `Parent` links for inherited boxes.
fn media_box(doc: &Document, page_id: ObjectId) -> Option<PageSize> {
    let mut current = Some(page_id);
    // Bounded walk; malformed trees can contain Parent cycles.
    for _ in 0..32 {
        let dict = doc.get_dictionary(current?).ok()?;

        if let Ok(array) = dict.get(b"MediaBox").and_then(Object::as_array) {
            if array.len() != 4 {
                return None;
            }
            let x0 = number(&array[0])?;
            let y0 = number(&array[1])?;
            let x1 = number(&array[2])?;
            let y1 = number(&array[3])?;
            return Some(PageSize { width_pt: (x1 - x0).abs(), height_pt: (y1 - y0).abs() });
        }

        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }

    None
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value as f32),
        _ => None,
    }
}
