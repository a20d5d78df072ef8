//! Folio document sources
//!
//! A document source enumerates the page entries of one open document and
//! decodes a single page into an RGBA raster on request. Two families are
//! provided: image archives (zip/cbz) and PDF documents.

mod archive;
mod pdf;

use image::{ImageBuffer, Rgba};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use archive::ArchiveSource;
pub use pdf::{PageSize, PdfSource};

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// Raw input handed to an opener.
#[derive(Debug, Clone)]
pub enum OpenSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl OpenSource {
    /// Read the raw bytes, touching the filesystem for `Path` inputs.
    pub fn into_bytes(self) -> Result<Vec<u8>, SourceError> {
        match self {
            OpenSource::Path(path) => fs::read(&path).map_err(|err| SourceError::NotAccessible {
                path: path.display().to_string(),
                source: err,
            }),
            OpenSource::Bytes(bytes) => Ok(bytes),
        }
    }
}

impl From<PathBuf> for OpenSource {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for OpenSource {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

impl From<Vec<u8>> for OpenSource {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

/// Document family, detected from the leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceFormat {
    Archive,
    Pdf,
}

impl SourceFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceFormat::Archive => "archive",
            SourceFormat::Pdf => "pdf",
        }
    }
}

/// Descriptor of one page in storage order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageEntry {
    /// Position in the document's native storage order
    pub physical_index: u32,

    /// Member name for archives, synthetic label for PDFs
    pub name: String,

    /// Byte size hint (compressed member size, or estimated raster size)
    pub size_hint: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("cannot access {path}: {source}")]
    NotAccessible {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("corrupt document: {0}")]
    Corrupt(String),
    #[error("failed to decode page {index}: {reason}")]
    DecodeFailed { index: u32, reason: String },
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("document source is closed")]
    Closed,
}

impl SourceError {
    /// True for errors that concern a single page rather than the document.
    pub fn is_page_level(&self) -> bool {
        matches!(
            self,
            SourceError::DecodeFailed { .. } | SourceError::PageOutOfRange { .. }
        )
    }
}

/// One open document.
///
/// Implementations must be shareable with decode workers; `decode_page` may
/// be called concurrently for different indices.
pub trait DocumentSource: Send + Sync {
    fn format(&self) -> SourceFormat;

    /// Page entries in physical order.
    fn entries(&self) -> &[PageEntry];

    fn page_count(&self) -> u32 {
        self.entries().len() as u32
    }

    fn decode_page(&self, physical_index: u32) -> Result<RgbaImage, SourceError>;

    /// Release the source's own native resources. Later decodes fail with
    /// [`SourceError::Closed`].
    fn close(&self);
}

/// Opens raw input into a [`DocumentSource`].
pub trait SourceOpener: Send + Sync {
    fn open(&self, source: OpenSource) -> Result<Arc<dyn DocumentSource>, SourceError>;
}

/// Opener that sniffs the format and dispatches to the built-in sources.
#[derive(Debug, Clone, Copy)]
pub struct DefaultOpener {
    pdf_scale: f32,
}

impl DefaultOpener {
    pub fn new(pdf_scale: f32) -> Self {
        Self { pdf_scale }
    }
}

impl Default for DefaultOpener {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl SourceOpener for DefaultOpener {
    fn open(&self, source: OpenSource) -> Result<Arc<dyn DocumentSource>, SourceError> {
        let bytes = source.into_bytes()?;

        match sniff_format(&bytes) {
            Some(SourceFormat::Archive) => Ok(Arc::new(ArchiveSource::from_bytes(bytes)?)),
            Some(SourceFormat::Pdf) => Ok(Arc::new(PdfSource::from_bytes(&bytes, self.pdf_scale)?)),
            None => Err(SourceError::UnsupportedFormat(
                "neither a zip archive nor a PDF document".to_owned(),
            )),
        }
    }
}

/// Open with the default opener at 1:1 PDF scale.
pub fn open_source(source: OpenSource) -> Result<Arc<dyn DocumentSource>, SourceError> {
    DefaultOpener::default().open(source)
}

pub fn sniff_format(bytes: &[u8]) -> Option<SourceFormat> {
    if bytes.starts_with(b"PK\x03\x04") || bytes.starts_with(b"PK\x05\x06") {
        return Some(SourceFormat::Archive);
    }

    // PDF headers may be preceded by junk; readers accept it within the first 1 KiB.
    let head = &bytes[..bytes.len().min(1024)];
    if head.windows(5).any(|window| window == b"%PDF-") {
        return Some(SourceFormat::Pdf);
    }

    None
}
