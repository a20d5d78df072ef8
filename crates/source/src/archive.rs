//! Image-archive (zip/cbz) document source.

use crate::{DocumentSource, PageEntry, RgbaImage, SourceError, SourceFormat};
use std::cmp::Ordering;
use std::io::{Cursor, Read};
use std::sync::{Mutex, MutexGuard};
use zip::ZipArchive;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp"];

/// Largest member that will be read into memory.
const DEFAULT_MEMBER_LIMIT: u64 = 256 * 1024 * 1024;

/// Upper bound on the up-front buffer taken from a member's declared size.
const PREALLOC_LIMIT: u64 = 16 * 1024 * 1024;

type Archive = ZipArchive<Cursor<Vec<u8>>>;

/// Comic archive: every image member is one page, in natural filename order.
pub struct ArchiveSource {
    entries: Vec<PageEntry>,
    /// Zip member index for each physical page
    members: Vec<usize>,
    archive: Mutex<Option<Archive>>,
    member_limit: u64,
}

impl ArchiveSource {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, SourceError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|err| SourceError::Corrupt(format!("unreadable zip archive: {err}")))?;

        let mut pages: Vec<(String, usize, u64)> = Vec::new();
        for index in 0..archive.len() {
            let member = archive
                .by_index(index)
                .map_err(|err| SourceError::Corrupt(format!("zip member {index}: {err}")))?;

            if member.is_dir() || !is_page_member(member.name()) {
                continue;
            }

            pages.push((member.name().to_owned(), index, member.compressed_size()));
        }

        if pages.is_empty() {
            return Err(SourceError::UnsupportedFormat("archive contains no images".to_owned()));
        }

        pages.sort_by(|a, b| natural_cmp(&a.0, &b.0));

        let members = pages.iter().map(|(_, index, _)| *index).collect();
        let entries = pages
            .into_iter()
            .enumerate()
            .map(|(physical_index, (name, _, size_hint))| PageEntry {
                physical_index: physical_index as u32,
                name,
                size_hint,
            })
            .collect::<Vec<_>>();

        tracing::debug!(pages = entries.len(), "opened image archive");

        Ok(Self {
            entries,
            members,
            archive: Mutex::new(Some(archive)),
            member_limit: DEFAULT_MEMBER_LIMIT,
        })
    }

    #[cfg(test)]
    fn with_member_limit(mut self, bytes: u64) -> Self {
        self.member_limit = bytes;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Option<Archive>> {
        self.archive.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_member(&self, physical_index: u32) -> Result<Vec<u8>, SourceError> {
        let member_index = *self.members.get(physical_index as usize).ok_or(
            SourceError::PageOutOfRange { page: physical_index, page_count: self.page_count() },
        )?;

        let mut guard = self.lock();
        let archive = guard.as_mut().ok_or(SourceError::Closed)?;
        let mut member = archive.by_index(member_index).map_err(|err| {
            SourceError::DecodeFailed { index: physical_index, reason: err.to_string() }
        })?;

        let too_large = || SourceError::DecodeFailed {
            index: physical_index,
            reason: format!("member exceeds {} bytes", self.member_limit),
        };
        if member.size() > self.member_limit {
            return Err(too_large());
        }

        // The declared size comes from the zip header and may lie.
        let mut buffer = Vec::with_capacity(member.size().min(PREALLOC_LIMIT) as usize);
        member.by_ref().take(self.member_limit + 1).read_to_end(&mut buffer).map_err(|err| {
            SourceError::DecodeFailed { index: physical_index, reason: err.to_string() }
        })?;
        if buffer.len() as u64 > self.member_limit {
            return Err(too_large());
        }

        Ok(buffer)
    }
}

impl DocumentSource for ArchiveSource {
    fn format(&self) -> SourceFormat {
        SourceFormat::Archive
    }

    fn entries(&self) -> &[PageEntry] {
        &self.entries
    }

    fn decode_page(&self, physical_index: u32) -> Result<RgbaImage, SourceError> {
        // The archive lock covers only the member read; image decoding runs unlocked.
        let bytes = self.read_member(physical_index)?;

        let image = image::load_from_memory(&bytes).map_err(|err| SourceError::DecodeFailed {
            index: physical_index,
            reason: err.to_string(),
        })?;

        Ok(image.to_rgba8())
    }

    fn close(&self) {
        self.lock().take();
    }
}

fn is_page_member(name: &str) -> bool {
    if name.starts_with("__MACOSX/") {
        return false;
    }

    let file_name = name.rsplit('/').next().unwrap_or(name);
    if file_name.starts_with('.') {
        return false;
    }

    file_name
        .rsplit_once('.')
        .map(|(_, ext)| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

/// Filename ordering where digit runs compare numerically ("page2" < "page10").
pub(crate) fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let l_digits = take_digits(&mut left);
                let r_digits = take_digits(&mut right);
                let l_trimmed = l_digits.trim_start_matches('0');
                let r_trimmed = r_digits.trim_start_matches('0');

                let ordering = l_trimmed
                    .len()
                    .cmp(&r_trimmed.len())
                    .then_with(|| l_trimmed.cmp(r_trimmed));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            (Some(l), Some(r)) => {
                let ordering = l.to_ascii_lowercase().cmp(&r.to_ascii_lowercase());
                if ordering != Ordering::Equal {
                    return ordering;
                }
                left.next();
                right.next();
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(c) = chars.peek().copied() {
        if !c.is_ascii_digit() {
            break;
        }
        digits.push(c);
        chars.next();
    }
    digits
}
