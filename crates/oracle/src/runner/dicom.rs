//! DICOM parsing hook and the parsed-file cache.

use std::path::{Path, PathBuf};

use lru::LruCache;
use stone_core::StoneError;
use tracing::debug;

use crate::command::HttpHeaders;
use crate::messages::ParsedDicom;

/// Turns raw DICOM bytes into an application-defined representation.
pub trait DicomParser: Send + Sync {
    /// Parse a DICOM file. `pixel_data_included == false` allows stopping
    /// before the pixel data element.
    fn parse_file(&self, content: &[u8], pixel_data_included: bool) -> Result<ParsedDicom, StoneError>;

    /// Parse a `multipart/related` WADO-RS answer holding a single instance.
    fn parse_wado_answer(&self, answer: &[u8], headers: &HttpHeaders) -> Result<ParsedDicom, StoneError>;
}

/// Key of a cached parse result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DicomCacheKey {
    File(PathBuf),
    Wado { sop_instance_uid: String, transcode: Option<String> },
}

impl DicomCacheKey {
    pub fn file(path: &Path) -> Self {
        DicomCacheKey::File(path.to_path_buf())
    }
}

#[derive(Clone)]
pub struct CachedDicom {
    pub dicom: ParsedDicom,
    pub file_size: u64,
    pub has_pixel_data: bool,
}

/// Least-recently-used cache bounded by the summed size of the source files.
pub struct ParsedDicomCache {
    entries: LruCache<DicomCacheKey, CachedDicom>,
    max_bytes: u64,
    current_bytes: u64,
}

impl ParsedDicomCache {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            entries: LruCache::unbounded(),
            max_bytes,
            current_bytes: 0,
        }
    }

    /// Entry for `key`, if it holds pixel data whenever `need_pixel_data` is set.
    pub fn acquire(&mut self, key: &DicomCacheKey, need_pixel_data: bool) -> Option<CachedDicom> {
        let entry = self.entries.get(key)?;
        if need_pixel_data && !entry.has_pixel_data {
            return None;
        }
        Some(entry.clone())
    }

    pub fn insert(&mut self, key: DicomCacheKey, value: CachedDicom) {
        if value.file_size > self.max_bytes {
            debug!(?key, size = value.file_size, "file too large for the DICOM cache");
            return;
        }
        if let Some(previous) = self.entries.put(key, value.clone()) {
            self.current_bytes -= previous.file_size;
        }
        self.current_bytes += value.file_size;
        while self.current_bytes > self.max_bytes {
            match self.entries.pop_lru() {
                Some((_, evicted)) => self.current_bytes -= evicted.file_size,
                None => break,
            }
        }
    }

    pub fn invalidate(&mut self, key: &DicomCacheKey) {
        if let Some(previous) = self.entries.pop(key) {
            self.current_bytes -= previous.file_size;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn current_bytes(&self) -> u64 {
        self.current_bytes
    }
}
