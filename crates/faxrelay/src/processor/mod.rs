pub mod image;
pub mod pdf;

use std::path::{Path, PathBuf};

use tempfile::TempPath;

use crate::error::ConversionError;
use crate::worker::job::FileHandle;

pub use image::{decode_pages, FaxEncoding, FaxPage, FaxStrip, Frame, FrameColor, Page};
pub use pdf::{build_pdf, count_pages, PdfConverter};

/// A converted document on disk. The backing file is removed when the
/// artifact is dropped, whichever way the job ends.
#[derive(Debug)]
pub struct DocumentArtifact {
    path: TempPath,
    pub page_count: usize,
    pub valid: bool,
}

impl DocumentArtifact {
    pub fn new(path: TempPath, page_count: usize, valid: bool) -> Self {
        Self {
            path,
            page_count,
            valid,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_bytes(&self) -> std::io::Result<Vec<u8>> {
        std::fs::read(&self.path)
    }

    /// Removes the backing file now instead of on drop.
    pub fn discard(self) -> std::io::Result<PathBuf> {
        let path = self.path.to_path_buf();
        self.path.close()?;
        Ok(path)
    }
}

/// Turns a scanned image into a paginated document artifact.
pub trait DocumentConverter: Send + Sync {
    fn convert(&self, handle: &FileHandle) -> Result<DocumentArtifact, ConversionError>;
}
