use std::io::Write;
use std::path::{Path, PathBuf};

use lopdf::{dictionary, Dictionary, Document, Object, Stream};

use crate::error::ConversionError;
use crate::processor::image::{decode_pages, FaxPage, FaxStrip, Frame, Page};
use crate::processor::{DocumentArtifact, DocumentConverter};
use crate::sanitize::redact_path;
use crate::worker::job::FileHandle;

// A4 in points
const PAGE_WIDTH: f64 = 595.0;
const PAGE_HEIGHT: f64 = 842.0;
const MARGIN: f64 = 18.0;

fn raster_xobject(frame: &Frame) -> Stream {
    Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => frame.width as i64,
            "Height" => frame.height as i64,
            "ColorSpace" => frame.color.pdf_name(),
            "BitsPerComponent" => frame.bits_per_component as i64,
        },
        frame.data.clone(),
    )
}

// Already compressed; Flate over it would only grow the file.
fn fax_xobject(fax: &FaxPage, strip: &FaxStrip) -> Stream {
    Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => fax.width as i64,
            "Height" => strip.rows as i64,
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 1,
            "Filter" => "CCITTFaxDecode",
            "DecodeParms" => dictionary! {
                "K" => fax.encoding.k(),
                "Columns" => fax.width as i64,
                "Rows" => strip.rows as i64,
                "BlackIs1" => fax.black_is_1,
                "EncodedByteAlign" => fax.encoding.byte_aligned(),
                "EndOfLine" => fax.encoding.end_of_line(),
            },
        },
        strip.data.clone(),
    )
    .with_compression(false)
}

/// Assembles one PDF page per decoded page, in order. Raster samples are
/// stored losslessly (Flate) at their source resolution; CCITT strips are
/// embedded as-is, one image per strip stacked top to bottom.
pub fn build_pdf(pages: &[Page]) -> Result<Vec<u8>, ConversionError> {
    if pages.is_empty() {
        return Err(ConversionError::NoPages);
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());

    for page in pages {
        let (width, height) = page.dimensions();
        if width == 0 || height == 0 {
            return Err(ConversionError::Decode("page has no pixels".to_string()));
        }

        // Fit the scan inside the page, keeping its aspect ratio.
        let scale = ((PAGE_WIDTH - 2.0 * MARGIN) / width as f64)
            .min((PAGE_HEIGHT - 2.0 * MARGIN) / height as f64);
        let draw_width = width as f64 * scale;
        let draw_height = height as f64 * scale;
        let x = (PAGE_WIDTH - draw_width) / 2.0;
        let top = (PAGE_HEIGHT + draw_height) / 2.0;

        // (image, rows) bands from the top of the scan down
        let bands: Vec<(Stream, u32)> = match page {
            Page::Raster(frame) => vec![(raster_xobject(frame), frame.height)],
            Page::Fax(fax) => fax
                .strips
                .iter()
                .map(|strip| (fax_xobject(fax, strip), strip.rows))
                .collect(),
        };

        let mut xobjects = Dictionary::new();
        let mut content = String::new();
        let mut rows_above = 0u32;
        for (index, (image, rows)) in bands.into_iter().enumerate() {
            let name = format!("Im{}", index + 1);
            xobjects.set(name.as_str(), doc.add_object(image));

            rows_above += rows;
            let band_height = rows as f64 * scale;
            let y = top - rows_above as f64 * scale;
            content.push_str(&format!(
                "q\n{:.2} 0 0 {:.2} {:.2} {:.2} cm\n/{} Do\nQ\n",
                draw_width, band_height, x, y, name
            ));
        }
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), (PAGE_WIDTH as i64).into(), (PAGE_HEIGHT as i64).into()],
            "Resources" => dictionary! {
                "XObject" => xobjects,
            },
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| ConversionError::PdfBuild(e.to_string()))?;
    Ok(buffer)
}

/// Parses `bytes` as PDF and returns its page count.
pub fn count_pages(bytes: &[u8]) -> Result<usize, ConversionError> {
    if bytes.is_empty() {
        return Err(ConversionError::Validation("artifact is empty".to_string()));
    }
    if !bytes.starts_with(b"%PDF") {
        return Err(ConversionError::Validation(
            "artifact is missing the %PDF header".to_string(),
        ));
    }
    let doc = Document::load_mem(bytes)
        .map_err(|e| ConversionError::Validation(format!("artifact does not parse: {}", e)))?;
    Ok(doc.get_pages().len())
}

/// Converts scanned images into PDF artifacts under a temp directory.
pub struct PdfConverter {
    temp_dir: PathBuf,
}

impl PdfConverter {
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
        }
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    fn write_artifact(&self, stem: &str, bytes: &[u8]) -> Result<tempfile::TempPath, ConversionError> {
        let write_err = |source| ConversionError::WriteArtifact {
            path: self.temp_dir.clone(),
            source,
        };

        std::fs::create_dir_all(&self.temp_dir).map_err(write_err)?;
        let mut file = tempfile::Builder::new()
            .prefix(&format!("{}-", stem))
            .suffix(".pdf")
            .tempfile_in(&self.temp_dir)
            .map_err(write_err)?;
        file.write_all(bytes).map_err(write_err)?;
        file.as_file().sync_all().map_err(write_err)?;
        Ok(file.into_temp_path())
    }
}

impl DocumentConverter for PdfConverter {
    fn convert(&self, handle: &FileHandle) -> Result<DocumentArtifact, ConversionError> {
        let _span = tracing::info_span!("processor.pdf", file = %redact_path(&handle.path)).entered();

        let source = std::fs::read(&handle.path).map_err(|e| ConversionError::ReadSource {
            path: handle.path.clone(),
            source: e,
        })?;

        let pages = decode_pages(&source)?;
        let pdf = build_pdf(&pages)?;

        let stem = handle
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "fax".to_string());
        let path = self.write_artifact(&stem, &pdf)?;

        // Validate what actually landed on disk, not the in-memory buffer.
        let written = std::fs::read(&path).map_err(|e| ConversionError::WriteArtifact {
            path: path.to_path_buf(),
            source: e,
        })?;
        let page_count = count_pages(&written)?;
        if page_count != pages.len() {
            return Err(ConversionError::Validation(format!(
                "artifact has {} page(s), source has {} page(s)",
                page_count,
                pages.len()
            )));
        }

        tracing::debug!(pages = page_count, bytes = written.len(), "PDF artifact written");
        Ok(DocumentArtifact::new(path, page_count, true))
    }
}
