//! Decoding of scanned images into pages.
//!
//! TIFF goes through the `tiff` decoder directly so every directory (page)
//! of a multi-page fax is kept; other formats fall back to `image`.
//! CCITT-compressed directories are not decoded at all: their strips are
//! lifted out verbatim and embedded in the PDF behind `CCITTFaxDecode`.

use std::io::Cursor;

use image::GenericImageView;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;
use tiff::ColorType;

use crate::error::ConversionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameColor {
    Gray,
    Rgb,
}

impl FrameColor {
    pub fn pdf_name(self) -> &'static str {
        match self {
            Self::Gray => "DeviceGray",
            Self::Rgb => "DeviceRGB",
        }
    }

    fn channels(self) -> usize {
        match self {
            Self::Gray => 1,
            Self::Rgb => 3,
        }
    }
}

/// One page worth of uncompressed samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub color: FrameColor,
    pub bits_per_component: u8,
    pub data: Vec<u8>,
}

impl Frame {
    /// Expected byte length for the declared geometry; rows are byte-aligned.
    pub fn expected_len(&self) -> usize {
        let row_bits =
            self.width as usize * self.color.channels() * self.bits_per_component as usize;
        row_bits.div_ceil(8) * self.height as usize
    }
}

/// CCITT coding scheme of a fax page, as named by the TIFF `Compression`
/// tag (2, 3 or 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaxEncoding {
    ModifiedHuffman,
    Group3 {
        two_dimensional: bool,
        byte_aligned: bool,
    },
    Group4,
}

impl FaxEncoding {
    /// The `K` decode parameter of `CCITTFaxDecode`.
    pub fn k(self) -> i64 {
        match self {
            Self::ModifiedHuffman => 0,
            Self::Group3 {
                two_dimensional, ..
            } => i64::from(two_dimensional),
            Self::Group4 => -1,
        }
    }

    pub fn byte_aligned(self) -> bool {
        match self {
            Self::ModifiedHuffman => true,
            Self::Group3 { byte_aligned, .. } => byte_aligned,
            Self::Group4 => false,
        }
    }

    /// Group 3 rows are delimited by EOL codes.
    pub fn end_of_line(self) -> bool {
        matches!(self, Self::Group3 { .. })
    }
}

/// One independently coded band of rows, MSB-first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaxStrip {
    pub rows: u32,
    pub data: Vec<u8>,
}

/// A bilevel page still in its CCITT coding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaxPage {
    pub width: u32,
    pub height: u32,
    pub encoding: FaxEncoding,
    pub black_is_1: bool,
    pub strips: Vec<FaxStrip>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Page {
    Raster(Frame),
    Fax(FaxPage),
}

impl Page {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Raster(frame) => (frame.width, frame.height),
            Self::Fax(fax) => (fax.width, fax.height),
        }
    }
}

// Classic and BigTIFF, both byte orders.
fn is_tiff(bytes: &[u8]) -> bool {
    [b"II*\0", b"MM\0*", b"II+\0", b"MM\0+"]
        .iter()
        .any(|magic| bytes.starts_with(*magic))
}

/// Decodes every page of `bytes`, in order.
pub fn decode_pages(bytes: &[u8]) -> Result<Vec<Page>, ConversionError> {
    if bytes.is_empty() {
        return Err(ConversionError::Decode("source file is empty".to_string()));
    }

    let pages = if is_tiff(bytes) {
        decode_tiff(bytes)?
    } else {
        vec![Page::Raster(decode_single(bytes)?)]
    };

    if pages.is_empty() {
        return Err(ConversionError::NoPages);
    }
    Ok(pages)
}

fn decode_err(e: tiff::TiffError) -> ConversionError {
    ConversionError::Decode(e.to_string())
}

fn decode_tiff(bytes: &[u8]) -> Result<Vec<Page>, ConversionError> {
    let mut decoder = Decoder::new(Cursor::new(bytes)).map_err(decode_err)?;
    let mut pages = Vec::new();

    loop {
        let (width, height) = decoder.dimensions().map_err(decode_err)?;
        let compression = decoder
            .find_tag_unsigned::<u16>(Tag::Compression)
            .map_err(decode_err)?
            .unwrap_or(1);

        let page = match compression {
            2..=4 => Page::Fax(fax_page(&mut decoder, bytes, width, height, compression)?),
            _ => {
                let color_type = decoder.colortype().map_err(decode_err)?;
                let samples = decoder.read_image().map_err(decode_err)?;
                Page::Raster(tiff_frame(width, height, color_type, samples)?)
            }
        };
        pages.push(page);

        if !decoder.more_images() {
            break;
        }
        decoder.next_image().map_err(decode_err)?;
    }

    Ok(pages)
}

const T4_TWO_DIMENSIONAL: u32 = 0b001;
const T4_FILL_BITS: u32 = 0b100;

fn fax_page(
    decoder: &mut Decoder<Cursor<&[u8]>>,
    bytes: &[u8],
    width: u32,
    height: u32,
    compression: u16,
) -> Result<FaxPage, ConversionError> {
    if decoder.find_tag(Tag::TileWidth).map_err(decode_err)?.is_some() {
        return Err(ConversionError::UnsupportedPixels(
            "tiled CCITT image".to_string(),
        ));
    }

    let encoding = match compression {
        2 => FaxEncoding::ModifiedHuffman,
        3 => {
            let options = decoder
                .find_tag_unsigned::<u32>(Tag::from_u16_exhaustive(292))
                .map_err(decode_err)?
                .unwrap_or(0);
            FaxEncoding::Group3 {
                two_dimensional: options & T4_TWO_DIMENSIONAL != 0,
                byte_aligned: options & T4_FILL_BITS != 0,
            }
        }
        _ => FaxEncoding::Group4,
    };
    let photometric = decoder
        .find_tag_unsigned::<u16>(Tag::PhotometricInterpretation)
        .map_err(decode_err)?
        .unwrap_or(0);
    let lsb_first = decoder
        .find_tag_unsigned::<u16>(Tag::FillOrder)
        .map_err(decode_err)?
        == Some(2);
    let rows_per_strip = decoder
        .find_tag_unsigned::<u32>(Tag::RowsPerStrip)
        .map_err(decode_err)?
        .unwrap_or(height)
        .clamp(1, height.max(1));
    let offsets = decoder
        .get_tag_u64_vec(Tag::StripOffsets)
        .map_err(decode_err)?;
    let counts = decoder
        .get_tag_u64_vec(Tag::StripByteCounts)
        .map_err(decode_err)?;
    if offsets.len() != counts.len() {
        return Err(ConversionError::Decode(format!(
            "{} strip offsets but {} strip byte counts",
            offsets.len(),
            counts.len()
        )));
    }

    let mut strips = Vec::with_capacity(offsets.len());
    let mut remaining = height;
    for (offset, count) in offsets.into_iter().zip(counts) {
        if remaining == 0 {
            break;
        }
        let data = usize::try_from(offset)
            .ok()
            .zip(usize::try_from(count).ok())
            .and_then(|(start, len)| bytes.get(start..start.checked_add(len)?))
            .ok_or_else(|| {
                ConversionError::Decode(format!(
                    "strip at {} ({} bytes) lies outside the file",
                    offset, count
                ))
            })?;
        let rows = rows_per_strip.min(remaining);
        remaining -= rows;
        strips.push(FaxStrip {
            rows,
            data: if lsb_first {
                data.iter().map(|b| b.reverse_bits()).collect()
            } else {
                data.to_vec()
            },
        });
    }
    if remaining > 0 {
        return Err(ConversionError::Decode(format!(
            "strips cover {} of {} rows",
            height - remaining,
            height
        )));
    }

    Ok(FaxPage {
        width,
        height,
        encoding,
        black_is_1: photometric == 1,
        strips,
    })
}

fn tiff_frame(
    width: u32,
    height: u32,
    color_type: ColorType,
    samples: DecodingResult,
) -> Result<Frame, ConversionError> {
    let frame = match (color_type, samples) {
        (ColorType::Gray(bits @ (1 | 8)), DecodingResult::U8(data)) => Frame {
            width,
            height,
            color: FrameColor::Gray,
            bits_per_component: bits,
            data,
        },
        (ColorType::Gray(16), DecodingResult::U16(data)) => Frame {
            width,
            height,
            color: FrameColor::Gray,
            bits_per_component: 8,
            data: data.into_iter().map(|v| (v >> 8) as u8).collect(),
        },
        (ColorType::RGB(8), DecodingResult::U8(data)) => Frame {
            width,
            height,
            color: FrameColor::Rgb,
            bits_per_component: 8,
            data,
        },
        (ColorType::RGBA(8), DecodingResult::U8(data)) => Frame {
            width,
            height,
            color: FrameColor::Rgb,
            bits_per_component: 8,
            data: data
                .chunks_exact(4)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect(),
        },
        (other, _) => {
            return Err(ConversionError::UnsupportedPixels(format!("{:?}", other)));
        }
    };

    if frame.data.len() < frame.expected_len() {
        return Err(ConversionError::Decode(format!(
            "page data truncated: {} of {} bytes",
            frame.data.len(),
            frame.expected_len()
        )));
    }
    Ok(frame)
}

fn decode_single(bytes: &[u8]) -> Result<Frame, ConversionError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| ConversionError::Decode(format!("Failed to load image: {}", e)))?;
    let (width, height) = img.dimensions();

    let frame = if img.color().has_color() {
        Frame {
            width,
            height,
            color: FrameColor::Rgb,
            bits_per_component: 8,
            data: img.to_rgb8().into_raw(),
        }
    } else {
        Frame {
            width,
            height,
            color: FrameColor::Gray,
            bits_per_component: 8,
            data: img.to_luma8().into_raw(),
        }
    };
    Ok(frame)
}
