use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;
use zerocopy::little_endian::I32;
use zerocopy::little_endian::U16;
use zerocopy::little_endian::U32;

use super::Splitter;
use crate::error::CritError;
use crate::error::Result;
use crate::mapping::MappingTable;
use crate::mapping::StreamTag;

/// BITMAPFILEHEADER, 14 bytes.
#[derive(FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct FileHeader {
    magic: [u8; 2],
    file_size: U32,
    reserved: [u8; 4],
    pixel_data_off: U32,
}

/// BITMAPINFOHEADER, 40 bytes. Earlier or later DIB header revisions are
/// rejected by the bpp check below rather than recognised.
#[derive(FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct InfoHeader {
    header_size: U32,
    width: I32,
    height: I32,
    planes: U16,
    bpp: U16,
    compression: U32,
    image_size: U32,
    x_pixels_per_meter: I32,
    y_pixels_per_meter: I32,
    colors_used: U32,
    colors_important: U32,
}

const HEADERS_LEN: u64 = 54;

/// Uncompressed 24-bpp BMP only. Headers, any colour table, and the row
/// padding bytes are critical; the pixel bytes of each row are not. Rows are
/// laid out bottom-up for positive heights and top-down for negative ones,
/// which makes no difference to the split.
pub(super) fn partition(buf: &[u8]) -> Result<MappingTable> {
    let len = buf.len() as u64;
    if len < HEADERS_LEN {
        return Err(CritError::InvalidArg("BMP shorter than its headers".into()));
    }
    let (file_header, rest) = FileHeader::ref_from_prefix(buf)
        .map_err(|_| CritError::InvalidArg("unreadable BMP file header".into()))?;
    let (info, _) = InfoHeader::ref_from_prefix(rest)
        .map_err(|_| CritError::InvalidArg("unreadable BMP info header".into()))?;

    if file_header.magic != *b"BM" {
        return Err(CritError::InvalidArg("not a BMP: bad magic".into()));
    }
    let bpp = info.bpp.get();
    if bpp != 24 {
        return Err(CritError::InvalidArg(format!(
            "unsupported BMP depth: {bpp} bpp"
        )));
    }
    let width = info.width.get();
    let height = info.height.get();
    if width <= 0 || height == 0 {
        return Err(CritError::InvalidArg(format!(
            "bad BMP dimensions: {width}x{height}"
        )));
    }
    let pixel_off = u64::from(file_header.pixel_data_off.get());
    if pixel_off > len || pixel_off < HEADERS_LEN {
        return Err(CritError::InvalidArg(format!(
            "BMP pixel data offset {pixel_off} out of bounds"
        )));
    }

    let mut split = Splitter::new();
    split.emit(14, StreamTag::Critical)?;
    split.emit(40, StreamTag::Critical)?;
    // Colour table or gap between the headers and the pixel array.
    split.emit(pixel_off - HEADERS_LEN, StreamTag::Critical)?;

    let row_pix = 3 * width as u64;
    let row_pad = row_pix.div_ceil(4) * 4;
    let mut row_start = pixel_off;
    for _ in 0..height.unsigned_abs() {
        if row_start >= len {
            break;
        }
        let pix_end = (row_start + row_pix).min(len);
        split.emit(pix_end - row_start, StreamTag::NonCritical)?;
        let pad_end = (row_start + row_pad).min(len);
        split.emit(pad_end - pix_end, StreamTag::Critical)?;
        row_start += row_pad;
    }
    // Anything past the pixel array (an ICC profile, usually) degrades with
    // the pixels.
    if row_start < len {
        split.emit(len - row_start, StreamTag::NonCritical)?;
    }

    Ok(split.finish())
}

#[cfg(test)]
fn build_bmp(width: i32, height: i32, extra_gap: usize) -> Vec<u8> {
    let row_pix = 3 * width.unsigned_abs() as usize;
    let row_pad = row_pix.div_ceil(4) * 4;
    let pixel_off = 54 + extra_gap;
    let pixel_len = row_pad * height.unsigned_abs() as usize;

    let mut buf = Vec::new();
    buf.extend_from_slice(b"BM");
    buf.extend_from_slice(&((pixel_off + pixel_len) as u32).to_le_bytes());
    buf.extend_from_slice(&[0; 4]);
    buf.extend_from_slice(&(pixel_off as u32).to_le_bytes());
    buf.extend_from_slice(&40u32.to_le_bytes());
    buf.extend_from_slice(&width.to_le_bytes());
    buf.extend_from_slice(&height.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes());
    buf.extend_from_slice(&24u16.to_le_bytes());
    buf.extend_from_slice(&[0; 24]); // compression .. colors_important
    buf.resize(pixel_off, 0xEE);
    for i in 0..pixel_len {
        buf.push(i as u8);
    }
    buf
}
