use log::debug;

use crate::error::CritError;
use crate::error::Result;
use crate::mapping::MappingTable;
use crate::mapping::StreamTag;

const HEADER_LEN: u64 = 8;
const IFD_ENTRY_LEN: usize = 12;

const TAG_STRIP_OFFSETS: u16 = 0x0111;
const TAG_STRIP_BYTE_COUNTS: u16 = 0x0117;
// ColorMatrix1, CameraCalibration1, AsShotNeutral, MakerNoteSafety: the DNG
// calibration tags whose referenced blocks a raw developer cannot rebuild.
const DNG_METADATA_TAGS: [u16; 4] = [0xC621, 0xC623, 0xC628, 0xC634];

const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Little,
    Big,
}

fn read_u16(buf: &[u8], off: usize, order: ByteOrder) -> Option<u16> {
    let bytes = buf.get(off..off + 2)?;
    Some(match order {
        ByteOrder::Little => u16::from_le_bytes([bytes[0], bytes[1]]),
        ByteOrder::Big => u16::from_be_bytes([bytes[0], bytes[1]]),
    })
}

fn read_u32(buf: &[u8], off: usize, order: ByteOrder) -> Option<u32> {
    let bytes = buf.get(off..off + 4)?;
    Some(match order {
        ByteOrder::Little => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        ByteOrder::Big => u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
    })
}

/// TIFF and DNG. The header, the first IFD, and the blocks referenced by the
/// DNG calibration tags are critical; the image strips are not.
///
/// Unlike the other partitioners this one does NOT cover the whole buffer:
/// bytes referenced by no recognised tag (later IFDs, thumbnails, vendor
/// blobs) stay unmapped, read back as zeros, and are dropped by the next
/// repartition. Offsets and sizes come from the file itself, so any block
/// that points outside the buffer is ignored rather than trusted.
pub(super) fn partition(buf: &[u8]) -> Result<MappingTable> {
    if buf.len() < HEADER_LEN as usize {
        return Err(CritError::InvalidArg("TIFF header truncated".into()));
    }
    let order = match &buf[..2] {
        b"II" => ByteOrder::Little,
        b"MM" => ByteOrder::Big,
        _ => return Err(CritError::InvalidArg("bad TIFF byte order mark".into())),
    };
    let magic = read_u16(buf, 2, order).unwrap_or(0);
    if magic != 42 {
        return Err(CritError::InvalidArg(format!("bad TIFF magic {magic}")));
    }
    let ifd_off = read_u32(buf, 4, order).unwrap_or(0) as usize;

    let mut table = MappingTable::new();
    table.insert(0, HEADER_LEN - 1, 0, HEADER_LEN - 1, StreamTag::Critical)?;

    let entry_count = read_u16(buf, ifd_off, order)
        .ok_or_else(|| CritError::InvalidArg("IFD offset out of bounds".into()))?
        as usize;
    let ifd_len = 2 + entry_count * IFD_ENTRY_LEN + 4;
    if ifd_off + ifd_len > buf.len() {
        return Err(CritError::InvalidArg("IFD exceeds buffer".into()));
    }
    table.insert(
        ifd_off as u64,
        (ifd_off + ifd_len - 1) as u64,
        HEADER_LEN,
        HEADER_LEN + ifd_len as u64 - 1,
        StreamTag::Critical,
    )?;

    let mut strip_offsets: Vec<u32> = Vec::new();
    let mut strip_lengths: Vec<u32> = Vec::new();
    let mut metadata: Vec<(u64, u64)> = Vec::new();

    for i in 0..entry_count {
        let entry = ifd_off + 2 + i * IFD_ENTRY_LEN;
        let (Some(tag), Some(field_type), Some(count), Some(value)) = (
            read_u16(buf, entry, order),
            read_u16(buf, entry + 2, order),
            read_u32(buf, entry + 4, order),
            read_u32(buf, entry + 8, order),
        ) else {
            break;
        };

        if DNG_METADATA_TAGS.contains(&tag) {
            let elem = if field_type == TYPE_SHORT { 2 } else { 4 };
            metadata.push((u64::from(value), u64::from(count) * elem));
        } else if tag == TAG_STRIP_OFFSETS || tag == TAG_STRIP_BYTE_COUNTS {
            // Small values are inlined in the entry's value field; anything
            // larger is an array of 32-bit words at that offset.
            let inlined =
                (field_type == TYPE_SHORT && count <= 2) || (field_type == TYPE_LONG && count == 1);
            let values = if inlined {
                vec![value]
            } else {
                let base = value as usize;
                if base + count as usize * 4 > buf.len() {
                    continue;
                }
                (0..count as usize)
                    .filter_map(|j| read_u32(buf, base + 4 * j, order))
                    .collect()
            };
            if tag == TAG_STRIP_OFFSETS {
                strip_offsets = values;
            } else {
                strip_lengths = values;
            }
        }
    }

    // Calibration blocks extend the critical stream past the IFD, in the
    // order their tags were encountered.
    let mut crit = HEADER_LEN + ifd_len as u64;
    for (off, len) in metadata {
        if len == 0 || off + len > buf.len() as u64 {
            continue;
        }
        match table.insert(off, off + len - 1, crit, crit + len - 1, StreamTag::Critical) {
            Ok(()) => crit += len,
            Err(err) => debug!("skipping DNG metadata block at {off}: {err}"),
        }
    }

    // Image strips become the whole of the non-critical stream, paired with
    // their byte counts positionally.
    let mut noncrit = 0u64;
    for (&off, &len) in strip_offsets.iter().zip(strip_lengths.iter()) {
        let (off, len) = (u64::from(off), u64::from(len));
        if len == 0 || off + len > buf.len() as u64 {
            continue;
        }
        match table.insert(
            off,
            off + len - 1,
            noncrit,
            noncrit + len - 1,
            StreamTag::NonCritical,
        ) {
            Ok(()) => noncrit += len,
            Err(err) => debug!("skipping image strip at {off}: {err}"),
        }
    }

    Ok(table)
}
