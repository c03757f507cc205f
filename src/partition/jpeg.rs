use memchr::memchr_iter;

use super::Splitter;
use crate::error::CritError;
use crate::error::Result;
use crate::mapping::MappingTable;
use crate::mapping::StreamTag;

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;

/// JPEG marker segments carry the tables and dimensions a decoder cannot
/// live without, so every segment is critical, including the marker byte
/// pair and the two length bytes. Only the entropy-coded scan data between
/// an SOS segment and the next marker is non-critical.
///
/// A segment's length field counts the payload plus the length bytes
/// themselves but not the marker, so each critical span is `length + 2`
/// bytes long.
// TODO: restart markers (FF D0..FF D7) inside the scan are standalone and
// currently terminate the entropy span early; baseline JPEGs without
// restart intervals are unaffected.
pub(super) fn partition(buf: &[u8]) -> Result<MappingTable> {
    if buf.len() < 2 || buf[0] != 0xFF || buf[1] != SOI {
        return Err(CritError::InvalidArg("not a JPEG: missing SOI".into()));
    }

    let mut split = Splitter::new();
    split.emit(2, StreamTag::Critical)?;

    let mut off = 2;
    while off + 2 <= buf.len() {
        if buf[off] != 0xFF {
            return Err(CritError::InvalidArg(format!(
                "expected JPEG marker at offset {off}"
            )));
        }
        let marker = buf[off + 1];

        if marker == EOI {
            split.emit(2, StreamTag::Critical)?;
            break;
        }

        if off + 4 > buf.len() {
            return Err(CritError::InvalidArg("truncated JPEG segment".into()));
        }
        let length = u16::from_be_bytes([buf[off + 2], buf[off + 3]]) as usize;
        let segment = length + 2;
        if off + segment > buf.len() {
            return Err(CritError::InvalidArg(
                "JPEG segment length exceeds buffer".into(),
            ));
        }
        split.emit(segment as u64, StreamTag::Critical)?;
        off += segment;

        if marker == SOS {
            let end = scan_end(buf, off);
            split.emit((end - off) as u64, StreamTag::NonCritical)?;
            off = end;
        }
    }

    Ok(split.finish())
}

/// First offset at or after `start` holding a real marker: `FF` followed by
/// anything but the `00` stuffing byte. Without one the scan data runs to
/// the end of the buffer.
fn scan_end(buf: &[u8], start: usize) -> usize {
    for pos in memchr_iter(0xFF, &buf[start..]) {
        let abs = start + pos;
        if abs + 1 < buf.len() && buf[abs + 1] != 0x00 {
            return abs;
        }
    }
    buf.len()
}
