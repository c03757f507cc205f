use super::Splitter;
use crate::error::CritError;
use crate::error::Result;
use crate::mapping::MappingTable;
use crate::mapping::StreamTag;

const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Everything that keeps a PNG decodable is critical: the signature, every
/// chunk header and CRC, and the payloads of every chunk except `IDAT`. Only
/// the compressed pixel data inside `IDAT` chunks may degrade.
///
/// A chunk whose declared length runs past the end of the buffer terminates
/// the walk; the truncated tail stays unmapped.
pub(super) fn partition(buf: &[u8]) -> Result<MappingTable> {
    if buf.len() < SIGNATURE.len() || buf[..SIGNATURE.len()] != SIGNATURE {
        return Err(CritError::InvalidArg("not a PNG: bad signature".into()));
    }

    let mut split = Splitter::new();
    split.emit(8, StreamTag::Critical)?;

    let mut off = SIGNATURE.len();
    while off + 8 <= buf.len() {
        let length = u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
            as usize;
        if off + 12 + length > buf.len() {
            break;
        }
        let is_idat = &buf[off + 4..off + 8] == b"IDAT";

        // Chunk header: 4-byte length plus 4-byte type.
        split.emit(8, StreamTag::Critical)?;
        if length > 0 {
            let tag = if is_idat {
                StreamTag::NonCritical
            } else {
                StreamTag::Critical
            };
            split.emit(length as u64, tag)?;
        }
        // CRC.
        split.emit(4, StreamTag::Critical)?;
        off += 12 + length;
    }

    Ok(split.finish())
}
