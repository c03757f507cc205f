use super::Splitter;
use crate::error::Result;
use crate::mapping::MappingTable;
use crate::mapping::StreamTag;

/// Camera raw files vary too much to parse properly, so this is coarse:
/// the leading block, where every known raw container keeps its header and
/// calibration metadata, is critical and the sensor dump after it is not.
const HEADER_LEN: u64 = 1024;

pub(super) fn partition(buf: &[u8]) -> Result<MappingTable> {
    let len = buf.len() as u64;
    let mut split = Splitter::new();
    split.emit(HEADER_LEN.min(len), StreamTag::Critical)?;
    if len > HEADER_LEN {
        split.emit(len - HEADER_LEN, StreamTag::NonCritical)?;
    }
    Ok(split.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_file_is_entirely_critical() {
        let table = partition(&[7u8; 100]).unwrap();
        assert_eq!(table.len(), 1);
        let entry = table.iter().next().unwrap();
        assert_eq!((entry.logical.lo(), entry.logical.hi()), (0, 99));
        assert_eq!(entry.tag, StreamTag::Critical);
    }

    #[test]
    fn exactly_header_sized_file_has_no_tail() {
        let table = partition(&[0u8; 1024]).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.logical_size(), 1024);
    }

    #[test]
    fn large_file_splits_at_the_header_boundary() {
        let table = partition(&[0u8; 5000]).unwrap();
        let entries: Vec<_> = table.iter().collect();
        assert_eq!(entries.len(), 2);
        assert_eq!((entries[0].logical.lo(), entries[0].logical.hi()), (0, 1023));
        assert_eq!(entries[0].tag, StreamTag::Critical);
        assert_eq!(
            (entries[1].logical.lo(), entries[1].logical.hi()),
            (1024, 4999)
        );
        assert_eq!(
            (entries[1].physical.lo(), entries[1].physical.hi()),
            (0, 3975)
        );
        assert_eq!(entries[1].tag, StreamTag::NonCritical);
    }
}
