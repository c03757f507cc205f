use super::Splitter;
use crate::error::Result;
use crate::mapping::MappingTable;
use crate::mapping::StreamTag;

const SPAN: u64 = 5;

/// Alternating five-byte spans, critical first. The final span may be
/// shorter. There is nothing structural about text; this exists to exercise
/// the splitting machinery with a format that cannot be rejected.
pub(super) fn partition(buf: &[u8]) -> Result<MappingTable> {
    let len = buf.len() as u64;
    let mut split = Splitter::new();
    let mut tag = StreamTag::Critical;
    let mut off = 0;
    while off < len {
        let span = SPAN.min(len - off);
        split.emit(span, tag)?;
        off += span;
        tag = match tag {
            StreamTag::Critical => StreamTag::NonCritical,
            StreamTag::NonCritical => StreamTag::Critical,
        };
    }
    Ok(split.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MapEntry;

    fn entries(buf: &[u8]) -> Vec<MapEntry> {
        partition(buf).unwrap().iter().copied().collect()
    }

    #[test]
    fn fourteen_bytes_split_into_three_spans() {
        let got = entries(b"HelloWorld1234");
        assert_eq!(got.len(), 3);

        assert_eq!((got[0].logical.lo(), got[0].logical.hi()), (0, 4));
        assert_eq!((got[0].physical.lo(), got[0].physical.hi()), (0, 4));
        assert_eq!(got[0].tag, StreamTag::Critical);

        assert_eq!((got[1].logical.lo(), got[1].logical.hi()), (5, 9));
        assert_eq!((got[1].physical.lo(), got[1].physical.hi()), (0, 4));
        assert_eq!(got[1].tag, StreamTag::NonCritical);

        assert_eq!((got[2].logical.lo(), got[2].logical.hi()), (10, 13));
        assert_eq!((got[2].physical.lo(), got[2].physical.hi()), (5, 8));
        assert_eq!(got[2].tag, StreamTag::Critical);
    }

    #[test]
    fn short_buffer_is_a_single_critical_span() {
        let got = entries(b"abc");
        assert_eq!(got.len(), 1);
        assert_eq!((got[0].logical.lo(), got[0].logical.hi()), (0, 2));
        assert_eq!(got[0].tag, StreamTag::Critical);
    }

    #[test]
    fn exact_multiple_alternates_cleanly() {
        let got = entries(&[0u8; 20]);
        assert_eq!(got.len(), 4);
        let tags: Vec<StreamTag> = got.iter().map(|e| e.tag).collect();
        assert_eq!(
            tags,
            vec![
                StreamTag::Critical,
                StreamTag::NonCritical,
                StreamTag::Critical,
                StreamTag::NonCritical,
            ]
        );
        assert_eq!(partition(&[0u8; 20]).unwrap().logical_size(), 20);
    }
}
