//! The quantified invariants every partitioner must uphold, checked across a
//! corpus of accepted buffers for each format: entry length equality,
//! logical disjointness, per-stream physical contiguity from offset zero,
//! full logical coverage (TIFF/DNG excepted), and byte-for-byte round-trips
//! through the write/read machinery.

use std::collections::HashMap;
use std::path::Path;

use critfs::Format;
use critfs::Gateway;
use critfs::MappingTable;
use critfs::StreamTag;

/// Accepted sample buffers per format, from minimal to moderately busy.
fn corpus(format: Format) -> Vec<Vec<u8>> {
    match format {
        Format::Text => vec![
            b"a".to_vec(),
            b"HelloWorld1234".to_vec(),
            vec![0x00; 5],
            (0..=255u8).collect(),
        ],
        Format::Raw => vec![vec![7; 10], vec![8; 1024], vec![9; 4096]],
        Format::Png => vec![
            png(&[(b"IDAT", b"xyz".to_vec())]),
            png(&[
                (b"IHDR", vec![0; 13]),
                (b"tEXt", b"comment".to_vec()),
                (b"IDAT", vec![0xAB; 64]),
                (b"IDAT", vec![0xCD; 32]),
                (b"IEND", Vec::new()),
            ]),
        ],
        Format::Jpeg => vec![
            vec![0xFF, 0xD8, 0xFF, 0xD9],
            jpeg_with_scan(&[0x01, 0x02, 0xFF, 0x00, 0x03]),
            jpeg_with_scan(&[0x55; 40]),
        ],
        Format::Bmp => vec![bmp(2, 1), bmp(1, 3), bmp(4, 2)],
        Format::Tiff => vec![tiff_single_strip()],
    }
}

fn png(chunks: &[(&[u8; 4], Vec<u8>)]) -> Vec<u8> {
    let mut buf = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    for (kind, payload) in chunks {
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(*kind);
        buf.extend_from_slice(payload);
        buf.extend_from_slice(&[0; 4]);
    }
    buf
}

fn jpeg_with_scan(scan: &[u8]) -> Vec<u8> {
    let mut buf = vec![0xFF, 0xD8];
    for (marker, payload) in [
        (0xC0u8, vec![8, 0, 1, 0, 1, 1, 0x11, 0]),
        (0xDA, vec![1, 0x11, 0, 0x3F, 0]),
    ] {
        buf.extend_from_slice(&[0xFF, marker]);
        buf.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
        buf.extend_from_slice(&payload);
    }
    buf.extend_from_slice(scan);
    buf.extend_from_slice(&[0xFF, 0xD9]);
    buf
}

fn bmp(width: i32, height: i32) -> Vec<u8> {
    let row_pad = (3 * width as usize).div_ceil(4) * 4;
    let pixels = row_pad * height as usize;
    let mut buf = Vec::new();
    buf.extend_from_slice(b"BM");
    buf.extend_from_slice(&((54 + pixels) as u32).to_le_bytes());
    buf.extend_from_slice(&[0; 4]);
    buf.extend_from_slice(&54u32.to_le_bytes());
    buf.extend_from_slice(&40u32.to_le_bytes());
    buf.extend_from_slice(&width.to_le_bytes());
    buf.extend_from_slice(&height.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes());
    buf.extend_from_slice(&24u16.to_le_bytes());
    buf.extend_from_slice(&[0; 24]);
    for i in 0..pixels {
        buf.push((i % 251) as u8);
    }
    buf
}

fn tiff_single_strip() -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"II");
    buf.extend_from_slice(&42u16.to_le_bytes());
    buf.extend_from_slice(&8u32.to_le_bytes());
    buf.extend_from_slice(&2u16.to_le_bytes());
    for (tag, value) in [(0x0111u16, 38u32), (0x0117, 6)] {
        buf.extend_from_slice(&tag.to_le_bytes());
        buf.extend_from_slice(&4u16.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&value.to_le_bytes());
    }
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(&[0x10, 0x20, 0x30, 0x40, 0x50, 0x60]);
    buf
}

fn all_formats() -> [(Format, &'static str); 6] {
    [
        (Format::Text, "f.txt"),
        (Format::Raw, "f.raw"),
        (Format::Png, "f.png"),
        (Format::Jpeg, "f.jpg"),
        (Format::Bmp, "f.bmp"),
        (Format::Tiff, "f.dng"),
    ]
}

#[test]
fn entry_lengths_match_on_both_sides() {
    for (format, _) in all_formats() {
        for buf in corpus(format) {
            let table = format.partition(&buf).unwrap();
            for entry in table.iter() {
                assert_eq!(
                    entry.logical.len(),
                    entry.physical.len(),
                    "{format:?}: {} vs {}",
                    entry.logical,
                    entry.physical
                );
            }
        }
    }
}

#[test]
fn logical_ranges_are_disjoint_and_sorted() {
    for (format, _) in all_formats() {
        for buf in corpus(format) {
            let table = format.partition(&buf).unwrap();
            let mut prev_hi: Option<u64> = None;
            for entry in table.iter() {
                if let Some(prev_hi) = prev_hi {
                    assert!(
                        entry.logical.lo() > prev_hi,
                        "{format:?}: entry {} begins at or before {prev_hi}",
                        entry.logical
                    );
                }
                prev_hi = Some(entry.logical.hi());
            }
        }
    }
}

#[test]
fn physical_offsets_form_a_contiguous_prefix_per_stream() {
    for (format, _) in all_formats() {
        for buf in corpus(format) {
            let table = format.partition(&buf).unwrap();
            let mut next: HashMap<StreamTag, u64> = HashMap::new();
            for entry in table.iter() {
                let cursor = next.entry(entry.tag).or_insert(0);
                assert_eq!(
                    entry.physical.lo(),
                    *cursor,
                    "{format:?}: {:?} entry at logical {} lands at {} not {}",
                    entry.tag,
                    entry.logical,
                    entry.physical.lo(),
                    cursor
                );
                *cursor = entry.physical.hi() + 1;
            }
        }
    }
}

#[test]
fn accepted_buffers_are_fully_covered_except_tiff() {
    for (format, _) in all_formats() {
        if format == Format::Tiff {
            continue;
        }
        for buf in corpus(format) {
            let table = format.partition(&buf).unwrap();
            let mut next = 0u64;
            for entry in table.iter() {
                assert_eq!(
                    entry.logical.lo(),
                    next,
                    "{format:?}: gap before {}",
                    entry.logical
                );
                next = entry.logical.hi() + 1;
            }
            assert_eq!(next, buf.len() as u64, "{format:?}: tail not covered");
        }
    }
}

#[test]
fn stream_sizes_add_up_to_the_mapped_bytes() {
    for (format, _) in all_formats() {
        for buf in corpus(format) {
            let table = format.partition(&buf).unwrap();
            let mapped: u64 = table.iter().map(|e| e.logical.len()).sum();
            let crit: u64 = table
                .iter()
                .filter(|e| e.tag == StreamTag::Critical)
                .map(|e| e.physical.len())
                .sum();
            let noncrit: u64 = table
                .iter()
                .filter(|e| e.tag == StreamTag::NonCritical)
                .map(|e| e.physical.len())
                .sum();
            assert_eq!(crit + noncrit, mapped, "{format:?}");
        }
    }
}

#[test]
fn every_format_round_trips_through_the_gateway() {
    for (format, name) in all_formats() {
        let dir = tempfile::tempdir().unwrap();
        let gw = Gateway::new(dir.path().to_path_buf());
        let rel = Path::new(name);
        for buf in corpus(format) {
            gw.create(rel, 0o644).unwrap();
            gw.write(rel, &buf, 0).unwrap();
            let back = gw.read(rel, 0, buf.len()).unwrap();
            if format == Format::Tiff {
                // Only the mapped union is guaranteed; unmapped offsets read
                // as zero and the tail past the last mapped byte is dropped.
                let table = format.partition(&buf).unwrap();
                for entry in table.iter() {
                    let lo = entry.logical.lo() as usize;
                    let hi = entry.logical.hi() as usize;
                    assert_eq!(&back[lo..=hi], &buf[lo..=hi], "{name}");
                }
            } else {
                assert_eq!(back, buf, "{name}");
            }
            gw.unlink(rel).unwrap();
        }
    }
}

#[test]
fn save_load_is_the_identity_on_partitioner_output() {
    let dir = tempfile::tempdir().unwrap();
    for (format, name) in all_formats() {
        for (i, buf) in corpus(format).into_iter().enumerate() {
            let table = format.partition(&buf).unwrap();
            let path = dir.path().join(format!("{name}.{i}.mapping"));
            table.save(&path).unwrap();
            let loaded = MappingTable::load(&path).unwrap();
            assert_eq!(loaded, table, "{name} sample {i}");
        }
    }
}
