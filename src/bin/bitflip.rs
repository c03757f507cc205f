//! Offline corruption tool for resilience experiments: inverts every byte
//! in an inclusive range, or a uniformly sampled percentage of bytes across
//! the whole file. Point it at a `.noncrit` stream to simulate bit-rot that
//! leaves the critical stream intact.

use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use clap::Arg;
use clap::Command;
use clap::crate_version;
use clap::value_parser;
use rand::seq::index::sample;
use rand::thread_rng;

const WINDOW: u64 = 1024 * 1024;

fn main() -> Result<()> {
    let matches = Command::new("bitflip")
        .version(crate_version!())
        .about("Invert bits in a file, over a byte range or a random sample")
        .arg(
            Arg::new("random")
                .short('r')
                .long("random")
                .value_name("PERCENT")
                .value_parser(value_parser!(f64))
                .conflicts_with_all(["START", "END"])
                .help("Flip this percentage of the file's bytes, sampled uniformly"),
        )
        .arg(Arg::new("FILE").required(true).help("File to corrupt in place"))
        .arg(
            Arg::new("START")
                .value_parser(value_parser!(u64))
                .requires("END")
                .help("First byte offset of the range to invert"),
        )
        .arg(
            Arg::new("END")
                .value_parser(value_parser!(u64))
                .help("Last byte offset of the range to invert, inclusive"),
        )
        .get_matches();

    let path = matches.get_one::<String>("FILE").unwrap();
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("cannot open {path}"))?;
    let file_size = file.metadata()?.len();

    let percent = matches.get_one::<f64>("random").copied();
    let (start, end) = match percent {
        Some(percent) => {
            if !(0.0..=100.0).contains(&percent) {
                bail!("percentage must be between 0 and 100");
            }
            if file_size == 0 {
                println!("{path} is empty, nothing to flip");
                return Ok(());
            }
            (0, file_size - 1)
        }
        None => {
            let (Some(&start), Some(&end)) =
                (matches.get_one::<u64>("START"), matches.get_one::<u64>("END"))
            else {
                bail!("either -r <percent> or <start> <end> is required");
            };
            if start > end {
                bail!("start {start} exceeds end {end}");
            }
            if end >= file_size {
                bail!("end {end} is beyond end of file ({file_size} bytes)");
            }
            (start, end)
        }
    };

    let mut rng = thread_rng();
    let total = end - start + 1;
    let mut processed = 0u64;
    let mut buf = vec![0u8; WINDOW as usize];
    while processed < total {
        let chunk = WINDOW.min(total - processed) as usize;
        let window = &mut buf[..chunk];
        let offset = start + processed;
        file.read_exact_at(window, offset)
            .with_context(|| format!("short read at {offset}"))?;
        match percent {
            Some(percent) => {
                let flips = (window.len() as f64 * percent / 100.0) as usize;
                for i in sample(&mut rng, window.len(), flips) {
                    window[i] = !window[i];
                }
            }
            None => {
                for byte in window.iter_mut() {
                    *byte = !*byte;
                }
            }
        }
        file.write_all_at(window, offset)
            .with_context(|| format!("short write at {offset}"))?;
        processed += chunk as u64;
    }

    match percent {
        Some(percent) => println!("Flipped {percent}% of bytes across {path}"),
        None => println!("Inverted bytes {start}-{end} in {path}"),
    }
    Ok(())
}
