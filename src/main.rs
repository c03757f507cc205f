use std::fs;
use std::fs::File;
use std::io;
use std::io::BufRead;
use std::io::BufReader;
use std::io::ErrorKind;
use std::path::PathBuf;

use clap::Arg;
use clap::ArgAction;
use clap::Command;
use clap::crate_version;
use critfs::CriticalFs;
use fuser::MountOption;
use log::LevelFilter;
use log::error;

fn fuse_allow_other_enabled() -> io::Result<bool> {
    let file = File::open("/etc/fuse.conf")?;
    for line in BufReader::new(file).lines() {
        if line?.trim_start().starts_with("user_allow_other") {
            return Ok(true);
        }
    }
    Ok(false)
}

fn main() {
    let matches = Command::new("critfs")
        .version(crate_version!())
        .arg(
            Arg::new("backing-dir")
                .long("backing-dir")
                .value_name("DIR")
                .default_value("./storage")
                .help("Directory holding the physical artefacts"),
        )
        .arg(
            Arg::new("mount-point")
                .long("mount-point")
                .value_name("MOUNT_POINT")
                .required(true)
                .help("Mount FUSE at given path"),
        )
        .arg(
            Arg::new("direct-io")
                .long("direct-io")
                .action(ArgAction::SetTrue)
                .help("Mount FUSE with direct IO"),
        )
        .arg(
            Arg::new("auto-unmount")
                .long("auto-unmount")
                .action(ArgAction::SetTrue)
                .help("Automatically unmount FUSE when process exits"),
        )
        .arg(
            Arg::new("v")
                .short('v')
                .action(ArgAction::Count)
                .help("Sets the level of verbosity"),
        )
        .get_matches();

    let verbosity = matches.get_count("v");
    let log_level = match verbosity {
        0 => LevelFilter::Error,
        1 => LevelFilter::Warn,
        2 => LevelFilter::Info,
        3 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::builder()
        .format_timestamp_nanos()
        .filter_level(log_level)
        .init();

    let backing_dir = PathBuf::from(matches.get_one::<String>("backing-dir").unwrap());
    if let Err(e) = fs::create_dir_all(&backing_dir) {
        error!("cannot create backing directory {backing_dir:?}: {e}");
        std::process::exit(1);
    }
    let backing_dir = match backing_dir.canonicalize() {
        Ok(dir) => dir,
        Err(e) => {
            error!("cannot resolve backing directory {backing_dir:?}: {e}");
            std::process::exit(1);
        }
    };

    let mut mount_options = vec![MountOption::FSName("critfs".to_string())];
    if matches.get_flag("auto-unmount") {
        mount_options.push(MountOption::AutoUnmount);
    }
    let mut acl = fuser::SessionACL::Owner;
    if let Ok(enabled) = fuse_allow_other_enabled() {
        if enabled {
            acl = fuser::SessionACL::All;
        }
    } else {
        eprintln!("Unable to read /etc/fuse.conf");
    }
    let mut config = fuser::Config::default();
    config.mount_options = mount_options;
    config.acl = acl;

    let mountpoint = matches.get_one::<String>("mount-point").unwrap();
    let result = fuser::mount2(
        CriticalFs::new(backing_dir, matches.get_flag("direct-io")),
        mountpoint,
        &config,
    );
    if let Err(e) = result {
        // Permission denied usually means "user_allow_other" is missing
        // from /etc/fuse.conf
        if e.kind() == ErrorKind::PermissionDenied {
            error!("{e}");
            std::process::exit(2);
        } else {
            error!("{e}");
        }
    }
}
