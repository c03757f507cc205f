use std::io;
use std::io::ErrorKind;
use std::path::PathBuf;

use fuser::Errno;
use thiserror::Error;

/// Library-wide error type. Every failure the core can produce collapses to
/// one of these kinds; the FUSE adapter turns them into errnos at the reply
/// boundary via [`CritError::errno`].
#[derive(Debug, Error)]
pub enum CritError {
    /// The backing entry does not exist.
    #[error("no such file or directory")]
    NotFound,

    /// A partitioner rejected its input buffer, or an operation was invoked
    /// with arguments the gateway does not support.
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// A read or write against the backing directory failed or came up short.
    #[error("backing i/o failed: {0}")]
    Io(#[from] io::Error),

    /// The mapping sidecar could not be parsed.
    #[error("malformed mapping sidecar: {0}")]
    MappingMalformed(String),

    /// A `.mapping` sidecar exists but no partitioner binds to the logical
    /// path, so the artefacts cannot be interpreted.
    #[error("mapping sidecar present but no partitioner for {0:?}")]
    Unsupported(PathBuf),
}

impl CritError {
    /// The errno reported to the kernel for this error.
    pub fn errno(&self) -> Errno {
        match self {
            CritError::NotFound => Errno::ENOENT,
            CritError::InvalidArg(_) => Errno::EINVAL,
            CritError::Io(err) => errno_of(err),
            CritError::MappingMalformed(_) => Errno::EIO,
            CritError::Unsupported(_) => Errno::EIO,
        }
    }

    /// Classify an error from the backing directory, folding the common
    /// missing-entry case into [`CritError::NotFound`].
    pub(crate) fn from_backing(err: io::Error) -> CritError {
        if err.kind() == ErrorKind::NotFound {
            CritError::NotFound
        } else {
            CritError::Io(err)
        }
    }
}

fn errno_of(err: &io::Error) -> Errno {
    match err.kind() {
        ErrorKind::NotFound => Errno::ENOENT,
        ErrorKind::PermissionDenied => Errno::EACCES,
        ErrorKind::AlreadyExists => Errno::EEXIST,
        ErrorKind::InvalidInput => Errno::EINVAL,
        ErrorKind::DirectoryNotEmpty => Errno::ENOTEMPTY,
        ErrorKind::IsADirectory => Errno::EISDIR,
        ErrorKind::NotADirectory => Errno::ENOTDIR,
        ErrorKind::StorageFull => Errno::ENOSPC,
        ErrorKind::ReadOnlyFilesystem => Errno::EROFS,
        _ => Errno::EIO,
    }
}

pub type Result<T> = std::result::Result<T, CritError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_collapse_to_the_expected_errnos() {
        assert_eq!(CritError::NotFound.errno().code(), Errno::ENOENT.code());
        assert_eq!(
            CritError::InvalidArg("x".into()).errno().code(),
            Errno::EINVAL.code()
        );
        assert_eq!(
            CritError::MappingMalformed("x".into()).errno().code(),
            Errno::EIO.code()
        );
        assert_eq!(
            CritError::Unsupported(PathBuf::from("a.dat")).errno().code(),
            Errno::EIO.code()
        );
        let gone = CritError::Io(io::Error::from(ErrorKind::NotFound));
        assert_eq!(gone.errno().code(), Errno::ENOENT.code());
    }
}
