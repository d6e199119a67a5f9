#![forbid(unsafe_code)]
//! Error types for vsfs.
//!
//! vsfs uses a two-layer error model: `ParseError` (in `vsfs-types`) for
//! on-disk format violations detected during byte parsing, and [`VsfsError`]
//! (this crate) for the dispatch layer, CLI, and API consumers. The
//! conversion from `ParseError` happens in `vsfs-core`, which depends on
//! both crates; this crate stays independent of `vsfs-types` to avoid
//! cyclic dependencies.
//!
//! Every variant maps to exactly one POSIX errno via [`VsfsError::to_errno`].
//! The match is exhaustive (no wildcard arms) so adding a variant is a
//! compile error until its errno is assigned.

use thiserror::Error;

/// Unified error type for all vsfs operations.
///
/// This is the canonical error type returned by the engine's dispatch
/// interface and the CLI. Internal errors (e.g. `ParseError` from
/// `vsfs-types`) are converted into `VsfsError` at crate boundaries.
#[derive(Debug, Error)]
pub enum VsfsError {
    /// Operating system I/O error (wraps `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// On-disk metadata violated an invariant at a known block.
    #[error("corrupt metadata at block {block}: {detail}")]
    Corruption { block: u64, detail: String },

    /// Invalid image structure (bad magic, geometry that does not fit the
    /// device, free counts exceeding totals). Detected at mount time.
    #[error("invalid on-disk format: {0}")]
    Format(String),

    /// Path does not start with the root separator.
    ///
    /// Every vsfs path is absolute; a relative path is a caller bug, not
    /// a missing file.
    #[error("not an absolute path: {0}")]
    NotAbsolute(String),

    /// Name or path exceeds the on-disk length limits.
    #[error("name too long")]
    NameTooLong,

    /// No directory entry matches the path.
    #[error("not found: {0}")]
    NotFound(String),

    /// Insufficient free blocks or inodes for the requested allocation.
    #[error("no space left on device")]
    NoSpace,

    /// Requested size exceeds the direct + single-indirect addressing limit.
    #[error("file too large")]
    TooLarge,

    /// A supporting structure could not be filled (e.g. the directory
    /// listing sink refused an entry).
    #[error("out of memory")]
    OutOfMemory,

    /// Write attempted through a read-only device.
    #[error("read-only filesystem")]
    ReadOnly,
}

impl VsfsError {
    /// Convert this error into a POSIX errno suitable for dispatch-layer
    /// replies.
    ///
    /// Policy notes:
    /// - `NotAbsolute` → `EINVAL`: the path is malformed, not absent.
    /// - `TooLarge` → `EFBIG`: matches truncate/write semantics for sizes
    ///   past the addressing limit.
    /// - `OutOfMemory` → `ENOMEM`: a filler/sink refusal is reported the
    ///   way readdir reports an exhausted buffer.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::Corruption { .. } => libc::EIO,
            Self::Format(_) | Self::NotAbsolute(_) => libc::EINVAL,
            Self::NameTooLong => libc::ENAMETOOLONG,
            Self::NotFound(_) => libc::ENOENT,
            Self::NoSpace => libc::ENOSPC,
            Self::TooLarge => libc::EFBIG,
            Self::OutOfMemory => libc::ENOMEM,
            Self::ReadOnly => libc::EROFS,
        }
    }
}

/// Result alias using `VsfsError`.
pub type Result<T> = std::result::Result<T, VsfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_covers_all_variants() {
        let cases: Vec<(VsfsError, libc::c_int)> = vec![
            (VsfsError::Io(std::io::Error::other("test")), libc::EIO),
            (
                VsfsError::Corruption {
                    block: 3,
                    detail: "bad pointer".into(),
                },
                libc::EIO,
            ),
            (VsfsError::Format("bad magic".into()), libc::EINVAL),
            (VsfsError::NotAbsolute("name".into()), libc::EINVAL),
            (VsfsError::NameTooLong, libc::ENAMETOOLONG),
            (VsfsError::NotFound("/missing".into()), libc::ENOENT),
            (VsfsError::NoSpace, libc::ENOSPC),
            (VsfsError::TooLarge, libc::EFBIG),
            (VsfsError::OutOfMemory, libc::ENOMEM),
            (VsfsError::ReadOnly, libc::EROFS),
        ];

        for (error, expected_errno) in &cases {
            assert_eq!(
                error.to_errno(),
                *expected_errno,
                "wrong errno for {error:?}",
            );
        }
    }

    #[test]
    fn io_error_preserves_raw_os_error() {
        let raw = std::io::Error::from_raw_os_error(libc::EPERM);
        let err = VsfsError::Io(raw);
        assert_eq!(err.to_errno(), libc::EPERM);
    }

    #[test]
    fn display_formatting() {
        let err = VsfsError::Corruption {
            block: 42,
            detail: "dangling block pointer".into(),
        };
        assert_eq!(
            err.to_string(),
            "corrupt metadata at block 42: dangling block pointer"
        );
        assert_eq!(VsfsError::TooLarge.to_string(), "file too large");
        assert_eq!(
            VsfsError::NotAbsolute("foo".into()).to_string(),
            "not an absolute path: foo"
        );
    }
}
