//! VFS models.
//!
//! Back-end agnostic metadata returned by `stat` and `read_dir` across every
//! joint, local or remote.

use std::fs::Metadata;
use time::OffsetDateTime;

/// File metadata returned by joints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Final path component (never contains a separator)
    pub name: String,
    /// File size in bytes; zero for most directories
    pub size: u64,
    /// Last modified timestamp, when the upstream reports one
    pub modified: Option<OffsetDateTime>,
    pub is_dir: bool,
}
impl FileInfo {
    pub fn file(name: impl Into<String>, size: u64, modified: Option<OffsetDateTime>) -> Self {
        Self {
            name: name.into(),
            size,
            modified,
            is_dir: false,
        }
    }

    pub fn dir(name: impl Into<String>, modified: Option<OffsetDateTime>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            modified,
            is_dir: true,
        }
    }

    pub(crate) fn from_metadata(name: impl Into<String>, metadata: &Metadata) -> Self {
        let modified = metadata.modified().ok().map(OffsetDateTime::from);
        if metadata.is_dir() {
            Self::dir(name, modified)
        } else {
            Self::file(name, metadata.len(), modified)
        }
    }
}

/// Final component of a slash-separated path, ignoring trailing slashes.
pub(crate) fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit_once('/').map_or(trimmed, |(_, name)| name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("a/b/c.jpg", "c.jpg")]
    #[case("c.jpg", "c.jpg")]
    #[case("a/dir/", "dir")]
    #[case("", "")]
    fn test_base_name(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(base_name(path), expected);
    }

    #[test]
    fn test_constructors() {
        let f = FileInfo::file("a.jpg", 12, None);
        assert!(!f.is_dir);
        assert_eq!(f.size, 12);
        let d = FileInfo::dir("photos", None);
        assert!(d.is_dir);
        assert_eq!(d.size, 0);
    }
}
