//! File records as exchanged with peers and produced by the scanner.

use std::fmt;

/// The file has been deleted; the record is a tombstone.
pub const FLAG_DELETED: u32 = 1 << 12;
/// The record is invalid and must not be synced.
pub const FLAG_INVALID: u32 = 1 << 13;
/// The record describes a directory.
pub const FLAG_DIRECTORY: u32 = 1 << 14;
/// The low nine permission bits carry no information.
pub const FLAG_NO_PERM_BITS: u32 = 1 << 15;
/// Mask for the POSIX permission bits.
pub const PERM_MASK: u32 = 0o777;

pub fn is_deleted(flags: u32) -> bool {
    flags & FLAG_DELETED != 0
}

pub fn is_directory(flags: u32) -> bool {
    flags & FLAG_DIRECTORY != 0
}

pub fn has_permission_bits(flags: u32) -> bool {
    flags & FLAG_NO_PERM_BITS == 0
}

/// One content block of a file: a fixed-size chunk with its SHA-256 hash.
/// The last block of a file may be shorter than the block size.
#[derive(Clone, PartialEq, Eq)]
pub struct Block {
    pub offset: i64,
    pub size: u32,
    pub hash: [u8; 32],
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block({}+{}, {}...)",
            self.offset,
            self.size,
            &hex::encode(self.hash)[..8]
        )
    }
}

/// A scanned or received file record.
///
/// `version` is a logical-clock value; two records for the same name compare
/// by version alone. `size` is zero for deleted files and directories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct File {
    /// Path relative to the repository root.
    pub name: String,
    /// Logical version, assigned by the clock on every modification.
    pub version: u64,
    /// Flag bits plus POSIX permissions in the low nine bits.
    pub flags: u32,
    /// Modification time, seconds since the Unix epoch.
    pub modified: i64,
    /// Size in bytes.
    pub size: i64,
    /// Content blocks; empty for tombstones and directories.
    pub blocks: Vec<Block>,
    /// Changes to this file are currently being ignored; not persisted.
    pub suppressed: bool,
}

impl File {
    pub fn is_deleted(&self) -> bool {
        is_deleted(self.flags)
    }

    pub fn is_directory(&self) -> bool {
        is_directory(self.flags)
    }

    pub fn has_permission_bits(&self) -> bool {
        has_permission_bits(self.flags)
    }

    /// The comparable identity of this record.
    pub fn key(&self) -> FileKey {
        FileKey {
            name: self.name.clone(),
            version: self.version,
        }
    }
}

/// The identity of a file record: its name and logical version.
///
/// Equal keys are assumed to describe identical content, since every
/// modification runs the version through the logical clock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileKey {
    pub name: String,
    pub version: u64,
}

impl FileKey {
    /// Strict "newer than" over the same name: larger version wins.
    pub fn newer_than(&self, other: &FileKey) -> bool {
        self.version > other.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_helpers() {
        assert!(is_deleted(FLAG_DELETED | 0o644));
        assert!(!is_deleted(0o644));
        assert!(is_directory(FLAG_DIRECTORY | 0o755));
        assert!(!is_directory(FLAG_DELETED));
        assert!(has_permission_bits(0o644));
        assert!(!has_permission_bits(FLAG_NO_PERM_BITS | 0o666));
    }

    #[test]
    fn test_key_newer_than() {
        let a = FileKey {
            name: "a".into(),
            version: 7,
        };
        let b = FileKey {
            name: "a".into(),
            version: 5,
        };
        assert!(a.newer_than(&b));
        assert!(!b.newer_than(&a));
        assert!(!a.newer_than(&a));
    }

    #[test]
    fn test_equal_versions_equal_keys() {
        let f = File {
            name: "x/y.txt".into(),
            version: 3,
            ..Default::default()
        };
        let g = File {
            name: "x/y.txt".into(),
            version: 3,
            size: 999,
            ..Default::default()
        };
        // Identity is (name, version); content differences don't matter.
        assert_eq!(f.key(), g.key());
    }

    #[test]
    fn test_default_is_zero_valued() {
        let f = File::default();
        assert_eq!(f.name, "");
        assert_eq!(f.version, 0);
        assert!(f.blocks.is_empty());
        assert!(!f.is_deleted());
    }
}
