//! The repository walker.
//!
//! `walk` makes two passes over the tree: the first collects ignore
//! patterns, the second produces a `File` record per entry, hashing content
//! only for files the `CurrentFiler` cache can't vouch for. Per-entry
//! problems are logged and skipped; only a missing or non-directory base
//! aborts the scan.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use thiserror::Error;
use tracing::{debug, info, warn};
use unicode_normalization::is_nfc;
use walkdir::WalkDir;

use sync_core::clock::LogicalClock;
use sync_core::file::{File, FLAG_DIRECTORY, FLAG_NO_PERM_BITS, PERM_MASK};

use crate::blocks::blocks;
use crate::config::ScanConfig;
use crate::ignore::IgnorePatterns;
use crate::temp::TempNamer;

/// Serves the record from the previous scan, so unchanged files can be
/// reused without re-hashing.
pub trait CurrentFiler: Send + Sync {
    fn current_file(&self, name: &str) -> Option<File>;
}

/// Decides whether updates to a too-frequently-changing file should be
/// ignored for now. Returns `(suppressed_now, suppressed_before)` so the
/// walker can log the transitions.
pub trait Suppressor: Send + Sync {
    fn suppress(&self, name: &str, meta: &fs::Metadata) -> (bool, bool);
}

#[derive(Debug, Error)]
pub enum WalkError {
    #[error("{0}: not a directory")]
    NotDirectory(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub struct Walker {
    dir: PathBuf,
    block_size: usize,
    ignore_file: Option<String>,
    temp_namer: Option<Box<dyn TempNamer>>,
    current_filer: Option<Box<dyn CurrentFiler>>,
    suppressor: Option<Box<dyn Suppressor>>,
    ignore_perms: bool,
    clock: Arc<LogicalClock>,
}

impl Walker {
    pub fn new(dir: impl Into<PathBuf>, clock: Arc<LogicalClock>) -> Self {
        Self::with_config(dir, clock, &ScanConfig::default())
    }

    pub fn with_config(
        dir: impl Into<PathBuf>,
        clock: Arc<LogicalClock>,
        config: &ScanConfig,
    ) -> Self {
        Self {
            dir: dir.into(),
            block_size: config.block_size,
            ignore_file: config.ignore_file.clone(),
            temp_namer: None,
            current_filer: None,
            suppressor: None,
            ignore_perms: config.ignore_perms,
            clock,
        }
    }

    pub fn ignore_file(mut self, name: impl Into<String>) -> Self {
        self.ignore_file = Some(name.into());
        self
    }

    pub fn temp_namer(mut self, namer: impl TempNamer + 'static) -> Self {
        self.temp_namer = Some(Box::new(namer));
        self
    }

    pub fn current_filer(mut self, filer: impl CurrentFiler + 'static) -> Self {
        self.current_filer = Some(Box::new(filer));
        self
    }

    pub fn suppressor(mut self, suppressor: impl Suppressor + 'static) -> Self {
        self.suppressor = Some(Box::new(suppressor));
        self
    }

    pub fn ignore_perms(mut self, ignore_perms: bool) -> Self {
        self.ignore_perms = ignore_perms;
        self
    }

    /// Scan the repository. Returns the file records and the ignore
    /// patterns in effect, or an error if the base directory is unusable.
    pub fn walk(&self) -> Result<(Vec<File>, IgnorePatterns), WalkError> {
        debug!(dir = %self.dir.display(), block_size = self.block_size, "walk");
        check_dir(&self.dir)?;

        let mut ignore = IgnorePatterns::new();
        self.load_ignore_files(&mut ignore);

        let mut files = Vec::new();
        self.hash_files(&ignore, &mut files);

        check_dir(&self.dir)?;
        Ok((files, ignore))
    }

    /// Remove leftover temporary files anywhere under the base directory.
    pub fn clean_temp_files(&self) {
        let Some(namer) = &self.temp_namer else {
            return;
        };
        for entry in WalkDir::new(&self.dir) {
            let Ok(entry) = entry else { continue };
            if entry.file_type().is_file() && namer.is_temporary(entry.path()) {
                debug!(path = %entry.path().display(), "removing temporary file");
                if let Err(e) = fs::remove_file(entry.path()) {
                    debug!(path = %entry.path().display(), error = %e, "remove failed");
                }
            }
        }
    }

    // First pass: read every file named like the ignore file, best effort.
    fn load_ignore_files(&self, ignore: &mut IgnorePatterns) {
        let Some(ignore_name) = &self.ignore_file else {
            return;
        };
        for entry in WalkDir::new(&self.dir) {
            let Ok(entry) = entry else { continue };
            if !entry.file_type().is_file() || entry.file_name().to_string_lossy() != *ignore_name
            {
                continue;
            }
            let Ok(contents) = fs::read_to_string(entry.path()) else {
                continue;
            };
            let patterns: Vec<String> = contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect();
            let scope = entry
                .path()
                .parent()
                .and_then(|p| p.strip_prefix(&self.dir).ok())
                .map(|p| {
                    if p.as_os_str().is_empty() {
                        ".".to_string()
                    } else {
                        p.to_string_lossy().into_owned()
                    }
                })
                .unwrap_or_else(|| ".".to_string());
            debug!(scope = %scope, patterns = patterns.len(), "loaded ignore file");
            ignore.insert(scope, patterns);
        }
    }

    // Second pass: emit a record per entry.
    fn hash_files(&self, ignore: &IgnorePatterns, out: &mut Vec<File>) {
        let mut it = WalkDir::new(&self.dir).into_iter();
        while let Some(entry) = it.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "walk entry");
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }
            let Some(rel_name) = relative_name(&self.dir, entry.path()) else {
                debug!(path = %entry.path().display(), "skipping non-UTF-8 name");
                continue;
            };
            let rel_name = rel_name.as_str();

            if let Some(namer) = &self.temp_namer {
                if namer.is_temporary(Path::new(rel_name)) {
                    debug!(name = rel_name, "temporary");
                    continue;
                }
            }

            let base = entry.file_name().to_string_lossy();
            if self.ignore_file.as_deref() == Some(base.as_ref())
                || base == ".stversions"
                || ignore.matches(rel_name)
            {
                debug!(name = rel_name, "ignored");
                if entry.file_type().is_dir() {
                    it.skip_current_dir();
                }
                continue;
            }

            // Decomposed names can't round-trip through peers that store
            // NFC; Darwin is the exception and normalizes at the wire.
            if cfg!(any(target_os = "linux", target_os = "windows")) && !is_nfc(rel_name) {
                warn!(
                    name = rel_name,
                    "file name contains non-NFC UTF-8 sequences and cannot be synced; consider renaming"
                );
                continue;
            }

            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) => {
                    debug!(name = rel_name, error = %e, "stat");
                    continue;
                }
            };

            if meta.is_dir() {
                out.push(self.dir_record(rel_name, &meta));
            } else if meta.is_file() {
                if let Some(f) = self.file_record(entry.path(), rel_name, &meta) {
                    out.push(f);
                }
            }
        }
    }

    fn dir_record(&self, name: &str, meta: &fs::Metadata) -> File {
        if let Some(filer) = &self.current_filer {
            if let Some(cf) = filer.current_file(name) {
                let perm_unchanged = self.ignore_perms
                    || !cf.has_permission_bits()
                    || perms_equal(cf.flags, perm_bits(meta));
                if cf.modified == modified_secs(meta) && cf.is_directory() && perm_unchanged {
                    debug!(name, "unchanged");
                    return cf;
                }
            }
        }

        let flags = FLAG_DIRECTORY
            | if self.ignore_perms {
                FLAG_NO_PERM_BITS | 0o777
            } else {
                perm_bits(meta)
            };
        debug!(name, "dir");
        File {
            name: name.to_string(),
            version: self.clock.tick(0),
            flags,
            modified: modified_secs(meta),
            size: 0,
            blocks: Vec::new(),
            suppressed: false,
        }
    }

    fn file_record(&self, path: &Path, name: &str, meta: &fs::Metadata) -> Option<File> {
        if let Some(filer) = &self.current_filer {
            if let Some(cf) = filer.current_file(name) {
                let perm_unchanged = self.ignore_perms
                    || !cf.has_permission_bits()
                    || perms_equal(cf.flags, perm_bits(meta));
                if !cf.is_deleted() && cf.modified == modified_secs(meta) && perm_unchanged {
                    debug!(name, "unchanged");
                    return Some(cf);
                }

                if let Some(suppressor) = &self.suppressor {
                    let (now, before) = suppressor.suppress(name, meta);
                    if now && !before {
                        info!(
                            name,
                            "changes are being temporarily suppressed because the file changes too frequently"
                        );
                        let mut f = cf;
                        f.suppressed = true;
                        f.version += 1;
                        return Some(f);
                    } else if before && !now {
                        info!(name, "changes are no longer suppressed");
                    }
                }

                debug!(name, "rescan");
            }
        }

        let fd = match fs::File::open(path) {
            Ok(fd) => fd,
            Err(e) => {
                debug!(name, error = %e, "open");
                return None;
            }
        };
        let blocks = match blocks(fd, self.block_size) {
            Ok(blocks) => blocks,
            Err(e) => {
                debug!(name, error = %e, "hash");
                return None;
            }
        };

        let flags = if self.ignore_perms {
            FLAG_NO_PERM_BITS | 0o666
        } else {
            perm_bits(meta)
        };
        Some(File {
            name: name.to_string(),
            version: self.clock.tick(0),
            flags,
            modified: modified_secs(meta),
            size: meta.len() as i64,
            blocks,
            suppressed: false,
        })
    }
}

fn check_dir(dir: &Path) -> Result<(), WalkError> {
    let meta = fs::symlink_metadata(dir)?;
    if !meta.is_dir() {
        return Err(WalkError::NotDirectory(dir.to_path_buf()));
    }
    Ok(())
}

fn relative_name(dir: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(dir).ok()?;
    rel.to_str().map(str::to_string)
}

fn modified_secs(meta: &fs::Metadata) -> i64 {
    match meta.modified() {
        Ok(t) => match t.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            Err(e) => -(e.duration().as_secs() as i64),
        },
        Err(_) => 0,
    }
}

#[cfg(unix)]
fn perm_bits(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & PERM_MASK
}

#[cfg(not(unix))]
fn perm_bits(meta: &fs::Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o666
    }
}

fn perms_equal(a: u32, b: u32) -> bool {
    if cfg!(windows) {
        // Only read-only vs. writable exists, mirrored across user, group
        // and other; compare the user bits.
        a & 0o600 == b & 0o600
    } else {
        a & PERM_MASK == b & PERM_MASK
    }
}
