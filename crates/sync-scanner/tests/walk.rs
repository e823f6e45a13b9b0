//! On-disk walker scenarios.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use sync_core::clock::LogicalClock;
use sync_core::file::File;
use sync_scanner::{CurrentFiler, DefaultTempNamer, ScanConfig, Suppressor, TempNamer, Walker};

const BLOCK_SIZE: usize = 128 * 1024;

fn write(dir: &TempDir, name: &str, contents: &[u8]) {
    let path = dir.path().join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

fn walker(dir: &TempDir, clock: &Arc<LogicalClock>) -> Walker {
    Walker::new(dir.path(), Arc::clone(clock))
}

fn by_name(files: Vec<File>) -> HashMap<String, File> {
    files.into_iter().map(|f| (f.name.clone(), f)).collect()
}

/// A current filer backed by a plain map, as the previous scan would
/// provide it.
struct MapFiler(HashMap<String, File>);

impl CurrentFiler for MapFiler {
    fn current_file(&self, name: &str) -> Option<File> {
        self.0.get(name).cloned()
    }
}

#[test]
fn test_walk_produces_records_for_files_and_dirs() {
    let dir = TempDir::new().unwrap();
    write(&dir, "a.txt", b"hello");
    write(&dir, "sub/b.txt", b"world!");

    let clock = Arc::new(LogicalClock::new());
    let (files, ignore) = walker(&dir, &clock).walk().unwrap();
    assert!(ignore.is_empty());

    let files = by_name(files);
    assert_eq!(files.len(), 3, "a.txt, sub, sub/b.txt");

    let a = &files["a.txt"];
    assert!(!a.is_directory());
    assert_eq!(a.size, 5);
    assert_eq!(a.blocks.len(), 1);
    assert_eq!(a.blocks[0].size, 5);
    assert!(a.version > 0);
    assert!(a.modified > 0);

    let sub = &files["sub"];
    assert!(sub.is_directory());
    assert_eq!(sub.size, 0);
    assert!(sub.blocks.is_empty());

    let b = &files[&format!("sub{}b.txt", std::path::MAIN_SEPARATOR)];
    assert_eq!(b.size, 6);

    // Every record got its own version from the clock.
    let mut versions: Vec<u64> = files.values().map(|f| f.version).collect();
    versions.sort_unstable();
    versions.dedup();
    assert_eq!(versions.len(), 3);
}

#[test]
fn test_block_hashes_match_content() {
    use sha2::{Digest, Sha256};

    let dir = TempDir::new().unwrap();
    let content = vec![42u8; BLOCK_SIZE + 100];
    write(&dir, "big.bin", &content);

    let clock = Arc::new(LogicalClock::new());
    let (files, _) = walker(&dir, &clock).walk().unwrap();
    let files = by_name(files);

    let big = &files["big.bin"];
    assert_eq!(big.blocks.len(), 2);
    assert_eq!(big.blocks[0].size as usize, BLOCK_SIZE);
    assert_eq!(big.blocks[1].offset as usize, BLOCK_SIZE);
    assert_eq!(big.blocks[1].size, 100);

    let mut hasher = Sha256::new();
    hasher.update(&content[..BLOCK_SIZE]);
    let expected: [u8; 32] = hasher.finalize().into();
    assert_eq!(big.blocks[0].hash, expected);
}

#[test]
fn test_ignore_patterns_scope_to_their_directory() {
    let dir = TempDir::new().unwrap();
    write(&dir, ".ignore", b"*.tmp\n\n  \n");
    write(&dir, "kept.txt", b"kept");
    write(&dir, "junk.tmp", b"junk");
    write(&dir, "sub/.ignore", b"*.log\n");
    write(&dir, "sub/trace.log", b"trace");
    write(&dir, "sub/kept.log.txt", b"kept");
    write(&dir, "other/trace.log", b"kept here");

    let clock = Arc::new(LogicalClock::new());
    let (files, ignore) = walker(&dir, &clock).ignore_file(".ignore").walk().unwrap();
    let files = by_name(files);

    assert!(files.contains_key("kept.txt"));
    assert!(!files.contains_key("junk.tmp"));
    assert!(!files.contains_key(&rel("sub/trace.log")));
    assert!(files.contains_key(&rel("sub/kept.log.txt")));
    assert!(files.contains_key(&rel("other/trace.log")));
    // The ignore files themselves are never indexed.
    assert!(!files.contains_key(".ignore"));
    assert!(!files.contains_key(&rel("sub/.ignore")));

    assert_eq!(ignore.patterns(".").unwrap(), ["*.tmp"]);
    assert_eq!(ignore.patterns("sub").unwrap(), ["*.log"]);
}

#[test]
fn test_ignored_directory_skips_whole_subtree() {
    let dir = TempDir::new().unwrap();
    write(&dir, ".ignore", b"build\n");
    write(&dir, "build/deep/artifact.bin", b"bits");
    write(&dir, "src/main.c", b"int main;");

    let clock = Arc::new(LogicalClock::new());
    let (files, _) = walker(&dir, &clock).ignore_file(".ignore").walk().unwrap();
    let files = by_name(files);

    assert!(files.contains_key(&rel("src/main.c")));
    assert!(!files.contains_key("build"));
    assert!(files.keys().all(|n| !n.starts_with("build")));
}

#[test]
fn test_stversions_always_skipped() {
    let dir = TempDir::new().unwrap();
    write(&dir, ".stversions/old.txt", b"old");
    write(&dir, "current.txt", b"new");

    let clock = Arc::new(LogicalClock::new());
    let (files, _) = walker(&dir, &clock).walk().unwrap();
    let files = by_name(files);

    assert_eq!(files.len(), 1);
    assert!(files.contains_key("current.txt"));
}

#[test]
fn test_temp_files_skipped_and_cleaned() {
    let dir = TempDir::new().unwrap();
    write(&dir, "real.txt", b"real");
    let temp_path = DefaultTempNamer.temp_name(Path::new("real.txt"));
    write(&dir, temp_path.to_str().unwrap(), b"partial");

    let clock = Arc::new(LogicalClock::new());
    let w = walker(&dir, &clock).temp_namer(DefaultTempNamer);

    let (files, _) = w.walk().unwrap();
    assert_eq!(by_name(files).len(), 1);

    w.clean_temp_files();
    assert!(!dir.path().join(&temp_path).exists());
    assert!(dir.path().join("real.txt").exists());
}

#[test]
fn test_unchanged_files_are_reused_from_filer() {
    let dir = TempDir::new().unwrap();
    write(&dir, "a.txt", b"stable");
    write(&dir, "sub/b.txt", b"also stable");

    let clock = Arc::new(LogicalClock::new());
    let (first, _) = walker(&dir, &clock).walk().unwrap();
    let cache = by_name(first.clone());

    // Second scan with the first scan cached: record-equal output, same
    // versions, so nothing was re-hashed or re-ticked.
    let (second, _) = walker(&dir, &clock)
        .current_filer(MapFiler(cache))
        .walk()
        .unwrap();
    let mut first = first;
    let mut second = second;
    first.sort_by(|a, b| a.name.cmp(&b.name));
    second.sort_by(|a, b| a.name.cmp(&b.name));
    assert_eq!(first, second);

    // Without the cache the records are re-hashed and re-versioned.
    let (fresh, _) = walker(&dir, &clock).walk().unwrap();
    let fresh = by_name(fresh);
    assert!(fresh["a.txt"].version > by_name(first)["a.txt"].version);
}

#[cfg(unix)]
#[test]
fn test_permission_change_invalidates_cache() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    write(&dir, "a.txt", b"content");
    fs::set_permissions(dir.path().join("a.txt"), fs::Permissions::from_mode(0o644)).unwrap();

    let clock = Arc::new(LogicalClock::new());
    let (first, _) = walker(&dir, &clock).walk().unwrap();
    let cache = by_name(first.clone());
    let old_version = cache["a.txt"].version;

    fs::set_permissions(dir.path().join("a.txt"), fs::Permissions::from_mode(0o600)).unwrap();

    let (second, _) = walker(&dir, &clock)
        .current_filer(MapFiler(cache.clone()))
        .walk()
        .unwrap();
    let second = by_name(second);
    assert!(second["a.txt"].version > old_version);
    assert_eq!(second["a.txt"].flags & 0o777, 0o600);

    // With ignore_perms the cached record is still good.
    let (third, _) = walker(&dir, &clock)
        .current_filer(MapFiler(cache))
        .ignore_perms(true)
        .walk()
        .unwrap();
    let third = by_name(third);
    assert_eq!(third["a.txt"].version, old_version);
}

#[test]
fn test_suppressor_transition_emits_cached_record() {
    let dir = TempDir::new().unwrap();
    write(&dir, "hot.txt", b"version 2 content");

    // A cached record whose mtime doesn't match forces the change path.
    let cached = File {
        name: "hot.txt".to_string(),
        version: 10,
        flags: 0o644,
        modified: 1,
        size: 9,
        blocks: Vec::new(),
        suppressed: false,
    };
    let mut cache = HashMap::new();
    cache.insert("hot.txt".to_string(), cached);

    struct Always(bool, bool);
    impl Suppressor for Always {
        fn suppress(&self, _name: &str, _meta: &fs::Metadata) -> (bool, bool) {
            (self.0, self.1)
        }
    }

    let clock = Arc::new(LogicalClock::new());

    // Newly suppressed: the cached record comes back, marked and bumped.
    let (files, _) = walker(&dir, &clock)
        .current_filer(MapFiler(cache.clone()))
        .suppressor(Always(true, false))
        .walk()
        .unwrap();
    let files = by_name(files);
    let hot = &files["hot.txt"];
    assert!(hot.suppressed);
    assert_eq!(hot.version, 11);
    assert_eq!(hot.size, 9, "content not re-read while suppressed");

    // No longer suppressed: the file is re-hashed.
    let (files, _) = walker(&dir, &clock)
        .current_filer(MapFiler(cache))
        .suppressor(Always(false, true))
        .walk()
        .unwrap();
    let files = by_name(files);
    let hot = &files["hot.txt"];
    assert!(!hot.suppressed);
    assert_eq!(hot.size, 17);
    assert!(!hot.blocks.is_empty());
}

#[test]
fn test_suppressor_steady_states_do_not_log_or_reuse() {
    let dir = TempDir::new().unwrap();
    write(&dir, "warm.txt", b"fresh bytes");

    let cached = File {
        name: "warm.txt".to_string(),
        version: 3,
        flags: 0o644,
        modified: 1,
        size: 1,
        blocks: Vec::new(),
        suppressed: false,
    };
    let mut cache = HashMap::new();
    cache.insert("warm.txt".to_string(), cached);

    struct Quiet;
    impl Suppressor for Quiet {
        fn suppress(&self, _name: &str, _meta: &fs::Metadata) -> (bool, bool) {
            (false, false)
        }
    }

    let clock = Arc::new(LogicalClock::new());
    let (files, _) = walker(&dir, &clock)
        .current_filer(MapFiler(cache))
        .suppressor(Quiet)
        .walk()
        .unwrap();
    let files = by_name(files);
    // Unsuppressed changed file: hashed as usual.
    assert_eq!(files["warm.txt"].size, 11);
}

#[test]
fn test_missing_base_dir_errors() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(LogicalClock::new());
    let missing = dir.path().join("nope");
    assert!(Walker::new(&missing, clock).walk().is_err());
}

#[test]
fn test_config_drives_walker() {
    let dir = TempDir::new().unwrap();
    write(&dir, ".ignore", b"*.skip\n");
    write(&dir, "x.skip", b"skip me");
    write(&dir, "data.bin", &vec![1u8; 100]);

    let config = ScanConfig {
        block_size: 32,
        ignore_file: Some(".ignore".to_string()),
        ignore_perms: true,
    };
    let clock = Arc::new(LogicalClock::new());
    let (files, _) = Walker::with_config(dir.path(), clock, &config).walk().unwrap();
    let files = by_name(files);

    assert!(!files.contains_key("x.skip"));
    let data = &files["data.bin"];
    assert_eq!(data.blocks.len(), 4, "100 bytes in 32-byte blocks");
    assert!(!data.has_permission_bits());
    assert_eq!(data.flags & 0o777, 0o666);
}

fn rel(name: &str) -> String {
    name.replace('/', std::path::MAIN_SEPARATOR_STR)
}
