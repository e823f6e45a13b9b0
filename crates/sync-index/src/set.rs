//! The per-repository file set.
//!
//! Tracks one local view plus up to 63 remote peer views and derives from
//! them, per file name, the newest version (the "global" record), the set
//! of peers holding exactly that version, and what each peer still needs.
//!
//! Every mutating operation writes through to the persistent store first,
//! then takes the set's single mutex and updates the in-memory maps; the
//! invariants documented on the fields hold whenever no public call is in
//! flight. A per-peer change counter lets pollers detect staleness without
//! diffing views.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use sync_core::clock::LogicalClock;
use sync_core::file::{File, FileKey, FLAG_DELETED};
use sync_core::{LOCAL_ID, MAX_PEERS};

use crate::store::{IndexDb, Result};

/// Availability mask: bit `i` set means the peer with connection id `i`
/// holds exactly the global version.
pub type Bitset = u64;

/// A unique file record shared between the peer views that reference it.
/// `usage` counts the referencing views; the record is dropped when it
/// reaches zero. `global` marks the newest record for its name.
#[derive(Debug)]
struct FileRecord {
    file: File,
    usage: u32,
    global: bool,
}

struct State {
    /// Unique records, union across all peers. For every key referenced by
    /// a peer map there is a record here whose usage equals the number of
    /// referencing peers.
    files: HashMap<FileKey, FileRecord>,
    /// Per-peer name -> key views. `None` until the peer's first replace;
    /// slot `LOCAL_ID` is this node's own scan.
    peer_files: [Option<HashMap<String, FileKey>>; 64],
    /// Bumped on every effective mutation of the corresponding view.
    changes: [u64; 64],
    /// Derived global view. For every name with at least one peer entry:
    /// the newest key, the exact set of peers holding it, and its version.
    global_key: HashMap<String, FileKey>,
    global_availability: HashMap<String, Bitset>,
    global_version: HashMap<String, u64>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            files: HashMap::new(),
            peer_files: std::array::from_fn(|_| None),
            changes: [0; 64],
            global_key: HashMap::new(),
            global_availability: HashMap::new(),
            global_version: HashMap::new(),
        }
    }
}

pub struct FileSet {
    repo: String,
    db: Arc<IndexDb>,
    clock: Arc<LogicalClock>,
    state: Mutex<State>,
}

fn check_peer(peer: u32) {
    assert!(
        peer < MAX_PEERS,
        "connection id must be in the range 0 - 63 inclusive, got {}",
        peer
    );
}

impl FileSet {
    /// Create the set for `repo`, replaying every peer view stored from a
    /// previous run into memory.
    pub fn new(repo: impl Into<String>, db: Arc<IndexDb>, clock: Arc<LogicalClock>) -> Result<Self> {
        let repo = repo.into();
        let mut state = State::default();
        for peer in db.peers_with_repo(&repo)? {
            if peer >= MAX_PEERS {
                warn!(peer, repo = %repo, "ignoring stored view with out-of-range peer id");
                continue;
            }
            let files = db.have(peer, &repo)?;
            debug!(peer, repo = %repo, files = files.len(), "reloading stored view");
            state.changes[peer as usize] += 1;
            state.replace(peer as usize, files);
        }
        Ok(Self {
            repo,
            db,
            clock,
            state: Mutex::new(state),
        })
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Replace peer's entire view with `files`.
    pub fn replace(&self, peer: u32, files: Vec<File>) -> Result<()> {
        debug!(peer, files = files.len(), repo = %self.repo, "replace");
        check_peer(peer);

        self.db.replace(peer, &self.repo, &files)?;

        let mut state = self.state.lock().unwrap();
        if files.is_empty() || !state.equals(peer as usize, &files) {
            state.changes[peer as usize] += 1;
            state.replace(peer as usize, files);
        }
        Ok(())
    }

    /// Replace the local view with `files`, tombstoning everything that
    /// disappeared since the previous scan: names currently present in the
    /// local slot but absent from `files` are appended as deleted records
    /// with a freshly ticked version.
    pub fn replace_with_delete(&self, peer: u32, mut files: Vec<File>) -> Result<()> {
        debug!(peer, files = files.len(), repo = %self.repo, "replace_with_delete");
        check_peer(peer);

        self.db.replace_with_delete(peer, &self.repo, &files)?;

        let mut state = self.state.lock().unwrap();
        if files.is_empty() || !state.equals(peer as usize, &files) {
            state.changes[peer as usize] += 1;

            let new_names: HashMap<&str, ()> =
                files.iter().map(|f| (f.name.as_str(), ())).collect();

            let mut tombstones = Vec::new();
            if let Some(local) = &state.peer_files[LOCAL_ID as usize] {
                for key in local.values() {
                    if new_names.contains_key(key.name.as_str()) {
                        continue;
                    }
                    let Some(record) = state.files.get(key) else {
                        continue;
                    };
                    if record.file.is_deleted() {
                        continue;
                    }
                    let mut f = record.file.clone();
                    f.flags |= FLAG_DELETED;
                    f.blocks = Vec::new();
                    f.size = 0;
                    f.version = self.clock.tick(f.version);
                    debug!(name = %f.name, version = f.version, "deleted");
                    tombstones.push(f);
                }
            }
            files.extend(tombstones);

            state.replace(peer as usize, files);
        }
        Ok(())
    }

    /// Fold an incremental update into peer's view.
    pub fn update(&self, peer: u32, files: Vec<File>) -> Result<()> {
        debug!(peer, files = files.len(), repo = %self.repo, "update");
        check_peer(peer);

        self.db.update(peer, &self.repo, &files)?;

        let mut state = self.state.lock().unwrap();
        state.update(peer as usize, files);
        state.changes[peer as usize] += 1;
        Ok(())
    }

    /// The global records peer is missing: newer than the peer's entry for
    /// the same name (or with no entry at all), skipping suppressed files
    /// and deletions the peer has nothing to delete for.
    pub fn need(&self, peer: u32) -> Vec<File> {
        debug!(peer, repo = %self.repo, "need");
        check_peer(peer);

        let state = self.state.lock().unwrap();
        let peer_map = state.peer_files[peer as usize].as_ref();
        let mut out = Vec::with_capacity(state.global_key.len() / 2);

        for (global_key, record) in &state.files {
            if !record.global || record.file.suppressed {
                continue;
            }
            let peer_key = peer_map.and_then(|m| m.get(&global_key.name));
            let newer = match peer_key {
                Some(pk) => global_key.newer_than(pk),
                None => true,
            };
            if !newer {
                continue;
            }
            if record.file.is_deleted() {
                let peer_deleted = match peer_key {
                    None => true,
                    Some(pk) => state
                        .files
                        .get(pk)
                        .map(|r| r.file.is_deleted())
                        .unwrap_or(true),
                };
                // Nothing to delete, or already deleted on the peer.
                if peer_deleted {
                    continue;
                }
            }
            out.push(record.file.clone());
        }
        out
    }

    /// Peer's last persisted view, streamed from the store.
    pub fn have(&self, peer: u32) -> Result<Vec<File>> {
        debug!(peer, repo = %self.repo, "have");
        check_peer(peer);
        self.db.have(peer, &self.repo)
    }

    /// All records currently marked global.
    pub fn global(&self) -> Vec<File> {
        debug!(repo = %self.repo, "global");
        let state = self.state.lock().unwrap();
        state
            .files
            .values()
            .filter(|r| r.global)
            .map(|r| r.file.clone())
            .collect()
    }

    /// Peer's record for `name`; the zero-valued file when absent.
    pub fn get(&self, peer: u32, name: &str) -> File {
        check_peer(peer);
        let state = self.state.lock().unwrap();
        state.peer_files[peer as usize]
            .as_ref()
            .and_then(|m| m.get(name))
            .and_then(|k| state.files.get(k))
            .map(|r| r.file.clone())
            .unwrap_or_default()
    }

    /// The global record for `name`; the zero-valued file when absent.
    pub fn get_global(&self, name: &str) -> File {
        let state = self.state.lock().unwrap();
        state
            .global_key
            .get(name)
            .and_then(|k| state.files.get(k))
            .map(|r| r.file.clone())
            .unwrap_or_default()
    }

    /// Which peers hold the global version of `name`.
    pub fn availability(&self, name: &str) -> Bitset {
        let state = self.state.lock().unwrap();
        state.global_availability.get(name).copied().unwrap_or(0)
    }

    /// The change counter for peer's view.
    pub fn changes(&self, peer: u32) -> u64 {
        check_peer(peer);
        let state = self.state.lock().unwrap();
        state.changes[peer as usize]
    }
}

impl State {
    /// True when peer's current non-deleted view is name-for-name and
    /// version-for-version identical to `files`. Used to suppress change
    /// counter bumps on no-op replaces.
    fn equals(&self, peer: usize, files: &[File]) -> bool {
        let Some(peer_map) = &self.peer_files[peer] else {
            return false;
        };

        let mut current: HashMap<&str, &FileKey> = HashMap::new();
        for key in peer_map.values() {
            if let Some(record) = self.files.get(key) {
                if !record.file.is_deleted() {
                    current.insert(record.file.name.as_str(), key);
                }
            }
        }

        if current.len() != files.len() {
            return false;
        }
        files.iter().all(|f| {
            current
                .get(f.name.as_str())
                .is_some_and(|k| **k == f.key())
        })
    }

    /// Fold `files` into peer's view, maintaining usage counts and the
    /// global maps incrementally. The peer must have seen a replace first.
    fn update(&mut self, peer: usize, files: Vec<File>) {
        assert!(
            self.peer_files[peer].is_some(),
            "update before replace for peer {}",
            peer
        );

        for f in files {
            let key = f.key();
            let name = f.name.clone();

            let peer_map = self.peer_files[peer].as_mut().unwrap();
            if peer_map.get(&name) == Some(&key) {
                // The peer already has exactly this version.
                continue;
            }
            let previous = peer_map.insert(name.clone(), key.clone());

            // The overwritten key loses one reference. If that kills the
            // record while it is still the global one, the global view for
            // this name has to be rebuilt below.
            let mut dropped_global = false;
            let peer_left_global = previous.as_ref() == self.global_key.get(&name);
            if let Some(prev) = previous {
                match self.files.get_mut(&prev) {
                    Some(record) if record.usage == 1 => {
                        dropped_global = record.global;
                        self.files.remove(&prev);
                    }
                    Some(record) => record.usage -= 1,
                    None => {}
                }
            }

            self.files
                .entry(key.clone())
                .and_modify(|r| r.usage += 1)
                .or_insert_with(|| FileRecord {
                    file: f,
                    usage: 1,
                    global: false,
                });

            match self.global_key.get(&name) {
                Some(gk) if *gk == key => {
                    *self.global_availability.entry(name).or_insert(0) |= 1 << peer;
                }
                Some(gk) if key.newer_than(gk) => {
                    let old = gk.clone();
                    if let Some(record) = self.files.get_mut(&old) {
                        record.global = false;
                    }
                    self.promote(name, key, 1 << peer);
                }
                Some(_) => {
                    // The peer moved to something older than the global.
                    if dropped_global {
                        self.recompute_name(&name);
                    } else if peer_left_global {
                        if let Some(av) = self.global_availability.get_mut(&name) {
                            *av &= !(1 << peer);
                        }
                    }
                }
                None => {
                    self.promote(name, key, 1 << peer);
                }
            }
        }
    }

    /// Throw away peer's entire view, recompute the global maps from the
    /// remaining 63 views, then fold in `files` as the new view.
    fn replace(&mut self, peer: usize, files: Vec<File>) {
        if let Some(old) = self.peer_files[peer].take() {
            for key in old.values() {
                match self.files.get_mut(key) {
                    Some(record) if record.usage == 1 => {
                        self.files.remove(key);
                    }
                    Some(record) => record.usage -= 1,
                    None => {}
                }
            }
        }
        self.peer_files[peer] = Some(HashMap::new());

        let names: Vec<String> = self.global_key.keys().cloned().collect();
        for name in names {
            self.recompute_name(&name);
        }

        self.update(peer, files);
    }

    /// Rebuild the global view for one name from the 64 peer maps: the
    /// newest key wins, ties accumulate availability bits, and the name is
    /// dropped entirely when nobody holds it.
    fn recompute_name(&mut self, name: &str) {
        let mut newest: Option<&FileKey> = None;
        let mut availability: Bitset = 0;

        for (i, peer_map) in self.peer_files.iter().enumerate() {
            let Some(key) = peer_map.as_ref().and_then(|m| m.get(name)) else {
                continue;
            };
            match newest {
                Some(current) if key == current => availability |= 1 << i,
                Some(current) if key.newer_than(current) => {
                    newest = Some(key);
                    availability = 1 << i;
                }
                Some(_) => {}
                None => {
                    newest = Some(key);
                    availability = 1 << i;
                }
            }
        }

        match newest.cloned() {
            Some(winner) => {
                // A surviving record that used to be global must be demoted
                // before the new winner is marked.
                if let Some(old) = self.global_key.get(name) {
                    if *old != winner {
                        let old = old.clone();
                        if let Some(record) = self.files.get_mut(&old) {
                            record.global = false;
                        }
                    }
                }
                self.promote(name.to_string(), winner, availability);
            }
            None => {
                self.global_key.remove(name);
                self.global_availability.remove(name);
                self.global_version.remove(name);
            }
        }
    }

    /// Mark `key` as the global record for `name` and set all three derived
    /// maps in one step.
    fn promote(&mut self, name: String, key: FileKey, availability: Bitset) {
        if let Some(record) = self.files.get_mut(&key) {
            record.global = true;
        }
        self.global_version.insert(name.clone(), key.version);
        self.global_availability.insert(name.clone(), availability);
        self.global_key.insert(name, key);
    }
}
