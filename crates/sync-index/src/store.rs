//! On-disk file index.
//!
//! One `redb` database holds every peer's last known view of every
//! repository. The namespace layout mirrors the in-memory structure: one
//! table per `(peer, repo)` pair, named `files/<hex peer id>/<repo>`, with
//! `name -> encoded file record` entries. Dropping a table is atomic, which
//! gives `replace` its drop-and-recreate semantics in a single transaction.

use std::collections::HashSet;
use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition, TableError, TableHandle};
use thiserror::Error;
use tracing::debug;

use sync_core::file::{File, FLAG_DELETED};
use sync_core::wire::{decode_file, encode_file, WireError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),
    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
    #[error("table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("stored record corrupt: {0}")]
    Corrupt(#[from] WireError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

fn table_name(peer: u32, repo: &str) -> String {
    format!("files/{:x}/{}", peer, repo)
}

/// The shared persistent store. One handle serves every repository's
/// `FileSet`; redb serialises writers internally.
pub struct IndexDb {
    db: Database,
}

impl IndexDb {
    /// Open or create the database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path)?;
        Ok(Self { db })
    }

    /// Drop and recreate the `(peer, repo)` namespace with exactly `files`.
    pub fn replace(&self, peer: u32, repo: &str, files: &[File]) -> Result<()> {
        let name = table_name(peer, repo);
        let def = TableDefinition::<&str, &[u8]>::new(&name);

        let txn = self.db.begin_write()?;
        txn.delete_table(def)?;
        {
            let mut table = txn.open_table(def)?;
            for f in files {
                table.insert(f.name.as_str(), encode_file(f).as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Insert or overwrite each of `files`, leaving absent entries alone.
    pub fn update(&self, peer: u32, repo: &str, files: &[File]) -> Result<()> {
        let name = table_name(peer, repo);
        let def = TableDefinition::<&str, &[u8]>::new(&name);

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(def)?;
            for f in files {
                table.insert(f.name.as_str(), encode_file(f).as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// `update` semantics, plus: every stored entry missing from `files`
    /// that is not already a tombstone gets its Deleted flag set and its
    /// block list cleared. All in one transaction.
    pub fn replace_with_delete(&self, peer: u32, repo: &str, files: &[File]) -> Result<()> {
        let name = table_name(peer, repo);
        let def = TableDefinition::<&str, &[u8]>::new(&name);
        let present: HashSet<&str> = files.iter().map(|f| f.name.as_str()).collect();

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(def)?;
            for f in files {
                table.insert(f.name.as_str(), encode_file(f).as_slice())?;
            }

            let mut tombstones = Vec::new();
            for entry in table.iter()? {
                let (key, value) = entry?;
                if present.contains(key.value()) {
                    continue;
                }
                let mut f = decode_file(value.value())?;
                if f.is_deleted() {
                    continue;
                }
                f.flags |= FLAG_DELETED;
                f.blocks.clear();
                debug!(name = %f.name, "tombstoning stored entry");
                tombstones.push((f.name.clone(), encode_file(&f)));
            }
            for (name, encoded) in tombstones {
                table.insert(name.as_str(), encoded.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Stream-decode the `(peer, repo)` namespace. Missing namespaces read
    /// as empty.
    pub fn have(&self, peer: u32, repo: &str) -> Result<Vec<File>> {
        let name = table_name(peer, repo);
        let def = TableDefinition::<&str, &[u8]>::new(&name);

        let txn = self.db.begin_read()?;
        let table = match txn.open_table(def) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut out = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            out.push(decode_file(value.value())?);
        }
        Ok(out)
    }

    /// Peer ids with a stored namespace for `repo`, ascending. Used to
    /// rebuild in-memory state after a restart.
    pub fn peers_with_repo(&self, repo: &str) -> Result<Vec<u32>> {
        let txn = self.db.begin_read()?;
        let mut out = Vec::new();
        for handle in txn.list_tables()? {
            let name = handle.name().to_string();
            let Some(rest) = name.strip_prefix("files/") else {
                continue;
            };
            let Some((hex_id, r)) = rest.split_once('/') else {
                continue;
            };
            if r != repo {
                continue;
            }
            if let Ok(id) = u32::from_str_radix(hex_id, 16) {
                out.push(id);
            }
        }
        out.sort_unstable();
        Ok(out)
    }
}
