//! sync-core: Shared model types for P2P file index reconciliation.
//!
//! This crate provides the pieces every other crate builds on:
//! - File records, keys and flag bits
//! - The process-wide logical clock
//! - Node identifiers with checked textual encoding
//! - Connection-id allocation for the 64-peer session table
//! - The persistent wire encoding for file records
//! - The model trait seam with platform name normalization

pub mod cid;
pub mod clock;
pub mod file;
pub mod logging;
pub mod model;
pub mod node_id;
pub mod wire;

pub use cid::{ConnectionMap, LOCAL_ID, MAX_PEERS};
pub use clock::LogicalClock;
pub use file::{Block, File, FileKey, FLAG_DELETED, FLAG_DIRECTORY, FLAG_INVALID, FLAG_NO_PERM_BITS};
pub use model::{native_name, Model, NativeModel};
pub use node_id::{NodeId, NodeIdError};
