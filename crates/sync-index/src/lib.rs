//! sync-index: the persistent file index and the per-repository
//! reconciliation engine.
//!
//! `IndexDb` owns the on-disk key-value store; one `FileSet` per repository
//! reconciles the local scan with up to 63 remote peer views on top of it,
//! maintaining the derived global view (newest version per name, and which
//! peers hold it).

pub mod set;
pub mod store;

pub use set::{Bitset, FileSet};
pub use store::{IndexDb, StoreError};
