//! Model trait seam between the wire protocol and the reconciliation core.
//!
//! The transport layer decodes protocol messages into typed calls on a
//! `Model`. `NativeModel` sits between the two and rewrites file names to
//! the platform's preferred Unicode form: macOS file systems store names in
//! NFD, everything else expects NFC and is left untouched.

use std::borrow::Cow;
use std::io;

use crate::file::File;
use crate::node_id::NodeId;

/// Callbacks driven by inbound protocol messages.
pub trait Model: Send + Sync {
    /// A peer sent its full index for a repository.
    fn index(&self, node: &NodeId, repo: &str, files: Vec<File>);

    /// A peer sent an incremental index update.
    fn index_update(&self, node: &NodeId, repo: &str, files: Vec<File>);

    /// A peer requested a chunk of file content.
    fn request(
        &self,
        node: &NodeId,
        repo: &str,
        name: &str,
        offset: i64,
        size: u32,
    ) -> io::Result<Vec<u8>>;

    /// The connection to a peer closed.
    fn close(&self, node: &NodeId);
}

/// Rewrite an inbound name to the platform's native Unicode form.
#[cfg(target_os = "macos")]
pub fn native_name(name: &str) -> Cow<'_, str> {
    use unicode_normalization::UnicodeNormalization;
    Cow::Owned(name.nfd().collect())
}

/// Rewrite an inbound name to the platform's native Unicode form.
#[cfg(not(target_os = "macos"))]
pub fn native_name(name: &str) -> Cow<'_, str> {
    Cow::Borrowed(name)
}

/// Wraps a model and normalizes every inbound file name.
pub struct NativeModel<M> {
    next: M,
}

impl<M: Model> NativeModel<M> {
    pub fn new(next: M) -> Self {
        Self { next }
    }

    fn normalize(files: Vec<File>) -> Vec<File> {
        files
            .into_iter()
            .map(|mut f| {
                f.name = native_name(&f.name).into_owned();
                f
            })
            .collect()
    }
}

impl<M: Model> Model for NativeModel<M> {
    fn index(&self, node: &NodeId, repo: &str, files: Vec<File>) {
        self.next.index(node, repo, Self::normalize(files));
    }

    fn index_update(&self, node: &NodeId, repo: &str, files: Vec<File>) {
        self.next.index_update(node, repo, Self::normalize(files));
    }

    fn request(
        &self,
        node: &NodeId,
        repo: &str,
        name: &str,
        offset: i64,
        size: u32,
    ) -> io::Result<Vec<u8>> {
        self.next
            .request(node, repo, &native_name(name), offset, size)
    }

    fn close(&self, node: &NodeId) {
        self.next.close(node);
    }
}
