//! Persistent wire encoding for file records.
//!
//! A length-prefixed big-endian encoding with a fixed field order:
//! `name, flags, modified, version, size, blocks[]`, each block
//! `{size, hash, offset}`. Variable-length fields carry a 32-bit length and
//! pad to four-byte alignment. The layout is frozen: records written by one
//! version of the store must decode in every later version.

use thiserror::Error;

use crate::file::{Block, File};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("truncated record: wanted {wanted} more bytes, had {had}")]
    Truncated { wanted: usize, had: usize },
    #[error("invalid UTF-8 in file name")]
    InvalidName,
    #[error("unexpected hash length {0}")]
    BadHashLength(usize),
    #[error("trailing garbage after record")]
    TrailingBytes,
}

pub fn encode_file(f: &File) -> Vec<u8> {
    let mut w = Writer::default();
    w.put_bytes(f.name.as_bytes());
    w.put_u32(f.flags);
    w.put_u64(f.modified as u64);
    w.put_u64(f.version);
    w.put_u64(f.size as u64);
    w.put_u32(f.blocks.len() as u32);
    for b in &f.blocks {
        w.put_u32(b.size);
        w.put_bytes(&b.hash);
        w.put_u64(b.offset as u64);
    }
    w.buf
}

pub fn decode_file(data: &[u8]) -> Result<File, WireError> {
    let mut r = Reader { data, pos: 0 };

    let name = String::from_utf8(r.take_bytes()?).map_err(|_| WireError::InvalidName)?;
    let flags = r.take_u32()?;
    let modified = r.take_u64()? as i64;
    let version = r.take_u64()?;
    let size = r.take_u64()? as i64;

    let count = r.take_u32()? as usize;
    let mut blocks = Vec::with_capacity(count.min(1 << 16));
    for _ in 0..count {
        let size = r.take_u32()?;
        let hash_bytes = r.take_bytes()?;
        let hash: [u8; 32] = hash_bytes
            .as_slice()
            .try_into()
            .map_err(|_| WireError::BadHashLength(hash_bytes.len()))?;
        let offset = r.take_u64()? as i64;
        blocks.push(Block { offset, size, hash });
    }

    if r.pos != r.data.len() {
        return Err(WireError::TrailingBytes);
    }

    Ok(File {
        name,
        version,
        flags,
        modified,
        size,
        blocks,
        suppressed: false,
    })
}

#[derive(Default)]
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn put_bytes(&mut self, data: &[u8]) {
        self.put_u32(data.len() as u32);
        self.buf.extend_from_slice(data);
        // Pad to four-byte alignment.
        let pad = (4 - data.len() % 4) % 4;
        self.buf.extend_from_slice(&[0u8; 3][..pad]);
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        let remaining = self.data.len() - self.pos;
        if remaining < n {
            return Err(WireError::Truncated {
                wanted: n,
                had: remaining,
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn take_u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn take_u64(&mut self) -> Result<u64, WireError> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn take_bytes(&mut self) -> Result<Vec<u8>, WireError> {
        let len = self.take_u32()? as usize;
        let out = self.take(len)?.to_vec();
        let pad = (4 - len % 4) % 4;
        self.take(pad)?;
        Ok(out)
    }
}
