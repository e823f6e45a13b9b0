//! Content block hashing.

use std::io::{self, Read};

use sha2::{Digest, Sha256};

use sync_core::file::Block;

/// Read `r` in `block_size` chunks and hash each one. The last block may be
/// short; an empty input yields no blocks.
pub fn blocks<R: Read>(mut r: R, block_size: usize) -> io::Result<Vec<Block>> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; block_size];
    let mut offset: i64 = 0;

    loop {
        let n = read_block(&mut r, &mut buf)?;
        if n == 0 {
            break;
        }
        let mut hasher = Sha256::new();
        hasher.update(&buf[..n]);
        out.push(Block {
            offset,
            size: n as u32,
            hash: hasher.finalize().into(),
        });
        offset += n as i64;
        if n < block_size {
            break;
        }
    }
    Ok(out)
}

// Fill `buf` as far as the reader allows; short reads don't end a block
// early.
fn read_block<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
