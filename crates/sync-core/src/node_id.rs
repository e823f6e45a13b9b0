//! NodeId: the identity of a peer, derived from its TLS certificate.
//!
//! A node ID is the SHA-256 hash of the peer's DER certificate. The textual
//! form is uppercase base32 with two Luhn mod-32 check characters mixed in
//! and hyphens every nine characters, e.g.
//! `MFZWI3DB-ONSGYYLO-MFZWI3DB-ONSGYYLO-MFZWI3DB-ONSGYYLO`. Parsing accepts
//! both the checked 54-character form and the bare 52-character form.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use sha2::{Digest, Sha256};
use thiserror::Error;

const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NodeIdError {
    #[error("node ID invalid: incorrect length {0}")]
    InvalidLength(usize),
    #[error("node ID invalid: character {0:?} outside base32 alphabet")]
    InvalidCharacter(char),
    #[error("node ID invalid: incorrect check characters")]
    Checksum,
}

/// A 32-byte node identifier.
///
/// Ordering and equality are over the raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId([u8; 32]);

impl NodeId {
    /// Derive the ID from a DER-encoded certificate.
    pub fn from_der_cert(cert: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(cert);
        Self(hasher.finalize().into())
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let id = base32_encode(&self.0);
        let c0 = luhn32(&id[..26]).expect("own base32 output");
        let c1 = luhn32(&id[26..]).expect("own base32 output");

        let mut checked = Vec::with_capacity(54);
        checked.extend_from_slice(&id[..26]);
        checked.push(c0);
        checked.extend_from_slice(&id[26..]);
        checked.push(c1);

        let groups: Vec<&str> = checked
            .chunks(9)
            .map(|c| std::str::from_utf8(c).expect("base32 is ASCII"))
            .collect();
        write!(f, "{}", groups.join("-"))
    }
}

impl FromStr for NodeId {
    type Err = NodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id: String = s
            .chars()
            .filter(|c| !matches!(c, '=' | ' ' | '-'))
            .map(|c| c.to_ascii_uppercase())
            .collect();
        if !id.is_ascii() {
            let bad = id.chars().find(|c| !c.is_ascii()).unwrap_or('?');
            return Err(NodeIdError::InvalidCharacter(bad));
        }

        let data = match id.len() {
            52 => id,
            54 => {
                let bytes = id.as_bytes();
                let p0 = &bytes[..26];
                let p1 = &bytes[27..53];
                if luhn32(p0)? != bytes[26] || luhn32(p1)? != bytes[53] {
                    return Err(NodeIdError::Checksum);
                }
                format!("{}{}", &id[..26], &id[27..53])
            }
            n => return Err(NodeIdError::InvalidLength(n)),
        };

        let decoded = base32_decode(data.as_bytes())?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&decoded[..32]);
        Ok(Self(out))
    }
}

// Serialize as the grouped textual form for logs, config and JSON.
impl serde::Serialize for NodeId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for NodeId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// RFC 4648 base32, uppercase, no padding. 32 bytes encode to 52 characters.
fn base32_encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 8 / 5 + 1);
    let mut buffer: u64 = 0;
    let mut bits = 0;

    for &byte in data {
        buffer = (buffer << 8) | u64::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[((buffer >> bits) & 0x1f) as usize]);
        }
    }
    if bits > 0 {
        out.push(ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize]);
    }
    out
}

fn base32_decode(data: &[u8]) -> Result<Vec<u8>, NodeIdError> {
    let mut out = Vec::with_capacity(data.len() * 5 / 8);
    let mut buffer: u64 = 0;
    let mut bits = 0;

    for &ch in data {
        let index = ALPHABET
            .iter()
            .position(|&a| a == ch)
            .ok_or(NodeIdError::InvalidCharacter(ch as char))?;
        buffer = (buffer << 5) | index as u64;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push(((buffer >> bits) & 0xff) as u8);
        }
    }
    Ok(out)
}

// Luhn mod-32 check character over the base32 alphabet.
fn luhn32(data: &[u8]) -> Result<u8, NodeIdError> {
    let n = ALPHABET.len();
    let mut factor = 1;
    let mut sum = 0;

    for &ch in data {
        let codepoint = ALPHABET
            .iter()
            .position(|&a| a == ch)
            .ok_or(NodeIdError::InvalidCharacter(ch as char))?;
        let addend = factor * codepoint;
        factor = if factor == 2 { 1 } else { 2 };
        sum += addend / n + addend % n;
    }
    let check = (n - sum % n) % n;
    Ok(ALPHABET[check])
}
