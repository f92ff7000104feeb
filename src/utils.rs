//! Byte, hex, and hashing helpers shared across the protocol core.

use sha2::{Digest, Sha256};

use crate::types::{KaspeakError, Result};

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 applied twice, used for the ECDH shared-secret derivation.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// Decodes a lowercase or uppercase hex string, rejecting odd lengths.
pub fn from_hex(hex_str: &str) -> Result<Vec<u8>> {
    hex::decode(hex_str).map_err(|e| KaspeakError::InvalidHex(e.to_string()))
}

/// Encodes bytes as lowercase hex.
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Big-endian 32-byte encoding of a u64, for scalar normalisation.
pub fn u64_to_scalar_bytes(value: u64) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    bytes[24..].copy_from_slice(&value.to_be_bytes());
    bytes
}
