//! Chain-traversable message identifiers.
//!
//! An [`Identifier`] is a compressed secp256k1 point used as an opaque
//! message label. A conversation walks the chain `ID_i = PK · k^i mod n`
//! for a shared chain key `k`: parties holding `k` can step forward and
//! backward cheaply, while outside observers see unrelated curve points.

use k256::elliptic_curve::Field;
use k256::{ProjectivePoint, Scalar};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

use crate::curve::{
    generator, point_from_bytes, point_to_compressed, scalar_from_bytes, scalar_inv, scalar_mul,
    scalar_pow,
};
use crate::signer::{schnorr_sign, schnorr_verify};
use crate::types::{KaspeakError, Result};
use crate::utils::to_hex;

/// A compressed secp256k1 point acting as a message label.
#[derive(Clone)]
pub struct Identifier {
    point: ProjectivePoint,
    compressed: [u8; 33],
}

impl Identifier {
    /// Builds an identifier from a curve point; the point at infinity is
    /// not a usable label.
    pub fn from_point(point: ProjectivePoint) -> Result<Self> {
        let compressed = point_to_compressed(&point)?;
        Ok(Self { point, compressed })
    }

    /// Parses a 33-byte compressed (or 65-byte uncompressed) encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_point(point_from_bytes(bytes)?)
    }

    /// Parses a hex encoding.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        Self::from_bytes(&crate::utils::from_hex(hex_str)?)
    }

    /// Position `index` of the chain anchored at `reference`:
    /// `reference · (chain_key^index mod n)`. Position zero is never
    /// materialised, so `index` must be at least 1.
    pub fn from_chain_key(
        chain_key: &Scalar,
        index: u64,
        reference: &ProjectivePoint,
    ) -> Result<Self> {
        if index < 1 {
            return Err(KaspeakError::InvalidChainIndex(index));
        }
        let power = scalar_pow(chain_key, index);
        Self::from_point(scalar_mul(reference, &power))
    }

    /// The next identifier on the chain.
    pub fn next(&self, chain_key: &Scalar) -> Result<Self> {
        self.next_by(chain_key, 1)
    }

    /// Steps `count` positions forward.
    pub fn next_by(&self, chain_key: &Scalar, count: u64) -> Result<Self> {
        let step = scalar_pow(chain_key, count);
        Self::from_point(scalar_mul(&self.point, &step))
    }

    /// The previous identifier on the chain.
    pub fn prev(&self, chain_key: &Scalar) -> Result<Self> {
        self.prev_by(chain_key, 1)
    }

    /// Steps `count` positions backward.
    pub fn prev_by(&self, chain_key: &Scalar, count: u64) -> Result<Self> {
        let inverse = scalar_inv(chain_key)?;
        let step = scalar_pow(&inverse, count);
        Self::from_point(scalar_mul(&self.point, &step))
    }

    /// The underlying curve point.
    pub fn point(&self) -> &ProjectivePoint {
        &self.point
    }

    /// The 33-byte compressed encoding.
    pub fn to_bytes(&self) -> [u8; 33] {
        self.compressed
    }

    /// Lowercase hex of the compressed encoding.
    pub fn to_hex(&self) -> String {
        to_hex(&self.compressed)
    }

    /// Verifies a Schnorr signature against this identifier's x-only key.
    pub fn verify(&self, signature: &[u8], msg: &[u8]) -> bool {
        schnorr_verify(signature, msg, &self.compressed)
    }
}

impl PartialEq for Identifier {
    fn eq(&self, other: &Self) -> bool {
        self.compressed == other.compressed
    }
}

impl Eq for Identifier {}

impl std::hash::Hash for Identifier {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.compressed.hash(state);
    }
}

impl std::fmt::Debug for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Identifier").field(&self.to_hex()).finish()
    }
}

/// An [`Identifier`] whose discrete log is known, so it can sign.
///
/// Only constructible from secret material; there are no public-point
/// factories on this type.
pub struct SecretIdentifier {
    secret: Scalar,
    identifier: Identifier,
}

impl SecretIdentifier {
    /// Builds from 32 big-endian secret bytes, reduced modulo the group
    /// order; a zero scalar is rejected.
    pub fn from_secret(secret: &[u8; 32]) -> Result<Self> {
        Self::from_scalar(scalar_from_bytes(secret))
    }

    /// Builds from an already-reduced scalar; zero is rejected.
    pub fn from_scalar(secret: Scalar) -> Result<Self> {
        if bool::from(secret.is_zero()) {
            return Err(KaspeakError::InvalidPrivateKey(
                "secret scalar reduces to zero".to_string(),
            ));
        }
        let identifier = Identifier::from_point(scalar_mul(&generator(), &secret))?;
        Ok(Self { secret, identifier })
    }

    /// Draws a fresh secret from the OS CSPRNG.
    pub fn random() -> Self {
        loop {
            let mut bytes = [0u8; 32];
            OsRng.fill_bytes(&mut bytes);
            let scalar = scalar_from_bytes(&bytes);
            bytes.zeroize();
            if let Ok(secret) = Self::from_scalar(scalar) {
                return secret;
            }
        }
    }

    /// Schnorr-signs `SHA256(msg)` with the stored scalar.
    pub fn sign(&self, msg: &[u8]) -> Result<[u8; 64]> {
        schnorr_sign(msg, &self.secret)
    }

    /// The public identifier.
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// Big-endian bytes of the secret scalar.
    pub fn secret_bytes(&self) -> [u8; 32] {
        crate::curve::scalar_to_bytes(&self.secret)
    }
}

impl Drop for SecretIdentifier {
    fn drop(&mut self) {
        let mut bytes = crate::curve::scalar_to_bytes(&self.secret);
        bytes.zeroize();
    }
}

impl std::fmt::Debug for SecretIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretIdentifier")
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}
