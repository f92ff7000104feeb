//! secp256k1 point and scalar operations for the Kaspeak protocol.
//!
//! Everything on the wire is a compressed SEC1 point; scalars are reduced
//! modulo the group order `n`. Identifier chains need `k^i mod n` and
//! `k^{-1} mod n`, provided here as scalar-level routines so the rest of
//! the crate never touches field internals. Operations are variable-time;
//! all derived data is public by protocol design.

use k256::elliptic_curve::group::Group;
use k256::elliptic_curve::ops::Reduce;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::elliptic_curve::Field;
use k256::{ProjectivePoint, PublicKey, Scalar, U256};

use crate::types::{KaspeakError, Result, POINT_SIZE, UNCOMPRESSED_POINT_SIZE};
use crate::utils::sha256d;

/// The secp256k1 generator point.
pub fn generator() -> ProjectivePoint {
    ProjectivePoint::GENERATOR
}

/// Decodes a SEC1-encoded point: 33 bytes compressed (`0x02`/`0x03`
/// prefix) or 65 bytes uncompressed (`0x04` prefix).
///
/// Compressed input recovers `y` from `x³ + 7`, matching the parity the
/// prefix demands; a non-residue `x` or an off-curve pair is rejected.
pub fn point_from_bytes(bytes: &[u8]) -> Result<ProjectivePoint> {
    match bytes.len() {
        POINT_SIZE | UNCOMPRESSED_POINT_SIZE => {}
        other => {
            return Err(KaspeakError::InvalidPoint(format!(
                "expected {POINT_SIZE} or {UNCOMPRESSED_POINT_SIZE} bytes, got {other}"
            )))
        }
    }
    let key = PublicKey::from_sec1_bytes(bytes)
        .map_err(|_| KaspeakError::InvalidPoint("not a valid secp256k1 point".to_string()))?;
    Ok(key.to_projective())
}

/// Compressed 33-byte SEC1 encoding: parity prefix followed by the
/// big-endian x coordinate. The point at infinity has no encoding.
pub fn point_to_compressed(point: &ProjectivePoint) -> Result<[u8; 33]> {
    if bool::from(point.is_identity()) {
        return Err(KaspeakError::InvalidPoint(
            "point at infinity has no compressed encoding".to_string(),
        ));
    }
    let encoded = point.to_affine().to_encoded_point(true);
    let mut bytes = [0u8; 33];
    bytes.copy_from_slice(encoded.as_bytes());
    Ok(bytes)
}

/// Variable-time scalar multiplication. A zero scalar or identity input
/// yields the point at infinity.
pub fn scalar_mul(point: &ProjectivePoint, scalar: &Scalar) -> ProjectivePoint {
    point * scalar
}

/// ECDH shared secret: `SHA256(SHA256(compressed(priv · pub)))`.
pub fn shared_secret(private_key: &Scalar, public_point: &ProjectivePoint) -> Result<[u8; 32]> {
    let product = public_point * private_key;
    let compressed = point_to_compressed(&product)?;
    Ok(sha256d(&compressed))
}

/// Interprets 32 big-endian bytes as a scalar, reducing modulo `n`.
pub fn scalar_from_bytes(bytes: &[u8; 32]) -> Scalar {
    <Scalar as Reduce<U256>>::reduce(U256::from_be_slice(bytes))
}

/// Big-endian 32-byte encoding of a scalar.
pub fn scalar_to_bytes(scalar: &Scalar) -> [u8; 32] {
    scalar.to_bytes().into()
}

/// Multiplicative inverse modulo the group order; fails for zero.
pub fn scalar_inv(scalar: &Scalar) -> Result<Scalar> {
    Option::<Scalar>::from(scalar.invert()).ok_or(KaspeakError::NonInvertibleScalar)
}

/// `base^exp mod n` by 4-bit windowed exponentiation.
///
/// The exponent is an identifier chain index, so a plain u64 covers every
/// reachable position. `exp == 0` yields one.
pub fn scalar_pow(base: &Scalar, exp: u64) -> Scalar {
    let mut table = [Scalar::ONE; 16];
    for i in 1..16 {
        table[i] = table[i - 1] * base;
    }

    let mut acc = Scalar::ONE;
    let mut started = false;
    for window in (0..16).rev() {
        let nibble = ((exp >> (window * 4)) & 0xf) as usize;
        if started {
            acc = acc.square().square().square().square();
        }
        if nibble != 0 {
            acc *= &table[nibble];
            started = true;
        }
    }
    acc
}
