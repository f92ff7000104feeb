//! Schnorr and ECDSA signing over secp256k1.
//!
//! Both schemes emit 64 bytes and hash the message with SHA-256 before
//! signing; when a hex string is the message, its UTF-8 bytes are what
//! gets hashed, never the decoded bytes. Schnorr is BIP-340 style with
//! x-only public keys and authenticates every payload; ECDSA is provided
//! for completeness.

use k256::ecdsa;
use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::schnorr;
use k256::{FieldBytes, Scalar};
use rand::RngCore;

use crate::curve::scalar_to_bytes;
use crate::types::{KaspeakError, Result, POINT_SIZE, SIGNATURE_SIZE};
use crate::utils::sha256;

/// Signs `SHA256(msg)` with a BIP-340 Schnorr signature.
pub fn schnorr_sign(msg: &[u8], private_key: &Scalar) -> Result<[u8; 64]> {
    let key_bytes = scalar_to_bytes(private_key);
    let signing_key = schnorr::SigningKey::from_bytes(&key_bytes)
        .map_err(|_| KaspeakError::InvalidPrivateKey("scalar is zero or out of range".to_string()))?;

    let digest = sha256(msg);
    let mut aux_rand = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut aux_rand);

    let signature = signing_key
        .sign_raw(&digest, &aux_rand)
        .map_err(|e| KaspeakError::SigningError(e.to_string()))?;

    let mut out = [0u8; 64];
    out.copy_from_slice(&signature.to_bytes());
    Ok(out)
}

/// Verifies a 64-byte Schnorr signature over `SHA256(msg)`.
///
/// `public_key` may be the 33-byte compressed form (the parity byte is
/// dropped) or the 32-byte x-only form. Malformed signatures and keys
/// verify as `false`; this function never errors.
pub fn schnorr_verify(signature: &[u8], msg: &[u8], public_key: &[u8]) -> bool {
    if signature.len() != SIGNATURE_SIZE {
        return false;
    }
    let x_only = match public_key.len() {
        POINT_SIZE => &public_key[1..],
        32 => public_key,
        _ => return false,
    };
    let Ok(verifying_key) = schnorr::VerifyingKey::from_bytes(x_only) else {
        return false;
    };
    let Ok(signature) = schnorr::Signature::try_from(signature) else {
        return false;
    };
    verifying_key.verify_raw(&sha256(msg), &signature).is_ok()
}

/// Signs `SHA256(msg)` with deterministic ECDSA, emitting `r ‖ s`.
pub fn ecdsa_sign(msg: &[u8], private_key: &Scalar) -> Result<[u8; 64]> {
    let key_bytes = scalar_to_bytes(private_key);
    let signing_key = ecdsa::SigningKey::from_bytes(FieldBytes::from_slice(&key_bytes))
        .map_err(|_| KaspeakError::InvalidPrivateKey("scalar is zero or out of range".to_string()))?;

    let signature: ecdsa::Signature = signing_key
        .sign_prehash(&sha256(msg))
        .map_err(|e| KaspeakError::SigningError(e.to_string()))?;

    let mut out = [0u8; 64];
    out.copy_from_slice(&signature.to_bytes());
    Ok(out)
}

/// Verifies a 64-byte ECDSA signature over `SHA256(msg)` against a SEC1
/// public key. Malformed inputs verify as `false`.
pub fn ecdsa_verify(signature: &[u8], msg: &[u8], public_key: &[u8]) -> bool {
    if signature.len() != SIGNATURE_SIZE {
        return false;
    }
    let Ok(verifying_key) = ecdsa::VerifyingKey::from_sec1_bytes(public_key) else {
        return false;
    };
    let Ok(signature) = ecdsa::Signature::from_slice(signature) else {
        return false;
    };
    verifying_key.verify_prehash(&sha256(msg), &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::{generator, point_to_compressed, scalar_mul};

    fn keypair(secret: u64) -> (Scalar, [u8; 33]) {
        let private = Scalar::from(secret);
        let public = point_to_compressed(&scalar_mul(&generator(), &private)).unwrap();
        (private, public)
    }

    #[test]
    fn test_schnorr_sign_verify() {
        let (private, public) = keypair(6);
        let msg = b"aa".repeat(64);

        let signature = schnorr_sign(&msg, &private).unwrap();
        assert_eq!(signature.len(), 64);
        assert!(schnorr_verify(&signature, &msg, &public));
    }

    #[test]
    fn test_schnorr_verify_x_only_key() {
        let (private, public) = keypair(7);
        let signature = schnorr_sign(b"hello", &private).unwrap();
        assert!(schnorr_verify(&signature, b"hello", &public[1..]));
    }

    #[test]
    fn test_schnorr_wrong_key_fails() {
        let (private, _) = keypair(6);
        let (_, other_public) = keypair(7);
        let signature = schnorr_sign(b"message", &private).unwrap();
        assert!(!schnorr_verify(&signature, b"message", &other_public));
    }

    #[test]
    fn test_schnorr_wrong_message_fails() {
        let (private, public) = keypair(6);
        let signature = schnorr_sign(b"message", &private).unwrap();
        assert!(!schnorr_verify(&signature, b"other", &public));
    }

    #[test]
    fn test_schnorr_malformed_inputs_are_false() {
        let (private, public) = keypair(6);
        let signature = schnorr_sign(b"message", &private).unwrap();

        assert!(!schnorr_verify(&signature[..32], b"message", &public));
        assert!(!schnorr_verify(&signature, b"message", &public[..10]));
        assert!(!schnorr_verify(&[0u8; 64], b"message", &public));
    }

    #[test]
    fn test_zero_scalar_cannot_sign() {
        assert!(schnorr_sign(b"message", &Scalar::ZERO).is_err());
        assert!(ecdsa_sign(b"message", &Scalar::ZERO).is_err());
    }

    #[test]
    fn test_ecdsa_sign_verify() {
        let (private, public) = keypair(42);
        let signature = ecdsa_sign(b"ecdsa message", &private).unwrap();
        assert!(ecdsa_verify(&signature, b"ecdsa message", &public));
        assert!(!ecdsa_verify(&signature, b"tampered", &public));
    }

    #[test]
    fn test_ecdsa_is_deterministic() {
        let (private, _) = keypair(42);
        let first = ecdsa_sign(b"same input", &private).unwrap();
        let second = ecdsa_sign(b"same input", &private).unwrap();
        assert_eq!(first, second);
    }
}
