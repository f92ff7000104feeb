//! Message pipeline: plain object → CBOR → Zstd → optional AEAD.
//!
//! Decode failures never propagate as errors; they surface as an
//! [`UnknownMessage`] carrying a stable code for the stage that failed,
//! so callers can always tell a wrong key from corrupt data.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use ciborium::value::Value;
use rand::RngCore;

use crate::message::{KaspeakMessage, UnknownMessage};
use crate::models::MessageHeader;
use crate::registry::MessageRegistry;
use crate::types::{KaspeakError, Result, KEY_SIZE, NONCE_SIZE, ZSTD_LEVEL};

/// Encodes a message to payload data bytes.
///
/// The plain object is CBOR-serialised and Zstd-compressed; when the
/// message requires encryption the compressed bytes are sealed with
/// XChaCha20-Poly1305 under a fresh random nonce, and the output is
/// `nonce ‖ ciphertext`. A key supplied for an unencrypted type is
/// ignored with a warning.
pub fn encode(message: &dyn KaspeakMessage, key: Option<&[u8; KEY_SIZE]>) -> Result<Vec<u8>> {
    let encrypting = message.requires_encryption();
    if encrypting && key.is_none() {
        return Err(KaspeakError::EncryptionKeyMissing(message.message_type()));
    }
    if !encrypting && key.is_some() {
        tracing::warn!(
            message_type = message.message_type(),
            "encryption key supplied for an unencrypted message type, ignoring"
        );
    }

    let object = message.to_plain_object()?;
    let mut cbor = Vec::new();
    ciborium::into_writer(&object, &mut cbor)
        .map_err(|e| KaspeakError::EncodingError(format!("CBOR encoding failed: {e}")))?;

    let compressed = zstd::encode_all(cbor.as_slice(), ZSTD_LEVEL)
        .map_err(|e| KaspeakError::EncodingError(format!("compression failed: {e}")))?;

    match key {
        Some(key) if encrypting => {
            let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
            let mut nonce = [0u8; NONCE_SIZE];
            rand::thread_rng().fill_bytes(&mut nonce);
            let ciphertext = cipher
                .encrypt(XNonce::from_slice(&nonce), compressed.as_slice())
                .map_err(|e| KaspeakError::EncodingError(format!("encryption failed: {e}")))?;

            let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
            out.extend_from_slice(&nonce);
            out.extend_from_slice(&ciphertext);
            Ok(out)
        }
        _ => Ok(compressed),
    }
}

/// Decodes payload data into a typed message.
///
/// An unregistered type code fails loudly; everything after that point
/// degrades to an [`UnknownMessage`] with codes identifying the failing
/// stage: 0 AEAD rejection, 1 empty plaintext, 2 malformed ciphertext,
/// 3 decompression, 4 CBOR, 5 hydration.
pub fn decode(
    registry: &MessageRegistry,
    header: &MessageHeader,
    data: &[u8],
    key: Option<&[u8; KEY_SIZE]>,
) -> Result<Box<dyn KaspeakMessage>> {
    let mut instance = registry.create(header.message_type)?;
    instance.set_header(header.clone());

    let compressed: Vec<u8> = if instance.requires_encryption() {
        let key = key.ok_or(KaspeakError::EncryptionKeyMissing(header.message_type))?;
        if data.len() < NONCE_SIZE {
            return Ok(unknown(
                header,
                data,
                "Decryption failed: ciphertext shorter than nonce",
                UnknownMessage::CODE_MALFORMED_CIPHERTEXT,
            ));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
        let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
        match cipher.decrypt(XNonce::from_slice(nonce), ciphertext) {
            Ok(plain) if plain.is_empty() => {
                return Ok(unknown(
                    header,
                    data,
                    "Decryption failed: empty plaintext",
                    UnknownMessage::CODE_EMPTY_PLAINTEXT,
                ))
            }
            Ok(plain) => plain,
            Err(_) => {
                return Ok(unknown(
                    header,
                    data,
                    "Decryption failed: invalid key",
                    UnknownMessage::CODE_BAD_KEY,
                ))
            }
        }
    } else {
        data.to_vec()
    };

    let plain = match zstd::decode_all(compressed.as_slice()) {
        Ok(plain) => plain,
        Err(e) => {
            return Ok(unknown(
                header,
                data,
                format!("Decompression failed: {e}"),
                UnknownMessage::CODE_DECOMPRESSION,
            ))
        }
    };

    let object: Value = match ciborium::from_reader(plain.as_slice()) {
        Ok(object) => object,
        Err(e) => {
            return Ok(unknown(
                header,
                data,
                format!("CBOR decoding failed: {e}"),
                UnknownMessage::CODE_CBOR,
            ))
        }
    };

    if let Err(e) = instance.from_plain_object(object) {
        return Ok(unknown(
            header,
            data,
            format!("Hydration failed: {e}"),
            UnknownMessage::CODE_HYDRATION,
        ));
    }

    Ok(instance)
}

fn unknown(
    header: &MessageHeader,
    data: &[u8],
    desc: impl Into<String>,
    code: u8,
) -> Box<dyn KaspeakMessage> {
    Box::new(UnknownMessage::new(
        data.to_vec(),
        desc,
        code,
        header.clone(),
    ))
}
