//! The typed-message trait and the decode-failure fallback value.

use std::any::Any;

use ciborium::value::Value;

use crate::models::MessageHeader;
use crate::types::{KaspeakError, Result};

/// A typed message travelling inside Kaspeak payloads.
///
/// Each concrete type fixes its wire type code and whether the pipeline
/// encrypts it; both must be stable across a deployment. The plain-object
/// form is a CBOR [`Value`] and is what actually crosses the wire.
pub trait KaspeakMessage: Send {
    /// Wire type code, unique within a deployment.
    fn message_type(&self) -> u16;

    /// Whether the pipeline must encrypt this message.
    fn requires_encryption(&self) -> bool;

    /// The ingestion header, present on decoded messages.
    fn header(&self) -> Option<&MessageHeader>;

    /// Attaches the ingestion header.
    fn set_header(&mut self, header: MessageHeader);

    /// Projects the message into a CBOR-encodable value.
    fn to_plain_object(&self) -> Result<Value>;

    /// Hydrates the message's fields from a decoded value.
    fn from_plain_object(&mut self, object: Value) -> Result<()>;

    /// Downcast support for consumers of boxed messages.
    fn as_any(&self) -> &dyn Any;
}

/// Produced by the pipeline whenever decoding fails; carries the raw
/// data and a stable code identifying the failing stage.
#[derive(Debug, Clone)]
pub struct UnknownMessage {
    raw_data: Vec<u8>,
    error_desc: String,
    code: u8,
    message_type: u16,
    header: Option<MessageHeader>,
}

impl UnknownMessage {
    /// AEAD open rejected the ciphertext (wrong key or tampered data).
    pub const CODE_BAD_KEY: u8 = 0;
    /// AEAD open produced an empty plaintext.
    pub const CODE_EMPTY_PLAINTEXT: u8 = 1;
    /// Ciphertext was structurally unusable (e.g. shorter than a nonce).
    pub const CODE_MALFORMED_CIPHERTEXT: u8 = 2;
    /// Zstd decompression failed.
    pub const CODE_DECOMPRESSION: u8 = 3;
    /// CBOR decoding failed.
    pub const CODE_CBOR: u8 = 4;
    /// The concrete type rejected the decoded value.
    pub const CODE_HYDRATION: u8 = 5;

    pub fn new(
        raw_data: Vec<u8>,
        error_desc: impl Into<String>,
        code: u8,
        header: MessageHeader,
    ) -> Self {
        Self {
            raw_data,
            error_desc: error_desc.into(),
            code,
            message_type: header.message_type,
            header: Some(header),
        }
    }

    /// The undecodable bytes, exactly as they appeared in the payload.
    pub fn raw_data(&self) -> &[u8] {
        &self.raw_data
    }

    /// Human-readable description of the failure.
    pub fn error_desc(&self) -> &str {
        &self.error_desc
    }

    /// Stable code for the pipeline stage that failed (0..=5).
    pub fn code(&self) -> u8 {
        self.code
    }
}

impl KaspeakMessage for UnknownMessage {
    fn message_type(&self) -> u16 {
        self.message_type
    }

    fn requires_encryption(&self) -> bool {
        false
    }

    fn header(&self) -> Option<&MessageHeader> {
        self.header.as_ref()
    }

    fn set_header(&mut self, header: MessageHeader) {
        self.message_type = header.message_type;
        self.header = Some(header);
    }

    fn to_plain_object(&self) -> Result<Value> {
        Err(KaspeakError::EncodingError(
            "an undecodable message cannot be re-encoded".to_string(),
        ))
    }

    fn from_plain_object(&mut self, _object: Value) -> Result<()> {
        Err(KaspeakError::EncodingError(
            "an undecodable message cannot be hydrated".to_string(),
        ))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
