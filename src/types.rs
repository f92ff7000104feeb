//! Type definitions and protocol constants for Kaspeak.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// Payload marker bytes, ASCII "KSPK".
pub const MARKER: [u8; 4] = [0x4b, 0x53, 0x50, 0x4b];

/// Payload marker as lowercase hex, for sniffing raw transaction payloads.
pub const MARKER_HEX: &str = "4b53504b";

/// Protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Size of the payload header in bytes.
pub const HEADER_SIZE: usize = 143;

/// Minimum hex-string length of a candidate payload (header only).
pub const MIN_PAYLOAD_HEX_LEN: usize = HEADER_SIZE * 2;

/// Size of the application prefix in bytes.
pub const PREFIX_SIZE: usize = 4;

/// Size of a compressed secp256k1 point in bytes.
pub const POINT_SIZE: usize = 33;

/// Size of an uncompressed secp256k1 point in bytes.
pub const UNCOMPRESSED_POINT_SIZE: usize = 65;

/// Size of a Schnorr or ECDSA signature in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// Size of the XChaCha20-Poly1305 nonce in bytes.
pub const NONCE_SIZE: usize = 24;

/// Size of a symmetric encryption key in bytes.
pub const KEY_SIZE: usize = 32;

/// Maximum size of the payload data field; the frame stores a u16 length.
pub const MAX_DATA_SIZE: usize = 65535;

/// Zstd compression level used by the message pipeline.
pub const ZSTD_LEVEL: i32 = 16;

/// Capacity of the ingestion dedup set.
pub const DEDUP_CAPACITY: usize = 5000;

/// Sompi per whole KAS.
pub const SOMPI_PER_KAS: u64 = 100_000_000;

/// Upper bound for the configurable priority fee, in KAS.
pub const MAX_PRIORITY_FEE_KAS: f64 = 100.0;

/// Default application prefix.
pub const DEFAULT_PREFIX: &str = "TEST";

/// Boxed future returned by workers and block handlers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors that can occur during Kaspeak operations.
#[derive(Error, Debug)]
pub enum KaspeakError {
    /// Private key material was malformed or reduced to zero.
    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// Public key or point encoding was malformed.
    #[error("Invalid point: {0}")]
    InvalidPoint(String),

    /// Scalar has no inverse modulo the group order.
    #[error("Scalar is not invertible")]
    NonInvertibleScalar,

    /// Identifier chain index must be at least 1.
    #[error("Invalid chain index: {0} (must be >= 1)")]
    InvalidChainIndex(u64),

    /// Payload frame violated a structural invariant.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Payload data exceeds what the frame can carry.
    #[error("Payload data too large: {0} bytes (max {MAX_DATA_SIZE})")]
    DataTooLarge(usize),

    /// Application prefix was not coercible to 4 ASCII bytes.
    #[error("Invalid prefix: {0}")]
    InvalidPrefix(String),

    /// Signing failed.
    #[error("Signing failed: {0}")]
    SigningError(String),

    /// An encrypted message type was encoded or decoded without a key.
    #[error("Encryption key missing for message type {0}")]
    EncryptionKeyMissing(u16),

    /// Message pipeline encoding failed.
    #[error("Encoding failed: {0}")]
    EncodingError(String),

    /// No constructor registered for the message type.
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u16),

    /// Priority fee out of range.
    #[error("Invalid fee: {0}")]
    InvalidFee(String),

    /// A transaction in a confirmed block carried no verbose data.
    #[error("Transaction missing verbose data: {0}")]
    MissingVerboseData(String),

    /// Hex string was malformed.
    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    /// Operation requires a connected session.
    #[error("Session is not connected")]
    NotConnected,

    /// Ledger collaborator failure.
    #[error("Ledger error: {0}")]
    LedgerError(String),
}

pub type Result<T> = std::result::Result<T, KaspeakError>;
