//! On-ledger payload framing for the Kaspeak protocol.

use k256::Scalar;

use crate::ledger::TransactionInput;
use crate::signer::{schnorr_sign, schnorr_verify};
use crate::types::{
    KaspeakError, Result, HEADER_SIZE, MARKER, MARKER_HEX, MAX_DATA_SIZE, MIN_PAYLOAD_HEX_LEN,
    PROTOCOL_VERSION, SIGNATURE_SIZE,
};
use crate::utils::{from_hex, to_hex};

/// A Kaspeak record carried in a transaction's payload field.
///
/// Wire format (143-byte header + data):
/// - `[0-3]`     marker `KSPK`
/// - `[4]`       version (0x01)
/// - `[5-8]`     application prefix (4 bytes, `0x00`-padded)
/// - `[9-10]`    message type (u16, little-endian)
/// - `[11-43]`   identifier (33-byte compressed point)
/// - `[44-76]`   signer public key (33-byte compressed point)
/// - `[77-140]`  Schnorr signature (64 bytes)
/// - `[141-142]` data length (u16, little-endian)
/// - `[143+]`    data (variable)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    prefix: [u8; 4],
    message_type: u16,
    id: [u8; 33],
    public_key: [u8; 33],
    signature: [u8; 64],
    data: Vec<u8>,
}

impl Payload {
    /// Builds an unsigned payload; the signature starts zeroed and is set
    /// by [`Payload::sign`].
    pub fn new(
        prefix: [u8; 4],
        message_type: u16,
        id: [u8; 33],
        public_key: [u8; 33],
        data: Vec<u8>,
    ) -> Result<Self> {
        if data.len() > MAX_DATA_SIZE {
            return Err(KaspeakError::DataTooLarge(data.len()));
        }
        if !matches!(id[0], 0x02 | 0x03) {
            return Err(KaspeakError::InvalidPayload(format!(
                "identifier is not a compressed point (prefix 0x{:02x})",
                id[0]
            )));
        }
        if !matches!(public_key[0], 0x02 | 0x03) {
            return Err(KaspeakError::InvalidPayload(format!(
                "public key is not a compressed point (prefix 0x{:02x})",
                public_key[0]
            )));
        }
        Ok(Self {
            prefix,
            message_type,
            id,
            public_key,
            signature: [0u8; 64],
            data,
        })
    }

    pub fn prefix(&self) -> &[u8; 4] {
        &self.prefix
    }

    /// The prefix with trailing `0x00` padding removed, decoded as text.
    pub fn prefix_string(&self) -> String {
        let trimmed: &[u8] = match self.prefix.iter().position(|&b| b == 0) {
            Some(end) => &self.prefix[..end],
            None => &self.prefix,
        };
        String::from_utf8_lossy(trimmed).into_owned()
    }

    pub fn message_type(&self) -> u16 {
        self.message_type
    }

    pub fn id(&self) -> &[u8; 33] {
        &self.id
    }

    pub fn public_key(&self) -> &[u8; 33] {
        &self.public_key
    }

    pub fn signature(&self) -> &[u8; 64] {
        &self.signature
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Serialises the frame.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + self.data.len());
        bytes.extend_from_slice(&MARKER);
        bytes.push(PROTOCOL_VERSION);
        bytes.extend_from_slice(&self.prefix);
        bytes.extend_from_slice(&self.message_type.to_le_bytes());
        bytes.extend_from_slice(&self.id);
        bytes.extend_from_slice(&self.public_key);
        bytes.extend_from_slice(&self.signature);
        bytes.extend_from_slice(&(self.data.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&self.data);
        bytes
    }

    /// Lowercase hex of the serialised frame.
    pub fn to_hex(&self) -> String {
        to_hex(&self.to_bytes())
    }

    /// Parses a frame, reporting the first violated invariant.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(KaspeakError::InvalidPayload(format!(
                "too short: {} bytes (minimum {HEADER_SIZE})",
                bytes.len()
            )));
        }
        if bytes[0..4] != MARKER {
            return Err(KaspeakError::InvalidPayload(format!(
                "marker mismatch: {}",
                to_hex(&bytes[0..4])
            )));
        }
        if bytes[4] != PROTOCOL_VERSION {
            return Err(KaspeakError::InvalidPayload(format!(
                "unsupported version: {}",
                bytes[4]
            )));
        }

        let mut prefix = [0u8; 4];
        prefix.copy_from_slice(&bytes[5..9]);

        let message_type = u16::from_le_bytes([bytes[9], bytes[10]]);

        let mut id = [0u8; 33];
        id.copy_from_slice(&bytes[11..44]);
        if !matches!(id[0], 0x02 | 0x03) {
            return Err(KaspeakError::InvalidPayload(format!(
                "identifier is not a compressed point (prefix 0x{:02x})",
                id[0]
            )));
        }

        let mut public_key = [0u8; 33];
        public_key.copy_from_slice(&bytes[44..77]);
        if !matches!(public_key[0], 0x02 | 0x03) {
            return Err(KaspeakError::InvalidPayload(format!(
                "public key is not a compressed point (prefix 0x{:02x})",
                public_key[0]
            )));
        }

        let mut signature = [0u8; 64];
        signature.copy_from_slice(&bytes[77..141]);

        let data_len = u16::from_le_bytes([bytes[141], bytes[142]]) as usize;
        let data = bytes[HEADER_SIZE..].to_vec();
        if data.len() != data_len {
            return Err(KaspeakError::InvalidPayload(format!(
                "data length mismatch: header says {data_len}, got {}",
                data.len()
            )));
        }

        Ok(Self {
            prefix,
            message_type,
            id,
            public_key,
            signature,
            data,
        })
    }

    /// Parses a frame from its hex encoding.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        Self::from_bytes(&from_hex(hex_str)?)
    }

    /// The canonical preimage: lowercase hex of every field except the
    /// signature and data length, in wire order, followed by the
    /// outpoint-ids hex string. No length delimiters are inserted.
    pub fn preimage(&self, outpoint_ids: &str) -> String {
        let mut bytes = Vec::with_capacity(HEADER_SIZE - SIGNATURE_SIZE - 2 + self.data.len());
        bytes.extend_from_slice(&MARKER);
        bytes.push(PROTOCOL_VERSION);
        bytes.extend_from_slice(&self.prefix);
        bytes.extend_from_slice(&self.message_type.to_le_bytes());
        bytes.extend_from_slice(&self.id);
        bytes.extend_from_slice(&self.public_key);
        bytes.extend_from_slice(&self.data);

        let mut preimage = to_hex(&bytes);
        preimage.push_str(outpoint_ids);
        preimage
    }

    /// Signs the canonical preimage, storing the 64-byte Schnorr
    /// signature in the frame.
    pub fn sign(&mut self, outpoint_ids: &str, private_key: &Scalar) -> Result<()> {
        let preimage = self.preimage(outpoint_ids);
        self.signature = schnorr_sign(preimage.as_bytes(), private_key)?;
        Ok(())
    }

    /// Recomputes the preimage and checks the stored signature against
    /// the embedded public key.
    pub fn verify(&self, outpoint_ids: &str) -> bool {
        let preimage = self.preimage(outpoint_ids);
        schnorr_verify(&self.signature, preimage.as_bytes(), &self.public_key)
    }
}

/// Whether a raw transaction payload hex string can be a Kaspeak frame:
/// even length, at least a full header, marker first.
pub fn is_kaspeak_payload(payload_hex: &str) -> bool {
    let bytes = payload_hex.as_bytes();
    bytes.len() % 2 == 0
        && bytes.len() >= MIN_PAYLOAD_HEX_LEN
        && bytes[..MARKER_HEX.len()].eq_ignore_ascii_case(MARKER_HEX.as_bytes())
}

/// Lowercase hex concatenation of every input's previous-outpoint
/// transaction id, ordered by ascending outpoint index (stable on ties).
/// This string ties a payload signature to its carrying transaction.
pub fn outpoint_ids(inputs: &[TransactionInput]) -> String {
    let mut ordered: Vec<&TransactionInput> = inputs.iter().collect();
    ordered.sort_by_key(|input| input.previous_outpoint.index);
    ordered
        .iter()
        .map(|input| input.previous_outpoint.transaction_id.to_lowercase())
        .collect()
}
