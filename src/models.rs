//! Data models shared between ingestion and the session façade.

use std::sync::OnceLock;

use k256::Scalar;

use crate::curve::{point_from_bytes, scalar_from_bytes, shared_secret};
use crate::identifier::Identifier;
use crate::types::{KaspeakError, Result};
use crate::utils::sha256;

/// Consensus metadata of the block that carried a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMeta {
    /// Block hash, hex.
    pub hash: String,
    /// Block timestamp, milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Difficulty-adjustment score of the block.
    pub daa_score: u64,
}

/// The sender of an inbound payload, with lazily derived conversation
/// material. Lives only as long as its containing [`MessageHeader`].
#[derive(Clone)]
pub struct Peer {
    address: String,
    public_key: [u8; 33],
    signature: [u8; 64],
    is_own: bool,
    private_key: Option<Scalar>,
    shared_secret: OnceLock<[u8; 32]>,
    chain_key: OnceLock<Scalar>,
}

impl Peer {
    /// `private_key` is the session's own key, attached so conversation
    /// material can be derived on demand.
    pub fn new(
        address: impl Into<String>,
        public_key: [u8; 33],
        signature: [u8; 64],
        is_own: bool,
        private_key: Option<Scalar>,
    ) -> Self {
        Self {
            address: address.into(),
            public_key,
            signature,
            is_own,
            private_key,
            shared_secret: OnceLock::new(),
            chain_key: OnceLock::new(),
        }
    }

    /// The sender's ledger address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The sender's compressed public key.
    pub fn public_key(&self) -> &[u8; 33] {
        &self.public_key
    }

    /// The payload signature the sender produced.
    pub fn signature(&self) -> &[u8; 64] {
        &self.signature
    }

    /// Whether the payload was authored by this session.
    pub fn is_own(&self) -> bool {
        self.is_own
    }

    /// `SHA256(SHA256(ECDH(own_private, peer_public)))`, computed at most
    /// once and cached.
    pub fn shared_secret(&self) -> Result<[u8; 32]> {
        if let Some(secret) = self.shared_secret.get() {
            return Ok(*secret);
        }
        let private_key = self.private_key.ok_or_else(|| {
            KaspeakError::InvalidPrivateKey("peer carries no key for derivation".to_string())
        })?;
        let point = point_from_bytes(&self.public_key)?;
        let secret = shared_secret(&private_key, &point)?;
        Ok(*self.shared_secret.get_or_init(|| secret))
    }

    /// `int(SHA256(shared_secret)) mod n`, computed at most once and
    /// cached. Drives the identifier chain for this conversation.
    pub fn chain_key(&self) -> Result<Scalar> {
        if let Some(key) = self.chain_key.get() {
            return Ok(*key);
        }
        let secret = self.shared_secret()?;
        let key = scalar_from_bytes(&sha256(&secret));
        Ok(*self.chain_key.get_or_init(|| key))
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("address", &self.address)
            .field("public_key", &crate::utils::to_hex(&self.public_key))
            .field("is_own", &self.is_own)
            .finish_non_exhaustive()
    }
}

/// Everything ingestion knows about a payload, frozen at build time.
#[derive(Debug, Clone)]
pub struct MessageHeader {
    /// Carrying transaction id.
    pub txid: String,
    /// Sender descriptor.
    pub peer: Peer,
    /// Application prefix, trailing padding removed.
    pub prefix: String,
    /// Wire type code.
    pub message_type: u16,
    /// The payload's identifier point.
    pub identifier: Identifier,
    /// Carrying block metadata.
    pub block: BlockMeta,
    /// Outpoint ids of the carrying transaction.
    pub consensus_hash: String,
}

/// The session's own key material and application tag, shared between
/// the façade and the ingestion engine.
pub(crate) struct SessionIdentity {
    pub(crate) private_key: Scalar,
    pub(crate) public_key: [u8; 33],
    pub(crate) public_key_hex: String,
    pub(crate) prefix: [u8; 4],
    pub(crate) prefix_string: String,
}

impl std::fmt::Debug for SessionIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionIdentity")
            .field("public_key", &self.public_key_hex)
            .field("prefix", &self.prefix_string)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) fn test_header(message_type: u16) -> MessageHeader {
    use crate::curve::{generator, point_to_compressed, scalar_mul};

    let six = Scalar::from(6u64);
    let public_key = point_to_compressed(&scalar_mul(&generator(), &six)).unwrap();
    MessageHeader {
        txid: "00".repeat(32),
        peer: Peer::new("kaspatest:qtest", public_key, [0u8; 64], true, Some(six)),
        prefix: "TEST".to_string(),
        message_type,
        identifier: Identifier::from_point(generator()).unwrap(),
        block: BlockMeta {
            hash: "11".repeat(32),
            timestamp: 1_700_000_000_000,
            daa_score: 42,
        },
        consensus_hash: "aa".repeat(64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::{generator, point_to_compressed, scalar_mul};

    #[test]
    fn test_peer_derivations_cached_and_consistent() {
        let six = Scalar::from(6u64);
        let peer_public =
            point_to_compressed(&scalar_mul(&generator(), &Scalar::from(1337u64))).unwrap();
        let peer = Peer::new("kaspatest:qpeer", peer_public, [0u8; 64], false, Some(six));

        let first = peer.shared_secret().unwrap();
        let second = peer.shared_secret().unwrap();
        assert_eq!(first, second);

        // chain_key = int(SHA256(shared_secret)) mod n.
        let expected = scalar_from_bytes(&sha256(&first));
        assert_eq!(peer.chain_key().unwrap(), expected);
    }

    #[test]
    fn test_peer_without_key_cannot_derive() {
        let peer_public =
            point_to_compressed(&scalar_mul(&generator(), &Scalar::from(1337u64))).unwrap();
        let peer = Peer::new("kaspatest:qpeer", peer_public, [0u8; 64], false, None);
        assert!(peer.shared_secret().is_err());
        assert!(peer.chain_key().is_err());
    }

    #[test]
    fn test_peer_debug_redacts_private_key() {
        let six = Scalar::from(6u64);
        let peer_public = point_to_compressed(&scalar_mul(&generator(), &six)).unwrap();
        let peer = Peer::new("kaspatest:qpeer", peer_public, [0u8; 64], true, Some(six));
        let rendered = format!("{peer:?}");
        assert!(!rendered.contains("private"));
        assert!(rendered.contains("kaspatest:qpeer"));
    }
}
