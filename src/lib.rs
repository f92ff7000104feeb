//! Kaspeak - typed, authenticated messaging inside Kaspa transaction
//! payloads.
//!
//! Kaspeak piggy-backs application messages on ordinary value transfers
//! of a Kaspa-like blockDAG. Each message rides in the opaque payload
//! field of a transaction as a fixed 143-byte header plus data, signed
//! with Schnorr over a preimage that binds the payload to its carrying
//! transaction. Conversations are labelled by chain-traversable curve
//! points, unlinkable without the shared chain key.
//!
//! The crate is the protocol core only: payload framing, the secp256k1
//! layer, identifier algebra, the CBOR + Zstd + XChaCha20-Poly1305
//! message pipeline, block ingestion, and the session façade. Talking to
//! an actual node happens through the [`ledger::LedgerRpc`] collaborator
//! trait.

pub mod curve;
pub mod dedup;
pub mod events;
pub mod identifier;
mod ingest;
pub mod ledger;
pub mod message;
pub mod models;
pub mod payload;
pub mod pipeline;
pub mod registry;
pub mod session;
pub mod signer;
pub mod types;
pub mod utils;

pub use dedup::BoundedDedupSet;
pub use events::{EventBus, EventKind, KaspeakEvent, Listener, ListenerId};
pub use identifier::{Identifier, SecretIdentifier};
pub use ledger::{LedgerRpc, NetworkConfig, Transaction};
pub use message::{KaspeakMessage, UnknownMessage};
pub use models::{BlockMeta, MessageHeader, Peer};
pub use payload::{is_kaspeak_payload, outpoint_ids, Payload};
pub use registry::{MessageRegistry, Worker};
pub use session::{ConversationKeys, KaspeakSession, PrivateKeySpec, SessionConfig};
pub use types::{KaspeakError, Result};

use tracing_subscriber::EnvFilter;

/// Initialises the global tracing subscriber, reading the threshold from
/// `KASPEAK_LOG_LEVEL` (default `warn`). Safe to call more than once;
/// later calls are no-ops.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("KASPEAK_LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
