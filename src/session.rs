//! The session façade: the one object applications hold.
//!
//! A session owns the key material, registry, event bus, and dedup set,
//! wires the ingestion engine into the ledger's block subscription, and
//! exposes the outbound path from typed data to a submitted transaction.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use k256::elliptic_curve::Field;
use k256::Scalar;
use tokio::sync::{Mutex, RwLock};
use zeroize::Zeroize;

use crate::curve::{
    generator, point_to_compressed, scalar_from_bytes, scalar_mul, scalar_to_bytes, shared_secret,
};
use crate::dedup::BoundedDedupSet;
use crate::events::{EventBus, EventKind, KaspeakEvent, Listener, ListenerId};
use crate::identifier::Identifier;
use crate::ingest::IngestEngine;
use crate::ledger::{BlockAddedHandler, LedgerRpc, NetworkConfig, Transaction};
use crate::models::SessionIdentity;
use crate::payload::{outpoint_ids, Payload};
use crate::registry::{MessageRegistry, Worker};
use crate::types::{
    KaspeakError, Result, DEFAULT_PREFIX, HEADER_SIZE, MAX_PRIORITY_FEE_KAS, PREFIX_SIZE,
    SOMPI_PER_KAS,
};
use crate::utils::{from_hex, sha256, to_hex, u64_to_scalar_bytes};

/// Private key material in any of the accepted input forms.
pub enum PrivateKeySpec {
    /// A small integer, mainly for tests and fixtures.
    Int(u64),
    /// Big-endian 32-byte scalar.
    Bytes([u8; 32]),
    /// Hex-encoded 32-byte scalar.
    Hex(String),
}

impl From<u64> for PrivateKeySpec {
    fn from(value: u64) -> Self {
        PrivateKeySpec::Int(value)
    }
}

impl From<[u8; 32]> for PrivateKeySpec {
    fn from(value: [u8; 32]) -> Self {
        PrivateKeySpec::Bytes(value)
    }
}

impl From<&str> for PrivateKeySpec {
    fn from(value: &str) -> Self {
        PrivateKeySpec::Hex(value.to_string())
    }
}

impl From<String> for PrivateKeySpec {
    fn from(value: String) -> Self {
        PrivateKeySpec::Hex(value)
    }
}

fn normalize_private_key(spec: PrivateKeySpec) -> Result<Scalar> {
    let mut bytes: [u8; 32] = match spec {
        PrivateKeySpec::Int(value) => u64_to_scalar_bytes(value),
        PrivateKeySpec::Bytes(bytes) => bytes,
        PrivateKeySpec::Hex(hex_str) => {
            let decoded = from_hex(hex_str.trim())?;
            decoded.try_into().map_err(|decoded: Vec<u8>| {
                KaspeakError::InvalidPrivateKey(format!(
                    "expected 32 bytes, got {}",
                    decoded.len()
                ))
            })?
        }
    };
    let scalar = scalar_from_bytes(&bytes);
    bytes.zeroize();
    if bool::from(scalar.is_zero()) {
        return Err(KaspeakError::InvalidPrivateKey(
            "private key reduces to zero".to_string(),
        ));
    }
    Ok(scalar)
}

fn coerce_prefix(prefix: &str) -> Result<([u8; PREFIX_SIZE], String)> {
    if !prefix.is_ascii() {
        return Err(KaspeakError::InvalidPrefix(format!(
            "prefix must be ASCII: {prefix:?}"
        )));
    }
    let mut bytes = [0u8; PREFIX_SIZE];
    for (slot, byte) in bytes.iter_mut().zip(prefix.bytes()) {
        *slot = byte;
    }
    let coerced = match bytes.iter().position(|&b| b == 0) {
        Some(end) => String::from_utf8_lossy(&bytes[..end]).into_owned(),
        None => String::from_utf8_lossy(&bytes).into_owned(),
    };
    Ok((bytes, coerced))
}

/// Conversation material derived from a peer's public key.
#[derive(Clone)]
pub struct ConversationKeys {
    /// `SHA256(SHA256(ECDH(own_private, peer_public)))`.
    pub shared_secret: [u8; 32],
    /// `int(SHA256(shared_secret)) mod n`, driving the identifier chain.
    pub chain_key: Scalar,
}

/// Session settings taken at construction.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Application prefix; coerced to exactly 4 bytes.
    pub prefix: String,
    /// Default network to connect to.
    pub network: NetworkConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            network: NetworkConfig::default(),
        }
    }
}

/// A Kaspeak protocol session bound to one keypair and one prefix.
pub struct KaspeakSession<L: LedgerRpc + 'static> {
    ledger: Arc<L>,
    identity: Arc<SessionIdentity>,
    default_network: NetworkConfig,
    network_id: Arc<RwLock<String>>,
    address: RwLock<Option<String>>,
    registry: Arc<RwLock<MessageRegistry>>,
    events: EventBus,
    dedup: Arc<Mutex<BoundedDedupSet>>,
    balance_sompi: AtomicU64,
    utxo_count: AtomicUsize,
    priority_fee_sompi: AtomicU64,
    prefix_filter: Arc<AtomicBool>,
    verify_signatures: Arc<AtomicBool>,
    connected: AtomicBool,
}

impl<L: LedgerRpc + 'static> KaspeakSession<L> {
    /// Creates a session from private key material and a prefix.
    ///
    /// The key is normalised to a scalar in `[1, n-1]`; the prefix is
    /// padded with `0x00` to four bytes and truncated to four.
    pub fn create(
        ledger: L,
        private_key: impl Into<PrivateKeySpec>,
        config: SessionConfig,
    ) -> Result<Arc<Self>> {
        let private_key = normalize_private_key(private_key.into())?;
        let public_point = scalar_mul(&generator(), &private_key);
        let public_key = point_to_compressed(&public_point)?;
        let (prefix, prefix_string) = coerce_prefix(&config.prefix)?;

        let identity = Arc::new(SessionIdentity {
            private_key,
            public_key,
            public_key_hex: to_hex(&public_key),
            prefix,
            prefix_string,
        });

        Ok(Arc::new(Self {
            ledger: Arc::new(ledger),
            identity,
            network_id: Arc::new(RwLock::new(config.network.network_id.clone())),
            default_network: config.network,
            address: RwLock::new(None),
            registry: Arc::new(RwLock::new(MessageRegistry::new())),
            events: EventBus::new(),
            dedup: Arc::new(Mutex::new(BoundedDedupSet::with_default_capacity())),
            balance_sompi: AtomicU64::new(0),
            utxo_count: AtomicUsize::new(0),
            priority_fee_sompi: AtomicU64::new(0),
            prefix_filter: Arc::new(AtomicBool::new(true)),
            verify_signatures: Arc::new(AtomicBool::new(true)),
            connected: AtomicBool::new(false),
        }))
    }

    /// Connects to the ledger, subscribes the ingestion engine to the
    /// block stream, and loads the initial balance. Connecting twice is
    /// a warning no-op.
    pub async fn connect(
        self: &Arc<Self>,
        network_id: Option<&str>,
        url: Option<&str>,
    ) -> Result<()> {
        if self.connected.swap(true, Ordering::SeqCst) {
            tracing::warn!("session already connected, ignoring");
            return Ok(());
        }
        match self.establish(network_id, url).await {
            Ok(()) => Ok(()),
            Err(error) => {
                self.connected.store(false, Ordering::SeqCst);
                Err(error)
            }
        }
    }

    async fn establish(self: &Arc<Self>, network_id: Option<&str>, url: Option<&str>) -> Result<()> {
        let network = network_id
            .unwrap_or(&self.default_network.network_id)
            .to_string();
        let url = url.or(self.default_network.url.as_deref());

        self.ledger.connect(&network, url).await?;
        *self.network_id.write().await = network.clone();

        let address = self
            .ledger
            .address_from_public_key(&self.identity.public_key, &network)?;
        *self.address.write().await = Some(address);

        let engine = Arc::new(IngestEngine::new(
            self.ledger.clone(),
            self.identity.clone(),
            self.registry.clone(),
            self.events.clone(),
            self.dedup.clone(),
            self.network_id.clone(),
            self.prefix_filter.clone(),
            self.verify_signatures.clone(),
        ));
        let handler: BlockAddedHandler = Arc::new(move |notification| {
            let engine = engine.clone();
            Box::pin(async move { engine.handle_block(notification).await })
        });
        self.ledger.subscribe_block_added(handler).await?;

        self.refresh_balance().await?;
        self.events.emit(KaspeakEvent::Connected {
            network_id: network,
        });
        Ok(())
    }

    /// Disconnects from the ledger; a no-op when not connected.
    pub async fn disconnect(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.ledger.disconnect().await?;
        self.events.emit(KaspeakEvent::Disconnected);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(KaspeakError::NotConnected)
        }
    }

    /// The session's compressed public key.
    pub fn public_key(&self) -> &[u8; 33] {
        &self.identity.public_key
    }

    /// The session's public key as lowercase hex.
    pub fn public_key_hex(&self) -> &str {
        &self.identity.public_key_hex
    }

    /// The coerced application prefix.
    pub fn prefix(&self) -> &str {
        &self.identity.prefix_string
    }

    /// The raw 4-byte prefix.
    pub fn prefix_bytes(&self) -> &[u8; 4] {
        &self.identity.prefix
    }

    /// The session's ledger address; available once connected.
    pub async fn address(&self) -> Result<String> {
        self.address.read().await.clone().ok_or(KaspeakError::NotConnected)
    }

    /// Registers a message type and optional worker on the session
    /// registry, returning the type code.
    pub async fn register_message<M>(&self, worker: Option<Worker>) -> u16
    where
        M: crate::message::KaspeakMessage + Default + 'static,
    {
        self.registry.write().await.register::<M>(worker)
    }

    /// Subscribes to a session event.
    pub fn on(&self, kind: EventKind, listener: Listener) -> ListenerId {
        self.events.on(kind, listener)
    }

    /// Subscribes for a single delivery.
    pub fn once(&self, kind: EventKind, listener: Listener) -> ListenerId {
        self.events.once(kind, listener)
    }

    /// Removes an event subscription.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        self.events.off(kind, id)
    }

    /// When enabled (the default), foreign-prefix payloads are dropped
    /// before verification.
    pub fn set_prefix_filter(&self, enabled: bool) {
        self.prefix_filter.store(enabled, Ordering::Relaxed);
    }

    /// Disabling skips signature checks; structural frame invariants are
    /// still enforced.
    pub fn set_signature_verification(&self, enabled: bool) {
        self.verify_signatures.store(enabled, Ordering::Relaxed);
    }

    /// Sets the priority fee in whole KAS. Negative fees fail; fees over
    /// 100 KAS are clamped with a warning.
    pub fn set_priority_fee(&self, kas: f64) -> Result<()> {
        if !kas.is_finite() || kas < 0.0 {
            return Err(KaspeakError::InvalidFee(format!(
                "priority fee must be a non-negative number, got {kas}"
            )));
        }
        let clamped = if kas > MAX_PRIORITY_FEE_KAS {
            tracing::warn!(kas, "priority fee above {MAX_PRIORITY_FEE_KAS} KAS, clamping");
            MAX_PRIORITY_FEE_KAS
        } else {
            kas
        };
        let sompi = (clamped * SOMPI_PER_KAS as f64).round() as u64;
        self.priority_fee_sompi.store(sompi, Ordering::Relaxed);
        Ok(())
    }

    /// The configured priority fee in sompi.
    pub fn priority_fee_sompi(&self) -> u64 {
        self.priority_fee_sompi.load(Ordering::Relaxed)
    }

    /// Tracked balance in whole KAS.
    pub fn balance(&self) -> f64 {
        self.balance_sompi.load(Ordering::Relaxed) as f64 / SOMPI_PER_KAS as f64
    }

    /// Tracked balance in sompi.
    pub fn balance_sompi(&self) -> u64 {
        self.balance_sompi.load(Ordering::Relaxed)
    }

    /// Number of UTXOs backing the balance.
    pub fn utxo_count(&self) -> usize {
        self.utxo_count.load(Ordering::Relaxed)
    }

    /// Re-queries the ledger for the session's UTXOs, emitting a
    /// balance-changed event when the total moved.
    pub async fn refresh_balance(&self) -> Result<()> {
        let address = self.address().await?;
        let snapshot = self.ledger.get_utxos_by_addresses(&[address]).await?;
        let total: u64 = snapshot.entries.iter().map(|entry| entry.amount).sum();
        let count = snapshot.entries.len();

        let previous = self.balance_sompi.swap(total, Ordering::Relaxed);
        self.utxo_count.store(count, Ordering::Relaxed);
        if previous != total {
            self.events.emit(KaspeakEvent::BalanceChanged {
                balance_sompi: total,
                utxo_count: count,
            });
        }
        Ok(())
    }

    /// Builds and signs a payload frame for this session, returning its
    /// hex encoding ready for [`KaspeakSession::send_transaction`].
    pub fn create_payload(
        &self,
        outpoint_ids: &str,
        message_type: u16,
        identifier: &Identifier,
        data: &[u8],
    ) -> Result<String> {
        let mut payload = Payload::new(
            self.identity.prefix,
            message_type,
            identifier.to_bytes(),
            self.identity.public_key,
            data.to_vec(),
        )?;
        payload.sign(outpoint_ids, &self.identity.private_key)?;
        Ok(payload.to_hex())
    }

    /// Asks the ledger for a self-transfer able to carry `data_length`
    /// bytes of message data plus the frame header.
    pub async fn create_transaction(&self, data_length: usize) -> Result<Transaction> {
        self.ensure_connected()?;
        let address = self.address().await?;
        self.ledger
            .build_self_transfer(
                &address,
                data_length + HEADER_SIZE,
                self.priority_fee_sompi(),
            )
            .await
    }

    /// Attaches the payload, signs, and submits the transaction,
    /// refreshing the balance afterwards. Returns the transaction id.
    pub async fn send_transaction(
        &self,
        mut transaction: Transaction,
        payload_hex: &str,
    ) -> Result<String> {
        self.ensure_connected()?;
        transaction.payload = payload_hex.to_string();

        let mut key_bytes = scalar_to_bytes(&self.identity.private_key);
        let signed = self.ledger.sign_transaction(transaction, &key_bytes).await;
        key_bytes.zeroize();
        let signed = signed?;

        let response = self.ledger.submit_transaction(&signed).await?;
        self.refresh_balance().await?;
        Ok(response.transaction_id)
    }

    /// Derives the conversation secret and chain key shared with the
    /// holder of `public_key`.
    pub fn derive_conversation_keys(&self, public_key: &[u8]) -> Result<ConversationKeys> {
        let point = crate::curve::point_from_bytes(public_key)?;
        let secret = shared_secret(&self.identity.private_key, &point)?;
        Ok(ConversationKeys {
            shared_secret: secret,
            chain_key: scalar_from_bytes(&sha256(&secret)),
        })
    }

    /// Outpoint ids of a transaction, the signature domain separator.
    pub fn outpoint_ids(&self, transaction: &Transaction) -> String {
        outpoint_ids(&transaction.inputs)
    }
}
