//! Block ingestion: turns confirmed blocks into message events.
//!
//! One engine instance is wired to the ledger's block subscription by
//! the session façade. Processing is per transaction and exception-safe:
//! a malformed or unverifiable payload is logged and skipped, never
//! aborting the rest of the block.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::dedup::BoundedDedupSet;
use crate::events::{EventBus, KaspeakEvent};
use crate::identifier::Identifier;
use crate::ledger::{BlockAdded, LedgerRpc, Transaction};
use crate::models::{BlockMeta, MessageHeader, Peer, SessionIdentity};
use crate::payload::{is_kaspeak_payload, outpoint_ids, Payload};
use crate::registry::MessageRegistry;
use crate::types::{KaspeakError, Result};
use crate::utils::from_hex;

pub(crate) struct IngestEngine<L: LedgerRpc> {
    ledger: Arc<L>,
    identity: Arc<SessionIdentity>,
    registry: Arc<RwLock<MessageRegistry>>,
    events: EventBus,
    dedup: Arc<Mutex<BoundedDedupSet>>,
    network_id: Arc<RwLock<String>>,
    prefix_filter: Arc<AtomicBool>,
    verify_signatures: Arc<AtomicBool>,
}

impl<L: LedgerRpc> IngestEngine<L> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        ledger: Arc<L>,
        identity: Arc<SessionIdentity>,
        registry: Arc<RwLock<MessageRegistry>>,
        events: EventBus,
        dedup: Arc<Mutex<BoundedDedupSet>>,
        network_id: Arc<RwLock<String>>,
        prefix_filter: Arc<AtomicBool>,
        verify_signatures: Arc<AtomicBool>,
    ) -> Self {
        Self {
            ledger,
            identity,
            registry,
            events,
            dedup,
            network_id,
            prefix_filter,
            verify_signatures,
        }
    }

    /// Processes one confirmed block, transaction by transaction in
    /// block order.
    pub(crate) async fn handle_block(&self, notification: BlockAdded) {
        let block = notification.block;
        let meta = BlockMeta {
            hash: block.header.hash.clone(),
            timestamp: block.header.timestamp,
            daa_score: block.header.daa_score,
        };
        for transaction in &block.transactions {
            if let Err(error) = self.process_transaction(transaction, &meta).await {
                tracing::error!(block = %meta.hash, %error, "skipping transaction");
            }
        }
    }

    async fn process_transaction(&self, tx: &Transaction, block: &BlockMeta) -> Result<()> {
        if !is_kaspeak_payload(&tx.payload) {
            return Ok(());
        }

        let verbose = tx.verbose_data.as_ref().ok_or_else(|| {
            KaspeakError::MissingVerboseData(format!(
                "block {} transaction with {} input(s)",
                block.hash,
                tx.inputs.len()
            ))
        })?;
        let txid = verbose.transaction_id.clone();

        {
            let mut dedup = self.dedup.lock().await;
            if !dedup.try_add(txid.clone()) {
                tracing::debug!(%txid, "already processed");
                return Ok(());
            }
        }

        let payload = Payload::from_bytes(&from_hex(&tx.payload)?)?;
        let prefix = payload.prefix_string();
        let own_prefix = prefix == self.identity.prefix_string;

        if self.prefix_filter.load(Ordering::Relaxed) && !own_prefix {
            tracing::debug!(%txid, %prefix, "foreign prefix");
            return Ok(());
        }

        let consensus_hash = outpoint_ids(&tx.inputs);
        if self.verify_signatures.load(Ordering::Relaxed) && !payload.verify(&consensus_hash) {
            tracing::warn!(%txid, "signature verification failed");
            return Ok(());
        }

        let network_id = self.network_id.read().await.clone();
        let address = self
            .ledger
            .address_from_public_key(payload.public_key(), &network_id)?;
        let is_own = payload.public_key() == &self.identity.public_key;
        let peer = Peer::new(
            address,
            *payload.public_key(),
            *payload.signature(),
            is_own,
            Some(self.identity.private_key),
        );

        let header = MessageHeader {
            txid,
            peer,
            prefix,
            message_type: payload.message_type(),
            identifier: Identifier::from_bytes(payload.id())?,
            block: block.clone(),
            consensus_hash,
        };

        self.events.emit(KaspeakEvent::MessageReceived {
            header: header.clone(),
            data: payload.data().to_vec(),
        });

        if own_prefix {
            let worker = self.registry.read().await.worker(payload.message_type());
            if let Some(worker) = worker {
                let data = payload.data().to_vec();
                let message_type = payload.message_type();
                let handle = tokio::spawn(worker(header, data));
                tokio::spawn(async move {
                    if let Err(join_error) = handle.await {
                        if join_error.is_panic() {
                            tracing::warn!(message_type, "message worker panicked");
                        }
                    }
                });
            }
        }

        Ok(())
    }
}
