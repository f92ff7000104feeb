//! Ledger collaborator interfaces.
//!
//! The protocol core never talks to a node directly; it consumes the
//! capabilities below through [`LedgerRpc`]. Implementations can wrap
//! any Kaspa-compatible RPC stack. Only the fields the core reads are
//! modelled on the wire types.

use std::sync::Arc;

use crate::types::{BoxFuture, Result};

/// Network connection settings.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Network identifier, e.g. `mainnet` or `testnet-10`.
    pub network_id: String,
    /// Node URL override; `None` lets the implementation resolve one.
    pub url: Option<String>,
}

impl NetworkConfig {
    pub fn new(network_id: impl Into<String>) -> Self {
        Self {
            network_id: network_id.into(),
            url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Creates configuration for the main network.
    pub fn mainnet() -> Self {
        Self::new("mainnet")
    }

    /// Creates configuration for the current test network.
    pub fn testnet() -> Self {
        Self::new("testnet-10")
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::testnet()
    }
}

/// Reference to the output a transaction input spends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOutpoint {
    /// Funding transaction id, hex.
    pub transaction_id: String,
    /// Output index within the funding transaction.
    pub index: u32,
}

/// A transaction input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInput {
    pub previous_outpoint: TransactionOutpoint,
}

/// Node-attached metadata, present on transactions in confirmed blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionVerboseData {
    /// The transaction's own id, hex.
    pub transaction_id: String,
}

/// A ledger transaction, reduced to what ingestion and sending consume.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub inputs: Vec<TransactionInput>,
    /// Opaque payload field, hex.
    pub payload: String,
    pub verbose_data: Option<TransactionVerboseData>,
}

/// Header of a confirmed block.
#[derive(Debug, Clone)]
pub struct BlockHeader {
    /// Block hash, hex.
    pub hash: String,
    /// Block timestamp, milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Difficulty-adjustment score.
    pub daa_score: u64,
}

/// A confirmed block with its transactions in consensus order.
#[derive(Debug, Clone)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

/// Delivered for every block accepted by the node.
#[derive(Debug, Clone)]
pub struct BlockAdded {
    pub block: Block,
}

/// A spendable output owned by an address.
#[derive(Debug, Clone)]
pub struct UtxoEntry {
    /// Value in sompi.
    pub amount: u64,
}

/// UTXO query result.
#[derive(Debug, Clone, Default)]
pub struct UtxoSnapshot {
    pub entries: Vec<UtxoEntry>,
}

/// Result of submitting a transaction.
#[derive(Debug, Clone)]
pub struct SubmitResponse {
    pub transaction_id: String,
}

/// Receives block-added notifications; awaited per block so delivery
/// order is processing order.
pub type BlockAddedHandler = Arc<dyn Fn(BlockAdded) -> BoxFuture<'static, ()> + Send + Sync>;

/// The ledger capabilities the protocol core requires.
#[async_trait::async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Connects to a node on the given network.
    async fn connect(&self, network_id: &str, url: Option<&str>) -> Result<()>;

    /// Disconnects and releases node resources.
    async fn disconnect(&self) -> Result<()>;

    /// Subscribes to confirmed-block notifications. A later subscription
    /// replaces the previous handler.
    async fn subscribe_block_added(&self, handler: BlockAddedHandler) -> Result<()>;

    /// Spendable outputs for the given addresses.
    async fn get_utxos_by_addresses(&self, addresses: &[String]) -> Result<UtxoSnapshot>;

    /// Builds an unsigned self-transfer able to carry a payload of
    /// `payload_size` bytes, funded from `address`'s current UTXOs with
    /// the given priority fee.
    async fn build_self_transfer(
        &self,
        address: &str,
        payload_size: usize,
        priority_fee_sompi: u64,
    ) -> Result<Transaction>;

    /// Signs a transaction with the given 32-byte private key.
    async fn sign_transaction(
        &self,
        transaction: Transaction,
        private_key: &[u8; 32],
    ) -> Result<Transaction>;

    /// Submits a signed transaction.
    async fn submit_transaction(&self, transaction: &Transaction) -> Result<SubmitResponse>;

    /// Renders the address of a compressed public key on a network.
    fn address_from_public_key(&self, public_key: &[u8; 33], network_id: &str) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_config_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.network_id, "testnet-10");
        assert!(config.url.is_none());

        let mainnet = NetworkConfig::mainnet().with_url("grpc://localhost:16110");
        assert_eq!(mainnet.network_id, "mainnet");
        assert_eq!(mainnet.url.as_deref(), Some("grpc://localhost:16110"));
    }
}
