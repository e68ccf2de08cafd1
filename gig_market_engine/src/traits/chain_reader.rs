use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db_types::ContractAddress;

/// One raw transaction as returned by the ledger gateway. Only the inbound message is relevant to this system;
/// the rest of the on-chain transaction envelope is dropped at the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransaction {
    /// The transaction hash, hex-encoded. Combined with the contract address this forms the idempotency key.
    pub hash: String,
    /// Monotonically increasing logical time assigned by the ledger. Cursor positions are logical times.
    pub logical_time: u64,
    pub timestamp: DateTime<Utc>,
    pub in_msg: InboundMessage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Fixed-width operation code, the first field of every contract message body
    pub op_code: u32,
    /// The message body after the op code, encoded per the contract's field schema
    #[serde(with = "body_hex")]
    pub body: Vec<u8>,
}

mod body_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], s: S) -> Result<S::Ok, S::Error> {
        let hex = body.iter().map(|b| format!("{b:02x}")).collect::<String>();
        s.serialize_str(&hex)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let hex = String::deserialize(d)?;
        if hex.len() % 2 != 0 {
            return Err(serde::de::Error::custom("hex body has odd length"));
        }
        (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(serde::de::Error::custom))
            .collect()
    }
}

/// The ledger read boundary.
///
/// Implementations fetch a bounded window of transactions addressed to a contract. This is a pure I/O seam:
/// no decoding, no store access.
#[allow(async_fn_in_trait)]
pub trait ChainReader: Clone {
    /// Returns up to `limit` transactions for `contract`, strictly after the logical time `after` (all of them
    /// when `after` is `None`), in ascending logical-time order.
    async fn fetch_transactions(
        &self,
        contract: &ContractAddress,
        after: Option<u64>,
        limit: usize,
    ) -> Result<Vec<RawTransaction>, ChainReaderError>;
}

#[derive(Debug, Clone, Error)]
pub enum ChainReaderError {
    /// Network trouble or a timeout. The contract is simply retried on the next tick.
    #[error("Transient fetch error: {0}")]
    Transient(String),
    /// The contract address cannot be resolved at all. Retrying won't help until the configuration is fixed.
    #[error("Fatal configuration error: {0}")]
    FatalConfig(String),
}

impl ChainReaderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChainReaderError::Transient(_))
    }
}
