//! Type definitions for chain data consumed by the decode pipeline.
//!
//! These are already-structured views of blocks, receipts and logs; the wire
//! format of the node is handled by [`crate::chain`].

use alloy::primitives::{Address, Bytes, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A block with its transactions, each carrying its receipt when available.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Block number.
    pub number: u64,
    /// Block hash.
    pub hash: B256,
    /// Parent block hash.
    pub parent_hash: B256,
    /// Timestamp in unix seconds.
    pub timestamp: u64,
    /// Transactions in block order.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Block timestamp as a UTC datetime, `None` if out of range.
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::try_from(self.timestamp).ok()?, 0)
    }

    /// Iterates every receipt log in the block, in transaction then log order.
    pub fn logs(&self) -> impl Iterator<Item = &Log> {
        self.transactions.iter().flat_map(|tx| tx.logs().iter())
    }
}

/// Transaction included in a block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction hash.
    pub hash: B256,
    /// Transaction index in block.
    pub index: u64,
    /// Sender address.
    pub from: Address,
    /// Recipient address (`None` for contract creation).
    pub to: Option<Address>,
    /// Transferred native value in wei.
    pub value: U256,
    /// Call data.
    pub input: Bytes,
    /// Execution receipt, `None` when the node did not return one.
    pub receipt: Option<Receipt>,
}

impl Transaction {
    /// True when this transaction deploys a contract.
    pub fn is_deploy(&self) -> bool {
        self.to.is_none()
    }

    /// The 4-byte method selector, present only for calls with at least 4 bytes of input.
    pub fn selector(&self) -> Option<[u8; 4]> {
        self.to?;
        selector_of(&self.input)
    }

    /// Receipt logs in emission order; empty when no receipt is attached.
    pub fn logs(&self) -> &[Log] {
        self.receipt
            .as_ref()
            .map(|receipt| receipt.logs.as_slice())
            .unwrap_or(&[])
    }
}

/// Transaction receipt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    /// Execution status (true = success).
    pub status: bool,
    /// Gas used by this transaction.
    pub gas_used: u64,
    /// Address of the created contract, for deployments.
    pub contract_address: Option<Address>,
    /// Logs emitted by the transaction.
    pub logs: Vec<Log>,
}

/// Event log entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Log {
    /// Log index within the block.
    pub index: u64,
    /// Address of the contract that emitted the log.
    pub address: Address,
    /// Indexed topics; topic0 is the event signature hash for non-anonymous events.
    pub topics: Vec<B256>,
    /// Non-indexed data payload.
    pub data: Bytes,
}

impl Log {
    /// The event signature topic, if the log has any topics.
    pub fn topic0(&self) -> Option<B256> {
        self.topics.first().copied()
    }
}

/// An ERC-4337 user operation as reported by a bundler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserOperation {
    /// User operation hash.
    pub hash: B256,
    /// Smart account that executed the operation.
    pub sender: Address,
    /// Account nonce.
    pub nonce: U256,
    /// Call data executed by the sender account.
    pub call_data: Bytes,
}

/// Extracts the first four bytes of `input` as a selector.
pub fn selector_of(input: &[u8]) -> Option<[u8; 4]> {
    input.get(..4)?.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(to: Option<Address>, input: Vec<u8>) -> Transaction {
        Transaction {
            hash: B256::ZERO,
            index: 0,
            from: Address::ZERO,
            to,
            value: U256::ZERO,
            input: Bytes::from(input),
            receipt: None,
        }
    }

    #[test]
    fn selector_requires_recipient_and_four_bytes() {
        let to = Some(Address::repeat_byte(0x11));
        assert_eq!(
            tx(to, vec![0xa9, 0x05, 0x9c, 0xbb, 0x00]).selector(),
            Some([0xa9, 0x05, 0x9c, 0xbb])
        );
        assert_eq!(tx(to, vec![0xa9, 0x05, 0x9c]).selector(), None);
        assert_eq!(tx(None, vec![0xa9, 0x05, 0x9c, 0xbb]).selector(), None);
    }

    #[test]
    fn deploy_flag_follows_recipient() {
        assert!(tx(None, vec![]).is_deploy());
        assert!(!tx(Some(Address::ZERO), vec![]).is_deploy());
    }

    #[test]
    fn logs_empty_without_receipt() {
        assert!(tx(None, vec![]).logs().is_empty());
    }

    #[test]
    fn datetime_from_timestamp() {
        let block = Block {
            number: 1,
            hash: B256::ZERO,
            parent_hash: B256::ZERO,
            timestamp: 1_708_617_600,
            transactions: vec![],
        };
        assert_eq!(
            block.datetime().map(|dt| dt.to_rfc3339()),
            Some("2024-02-22T16:00:00+00:00".to_string())
        );
    }
}
