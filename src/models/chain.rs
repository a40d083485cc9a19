use alloy_consensus::{Transaction as _, TxEnvelope};
use alloy_primitives::{Address, B256, Bytes};

////////////////////////////////////// Blocks ////////////////////////////////////////
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub number: u64,
    pub base_fee: Option<u64>,
    pub transactions: Vec<Transaction>,
}

/////////////////////////////////// Transactions ///////////////////////////////////
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionEnvelope {
    // Legacy, EIP-2930, EIP-1559, EIP-4844 and EIP-7702 transactions
    Ethereum(TxEnvelope),
    // Chain-specific encodings the Ethereum signer does not understand (e.g. ZKsync 0x71, 0xff)
    Unknown { tx_type: u8, hash: B256 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub envelope: TransactionEnvelope,
    pub to: Option<Address>,
    // Sender as reported by the node. Only trusted for encodings we cannot recover ourselves.
    pub reported_sender: Address,
}

impl Transaction {
    pub fn from_envelope(envelope: TxEnvelope, reported_sender: Address) -> Self {
        let to = envelope.to();
        Self {
            envelope: TransactionEnvelope::Ethereum(envelope),
            to,
            reported_sender,
        }
    }

    pub fn hash(&self) -> B256 {
        match &self.envelope {
            TransactionEnvelope::Ethereum(envelope) => *envelope.tx_hash(),
            TransactionEnvelope::Unknown { hash, .. } => *hash,
        }
    }
}

////////////////////////////////////// Logs ////////////////////////////////////////
#[derive(Debug, Clone, PartialEq)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
}

impl Log {
    pub fn signature(&self) -> Option<&B256> {
        self.topics.first()
    }
}
