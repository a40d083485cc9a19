use alloy_consensus::Transaction as _;
use alloy_consensus::transaction::SignerRecoverable;
use alloy_primitives::Address;

use crate::models::chain::{Transaction, TransactionEnvelope};
use crate::models::common::Chain;
use crate::models::errors::DecodeError;

/// Recovers transaction senders with the signing scheme of one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderRecovery {
    chain: Chain,
    chain_id: u64,
}

impl SenderRecovery {
    pub fn for_chain_id(chain_id: u64) -> Self {
        Self {
            chain: Chain::from_chain_id(chain_id),
            chain_id,
        }
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn recover(&self, transaction: &Transaction) -> Result<Address, DecodeError> {
        match &transaction.envelope {
            TransactionEnvelope::Ethereum(envelope) => {
                // Pre-EIP-155 legacy transactions commit to no chain id and are accepted anywhere
                if let Some(tx_chain_id) = envelope.chain_id() {
                    if tx_chain_id != self.chain_id {
                        return Err(DecodeError::ChainIdMismatch {
                            tx_hash: transaction.hash(),
                            tx_chain_id,
                            chain_id: self.chain_id,
                        });
                    }
                }

                envelope
                    .recover_signer()
                    .map_err(|e| DecodeError::Recovery {
                        tx_hash: transaction.hash(),
                        reason: e.to_string(),
                    })
            }
            TransactionEnvelope::Unknown { tx_type, hash } => match self.chain {
                // EIP-712 and priority transactions are authenticated by the ZKsync node itself
                Chain::ZKsync => Ok(transaction.reported_sender),
                Chain::Ethereum => Err(DecodeError::UnsupportedEncoding {
                    tx_hash: *hash,
                    tx_type: *tx_type,
                }),
            },
        }
    }
}

pub fn recover_sender(chain_id: u64, transaction: &Transaction) -> Result<Address, DecodeError> {
    SenderRecovery::for_chain_id(chain_id).recover(transaction)
}
