use alloy_consensus::Transaction as _;
use alloy_network::{AnyRpcBlock, AnyRpcTransaction, AnyTxEnvelope, TransactionResponse};
use alloy_network::primitives::BlockTransactions;

use crate::models::chain::{Block, Transaction, TransactionEnvelope};
use crate::models::errors::ClientError;

pub trait BlockParser {
    fn parse_block(&self) -> Result<Block, ClientError>;
}

impl BlockParser for AnyRpcBlock {
    fn parse_block(&self) -> Result<Block, ClientError> {
        let inner = &self.header.inner;

        let transactions = match &self.transactions {
            BlockTransactions::Full(transactions) => {
                transactions.iter().map(parse_transaction).collect()
            }
            BlockTransactions::Hashes(_) => {
                return Err(ClientError::Malformed(format!(
                    "block {} returned transaction hashes instead of full transactions",
                    inner.number
                )));
            }
            BlockTransactions::Uncle => {
                return Err(ClientError::Malformed(format!(
                    "block {} is an uncle block",
                    inner.number
                )));
            }
        };

        Ok(Block {
            number: inner.number,
            base_fee: inner.base_fee_per_gas,
            transactions,
        })
    }
}

fn parse_transaction(transaction: &AnyRpcTransaction) -> Transaction {
    let envelope = match transaction.inner.inner.inner() {
        // Ethereum will always enter this match arm
        // Other chains only enter it for the transaction types they share with Ethereum
        AnyTxEnvelope::Ethereum(envelope) => TransactionEnvelope::Ethereum(envelope.clone()),
        AnyTxEnvelope::Unknown(unknown) => TransactionEnvelope::Unknown {
            tx_type: unknown.inner.ty.0,
            hash: unknown.hash,
        },
    };

    Transaction {
        envelope,
        to: transaction.to(),
        reported_sender: transaction.from(),
    }
}
