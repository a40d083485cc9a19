use alloy_primitives::Address;

use crate::indexer::recovery::SenderRecovery;
use crate::models::chain::{Block, Transaction};
use crate::models::definitions::{TransactionCondition, UserSource};
use crate::models::errors::DecodeError;

pub fn matches_condition(transaction: &Transaction, condition: &TransactionCondition) -> bool {
    // Contract creations have no destination and never match
    transaction.to == Some(condition.to)
}

/// Candidate users for one block, in transaction order and not deduplicated.
pub fn extract_users_from_block(
    block: &Block,
    condition: &TransactionCondition,
    source: UserSource,
    recovery: &SenderRecovery,
) -> Result<Vec<Address>, DecodeError> {
    let mut users = Vec::new();

    for transaction in block
        .transactions
        .iter()
        .filter(|transaction| matches_condition(transaction, condition))
    {
        match source {
            UserSource::FromSender => users.push(recovery.recover(transaction)?),
            UserSource::Reserved => {}
        }
    }

    Ok(users)
}

pub fn extract_users_from_blocks(
    blocks: &[Block],
    condition: &TransactionCondition,
    source: UserSource,
    recovery: &SenderRecovery,
) -> Result<Vec<Address>, DecodeError> {
    let mut users = Vec::new();
    for block in blocks {
        users.extend(extract_users_from_block(block, condition, source, recovery)?);
    }
    Ok(users)
}
