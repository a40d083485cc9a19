pub mod memory;
pub mod sqlite;

use alloy_primitives::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::definitions::{DefinitionId, DefinitionKind, DefinitionRecord};
use crate::models::errors::StoreError;

pub type ProtocolId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protocol {
    pub id: ProtocolId,
    pub name: String,
}

/// Definition records in, extracted users and checkpoints out.
///
/// Implementations must be safe to share between concurrently running definitions. The scheduler
/// never runs two loops for the same definition id at once, so checkpoint writes need no
/// compare-and-swap.
#[async_trait]
pub trait Store: Send + Sync {
    async fn list_definitions(&self, kind: DefinitionKind)
    -> Result<Vec<DefinitionRecord>, StoreError>;

    /// Idempotent bulk upsert. Duplicates within `addresses` and addresses already recorded for
    /// the definition are no-ops.
    async fn put_users(
        &self,
        definition_id: DefinitionId,
        addresses: &[Address],
    ) -> Result<(), StoreError>;

    /// Unconditional set of the definition's last indexed block.
    async fn advance_checkpoint(
        &self,
        definition_id: DefinitionId,
        checkpoint: u64,
    ) -> Result<(), StoreError>;

    /// Commits one window: the users first, then the checkpoint. A crash between the two leaves the
    /// old checkpoint in place and replaying the window rewrites the same users.
    ///
    /// Stores that can do both in one transaction should override this.
    async fn commit_window(
        &self,
        definition_id: DefinitionId,
        addresses: &[Address],
        checkpoint: u64,
    ) -> Result<(), StoreError> {
        self.put_users(definition_id, addresses).await?;
        self.advance_checkpoint(definition_id, checkpoint).await
    }

    async fn list_protocols(&self) -> Result<Vec<Protocol>, StoreError>;

    /// Protocols with at least one definition that recorded `address`, matched case-insensitively.
    async fn protocols_by_address(&self, address: &str) -> Result<Vec<Protocol>, StoreError>;
}

/// Deduplicates while keeping first-seen order.
pub(crate) fn unique_addresses(addresses: &[Address]) -> Vec<Address> {
    let mut seen = std::collections::HashSet::with_capacity(addresses.len());
    addresses
        .iter()
        .filter(|address| seen.insert(**address))
        .copied()
        .collect()
}
