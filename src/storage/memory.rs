use std::collections::{BTreeMap, HashMap};

use alloy_primitives::Address;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::models::definitions::{DefinitionId, DefinitionKind, DefinitionRecord};
use crate::models::errors::StoreError;
use crate::storage::{Protocol, ProtocolId, Store, unique_addresses};

#[derive(Debug, Clone)]
struct StoredDefinition {
    record: DefinitionRecord,
    protocol_id: Option<ProtocolId>,
    users: Vec<Address>,
}

#[derive(Debug, Default)]
struct State {
    protocols: BTreeMap<ProtocolId, String>,
    definitions: BTreeMap<DefinitionId, StoredDefinition>,
    next_protocol_id: ProtocolId,
    next_definition_id: DefinitionId,
    // Remaining number of successful calls before the operation starts failing
    put_users_budget: Option<usize>,
    checkpoint_budget: Option<usize>,
    checkpoint_writes: HashMap<DefinitionId, Vec<u64>>,
}

/// Process-local [`Store`] used by tests and dry runs.
///
/// `commit_window` uses the trait default, so the users-then-checkpoint ordering is observable and
/// either half can be made to fail.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_protocol(&self, name: &str) -> ProtocolId {
        let mut state = self.state.lock().await;
        state.next_protocol_id += 1;
        let id = state.next_protocol_id;
        state.protocols.insert(id, name.to_string());
        id
    }

    pub async fn insert_definition(
        &self,
        protocol_id: Option<ProtocolId>,
        kind: DefinitionKind,
        checkpoint: u64,
        spec: &str,
    ) -> DefinitionId {
        let mut state = self.state.lock().await;
        state.next_definition_id += 1;
        let id = state.next_definition_id;
        let record = DefinitionRecord {
            id,
            kind,
            checkpoint,
            spec: spec.to_string(),
        };
        state.definitions.insert(
            id,
            StoredDefinition {
                record,
                protocol_id,
                users: Vec::new(),
            },
        );
        id
    }

    pub async fn checkpoint(&self, definition_id: DefinitionId) -> Option<u64> {
        let state = self.state.lock().await;
        state
            .definitions
            .get(&definition_id)
            .map(|definition| definition.record.checkpoint)
    }

    pub async fn users(&self, definition_id: DefinitionId) -> Vec<Address> {
        let state = self.state.lock().await;
        state
            .definitions
            .get(&definition_id)
            .map(|definition| definition.users.clone())
            .unwrap_or_default()
    }

    /// Every checkpoint ever written for the definition, oldest first.
    pub async fn checkpoint_history(&self, definition_id: DefinitionId) -> Vec<u64> {
        let state = self.state.lock().await;
        state
            .checkpoint_writes
            .get(&definition_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Lets `successes` more `put_users` calls through, then fails every later one.
    pub async fn fail_put_users_after(&self, successes: usize) {
        self.state.lock().await.put_users_budget = Some(successes);
    }

    /// Lets `successes` more `advance_checkpoint` calls through, then fails every later one.
    pub async fn fail_checkpoint_after(&self, successes: usize) {
        self.state.lock().await.checkpoint_budget = Some(successes);
    }

    pub async fn heal(&self) {
        let mut state = self.state.lock().await;
        state.put_users_budget = None;
        state.checkpoint_budget = None;
    }
}

fn spend(budget: &mut Option<usize>, operation: &str) -> Result<(), StoreError> {
    match budget {
        Some(0) => Err(StoreError::Unavailable(format!("injected {operation} failure"))),
        Some(remaining) => {
            *remaining -= 1;
            Ok(())
        }
        None => Ok(()),
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_definitions(
        &self,
        kind: DefinitionKind,
    ) -> Result<Vec<DefinitionRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .definitions
            .values()
            .filter(|definition| definition.record.kind == kind)
            .map(|definition| definition.record.clone())
            .collect())
    }

    async fn put_users(
        &self,
        definition_id: DefinitionId,
        addresses: &[Address],
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        spend(&mut state.put_users_budget, "put_users")?;

        let definition = state
            .definitions
            .get_mut(&definition_id)
            .ok_or(StoreError::NotFound(definition_id))?;
        for address in unique_addresses(addresses) {
            if !definition.users.contains(&address) {
                definition.users.push(address);
            }
        }
        Ok(())
    }

    async fn advance_checkpoint(
        &self,
        definition_id: DefinitionId,
        checkpoint: u64,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        spend(&mut state.checkpoint_budget, "advance_checkpoint")?;

        let definition = state
            .definitions
            .get_mut(&definition_id)
            .ok_or(StoreError::NotFound(definition_id))?;
        definition.record.checkpoint = checkpoint;
        state
            .checkpoint_writes
            .entry(definition_id)
            .or_default()
            .push(checkpoint);
        Ok(())
    }

    async fn list_protocols(&self) -> Result<Vec<Protocol>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .protocols
            .iter()
            .map(|(id, name)| Protocol {
                id: *id,
                name: name.clone(),
            })
            .collect())
    }

    async fn protocols_by_address(&self, address: &str) -> Result<Vec<Protocol>, StoreError> {
        // An unparsable address cannot have been recorded
        let Ok(address) = address.parse::<Address>() else {
            return Ok(Vec::new());
        };

        let state = self.state.lock().await;
        let mut ids: Vec<ProtocolId> = state
            .definitions
            .values()
            .filter(|definition| definition.users.contains(&address))
            .filter_map(|definition| definition.protocol_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();

        Ok(ids
            .into_iter()
            .filter_map(|id| {
                state.protocols.get(&id).map(|name| Protocol {
                    id,
                    name: name.clone(),
                })
            })
            .collect())
    }
}
