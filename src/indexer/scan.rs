//! The windowed scan loop run for every definition.
//!
//! Starting at the stored checkpoint `C`, the loop fetches fixed windows `[C + 1, C + W]` while a
//! full window fits below the chain head, extracts candidate users and commits users and the new
//! checkpoint together. Anything closer than one window to the head is left for the next run.

use std::sync::Arc;

use alloy_primitives::Address;
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::indexer::events::{EventMatcher, extract_users_from_logs};
use crate::indexer::recovery::SenderRecovery;
use crate::indexer::rpc::ChainClient;
use crate::indexer::transactions::extract_users_from_blocks;
use crate::metrics::Metrics;
use crate::models::definitions::{DefinitionId, TransactionCondition, UserSource};
use crate::models::errors::{ScanError, WindowError};
use crate::storage::{Store, unique_addresses};

/// Fetches one window from the chain and turns it into candidate users.
#[async_trait]
pub trait WindowExtractor: Send + Sync {
    async fn extract(&self, from: u64, to: u64) -> Result<Vec<Address>, WindowError>;
}

pub struct TransactionExtractor {
    client: Arc<dyn ChainClient>,
    condition: TransactionCondition,
    source: UserSource,
    recovery: SenderRecovery,
}

impl TransactionExtractor {
    pub fn new(
        client: Arc<dyn ChainClient>,
        condition: TransactionCondition,
        source: UserSource,
        recovery: SenderRecovery,
    ) -> Self {
        Self {
            client,
            condition,
            source,
            recovery,
        }
    }
}

#[async_trait]
impl WindowExtractor for TransactionExtractor {
    async fn extract(&self, from: u64, to: u64) -> Result<Vec<Address>, WindowError> {
        let blocks = self.client.blocks_by_range(from, to).await?;
        let users =
            extract_users_from_blocks(&blocks, &self.condition, self.source, &self.recovery)?;
        Ok(users)
    }
}

pub struct EventExtractor {
    client: Arc<dyn ChainClient>,
    matcher: EventMatcher,
}

impl EventExtractor {
    pub fn new(client: Arc<dyn ChainClient>, matcher: EventMatcher) -> Self {
        Self { client, matcher }
    }
}

#[async_trait]
impl WindowExtractor for EventExtractor {
    async fn extract(&self, from: u64, to: u64) -> Result<Vec<Address>, WindowError> {
        let logs = self
            .client
            .logs_by_range(from, to, self.matcher.contract_address())
            .await?;
        let users = extract_users_from_logs(&self.matcher, &logs)?;
        Ok(users)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanParams {
    pub definition_id: DefinitionId,
    pub checkpoint: u64,
    pub head: u64,
    pub batch_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOutcome {
    pub from_checkpoint: u64,
    pub checkpoint: u64,
    pub windows: u64,
    /// Distinct users per window, summed over all committed windows.
    pub users: u64,
}

/// The next window after `cursor`, if a full one fits at or below `head`.
pub fn next_window(cursor: u64, head: u64, batch_size: u64) -> Option<(u64, u64)> {
    if batch_size == 0 {
        return None;
    }
    let to = cursor.checked_add(batch_size)?;
    (to <= head).then_some((cursor + 1, to))
}

/// Resolves once shutdown has been requested. Never resolves if the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

pub async fn run_scan_loop(
    params: ScanParams,
    extractor: &dyn WindowExtractor,
    store: &dyn Store,
    mut shutdown: watch::Receiver<bool>,
    metrics: Option<&Metrics>,
) -> Result<ScanOutcome, ScanError> {
    let ScanParams {
        definition_id,
        checkpoint,
        head,
        batch_size,
    } = params;

    let mut outcome = ScanOutcome {
        from_checkpoint: checkpoint,
        checkpoint,
        windows: 0,
        users: 0,
    };

    while let Some((from, to)) = next_window(outcome.checkpoint, head, batch_size) {
        if *shutdown.borrow() {
            return Err(ScanError::Cancelled {
                definition_id,
                from,
                to,
            });
        }

        // Cancellation may interrupt the fetch, never the commit below
        let candidates = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => {
                return Err(ScanError::Cancelled { definition_id, from, to });
            }
            result = extractor.extract(from, to) => {
                result.map_err(|e| ScanError::from_window(definition_id, from, to, e))?
            }
        };

        let users = unique_addresses(&candidates);
        store
            .commit_window(definition_id, &users, to)
            .await
            .map_err(|e| ScanError::from_window(definition_id, from, to, e.into()))?;

        debug!(
            definition_id,
            from,
            to,
            candidates = candidates.len(),
            users = users.len(),
            "Committed window"
        );

        if let Some(metrics) = metrics {
            metrics.record_window(definition_id, to, users.len());
        }

        outcome.checkpoint = to;
        outcome.windows += 1;
        outcome.users += users.len() as u64;
    }

    info!(
        definition_id,
        from_checkpoint = outcome.from_checkpoint,
        checkpoint = outcome.checkpoint,
        windows = outcome.windows,
        users = outcome.users,
        "Definition caught up"
    );

    Ok(outcome)
}
