pub mod events;
pub mod recovery;
pub mod rpc;
pub mod scan;
pub mod transactions;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Semaphore, watch};
use tokio::task::{self, JoinSet};
use tracing::{error, info, warn};

use crate::indexer::events::EventMatcher;
use crate::indexer::recovery::SenderRecovery;
use crate::indexer::rpc::ChainClient;
use crate::indexer::scan::{
    EventExtractor, ScanOutcome, ScanParams, TransactionExtractor, WindowExtractor, run_scan_loop,
};
use crate::metrics::Metrics;
use crate::models::common::{ChainContext, Config};
use crate::models::definitions::{
    Definition, DefinitionId, DefinitionKind, DefinitionRecord, Rule,
};
use crate::models::errors::{ConfigError, ErrorClass, RunError, ScanError};
use crate::storage::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub batch_size: u64,
    pub max_concurrent_definitions: usize,
}

impl From<&Config> for SchedulerConfig {
    fn from(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size,
            max_concurrent_definitions: config.max_concurrent_definitions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionOutcome {
    Completed(ScanOutcome),
    Skipped { reason: ConfigError },
    Failed { error: ScanError },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionReport {
    pub definition_id: DefinitionId,
    pub kind: DefinitionKind,
    pub outcome: DefinitionOutcome,
}

/// What one catch-up run did, per definition, ordered by definition id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub chain: ChainContext,
    pub definitions: Vec<DefinitionReport>,
}

impl RunReport {
    pub fn outcome(&self, definition_id: DefinitionId) -> Option<&DefinitionOutcome> {
        self.definitions
            .iter()
            .find(|report| report.definition_id == definition_id)
            .map(|report| &report.outcome)
    }

    pub fn completed(&self) -> impl Iterator<Item = (DefinitionId, &ScanOutcome)> {
        self.definitions
            .iter()
            .filter_map(|report| match &report.outcome {
                DefinitionOutcome::Completed(outcome) => Some((report.definition_id, outcome)),
                _ => None,
            })
    }

    pub fn skipped(&self) -> impl Iterator<Item = (DefinitionId, &ConfigError)> {
        self.definitions
            .iter()
            .filter_map(|report| match &report.outcome {
                DefinitionOutcome::Skipped { reason } => Some((report.definition_id, reason)),
                _ => None,
            })
    }

    pub fn failed(&self) -> impl Iterator<Item = &ScanError> {
        self.definitions
            .iter()
            .filter_map(|report| match &report.outcome {
                DefinitionOutcome::Failed { error } => Some(error),
                _ => None,
            })
    }

    /// True when a definition stopped on an infrastructure or decode failure, or its worker died.
    /// Skips and cancellations do not count.
    pub fn has_failures(&self) -> bool {
        self.failed()
            .any(|error| matches!(error.class(), ErrorClass::Transient | ErrorClass::Decode))
    }
}

/// Turns a stored record into something the scan loop can run. The contract interface is parsed
/// here, once per run.
fn prepare_extractor(
    record: DefinitionRecord,
    client: &Arc<dyn ChainClient>,
    recovery: SenderRecovery,
) -> Result<(Definition, Box<dyn WindowExtractor>), ConfigError> {
    let definition = Definition::try_from(record)?;
    let extractor: Box<dyn WindowExtractor> = match &definition.rule {
        Rule::Transaction { condition, user } => Box::new(TransactionExtractor::new(
            client.clone(),
            condition.clone(),
            *user,
            recovery,
        )),
        Rule::Event { condition, user } => Box::new(EventExtractor::new(
            client.clone(),
            EventMatcher::compile(condition, user)?,
        )),
    };
    Ok((definition, extractor))
}

/// Loads every definition, reads the chain head and id once, then runs one scan loop per
/// definition on a bounded worker pool and waits for all of them.
///
/// A failing definition never stops the others. Only failing to load the definitions or the chain
/// state aborts the run as a whole.
pub async fn run_indexers(
    client: Arc<dyn ChainClient>,
    store: Arc<dyn Store>,
    config: SchedulerConfig,
    shutdown: watch::Receiver<bool>,
    metrics: Option<Metrics>,
) -> Result<RunReport, RunError> {
    let mut records = Vec::new();
    for kind in DefinitionKind::ALL {
        records.extend(store.list_definitions(kind).await?);
    }

    let chain_id = client.chain_id().await?;
    let head = client.chain_head().await?;
    let chain = ChainContext::new(chain_id, head);
    let recovery = SenderRecovery::for_chain_id(chain_id);

    if let Some(metrics) = &metrics {
        metrics.record_chain_head(head);
    }

    info!(
        chain_id,
        head,
        definitions = records.len(),
        batch_size = config.batch_size,
        "Starting catch-up run"
    );

    let mut reports = Vec::with_capacity(records.len());
    let mut seen = HashSet::with_capacity(records.len());
    let permits = Arc::new(Semaphore::new(config.max_concurrent_definitions.max(1)));
    let mut join_set = JoinSet::new();
    let mut workers: HashMap<task::Id, (DefinitionId, DefinitionKind)> = HashMap::new();

    for record in records {
        let definition_id = record.id;
        let kind = record.kind;

        if !seen.insert(definition_id) {
            warn!(definition_id, %kind, "Duplicate definition id, running it once");
            continue;
        }

        let (definition, extractor) = match prepare_extractor(record, &client, recovery) {
            Ok(prepared) => prepared,
            Err(reason) => {
                warn!(definition_id, %kind, "Skipping definition: {}", reason);
                if let Some(metrics) = &metrics {
                    metrics.record_failure(ErrorClass::Config);
                }
                reports.push(DefinitionReport {
                    definition_id,
                    kind,
                    outcome: DefinitionOutcome::Skipped { reason },
                });
                continue;
            }
        };

        let params = ScanParams {
            definition_id,
            checkpoint: definition.checkpoint,
            head,
            batch_size: config.batch_size,
        };
        let store = store.clone();
        let permits = permits.clone();
        let shutdown = shutdown.clone();
        let metrics = metrics.clone();

        let handle = join_set.spawn(async move {
            let result = match permits.acquire_owned().await {
                Ok(_permit) => {
                    run_scan_loop(
                        params,
                        extractor.as_ref(),
                        store.as_ref(),
                        shutdown,
                        metrics.as_ref(),
                    )
                    .await
                }
                Err(_) => Err(ScanError::Cancelled {
                    definition_id,
                    from: params.checkpoint.saturating_add(1),
                    to: params.checkpoint.saturating_add(params.batch_size),
                }),
            };
            (definition_id, kind, result)
        });
        workers.insert(handle.id(), (definition_id, kind));
    }

    while let Some(joined) = join_set.join_next().await {
        let (definition_id, kind, result) = match joined {
            Ok(finished) => finished,
            Err(e) => {
                let Some(&(definition_id, kind)) = workers.get(&e.id()) else {
                    error!("Unknown scan worker did not finish: {}", e);
                    continue;
                };
                let reason = if e.is_panic() {
                    "worker panicked".to_string()
                } else {
                    e.to_string()
                };
                (
                    definition_id,
                    kind,
                    Err(ScanError::Aborted {
                        definition_id,
                        reason,
                    }),
                )
            }
        };

        let outcome = match result {
            Ok(outcome) => DefinitionOutcome::Completed(outcome),
            Err(error) => {
                match error.class() {
                    ErrorClass::Cancelled => warn!(definition_id, %kind, "{}", error),
                    _ => error!(definition_id, %kind, "{}", error),
                }
                if let Some(metrics) = &metrics {
                    metrics.record_failure(error.class());
                }
                DefinitionOutcome::Failed { error }
            }
        };

        reports.push(DefinitionReport {
            definition_id,
            kind,
            outcome,
        });
    }

    reports.sort_by_key(|report| report.definition_id);
    let report = RunReport {
        chain,
        definitions: reports,
    };

    info!(
        completed = report.completed().count(),
        skipped = report.skipped().count(),
        failed = report.failed().count(),
        "Catch-up run finished"
    );

    Ok(report)
}
