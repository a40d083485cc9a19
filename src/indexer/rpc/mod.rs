pub mod blocks;
pub mod logs;

use std::future::Future;
use std::time::Instant;

use alloy_eips::BlockNumberOrTag;
use alloy_network::{AnyNetwork, AnyRpcBlock};
use alloy_primitives::Address;
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_client::{BatchRequest, Waiter};
use alloy_rpc_types_eth::Filter;
use alloy_transport::{RpcError, TransportError};
use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::warn;
use url::Url;

use crate::indexer::rpc::{blocks::BlockParser, logs::LogParser};
use crate::metrics::Metrics;
use crate::models::chain::{Block, Log};
use crate::models::errors::ClientError;
use crate::utils::retry::{RetryConfig, retry};

/// Read access to the chain, as the scan loop needs it.
///
/// Ranges are inclusive on both ends. `from > to` is rejected with [`ClientError::InvalidRange`];
/// an empty result is not an error.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn chain_head(&self) -> Result<u64, ClientError>;

    async fn chain_id(&self) -> Result<u64, ClientError>;

    /// All blocks in `[from, to]` with full transactions, in height order, fetched in one batch.
    async fn blocks_by_range(&self, from: u64, to: u64) -> Result<Vec<Block>, ClientError>;

    /// Logs emitted by `address` in `[from, to]`, ascending by block height.
    async fn logs_by_range(
        &self,
        from: u64,
        to: u64,
        address: Address,
    ) -> Result<Vec<Log>, ClientError>;
}

pub fn check_range(from: u64, to: u64) -> Result<(), ClientError> {
    if from > to {
        return Err(ClientError::InvalidRange { from, to });
    }
    Ok(())
}

pub(crate) fn classify_transport_error(err: TransportError) -> ClientError {
    match err {
        RpcError::DeserError { err, .. } => ClientError::Malformed(err.to_string()),
        RpcError::SerError(err) => ClientError::Malformed(err.to_string()),
        RpcError::NullResp => ClientError::Malformed("server returned a null response".to_string()),
        other => ClientError::Unavailable(other.to_string()),
    }
}

/// JSON-RPC backed [`ChainClient`].
pub struct RpcChainClient<P> {
    provider: P,
    retry_config: RetryConfig,
    metrics: Option<Metrics>,
}

impl RpcChainClient<DynProvider<AnyNetwork>> {
    pub fn connect(rpc_url: Url, retry_config: RetryConfig, metrics: Option<Metrics>) -> Self {
        let provider = ProviderBuilder::new()
            .disable_recommended_fillers()
            .network::<AnyNetwork>()
            .connect_http(rpc_url)
            .erased();

        Self::new(provider, retry_config, metrics)
    }
}

impl<P> RpcChainClient<P>
where
    P: Provider<AnyNetwork>,
{
    pub fn new(provider: P, retry_config: RetryConfig, metrics: Option<Metrics>) -> Self {
        Self {
            provider,
            retry_config,
            metrics,
        }
    }

    async fn timed<T, Fut>(&self, method: &'static str, call: Fut) -> Result<T, ClientError>
    where
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let start = Instant::now();
        let result = call.await;

        if let Some(metrics) = &self.metrics {
            metrics.record_rpc(method, start.elapsed().as_secs_f64(), result.is_err());
        }

        result
    }

    async fn fetch_blocks(&self, from: u64, to: u64) -> Result<Vec<Block>, ClientError> {
        let mut batch = BatchRequest::new(self.provider.client());
        let mut waiters: Vec<Waiter<Option<AnyRpcBlock>>> =
            Vec::with_capacity((to - from + 1) as usize);

        for number in from..=to {
            let waiter = batch
                .add_call("eth_getBlockByNumber", &(BlockNumberOrTag::Number(number), true))
                .map_err(classify_transport_error)?;
            waiters.push(waiter);
        }

        batch.send().await.map_err(classify_transport_error)?;

        let responses = try_join_all(waiters)
            .await
            .map_err(classify_transport_error)?;

        let mut blocks = Vec::with_capacity(responses.len());
        for (number, block) in (from..=to).zip(responses) {
            let block =
                block.ok_or_else(|| ClientError::Malformed(format!("block {number} not found")))?;

            let block = block.parse_block()?;
            if block.number != number {
                return Err(ClientError::Malformed(format!(
                    "requested block {number}, received block {}",
                    block.number
                )));
            }
            blocks.push(block);
        }

        Ok(blocks)
    }
}

#[async_trait]
impl<P> ChainClient for RpcChainClient<P>
where
    P: Provider<AnyNetwork>,
{
    async fn chain_head(&self) -> Result<u64, ClientError> {
        self.timed(
            "eth_blockNumber",
            retry(
                || async {
                    self.provider.get_block_number().await.map_err(|e| {
                        warn!("Failed to get latest block number: {}", e);
                        classify_transport_error(e)
                    })
                },
                &self.retry_config,
                "get_latest_block_number",
            ),
        )
        .await
    }

    async fn chain_id(&self) -> Result<u64, ClientError> {
        self.timed(
            "eth_chainId",
            retry(
                || async {
                    self.provider.get_chain_id().await.map_err(|e| {
                        warn!("Failed to get chain ID: {}", e);
                        classify_transport_error(e)
                    })
                },
                &self.retry_config,
                "get_chain_id",
            ),
        )
        .await
    }

    async fn blocks_by_range(&self, from: u64, to: u64) -> Result<Vec<Block>, ClientError> {
        check_range(from, to)?;

        self.timed(
            "eth_getBlockByNumber",
            retry(
                || self.fetch_blocks(from, to),
                &self.retry_config,
                "blocks_by_range",
            ),
        )
        .await
    }

    async fn logs_by_range(
        &self,
        from: u64,
        to: u64,
        address: Address,
    ) -> Result<Vec<Log>, ClientError> {
        check_range(from, to)?;

        let filter = Filter::new().from_block(from).to_block(to).address(address);

        let logs = self
            .timed(
                "eth_getLogs",
                retry(
                    || async {
                        self.provider.get_logs(&filter).await.map_err(|e| {
                            warn!("Failed to get logs for [{}, {}]: {}", from, to, e);
                            classify_transport_error(e)
                        })
                    },
                    &self.retry_config,
                    "logs_by_range",
                ),
            )
            .await?;

        logs.parse_logs()
    }
}
