use alloy_rpc_types_eth::Log as RpcLog;

use crate::models::chain::Log;
use crate::models::errors::ClientError;

pub trait LogParser {
    fn parse_logs(self) -> Result<Vec<Log>, ClientError>;
}

impl LogParser for Vec<RpcLog> {
    fn parse_logs(self) -> Result<Vec<Log>, ClientError> {
        let mut logs = self
            .into_iter()
            // Logs dropped by a reorg the node already observed
            .filter(|log| !log.removed)
            .map(|log| {
                let block_number = log.block_number.ok_or_else(|| {
                    ClientError::Malformed(format!(
                        "log from {} is missing its block number",
                        log.inner.address
                    ))
                })?;

                Ok(Log {
                    address: log.inner.address,
                    topics: log.inner.data.topics().to_vec(),
                    data: log.inner.data.data,
                    block_number,
                })
            })
            .collect::<Result<Vec<_>, ClientError>>()?;

        // Stable, so intra-block order is untouched
        logs.sort_by_key(|log| log.block_number);

        Ok(logs)
    }
}
