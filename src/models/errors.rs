use alloy_primitives::B256;
use thiserror::Error;

use crate::models::definitions::DefinitionId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Invalid block range: from {from} is greater than to {to}")]
    InvalidRange { from: u64, to: u64 },
    #[error("RPC unavailable: {0}")]
    Unavailable(String),
    #[error("Malformed RPC response: {0}")]
    Malformed(String),
}

impl ClientError {
    /// Only transport failures are worth re-invoking.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Malformed stored data: {0}")]
    Malformed(String),
    #[error("Definition {0} not found")]
    NotFound(DefinitionId),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid definition spec: {0}")]
    InvalidSpec(String),
    #[error("Unparsable contract interface: {0}")]
    InvalidAbi(String),
    #[error("Event '{0}' is not declared by the contract interface")]
    UnknownEvent(String),
    #[error("Event '{event}' has no argument named '{arg}'")]
    UnknownArgument { event: String, arg: String },
    #[error("Event '{event}' is anonymous and cannot be matched by signature")]
    AnonymousEvent { event: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Argument '{name}' has type {found}, expected {expected}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("Log is missing topic {index} for indexed argument '{name}'")]
    MissingTopic { index: usize, name: String },
    #[error("Failed to unpack event data: {0}")]
    Abi(String),
    #[error("Failed to recover sender of transaction {tx_hash}: {reason}")]
    Recovery { tx_hash: B256, reason: String },
    #[error("Transaction {tx_hash} is signed for chain {tx_chain_id}, expected {chain_id}")]
    ChainIdMismatch {
        tx_hash: B256,
        tx_chain_id: u64,
        chain_id: u64,
    },
    #[error("Transaction {tx_hash} uses unsupported encoding type {tx_type:#x}")]
    UnsupportedEncoding { tx_hash: B256, tx_type: u8 },
}

/// Failure classes a scan run distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Config,
    Transient,
    Decode,
    Cancelled,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Transient => "transient",
            Self::Decode => "decode",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Where a window-level failure came from, before it is tagged with a definition and range.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("Definition {definition_id} failed on blocks [{from}, {to}]: {source}")]
    Transient {
        definition_id: DefinitionId,
        from: u64,
        to: u64,
        source: WindowError,
    },
    #[error("Definition {definition_id} could not decode blocks [{from}, {to}]: {source}")]
    Decode {
        definition_id: DefinitionId,
        from: u64,
        to: u64,
        source: WindowError,
    },
    #[error("Definition {definition_id} cancelled before blocks [{from}, {to}]")]
    Cancelled {
        definition_id: DefinitionId,
        from: u64,
        to: u64,
    },
    #[error("Definition {definition_id} worker stopped unexpectedly: {reason}")]
    Aborted {
        definition_id: DefinitionId,
        reason: String,
    },
}

impl ScanError {
    /// Tags a window failure with its definition and range, classifying it.
    pub fn from_window(definition_id: DefinitionId, from: u64, to: u64, source: WindowError) -> Self {
        let decode = match &source {
            WindowError::Decode(_) => true,
            WindowError::Client(ClientError::Malformed(_)) => true,
            WindowError::Store(StoreError::Malformed(_)) => true,
            WindowError::Client(_) | WindowError::Store(_) => false,
        };

        if decode {
            Self::Decode {
                definition_id,
                from,
                to,
                source,
            }
        } else {
            Self::Transient {
                definition_id,
                from,
                to,
                source,
            }
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transient { .. } | Self::Aborted { .. } => ErrorClass::Transient,
            Self::Decode { .. } => ErrorClass::Decode,
            Self::Cancelled { .. } => ErrorClass::Cancelled,
        }
    }

    pub fn definition_id(&self) -> DefinitionId {
        match self {
            Self::Transient { definition_id, .. }
            | Self::Decode { definition_id, .. }
            | Self::Cancelled { definition_id, .. }
            | Self::Aborted { definition_id, .. } => *definition_id,
        }
    }
}

/// Failures that stop a run before any definition starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("Failed to load definitions: {0}")]
    Definitions(#[from] StoreError),
    #[error("Failed to read chain state: {0}")]
    Chain(#[from] ClientError),
}
