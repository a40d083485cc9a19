use std::fmt;
use std::str::FromStr;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::models::errors::ConfigError;

pub type DefinitionId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DefinitionKind {
    #[serde(rename = "tx")]
    Transaction,
    #[serde(rename = "event")]
    Event,
}

impl DefinitionKind {
    pub const ALL: [DefinitionKind; 2] = [DefinitionKind::Transaction, DefinitionKind::Event];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transaction => "tx",
            Self::Event => "event",
        }
    }
}

impl fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DefinitionKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tx" => Ok(Self::Transaction),
            "event" => Ok(Self::Event),
            other => Err(ConfigError::InvalidSpec(format!("unknown definition kind '{other}'"))),
        }
    }
}

/// A definition row exactly as the persistence layer hands it over. `spec` is still raw JSON so
/// that one broken record cannot prevent the others from loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionRecord {
    pub id: DefinitionId,
    pub kind: DefinitionKind,
    pub checkpoint: u64,
    pub spec: String,
}

////////////////////////////////// Transaction specs //////////////////////////////////
// {"condition":{"tx":{"to":"0x..."}},"user":{"tx":"from"}}
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionCondition {
    pub to: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserSource {
    #[serde(rename = "from")]
    FromSender,
    // Reserved for future rules; yields no candidates
    #[serde(other)]
    Reserved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSpec {
    pub condition: TransactionConditionSpec,
    pub user: TransactionUserSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionConditionSpec {
    pub tx: TransactionCondition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionUserSpec {
    pub tx: UserSource,
}

/////////////////////////////////// Event specs ///////////////////////////////////
// {"condition":{"contract":{"address":"0x...","abi":"[...]"},"event":{"name":"Transfer"}},
//  "user":{"event":{"arg":"from"}}}
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSpec {
    pub address: Address,
    pub abi: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventNameSpec {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventConditionSpec {
    pub contract: ContractSpec,
    pub event: EventNameSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventArgSpec {
    pub arg: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventUserSpec {
    pub event: EventArgSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSpec {
    pub condition: EventConditionSpec,
    pub user: EventUserSpec,
}

/// Flattened event matching rule. The contract interface is kept as text here and only parsed
/// when a run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCondition {
    pub contract_address: Address,
    pub contract_interface: String,
    pub event_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventUserRule {
    pub argument_name: String,
}

/////////////////////////////////// Definitions ///////////////////////////////////
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    Transaction {
        condition: TransactionCondition,
        user: UserSource,
    },
    Event {
        condition: EventCondition,
        user: EventUserRule,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    pub id: DefinitionId,
    pub checkpoint: u64,
    pub rule: Rule,
}

impl Definition {
    pub fn kind(&self) -> DefinitionKind {
        match self.rule {
            Rule::Transaction { .. } => DefinitionKind::Transaction,
            Rule::Event { .. } => DefinitionKind::Event,
        }
    }
}

impl TryFrom<DefinitionRecord> for Definition {
    type Error = ConfigError;

    fn try_from(record: DefinitionRecord) -> Result<Self, Self::Error> {
        let rule = match record.kind {
            DefinitionKind::Transaction => {
                let spec: TransactionSpec = serde_json::from_str(&record.spec)
                    .map_err(|e| ConfigError::InvalidSpec(e.to_string()))?;
                Rule::Transaction {
                    condition: spec.condition.tx,
                    user: spec.user.tx,
                }
            }
            DefinitionKind::Event => {
                let spec: EventSpec = serde_json::from_str(&record.spec)
                    .map_err(|e| ConfigError::InvalidSpec(e.to_string()))?;
                Rule::Event {
                    condition: EventCondition {
                        contract_address: spec.condition.contract.address,
                        contract_interface: spec.condition.contract.abi,
                        event_name: spec.condition.event.name,
                    },
                    user: EventUserRule {
                        argument_name: spec.user.event.arg,
                    },
                }
            }
        };

        Ok(Definition {
            id: record.id,
            checkpoint: record.checkpoint,
            rule,
        })
    }
}
