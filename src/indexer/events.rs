//! Event matching and decoding against a contract interface.
//!
//! A matcher is compiled once per definition run from the definition's contract interface. Matching
//! is by emitting contract and event signature (`topics[0]`); decoding unpacks the data payload for
//! non-indexed arguments and reads indexed arguments straight from `topics[1..]`.
//!
//! Indexed arguments are not ABI-decoded: `address` arguments are taken from the low-order 20 bytes
//! of their topic and every other indexed type is kept as the raw topic word
//! ([`EventValue::Topic`]). Dynamic indexed types (`string`, `bytes`, arrays) only ever appear as
//! their keccak hash in a topic, so no decoder can recover them anyway.

use alloy_dyn_abi::{DynSolType, DynSolValue, Specifier};
use alloy_json_abi::{Event, JsonAbi};
use alloy_primitives::{Address, B256};

use crate::models::chain::Log;
use crate::models::definitions::{EventCondition, EventUserRule};
use crate::models::errors::{ConfigError, DecodeError};
use crate::models::events::{DecodedEvent, EventValue};

#[derive(Debug, Clone)]
struct CompiledEvent {
    event: Event,
    selector: B256,
    body_type: DynSolType,
    indexed_count: usize,
}

impl CompiledEvent {
    fn compile(event: &Event) -> Result<Self, ConfigError> {
        let body_types = event
            .inputs
            .iter()
            .filter(|param| !param.indexed)
            .map(|param| {
                param.resolve().map_err(|e| {
                    ConfigError::InvalidAbi(format!(
                        "argument '{}' of event '{}': {}",
                        param.name, event.name, e
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            selector: event.selector(),
            body_type: DynSolType::Tuple(body_types),
            indexed_count: event.inputs.iter().filter(|param| param.indexed).count(),
            event: event.clone(),
        })
    }

    fn decode(&self, log: &Log) -> Result<DecodedEvent, DecodeError> {
        let mut body = if self.indexed_count == self.event.inputs.len() {
            Vec::new().into_iter()
        } else {
            match self
                .body_type
                .abi_decode_params(&log.data)
                .map_err(|e| DecodeError::Abi(e.to_string()))?
            {
                DynSolValue::Tuple(values) => values.into_iter(),
                other => vec![other].into_iter(),
            }
        };

        let mut decoded = DecodedEvent::with_capacity(self.event.inputs.len());
        // topics[0] is the event signature
        let mut topic_index = 1;

        for param in &self.event.inputs {
            if param.indexed {
                let topic = log.topics.get(topic_index).ok_or_else(|| DecodeError::MissingTopic {
                    index: topic_index,
                    name: param.name.clone(),
                })?;
                let value = if param.ty == "address" {
                    EventValue::Address(Address::from_word(*topic))
                } else {
                    EventValue::Topic(*topic)
                };
                decoded.insert(param.name.clone(), value);
                topic_index += 1;
            } else {
                let value = body.next().ok_or_else(|| {
                    DecodeError::Abi(format!("missing data for argument '{}'", param.name))
                })?;
                decoded.insert(param.name.clone(), value.into());
            }
        }

        Ok(decoded)
    }
}

/// Compiled matcher for one event definition.
#[derive(Debug, Clone)]
pub struct EventMatcher {
    contract_address: Address,
    // Every non-anonymous overload sharing the configured name
    events: Vec<CompiledEvent>,
    argument_name: String,
}

impl EventMatcher {
    pub fn compile(condition: &EventCondition, user: &EventUserRule) -> Result<Self, ConfigError> {
        let abi: JsonAbi = serde_json::from_str(&condition.contract_interface)
            .map_err(|e| ConfigError::InvalidAbi(e.to_string()))?;

        let overloads = abi
            .event(&condition.event_name)
            .filter(|overloads| !overloads.is_empty())
            .ok_or_else(|| ConfigError::UnknownEvent(condition.event_name.clone()))?;

        let events = overloads
            .iter()
            .filter(|event| !event.anonymous)
            .map(CompiledEvent::compile)
            .collect::<Result<Vec<_>, _>>()?;

        if events.is_empty() {
            return Err(ConfigError::AnonymousEvent {
                event: condition.event_name.clone(),
            });
        }

        let declares_argument = events.iter().any(|compiled| {
            compiled
                .event
                .inputs
                .iter()
                .any(|param| param.name == user.argument_name)
        });
        if !declares_argument {
            return Err(ConfigError::UnknownArgument {
                event: condition.event_name.clone(),
                arg: user.argument_name.clone(),
            });
        }

        Ok(Self {
            contract_address: condition.contract_address,
            events,
            argument_name: user.argument_name.clone(),
        })
    }

    pub fn contract_address(&self) -> Address {
        self.contract_address
    }

    pub fn selectors(&self) -> impl Iterator<Item = B256> + '_ {
        self.events.iter().map(|compiled| compiled.selector)
    }

    fn matching_event(&self, log: &Log) -> Option<&CompiledEvent> {
        if log.address != self.contract_address {
            return None;
        }
        let signature = log.signature()?;
        self.events
            .iter()
            .find(|compiled| compiled.selector == *signature)
    }

    pub fn matches(&self, log: &Log) -> bool {
        self.matching_event(log).is_some()
    }

    /// Decodes a log, or returns `Ok(None)` when the log does not match.
    pub fn decode(&self, log: &Log) -> Result<Option<DecodedEvent>, DecodeError> {
        self.matching_event(log)
            .map(|compiled| compiled.decode(log))
            .transpose()
    }

    pub fn extract_user(&self, log: &Log) -> Result<Option<Address>, DecodeError> {
        match self.decode(log)? {
            Some(decoded) => decoded.address(&self.argument_name),
            None => Ok(None),
        }
    }
}

/// Candidate users for a window of logs, in log order and not deduplicated.
pub fn extract_users_from_logs(
    matcher: &EventMatcher,
    logs: &[Log],
) -> Result<Vec<Address>, DecodeError> {
    let mut users = Vec::new();
    for log in logs {
        if let Some(user) = matcher.extract_user(log)? {
            users.push(user);
        }
    }
    Ok(users)
}
