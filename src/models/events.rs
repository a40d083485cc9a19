use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{Address, B256, Bytes, I256, U256};

use crate::models::errors::DecodeError;

/// A single decoded event argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventValue {
    Address(Address),
    Uint(U256),
    Int(I256),
    Bool(bool),
    String(String),
    Bytes(Bytes),
    FixedBytes(B256, usize),
    // Indexed non-address argument, kept as its raw topic word
    Topic(B256),
    Array(Vec<EventValue>),
    Tuple(Vec<EventValue>),
}

impl EventValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Address(_) => "address",
            Self::Uint(_) => "uint",
            Self::Int(_) => "int",
            Self::Bool(_) => "bool",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::FixedBytes(..) => "fixed bytes",
            Self::Topic(_) => "topic",
            Self::Array(_) => "array",
            Self::Tuple(_) => "tuple",
        }
    }
}

impl From<DynSolValue> for EventValue {
    fn from(value: DynSolValue) -> Self {
        match value {
            DynSolValue::Address(address) => Self::Address(address),
            DynSolValue::Uint(value, _) => Self::Uint(value),
            DynSolValue::Int(value, _) => Self::Int(value),
            DynSolValue::Bool(value) => Self::Bool(value),
            DynSolValue::String(value) => Self::String(value),
            DynSolValue::Bytes(value) => Self::Bytes(value.into()),
            DynSolValue::FixedBytes(word, size) => Self::FixedBytes(word, size),
            DynSolValue::Function(function) => Self::Bytes(Bytes::copy_from_slice(function.as_slice())),
            DynSolValue::Array(values) | DynSolValue::FixedArray(values) => {
                Self::Array(values.into_iter().map(Into::into).collect())
            }
            DynSolValue::Tuple(values) => Self::Tuple(values.into_iter().map(Into::into).collect()),
        }
    }
}

/// Event arguments by name, in the order the contract interface declares them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedEvent {
    args: Vec<(String, EventValue)>,
}

impl DecodedEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            args: Vec::with_capacity(capacity),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: EventValue) {
        let name = name.into();
        match self.args.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = value,
            None => self.args.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&EventValue> {
        self.args
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }

    /// Address-typed accessor. `Ok(None)` when the argument is absent; an error when it exists
    /// with a different type.
    pub fn address(&self, name: &str) -> Result<Option<Address>, DecodeError> {
        match self.get(name) {
            None => Ok(None),
            Some(EventValue::Address(address)) => Ok(Some(*address)),
            Some(other) => Err(DecodeError::TypeMismatch {
                name: name.to_string(),
                expected: "address",
                found: other.type_name(),
            }),
        }
    }

    pub fn uint(&self, name: &str) -> Result<Option<U256>, DecodeError> {
        match self.get(name) {
            None => Ok(None),
            Some(EventValue::Uint(value)) => Ok(Some(*value)),
            Some(other) => Err(DecodeError::TypeMismatch {
                name: name.to_string(),
                expected: "uint",
                found: other.type_name(),
            }),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EventValue)> {
        self.args.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}
