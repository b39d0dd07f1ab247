//! Method, event and revert decoding against a [`ContractAbi`].
//!
//! Decoding never fails loudly: an unknown selector yields `None`, and a
//! selector that matches but whose payload does not unpack yields the named
//! item with empty parameters. Callers that want a record for every call or
//! log use [`decode_call_or_raw`] and [`decode_log_or_raw`], which fall back
//! to [`ContractAbi::standard`] and finally to an unnamed raw entry.

use alloy::dyn_abi::{DynSolType, DynSolValue, JsonAbiExt, Specifier};
use alloy::json_abi::{Event, EventParam, Param};
use alloy::primitives::{Address, Bytes, Selector, B256};
use lens_data::types::{selector_of, Log};
use serde::Serialize;

use crate::abi::ContractAbi;
use crate::classify::{classify, indexed_addresses, Action};
use crate::value::{canonical_word, param_name, ParamValue, Params};

/// A decoded method call or revert.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DecodedCall {
    /// Called contract (or the sender account for user operations).
    pub contract: Address,
    pub selector: Selector,
    /// Method name, `None` when no ABI or signature hint matched.
    pub name: Option<String>,
    /// Canonical signature such as `transfer(address,uint256)`.
    pub signature: Option<String>,
    pub parameters: Params,
}

impl DecodedCall {
    fn raw(contract: Address, selector: [u8; 4]) -> Self {
        Self {
            contract,
            selector: Selector::from(selector),
            name: None,
            signature: None,
            parameters: Params::new(),
        }
    }

    /// Fills name and signature from a textual signature like `transfer(address,uint256)`.
    pub fn apply_hint(&mut self, signature: &str) {
        if self.name.is_some() {
            return;
        }
        let name = signature.split('(').next().unwrap_or(signature);
        self.name = Some(name.to_string());
        self.signature = Some(signature.to_string());
    }
}

/// A decoded event log.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DecodedEvent {
    /// Log index within the block.
    pub index: u64,
    /// Emitting contract.
    pub address: Address,
    pub topic0: B256,
    pub name: Option<String>,
    pub signature: Option<String>,
    pub parameters: Params,
    /// Transfer semantics derived from topic0 and the from/to addresses.
    pub action: Action,
}

impl DecodedEvent {
    /// Fills name and signature from a textual event signature.
    pub fn apply_hint(&mut self, signature: &str) {
        if self.name.is_some() {
            return;
        }
        let name = signature.split('(').next().unwrap_or(signature);
        self.name = Some(name.to_string());
        self.signature = Some(signature.to_string());
    }
}

/// Decodes call data against `abi`.
///
/// `None` when `data` is shorter than a selector or the selector is unknown.
pub fn decode_method(abi: &ContractAbi, contract: Address, data: &[u8]) -> Option<DecodedCall> {
    let selector = selector_of(data)?;
    let function = abi.function(selector)?;

    let mut call = DecodedCall::raw(contract, selector);
    call.name = Some(function.name.clone());
    call.signature = Some(function.signature());

    match function.abi_decode_input(&data[4..], false) {
        Ok(values) => call.parameters = named_params(&function.inputs, values),
        Err(e) => tracing::debug!(
            %contract,
            method = %function.name,
            error = %e,
            "selector matched but call data did not decode"
        ),
    }
    Some(call)
}

/// Decodes revert data against the errors declared in `abi`.
pub fn decode_error(abi: &ContractAbi, contract: Address, data: &[u8]) -> Option<DecodedCall> {
    let selector = selector_of(data)?;
    let error = abi.error(selector)?;

    let mut call = DecodedCall::raw(contract, selector);
    call.name = Some(error.name.clone());
    call.signature = Some(error.signature());

    match error.abi_decode_input(&data[4..], false) {
        Ok(values) => call.parameters = named_params(&error.inputs, values),
        Err(e) => tracing::debug!(%contract, error_name = %error.name, error = %e, "revert data did not decode"),
    }
    Some(call)
}

/// Decodes a log against `abi`.
///
/// Indexed inputs are read from `topics[1..]` in declaration order; a missing
/// topic leaves that parameter out. Non-indexed inputs are unpacked from the
/// data payload. `None` when the log has no topics or topic0 is unknown.
pub fn decode_event(abi: &ContractAbi, log: &Log) -> Option<DecodedEvent> {
    let topic0 = log.topic0()?;
    let indexed = &log.topics[1..];
    let event = abi.event(topic0, indexed.len())?;

    let parameters = event_params(event, indexed, &log.data);
    let action = classify(topic0, &indexed_addresses(indexed), &parameters);

    Some(DecodedEvent {
        index: log.index,
        address: log.address,
        topic0,
        name: Some(event.name.clone()),
        signature: Some(event.signature()),
        parameters,
        action,
    })
}

/// [`decode_method`] against `abi`, then the standard ABIs, then a raw entry.
///
/// `None` only when `data` is shorter than a selector.
pub fn decode_call_or_raw(
    abi: Option<&ContractAbi>,
    contract: Address,
    data: &[u8],
) -> Option<DecodedCall> {
    let selector = selector_of(data)?;
    abi.and_then(|abi| decode_method(abi, contract, data))
        .or_else(|| decode_method(ContractAbi::standard(), contract, data))
        .or_else(|| Some(DecodedCall::raw(contract, selector)))
}

/// [`decode_error`] against `abi`, then the standard `Error(string)` and `Panic(uint256)`.
pub fn decode_revert(abi: Option<&ContractAbi>, contract: Address, data: &[u8]) -> Option<DecodedCall> {
    abi.and_then(|abi| decode_error(abi, contract, data))
        .or_else(|| decode_error(ContractAbi::standard(), contract, data))
}

/// [`decode_event`] against `abi`, then the standard ABIs, then a raw entry
/// that still carries the log's transfer action.
///
/// `None` only for logs without topics.
pub fn decode_log_or_raw(abi: Option<&ContractAbi>, log: &Log) -> Option<DecodedEvent> {
    let topic0 = log.topic0()?;
    abi.and_then(|abi| decode_event(abi, log))
        .or_else(|| decode_event(ContractAbi::standard(), log))
        .or_else(|| {
            let indexed = &log.topics[1..];
            let parameters = Params::new();
            let action = classify(topic0, &indexed_addresses(indexed), &parameters);
            Some(DecodedEvent {
                index: log.index,
                address: log.address,
                topic0,
                name: None,
                signature: None,
                parameters,
                action,
            })
        })
}

fn named_params(inputs: &[Param], values: Vec<DynSolValue>) -> Params {
    let mut params = Params::new();
    for (idx, (input, value)) in inputs.iter().zip(values).enumerate() {
        params.push(param_name(&input.name, idx), ParamValue::from_sol(value));
    }
    params
}

fn event_params(event: &Event, indexed: &[B256], data: &Bytes) -> Params {
    let body_types: Result<Vec<DynSolType>, _> = event
        .inputs
        .iter()
        .filter(|input| !input.indexed)
        .map(|input| input.resolve())
        .collect();

    let mut body = match body_types {
        Ok(types) if types.is_empty() => Vec::new(),
        Ok(types) => match DynSolType::Tuple(types).abi_decode_sequence(data) {
            Ok(DynSolValue::Tuple(values)) => values,
            Ok(_) => Vec::new(),
            Err(e) => {
                tracing::debug!(event = %event.name, error = %e, "event data did not decode");
                Vec::new()
            }
        },
        Err(e) => {
            tracing::debug!(event = %event.name, error = %e, "event declares an unresolvable type");
            Vec::new()
        }
    }
    .into_iter();

    let mut topics = indexed.iter();
    let mut params = Params::new();
    for (idx, input) in event.inputs.iter().enumerate() {
        let value = if input.indexed {
            topics.next().map(|topic| topic_value(input, *topic))
        } else {
            body.next().map(ParamValue::from_sol)
        };
        if let Some(value) = value {
            params.push(param_name(&input.name, idx), value);
        }
    }
    params
}

/// Decodes a single indexed topic. Dynamic types are stored as their hash.
fn topic_value(input: &EventParam, topic: B256) -> ParamValue {
    let Ok(ty) = input.resolve() else {
        return canonical_word(topic);
    };
    match ty {
        DynSolType::String
        | DynSolType::Bytes
        | DynSolType::Array(_)
        | DynSolType::FixedArray(..)
        | DynSolType::Tuple(_) => canonical_word(topic),
        ty => ty
            .abi_decode(topic.as_slice())
            .map(ParamValue::from_sol)
            .unwrap_or_else(|_| canonical_word(topic)),
    }
}
