// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Custody contract ABI and channel identity derivation.
//!
//! The channel id is a pure function of the channel tuple:
//! `keccak256(abi.encode(participants[2], adjudicator, challenge, nonce))`.

use alloy::primitives::{keccak256, Address, B256, Bytes, U256};
use alloy::sol;
use alloy::sol_types::{SolCall, SolValue};
use serde::{Deserialize, Serialize};

use crate::error::WalletError;

sol! {
    /// Funds assigned to one participant slot.
    struct Allocation {
        uint256 index;
        uint256 amount;
    }

    /// Channel state as submitted on-chain.
    struct State {
        uint8 intent;
        uint64 version;
        bytes data;
        Allocation[] allocations;
    }

    interface ICustody {
        function create(bytes32 channelId, State state, bytes[] sigs) external;
        function resize(bytes32 channelId, State state, bytes[] sigs) external;
        function close(bytes32 channelId, State state, bytes[] sigs) external;
    }
}

/// Role of a channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StateIntent {
    Initialize,
    Operate,
    Resize,
    Finalize,
}

impl StateIntent {
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Initialize => 0,
            Self::Operate => 1,
            Self::Resize => 2,
            Self::Finalize => 3,
        }
    }
}

/// Immutable channel definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTuple {
    pub participants: [Address; 2],
    pub adjudicator: Address,
    pub challenge: U256,
    pub nonce: U256,
}

impl ChannelTuple {
    /// Derive the channel id. Identical tuples always produce identical ids.
    pub fn channel_id(&self) -> B256 {
        let encoded = (
            self.participants,
            self.adjudicator,
            self.challenge,
            self.nonce,
        )
            .abi_encode_params();
        keccak256(encoded)
    }
}

/// One allocation row of a channel state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationEntry {
    pub index: U256,
    pub amount: U256,
}

/// Channel state in domain form, convertible to the ABI struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelState {
    pub intent: StateIntent,
    pub version: u64,
    pub data: Bytes,
    pub allocations: Vec<AllocationEntry>,
}

impl ChannelState {
    /// Initial state for a freshly negotiated channel: `INITIALIZE`,
    /// version 0, empty data, the deposit in slot 0 and zero in slot 1.
    pub fn initial(deposit: U256) -> Self {
        Self {
            intent: StateIntent::Initialize,
            version: 0,
            data: Bytes::new(),
            allocations: vec![
                AllocationEntry {
                    index: U256::ZERO,
                    amount: deposit,
                },
                AllocationEntry {
                    index: U256::from(1u64),
                    amount: U256::ZERO,
                },
            ],
        }
    }

    fn to_abi(&self) -> State {
        State {
            intent: self.intent.as_u8(),
            version: self.version,
            data: self.data.clone(),
            allocations: self
                .allocations
                .iter()
                .map(|entry| Allocation {
                    index: entry.index,
                    amount: entry.amount,
                })
                .collect(),
        }
    }
}

/// Encode a `create(channelId, state, sigs)` call.
pub fn encode_create(channel_id: B256, state: &ChannelState, sigs: Vec<Bytes>) -> Vec<u8> {
    ICustody::createCall {
        channelId: channel_id,
        state: state.to_abi(),
        sigs,
    }
    .abi_encode()
}

/// Encode a `resize(channelId, state, sigs)` call.
pub fn encode_resize(channel_id: B256, state: &ChannelState, sigs: Vec<Bytes>) -> Vec<u8> {
    ICustody::resizeCall {
        channelId: channel_id,
        state: state.to_abi(),
        sigs,
    }
    .abi_encode()
}

/// Encode a `close(channelId, state, sigs)` call.
pub fn encode_close(channel_id: B256, state: &ChannelState, sigs: Vec<Bytes>) -> Vec<u8> {
    ICustody::closeCall {
        channelId: channel_id,
        state: state.to_abi(),
        sigs,
    }
    .abi_encode()
}

/// Decode a 0x-prefixed hex signature into calldata bytes.
pub fn signature_bytes(hex: &str) -> Result<Bytes, WalletError> {
    let stripped = hex.strip_prefix("0x").unwrap_or(hex);
    alloy::hex::decode(stripped)
        .map(Bytes::from)
        .map_err(|e| WalletError::internal(format!("malformed signature from clearing node: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn tuple() -> ChannelTuple {
        ChannelTuple {
            participants: [
                Address::from_str("0x1111111111111111111111111111111111111111").unwrap(),
                Address::from_str("0x2222222222222222222222222222222222222222").unwrap(),
            ],
            adjudicator: Address::from_str("0x3333333333333333333333333333333333333333").unwrap(),
            challenge: U256::from(3600u64),
            nonce: U256::from(7u64),
        }
    }

    #[test]
    fn channel_id_is_a_pure_function_of_the_tuple() {
        assert_eq!(tuple().channel_id(), tuple().channel_id());

        let mut other = tuple();
        other.nonce = U256::from(8u64);
        assert_ne!(tuple().channel_id(), other.channel_id());

        let mut swapped = tuple();
        swapped.participants.swap(0, 1);
        assert_ne!(tuple().channel_id(), swapped.channel_id());
    }

    #[test]
    fn initial_state_shape() {
        let state = ChannelState::initial(U256::from(10_000_000u64));
        assert_eq!(state.intent, StateIntent::Initialize);
        assert_eq!(state.version, 0);
        assert!(state.data.is_empty());
        assert_eq!(state.allocations.len(), 2);
        assert_eq!(state.allocations[0].amount, U256::from(10_000_000u64));
        assert_eq!(state.allocations[1].amount, U256::ZERO);
    }

    #[test]
    fn create_calldata_roundtrips() {
        let state = ChannelState::initial(U256::from(5u64));
        let id = tuple().channel_id();
        let sigs = vec![Bytes::from(vec![1u8; 65]), Bytes::from(vec![2u8; 65])];

        let calldata = encode_create(id, &state, sigs.clone());
        let decoded = ICustody::createCall::abi_decode(&calldata).unwrap();
        assert_eq!(decoded.channelId, id);
        assert_eq!(decoded.state.intent, 0);
        assert_eq!(decoded.state.version, 0);
        assert_eq!(decoded.state.allocations.len(), 2);
        assert_eq!(decoded.sigs, sigs);
    }

    #[test]
    fn intent_parses_from_wire_strings() {
        let intent: StateIntent = serde_json::from_str("\"RESIZE\"").unwrap();
        assert_eq!(intent, StateIntent::Resize);
        assert_eq!(intent.as_u8(), 2);
    }

    #[test]
    fn signature_bytes_strips_prefix() {
        let bytes = signature_bytes("0x0102").unwrap();
        assert_eq!(bytes.as_ref(), &[1u8, 2u8]);
        assert!(signature_bytes("0xzz").is_err());
    }
}
