//! Contains the [TransitionFork], which switches rules at an activation point.

use super::{ForkRules, ForkSpec, HeaderShape};
use crate::types::Alloc;
use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, sync::Arc};

/// The point at which a transition fork switches to its target rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum Activation {
    /// Active from the given block number onwards.
    AtBlock(u64),
    /// Active for blocks with at least the given timestamp.
    AtTimestamp(u64),
}

impl Display for Activation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AtBlock(number) => write!(f, "block {number}"),
            Self::AtTimestamp(time) => write!(f, "timestamp {time}"),
        }
    }
}

impl Activation {
    fn reached(&self, block_number: u64, timestamp: u64) -> bool {
        match self {
            Self::AtBlock(number) => block_number >= *number,
            Self::AtTimestamp(time) => timestamp >= *time,
        }
    }
}

/// A fork that follows `from` until the activation point and `to` afterwards.
#[derive(Debug, Clone)]
pub(crate) struct TransitionFork {
    name: String,
    from: Arc<ForkSpec>,
    to: Arc<ForkSpec>,
    activation: Activation,
}

impl TransitionFork {
    pub(crate) fn new(
        name: String,
        from: Arc<ForkSpec>,
        to: Arc<ForkSpec>,
        activation: Activation,
    ) -> Self {
        Self {
            name,
            from,
            to,
            activation,
        }
    }

    /// The fork in effect before activation.
    pub(crate) fn from(&self) -> &Arc<ForkSpec> {
        &self.from
    }

    /// The fork in effect from activation onwards.
    pub(crate) fn to(&self) -> &Arc<ForkSpec> {
        &self.to
    }

    /// The point at which `to` takes over.
    pub(crate) fn activation(&self) -> Activation {
        self.activation
    }

    /// The fork whose rules apply at the given height.
    fn active(&self, block_number: u64, timestamp: u64) -> &ForkSpec {
        if self.activation.reached(block_number, timestamp) {
            &self.to
        } else {
            &self.from
        }
    }
}

/// Forwards height-dependent queries to whichever side of the transition is active.
macro_rules! delegate_to_active {
    ($($query:ident -> $ret:ty),* $(,)?) => {
        $(
            fn $query(&self, block_number: u64, timestamp: u64) -> $ret {
                self.active(block_number, timestamp).$query(block_number, timestamp)
            }
        )*
    };
}

impl ForkRules for TransitionFork {
    fn name(&self) -> &str {
        &self.name
    }

    delegate_to_active! {
        genesis_name -> String,
        tx_types -> Vec<u8>,
        precompiles -> Vec<Address>,
        header_shape -> HeaderShape,
        block_reward -> U256,
        engine_payload_version -> Option<u64>,
        engine_forkchoice_version -> Option<u64>,
        engine_payload_blob_hashes -> bool,
        engine_payload_beacon_root -> bool,
    }

    fn pre_allocation(&self, block_number: u64, timestamp: u64) -> Alloc {
        // Accounts the target fork relies on must already exist before activation.
        self.to.pre_allocation(block_number, timestamp)
    }

    fn is_deployed(&self) -> bool {
        self.to.is_deployed()
    }
}
