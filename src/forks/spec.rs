//! Contains the [ForkSpec], a single protocol version linked to its predecessor.

use super::{ForkRules, HeaderShape};
use crate::{
    error::ForkError,
    types::{into_alloc, AccountSpec, Alloc},
};
use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, iter, sync::Arc};

/// What a fork changes relative to its predecessor, as written in the definitions file.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub(crate) struct ForkDelta {
    /// The canonical fork name.
    pub(crate) name: String,
    /// The name to present to the transition tool instead of `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) genesis_name: Option<String>,
    /// Skip this fork in ranges unless it is named explicitly.
    #[serde(default)]
    pub(crate) ignored: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) deployed: Option<bool>,
    /// Replaces the inherited block reward.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) block_reward: Option<u64>,
    /// Transaction types introduced by this fork.
    #[serde(default)]
    pub(crate) tx_types: Vec<u8>,
    /// Precompile indices introduced by this fork.
    #[serde(default)]
    pub(crate) precompiles: Vec<u64>,
    #[serde(default)]
    pub(crate) header: HeaderDelta,
    #[serde(default)]
    pub(crate) engine: EngineDelta,
    /// Accounts this fork requires in the pre-state.
    #[serde(default)]
    pub(crate) pre_allocation: BTreeMap<Address, AccountSpec>,
}

/// Header requirements set by a fork. `None` inherits.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub(crate) struct HeaderDelta {
    pub(crate) base_fee: Option<bool>,
    pub(crate) prev_randao: Option<bool>,
    pub(crate) zero_difficulty: Option<bool>,
    pub(crate) withdrawals: Option<bool>,
    pub(crate) excess_blob_gas: Option<bool>,
    pub(crate) blob_gas_used: Option<bool>,
    pub(crate) beacon_root: Option<bool>,
}

/// Engine API changes made by a fork. `None` inherits.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub(crate) struct EngineDelta {
    pub(crate) new_payload: Option<u64>,
    pub(crate) forkchoice_updated: Option<u64>,
    pub(crate) blob_hashes: Option<bool>,
    pub(crate) beacon_root: Option<bool>,
}

type Rule = (&'static str, fn(&ForkDelta) -> Option<bool>);

/// Boolean rules that may be switched on by a fork but never switched off again.
fn monotonic_rules() -> [Rule; 9] {
    [
        ("header base fee", |d| d.header.base_fee),
        ("header prev randao", |d| d.header.prev_randao),
        ("header zero difficulty", |d| d.header.zero_difficulty),
        ("header withdrawals", |d| d.header.withdrawals),
        ("header excess blob gas", |d| d.header.excess_blob_gas),
        ("header blob gas used", |d| d.header.blob_gas_used),
        ("header beacon root", |d| d.header.beacon_root),
        ("engine payload blob hashes", |d| d.engine.blob_hashes),
        ("engine payload beacon root", |d| d.engine.beacon_root),
    ]
}

/// An immutable protocol version. Accumulating queries walk the ancestry at call time.
#[derive(Debug)]
pub(crate) struct ForkSpec {
    /// Index of the fork within its chain.
    position: usize,
    /// The changes this fork introduces.
    delta: ForkDelta,
    /// The fork this one builds upon, `None` for the root.
    parent: Option<Arc<ForkSpec>>,
}

impl ForkSpec {
    /// Creates a new [ForkSpec] on top of `parent`, rejecting definitions that would undo an
    /// inherited rule.
    pub(crate) fn new(delta: ForkDelta, parent: Option<Arc<ForkSpec>>) -> Result<Self, ForkError> {
        match parent.as_deref() {
            None => {
                if delta.block_reward.is_none() {
                    return Err(ForkError::MissingBaseValue {
                        fork: delta.name.clone(),
                        field: "block-reward",
                    });
                }
            }
            Some(parent) => {
                for (rule, select) in monotonic_rules() {
                    if select(&delta) == Some(false) && parent.rule(select) {
                        return Err(ForkError::NonMonotonic {
                            fork: delta.name.clone(),
                            rule,
                        });
                    }
                }
                if let (Some(version), Some(inherited)) =
                    (delta.engine.new_payload, parent.engine_payload_version(0, 0))
                {
                    if version <= inherited {
                        return Err(ForkError::NonMonotonic {
                            fork: delta.name.clone(),
                            rule: "engine payload version",
                        });
                    }
                }
            }
        }

        Ok(Self {
            position: parent.as_ref().map_or(0, |p| p.position + 1),
            delta,
            parent,
        })
    }

    /// Position of the fork within its chain; the root is `0`.
    pub(crate) fn position(&self) -> usize {
        self.position
    }

    /// The fork this one builds upon.
    pub(crate) fn parent(&self) -> Option<&Arc<ForkSpec>> {
        self.parent.as_ref()
    }

    /// Whether the fork is skipped in ranges unless named explicitly.
    pub(crate) fn is_ignored(&self) -> bool {
        self.delta.ignored
    }

    /// Whether this fork's rules apply at or after `other`, by chain position.
    pub(crate) fn at_or_after(&self, other: &ForkSpec) -> bool {
        self.position >= other.position
    }

    /// This fork followed by all of its ancestors, nearest first.
    fn ancestry(&self) -> impl Iterator<Item = &ForkSpec> {
        iter::successors(Some(self), |fork| fork.parent.as_deref())
    }

    /// The value declared by the nearest fork in the ancestry that declares one.
    fn inherit<T>(&self, select: impl Fn(&ForkDelta) -> Option<T>) -> Option<T> {
        self.ancestry().find_map(|fork| select(&fork.delta))
    }

    /// An inherited boolean rule; `false` unless some ancestor switched it on.
    fn rule(&self, select: fn(&ForkDelta) -> Option<bool>) -> bool {
        self.inherit(select).unwrap_or_default()
    }
}

impl ForkRules for ForkSpec {
    fn name(&self) -> &str {
        &self.delta.name
    }

    fn genesis_name(&self, _block_number: u64, _timestamp: u64) -> String {
        self.delta
            .genesis_name
            .clone()
            .unwrap_or_else(|| self.delta.name.clone())
    }

    fn tx_types(&self, _block_number: u64, _timestamp: u64) -> Vec<u8> {
        self.ancestry()
            .flat_map(|fork| fork.delta.tx_types.iter().copied())
            .collect()
    }

    fn precompiles(&self, _block_number: u64, _timestamp: u64) -> Vec<Address> {
        self.ancestry()
            .flat_map(|fork| fork.delta.precompiles.iter())
            .map(|index| Address::from_word(B256::from(U256::from(*index))))
            .collect()
    }

    fn header_shape(&self, _block_number: u64, _timestamp: u64) -> HeaderShape {
        HeaderShape {
            base_fee: self.rule(|d| d.header.base_fee),
            prev_randao: self.rule(|d| d.header.prev_randao),
            zero_difficulty: self.rule(|d| d.header.zero_difficulty),
            withdrawals: self.rule(|d| d.header.withdrawals),
            excess_blob_gas: self.rule(|d| d.header.excess_blob_gas),
            blob_gas_used: self.rule(|d| d.header.blob_gas_used),
            beacon_root: self.rule(|d| d.header.beacon_root),
        }
    }

    fn block_reward(&self, _block_number: u64, _timestamp: u64) -> U256 {
        // The root is guaranteed to define a reward at construction.
        U256::from(self.inherit(|d| d.block_reward).unwrap_or_default())
    }

    fn engine_payload_version(&self, _block_number: u64, _timestamp: u64) -> Option<u64> {
        self.inherit(|d| d.engine.new_payload)
    }

    fn engine_forkchoice_version(&self, block_number: u64, timestamp: u64) -> Option<u64> {
        self.inherit(|d| d.engine.forkchoice_updated)
            .or_else(|| self.engine_payload_version(block_number, timestamp))
    }

    fn engine_payload_blob_hashes(&self, _block_number: u64, _timestamp: u64) -> bool {
        self.rule(|d| d.engine.blob_hashes)
    }

    fn engine_payload_beacon_root(&self, _block_number: u64, _timestamp: u64) -> bool {
        self.rule(|d| d.engine.beacon_root)
    }

    fn pre_allocation(&self, _block_number: u64, _timestamp: u64) -> Alloc {
        let lineage = self.ancestry().collect::<Vec<_>>();
        lineage.into_iter().rev().fold(Alloc::new(), |mut alloc, fork| {
            alloc.extend(into_alloc(fork.delta.pre_allocation.clone()));
            alloc
        })
    }

    fn is_deployed(&self) -> bool {
        self.inherit(|d| d.deployed).unwrap_or(true)
    }
}
