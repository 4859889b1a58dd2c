//! Contains the [Scenario] definition, the fork-independent description of a test.

use crate::{
    error::ForkError,
    fixture::TransactionException,
    forks::{Fork, ForkChain, ForkRules},
    types::{into_alloc, AccountSpec, Alloc, Transaction, Withdrawal},
};
use alloy_primitives::{address, Address, B256, U256};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt::Display};

/// Seconds between consecutive blocks unless a block overrides its timestamp.
pub(crate) const BLOCK_TIME: u64 = 12;

/// The contents of a filler file.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct ScenarioFile {
    #[serde(default)]
    pub(crate) scenario: Vec<Scenario>,
}

/// A protocol-level test, written once and filled for every applicable fork.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub(crate) struct Scenario {
    /// Unique identifier within the filler file.
    pub(crate) id: String,
    /// Suffix for the fixture's document key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) comment: Option<String>,
    /// The first fork the scenario applies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) valid_from: Option<String>,
    /// The last fork the scenario applies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) valid_until: Option<String>,
    /// EIP sets to fill the scenario with. Empty means the run's default set.
    #[serde(default)]
    pub(crate) variants: Vec<Vec<u64>>,
    #[serde(default)]
    pub(crate) env: ScenarioEnvironment,
    #[serde(default)]
    pub(crate) pre: BTreeMap<Address, AccountSpec>,
    #[serde(default, rename = "block")]
    pub(crate) blocks: Vec<ScenarioBlock>,
}

impl Scenario {
    /// The scenario's own pre-state.
    pub(crate) fn pre_alloc(&self) -> Alloc {
        into_alloc(self.pre.clone())
    }

    /// Whether any part of `fork` falls within the scenario's validity range.
    pub(crate) fn applies_to(&self, chain: &ForkChain, fork: &Fork) -> Result<bool, ForkError> {
        let (first, last) = chain.span(fork.name())?;
        if let Some(from) = &self.valid_from {
            if last < chain.lookup(from)?.position() {
                return Ok(false);
            }
        }
        if let Some(until) = &self.valid_until {
            if first > chain.lookup(until)?.position() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The variants to fill, falling back to `default_eips` when none are declared.
    pub(crate) fn variants(&self, default_eips: &[u64]) -> Vec<Variant> {
        if self.variants.is_empty() {
            vec![Variant::new(default_eips.to_vec())]
        } else {
            self.variants.iter().cloned().map(Variant::new).collect()
        }
    }
}

/// Block environment defaults for a scenario. Fields left out of a filler keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub(crate) struct ScenarioEnvironment {
    pub(crate) coinbase: Address,
    pub(crate) gas_limit: u64,
    /// Timestamp of the genesis block.
    pub(crate) timestamp: u64,
    /// Difficulty used before the Merge.
    pub(crate) difficulty: U256,
    /// RANDAO mix used from the Merge onwards.
    pub(crate) prev_randao: B256,
    /// Base fee of the first block, from London onwards.
    pub(crate) base_fee: U256,
    /// Parent beacon block root, from Cancun onwards.
    pub(crate) parent_beacon_block_root: B256,
}

impl Default for ScenarioEnvironment {
    fn default() -> Self {
        Self {
            coinbase: address!("2adc25665018aa1fe0e6bc666dac8fc2697ff9ba"),
            gas_limit: 100_000_000_000_000_000,
            timestamp: 1_000,
            difficulty: U256::from(0x20000),
            prev_randao: B256::ZERO,
            base_fee: U256::from(7),
            parent_beacon_block_root: B256::ZERO,
        }
    }
}

/// One block of a scenario.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub(crate) struct ScenarioBlock {
    #[serde(default, rename = "tx")]
    pub(crate) txs: Vec<Transaction>,
    #[serde(default)]
    pub(crate) withdrawals: Vec<Withdrawal>,
    /// Overrides the default `genesis + n * BLOCK_TIME` timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) timestamp: Option<u64>,
    /// The rejection the block is expected to provoke.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) expect_exception: Option<TransactionException>,
}

/// A set of optional EIPs activated on top of a fork's baseline rules.
#[derive(Default, Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct Variant {
    /// Sorted, deduplicated EIP numbers.
    pub(crate) eips: Vec<u64>,
}

impl Variant {
    pub(crate) fn new(eips: Vec<u64>) -> Self {
        Self {
            eips: eips.into_iter().sorted().dedup().collect(),
        }
    }

    /// Whether only the fork's baseline rules apply.
    pub(crate) fn is_baseline(&self) -> bool {
        self.eips.is_empty()
    }

    /// The fork name to hand to the transition tool, e.g. `London+3855`.
    pub(crate) fn tool_fork_name(&self, genesis_name: &str) -> String {
        std::iter::once(genesis_name.to_string())
            .chain(self.eips.iter().map(u64::to_string))
            .join("+")
    }
}

impl Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "eips={}", self.eips.iter().join("+"))
    }
}
