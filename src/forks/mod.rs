//! The fork capability model.
//!
//! Every protocol upgrade is a [ForkSpec] declaring only what it changes relative to its
//! predecessor. The [ForkChain] orders them and resolves names, and [TransitionFork]s switch
//! from one fork's rules to the next at a block number or timestamp.

use alloy_primitives::{Address, U256};
use std::{fmt::Debug, sync::Arc};

use crate::types::Alloc;

mod chain;
mod spec;
mod transition;

pub(crate) use chain::ForkChain;
pub(crate) use spec::{ForkDelta, ForkSpec};
pub(crate) use transition::{Activation, TransitionFork};

/// A resolved fork, plain or transitional.
pub(crate) type Fork = Arc<dyn ForkRules + Send + Sync>;

/// Rule queries answerable by any fork.
///
/// Every query is a pure function of `(block_number, timestamp)`.
pub(crate) trait ForkRules: Debug {
    /// The canonical name of the fork.
    fn name(&self) -> &str;

    /// The name under which the fork is presented to the transition tool.
    fn genesis_name(&self, block_number: u64, timestamp: u64) -> String;

    /// Legal transaction types, most recently introduced first.
    fn tx_types(&self, block_number: u64, timestamp: u64) -> Vec<u8>;

    /// Active precompile addresses, most recently introduced first.
    fn precompiles(&self, block_number: u64, timestamp: u64) -> Vec<Address>;

    /// The header shape blocks must have.
    fn header_shape(&self, block_number: u64, timestamp: u64) -> HeaderShape;

    /// The block reward in wei.
    fn block_reward(&self, block_number: u64, timestamp: u64) -> U256;

    /// The `engine_newPayload` version, or `None` if blocks cannot be imported through the
    /// engine API.
    fn engine_payload_version(&self, block_number: u64, timestamp: u64) -> Option<u64>;

    /// The `engine_forkchoiceUpdated` version.
    fn engine_forkchoice_version(&self, block_number: u64, timestamp: u64) -> Option<u64>;

    /// Whether `engine_newPayload` carries blob versioned hashes.
    fn engine_payload_blob_hashes(&self, block_number: u64, timestamp: u64) -> bool;

    /// Whether `engine_newPayload` carries the parent beacon block root.
    fn engine_payload_beacon_root(&self, block_number: u64, timestamp: u64) -> bool;

    /// Accounts that must exist in the pre-state.
    fn pre_allocation(&self, block_number: u64, timestamp: u64) -> Alloc;

    /// Whether the fork is live on mainnet.
    fn is_deployed(&self) -> bool;
}

/// The header fields a fork requires. A field that is not required is forbidden.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HeaderShape {
    pub(crate) base_fee: bool,
    pub(crate) prev_randao: bool,
    pub(crate) zero_difficulty: bool,
    pub(crate) withdrawals: bool,
    pub(crate) excess_blob_gas: bool,
    pub(crate) blob_gas_used: bool,
    pub(crate) beacon_root: bool,
}
