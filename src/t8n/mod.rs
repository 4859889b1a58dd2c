//! Contains the [TransitionTool] trait, which defines the interface for the external state
//! transition engine.

use crate::{
    error::FillError,
    fixture::TransactionException,
    types::{Alloc, Environment, Transaction},
};
use alloy_primitives::{Bloom, Bytes, B256, U256, U64};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub(crate) mod evm;
#[cfg(test)]
pub(crate) mod mock;

/// The minimal interface for a state transition tool.
#[async_trait]
pub(crate) trait TransitionTool {
    /// Returns the version string of the tool, recorded in every fixture.
    async fn version(&self) -> Result<String, FillError>;

    /// Applies one block of transactions to a pre-state.
    ///
    /// ## Takes
    /// - `request` - The fork, pre-state, transactions and environment of the block.
    /// - `workdir` - A scratch directory owned by this invocation alone.
    ///
    /// ## Returns
    /// - `Result<ToolOutput, FillError>` - The post-state and computed header fields. Rejected
    ///   transactions are reported in the output, not as an error.
    async fn evaluate(&self, request: &ToolRequest, workdir: &Path)
        -> Result<ToolOutput, FillError>;
}

/// A single invocation of the transition tool.
#[derive(Debug, Clone)]
pub(crate) struct ToolRequest {
    /// The fork name as the tool expects it, including any EIP suffixes.
    pub(crate) fork_name: String,
    pub(crate) chain_id: u64,
    /// The block reward in wei.
    pub(crate) reward: U256,
    /// Whether to collect execution traces.
    pub(crate) trace: bool,
    pub(crate) input: ToolInput,
    /// Where to dump the raw input and output of this invocation, if anywhere.
    pub(crate) dump_dir: Option<PathBuf>,
}

/// The document written to the tool's stdin.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ToolInput {
    pub(crate) alloc: Alloc,
    pub(crate) txs: Vec<Transaction>,
    pub(crate) env: Environment,
}

/// What the tool computed for one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ToolOutput {
    /// The post-state.
    pub(crate) alloc: Alloc,
    /// The computed header fields.
    pub(crate) result: ToolResult,
    /// Transactions the tool refused to include.
    pub(crate) rejected: Vec<Rejection>,
    /// The RLP list of the signed transactions the tool included.
    pub(crate) body: Bytes,
}

/// Header fields computed by the tool. Fork-dependent fields are absent when the tool did not
/// report them.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ToolResult {
    pub(crate) state_root: B256,
    pub(crate) tx_root: B256,
    pub(crate) receipts_root: B256,
    pub(crate) logs_bloom: Bloom,
    pub(crate) gas_used: U64,
    #[serde(default)]
    pub(crate) current_difficulty: Option<U256>,
    #[serde(default)]
    pub(crate) current_base_fee: Option<U256>,
    #[serde(default)]
    pub(crate) withdrawals_root: Option<B256>,
    #[serde(default)]
    pub(crate) current_excess_blob_gas: Option<U64>,
    #[serde(default)]
    pub(crate) blob_gas_used: Option<U64>,
}

/// A transaction the tool refused to include.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Rejection {
    /// Index of the transaction within the block.
    pub(crate) index: usize,
    /// The classified reason.
    pub(crate) kind: TransactionException,
    /// The tool's own message, kept for reporting only.
    pub(crate) message: String,
}
