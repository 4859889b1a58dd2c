//! An in-process [TransitionTool] for tests.

use super::{Rejection, ToolOutput, ToolRequest, ToolResult, TransitionTool};
use crate::{error::FillError, fixture::TransactionException};
use alloy_genesis::GenesisAccount;
use alloy_primitives::{Address, Bytes, B256, U256, U64};
use async_trait::async_trait;
use std::{path::Path, sync::Mutex, time::Duration};

/// Echoes the environment back as header fields and rejects transactions with too little gas.
#[derive(Default)]
pub(crate) struct MockTool {
    pub(crate) requests: Mutex<Vec<ToolRequest>>,
    /// Leave the base fee out of every result.
    pub(crate) drop_base_fee: bool,
    /// Fail every invocation for this tool fork name.
    pub(crate) fail_fork: Option<String>,
    /// Hold every invocation for this tool fork name.
    pub(crate) slow_fork: Option<(String, Duration)>,
}

impl MockTool {
    /// The block invocations so far, leaving out genesis state root queries.
    pub(crate) fn requests(&self) -> Vec<ToolRequest> {
        self.calls()
            .into_iter()
            .filter(|r| r.input.env.current_number > U64::ZERO)
            .collect()
    }

    /// Every invocation so far.
    pub(crate) fn calls(&self) -> Vec<ToolRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransitionTool for MockTool {
    async fn version(&self) -> Result<String, FillError> {
        Ok("mock-t8n/1.0".into())
    }

    async fn evaluate(&self, request: &ToolRequest, workdir: &Path) -> Result<ToolOutput, FillError> {
        assert!(workdir.exists());
        self.requests.lock().unwrap().push(request.clone());

        if let Some((fork, delay)) = &self.slow_fork {
            if request.fork_name == *fork {
                tokio::time::sleep(*delay).await;
            }
        }
        if self.fail_fork.as_deref() == Some(request.fork_name.as_str()) {
            return Err(FillError::ToolInvocation(format!("{} is broken", request.fork_name)));
        }

        let env = &request.input.env;
        let rejected = request
            .input
            .txs
            .iter()
            .enumerate()
            .filter(|(_, tx)| tx.gas_limit < U64::from(21_000))
            .map(|(index, _)| Rejection {
                index,
                kind: TransactionException::IntrinsicGasTooLow,
                message: "intrinsic gas too low".into(),
            })
            .collect();

        // Leave a trace of every block in the post-state.
        let mut alloc = request.input.alloc.clone();
        alloc.insert(
            Address::with_last_byte(env.current_number.to::<u8>()),
            GenesisAccount {
                balance: U256::from(1),
                ..Default::default()
            },
        );

        Ok(ToolOutput {
            alloc,
            result: ToolResult {
                state_root: B256::with_last_byte(1),
                gas_used: U64::from(21_000),
                current_difficulty: env.current_difficulty,
                current_base_fee: if self.drop_base_fee { None } else { env.current_base_fee },
                withdrawals_root: env.withdrawals.as_ref().map(|_| B256::with_last_byte(2)),
                current_excess_blob_gas: env.parent_excess_blob_gas.map(|_| U64::ZERO),
                blob_gas_used: env.parent_blob_gas_used.map(|_| U64::ZERO),
                ..Default::default()
            },
            rejected,
            body: Bytes::from_static(&[0xc0]),
        })
    }
}
