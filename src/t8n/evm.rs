//! Contains the implementation of the [TransitionTool] trait for geth's `evm t8n`.

use super::{Rejection, ToolOutput, ToolRequest, ToolResult, TransitionTool};
use crate::{error::FillError, fixture::TransactionException, types::Alloc, util::run_cmd_with_input};
use alloy_primitives::Bytes;
use async_trait::async_trait;
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{fs, process::Command};
use tracing::{debug, trace};

/// The file in the tool's output directory holding the encoded transaction list.
const BODY_FILE: &str = "txs.rlp";

/// geth's `evm` binary, driven through its `t8n` subcommand over stdin and stdout.
#[derive(Debug, Clone)]
pub(crate) struct EvmTool {
    /// The path to the `evm` binary.
    binary: PathBuf,
    /// The maximum time a single invocation may take.
    timeout: Duration,
}

impl EvmTool {
    /// Create a new [EvmTool] instance.
    pub(crate) fn new(binary: PathBuf, timeout: Duration) -> Self {
        Self { binary, timeout }
    }

    /// Returns the `t8n` arguments for the given request.
    fn t8n_args(request: &ToolRequest, workdir: &Path) -> Vec<String> {
        let mut args = vec![
            "t8n".to_string(),
            "--input.alloc=stdin".to_string(),
            "--input.txs=stdin".to_string(),
            "--input.env=stdin".to_string(),
            "--output.result=stdout".to_string(),
            "--output.alloc=stdout".to_string(),
            format!("--output.body={BODY_FILE}"),
            format!("--output.basedir={}", workdir.display()),
            format!("--state.fork={}", request.fork_name),
            format!("--state.chainid={}", request.chain_id),
            format!("--state.reward={}", request.reward),
        ];

        if request.trace {
            args.push("--trace".to_string());
        }

        args
    }
}

#[async_trait]
impl TransitionTool for EvmTool {
    async fn version(&self) -> Result<String, FillError> {
        let output = Command::new(&self.binary).arg("--version").output().await?;
        if !output.status.success() {
            return Err(FillError::ToolInvocation(format!(
                "{} --version exited with {}",
                self.binary.display(),
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn evaluate(&self, request: &ToolRequest, workdir: &Path) -> Result<ToolOutput, FillError> {
        let input = serde_json::to_vec(&request.input)?;
        let args = Self::t8n_args(request, workdir);
        debug!(target: "t8n", "Invoking {} for fork {}", self.binary.display(), request.fork_name);
        trace!(target: "t8n", "Arguments: {:?}", args);

        if let Some(dump_dir) = &request.dump_dir {
            fs::create_dir_all(dump_dir).await?;
            fs::write(dump_dir.join("input.json"), serde_json::to_vec_pretty(&request.input)?).await?;
            fs::write(dump_dir.join("args.txt"), args.join(" ")).await?;
        }

        let mut cmd = Command::new(&self.binary);
        let output = run_cmd_with_input(cmd.args(&args).current_dir(workdir), &input, self.timeout).await?;

        if let Some(dump_dir) = &request.dump_dir {
            fs::write(dump_dir.join("output.json"), &output.stdout).await?;
            fs::write(dump_dir.join("stderr.txt"), &output.stderr).await?;
        }

        if !output.status.success() {
            return Err(FillError::ToolInvocation(format!(
                "t8n exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let body = fs::read(workdir.join(BODY_FILE))
            .await
            .map_err(|e| FillError::ToolInvocation(format!("t8n wrote no {BODY_FILE}: {e}")))?;
        parse_output(&output.stdout, &body)
    }
}

/// The document `evm t8n` writes to stdout.
#[derive(Debug, Deserialize)]
struct T8nOutput {
    alloc: Alloc,
    result: T8nResult,
}

#[derive(Debug, Deserialize)]
struct T8nResult {
    #[serde(flatten)]
    header: ToolResult,
    #[serde(default)]
    rejected: Vec<T8nRejection>,
}

#[derive(Debug, Deserialize)]
struct T8nRejection {
    index: usize,
    error: String,
}

/// Parses the stdout and the body file of `evm t8n` into a [ToolOutput].
fn parse_output(stdout: &[u8], body: &[u8]) -> Result<ToolOutput, FillError> {
    let T8nOutput { alloc, result } = serde_json::from_slice(stdout)?;
    let body = serde_json::from_slice::<Bytes>(body)?;
    let rejected = result
        .rejected
        .into_iter()
        .map(|r| Rejection {
            index: r.index,
            kind: classify_rejection(&r.error),
            message: r.error,
        })
        .collect();

    Ok(ToolOutput {
        alloc,
        result: result.header,
        rejected,
        body,
    })
}

/// Maps a geth rejection message onto a [TransactionException].
fn classify_rejection(message: &str) -> TransactionException {
    let message = message.to_lowercase();
    let patterns = [
        ("intrinsic gas too low", TransactionException::IntrinsicGasTooLow),
        ("insufficient funds", TransactionException::InsufficientAccountFunds),
        ("nonce too", TransactionException::NonceMismatch),
        ("type not supported", TransactionException::TypeNotSupported),
        ("gas limit reached", TransactionException::GasAllowanceExceeded),
        ("less than block base fee", TransactionException::InsufficientMaxFeePerGas),
        ("sender not an eoa", TransactionException::SenderNotEoa),
        ("max initcode size exceeded", TransactionException::InitcodeSizeExceeded),
    ];
    patterns
        .into_iter()
        .find(|(pattern, _)| message.contains(pattern))
        .map(|(_, kind)| kind)
        .unwrap_or(TransactionException::Unknown)
}
