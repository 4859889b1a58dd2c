//! Contains the [FixtureBuilder], which turns a scenario into a fixture for one fork and variant.

use crate::{
    error::FillError,
    fixture::{
        block_rlp, FixtureBlock, FixtureEngineNewPayload, FixtureHeader, FixtureInfo,
        FixtureRecord, TransactionException, SEAL_ENGINE,
    },
    forks::{Fork, ForkRules, HeaderShape},
    scenario::{Scenario, ScenarioBlock, Variant, BLOCK_TIME},
    t8n::{Rejection, ToolInput, ToolOutput, ToolRequest, TransitionTool},
    types::{Alloc, Environment},
    util::sanitize_path_component,
};
use alloy_primitives::{Bytes, B256, U256, U64};
use alloy_rlp::EMPTY_LIST_CODE;
use itertools::Itertools;
use std::{path::PathBuf, sync::Arc};
use tempfile::tempdir;
use tracing::{debug, trace};

/// Run-wide settings for the [FixtureBuilder].
#[derive(Default, Debug, Clone)]
pub(crate) struct BuildOptions {
    pub(crate) chain_id: u64,
    /// Whether to ask the tool for execution traces.
    pub(crate) trace: bool,
    /// Whether to emit `engine_newPayload` descriptors.
    pub(crate) engine_api: bool,
    /// Root directory for raw tool input and output dumps.
    pub(crate) dump_dir: Option<PathBuf>,
    /// The tool's version string, recorded in every fixture.
    pub(crate) tool_version: String,
}

/// Fills scenarios by driving a [TransitionTool] block by block.
#[derive(Clone)]
pub(crate) struct FixtureBuilder {
    tool: Arc<dyn TransitionTool + Send + Sync>,
    options: BuildOptions,
}

/// The blob gas accounting of the previous block.
#[derive(Default, Debug, Clone, Copy)]
struct ParentBlobGas {
    excess: U64,
    used: U64,
}

/// The last valid block, which the next block is built on.
#[derive(Debug, Clone, Copy)]
struct Head {
    number: u64,
    hash: B256,
    blob_gas: ParentBlobGas,
}

impl FixtureBuilder {
    pub(crate) fn new(tool: Arc<dyn TransitionTool + Send + Sync>, options: BuildOptions) -> Self {
        Self { tool, options }
    }

    /// Fills `scenario` for `fork` with the EIPs of `variant` enabled.
    ///
    /// Every block is built on the current head: a valid block becomes the new head and its
    /// post-state the next pre-state, while a block expected to fail leaves both untouched. Any
    /// mismatch between what the fork demands and what the tool produced fails the whole instance.
    pub(crate) async fn build(
        &self,
        scenario: &Scenario,
        fork: &Fork,
        variant: &Variant,
    ) -> Result<FixtureRecord, FillError> {
        let genesis_timestamp = scenario.env.timestamp;

        // Fork-required accounts take precedence over the scenario's own.
        let mut pre = scenario.pre_alloc();
        pre.extend(fork.pre_allocation(0, genesis_timestamp));

        let instance = format!("{}-{}-{}", scenario.id, fork.name(), variant);
        debug!(target: "fill", "Filling {} ({} block(s))", instance, scenario.blocks.len());

        let (genesis, genesis_rlp) = self.genesis(scenario, fork, variant, &pre, &instance).await?;

        let mut state = pre.clone();
        let mut head = Head {
            number: 0,
            hash: genesis.hash,
            blob_gas: ParentBlobGas::default(),
        };
        let mut blocks = Vec::with_capacity(scenario.blocks.len());
        let mut payloads = Vec::new();

        for block in scenario.blocks.iter() {
            let number = head.number + 1;
            let timestamp = match block.timestamp {
                Some(timestamp) => timestamp,
                None => BLOCK_TIME
                    .checked_mul(number)
                    .and_then(|offset| genesis_timestamp.checked_add(offset))
                    .ok_or_else(|| {
                        FillError::FixtureValidation(format!(
                            "block {number}: timestamp overflows after genesis timestamp {genesis_timestamp}"
                        ))
                    })?,
            };
            let shape = fork.header_shape(number, timestamp);

            check_tx_types(fork, block, number, timestamp)?;
            if !shape.withdrawals && !block.withdrawals.is_empty() {
                return Err(FillError::FixtureValidation(format!(
                    "block {number} carries withdrawals, which {} does not support",
                    fork.genesis_name(number, timestamp)
                )));
            }

            let env = self.environment(scenario, block, shape, number, timestamp, head.blob_gas);
            let request = ToolRequest {
                fork_name: variant.tool_fork_name(&fork.genesis_name(number, timestamp)),
                chain_id: self.options.chain_id,
                reward: fork.block_reward(number, timestamp),
                trace: self.options.trace,
                input: ToolInput {
                    alloc: state.clone(),
                    txs: block.txs.clone(),
                    env: env.clone(),
                },
                dump_dir: self.dump_dir(&instance, blocks.len() + 1),
            };
            let output = self.evaluate(&request).await?;
            trace!(target: "fill", "Block {} of {}: {:?}", number, instance, output.result);

            let header = FixtureHeader::assemble(&env, &output.result, head.hash);
            validate_header(&shape, &header)
                .map_err(|e| FillError::FixtureValidation(format!("block {number}: {e}")))?;
            check_exception(block.expect_exception, &output.rejected)
                .map_err(|e| FillError::FixtureValidation(format!("block {number}: {e}")))?;

            if self.options.engine_api {
                if let Some(version) = fork.engine_payload_version(number, timestamp) {
                    payloads.push(FixtureEngineNewPayload {
                        block_number: number,
                        version,
                        forkchoice_updated_version: fork.engine_forkchoice_version(number, timestamp),
                        blob_versioned_hashes: fork
                            .engine_payload_blob_hashes(number, timestamp)
                            .then(|| {
                                block
                                    .txs
                                    .iter()
                                    .flat_map(|tx| tx.blob_versioned_hashes.iter().flatten().copied())
                                    .collect()
                            }),
                        parent_beacon_block_root: fork
                            .engine_payload_beacon_root(number, timestamp)
                            .then_some(header.parent_beacon_block_root)
                            .flatten(),
                        valid: block.expect_exception.is_none(),
                    });
                }
            }

            if block.expect_exception.is_none() {
                head = Head {
                    number,
                    hash: header.hash,
                    blob_gas: ParentBlobGas {
                        excess: header.excess_blob_gas.unwrap_or_default(),
                        used: header.blob_gas_used.unwrap_or_default(),
                    },
                };
                state = output.alloc;
            }
            blocks.push(FixtureBlock {
                rlp: block_rlp(&header, &output.body, env.withdrawals.as_deref()),
                block_header: header,
                transactions: block.txs.clone(),
                withdrawals: env.withdrawals,
                expect_exception: block.expect_exception,
            });
        }

        Ok(FixtureRecord {
            info: FixtureInfo {
                scenario: scenario.id.clone(),
                comment: scenario.comment.clone(),
                filling_transition_tool: self.options.tool_version.clone(),
            },
            network: fork.name().to_string(),
            eips: variant.eips.clone(),
            pre,
            genesis_block_header: genesis,
            genesis_rlp,
            blocks,
            lastblockhash: head.hash,
            post_state: state,
            engine_new_payloads: (!payloads.is_empty()).then_some(payloads),
            seal_engine: SEAL_ENGINE.to_string(),
            name: scenario.name.clone(),
        })
    }

    /// Builds the genesis block over `pre`. The tool is only consulted for the state root.
    async fn genesis(
        &self,
        scenario: &Scenario,
        fork: &Fork,
        variant: &Variant,
        pre: &Alloc,
        instance: &str,
    ) -> Result<(FixtureHeader, Bytes), FillError> {
        let timestamp = scenario.env.timestamp;
        let shape = fork.header_shape(0, timestamp);
        let env = self.environment(
            scenario,
            &ScenarioBlock::default(),
            shape,
            0,
            timestamp,
            ParentBlobGas::default(),
        );
        let request = ToolRequest {
            fork_name: variant.tool_fork_name(&fork.genesis_name(0, timestamp)),
            chain_id: self.options.chain_id,
            reward: U256::ZERO,
            trace: false,
            input: ToolInput {
                alloc: pre.clone(),
                txs: Vec::new(),
                env: env.clone(),
            },
            dump_dir: self.dump_dir(instance, 0),
        };
        let output = self.evaluate(&request).await?;

        let header = FixtureHeader::genesis(&env, output.result.state_root);
        let rlp = block_rlp(&header, &[EMPTY_LIST_CODE], env.withdrawals.as_deref());
        Ok((header, rlp))
    }

    /// Runs one tool invocation in a scratch directory of its own.
    async fn evaluate(&self, request: &ToolRequest) -> Result<ToolOutput, FillError> {
        let workdir = tempdir()?;
        self.tool.evaluate(request, workdir.path()).await
    }

    /// Where the raw tool input and output of the `index`th invocation are dumped, if anywhere.
    fn dump_dir(&self, instance: &str, index: usize) -> Option<PathBuf> {
        self.options
            .dump_dir
            .as_ref()
            .map(|dir| dir.join(sanitize_path_component(instance)).join(index.to_string()))
    }

    /// The environment for one block, carrying exactly the fields the fork defines.
    fn environment(
        &self,
        scenario: &Scenario,
        block: &ScenarioBlock,
        shape: HeaderShape,
        number: u64,
        timestamp: u64,
        parent_blob_gas: ParentBlobGas,
    ) -> Environment {
        let defaults = &scenario.env;
        Environment {
            current_coinbase: defaults.coinbase,
            current_gas_limit: U64::from(defaults.gas_limit),
            current_number: U64::from(number),
            current_timestamp: U64::from(timestamp),
            current_difficulty: (!shape.zero_difficulty).then_some(defaults.difficulty),
            current_random: shape.prev_randao.then_some(defaults.prev_randao),
            current_base_fee: shape.base_fee.then_some(defaults.base_fee),
            withdrawals: shape.withdrawals.then(|| block.withdrawals.clone()),
            parent_beacon_block_root: shape
                .beacon_root
                .then_some(defaults.parent_beacon_block_root),
            parent_excess_blob_gas: shape.excess_blob_gas.then_some(parent_blob_gas.excess),
            parent_blob_gas_used: shape.blob_gas_used.then_some(parent_blob_gas.used),
        }
    }
}

/// Rejects transaction types the fork does not know, unless the block expects exactly that.
fn check_tx_types(
    fork: &Fork,
    block: &ScenarioBlock,
    number: u64,
    timestamp: u64,
) -> Result<(), FillError> {
    if block.expect_exception == Some(TransactionException::TypeNotSupported) {
        return Ok(());
    }
    let allowed = fork.tx_types(number, timestamp);
    match block.txs.iter().position(|tx| !allowed.contains(&tx.tx_type())) {
        Some(index) => Err(FillError::FixtureValidation(format!(
            "block {number}, transaction {index}: type {} is not supported by {}",
            block.txs[index].tx_type(),
            fork.genesis_name(number, timestamp)
        ))),
        None => Ok(()),
    }
}

/// Checks that every header field the fork requires is present and every other one is absent.
pub(crate) fn validate_header(shape: &HeaderShape, header: &FixtureHeader) -> Result<(), String> {
    let fields = [
        ("baseFeePerGas", shape.base_fee, header.base_fee_per_gas.is_some()),
        ("mixHash", shape.prev_randao, header.mix_hash.is_some()),
        ("withdrawalsRoot", shape.withdrawals, header.withdrawals_root.is_some()),
        ("excessBlobGas", shape.excess_blob_gas, header.excess_blob_gas.is_some()),
        ("blobGasUsed", shape.blob_gas_used, header.blob_gas_used.is_some()),
        (
            "parentBeaconBlockRoot",
            shape.beacon_root,
            header.parent_beacon_block_root.is_some(),
        ),
    ];
    for (field, required, present) in fields {
        match (required, present) {
            (true, false) => return Err(format!("header is missing required field {field}")),
            (false, true) => return Err(format!("header carries forbidden field {field}")),
            _ => {}
        }
    }

    if shape.zero_difficulty != header.difficulty.is_zero() {
        return Err(format!(
            "difficulty {} is invalid, expected {}",
            header.difficulty,
            if shape.zero_difficulty { "zero" } else { "non-zero" }
        ));
    }
    Ok(())
}

/// Compares the tool's rejections with the exception the block expects.
fn check_exception(
    expected: Option<TransactionException>,
    rejected: &[Rejection],
) -> Result<(), String> {
    match expected {
        None => match rejected.first() {
            Some(rejection) => Err(format!(
                "transaction {} was rejected unexpectedly: {}",
                rejection.index, rejection.message
            )),
            None => Ok(()),
        },
        Some(kind) if rejected.iter().any(|r| r.kind == kind) => Ok(()),
        Some(kind) if rejected.is_empty() => {
            Err(format!("expected exception {kind}, but no transaction was rejected"))
        }
        Some(kind) => Err(format!(
            "expected exception {kind}, got {}",
            rejected.iter().map(|r| r.kind).join(", ")
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fixture::{EMPTY_OMMERS_HASH, EMPTY_TRIE_ROOT},
        forks::ForkChain,
        t8n::mock::MockTool,
        types::{AccountSpec, Transaction, Withdrawal, TEST_ADDRESS},
    };
    use alloy_primitives::{address, keccak256, Address, U8};

    const BEACON_ROOTS: Address = address!("000F3dF6D732807Ef1319fB7B8bB8522D0Beac02");

    fn builder(tool: Arc<MockTool>, engine_api: bool) -> FixtureBuilder {
        FixtureBuilder::new(
            tool,
            BuildOptions {
                chain_id: 1,
                engine_api,
                tool_version: "mock-t8n/1.0".into(),
                ..Default::default()
            },
        )
    }

    fn fork(name: &str) -> Fork {
        ForkChain::mainnet().unwrap().resolve(name).unwrap()
    }

    fn transfer(blocks: Vec<ScenarioBlock>) -> Scenario {
        Scenario {
            id: "transfer".into(),
            pre: [(
                TEST_ADDRESS,
                AccountSpec {
                    balance: Some(U256::from(10).pow(U256::from(21))),
                    ..Default::default()
                },
            )]
            .into(),
            blocks,
            ..Default::default()
        }
    }

    fn block(txs: Vec<Transaction>) -> ScenarioBlock {
        ScenarioBlock {
            txs,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn legacy_transfer_fills_for_berlin_and_london() {
        let tool = Arc::new(MockTool::default());
        let scenario = transfer(vec![block(vec![Transaction::default()])]);

        let berlin = builder(tool.clone(), false)
            .build(&scenario, &fork("Berlin"), &Variant::default())
            .await
            .unwrap();
        let header = &berlin.blocks[0].block_header;
        assert_eq!(berlin.network, "Berlin");
        assert_eq!(header.base_fee_per_gas, None);
        assert_eq!(header.difficulty, U256::from(0x20000));
        assert_eq!(header.mix_hash, None);
        assert_eq!(berlin.info.filling_transition_tool, "mock-t8n/1.0");

        let london = builder(tool.clone(), false)
            .build(&scenario, &fork("London"), &Variant::default())
            .await
            .unwrap();
        assert_eq!(london.blocks[0].block_header.base_fee_per_gas, Some(U256::from(7)));

        let requests = tool.requests();
        assert_eq!(requests[0].fork_name, "Berlin");
        assert_eq!(requests[0].input.env.current_base_fee, None);
        assert_eq!(requests[1].fork_name, "London");
        assert_eq!(requests[1].reward, U256::from(2_000_000_000_000_000_000u64));
    }

    #[tokio::test]
    async fn missing_required_field_fails_validation() {
        let tool = Arc::new(MockTool {
            drop_base_fee: true,
            ..Default::default()
        });
        let scenario = transfer(vec![block(vec![Transaction::default()])]);
        let err = builder(tool, false)
            .build(&scenario, &fork("London"), &Variant::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FillError::FixtureValidation(msg) if msg.contains("baseFeePerGas")));
    }

    #[tokio::test]
    async fn unsupported_tx_type_is_rejected_before_invoking_the_tool() {
        let tool = Arc::new(MockTool::default());
        let tx = Transaction {
            ty: U8::from(2),
            gas_price: None,
            max_fee_per_gas: Some(U256::from(10)),
            max_priority_fee_per_gas: Some(U256::from(1)),
            ..Default::default()
        };
        let scenario = transfer(vec![block(vec![tx.clone()])]);
        let err = builder(tool.clone(), false)
            .build(&scenario, &fork("Berlin"), &Variant::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FillError::FixtureValidation(_)));
        assert!(tool.requests().is_empty());

        let mut scenario = transfer(vec![block(vec![tx])]);
        scenario.blocks[0].expect_exception = Some(TransactionException::TypeNotSupported);
        let err = builder(tool.clone(), false)
            .build(&scenario, &fork("Berlin"), &Variant::default())
            .await
            .unwrap_err();
        // The tool was consulted, but accepted the transaction.
        assert!(matches!(err, FillError::FixtureValidation(msg) if msg.contains("no transaction")));
        assert_eq!(tool.requests().len(), 1);
    }

    #[tokio::test]
    async fn expected_exceptions_are_matched_by_kind() {
        let tool = Arc::new(MockTool::default());
        let starved = Transaction {
            gas_limit: U64::from(20_999),
            ..Default::default()
        };
        let mut scenario = transfer(vec![block(vec![starved])]);

        let err = builder(tool.clone(), false)
            .build(&scenario, &fork("Berlin"), &Variant::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FillError::FixtureValidation(msg) if msg.contains("unexpectedly")));

        scenario.blocks[0].expect_exception = Some(TransactionException::NonceMismatch);
        let err = builder(tool.clone(), false)
            .build(&scenario, &fork("Berlin"), &Variant::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FillError::FixtureValidation(msg) if msg.contains("intrinsic-gas-too-low")));

        scenario.blocks[0].expect_exception = Some(TransactionException::IntrinsicGasTooLow);
        let record = builder(tool, false)
            .build(&scenario, &fork("Berlin"), &Variant::default())
            .await
            .unwrap();
        assert_eq!(
            record.blocks[0].expect_exception,
            Some(TransactionException::IntrinsicGasTooLow)
        );
    }

    #[tokio::test]
    async fn fork_allocation_overrides_scenario_pre_state() {
        let tool = Arc::new(MockTool::default());
        let mut scenario = transfer(vec![block(vec![Transaction {
            ty: U8::from(1),
            access_list: Some(vec![]),
            ..Default::default()
        }])]);
        scenario.pre.insert(
            BEACON_ROOTS,
            AccountSpec {
                balance: Some(U256::from(5)),
                ..Default::default()
            },
        );

        let record = builder(tool.clone(), true)
            .build(&scenario, &fork("Cancun"), &Variant::default())
            .await
            .unwrap();
        let beacon = &record.pre[&BEACON_ROOTS];
        assert_eq!(beacon.nonce, Some(1));
        assert!(beacon.code.is_some());
        assert_eq!(beacon.balance, U256::ZERO);
        assert!(record.pre.contains_key(&TEST_ADDRESS));

        let header = &record.blocks[0].block_header;
        assert_eq!(header.parent_beacon_block_root, Some(B256::ZERO));
        assert_eq!(header.excess_blob_gas, Some(U64::ZERO));
        assert_eq!(header.difficulty, U256::ZERO);

        let payloads = record.engine_new_payloads.unwrap();
        assert_eq!(payloads[0].version, 3);
        assert_eq!(payloads[0].blob_versioned_hashes, Some(vec![]));
        assert_eq!(payloads[0].parent_beacon_block_root, Some(B256::ZERO));

        // Forks before Cancun keep the scenario's account untouched.
        let record = builder(tool, false)
            .build(&scenario, &fork("Shanghai"), &Variant::default())
            .await
            .unwrap();
        assert_eq!(record.pre[&BEACON_ROOTS].balance, U256::from(5));
    }

    #[tokio::test]
    async fn engine_payloads_follow_the_fork() {
        let tool = Arc::new(MockTool::default());
        let scenario = transfer(vec![block(vec![Transaction::default()])]);

        let disabled = builder(tool.clone(), false)
            .build(&scenario, &fork("Shanghai"), &Variant::default())
            .await
            .unwrap();
        assert!(disabled.engine_new_payloads.is_none());

        let pre_merge = builder(tool.clone(), true)
            .build(&scenario, &fork("London"), &Variant::default())
            .await
            .unwrap();
        assert!(pre_merge.engine_new_payloads.is_none());

        let shanghai = builder(tool, true)
            .build(&scenario, &fork("Shanghai"), &Variant::default())
            .await
            .unwrap();
        let payload = &shanghai.engine_new_payloads.unwrap()[0];
        assert_eq!(payload.version, 2);
        assert_eq!(payload.forkchoice_updated_version, Some(2));
        assert_eq!(payload.blob_versioned_hashes, None);
        assert_eq!(payload.parent_beacon_block_root, None);
        assert!(payload.valid);
    }

    #[tokio::test]
    async fn blocks_chain_their_state_and_timestamps() {
        let tool = Arc::new(MockTool::default());
        let scenario = transfer(vec![
            block(vec![Transaction::default()]),
            block(vec![Transaction {
                nonce: U64::from(1),
                ..Default::default()
            }]),
        ]);
        let record = builder(tool.clone(), false)
            .build(&scenario, &fork("London"), &Variant::new(vec![3855]))
            .await
            .unwrap();

        let requests = tool.requests();
        assert_eq!(requests[0].fork_name, "London+3855");
        assert!(requests[1].input.alloc.contains_key(&Address::with_last_byte(1)));
        assert_eq!(requests[0].input.env.current_timestamp, U64::from(1_012));
        assert_eq!(requests[1].input.env.current_timestamp, U64::from(1_024));
        assert_eq!(record.eips, vec![3855]);
        assert_eq!(record.post_state.len(), 3);
        assert_eq!(record.pre.len(), 1);
    }

    #[tokio::test]
    async fn transition_fork_switches_rules_mid_scenario() {
        let tool = Arc::new(MockTool::default());
        let blocks = (0..5)
            .map(|nonce| {
                block(vec![Transaction {
                    nonce: U64::from(nonce),
                    ..Default::default()
                }])
            })
            .collect();
        let record = builder(tool.clone(), false)
            .build(&transfer(blocks), &fork("BerlinToLondonAt5"), &Variant::default())
            .await
            .unwrap();

        let requests = tool.requests();
        assert_eq!(requests[3].fork_name, "Berlin");
        assert_eq!(requests[4].fork_name, "London");
        assert_eq!(record.blocks[3].block_header.base_fee_per_gas, None);
        assert_eq!(record.blocks[4].block_header.base_fee_per_gas, Some(U256::from(7)));
        assert_eq!(record.network, "BerlinToLondonAt5");
    }

    #[tokio::test]
    async fn withdrawals_require_shanghai() {
        let tool = Arc::new(MockTool::default());
        let mut scenario = transfer(vec![block(vec![])]);
        scenario.blocks[0].withdrawals = vec![Withdrawal {
            address: TEST_ADDRESS,
            amount: U64::from(1),
            ..Default::default()
        }];

        let err = builder(tool.clone(), false)
            .build(&scenario, &fork("Merge"), &Variant::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FillError::FixtureValidation(_)));

        let record = builder(tool, false)
            .build(&scenario, &fork("Shanghai"), &Variant::default())
            .await
            .unwrap();
        assert_eq!(record.blocks[0].withdrawals.as_ref().map(Vec::len), Some(1));
        assert!(record.blocks[0].block_header.withdrawals_root.is_some());
    }

    #[tokio::test]
    async fn headers_chain_from_genesis_by_hash() {
        let tool = Arc::new(MockTool::default());
        let scenario = transfer(vec![
            block(vec![Transaction::default()]),
            block(vec![Transaction {
                nonce: U64::from(1),
                ..Default::default()
            }]),
        ]);
        let record = builder(tool.clone(), false)
            .build(&scenario, &fork("Shanghai"), &Variant::default())
            .await
            .unwrap();

        let genesis = &record.genesis_block_header;
        assert_eq!(genesis.number, U64::ZERO);
        assert_eq!(genesis.parent_hash, B256::ZERO);
        assert_eq!(genesis.uncle_hash, EMPTY_OMMERS_HASH);
        assert_eq!(genesis.transactions_trie, EMPTY_TRIE_ROOT);
        assert_eq!(genesis.withdrawals_root, Some(EMPTY_TRIE_ROOT));
        assert_eq!(genesis.state_root, B256::with_last_byte(1));
        assert_eq!(genesis.timestamp, U64::from(1_000));
        assert_eq!(genesis.hash, keccak256(genesis.rlp()));
        assert!(validate_header(&fork("Shanghai").header_shape(0, 1_000), genesis).is_ok());

        // The state root query carries no transactions and pays no reward.
        let query = &tool.calls()[0];
        assert!(query.input.txs.is_empty());
        assert_eq!(query.reward, U256::ZERO);

        let [first, second] = &record.blocks[..] else {
            panic!("expected two blocks");
        };
        assert_eq!(first.block_header.parent_hash, genesis.hash);
        assert_eq!(second.block_header.parent_hash, first.block_header.hash);
        assert_eq!(first.block_header.uncle_hash, EMPTY_OMMERS_HASH);
        assert_eq!(record.lastblockhash, second.block_header.hash);

        let header_rlp = first.block_header.rlp();
        assert_eq!(first.rlp[3..3 + header_rlp.len()], header_rlp[..]);
        assert_eq!(record.genesis_rlp[3..3 + genesis.rlp().len()], genesis.rlp()[..]);
    }

    #[tokio::test]
    async fn invalid_blocks_do_not_advance_the_head() {
        let tool = Arc::new(MockTool::default());
        let mut starved = block(vec![Transaction {
            gas_limit: U64::from(20_999),
            ..Default::default()
        }]);
        starved.expect_exception = Some(TransactionException::IntrinsicGasTooLow);
        let scenario = transfer(vec![
            block(vec![Transaction::default()]),
            starved,
            block(vec![Transaction {
                nonce: U64::from(1),
                ..Default::default()
            }]),
        ]);
        let record = builder(tool.clone(), false)
            .build(&scenario, &fork("London"), &Variant::default())
            .await
            .unwrap();

        let headers = record.blocks.iter().map(|b| &b.block_header).collect::<Vec<_>>();
        assert_eq!(headers[1].number, U64::from(2));
        assert_eq!(headers[2].number, U64::from(2));
        assert_eq!(headers[1].parent_hash, headers[0].hash);
        assert_eq!(headers[2].parent_hash, headers[0].hash);
        assert_eq!(record.lastblockhash, headers[2].hash);

        // The rejected block's post-state is discarded.
        let requests = tool.requests();
        assert!(requests[2].input.alloc.contains_key(&Address::with_last_byte(1)));
        assert!(!requests[2].input.alloc.contains_key(&Address::with_last_byte(2)));
        assert_eq!(requests[2].input.env.current_timestamp, U64::from(1_024));
    }

    #[tokio::test]
    async fn timestamp_overflow_is_a_validation_error() {
        let tool = Arc::new(MockTool::default());
        let mut scenario = transfer(vec![block(vec![Transaction::default()])]);
        scenario.env.timestamp = u64::MAX - 5;
        let err = builder(tool, false)
            .build(&scenario, &fork("Berlin"), &Variant::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FillError::FixtureValidation(msg) if msg.contains("overflows")));
    }

    /// The header a fork with the given shape expects.
    fn header_for(shape: &HeaderShape) -> FixtureHeader {
        FixtureHeader {
            difficulty: if shape.zero_difficulty { U256::ZERO } else { U256::from(0x20000) },
            base_fee_per_gas: shape.base_fee.then_some(U256::from(7)),
            mix_hash: shape.prev_randao.then_some(B256::ZERO),
            withdrawals_root: shape.withdrawals.then_some(EMPTY_TRIE_ROOT),
            excess_blob_gas: shape.excess_blob_gas.then_some(U64::ZERO),
            blob_gas_used: shape.blob_gas_used.then_some(U64::ZERO),
            parent_beacon_block_root: shape.beacon_root.then_some(B256::ZERO),
            ..Default::default()
        }
    }

    #[test]
    fn every_fork_accepts_exactly_its_header_fields() {
        type Toggle = fn(&mut FixtureHeader);
        // Each toggle drops a present field or adds an absent one.
        let toggles: [(&str, Toggle); 7] = [
            ("baseFeePerGas", |h| h.base_fee_per_gas = h.base_fee_per_gas.xor(Some(U256::from(7)))),
            ("mixHash", |h| h.mix_hash = h.mix_hash.xor(Some(B256::ZERO))),
            ("withdrawalsRoot", |h| h.withdrawals_root = h.withdrawals_root.xor(Some(B256::ZERO))),
            ("excessBlobGas", |h| h.excess_blob_gas = h.excess_blob_gas.xor(Some(U64::ZERO))),
            ("blobGasUsed", |h| h.blob_gas_used = h.blob_gas_used.xor(Some(U64::ZERO))),
            ("parentBeaconBlockRoot", |h| {
                h.parent_beacon_block_root = h.parent_beacon_block_root.xor(Some(B256::ZERO))
            }),
            ("difficulty", |h| {
                h.difficulty = if h.difficulty.is_zero() { U256::from(1) } else { U256::ZERO }
            }),
        ];

        let chain = ForkChain::mainnet().unwrap();
        let forks = chain
            .iter()
            .map(|fork| fork.clone() as Fork)
            .chain(chain.transitions().iter().map(|t| t.clone() as Fork));
        for fork in forks {
            for (number, timestamp) in [(0, 0), (u64::MAX, u64::MAX)] {
                let shape = fork.header_shape(number, timestamp);
                let exact = header_for(&shape);
                assert!(validate_header(&shape, &exact).is_ok(), "{}", fork.name());

                for (field, toggle) in toggles {
                    let mut header = exact.clone();
                    toggle(&mut header);
                    let err = validate_header(&shape, &header).unwrap_err();
                    assert!(err.contains(field), "{} at block {number}: {err}", fork.name());
                }
            }
        }
    }
}
