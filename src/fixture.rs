//! Contains the definition for the filled fixture format.

use crate::{
    t8n::ToolResult,
    types::{Alloc, Environment, Transaction, Withdrawal},
};
use alloy_primitives::{b256, keccak256, Address, Bloom, Bytes, B256, B64, U256, U64};
use alloy_rlp::{Encodable, EMPTY_LIST_CODE};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// The seal engine recorded in every fixture; blocks carry no proof of work.
pub(crate) const SEAL_ENGINE: &str = "NoProof";

/// Root of an empty Merkle Patricia trie.
pub(crate) const EMPTY_TRIE_ROOT: B256 =
    b256!("56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421");

/// Hash of an empty ommers list.
pub(crate) const EMPTY_OMMERS_HASH: B256 =
    b256!("1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347");

/// One filled scenario instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FixtureRecord {
    /// Provenance of the fixture.
    #[serde(rename = "_info")]
    pub(crate) info: FixtureInfo,
    /// The fork the fixture was filled for.
    pub(crate) network: String,
    /// Optional EIPs activated on top of the fork.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) eips: Vec<u64>,
    /// The pre-state, including the fork's required allocations.
    pub(crate) pre: Alloc,
    pub(crate) genesis_block_header: FixtureHeader,
    #[serde(rename = "genesisRLP")]
    pub(crate) genesis_rlp: Bytes,
    /// The resulting blocks, in order.
    pub(crate) blocks: Vec<FixtureBlock>,
    /// Hash of the chain head after the last valid block.
    pub(crate) lastblockhash: B256,
    /// The state after the last valid block.
    pub(crate) post_state: Alloc,
    /// Engine API calls importing the blocks, when the fork supports them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) engine_new_payloads: Option<Vec<FixtureEngineNewPayload>>,
    pub(crate) seal_engine: String,
    /// Suffix appended to the document key, if any.
    #[serde(skip)]
    pub(crate) name: Option<String>,
}

/// Provenance of a fixture.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct FixtureInfo {
    /// The scenario the fixture was filled from.
    pub(crate) scenario: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) comment: Option<String>,
    /// Version string of the transition tool that produced the outputs.
    pub(crate) filling_transition_tool: String,
}

/// A block produced by the transition tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FixtureBlock {
    /// The encoded block, as a client would import it.
    pub(crate) rlp: Bytes,
    pub(crate) block_header: FixtureHeader,
    pub(crate) transactions: Vec<Transaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) withdrawals: Option<Vec<Withdrawal>>,
    /// The rejection the block was filled to provoke.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) expect_exception: Option<TransactionException>,
}

/// A block header assembled from the tool environment and the tool's result.
///
/// Fork-dependent fields are `None` when the fork does not define them.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FixtureHeader {
    pub(crate) parent_hash: B256,
    pub(crate) uncle_hash: B256,
    pub(crate) coinbase: Address,
    pub(crate) state_root: B256,
    pub(crate) transactions_trie: B256,
    pub(crate) receipt_trie: B256,
    pub(crate) bloom: Bloom,
    pub(crate) difficulty: U256,
    pub(crate) number: U64,
    pub(crate) gas_limit: U64,
    pub(crate) gas_used: U64,
    pub(crate) timestamp: U64,
    pub(crate) extra_data: Bytes,
    pub(crate) nonce: B64,
    /// The previous RANDAO mix, from the Merge onwards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) mix_hash: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) base_fee_per_gas: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) withdrawals_root: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) blob_gas_used: Option<U64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) excess_blob_gas: Option<U64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) parent_beacon_block_root: Option<B256>,
    /// Keccak hash of the encoded header.
    pub(crate) hash: B256,
}

impl FixtureHeader {
    /// The genesis header of a chain whose pre-state has the given root.
    pub(crate) fn genesis(env: &Environment, state_root: B256) -> Self {
        Self {
            uncle_hash: EMPTY_OMMERS_HASH,
            coinbase: env.current_coinbase,
            state_root,
            transactions_trie: EMPTY_TRIE_ROOT,
            receipt_trie: EMPTY_TRIE_ROOT,
            difficulty: env.current_difficulty.unwrap_or_default(),
            number: env.current_number,
            gas_limit: env.current_gas_limit,
            timestamp: env.current_timestamp,
            mix_hash: env.current_random,
            base_fee_per_gas: env.current_base_fee,
            withdrawals_root: env.withdrawals.as_ref().map(|_| EMPTY_TRIE_ROOT),
            blob_gas_used: env.parent_blob_gas_used.map(|_| U64::ZERO),
            excess_blob_gas: env.parent_excess_blob_gas.map(|_| U64::ZERO),
            parent_beacon_block_root: env.parent_beacon_block_root,
            ..Default::default()
        }
        .sealed()
    }

    /// Assembles a header from the environment sent to the tool and the result it returned.
    pub(crate) fn assemble(env: &Environment, result: &ToolResult, parent_hash: B256) -> Self {
        Self {
            parent_hash,
            uncle_hash: EMPTY_OMMERS_HASH,
            coinbase: env.current_coinbase,
            state_root: result.state_root,
            transactions_trie: result.tx_root,
            receipt_trie: result.receipts_root,
            bloom: result.logs_bloom,
            difficulty: result
                .current_difficulty
                .or(env.current_difficulty)
                .unwrap_or_default(),
            number: env.current_number,
            gas_limit: env.current_gas_limit,
            gas_used: result.gas_used,
            timestamp: env.current_timestamp,
            extra_data: Bytes::new(),
            nonce: B64::ZERO,
            mix_hash: env.current_random,
            base_fee_per_gas: result.current_base_fee,
            withdrawals_root: result.withdrawals_root,
            blob_gas_used: result.blob_gas_used,
            excess_blob_gas: result.current_excess_blob_gas,
            parent_beacon_block_root: env.parent_beacon_block_root,
            hash: B256::ZERO,
        }
        .sealed()
    }

    /// The header with its hash filled in.
    fn sealed(mut self) -> Self {
        self.hash = keccak256(self.rlp());
        self
    }

    /// The RLP encoding of the header. Fork-dependent fields are appended in activation order.
    pub(crate) fn rlp(&self) -> Vec<u8> {
        let mix_hash = self.mix_hash.unwrap_or_default();
        let mut fields: Vec<&dyn Encodable> = vec![
            &self.parent_hash,
            &self.uncle_hash,
            &self.coinbase,
            &self.state_root,
            &self.transactions_trie,
            &self.receipt_trie,
            &self.bloom,
            &self.difficulty,
            &self.number,
            &self.gas_limit,
            &self.gas_used,
            &self.timestamp,
            &self.extra_data,
            &mix_hash,
            &self.nonce,
        ];
        if let Some(base_fee) = &self.base_fee_per_gas {
            fields.push(base_fee);
        }
        if let Some(root) = &self.withdrawals_root {
            fields.push(root);
        }
        if let Some(used) = &self.blob_gas_used {
            fields.push(used);
        }
        if let Some(excess) = &self.excess_blob_gas {
            fields.push(excess);
        }
        if let Some(root) = &self.parent_beacon_block_root {
            fields.push(root);
        }

        let mut out = Vec::new();
        alloy_rlp::encode_list::<_, dyn Encodable>(&fields[..], &mut out);
        out
    }
}

/// Encodes a whole block from its header, the tool's encoded transaction list, and the
/// withdrawals when the fork has them. Ommers are always empty.
pub(crate) fn block_rlp(header: &FixtureHeader, txs: &[u8], withdrawals: Option<&[Withdrawal]>) -> Bytes {
    let mut payload = header.rlp();
    payload.extend_from_slice(txs);
    payload.push(EMPTY_LIST_CODE);
    if let Some(withdrawals) = withdrawals {
        alloy_rlp::encode_list::<_, Withdrawal>(withdrawals, &mut payload);
    }

    let mut out = Vec::with_capacity(payload.len() + 9);
    alloy_rlp::Header {
        list: true,
        payload_length: payload.len(),
    }
    .encode(&mut out);
    out.extend_from_slice(&payload);
    out.into()
}

/// An `engine_newPayload` call importing one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FixtureEngineNewPayload {
    pub(crate) block_number: u64,
    /// The `engine_newPayloadVN` version to call.
    pub(crate) version: u64,
    /// The `engine_forkchoiceUpdatedVN` version that follows the import.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) forkchoice_updated_version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) blob_versioned_hashes: Option<Vec<B256>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) parent_beacon_block_root: Option<B256>,
    /// Whether the client is expected to accept the payload.
    pub(crate) valid: bool,
}

/// Kinds of transaction rejection a scenario can expect.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum TransactionException {
    IntrinsicGasTooLow,
    InsufficientAccountFunds,
    NonceMismatch,
    TypeNotSupported,
    GasAllowanceExceeded,
    InsufficientMaxFeePerGas,
    SenderNotEoa,
    InitcodeSizeExceeded,
    /// A rejection the tool adapter could not classify.
    Unknown,
}

impl Display for TransactionException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IntrinsicGasTooLow => write!(f, "intrinsic-gas-too-low"),
            Self::InsufficientAccountFunds => write!(f, "insufficient-account-funds"),
            Self::NonceMismatch => write!(f, "nonce-mismatch"),
            Self::TypeNotSupported => write!(f, "type-not-supported"),
            Self::GasAllowanceExceeded => write!(f, "gas-allowance-exceeded"),
            Self::InsufficientMaxFeePerGas => write!(f, "insufficient-max-fee-per-gas"),
            Self::SenderNotEoa => write!(f, "sender-not-eoa"),
            Self::InitcodeSizeExceeded => write!(f, "initcode-size-exceeded"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_omits_fields_the_fork_does_not_define() {
        let header = FixtureHeader {
            base_fee_per_gas: Some(U256::from(7)),
            ..Default::default()
        };
        let json = serde_json::to_value(&header).unwrap();
        assert_eq!(json["baseFeePerGas"], "0x7");
        assert!(json.get("withdrawalsRoot").is_none());
        assert!(json.get("mixHash").is_none());
        assert!(json.get("parentBeaconBlockRoot").is_none());
    }

    #[test]
    fn empty_header_hash_matches_known_encoding() {
        // The genesis header of a chain with an empty state and all-zero fields.
        let header = FixtureHeader {
            uncle_hash: EMPTY_OMMERS_HASH,
            state_root: EMPTY_TRIE_ROOT,
            transactions_trie: EMPTY_TRIE_ROOT,
            receipt_trie: EMPTY_TRIE_ROOT,
            ..Default::default()
        };
        let rlp = header.rlp();
        // 2 hashes, address, 3 roots, bloom, 5 scalars, empty extra data, mix hash, nonce.
        let payload = 33 * 2 + 21 + 33 * 3 + 259 + 5 + 1 + 33 + 9;
        assert_eq!(rlp[..3], [0xf9, (payload >> 8) as u8, payload as u8]);
        assert_eq!(rlp.len(), payload + 3);

        let sealed = header.clone().sealed();
        assert_eq!(sealed.hash, keccak256(&rlp));
        assert_ne!(sealed.hash, B256::ZERO);
    }

    #[test]
    fn optional_fields_extend_the_header_encoding() {
        let london = FixtureHeader {
            base_fee_per_gas: Some(U256::from(7)),
            ..Default::default()
        };
        let cancun = FixtureHeader {
            withdrawals_root: Some(EMPTY_TRIE_ROOT),
            blob_gas_used: Some(U64::ZERO),
            excess_blob_gas: Some(U64::ZERO),
            parent_beacon_block_root: Some(B256::ZERO),
            ..london.clone()
        };
        let base = FixtureHeader::default().rlp().len();
        assert_eq!(london.rlp().len(), base + 1);
        assert_eq!(cancun.rlp().len(), base + 1 + 33 + 1 + 1 + 33);
    }

    #[test]
    fn block_encoding_wraps_header_and_body() {
        let header = FixtureHeader::default().sealed();
        let header_rlp = header.rlp();

        let block = block_rlp(&header, &[EMPTY_LIST_CODE], None);
        assert_eq!(block.len(), 3 + header_rlp.len() + 2);
        assert_eq!(&block[3..3 + header_rlp.len()], &header_rlp[..]);
        assert_eq!(&block[block.len() - 2..], &[EMPTY_LIST_CODE, EMPTY_LIST_CODE]);

        let withdrawal = Withdrawal {
            amount: U64::from(1),
            ..Default::default()
        };
        let block = block_rlp(&header, &[EMPTY_LIST_CODE], Some(&[withdrawal][..]));
        // A one-item list holding index, validator index, address and amount.
        let mut encoded = vec![0xd9, 0xd8, 0x80, 0x80, 0x94];
        encoded.extend([0u8; 20]);
        encoded.push(0x01);
        assert_eq!(&block[block.len() - encoded.len()..], &encoded[..]);
    }

    #[test]
    fn exception_names_match_serde() {
        for kind in [
            TransactionException::IntrinsicGasTooLow,
            TransactionException::TypeNotSupported,
            TransactionException::SenderNotEoa,
        ] {
            assert_eq!(
                serde_json::to_value(kind).unwrap(),
                serde_json::Value::String(kind.to_string())
            );
        }
    }
}
