//! Protocol-level value types shared by scenarios, the transition tool wire format and fixtures.

use alloy_genesis::GenesisAccount;
use alloy_primitives::{address, b256, Address, Bytes, B256, U256, U64, U8};
use alloy_rlp::RlpEncodable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The well-known sender key used when a transaction does not name one.
pub(crate) const TEST_PRIVATE_KEY: B256 =
    b256!("45a915e4d060149eb4365960e6a7a45f334393093061116b197e3240065ff2d8");

/// The address controlled by [TEST_PRIVATE_KEY].
pub(crate) const TEST_ADDRESS: Address = address!("a94f5374fce5edbc8e2a8697c15331677e6ebf0b");

/// Address to account state, as understood by the transition tool.
pub(crate) type Alloc = BTreeMap<Address, GenesisAccount>;

/// An account as written in definition and filler files.
///
/// Storage slots are written as quantities and widened to 32-byte words on conversion.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct AccountSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) nonce: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) balance: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) code: Option<Bytes>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) storage: BTreeMap<U256, U256>,
}

impl From<AccountSpec> for GenesisAccount {
    fn from(spec: AccountSpec) -> Self {
        let storage = (!spec.storage.is_empty()).then(|| {
            spec.storage
                .into_iter()
                .map(|(slot, value)| (B256::from(slot), B256::from(value)))
                .collect()
        });
        GenesisAccount {
            nonce: spec.nonce,
            balance: spec.balance.unwrap_or_default(),
            code: spec.code,
            storage,
            ..Default::default()
        }
    }
}

/// Converts a map of [AccountSpec]s into an [Alloc].
pub(crate) fn into_alloc(accounts: BTreeMap<Address, AccountSpec>) -> Alloc {
    accounts
        .into_iter()
        .map(|(address, account)| (address, account.into()))
        .collect()
}

/// A single access list entry.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccessListItem {
    pub(crate) address: Address,
    #[serde(default)]
    pub(crate) storage_keys: Vec<B256>,
}

/// A transaction in the transition tool's input format.
///
/// The tool signs the transaction with `secret_key`; `v`, `r` and `s` are left zeroed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Transaction {
    #[serde(rename = "type", default)]
    pub(crate) ty: U8,
    #[serde(default = "default_chain_id")]
    pub(crate) chain_id: U64,
    #[serde(default)]
    pub(crate) nonce: U64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) gas_price: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) max_priority_fee_per_gas: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) max_fee_per_gas: Option<U256>,
    #[serde(rename = "gas", default = "default_gas_limit")]
    pub(crate) gas_limit: U64,
    #[serde(default)]
    pub(crate) to: Option<Address>,
    #[serde(default)]
    pub(crate) value: U256,
    #[serde(rename = "input", alias = "data", default)]
    pub(crate) data: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) access_list: Option<Vec<AccessListItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) max_fee_per_blob_gas: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) blob_versioned_hashes: Option<Vec<B256>>,
    #[serde(default)]
    pub(crate) v: U256,
    #[serde(default)]
    pub(crate) r: U256,
    #[serde(default)]
    pub(crate) s: U256,
    #[serde(default = "default_secret_key")]
    pub(crate) secret_key: B256,
    #[serde(default = "default_protected")]
    pub(crate) protected: bool,
}

impl Default for Transaction {
    fn default() -> Self {
        Self {
            ty: U8::ZERO,
            chain_id: default_chain_id(),
            nonce: U64::ZERO,
            gas_price: Some(U256::from(10)),
            max_priority_fee_per_gas: None,
            max_fee_per_gas: None,
            gas_limit: default_gas_limit(),
            to: Some(address!("00000000000000000000000000000000000000aa")),
            value: U256::ZERO,
            data: Bytes::new(),
            access_list: None,
            max_fee_per_blob_gas: None,
            blob_versioned_hashes: None,
            v: U256::ZERO,
            r: U256::ZERO,
            s: U256::ZERO,
            secret_key: TEST_PRIVATE_KEY,
            protected: true,
        }
    }
}

impl Transaction {
    /// Returns the type tag of the transaction.
    pub(crate) fn tx_type(&self) -> u8 {
        self.ty.to::<u8>()
    }
}

fn default_chain_id() -> U64 {
    U64::from(1)
}

fn default_gas_limit() -> U64 {
    U64::from(21_000)
}

fn default_secret_key() -> B256 {
    TEST_PRIVATE_KEY
}

fn default_protected() -> bool {
    true
}

/// A beacon chain withdrawal. Its RLP encoding is the field list in declaration order.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, RlpEncodable)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Withdrawal {
    pub(crate) index: U64,
    pub(crate) validator_index: U64,
    pub(crate) address: Address,
    pub(crate) amount: U64,
}

/// The block environment handed to the transition tool.
///
/// Optional fields are only present when the fork being filled defines them.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Environment {
    pub(crate) current_coinbase: Address,
    pub(crate) current_gas_limit: U64,
    pub(crate) current_number: U64,
    pub(crate) current_timestamp: U64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) current_difficulty: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) current_random: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) current_base_fee: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) withdrawals: Option<Vec<Withdrawal>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) parent_beacon_block_root: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) parent_excess_blob_gas: Option<U64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) parent_blob_gas_used: Option<U64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_spec_widens_storage() {
        let spec = AccountSpec {
            nonce: Some(1),
            storage: BTreeMap::from([(U256::from(1), U256::from(0xff))]),
            ..Default::default()
        };
        let account = GenesisAccount::from(spec);
        assert_eq!(account.nonce, Some(1));
        assert_eq!(account.balance, U256::ZERO);
        let storage = account.storage.unwrap();
        assert_eq!(storage.get(&B256::with_last_byte(1)), Some(&B256::with_last_byte(0xff)));
    }

    #[test]
    fn transaction_uses_tool_field_names() {
        let tx = Transaction::default();
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["type"], "0x0");
        assert_eq!(json["gas"], "0x5208");
        assert!(json.get("input").is_some());
        assert!(json.get("maxFeePerGas").is_none());
        assert_eq!(tx.tx_type(), 0);
    }
}
