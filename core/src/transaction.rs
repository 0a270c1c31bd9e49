use std::{fmt, sync::Arc};

use alloy::{
    consensus::TypedTransaction,
    eips::{eip2930::AccessList, eip7702::SignedAuthorization},
    network::{TransactionBuilder, TransactionBuilder7702},
    primitives::{Address, Bytes, U256},
    rpc::types::{TransactionInput, TransactionRequest},
};
use serde::{Deserialize, Serialize};

use crate::{
    deferred::MaybeDeferred,
    defs::{AccessListItemSchema, AddressDef, BytesDef, SignedAuthorizationSchema, U256Def},
    error::EngineError,
    signer::AccountSigner,
};

/// Envelope type of the transaction to be produced
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Legacy,
    Eip2930,
    Eip1559,
    Eip7702,
}

impl TransactionType {
    /// EIP-2718 type byte
    pub fn as_u8(&self) -> u8 {
        match self {
            TransactionType::Legacy => 0,
            TransactionType::Eip2930 => 1,
            TransactionType::Eip1559 => 2,
            TransactionType::Eip7702 => 4,
        }
    }

    /// Types priced with a single `gasPrice` instead of the EIP-1559 fee pair
    pub fn is_legacy_priced(&self) -> bool {
        matches!(self, TransactionType::Legacy | TransactionType::Eip2930)
    }
}

/// Fee fields suggested by a fee oracle. Either the legacy price or the EIP-1559 pair is
/// expected to be set, never both.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeeOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<u128>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<u128>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<u128>,
}

impl FeeOverrides {
    pub fn eip1559(max_fee_per_gas: u128, max_priority_fee_per_gas: u128) -> Self {
        Self {
            max_fee_per_gas: Some(max_fee_per_gas),
            max_priority_fee_per_gas: Some(max_priority_fee_per_gas),
            gas_price: None,
        }
    }

    pub fn legacy(gas_price: u128) -> Self {
        Self {
            gas_price: Some(gas_price),
            ..Default::default()
        }
    }

    pub fn has_eip1559_pair(&self) -> bool {
        self.max_fee_per_gas.is_some() && self.max_priority_fee_per_gas.is_some()
    }
}

/// Gas limit and fees computed by the fee oracle of a chain whose fee market diverges
/// from the standard EIP-1559 model (zkSync stack).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VariantGasFees {
    pub gas: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// Declarative description of a transaction before resolution. Every field may be a
/// literal or an async producer; absent fields are filled in by the resolver.
#[derive(Clone, Debug, Default)]
pub struct TransactionDescriptor {
    pub to: Option<MaybeDeferred<Address>>,
    /// Calldata producer
    pub data: Option<MaybeDeferred<Bytes>>,
    pub value: Option<MaybeDeferred<U256>>,
    pub nonce: Option<MaybeDeferred<u64>>,
    pub gas: Option<MaybeDeferred<u64>>,
    pub max_fee_per_gas: Option<MaybeDeferred<u128>>,
    pub max_priority_fee_per_gas: Option<MaybeDeferred<u128>>,
    pub gas_price: Option<MaybeDeferred<u128>>,
    pub access_list: Option<MaybeDeferred<AccessList>>,
    pub authorization_list: Option<MaybeDeferred<Vec<SignedAuthorization>>>,
    pub transaction_type: Option<MaybeDeferred<TransactionType>>,
    /// Added on top of the gas estimate
    pub extra_gas: Option<MaybeDeferred<u64>>,
}

impl TransactionDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to(mut self, to: impl Into<MaybeDeferred<Address>>) -> Self {
        self.to = Some(to.into());
        self
    }

    pub fn data(mut self, data: impl Into<MaybeDeferred<Bytes>>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn value(mut self, value: impl Into<MaybeDeferred<U256>>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn nonce(mut self, nonce: impl Into<MaybeDeferred<u64>>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    pub fn gas(mut self, gas: impl Into<MaybeDeferred<u64>>) -> Self {
        self.gas = Some(gas.into());
        self
    }

    pub fn max_fee_per_gas(mut self, fee: impl Into<MaybeDeferred<u128>>) -> Self {
        self.max_fee_per_gas = Some(fee.into());
        self
    }

    pub fn max_priority_fee_per_gas(mut self, fee: impl Into<MaybeDeferred<u128>>) -> Self {
        self.max_priority_fee_per_gas = Some(fee.into());
        self
    }

    pub fn gas_price(mut self, price: impl Into<MaybeDeferred<u128>>) -> Self {
        self.gas_price = Some(price.into());
        self
    }

    pub fn access_list(mut self, access_list: impl Into<MaybeDeferred<AccessList>>) -> Self {
        self.access_list = Some(access_list.into());
        self
    }

    pub fn authorization_list(
        mut self,
        authorization_list: impl Into<MaybeDeferred<Vec<SignedAuthorization>>>,
    ) -> Self {
        self.authorization_list = Some(authorization_list.into());
        self
    }

    pub fn transaction_type(mut self, ty: impl Into<MaybeDeferred<TransactionType>>) -> Self {
        self.transaction_type = Some(ty.into());
        self
    }

    pub fn extra_gas(mut self, extra_gas: impl Into<MaybeDeferred<u64>>) -> Self {
        self.extra_gas = Some(extra_gas.into());
        self
    }

    /// Copy whose deferred fields each run their producer at most once, however many
    /// steps of a resolution read them.
    pub fn memoized(&self) -> Self {
        Self {
            to: self.to.as_ref().map(MaybeDeferred::memoized),
            data: self.data.as_ref().map(MaybeDeferred::memoized),
            value: self.value.as_ref().map(MaybeDeferred::memoized),
            nonce: self.nonce.as_ref().map(MaybeDeferred::memoized),
            gas: self.gas.as_ref().map(MaybeDeferred::memoized),
            max_fee_per_gas: self.max_fee_per_gas.as_ref().map(MaybeDeferred::memoized),
            max_priority_fee_per_gas: self
                .max_priority_fee_per_gas
                .as_ref()
                .map(MaybeDeferred::memoized),
            gas_price: self.gas_price.as_ref().map(MaybeDeferred::memoized),
            access_list: self.access_list.as_ref().map(MaybeDeferred::memoized),
            authorization_list: self.authorization_list.as_ref().map(MaybeDeferred::memoized),
            transaction_type: self.transaction_type.as_ref().map(MaybeDeferred::memoized),
            extra_gas: self.extra_gas.as_ref().map(MaybeDeferred::memoized),
        }
    }

    /// New descriptor with the gas limit and EIP-1559 fees pinned to the given values.
    /// Everything else, producers included, is shared with `self`.
    pub fn with_variant_gas_fees(&self, fees: &VariantGasFees) -> Self {
        Self {
            gas: Some(fees.gas.into()),
            max_fee_per_gas: Some(fees.max_fee_per_gas.into()),
            max_priority_fee_per_gas: Some(fees.max_priority_fee_per_gas.into()),
            ..self.clone()
        }
    }
}

/// Fully resolved transaction, ready to be signed and broadcast.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SerializedTransaction {
    pub chain_id: u64,

    #[schema(value_type = BytesDef)]
    pub data: Bytes,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,

    /// Gas limit, extra gas included
    pub gas: u64,

    #[schema(value_type = Option<AddressDef>)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,

    #[schema(value_type = Option<Vec<AccessListItemSchema>>)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_list: Option<AccessList>,

    #[schema(value_type = Option<U256Def>)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,

    #[schema(value_type = Option<Vec<SignedAuthorizationSchema>>)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_list: Option<Vec<SignedAuthorization>>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub transaction_type: Option<TransactionType>,

    #[schema(value_type = Option<String>)]
    #[serde(
        default,
        with = "alloy::serde::quantity::opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_fee_per_gas: Option<u128>,

    #[schema(value_type = Option<String>)]
    #[serde(
        default,
        with = "alloy::serde::quantity::opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_priority_fee_per_gas: Option<u128>,

    #[schema(value_type = Option<String>)]
    #[serde(
        default,
        with = "alloy::serde::quantity::opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub gas_price: Option<u128>,
}

impl SerializedTransaction {
    /// Converts into an alloy request, e.g. for `eth_sendTransaction` or a local signer.
    pub fn to_request(&self, from: Option<Address>) -> TransactionRequest {
        let mut request = TransactionRequest::default()
            .with_chain_id(self.chain_id)
            .with_gas_limit(self.gas);
        request.input = TransactionInput::new(self.data.clone());

        if let Some(from) = from {
            request = request.with_from(from);
        }
        if let Some(nonce) = self.nonce {
            request = request.with_nonce(nonce);
        }
        if let Some(to) = self.to {
            request = request.with_to(to);
        }
        if let Some(value) = self.value {
            request = request.with_value(value);
        }
        if let Some(access_list) = &self.access_list {
            request = request.with_access_list(access_list.clone());
        }
        if let Some(authorization_list) = &self.authorization_list {
            request = request.with_authorization_list(authorization_list.clone());
        }
        if let Some(max_fee) = self.max_fee_per_gas {
            request = request.with_max_fee_per_gas(max_fee);
        }
        if let Some(max_priority) = self.max_priority_fee_per_gas {
            request = request.with_max_priority_fee_per_gas(max_priority);
        }
        if let Some(gas_price) = self.gas_price {
            request = request.with_gas_price(gas_price);
        }
        if let Some(ty) = self.transaction_type {
            request.transaction_type = Some(ty.as_u8());
        }

        request
    }

    /// Builds the unsigned typed transaction. Fails if a field the envelope needs is
    /// missing, most commonly the nonce of a sender-less resolution.
    pub fn build_typed(&self, from: Option<Address>) -> Result<TypedTransaction, EngineError> {
        self.to_request(from)
            .build_typed_tx()
            .map_err(|request| EngineError::ValidationError {
                message: format!("Failed to build typed transaction: {request:?}"),
            })
    }
}

/// Who a transaction is resolved for. A bare address allows nonce lookups only; an
/// account can also sign.
#[derive(Clone)]
pub enum Sender {
    Address(Address),
    Account(Arc<dyn AccountSigner>),
}

impl Sender {
    pub fn address(&self) -> Address {
        match self {
            Sender::Address(address) => *address,
            Sender::Account(account) => account.address(),
        }
    }

    pub fn account(&self) -> Option<&Arc<dyn AccountSigner>> {
        match self {
            Sender::Address(_) => None,
            Sender::Account(account) => Some(account),
        }
    }
}

impl From<Address> for Sender {
    fn from(address: Address) -> Self {
        Sender::Address(address)
    }
}

impl fmt::Debug for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sender::Address(address) => f.debug_tuple("Address").field(address).finish(),
            Sender::Account(account) => f.debug_tuple("Account").field(&account.address()).finish(),
        }
    }
}
