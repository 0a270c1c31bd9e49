use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, utoipa::ToSchema)]
#[schema(title = "EVM Address")]
/// Used to represent an EVM address. This is a string of length 42 with a `0x` prefix.
pub struct AddressDef(pub String);

#[derive(Serialize, Deserialize, Clone, utoipa::ToSchema)]
#[schema(title = "Bytes")]
/// Used to represent "bytes". This is a 0x prefixed hex string.
pub struct BytesDef(pub String);

#[derive(Serialize, Deserialize, Clone, utoipa::ToSchema)]
#[schema(title = "U256")]
/// Used to represent a 256-bit unsigned integer as an Ethereum "quantity" string.
pub struct U256Def(pub String);

/// EIP-7702 Signed Authorization structure for OpenAPI schema
#[derive(Serialize, Deserialize, Debug, Clone, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(title = "EIP-7702 Signed Authorization")]
pub struct SignedAuthorizationSchema {
    #[schema(value_type = U256Def, example = "1")]
    pub chain_id: String,

    /// The contract the EOA delegates to
    #[schema(value_type = AddressDef)]
    pub address: String,

    #[schema(example = 42)]
    pub nonce: u64,

    #[serde(rename = "yParity", alias = "v")]
    #[schema(example = 0)]
    pub y_parity: u8,

    #[schema(value_type = U256Def)]
    pub r: String,

    #[schema(value_type = U256Def)]
    pub s: String,
}

/// EIP-2930 access list entry for OpenAPI schema
#[derive(Serialize, Deserialize, Debug, Clone, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(title = "Access List Item")]
pub struct AccessListItemSchema {
    #[schema(value_type = AddressDef)]
    pub address: String,

    /// 32-byte storage slots, 0x prefixed
    pub storage_keys: Vec<String>,
}
