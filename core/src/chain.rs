use alloy::{
    eips::BlockNumberOrTag,
    primitives::{Address, Bytes, U64},
    providers::{Provider, RootProvider},
    rpc::{client::RpcClient, types::TransactionRequest},
    transports::http::reqwest::{
        ClientBuilder as HttpClientBuilder, Url,
        header::{HeaderMap, HeaderValue},
    },
};
use async_trait::async_trait;

use crate::{
    error::{AlloyRpcErrorToEngineError, EngineError},
    rpc_clients::{EvmRpc, ZkFeeEstimate, transport::HeaderTransport},
};

/// Chain id of a local anvil / hardhat node
pub const LOCAL_CHAIN_ID: u64 = 31337;

const LOCAL_RPC_URL: &str = "http://127.0.0.1:8545";

pub trait Chain: Send + Sync {
    fn chain_id(&self) -> u64;
    fn rpc_url(&self) -> Url;
    fn rpc(&self) -> &dyn EvmRpc;
}

pub struct ThirdwebChainConfig<'a> {
    pub secret_key: &'a str,
    pub client_id: &'a str,
    pub chain_id: u64,
    pub rpc_base_url: &'a str,
}

#[derive(Clone, Debug)]
pub struct ThirdwebChain {
    chain_id: u64,
    rpc_url: Url,
    pub provider: RootProvider,
}

impl ThirdwebChain {
    /// Chain backed by an arbitrary JSON-RPC endpoint, without thirdweb credentials
    pub fn with_rpc_url(chain_id: u64, rpc_url: Url) -> Result<Self, EngineError> {
        Self::build(chain_id, rpc_url, HeaderMap::new())
    }

    fn build(chain_id: u64, rpc_url: Url, headers: HeaderMap) -> Result<Self, EngineError> {
        let reqwest_client =
            HttpClientBuilder::new()
                .build()
                .map_err(|e| EngineError::RpcConfigError {
                    message: format!("Failed to build HTTP client: {e}"),
                })?;

        let transport = HeaderTransport::new(reqwest_client, rpc_url.clone(), headers);
        let rpc_client = RpcClient::builder().transport(transport, false);

        Ok(ThirdwebChain {
            chain_id,
            rpc_url,
            provider: RootProvider::new(rpc_client),
        })
    }
}

impl Chain for ThirdwebChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn rpc_url(&self) -> Url {
        self.rpc_url.clone()
    }

    fn rpc(&self) -> &dyn EvmRpc {
        self
    }
}

impl ThirdwebChainConfig<'_> {
    pub fn rpc_url(&self) -> Result<Url, EngineError> {
        let raw = if self.chain_id == LOCAL_CHAIN_ID {
            LOCAL_RPC_URL.to_string()
        } else {
            format!(
                "https://{chain_id}.{base_url}/{client_id}",
                chain_id = self.chain_id,
                base_url = self.rpc_base_url,
                client_id = self.client_id,
            )
        };

        Url::parse(&raw).map_err(|e| EngineError::RpcConfigError {
            message: format!("Failed to parse RPC URL: {e}"),
        })
    }

    pub fn to_chain(&self) -> Result<ThirdwebChain, EngineError> {
        let rpc_url = self.rpc_url()?;
        let mut headers = HeaderMap::new();

        // anvil takes no credentials
        if self.chain_id != LOCAL_CHAIN_ID {
            headers.insert(
                "x-client-id",
                HeaderValue::from_str(self.client_id).map_err(|e| EngineError::RpcConfigError {
                    message: format!("Unserialisable client-id used: {e}"),
                })?,
            );
            headers.insert(
                "x-secret-key",
                HeaderValue::from_str(self.secret_key).map_err(|e| {
                    EngineError::RpcConfigError {
                        message: format!("Unserialisable secret-key used: {e}"),
                    }
                })?,
            );
        }

        ThirdwebChain::build(self.chain_id, rpc_url, headers)
    }
}

#[async_trait]
impl EvmRpc for ThirdwebChain {
    async fn get_transaction_count(
        &self,
        address: Address,
        block: BlockNumberOrTag,
    ) -> Result<u64, EngineError> {
        self.provider
            .get_transaction_count(address)
            .block_id(block.into())
            .await
            .map_err(|e| e.to_engine_error(self))
    }

    async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64, EngineError> {
        self.provider
            .estimate_gas(request.clone())
            .await
            .map_err(|e| e.to_engine_error(self))
    }

    async fn call(&self, request: &TransactionRequest) -> Result<Bytes, EngineError> {
        self.provider
            .call(request.clone())
            .await
            .map_err(|e| e.to_engine_error(self))
    }

    async fn gas_price(&self) -> Result<u128, EngineError> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| e.to_engine_error(self))
    }

    async fn max_priority_fee_per_gas(&self) -> Result<u128, EngineError> {
        self.provider
            .get_max_priority_fee_per_gas()
            .await
            .map_err(|e| e.to_engine_error(self))
    }

    async fn latest_base_fee_per_gas(&self) -> Result<Option<u128>, EngineError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await
            .map_err(|e| e.to_engine_error(self))?;

        Ok(block.and_then(|block| block.header.base_fee_per_gas.map(u128::from)))
    }

    async fn zks_l1_chain_id(&self) -> Result<u64, EngineError> {
        let id: U64 = self
            .provider
            .raw_request("zks_L1ChainId".into(), ())
            .await
            .map_err(|e| e.to_engine_error(self))?;

        Ok(id.to::<u64>())
    }

    async fn zks_estimate_fee(
        &self,
        request: &TransactionRequest,
    ) -> Result<ZkFeeEstimate, EngineError> {
        self.provider
            .raw_request("zks_estimateFee".into(), (request.clone(),))
            .await
            .map_err(|e| e.to_engine_error(self))
    }
}
