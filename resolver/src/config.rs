use std::{path::Path, time::Duration};

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_FEE_BUMP_PERCENT;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Deadline applied to every resolution step
    pub rpc_timeout_ms: u64,
    pub fee_bump_percent: u32,
    /// Chains priced with `gasPrice` in addition to the built-in list
    pub legacy_fee_chain_ids: Vec<u64>,
    /// zkSync-stack chains in addition to the built-in list
    pub variant_chain_ids: Vec<u64>,
    /// Per sender limit of the sequential nonce allocator
    pub max_in_flight: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            rpc_timeout_ms: 15_000,
            fee_bump_percent: DEFAULT_FEE_BUMP_PERCENT,
            legacy_fee_chain_ids: Vec::new(),
            variant_chain_ids: Vec::new(),
            max_in_flight: 100,
        }
    }
}

impl ResolverConfig {
    /// Layers an optional YAML file and `TXPREP__*` environment variables over the defaults.
    /// Lists are comma separated in the environment, e.g. `TXPREP__VARIANT_CHAIN_IDS=1,2`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        builder
            .add_source(
                Environment::with_prefix("txprep")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("legacy_fee_chain_ids")
                    .with_list_parse_key("variant_chain_ids"),
            )
            .build()?
            .try_deserialize()
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}
