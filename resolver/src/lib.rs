pub mod classifier;
pub mod config;
pub mod constants;
pub mod encoder;
pub mod error;
pub mod fees;
mod fields;
pub mod gas;
pub mod nonce;
pub mod resolver;
pub mod variant;

pub use error::{NonceAllocationError, ResolutionError, ResolutionStage};
pub use resolver::{ResolveOptions, TransactionResolver, TransactionResolverBuilder};
