pub mod chain;
pub mod deferred;
pub mod defs;
pub mod error;
pub mod rpc_clients;
pub mod signer;
pub mod transaction;
