use alloy::{
    consensus::{SignableTransaction, Signed, TypedTransaction},
    primitives::{Address, B256, Signature},
    signers::{Signer, local::PrivateKeySigner},
};
use async_trait::async_trait;

use crate::{error::EngineError, transaction::SerializedTransaction};

/// Account capability: an address that can also produce signatures.
#[async_trait]
pub trait AccountSigner: Send + Sync {
    fn address(&self) -> Address;

    async fn sign_hash(&self, hash: &B256) -> Result<Signature, EngineError>;
}

#[async_trait]
impl AccountSigner for PrivateKeySigner {
    fn address(&self) -> Address {
        Signer::address(self)
    }

    async fn sign_hash(&self, hash: &B256) -> Result<Signature, EngineError> {
        Signer::sign_hash(self, hash)
            .await
            .map_err(|e| EngineError::SigningError {
                message: format!("Failed to sign transaction hash: {e}"),
            })
    }
}

/// Builds the typed transaction for a resolved record and signs it with `account`.
#[tracing::instrument(skip_all, fields(from = %account.address(), chain_id = transaction.chain_id))]
pub async fn sign_serialized(
    account: &dyn AccountSigner,
    transaction: &SerializedTransaction,
) -> Result<Signed<TypedTransaction>, EngineError> {
    let typed_tx = transaction.build_typed(Some(account.address()))?;
    let signature = account.sign_hash(&typed_tx.signature_hash()).await?;

    tracing::debug!("Transaction signed");

    Ok(typed_tx.into_signed(signature))
}
