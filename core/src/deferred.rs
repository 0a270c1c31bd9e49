use std::{fmt, future::Future, sync::Arc};

use futures::{FutureExt, future::BoxFuture};
use tokio::sync::OnceCell;

/// Error produced by a deferred field producer. Surfaced verbatim by resolution.
pub type DeferredError = Box<dyn std::error::Error + Send + Sync>;

pub type DeferredFuture<T> = BoxFuture<'static, Result<T, DeferredError>>;

type Producer<T> = Arc<dyn Fn() -> DeferredFuture<T> + Send + Sync>;

/// A transaction field that is either known up front or produced asynchronously
/// (an ENS lookup, an ABI encode that reads chain state, ...).
///
/// Producers are shared, so cloning a descriptor never re-creates them. Each `resolve`
/// call on a plain deferred field runs its producer again; [`MaybeDeferred::memoized`]
/// returns a copy whose producer runs at most once.
#[derive(Clone)]
pub enum MaybeDeferred<T> {
    Literal(T),
    Deferred(Producer<T>),
}

impl<T: Clone> MaybeDeferred<T> {
    pub fn deferred<F, Fut>(producer: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, DeferredError>> + Send + 'static,
    {
        MaybeDeferred::Deferred(Arc::new(move || producer().boxed()))
    }

    pub async fn resolve(&self) -> Result<T, DeferredError> {
        match self {
            MaybeDeferred::Literal(value) => Ok(value.clone()),
            MaybeDeferred::Deferred(producer) => producer().await,
        }
    }

    /// Copy of this field sharing a single producer run between all of its clones.
    /// A failure is replayed by message to every later caller.
    pub fn memoized(&self) -> Self
    where
        T: Send + Sync + 'static,
    {
        let producer = match self {
            MaybeDeferred::Literal(value) => return MaybeDeferred::Literal(value.clone()),
            MaybeDeferred::Deferred(producer) => producer.clone(),
        };
        let outcome: Arc<OnceCell<Result<T, String>>> = Arc::new(OnceCell::new());

        MaybeDeferred::Deferred(Arc::new(move || {
            let producer = producer.clone();
            let outcome = outcome.clone();
            async move {
                outcome
                    .get_or_init(|| async move { producer().await.map_err(|e| e.to_string()) })
                    .await
                    .clone()
                    .map_err(DeferredError::from)
            }
            .boxed()
        }))
    }

    pub fn as_literal(&self) -> Option<&T> {
        match self {
            MaybeDeferred::Literal(value) => Some(value),
            MaybeDeferred::Deferred(_) => None,
        }
    }
}

impl<T> From<T> for MaybeDeferred<T> {
    fn from(value: T) -> Self {
        MaybeDeferred::Literal(value)
    }
}

impl<T: fmt::Debug> fmt::Debug for MaybeDeferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaybeDeferred::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            MaybeDeferred::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Resolves an optional field; absent fields resolve to `None`.
pub async fn resolve_optional<T: Clone>(
    value: &Option<MaybeDeferred<T>>,
) -> Result<Option<T>, DeferredError> {
    match value {
        Some(value) => value.resolve().await.map(Some),
        None => Ok(None),
    }
}
