//! Optimistic mutations over the query cache
//!
//! A mutation applies its effect to the cached data before the request is
//! sent, then either reconciles with the server's answer or rolls back to the
//! snapshot taken beforehand.

use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::cache::{QueryCache, QueryKey};
use crate::error::{Result, SyncError};

type MutationFn<V, R> = Arc<dyn Fn(V) -> BoxFuture<'static, Result<R>> + Send + Sync>;
type UpdaterFn<T, V> = Arc<dyn Fn(&mut T, &V) + Send + Sync>;

/// What to do with the cached data once the server confirms
pub enum Reconcile<T, R> {
    /// Keep the optimistic state
    Keep,
    /// Overwrite the cache with the mapped server response
    Replace(Arc<dyn Fn(R) -> T + Send + Sync>),
    /// Fold the server response into the cached data, when there is any
    Merge(Arc<dyn Fn(&mut T, R) + Send + Sync>),
}

impl<T, R> Clone for Reconcile<T, R> {
    fn clone(&self) -> Self {
        match self {
            Self::Keep => Self::Keep,
            Self::Replace(f) => Self::Replace(Arc::clone(f)),
            Self::Merge(f) => Self::Merge(Arc::clone(f)),
        }
    }
}

/// Snapshot, apply, confirm or roll back
///
/// `T` is the cached type, `V` the mutation variables, `R` the server reply.
pub struct OptimisticMutation<T, V, R> {
    cache: QueryCache,
    key: QueryKey,
    mutation: MutationFn<V, R>,
    updater: Option<UpdaterFn<T, V>>,
    reconcile: Reconcile<T, R>,
}

impl<T, V, R> Clone for OptimisticMutation<T, V, R> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            key: self.key.clone(),
            mutation: Arc::clone(&self.mutation),
            updater: self.updater.clone(),
            reconcile: self.reconcile.clone(),
        }
    }
}

impl<T, V, R> OptimisticMutation<T, V, R>
where
    T: Clone + Send + Sync + 'static,
    V: Send + 'static,
    R: Clone + Send + 'static,
{
    /// Bind a request function to a cache key
    pub fn new<F, Fut, E>(cache: QueryCache, key: QueryKey, mutation: F) -> Self
    where
        F: Fn(V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        E: Into<SyncError> + 'static,
    {
        let mutation: MutationFn<V, R> =
            Arc::new(move |vars| mutation(vars).map(|r| r.map_err(Into::into)).boxed());
        Self {
            cache,
            key,
            mutation,
            updater: None,
            reconcile: Reconcile::Keep,
        }
    }

    /// Optimistic edit applied to a copy of the cached data before the request
    #[must_use]
    pub fn with_updater(mut self, updater: impl Fn(&mut T, &V) + Send + Sync + 'static) -> Self {
        self.updater = Some(Arc::new(updater));
        self
    }

    /// Replace the cached data with `map(response)` on success
    #[must_use]
    pub fn replace_with(mut self, map: impl Fn(R) -> T + Send + Sync + 'static) -> Self {
        self.reconcile = Reconcile::Replace(Arc::new(map));
        self
    }

    /// Merge the response into the cached data on success
    #[must_use]
    pub fn on_success_merge(mut self, merge: impl Fn(&mut T, R) + Send + Sync + 'static) -> Self {
        self.reconcile = Reconcile::Merge(Arc::new(merge));
        self
    }

    #[inline]
    #[must_use]
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Run the mutation
    ///
    /// The cache holds the optimistic state as soon as this is called (before
    /// the first `.await`), and the key is left stale either way.
    ///
    /// # Errors
    /// The request's error, after the snapshot has been restored
    pub async fn mutate(&self, vars: V) -> Result<R> {
        self.cache.cancel_queries(&self.key);
        let snapshot = self.cache.get::<T>(&self.key);

        if let (Some(updater), Some(_)) = (&self.updater, &snapshot) {
            self.cache
                .update::<T, _>(&self.key, |data| updater(data, &vars));
            tracing::debug!("Applied optimistic update to {}", self.key);
        }

        let outcome = (self.mutation)(vars).await;

        match &outcome {
            Ok(response) => match &self.reconcile {
                Reconcile::Keep => {}
                Reconcile::Replace(map) => {
                    self.cache.set(&self.key, map(response.clone()));
                    tracing::debug!("Replaced {} with server response", self.key);
                }
                Reconcile::Merge(merge) => {
                    self.cache
                        .update::<T, _>(&self.key, |data| merge(data, response.clone()));
                }
            },
            Err(e) => {
                if let Some(previous) = snapshot {
                    self.cache.set(&self.key, previous);
                    tracing::warn!("Mutation on {} failed, rolled back: {}", self.key, e);
                } else {
                    tracing::warn!("Mutation on {} failed: {}", self.key, e);
                }
            }
        }

        self.cache.invalidate(&self.key);
        outcome
    }
}

impl<T, V> OptimisticMutation<T, V, T>
where
    T: Clone + Send + Sync + 'static,
    V: Send + 'static,
{
    /// Replace the cache with the server response verbatim
    #[must_use]
    pub fn auto_replace(self) -> Self {
        self.replace_with(|response| response)
    }
}
