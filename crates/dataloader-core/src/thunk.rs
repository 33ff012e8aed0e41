//! Deferred results
//!
//! A loader hands out a [`Thunk`] as soon as a key is requested and resolves
//! it once the batch containing the key has run. Every clone observes the
//! same result; the underlying future runs at most once.

use crate::error::{LoadError, Result};
use crate::LoadResult;
use futures::future::{self, BoxFuture, FutureExt, Shared};
use std::fmt;
use std::future::Future;
use tokio::sync::oneshot;

/// A resolve-once, read-many handle on an eventual result
pub struct Deferred<T> {
    inner: Shared<BoxFuture<'static, Result<T>>>,
}

/// Deferred result of loading one key
pub type Thunk<V> = Deferred<V>;

/// Deferred results of loading many keys, one entry per key in request order
pub type ThunkMany<V> = Deferred<Vec<LoadResult<V>>>;

impl<T> Deferred<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an already-resolved handle
    pub fn ready(result: Result<T>) -> Self {
        let deferred = Self::from_future(future::ready(result));
        // Drive the shared future once so `peek` sees the value immediately.
        let _ = deferred.inner.clone().now_or_never();
        deferred
    }

    /// Create a handle backed by a future that is polled on first read
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            inner: future.boxed().shared(),
        }
    }

    /// Create a pending handle together with its single-use resolver
    pub fn channel() -> (Resolver<T>, Self) {
        let (tx, rx) = oneshot::channel();
        let deferred =
            Self::from_future(async move { rx.await.unwrap_or(Err(LoadError::Canceled)) });
        (Resolver { tx }, deferred)
    }

    /// Wait for the result
    pub async fn get(&self) -> Result<T> {
        self.inner.clone().await
    }

    /// Get the result if some reader has already driven it to completion
    pub fn peek(&self) -> Option<&Result<T>> {
        self.inner.peek()
    }

    /// Poll once without blocking, then return the result if it is available
    pub fn try_resolve(&self) -> Option<&Result<T>> {
        if self.inner.peek().is_none() {
            let _ = self.inner.clone().now_or_never();
        }
        self.inner.peek()
    }

    /// Check whether the result has been produced and observed
    pub fn is_resolved(&self) -> bool {
        self.peek().is_some()
    }
}

impl<V> Deferred<Vec<LoadResult<V>>>
where
    V: Clone + Send + Sync + 'static,
{
    /// Combine single-key thunks into one batch handle, preserving order
    pub fn join(thunks: Vec<Thunk<V>>) -> Self {
        Self::from_future(async move {
            let results = future::join_all(thunks.iter().map(|thunk| thunk.get())).await;
            Ok(results)
        })
    }
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Deferred<T>
where
    T: Clone + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.peek() {
            Some(result) => f.debug_tuple("Deferred").field(result).finish(),
            None => f.write_str("Deferred(<pending>)"),
        }
    }
}

/// Single-use sender that resolves a [`Deferred`] created by [`Deferred::channel`]
///
/// Dropping the resolver without calling [`Resolver::resolve`] resolves the
/// handle to [`LoadError::Canceled`].
pub struct Resolver<T> {
    tx: oneshot::Sender<Result<T>>,
}

impl<T> Resolver<T> {
    /// Resolve the paired handle. No-op if every handle has been dropped.
    pub fn resolve(self, result: Result<T>) {
        let _ = self.tx.send(result);
    }

    /// Check whether every paired handle has been dropped
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("abandoned", &self.tx.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_is_resolved_without_polling() {
        let thunk: Thunk<u32> = Thunk::ready(Ok(7));

        assert!(thunk.is_resolved());
        assert_eq!(thunk.peek(), Some(&Ok(7)));
    }

    #[test]
    fn test_pending_channel_is_not_resolved() {
        let (_resolver, thunk) = Thunk::<u32>::channel();

        assert!(!thunk.is_resolved());
        assert!(thunk.try_resolve().is_none());
    }

    #[test]
    fn test_try_resolve_after_resolver_sends() {
        let (resolver, thunk) = Thunk::<&'static str>::channel();
        resolver.resolve(Ok("value"));

        assert_eq!(thunk.try_resolve(), Some(&Ok("value")));
        assert!(thunk.is_resolved());
    }

    #[test]
    fn test_debug_formatting() {
        let thunk: Thunk<u32> = Thunk::ready(Err(LoadError::NotFound("k1".to_string())));
        let rendered = format!("{:?}", thunk);
        assert!(rendered.contains("NotFound"));

        let (_resolver, pending) = Thunk::<u32>::channel();
        assert_eq!(format!("{:?}", pending), "Deferred(<pending>)");
    }
}
