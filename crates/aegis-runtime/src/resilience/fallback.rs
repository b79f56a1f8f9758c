//! Fallbacks of last resort.

use futures::future::{self, BoxFuture, FutureExt};
use std::future::Future;

type FallbackFn<'a, T> = Box<dyn FnOnce() -> BoxFuture<'a, anyhow::Result<T>> + Send + 'a>;

/// What to run when the primary is unavailable or exhausted.
///
/// Fallbacks should be cheap: a canned value, a heuristic, a cheaper model.
pub struct Fallback<'a, T> {
    run: FallbackFn<'a, T>,
}

impl<'a, T: Send + 'a> Fallback<'a, T> {
    /// Always resolve to `value`.
    pub fn value(value: T) -> Self {
        Self {
            run: Box::new(move || future::ready(Ok(value)).boxed()),
        }
    }

    /// Compute synchronously.
    pub fn sync<F>(f: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'a,
    {
        Self {
            run: Box::new(move || future::ready(f()).boxed()),
        }
    }

    /// Compute asynchronously.
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'a,
    {
        Self {
            run: Box::new(move || f().boxed()),
        }
    }

    /// A fallback that always fails; the run then relies on fallback data.
    pub fn unavailable(reason: &'static str) -> Self {
        Self::sync(move || Err(anyhow::anyhow!(reason)))
    }

    pub(crate) fn invoke(self) -> BoxFuture<'a, anyhow::Result<T>> {
        (self.run)()
    }
}

impl<T> std::fmt::Debug for Fallback<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fallback").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_constructors() {
        assert_eq!(Fallback::value(1).invoke().await.unwrap(), 1);
        assert_eq!(Fallback::sync(|| Ok(2)).invoke().await.unwrap(), 2);
        assert_eq!(
            Fallback::future(|| async { Ok(3) }).invoke().await.unwrap(),
            3
        );
        assert!(Fallback::<u8>::unavailable("none").invoke().await.is_err());
    }

    #[tokio::test]
    async fn test_sync_fallback_runs_only_when_invoked() {
        let ran = std::sync::atomic::AtomicBool::new(false);
        let fallback = Fallback::sync(|| {
            ran.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok("heuristic")
        });
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));

        fallback.invoke().await.unwrap();
        assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
    }
}
