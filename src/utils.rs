use std::ops::{Deref, DerefMut};

use tokio::signal;
use tracing::{error, warn};

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
///
/// If one handler cannot be installed the error is logged and only the other
/// signal is awaited.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

/// A value that runs a closure on it when dropped.
///
/// The value stays reachable through `Deref`/`DerefMut` while the guard is
/// alive, so callers can fill it in as work progresses and have the closure
/// observe the final state however the scope ends (return, `?`, or the
/// enclosing future being dropped).
pub struct ScopeGuard<T, F: FnOnce(T)> {
    value: Option<T>,
    dropper: Option<F>,
}

impl<T, F: FnOnce(T)> Deref for ScopeGuard<T, F> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.value {
            Some(value) => value,
            // Only emptied inside `drop`
            None => unreachable!("scope guard value taken before drop"),
        }
    }
}

impl<T, F: FnOnce(T)> DerefMut for ScopeGuard<T, F> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.value {
            Some(value) => value,
            None => unreachable!("scope guard value taken before drop"),
        }
    }
}

impl<T, F: FnOnce(T)> Drop for ScopeGuard<T, F> {
    fn drop(&mut self) {
        if let (Some(value), Some(dropper)) = (self.value.take(), self.dropper.take()) {
            dropper(value);
        }
    }
}

/// Create a scope guard that will execute `dropper` with `value` when dropped.
///
/// # Example
///
/// ```rust,ignore
/// let mut record = guard(Outcome::Cancelled, |outcome| log(outcome));
/// let response = inner.call(req).await?;
/// *record = Outcome::Completed(response.status());
/// ```
pub fn guard<T, F: FnOnce(T)>(value: T, dropper: F) -> ScopeGuard<T, F> {
    ScopeGuard {
        value: Some(value),
        dropper: Some(dropper),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_guard_runs_once_with_final_value() {
        let seen = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));

        {
            let seen = seen.clone();
            let calls = calls.clone();
            let mut g = guard(1usize, move |v| {
                seen.store(v, Ordering::SeqCst);
                calls.fetch_add(1, Ordering::SeqCst);
            });
            *g += 41;
            assert_eq!(*g, 42);
        }

        assert_eq!(seen.load(Ordering::SeqCst), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_guard_runs_when_future_is_dropped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_future = calls.clone();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();

        let fut = async move {
            let _g = guard((), move |_| {
                calls_in_future.fetch_add(1, Ordering::SeqCst);
            });
            let _ = started_tx.send(());
            std::future::pending::<()>().await;
        };

        let handle = tokio::spawn(fut);
        started_rx.await.unwrap();
        handle.abort();
        let _ = handle.await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
