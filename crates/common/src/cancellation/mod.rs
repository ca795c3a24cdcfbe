//! Cooperative cancellation and deadlines for external calls
//!
//! Embedding, vector-store, and LLM calls are raced against an optional
//! caller-owned [`CancellationToken`] and an optional per-call timeout.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::errors::{AppError, Result};

/// Cooperative cancellation token shared between a caller and a query
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    /// Create a new token (not cancelled)
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake every waiter
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Applies the configured deadline and cancellation to upstream futures
#[derive(Debug, Clone, Default)]
pub struct UpstreamGuard {
    timeout: Option<Duration>,
    token: Option<CancellationToken>,
}

impl UpstreamGuard {
    pub fn new(timeout: Option<Duration>, token: Option<CancellationToken>) -> Self {
        Self { timeout, token }
    }

    /// Guard that never interrupts anything
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Fail fast if the caller already gave up
    pub fn check(&self) -> Result<()> {
        match &self.token {
            Some(token) if token.is_cancelled() => Err(AppError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Run `fut`, failing with `Cancelled` or `Timeout` if either fires first
    pub async fn run<T, F>(&self, service: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;

        let deadline = async {
            match self.timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        let cancelled = async {
            match &self.token {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            result = fut => result,
            _ = cancelled => {
                tracing::debug!(service, "Upstream call cancelled");
                Err(AppError::Cancelled)
            }
            _ = deadline => {
                let timeout_ms = self.timeout.map(|t| t.as_millis() as u64).unwrap_or_default();
                tracing::warn!(service, timeout_ms, "Upstream call timed out");
                Err(AppError::Timeout {
                    service: service.to_string(),
                    timeout_ms,
                })
            }
        }
    }
}
