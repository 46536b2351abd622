//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use doc_cache::backend::{Client, ConnectOptions, Connector, MemoryConnector};
use doc_cache::Result;

/// Initialize test logging (safe to call from every test).
pub fn init_test_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,doc_cache=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Connector that delays every connection and counts attempts.
#[derive(Clone)]
pub struct SlowConnector {
    pub inner: MemoryConnector,
    pub delay: Duration,
    pub attempts: Arc<AtomicUsize>,
}

impl SlowConnector {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryConnector::new(),
            delay,
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for SlowConnector {
    async fn connect(&self, uri: &str, options: &ConnectOptions) -> Result<Arc<dyn Client>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.connect(uri, options).await
    }
}
