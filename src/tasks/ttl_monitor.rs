//! TTL Monitor Task
//!
//! Background sweep of the in-memory document server. Like the monitor of a
//! real document server it runs on a fixed interval, so expired documents may
//! linger for up to one interval; readers must not rely on it.

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::backend::memory::MemoryServer;

/// Spawns a task that periodically removes expired documents.
///
/// Only buckets carrying a TTL index on `expireAt` are swept.
///
/// # Returns
/// A JoinHandle for the spawned task; the owning client aborts it on close.
///
/// # Example
/// ```ignore
/// let server = MemoryServer::new();
/// let monitor = spawn_ttl_monitor(server.clone(), Duration::from_secs(60));
/// // Later, when the connection closes:
/// monitor.abort();
/// ```
pub fn spawn_ttl_monitor(server: MemoryServer, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Starting TTL monitor with interval of {:?}", interval);

        loop {
            tokio::time::sleep(interval).await;

            let removed = server.purge_expired(Utc::now()).await;

            if removed > 0 {
                info!("TTL monitor: removed {} expired documents", removed);
            } else {
                debug!("TTL monitor: no expired documents found");
            }
        }
    })
}
