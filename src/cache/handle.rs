//! Store Handle Module
//!
//! Resolves constructor input into the single backend handle every cache
//! operation runs against.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::json;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::backend::{Client, ConnectOptions, Connector, Database, IndexSpec};
use crate::cache::EXPIRE_FIELD;
use crate::config::{StoreInput, StoreOptions};
use crate::error::{CacheError, Result};
use crate::uri::ConnectionUri;

/// Connection string used when no target is configured
pub const DEFAULT_URI: &str = "mongodb://127.0.0.1:27017";

/// Memoized initialization shared by every operation of one store.
pub(crate) type Ready = Shared<BoxFuture<'static, Result<Arc<StoreHandle>>>>;

// == Store Handle ==
/// A live database handle bound to one bucket.
pub struct StoreHandle {
    database: Arc<dyn Database>,
    /// Present only when the store opened the connection itself
    client: Option<Arc<dyn Client>>,
    bucket: String,
}

impl StoreHandle {
    pub fn database(&self) -> &Arc<dyn Database> {
        &self.database
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Returns true if closing the store closes the connection.
    pub fn owns_connection(&self) -> bool {
        self.client.is_some()
    }

    /// Closes the connection opened for this store.
    ///
    /// Handles supplied by the caller are left open.
    pub async fn close(&self) -> Result<()> {
        match &self.client {
            Some(client) => client.close().await,
            None => {
                debug!("Store handle for {} does not own its connection", self.bucket);
                Ok(())
            }
        }
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("database", &self.database.name())
            .field("bucket", &self.bucket)
            .field("owns_connection", &self.owns_connection())
            .finish()
    }
}

// == Startup Queue ==
/// First-come, first-served line for operations issued before the store is ready.
///
/// Waiters on the shared ready future all wake at once, so on their own they
/// would reach the backend in scheduler order. Operations queued here run one
/// at a time in the order they first asked for the handle. Once the handle is
/// resolved and the line is empty, operations bypass it.
#[derive(Debug, Default)]
pub(crate) struct StartupQueue {
    turn: Mutex<()>,
    waiting: AtomicUsize,
}

impl StartupQueue {
    /// Returns true when no operation is waiting in or holding the line.
    pub(crate) fn is_empty(&self) -> bool {
        self.waiting.load(Ordering::Acquire) == 0
    }

    /// Joins the line and waits for this operation's turn.
    ///
    /// # Returns
    /// A ticket holding the turn until it is dropped. Dropping it while still
    /// waiting leaves the line.
    pub(crate) async fn join(&self) -> Ticket<'_> {
        self.waiting.fetch_add(1, Ordering::AcqRel);
        let mut ticket = Ticket {
            queue: self,
            _turn: None,
        };
        ticket._turn = Some(self.turn.lock().await);
        ticket
    }
}

/// A place in the startup queue.
#[derive(Debug)]
pub(crate) struct Ticket<'a> {
    queue: &'a StartupQueue,
    _turn: Option<MutexGuard<'a, ()>>,
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        self.queue.waiting.fetch_sub(1, Ordering::AcqRel);
    }
}

// == Target ==
/// Where the connection comes from once input shapes are resolved.
#[derive(Debug)]
pub(crate) enum Target {
    Existing(Arc<dyn Database>),
    Uri(String),
}

/// Resolves input into a connection target and the store's settings.
///
/// Precedence: a supplied handle, an embedded client, discrete connection
/// fields, a connection string, then the local default.
pub(crate) fn resolve(input: StoreInput) -> (Target, StoreOptions) {
    match input {
        StoreInput::Handle(db, options) => (Target::Existing(db), options),
        StoreInput::Uri(uri, options) => (Target::Uri(uri), options),
        StoreInput::Options(options) => {
            let target = if let Some(client) = &options.client {
                Target::Existing(client.clone())
            } else if options.has_connection_fields() {
                Target::Uri(ConnectionUri::from_options(&options).to_string())
            } else {
                Target::Uri(DEFAULT_URI.to_string())
            };
            (target, options)
        }
    }
}

/// Builds driver options: internal defaults overlaid by the caller's extra keys.
pub fn connect_options(options: &StoreOptions) -> ConnectOptions {
    let mut merged = ConnectOptions::new();
    merged.insert("appName".to_string(), json!(env!("CARGO_PKG_NAME")));
    merged.insert("retryWrites".to_string(), json!(true));
    merged.extend(options.extra.clone());
    merged
}

// == Initialize ==
/// Starts the memoized initialization for one store.
///
/// The returned future connects at most once; its result, success or error,
/// is replayed to every clone. When called inside a runtime the connection is
/// started right away instead of on first use.
///
/// # Arguments
/// * `input` - Where the handle comes from and the store's settings
/// * `connector` - Dials connection strings; may be `None` for handle inputs
///
/// # Returns
/// The shared ready future and the settings taken from `input`.
pub(crate) fn initialize(
    input: StoreInput,
    connector: Option<Arc<dyn Connector>>,
) -> (Ready, StoreOptions) {
    let (target, options) = resolve(input);
    let bucket = options.collection_name().to_string();
    let driver_options = connect_options(&options);

    let ready = open(target, bucket, driver_options, connector).boxed().shared();

    if let Ok(runtime) = tokio::runtime::Handle::try_current() {
        runtime.spawn(ready.clone());
    }

    (ready, options)
}

async fn open(
    target: Target,
    bucket: String,
    driver_options: ConnectOptions,
    connector: Option<Arc<dyn Connector>>,
) -> Result<Arc<StoreHandle>> {
    let handle = match target {
        Target::Uri(uri) => {
            // Rejects blank strings and unknown schemes before dialing
            let parsed = ConnectionUri::parse(&uri)?;
            let connector = connector.ok_or_else(|| {
                CacheError::Configuration("no connector for a connection string".to_string())
            })?;
            let client = connector.connect(&uri, &driver_options).await?;
            let database = client.default_database()?;
            info!(
                "Connected to database {} via {} hosts, bucket {}",
                database.name(),
                parsed.hosts.len(),
                bucket
            );
            StoreHandle {
                database,
                client: Some(client),
                bucket,
            }
        }
        Target::Existing(database) => {
            info!(
                "Using supplied handle on database {}, bucket {}",
                database.name(),
                bucket
            );
            StoreHandle {
                database,
                client: None,
                bucket,
            }
        }
    };

    ensure_ttl_index(&handle).await;
    Ok(Arc::new(handle))
}

/// Creates the `expireAt` TTL index, tolerating failure.
async fn ensure_ttl_index(handle: &StoreHandle) {
    let spec = IndexSpec::ttl(EXPIRE_FIELD, 0);
    if let Err(e) = handle.database.ensure_index(&handle.bucket, &spec).await {
        warn!("Could not ensure TTL index on {}: {}", handle.bucket, e);
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryConnector;
    use crate::config::HostSpec;
    use crate::error::CacheError;

    fn uri_of(target: &Target) -> &str {
        match target {
            Target::Uri(uri) => uri,
            Target::Existing(_) => panic!("expected a connection string"),
        }
    }

    #[test]
    fn test_resolve_default() {
        let (target, options) = resolve(StoreInput::default());
        assert_eq!(uri_of(&target), DEFAULT_URI);
        assert_eq!(options.collection_name(), "cacheman");
    }

    #[test]
    fn test_resolve_handle_wins() {
        let db: Arc<dyn Database> = MemoryConnector::new().database("app");
        let (target, _) = resolve(StoreInput::handle(db));
        assert!(matches!(target, Target::Existing(ref db) if db.name() == "app"));
    }

    #[test]
    fn test_resolve_embedded_client_wins_over_fields() {
        let db: Arc<dyn Database> = MemoryConnector::new().database("embedded");
        let options = StoreOptions {
            host: Some("ignored".to_string()),
            ..StoreOptions::default()
        }
        .with_client(db);

        let (target, _) = resolve(StoreInput::Options(options));
        assert!(matches!(target, Target::Existing(ref db) if db.name() == "embedded"));
    }

    #[test]
    fn test_resolve_synthesizes_uri_from_fields() {
        let options = StoreOptions {
            hosts: vec![HostSpec::new("a", 1), HostSpec::new("b", 2)],
            database: Some("app".to_string()),
            ..StoreOptions::default()
        };

        let (target, _) = resolve(StoreInput::Options(options));
        assert_eq!(uri_of(&target), "mongodb://a:1,b:2/app");
    }

    #[test]
    fn test_resolve_uri_is_used_verbatim() {
        let (target, _) = resolve(StoreInput::uri("mongodb://h:9/x"));
        assert_eq!(uri_of(&target), "mongodb://h:9/x");
    }

    #[test]
    fn test_connect_options_caller_wins() {
        let mut options = StoreOptions::default();
        options.extra.insert("retryWrites".to_string(), json!(false));
        options.extra.insert("maxPoolSize".to_string(), json!(5));

        let merged = connect_options(&options);
        assert_eq!(merged["retryWrites"], json!(false));
        assert_eq!(merged["maxPoolSize"], json!(5));
        assert_eq!(merged["appName"], json!("doc_cache"));
    }

    #[tokio::test]
    async fn test_initialize_creates_ttl_index() {
        let connector = MemoryConnector::new();
        let (ready, _) = initialize(
            StoreInput::uri("mongodb://localhost/app"),
            Some(Arc::new(connector.clone())),
        );

        let handle = ready.await.unwrap();
        assert!(handle.owns_connection());
        assert_eq!(handle.bucket(), "cacheman");
        assert_eq!(
            connector.server().indexes("app", "cacheman").await,
            vec![IndexSpec::ttl(EXPIRE_FIELD, 0)]
        );
    }

    #[tokio::test]
    async fn test_initialize_swallows_index_conflict() {
        let connector = MemoryConnector::new();
        let db = connector.database("app");
        db.ensure_index("cacheman", &IndexSpec::ttl(EXPIRE_FIELD, 30))
            .await
            .unwrap();

        let (ready, _) = initialize(StoreInput::handle(db), None);
        let handle = ready.await.unwrap();
        assert!(!handle.owns_connection());
    }

    #[tokio::test]
    async fn test_initialize_replays_errors() {
        let (ready, _) = initialize(StoreInput::uri("   "), Some(Arc::new(MemoryConnector::new())));

        let first = ready.clone().await.unwrap_err();
        let second = ready.await.unwrap_err();
        assert!(matches!(first, CacheError::Configuration(_)));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_initialize_uri_without_connector() {
        let (ready, _) = initialize(StoreInput::uri("mongodb://localhost/app"), None);

        let result = ready.await;
        assert!(matches!(result, Err(CacheError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_startup_queue_serves_in_order() {
        let queue = Arc::new(StartupQueue::default());
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = queue.join().await;
        assert!(!queue.is_empty());

        let waiters: Vec<_> = (0..4)
            .map(|i| {
                let queue = queue.clone();
                let order = order.clone();
                tokio::spawn(async move {
                    let _ticket = queue.join().await;
                    order.lock().await.push(i);
                })
            })
            .collect();

        // Let every waiter join the line, in spawn order
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        drop(first);
        for waiter in waiters {
            waiter.await.unwrap();
        }

        assert!(queue.is_empty());
        assert_eq!(*order.lock().await, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_abandoned_ticket_leaves_line() {
        let queue = StartupQueue::default();
        let held = queue.join().await;

        // Cancelled while waiting for its turn
        let timeout = std::time::Duration::from_millis(10);
        let waiting = tokio::time::timeout(timeout, queue.join()).await;
        assert!(waiting.is_err());

        drop(held);
        assert!(queue.is_empty());
    }
}
