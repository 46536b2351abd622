//! Configuration Module
//!
//! Store options and the accepted constructor inputs.

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::backend::Database;

/// Host used when nothing else is configured
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Port used when nothing else is configured
pub const DEFAULT_PORT: u16 = 27017;

/// Bucket (collection) used when none is configured
pub const DEFAULT_COLLECTION: &str = "cacheman";

/// Default entry lifetime in seconds
pub const DEFAULT_TTL: u64 = 60;

// == Host Spec ==
/// One member of a host list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HostSpec {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
}

impl HostSpec {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port: Some(port),
        }
    }
}

impl fmt::Display for HostSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => write!(f, "{}", self.host),
        }
    }
}

// == Store Options ==
/// Options recognised by the store.
///
/// Keys that are not recognised are collected into `extra` and handed to the
/// connector unchanged.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(alias = "db")]
    pub database: Option<String>,
    /// Bucket name, defaults to [`DEFAULT_COLLECTION`]
    pub collection: Option<String>,
    /// Gzip binary payloads before storage
    pub compression: bool,
    /// Gzip level 0-9, flate2's default when unset
    pub compression_level: Option<u32>,
    /// Default TTL in seconds for writes without one
    pub ttl: Option<u64>,
    pub hosts: Vec<HostSpec>,
    /// Query parameters appended to a synthesized connection string
    #[serde(rename = "options")]
    pub uri_options: BTreeMap<String, String>,
    /// Pre-connected handle, used instead of opening a connection
    #[serde(skip)]
    pub client: Option<Arc<dyn Database>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl StoreOptions {
    // == From Env ==
    /// Loads options from environment variables.
    ///
    /// # Environment Variables
    /// - `DOC_CACHE_HOST`, `DOC_CACHE_PORT`
    /// - `DOC_CACHE_USERNAME`, `DOC_CACHE_PASSWORD`
    /// - `DOC_CACHE_DATABASE`, `DOC_CACHE_COLLECTION`
    /// - `DOC_CACHE_COMPRESSION` - `true`/`1` enables gzip (default: off)
    /// - `DOC_CACHE_TTL` - default TTL in seconds (default: 60)
    pub fn from_env() -> Self {
        Self {
            host: env::var("DOC_CACHE_HOST").ok(),
            port: env::var("DOC_CACHE_PORT").ok().and_then(|v| v.parse().ok()),
            username: env::var("DOC_CACHE_USERNAME").ok(),
            password: env::var("DOC_CACHE_PASSWORD").ok(),
            database: env::var("DOC_CACHE_DATABASE").ok(),
            collection: env::var("DOC_CACHE_COLLECTION").ok(),
            compression: env::var("DOC_CACHE_COMPRESSION")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            ttl: env::var("DOC_CACHE_TTL").ok().and_then(|v| v.parse().ok()),
            ..Self::default()
        }
    }

    /// Returns true if any field describing a connection target is set.
    pub fn has_connection_fields(&self) -> bool {
        self.host.is_some()
            || self.port.is_some()
            || self.username.is_some()
            || self.password.is_some()
            || self.database.is_some()
            || !self.hosts.is_empty()
            || !self.uri_options.is_empty()
    }

    pub fn collection_name(&self) -> &str {
        self.collection.as_deref().unwrap_or(DEFAULT_COLLECTION)
    }

    pub fn default_ttl(&self) -> u64 {
        self.ttl.unwrap_or(DEFAULT_TTL)
    }

    pub fn with_client(mut self, client: Arc<dyn Database>) -> Self {
        self.client = Some(client);
        self
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .field("collection", &self.collection)
            .field("compression", &self.compression)
            .field("compression_level", &self.compression_level)
            .field("ttl", &self.ttl)
            .field("hosts", &self.hosts)
            .field("uri_options", &self.uri_options)
            .field("client", &self.client.as_ref().map(|db| db.name().to_string()))
            .field("extra", &self.extra)
            .finish()
    }
}

// == Store Input ==
/// What a store is constructed from.
///
/// Store settings (bucket, compression, TTL) always come from the carried
/// [`StoreOptions`]; the variant decides where the connection comes from.
#[derive(Debug)]
pub enum StoreInput {
    /// An already connected database handle, owned by the caller
    Handle(Arc<dyn Database>, StoreOptions),
    /// A connection string to open
    Uri(String, StoreOptions),
    /// Discrete options: an embedded client, connection fields, or nothing
    Options(StoreOptions),
}

impl StoreInput {
    pub fn handle(db: Arc<dyn Database>) -> Self {
        StoreInput::Handle(db, StoreOptions::default())
    }

    pub fn uri(uri: impl Into<String>) -> Self {
        StoreInput::Uri(uri.into(), StoreOptions::default())
    }

    /// Replaces the carried options.
    pub fn with_options(self, options: StoreOptions) -> Self {
        match self {
            StoreInput::Handle(db, _) => StoreInput::Handle(db, options),
            StoreInput::Uri(uri, _) => StoreInput::Uri(uri, options),
            StoreInput::Options(_) => StoreInput::Options(options),
        }
    }

    pub fn options(&self) -> &StoreOptions {
        match self {
            StoreInput::Handle(_, options)
            | StoreInput::Uri(_, options)
            | StoreInput::Options(options) => options,
        }
    }

    /// Uses `DOC_CACHE_URI` when set, the discrete `DOC_CACHE_*` fields otherwise.
    pub fn from_env() -> Self {
        let options = StoreOptions::from_env();
        match env::var("DOC_CACHE_URI") {
            Ok(uri) if !uri.trim().is_empty() => StoreInput::Uri(uri, options),
            _ => StoreInput::Options(options),
        }
    }
}

impl Default for StoreInput {
    fn default() -> Self {
        StoreInput::Options(StoreOptions::default())
    }
}

impl From<&str> for StoreInput {
    fn from(uri: &str) -> Self {
        StoreInput::uri(uri)
    }
}

impl From<String> for StoreInput {
    fn from(uri: String) -> Self {
        StoreInput::uri(uri)
    }
}

impl From<StoreOptions> for StoreInput {
    fn from(options: StoreOptions) -> Self {
        StoreInput::Options(options)
    }
}

impl From<Arc<dyn Database>> for StoreInput {
    fn from(db: Arc<dyn Database>) -> Self {
        StoreInput::handle(db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_options_default() {
        let options = StoreOptions::default();
        assert_eq!(options.collection_name(), "cacheman");
        assert_eq!(options.default_ttl(), 60);
        assert!(!options.compression);
        assert!(!options.has_connection_fields());
    }

    #[test]
    fn test_options_deserialize_passes_unknown_keys() {
        let options: StoreOptions = serde_json::from_value(json!({
            "host": "db.internal",
            "port": 27018,
            "db": "app",
            "collection": "sessions",
            "compression": true,
            "ttl": 300,
            "hosts": [{"host": "a", "port": 1}, {"host": "b"}],
            "options": {"replicaSet": "rs0"},
            "maxPoolSize": 20
        }))
        .unwrap();

        assert_eq!(options.host.as_deref(), Some("db.internal"));
        assert_eq!(options.port, Some(27018));
        assert_eq!(options.database.as_deref(), Some("app"));
        assert_eq!(options.collection_name(), "sessions");
        assert!(options.compression);
        assert_eq!(options.default_ttl(), 300);
        assert_eq!(options.hosts.len(), 2);
        assert_eq!(options.hosts[1].port, None);
        assert_eq!(options.uri_options.get("replicaSet").map(String::as_str), Some("rs0"));
        assert_eq!(options.extra.get("maxPoolSize"), Some(&json!(20)));
        assert!(!options.extra.contains_key("host"));
    }

    #[test]
    fn test_options_debug_hides_password() {
        let options = StoreOptions {
            password: Some("hunter2".to_string()),
            ..StoreOptions::default()
        };
        let rendered = format!("{:?}", options);
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_options_from_env() {
        env::set_var("DOC_CACHE_HOST", "env-host");
        env::set_var("DOC_CACHE_PORT", "27999");
        env::set_var("DOC_CACHE_COMPRESSION", "true");
        env::set_var("DOC_CACHE_TTL", "not-a-number");

        let options = StoreOptions::from_env();
        assert_eq!(options.host.as_deref(), Some("env-host"));
        assert_eq!(options.port, Some(27999));
        assert!(options.compression);
        // Unparseable values fall back to the default
        assert_eq!(options.default_ttl(), DEFAULT_TTL);

        env::remove_var("DOC_CACHE_HOST");
        env::remove_var("DOC_CACHE_PORT");
        env::remove_var("DOC_CACHE_COMPRESSION");
        env::remove_var("DOC_CACHE_TTL");
    }

    #[test]
    fn test_input_with_options_keeps_variant() {
        let options = StoreOptions {
            collection: Some("x".to_string()),
            ..StoreOptions::default()
        };
        let input = StoreInput::from("mongodb://h:1/db").with_options(options);

        assert!(matches!(input, StoreInput::Uri(ref uri, _) if uri == "mongodb://h:1/db"));
        assert_eq!(input.options().collection_name(), "x");
    }

    #[test]
    fn test_host_spec_display() {
        assert_eq!(HostSpec::new("a", 1).to_string(), "a:1");
        let bare = HostSpec {
            host: "b".to_string(),
            port: None,
        };
        assert_eq!(bare.to_string(), "b");
    }
}
