//! Connection URI Module
//!
//! Builds and parses `mongodb://` style connection strings:
//! `scheme://[user[:pass]@]host[:port][,host[:port]...]/[database][?k=v&...]`

use std::fmt;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::form_urlencoded;

use crate::config::{HostSpec, StoreOptions, DEFAULT_HOST, DEFAULT_PORT};
use crate::error::{CacheError, Result};

/// Schemes accepted in connection strings.
pub const SCHEMES: [&str; 2] = ["mongodb", "mongodb+srv"];

/// Characters left unescaped in credentials (RFC 3986 unreserved).
const USERINFO: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

// == Connection URI ==
/// A parsed connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionUri {
    pub scheme: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub hosts: Vec<HostSpec>,
    pub database: Option<String>,
    pub options: Vec<(String, String)>,
}

impl ConnectionUri {
    /// Synthesizes a connection string from discrete option fields.
    ///
    /// Without an explicit host list a single host is built from `host` and
    /// `port`, each falling back to the local default.
    ///
    /// # Arguments
    /// * `options` - Store options carrying hosts, credentials, database and
    ///   query options
    ///
    /// # Returns
    /// A URI using the `mongodb` scheme. Credentials are percent-encoded on display.
    pub fn from_options(options: &StoreOptions) -> Self {
        let hosts = if options.hosts.is_empty() {
            vec![HostSpec {
                host: options
                    .host
                    .clone()
                    .unwrap_or_else(|| DEFAULT_HOST.to_string()),
                port: Some(options.port.unwrap_or(DEFAULT_PORT)),
            }]
        } else {
            options.hosts.clone()
        };

        Self {
            scheme: SCHEMES[0].to_string(),
            username: options.username.clone(),
            password: options.password.clone(),
            hosts,
            database: options.database.clone(),
            options: options
                .uri_options
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    // == Parse ==
    /// Parses a connection string.
    ///
    /// Fails with a configuration error on a blank string, an unknown scheme
    /// or an empty host list.
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        let invalid = |reason: &str| {
            CacheError::Configuration(format!("invalid connection: {} ({})", reason, uri))
        };

        if uri.is_empty() {
            return Err(CacheError::Configuration("invalid connection".to_string()));
        }

        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| invalid("missing scheme"))?;
        if !SCHEMES.contains(&scheme) {
            return Err(invalid("unsupported scheme"));
        }

        let (rest, query) = match rest.split_once('?') {
            Some((rest, query)) => (rest, Some(query)),
            None => (rest, None),
        };
        let (authority, path) = match rest.split_once('/') {
            Some((authority, path)) => (authority, path),
            None => (rest, ""),
        };

        let (userinfo, host_list) = match authority.rsplit_once('@') {
            Some((userinfo, hosts)) => (Some(userinfo), hosts),
            None => (None, authority),
        };

        let (username, password) = match userinfo {
            Some(info) => match info.split_once(':') {
                Some((user, pass)) => (Some(decode(user)?), Some(decode(pass)?)),
                None => (Some(decode(info)?), None),
            },
            None => (None, None),
        };

        let hosts = host_list
            .split(',')
            .filter(|h| !h.is_empty())
            .map(parse_host)
            .collect::<Result<Vec<_>>>()?;
        if hosts.is_empty() {
            return Err(invalid("no hosts"));
        }

        let database = if path.is_empty() {
            None
        } else {
            Some(decode(path)?)
        };

        let options = query
            .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();

        Ok(Self {
            scheme: scheme.to_string(),
            username,
            password,
            hosts,
            database,
            options,
        })
    }
}

impl fmt::Display for ConnectionUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.scheme)?;

        if let Some(user) = &self.username {
            write!(f, "{}", utf8_percent_encode(user, USERINFO))?;
            if let Some(pass) = &self.password {
                write!(f, ":{}", utf8_percent_encode(pass, USERINFO))?;
            }
            write!(f, "@")?;
        }

        let hosts: Vec<String> = self.hosts.iter().map(HostSpec::to_string).collect();
        write!(f, "{}", hosts.join(","))?;

        if self.database.is_some() || !self.options.is_empty() {
            write!(f, "/")?;
        }
        if let Some(db) = &self.database {
            write!(f, "{}", utf8_percent_encode(db, USERINFO))?;
        }

        if !self.options.is_empty() {
            let query = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(self.options.iter())
                .finish();
            write!(f, "?{}", query)?;
        }

        Ok(())
    }
}

fn decode(part: &str) -> Result<String> {
    percent_decode_str(part)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| CacheError::Configuration(format!("invalid connection: {}", e)))
}

fn parse_host(raw: &str) -> Result<HostSpec> {
    // Bracketed IPv6 literals keep their colons
    let split = if raw.starts_with('[') {
        raw.rfind("]:").map(|i| (&raw[..=i], &raw[i + 2..]))
    } else {
        raw.rsplit_once(':')
    };

    match split {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| {
                CacheError::Configuration(format!("invalid connection: bad port in {}", raw))
            })?;
            Ok(HostSpec {
                host: host.to_string(),
                port: Some(port),
            })
        }
        None => Ok(HostSpec {
            host: raw.to_string(),
            port: None,
        }),
    }
}
