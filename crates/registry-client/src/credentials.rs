//! Registry credential store
//!
//! Reads a Docker-style `config.json` from a directory and answers
//! "which credential do I use for this host". Hosts are matched exactly
//! after normalization: the scheme and any path are dropped and the
//! name is lowercased, but the port is kept, so `harbor:30003` and
//! `harbor` are different registries.

use crate::error::RegistryError;
use base64::Engine;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File name looked up inside the credential directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Credential to present to a registry
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Username and password (or token) for basic/token auth
    Basic {
        /// Registry username
        username: String,
        /// Registry password or token
        password: String,
    },
    /// No credential configured for the host
    Anonymous,
}

impl Credential {
    /// Whether this is the anonymous fallback.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }
}

// Keep passwords out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::Anonymous => f.write_str("Anonymous"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

#[derive(Debug, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// Host-keyed credential lookup, immutable once loaded
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    entries: HashMap<String, Credential>,
}

impl CredentialStore {
    /// A store that answers `Anonymous` for every host.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads `config.json` from `dir`.
    ///
    /// A missing directory or file yields an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CredentialStore`] when the file cannot be
    /// read or does not decode.
    pub fn load(dir: &Path) -> Result<Self, RegistryError> {
        let path = dir.join(CONFIG_FILE_NAME);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "No registry credentials at {}, pulls will be anonymous",
                    path.display()
                );
                return Ok(Self::empty());
            }
            Err(e) => {
                return Err(RegistryError::CredentialStore {
                    path,
                    message: e.to_string(),
                });
            }
        };
        let store = Self::from_json(&contents, &path)?;
        info!(
            "Loaded registry credentials for {} host(s) from {}",
            store.len(),
            path.display()
        );
        Ok(store)
    }

    /// Decodes a Docker config document. `origin` is only used in errors.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CredentialStore`] on malformed JSON or an
    /// `auth` value that is not base64 `user:password`.
    pub fn from_json(contents: &str, origin: &Path) -> Result<Self, RegistryError> {
        let invalid = |message: String| RegistryError::CredentialStore {
            path: PathBuf::from(origin),
            message,
        };

        let config: DockerConfig = serde_json::from_str(contents)
            .map_err(|e| invalid(format!("malformed credential file: {e}")))?;

        let mut store = Self::empty();
        for (host, entry) in config.auths {
            match decode_entry(&entry) {
                Ok(Some(credential)) => store.insert(&host, credential),
                Ok(None) => debug!("Credential entry for {} has no secret, skipping", host),
                Err(message) => return Err(invalid(format!("entry for {host}: {message}"))),
            }
        }
        Ok(store)
    }

    /// Adds or replaces the credential for `host`.
    pub fn insert(&mut self, host: &str, credential: Credential) {
        self.entries.insert(normalize_host(host), credential);
    }

    /// Credential for `host`, `Anonymous` when none is configured.
    #[must_use]
    pub fn credential(&self, host: &str) -> Credential {
        self.entries
            .get(&normalize_host(host))
            .cloned()
            .unwrap_or(Credential::Anonymous)
    }

    /// Number of configured hosts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no host is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn decode_entry(entry: &AuthEntry) -> Result<Option<Credential>, String> {
    if let Some(auth) = entry.auth.as_deref().filter(|a| !a.is_empty()) {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(auth.trim())
            .map_err(|e| format!("auth is not base64: {e}"))?;
        let decoded = String::from_utf8(decoded).map_err(|e| format!("auth is not UTF-8: {e}"))?;
        let (username, password) = decoded
            .split_once(':')
            .ok_or_else(|| "auth is not in user:password form".to_string())?;
        return Ok(Some(Credential::Basic {
            username: username.to_string(),
            password: password.to_string(),
        }));
    }
    match (&entry.username, &entry.password) {
        (Some(username), Some(password)) => Ok(Some(Credential::Basic {
            username: username.clone(),
            password: password.clone(),
        })),
        _ => Ok(None),
    }
}

/// Canonical host key: no scheme, no path, lowercase, port preserved.
#[must_use]
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let host = host
        .strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .unwrap_or(host);
    let host = host.split('/').next().unwrap_or(host);
    host.to_ascii_lowercase()
}
