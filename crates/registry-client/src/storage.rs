//! OCI registry storage client
//!
//! Pulls the first layer of an artifact: fetch the manifest, fetch the
//! blob it points at, verify the blob's size and sha256 digest. Handles
//! the registry auth dance (Basic, or a Bearer token from the challenge
//! realm) when the registry answers 401.

use crate::credentials::Credential;
use crate::error::RegistryError;
use crate::reference::ArtifactReference;
use base64::Engine;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, WWW_AUTHENTICATE};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// OCI image manifest media type
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
/// Docker schema 2 manifest media type
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";

const USER_AGENT: &str = concat!("package-bundle-controller/", env!("CARGO_PKG_VERSION"));

/// Everything a [`StorageClient`] needs to talk to one registry
#[derive(Debug, Clone)]
pub struct StorageContext {
    /// Registry host (with port)
    pub registry: String,
    /// Credential for the registry host
    pub credential: Credential,
    /// Extra trusted CA certificates
    pub certificates: Vec<reqwest::Certificate>,
    /// Skip TLS verification
    pub insecure: bool,
    /// Talk plain HTTP instead of HTTPS
    pub plain_http: bool,
    /// Per-request timeout
    pub timeout: Duration,
}

impl StorageContext {
    /// Context for `registry` with default transport settings.
    #[must_use]
    pub fn new(registry: impl Into<String>, credential: Credential) -> Self {
        Self {
            registry: registry.into(),
            credential,
            certificates: Vec::new(),
            insecure: false,
            plain_http: false,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    #[serde(default)]
    layers: Vec<Descriptor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Descriptor {
    digest: String,
    size: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Client for one registry
#[derive(Debug)]
pub struct StorageClient {
    http: reqwest::Client,
    base_url: String,
    registry: String,
    credential: Credential,
}

impl StorageClient {
    /// Builds the HTTP client for `context`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Transport`] if the TLS configuration is
    /// rejected by the HTTP stack.
    pub fn new(context: StorageContext) -> Result<Self, RegistryError> {
        let mut builder = reqwest::Client::builder()
            .timeout(context.timeout)
            .user_agent(USER_AGENT);
        if context.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }
        for certificate in context.certificates {
            builder = builder.add_root_certificate(certificate);
        }
        let http = builder
            .build()
            .map_err(|e| RegistryError::Transport(format!("failed to build HTTP client: {e}")))?;

        let scheme = if context.plain_http { "http" } else { "https" };
        Ok(Self {
            http,
            base_url: format!("{scheme}://{}", context.registry),
            registry: context.registry,
            credential: context.credential,
        })
    }

    /// Pulls the content layer of `reference`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing manifest, `ChecksumMismatch` when
    /// content does not match its digest, and transport errors otherwise.
    pub async fn pull_bytes(&self, reference: &ArtifactReference) -> Result<Vec<u8>, RegistryError> {
        let mut authorization = None;

        let manifest_url = format!(
            "{}/v2/{}/manifests/{}",
            self.base_url,
            reference.repository,
            reference.reference()
        );
        let response = self
            .get(&manifest_url, Some(manifest_accept()), &mut authorization, reference)
            .await?;
        let manifest_bytes = self.check_status(response, reference).await?.bytes().await?;

        if let Some(expected) = &reference.digest {
            verify_digest(reference, expected, &manifest_bytes)?;
        }

        let manifest: Manifest =
            serde_json::from_slice(&manifest_bytes).map_err(|e| RegistryError::InvalidManifest {
                reference: reference.to_string(),
                message: e.to_string(),
            })?;
        let layer = manifest
            .layers
            .first()
            .ok_or_else(|| RegistryError::InvalidManifest {
                reference: reference.to_string(),
                message: "manifest has no layers".to_string(),
            })?;
        debug!("Pulling layer {} ({} bytes) of {}", layer.digest, layer.size, reference);

        let blob_url = format!(
            "{}/v2/{}/blobs/{}",
            self.base_url, reference.repository, layer.digest
        );
        let response = self.get(&blob_url, None, &mut authorization, reference).await?;
        let blob = self.check_status(response, reference).await?.bytes().await?;

        if blob.len() as u64 != layer.size {
            return Err(RegistryError::ChecksumMismatch {
                reference: reference.to_string(),
                expected: format!("{} bytes", layer.size),
                actual: format!("{} bytes", blob.len()),
            });
        }
        verify_digest(reference, &layer.digest, &blob)?;

        Ok(blob.to_vec())
    }

    /// GET with one authorization round trip on a 401 challenge.
    async fn get(
        &self,
        url: &str,
        accept: Option<&str>,
        authorization: &mut Option<String>,
        reference: &ArtifactReference,
    ) -> Result<reqwest::Response, RegistryError> {
        let response = self.request(url, accept, authorization.as_deref()).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED || authorization.is_some() {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned)
            .ok_or_else(|| self.auth_error("registry returned 401 without a challenge"))?;
        *authorization = Some(self.authorize(&challenge, reference).await?);

        Ok(self
            .request(url, accept, authorization.as_deref())
            .send()
            .await?)
    }

    fn request(
        &self,
        url: &str,
        accept: Option<&str>,
        authorization: Option<&str>,
    ) -> reqwest::RequestBuilder {
        let mut request = self.http.get(url);
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        if let Some(authorization) = authorization {
            request = request.header(AUTHORIZATION, authorization);
        }
        request
    }

    /// Turns a `WWW-Authenticate` challenge into an `Authorization` value.
    async fn authorize(
        &self,
        challenge: &str,
        reference: &ArtifactReference,
    ) -> Result<String, RegistryError> {
        let (scheme, params) = challenge.split_once(' ').unwrap_or((challenge, ""));

        if scheme.eq_ignore_ascii_case("basic") {
            return match &self.credential {
                Credential::Basic { username, password } => Ok(basic_header(username, password)),
                Credential::Anonymous => Err(self.auth_error("registry requires credentials")),
            };
        }
        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(self.auth_error(&format!("unsupported auth scheme {scheme}")));
        }

        let params = parse_challenge(params);
        let realm = params
            .get("realm")
            .ok_or_else(|| self.auth_error("bearer challenge has no realm"))?;
        let mut token_url = reqwest::Url::parse(realm)
            .map_err(|e| self.auth_error(&format!("invalid token realm {realm}: {e}")))?;
        {
            let mut query = token_url.query_pairs_mut();
            if let Some(service) = params.get("service") {
                query.append_pair("service", service);
            }
            let default_scope = format!("repository:{}:pull", reference.repository);
            query.append_pair(
                "scope",
                params.get("scope").map_or(default_scope.as_str(), String::as_str),
            );
        }

        let mut request = self.http.get(token_url);
        if let Credential::Basic { username, password } = &self.credential {
            request = request.basic_auth(username, Some(password));
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(self.auth_error(&format!(
                "token request failed with status {}",
                response.status()
            )));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| self.auth_error(&format!("invalid token response: {e}")))?;
        let token = token
            .token
            .or(token.access_token)
            .ok_or_else(|| self.auth_error("no token in response"))?;
        Ok(format!("Bearer {token}"))
    }

    async fn check_status(
        &self,
        response: reqwest::Response,
        reference: &ArtifactReference,
    ) -> Result<reqwest::Response, RegistryError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        match status {
            StatusCode::NOT_FOUND => Err(RegistryError::NotFound {
                reference: reference.to_string(),
            }),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(self.auth_error(&format!("registry answered {status}")))
            }
            _ => Err(RegistryError::Http {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    fn auth_error(&self, message: &str) -> RegistryError {
        RegistryError::Authentication {
            registry: self.registry.clone(),
            message: message.to_string(),
        }
    }
}

fn manifest_accept() -> &'static str {
    concat!(
        "application/vnd.oci.image.manifest.v1+json, ",
        "application/vnd.docker.distribution.manifest.v2+json"
    )
}

fn basic_header(username: &str, password: &str) -> String {
    let encoded =
        base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
    format!("Basic {encoded}")
}

/// Parses `realm="...",service="...",scope="..."`.
fn parse_challenge(params: &str) -> HashMap<String, String> {
    params
        .split(',')
        .filter_map(|part| part.split_once('='))
        .map(|(key, value)| {
            (
                key.trim().to_ascii_lowercase(),
                value.trim().trim_matches('"').to_string(),
            )
        })
        .collect()
}

/// sha256 of `data` in `sha256:<hex>` form.
#[must_use]
pub fn compute_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

fn verify_digest(
    reference: &ArtifactReference,
    expected: &str,
    data: &[u8],
) -> Result<(), RegistryError> {
    if !expected.starts_with("sha256:") {
        return Err(RegistryError::InvalidManifest {
            reference: reference.to_string(),
            message: format!("unsupported digest algorithm in {expected}"),
        });
    }
    let actual = compute_digest(data);
    if actual != expected {
        return Err(RegistryError::ChecksumMismatch {
            reference: reference.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}
