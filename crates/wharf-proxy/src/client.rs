//! Upstream registry client

use base64::Engine;
use bytes::Bytes;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::ProxyError;

/// Upstream registry connection parameters
#[derive(Clone, Debug)]
pub struct UpstreamClientConfig {
    /// Base URL of the upstream OCI registry
    pub base_url: String,
    /// Username for authentication
    pub username: Option<String>,
    /// Password for authentication
    pub password: Option<String>,
}

/// Token response from an OCI token auth endpoint
#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
    #[serde(default)]
    #[allow(dead_code)]
    expires_in: Option<u64>,
}

/// HTTP client for fetching and pushing artifacts on an upstream registry.
///
/// Caches a single bearer/basic auth credential and transparently refreshes
/// it on a 401. One instance is held per configured upstream.
pub struct UpstreamClient {
    config: UpstreamClientConfig,
    client: Client,
    token: Arc<RwLock<Option<String>>>,
}

impl UpstreamClient {
    /// Create a new upstream client
    pub fn new(config: UpstreamClientConfig) -> Result<Self, ProxyError> {
        let client = Client::builder().build()?;

        info!("created upstream client for {}", config.base_url);

        Ok(Self {
            config,
            client,
            token: Arc::new(RwLock::new(None)),
        })
    }

    /// Authenticate against the upstream and obtain a credential to send on
    /// subsequent requests.
    async fn authenticate(&self) -> Result<String, ProxyError> {
        info!("authenticating with upstream at {}", self.config.base_url);

        let response = self
            .client
            .get(format!("{}/v2/", self.config.base_url))
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            if let Some(auth_header) = response.headers().get("www-authenticate") {
                if let Ok(header_str) = auth_header.to_str() {
                    if let Some(token) = self.fetch_token_from_auth_header(header_str).await? {
                        return Ok(token);
                    }
                }
            }
        }

        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            debug!("using basic auth for upstream");
            return Ok(format!(
                "Basic {}",
                base64_encode(&format!("{username}:{password}"))
            ));
        }

        Err(ProxyError::Unauthorized)
    }

    /// Parse a `WWW-Authenticate: Bearer realm=...,service=...,scope=...`
    /// header and fetch a token from the named realm.
    async fn fetch_token_from_auth_header(
        &self,
        header: &str,
    ) -> Result<Option<String>, ProxyError> {
        if !header.starts_with("Bearer ") {
            return Ok(None);
        }

        let parts: Vec<&str> = header[7..].split(',').collect();
        let mut realm = None;
        let mut service = None;
        let mut scope = None;

        for part in parts {
            let kv: Vec<&str> = part.splitn(2, '=').collect();
            if kv.len() == 2 {
                let key = kv[0].trim();
                let value = kv[1].trim().trim_matches('"');
                match key {
                    "realm" => realm = Some(value),
                    "service" => service = Some(value),
                    "scope" => scope = Some(value),
                    _ => {}
                }
            }
        }

        let realm = realm.ok_or_else(|| {
            ProxyError::InvalidResponse("missing realm in WWW-Authenticate".to_string())
        })?;

        let mut url = realm.to_string();
        let mut params = vec![];

        if let Some(svc) = service {
            params.push(format!("service={svc}"));
        }
        if let Some(scp) = scope {
            params.push(format!("scope={scp}"));
        }

        if !params.is_empty() {
            url = format!("{}?{}", url, params.join("&"));
        }

        debug!("fetching token from: {}", url);

        let mut request = self.client.get(&url);

        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(ProxyError::TokenRefreshFailed);
        }

        let token_response: TokenResponse = response.json().await?;

        Ok(Some(format!("Bearer {}", token_response.token)))
    }

    /// Get the cached auth credential, authenticating if needed.
    async fn get_auth_header(&self) -> Result<Option<String>, ProxyError> {
        {
            let token = self.token.read().await;
            if let Some(ref t) = *token {
                return Ok(Some(t.clone()));
            }
        }

        let token = self.authenticate().await?;
        {
            let mut cached = self.token.write().await;
            *cached = Some(token.clone());
        }

        Ok(Some(token))
    }

    /// Make an authenticated GET request, retrying once after refreshing
    /// the credential on a 401.
    async fn request(&self, url: &str) -> Result<Response, ProxyError> {
        let mut request = self.client.get(url);

        if let Some(auth) = self.get_auth_header().await? {
            request = request.header("Authorization", auth);
        }

        let response = request.send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            debug!("token expired, refreshing");

            {
                let mut cached = self.token.write().await;
                *cached = None;
            }

            let mut request = self.client.get(url);
            if let Some(auth) = self.get_auth_header().await? {
                request = request.header("Authorization", auth);
            }

            return Ok(request.send().await?);
        }

        Ok(response)
    }

    /// Check if the upstream is reachable and authenticating correctly.
    pub async fn ping(&self) -> Result<bool, ProxyError> {
        let url = format!("{}/v2/", self.config.base_url);
        let response = self.request(&url).await?;
        Ok(response.status().is_success())
    }

    /// Fetch a manifest, returning its raw bytes, content type, and digest.
    pub async fn get_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<(Bytes, String, String), ProxyError> {
        let url = format!(
            "{}/v2/{}/manifests/{}",
            self.config.base_url, repository, reference
        );

        debug!("fetching manifest: {}", url);

        let mut request = self.client.get(&url);

        request = request.header(
            "Accept",
            "application/vnd.oci.image.manifest.v1+json, \
             application/vnd.oci.image.index.v1+json, \
             application/vnd.cncf.helm.chart.content.v1.tar+gzip, \
             application/vnd.docker.distribution.manifest.v2+json, \
             application/vnd.docker.distribution.manifest.list.v2+json, \
             application/vnd.docker.distribution.manifest.v1+prettyjws",
        );

        if let Some(auth) = self.get_auth_header().await? {
            request = request.header("Authorization", auth);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(ProxyError::NotFound(format!("{repository}:{reference}")));
        }

        if !status.is_success() {
            return Err(ProxyError::UpstreamError {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|h| h.to_str().ok())
            .unwrap_or("application/vnd.oci.image.manifest.v1+json")
            .to_string();

        let digest = response
            .headers()
            .get("docker-content-digest")
            .and_then(|h| h.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = response.bytes().await?;

        Ok((body, content_type, digest))
    }

    /// Fetch a blob by digest, returning its bytes and declared size.
    pub async fn get_blob(&self, repository: &str, digest: &str) -> Result<(Bytes, u64), ProxyError> {
        let url = format!(
            "{}/v2/{}/blobs/{}",
            self.config.base_url, repository, digest
        );

        debug!("fetching blob: {}", url);

        let response = self.request(&url).await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(ProxyError::NotFound(digest.to_string()));
        }

        if !status.is_success() {
            return Err(ProxyError::UpstreamError {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let size = response
            .headers()
            .get("content-length")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        let body = response.bytes().await?;

        Ok((body, size))
    }

    /// Check whether a blob exists upstream without downloading it.
    pub async fn blob_exists(&self, repository: &str, digest: &str) -> Result<bool, ProxyError> {
        let url = format!(
            "{}/v2/{}/blobs/{}",
            self.config.base_url, repository, digest
        );

        debug!("checking blob existence: {}", url);

        let mut request = self.client.head(&url);

        if let Some(auth) = self.get_auth_header().await? {
            request = request.header("Authorization", auth);
        }

        let response = request.send().await?;

        Ok(response.status().is_success())
    }

    /// Push a blob using the monolithic POST-then-PUT upload flow.
    pub async fn push_blob(
        &self,
        repository: &str,
        digest: &str,
        data: Bytes,
    ) -> Result<(), ProxyError> {
        let url = format!(
            "{}/v2/{}/blobs/uploads/",
            self.config.base_url, repository
        );

        debug!("starting blob upload to: {}", url);

        let mut request = self.client.post(&url);

        if let Some(auth) = self.get_auth_header().await? {
            request = request.header("Authorization", auth);
        }

        let response = request.send().await?;

        if !response.status().is_success() && response.status() != StatusCode::ACCEPTED {
            return Err(ProxyError::UpstreamError {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let location = response
            .headers()
            .get("location")
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| ProxyError::InvalidResponse("missing Location header".to_string()))?;

        let upload_url = if location.starts_with("http") {
            format!("{location}?digest={digest}")
        } else {
            format!("{}{}?digest={}", self.config.base_url, location, digest)
        };

        debug!("completing blob upload: {}", upload_url);

        let mut request = self
            .client
            .put(&upload_url)
            .header("Content-Type", "application/octet-stream")
            .body(data);

        if let Some(auth) = self.get_auth_header().await? {
            request = request.header("Authorization", auth);
        }

        let response = request.send().await?;

        if !response.status().is_success() && response.status() != StatusCode::CREATED {
            return Err(ProxyError::UpstreamError {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        Ok(())
    }

    /// Push a manifest, returning the digest the upstream computed.
    pub async fn push_manifest(
        &self,
        repository: &str,
        reference: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<String, ProxyError> {
        let url = format!(
            "{}/v2/{}/manifests/{}",
            self.config.base_url, repository, reference
        );

        debug!("pushing manifest to: {}", url);

        let mut request = self
            .client
            .put(&url)
            .header("Content-Type", content_type)
            .body(data);

        if let Some(auth) = self.get_auth_header().await? {
            request = request.header("Authorization", auth);
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() && status != StatusCode::CREATED {
            return Err(ProxyError::UpstreamError {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let digest = response
            .headers()
            .get("docker-content-digest")
            .and_then(|h| h.to_str().ok())
            .unwrap_or("")
            .to_string();

        Ok(digest)
    }
}

fn base64_encode(input: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(input.as_bytes())
}
