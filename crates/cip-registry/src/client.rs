//! Docker Registry v2 HTTP client.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use crate::config::{RegistryAuth, RegistryConfig};
use crate::error::{RegistryError, Result};
use crate::reader::{RepositoryReader, RepositoryWriter};
use crate::types::{ManifestList, TagsList};

/// Client for the Docker Registry v2 API.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    config: RegistryConfig,
    http: reqwest::Client,
}

impl RegistryClient {
    /// Creates a new registry client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    ///
    /// # Examples
    ///
    /// ```
    /// use cip_registry::{RegistryClient, RegistryConfig};
    ///
    /// let client = RegistryClient::new(RegistryConfig::new())?;
    /// # Ok::<(), cip_registry::RegistryError>(())
    /// ```
    pub fn new(config: RegistryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| RegistryError::from_reqwest("<client>", e))?;
        Ok(Self { config, http })
    }

    /// Returns the client configuration.
    #[must_use]
    pub const fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// `GET /v2/<repo>/tags/list`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails after retries or the body is
    /// not a tags list.
    pub async fn tags_list(&self, repository: &str) -> Result<TagsList> {
        let url = self.url(repository, "tags/list")?;
        self.get_json(&url, None).await
    }

    /// `GET /v2/<repo>/manifests/<digest>` with `Accept: */*`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails after retries or the body is
    /// not a manifest list.
    pub async fn manifest_list(&self, repository: &str, digest: &str) -> Result<ManifestList> {
        let url = self.url(repository, &format!("manifests/{digest}"))?;
        self.get_json(&url, Some("*/*")).await
    }

    /// `DELETE /v2/<repo>/manifests/<reference>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry refuses the deletion.
    pub async fn delete(&self, repository: &str, reference: &str) -> Result<()> {
        let url = self.url(repository, &format!("manifests/{reference}"))?;
        let url = url.as_str();
        self.config
            .retry
            .run(url, move || async move {
                self.send_once(Method::DELETE, url, None).await.map(drop)
            })
            .await
    }

    fn url(&self, repository: &str, suffix: &str) -> Result<String> {
        let (host, path) = repository
            .split_once('/')
            .filter(|(host, path)| !host.is_empty() && !path.is_empty())
            .ok_or_else(|| RegistryError::InvalidReference {
                reference: repository.to_string(),
            })?;
        let base = self.config.base_url(host)?;
        let url = base
            .join(&format!("v2/{path}/{suffix}"))
            .map_err(|_| RegistryError::InvalidUrl {
                url: format!("{base}v2/{path}/{suffix}"),
            })?;
        Ok(url.into())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, accept: Option<&str>) -> Result<T> {
        self.config
            .retry
            .run(url, move || async move {
                let response = self.send_once(Method::GET, url, accept).await?;
                let body = response
                    .text()
                    .await
                    .map_err(|e| RegistryError::from_reqwest(url, e))?;
                serde_json::from_str(&body).map_err(|source| RegistryError::Decode {
                    url: url.to_string(),
                    source,
                })
            })
            .await
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        accept: Option<&str>,
    ) -> Result<reqwest::Response> {
        debug!(method = %method, url = %url, "registry request");
        let mut request = self.http.request(method, url).headers(self.auth_headers()?);
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        let response = request
            .send()
            .await
            .map_err(|e| RegistryError::from_reqwest(url, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let url = url.to_string();
        Err(match status {
            StatusCode::NOT_FOUND => RegistryError::NotFound { url },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RegistryError::AuthenticationFailed {
                url,
                status: status.as_u16(),
            },
            StatusCode::TOO_MANY_REQUESTS => RegistryError::RateLimited {
                retry_after: response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs),
                url,
            },
            _ => RegistryError::Http {
                url,
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            },
        })
    }

    fn auth_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        let value = match &self.config.auth {
            RegistryAuth::None => return Ok(headers),
            RegistryAuth::Basic { username, password } => {
                let credentials = base64::Engine::encode(
                    &base64::engine::general_purpose::STANDARD,
                    format!("{username}:{password}"),
                );
                format!("Basic {credentials}")
            }
            RegistryAuth::Bearer { token } => format!("Bearer {token}"),
        };

        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&value).map_err(|_| RegistryError::InvalidCredentials {
                message: "credentials contain characters not allowed in a header".to_string(),
            })?,
        );
        Ok(headers)
    }
}

#[async_trait]
impl RepositoryReader for RegistryClient {
    async fn read_tags(&self, repository: &str) -> Result<TagsList> {
        self.tags_list(repository).await
    }

    async fn read_manifest_list(&self, repository: &str, digest: &str) -> Result<ManifestList> {
        self.manifest_list(repository, digest).await
    }
}

#[async_trait]
impl RepositoryWriter for RegistryClient {
    async fn delete_manifest(&self, repository: &str, reference: &str) -> Result<()> {
        self.delete(repository, reference).await
    }
}
