//! Release source client: fetches release records from a GitHub-style release API.
//!
//! Single-release lookups are cached by normalized tag for a configurable TTL.
//! Range lookups read one page of the newest releases and scan it newest-first.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio::time::Instant;

use herald_common::error::AppError;
use herald_common::types::ReleaseRecord;

use crate::version::normalize_tag;

/// Page size used for range scans.
const RELEASE_PAGE_SIZE: u32 = 100;

/// Anything that can resolve releases for the orchestrator.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// A single release, or `None` if the tag does not exist.
    async fn get_release_by_tag(&self, version: &str) -> Result<Option<ReleaseRecord>, AppError>;

    /// Published releases in `(from, to]`, newest first.
    async fn get_releases_between(
        &self,
        from_version: &str,
        to_version: &str,
    ) -> Result<Vec<ReleaseRecord>, AppError>;

    /// Drop any cached releases.
    async fn clear_cache(&self);
}

/// Configuration for the release source client.
#[derive(Debug, Clone)]
pub struct ReleaseSourceConfig {
    /// API base URL, e.g. `https://api.github.com`
    pub api_url: String,
    /// Repository as `owner/name`
    pub repo: String,
    /// Optional bearer credential
    pub token: Option<String>,
    /// Prefix put back in front of a normalized tag when fetching (default: "v")
    pub tag_prefix: String,
    /// Cache TTL for single releases (default: 1 hour)
    pub cache_ttl: Duration,
    /// Timeout for HTTP requests (default: 30 seconds)
    pub request_timeout: Duration,
}

impl Default for ReleaseSourceConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            repo: String::new(),
            token: None,
            tag_prefix: "v".to_string(),
            cache_ttl: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Release as returned by the API. Nullable text fields become empty strings.
#[derive(Debug, Deserialize)]
struct ApiRelease {
    tag_name: String,
    name: Option<String>,
    body: Option<String>,
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    html_url: String,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    prerelease: bool,
}

impl From<ApiRelease> for ReleaseRecord {
    fn from(api: ApiRelease) -> Self {
        Self {
            name: api.name.filter(|n| !n.is_empty()).unwrap_or_else(|| api.tag_name.clone()),
            tag: api.tag_name,
            body: api.body.unwrap_or_default(),
            published_at: api.published_at,
            html_url: api.html_url,
            draft: api.draft,
            prerelease: api.prerelease,
        }
    }
}

struct CachedRelease {
    release: ReleaseRecord,
    expires_at: Instant,
}

/// HTTP client for the release API with a TTL cache.
pub struct ReleaseSourceClient {
    config: ReleaseSourceConfig,
    cache: RwLock<HashMap<String, CachedRelease>>,
    http_client: reqwest::Client,
}

impl ReleaseSourceClient {
    pub fn new(config: ReleaseSourceConfig) -> Result<Self, AppError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("herald/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            config,
            cache: RwLock::new(HashMap::new()),
            http_client,
        })
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.repo,
            path
        )
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let builder = self
            .http_client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        match &self.config.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn get_cached(&self, tag: &str) -> Option<ReleaseRecord> {
        let cache = self.cache.read().await;
        cache.get(tag).and_then(|cached| {
            if cached.expires_at > Instant::now() {
                Some(cached.release.clone())
            } else {
                None
            }
        })
    }

    async fn cache_release(&self, tag: &str, release: ReleaseRecord) {
        let mut cache = self.cache.write().await;
        cache.retain(|_, cached| cached.expires_at > Instant::now());
        cache.insert(
            tag.to_string(),
            CachedRelease {
                release,
                expires_at: Instant::now() + self.config.cache_ttl,
            },
        );
    }

    async fn fetch_recent_releases(&self) -> Result<Vec<ReleaseRecord>, AppError> {
        let url = self.repo_url(&format!("/releases?per_page={}", RELEASE_PAGE_SIZE));
        let response = self
            .request(&url)
            .send()
            .await
            .map_err(|e| AppError::Transient(format!("listing releases failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Transient(format!(
                "listing releases returned {}",
                status
            )));
        }

        let releases: Vec<ApiRelease> = response
            .json()
            .await
            .map_err(|e| AppError::Transient(format!("malformed release list: {}", e)))?;

        Ok(releases.into_iter().map(ReleaseRecord::from).collect())
    }
}

/// Scan a newest-first release list for the `(from, to]` window.
///
/// Drafts and prereleases are skipped. Returns `None` when `to` never appears.
pub fn select_between(
    releases: &[ReleaseRecord],
    from_version: &str,
    to_version: &str,
) -> Option<Vec<ReleaseRecord>> {
    let from = normalize_tag(from_version);
    let to = normalize_tag(to_version);

    let mut collecting = false;
    let mut selected = Vec::new();

    for release in releases.iter().filter(|r| !r.draft && !r.prerelease) {
        let tag = normalize_tag(&release.tag);
        if tag == from {
            break;
        }
        if tag == to {
            collecting = true;
        }
        if collecting {
            selected.push(release.clone());
        }
    }

    collecting.then_some(selected)
}

#[async_trait]
impl ReleaseSource for ReleaseSourceClient {
    async fn get_release_by_tag(&self, version: &str) -> Result<Option<ReleaseRecord>, AppError> {
        let tag = normalize_tag(version);

        if let Some(release) = self.get_cached(tag).await {
            tracing::debug!(tag = %tag, "Release served from cache");
            return Ok(Some(release));
        }

        let url = self.repo_url(&format!(
            "/releases/tags/{}{}",
            self.config.tag_prefix, tag
        ));
        let response = self
            .request(&url)
            .send()
            .await
            .map_err(|e| AppError::Transient(format!("fetching release {} failed: {}", tag, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            tracing::debug!(tag = %tag, "Release not found");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(AppError::Transient(format!(
                "fetching release {} returned {}",
                tag, status
            )));
        }

        let release: ReleaseRecord = response
            .json::<ApiRelease>()
            .await
            .map_err(|e| AppError::Transient(format!("malformed release {}: {}", tag, e)))?
            .into();

        self.cache_release(tag, release.clone()).await;
        Ok(Some(release))
    }

    async fn get_releases_between(
        &self,
        from_version: &str,
        to_version: &str,
    ) -> Result<Vec<ReleaseRecord>, AppError> {
        let releases = self.fetch_recent_releases().await?;

        if let Some(selected) = select_between(&releases, from_version, to_version) {
            tracing::debug!(
                from = %from_version,
                to = %to_version,
                count = selected.len(),
                "Resolved release range"
            );
            return Ok(selected);
        }

        tracing::warn!(
            to = %to_version,
            "Target release not in recent page, fetching it directly"
        );
        Ok(self
            .get_release_by_tag(to_version)
            .await?
            .into_iter()
            .collect())
    }

    async fn clear_cache(&self) {
        self.cache.write().await.clear();
        tracing::debug!("Release cache cleared");
    }
}
