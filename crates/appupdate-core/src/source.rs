use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::UpdateError;
use crate::manifest::{ManifestFields, ManifestFormat, parse_manifest};
use crate::version::VersionRecord;

pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("appupdate/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    StoreListing,
    ReleaseFeed,
    Manifest,
}

impl SourceKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StoreListing => "store listing",
            Self::ReleaseFeed => "release feed",
            Self::Manifest => "manifest",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the latest version is looked up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    StoreListing {
        package_id: String,
    },
    ReleaseFeed {
        owner: String,
        repo: String,
        #[serde(default)]
        api_base: Option<String>,
    },
    Manifest {
        url: String,
        format: ManifestFormat,
        #[serde(default)]
        fields: ManifestFields,
    },
}

impl SourceConfig {
    #[must_use]
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::StoreListing { .. } => SourceKind::StoreListing,
            Self::ReleaseFeed { .. } => SourceKind::ReleaseFeed,
            Self::Manifest { .. } => SourceKind::Manifest,
        }
    }

    /// Check the configuration without touching the network.
    ///
    /// # Errors
    /// Returns [`UpdateError::InvalidSourceConfig`] describing the first
    /// problem found.
    pub fn validate(&self) -> Result<(), UpdateError> {
        match self {
            Self::StoreListing { package_id } => {
                let package_id = package_id.trim();
                if package_id.is_empty() {
                    return Err(UpdateError::invalid_config("store package id is empty"));
                }
                if package_id.chars().any(char::is_whitespace) {
                    return Err(UpdateError::invalid_config(format!(
                        "store package id '{package_id}' contains whitespace"
                    )));
                }
                Ok(())
            }
            Self::ReleaseFeed {
                owner,
                repo,
                api_base,
            } => {
                validate_path_segment("owner", owner)?;
                validate_path_segment("repo", repo)?;
                if let Some(api_base) = api_base {
                    parse_http_url("release feed API base", api_base)?;
                }
                Ok(())
            }
            Self::Manifest { url, format, .. } => {
                parse_http_url(&format!("{format} manifest URL"), url)?;
                Ok(())
            }
        }
    }
}

fn validate_path_segment(label: &str, value: &str) -> Result<(), UpdateError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(UpdateError::invalid_config(format!(
            "release feed {label} is empty"
        )));
    }
    if value.contains('/') || value.chars().any(char::is_whitespace) {
        return Err(UpdateError::invalid_config(format!(
            "release feed {label} '{value}' is not a single path segment"
        )));
    }
    Ok(())
}

fn parse_http_url(label: &str, raw: &str) -> Result<Url, UpdateError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(UpdateError::invalid_config(format!("{label} is empty")));
    }
    let url = Url::parse(raw)
        .map_err(|error| UpdateError::invalid_config(format!("{label} '{raw}': {error}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(UpdateError::invalid_config(format!(
            "{label} '{raw}' must be an http(s) URL with a host"
        )));
    }
    Ok(url)
}

/// A place the latest application version can be read from.
#[async_trait]
pub trait VersionSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Download the raw payload describing the latest release.
    async fn fetch(&self) -> Result<String, UpdateError>;

    /// Turn a payload returned by [`VersionSource::fetch`] into a record.
    fn parse(&self, payload: &str) -> Result<VersionRecord, UpdateError>;
}

/// Build the source described by `config`, validating it first.
///
/// # Errors
/// Returns [`UpdateError::InvalidSourceConfig`] when the configuration is
/// unusable. No request is made either way.
pub fn build_source(
    config: &SourceConfig,
    client: &reqwest::Client,
) -> Result<Arc<dyn VersionSource>, UpdateError> {
    config.validate()?;

    let source: Arc<dyn VersionSource> = match config {
        SourceConfig::StoreListing { package_id } => {
            Arc::new(StoreListingSource::new(package_id.trim()))
        }
        SourceConfig::ReleaseFeed {
            owner,
            repo,
            api_base,
        } => Arc::new(ReleaseFeedSource::new(
            client.clone(),
            owner.trim(),
            repo.trim(),
            api_base.as_deref().unwrap_or(DEFAULT_GITHUB_API),
        )),
        SourceConfig::Manifest {
            url,
            format,
            fields,
        } => Arc::new(ManifestSource {
            client: client.clone(),
            url: parse_http_url("manifest URL", url)?,
            format: *format,
            fields: fields.clone(),
        }),
    };

    Ok(source)
}

/// App-store listing. Stores roll releases out per device, so the listing
/// cannot say whether this install is behind; every fetch reports that.
#[derive(Debug, Clone)]
pub struct StoreListingSource {
    package_id: String,
}

impl StoreListingSource {
    pub fn new(package_id: impl Into<String>) -> Self {
        Self {
            package_id: package_id.into(),
        }
    }

    #[must_use]
    pub fn package_id(&self) -> &str {
        &self.package_id
    }

    fn limited() -> UpdateError {
        UpdateError::SourceLimitedByPlatform {
            source_kind: SourceKind::StoreListing.as_str(),
        }
    }
}

#[async_trait]
impl VersionSource for StoreListingSource {
    fn kind(&self) -> SourceKind {
        SourceKind::StoreListing
    }

    async fn fetch(&self) -> Result<String, UpdateError> {
        debug!(
            "Store listing for {} cannot be queried for rollout state",
            self.package_id
        );
        Err(Self::limited())
    }

    fn parse(&self, _payload: &str) -> Result<VersionRecord, UpdateError> {
        Err(Self::limited())
    }
}

#[derive(Debug, Deserialize)]
struct GitHubRelease {
    #[serde(default)]
    tag_name: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    body: Option<String>,
}

/// Latest published release of a GitHub-style repository.
#[derive(Debug, Clone)]
pub struct ReleaseFeedSource {
    client: reqwest::Client,
    owner: String,
    repo: String,
    api_base: String,
}

impl ReleaseFeedSource {
    pub fn new(
        client: reqwest::Client,
        owner: impl Into<String>,
        repo: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            client,
            owner: owner.into(),
            repo: repo.into(),
            api_base: api_base.into(),
        }
    }

    #[must_use]
    pub fn latest_release_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/releases/latest",
            self.api_base.trim_end_matches('/'),
            self.owner,
            self.repo
        )
    }
}

#[async_trait]
impl VersionSource for ReleaseFeedSource {
    fn kind(&self) -> SourceKind {
        SourceKind::ReleaseFeed
    }

    async fn fetch(&self) -> Result<String, UpdateError> {
        let request = self
            .client
            .get(self.latest_release_url())
            .header("Accept", "application/vnd.github+json");
        fetch_text(request).await
    }

    fn parse(&self, payload: &str) -> Result<VersionRecord, UpdateError> {
        record_from_release(payload)
    }
}

fn record_from_release(payload: &str) -> Result<VersionRecord, UpdateError> {
    let release: GitHubRelease = serde_json::from_str(payload)
        .map_err(|error| UpdateError::parse("release", error.to_string()))?;

    let tag = release
        .tag_name
        .as_deref()
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .ok_or_else(|| UpdateError::parse("tag_name", "release has no tag"))?;
    let version_name = tag
        .strip_prefix(['v', 'V'])
        .unwrap_or(tag)
        .to_string();

    let download_url = release
        .html_url
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| UpdateError::parse("html_url", "release has no page URL"))?;

    Ok(VersionRecord {
        version_name,
        version_code: None,
        download_url,
        release_notes: release.body.filter(|body| !body.trim().is_empty()),
    })
}

/// Self-hosted XML or JSON manifest.
#[derive(Debug, Clone)]
pub struct ManifestSource {
    client: reqwest::Client,
    url: Url,
    format: ManifestFormat,
    fields: ManifestFields,
}

impl ManifestSource {
    /// # Errors
    /// Returns [`UpdateError::InvalidSourceConfig`] for a malformed URL.
    pub fn new(
        client: reqwest::Client,
        url: &str,
        format: ManifestFormat,
        fields: ManifestFields,
    ) -> Result<Self, UpdateError> {
        Ok(Self {
            client,
            url: parse_http_url("manifest URL", url)?,
            format,
            fields,
        })
    }
}

#[async_trait]
impl VersionSource for ManifestSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Manifest
    }

    async fn fetch(&self) -> Result<String, UpdateError> {
        fetch_text(self.client.get(self.url.clone())).await
    }

    fn parse(&self, payload: &str) -> Result<VersionRecord, UpdateError> {
        parse_manifest(self.format, &self.fields, payload)
    }
}

async fn fetch_text(request: reqwest::RequestBuilder) -> Result<String, UpdateError> {
    let response = request
        .header("User-Agent", USER_AGENT)
        .send()
        .await
        .map_err(|error| UpdateError::network_from(&error))?;

    if !response.status().is_success() {
        let status = response.status();
        let body_snippet = response
            .text()
            .await
            .ok()
            .map(|body| response_snippet(&body, 160))
            .unwrap_or_default();
        return Err(UpdateError::network(format!("HTTP {status}{body_snippet}")));
    }

    response
        .text()
        .await
        .map_err(|error| UpdateError::network_from(&error))
}

fn response_snippet(body: &str, max_chars: usize) -> String {
    let snippet: String = body.chars().take(max_chars).collect();
    if snippet.is_empty() {
        String::new()
    } else {
        format!(": {snippet}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release_feed(owner: &str, repo: &str) -> SourceConfig {
        SourceConfig::ReleaseFeed {
            owner: owner.to_string(),
            repo: repo.to_string(),
            api_base: None,
        }
    }

    fn manifest(url: &str) -> SourceConfig {
        SourceConfig::Manifest {
            url: url.to_string(),
            format: ManifestFormat::Json,
            fields: ManifestFields::default(),
        }
    }

    fn assert_invalid(result: Result<(), UpdateError>) {
        assert!(
            matches!(result, Err(UpdateError::InvalidSourceConfig { .. })),
            "expected InvalidSourceConfig, got {result:?}"
        );
    }

    #[test]
    fn release_feed_requires_owner_and_repo() {
        assert_invalid(release_feed("", "app").validate());
        assert_invalid(release_feed("owner", "  ").validate());
        assert_invalid(release_feed("own/er", "app").validate());
        assert!(release_feed("owner", "app").validate().is_ok());
    }

    #[test]
    fn release_feed_validates_custom_api_base() {
        let config = SourceConfig::ReleaseFeed {
            owner: "owner".to_string(),
            repo: "app".to_string(),
            api_base: Some("not a url".to_string()),
        };
        assert_invalid(config.validate());
    }

    #[test]
    fn manifest_requires_http_url() {
        assert_invalid(manifest("").validate());
        assert_invalid(manifest("example.com/update.json").validate());
        assert_invalid(manifest("ftp://example.com/update.json").validate());
        assert!(manifest("https://example.com/update.json").validate().is_ok());
    }

    #[test]
    fn store_listing_requires_package_id() {
        let empty = SourceConfig::StoreListing {
            package_id: " ".to_string(),
        };
        assert_invalid(empty.validate());
    }

    #[tokio::test]
    async fn store_listing_reports_platform_limit() {
        let source = build_source(
            &SourceConfig::StoreListing {
                package_id: "com.example.app".to_string(),
            },
            &reqwest::Client::new(),
        )
        .expect("valid store config");

        assert_eq!(source.kind(), SourceKind::StoreListing);
        let result = source.fetch().await;
        assert!(
            matches!(
                result,
                Err(UpdateError::SourceLimitedByPlatform { source_kind: "store listing" })
            ),
            "got {result:?}"
        );
    }

    #[test]
    fn build_source_rejects_invalid_config() {
        let result = build_source(&release_feed("", ""), &reqwest::Client::new());
        assert!(matches!(
            result,
            Err(UpdateError::InvalidSourceConfig { .. })
        ));
    }

    #[test]
    fn release_feed_url_uses_api_base() {
        let source = ReleaseFeedSource::new(
            reqwest::Client::new(),
            "octo",
            "app",
            "https://ghe.example.com/api/v3/",
        );
        assert_eq!(
            source.latest_release_url(),
            "https://ghe.example.com/api/v3/repos/octo/app/releases/latest"
        );
    }

    #[test]
    fn release_payload_maps_to_record() {
        let record = record_from_release(
            r#"{"tag_name":"v1.4.0","html_url":"https://github.com/octo/app/releases/tag/v1.4.0","body":"Fixes"}"#,
        )
        .expect("release parses");

        assert_eq!(record.version_name, "1.4.0");
        assert_eq!(record.version_code, None);
        assert_eq!(
            record.download_url,
            "https://github.com/octo/app/releases/tag/v1.4.0"
        );
        assert_eq!(record.release_notes.as_deref(), Some("Fixes"));
    }

    #[test]
    fn release_payload_without_tag_is_a_parse_error() {
        let result = record_from_release(r#"{"html_url":"https://github.com/octo/app"}"#);
        assert!(
            matches!(result, Err(UpdateError::Parse { ref field, .. }) if field == "tag_name"),
            "got {result:?}"
        );

        let result = record_from_release("<html>rate limited</html>");
        assert!(matches!(result, Err(UpdateError::Parse { .. })));
    }

    #[test]
    fn source_config_round_trips_through_tagged_json() {
        let config: SourceConfig = serde_json::from_str(
            r#"{"kind":"manifest","url":"https://example.com/u.xml","format":"xml"}"#,
        )
        .expect("config deserializes");

        assert_eq!(config.kind(), SourceKind::Manifest);
        assert!(matches!(
            config,
            SourceConfig::Manifest { format: ManifestFormat::Xml, ref fields, .. }
                if *fields == ManifestFields::default()
        ));
    }

    #[test]
    fn response_snippet_truncates_body() {
        assert_eq!(response_snippet("", 10), "");
        assert_eq!(response_snippet("abcdef", 3), ": abc");
    }
}
