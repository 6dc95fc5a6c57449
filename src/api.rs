// ABOUTME: Blocking client for the Confluence REST surfaces (v2 first, v1 fallback)
// ABOUTME: Normalises spaces, page listings, page details and CQL search results

use crate::auth::Authenticator;
use crate::config::Config;
use crate::error::{FetchError, PartialFetch};
use crate::model::{string_or_number, AuthorInfo, ItemSummary, PageDetail, PageSummary, Space, VersionInfo};
use crate::paginate::{parse_results_page, Fetcher, PageRequest};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

pub const V2_PAGE_SIZE: usize = 250;
pub const V1_PAGE_SIZE: usize = 100;
pub const SEARCH_LIMIT: usize = 50;

pub fn http_client(config: &Config) -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.http_timeout)
        .user_agent(concat!("cfsync/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// One generation of the Confluence REST API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiSurface {
    V2,
    V1,
}

impl ApiSurface {
    pub const PRIORITY: [ApiSurface; 2] = [ApiSurface::V2, ApiSurface::V1];

    fn spaces_request(self, base: &str) -> PageRequest {
        match self {
            ApiSurface::V2 => PageRequest::cursor(format!("{}/wiki/api/v2/spaces", base), V2_PAGE_SIZE),
            ApiSurface::V1 => PageRequest::offset(format!("{}/wiki/rest/api/space", base), V1_PAGE_SIZE),
        }
    }

    fn pages_request(self, base: &str, space: &Space) -> PageRequest {
        match self {
            ApiSurface::V2 => PageRequest::cursor(
                format!("{}/wiki/api/v2/spaces/{}/pages", base, space.id),
                V2_PAGE_SIZE,
            ),
            ApiSurface::V1 => PageRequest::offset(format!("{}/wiki/rest/api/content", base), V1_PAGE_SIZE)
                .param("spaceKey", space.key.as_str())
                .param("type", "page"),
        }
    }
}

pub struct ApiClient {
    http: Client,
    auth: Arc<dyn Authenticator>,
    base_url: String,
    site_url: Option<String>,
    selected: Mutex<Option<ApiSurface>>,
}

impl ApiClient {
    /// `base_url` is the root under which `/wiki/...` paths resolve.
    pub fn new(http: Client, auth: Arc<dyn Authenticator>, base_url: impl Into<String>) -> Self {
        ApiClient {
            http,
            auth,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            site_url: None,
            selected: Mutex::new(None),
        }
    }

    /// Browser-facing site root used to build page links.
    pub fn with_site_url(mut self, site_url: impl Into<String>) -> Self {
        self.site_url = Some(site_url.into().trim_end_matches('/').to_string());
        self
    }

    fn fetcher(&self) -> Fetcher<'_> {
        Fetcher::new(&self.http, self.auth.as_ref())
    }

    /// Surface that answered first this session, or the preferred one.
    pub fn surface(&self) -> ApiSurface {
        self.selected
            .lock()
            .ok()
            .and_then(|s| *s)
            .unwrap_or(ApiSurface::PRIORITY[0])
    }

    fn remember(&self, surface: ApiSurface) {
        if let Ok(mut selected) = self.selected.lock() {
            if selected.is_none() {
                info!(?surface, "using Confluence API surface");
            }
            *selected = Some(surface);
        }
    }

    /// Tries each surface in order until one answers. Only a clean miss
    /// (HTTP error or unparseable first page) moves on to the next surface.
    fn with_fallback<T, F>(&self, mut attempt: F) -> Result<Vec<T>, PartialFetch<T>>
    where
        F: FnMut(ApiSurface) -> Result<Vec<T>, PartialFetch<T>>,
    {
        let pinned = self.selected.lock().ok().and_then(|s| *s);
        if let Some(surface) = pinned {
            return attempt(surface);
        }

        let mut last = None;
        for surface in ApiSurface::PRIORITY {
            match attempt(surface) {
                Ok(items) => {
                    self.remember(surface);
                    return Ok(items);
                }
                Err(partial) if partial.items.is_empty() && is_surface_miss(&partial.error) => {
                    warn!(?surface, error = %partial.error, "API surface unavailable, trying next");
                    last = Some(partial);
                }
                Err(partial) => return Err(partial),
            }
        }

        Err(last.unwrap_or_else(|| PartialFetch {
            items: Vec::new(),
            error: FetchError::MalformedPage {
                url: self.base_url.clone(),
                reason: "no API surface answered".into(),
            },
        }))
    }

    pub fn list_spaces(&self) -> Result<Vec<Space>, PartialFetch<Space>> {
        self.with_fallback(|surface| {
            self.fetcher()
                .drain_all(&surface.spaces_request(&self.base_url))
        })
    }

    pub fn list_pages(&self, space: &Space) -> Result<Vec<PageSummary>, PartialFetch<PageSummary>> {
        self.with_fallback(|surface| {
            self.fetcher()
                .drain_all(&surface.pages_request(&self.base_url, space))
        })
    }

    /// One page with its storage-format body.
    pub fn get_page(&self, id: &str) -> Result<PageDetail, FetchError> {
        let surface = self.surface();
        let (url, query) = match surface {
            ApiSurface::V2 => (
                format!("{}/wiki/api/v2/pages/{}", self.base_url, id),
                vec![("body-format".to_string(), "storage".to_string())],
            ),
            ApiSurface::V1 => (
                format!("{}/wiki/rest/api/content/{}", self.base_url, id),
                vec![(
                    "expand".to_string(),
                    "body.storage,version,history,history.lastUpdated".to_string(),
                )],
            ),
        };

        let body = self.fetcher().get_text(&url, &query)?;
        let malformed = |e: serde_json::Error| FetchError::MalformedPage {
            url: url.clone(),
            reason: e.to_string(),
        };
        let mut detail = match surface {
            ApiSurface::V2 => serde_json::from_str::<V2Page>(&body)
                .map_err(malformed)?
                .into_detail(),
            ApiSurface::V1 => serde_json::from_str::<V1Content>(&body)
                .map_err(malformed)?
                .into_detail(),
        };
        detail.web_url = detail.web_url.take().map(|path| self.web_link(&path));
        debug!(id, title = %detail.title, "fetched page detail");
        Ok(detail)
    }

    /// CQL full-text search inside one space. A single request, capped at
    /// [`SEARCH_LIMIT`] results.
    pub fn search(&self, space_key: &str, query: &str) -> Result<Vec<ItemSummary>, FetchError> {
        let url = format!("{}/wiki/rest/api/content/search", self.base_url);
        let cql = format!(
            "space=\"{}\" AND text~\"{}\"",
            escape_cql(space_key),
            escape_cql(query)
        );
        let params = vec![
            ("cql".to_string(), cql),
            ("limit".to_string(), SEARCH_LIMIT.to_string()),
        ];

        let body = self.fetcher().get_text(&url, &params)?;
        let page = parse_results_page::<SearchHit>(&body)
            .map_err(|reason| FetchError::MalformedPage { url, reason })?;

        Ok(page
            .items
            .into_iter()
            .map(|hit| ItemSummary {
                url: hit.links.webui.map(|path| self.web_link(&path)),
                id: hit.id,
                title: hit.title,
            })
            .collect())
    }

    fn web_link(&self, path: &str) -> String {
        match &self.site_url {
            Some(site) if path.starts_with('/') => format!("{}/wiki{}", site, path),
            _ => path.to_string(),
        }
    }
}

fn is_surface_miss(error: &FetchError) -> bool {
    matches!(
        error,
        FetchError::HttpError { .. } | FetchError::MalformedPage { .. }
    )
}

fn escape_cql(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[derive(Deserialize, Default)]
struct WebLinks {
    webui: Option<String>,
}

#[derive(Deserialize)]
struct BodyContainer {
    storage: Option<StorageBody>,
}

#[derive(Deserialize)]
struct StorageBody {
    value: Option<String>,
}

impl BodyContainer {
    fn into_value(self) -> Option<String> {
        self.storage.and_then(|s| s.value)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct V2Page {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    #[serde(default)]
    title: String,
    author_id: Option<String>,
    created_at: Option<String>,
    version: Option<V2Version>,
    body: Option<BodyContainer>,
    #[serde(default, rename = "_links")]
    links: WebLinks,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct V2Version {
    number: Option<u64>,
    created_at: Option<String>,
    author_id: Option<String>,
}

impl V2Page {
    fn into_detail(self) -> PageDetail {
        let version = self.version.map(|v| VersionInfo {
            number: v.number,
            updated_at: v.created_at,
            updated_by: None,
            updated_by_account_id: v.author_id,
        });
        PageDetail {
            id: self.id,
            title: self.title,
            body: self.body.and_then(BodyContainer::into_value),
            version: version.unwrap_or_default(),
            author: AuthorInfo {
                account_id: self.author_id,
                created_at: self.created_at,
                ..AuthorInfo::default()
            },
            web_url: self.links.webui,
        }
    }
}

#[derive(Deserialize)]
struct V1Content {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    #[serde(default)]
    title: String,
    version: Option<V1Version>,
    body: Option<BodyContainer>,
    history: Option<V1History>,
    #[serde(default, rename = "_links")]
    links: WebLinks,
}

#[derive(Deserialize)]
struct V1Version {
    number: Option<u64>,
    when: Option<String>,
    by: Option<V1User>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct V1User {
    display_name: Option<String>,
    account_id: Option<String>,
    email: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct V1History {
    created_by: Option<V1User>,
    created_date: Option<String>,
    last_updated: Option<V1LastUpdated>,
}

#[derive(Deserialize)]
struct V1LastUpdated {
    by: Option<V1User>,
    when: Option<String>,
}

impl V1Content {
    fn into_detail(self) -> PageDetail {
        let (created_by, created_at, last_updated) = match self.history {
            Some(h) => (h.created_by, h.created_date, h.last_updated),
            None => (None, None, None),
        };
        let (last_by, last_when) = match last_updated {
            Some(l) => (l.by, l.when),
            None => (None, None),
        };
        let (number, when, by) = match self.version {
            Some(v) => (v.number, v.when, v.by),
            None => (None, None, None),
        };
        let editor = last_by.or(by);

        PageDetail {
            id: self.id,
            title: self.title,
            body: self.body.and_then(BodyContainer::into_value),
            version: VersionInfo {
                number,
                updated_at: last_when.or(when),
                updated_by: editor.as_ref().and_then(|u| u.display_name.clone()),
                updated_by_account_id: editor.and_then(|u| u.account_id),
            },
            author: match created_by {
                Some(user) => AuthorInfo {
                    display_name: user.display_name,
                    account_id: user.account_id,
                    email: user.email,
                    created_at,
                },
                None => AuthorInfo {
                    created_at,
                    ..AuthorInfo::default()
                },
            },
            web_url: self.links.webui,
        }
    }
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default, rename = "_links")]
    links: WebLinks,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_cql() {
        assert_eq!(escape_cql(r#"say "hi""#), r#"say \"hi\""#);
        assert_eq!(escape_cql(r"a\b"), r"a\\b");
    }

    #[test]
    fn test_v2_page_detail() {
        let json = r#"{
            "id": "123", "title": "Runbook", "authorId": "acc-1",
            "createdAt": "2025-01-02T03:04:05.000Z",
            "version": {"number": 4, "createdAt": "2025-02-01T00:00:00.000Z", "authorId": "acc-2"},
            "body": {"storage": {"value": "<p>Hi</p>", "representation": "storage"}},
            "_links": {"webui": "/spaces/DOCS/pages/123/Runbook"}
        }"#;
        let detail = serde_json::from_str::<V2Page>(json).unwrap().into_detail();
        assert_eq!(detail.body.as_deref(), Some("<p>Hi</p>"));
        assert_eq!(detail.version.number, Some(4));
        assert!(detail.version.updated_by.is_none());
        assert_eq!(detail.version.updated_by_account_id.as_deref(), Some("acc-2"));
        assert_eq!(detail.author.account_id.as_deref(), Some("acc-1"));
        assert_eq!(detail.web_url.as_deref(), Some("/spaces/DOCS/pages/123/Runbook"));
    }

    #[test]
    fn test_v1_content_detail() {
        let json = r#"{
            "id": 77, "title": "Old page",
            "version": {"number": 2, "when": "2024-05-05T10:00:00.000Z", "by": {"displayName": "Bob"}},
            "history": {
                "createdBy": {"displayName": "Alice", "email": "alice@example.com"},
                "createdDate": "2024-01-01T00:00:00.000Z",
                "lastUpdated": {"by": {"displayName": "Carol", "accountId": "acc-9"}, "when": "2024-06-06T00:00:00.000Z"}
            },
            "body": {"storage": {"value": "<h1>T</h1>"}}
        }"#;
        let detail = serde_json::from_str::<V1Content>(json).unwrap().into_detail();
        assert_eq!(detail.id, "77");
        assert_eq!(detail.version.updated_by.as_deref(), Some("Carol"));
        assert_eq!(detail.version.updated_by_account_id.as_deref(), Some("acc-9"));
        assert_eq!(detail.version.updated_at.as_deref(), Some("2024-06-06T00:00:00.000Z"));
        assert_eq!(detail.author.display_name.as_deref(), Some("Alice"));
        assert!(detail.web_url.is_none());
    }

    #[test]
    fn test_missing_body_is_none() {
        let detail = serde_json::from_str::<V2Page>(r#"{"id": "1", "title": "Empty"}"#)
            .unwrap()
            .into_detail();
        assert!(detail.body.is_none());
        assert_eq!(detail.version, VersionInfo::default());
    }
}
