// ABOUTME: Drains cursor- and offset-paginated listings into one Vec
// ABOUTME: A 401 gets exactly one credential renewal and one retry

use crate::auth::Authenticator;
use crate::error::{FetchError, PartialFetch};
use crate::util::truncate_str;
use reqwest::blocking::{Client, Response};
use reqwest::header::HeaderMap;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStyle {
    /// Follow the `cursor` parameter of the `_links.next` link.
    Cursor,
    /// Advance `start` by the page size until a short page arrives.
    Offset,
}

#[derive(Debug, Clone)]
pub struct PageRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub page_size: usize,
    pub style: PageStyle,
}

impl PageRequest {
    pub fn cursor(url: impl Into<String>, page_size: usize) -> Self {
        PageRequest {
            url: url.into(),
            query: Vec::new(),
            page_size,
            style: PageStyle::Cursor,
        }
    }

    pub fn offset(url: impl Into<String>, page_size: usize) -> Self {
        PageRequest {
            url: url.into(),
            query: Vec::new(),
            page_size,
            style: PageStyle::Offset,
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }
}

#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

#[derive(Deserialize)]
struct ResultsEnvelope<T> {
    results: Vec<T>,
    #[serde(default, rename = "_links")]
    links: Links,
}

#[derive(Deserialize, Default)]
struct Links {
    next: Option<String>,
}

/// Parses the `{"results": [...], "_links": {"next": ...}}` shape both
/// Confluence API generations return.
pub fn parse_results_page<T: DeserializeOwned>(body: &str) -> Result<Page<T>, String> {
    let envelope: ResultsEnvelope<T> = serde_json::from_str(body).map_err(|e| e.to_string())?;
    Ok(Page {
        items: envelope.results,
        next: envelope.links.next,
    })
}

/// Extracts the opaque cursor from a relative or absolute next link.
pub fn cursor_from_link(link: &str) -> Option<String> {
    let url = Url::parse("http://localhost").ok()?.join(link).ok()?;
    let cursor = url
        .query_pairs()
        .find(|(key, _)| key == "cursor")
        .map(|(_, value)| value.into_owned());
    cursor.filter(|c| !c.is_empty())
}

pub struct Fetcher<'a> {
    http: &'a Client,
    auth: &'a dyn Authenticator,
}

impl<'a> Fetcher<'a> {
    pub fn new(http: &'a Client, auth: &'a dyn Authenticator) -> Self {
        Fetcher { http, auth }
    }

    /// GETs a URL and returns the body of a 2xx response.
    pub fn get_text(&self, url: &str, query: &[(String, String)]) -> Result<String, FetchError> {
        let headers = self.auth.authorized_headers()?;
        let mut response = self.send(url, query, headers.clone())?;

        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(url, "credential rejected, renewing once");
            self.auth
                .renew(&headers)
                .map_err(|e| FetchError::AuthExpired(e.to_string()))?;
            response = self.send(url, query, self.auth.authorized_headers()?)?;
            if response.status() == StatusCode::UNAUTHORIZED {
                return Err(FetchError::AuthExpired(
                    "renewed credential was rejected too".into(),
                ));
            }
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(FetchError::HttpError {
                url: url.to_string(),
                status: status.as_u16(),
                body: truncate_str(&body, 300),
            });
        }
        Ok(response.text()?)
    }

    fn send(
        &self,
        url: &str,
        query: &[(String, String)],
        headers: HeaderMap,
    ) -> Result<Response, FetchError> {
        Ok(self.http.get(url).headers(headers).query(query).send()?)
    }

    pub fn drain_all<T: DeserializeOwned>(
        &self,
        request: &PageRequest,
    ) -> Result<Vec<T>, PartialFetch<T>> {
        self.drain_with(request, parse_results_page)
    }

    /// Fetches every page of `request`. On failure the items gathered so
    /// far come back inside the error.
    pub fn drain_with<T, P>(&self, request: &PageRequest, parse: P) -> Result<Vec<T>, PartialFetch<T>>
    where
        P: Fn(&str) -> Result<Page<T>, String>,
    {
        let page_size = request.page_size.max(1);
        let mut items: Vec<T> = Vec::new();
        let mut cursor: Option<String> = None;
        let mut start = 0usize;
        let mut pages = 0usize;

        loop {
            let mut query = request.query.clone();
            query.push(("limit".into(), page_size.to_string()));
            match (request.style, &cursor) {
                (PageStyle::Cursor, Some(c)) => query.push(("cursor".into(), c.clone())),
                (PageStyle::Cursor, None) => {}
                (PageStyle::Offset, _) => query.push(("start".into(), start.to_string())),
            }

            let body = match self.get_text(&request.url, &query) {
                Ok(body) => body,
                Err(error) => return Err(PartialFetch { items, error }),
            };
            let page = match parse(&body) {
                Ok(page) => page,
                Err(reason) => return Err(malformed(items, &request.url, reason)),
            };

            pages += 1;
            let count = page.items.len();
            items.extend(page.items);
            debug!(url = %request.url, page = pages, count, total = items.len(), "fetched page");

            match request.style {
                PageStyle::Cursor => {
                    let Some(link) = page.next else { break };
                    let Some(next) = cursor_from_link(&link) else {
                        return Err(malformed(
                            items,
                            &request.url,
                            format!("next link without cursor: {}", link),
                        ));
                    };
                    if cursor.as_deref() == Some(next.as_str()) {
                        return Err(malformed(items, &request.url, "cursor did not advance".into()));
                    }
                    cursor = Some(next);
                }
                PageStyle::Offset => {
                    if count < page_size {
                        break;
                    }
                    start += count;
                }
            }
        }

        Ok(items)
    }
}

fn malformed<T>(items: Vec<T>, url: &str, reason: String) -> PartialFetch<T> {
    PartialFetch {
        items,
        error: FetchError::MalformedPage {
            url: url.to_string(),
            reason,
        },
    }
}
