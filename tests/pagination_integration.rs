use cfsync::auth::Authenticator;
use cfsync::error::{AuthError, FetchError};
use cfsync::paginate::{Fetcher, PageRequest};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Deserialize)]
struct Item {
    id: String,
}

/// Hands out `Bearer <token>` and swaps to `next` on renewal.
struct SwappingAuth {
    token: Mutex<String>,
    next: Option<String>,
    renewals: AtomicUsize,
}

impl SwappingAuth {
    fn new(token: &str, next: Option<&str>) -> Self {
        SwappingAuth {
            token: Mutex::new(token.into()),
            next: next.map(String::from),
            renewals: AtomicUsize::new(0),
        }
    }
}

impl Authenticator for SwappingAuth {
    fn authorized_headers(&self) -> Result<HeaderMap, AuthError> {
        let mut headers = HeaderMap::new();
        let value = format!("Bearer {}", self.token.lock().unwrap());
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&value).unwrap());
        Ok(headers)
    }

    fn renew(&self, _rejected: &HeaderMap) -> Result<(), AuthError> {
        self.renewals.fetch_add(1, Ordering::SeqCst);
        match &self.next {
            Some(next) => {
                *self.token.lock().unwrap() = next.clone();
                Ok(())
            }
            None => Err(AuthError::RefreshFailed {
                status: 400,
                body: "invalid_grant".into(),
            }),
        }
    }
}

fn items(ids: &[u32]) -> Vec<serde_json::Value> {
    ids.iter().map(|id| json!({ "id": id.to_string() })).collect()
}

fn ids(items: &[Item]) -> Vec<&str> {
    items.iter().map(|i| i.id.as_str()).collect()
}

async fn mount_cursor_pages(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/wiki/api/v2/spaces"))
        .and(query_param_is_missing("cursor"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": items(&[1, 2]),
            "_links": { "next": "/wiki/api/v2/spaces?cursor=c2&limit=2" }
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/wiki/api/v2/spaces"))
        .and(query_param("cursor", "c3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": items(&[5]),
            "_links": {}
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_cursor_pagination_drains_in_order() {
    let server = MockServer::start().await;
    mount_cursor_pages(&server).await;
    Mock::given(method("GET"))
        .and(path("/wiki/api/v2/spaces"))
        .and(query_param("cursor", "c2"))
        .and(query_param("limit", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": items(&[3, 4]),
            "_links": { "next": "/wiki/api/v2/spaces?cursor=c3&limit=2" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/wiki/api/v2/spaces", server.uri());
    let result = tokio::task::spawn_blocking(move || {
        let auth = SwappingAuth::new("A", None);
        let client = Client::new();
        Fetcher::new(&client, &auth).drain_all::<Item>(&PageRequest::cursor(url, 2))
    })
    .await
    .unwrap();

    let items = result.unwrap();
    assert_eq!(ids(&items), vec!["1", "2", "3", "4", "5"]);
}

#[tokio::test]
async fn test_offset_pagination_stops_on_short_page() {
    let server = MockServer::start().await;
    for (start, page) in [("0", vec![1, 2]), ("2", vec![3, 4]), ("4", vec![5])] {
        Mock::given(method("GET"))
            .and(path("/wiki/rest/api/space"))
            .and(query_param("start", start))
            .and(query_param("limit", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": items(&page),
                "size": page.len()
            })))
            .expect(1)
            .mount(&server)
            .await;
    }

    let url = format!("{}/wiki/rest/api/space", server.uri());
    let result = tokio::task::spawn_blocking(move || {
        let auth = SwappingAuth::new("A", None);
        let client = Client::new();
        Fetcher::new(&client, &auth).drain_all::<Item>(&PageRequest::offset(url, 2))
    })
    .await
    .unwrap();

    assert_eq!(ids(&result.unwrap()), vec!["1", "2", "3", "4", "5"]);
}

#[tokio::test]
async fn test_offset_pagination_exact_multiple() {
    let server = MockServer::start().await;
    for (start, page) in [("0", vec![1, 2]), ("2", vec![])] {
        Mock::given(method("GET"))
            .and(path("/wiki/rest/api/content"))
            .and(query_param("start", start))
            .and(query_param("spaceKey", "DOCS"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": items(&page)
            })))
            .mount(&server)
            .await;
    }

    let url = format!("{}/wiki/rest/api/content", server.uri());
    let result = tokio::task::spawn_blocking(move || {
        let auth = SwappingAuth::new("A", None);
        let client = Client::new();
        let request = PageRequest::offset(url, 2).param("spaceKey", "DOCS");
        Fetcher::new(&client, &auth).drain_all::<Item>(&request)
    })
    .await
    .unwrap();

    assert_eq!(ids(&result.unwrap()), vec!["1", "2"]);
}

#[tokio::test]
async fn test_unauthorized_page_renews_once_and_resumes_cursor() {
    let server = MockServer::start().await;
    mount_cursor_pages(&server).await;

    Mock::given(method("GET"))
        .and(path("/wiki/api/v2/spaces"))
        .and(query_param("cursor", "c2"))
        .and(header("Authorization", "Bearer OLD"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/wiki/api/v2/spaces"))
        .and(query_param("cursor", "c2"))
        .and(header("Authorization", "Bearer NEW"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": items(&[3, 4]),
            "_links": { "next": "/wiki/api/v2/spaces?cursor=c3" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/wiki/api/v2/spaces", server.uri());
    let (result, renewals) = tokio::task::spawn_blocking(move || {
        let auth = SwappingAuth::new("OLD", Some("NEW"));
        let client = Client::new();
        let result = Fetcher::new(&client, &auth).drain_all::<Item>(&PageRequest::cursor(url, 2));
        (result, auth.renewals.load(Ordering::SeqCst))
    })
    .await
    .unwrap();

    assert_eq!(renewals, 1);
    assert_eq!(ids(&result.unwrap()), vec!["1", "2", "3", "4", "5"]);
}

#[tokio::test]
async fn test_failed_renewal_keeps_gathered_items() {
    let server = MockServer::start().await;
    mount_cursor_pages(&server).await;
    Mock::given(method("GET"))
        .and(path("/wiki/api/v2/spaces"))
        .and(query_param("cursor", "c2"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/wiki/api/v2/spaces", server.uri());
    let (result, renewals) = tokio::task::spawn_blocking(move || {
        let auth = SwappingAuth::new("OLD", None);
        let client = Client::new();
        let result = Fetcher::new(&client, &auth).drain_all::<Item>(&PageRequest::cursor(url, 2));
        (result, auth.renewals.load(Ordering::SeqCst))
    })
    .await
    .unwrap();

    assert_eq!(renewals, 1);
    let partial = result.unwrap_err();
    assert_eq!(ids(&partial.items), vec!["1", "2"]);
    assert!(matches!(partial.error, FetchError::AuthExpired(_)));
}

#[tokio::test]
async fn test_second_rejection_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wiki/api/v2/spaces"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let url = format!("{}/wiki/api/v2/spaces", server.uri());
    let (result, renewals) = tokio::task::spawn_blocking(move || {
        let auth = SwappingAuth::new("OLD", Some("NEW"));
        let client = Client::new();
        let result = Fetcher::new(&client, &auth).drain_all::<Item>(&PageRequest::cursor(url, 2));
        (result, auth.renewals.load(Ordering::SeqCst))
    })
    .await
    .unwrap();

    assert_eq!(renewals, 1);
    let partial = result.unwrap_err();
    assert!(partial.items.is_empty());
    assert!(matches!(partial.error, FetchError::AuthExpired(_)));
}

#[tokio::test]
async fn test_next_link_without_cursor_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wiki/api/v2/spaces"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": items(&[1]),
            "_links": { "next": "/wiki/api/v2/spaces?limit=2" }
        })))
        .mount(&server)
        .await;

    let url = format!("{}/wiki/api/v2/spaces", server.uri());
    let result = tokio::task::spawn_blocking(move || {
        let auth = SwappingAuth::new("A", None);
        let client = Client::new();
        Fetcher::new(&client, &auth).drain_all::<Item>(&PageRequest::cursor(url, 2))
    })
    .await
    .unwrap();

    let partial = result.unwrap_err();
    assert_eq!(ids(&partial.items), vec!["1"]);
    assert!(matches!(partial.error, FetchError::MalformedPage { .. }));
}

#[tokio::test]
async fn test_server_error_carries_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wiki/api/v2/spaces"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let url = format!("{}/wiki/api/v2/spaces", server.uri());
    let result = tokio::task::spawn_blocking(move || {
        let auth = SwappingAuth::new("A", None);
        let client = Client::new();
        Fetcher::new(&client, &auth).drain_all::<Item>(&PageRequest::cursor(url, 2))
    })
    .await
    .unwrap();

    match result.unwrap_err().error {
        FetchError::HttpError { status, body, .. } => {
            assert_eq!(status, 503);
            assert_eq!(body, "maintenance");
        }
        other => panic!("unexpected {:?}", other),
    }
}
