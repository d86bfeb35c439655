//! Client for the workspace REST API: paginated collection queries and block
//! children listings, behind the [`WorkspaceApi`] seam.

pub mod table;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

const NOTION_VERSION_HEADER: &str = "notion-version";

/// Immutable connection settings, built once from the config.
#[derive(Debug, Clone)]
pub struct NotionSettings {
    pub token: String,
    pub base_url: String,
    pub version: String,
    pub timeout: Duration,
    pub page_size: u32,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("remote returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to decode response: {source}")]
    Decode {
        #[source]
        source: serde_json::Error,
        body: String,
    },
    #[error("invalid endpoint URL: {0}")]
    Url(String),
    #[error("invalid value for header {0}")]
    Header(&'static str),
    #[error("remote repeated continuation cursor {0}")]
    RepeatedCursor(String),
}

#[async_trait]
pub trait WorkspaceApi: Send + Sync {
    /// Every result of a collection query, following continuation cursors.
    async fn query_collection(&self, collection_id: &str) -> Result<Vec<Value>, ApiError>;

    /// Every child block of `block_id`, following continuation cursors.
    async fn list_children(&self, block_id: &str) -> Result<Vec<Value>, ApiError>;
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    results: Vec<Value>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_cursor: Option<String>,
}

pub struct NotionClient {
    http: Client,
    settings: NotionSettings,
}

impl NotionClient {
    pub fn new(settings: NotionSettings) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", settings.token))
                .map_err(|_| ApiError::Header("Authorization"))?,
        );
        headers.insert(
            HeaderName::from_static(NOTION_VERSION_HEADER),
            HeaderValue::from_str(&settings.version)
                .map_err(|_| ApiError::Header("Notion-Version"))?,
        );

        let http = Client::builder()
            .timeout(settings.timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self { http, settings })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = Url::parse(&self.settings.base_url)
            .map_err(|error| ApiError::Url(format!("{}: {error}", self.settings.base_url)))?;

        url.path_segments_mut()
            .map_err(|_| ApiError::Url(self.settings.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);

        Ok(url)
    }

    async fn collect_pages<F>(&self, mut request_for: F) -> Result<Vec<Value>, ApiError>
    where
        F: FnMut(Option<&str>) -> RequestBuilder,
    {
        let mut results = Vec::new();
        let mut sent = HashSet::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = send(request_for(cursor.as_deref())).await?;
            results.extend(page.results);

            match page.next_cursor {
                Some(next) if page.has_more => {
                    if !sent.insert(next.clone()) {
                        return Err(ApiError::RepeatedCursor(next));
                    }
                    debug!(
                        cursor = %next,
                        fetched = results.len(),
                        "following continuation cursor"
                    );
                    cursor = Some(next);
                }
                _ => break,
            }
        }

        Ok(results)
    }
}

#[async_trait]
impl WorkspaceApi for NotionClient {
    async fn query_collection(&self, collection_id: &str) -> Result<Vec<Value>, ApiError> {
        let url = self.endpoint(&["databases", collection_id, "query"])?;
        let page_size = self.settings.page_size;

        self.collect_pages(|cursor| {
            let mut body = Map::new();
            body.insert("page_size".to_string(), json!(page_size));
            if let Some(cursor) = cursor {
                body.insert("start_cursor".to_string(), json!(cursor));
            }
            self.http.post(url.clone()).json(&Value::Object(body))
        })
        .await
    }

    async fn list_children(&self, block_id: &str) -> Result<Vec<Value>, ApiError> {
        let url = self.endpoint(&["blocks", block_id, "children"])?;
        let page_size = self.settings.page_size.to_string();

        self.collect_pages(|cursor| {
            let mut url = url.clone();
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("page_size", &page_size);
                if let Some(cursor) = cursor {
                    query.append_pair("start_cursor", cursor);
                }
            }
            self.http.get(url)
        })
        .await
    }
}

async fn send(request: RequestBuilder) -> Result<ListResponse, ApiError> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(ApiError::Status {
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str(&body).map_err(|source| ApiError::Decode { source, body })
}

#[cfg(test)]
mod tests {
    use super::{ApiError, NotionClient, NotionSettings, WorkspaceApi};
    use axum::extract::{Path, Query};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn query_handler(
        Path(id): Path<String>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        let authorized = headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            == Some("Bearer test-token");
        let versioned = headers.get("notion-version").is_some();
        if !authorized || !versioned {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "object": "error", "code": "unauthorized" })),
            );
        }

        let cursor = body.get("start_cursor").and_then(Value::as_str);
        if id == "cycle" {
            let next = if cursor == Some("a") { "b" } else { "a" };
            return (
                StatusCode::OK,
                Json(json!({
                    "results": [{ "id": cursor }],
                    "has_more": true,
                    "next_cursor": next
                })),
            );
        }

        match (id.as_str(), cursor) {
            ("paged", None) => (
                StatusCode::OK,
                Json(json!({
                    "results": [{ "id": "row-1" }, { "id": "row-2" }],
                    "has_more": true,
                    "next_cursor": "cursor-2"
                })),
            ),
            ("paged", Some("cursor-2")) => (
                StatusCode::OK,
                Json(json!({
                    "results": [{ "id": "row-3" }],
                    "has_more": false,
                    "next_cursor": null
                })),
            ),
            _ => (
                StatusCode::NOT_FOUND,
                Json(json!({ "object": "error", "code": "object_not_found" })),
            ),
        }
    }

    async fn children_handler(
        Path(id): Path<String>,
        Query(params): Query<HashMap<String, String>>,
    ) -> (StatusCode, Json<Value>) {
        if params.get("page_size").map(String::as_str) != Some("2") {
            return (StatusCode::BAD_REQUEST, Json(json!({ "code": "page_size" })));
        }

        match (id.as_str(), params.get("start_cursor").map(String::as_str)) {
            ("page-1", None) => (
                StatusCode::OK,
                Json(json!({
                    "results": [{ "id": "block-a" }, { "id": "block-b" }],
                    "has_more": true,
                    "next_cursor": "next"
                })),
            ),
            ("page-1", Some("next")) => (
                StatusCode::OK,
                Json(json!({ "results": [{ "id": "block-c" }], "has_more": false })),
            ),
            ("broken", _) => (StatusCode::OK, Json(json!({ "object": "list" }))),
            _ => (StatusCode::NOT_FOUND, Json(json!({ "code": "object_not_found" }))),
        }
    }

    async fn spawn_server() -> String {
        let app = Router::new()
            .route("/v1/databases/:id/query", post(query_handler))
            .route("/v1/blocks/:id/children", get(children_handler));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("test server");
        });

        format!("http://{addr}/v1")
    }

    fn client(base_url: String) -> NotionClient {
        NotionClient::new(NotionSettings {
            token: "test-token".to_string(),
            base_url,
            version: "2022-06-28".to_string(),
            timeout: Duration::from_secs(5),
            page_size: 2,
        })
        .expect("client")
    }

    fn ids(results: &[Value]) -> Vec<&str> {
        results
            .iter()
            .filter_map(|value| value.get("id").and_then(Value::as_str))
            .collect()
    }

    #[tokio::test]
    async fn query_follows_cursors_to_exhaustion() {
        let client = client(spawn_server().await);

        let results = client.query_collection("paged").await.expect("query");

        assert_eq!(ids(&results), vec!["row-1", "row-2", "row-3"]);
    }

    #[tokio::test]
    async fn cursor_cycle_is_an_error_instead_of_a_loop() {
        let client = client(spawn_server().await);

        let outcome = tokio::time::timeout(
            Duration::from_secs(3),
            client.query_collection("cycle"),
        )
        .await
            .expect("pagination stops on a repeated cursor");

        match outcome {
            Err(ApiError::RepeatedCursor(cursor)) => assert_eq!(cursor, "a"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn children_follow_cursors_to_exhaustion() {
        let client = client(spawn_server().await);

        let results = client.list_children("page-1").await.expect("children");

        assert_eq!(ids(&results), vec!["block-a", "block-b", "block-c"]);
    }

    #[tokio::test]
    async fn non_success_status_carries_body() {
        let client = client(spawn_server().await);

        let error = client
            .query_collection("missing")
            .await
            .expect_err("missing collection");

        match error {
            ApiError::Status { status, body } => {
                assert_eq!(status, 404);
                assert!(body.contains("object_not_found"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn response_without_results_is_a_decode_error() {
        let client = client(spawn_server().await);

        let error = client.list_children("broken").await.expect_err("no results");

        assert!(matches!(error, ApiError::Decode { .. }));
    }
}
