use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::DEFAULT_BASE_URL;
use crate::types::{
    BookListQuery, DocumentListQuery, DocumentUpdate, ExportQuery, HighlightListQuery,
    HighlightUpdate, NewHighlight, SaveDocument, TagListQuery,
};

#[derive(Debug, Clone)]
pub struct ReadwiseClientOptions {
    pub base_url: String,
    pub token: String,
    pub timeout: Duration,
}

impl ReadwiseClientOptions {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: token.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReadwiseError {
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("readwise returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid arguments: {0}")]
    Arguments(String),
}

/// Thin client for the Readwise v2 and Reader v3 APIs.
///
/// Responses are handed back as raw JSON; callers decide how much of the
/// upstream shape they care about.
#[derive(Debug, Clone)]
pub struct ReadwiseClient {
    http: reqwest::Client,
    base: Url,
    token: String,
}

impl ReadwiseClient {
    pub fn new(opts: ReadwiseClientOptions) -> Result<Self, ReadwiseError> {
        let mut base = Url::parse(&opts.base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = reqwest::Client::builder()
            .timeout(opts.timeout)
            .user_agent(concat!("readwise-mcp/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base,
            token: opts.token,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    // Readwise v2

    pub async fn list_highlights(&self, q: &HighlightListQuery) -> Result<Value, ReadwiseError> {
        self.get("api/v2/highlights/", Some(q)).await
    }

    pub async fn get_highlight(&self, id: i64) -> Result<Value, ReadwiseError> {
        self.get::<()>(&format!("api/v2/highlights/{id}/"), None)
            .await
    }

    pub async fn create_highlights(
        &self,
        highlights: &[NewHighlight],
    ) -> Result<Value, ReadwiseError> {
        let body = serde_json::json!({ "highlights": highlights });
        self.send(Method::POST, "api/v2/highlights/", Some(&body))
            .await
    }

    pub async fn update_highlight(
        &self,
        id: i64,
        update: &HighlightUpdate,
    ) -> Result<Value, ReadwiseError> {
        self.send(Method::PATCH, &format!("api/v2/highlights/{id}/"), Some(update))
            .await
    }

    pub async fn delete_highlight(&self, id: i64) -> Result<(), ReadwiseError> {
        self.send::<()>(Method::DELETE, &format!("api/v2/highlights/{id}/"), None)
            .await
            .map(|_| ())
    }

    pub async fn list_books(&self, q: &BookListQuery) -> Result<Value, ReadwiseError> {
        self.get("api/v2/books/", Some(q)).await
    }

    pub async fn daily_review(&self) -> Result<Value, ReadwiseError> {
        self.get::<()>("api/v2/review/", None).await
    }

    pub async fn export(&self, q: &ExportQuery) -> Result<Value, ReadwiseError> {
        self.get("api/v2/export/", Some(q)).await
    }

    // Reader v3

    pub async fn list_documents(&self, q: &DocumentListQuery) -> Result<Value, ReadwiseError> {
        self.get("api/v3/list/", Some(q)).await
    }

    pub async fn save_document(&self, doc: &SaveDocument) -> Result<Value, ReadwiseError> {
        self.send(Method::POST, "api/v3/save/", Some(doc)).await
    }

    pub async fn update_document(
        &self,
        id: &str,
        update: &DocumentUpdate,
    ) -> Result<Value, ReadwiseError> {
        let path = format!("api/v3/update/{}/", path_segment(id)?);
        self.send(Method::PATCH, &path, Some(update)).await
    }

    pub async fn delete_document(&self, id: &str) -> Result<(), ReadwiseError> {
        let path = format!("api/v3/delete/{}/", path_segment(id)?);
        self.send::<()>(Method::DELETE, &path, None).await.map(|_| ())
    }

    pub async fn list_tags(&self, q: &TagListQuery) -> Result<Value, ReadwiseError> {
        self.get("api/v3/tags/", Some(q)).await
    }

    async fn get<Q: Serialize + ?Sized>(
        &self,
        path: &str,
        query: Option<&Q>,
    ) -> Result<Value, ReadwiseError> {
        let url = self.base.join(path)?;
        debug!(url = %url, "readwise GET");
        let mut req = self
            .http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, self.auth_header());
        if let Some(q) = query {
            req = req.query(q);
        }
        read_json(req.send().await?).await
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Value, ReadwiseError> {
        let url = self.base.join(path)?;
        debug!(method = %method, url = %url, "readwise request");
        let mut req = self
            .http
            .request(method, url)
            .header(reqwest::header::AUTHORIZATION, self.auth_header());
        if let Some(b) = body {
            req = req.json(b);
        }
        read_json(req.send().await?).await
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.token)
    }
}

/// Reader document ids are opaque strings; refuse anything that would change
/// the request path.
fn path_segment(id: &str) -> Result<&str, ReadwiseError> {
    let id = id.trim();
    if id.is_empty() || id.contains(['/', '?', '#']) || id == "." || id == ".." {
        return Err(ReadwiseError::Arguments(format!("invalid document id: {id:?}")));
    }
    Ok(id)
}

async fn read_json(resp: reqwest::Response) -> Result<Value, ReadwiseError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ReadwiseError::Status { status, body });
    }
    if status == StatusCode::NO_CONTENT {
        return Ok(Value::Null);
    }
    let bytes = resp.bytes().await?;
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::response::IntoResponse;
    use axum::routing::{delete, get, patch, post};
    use axum::Json;

    #[derive(Clone, Default)]
    struct Seen {
        auth: Arc<Mutex<Vec<String>>>,
        queries: Arc<Mutex<Vec<std::collections::HashMap<String, String>>>>,
        bodies: Arc<Mutex<Vec<Value>>>,
    }

    fn record_auth(seen: &Seen, headers: &HeaderMap) {
        let v = headers
            .get("authorization")
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default()
            .to_string();
        seen.auth.lock().expect("lock").push(v);
    }

    async fn start_mock() -> anyhow::Result<(SocketAddr, Seen, tokio::task::JoinHandle<()>)> {
        async fn highlights(
            State(seen): State<Seen>,
            headers: HeaderMap,
            Query(q): Query<std::collections::HashMap<String, String>>,
        ) -> Json<Value> {
            record_auth(&seen, &headers);
            seen.queries.lock().expect("lock").push(q);
            Json(serde_json::json!({"count": 1, "results": [{"id": 1, "text": "hello"}]}))
        }

        async fn create(
            State(seen): State<Seen>,
            headers: HeaderMap,
            Json(body): Json<Value>,
        ) -> Json<Value> {
            record_auth(&seen, &headers);
            seen.bodies.lock().expect("lock").push(body);
            Json(serde_json::json!([{"id": 10, "title": "Book"}]))
        }

        async fn update_doc(
            State(seen): State<Seen>,
            Path(id): Path<String>,
            Json(body): Json<Value>,
        ) -> Json<Value> {
            seen.bodies.lock().expect("lock").push(body);
            Json(serde_json::json!({"id": id}))
        }

        async fn delete_highlight(Path(id): Path<i64>) -> impl IntoResponse {
            if id == 404 {
                return (AxumStatus::NOT_FOUND, "{\"detail\":\"Not found.\"}").into_response();
            }
            AxumStatus::NO_CONTENT.into_response()
        }

        let seen = Seen::default();
        let app = Router::new()
            .route("/api/v2/highlights/", get(highlights).post(create))
            .route("/api/v2/highlights/{id}/", delete(delete_highlight))
            .route("/api/v3/update/{id}/", patch(update_doc))
            .route(
                "/api/v3/save/",
                post(|| async { (AxumStatus::CREATED, Json(serde_json::json!({"id": "d1"}))) }),
            )
            .with_state(seen.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok((addr, seen, handle))
    }

    fn client_for(addr: SocketAddr) -> ReadwiseClient {
        let mut opts = ReadwiseClientOptions::new("tok_123");
        opts.base_url = format!("http://{addr}");
        ReadwiseClient::new(opts).expect("client")
    }

    #[tokio::test]
    async fn sends_token_auth_and_query() -> anyhow::Result<()> {
        let (addr, seen, handle) = start_mock().await?;
        let client = client_for(addr);

        let out = client
            .list_highlights(&HighlightListQuery {
                page_size: Some(5),
                updated_after: Some("2024-01-01".to_string()),
                ..Default::default()
            })
            .await?;
        assert_eq!(out["results"][0]["text"], "hello");

        assert_eq!(seen.auth.lock().expect("lock")[0], "Token tok_123");
        let q = seen.queries.lock().expect("lock")[0].clone();
        assert_eq!(q.get("page_size").map(String::as_str), Some("5"));
        assert_eq!(q.get("updated__gt").map(String::as_str), Some("2024-01-01"));
        assert!(!q.contains_key("page"));

        handle.abort();
        Ok(())
    }

    #[tokio::test]
    async fn create_wraps_highlights_array() -> anyhow::Result<()> {
        let (addr, seen, handle) = start_mock().await?;
        let client = client_for(addr);

        client
            .create_highlights(&[NewHighlight {
                text: "quote".to_string(),
                title: Some("Book".to_string()),
                ..Default::default()
            }])
            .await?;

        let body = seen.bodies.lock().expect("lock")[0].clone();
        assert_eq!(
            body,
            serde_json::json!({"highlights": [{"text": "quote", "title": "Book"}]})
        );

        handle.abort();
        Ok(())
    }

    #[tokio::test]
    async fn no_content_and_error_statuses() -> anyhow::Result<()> {
        let (addr, _seen, handle) = start_mock().await?;
        let client = client_for(addr);

        client.delete_highlight(7).await?;

        let err = client.delete_highlight(404).await.expect_err("not found");
        match err {
            ReadwiseError::Status { status, body } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert!(body.contains("Not found"));
            }
            other => panic!("unexpected error: {other}"),
        }

        handle.abort();
        Ok(())
    }

    #[tokio::test]
    async fn reader_calls_use_v3_paths() -> anyhow::Result<()> {
        let (addr, seen, handle) = start_mock().await?;
        let client = client_for(addr);

        let saved = client
            .save_document(&SaveDocument {
                url: "https://example.com/a".to_string(),
                ..Default::default()
            })
            .await?;
        assert_eq!(saved["id"], "d1");

        let updated = client
            .update_document(
                "d1",
                &DocumentUpdate {
                    title: Some("New".to_string()),
                    ..Default::default()
                },
            )
            .await?;
        assert_eq!(updated["id"], "d1");
        assert_eq!(
            seen.bodies.lock().expect("lock").last().cloned(),
            Some(serde_json::json!({"title": "New"}))
        );

        handle.abort();
        Ok(())
    }

    #[test]
    fn rejects_path_breaking_document_ids() {
        for bad in ["", "a/b", "..", "x?y=1", "  "] {
            assert!(path_segment(bad).is_err(), "id={bad:?}");
        }
        assert_eq!(path_segment(" 01gxyz ").expect("ok"), "01gxyz");
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        let mut opts = ReadwiseClientOptions::new("t");
        opts.base_url = "http://proxy.local/readwise".to_string();
        let c = ReadwiseClient::new(opts).expect("client");
        assert_eq!(
            c.base_url().join("api/v2/books/").expect("join").as_str(),
            "http://proxy.local/readwise/api/v2/books/"
        );
    }
}
