use async_trait::async_trait;
use readwise_mcp::{CallToolResult, ToolDescriptor, ToolExecutor};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::client::{ReadwiseClient, ReadwiseError};
use crate::types::{
    BookListQuery, DocumentListQuery, DocumentUpdate, ExportQuery, HighlightListQuery,
    HighlightUpdate, NewHighlight, SaveDocument, TagListQuery,
};

/// Every tool this server exposes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReadwiseTool {
    ListHighlights,
    GetHighlight,
    CreateHighlight,
    UpdateHighlight,
    DeleteHighlight,
    SearchHighlights,
    ListBooks,
    DailyReview,
    ExportHighlights,
    ListDocuments,
    SaveDocument,
    UpdateDocument,
    DeleteDocument,
    ListTags,
}

impl ReadwiseTool {
    pub const ALL: [ReadwiseTool; 14] = [
        Self::ListHighlights,
        Self::GetHighlight,
        Self::CreateHighlight,
        Self::UpdateHighlight,
        Self::DeleteHighlight,
        Self::SearchHighlights,
        Self::ListBooks,
        Self::DailyReview,
        Self::ExportHighlights,
        Self::ListDocuments,
        Self::SaveDocument,
        Self::UpdateDocument,
        Self::DeleteDocument,
        Self::ListTags,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::ListHighlights => "readwise_list_highlights",
            Self::GetHighlight => "readwise_get_highlight",
            Self::CreateHighlight => "readwise_create_highlight",
            Self::UpdateHighlight => "readwise_update_highlight",
            Self::DeleteHighlight => "readwise_delete_highlight",
            Self::SearchHighlights => "readwise_search_highlights",
            Self::ListBooks => "readwise_list_books",
            Self::DailyReview => "readwise_daily_review",
            Self::ExportHighlights => "readwise_export_highlights",
            Self::ListDocuments => "reader_list_documents",
            Self::SaveDocument => "reader_save_document",
            Self::UpdateDocument => "reader_update_document",
            Self::DeleteDocument => "reader_delete_document",
            Self::ListTags => "reader_list_tags",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    pub fn descriptor(self) -> ToolDescriptor {
        let (description, input_schema) = match self {
            Self::ListHighlights => (
                "List highlights from Readwise, newest first. Supports paging and filtering by book or update time.",
                json!({
                    "type": "object",
                    "properties": {
                        "page": {"type": "integer", "minimum": 1},
                        "page_size": {"type": "integer", "minimum": 1, "maximum": 1000},
                        "book_id": {"type": "integer"},
                        "updated_after": {"type": "string", "description": "ISO 8601 timestamp"}
                    }
                }),
            ),
            Self::GetHighlight => (
                "Fetch a single Readwise highlight by id.",
                json!({
                    "type": "object",
                    "properties": {"id": {"type": "integer"}},
                    "required": ["id"]
                }),
            ),
            Self::CreateHighlight => (
                "Create a highlight in Readwise. Highlights with the same title and author are grouped into one book.",
                json!({
                    "type": "object",
                    "properties": {
                        "text": {"type": "string"},
                        "title": {"type": "string"},
                        "author": {"type": "string"},
                        "source_url": {"type": "string"},
                        "source_type": {"type": "string"},
                        "category": {"type": "string", "enum": ["books", "articles", "tweets", "podcasts"]},
                        "note": {"type": "string"},
                        "location": {"type": "integer"},
                        "location_type": {"type": "string"},
                        "highlighted_at": {"type": "string"},
                        "highlight_url": {"type": "string"}
                    },
                    "required": ["text"]
                }),
            ),
            Self::UpdateHighlight => (
                "Update the text, note, location, url or color of an existing highlight.",
                json!({
                    "type": "object",
                    "properties": {
                        "id": {"type": "integer"},
                        "text": {"type": "string"},
                        "note": {"type": "string"},
                        "location": {"type": "integer"},
                        "url": {"type": "string"},
                        "color": {"type": "string"}
                    },
                    "required": ["id"]
                }),
            ),
            Self::DeleteHighlight => (
                "Delete a Readwise highlight by id.",
                json!({
                    "type": "object",
                    "properties": {"id": {"type": "integer"}},
                    "required": ["id"]
                }),
            ),
            Self::SearchHighlights => (
                "Case-insensitive search over highlight text and notes.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"},
                        "book_id": {"type": "integer"},
                        "limit": {"type": "integer", "minimum": 1, "maximum": 100}
                    },
                    "required": ["query"]
                }),
            ),
            Self::ListBooks => (
                "List books, articles, tweets and podcasts that have highlights.",
                json!({
                    "type": "object",
                    "properties": {
                        "page": {"type": "integer", "minimum": 1},
                        "page_size": {"type": "integer", "minimum": 1, "maximum": 1000},
                        "category": {"type": "string", "enum": ["books", "articles", "tweets", "supplementals", "podcasts"]},
                        "source": {"type": "string"},
                        "updated_after": {"type": "string"}
                    }
                }),
            ),
            Self::DailyReview => (
                "Get today's Readwise daily review highlights.",
                json!({"type": "object", "properties": {}}),
            ),
            Self::ExportHighlights => (
                "Export highlights grouped by book, optionally only those updated after a timestamp.",
                json!({
                    "type": "object",
                    "properties": {
                        "updated_after": {"type": "string"},
                        "ids": {"type": "array", "items": {"type": "integer"}},
                        "page_cursor": {"type": "string"},
                        "include_deleted": {"type": "boolean"}
                    }
                }),
            ),
            Self::ListDocuments => (
                "List documents saved in Readwise Reader.",
                json!({
                    "type": "object",
                    "properties": {
                        "id": {"type": "string"},
                        "location": {"type": "string", "enum": ["new", "later", "shortlist", "archive", "feed"]},
                        "category": {"type": "string", "enum": ["article", "email", "rss", "highlight", "note", "pdf", "epub", "tweet", "video"]},
                        "updated_after": {"type": "string"},
                        "page_cursor": {"type": "string"},
                        "with_html_content": {"type": "boolean"}
                    }
                }),
            ),
            Self::SaveDocument => (
                "Save a URL (optionally with HTML content) to Readwise Reader.",
                json!({
                    "type": "object",
                    "properties": {
                        "url": {"type": "string"},
                        "html": {"type": "string"},
                        "should_clean_html": {"type": "boolean"},
                        "title": {"type": "string"},
                        "author": {"type": "string"},
                        "summary": {"type": "string"},
                        "published_date": {"type": "string"},
                        "image_url": {"type": "string"},
                        "location": {"type": "string", "enum": ["new", "later", "archive", "feed"]},
                        "category": {"type": "string"},
                        "tags": {"type": "array", "items": {"type": "string"}},
                        "notes": {"type": "string"}
                    },
                    "required": ["url"]
                }),
            ),
            Self::UpdateDocument => (
                "Update metadata or location of a Reader document.",
                json!({
                    "type": "object",
                    "properties": {
                        "id": {"type": "string"},
                        "title": {"type": "string"},
                        "author": {"type": "string"},
                        "summary": {"type": "string"},
                        "published_date": {"type": "string"},
                        "image_url": {"type": "string"},
                        "location": {"type": "string", "enum": ["new", "later", "archive", "feed"]},
                        "category": {"type": "string"}
                    },
                    "required": ["id"]
                }),
            ),
            Self::DeleteDocument => (
                "Delete a Reader document by id.",
                json!({
                    "type": "object",
                    "properties": {"id": {"type": "string"}},
                    "required": ["id"]
                }),
            ),
            Self::ListTags => (
                "List the tags used in Readwise Reader.",
                json!({
                    "type": "object",
                    "properties": {"page_cursor": {"type": "string"}}
                }),
            ),
        };

        ToolDescriptor {
            name: self.name().to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

/// The static catalog served by `tools/list`.
pub fn tool_catalog() -> Vec<ToolDescriptor> {
    ReadwiseTool::ALL
        .into_iter()
        .map(ReadwiseTool::descriptor)
        .collect()
}

#[derive(Debug, Deserialize)]
struct IdArgs<T> {
    id: T,
}

#[derive(Debug, Deserialize)]
struct UpdateHighlightArgs {
    id: i64,
    #[serde(flatten)]
    update: HighlightUpdate,
}

#[derive(Debug, Deserialize)]
struct UpdateDocumentArgs {
    id: String,
    #[serde(flatten)]
    update: DocumentUpdate,
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    book_id: Option<i64>,
    #[serde(default)]
    limit: Option<usize>,
}

const SEARCH_DEFAULT_LIMIT: usize = 20;
const SEARCH_MAX_LIMIT: usize = 100;
const SEARCH_PAGE_SIZE: u32 = 1000;

fn parse_args<T: DeserializeOwned>(tool: ReadwiseTool, args: Value) -> Result<T, ReadwiseError> {
    serde_json::from_value(args)
        .map_err(|e| ReadwiseError::Arguments(format!("{}: {e}", tool.name())))
}

/// [`ToolExecutor`] backed by the Readwise APIs.
#[derive(Debug, Clone)]
pub struct ReadwiseTools {
    client: ReadwiseClient,
}

impl ReadwiseTools {
    pub fn new(client: ReadwiseClient) -> Self {
        Self { client }
    }

    async fn run(&self, tool: ReadwiseTool, args: Value) -> Result<Value, ReadwiseError> {
        let c = &self.client;
        match tool {
            ReadwiseTool::ListHighlights => {
                c.list_highlights(&parse_args::<HighlightListQuery>(tool, args)?)
                    .await
            }
            ReadwiseTool::GetHighlight => {
                let a: IdArgs<i64> = parse_args(tool, args)?;
                c.get_highlight(a.id).await
            }
            ReadwiseTool::CreateHighlight => {
                let h: NewHighlight = parse_args(tool, args)?;
                if h.text.trim().is_empty() {
                    return Err(ReadwiseError::Arguments(
                        "readwise_create_highlight: text must not be empty".to_string(),
                    ));
                }
                c.create_highlights(std::slice::from_ref(&h)).await
            }
            ReadwiseTool::UpdateHighlight => {
                let a: UpdateHighlightArgs = parse_args(tool, args)?;
                if a.update.is_empty() {
                    return Err(ReadwiseError::Arguments(
                        "readwise_update_highlight: nothing to update".to_string(),
                    ));
                }
                c.update_highlight(a.id, &a.update).await
            }
            ReadwiseTool::DeleteHighlight => {
                let a: IdArgs<i64> = parse_args(tool, args)?;
                c.delete_highlight(a.id).await?;
                Ok(json!({ "deleted": true, "id": a.id }))
            }
            ReadwiseTool::SearchHighlights => self.search(parse_args(tool, args)?).await,
            ReadwiseTool::ListBooks => {
                c.list_books(&parse_args::<BookListQuery>(tool, args)?).await
            }
            ReadwiseTool::DailyReview => c.daily_review().await,
            ReadwiseTool::ExportHighlights => {
                c.export(&parse_args::<ExportQuery>(tool, args)?).await
            }
            ReadwiseTool::ListDocuments => {
                c.list_documents(&parse_args::<DocumentListQuery>(tool, args)?)
                    .await
            }
            ReadwiseTool::SaveDocument => {
                c.save_document(&parse_args::<SaveDocument>(tool, args)?)
                    .await
            }
            ReadwiseTool::UpdateDocument => {
                let a: UpdateDocumentArgs = parse_args(tool, args)?;
                c.update_document(&a.id, &a.update).await
            }
            ReadwiseTool::DeleteDocument => {
                let a: IdArgs<String> = parse_args(tool, args)?;
                c.delete_document(&a.id).await?;
                Ok(json!({ "deleted": true, "id": a.id }))
            }
            ReadwiseTool::ListTags => c.list_tags(&parse_args::<TagListQuery>(tool, args)?).await,
        }
    }

    async fn search(&self, args: SearchArgs) -> Result<Value, ReadwiseError> {
        let needle = args.query.trim().to_lowercase();
        if needle.is_empty() {
            return Err(ReadwiseError::Arguments(
                "readwise_search_highlights: query must not be empty".to_string(),
            ));
        }
        let limit = args
            .limit
            .unwrap_or(SEARCH_DEFAULT_LIMIT)
            .clamp(1, SEARCH_MAX_LIMIT);

        let page = self
            .client
            .list_highlights(&HighlightListQuery {
                page_size: Some(SEARCH_PAGE_SIZE),
                book_id: args.book_id,
                ..Default::default()
            })
            .await?;

        let results = filter_highlights(&page, &needle, limit);
        Ok(json!({
            "query": args.query,
            "count": results.len(),
            "results": results,
        }))
    }
}

fn filter_highlights(page: &Value, needle: &str, limit: usize) -> Vec<Value> {
    let field_matches = |h: &Value, key: &str| {
        h.get(key)
            .and_then(Value::as_str)
            .is_some_and(|s| s.to_lowercase().contains(needle))
    };
    page.get("results")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|h| field_matches(h, "text") || field_matches(h, "note"))
        .take(limit)
        .cloned()
        .collect()
}

#[async_trait]
impl ToolExecutor for ReadwiseTools {
    async fn execute(&self, name: &str, arguments: Value) -> anyhow::Result<Value> {
        let Some(tool) = ReadwiseTool::from_name(name) else {
            anyhow::bail!("unknown tool: {name}");
        };
        let out = self.run(tool, arguments).await?;
        Ok(serde_json::to_value(CallToolResult::json(&out))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::SocketAddr;

    use axum::Json;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;

    use crate::client::ReadwiseClientOptions;

    #[test]
    fn catalog_names_are_unique_and_resolvable() {
        let catalog = tool_catalog();
        assert_eq!(catalog.len(), ReadwiseTool::ALL.len());
        let mut names = catalog.iter().map(|t| t.name.clone()).collect::<Vec<_>>();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), catalog.len());
        for t in &catalog {
            assert!(ReadwiseTool::from_name(&t.name).is_some(), "name={}", t.name);
            assert_eq!(t.input_schema["type"], "object");
        }
    }

    #[test]
    fn search_filter_matches_text_and_note_case_insensitively() {
        let page = json!({"results": [
            {"id": 1, "text": "Rust ownership rules"},
            {"id": 2, "text": "unrelated", "note": "see RUST book"},
            {"id": 3, "text": "nothing here"},
            {"id": 4, "text": "more rust"}
        ]});
        let hits = filter_highlights(&page, "rust", 10);
        let ids = hits.iter().map(|h| h["id"].as_i64().unwrap()).collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2, 4]);

        assert_eq!(filter_highlights(&page, "rust", 2).len(), 2);
        assert!(filter_highlights(&json!({}), "rust", 2).is_empty());
    }

    async fn start_mock() -> anyhow::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
        let app = Router::new()
            .route(
                "/api/v2/highlights/",
                get(|| async {
                    Json(json!({"count": 2, "results": [
                        {"id": 1, "text": "Borrow checker"},
                        {"id": 2, "text": "Lifetimes", "note": "borrow again"}
                    ]}))
                }),
            )
            .route(
                "/api/v2/review/",
                get(|| async { (StatusCode::UNAUTHORIZED, "{\"detail\":\"bad token\"}") }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok((addr, handle))
    }

    fn tools_for(addr: SocketAddr) -> ReadwiseTools {
        let mut opts = ReadwiseClientOptions::new("tok");
        opts.base_url = format!("http://{addr}");
        ReadwiseTools::new(ReadwiseClient::new(opts).expect("client"))
    }

    #[tokio::test]
    async fn results_are_wrapped_as_text_content() -> anyhow::Result<()> {
        let (addr, handle) = start_mock().await?;
        let tools = tools_for(addr);

        let out = tools
            .execute("readwise_search_highlights", json!({"query": "BORROW"}))
            .await?;
        let text = out["content"][0]["text"].as_str().expect("text block");
        let parsed: Value = serde_json::from_str(text)?;
        assert_eq!(parsed["count"], 2);
        assert_eq!(out["content"][0]["type"], "text");

        handle.abort();
        Ok(())
    }

    #[tokio::test]
    async fn upstream_and_argument_failures_surface_as_errors() -> anyhow::Result<()> {
        let (addr, handle) = start_mock().await?;
        let tools = tools_for(addr);

        let err = tools
            .execute("readwise_daily_review", json!({}))
            .await
            .expect_err("401 upstream");
        assert!(err.to_string().contains("401"), "err={err}");

        let err = tools
            .execute("readwise_get_highlight", json!({"id": "not-a-number"}))
            .await
            .expect_err("bad args");
        assert!(err.to_string().contains("readwise_get_highlight"), "err={err}");

        let err = tools
            .execute("readwise_update_highlight", json!({"id": 3}))
            .await
            .expect_err("empty update");
        assert!(err.to_string().contains("nothing to update"), "err={err}");

        let err = tools
            .execute("no_such_tool", json!({}))
            .await
            .expect_err("unknown");
        assert_eq!(err.to_string(), "unknown tool: no_such_tool");

        handle.abort();
        Ok(())
    }
}
