//! Request shapes for the upstream APIs.
//!
//! Each struct deserializes from the snake_case tool arguments MCP clients
//! send, and serializes to whatever the upstream endpoint expects (the Reader
//! API uses camelCase query keys, the v2 API uses Django-style filters).

use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HighlightListQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book_id: Option<i64>,
    #[serde(
        rename(serialize = "updated__gt"),
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_after: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewHighlight {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlighted_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlight_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HighlightUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl HighlightUpdate {
    pub fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.note.is_none()
            && self.location.is_none()
            && self.url.is_none()
            && self.color.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookListQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(
        rename(serialize = "updated__gt"),
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_after: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportQuery {
    #[serde(
        rename(serialize = "updatedAfter"),
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_after: Option<String>,
    #[serde(
        serialize_with = "comma_separated",
        skip_serializing_if = "Option::is_none"
    )]
    pub ids: Option<Vec<i64>>,
    #[serde(
        rename(serialize = "pageCursor"),
        skip_serializing_if = "Option::is_none"
    )]
    pub page_cursor: Option<String>,
    #[serde(
        rename(serialize = "includeDeleted"),
        skip_serializing_if = "Option::is_none"
    )]
    pub include_deleted: Option<bool>,
}

fn comma_separated<S: Serializer>(ids: &Option<Vec<i64>>, s: S) -> Result<S::Ok, S::Error> {
    let joined = ids
        .iter()
        .flatten()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",");
    s.serialize_str(&joined)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentListQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(
        rename(serialize = "updatedAfter"),
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_after: Option<String>,
    #[serde(
        rename(serialize = "pageCursor"),
        skip_serializing_if = "Option::is_none"
    )]
    pub page_cursor: Option<String>,
    #[serde(
        rename(serialize = "withHtmlContent"),
        skip_serializing_if = "Option::is_none"
    )]
    pub with_html_content: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SaveDocument {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub should_clean_html: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagListQuery {
    #[serde(
        rename(serialize = "pageCursor"),
        skip_serializing_if = "Option::is_none"
    )]
    pub page_cursor: Option<String>,
}
