use serde::{Deserialize, Serialize};

use crate::domain::{ContentItem, ContentKind, SortKey};

/// Which side of a page a continuation request extends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

/// One cursor-paginated slice of a list plus its more-available flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<crate::domain::ItemId>,
    pub has_more_up: bool,
    pub has_more_down: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            cursor: None,
            has_more_up: false,
            has_more_down: false,
        }
    }

    pub fn has_more(&self, direction: Direction) -> bool {
        match direction {
            Direction::Up => self.has_more_up,
            Direction::Down => self.has_more_down,
        }
    }

    pub fn set_has_more(&mut self, direction: Direction, value: bool) {
        match direction {
            Direction::Up => self.has_more_up = value,
            Direction::Down => self.has_more_down = value,
        }
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// Query string of a paginated read.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relative_id: Option<String>,
    pub up: bool,
    pub limit: u32,
    pub sort: SortKey,
}

impl PageQuery {
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(4);
        if let Some(relative_id) = &self.relative_id {
            pairs.push(("relativeId", relative_id.clone()));
        }
        pairs.push(("up", self.up.to_string()));
        pairs.push(("limit", self.limit.to_string()));
        pairs.push(("sort", self.sort.as_str().to_string()));
        pairs
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse {
    pub items: Vec<ContentItem>,
    /// Whether more items exist past this page in the requested direction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_more: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateContentRequest {
    pub kind: ContentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<i64>,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToggleRequest {
    pub value: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendCodeRequest {
    pub phone: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_query_uses_camel_case_cursor() {
        let query = PageQuery {
            relative_id: Some("42".to_string()),
            up: true,
            limit: 20,
            sort: SortKey::New,
        };
        let value = serde_json::to_value(&query).expect("encode");
        assert_eq!(value["relativeId"], "42");
        assert_eq!(value["sort"], "new");
    }

    #[test]
    fn page_response_has_more_is_optional() {
        let response: PageResponse =
            serde_json::from_str(r#"{"items":[]}"#).expect("decode");
        assert!(response.has_more.is_none());
    }
}
