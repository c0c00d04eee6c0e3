use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Placeholder author used when the feed does not report one.
pub const UNKNOWN_AUTHOR: &str = "unknown";

/// Number of characters of item text kept in a lead record.
pub const LEAD_TEXT_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    #[serde(rename = "submission")]
    Post,
    #[serde(rename = "comment")]
    Comment,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Post => "submission",
            ItemKind::Comment => "comment",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A post or comment received from the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: String,
    pub kind: ItemKind,
    pub origin: String,
    pub author: Option<String>,
    pub title: Option<String>,
    pub body: String,
}

impl Item {
    pub fn post(
        id: impl Into<String>,
        origin: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: ItemKind::Post,
            origin: origin.into(),
            author: None,
            title: Some(title.into()),
            body: body.into(),
        }
    }

    pub fn comment(id: impl Into<String>, origin: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ItemKind::Comment,
            origin: origin.into(),
            author: None,
            title: None,
            body: body.into(),
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Title and body for posts, body for comments.
    pub fn text(&self) -> String {
        match (&self.kind, &self.title) {
            (ItemKind::Post, Some(title)) if self.body.is_empty() => title.clone(),
            (ItemKind::Post, Some(title)) => format!("{} {}", title, self.body),
            _ => self.body.clone(),
        }
    }

    pub fn author_or_unknown(&self) -> &str {
        match self.author.as_deref() {
            Some(author) if !author.is_empty() => author,
            _ => UNKNOWN_AUTHOR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Creation,
    Minting,
    None,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Creation => "creation",
            Intent::Minting => "minting",
            Intent::None => "none",
        }
    }

    pub fn is_actionable(&self) -> bool {
        !matches!(self, Intent::None)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the lead log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub id: String,
    pub author: String,
    #[serde(rename = "subreddit")]
    pub origin: String,
    pub intent: Intent,
    pub text: String,
}

impl LeadRecord {
    pub fn from_item(item: &Item, intent: Intent, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            kind: item.kind,
            id: item.id.clone(),
            author: item.author_or_unknown().to_string(),
            origin: item.origin.clone(),
            intent,
            text: truncate_chars(&item.text(), LEAD_TEXT_LIMIT),
        }
    }
}

pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((byte_index, _)) => text[..byte_index].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_text_joins_title_and_body() {
        let post = Item::post("abc", "NFTart", "Need art", "for my collection");
        assert_eq!(post.text(), "Need art for my collection");

        let title_only = Item::post("abc", "NFTart", "Need art", "");
        assert_eq!(title_only.text(), "Need art");
    }

    #[test]
    fn test_comment_text_is_body() {
        let comment = Item::comment("c1", "nft", "looking to mint");
        assert_eq!(comment.text(), "looking to mint");
    }

    #[test]
    fn test_author_sentinel() {
        let comment = Item::comment("c1", "nft", "hi");
        assert_eq!(comment.author_or_unknown(), UNKNOWN_AUTHOR);

        let comment = comment.with_author("");
        assert_eq!(comment.author_or_unknown(), UNKNOWN_AUTHOR);

        let comment = Item::comment("c1", "nft", "hi").with_author("alice");
        assert_eq!(comment.author_or_unknown(), "alice");
    }

    #[test]
    fn test_lead_record_truncates_by_characters() {
        let body = "é".repeat(250);
        let comment = Item::comment("c1", "NFT", body);
        let record = LeadRecord::from_item(&comment, Intent::Creation, Utc::now());

        assert_eq!(record.text.chars().count(), LEAD_TEXT_LIMIT);
        assert_eq!(record.author, UNKNOWN_AUTHOR);
        assert_eq!(record.origin, "NFT");
        assert_eq!(record.kind, ItemKind::Comment);
    }

    #[test]
    fn test_truncate_short_text_unchanged() {
        assert_eq!(truncate_chars("short", 200), "short");
        assert_eq!(truncate_chars("", 200), "");
    }
}
