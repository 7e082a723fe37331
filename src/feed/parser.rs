use anyhow::Result;
use feed_rs::parser;
use sha2::{Digest, Sha256};

use crate::storage::Entry;

/// Decode an RSS, Atom or JSON Feed document into entries.
///
/// Content is taken raw; sanitizing is the caller's job.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<Entry>> {
    let feed = parser::parse(bytes)?;

    let entries: Vec<Entry> = feed
        .entries
        .into_iter()
        .map(|entry| {
            let url = entry
                .links
                .iter()
                .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
                .or_else(|| entry.links.first())
                .map(|l| l.href.clone());
            let comments_url = entry
                .links
                .iter()
                .find(|l| l.rel.as_deref() == Some("replies"))
                .map(|l| l.href.clone());
            let published_at = entry.published.or(entry.updated).map(|dt| dt.timestamp());
            let content = entry
                .content
                .and_then(|c| c.body)
                .or_else(|| entry.summary.map(|s| s.content));
            let title = entry
                .title
                .map(|t| t.content)
                .unwrap_or_else(|| "Untitled".to_string());
            let author = entry
                .authors
                .into_iter()
                .map(|p| p.name)
                .find(|name| !name.trim().is_empty());

            let existing_id = if entry.id.is_empty() {
                None
            } else {
                Some(entry.id.as_str())
            };
            let hash = entry_hash(existing_id, url.as_deref(), &title, published_at);

            Entry {
                hash,
                title,
                url,
                comments_url,
                content,
                author,
                published_at,
            }
        })
        .collect();

    Ok(entries)
}

/// Stable SHA-256 key of an entry: its feed-provided id when there is one,
/// otherwise its link, title and date.
fn entry_hash(
    existing: Option<&str>,
    url: Option<&str>,
    title: &str,
    published: Option<i64>,
) -> String {
    let input = match existing.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => id.to_string(),
        None => format!(
            "{}|{}|{}",
            url.unwrap_or(""),
            title,
            published.map(|p| p.to_string()).unwrap_or_default()
        ),
    };
    format!("{:x}", Sha256::digest(input.as_bytes()))
}
