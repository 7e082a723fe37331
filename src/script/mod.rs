//! Per-feed entry rewriting scripts.
//!
//! A feed may carry a Lua script that sees the decoded entries as a global
//! `entries` array and may edit or delete them. Only the fields of
//! [`ScriptEntry`] are visible to scripts.

mod lua;

pub use lua::{LuaSandbox, ScriptLimits};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::Entry;

#[derive(Debug, Error)]
pub enum ScriptError {
    /// The interpreter could not be prepared
    #[error("Script setup failed: {0}")]
    Setup(String),
    /// The script raised an error or hit a resource limit
    #[error("Script failed: {0}")]
    Runtime(String),
    /// `entries` did not hold entry tables after the script ran
    #[error("Script produced invalid entries: {0}")]
    Output(String),
}

/// The part of an entry a script may read and change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptEntry {
    pub hash: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub comments_url: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}

impl From<&Entry> for ScriptEntry {
    fn from(entry: &Entry) -> Self {
        Self {
            hash: entry.hash.clone(),
            title: entry.title.clone(),
            url: entry.url.clone(),
            comments_url: entry.comments_url.clone(),
            content: entry.content.clone(),
            author: entry.author.clone(),
        }
    }
}

/// Runs an entry script in isolation.
///
/// Implementations must not give scripts access to the file system,
/// network, process or clock, and must bound their CPU and memory use.
pub trait EntryScript: Send + Sync {
    /// Run `script` over `entries` and return what the script left in place.
    /// The result may be shorter than the input and in any order.
    fn run(&self, script: &str, entries: Vec<ScriptEntry>) -> Result<Vec<ScriptEntry>, ScriptError>;
}

/// Apply `script` to `entries`.
///
/// Script output is joined back to the input by hash: entries keep their
/// original order and non-script fields, take the script's values for the
/// script-visible fields, and are dropped when their hash is missing from
/// the output. An empty script returns the entries unchanged.
pub fn rewrite_entries(
    sandbox: &dyn EntryScript,
    script: &str,
    entries: Vec<Entry>,
) -> Result<Vec<Entry>, ScriptError> {
    if script.trim().is_empty() || entries.is_empty() {
        return Ok(entries);
    }

    let projection: Vec<ScriptEntry> = entries.iter().map(ScriptEntry::from).collect();
    let mut rewritten: HashMap<String, ScriptEntry> = sandbox
        .run(script, projection)?
        .into_iter()
        .map(|entry| (entry.hash.clone(), entry))
        .collect();

    let before = entries.len();
    let result: Vec<Entry> = entries
        .into_iter()
        .filter_map(|mut entry| {
            let script_entry = rewritten.remove(&entry.hash)?;
            entry.title = script_entry.title;
            entry.url = script_entry.url;
            entry.comments_url = script_entry.comments_url;
            entry.content = script_entry.content;
            entry.author = script_entry.author;
            Some(entry)
        })
        .collect();

    if result.len() < before {
        tracing::debug!(
            removed = before - result.len(),
            kept = result.len(),
            "Entry script removed entries"
        );
    }

    Ok(result)
}
