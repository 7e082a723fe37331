use secrecy::SecretString;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process has locked the database
    #[error("Another instance of brook appears to be running. Please stop it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all surface as
/// one of these messages.
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Feeds
// ============================================================================

/// Per-feed fetch settings and scheduling state.
///
/// `password` is a [`SecretString`] so that `Debug` output and logs never
/// contain credentials.
#[derive(Debug)]
pub struct Feed {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub feed_url: String,
    pub site_url: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub user_agent: Option<String>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub cookie: Option<String>,
    pub proxy_url: Option<String>,
    pub use_proxy: bool,
    pub without_redirects: bool,
    pub disable_http2: bool,
    pub ignore_tls_errors: bool,
    pub disabled: bool,
    pub custom_script: Option<String>,
    pub checked_at: Option<i64>,
    pub next_check_at: i64,
    pub parsing_error_count: i64,
    pub parsing_error_msg: Option<String>,
    pub created_at: i64,
}

/// Raw row for [`Feed`]; the password column is wrapped after loading.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedDbRow {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub feed_url: String,
    pub site_url: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub user_agent: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub cookie: Option<String>,
    pub proxy_url: Option<String>,
    pub use_proxy: bool,
    pub without_redirects: bool,
    pub disable_http2: bool,
    pub ignore_tls_errors: bool,
    pub disabled: bool,
    pub custom_script: Option<String>,
    pub checked_at: Option<i64>,
    pub next_check_at: i64,
    pub parsing_error_count: i64,
    pub parsing_error_msg: Option<String>,
    pub created_at: i64,
}

impl FeedDbRow {
    pub(crate) fn into_feed(self) -> Feed {
        Feed {
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            feed_url: self.feed_url,
            site_url: self.site_url,
            etag: self.etag,
            last_modified: self.last_modified,
            user_agent: self.user_agent,
            username: self.username,
            password: self.password.map(SecretString::from),
            cookie: self.cookie,
            proxy_url: self.proxy_url,
            use_proxy: self.use_proxy,
            without_redirects: self.without_redirects,
            disable_http2: self.disable_http2,
            ignore_tls_errors: self.ignore_tls_errors,
            disabled: self.disabled,
            custom_script: self.custom_script,
            checked_at: self.checked_at,
            next_check_at: self.next_check_at,
            parsing_error_count: self.parsing_error_count,
            parsing_error_msg: self.parsing_error_msg,
            created_at: self.created_at,
        }
    }
}

/// A subscription to insert. Everything but the owner and URL is optional.
#[derive(Debug, Clone, Default)]
pub struct NewFeed {
    pub user_id: i64,
    pub title: String,
    pub feed_url: String,
    pub site_url: Option<String>,
    pub user_agent: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub cookie: Option<String>,
    pub proxy_url: Option<String>,
    pub use_proxy: bool,
    pub without_redirects: bool,
    pub disable_http2: bool,
    pub ignore_tls_errors: bool,
    pub custom_script: Option<String>,
}

/// What a successful fetch writes back to the feed row.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub next_check_at: i64,
}

// ============================================================================
// Entries
// ============================================================================

/// A decoded (and, once stored, sanitized) feed entry.
///
/// `hash` is stable across fetches of the same item and is the join key used
/// by entry scripts and the `UNIQUE(feed_id, hash)` constraint.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Entry {
    pub hash: String,
    pub title: String,
    pub url: Option<String>,
    pub comments_url: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<i64>,
}

// ============================================================================
// Refresh Jobs
// ============================================================================

/// One unit of "check this feed now" work.
///
/// The three statistics are only filled in for candidates of the
/// probabilistic scheduler; strict due-time batches leave them at zero.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshJob {
    pub feed_id: i64,
    pub user_id: i64,
    pub weekly_recent_entry_count: i64,
    pub hours_since_last_check: f64,
    pub feed_age_days: f64,
}

impl RefreshJob {
    pub fn new(feed_id: i64, user_id: i64) -> Self {
        Self {
            feed_id,
            user_id,
            weekly_recent_entry_count: 0,
            hours_since_last_check: 0.0,
            feed_age_days: 0.0,
        }
    }
}
