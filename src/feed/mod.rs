//! Feed decoding and the refresh pipeline.
//!
//! - [`parser`] turns RSS, Atom and JSON Feed documents into [`Entry`](crate::storage::Entry) values
//! - [`refresh`] fetches due feeds, runs their scripts, sanitizes and stores
//!   the entries, and records each outcome on the feed
//!
//! # Example
//!
//! ```ignore
//! use brook::feed::{Refresher, RefreshSettings};
//!
//! let refresher = Refresher::new(db, Sanitizer::default(), Arc::new(LuaSandbox::default()), RefreshSettings::default());
//! let results = refresher.refresh_batch(jobs, 16).await;
//! ```

pub mod parser;
pub mod refresh;

pub use parser::parse_feed;
pub use refresh::{
    FetchError, FetchResult, RefreshSettings, RefreshSummary, Refresher, DEFAULT_MAX_BODY_SIZE,
};
