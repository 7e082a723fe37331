//! brook: a feed polling daemon.
//!
//! Decides which feeds to check each cycle, fetches them with per-feed
//! network policy, runs optional entry scripts, and sanitizes entry HTML
//! before it is stored.

pub mod config;
pub mod feed;
pub mod fetcher;
pub mod sanitizer;
pub mod scheduler;
pub mod script;
pub mod storage;
pub mod util;
