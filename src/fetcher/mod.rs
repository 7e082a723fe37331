//! Outbound HTTP for feed fetching.
//!
//! [`RequestBuilder`] collects headers and transport policy for one request.
//! [`ClientCache`] hands out one shared `reqwest::Client` per distinct
//! transport policy so connection pools are reused across feeds.

mod client_cache;
mod request_builder;

pub use client_cache::{ClientCache, ClientConfig, DEFAULT_TIMEOUT_SECS};
pub use request_builder::{RequestBuilder, DEFAULT_ACCEPT_HEADER};
