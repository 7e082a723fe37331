mod batch;
mod entries;
mod feeds;
mod schema;
mod types;

pub use batch::BatchBuilder;
pub use schema::Database;
pub use types::{DatabaseError, Entry, Feed, FetchOutcome, NewFeed, RefreshJob};
