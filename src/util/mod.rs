//! URL validation for user-supplied feed addresses.
//!
//! ```
//! use brook::util::validate_url;
//!
//! let url = validate_url("https://example.com/feed.xml").unwrap();
//! assert_eq!(url.host_str(), Some("example.com"));
//! ```

mod url_validator;

pub use url_validator::{validate_url, UrlValidationError};
