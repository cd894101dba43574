//! Portal access: HTTP fetching, request pacing and page extraction.

pub mod extract;
pub mod http_client;
pub mod rate_limiter;

pub use extract::{ExtractError, Extraction, Extractor};
pub use http_client::{FetchError, FetchErrorKind, HttpClient, HttpResponse};
pub use rate_limiter::RateLimiter;
