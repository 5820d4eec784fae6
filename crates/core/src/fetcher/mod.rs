//! Fetch backends: pluggable strategies that move the actual bytes.

mod http;
mod subprocess;
mod types;

pub use http::{HttpFetcherConfig, HttpStreamFetcher};
pub use subprocess::{SubprocessFetcher, SubprocessFetcherConfig};
pub use types::{
    BackendKind, FetchBackend, FetchError, FetchOutcome, FetchRequest, RawFetchEvent,
};
