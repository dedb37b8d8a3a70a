//! Typed async client surface for the Tributary backend.
//!
//! `FeedApi` is the trait seam the graph and pipeline crates program
//! against; `HttpFeedApi` is the reqwest-backed implementation that walks
//! paged collections and maps transport failures into the shared error
//! taxonomy. Retry and timeout policy belong to the transport configuration,
//! not to this crate.

pub mod api;
pub mod http;

pub use api::{FeedApi, Page};
pub use http::HttpFeedApi;
