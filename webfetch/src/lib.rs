//! Polite URL fetching for LLM consumption.
//!
//! The pieces, leaf-first: a domain blocklist ([`UrlFilter`]), a fail-open
//! robots.txt checker ([`RobotsChecker`]), a content-addressed disk cache
//! ([`ContentCache`]), an HTML text extractor, and the [`Fetcher`] that
//! sequences them under a global concurrency bound and per-origin pacing.

mod cache;
mod error;
pub mod extract;
mod fetcher;
mod filter;
mod robots;

pub use cache::{ContentCache, cache_key};
pub use error::FetchError;
pub use fetcher::{Fetcher, FetcherSettings};
pub use filter::UrlFilter;
pub use robots::RobotsChecker;
