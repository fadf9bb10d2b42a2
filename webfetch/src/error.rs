//! Per-URL fetch failures.

use thiserror::Error;

/// Why a single URL could not be turned into a document.
///
/// These are absorbed by the orchestrator: the URL is dropped with a logged
/// cause and the run continues. `Clone` because in-flight deduplication
/// hands the same result to every attached caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The URL filter denies this URL.
    #[error("url disallowed by filter")]
    Filtered,

    /// robots.txt denies this URL for our user-agent.
    #[error("robots.txt denies this url")]
    RobotsDenied,

    /// The origin answered with a non-2xx status.
    #[error("http status {0}")]
    HttpStatus(u16),

    /// The fetch timeout elapsed.
    #[error("fetch timed out")]
    Timeout,

    /// Connection-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The page fetched fine but extraction produced nothing.
    #[error("no extractable content")]
    EmptyContent,

    /// The run was cancelled while this fetch was in flight.
    #[error("fetch cancelled")]
    Cancelled,
}
