//! Concurrency-bounded, per-origin-paced page fetcher.
//!
//! A fetch runs the gate sequence in a fixed order: URL filter, content
//! cache (a hit skips robots and the network entirely), robots.txt, the
//! global concurrency semaphore, the per-origin minimum-spacing clock, and
//! finally the GET with bounded manual redirects. Extracted text is written
//! back to the cache on the way out, and every gate is released on every
//! exit path.
//!
//! Concurrent fetches of the same canonical URL are deduplicated: later
//! callers attach to the in-flight future instead of starting a second
//! network fetch.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::Shared;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use tokio::sync::Semaphore;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use url::Url;

use dowse_types::{DocSource, FetchedDoc, canonicalize, origin_of};

use crate::cache::ContentCache;
use crate::error::FetchError;
use crate::extract;
use crate::filter::UrlFilter;
use crate::robots::RobotsChecker;

type SharedFetch = Shared<Pin<Box<dyn Future<Output = Result<FetchedDoc, FetchError>> + Send>>>;

/// Knobs for the fetcher, resolved from configuration.
#[derive(Debug, Clone)]
pub struct FetcherSettings {
    pub user_agent: String,
    /// Global fetch concurrency (the semaphore size).
    pub max_concurrent_fetches: usize,
    /// Minimum spacing between fetch starts against one origin.
    pub per_origin_delay: Duration,
    /// Total timeout across the whole redirect chain and body read.
    pub timeout: Duration,
    pub max_redirects: u32,
    /// Extraction truncation cap, in characters.
    pub max_content_chars: usize,
}

/// The fetcher. Owns the politeness state shared by all fetches: the global
/// semaphore, the per-origin clock map, and the in-flight registry.
pub struct Fetcher {
    settings: FetcherSettings,
    filter: UrlFilter,
    robots: RobotsChecker,
    cache: ContentCache,
    http: reqwest::Client,
    semaphore: Arc<Semaphore>,
    origin_clocks: Mutex<HashMap<String, Instant>>,
    in_flight: Mutex<HashMap<String, SharedFetch>>,
}

impl Fetcher {
    #[must_use]
    pub fn new(
        settings: FetcherSettings,
        filter: UrlFilter,
        robots: RobotsChecker,
        cache: ContentCache,
    ) -> Arc<Self> {
        let http = reqwest::Client::builder()
            .user_agent(&settings.user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(10).min(settings.timeout))
            .build()
            .expect("build fetch HTTP client");

        let semaphore = Arc::new(Semaphore::new(settings.max_concurrent_fetches.max(1)));

        Arc::new(Self {
            settings,
            filter,
            robots,
            cache,
            http,
            semaphore,
            origin_clocks: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    /// Fetch one URL through the full gate sequence.
    ///
    /// If a fetch for the same canonical URL is already in flight, this
    /// attaches to it and returns the same result.
    pub async fn fetch(
        self: &Arc<Self>,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<FetchedDoc, FetchError> {
        let canonical = canonicalize(url);
        let key = canonical.to_string();

        let (fut, owner) = {
            let mut in_flight = self.in_flight.lock().expect("in-flight registry poisoned");
            if let Some(existing) = in_flight.get(&key) {
                (existing.clone(), false)
            } else {
                let fut: SharedFetch = Arc::clone(self)
                    .run(canonical, key.clone(), cancel.clone())
                    .boxed()
                    .shared();
                in_flight.insert(key.clone(), fut.clone());
                (fut, true)
            }
        };

        let result = fut.clone().await;

        if owner {
            let mut in_flight = self.in_flight.lock().expect("in-flight registry poisoned");
            if in_flight.get(&key).is_some_and(|f| f.ptr_eq(&fut)) {
                in_flight.remove(&key);
            }
        }

        result
    }

    async fn run(
        self: Arc<Self>,
        url: Url,
        canonical: String,
        cancel: CancellationToken,
    ) -> Result<FetchedDoc, FetchError> {
        if !self.filter.is_allowed(&url) {
            return Err(FetchError::Filtered);
        }

        if let Some(text) = self.cache.get(&canonical) {
            tracing::debug!(url = %canonical, "content cache hit");
            return Ok(FetchedDoc {
                url: canonical,
                status: 200,
                byte_length: text.len(),
                content_text: text,
                source: DocSource::Cache,
            });
        }

        let allowed = tokio::select! {
            () = cancel.cancelled() => return Err(FetchError::Cancelled),
            allowed = self.robots.can_fetch(&self.settings.user_agent, &url) => allowed,
        };
        if !allowed {
            return Err(FetchError::RobotsDenied);
        }

        let _permit = tokio::select! {
            () = cancel.cancelled() => return Err(FetchError::Cancelled),
            permit = Arc::clone(&self.semaphore).acquire_owned() => {
                permit.map_err(|_| FetchError::Cancelled)?
            }
        };

        self.wait_for_origin_turn(&url, &cancel).await?;

        let (status, raw, is_html) = self.get_with_redirects(&url, &cancel).await?;

        let text = if is_html {
            extract::extract_text(&raw)
        } else {
            raw.trim().to_string()
        };
        let text = extract::truncate_chars(text, self.settings.max_content_chars);

        if text.trim().is_empty() {
            return Err(FetchError::EmptyContent);
        }

        self.cache.put(&canonical, &text);

        Ok(FetchedDoc {
            url: canonical,
            status,
            byte_length: text.len(),
            content_text: text,
            source: DocSource::Network,
        })
    }

    /// Reserve the next start slot for this URL's origin and wait for it.
    ///
    /// Slots are reserved under the lock, so successive fetches against one
    /// origin start at least `per_origin_delay` apart even when many tasks
    /// contend.
    async fn wait_for_origin_turn(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<(), FetchError> {
        let delay = self.settings.per_origin_delay;
        if delay.is_zero() {
            return Ok(());
        }

        let origin = origin_of(url).to_string();
        let slot = {
            let mut clocks = self.origin_clocks.lock().expect("origin clock map poisoned");
            let now = Instant::now();
            let slot = clocks.get(&origin).map_or(now, |last| (*last + delay).max(now));
            clocks.insert(origin, slot);
            slot
        };

        if slot > Instant::now() {
            tokio::select! {
                () = cancel.cancelled() => return Err(FetchError::Cancelled),
                () = sleep_until(slot) => {}
            }
        }
        Ok(())
    }

    /// GET with manual redirect handling. Each hop re-checks the URL filter
    /// and robots.txt; the whole chain shares one deadline.
    async fn get_with_redirects(
        &self,
        start: &Url,
        cancel: &CancellationToken,
    ) -> Result<(u16, String, bool), FetchError> {
        let deadline = Instant::now() + self.settings.timeout;
        let mut current = start.clone();

        for _ in 0..=self.settings.max_redirects {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(FetchError::Timeout);
            }

            let request = self
                .http
                .get(current.clone())
                .header(ACCEPT, "text/html,application/xhtml+xml,text/plain;q=0.9,*/*;q=0.1");

            let response = tokio::select! {
                () = cancel.cancelled() => return Err(FetchError::Cancelled),
                result = timeout(remaining, request.send()) => match result {
                    Err(_) => return Err(FetchError::Timeout),
                    Ok(Err(e)) if e.is_timeout() => return Err(FetchError::Timeout),
                    Ok(Err(e)) => return Err(FetchError::Transport(e.to_string())),
                    Ok(Ok(response)) => response,
                },
            };

            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("");
                if location.is_empty() {
                    return Err(FetchError::Transport("redirect without Location".to_string()));
                }

                let next = current.join(location).map_err(|_| {
                    FetchError::Transport(format!("unresolvable redirect target: {location}"))
                })?;

                if !self.filter.is_allowed(&next) {
                    return Err(FetchError::Filtered);
                }
                let allowed = tokio::select! {
                    () = cancel.cancelled() => return Err(FetchError::Cancelled),
                    allowed = self.robots.can_fetch(&self.settings.user_agent, &next) => allowed,
                };
                if !allowed {
                    return Err(FetchError::RobotsDenied);
                }

                tracing::debug!(from = %current, to = %next, "following redirect");
                current = next;
                continue;
            }

            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(FetchError::Timeout);
            }
            let bytes = tokio::select! {
                () = cancel.cancelled() => return Err(FetchError::Cancelled),
                result = timeout(remaining, response.bytes()) => match result {
                    Err(_) => return Err(FetchError::Timeout),
                    Ok(Err(e)) if e.is_timeout() => return Err(FetchError::Timeout),
                    Ok(Err(e)) => return Err(FetchError::Transport(e.to_string())),
                    Ok(Ok(bytes)) => bytes,
                },
            };

            let (text, is_html) = decode_body(&bytes, content_type.as_deref());
            return Ok((status.as_u16(), text, is_html));
        }

        Err(FetchError::Transport("redirect limit exceeded".to_string()))
    }
}

/// Decode a response body per its Content-Type charset (UTF-8 fallback) and
/// decide whether it is HTML.
fn decode_body(bytes: &[u8], content_type: Option<&str>) -> (String, bool) {
    let (media_type, charset) = parse_content_type(content_type);

    let text = match charset.as_deref() {
        // Single-byte charsets decode byte-for-byte; everything else is
        // treated as UTF-8 with replacement.
        Some("iso-8859-1" | "windows-1252") => bytes.iter().map(|&b| b as char).collect(),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    };

    let is_html = match media_type.as_deref() {
        Some("text/html" | "application/xhtml+xml") => true,
        Some(mt) if mt.starts_with("text/") => false,
        _ => extract::looks_like_html(&text),
    };

    (text, is_html)
}

/// Split a Content-Type header into (lowercased media type, normalized
/// charset).
fn parse_content_type(header: Option<&str>) -> (Option<String>, Option<String>) {
    let Some(header) = header else {
        return (None, None);
    };

    let mut parts = header.split(';');
    let media_type = parts.next().unwrap_or("").trim();
    let media_type = if media_type.is_empty() {
        None
    } else {
        Some(media_type.to_ascii_lowercase())
    };

    let mut charset = None;
    for part in parts {
        if let Some((key, value)) = part.trim().split_once('=')
            && key.trim().eq_ignore_ascii_case("charset")
        {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            charset = normalize_charset(value);
        }
    }

    (media_type, charset)
}

fn normalize_charset(charset: &str) -> Option<String> {
    match charset.to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" | "utf_8" => Some("utf-8".to_string()),
        "iso-8859-1" | "latin1" | "latin-1" => Some("iso-8859-1".to_string()),
        "windows-1252" | "cp1252" => Some("windows-1252".to_string()),
        _ => None,
    }
}
