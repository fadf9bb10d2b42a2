//! Domain blocklist with suffix matching.

use url::Url;

/// Pure predicate over URLs: http(s) scheme and a host that is neither a
/// blocked domain nor a subdomain of one.
#[derive(Debug, Clone, Default)]
pub struct UrlFilter {
    /// Lowercased blocked domains, leading dots stripped.
    blocked: Vec<String>,
}

impl UrlFilter {
    #[must_use]
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let blocked = domains
            .into_iter()
            .map(|d| d.as_ref().trim().trim_start_matches('.').to_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        Self { blocked }
    }

    /// Check a parsed URL.
    #[must_use]
    pub fn is_allowed(&self, url: &Url) -> bool {
        if !matches!(url.scheme(), "http" | "https") {
            return false;
        }

        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_lowercase();

        !self.blocked.iter().any(|blocked| {
            // Exact match or strict dot-boundary suffix: "youtube.com"
            // blocks "m.youtube.com" but not "notyoutube.com".
            host == *blocked
                || (host.len() > blocked.len()
                    && host.ends_with(blocked)
                    && host.as_bytes()[host.len() - blocked.len() - 1] == b'.')
        })
    }

    /// Check a raw string; parse failure means denied.
    #[must_use]
    pub fn is_allowed_str(&self, raw: &str) -> bool {
        match Url::parse(raw) {
            Ok(url) => self.is_allowed(&url),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(domains: &[&str]) -> UrlFilter {
        UrlFilter::new(domains.iter().copied())
    }

    #[test]
    fn allows_unlisted_hosts() {
        let f = filter(&["youtube.com"]);
        assert!(f.is_allowed_str("https://example.com/page"));
        assert!(f.is_allowed_str("http://docs.rs/tokio"));
    }

    #[test]
    fn blocks_exact_and_subdomains() {
        let f = filter(&["youtube.com"]);
        assert!(!f.is_allowed_str("https://youtube.com/watch?v=1"));
        assert!(!f.is_allowed_str("https://m.youtube.com/watch?v=1"));
        assert!(!f.is_allowed_str("https://www.m.youtube.com/x"));
    }

    #[test]
    fn suffix_match_requires_dot_boundary() {
        let f = filter(&["youtube.com"]);
        assert!(f.is_allowed_str("https://notyoutube.com/x"));
        assert!(f.is_allowed_str("https://myyoutube.com/x"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let f = filter(&["YouTube.com"]);
        assert!(!f.is_allowed_str("https://M.YOUTUBE.COM/x"));
    }

    #[test]
    fn rejects_non_http_schemes() {
        let f = filter(&[]);
        assert!(!f.is_allowed_str("ftp://example.com/file"));
        assert!(!f.is_allowed_str("file:///etc/passwd"));
        assert!(!f.is_allowed_str("javascript:alert(1)"));
    }

    #[test]
    fn rejects_unparseable_urls() {
        let f = filter(&[]);
        assert!(!f.is_allowed_str("not a url"));
        assert!(!f.is_allowed_str(""));
        assert!(!f.is_allowed_str("://missing-scheme"));
    }

    #[test]
    fn leading_dots_in_blocklist_are_normalized() {
        let f = filter(&[".youtube.com"]);
        assert!(!f.is_allowed_str("https://youtube.com/x"));
        assert!(!f.is_allowed_str("https://m.youtube.com/x"));
    }

    #[test]
    fn empty_blocklist_allows_everything_http() {
        let f = filter(&[]);
        assert!(f.is_allowed_str("https://anything.example/x"));
    }
}
