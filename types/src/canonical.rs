//! URL canonicalization and origin computation.
//!
//! Canonical form: scheme and host lowercased (the `url` crate guarantees
//! both at parse time), default ports dropped, fragment stripped, query
//! parameters sorted by key then value. Canonicalization is idempotent:
//! `canonicalize(canonicalize(u)) == canonicalize(u)`.

use url::Url;

/// An origin key: `scheme://host` with the port appended only when
/// non-default. Robots rules, per-origin pacing, and connection pooling are
/// all scoped to this.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin(String);

impl Origin {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonicalize a URL in place-style: returns a new `Url` with the fragment
/// removed and query pairs sorted.
#[must_use]
pub fn canonicalize(url: &Url) -> Url {
    let mut out = url.clone();
    out.set_fragment(None);

    let mut pairs: Vec<(String, String)> = out
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if pairs.is_empty() {
        // Normalize "?" with no parameters away entirely.
        out.set_query(None);
        return out;
    }

    pairs.sort();
    let mut sorted = out.clone();
    sorted.query_pairs_mut().clear().extend_pairs(pairs);
    sorted
}

/// The canonical string form of a URL, used as dedup and cache key.
#[must_use]
pub fn canonical_key(url: &Url) -> String {
    canonicalize(url).to_string()
}

/// Compute the origin of a URL. Standard ports (80/443) are omitted.
#[must_use]
pub fn origin_of(url: &Url) -> Origin {
    let scheme = url.scheme();
    let host = url.host_str().unwrap_or("");
    let default_port = if scheme == "https" { 443 } else { 80 };
    let port = url.port_or_known_default().unwrap_or(default_port);

    if port == default_port {
        Origin(format!("{scheme}://{host}"))
    } else {
        Origin(format!("{scheme}://{host}:{port}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_strips_fragment() {
        let url = Url::parse("https://example.com/page#section").unwrap();
        assert_eq!(canonical_key(&url), "https://example.com/page");
    }

    #[test]
    fn canonicalize_sorts_query_pairs() {
        let url = Url::parse("https://example.com/p?b=2&a=1&b=1").unwrap();
        assert_eq!(canonical_key(&url), "https://example.com/p?a=1&b=1&b=2");
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let urls = [
            "https://Example.COM:443/Path?z=1&a=2#frag",
            "http://example.com:80/",
            "https://example.com/p?b=2&a=1",
            "https://example.com/plain",
        ];
        for raw in urls {
            let once = canonicalize(&Url::parse(raw).unwrap());
            let twice = canonicalize(&once);
            assert_eq!(once, twice, "not idempotent for {raw}");
        }
    }

    #[test]
    fn canonicalize_lowercases_host_and_drops_default_port() {
        let url = Url::parse("HTTPS://Example.COM:443/x").unwrap();
        assert_eq!(canonical_key(&url), "https://example.com/x");
    }

    #[test]
    fn canonicalize_drops_empty_query() {
        let url = Url::parse("https://example.com/x?").unwrap();
        assert_eq!(canonical_key(&url), "https://example.com/x");
    }

    #[test]
    fn origin_omits_standard_ports() {
        let url = Url::parse("https://example.com/path/page").unwrap();
        assert_eq!(origin_of(&url).as_str(), "https://example.com");

        let url = Url::parse("http://example.com:8080/path").unwrap();
        assert_eq!(origin_of(&url).as_str(), "http://example.com:8080");

        let url = Url::parse("https://example.com:443/path").unwrap();
        assert_eq!(origin_of(&url).as_str(), "https://example.com");
    }

    #[test]
    fn origins_distinguish_scheme_and_port() {
        let a = origin_of(&Url::parse("http://h.test/a").unwrap());
        let b = origin_of(&Url::parse("https://h.test/a").unwrap());
        let c = origin_of(&Url::parse("http://h.test:8080/a").unwrap());
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
