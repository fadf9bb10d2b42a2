//! robots.txt fetching, parsing, and per-origin caching.
//!
//! One decision is computed per origin for the lifetime of the checker and
//! cached: either a parsed ruleset or allow-all. Unreachable or malformed
//! robots.txt fails open. Within a ruleset, the most specific user-agent
//! group wins (longest case-insensitive substring match, `*` as fallback);
//! within a group, the longest matching path-prefix rule wins and ties
//! resolve to allow.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use url::Url;

use dowse_types::origin_of;

/// Size cap on a robots.txt body (512 KiB). Anything past it is ignored.
const MAX_ROBOTS_BYTES: usize = 512 * 1024;

/// Per-origin cached decision.
#[derive(Debug, Clone)]
enum RobotsDecision {
    Parsed(Robots),
    AllowAll,
}

/// Fetches and evaluates robots.txt, one decision per origin.
///
/// The cache lives as long as the checker (process-wide in practice); it is
/// not scoped to a pipeline run.
#[derive(Debug)]
pub struct RobotsChecker {
    http: reqwest::Client,
    cache: RwLock<HashMap<String, RobotsDecision>>,
}

impl RobotsChecker {
    /// `timeout` bounds the one-off robots.txt request per origin.
    #[must_use]
    pub fn new(user_agent: &str, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .expect("build robots HTTP client");

        Self {
            http,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// May `user_agent` fetch `url`?
    pub async fn can_fetch(&self, user_agent: &str, url: &Url) -> bool {
        let origin = origin_of(url).to_string();

        {
            let cache = self.cache.read().await;
            if let Some(decision) = cache.get(&origin) {
                return evaluate(decision, url.path(), user_agent);
            }
        }

        let decision = self.resolve_origin(&origin).await;
        let allowed = evaluate(&decision, url.path(), user_agent);

        let mut cache = self.cache.write().await;
        cache.entry(origin).or_insert(decision);

        allowed
    }

    /// Fetch and parse robots.txt for an origin. Every failure mode is
    /// fail-open: the origin gets a cached allow-all decision.
    async fn resolve_origin(&self, origin: &str) -> RobotsDecision {
        let robots_url = format!("{origin}/robots.txt");

        let response = match self.http.get(&robots_url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(origin, error = %e, "robots.txt unreachable, failing open");
                return RobotsDecision::AllowAll;
            }
        };

        if !response.status().is_success() {
            tracing::debug!(origin, status = %response.status(), "no robots.txt, failing open");
            return RobotsDecision::AllowAll;
        }

        match response.text().await {
            Ok(mut body) => {
                if body.len() > MAX_ROBOTS_BYTES {
                    let mut end = MAX_ROBOTS_BYTES;
                    while !body.is_char_boundary(end) {
                        end -= 1;
                    }
                    body.truncate(end);
                }
                RobotsDecision::Parsed(parse(&body))
            }
            Err(e) => {
                tracing::debug!(origin, error = %e, "robots.txt body unreadable, failing open");
                RobotsDecision::AllowAll
            }
        }
    }
}

fn evaluate(decision: &RobotsDecision, path: &str, user_agent: &str) -> bool {
    match decision {
        RobotsDecision::Parsed(robots) => robots.is_allowed(path, user_agent),
        RobotsDecision::AllowAll => true,
    }
}

/// Parsed robots.txt file: lowercase user-agent token → rule group.
#[derive(Debug, Clone, Default)]
pub struct Robots {
    groups: HashMap<String, RobotsGroup>,
}

/// Allow/Disallow path-prefix rules for one user-agent group.
#[derive(Debug, Clone, Default)]
struct RobotsGroup {
    allow: Vec<String>,
    disallow: Vec<String>,
}

impl Robots {
    /// Evaluate a path for a user-agent. No matching group means allowed.
    #[must_use]
    pub fn is_allowed(&self, path: &str, user_agent: &str) -> bool {
        match self.find_group(user_agent) {
            Some(group) => group.is_allowed(path),
            None => true,
        }
    }

    /// Most specific matching group: longest case-insensitive substring
    /// match on the agent token; `*` only applies when nothing named
    /// matches.
    fn find_group(&self, user_agent: &str) -> Option<&RobotsGroup> {
        let ua_lower = user_agent.to_lowercase();

        let mut best: Option<(&str, &RobotsGroup)> = None;
        for (token, group) in &self.groups {
            if token == "*" {
                continue;
            }
            if ua_lower.contains(token.as_str())
                && best.is_none_or(|(best_token, _)| token.len() > best_token.len())
            {
                best = Some((token, group));
            }
        }

        if let Some((_, group)) = best {
            return Some(group);
        }

        self.groups.get("*")
    }
}

impl RobotsGroup {
    /// Longest matching rule wins; equal lengths resolve to allow. An empty
    /// Disallow value matches nothing (historical "allow all" form).
    fn is_allowed(&self, path: &str) -> bool {
        let longest_match = |rules: &[String]| {
            rules
                .iter()
                .filter(|rule| !rule.is_empty() && path.starts_with(rule.as_str()))
                .map(|rule| rule.len())
                .max()
        };

        let disallow = longest_match(&self.disallow);
        let allow = longest_match(&self.allow);

        match (allow, disallow) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(a), Some(d)) => a >= d,
        }
    }
}

/// Permissive line-level parse. Unknown directives (Sitemap, Crawl-delay,
/// ...) are ignored; inline `#` comments are stripped; a UTF-8 BOM is
/// tolerated.
#[must_use]
pub fn parse(content: &str) -> Robots {
    let content = content.strip_prefix('\u{FEFF}').unwrap_or(content);

    let mut robots = Robots::default();
    let mut current_agents: Vec<String> = Vec::new();
    let mut in_group = false;

    for line in content.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let Some((directive, value)) = line.split_once(':') else {
            continue;
        };
        let directive = directive.trim().to_lowercase();
        let value = value.trim();

        match directive.as_str() {
            "user-agent" => {
                if in_group {
                    current_agents.clear();
                    in_group = false;
                }
                current_agents.push(value.to_lowercase());
            }
            "allow" => {
                in_group = true;
                for agent in &current_agents {
                    robots
                        .groups
                        .entry(agent.clone())
                        .or_default()
                        .allow
                        .push(value.to_string());
                }
            }
            "disallow" => {
                in_group = true;
                for agent in &current_agents {
                    robots
                        .groups
                        .entry(agent.clone())
                        .or_default()
                        .disallow
                        .push(value.to_string());
                }
            }
            _ => {}
        }
    }

    robots
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn parse_basic() {
        let robots = parse("User-agent: *\nDisallow: /private/\nAllow: /public/");
        assert!(!robots.is_allowed("/private/page", "anybot"));
        assert!(robots.is_allowed("/public/page", "anybot"));
        assert!(robots.is_allowed("/other", "anybot"));
    }

    #[test]
    fn parse_tolerates_bom_and_comments() {
        let robots = parse("\u{FEFF}User-agent: * # note\nDisallow: /private/ # another");
        assert!(!robots.is_allowed("/private/page", "anybot"));
    }

    #[test]
    fn empty_disallow_allows_all() {
        let robots = parse("User-agent: *\nDisallow:");
        assert!(robots.is_allowed("/any/path", "anybot"));
    }

    #[test]
    fn longest_rule_wins() {
        let robots = parse("User-agent: *\nDisallow: /\nAllow: /public/");
        assert!(robots.is_allowed("/public/page", "anybot"));
        assert!(!robots.is_allowed("/secret", "anybot"));
    }

    #[test]
    fn ties_resolve_to_allow() {
        let robots = parse("User-agent: *\nDisallow: /path\nAllow: /path");
        assert!(robots.is_allowed("/path", "anybot"));
    }

    #[test]
    fn prefix_match_is_literal() {
        let robots = parse("User-agent: *\nDisallow: /admin/");
        assert!(!robots.is_allowed("/admin/page", "anybot"));
        assert!(robots.is_allowed("/admin", "anybot"));
        assert!(robots.is_allowed("/administrator", "anybot"));
    }

    #[test]
    fn ua_substring_match() {
        let robots = parse("User-agent: dowse\nDisallow: /dowse-only/\n\nUser-agent: *\nDisallow: /");
        // "dowse/0.1" contains "dowse"
        assert!(!robots.is_allowed("/dowse-only/page", "dowse/0.1"));
        assert!(robots.is_allowed("/other", "dowse/0.1"));
        // Unrelated agent falls back to * which disallows everything
        assert!(!robots.is_allowed("/other", "otherbot"));
    }

    #[test]
    fn most_specific_agent_wins() {
        let robots = parse("User-agent: dowse\nDisallow: /\n\nUser-agent: dowse-dev\nAllow: /");
        assert!(robots.is_allowed("/page", "dowse-dev/0.1"));
        assert!(!robots.is_allowed("/page", "dowse/0.1"));
    }

    #[test]
    fn shared_group_applies_to_stacked_agents() {
        let robots = parse("User-agent: abot\nUser-agent: bbot\nDisallow: /x/");
        assert!(!robots.is_allowed("/x/1", "abot"));
        assert!(!robots.is_allowed("/x/1", "bbot"));
        assert!(robots.is_allowed("/x/1", "cbot"));
    }

    #[tokio::test]
    async fn denies_from_fetched_rules() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /"))
            .mount(&server)
            .await;

        let checker = RobotsChecker::new("dowse-test/1.0", Duration::from_secs(2));
        let url = Url::parse(&format!("{}/page", server.uri())).unwrap();
        assert!(!checker.can_fetch("dowse-test", &url).await);
    }

    #[tokio::test]
    async fn missing_robots_fails_open() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let checker = RobotsChecker::new("dowse-test/1.0", Duration::from_secs(2));
        let url = Url::parse(&format!("{}/page", server.uri())).unwrap();
        assert!(checker.can_fetch("dowse-test", &url).await);
    }

    #[tokio::test]
    async fn unreachable_origin_fails_open() {
        let checker = RobotsChecker::new("dowse-test/1.0", Duration::from_millis(200));
        let url = Url::parse("http://127.0.0.1:1/page").unwrap();
        assert!(checker.can_fetch("dowse-test", &url).await);
    }

    #[tokio::test]
    async fn decision_is_fetched_once_per_origin() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private/"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let checker = RobotsChecker::new("dowse-test/1.0", Duration::from_secs(2));
        let allowed = Url::parse(&format!("{}/page", server.uri())).unwrap();
        let denied = Url::parse(&format!("{}/private/page", server.uri())).unwrap();

        assert!(checker.can_fetch("dowse-test", &allowed).await);
        assert!(!checker.can_fetch("dowse-test", &denied).await);
        assert!(checker.can_fetch("dowse-test", &allowed).await);
    }
}
