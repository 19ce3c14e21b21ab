//! Robots.txt parser implementation
//!
//! Allow/disallow matching is delegated to the robotstxt crate; only the
//! `Crawl-delay` extension is parsed here.

use robotstxt::DefaultMatcher;
use std::time::Duration;

/// Parsed robots.txt data for one host
#[derive(Debug, Clone)]
pub struct ParsedRobots {
    /// Raw robots.txt content (empty string means allow all)
    content: String,
}

impl ParsedRobots {
    /// Wraps raw robots.txt content
    pub fn from_content(content: &str) -> Self {
        Self {
            content: content.to_string(),
        }
    }

    /// A permissive ParsedRobots that allows everything
    ///
    /// Used when a host has no robots.txt or it cannot be fetched.
    pub fn allow_all() -> Self {
        Self {
            content: String::new(),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Checks if a URL is allowed for the given user agent product token
    ///
    /// `url` is a full URL (`https://example.com/page?x=1`).
    pub fn is_allowed(&self, url: &str, agent: &str) -> bool {
        if self.content.is_empty() {
            return true;
        }

        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, agent, url)
    }

    /// Returns the Crawl-delay that applies to `agent`
    ///
    /// A group naming the agent wins over the `*` group. Consecutive
    /// `User-agent` lines share one group.
    pub fn crawl_delay(&self, agent: &str) -> Option<Duration> {
        let agent = agent.to_ascii_lowercase();

        let mut group: Vec<String> = Vec::new();
        let mut group_open = false;
        let mut specific = None;
        let mut wildcard = None;

        for line in self.content.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_ascii_lowercase();
            let value = value.trim();

            if directive == "user-agent" {
                if !group_open {
                    group.clear();
                    group_open = true;
                }
                group.push(value.to_ascii_lowercase());
                continue;
            }
            group_open = false;

            if directive != "crawl-delay" {
                continue;
            }
            let Some(delay) = value
                .parse::<f64>()
                .ok()
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
            else {
                continue;
            };

            if group.iter().any(|ua| ua == &agent) {
                specific = Some(delay);
            } else if group.iter().any(|ua| ua == "*") {
                wildcard = Some(delay);
            }
        }

        specific.or(wildcard).map(Duration::from_secs_f64)
    }
}
