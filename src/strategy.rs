//! Strategy table and resolver
//!
//! Maps request URLs to a cache policy, a target store and a max-age. Entries are
//! tried in declaration order and the first match wins, so overlapping patterns
//! are settled by position rather than specificity.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::net::Request;

const DAY: u64 = 24 * 60 * 60;

/// How a matched request is served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Policy {
    /// Serve from cache while fresh; network otherwise, cache as fallback
    CacheFirst,
    /// Always prefer the network; cache as fallback
    NetworkFirst,
}

/// One row of the strategy table as written in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyRule {
    pub pattern: String,
    pub policy: Policy,
    pub store: String,
    pub max_age_secs: u64,
}

impl StrategyRule {
    fn new(pattern: &str, policy: Policy, store: &str, max_age_secs: u64) -> Self {
        Self {
            pattern: pattern.to_string(),
            policy,
            store: store.to_string(),
            max_age_secs,
        }
    }
}

/// The built-in table for the blog this worker fronts
pub fn default_rules() -> Vec<StrategyRule> {
    vec![
        StrategyRule::new(
            r"cdn\.jsdelivr\.net|unpkg\.com|cdnjs\.cloudflare\.com",
            Policy::CacheFirst,
            "cdn-cache",
            7 * DAY,
        ),
        StrategyRule::new(
            r"fonts\.(googleapis|gstatic)\.com|\.(woff2?|ttf|otf|eot)$",
            Policy::CacheFirst,
            "fonts-cache",
            365 * DAY,
        ),
        StrategyRule::new(
            r"\.(png|jpe?g|gif|webp|avif|svg|ico)$",
            Policy::CacheFirst,
            "images-cache",
            30 * DAY,
        ),
        StrategyRule::new(r"waline", Policy::NetworkFirst, "waline-cache", DAY),
        StrategyRule::new(r"/api/", Policy::NetworkFirst, "api-cache", 5 * 60),
    ]
}

/// A compiled strategy table row
#[derive(Debug, Clone)]
pub struct StrategyEntry {
    pattern: Regex,
    pub policy: Policy,
    pub store: String,
    pub max_age: Duration,
}

impl StrategyEntry {
    pub fn new(pattern: &str, policy: Policy, store: &str, max_age: Duration) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            policy,
            store: store.to_string(),
            max_age,
        })
    }

    pub fn from_rule(rule: &StrategyRule) -> Result<Self, regex::Error> {
        Self::new(
            &rule.pattern,
            rule.policy,
            &rule.store,
            Duration::from_secs(rule.max_age_secs),
        )
    }

    /// Test against both the full URL and its path
    pub fn matches(&self, url: &Url) -> bool {
        self.pattern.is_match(url.as_str()) || self.pattern.is_match(url.path())
    }
}

/// Ordered, immutable strategy table
#[derive(Debug, Clone, Default)]
pub struct StrategyTable {
    entries: Vec<StrategyEntry>,
}

impl StrategyTable {
    pub fn new(entries: Vec<StrategyEntry>) -> Self {
        Self { entries }
    }

    pub fn from_rules(rules: &[StrategyRule]) -> Result<Self, regex::Error> {
        let entries = rules
            .iter()
            .map(StrategyEntry::from_rule)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(entries))
    }

    /// Pick the first entry matching the request, if it is eligible at all
    pub fn resolve(&self, request: &Request) -> Option<&StrategyEntry> {
        if !request.is_interceptable() {
            return None;
        }
        self.entries.iter().find(|entry| entry.matches(&request.url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;

    fn table() -> StrategyTable {
        StrategyTable::from_rules(&default_rules()).unwrap()
    }

    fn store_for(url: &str) -> Option<String> {
        let request = Request::get(url.parse().unwrap());
        table().resolve(&request).map(|e| e.store.clone())
    }

    #[test]
    fn test_default_table_classification() {
        assert_eq!(store_for("https://cdn.jsdelivr.net/npm/katex/katex.min.js").as_deref(), Some("cdn-cache"));
        assert_eq!(store_for("https://fonts.gstatic.com/s/roboto.woff2").as_deref(), Some("fonts-cache"));
        assert_eq!(store_for("https://blog.example.com/fonts/icons.ttf").as_deref(), Some("fonts-cache"));
        assert_eq!(store_for("https://blog.example.com/img/cover.webp").as_deref(), Some("images-cache"));
        assert_eq!(store_for("https://waline.example.com/comment?path=/").as_deref(), Some("waline-cache"));
        assert_eq!(store_for("https://blog.example.com/api/stats").as_deref(), Some("api-cache"));
        assert_eq!(store_for("https://blog.example.com/archives/"), None);
    }

    #[test]
    fn test_first_match_wins_over_specificity() {
        // An image served from a CDN matches both the cdn and image rows
        assert_eq!(store_for("https://cdn.jsdelivr.net/gh/u/r/cover.png").as_deref(), Some("cdn-cache"));

        let table = StrategyTable::new(vec![
            StrategyEntry::new(r"/", Policy::NetworkFirst, "broad", Duration::from_secs(1)).unwrap(),
            StrategyEntry::new(r"/api/v1/", Policy::CacheFirst, "narrow", Duration::from_secs(1)).unwrap(),
        ]);
        let request = Request::get("https://blog.example.com/api/v1/x".parse().unwrap());
        assert_eq!(table.resolve(&request).unwrap().store, "broad");
    }

    #[test]
    fn test_path_only_pattern_matches() {
        let table = StrategyTable::new(vec![
            StrategyEntry::new(r"^/static/", Policy::CacheFirst, "static", Duration::from_secs(60)).unwrap(),
        ]);
        let request = Request::get("https://blog.example.com/static/app.js".parse().unwrap());
        assert!(table.resolve(&request).is_some());
    }

    #[test]
    fn test_ineligible_requests_never_resolve() {
        let post = Request::new(Method::POST, "https://blog.example.com/api/stats".parse().unwrap());
        assert!(table().resolve(&post).is_none());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let rules = vec![StrategyRule::new("(unclosed", Policy::CacheFirst, "x", 1)];
        assert!(StrategyTable::from_rules(&rules).is_err());
    }

    #[test]
    fn test_policy_names() {
        let rule: StrategyRule = serde_json::from_str(
            r#"{"pattern":"/api/","policy":"network-first","store":"api-cache","max_age_secs":300}"#,
        )
        .unwrap();
        assert_eq!(rule.policy, Policy::NetworkFirst);
    }
}
