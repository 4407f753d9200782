//! Domain filtering for proxied requests.
//!
//! A [`DomainFilter`] holds two ordered pattern lists, a whitelist and a
//! blacklist, and classifies a destination host against them.
//!
//! # Pattern Syntax
//!
//! - `example.com` matches exactly `example.com`.
//! - `.example.com` matches the root domain `example.com` and every
//!   subdomain (`ad.example.com`, `a.b.example.com`).
//!
//! There is no wildcard or regex support.
//!
//! # Check Order
//!
//! 1. Whitelist, in configured order (first match wins)
//! 2. Blacklist, in configured order (first match wins)
//! 3. Default allow
//!
//! Matching is case-insensitive: patterns are lowercased when the filter is
//! built and hosts are lowercased before each check.

use std::fmt;

/// Check whether `hostname` is covered by the domain `pattern`.
///
/// Rules, in priority order:
/// 1. Exact equality.
/// 2. Root domain: `.example.com` matches `example.com`.
/// 3. Subdomain: `.example.com` matches `ad.example.com`.
///
/// The comparison is byte-exact; callers normalise case beforehand.
#[must_use]
pub fn dns_domain_is(hostname: &str, pattern: &str) -> bool {
    if pattern == hostname {
        return true;
    }

    match pattern.strip_prefix('.') {
        Some(root) => root == hostname || hostname.ends_with(pattern),
        None => false,
    }
}

/// Result of a domain filter check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterResult {
    /// Host matched a whitelist pattern
    Whitelisted {
        /// The pattern that matched
        pattern: String,
    },
    /// Host matched a blacklist pattern and no whitelist pattern
    Blacklisted {
        /// The pattern that matched
        pattern: String,
    },
    /// Host matched neither list
    DefaultAllowed,
}

impl FilterResult {
    /// Whether the request may proceed
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        !matches!(self, FilterResult::Blacklisted { .. })
    }

    /// Short label used in audit logs
    #[must_use]
    pub fn decision(&self) -> &'static str {
        match self {
            FilterResult::Whitelisted { .. } => "whitelisted",
            FilterResult::Blacklisted { .. } => "blacklisted",
            FilterResult::DefaultAllowed => "default-allowed",
        }
    }

    /// The pattern responsible for the decision, if any
    #[must_use]
    pub fn pattern(&self) -> Option<&str> {
        match self {
            FilterResult::Whitelisted { pattern } | FilterResult::Blacklisted { pattern } => {
                Some(pattern)
            }
            FilterResult::DefaultAllowed => None,
        }
    }

    /// A human-readable reason for the decision
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            FilterResult::Whitelisted { pattern } => {
                format!("host matches whitelist entry {}", pattern)
            }
            FilterResult::Blacklisted { pattern } => {
                format!("host matches blacklist entry {}", pattern)
            }
            FilterResult::DefaultAllowed => "host is not listed".to_string(),
        }
    }
}

impl fmt::Display for FilterResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.decision())
    }
}

/// Ordered whitelist-then-blacklist host filter.
#[derive(Debug, Clone, Default)]
pub struct DomainFilter {
    /// Whitelist patterns (lowercased, configured order)
    whitelist: Vec<String>,
    /// Blacklist patterns (lowercased, configured order)
    blacklist: Vec<String>,
}

impl DomainFilter {
    /// Create a filter from the configured pattern lists.
    ///
    /// Empty entries are skipped. Order is preserved.
    #[must_use]
    pub fn new(whitelist: &[String], blacklist: &[String]) -> Self {
        Self {
            whitelist: normalize_patterns(whitelist),
            blacklist: normalize_patterns(blacklist),
        }
    }

    /// Classify a host in a single pass over both lists.
    #[must_use]
    pub fn check_host(&self, host: &str) -> FilterResult {
        let lower_host = host.to_lowercase();

        if let Some(pattern) = first_match(&self.whitelist, &lower_host) {
            return FilterResult::Whitelisted {
                pattern: pattern.to_string(),
            };
        }

        if let Some(pattern) = first_match(&self.blacklist, &lower_host) {
            return FilterResult::Blacklisted {
                pattern: pattern.to_string(),
            };
        }

        FilterResult::DefaultAllowed
    }

    /// Convenience wrapper around [`check_host`](Self::check_host).
    #[must_use]
    pub fn is_allowed(&self, host: &str) -> bool {
        self.check_host(host).is_allowed()
    }

    /// Number of whitelist patterns
    #[must_use]
    pub fn whitelist_len(&self) -> usize {
        self.whitelist.len()
    }

    /// Number of blacklist patterns
    #[must_use]
    pub fn blacklist_len(&self) -> usize {
        self.blacklist.len()
    }
}

fn first_match<'a>(patterns: &'a [String], host: &str) -> Option<&'a str> {
    patterns
        .iter()
        .find(|p| dns_domain_is(host, p))
        .map(String::as_str)
}

fn normalize_patterns(patterns: &[String]) -> Vec<String> {
    patterns
        .iter()
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect()
}
