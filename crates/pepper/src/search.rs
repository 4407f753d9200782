//! Keyword search engines.
//!
//! A query such as `wiki rust ownership` selects the engine registered
//! under the keyword `wiki` and searches it for `rust ownership`. Queries
//! whose first word is not a keyword go to the default engine verbatim.

use crate::error::{PepperError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Placeholder in a URL template that receives the escaped search term.
pub const TEMPLATE_PLACEHOLDER: &str = "%s";

/// A keyword-selected search engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchEngine {
    /// URL template containing exactly one `%s`
    #[serde(alias = "URL", alias = "Url")]
    pub url: String,

    /// Display name
    #[serde(default, alias = "Title")]
    pub title: String,

    /// Token typed before the query to select this engine
    #[serde(alias = "Keyword")]
    pub keyword: String,
}

impl SearchEngine {
    /// Create a new search engine definition.
    #[must_use]
    pub fn new(url: &str, title: &str, keyword: &str) -> Self {
        Self {
            url: url.to_string(),
            title: title.to_string(),
            keyword: keyword.to_string(),
        }
    }

    /// The engine used when no keyword matches: DuckDuckGo.
    #[must_use]
    pub fn duckduckgo() -> Self {
        Self::new("https://duckduckgo.com/?q=%s", "DuckDuckGo", "duck")
    }

    /// Check that the template has exactly one placeholder.
    pub fn validate(&self) -> Result<()> {
        let count = self.url.matches(TEMPLATE_PLACEHOLDER).count();
        if count != 1 {
            return Err(PepperError::InvalidTemplate {
                keyword: self.keyword.clone(),
                reason: format!(
                    "expected exactly one {} placeholder in '{}', found {}",
                    TEMPLATE_PLACEHOLDER, self.url, count
                ),
            });
        }
        Ok(())
    }

    /// Build the search URL for `term`, URL-escaping it.
    #[must_use]
    pub fn url_for(&self, term: &str) -> String {
        self.url
            .replacen(TEMPLATE_PLACEHOLDER, &urlencoding::encode(term), 1)
    }
}

/// Keyword lookup table plus the fallback engine.
#[derive(Debug, Clone)]
pub struct SearchEngineRegistry {
    engines: HashMap<String, SearchEngine>,
    default: SearchEngine,
}

impl SearchEngineRegistry {
    /// Build a registry, validating every template.
    ///
    /// When two engines share a keyword the first one is kept.
    pub fn new(engines: Vec<SearchEngine>, default: SearchEngine) -> Result<Self> {
        default.validate()?;

        let mut map: HashMap<String, SearchEngine> = HashMap::with_capacity(engines.len());
        for engine in engines {
            engine.validate()?;
            if engine.keyword.trim().is_empty() {
                return Err(PepperError::Config(format!(
                    "search engine '{}' has an empty keyword",
                    engine.url
                )));
            }
            if map.contains_key(&engine.keyword) {
                debug!("Ignoring duplicate search keyword {}", engine.keyword);
                continue;
            }
            map.insert(engine.keyword.clone(), engine);
        }

        Ok(Self {
            engines: map,
            default,
        })
    }

    /// Build a registry whose default engine is picked by keyword.
    ///
    /// With no keyword the built-in DuckDuckGo engine is the default.
    pub fn with_default_keyword(
        engines: Vec<SearchEngine>,
        default_keyword: Option<&str>,
    ) -> Result<Self> {
        let default = match default_keyword {
            Some(keyword) => engines
                .iter()
                .find(|e| e.keyword == keyword)
                .cloned()
                .ok_or_else(|| {
                    PepperError::Config(format!(
                        "default search engine '{}' is not among the configured engines",
                        keyword
                    ))
                })?,
            None => SearchEngine::duckduckgo(),
        };
        Self::new(engines, default)
    }

    /// Look up the engine registered for `keyword`.
    #[must_use]
    pub fn get(&self, keyword: &str) -> Option<&SearchEngine> {
        self.engines.get(keyword)
    }

    /// The fallback engine.
    #[must_use]
    pub fn default_engine(&self) -> &SearchEngine {
        &self.default
    }

    /// Number of keyword engines (the default is not counted unless it
    /// was also registered by keyword).
    #[must_use]
    pub fn len(&self) -> usize {
        self.engines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Resolve a free-form query to the URL the browser should visit.
    pub fn resolve(&self, query: &str) -> Result<String> {
        let words: Vec<&str> = query.split_whitespace().collect();

        match words.as_slice() {
            [] => Err(PepperError::EmptyQuery),
            [single] => Ok(self.default.url_for(single)),
            [keyword, rest @ ..] => match self.get(keyword) {
                Some(engine) => Ok(engine.url_for(&rest.join(" "))),
                None => Ok(self.default.url_for(&words.join(" "))),
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn registry() -> SearchEngineRegistry {
        SearchEngineRegistry::new(
            vec![
                SearchEngine::new("https://duckduckgo.com/?q=%s", "DuckDuckGo", "duck"),
                SearchEngine::new("https://en.wikipedia.org/w/index.php?search=%s", "Wikipedia", "w"),
            ],
            SearchEngine::new("https://www.google.com/search?q=%s", "Google", "g"),
        )
        .unwrap()
    }

    #[test]
    fn test_keyword_selects_engine() {
        let url = registry().resolve("duck hello world").unwrap();
        assert_eq!(url, "https://duckduckgo.com/?q=hello%20world");
    }

    #[test]
    fn test_single_word_goes_to_default() {
        let url = registry().resolve("rust").unwrap();
        assert_eq!(url, "https://www.google.com/search?q=rust");
    }

    #[test]
    fn test_single_keyword_alone_goes_to_default() {
        // A lone keyword is a search term, not an engine selection
        let url = registry().resolve("duck").unwrap();
        assert_eq!(url, "https://www.google.com/search?q=duck");
    }

    #[test]
    fn test_unknown_keyword_uses_full_query() {
        let url = registry().resolve("unknownkw term").unwrap();
        assert_eq!(url, "https://www.google.com/search?q=unknownkw%20term");
    }

    #[test]
    fn test_empty_query() {
        assert_eq!(registry().resolve(""), Err(PepperError::EmptyQuery));
        assert_eq!(registry().resolve("   \t "), Err(PepperError::EmptyQuery));
    }

    #[test]
    fn test_extra_whitespace_is_collapsed() {
        let url = registry().resolve("  w   borrow   checker ").unwrap();
        assert_eq!(
            url,
            "https://en.wikipedia.org/w/index.php?search=borrow%20checker"
        );
    }

    #[test]
    fn test_term_is_escaped() {
        let url = registry().resolve("duck a&b=c?").unwrap();
        assert_eq!(url, "https://duckduckgo.com/?q=a%26b%3Dc%3F");
    }

    #[test]
    fn test_first_keyword_wins_on_duplicate() {
        let reg = SearchEngineRegistry::new(
            vec![
                SearchEngine::new("https://first.test/?q=%s", "First", "k"),
                SearchEngine::new("https://second.test/?q=%s", "Second", "k"),
            ],
            SearchEngine::duckduckgo(),
        )
        .unwrap();
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get("k").unwrap().title, "First");
    }

    #[test]
    fn test_template_without_placeholder_rejected() {
        let err = SearchEngineRegistry::new(
            vec![SearchEngine::new("https://broken.test/", "Broken", "b")],
            SearchEngine::duckduckgo(),
        )
        .unwrap_err();
        assert!(matches!(err, PepperError::InvalidTemplate { .. }));
    }

    #[test]
    fn test_template_with_two_placeholders_rejected() {
        let engine = SearchEngine::new("https://x.test/?q=%s&r=%s", "X", "x");
        assert!(engine.validate().is_err());
    }

    #[test]
    fn test_default_by_keyword() {
        let reg = SearchEngineRegistry::with_default_keyword(
            vec![SearchEngine::new("https://x.test/?q=%s", "X", "x")],
            Some("x"),
        )
        .unwrap();
        assert_eq!(reg.resolve("hi").unwrap(), "https://x.test/?q=hi");

        let err = SearchEngineRegistry::with_default_keyword(Vec::new(), Some("missing"));
        assert!(matches!(err, Err(PepperError::Config(_))));
    }

    #[test]
    fn test_default_is_duckduckgo() {
        let reg = SearchEngineRegistry::with_default_keyword(Vec::new(), None).unwrap();
        assert_eq!(reg.default_engine().keyword, "duck");
        assert!(reg.is_empty());
    }

    #[test]
    fn test_deserialize_pascal_case() {
        let json = r#"{"URL":"https://x.test/?q=%s","Title":"X","Keyword":"x"}"#;
        let engine: SearchEngine = serde_json::from_str(json).unwrap();
        assert_eq!(engine, SearchEngine::new("https://x.test/?q=%s", "X", "x"));
    }
}
