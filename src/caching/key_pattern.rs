//! # Key Patterns
//!
//! Glob patterns for bulk invalidation. `*` matches any run of characters (including
//! none); every other character is literal. A pattern always matches the whole key.
//!
//! The same pattern is evaluated in two places: locally as an anchored regex over the
//! fallback store, and remotely as a SCAN `MATCH` glob. The remote form escapes the
//! characters Redis treats as special (`?`, `[`, `]`, `\`) so both sides agree.

use regex::Regex;

use crate::core::error::{CacheError, CacheResult};

/// A parsed `*`-wildcard key pattern
#[derive(Debug, Clone)]
pub struct KeyPattern {
    source: String,
    regex: Regex,
}

impl KeyPattern {
    /// Parse a glob pattern; an empty pattern is a contract error
    pub fn parse(pattern: &str) -> CacheResult<Self> {
        if pattern.is_empty() {
            return Err(CacheError::invalid_pattern(pattern, "pattern cannot be empty"));
        }

        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");

        let regex = Regex::new(&format!("^{}$", body))
            .map_err(|e| CacheError::invalid_pattern(pattern, e.to_string()))?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// The pattern as supplied by the caller
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Full-match test against an unprefixed key
    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    /// The SCAN `MATCH` glob for this pattern under `namespace`
    pub fn store_glob(&self, namespace: &str) -> String {
        let literal_parts: Vec<String> = self.source.split('*').map(escape_glob).collect();
        format!("{}{}", escape_glob(namespace), literal_parts.join("*"))
    }
}

fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for ch in literal.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
