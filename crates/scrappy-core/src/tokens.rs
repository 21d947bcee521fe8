//! Token registry
//!
//! Immutable mapping from token to display name, built once at startup from
//! a line-oriented list:
//!
//! ```text
//! # comments and blank lines are ignored
//! abc123:Home
//! k9x-77:Cabin: north side
//! ```
//!
//! The token is everything before the first `:`, the name everything after.
//! Tokens are opaque: any non-empty string without control characters or
//! `:` is accepted. Any malformed line fails the whole load; there is no
//! partial registry.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

/// Registered tokens and their display names
///
/// Read-only after construction. Share it with `Arc`; no locking is needed.
#[derive(Clone, Default)]
pub struct TokenRegistry {
    tokens: HashMap<String, String>,
}

// Custom Debug implementation that hides the tokens
impl std::fmt::Debug for TokenRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.tokens.values().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("TokenRegistry")
            .field("tokens", &"<REDACTED>")
            .field("names", &names)
            .finish()
    }
}

impl TokenRegistry {
    /// Load the registry from a token list file
    ///
    /// Fails if the file is missing, unreadable, malformed, or lists no tokens.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::config(format!(
                "Token list file [{}] could not be read: {}",
                path.display(),
                e
            ))
        })?;

        let registry = Self::parse(&content).map_err(|e| match e {
            Error::Config(msg) => Error::config(format!("{}: {}", path.display(), msg)),
            other => other,
        })?;

        tracing::info!("Loaded {} token(s) from {}", registry.len(), path.display());
        Ok(registry)
    }

    /// Parse a token list
    pub fn parse(content: &str) -> Result<Self> {
        let mut tokens = HashMap::new();

        for (index, raw_line) in content.lines().enumerate() {
            let line_no = index + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (token, name) = line.split_once(':').ok_or_else(|| {
                Error::config(format!("line {}: expected <token>:<name>", line_no))
            })?;
            let token = token.trim();
            let name = name.trim();

            if !is_valid_token(token) {
                return Err(Error::config(format!(
                    "line {}: token cannot be empty or contain control characters",
                    line_no
                )));
            }
            if name.is_empty() {
                return Err(Error::config(format!("line {}: name cannot be empty", line_no)));
            }
            if tokens.insert(token.to_string(), name.to_string()).is_some() {
                return Err(Error::config(format!("line {}: duplicate token", line_no)));
            }
        }

        if tokens.is_empty() {
            return Err(Error::config("Token list contains no tokens"));
        }

        Ok(Self { tokens })
    }

    /// Build a registry from `(token, name)` pairs
    pub fn from_entries<I, T, N>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (T, N)>,
        T: Into<String>,
        N: Into<String>,
    {
        let mut tokens = HashMap::new();
        for (token, name) in entries {
            let token = token.into();
            if !is_valid_token(&token) {
                return Err(Error::config("Invalid token in registry entries"));
            }
            if tokens.insert(token, name.into()).is_some() {
                return Err(Error::config("Duplicate token in registry entries"));
            }
        }
        Ok(Self { tokens })
    }

    /// Look up the display name for a token
    pub fn lookup(&self, token: &str) -> Option<&str> {
        self.tokens.get(token).map(String::as_str)
    }

    /// Check whether a token is registered
    pub fn contains(&self, token: &str) -> bool {
        self.tokens.contains_key(token)
    }

    /// Number of registered tokens
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

fn is_valid_token(token: &str) -> bool {
    !token.is_empty() && !token.chars().any(char::is_control)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let registry = TokenRegistry::parse(
            "# household\n\nabc123:Home\n   \n  # indented comment\nk9x-77 : Cabin \n",
        )
        .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.lookup("abc123"), Some("Home"));
        assert_eq!(registry.lookup("k9x-77"), Some("Cabin"));
        assert_eq!(registry.lookup("unknown"), None);
    }

    #[test]
    fn test_name_may_contain_colons() {
        let registry = TokenRegistry::parse("t1:Office: 3rd floor").unwrap();
        assert_eq!(registry.lookup("t1"), Some("Office: 3rd floor"));
    }

    #[test]
    fn test_malformed_lines_fail() {
        for content in ["abc123 Home", ":Home", "abc123:", "ab\u{7}c:Bell"] {
            let err = TokenRegistry::parse(content).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{:?} should be rejected", content);
        }
    }

    #[test]
    fn test_opaque_tokens_accepted() {
        let registry =
            TokenRegistry::parse("dG9r+ZW4/x==:Home\n../up:Parent\n.dot:Hidden\n").unwrap();
        assert_eq!(registry.lookup("dG9r+ZW4/x=="), Some("Home"));
        assert_eq!(registry.lookup("../up"), Some("Parent"));
        assert_eq!(registry.lookup(".dot"), Some("Hidden"));
    }

    #[test]
    fn test_error_names_line_number() {
        let err = TokenRegistry::parse("# c\nabc:Home\nbroken\n").unwrap_err();
        assert!(err.to_string().contains("line 3"), "got: {}", err);
    }

    #[test]
    fn test_duplicate_token_fails() {
        let err = TokenRegistry::parse("abc:Home\nabc:Other").unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_empty_list_fails() {
        assert!(TokenRegistry::parse("").is_err());
        assert!(TokenRegistry::parse("# only comments\n\n").is_err());
    }

    #[test]
    fn test_debug_hides_tokens() {
        let registry = TokenRegistry::from_entries([("secret-token-1", "Home")]).unwrap();
        let debug_str = format!("{:?}", registry);
        assert!(!debug_str.contains("secret-token-1"));
        assert!(debug_str.contains("Home"));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.list");
        tokio::fs::write(&path, "abc123:Home\n").await.unwrap();

        let registry = TokenRegistry::load(&path).await.unwrap();
        assert_eq!(registry.lookup("abc123"), Some("Home"));
    }

    #[tokio::test]
    async fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = TokenRegistry::load(dir.path().join("missing.list")).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
