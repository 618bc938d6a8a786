//! Route pattern compilation.
//!
//! Patterns use `:name` for a single path segment and `*name` (final segment
//! only) for the non-empty remainder of the path. Each pattern is compiled
//! into its own `matchit` tree, so matching is strict: the whole path must
//! match, trailing slashes are significant and static segments compare
//! case-sensitively.
use std::collections::{HashMap, HashSet};

use crate::core::error::EngineError;

pub struct PathPattern {
    source: String,
    router: matchit::Router<()>,
}

impl std::fmt::Debug for PathPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PathPattern").field(&self.source).finish()
    }
}

impl PathPattern {
    pub fn compile(pattern: &str) -> Result<Self, EngineError> {
        let Some(rest) = pattern.strip_prefix('/') else {
            return Err(EngineError::pattern(pattern, "must start with '/'"));
        };

        let segments: Vec<&str> = rest.split('/').collect();
        let last = segments.len() - 1;
        let mut names = HashSet::new();
        let mut route = String::with_capacity(pattern.len() + 8);

        for (index, segment) in segments.iter().enumerate() {
            route.push('/');

            if let Some(name) = segment.strip_prefix(':') {
                check_name(pattern, name, &mut names)?;
                route.push('{');
                route.push_str(name);
                route.push('}');
            } else if let Some(name) = segment.strip_prefix('*') {
                if index != last {
                    return Err(EngineError::pattern(
                        pattern,
                        "a wildcard is only allowed as the final segment",
                    ));
                }
                check_name(pattern, name, &mut names)?;
                route.push_str("{*");
                route.push_str(name);
                route.push('}');
            } else if segment.contains(':') {
                return Err(EngineError::pattern(
                    pattern,
                    format!("parameter in '{segment}' must span the whole segment"),
                ));
            } else {
                // matchit reserves braces; double them to match literally
                route.push_str(&segment.replace('{', "{{").replace('}', "}}"));
            }
        }

        let mut router = matchit::Router::new();
        router
            .insert(route, ())
            .map_err(|e| EngineError::pattern(pattern, e.to_string()))?;

        Ok(Self {
            source: pattern.to_string(),
            router,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns the percent-decoded parameter bindings when `path` matches.
    ///
    /// A parameter that does not decode to valid UTF-8 makes the path a
    /// non-match rather than an error.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let matched = self.router.at(path).ok()?;

        let mut params = HashMap::with_capacity(matched.params.len());
        for (name, raw) in matched.params.iter() {
            let value = urlencoding::decode(raw).ok()?;
            params.insert(name.to_string(), value.into_owned());
        }
        Some(params)
    }
}

fn check_name<'a>(
    pattern: &str,
    name: &'a str,
    seen: &mut HashSet<&'a str>,
) -> Result<(), EngineError> {
    if name.is_empty() {
        return Err(EngineError::pattern(pattern, "parameter name is empty"));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(EngineError::pattern(
            pattern,
            format!("invalid parameter name '{name}'"),
        ));
    }
    if !seen.insert(name) {
        return Err(EngineError::pattern(
            pattern,
            format!("duplicate parameter name '{name}'"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_segment_matches_exactly() {
        let pattern = PathPattern::compile("/users/:id").unwrap();

        let params = pattern.matches("/users/42").unwrap();
        assert_eq!(params.get("id").map(String::as_str), Some("42"));

        assert!(pattern.matches("/users/42/posts").is_none());
        assert!(pattern.matches("/users").is_none());
        assert!(pattern.matches("/users/").is_none());
        assert!(pattern.matches("/users/42/").is_none());
    }

    #[test]
    fn test_static_segments_are_case_sensitive() {
        let pattern = PathPattern::compile("/Status").unwrap();
        assert!(pattern.matches("/Status").is_some());
        assert!(pattern.matches("/status").is_none());
    }

    #[test]
    fn test_params_are_percent_decoded() {
        let pattern = PathPattern::compile("/files/:name/raw").unwrap();
        let params = pattern.matches("/files/a%20b%2Fc/raw").unwrap();
        assert_eq!(params["name"], "a b/c");
    }

    #[test]
    fn test_invalid_utf8_is_no_match() {
        let pattern = PathPattern::compile("/files/:name").unwrap();
        assert!(pattern.matches("/files/%FF%FE").is_none());
    }

    #[test]
    fn test_multiple_params() {
        let pattern = PathPattern::compile("/orgs/:org/repos/:repo").unwrap();
        let params = pattern.matches("/orgs/acme/repos/shell").unwrap();
        assert_eq!(params["org"], "acme");
        assert_eq!(params["repo"], "shell");
    }

    #[test]
    fn test_wildcard_binds_remainder() {
        let pattern = PathPattern::compile("/static/*path").unwrap();
        let params = pattern.matches("/static/css/site.css").unwrap();
        assert_eq!(params["path"], "css/site.css");
        assert!(pattern.matches("/static/").is_none());
    }

    #[test]
    fn test_root_and_trailing_slash_patterns() {
        let root = PathPattern::compile("/").unwrap();
        assert!(root.matches("/").is_some());
        assert!(root.matches("/x").is_none());

        let slash = PathPattern::compile("/docs/").unwrap();
        assert!(slash.matches("/docs/").is_some());
        assert!(slash.matches("/docs").is_none());
    }

    #[test]
    fn test_literal_braces() {
        let pattern = PathPattern::compile("/{raw}").unwrap();
        assert!(pattern.matches("/{raw}").is_some());
    }

    #[test]
    fn test_malformed_patterns_are_rejected() {
        for bad in [
            "users/:id",
            "/users/:",
            "/users/:id-x",
            "/users/:id/:id",
            "/users/x:id",
            "/files/*rest/more",
            "/files/*",
        ] {
            let err = PathPattern::compile(bad).unwrap_err();
            assert!(
                matches!(err, EngineError::InvalidPattern { .. }),
                "{bad} should be rejected"
            );
        }
    }
}
