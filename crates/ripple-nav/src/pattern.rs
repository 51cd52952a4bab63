//! Route patterns.
//!
//! A route string is compiled to an anchored regular expression: `:name`
//! matches one path segment, `*name` matches anything (lazily), and every
//! other character matches itself.

use regex::Regex;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Route errors.
#[derive(Debug, Error)]
pub enum RouteError {
    /// A raw pattern is not a valid regular expression.
    #[error("Invalid route pattern {pattern:?}: {source}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// What the regex engine rejected.
        #[source]
        source: regex::Error,
    },
}

const SEGMENT: &str = "([^/]+)";
const SPLAT: &str = "(.*?)";

/// A compiled route.
#[derive(Debug, Clone)]
pub struct RoutePattern {
    source: String,
    regex: Regex,
}

impl RoutePattern {
    /// Compile a route string such as `search/:query/p:num` or
    /// `files/*path`.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::InvalidPattern`] if the resulting expression
    /// cannot be built.
    pub fn compile(route: &str) -> Result<Self, RouteError> {
        let expression = format!("^{}$", translate(route));
        let regex = Regex::new(&expression).map_err(|source| RouteError::InvalidPattern {
            pattern: route.to_string(),
            source,
        })?;
        Ok(Self {
            source: route.to_string(),
            regex,
        })
    }

    /// Use a raw regular expression. Its capture groups become the route
    /// arguments.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::InvalidPattern`] if `expression` is not a valid
    /// regular expression.
    pub fn regex(expression: &str) -> Result<Self, RouteError> {
        let regex = Regex::new(expression).map_err(|source| RouteError::InvalidPattern {
            pattern: expression.to_string(),
            source,
        })?;
        Ok(Self::from(regex))
    }

    /// The route string or expression this pattern was built from.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether `fragment` matches.
    #[must_use]
    pub fn is_match(&self, fragment: &str) -> bool {
        self.regex.is_match(fragment)
    }

    /// Captured arguments for `fragment`, in order. Groups that did not
    /// participate yield empty strings. `None` if the fragment does not
    /// match.
    #[must_use]
    pub fn extract(&self, fragment: &str) -> Option<Vec<String>> {
        let captures = self.regex.captures(fragment)?;
        Some(
            captures
                .iter()
                .skip(1)
                .map(|group| group.map_or_else(String::new, |m| m.as_str().to_string()))
                .collect(),
        )
    }
}

impl From<Regex> for RoutePattern {
    fn from(regex: Regex) -> Self {
        Self {
            source: regex.as_str().to_string(),
            regex,
        }
    }
}

impl FromStr for RoutePattern {
    type Err = RouteError;

    fn from_str(route: &str) -> Result<Self, Self::Err> {
        Self::compile(route)
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn is_word(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Rewrite a route string into regex source, without anchors.
fn translate(route: &str) -> String {
    let mut out = String::with_capacity(route.len() + 16);
    let mut literal = String::new();
    let mut chars = route.char_indices().peekable();

    while let Some((at, c)) = chars.next() {
        let group = match c {
            ':' => SEGMENT,
            '*' => SPLAT,
            _ => {
                literal.push(c);
                continue;
            }
        };
        let name_len = route[at + 1..].chars().take_while(|&n| is_word(n)).count();
        if name_len == 0 {
            literal.push(c);
            continue;
        }
        for _ in 0..name_len {
            chars.next();
        }
        out.push_str(&regex::escape(&literal));
        literal.clear();
        out.push_str(group);
    }
    out.push_str(&regex::escape(&literal));
    out
}
