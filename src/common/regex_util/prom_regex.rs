use std::fmt;

use regex::{Error as RegexError, Regex};

use super::remove_start_end_anchors;

#[derive(Clone, Debug)]
enum Matcher {
    Any,
    Literal(String),
    Regex(Regex),
}

/// PromRegex implements string matching for Prometheus-like regex.
///
/// The regex is implicitly anchored to both ends of the matched string. Plain literals and
/// `.*` skip the regex engine entirely.
#[derive(Clone, Debug)]
pub struct PromRegex {
    expr: String,
    matcher: Matcher,
}

impl PromRegex {
    pub fn new(expr: &str) -> Result<PromRegex, RegexError> {
        let stripped = remove_start_end_anchors(expr);
        let matcher = if stripped == ".*" {
            Matcher::Any
        } else if regex::escape(stripped) == stripped {
            Matcher::Literal(stripped.to_string())
        } else {
            Matcher::Regex(Regex::new(&format!("^(?:{stripped})$"))?)
        };
        Ok(PromRegex {
            expr: stripped.to_string(),
            matcher,
        })
    }

    /// match_string returns true if s matches pr.
    pub fn match_string(&self, s: &str) -> bool {
        match &self.matcher {
            Matcher::Any => true,
            Matcher::Literal(lit) => lit == s,
            Matcher::Regex(re) => re.is_match(s),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.expr
    }
}

impl PartialEq for PromRegex {
    fn eq(&self, other: &Self) -> bool {
        self.expr == other.expr
    }
}

impl fmt::Display for PromRegex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)
    }
}
