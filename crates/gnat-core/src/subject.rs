//! Subject parsing and validation
//!
//! gnat subjects are dot-separated token sequences:
//! ```text
//! orders.eu.created
//! sensors.kitchen.temperature
//! ```
//!
//! Wildcards (subscriptions only):
//! - `*` matches exactly one token
//! - `>` matches one or more trailing tokens and must be the last token

use crate::{Error, Result};

/// Single-token wildcard
pub const SINGLE_WILDCARD: &str = "*";

/// Trailing multi-token wildcard
pub const FULL_WILDCARD: &str = ">";

/// A parsed subject
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subject {
    raw: String,
    tokens: Vec<String>,
}

impl Subject {
    /// Parse a subject used by PUB. Wildcard tokens are rejected.
    pub fn parse_publish(s: &str) -> Result<Self> {
        let tokens = split_tokens(s).ok_or(Error::InvalidPublishSubject)?;

        if tokens
            .iter()
            .any(|t| t == SINGLE_WILDCARD || t == FULL_WILDCARD)
        {
            return Err(Error::InvalidPublishSubject);
        }

        Ok(Self {
            raw: s.to_string(),
            tokens,
        })
    }

    /// Parse a subject used by SUB. `>` is only allowed as the last token.
    pub fn parse_subscribe(s: &str) -> Result<Self> {
        let tokens = split_tokens(s).ok_or(Error::InvalidSubscribeSubject)?;

        let last = tokens.len() - 1;
        if tokens
            .iter()
            .enumerate()
            .any(|(i, t)| t == FULL_WILDCARD && i != last)
        {
            return Err(Error::InvalidSubscribeSubject);
        }

        Ok(Self {
            raw: s.to_string(),
            tokens,
        })
    }

    /// Get the raw subject string
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Get the subject tokens
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Split on `.`, returning `None` if any token is empty
fn split_tokens(s: &str) -> Option<Vec<String>> {
    let tokens: Vec<String> = s.split('.').map(|t| t.to_string()).collect();

    if tokens.iter().any(|t| t.is_empty()) {
        return None;
    }

    Some(tokens)
}
