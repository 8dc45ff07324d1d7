//! Regex matcher groups used to route updates to handlers.

use regex::Regex;

use crate::error::MuxError;

/// An ordered group of compiled matchers with "any match" semantics.
///
/// Immutable after construction. Emptiness is allowed here so that callers
/// own the rejection policy; registration sites refuse empty groups.
#[derive(Debug, Clone)]
pub struct MatcherGroup {
    matchers: Vec<Regex>,
}

impl MatcherGroup {
    /// Compile each pattern in order. The first pattern that fails to
    /// compile fails the whole group.
    pub fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Self, MuxError> {
        let mut matchers = Vec::with_capacity(patterns.len());
        for p in patterns {
            matchers.push(Regex::new(p.as_ref())?);
        }
        Ok(Self { matchers })
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    /// True iff at least one matcher matches `text`. Matchers are tried in
    /// insertion order and the first hit short-circuits.
    pub fn matches(&self, text: &str) -> bool {
        self.matchers.iter().any(|m| m.is_match(text))
    }
}
