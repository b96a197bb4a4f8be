//! `ReplyCodeActions`: ordered `pattern=action` rules evaluated against an
//! MLLP outbound operation's remote `MSA-1` (or, for HTTP, a status class).

use thiserror::Error;

/// What an outbound adapter should do once a reply code has matched a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyAction {
    /// Treat the reply as a success.
    Success,
    /// Treat the reply as a fatal failure; no further retries.
    Fail,
    /// Retry the send, subject to `max_retries`.
    Retry,
    /// Treat as success but flag the outcome as a warning.
    Warn,
}

/// One `pattern=action` entry. Patterns support a literal code (`AA`), a
/// single wildcard component (`?E` matches `AE`/`CE`/...), or `*` matching
/// anything.
#[derive(Debug, Clone)]
struct Entry {
    pattern: String,
    action: ReplyAction,
}

/// An ordered, first-match rule list parsed from the `ReplyCodeActions`
/// adapter setting (default `:*=S`).
#[derive(Debug, Clone)]
pub struct ReplyCodeActions {
    entries: Vec<Entry>,
}

/// Errors raised parsing a `ReplyCodeActions` setting string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReplyCodeActionsError {
    /// An entry was not of the form `pattern=action`.
    #[error("malformed reply code action entry: {0}")]
    Malformed(String),
    /// The action letter was not one of `S`/`F`/`R`/`W`.
    #[error("unknown reply code action: {0}")]
    UnknownAction(String),
}

impl ReplyCodeActions {
    /// Parses a comma-separated `pattern=action,…` string.
    ///
    /// Patterns may be prefixed with a colon (the source's `:AA=S` style,
    /// where the colon is a cosmetic separator from an implicit namespace);
    /// the colon is stripped before matching.
    ///
    /// # Errors
    ///
    /// Returns [`ReplyCodeActionsError`] if any entry is malformed or names
    /// an unrecognized action letter.
    pub fn parse(spec: &str) -> Result<Self, ReplyCodeActionsError> {
        let mut entries = Vec::new();
        for raw in spec.split(',') {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let (pattern, action) = raw
                .split_once('=')
                .ok_or_else(|| ReplyCodeActionsError::Malformed(raw.to_string()))?;
            let pattern = pattern.trim_start_matches(':').to_string();
            let action = match action.trim() {
                "S" => ReplyAction::Success,
                "F" => ReplyAction::Fail,
                "R" => ReplyAction::Retry,
                "W" => ReplyAction::Warn,
                other => return Err(ReplyCodeActionsError::UnknownAction(other.to_string())),
            };
            entries.push(Entry { pattern, action });
        }
        Ok(Self { entries })
    }

    /// Evaluates `code` against the rule list in order, returning the first
    /// match's action, or [`ReplyAction::Success`] if nothing matches.
    #[must_use]
    pub fn evaluate(&self, code: &str) -> ReplyAction {
        self.entries
            .iter()
            .find(|entry| pattern_matches(&entry.pattern, code))
            .map_or(ReplyAction::Success, |entry| entry.action)
    }
}

fn pattern_matches(pattern: &str, code: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if pattern.len() != code.len() {
        return false;
    }
    pattern
        .chars()
        .zip(code.chars())
        .all(|(p, c)| p == '?' || p.eq_ignore_ascii_case(&c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_everything_as_success() {
        let actions = ReplyCodeActions::parse(":*=S").unwrap();
        assert_eq!(actions.evaluate("AA"), ReplyAction::Success);
        assert_eq!(actions.evaluate("AE"), ReplyAction::Success);
    }

    #[test]
    fn wildcard_component_matches_any_first_char() {
        let actions = ReplyCodeActions::parse(":?E=R,:*=S").unwrap();
        assert_eq!(actions.evaluate("AE"), ReplyAction::Retry);
        assert_eq!(actions.evaluate("CE"), ReplyAction::Retry);
        assert_eq!(actions.evaluate("AA"), ReplyAction::Success);
    }

    #[test]
    fn first_match_wins_over_later_entries() {
        let actions = ReplyCodeActions::parse(":AE=F,:?E=R").unwrap();
        assert_eq!(actions.evaluate("AE"), ReplyAction::Fail);
    }

    #[test]
    fn unmatched_code_defaults_to_success() {
        let actions = ReplyCodeActions::parse(":AA=S").unwrap();
        assert_eq!(actions.evaluate("ZZ"), ReplyAction::Success);
    }

    #[test]
    fn rejects_malformed_entry() {
        assert!(ReplyCodeActions::parse("garbage").is_err());
    }

    #[test]
    fn rejects_unknown_action_letter() {
        assert!(ReplyCodeActions::parse(":AA=X").is_err());
    }
}
