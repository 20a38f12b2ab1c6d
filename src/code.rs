//! Session code extraction.
//!
//! Players share a game either as a bare code (`"a1B2c3"`) or as a link that
//! carries it in the `c` query value (`"https://garticphone.com/?c=a1B2c3"`).

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

static LINK_CODE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\?c=([a-zA-Z0-9]+)").ok());

/// Short token identifying one game session. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionCode(String);

impl SessionCode {
    /// Extract the code from a share link, or take the input as a bare code.
    ///
    /// ```
    /// use lobby_swarm::code::SessionCode;
    ///
    /// assert_eq!(SessionCode::parse("https://garticphone.com/?c=0fa1b2").as_str(), "0fa1b2");
    /// assert_eq!(SessionCode::parse("0fa1b2").as_str(), "0fa1b2");
    /// ```
    pub fn parse(input: &str) -> Self {
        let extracted = LINK_CODE
            .as_ref()
            .and_then(|re| re.captures(input))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());
        Self(extracted.unwrap_or_else(|| input.to_string()))
    }

    /// The code as sent to the remote.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn extracts_code_from_share_link() {
        let code = SessionCode::parse("https://garticphone.com/?c=0abcdef1");
        assert_eq!(code.as_str(), "0abcdef1");
    }

    #[test]
    fn extracts_code_with_trailing_query() {
        let code = SessionCode::parse("https://garticphone.com/en?c=XyZ09&lang=en");
        assert_eq!(code.as_str(), "XyZ09");
    }

    #[test]
    fn bare_code_is_unchanged() {
        assert_eq!(SessionCode::parse("abc123").as_str(), "abc123");
    }

    #[test]
    fn link_without_code_is_unchanged() {
        let link = "https://garticphone.com/?lang=en";
        assert_eq!(SessionCode::parse(link).as_str(), link);
    }

    #[test]
    fn display_matches_inner_code() {
        assert_eq!(SessionCode::parse("?c=q1").to_string(), "q1");
    }
}
