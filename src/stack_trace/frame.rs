//! Stack frame parsing.
//!
//! Browsers format frames differently:
//!
//! | Engine | Format |
//! |--------|--------|
//! | V8 | `    at member (url:line:column)` or `    at url:line:column` |
//! | SpiderMonkey / JavaScriptCore | `member@url:line:column` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

// ============================================================================
// Patterns
// ============================================================================

static V8_FRAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*at (?:(.+?) \((.+)\)|(.+))\s*$").ok());

static FIREFOX_FRAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*([^@\s]*)@(.+)\s*$").ok());

static LOCATION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(.+?):(\d+)(?::(\d+))?$").ok());

// ============================================================================
// Frame
// ============================================================================

/// One stack frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Function or method name.
    pub member: Option<String>,
    /// Script URL.
    pub uri: String,
    /// One-based line.
    pub line: Option<u32>,
    /// One-based column.
    pub column: Option<u32>,
}

impl Frame {
    /// Parses one line of a browser stack trace.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        Self::parse_v8(line).or_else(|| Self::parse_firefox(line))
    }

    /// Parses a V8 frame.
    #[must_use]
    pub fn parse_v8(line: &str) -> Option<Self> {
        let captures = V8_FRAME.as_ref()?.captures(line)?;
        let (member, location) = match (captures.get(1), captures.get(2)) {
            (Some(member), Some(location)) => (Some(member.as_str()), location.as_str()),
            _ => (None, captures.get(3)?.as_str()),
        };
        Self::with_location(member, location)
    }

    /// Parses a Firefox or Safari frame.
    #[must_use]
    pub fn parse_firefox(line: &str) -> Option<Self> {
        let captures = FIREFOX_FRAME.as_ref()?.captures(line)?;
        let member = captures.get(1).map(|m| m.as_str()).filter(|m| !m.is_empty());
        Self::with_location(member, captures.get(2)?.as_str())
    }

    fn with_location(member: Option<&str>, location: &str) -> Option<Self> {
        let (uri, line, column) = match LOCATION.as_ref()?.captures(location) {
            Some(captures) => (
                captures.get(1)?.as_str(),
                captures.get(2).and_then(|m| m.as_str().parse().ok()),
                captures.get(3).and_then(|m| m.as_str().parse().ok()),
            ),
            None => (location, None, None),
        };

        Some(Self {
            member: member.map(|m| m.trim_start_matches("new ").to_string()),
            uri: uri.to_string(),
            line,
            column,
        })
    }

    /// Returns the location as `uri:line:column`.
    #[must_use]
    pub fn location(&self) -> String {
        match (self.line, self.column) {
            (Some(line), Some(column)) => format!("{} {line}:{column}", self.uri),
            (Some(line), None) => format!("{} {line}", self.uri),
            _ => self.uri.clone(),
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let location = self.location();
        match &self.member {
            Some(member) => write!(f, "{location:<40} {member}"),
            None => f.write_str(&location),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
