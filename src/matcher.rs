use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

// CSI sequences: colours, bold/reset, cursor movement.
static ANSI_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("ANSI escape pattern is valid"));

/// Removes terminal styling so the text can be searched as plain output.
pub fn strip_ansi(text: &str) -> Cow<'_, str> {
    ANSI_ESCAPE.replace_all(text, "")
}

/// Expected result of a fixture, compiled once before anything runs.
#[derive(Debug, Clone)]
pub struct ExpectedPattern {
    regex: Regex,
}

impl ExpectedPattern {
    /// Compiles `pattern` case-sensitively with `^`/`$` matching at line boundaries.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(pattern).multi_line(true).build()?;
        Ok(Self { regex })
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// Searches the captured output and returns the matched text, if any.
    ///
    /// Styling is stripped and surrounding whitespace trimmed before the search.
    pub fn find(&self, captured: &str) -> Option<String> {
        let clean = strip_ansi(captured);
        self.regex
            .find(clean.trim())
            .map(|found| found.as_str().to_string())
    }
}
