use regex::Regex;

use crate::matcher::strip_ansi;

/// Locates the ready-to-run command the CLI embeds in its output.
///
/// The CLI prints it on its own line, indented by four spaces and starting
/// with the same binary path it was invoked with.
#[derive(Debug, Clone)]
pub struct SuggestionExtractor {
    line: Regex,
    fragment: Option<Regex>,
}

impl SuggestionExtractor {
    /// `fragment`, when given, must also match the candidate line. It tells
    /// apart several suggestions printed by the same run.
    pub fn new(binary: &str, fragment: Option<&str>) -> Result<Self, regex::Error> {
        let line = Regex::new(&format!(r"(?m) {{4}}({} .*)$", regex::escape(binary)))?;
        let fragment = fragment.map(Regex::new).transpose()?;
        Ok(Self { line, fragment })
    }

    pub fn extract(&self, text: &str) -> Option<String> {
        let clean = strip_ansi(text);
        self.line
            .captures_iter(&clean)
            .filter_map(|caps| caps.get(1))
            .map(|found| found.as_str().trim_end())
            .find(|candidate| {
                self.fragment
                    .as_ref()
                    .map_or(true, |fragment| fragment.is_match(candidate))
            })
            .map(str::to_string)
    }
}
