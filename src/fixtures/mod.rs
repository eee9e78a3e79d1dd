//! Fixture tables: the ordered list of CLI invocations and what they must print.
//!
//! Order matters. Later fixtures use accounts created by earlier ones, which
//! each fixture declares through `requires`/`provides`.

mod account_actions;
mod contract_actions;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::matcher::ExpectedPattern;
use crate::suggest::SuggestionExtractor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Suite {
    /// Account creation, deletion and key checks
    Account,
    /// Contract deployment, calls and views
    Contract,
    /// Every built-in suite
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixture {
    pub name: String,
    /// Arguments appended to the binary path.
    pub command: String,
    /// Regular expression searched in the final output.
    pub expected: String,
    /// Regex the suggested command line must also match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(default)]
    pub wait_for_next_block: bool,
    /// Overrides the runner's settle delay for this fixture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settle_ms: Option<u64>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub provides: Vec<String>,
}

impl Fixture {
    pub fn new(name: &str, command: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            command: command.into(),
            expected: expected.into(),
            suggestion: None,
            wait_for_next_block: false,
            settle_ms: None,
            requires: Vec::new(),
            provides: Vec::new(),
        }
    }

    pub fn suggestion(mut self, fragment: &str) -> Self {
        self.suggestion = Some(fragment.to_string());
        self
    }

    pub fn wait_for_next_block(mut self) -> Self {
        self.wait_for_next_block = true;
        self
    }

    pub fn requires<S: AsRef<str>>(mut self, accounts: &[S]) -> Self {
        self.requires = accounts.iter().map(|a| a.as_ref().to_string()).collect();
        self
    }

    pub fn provides<S: AsRef<str>>(mut self, accounts: &[S]) -> Self {
        self.provides = accounts.iter().map(|a| a.as_ref().to_string()).collect();
        self
    }

    fn resolve(self, ctx: &SuiteContext) -> Self {
        let plain = |text: &str| ctx.substitute(text, false);
        Self {
            command: plain(&self.command),
            expected: ctx.substitute(&self.expected, true),
            requires: self.requires.iter().map(|a| plain(a)).collect(),
            provides: self.provides.iter().map(|a| plain(a)).collect(),
            ..self
        }
    }
}

/// Escapes CLI output that has to appear verbatim.
pub fn literal(text: &str) -> String {
    regex::escape(text)
}

/// Per-run values the fixture tables are built from.
#[derive(Debug, Clone)]
pub struct SuiteContext {
    pub tag: String,
    pub res_dir: PathBuf,
}

impl SuiteContext {
    pub fn new(tag: impl Into<String>, res_dir: impl Into<PathBuf>) -> Self {
        Self {
            tag: tag.into(),
            res_dir: res_dir.into(),
        }
    }

    /// Milliseconds since the epoch plus a random suffix, unique across runs.
    pub fn generate_tag() -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        format!("{millis}-{:04x}", rand::random::<u16>())
    }

    pub fn account(&self, prefix: &str, n: u8) -> String {
        format!("test-{prefix}-{}-{n}.testnet", self.tag)
    }

    pub fn resource(&self, file: &str) -> String {
        self.res_dir.join(file).display().to_string()
    }

    fn substitute(&self, text: &str, escape: bool) -> String {
        let res = self.res_dir.display().to_string();
        let res = if escape { regex::escape(&res) } else { res };
        text.replace("{tag}", &self.tag).replace("{res}", &res)
    }
}

/// Built-in tables in declaration order, account suite first.
pub fn builtin(suites: &[Suite], ctx: &SuiteContext) -> Vec<Fixture> {
    let wants = |suite: Suite| suites.iter().any(|s| *s == suite || *s == Suite::All);
    let mut fixtures = Vec::new();
    if wants(Suite::Account) {
        fixtures.extend(account_actions::fixtures(ctx));
    }
    if wants(Suite::Contract) {
        fixtures.extend(contract_actions::fixtures(ctx));
    }
    fixtures
}

/// Loads an extra table from a JSON array of fixtures.
pub fn load_file(path: &Path, ctx: &SuiteContext) -> Result<Vec<Fixture>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading fixtures from {}", path.display()))?;
    let fixtures: Vec<Fixture> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing fixtures in {}", path.display()))?;
    Ok(fixtures.into_iter().map(|f| f.resolve(ctx)).collect())
}

/// A fixture with its patterns compiled against the binary under test.
#[derive(Debug, Clone)]
pub struct CompiledFixture {
    /// 1-based position in the table.
    pub number: usize,
    pub fixture: Fixture,
    pub command_line: String,
    pub expected: ExpectedPattern,
    pub extractor: SuggestionExtractor,
}

/// Compiles every pattern up front so a typo fails the run before any
/// command touches the network.
pub fn compile(fixtures: Vec<Fixture>, binary: &str) -> Result<Vec<CompiledFixture>> {
    check_order(&fixtures)?;
    fixtures
        .into_iter()
        .enumerate()
        .map(|(i, fixture)| {
            let number = i + 1;
            let expected = ExpectedPattern::new(&fixture.expected).with_context(|| {
                format!("fixture #{number} ({}): invalid expected pattern", fixture.name)
            })?;
            let extractor = SuggestionExtractor::new(binary, fixture.suggestion.as_deref())
                .with_context(|| {
                    format!("fixture #{number} ({}): invalid suggestion pattern", fixture.name)
                })?;
            Ok(CompiledFixture {
                number,
                command_line: format!("{binary} {}", fixture.command),
                fixture,
                expected,
                extractor,
            })
        })
        .collect()
}

/// First fixture providing each account.
pub fn providers<'a>(
    fixtures: impl IntoIterator<Item = (usize, &'a Fixture)>,
) -> HashMap<String, usize> {
    let mut providers = HashMap::new();
    for (number, fixture) in fixtures {
        for account in &fixture.provides {
            providers.entry(account.clone()).or_insert(number);
        }
    }
    providers
}

fn check_order(fixtures: &[Fixture]) -> Result<()> {
    let providers = providers(fixtures.iter().enumerate().map(|(i, f)| (i + 1, f)));
    for (i, fixture) in fixtures.iter().enumerate() {
        let number = i + 1;
        for account in &fixture.requires {
            if let Some(&provider) = providers.get(account) {
                if provider >= number {
                    bail!(
                        "fixture #{number} ({}) requires account <{account}>, which is first created by fixture #{provider}",
                        fixture.name
                    );
                }
            }
        }
    }
    Ok(())
}
