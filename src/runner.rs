use std::collections::{HashMap, HashSet};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::exec::{ExecError, Executor};
use crate::fixtures::{self, CompiledFixture};
use crate::report;

/// Lifecycle of one fixture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FixtureState {
    Pending,
    PrimaryRun,
    SuggestionExtracted,
    FollowupRun,
    Matched,
    Failed,
}

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("no suggested command in output:\n{output}")]
    SuggestionNotFound { output: String },
    #[error("output does not match /{pattern}/:\n{output}")]
    NoMatch { pattern: String, output: String },
    #[error("{0}")]
    PreconditionUnmet(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct FixtureRecord {
    pub number: usize,
    pub name: String,
    pub command: String,
    pub suggested: Option<String>,
    pub state: FixtureState,
    pub matched: Option<String>,
    pub error: Option<String>,
    /// Not executed because an earlier fixture it depends on failed.
    pub skipped: bool,
    pub elapsed_ms: u64,
}

impl FixtureRecord {
    fn pending(fixture: &CompiledFixture) -> Self {
        Self {
            number: fixture.number,
            name: fixture.fixture.name.clone(),
            command: fixture.command_line.clone(),
            suggested: None,
            state: FixtureState::Pending,
            matched: None,
            error: None,
            skipped: false,
            elapsed_ms: 0,
        }
    }

    fn advance(&mut self, to: FixtureState) {
        debug!(fixture = self.number, from = ?self.state, to = ?to, "state");
        self.state = to;
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub successful: usize,
    pub failed: usize,
}

/// Everything a run produced, in fixture order.
#[derive(Debug, Default, Serialize)]
pub struct RunReport {
    pub tag: String,
    pub tally: Tally,
    pub records: Vec<FixtureRecord>,
}

impl RunReport {
    fn push(&mut self, record: FixtureRecord) {
        match record.state {
            FixtureState::Matched => self.tally.successful += 1,
            _ => self.tally.failed += 1,
        }
        self.records.push(record);
    }
}

/// Tracks which declared accounts exist so far.
struct AccountLedger {
    providers: HashMap<String, usize>,
    available: HashSet<String>,
    finished: HashSet<usize>,
}

impl AccountLedger {
    fn new(fixtures: &[CompiledFixture]) -> Self {
        Self {
            providers: fixtures::providers(fixtures.iter().map(|f| (f.number, &f.fixture))),
            available: HashSet::new(),
            finished: HashSet::new(),
        }
    }

    /// Diagnosis for the first required account that is missing.
    fn unmet(&self, fixture: &CompiledFixture) -> Option<String> {
        fixture.fixture.requires.iter().find_map(|account| {
            if self.available.contains(account) {
                return None;
            }
            // accounts nobody in the table creates are assumed to exist
            let provider = *self.providers.get(account)?;
            let fate = if self.finished.contains(&provider) {
                "failed"
            } else {
                "did not run"
            };
            Some(format!(
                "fixture {} requires account <{account}> from fixture {provider}, which {fate}",
                fixture.number
            ))
        })
    }

    fn settle(&mut self, fixture: &CompiledFixture, matched: bool) {
        self.finished.insert(fixture.number);
        if matched {
            self.available.extend(fixture.fixture.provides.iter().cloned());
        }
    }
}

/// Walks the fixture table strictly in order, one fixture at a time.
pub struct Runner {
    executor: Executor,
    settle: Duration,
    skip_unmet: bool,
}

impl Runner {
    pub fn new(executor: Executor) -> Self {
        Self {
            executor,
            settle: Duration::from_secs(2),
            skip_unmet: false,
        }
    }

    /// Delay before the follow-up of fixtures waiting for the next block.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn skip_unmet(mut self, skip: bool) -> Self {
        self.skip_unmet = skip;
        self
    }

    /// Runs every fixture whose name contains `filter`. A failing fixture is
    /// recorded and the run moves on.
    pub fn run(&self, fixtures: &[CompiledFixture], filter: Option<&str>) -> RunReport {
        let mut report = RunReport::default();
        let mut ledger = AccountLedger::new(fixtures);
        for fixture in fixtures {
            if let Some(filter) = filter {
                if !fixture.fixture.name.contains(filter) {
                    continue;
                }
            }
            report::announce(fixture);
            let record = self.run_fixture(fixture, &mut ledger);
            report::outcome(&record);
            report.push(record);
        }
        report
    }

    fn run_fixture(&self, fixture: &CompiledFixture, ledger: &mut AccountLedger) -> FixtureRecord {
        let started = Instant::now();
        let mut record = FixtureRecord::pending(fixture);
        let unmet = ledger.unmet(fixture);

        let result = match &unmet {
            Some(diagnosis) if self.skip_unmet => {
                record.skipped = true;
                Err(FixtureError::PreconditionUnmet(diagnosis.clone()))
            }
            _ => {
                if let Some(diagnosis) = &unmet {
                    warn!("{diagnosis}; running anyway");
                }
                self.drive(fixture, &mut record)
            }
        };

        match result {
            Ok(matched) => {
                record.advance(FixtureState::Matched);
                record.matched = Some(matched);
            }
            Err(err) => {
                record.advance(FixtureState::Failed);
                record.error = Some(match (&err, &unmet) {
                    (FixtureError::PreconditionUnmet(_), _) | (_, None) => describe(&err),
                    (_, Some(diagnosis)) => {
                        format!("{}\n(likely cause: {diagnosis})", describe(&err))
                    }
                });
            }
        }
        ledger.settle(fixture, record.state == FixtureState::Matched);
        record.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        record
    }

    fn drive(
        &self,
        fixture: &CompiledFixture,
        record: &mut FixtureRecord,
    ) -> Result<String, FixtureError> {
        record.advance(FixtureState::PrimaryRun);
        let primary = self.executor.run(&fixture.command_line)?;
        let primary_text = primary.combined();

        // a successful command already did its work; never send it twice
        if !primary.failed() {
            return fixture
                .expected
                .find(&primary_text)
                .ok_or_else(|| FixtureError::NoMatch {
                    pattern: fixture.expected.as_str().to_string(),
                    output: excerpt(&primary_text),
                });
        }

        // the indent marks the suggestion, so it must survive until extraction
        let Some(suggested) = fixture.extractor.extract(&primary.unstyled()) else {
            // validation errors stop the CLI before it builds a transaction
            debug!(fixture = fixture.number, "no suggestion, matching primary output");
            return fixture
                .expected
                .find(&primary_text)
                .ok_or_else(|| FixtureError::SuggestionNotFound {
                    output: excerpt(&primary_text),
                });
        };
        record.advance(FixtureState::SuggestionExtracted);
        report::suggestion(&suggested);
        record.suggested = Some(suggested.clone());

        if fixture.fixture.wait_for_next_block {
            let delay = fixture
                .fixture
                .settle_ms
                .map(Duration::from_millis)
                .unwrap_or(self.settle);
            debug!(fixture = fixture.number, ?delay, "waiting for the next block");
            thread::sleep(delay);
        }

        record.advance(FixtureState::FollowupRun);
        let followup = self.executor.run(&suggested)?;
        if followup.failed() {
            debug!(
                fixture = fixture.number,
                command = %followup.command,
                status = ?followup.status,
                "follow-up failed, matching its error output"
            );
        }
        let followup_text = followup.combined();
        fixture
            .expected
            .find(&followup_text)
            .ok_or_else(|| FixtureError::NoMatch {
                pattern: fixture.expected.as_str().to_string(),
                output: excerpt(&followup_text),
            })
    }
}

const EXCERPT_LINES: usize = 12;

fn describe(err: &FixtureError) -> String {
    match err {
        FixtureError::Exec(ExecError::Timeout { partial, .. }) => {
            let tail = excerpt(&partial.combined());
            if tail.is_empty() {
                err.to_string()
            } else {
                format!("{err}, last output:\n{tail}")
            }
        }
        _ => err.to_string(),
    }
}

/// Last lines of the output, enough to see the CLI's error.
fn excerpt(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(EXCERPT_LINES);
    lines[start..]
        .iter()
        .map(|line| format!("    {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{compile, literal, Fixture};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    // Mimics the wallet CLI: previews exit non-zero and print the command to
    // run next, indented by four spaces and coloured.
    const FAKE_CLI: &str = r#"#!/bin/sh
case "$1" in
  create-account)
    case "$*" in
      *"--networkId mainnet"*)
        echo "Error: The <mainnet> network does not have a faucet" >&2
        exit 1 ;;
      *--useFaucet*)
        echo "New account <$2> created successfully."
        exit 0 ;;
      *--accountId*)
        if [ ${#2} -gt 64 ]; then
          echo "Error: the Account ID is too long" >&2
          exit 1
        fi
        printf 'Here is your console command if you need to script it or re-run:\n    \033[33m%s testnet create\033[0m\n' "$0" >&2
        printf 'Here is your console command if you need to script it or re-run:\n    \033[33m%s testnet sign-with-legacy-keychain send\033[0m\n' "$0" >&2
        exit 1 ;;
    esac ;;
  delete-account)
    printf 'Here is your console command if you need to script it or re-run:\n    %s testnet delete\n' "$0" >&2
    exit 1 ;;
  add-key)
    printf '    %s testnet add\n' "$0" >&2
    exit 1 ;;
  send-near)
    echo run >> "${0%/*}/send-near.count"
    echo "<x.testnet> has transferred 5 NEAR to <y.testnet> successfully."
    printf 'Here is your console command if you need to script it or re-run:\n    %s send-near x.testnet y.testnet 5\n' "$0" >&2
    exit 0 ;;
  testnet)
    case "$2" in
      create)
        echo "Error: unsigned transaction" >&2
        exit 1 ;;
      delete)
        echo "Error: Access key file for account <a.testnet> on network <testnet> not found!" >&2
        exit 1 ;;
      add)
        echo "Added access key to <a.testnet>."
        exit 0 ;;
    esac
    echo "New account <sub.x.testnet> has been successfully created."
    exit 0 ;;
  hang)
    sleep 30 ;;
esac
echo "unknown command: $*" >&2
exit 2
"#;

    struct FakeCli {
        _dir: TempDir,
        binary: String,
    }

    fn fake_cli() -> FakeCli {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet");
        fs::write(&path, FAKE_CLI).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        FakeCli {
            binary: path.to_str().unwrap().to_string(),
            _dir: dir,
        }
    }

    fn runner() -> Runner {
        Runner::new(Executor::new(Duration::from_secs(10))).with_settle(Duration::from_millis(1))
    }

    fn run(cli: &FakeCli, table: Vec<Fixture>) -> RunReport {
        let compiled = compile(table, &cli.binary).unwrap();
        runner().run(&compiled, None)
    }

    fn funded_subaccount() -> Fixture {
        Fixture::new(
            "funded subaccount",
            "create-account sub.x.testnet --accountId x.testnet --initialBalance 0.1",
            literal("New account <sub.x.testnet> has been successfully created."),
        )
        .suggestion("sign-with-legacy-keychain send$")
    }

    #[test]
    fn successful_primary_matches_directly() {
        let cli = fake_cli();
        let report = run(
            &cli,
            vec![Fixture::new(
                "faucet",
                "create-account foo.testnet --useFaucet",
                literal("New account <foo.testnet> created successfully."),
            )],
        );
        let record = &report.records[0];
        assert_eq!(record.state, FixtureState::Matched);
        assert_eq!(record.suggested, None);
        assert_eq!(
            record.matched.as_deref(),
            Some("New account <foo.testnet> created successfully.")
        );
    }

    #[test]
    fn follows_the_suggested_command() {
        let cli = fake_cli();
        let report = run(&cli, vec![funded_subaccount()]);
        let record = &report.records[0];
        assert_eq!(record.state, FixtureState::Matched, "{:?}", record.error);
        assert_eq!(
            record.suggested.as_deref(),
            Some(format!("{} testnet sign-with-legacy-keychain send", cli.binary).as_str())
        );
    }

    #[test]
    fn first_suggestion_is_used_without_fragment() {
        let cli = fake_cli();
        let mut fixture = funded_subaccount();
        fixture.suggestion = None;
        let report = run(&cli, vec![fixture]);
        let record = &report.records[0];
        assert_eq!(record.state, FixtureState::Failed);
        assert!(record.suggested.as_deref().unwrap().ends_with("testnet create"));
        assert!(record.error.as_deref().unwrap().contains("does not match"));
    }

    #[test]
    fn validation_error_matches_primary_output() {
        let cli = fake_cli();
        let report = run(
            &cli,
            vec![Fixture::new(
                "too long",
                format!("create-account {} --accountId x.testnet", "x".repeat(65)),
                literal("the Account ID is too long"),
            )],
        );
        assert_eq!(report.records[0].state, FixtureState::Matched);
        assert_eq!(report.records[0].suggested, None);
    }

    #[test]
    fn mainnet_faucet_error_matches_primary_output() {
        let cli = fake_cli();
        let report = run(
            &cli,
            vec![Fixture::new(
                "mainnet faucet",
                "create-account foo.testnet --useFaucet --networkId mainnet",
                literal("The <mainnet> network does not have a faucet"),
            )],
        );
        assert_eq!(report.records[0].state, FixtureState::Matched);
    }

    #[test]
    fn successful_primary_is_never_run_twice() {
        let cli = fake_cli();
        let report = run(
            &cli,
            vec![Fixture::new(
                "transfer",
                "send-near x.testnet y.testnet 5",
                literal("Transaction failed"),
            )],
        );
        let record = &report.records[0];
        assert_eq!(record.state, FixtureState::Failed);
        assert_eq!(record.suggested, None);
        assert!(record.error.as_deref().unwrap().contains("does not match"));
        let runs = fs::read_to_string(Path::new(&cli.binary).with_file_name("send-near.count"))
            .unwrap();
        assert_eq!(runs.lines().count(), 1);
    }

    #[test]
    fn suggestion_on_the_first_output_line_is_found() {
        let cli = fake_cli();
        let report = run(
            &cli,
            vec![Fixture::new(
                "add key",
                "add-key a.testnet",
                literal("Added access key to <a.testnet>."),
            )],
        );
        let record = &report.records[0];
        assert_eq!(record.state, FixtureState::Matched, "{:?}", record.error);
        assert_eq!(
            record.suggested.as_deref(),
            Some(format!("{} testnet add", cli.binary).as_str())
        );
    }

    #[test]
    fn failing_followup_can_still_match() {
        let cli = fake_cli();
        let report = run(
            &cli,
            vec![Fixture::new(
                "delete without key",
                "delete-account a.testnet b.testnet",
                literal("Access key file for account <a.testnet> on network <testnet> not found!"),
            )],
        );
        let record = &report.records[0];
        assert_eq!(record.state, FixtureState::Matched, "{:?}", record.error);
        assert_eq!(
            record.suggested.as_deref(),
            Some(format!("{} testnet delete", cli.binary).as_str())
        );
    }

    #[test]
    fn missing_suggestion_fails_the_fixture() {
        let cli = fake_cli();
        let report = run(
            &cli,
            vec![Fixture::new("unknown", "frobnicate", literal("created"))],
        );
        let record = &report.records[0];
        assert_eq!(record.state, FixtureState::Failed);
        assert!(record
            .error
            .as_deref()
            .unwrap()
            .starts_with("no suggested command"));
    }

    #[test]
    fn tally_covers_every_fixture_in_order() {
        let cli = fake_cli();
        let report = run(
            &cli,
            vec![
                Fixture::new("a", "create-account a.testnet --useFaucet", "created successfully"),
                Fixture::new("b", "frobnicate", "never"),
                funded_subaccount(),
                Fixture::new("d", "create-account d.testnet --useFaucet", "has been deleted"),
            ],
        );
        assert_eq!(report.tally, Tally { successful: 2, failed: 2 });
        assert_eq!(
            report.tally.successful + report.tally.failed,
            report.records.len()
        );
        let numbers: Vec<_> = report.records.iter().map(|r| r.number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
    }

    #[test]
    fn hung_command_fails_only_its_fixture() {
        let cli = fake_cli();
        let compiled = compile(
            vec![
                Fixture::new("hang", "hang", "never"),
                Fixture::new("after", "create-account a.testnet --useFaucet", "created"),
            ],
            &cli.binary,
        )
        .unwrap();
        let report = Runner::new(Executor::new(Duration::from_millis(300))).run(&compiled, None);
        assert_eq!(report.records[0].state, FixtureState::Failed);
        assert!(report.records[0].error.as_deref().unwrap().contains("timed out"));
        assert_eq!(report.records[1].state, FixtureState::Matched);
    }

    #[test]
    fn unmet_precondition_skips_when_asked() {
        let cli = fake_cli();
        let table = vec![
            Fixture::new("create", "frobnicate a.testnet", "created").provides(&["a.testnet"]),
            Fixture::new("use", "create-account b.testnet --useFaucet", "created")
                .requires(&["a.testnet"]),
        ];
        let compiled = compile(table, &cli.binary).unwrap();

        let report = runner().skip_unmet(true).run(&compiled, None);
        let skipped = &report.records[1];
        assert!(skipped.skipped);
        assert_eq!(skipped.state, FixtureState::Failed);
        assert_eq!(
            skipped.error.as_deref(),
            Some("fixture 2 requires account <a.testnet> from fixture 1, which failed")
        );
        assert_eq!(report.tally, Tally { successful: 0, failed: 2 });

        // without skipping the fixture still runs
        let report = runner().run(&compiled, None);
        assert!(!report.records[1].skipped);
        assert_eq!(report.records[1].state, FixtureState::Matched);
    }

    #[test]
    fn filtered_out_provider_did_not_run() {
        let cli = fake_cli();
        let table = vec![
            Fixture::new("create", "create-account a.testnet --useFaucet", "created")
                .provides(&["a.testnet"]),
            Fixture::new("use a", "frobnicate", "never").requires(&["a.testnet"]),
        ];
        let compiled = compile(table, &cli.binary).unwrap();
        let report = runner().run(&compiled, Some("use"));
        assert_eq!(report.records.len(), 1);
        let error = report.records[0].error.as_deref().unwrap();
        assert!(error.contains("from fixture 1, which did not run"));
    }

    #[test]
    fn settle_override_is_honoured() {
        let cli = fake_cli();
        let mut fixture = funded_subaccount().wait_for_next_block();
        fixture.settle_ms = Some(1);
        let compiled = compile(vec![fixture], &cli.binary).unwrap();
        let started = Instant::now();
        let report = Runner::new(Executor::new(Duration::from_secs(10)))
            .with_settle(Duration::from_secs(60))
            .run(&compiled, None);
        assert!(started.elapsed() < Duration::from_secs(30));
        assert_eq!(report.records[0].state, FixtureState::Matched);
    }

    #[test]
    fn excerpt_keeps_the_tail() {
        let text: String = (1..=20).map(|i| format!("line {i}\n")).collect();
        let excerpt = excerpt(&text);
        assert!(excerpt.starts_with("    line 9"));
        assert!(excerpt.ends_with("line 20"));
    }
}
