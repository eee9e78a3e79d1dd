use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::fixtures::CompiledFixture;
use crate::runner::{FixtureRecord, FixtureState, RunReport};

pub fn announce(fixture: &CompiledFixture) {
    println!("[RUN ] #{} {}", fixture.number, fixture.fixture.name);
    println!("       {}", fixture.command_line);
}

pub fn suggestion(command: &str) {
    println!("       suggested: {command}");
}

pub fn outcome(record: &FixtureRecord) {
    let error = record.error.as_deref().unwrap_or_default();
    match record.state {
        FixtureState::Matched => println!(
            "[PASS] #{} {}: {}",
            record.number,
            record.name,
            record.matched.as_deref().unwrap_or_default()
        ),
        _ if record.skipped => println!("[SKIP] #{} {}: {error}", record.number, record.name),
        _ => println!("[FAIL] #{} {}: {error}", record.number, record.name),
    }
}

pub fn summary(report: &RunReport, total: usize, filtered: bool) {
    println!(
        "\n{}/{total} fixtures executed{}.",
        report.records.len(),
        if filtered { " (filtered)" } else { "" }
    );
    println!("Successful: {}", report.tally.successful);
    println!("Failed: {}", report.tally.failed);
}

pub fn write_json(report: &RunReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("serializing run report")?;
    fs::write(path, json).with_context(|| format!("writing report to {}", path.display()))
}
