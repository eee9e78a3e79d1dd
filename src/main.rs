mod exec;
mod fixtures;
mod matcher;
mod report;
mod runner;
mod suggest;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::exec::Executor;
use crate::fixtures::{CompiledFixture, Suite, SuiteContext};
use crate::runner::Runner;

#[derive(Parser, Debug)]
#[command(author, version, about = "wallet CLI integration harness", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    #[command(flatten)]
    tests: TestsArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the fixture table against the CLI (default)
    Tests(TestsArgs),
    /// Print the fixture table without executing anything
    List(TableArgs),
}

#[derive(Args, Debug, Clone)]
struct TableArgs {
    /// CLI under test, invoked exactly as written
    #[arg(long, env = "WALLET_CLI_BINARY", default_value = "./target/release/near")]
    binary: String,
    /// Built-in fixture suites to include
    #[arg(long = "suite", value_enum, default_values_t = [Suite::All])]
    suites: Vec<Suite>,
    /// Extra fixture tables (JSON), appended after the built-in suites
    #[arg(long = "fixtures", value_name = "FILE")]
    fixture_files: Vec<PathBuf>,
    /// Directory holding the contract wasm files
    #[arg(long, default_value = "./integration_tests/res")]
    res_dir: PathBuf,
}

#[derive(Args, Debug, Clone)]
struct TestsArgs {
    #[command(flatten)]
    table: TableArgs,
    /// Only run fixtures whose name contains this filter
    #[arg(short, long)]
    filter: Option<String>,
    /// Per-command time limit
    #[arg(long, value_name = "SECS", default_value_t = 120)]
    timeout: u64,
    /// Delay before follow-ups that wait for the next block
    #[arg(long, value_name = "MS", default_value_t = 2000)]
    settle_ms: u64,
    /// Extra environment for the CLI
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    env: Vec<(String, String)>,
    /// Do not execute fixtures whose required accounts were never created
    #[arg(long, default_value_t = false)]
    skip_unmet: bool,
    /// Write a JSON report of every fixture here
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
    /// Print per-command diagnostics
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Tests(cli.tests));

    match command {
        Commands::Tests(args) => {
            init_tracing(args.verbose);
            run_tests(args)
        }
        Commands::List(args) => {
            init_tracing(false);
            list_fixtures(args)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}

// --------------------- Fixture table ---------------------------------------
fn load_table(args: &TableArgs) -> Result<(SuiteContext, Vec<CompiledFixture>)> {
    let ctx = SuiteContext::new(SuiteContext::generate_tag(), args.res_dir.clone());
    let mut table = fixtures::builtin(&args.suites, &ctx);
    for path in &args.fixture_files {
        table.extend(fixtures::load_file(path, &ctx)?);
    }
    let compiled = fixtures::compile(table, &args.binary)?;
    Ok((ctx, compiled))
}

fn list_fixtures(args: TableArgs) -> Result<()> {
    let (ctx, table) = load_table(&args)?;
    println!("run tag {}", ctx.tag);
    for fixture in &table {
        println!("#{:<3} {}", fixture.number, fixture.fixture.name);
        println!("       run:    {}", fixture.command_line);
        println!("       expect: /{}/", fixture.expected.as_str());
        if let Some(fragment) = &fixture.fixture.suggestion {
            println!("       follow: /{fragment}/");
        }
        if !fixture.fixture.requires.is_empty() {
            println!("       needs:  {}", fixture.fixture.requires.join(", "));
        }
        if !fixture.fixture.provides.is_empty() {
            println!("       makes:  {}", fixture.fixture.provides.join(", "));
        }
    }
    println!("\n{} fixtures.", table.len());
    Ok(())
}

// --------------------- Test runner -----------------------------------------
fn run_tests(args: TestsArgs) -> Result<()> {
    let (ctx, table) = load_table(&args.table)?;
    preflight(&args.table, &table);

    let executor = Executor::new(Duration::from_secs(args.timeout)).with_env(args.env);
    let runner = Runner::new(executor)
        .with_settle(Duration::from_millis(args.settle_ms))
        .skip_unmet(args.skip_unmet);
    let mut report = runner.run(&table, args.filter.as_deref());
    report.tag = ctx.tag;

    report::summary(&report, table.len(), args.filter.is_some());
    if let Some(path) = &args.report {
        report::write_json(&report, path)?;
    }
    if report.tally.failed > 0 {
        bail!("{} fixture(s) failed", report.tally.failed);
    }
    Ok(())
}

/// Problems here surface as failed fixtures anyway; warn early so the cause is obvious.
fn preflight(args: &TableArgs, table: &[CompiledFixture]) {
    if let Err(err) = exec::locate_binary(&args.binary) {
        warn!("{err:#}");
    }
    let res = args.res_dir.display().to_string();
    let needs_res = table.iter().any(|f| f.fixture.command.contains(&res));
    if needs_res && !args.res_dir.is_dir() {
        warn!("contract resources directory {res} is missing");
    }
}
