use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use webin_loader::app::{App, RunOptions};
use webin_loader::config::{ConfigLoader, Credentials};
use webin_loader::domain::{Environment, HoldDate};
use webin_loader::error::LoaderError;
use webin_loader::output::{JsonOutput, LogProgress};
use webin_loader::store::WorkDir;
use webin_loader::submission::{SubmissionParams, WebinHttpClient};
use webin_loader::webin::{DEFAULT_PROGRAM, ResourceLimits, WebinCli};

const EXIT_ARTIFACT_FAILURES: u8 = 4;

#[derive(Parser)]
#[command(name = "webin-loader")]
#[command(about = "Register metagenome assemblies with ENA and submit them through webin-cli")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Register the study and samples, then validate and submit all assemblies")]
    Run(RunArgs),
    #[command(about = "Move the hold date of held objects (release)")]
    Release(ReleaseArgs),
}

#[derive(Args)]
struct ConnectionArgs {
    /// File containing `user:password`; falls back to WEBIN_USERNAME / WEBIN_PASSWORD.
    #[arg(long)]
    credentials: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Environment::Dev)]
    environment: Environment,

    /// Registration request timeout in seconds.
    #[arg(long, default_value_t = 60)]
    timeout: u64,
}

#[derive(Args)]
struct RunArgs {
    study_json: PathBuf,

    #[command(flatten)]
    connection: ConnectionArgs,

    #[arg(long, short = 'w', default_value = "work")]
    workdir: PathBuf,

    /// YYYY-MM-DD until which registered objects stay private.
    #[arg(long)]
    hold_date: Option<String>,

    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Only process the first N assemblies.
    #[arg(long)]
    limit: Option<usize>,

    #[arg(long)]
    validate_only: bool,

    #[arg(long, default_value = DEFAULT_PROGRAM)]
    webin_cli: PathBuf,

    /// Passed to the JVM as -Xmx<VALUE>, e.g. 8g.
    #[arg(long)]
    java_max_heap: Option<String>,

    #[arg(long)]
    ascp: bool,
}

#[derive(Args)]
struct ReleaseArgs {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Release date, today when omitted.
    #[arg(long)]
    hold_date: Option<String>,

    /// Also write the receipt as JSON to this file.
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(error) = report.downcast_ref::<LoaderError>() {
                return ExitCode::from(map_exit_code(error));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &LoaderError) -> u8 {
    if error.is_configuration() {
        2
    } else if error.is_remote() {
        3
    } else {
        1
    }
}

fn run() -> miette::Result<u8> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_pipeline(args),
        Commands::Release(args) => run_release(args),
    }
}

fn parse_hold_date(value: Option<&str>) -> Result<Option<HoldDate>, LoaderError> {
    value.map(str::parse).transpose()
}

fn run_pipeline(args: RunArgs) -> miette::Result<u8> {
    let credentials = Credentials::resolve(args.connection.credentials.as_deref())?;
    let input = ConfigLoader::resolve(&args.study_json, args.limit)?;
    let params = SubmissionParams {
        hold_until: parse_hold_date(args.hold_date.as_deref())?,
        environment: args.connection.environment,
        timeout: Duration::from_secs(args.connection.timeout),
    };
    let options = RunOptions {
        params,
        workers: args.workers,
        limits: ResourceLimits {
            java_max_heap: args.java_max_heap,
            use_ascp: args.ascp,
        },
        validate_only: args.validate_only,
    };

    let workdir = WorkDir::from_std(&args.workdir)?;
    let transport = WebinHttpClient::new(credentials.clone())?;
    let tool = WebinCli::with_program(args.webin_cli, credentials);
    let app = App::new(workdir, transport, tool);

    let report = app.run(&input, &options, &LogProgress)?;
    JsonOutput::print_report(&report).into_diagnostic()?;
    if report.has_failures() {
        tracing::warn!(
            failed = report.failed,
            log = %report.failure_log,
            "some assemblies were not submitted"
        );
        return Ok(EXIT_ARTIFACT_FAILURES);
    }
    Ok(0)
}

fn run_release(args: ReleaseArgs) -> miette::Result<u8> {
    let credentials = Credentials::resolve(args.connection.credentials.as_deref())?;
    let hold_until = parse_hold_date(args.hold_date.as_deref())?.unwrap_or_else(HoldDate::today);
    let params = SubmissionParams {
        hold_until: Some(hold_until),
        environment: args.connection.environment,
        timeout: Duration::from_secs(args.connection.timeout),
    };

    let transport = WebinHttpClient::new(credentials.clone())?;
    let workdir = WorkDir::new(".");
    let app = App::new(workdir, transport, WebinCli::new(credentials));
    let result = app.release(&params)?;

    if let Some(path) = args.output {
        let json = JsonOutput::to_json(&result).into_diagnostic()?;
        std::fs::write(&path, json).into_diagnostic()?;
    }
    JsonOutput::print_receipt(&result).into_diagnostic()?;
    if result.is_accepted() { Ok(0) } else { Ok(3) }
}
