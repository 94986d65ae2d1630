//! status-attest CLI
//!
//! Entry point for the `status-attest` command-line tool.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use chrono::Duration;
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use status_attest::config::{host_config_path, ConfigFileError, EffectiveConfig};
use status_attest::identity::SIGNING_AUDIENCE;
use status_attest::local::{LocalDomain, LocalDomainError, DEFAULT_TOKEN_TTL_SECONDS};
use status_attest::signal::{self, EXIT_CODE_CANCELLED};
use status_attest::{ConfigError, Context, Manager, Status, StatusError, Subject};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Exit code for runtime failures
const EXIT_CODE_FAILURE: i32 = 1;

/// Exit code for configuration errors
const EXIT_CODE_CONFIG: i32 = 2;

#[derive(Parser)]
#[command(name = "status-attest")]
#[command(about = "Reconciliation status as signed, transparency-logged attestations", version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Config file layered over ~/.config/status-attest/config.toml
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Local trust domain supplying any endpoint not set explicitly
    #[arg(long, global = true)]
    domain: Option<PathBuf>,

    #[arg(long, global = true)]
    ca_url: Option<String>,

    #[arg(long, global = true)]
    log_url: Option<String>,

    #[arg(long, global = true)]
    registry_url: Option<String>,

    /// Store attestations in this repository instead of the subject's
    #[arg(long, global = true)]
    repository_override: Option<String>,

    /// Read the identity token from this file instead of the environment
    #[arg(long, global = true)]
    token_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a local trust domain (authority, log, registry)
    Init {
        #[arg(long)]
        dir: PathBuf,
    },

    /// Mint an identity token from a local trust domain's issuer
    Token {
        #[arg(long)]
        dir: PathBuf,

        /// Token subject (becomes the signer identity)
        #[arg(long)]
        subject: String,

        #[arg(long, default_value = SIGNING_AUDIENCE)]
        audience: String,

        #[arg(long, default_value_t = DEFAULT_TOKEN_TTL_SECONDS)]
        ttl_seconds: i64,
    },

    /// Sign and publish a status for a subject
    Publish {
        /// Reconciler identity
        #[arg(long)]
        identity: String,

        /// Subject reference (repository@sha256:hex)
        #[arg(long)]
        subject: String,

        /// Status details as JSON, or @path to read them from a file
        #[arg(long)]
        details: String,
    },

    /// Print the latest trusted status for a subject
    Observe {
        /// Reconciler identity
        #[arg(long)]
        identity: String,

        /// Subject reference (repository@sha256:hex)
        #[arg(long)]
        subject: String,

        /// Do not obtain a signing identity; requires --expected-subject/--expected-issuer
        #[arg(long)]
        read_only: bool,

        #[arg(long, requires = "expected_issuer")]
        expected_subject: Option<String>,

        #[arg(long, requires = "expected_subject")]
        expected_issuer: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration with provenance
    Config,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Runtime(String),

    #[error("cancelled")]
    Cancelled,
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) => EXIT_CODE_CONFIG,
            CliError::Runtime(_) => EXIT_CODE_FAILURE,
            CliError::Cancelled => EXIT_CODE_CANCELLED,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Cancelled => CliError::Cancelled,
            err => CliError::Config(err.to_string()),
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(err: ConfigFileError) -> Self {
        CliError::Config(err.to_string())
    }
}

impl From<StatusError> for CliError {
    fn from(err: StatusError) -> Self {
        match err {
            StatusError::Cancelled => CliError::Cancelled,
            err => CliError::Runtime(err.to_string()),
        }
    }
}

impl From<LocalDomainError> for CliError {
    fn from(err: LocalDomainError) -> Self {
        CliError::Runtime(err.to_string())
    }
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let ctx = Context::background();
    if let Err(e) = signal::install(&ctx) {
        tracing::warn!(error = %e, "could not install interrupt handler");
    }

    let result = match cli.command {
        Commands::Init { dir } => run_init(&dir),
        Commands::Token {
            dir,
            subject,
            audience,
            ttl_seconds,
        } => run_token(&dir, &subject, &audience, ttl_seconds),
        Commands::Publish {
            identity,
            subject,
            details,
        } => run_publish(&ctx, &cli.global, &identity, &subject, &details),
        Commands::Observe {
            identity,
            subject,
            read_only,
            expected_subject,
            expected_issuer,
            json,
        } => {
            let expected = expected_subject.zip(expected_issuer);
            run_observe(&ctx, &cli.global, &identity, &subject, read_only, expected, json)
        }
        Commands::Config => run_config(&cli.global),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(e.exit_code());
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run_init(dir: &Path) -> Result<(), CliError> {
    let domain = LocalDomain::init(dir)?;
    println!("Initialized trust domain: {}", domain.root().display());
    println!("  CA:       {}", domain.ca_url());
    println!("  Log:      {}", domain.log_url());
    println!("  Registry: {}", domain.registry_url());
    Ok(())
}

fn run_token(dir: &Path, subject: &str, audience: &str, ttl_seconds: i64) -> Result<(), CliError> {
    if ttl_seconds <= 0 {
        return Err(CliError::Config("--ttl-seconds must be positive".to_string()));
    }
    let authority = LocalDomain::at(dir)
        .authority()
        .map_err(|e| CliError::Runtime(e.to_string()))?;
    let token = authority
        .issuer()
        .mint(subject, audience, Duration::seconds(ttl_seconds))
        .map_err(|e| CliError::Runtime(e.to_string()))?;
    println!("{}", token);
    Ok(())
}

fn cli_overrides(global: &GlobalArgs, expected: Option<(String, String)>) -> Value {
    let mut overrides = serde_json::Map::new();
    if let Some(domain) = &global.domain {
        overrides.insert("domain".to_string(), json!(domain));
    }
    for (key, value) in [
        ("ca_url", &global.ca_url),
        ("log_url", &global.log_url),
        ("registry_url", &global.registry_url),
        ("repository_override", &global.repository_override),
    ] {
        if let Some(value) = value {
            overrides.insert(key.to_string(), json!(value));
        }
    }
    if let Some(path) = &global.token_file {
        overrides.insert("identity".to_string(), json!({ "token_file": path }));
    }
    if let Some((subject, issuer)) = expected {
        overrides.insert(
            "expected_identity".to_string(),
            json!({ "subject": subject, "issuer": issuer }),
        );
    }
    Value::Object(overrides)
}

fn load_config(
    global: &GlobalArgs,
    expected: Option<(String, String)>,
) -> Result<EffectiveConfig, CliError> {
    let host = host_config_path();
    Ok(EffectiveConfig::build(
        host.as_deref(),
        global.config.as_deref(),
        Some(cli_overrides(global, expected)),
    )?)
}

fn parse_subject(reference: &str) -> Result<Subject, CliError> {
    reference
        .parse()
        .map_err(|e| CliError::Config(format!("invalid subject {:?}: {}", reference, e)))
}

fn read_details(arg: &str) -> Result<Value, CliError> {
    let text = match arg.strip_prefix('@') {
        Some(path) => fs::read_to_string(path)
            .map_err(|e| CliError::Config(format!("reading {}: {}", path, e)))?,
        None => arg.to_string(),
    };
    serde_json::from_str(&text).map_err(|e| CliError::Config(format!("invalid details JSON: {}", e)))
}

fn run_publish(
    ctx: &Context,
    global: &GlobalArgs,
    identity: &str,
    subject: &str,
    details: &str,
) -> Result<(), CliError> {
    let subject = parse_subject(subject)?;
    let details = read_details(details)?;
    let config = load_config(global, None)?;

    let manager = Manager::<Value>::new(ctx, identity, config.settings.to_options())?;
    let session = manager.new_session(subject);
    session.set_actual_state(ctx, &Status::new(details))?;

    println!("Published status for {} at {}", session.subject(), session.location());
    Ok(())
}

fn run_observe(
    ctx: &Context,
    global: &GlobalArgs,
    identity: &str,
    subject: &str,
    read_only: bool,
    expected: Option<(String, String)>,
    json_output: bool,
) -> Result<(), CliError> {
    let subject = parse_subject(subject)?;
    let config = load_config(global, expected)?;
    let options = config.settings.to_options();

    let manager = if read_only {
        Manager::<Value>::new_read_only(ctx, identity, options)?
    } else {
        Manager::<Value>::new(ctx, identity, options)?
    };
    let status = manager.new_session(subject.clone()).observed_state(ctx)?;

    if json_output {
        let output = serde_json::to_string_pretty(&status)
            .map_err(|e| CliError::Runtime(format!("serializing output: {}", e)))?;
        println!("{}", output);
        return Ok(());
    }

    match status {
        Some(status) => {
            println!("Subject: {}", subject);
            println!("  Signed by: {}", manager.expected_identity());
            println!("  Observed generation: {}", status.observed_generation);
            println!("  Details: {}", status.details);
        }
        None => println!("No trusted status for {}", subject),
    }
    Ok(())
}

fn run_config(global: &GlobalArgs) -> Result<(), CliError> {
    let config = load_config(global, None)?;
    let output = config
        .to_json()
        .map_err(|e| CliError::Runtime(format!("serializing output: {}", e)))?;
    println!("{}", output);
    Ok(())
}
