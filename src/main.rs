//! orgform CLI entrypoint.
//!
//! This is the main entrypoint for the orgform command-line tool.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use orgform::cli::{Cli, Commands, LogFormat, OutputFormat, OutputFormatter, StateCommands};
use orgform::config::{
    find_config_file, ConfigParser, ConfigValidator, OrganizationModel, Settings, StateBackend,
};
use orgform::error::{OrgFormError, Result};
use orgform::reconciler::Reconciler;
use orgform::state::{
    generate_holder_id, LocalStateStore, S3StateStore, StateStore, STATE_DIR,
};

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_format);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. `RUST_LOG` takes precedence.
fn init_logging(verbose: bool, format: LogFormat) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Validate { warnings } => {
            cmd_validate(cli.config.as_ref(), warnings, cli.output)
        }
        Commands::Plan { stack } => {
            cmd_plan(cli.config.as_ref(), stack.as_deref(), &formatter).await
        }
        Commands::State { command } => cmd_state(cli.config.as_ref(), command, &formatter).await,
    }
}

/// Validate settings and every template.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    format: OutputFormat,
) -> Result<()> {
    let config_file = resolve_config_path(config_path)?;
    info!("Validating configuration: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(config_dir(&config_file));
    parser.load_dotenv()?;
    let settings = parser.load_with_env(&config_file)?;

    let validator = ConfigValidator::new();
    let mut warnings = validator.validate_settings(&settings)?.warnings;

    let organization = parser.load_template(&settings.organization.template)?;
    warnings.extend(validator.validate_organization(&organization.template)?.warnings);
    let model = OrganizationModel::from_template(&organization.template);

    for stack in &settings.stacks {
        let template = parser.load_template(&stack.template)?.template;
        let result = validator.validate_stack_template(&stack.stack_name, &template, &model)?;
        warnings.extend(result.warnings);
    }

    if format == OutputFormat::Json {
        let report = serde_json::json!({
            "valid": true,
            "accounts": model.accounts.len(),
            "organizational_units": model.organizational_units.len(),
            "policies": model.policies.len(),
            "stacks": settings.stacks.len(),
            "warnings": warnings,
        });
        eprintln!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
        return Ok(());
    }

    eprintln!("Configuration is valid!");
    if show_warnings && !warnings.is_empty() {
        eprintln!("\nWarnings:");
        for warning in &warnings {
            eprintln!("  - {warning}");
        }
    }

    // Show summary
    eprintln!("\nConfiguration summary:");
    eprintln!(
        "  Master account: {}",
        model.master_account_id().unwrap_or("-")
    );
    eprintln!("  Accounts: {}", model.accounts.len());
    eprintln!("  Organizational units: {}", model.organizational_units.len());
    eprintln!("  Policies: {}", model.policies.len());
    eprintln!("  Stacks: {}", settings.stacks.len());

    Ok(())
}

/// Show the reconciliation plan.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    stack: Option<&str>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (settings, parser, state_store) = load_config_and_state(config_path).await?;

    let reconciler = Reconciler::new(&settings, &parser, &state_store);
    let plan = reconciler.plan(stack).await?;

    eprintln!("{}", formatter.format_plan(&plan));
    Ok(())
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (_settings, _parser, state_store) = load_config_and_state(config_path).await?;

    match command {
        StateCommands::Show => {
            if let Some(state) = state_store.load().await? {
                eprintln!("{}", formatter.format_state(&state));
            } else {
                eprintln!("No state found.");
            }
        }
        StateCommands::Lock { holder } => {
            let holder = holder.unwrap_or_else(generate_holder_id);
            let lock = state_store.acquire_lock(&holder).await?;
            eprintln!("{}", formatter.format_lock(&lock));
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                state_store.force_unlock().await?;
                eprintln!("State forcefully unlocked.");
            } else if let Some(id) = lock_id {
                state_store.release_lock(&id).await?;
                eprintln!("State unlocked.");
            } else {
                eprintln!("Please provide --lock-id or use --force");
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Directory the configuration file lives in.
fn config_dir(config_file: &Path) -> &Path {
    config_file.parent().unwrap_or_else(|| Path::new("."))
}

/// Loads settings and creates the configured state store.
async fn load_config_and_state(
    config_path: Option<&PathBuf>,
) -> Result<(Settings, ConfigParser, Box<dyn StateStore>)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading configuration from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(config_dir(&config_file));
    parser.load_dotenv()?;

    let settings = parser.load_with_env(&config_file)?;
    ConfigValidator::new().validate_settings(&settings)?;

    // Create state store based on settings
    let state_store: Box<dyn StateStore> = match settings.state.backend {
        StateBackend::Local => {
            let store = settings.state.path.as_ref().map_or_else(
                || LocalStateStore::with_base_dir(config_dir(&config_file).join(STATE_DIR)),
                |path| LocalStateStore::with_state_path(parser.resolve(path)),
            );
            Box::new(store)
        }
        StateBackend::S3 => {
            let bucket = settings
                .state
                .bucket
                .as_deref()
                .ok_or_else(|| OrgFormError::internal("S3 bucket not configured"))?;
            let prefix = settings.state.prefix.as_deref();
            let region = settings.state.region.as_deref();
            Box::new(S3StateStore::new(bucket, prefix, region).await?)
        }
    };

    Ok((settings, parser, state_store))
}
