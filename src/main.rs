use anyhow::{Context, Result};
use arnscan::aws::AwsClient;
use arnscan::config::{Config, LoadedConfig, LoggingConfig};
use arnscan::output::{self, OutputFormat};
use arnscan::resource::CollectorRegistry;
use arnscan::scan::{RegionSelection, ScanError, ScanRequest, Scanner};
use arnscan::VERSION;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Discover the ARN of every resource an AWS account owns
#[derive(Parser, Debug)]
#[command(name = "arnscan", version = VERSION, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    scan: ScanArgs,

    /// Configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan the account (default)
    Scan(ScanArgs),
    /// List the services that can be scanned
    Services,
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Print the version
    Version,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write the default configuration
    Create {
        /// Where to write it (defaults to the user config directory)
        #[arg(long)]
        path: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
}

#[derive(Args, Debug, Default, Clone)]
struct ScanArgs {
    /// Services to scan in addition to the configured defaults
    #[arg(short, long, num_args = 1.., value_delimiter = ',')]
    services: Vec<String>,

    /// Regions to scan ("all" for every enabled region)
    #[arg(short, long, num_args = 1.., value_delimiter = ',')]
    region: Vec<String>,

    /// Output file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum)]
    format: Option<OutputFormat>,

    /// Scan only the listed services
    #[arg(long)]
    only: bool,
}

fn setup_logging(
    logging: &LoggingConfig,
    verbose: bool,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let level = if verbose { "debug" } else { logging.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let stderr = fmt::layer().with_writer(std::io::stderr).with_target(false);
    layers.push(if logging.structured {
        stderr.json().boxed()
    } else {
        stderr.boxed()
    });

    let mut guard = None;
    if let Some(log_path) = &logging.log_file {
        if let Some(parent) = log_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .with_context(|| format!("Failed to open log file {}", log_path.display()))?;
        let (non_blocking, file_guard) = tracing_appender::non_blocking(file);
        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_file(true)
            .with_line_number(true);
        layers.push(if logging.structured {
            file_layer.json().boxed()
        } else {
            file_layer.boxed()
        });
        guard = Some(file_guard);
    }

    tracing_subscriber::registry().with(layers).with(filter).init();
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = Config::load(cli.config.as_deref())?;
    let _log_guard = setup_logging(&loaded.config.logging, cli.verbose)?;
    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }
    if let Some(source) = &loaded.source {
        tracing::debug!("Using configuration from {}", source.display());
    }

    match cli.command {
        None => run_scan(&loaded.config, &cli.scan).await,
        Some(Command::Scan(args)) => run_scan(&loaded.config, &args).await,
        Some(Command::Services) => {
            list_services(&loaded.config);
            Ok(())
        }
        Some(Command::Config { action }) => run_config(action, &loaded),
        Some(Command::Version) => {
            println!("arnscan {}", VERSION);
            Ok(())
        }
    }
}

fn list_services(config: &Config) {
    let collectors = CollectorRegistry::builtin();
    for service in collectors.service_names() {
        let global = config.aws.global_services.iter().any(|g| g == service);
        if global {
            println!("{} (global)", service);
        } else {
            println!("{}", service);
        }
    }
}

fn run_config(action: ConfigAction, loaded: &LoadedConfig) -> Result<()> {
    match action {
        ConfigAction::Create { path, force } => {
            let path = path
                .or_else(Config::default_path)
                .context("Could not determine a config directory; pass --path")?;
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            Config::default().save(&path)?;
            println!("Wrote default configuration to {}", path.display());
        }
        ConfigAction::Show => {
            match &loaded.source {
                Some(source) => eprintln!("# {}", source.display()),
                None => eprintln!("# built-in defaults"),
            }
            println!("{}", serde_json::to_string_pretty(&loaded.config)?);
        }
    }
    Ok(())
}

async fn run_scan(config: &Config, args: &ScanArgs) -> Result<()> {
    let services = config.services(&args.services, args.only);
    if services.is_empty() {
        anyhow::bail!("No services to scan");
    }
    let regions = if args.region.is_empty() || args.region.iter().any(|r| r == "all") {
        RegionSelection::All
    } else {
        RegionSelection::Only(args.region.clone())
    };

    let format = args.format.unwrap_or(config.output.output_format);
    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| output::default_output_path(&config.output.default_output_file, format));

    let client = AwsClient::from_env(
        config.aws.profile.as_deref(),
        config.aws.endpoint_url.clone(),
    )?;
    let scanner = Scanner::new(Arc::new(client), config.scan_settings());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, finishing running tasks...");
            on_signal.cancel();
        }
    });

    let request = ScanRequest { services, regions };
    let outcome = match scanner.scan(&request, cancel).await {
        Ok(outcome) => outcome,
        Err(ScanError::Authentication {
            service,
            region,
            source,
            partial,
        }) => {
            save(&output_path, &partial.arns, format, config.output.pretty_print)?;
            print!("{}", output::summary(&partial));
            anyhow::bail!(
                "Authentication failed for {} in {}: {} (partial results written to {})",
                service,
                region,
                source,
                output_path.display()
            );
        }
        Err(e) => return Err(e.into()),
    };

    save(&output_path, &outcome.arns, format, config.output.pretty_print)?;
    print!("{}", output::summary(&outcome));
    println!("Results written to {}", output_path.display());
    Ok(())
}

fn save(
    path: &Path,
    arns: &std::collections::BTreeSet<String>,
    format: OutputFormat,
    pretty: bool,
) -> Result<()> {
    output::write_output(path, arns, format, pretty)?;
    tracing::info!("Wrote {} ARNs to {}", arns.len(), path.display());
    Ok(())
}
