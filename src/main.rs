//! ERP backup loader
//!
//! Finds the newest usable backup of each ERP instance in a remote archive
//! store and restores it atomically into the local PostgreSQL server.

// erpload/src/main.rs
mod archive;
mod catalog;
mod config;
mod engine;
mod errors;
mod restore;
mod store;
mod sync;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{
    AppConfig, CliOverrides, OperationConfig, load_clean_config_from_json,
    load_list_config_from_json, load_restore_config_from_json,
};
use errors::AppError;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use utils::progress::{ConsoleSink, MemorySink, ProgressSink, Reporter, TracingSink};

#[derive(Parser, Debug)]
#[command(name = "erpload")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the newest usable backup of each instance
    ListBackups {
        /// Instance name patterns (`%` and `*` are wildcards)
        #[arg(short = 'i', long = "instance")]
        instances: Vec<String>,
    },

    /// Restore instances from the archive store or from a local file
    Restore {
        #[arg(short = 'i', long = "instance")]
        instances: Vec<String>,

        /// Restore this local archive or dump instead of using the store
        #[arg(long)]
        file: Option<PathBuf>,

        /// Keep production settings (no sanitization)
        #[arg(long)]
        live: bool,

        /// Keep older databases of the restored instances
        #[arg(long)]
        no_clean: bool,

        /// Also load the sync server and link the restored instances to it
        #[arg(long)]
        load_sync_server: bool,

        /// Download archives completely before validating them
        #[arg(long)]
        local_staging: bool,

        /// Show what would be restored and dropped without changing anything
        #[arg(short = 'n', long)]
        dry_run: bool,
    },

    /// Drop all but the newest database of each instance
    CleanStaleDatabases {
        #[arg(short = 'i', long = "instance")]
        instances: Vec<String>,

        /// Only show what would be dropped
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
}

impl Command {
    fn overrides(&self) -> CliOverrides {
        match self {
            Command::ListBackups { instances } => CliOverrides {
                instances: instances.clone(),
                ..CliOverrides::default()
            },
            Command::CleanStaleDatabases { instances, dry_run } => CliOverrides {
                instances: instances.clone(),
                dry_run: *dry_run,
                ..CliOverrides::default()
            },
            Command::Restore {
                instances,
                file,
                live,
                no_clean,
                load_sync_server,
                local_staging,
                dry_run,
            } => CliOverrides {
                instances: instances.clone(),
                file: file.clone(),
                live: *live,
                no_clean: *no_clean,
                load_sync_server: *load_sync_server,
                local_staging: *local_staging,
                dry_run: *dry_run,
            },
        }
    }

    /// Flag combinations clap cannot express.
    fn validate(&self) -> Result<(), AppError> {
        if let Command::Restore {
            instances,
            file: Some(_),
            ..
        } = self
        {
            if instances.len() > 1 {
                return Err(AppError::InvalidInput(format!(
                    "--file takes at most one -i/--instance target database, got {}",
                    instances.len()
                )));
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("erpload=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, rolling back the current restore");
            interrupt.cancel();
        }
    });

    // Unattended runs get timestamps on every line.
    let console: Arc<dyn ProgressSink> = if std::io::stderr().is_terminal() {
        Arc::new(ConsoleSink)
    } else {
        Arc::new(TracingSink)
    };
    let memory = Arc::new(MemorySink::new());
    let reporter = Reporter::default().with_sink(console).with_sink(memory.clone());

    let (code, remote_log_url) = match run_app(&cli, &reporter, &cancel).await {
        Ok((code, url)) => {
            if code == 0 {
                println!("✅ Operation completed successfully.");
            } else {
                eprintln!("❌ Operation finished with exit status {}.", code);
            }
            (code, url)
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            reporter.say(format!("Error: {:#}", e));
            (error_exit_code(&e), None)
        }
    };

    if let Some(url) = remote_log_url {
        if let Err(e) = post_remote_log(&url, &memory.lines(), code).await {
            tracing::warn!("could not send the log to {}: {}", url, e);
        }
    }
    ExitCode::from(code)
}

/// Runs the selected command. Returns its exit status and where to post
/// the collected log.
async fn run_app(
    cli: &Cli,
    reporter: &Reporter,
    cancel: &CancellationToken,
) -> Result<(u8, Option<String>)> {
    cli.command.validate()?;
    let mut app_config = AppConfig::load_from_json(&cli.config).with_context(|| {
        format!(
            "Failed to load application configuration from {}",
            cli.config.display()
        )
    })
    .map_err(config_error)?;
    let remote_log_url = app_config.remote_log_url().map(str::to_string);
    let overrides = cli.command.overrides();

    let code = match &cli.command {
        Command::ListBackups { .. } => {
            reporter.say("🔎 Listing backups...");
            let list_config = load_list_config_from_json(&app_config.raw_json_config, &overrides)
                .map_err(config_error)?;
            app_config.operation = Some(OperationConfig::ListBackups(list_config));
            restore::run_list_flow(&app_config, reporter, cancel)
                .await
                .context("Listing backups failed")?
        }
        Command::Restore { .. } => {
            reporter.say("🔄 Starting Restore Process...");
            let restore_config =
                load_restore_config_from_json(&app_config.raw_json_config, &overrides)
                    .map_err(config_error)?;
            app_config.operation = Some(OperationConfig::Restore(restore_config));
            restore::run_restore_flow(&app_config, reporter, cancel)
                .await
                .context("Restore process failed")?
        }
        Command::CleanStaleDatabases { .. } => {
            reporter.say("🧹 Cleaning stale databases...");
            let clean_config = load_clean_config_from_json(&app_config.raw_json_config, &overrides)
                .map_err(config_error)?;
            app_config.operation = Some(OperationConfig::CleanStale(clean_config));
            restore::run_clean_flow(&app_config, reporter)
                .await
                .context("Cleaning stale databases failed")?
        }
    };
    Ok((code, remote_log_url))
}

fn config_error(e: anyhow::Error) -> anyhow::Error {
    AppError::Config(format!("{:#}", e)).into()
}

/// Exit status for a failure that ended the command early.
fn error_exit_code(e: &anyhow::Error) -> u8 {
    e.chain()
        .find_map(|cause| cause.downcast_ref::<AppError>())
        .map(AppError::exit_code)
        .unwrap_or(1)
}

async fn post_remote_log(url: &str, lines: &[String], code: u8) -> Result<()> {
    let mut body = lines.join("\n");
    body.push_str(&format!("\nexit status: {}\n", code));
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?
        .post(url)
        .query(&[("who", utils::hostname())])
        .body(body)
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_flags_become_overrides() {
        let cli = Cli::parse_from([
            "erpload",
            "--config",
            "other.json",
            "restore",
            "-i",
            "HQ_%",
            "-i",
            "FR_OCA",
            "--live",
            "--load-sync-server",
        ]);
        assert_eq!(cli.config, PathBuf::from("other.json"));
        let overrides = cli.command.overrides();
        assert_eq!(overrides.instances, vec!["HQ_%", "FR_OCA"]);
        assert!(overrides.live && overrides.load_sync_server);
        assert!(!overrides.no_clean && !overrides.local_staging);
        assert!(overrides.file.is_none());
        assert!(!overrides.dry_run);
    }

    #[test]
    fn dry_run_flag_on_restore_and_clean() {
        let cli = Cli::parse_from(["erpload", "restore", "--dry-run"]);
        assert!(cli.command.overrides().dry_run);
        let cli = Cli::parse_from(["erpload", "clean-stale-databases", "-n"]);
        assert!(cli.command.overrides().dry_run);
    }

    #[test]
    fn file_restore_rejects_several_instances() {
        let cli = Cli::parse_from([
            "erpload", "restore", "--file", "x.dump", "-i", "A", "-i", "B",
        ]);
        let err = cli.command.validate().unwrap_err();
        assert!(err.to_string().contains("-i/--instance"));
        assert_eq!(err.exit_code(), 2);

        let cli = Cli::parse_from(["erpload", "restore", "-i", "A", "-i", "B"]);
        assert!(cli.command.validate().is_ok());
    }

    #[test]
    fn clean_command_name() {
        let cli = Cli::parse_from(["erpload", "clean-stale-databases", "-i", "HQ_OCA"]);
        assert!(matches!(cli.command, Command::CleanStaleDatabases { .. }));
        assert_eq!(cli.config, PathBuf::from("config.json"));
    }

    #[test]
    fn exit_code_comes_from_the_app_error() {
        let e = anyhow::Error::from(AppError::UnknownInstance("x".into())).context("restore");
        assert_eq!(error_exit_code(&e), 3);
        assert_eq!(error_exit_code(&config_error(anyhow::anyhow!("bad"))), 2);
        assert_eq!(error_exit_code(&anyhow::anyhow!("other")), 1);
    }
}
