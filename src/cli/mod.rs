//! # CLI Module
//!
//! This module provides the command-line interface for Reviewgate.
//! It handles parsing and execution of server, reporting and maintenance commands.
//!
//! ## Commands
//!
//! ### Server Operations
//! - `start`: Run the review gate in front of the upstream review service
//!
//! ### Abuse Reports
//! - `reports`: Show the most recently active abuse reports, optionally with a summary
//!
//! ### Maintenance
//! - `migrate status`: Show applied and pending migrations
//! - `migrate apply-all`: Apply all pending migrations
//! - `validate-env`: Check the environment configuration and print the result
//! - `env-example`: Print a commented `.env` template
//!
//! ## Usage Example
//!
//! ```bash
//! # Print a configuration template
//! reviewgate env-example > .env
//!
//! # Start the server
//! reviewgate start
//!
//! # Show the 20 most recent abuse reports
//! reviewgate reports --limit 20 --summary
//! ```

use crate::database::{DatabaseManager, MigrationCli, initialize_database};
use crate::env::{
    generate_env_example, get_config, log_level_from_env, print_validation_results,
    validate_environment,
};
use crate::logging::init_logging;
use crate::reporting::store::{AbuseReport, AbuseReportStore};
use clap::{Parser, Subcommand};
use std::error::Error;
use std::process::ExitCode;
use tracing::error;

///////////////////////////////////////////////////////////////////////////////
//****                        Private Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

#[derive(Parser)]
#[command(name = "reviewgate")]
#[command(about = "Abuse rate limiting and reporting for survey review submissions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

///////////////////////////////////////////////////////////////////////////////
//****                         Private Types                             ****//
///////////////////////////////////////////////////////////////////////////////

#[derive(Subcommand)]
enum Commands {
    /// Start the review gate server
    #[command(name = "start")]
    Start,
    /// View recorded abuse reports
    #[command(name = "reports")]
    Reports {
        #[arg(long, default_value_t = 10, help = "Number of recent reports to show")]
        limit: i64,
        #[arg(long, help = "Show a summary of all reports")]
        summary: bool,
    },
    /// Database migration commands
    #[command(name = "migrate")]
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
    /// Validate the environment configuration
    #[command(name = "validate-env")]
    ValidateEnv,
    /// Print an example environment file
    #[command(name = "env-example")]
    EnvExample,
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Show migration status
    Status,
    /// Apply all pending migrations
    ApplyAll,
}

///////////////////////////////////////////////////////////////////////////////
//****                       Public Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Parse the command line and run the selected command
pub async fn parse_cli_commands() -> ExitCode {
    let cli = Cli::parse();

    init_logging(&log_level_from_env());

    let result = match cli.command {
        Commands::EnvExample => {
            print!("{}", generate_env_example());
            Ok(())
        }
        Commands::ValidateEnv => {
            let result = validate_environment();
            print_validation_results(&result);
            return if result.is_ok() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            };
        }
        Commands::Start => start().await,
        Commands::Reports { limit, summary } => show_reports(limit, summary).await,
        Commands::Migrate { action } => migrate(action).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                       Private Functions                           ****//
///////////////////////////////////////////////////////////////////////////////

async fn start() -> Result<(), Box<dyn Error>> {
    let config = get_config();
    print_validation_results(&Ok(config.clone()));
    let pool = initialize_database(&config.database_url).await?;
    crate::server::start_server(pool, config).await?;
    Ok(())
}

async fn show_reports(limit: i64, summary: bool) -> Result<(), Box<dyn Error>> {
    let config = get_config();
    let pool = initialize_database(&config.database_url).await?;
    let store = AbuseReportStore::new(pool);

    if summary {
        println!("\n=== Abuse Report Summary ===");
        println!("Tracked identities: {}", store.count().await?);
    }

    let reports = store.recent(limit.max(1)).await?;
    if reports.is_empty() {
        println!("No abuse reports recorded");
        return Ok(());
    }

    println!("\n=== Recent Abuse Reports (Last {}) ===", reports.len());
    println!(
        "{:<16} | {:<22} | {:>8} | {:>8} | {:>8} | {:<24} | {:<24}",
        "Anonymized ID",
        "Coarse Address",
        "Product",
        "Button",
        "Attempts",
        "First Attempt",
        "Last Attempt"
    );
    println!("{:-<140}", "");
    for report in &reports {
        println!("{}", format_report_row(report));
    }

    Ok(())
}

async fn migrate(action: MigrateAction) -> Result<(), Box<dyn Error>> {
    let config = get_config();
    let db_manager = DatabaseManager::connect_with_file_creation(&config.database_url).await?;
    db_manager.initialize().await?;
    let migration_cli = MigrationCli::new(db_manager);

    match action {
        MigrateAction::Status => migration_cli.list_migrations().await?,
        MigrateAction::ApplyAll => migration_cli.apply_migrations().await?,
    }
    Ok(())
}

fn format_report_row(report: &AbuseReport) -> String {
    let short_id: String = report.anonymized_id.chars().take(16).collect();
    format!(
        "{:<16} | {:<22} | {:>8} | {:>8} | {:>8} | {:<24} | {:<24}",
        short_id,
        report.coarse_address,
        report.target_product_id,
        report.target_button_id,
        report.total_attempts,
        report.first_attempt.format("%Y-%m-%d %H:%M:%S UTC"),
        report.last_attempt.format("%Y-%m-%d %H:%M:%S UTC"),
    )
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
