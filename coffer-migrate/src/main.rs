//! Coffer migration CLI.
//!
//! Applies, rolls back and checks the compiled-in schema migrations against the
//! configured database. Suitable for CI/CD pipelines: every failure exits non-zero.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use coffer::migration::{MigrationStatus, Migrator};
use coffer::connection::redacted;
use coffer::{connect, AppConfig, PgExecutor};
use colored::Colorize;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "coffer-migrate")]
#[command(about = "Schema migrations for the coffer record store")]
#[command(version)]
struct Cli {
    /// Database connection URL (overrides configuration)
    #[arg(long)]
    database_url: Option<String>,

    /// Configuration file
    #[arg(long, default_value = "config/config.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show migration status (applied vs pending)
    Status,

    /// Apply pending migrations
    Up {
        /// Number of migrations to apply (default: all pending)
        #[arg(long)]
        steps: Option<usize>,

        /// Show what would be applied without running it
        #[arg(long)]
        dry_run: bool,
    },

    /// Roll back applied migrations, newest first
    Down {
        #[arg(long, default_value = "1")]
        steps: usize,

        /// Show what would be rolled back without running it
        #[arg(long)]
        dry_run: bool,
    },

    /// Check applied migrations against the compiled-in set
    Validate,
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(&cli) {
        Ok(()) => {
            if !cli.quiet {
                println!("{}", "✅ Success".green());
            }
        }
        Err(e) => {
            eprintln!("{} {e:#}", "❌ Error:".red().bold());
            process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let database_url = database_url(cli)?;
    log::info!("using database {}", redacted(&database_url));
    let client = connect(&database_url).context("connecting to database")?;
    let executor = PgExecutor::new(client.clone());
    let migrator = Migrator::embedded()?;

    match cli.command {
        Commands::Status => print_status(&migrator.status(&executor)?),
        Commands::Up { steps, dry_run } => {
            if dry_run {
                let status = migrator.status(&executor)?;
                let to_apply = steps.unwrap_or(status.pending.len()).min(status.pending.len());
                println!("Would apply {to_apply} migration(s):");
                for (i, pending) in status.pending.iter().take(to_apply).enumerate() {
                    println!("  {}. m{}_{}", i + 1, pending.version, pending.name);
                }
                return Ok(());
            }
            println!("Applying migrations...");
            match migrator.up(&client, steps)? {
                0 => println!("No migrations to apply"),
                n => println!("{}", format!("Applied {n} migration(s)").green()),
            }
        }
        Commands::Down { steps, dry_run } => {
            if dry_run {
                let status = migrator.status(&executor)?;
                let mut applied = status.applied;
                applied.sort_by_key(|record| std::cmp::Reverse(record.version));
                let to_roll_back = steps.min(applied.len());
                println!("Would roll back {to_roll_back} migration(s):");
                for (i, record) in applied.iter().take(to_roll_back).enumerate() {
                    println!("  {}. m{}_{}", i + 1, record.version, record.name);
                }
                return Ok(());
            }
            println!("Rolling back migrations...");
            match migrator.down(&client, steps)? {
                0 => println!("No migrations to roll back"),
                n => println!("{}", format!("Rolled back {n} migration(s)").yellow()),
            }
        }
        Commands::Validate => {
            println!("Validating checksums...");
            migrator.validate(&executor)?;
            println!("All checksums valid");
        }
    }
    Ok(())
}

/// `--database-url`, then `DATABASE_URL`, then the configuration file and `COFFER__*`.
fn database_url(cli: &Cli) -> Result<String> {
    if let Some(url) = cli
        .database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok())
    {
        return Ok(url);
    }
    let config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if config.database.url.is_empty() {
        bail!("no database URL: pass --database-url, set DATABASE_URL or COFFER__DATABASE__URL");
    }
    Ok(config.database.url)
}

fn print_status(status: &MigrationStatus) {
    println!("\n📊 Migration Status\n");

    if status.applied.is_empty() {
        println!("Applied Migrations: None");
    } else {
        println!("Applied Migrations ({}):", status.applied_count);
        for record in &status.applied {
            let time = record
                .execution_time_ms
                .map_or_else(|| "N/A".to_string(), |ms| format!("{ms}ms"));
            println!(
                "  {} m{}_{} ({}, {time})",
                "✓".green(),
                record.version,
                record.name,
                record.applied_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }

    println!();

    if status.pending.is_empty() {
        println!("Pending Migrations: None");
    } else {
        println!("Pending Migrations ({}):", status.pending_count);
        for pending in &status.pending {
            println!("  {} m{}_{}", "⏳".yellow(), pending.version, pending.name);
        }
    }

    println!(
        "\n📈 Summary: {} applied, {} pending",
        status.applied_count, status.pending_count
    );
    if let Some(latest) = status.latest_applied_version() {
        println!("Latest applied version: {latest}");
    }
    if let Some(next) = status.next_pending_version() {
        println!("Next pending version: {next}");
    }
}
