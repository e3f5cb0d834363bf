/// Backfill conversation records written before the participant-key schema
///
/// Fills `participants`, `participant_key` and `last_message_time` on legacy
/// rows. Safe to run while the service is serving traffic and safe to re-run.
///
/// Usage:
/// ```bash
/// cargo run --bin conversation-migrate -- [OPTIONS]
/// ```
///
/// Options:
/// - `--dry-run`: Report what would be migrated without writing
/// - `--batch-size <N>`: Records scanned per batch (default: MIGRATION_BATCH_SIZE or 200)
/// - `--start-after <UUID>`: Resume the scan after a conversation id
use anyhow::{Context, Result};
use conversation_service::{db, logging, Config, MigrationRunner, PgRepository};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct MigrateArgs {
    dry_run: bool,
    batch_size: Option<usize>,
    start_after: Option<Uuid>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing();

    let args = parse_args()?;
    let config = Config::from_env().context("Invalid conversation-service configuration")?;
    let batch_size = args.batch_size.unwrap_or(config.migration_batch_size);

    info!(?args, batch_size, "Starting conversation migration");

    let pool = db::init_pool()
        .await
        .context("Failed to initialize database pool")?;
    let repo = Arc::new(PgRepository::new(pool));

    let report = MigrationRunner::new(repo, batch_size)
        .dry_run(args.dry_run)
        .start_after(args.start_after)
        .run()
        .await
        .context("Conversation scan failed")?;

    for failure in &report.failures {
        error!(
            conversation_id = %failure.conversation_id,
            reason = %failure.reason,
            "Record not migrated"
        );
    }

    info!(
        scanned = report.scanned,
        migrated = report.migrated,
        skipped = report.skipped,
        failed = report.failed,
        dry_run = args.dry_run,
        "Conversation migration summary"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

fn parse_args() -> Result<MigrateArgs> {
    let mut parsed = MigrateArgs::default();
    let args: Vec<String> = std::env::args().collect();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--dry-run" => {
                parsed.dry_run = true;
                i += 1;
            }
            "--batch-size" => {
                let value = args
                    .get(i + 1)
                    .context("--batch-size requires a value")?;
                let size: usize = value.parse().context("Invalid batch size")?;
                if size == 0 {
                    anyhow::bail!("--batch-size must be positive");
                }
                parsed.batch_size = Some(size);
                i += 2;
            }
            "--start-after" => {
                let value = args
                    .get(i + 1)
                    .context("--start-after requires a UUID value")?;
                parsed.start_after =
                    Some(Uuid::parse_str(value).context("Invalid UUID for --start-after")?);
                i += 2;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => anyhow::bail!("Unknown argument: {}", other),
        }
    }

    Ok(parsed)
}

fn print_help() {
    println!("Conversation schema migration");
    println!();
    println!("Usage: conversation-migrate [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --dry-run              Report what would be migrated without writing");
    println!("  --batch-size <N>       Records scanned per batch (default: 200)");
    println!("  --start-after <UUID>   Resume the scan after a conversation id");
    println!("  --help, -h             Show this help message");
    println!();
    println!("Environment Variables:");
    println!("  DATABASE_URL           PostgreSQL connection string (required)");
    println!("  MIGRATION_BATCH_SIZE   Default batch size");
    println!("  RUST_LOG               Log filter (default: info,sqlx=warn)");
}
