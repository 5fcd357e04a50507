use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use supernote_paperless_bridge::config::Settings;
use supernote_paperless_bridge::db::Database;
use supernote_paperless_bridge::inbound::Inbound;
use supernote_paperless_bridge::outbound::Outbound;
use supernote_paperless_bridge::paperless::PaperlessClient;

#[derive(Parser)]
#[command(name = "sn-bridge")]
#[command(about = "Sync Supernote notes and documents with Paperless-ngx")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch notes and poll Paperless until interrupted (default)
    Run,
    /// Upload new or changed notes once, then exit
    Scan,
    /// Run a single outbound pass, then exit
    Sync,
    /// Show what the state store tracks
    Status,
}

/// Initialize tracing on stderr. `RUST_LOG` overrides `LOG_LEVEL`.
fn init_tracing(settings: &Settings) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| settings.log_directive()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn open_state(settings: &Settings) -> anyhow::Result<Database> {
    let db = Database::open(&settings.state_db)?;
    db.migrate()?;
    Ok(db)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_env().context("Invalid configuration")?;
    init_tracing(&settings);

    let db = open_state(&settings)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            tracing::info!(
                "Starting bridge: inbound_tag={} outbound_tag={} poll_interval={}s",
                settings.inbound_tag,
                settings.outbound_tag,
                settings.poll_interval.as_secs()
            );

            let client = PaperlessClient::from_settings(&settings)?;
            let inbound = Inbound::prepare(settings.clone(), client.clone(), db.clone()).await?;
            let outbound = Outbound::prepare(settings, client, db).await?;

            tokio::select! {
                res = inbound.run() => res.context("Inbound watcher stopped")?,
                res = outbound.run() => res.context("Outbound sync stopped")?,
                _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
            }
        }
        Commands::Scan => {
            let client = PaperlessClient::from_settings(&settings)?;
            let inbound = Inbound::prepare(settings, client, db).await?;
            let uploaded = inbound.scan_existing().await;
            println!("Uploaded {} notes", uploaded);
        }
        Commands::Sync => {
            let client = PaperlessClient::from_settings(&settings)?;
            let outbound = Outbound::prepare(settings, client, db).await?;
            let outcome = outbound.sync_once().await?;
            println!(
                "Exported {} documents, removed {}",
                outcome.exported, outcome.removed
            );
        }
        Commands::Status => {
            let notes = db.list_ingested_notes()?;
            println!("Ingested notes: {}", notes.len());
            for note in &notes {
                println!(
                    "  {}  doc={}  {}  {}",
                    note.note_path,
                    note.doc_id.map(|id| id.to_string()).unwrap_or_else(|| "-".into()),
                    note.status.as_str(),
                    note.ingested_at.to_rfc3339()
                );
            }

            let docs = db.list_exported_docs()?;
            println!("Exported documents: {}", docs.len());
            for doc in &docs {
                println!(
                    "  {}  {}  {}",
                    doc.doc_id,
                    doc.supernote_path,
                    doc.exported_at.to_rfc3339()
                );
            }
        }
    }

    Ok(())
}
