// ============================================================================
// recall - CLI for the tenant-scoped chat memory pipeline
// ============================================================================
// Usage:
//   recall send --org ORG --user USER --role user --text TEXT   Persist + ingest
//   recall search --org ORG --query TEXT [--top-k 5]             Retrieve context
//   recall purge --org ORG [--user USER] [--dry-run]             Delete memory
//   recall reindex --org ORG                                     Re-ingest history
//   recall stats [--org ORG]                                     Show statistics
//   recall health                                                Check the store
// ============================================================================

use anyhow::{anyhow, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use recall_core::memory::{ChatMessage, MetadataFilter, RetrievalQuery, SenderRole};
use recall_core::{ContextBlock, ConversationDb, MemoryConfig, MemoryService};
use tracing::{info, warn};

/// Recall chat memory tool
#[derive(Parser)]
#[command(name = "recall", version, about = "Ingest, search and manage tenant-scoped chat memory")]
struct Cli {
    /// Path to the conversation store (default: ~/.recall/conversations.redb)
    #[arg(long, global = true)]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Persist a chat message and ingest it into memory
    Send {
        #[arg(long)]
        org: String,
        #[arg(long)]
        user: String,
        /// Sender role: user, assistant, system
        #[arg(long, default_value = "user")]
        role: String,
        #[arg(long)]
        text: String,
        /// Message id (default: random UUID)
        #[arg(long)]
        id: Option<String>,
    },

    /// Retrieve the most relevant prior messages for an organization
    Search {
        #[arg(long)]
        org: String,
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "5")]
        top_k: usize,
        /// Only messages from this user
        #[arg(long)]
        user: Option<String>,
        /// Only messages with this sender role
        #[arg(long)]
        role: Option<String>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete an organization's memory (and local history when no user is given)
    Purge {
        #[arg(long)]
        org: String,
        /// Only this user's records
        #[arg(long)]
        user: Option<String>,
        /// Show what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Re-ingest every stored message of an organization
    Reindex {
        #[arg(long)]
        org: String,
    },

    /// Show conversation store and memory statistics
    Stats {
        /// Also count vector records for this organization
        #[arg(long)]
        org: Option<String>,
    },

    /// Check that the vector store is reachable
    Health,
}

fn format_timestamp(ts_ms: i64) -> String {
    Utc.timestamp_millis_opt(ts_ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("(invalid: {})", ts_ms))
}

fn parse_role(s: &str) -> Result<SenderRole> {
    s.parse::<SenderRole>()
        .map_err(|_| anyhow!("Unknown role '{}'. Valid values: user, assistant, system", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("recall=debug".parse()?)
                .add_directive("recall_core=debug".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = MemoryConfig::from_env()?;
    let db_path = cli.db_path.clone().or_else(|| config.db_path.clone());
    let db = ConversationDb::open(db_path.as_deref())?;

    match cli.command {
        Commands::Send {
            org,
            user,
            role,
            text,
            id,
        } => cmd_send(&db, &config, org, user, &role, text, id).await,
        Commands::Search {
            org,
            query,
            top_k,
            user,
            role,
            json,
        } => cmd_search(&config, org, query, top_k, user, role, json).await,
        Commands::Purge { org, user, dry_run } => cmd_purge(&db, &config, &org, user, dry_run).await,
        Commands::Reindex { org } => cmd_reindex(&db, &config, &org).await,
        Commands::Stats { org } => cmd_stats(&db, &config, org).await,
        Commands::Health => cmd_health(&config).await,
    }
}

async fn cmd_send(
    db: &ConversationDb,
    config: &MemoryConfig,
    org: String,
    user: String,
    role: &str,
    text: String,
    id: Option<String>,
) -> Result<()> {
    let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let message = ChatMessage::new(id, org, user, parse_role(role)?, text);

    // Persist first; ingestion is allowed to lag or fail
    let message = persist_message(db, message)?;

    let service = MemoryService::from_config(config).await?;
    service.enqueue(message.clone())?;
    service.shutdown().await;

    let stats = service.ingest_stats();
    if stats.failed > 0 {
        println!("Stored message {} but ingestion failed (see logs)", message.id);
    } else {
        println!("Stored and ingested message {}", message.id);
    }
    Ok(())
}

/// Append the message, or return the already stored copy. Stored messages
/// are immutable, so memory is always built from what history holds.
fn persist_message(db: &ConversationDb, message: ChatMessage) -> Result<ChatMessage> {
    if db.append(&message)? {
        return Ok(message);
    }

    let stored = db
        .get(&message.organization_id, &message.id)?
        .ok_or_else(|| anyhow!("Message {} vanished from the conversation store", message.id))?;
    if stored.text != message.text {
        warn!(
            "Message {} already stored with different content, re-ingesting the stored copy",
            message.id
        );
    } else {
        warn!("Message {} already stored, re-ingesting", message.id);
    }
    Ok(stored)
}

async fn cmd_search(
    config: &MemoryConfig,
    org: String,
    query: String,
    top_k: usize,
    user: Option<String>,
    role: Option<String>,
    json: bool,
) -> Result<()> {
    let mut request = RetrievalQuery::new(org, query, top_k);
    if let Some(user) = user {
        request = request.for_user(user);
    }
    if let Some(role) = role {
        request = request.with_role(parse_role(&role)?);
    }

    let service = MemoryService::from_config(config).await?;
    let result = service.retriever().retrieve_query(&request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if result.is_empty() {
        println!("No matching memory.");
        return Ok(());
    }

    println!(
        "{:<6}  {:<10}  {:<22}  {:<16}  {}",
        "SCORE", "ROLE", "CREATED AT", "USER", "TEXT"
    );
    println!("{}", "-".repeat(90));
    for hit in result.iter() {
        let text = hit
            .source
            .text
            .as_deref()
            .unwrap_or("-")
            .chars()
            .take(40)
            .collect::<String>();
        println!(
            "{:<6.3}  {:<10}  {:<22}  {:<16}  {}",
            hit.score,
            hit.metadata.sender_role,
            format_timestamp(hit.metadata.created_at),
            hit.metadata.user_id,
            text
        );
    }

    print!("{}", ContextBlock::from_outcome(Ok(result)).format_for_prompt());
    Ok(())
}

async fn cmd_purge(
    db: &ConversationDb,
    config: &MemoryConfig,
    org: &str,
    user: Option<String>,
    dry_run: bool,
) -> Result<()> {
    let mut filter = MetadataFilter::for_organization(org);
    if let Some(user) = &user {
        filter = filter.user(user.clone());
    }

    let service = MemoryService::from_config(config).await?;

    if dry_run {
        println!("=== DRY RUN - no data will be deleted ===\n");
        let records = service.store().count(filter).await?;
        println!("Would delete {} memory records", records);
        if user.is_none() {
            let messages = db.list_organization(org)?;
            println!("Would delete {} stored messages", messages.len());
        }
        return Ok(());
    }

    let deleted = service.store().delete_by_filter(filter).await?;
    println!("Deleted {} memory records", deleted);

    if user.is_none() {
        let purged = db.purge_organization(org)?;
        println!("Deleted {} stored messages", purged);
    }
    Ok(())
}

async fn cmd_reindex(db: &ConversationDb, config: &MemoryConfig, org: &str) -> Result<()> {
    let messages = db.list_organization(org)?;
    if messages.is_empty() {
        println!("No stored messages for {}", org);
        return Ok(());
    }

    info!("Reindexing {} messages for {}", messages.len(), org);

    let service = MemoryService::from_config(config).await?;
    let writer = service.writer();
    let mut written = 0usize;
    for chunk in messages.chunks(config.upsert_batch_size) {
        written += writer.ingest_batch(chunk).await?;
    }
    service.shutdown().await;

    println!("Reindexed {} of {} messages", written, messages.len());
    Ok(())
}

async fn cmd_stats(db: &ConversationDb, config: &MemoryConfig, org: Option<String>) -> Result<()> {
    let stats = db.stats()?;

    println!("=== Recall Stats ===");
    println!("Database: {} ({} bytes)", db.path().display(), stats.db_size_bytes);
    println!();
    println!("Messages: {} total", stats.total_messages);
    for org_stats in &stats.organizations {
        println!(
            "  {:24} {:>8}  last: {}",
            org_stats.organization_id,
            org_stats.messages,
            org_stats
                .last_message_at
                .map(format_timestamp)
                .unwrap_or_else(|| "N/A".into())
        );
    }

    if let Some(org) = org {
        let service = MemoryService::from_config(config).await?;
        let records = service
            .store()
            .count(MetadataFilter::for_organization(org.clone()))
            .await?;
        println!();
        println!("Memory records for {}: {}", org, records);
    }
    Ok(())
}

async fn cmd_health(config: &MemoryConfig) -> Result<()> {
    let service = MemoryService::from_config(config).await?;
    if service.health_check().await? {
        println!("Vector store ({}) is healthy", service.store().backend());
        Ok(())
    } else {
        Err(anyhow!("Vector store ({}) is not reachable", service.store().backend()))
    }
}
