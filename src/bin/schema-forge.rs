//! Schema Forge CLI
//!
//! Edit drafts, preview and publish them, and inspect published schemas.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use schema_forge::assembler::to_request;
use schema_forge::{assemble, ChangeDetector, DraftRequest, ForgeConfig, SchemaDocument, SchemaService};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schema-forge")]
#[command(about = "Runtime entity schemas with transactional table migrations")]
struct Cli {
    /// Extra config file, layered over the default locations
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database (overrides [database] path)
    #[arg(short, long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Diff two draft request files without touching any database
    Diff {
        /// New draft request (JSON)
        #[arg(long)]
        new: PathBuf,
        /// Old draft request (JSON); omitted means a brand-new entity
        #[arg(long)]
        old: Option<PathBuf>,
    },

    /// Create a draft from a draft request file
    Draft { file: PathBuf },

    /// Replace a draft's document
    Update { id: String, file: PathBuf },

    /// Open a draft from the published schema of an entity and print its request
    Edit { entity: String },

    /// Show what publishing a draft would change
    Preview { id: String },

    /// Publish a draft
    Publish { id: String },

    /// Show the published document of an entity
    Show { entity: String },

    /// Show the publish history of an entity
    History { entity: String },

    /// Delete a draft
    Delete { id: String },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = ForgeConfig::load_from(cli.config.as_deref()).context("loading configuration")?;
    if let Some(path) = cli.database {
        config.database.path = path;
    }

    let open = || {
        SchemaService::open(&config)
            .with_context(|| format!("opening {}", config.database_path().display()))
    };

    match cli.command {
        Commands::Diff { new, old } => diff(&config, &new, old.as_deref())?,

        Commands::Draft { file } => {
            let record = open()?.create_draft(&read_request(&file)?)?;
            println!("Created draft {} for '{}'", record.id, record.entity_name);
        }

        Commands::Update { id, file } => {
            let record = open()?.update_draft(&id, &read_request(&file)?)?;
            println!("Updated draft {} for '{}'", record.id, record.entity_name);
        }

        Commands::Edit { entity } => {
            let record = open()?.draft_from_published(&entity)?;
            eprintln!("Opened draft {} for '{}'", record.id, entity);
            print_json(&to_request(&record.document))?;
        }

        Commands::Preview { id } => {
            let preview = open()?.preview(&id)?;
            println!("{}", preview.summary);
            for primitive in &preview.primitives {
                println!("  {}", primitive);
            }
        }

        Commands::Publish { id } => {
            let outcome = open()?.publish(&id)?;
            println!(
                "Published '{}' revision {}",
                outcome.record.entity_name, outcome.record.revision
            );
            if let Some(migration) = &outcome.migration_id {
                println!("  migration {}", migration);
            }
            for change in &outcome.changes {
                println!("  {}", change);
            }
        }

        Commands::Show { entity } => {
            let document = open()?.get_published_document(&entity)?;
            print_json(document.as_ref())?;
        }

        Commands::History { entity } => {
            let history = open()?.history(&entity)?;
            if history.is_empty() {
                bail!("no publish history for '{}'", entity);
            }
            for entry in &history {
                println!(
                    "r{} {} {} {}",
                    entry.revision,
                    entry.published_at.to_rfc3339(),
                    entry.migration_id.as_deref().unwrap_or("-"),
                    entry.checksum
                );
                for line in entry.summary.lines() {
                    println!("    {}", line);
                }
            }
        }

        Commands::Delete { id } => {
            open()?.delete_schema(&id)?;
            println!("Deleted {}", id);
        }
    }

    Ok(())
}

fn diff(config: &ForgeConfig, new: &Path, old: Option<&Path>) -> anyhow::Result<()> {
    let detector = ChangeDetector::new(config.resolver()?);
    let new_doc = read_document(new)?;
    let old_doc = old.map(read_document).transpose()?;

    let changes = detector.detect_changes(&new_doc, old_doc.as_ref());
    print_json(&changes)
}

fn read_request(path: &Path) -> anyhow::Result<DraftRequest> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn read_document(path: &Path) -> anyhow::Result<SchemaDocument> {
    Ok(assemble(&read_request(path)?)?)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
