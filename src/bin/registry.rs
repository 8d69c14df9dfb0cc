//! Schema Registry CLI
//!
//! Registers JSON schemas, checks compatibility and manages subjects in a
//! file-backed registry.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use json_schema_registry::compatibility::text_diff;
use json_schema_registry::{
    CompatibilityMode, CompatibilityVerdict, FilePersistence, RegistryConfig, RegistryService, SchemaId,
    SchemaRegistry, SchemaRegistryClient,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schema-registry")]
#[command(about = "Register JSON schemas and enforce compatibility between versions")]
struct Cli {
    /// Config file (defaults to registry.toml lookup)
    #[arg(short, long)]
    config: Option<String>,

    /// Registry data directory, overriding the config
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List subjects with live versions
    Subjects,

    /// Register a schema file under a subject
    Register {
        subject: String,
        /// JSON Schema file
        file: PathBuf,
    },

    /// List live versions of a subject
    Versions { subject: String },

    /// Show one version of a subject
    Get {
        subject: String,
        /// Version number or "latest"
        #[arg(default_value = "latest")]
        version: String,
    },

    /// Show a schema by its global id
    Schema { id: u32 },

    /// Test a schema file against a subject without registering it
    Check {
        subject: String,
        file: PathBuf,
    },

    /// Delete a subject (soft by default)
    Delete {
        subject: String,
        /// Permanently remove a soft-deleted subject
        #[arg(long)]
        permanent: bool,
    },

    /// Read or change compatibility modes
    Mode {
        #[command(subcommand)]
        action: ModeAction,
    },

    /// Diff two versions of a subject
    Diff {
        subject: String,
        from: String,
        #[arg(default_value = "latest")]
        to: String,
    },

    /// Print the effective configuration
    Config {
        /// Also write it to this file
        #[arg(long)]
        save: Option<String>,
    },
}

#[derive(Subcommand)]
enum ModeAction {
    /// Show the mode of a subject, or the global default
    Get { subject: Option<String> },

    /// Set the mode of a subject, or the global default
    Set {
        mode: String,
        subject: Option<String>,
    },
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

fn read_schema(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read schema file {}", path.display()))
}

fn open(config: &RegistryConfig, data_dir: Option<PathBuf>) -> anyhow::Result<(FilePersistence, Arc<SchemaRegistry>)> {
    let dir = data_dir.unwrap_or_else(|| config.data_dir());
    let store = FilePersistence::new(&dir)
        .with_context(|| format!("Failed to open registry at {}", dir.display()))?;
    let fresh = !store.snapshot_path().exists();
    let registry = store.load()?;
    if fresh {
        registry.set_default_mode(config.registry.default_mode)?;
    }
    debug!(path = %dir.display(), "opened registry");
    Ok((store, Arc::new(registry)))
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = RegistryConfig::load_from(cli.config.as_deref()).context("Failed to load configuration")?;

    if let Commands::Config { save } = &cli.command {
        print!("{}", toml::to_string_pretty(&config)?);
        if let Some(path) = save {
            config.save(path)?;
            println!("✅ Saved configuration to {}", path);
        }
        return Ok(());
    }

    let (store, registry) = open(&config, cli.data_dir)?;
    let client = RegistryService::new(Arc::clone(&registry));

    match cli.command {
        Commands::Subjects => {
            let subjects = registry.list_subjects()?;
            if subjects.is_empty() {
                println!("No subjects registered");
            }
            for subject in subjects {
                println!("📦 {}", subject);
            }
        }

        Commands::Register { subject, file } => {
            let schema = read_schema(&file)?;
            client.register(&subject, &schema)?;
            store.save(&registry)?;
            // An idempotent hit may resolve to an older version than latest
            let entry = client.lookup(&subject, &schema)?;
            println!("✅ Registered {} as schema id {}", entry.key(), entry.id);
        }

        Commands::Versions { subject } => {
            for version in client.list_versions(&subject)? {
                println!("  v{}", version);
            }
        }

        Commands::Get { subject, version } => {
            let entry = client.get_version(&subject, version.parse()?)?;
            println!("📋 {} (id {}, registered {})", entry.key(), entry.id, entry.registered_at);
            println!("{}", serde_json::to_string_pretty(entry.document.raw())?);
        }

        Commands::Schema { id } => {
            let document = client.get_by_id(SchemaId(id))?;
            println!("{}", serde_json::to_string_pretty(document.raw())?);
        }

        Commands::Check { subject, file } => {
            let schema = read_schema(&file)?;
            let mode = client.get_mode(&subject)?;
            match client.test_compatibility(&subject, &schema)? {
                CompatibilityVerdict::Accept => println!("✅ Compatible with {} under {}", subject, mode),
                CompatibilityVerdict::Reject(incompatibility) => {
                    println!("❌ Incompatible with {} under {}", subject, mode);
                    println!("   └─ {}", incompatibility);
                    std::process::exit(1);
                }
            }
        }

        Commands::Delete { subject, permanent } => {
            let versions = client.delete_subject(&subject, permanent)?;
            store.save(&registry)?;
            let kind = if permanent { "Permanently deleted" } else { "Soft deleted" };
            println!("🗑️  {} {} (versions {:?})", kind, subject, versions);
        }

        Commands::Mode { action } => match action {
            ModeAction::Get { subject: Some(subject) } => {
                println!("{}: {}", subject, client.get_mode(&subject)?);
            }
            ModeAction::Get { subject: None } => {
                println!("default: {}", registry.default_mode()?);
            }
            ModeAction::Set { mode, subject } => {
                let mode: CompatibilityMode = mode.parse()?;
                match &subject {
                    Some(subject) => client.set_mode(subject, mode)?,
                    None => registry.set_default_mode(mode)?,
                }
                store.save(&registry)?;
                println!("✅ {} is now {}", subject.as_deref().unwrap_or("default"), mode);
            }
        },

        Commands::Diff { subject, from, to } => {
            let older = client.get_version(&subject, from.parse()?)?;
            let newer = client.get_version(&subject, to.parse()?)?;
            if older.document.same_content(&newer.document) {
                println!("✅ {} and {} are identical", older.key(), newer.key());
            } else {
                println!("🔍 {} -> {}", older.key(), newer.key());
                print!("{}", text_diff(&older.document, &newer.document)?);
            }
        }

        Commands::Config { .. } => bail!("configuration is handled before opening the registry"),
    }

    Ok(())
}
