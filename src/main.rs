use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use faceid::batch;
use faceid::config::{self, Config};
use faceid::journal::{self, Journal, JournalEntry};
use faceid::probe::VectorFile;
use faceid::storage::{Enrollment, FaceRecord, FileRegistry, JsonExport, ProfileUpdate};
use faceid::{LoadStatus, Recognition, Recognizer};
use faceid_core::{FeatureExtractor, RegistrySource};
use log::{info, warn};

#[derive(Parser)]
#[command(name = "faceid")]
#[command(version, about = "Identify people by matching face vectors against an enrolled registry")]
struct Cli {
    /// Config file (defaults to the compiled-in path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Match against a JSON export of identity documents instead of the
    /// local registry (identify and stats)
    #[arg(long, global = true)]
    registry_json: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll an identity from a face vector file
    Enroll {
        #[arg(long)]
        first_name: String,
        #[arg(long, default_value = "")]
        last_name: String,
        /// Unique identity code
        #[arg(long)]
        code: Option<String>,
        #[arg(long)]
        email: Option<String>,
        /// Put the identity on the watch list
        #[arg(long)]
        watchlist: bool,
        /// JSON file holding the face vector
        #[arg(short, long)]
        vector: PathBuf,
    },
    /// Enroll every identity in a JSON manifest or a directory of JSON documents
    EnrollBatch { path: PathBuf },
    /// Identify the face in a vector file against the registry
    Identify {
        #[arg(short, long)]
        vector: PathBuf,
    },
    /// List enrolled identities
    List,
    /// Show one enrolled identity by id or code
    Show {
        #[arg(required_unless_present = "code")]
        id: Option<u64>,
        #[arg(long, conflicts_with = "id")]
        code: Option<String>,
    },
    /// Change profile fields or replace the face vector of an identity
    Update {
        id: u64,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        #[arg(long)]
        code: Option<String>,
        #[arg(long)]
        email: Option<String>,
        /// JSON file holding the replacement face vector
        #[arg(short, long)]
        vector: Option<PathBuf>,
    },
    /// Remove an enrolled identity
    Remove { id: u64 },
    /// Set or clear the watch list flag of an identity
    Watchlist {
        id: u64,
        #[arg(long)]
        off: bool,
    },
    /// Remove all enrolled identities
    Purge,
    /// Show registry and recognition statistics
    Stats {
        /// Also print the most recent journal entries
        #[arg(long, default_value_t = 0)]
        recent: usize,
    },
    /// Page through the recognition journal, newest first
    Journal {
        #[arg(long, default_value_t = 0)]
        skip: usize,
        #[arg(long, default_value_t = journal::DEFAULT_PAGE)]
        limit: usize,
    },
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;
    let store = FileRegistry::open(cfg.data_dir());

    match cli.command {
        Commands::Enroll {
            first_name,
            last_name,
            code,
            email,
            watchlist,
            vector,
        } => enroll(
            &store,
            Enrollment {
                first_name,
                last_name,
                code,
                email,
                watchlisted: watchlist,
                embedding: Vec::new(),
            },
            &vector,
        ),
        Commands::EnrollBatch { path } => enroll_batch(&store, &path),
        Commands::Identify { vector } => match cli.registry_json {
            Some(export) => identify(&cfg, JsonExport::open(export), &vector),
            None => identify(&cfg, store, &vector),
        },
        Commands::List => list(&store),
        Commands::Show { id, code } => {
            let record = match (id, code) {
                (Some(id), _) => store.get(id)?,
                (None, Some(code)) => store.find_by_code(&code)?,
                (None, None) => None,
            };
            match record {
                Some(record) => show(&record),
                None => anyhow::bail!("No such identity"),
            }
        }
        Commands::Update {
            id,
            first_name,
            last_name,
            code,
            email,
            vector,
        } => {
            let embedding = match vector {
                Some(path) => Some(read_vector(&path)?),
                None => None,
            };
            let update = ProfileUpdate {
                first_name,
                last_name,
                code,
                email,
                watchlisted: None,
                embedding,
            };
            match store.update(id, update).context("Failed to update identity")? {
                Some(record) => {
                    info!("✓ Updated identity {}", record.id);
                    show(&record)
                }
                None => anyhow::bail!("No identity with id {}", id),
            }
        }
        Commands::Remove { id } => {
            if !store.remove(id).context("Failed to remove identity")? {
                anyhow::bail!("No identity with id {}", id);
            }
            info!("✓ Removed identity {}", id);
            Ok(())
        }
        Commands::Watchlist { id, off } => {
            if !store
                .set_watchlisted(id, !off)
                .context("Failed to update identity")?
            {
                anyhow::bail!("No identity with id {}", id);
            }
            info!(
                "✓ Identity {} {} the watch list",
                id,
                if off { "removed from" } else { "added to" }
            );
            Ok(())
        }
        Commands::Purge => {
            store.purge().context("Failed to purge registry")?;
            info!("✓ All identities purged");
            Ok(())
        }
        Commands::Stats { recent } => match cli.registry_json {
            Some(export) => stats(&cfg, JsonExport::open(export), recent),
            None => stats(&cfg, store, recent),
        },
        Commands::Journal { skip, limit } => {
            for entry in open_journal(&cfg).page(skip, limit)? {
                println!("{}", serde_json::to_string(&entry)?);
            }
            Ok(())
        }
        Commands::Config => open_config(cli.config),
    }
}

fn read_vector(path: &Path) -> Result<Vec<f32>> {
    match VectorFile.extract(path)? {
        Some(embedding) => Ok(embedding.to_vec()),
        None => anyhow::bail!(
            "No face vector found in {}. Extract a face before enrolling.",
            path.display()
        ),
    }
}

fn enroll(store: &FileRegistry, mut enrollment: Enrollment, vector: &Path) -> Result<()> {
    enrollment.embedding = read_vector(vector)?;
    let record = store
        .enroll(enrollment)
        .with_context(|| format!("Failed to enroll from {}", vector.display()))?;
    info!(
        "✓ Enrolled identity {} ({} {})",
        record.id, record.first_name, record.last_name
    );
    Ok(())
}

fn enroll_batch(store: &FileRegistry, path: &Path) -> Result<()> {
    let entries = batch::read_enrollments(path)?;
    let report = store.enroll_batch(entries).context("Failed to save face records")?;
    info!(
        "✓ Processed {}: {} enrolled, {} failed",
        report.processed,
        report.enrolled.len(),
        report.failed.len()
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn open_journal(cfg: &Config) -> Journal {
    Journal::open(cfg.data_dir()).with_limit(cfg.journal_limit)
}

fn identify<S: RegistrySource>(cfg: &Config, source: S, vector: &Path) -> Result<()> {
    let start = Instant::now();
    let journal = open_journal(cfg);
    let recognizer = Recognizer::new(source, cfg.matching.clone())?;

    match recognizer.load() {
        LoadStatus::Loaded { count, rejected } => {
            info!("Loaded {} enrolled identities ({} rejected)", count, rejected)
        }
        LoadStatus::NoData => warn!("Registry is empty. Run 'enroll' first."),
        LoadStatus::Failed => warn!("Registry could not be loaded"),
    }

    let recognition = recognizer.recognize(&mut VectorFile, vector)?;
    let decision = match recognition {
        Recognition::NoFaceDetected => {
            if cfg.journal {
                journal.append(JournalEntry::no_face(start.elapsed()))?;
            }
            anyhow::bail!("No face detected in {}", vector.display());
        }
        Recognition::Decision(decision) => decision,
    };

    if cfg.journal {
        journal
            .append(JournalEntry::from_decision(&decision, start.elapsed()))
            .context("Failed to write recognition journal")?;
    }

    if decision.matched {
        info!("✓ {}", decision.reason);
    } else {
        warn!("{}", decision.reason);
    }
    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}

fn list(store: &FileRegistry) -> Result<()> {
    let records = store.load_records()?;
    if records.is_empty() {
        info!("No identities enrolled");
        return Ok(());
    }
    for r in records {
        println!(
            "{:>5}  {:<30} {:<12} dim={:<4} {}{}",
            r.id,
            format!("{} {}", r.first_name, r.last_name).trim(),
            r.code.as_deref().unwrap_or("-"),
            r.embedding.len(),
            if r.watchlisted { "[watch list] " } else { "" },
            if r.active { "" } else { "[inactive]" },
        );
    }
    Ok(())
}

fn stats<S: RegistrySource>(cfg: &Config, source: S, recent: usize) -> Result<()> {
    let journal = open_journal(cfg);
    let recognizer = Recognizer::new(source, cfg.matching.clone())?;
    recognizer.load();

    let entries = journal.entries()?;
    let report = serde_json::json!({
        "registry": recognizer.stats(),
        "recognitions": journal::stats(&entries),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    if recent > 0 {
        for entry in journal.recent(recent)? {
            println!("{}", serde_json::to_string(&entry)?);
        }
    }
    Ok(())
}

fn show(record: &FaceRecord) -> Result<()> {
    let view = serde_json::json!({
        "id": record.id,
        "first_name": record.first_name,
        "last_name": record.last_name,
        "code": record.code,
        "email": record.email,
        "watchlisted": record.watchlisted,
        "active": record.active,
        "metadata": record.metadata,
        "dimension": record.embedding.len(),
        "enrolled_at": record.enrolled_at,
    });
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

fn open_config(path: Option<PathBuf>) -> Result<()> {
    let config_path = path.unwrap_or_else(|| config::CONFIG_PATH.clone());
    let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    if !config_path.exists() {
        config::save_config(&Config::default(), Some(&config_path))
            .context("Failed to write default config")?;
    }
    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(&config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
