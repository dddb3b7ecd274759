use anyhow::Context;
use clap::{Parser, Subcommand};
use compass_retriever::{
    CompassConfig, DocumentStore, IngestionConfig, IngestionPipeline, LoaderRegistry, QueryEngine,
    Retriever, Vault,
};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

/// Ingest a vault's documents and query them with citations.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Vault root; searched for upward from the current directory when omitted
    #[arg(long, global = true)]
    vault: Option<PathBuf>,

    /// Config file overriding the vault's profile.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a vault
    Init {
        /// Directory to turn into a vault
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Ingest a file or directory into the vault
    Ingest {
        path: PathBuf,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Retrieve cited context for a question
    Query {
        text: String,
        /// Number of chunks to return
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Show store statistics
    Stats {
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// List ingested documents
    List {
        /// Limit number of results
        #[arg(short, long, default_value_t = 100)]
        limit: usize,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Remove a document and its chunks
    Forget { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(args).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn open_vault(args: &Args) -> anyhow::Result<Vault> {
    let vault = match &args.vault {
        Some(root) => Vault::open(root)?,
        None => Vault::discover(std::env::current_dir()?)?,
    };
    Ok(vault)
}

fn load_config(args: &Args, vault: &Vault) -> anyhow::Result<CompassConfig> {
    let config = vault.config_with(args.config.as_deref())?;
    config.validate()?;
    Ok(config)
}

/// Path under which a document is stored.
fn document_key(path: &Path) -> anyhow::Result<String> {
    let path = std::fs::canonicalize(path).or_else(|_| std::path::absolute(path))?;
    Ok(path.to_string_lossy().into_owned())
}

async fn run(args: Args) -> anyhow::Result<()> {
    match &args.command {
        Commands::Init { path } => {
            let root = args.vault.as_deref().unwrap_or(path);
            let vault = Vault::init(root).await?;
            println!("Initialized vault at {}", vault.root().display());
            println!("Database location: {}", vault.database_path().display());
            Ok(())
        }
        Commands::Ingest { path, format } => {
            let vault = open_vault(&args)?;
            let config = load_config(&args, &vault)?;
            let embedder = compass_embed::create_provider(config.embed_config())
                .await
                .context("creating embedder")?;
            let store = Arc::new(vault.store().await?);

            let pipeline = IngestionPipeline::new(
                IngestionConfig::from(&config),
                LoaderRegistry::default(),
                embedder,
                store,
            )
            .await?;
            let report = pipeline.ingest(path).await;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&report.summary())?);
                }
                OutputFormat::Summary => {
                    println!(
                        "Processed {} files ({} stored, {} unchanged), skipped {}, failed {}",
                        report.processed(),
                        report.succeeded.len(),
                        report.unchanged.len(),
                        report.skipped.len(),
                        report.failed.len()
                    );
                    println!("Chunks written: {}", report.chunks_written);
                    for failure in &report.failed {
                        println!(
                            "  ✗ {} ({} failed: {})",
                            failure.path.display(),
                            failure.stage,
                            failure.reason
                        );
                    }
                }
            }
            Ok(())
        }
        Commands::Query {
            text,
            top_k,
            format,
        } => {
            let vault = open_vault(&args)?;
            let config = load_config(&args, &vault)?;
            let embedder = compass_embed::create_provider(config.embed_config())
                .await
                .context("creating embedder")?;
            let store = Arc::new(vault.store().await?);

            let retriever = Retriever::new(store, embedder).await?;
            let engine = QueryEngine::new(retriever, config.rag().reranker, config.rag().top_k);
            let answer = engine.query(text, *top_k).await;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&answer)?);
                }
                OutputFormat::Summary => {
                    if let Some(error) = &answer.error {
                        return Err(anyhow::anyhow!("Query failed: {error}"));
                    }
                    if answer.is_empty() {
                        println!("No matching passages.");
                    } else {
                        println!("{}\n\n{}", answer.context, answer.citations);
                    }
                }
            }
            Ok(())
        }
        Commands::Stats { format } => {
            let vault = open_vault(&args)?;
            let store = vault.store().await?;
            let stats = store.stats().await?;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&stats)?);
                }
                OutputFormat::Summary => {
                    println!("Vault: {}", vault.root().display());
                    println!("  Documents: {}", stats.documents);
                    println!("  Chunks: {}", stats.chunks);
                    println!("  Chunks with embeddings: {}", stats.embedded_chunks);
                    println!("  Embedding dimensions: {:?}", stats.embedding_dimensions);
                    for model in &stats.models {
                        println!("  Model: {}", model.model_id);
                    }
                }
            }
            Ok(())
        }
        Commands::List { limit, format } => {
            let vault = open_vault(&args)?;
            let store = vault.store().await?;
            let mut documents = store.list_documents().await?;
            documents.truncate(*limit);

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&documents)?);
                }
                OutputFormat::Summary => {
                    println!("Found {} documents:", documents.len());
                    for document in documents {
                        println!(
                            "  {} | Chunks: {} ({} embedded) | Updated: {}",
                            document.path,
                            document.chunk_count,
                            document.embedded_chunks,
                            document.updated_at.format("%Y-%m-%d %H:%M")
                        );
                    }
                }
            }
            Ok(())
        }
        Commands::Forget { path } => {
            let vault = open_vault(&args)?;
            let store = vault.store().await?;
            let key = document_key(path)?;
            if store.delete_document(&key).await? {
                println!("Removed {key}");
            } else {
                println!("Not in the store: {key}");
            }
            Ok(())
        }
    }
}
