//! `salmon` — index articles and videos, then search them semantically.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::Table;
use tracing_subscriber::FmtSubscriber;

use salmon_search::{
    ChunkMatch, EmbeddingProvider, IngestOutcome, IngestReport, IngestionCoordinator,
    MockEmbeddingProvider, OpenAiEmbeddingProvider, Resource, Retriever, SalmonError, SalmonStore,
};

#[derive(Parser, Debug)]
#[command(name = "salmon", version, about = "Semantic article index and search")]
struct Cli {
    /// Path to the salmon database file.
    #[arg(long, global = true, env = "SALMON_DB", default_value = "salmon.db")]
    db: PathBuf,

    /// Base URL of an OpenAI-compatible embeddings endpoint.
    #[arg(
        long,
        global = true,
        env = "SALMON_EMBEDDINGS_URL",
        default_value = "http://localhost:11434"
    )]
    embeddings_url: String,

    /// Embedding model to request from the endpoint.
    #[arg(
        long,
        global = true,
        env = "SALMON_EMBEDDING_MODEL",
        default_value = "all-minilm"
    )]
    embedding_model: String,

    /// API key for the embeddings endpoint, if it requires one.
    #[arg(long, global = true, env = "SALMON_API_KEY")]
    api_key: Option<String>,

    /// Use the deterministic offline embedder instead of the HTTP endpoint.
    #[arg(long, global = true, env = "SALMON_MOCK_EMBEDDINGS")]
    mock_embeddings: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize the database. Must be called before any other command.
    Init {
        /// Embedding vector size; fixed for the lifetime of the index.
        #[arg(long, default_value_t = 384)]
        dimensions: usize,
    },

    /// Index a resource (article or video) or a file of URLs, one per line.
    Index {
        /// URL of the resource to index.
        #[arg(long)]
        url: Option<String>,

        /// Path to a file with URLs of resources to index.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Semantically search indexed resources.
    Search {
        /// Search query.
        query: String,

        /// Number of text chunks to compare the query to.
        #[arg(long, default_value_t = 100)]
        n: usize,

        /// Output format.
        #[arg(long, value_enum, default_value = "table")]
        output: OutputFormat,

        /// Rank individual chunks instead of distinct resources.
        #[arg(long)]
        chunks: bool,
    },

    /// Delete a resource and un-index its chunks.
    Delete {
        /// Id of the resource to delete.
        resource_id: i64,
    },

    /// Get a resource or a chunk by id.
    Get {
        /// Resource id to look up.
        #[arg(long)]
        rid: Option<i64>,

        /// Chunk id to look up.
        #[arg(long)]
        cid: Option<i64>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), SalmonError> {
    match cli.command {
        Command::Init { dimensions } => {
            SalmonStore::create(&cli.db, dimensions).await?;
            println!(
                "Initialized {} ({dimensions}-dimensional index)",
                cli.db.display()
            );
            Ok(())
        }

        Command::Index { ref url, ref file } => {
            let urls = collect_urls(url.as_deref(), file.as_deref()).await?;
            let store = SalmonStore::open(&cli.db).await?;
            let embedder = make_embedder(&cli, store.dimensions())?;
            let coordinator = IngestionCoordinator::new(store, embedder)?;

            let reports = coordinator.ingest_batch(&urls).await?;
            print_ingest_reports(&reports);
            Ok(())
        }

        Command::Search {
            ref query,
            n,
            output,
            chunks,
        } => {
            let store = SalmonStore::open(&cli.db).await?;
            let embedder = make_embedder(&cli, store.dimensions())?;
            let retriever = Retriever::new(store, embedder)?;

            let matches = if chunks {
                retriever.top_chunks(query, n).await?
            } else {
                retriever.top_resources(query, n).await?
            };
            match output {
                OutputFormat::Table => println!("{}", matches_table(&matches)),
                OutputFormat::Json => {
                    let json = serde_json::to_string_pretty(&matches)
                        .map_err(|err| SalmonError::Io(err.to_string()))?;
                    println!("{json}");
                }
            }
            Ok(())
        }

        Command::Delete { resource_id } => {
            let store = SalmonStore::open(&cli.db).await?;
            let deleted = store.delete_resource(resource_id).await?;
            println!("{}", resources_table(std::slice::from_ref(&deleted)));
            Ok(())
        }

        Command::Get { rid, cid } => {
            let store = SalmonStore::open(&cli.db).await?;
            match (rid, cid) {
                (Some(rid), None) => {
                    let resource = store.get_resource(rid).await?;
                    println!("{}", resources_table(std::slice::from_ref(&resource)));
                    Ok(())
                }
                (None, Some(cid)) => {
                    let chunk = store.get_chunk(cid).await?;
                    println!("chunk {} (resource {}):", chunk.id, chunk.resource_id);
                    println!("{}", chunk.text);
                    Ok(())
                }
                _ => Err(SalmonError::InvalidInput(
                    "exactly one of --rid or --cid must be specified".into(),
                )),
            }
        }
    }
}

/// Resolve the URLs to ingest from `--url` or `--file`.
async fn collect_urls(
    url: Option<&str>,
    file: Option<&std::path::Path>,
) -> Result<Vec<String>, SalmonError> {
    match (url, file) {
        (Some(url), None) => Ok(vec![url.to_string()]),
        (None, Some(path)) => {
            let contents = tokio::fs::read_to_string(path).await?;
            Ok(contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect())
        }
        _ => Err(SalmonError::InvalidInput(
            "either --url or --file must be specified".into(),
        )),
    }
}

fn make_embedder(cli: &Cli, dimensions: usize) -> Result<Arc<dyn EmbeddingProvider>, SalmonError> {
    if cli.mock_embeddings {
        Ok(Arc::new(MockEmbeddingProvider::with_dimensions(dimensions)))
    } else {
        Ok(Arc::new(OpenAiEmbeddingProvider::new(
            &cli.embeddings_url,
            cli.embedding_model.clone(),
            dimensions,
            cli.api_key.clone(),
        )?))
    }
}

fn print_ingest_reports(reports: &[IngestReport]) {
    let indexed: Vec<Resource> = reports
        .iter()
        .filter_map(|report| match &report.outcome {
            IngestOutcome::Indexed(resource) => Some(resource.clone()),
            _ => None,
        })
        .collect();

    if !indexed.is_empty() {
        println!("{}", resources_table(&indexed));
    }
    for report in reports {
        match &report.outcome {
            IngestOutcome::Indexed(_) => {}
            IngestOutcome::SkippedDuplicate => {
                println!("skipped {} (already indexed)", report.url);
            }
            IngestOutcome::Failed(message) => {
                println!("failed  {} ({message})", report.url);
            }
        }
    }
}

fn resources_table(resources: &[Resource]) -> Table {
    let mut table = Table::new();
    table.set_header(["id", "url", "title", "#chunks"]);
    for resource in resources {
        table.add_row([
            resource.id.to_string(),
            resource.url.clone(),
            resource.title.clone(),
            resource.chunk_count.to_string(),
        ]);
    }
    table
}

fn matches_table(matches: &[ChunkMatch]) -> Table {
    let mut table = Table::new();
    table.set_header(["#", "dist", "rid", "title", "url", "cid"]);
    for (rank, hit) in matches.iter().enumerate() {
        table.add_row([
            rank.to_string(),
            format!("{:.2}", hit.distance),
            hit.resource_id.to_string(),
            hit.resource_title.clone(),
            hit.resource_url.clone(),
            hit.chunk_id.to_string(),
        ]);
    }
    table
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(
                std::env::var("RUST_LOG").unwrap_or_else(|_| "salmon_search=info".to_string()),
            )
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
