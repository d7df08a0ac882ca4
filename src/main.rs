use clap::{Args, Parser, Subcommand};
use shardfs::client::Client;
use shardfs::config::{
    self, CoordinatorConfig, DEFAULT_COORDINATOR_ADDR, DEFAULT_PDF_SHARD_ADDR,
    DEFAULT_TEXT_SHARD_ADDR, ShardConfig,
};
use shardfs::error::TransportError;
use shardfs::routing::types::{Category, ShardMapping};
use shardfs::server::listener;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

#[derive(Parser, Debug)]
#[command(name = "shardfs")]
#[command(about = "Sharded file storage: a coordinator and per-category shard nodes")]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the client-facing coordinator
    Coordinator(CoordinatorArgs),
    /// Run a shard node for one category
    Shard(ShardArgs),
    /// Send one command to a coordinator
    Client(ClientArgs),
}

#[derive(Args, Debug)]
struct CoordinatorArgs {
    #[arg(long, default_value = DEFAULT_COORDINATOR_ADDR)]
    bind: SocketAddr,

    /// Directory holding the coordinator's own files
    #[arg(long, default_value = "~/smain")]
    root: PathBuf,

    #[arg(long, default_value = DEFAULT_PDF_SHARD_ADDR)]
    pdf_shard: SocketAddr,

    #[arg(long, default_value = DEFAULT_TEXT_SHARD_ADDR)]
    text_shard: SocketAddr,

    /// Directory `~` stands for in client paths
    #[arg(long, env = "HOME")]
    home: PathBuf,

    /// JSON shard mapping; overrides --pdf-shard and --text-shard
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ShardArgs {
    /// Category served by this shard (c, pdf or txt)
    #[arg(long)]
    category: Category,

    #[arg(long)]
    bind: SocketAddr,

    /// Storage directory (defaults to ~/<segment>)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Path segment standing for the root (defaults to the category's standard one)
    #[arg(long)]
    segment: Option<String>,

    #[arg(long, env = "HOME")]
    home: PathBuf,
}

#[derive(Args, Debug)]
struct ClientArgs {
    #[arg(long, default_value = "127.0.0.1:8086")]
    addr: SocketAddr,

    /// ufile <file> <dest> | dfile <path> | rmfile <path> | dtar <ext> | display <dir>
    #[arg(required = true, num_args = 1..)]
    words: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    match cli.command {
        Commands::Coordinator(args) => run_coordinator(args).await,
        Commands::Shard(args) => run_shard(args).await,
        Commands::Client(args) => run_client(args).await,
    }
}

async fn run_coordinator(args: CoordinatorArgs) -> anyhow::Result<()> {
    let mapping = match &args.config {
        Some(path) => config::load_mapping(path)?,
        None => ShardMapping::standard(args.pdf_shard, args.text_shard),
    };

    for entry in mapping.entries() {
        tracing::info!(
            "{} -> {} ({:?}, segment '{}')",
            entry.category,
            entry.shard,
            entry.target,
            entry.root_segment
        );
    }

    let settings = CoordinatorConfig {
        bind: args.bind,
        root: config::expand_local(&args.root, &args.home),
        home: args.home,
        mapping,
    };
    let bind = settings.bind;
    let node = Arc::new(settings.into_node()?);

    let listener = listener::bind(bind).await?;
    tracing::info!("Press Ctrl+C to shutdown");
    listener::serve(listener, node, shutdown_signal()).await
}

async fn run_shard(args: ShardArgs) -> anyhow::Result<()> {
    let segment = args
        .segment
        .unwrap_or_else(|| args.category.default_root_segment().to_string());
    let root = match args.root {
        Some(root) => config::expand_local(&root, &args.home),
        None => args.home.join(&segment),
    };

    let settings = ShardConfig {
        bind: args.bind,
        category: args.category,
        root,
        root_segment: segment,
    };
    let bind = settings.bind;
    let node = Arc::new(settings.into_node()?);

    let listener = listener::bind(bind).await?;
    tracing::info!("Press Ctrl+C to shutdown");
    listener::serve(listener, node, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn run_client(args: ClientArgs) -> anyhow::Result<()> {
    let client = Client::new(args.addr);
    let words: Vec<&str> = args.words.iter().map(String::as_str).collect();

    match words.as_slice() {
        ["ufile", file, dest] => {
            let status = client.upload_file(Path::new(file), dest).await?;
            println!("{}", status);
        }
        ["dfile", path] => {
            let name = path.rsplit('/').next().unwrap_or(*path);
            let mut file = tokio::fs::File::create(name).await?;
            let result = client.download_to(path, &mut file).await;
            let bytes = finish_download(name, file, result).await?;
            println!("File '{}' downloaded ({} bytes)", name, bytes);
        }
        ["rmfile", path] => {
            println!("{}", client.delete(path).await?);
        }
        ["dtar", ext] => {
            let category: Category = ext.parse()?;
            let name = category.archive_name();
            let mut file = tokio::fs::File::create(&name).await?;
            let result = client.archive_to(ext, &mut file).await;
            let bytes = finish_download(&name, file, result).await?;
            println!("Archive '{}' downloaded ({} bytes)", name, bytes);
        }
        ["display", dir] => {
            for entry in client.display(dir).await? {
                println!("{}", entry);
            }
        }
        _ => anyhow::bail!("unrecognised command: {}", args.words.join(" ")),
    }

    Ok(())
}

/// Flushes a finished download, or removes the partial file if it failed.
async fn finish_download(
    name: &str,
    mut file: tokio::fs::File,
    result: Result<u64, TransportError>,
) -> anyhow::Result<u64> {
    match result {
        Ok(bytes) => {
            file.flush().await?;
            Ok(bytes)
        }
        Err(e) => {
            drop(file);
            if let Err(rm) = tokio::fs::remove_file(name).await {
                tracing::debug!("Could not remove partial download {}: {}", name, rm);
            }
            Err(e.into())
        }
    }
}
