use anyhow::Result;
use axum::Router;
use clap::Parser;
use server::{build_app, ServerConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Product dataset (JSON array or JSONL)
    #[arg(long, default_value = "./data/fashion_products_dataset.json")]
    data: PathBuf,
    /// Index directory written by `indexer build`
    #[arg(long, default_value = "./index")]
    index: PathBuf,
    /// Build the index in memory at startup instead of loading it
    #[arg(long, default_value_t = false)]
    build_index: bool,
    /// Binary word2vec model enabling the word2vec ranking method
    #[arg(long)]
    word2vec: Option<PathBuf>,
    /// Only read the first N vectors of the model
    #[arg(long, default_value_t = 500_000)]
    w2v_limit: usize,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8088)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();
    let args = Args::parse();
    let config = ServerConfig {
        data: args.data,
        index_dir: args.index,
        build_index: args.build_index,
        word2vec: args.word2vec,
        word2vec_limit: Some(args.w2v_limit),
    };
    let app: Router = build_app(&config)?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
