//! Grove MCP Server - MCP interface to a live mirror of one repository

mod server;

use clap::Parser;
use grove_core::{Config, RepositoryService, ServiceOptions};
use server::McpServer;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "grove-mcp")]
#[command(about = "MCP server for searching a mirrored repository", long_about = None)]
struct Args {
    /// Repository URL to mirror (overrides repository.url)
    #[arg(long, env = "GROVE_REPO_URL")]
    repo: Option<String>,

    /// Path to a grove TOML config file
    #[arg(long, env = "GROVE_CONFIG")]
    config: Option<PathBuf>,

    /// Context file served by repo_context (overrides repository.context_file)
    #[arg(long)]
    context_file: Option<String>,
}

fn load_options(args: &Args) -> grove_core::Result<(ServiceOptions, usize)> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(url) = &args.repo {
        config.repository.url = url.clone();
    }
    if let Some(name) = &args.context_file {
        config.repository.context_file = name.clone();
    }
    Ok((
        ServiceOptions::from_config(&config)?,
        config.search.max_results,
    ))
}

#[tokio::main]
async fn main() {
    // stdout carries JSON-RPC, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let (options, max_results) = match load_options(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    tracing::info!(url = %options.url, "grove-mcp starting");
    let service = Arc::new(RepositoryService::start(options));

    // A failed clone means nothing can ever be served
    {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            if let Err(e) = service.wait_ready().await {
                tracing::error!(error = %e, "initial clone failed, exiting");
                std::process::exit(1);
            }
        });
    }

    let server = McpServer::new(service, max_results);
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(resp) = rx.recv().await {
            if stdout.write_all(resp.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
                || stdout.flush().await.is_err()
            {
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(l)) => l,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "stdin read failed");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        // Each request runs on its own task so slow searches do not block reads
        let server = server.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Some(resp) = server.handle_request(&line).await {
                let _ = tx.send(resp);
            }
        });
    }

    drop(tx);
    let _ = writer.await;
}
