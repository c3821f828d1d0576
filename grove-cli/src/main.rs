//! Grove CLI - one-shot queries against a fresh mirror of a repository

use clap::{Parser, Subcommand};
use colored::Colorize;
use grove_core::{Config, ErrorEnvelope, MatchRecord, RepositoryService, ServiceOptions};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "grove")]
#[command(about = "Search and read a mirrored repository", long_about = None)]
struct Cli {
    /// Repository URL to mirror (overrides repository.url)
    #[arg(long, global = true, env = "GROVE_REPO_URL")]
    repo: Option<String>,

    /// Path to a grove TOML config file
    #[arg(long, global = true, env = "GROVE_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search file contents with a regular expression
    Search {
        /// Regular expression (ripgrep syntax)
        pattern: String,

        /// Only search files matching this glob
        #[arg(short, long)]
        glob: Option<String>,

        /// Maximum matches to print (default from config)
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print a file, or a range of its lines
    Read {
        /// Path relative to the repository root
        path: String,

        /// First line to print (1-based)
        #[arg(long, allow_hyphen_values = true)]
        start: Option<i64>,

        /// Line to stop before
        #[arg(long, allow_hyphen_values = true)]
        end: Option<i64>,
    },

    /// List files matching a glob pattern
    Glob {
        /// Glob pattern (e.g., "**/*.md")
        pattern: String,
    },

    /// Print the context file
    Context {
        /// File to serve instead of repository.context_file
        #[arg(long)]
        file: Option<String>,
    },

    /// Print a default config file
    Config,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(&cli).await {
        if cli.json {
            let envelope = ErrorEnvelope::from(&e);
            eprintln!(
                "{}",
                serde_json::to_string_pretty(&envelope).unwrap_or_else(|_| e.to_string())
            );
        } else {
            eprintln!("{}: {}", "Error".red(), e);
        }
        std::process::exit(1);
    }
}

async fn run(cli: &Cli) -> grove_core::Result<()> {
    if let Commands::Config = cli.command {
        print!("{}", grove_core::config::DEFAULT_CONFIG);
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(url) = &cli.repo {
        config.repository.url = url.clone();
    }
    if let Commands::Context { file: Some(file) } = &cli.command {
        config.repository.context_file = file.clone();
    }

    let service = RepositoryService::start(ServiceOptions::from_config(&config)?);
    service.wait_ready().await?;

    match &cli.command {
        Commands::Search {
            pattern,
            glob,
            limit,
        } => {
            let limit = limit.unwrap_or(config.search.max_results);
            let matches = service.search(pattern, glob.as_deref(), limit).await?;
            print_matches(&matches, cli.json);
        }
        Commands::Read { path, start, end } => {
            let text = service.read_file_range(path, *start, *end).await?;
            if cli.json {
                let value = serde_json::json!({ "path": path, "content": text });
                println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
            } else {
                print!("{}", text);
            }
        }
        Commands::Glob { pattern } => {
            let paths = service.glob(pattern).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&paths).unwrap_or_default());
            } else {
                for path in &paths {
                    println!("{}", path);
                }
            }
        }
        Commands::Context { .. } => {
            let file = service.cached_file().await?;
            if cli.json {
                let value = serde_json::json!({ "path": file.path, "content": &*file.content });
                println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
            } else {
                println!("{}", format!("// {}", file.path).dimmed());
                print!("{}", file.content);
            }
        }
        Commands::Config => unreachable!("handled before cloning"),
    }

    Ok(())
}

fn print_matches(matches: &[MatchRecord], json: bool) {
    if json {
        println!("{}", serde_json::to_string_pretty(matches).unwrap_or_default());
        return;
    }

    if matches.is_empty() {
        println!("{}", "No matches".yellow());
        return;
    }

    for m in matches {
        println!(
            "{}:{}: {}",
            m.path.cyan(),
            m.line_number.to_string().green(),
            m.line_text
        );
    }
    println!("\n{} {}", matches.len().to_string().bold(), "matches".dimmed());
}
