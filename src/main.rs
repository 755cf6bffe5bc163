use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use reddit_nntp::reddit::{Crawler, RedditClient};
use reddit_nntp::{create_default_config, load_config, logging, Config, Db, NntpServer, Spool};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml", env = "REDDIT_NNTP_CONFIG")]
    config: String,

    /// Path to the spool database
    #[arg(short, long, default_value = "spool.db", env = "REDDIT_NNTP_DB")]
    db: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize a new spool database
    Init {
        /// Newsgroup hierarchy prefix recorded in the spool
        #[arg(long, default_value = "reddit")]
        prefix: String,

        /// Days of history the crawler backfills
        #[arg(long, default_value_t = 7)]
        days_back: i64,
    },
    /// Crawl the configured subreddits into the spool
    Fetch,
    /// Serve the spool over NNTP
    Serve,
}

fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(run(args))
}

async fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Init { prefix, days_back } => {
            let spool = open_spool(&args.db)?;
            let start_date = Utc::now() - chrono::Duration::days(days_back);
            spool
                .init(start_date, &prefix)
                .context("could not initialize spool")?;
            info!("initialized spool database at {}", args.db);
        }
        Command::Fetch => {
            let config = load_or_create_config(&args.config)?;
            if config.subreddits.is_empty() {
                warn!("no subreddits configured, nothing to fetch");
                return Ok(());
            }
            let spool = open_spool(&args.db)?;
            let client = RedditClient::new()?;
            let crawler = Crawler::new(
                client,
                config.concurrency_limit as usize,
                config.page_fetch_limit,
            );
            crawler.fetch_all(&spool, &config.subreddits).await?;
        }
        Command::Serve => {
            let config = load_or_create_config(&args.config)?;
            let spool = Arc::new(open_spool(&args.db)?);
            NntpServer::new(config.listener, spool).run().await?;
        }
    }
    Ok(())
}

fn open_spool(path: &str) -> Result<Spool> {
    let db =
        Db::open(path).with_context(|| format!("could not open spool database '{path}'"))?;
    Ok(Spool::new(db))
}

fn load_or_create_config(path: &str) -> Result<Config> {
    if std::path::Path::new(path).exists() {
        return load_config(path);
    }
    warn!("config file '{path}' not found, creating default config");
    let config = create_default_config();
    let rendered = toml::to_string_pretty(&config)?;
    std::fs::write(path, rendered)
        .with_context(|| format!("could not write default config to '{path}'"))?;
    info!("created default config file: {path}");
    Ok(config)
}
