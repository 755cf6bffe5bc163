//! Configuration loading
//!
//! A small TOML file drives the listener address and the crawler's shape:
//!
//! ```toml
//! listener = "0.0.0.0:1119"
//! concurrency_limit = 4
//! page_fetch_limit = 10
//! subreddits = ["rust", "usenet"]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

mod defaults {
    pub(super) fn listener() -> String {
        "0.0.0.0:1119".to_string()
    }

    /// Concurrent comment-tree fetches per subreddit crawl
    pub(super) const fn concurrency_limit() -> u32 {
        4
    }

    /// Listing pages fetched per subreddit crawl
    pub(super) const fn page_fetch_limit() -> u32 {
        10
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Address the NNTP listener binds to
    pub listener: String,
    /// Concurrent comment-tree fetches while crawling
    pub concurrency_limit: u32,
    /// Listing pages fetched per subreddit before giving up
    pub page_fetch_limit: u32,
    /// Subreddits to crawl (bare names, without the `r/`)
    pub subreddits: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listener: defaults::listener(),
            concurrency_limit: defaults::concurrency_limit(),
            page_fetch_limit: defaults::page_fetch_limit(),
            subreddits: Vec::new(),
        }
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &str) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("could not read config file '{path}'"))?;
    let config: Config =
        toml::from_str(&content).with_context(|| format!("could not parse config file '{path}'"))?;
    Ok(config)
}

/// Default configuration written when no file exists yet
#[must_use]
pub fn create_default_config() -> Config {
    Config {
        subreddits: vec!["usenet".to_string()],
        ..Default::default()
    }
}
