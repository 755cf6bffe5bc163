//! # reddit-nntp
//!
//! A read-only NNTP (RFC 3977 MODE READER subset) gateway that exposes
//! Reddit content as a news spool. Subreddits appear as newsgroups under a
//! configurable hierarchy prefix, posts become articles, and comments become
//! follow-ups carrying a `References:` header. Posting is not supported.
//!
//! ## Architecture
//!
//! - **store**: synchronous SQLite data-access layer (the article spool on
//!   disk: `config`, `spool`, and `groups` tables)
//! - **spool**: façade over the store that renders protocol-form headers and
//!   articles, maps per-group article numbers to storage rows through a
//!   short-TTL row-id cache, and ingests crawled records
//! - **nntp**: the reader-protocol server: TCP acceptor, per-connection
//!   reader/processor worker pair, command dispatch, and the dot-stuffed
//!   multi-line reply writer
//! - **reddit**: the crawler: paginated subreddit fetch and comment tree
//!   load over Reddit's public JSON API, feeding the spool
//! - **config**: TOML configuration loading

pub mod config;
pub mod logging;
pub mod nntp;
pub mod reddit;
pub mod spool;
pub mod store;

pub use config::{create_default_config, load_config, Config};
pub use nntp::server::NntpServer;
pub use spool::Spool;
pub use store::Db;
