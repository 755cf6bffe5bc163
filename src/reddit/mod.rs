//! Reddit crawler
//!
//! A producer-only collaborator: it reads Reddit's public JSON API and feeds
//! the spool through [`crate::spool::Spool::add_post_and_comments`] and
//! [`crate::spool::Spool::add_group`], sharing no state with live sessions.
//! Newly inserted rows become visible to readers when the row-id cache TTL
//! elapses.

pub mod client;
pub mod crawler;

pub use client::{Comment, Post, RedditClient};
pub use crawler::Crawler;
