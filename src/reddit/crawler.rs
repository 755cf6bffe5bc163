//! Subreddit crawl orchestration
//!
//! Pages through a subreddit's newest posts behind a one-request-per-second
//! tick, stops at the configured page limit or once a whole page predates
//! the spool start date, then loads each post's comment tree under a
//! concurrency cap and hands the threads to the spool. Inserts are
//! idempotent, so re-crawling only adds what is new.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{self, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::spool::Spool;

use super::client::{Comment, Post, RedditClient};

const REQUEST_TICK: Duration = Duration::from_secs(1);

pub struct Crawler {
    client: RedditClient,
    concurrency_limit: usize,
    page_fetch_limit: u32,
}

impl Crawler {
    pub fn new(client: RedditClient, concurrency_limit: usize, page_fetch_limit: u32) -> Self {
        Self {
            client,
            concurrency_limit: concurrency_limit.max(1),
            page_fetch_limit,
        }
    }

    fn request_tick() -> Interval {
        let mut tick = time::interval(REQUEST_TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick
    }

    /// Crawl every configured subreddit once
    ///
    /// A failing subreddit is logged and skipped so one bad name cannot
    /// starve the rest.
    pub async fn fetch_all(&self, spool: &Spool, subreddits: &[String]) -> Result<()> {
        let start_date = spool
            .start_date()
            .context("could not fetch start date from spool")?;
        for subreddit in subreddits {
            info!(subreddit = %subreddit, "crawling subreddit");
            if let Err(e) = self.fetch_subreddit(spool, subreddit, start_date).await {
                warn!(subreddit = %subreddit, "crawl failed: {e:#}");
            }
        }
        Ok(())
    }

    /// Crawl one subreddit back to `start_date` and ingest it
    pub async fn fetch_subreddit(
        &self,
        spool: &Spool,
        subreddit: &str,
        start_date: DateTime<Utc>,
    ) -> Result<()> {
        let mut tick = Self::request_tick();
        let mut all_posts: Vec<Post> = Vec::new();
        let mut after: Option<String> = None;

        for _ in 0..self.page_fetch_limit {
            tick.tick().await;
            let (posts, next) = match self.client.new_posts(subreddit, after.as_deref()).await {
                Ok(page) => page,
                Err(e) => {
                    if all_posts.is_empty() {
                        return Err(e)
                            .with_context(|| format!("could not fetch any posts from {subreddit}"));
                    }
                    warn!(subreddit = %subreddit, "page fetch failed, keeping earlier pages: {e:#}");
                    break;
                }
            };
            if posts.is_empty() {
                break;
            }
            debug!(subreddit = %subreddit, "fetched {} posts", posts.len());

            // Pages come newest-first; once a page reaches past the start
            // date there is nothing older worth fetching.
            let oldest = posts.iter().map(Post::created).min();
            all_posts.extend(posts);
            if matches!(oldest, Some(oldest) if start_date > oldest) {
                break;
            }
            match next {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }

        if all_posts.is_empty() {
            bail!("could not fetch any posts from {subreddit}");
        }

        spool
            .add_group(subreddit)
            .context("could not record group metadata")?;

        let semaphore = Arc::new(Semaphore::new(self.concurrency_limit));
        let limiter = Arc::new(Mutex::new(tick));
        let mut handles = Vec::with_capacity(all_posts.len());
        for post in all_posts {
            let client = self.client.clone();
            let semaphore = Arc::clone(&semaphore);
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(load_comments(
                client, post, semaphore, limiter,
            )));
        }

        let mut threads = 0usize;
        for handle in handles {
            let Ok(Some((post, comments))) = handle.await else {
                continue;
            };
            if let Err(e) = spool.add_post_and_comments(&post, &comments) {
                warn!(post_id = %post.id, "error adding thread to spool: {e}");
                continue;
            }
            threads += 1;
        }
        info!(subreddit = %subreddit, "crawl complete: {threads} threads ingested");
        Ok(())
    }
}

/// Fetch one post's comment tree under the shared rate and concurrency caps
async fn load_comments(
    client: RedditClient,
    post: Post,
    semaphore: Arc<Semaphore>,
    limiter: Arc<Mutex<Interval>>,
) -> Option<(Post, Vec<Comment>)> {
    let Ok(_permit) = semaphore.acquire().await else {
        return None;
    };
    limiter.lock().await.tick().await;

    debug!(post_id = %post.id, "fetching comments");
    match client.post_comments(&post.id).await {
        Ok(comments) => {
            debug!(post_id = %post.id, "fetched {} comments", comments.len());
            Some((post, comments))
        }
        Err(e) => {
            warn!(post_id = %post.id, "error fetching comments: {e:#}");
            None
        }
    }
}
