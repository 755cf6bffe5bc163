//! Read-only Reddit JSON API client
//!
//! Talks to the public `.json` endpoints without authentication. Listings
//! arrive as `{"kind": "Listing", "data": {"children": [...], "after": ...}}`
//! envelopes whose children are tagged things (`t3` posts, `t1` comments,
//! `more` stubs). A comment's `replies` field is either such a listing or an
//! empty string, which is why it gets a custom deserializer.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::time::Duration;

const BASE_URL: &str = "https://www.reddit.com";
const USER_AGENT: &str = concat!("reddit-nntp/", env!("CARGO_PKG_VERSION"));

/// Maximum page size the listing endpoints accept
pub const PAGE_LIMIT: u32 = 100;

/// A subreddit post (`t3` thing)
#[derive(Debug, Clone, Deserialize)]
pub struct Post {
    pub id: String,
    /// Full id, e.g. `t3_abc123`
    pub name: String,
    pub subreddit: String,
    /// Full subreddit id, e.g. `t5_2qh23`
    pub subreddit_id: String,
    pub title: String,
    #[serde(default)]
    pub author: String,
    pub created_utc: f64,
    #[serde(default)]
    pub selftext: String,
}

impl Post {
    pub fn created(&self) -> DateTime<Utc> {
        epoch_to_utc(self.created_utc)
    }
}

/// A comment (`t1` thing) with its direct replies
#[derive(Debug, Clone, Deserialize)]
pub struct Comment {
    /// Full id, e.g. `t1_def456`
    pub name: String,
    /// Full id of the parent post or comment
    pub parent_id: String,
    pub subreddit: String,
    pub subreddit_id: String,
    #[serde(default)]
    pub author: String,
    pub created_utc: f64,
    #[serde(default)]
    pub body: String,
    #[serde(default, deserialize_with = "replies_listing")]
    pub replies: Vec<Comment>,
}

impl Comment {
    pub fn created(&self) -> DateTime<Utc> {
        epoch_to_utc(self.created_utc)
    }
}

fn epoch_to_utc(epoch: f64) -> DateTime<Utc> {
    Utc.timestamp_opt(epoch as i64, 0)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Accept either a listing envelope or the empty string Reddit sends for
/// leaf comments
fn replies_listing<'de, D>(deserializer: D) -> Result<Vec<Comment>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(comments_from_listing(&value))
}

/// Extract the `t1` children of a listing envelope, skipping `more` stubs
fn comments_from_listing(value: &Value) -> Vec<Comment> {
    let Some(children) = value
        .get("data")
        .and_then(|data| data.get("children"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };
    children
        .iter()
        .filter(|thing| thing.get("kind").and_then(Value::as_str) == Some("t1"))
        .filter_map(|thing| thing.get("data"))
        .filter_map(|data| serde_json::from_value(data.clone()).ok())
        .collect()
}

fn posts_from_listing(value: &Value) -> Vec<Post> {
    let Some(children) = value
        .get("data")
        .and_then(|data| data.get("children"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };
    children
        .iter()
        .filter(|thing| thing.get("kind").and_then(Value::as_str) == Some("t3"))
        .filter_map(|thing| thing.get("data"))
        .filter_map(|data| serde_json::from_value(data.clone()).ok())
        .collect()
}

fn after_cursor(value: &Value) -> Option<String> {
    value
        .get("data")
        .and_then(|data| data.get("after"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[derive(Debug, Clone)]
pub struct RedditClient {
    http: reqwest::Client,
    base_url: String,
}

impl RedditClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()
            .context("could not build HTTP client")?;
        Ok(Self {
            http,
            base_url: BASE_URL.to_string(),
        })
    }

    /// Point the client at a different endpoint (testing)
    #[doc(hidden)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        if !response.status().is_success() {
            return Err(anyhow!("request to {url} failed: HTTP {}", response.status()));
        }
        response
            .json()
            .await
            .with_context(|| format!("could not decode response from {url}"))
    }

    /// One page of a subreddit's newest posts, plus the next-page cursor
    pub async fn new_posts(
        &self,
        subreddit: &str,
        after: Option<&str>,
    ) -> Result<(Vec<Post>, Option<String>)> {
        let mut url = format!(
            "{}/r/{}/new.json?limit={}",
            self.base_url, subreddit, PAGE_LIMIT
        );
        if let Some(after) = after {
            url.push_str("&after=");
            url.push_str(after);
        }
        let listing = self.get_json(&url).await?;
        Ok((posts_from_listing(&listing), after_cursor(&listing)))
    }

    /// The full comment tree for a post
    ///
    /// The endpoint answers a two-element array: the post listing and the
    /// comment listing.
    pub async fn post_comments(&self, post_id: &str) -> Result<Vec<Comment>> {
        let url = format!("{}/comments/{}.json", self.base_url, post_id);
        let value = self.get_json(&url).await?;
        let comment_listing = value
            .get(1)
            .ok_or_else(|| anyhow!("comment response for {post_id} missing comment listing"))?;
        Ok(comments_from_listing(comment_listing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn comment_thing(name: &str, replies: Value) -> Value {
        json!({
            "kind": "t1",
            "data": {
                "name": name,
                "parent_id": "t3_post",
                "subreddit": "rust",
                "subreddit_id": "t5_x",
                "author": "alice",
                "created_utc": 1717243800.0,
                "body": "text",
                "replies": replies,
            }
        })
    }

    #[test]
    fn test_comments_from_listing_skips_more_stubs() {
        let listing = json!({
            "kind": "Listing",
            "data": {
                "children": [
                    comment_thing("t1_a", json!("")),
                    { "kind": "more", "data": { "count": 12, "children": [] } },
                ]
            }
        });
        let comments = comments_from_listing(&listing);
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].name, "t1_a");
        assert!(comments[0].replies.is_empty());
    }

    #[test]
    fn test_nested_replies_deserialize_recursively() {
        let nested = json!({
            "kind": "Listing",
            "data": { "children": [comment_thing("t1_child", json!(""))] }
        });
        let listing = json!({
            "kind": "Listing",
            "data": { "children": [comment_thing("t1_parent", nested)] }
        });
        let comments = comments_from_listing(&listing);
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].replies.len(), 1);
        assert_eq!(comments[0].replies[0].name, "t1_child");
    }

    #[test]
    fn test_posts_from_listing_reads_cursor() {
        let listing = json!({
            "kind": "Listing",
            "data": {
                "after": "t3_next",
                "children": [{
                    "kind": "t3",
                    "data": {
                        "id": "abc",
                        "name": "t3_abc",
                        "subreddit": "rust",
                        "subreddit_id": "t5_x",
                        "title": "hello",
                        "author": "alice",
                        "created_utc": 1717243800.0,
                        "selftext": "body",
                    }
                }]
            }
        });
        let posts = posts_from_listing(&listing);
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].name, "t3_abc");
        assert_eq!(after_cursor(&listing), Some("t3_next".to_string()));
    }

    #[test]
    fn test_after_cursor_absent_when_null() {
        let listing = json!({ "kind": "Listing", "data": { "after": null, "children": [] } });
        assert_eq!(after_cursor(&listing), None);
    }

    #[test]
    fn test_created_handles_bad_epoch() {
        let post = Post {
            id: "a".into(),
            name: "t3_a".into(),
            subreddit: "rust".into(),
            subreddit_id: "t5_x".into(),
            title: "t".into(),
            author: "alice".into(),
            created_utc: f64::MAX,
            selftext: String::new(),
        };
        assert_eq!(post.created(), DateTime::UNIX_EPOCH);
    }
}
