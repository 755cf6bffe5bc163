//! Article spool façade
//!
//! Sits between the protocol layer and the store: translates stored rows to
//! protocol-form [`Header`]s and [`Article`]s, maps `(group, article number)`
//! pairs to storage rows through the row-id cache, lists groups, and ingests
//! crawled posts and comment trees as [`ArticleRecord`]s.

mod cache;

use std::collections::VecDeque;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::reddit::client::{Comment, Post};
use crate::store::{ArticleRecord, Db, DbHeader, GroupMetadata, StoreError};

use cache::RowIdCache;

/// `Date:` header format (e.g. `01 Jun 2024 12:30 +0000`)
pub const NNTP_DATE_FORMAT: &str = "%d %b %Y %H:%M %z";

/// Retention recorded for newly discovered groups; never enforced at read
/// time.
const DEFAULT_DAYS_RETAINED: u32 = 7;

/// Errors surfaced by the spool façade
#[derive(Debug, Error)]
pub enum SpoolError {
    /// The requested article number is past the end of the group.
    ///
    /// A sentinel rather than a failure: the protocol layer answers 423
    /// without logging at error level.
    #[error("article not found")]
    ArticleNumNotFound,

    #[error("cannot serve article #{0}")]
    BadArticleNumber(u64),

    #[error("no headers found for group {group}")]
    NoArticles { group: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SpoolError {
    /// True for the lookup-miss family the protocol maps to 423
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ArticleNumNotFound | Self::BadArticleNumber(_) | Self::NoArticles { .. }
        )
    }
}

/// An article header in protocol form
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub posted_at: DateTime<Utc>,
    pub newsgroup: String,
    pub subject: String,
    pub author: String,
    pub msg_id: String,
    pub references: Vec<String>,
}

impl Header {
    /// Render the header block, one LF-terminated line per field
    ///
    /// Field order is fixed; `References:` appears only when non-empty.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("Path: reddit!not-for-mail\n");
        out.push_str("From: ");
        out.push_str(&self.author);
        out.push('\n');
        out.push_str("Newsgroups: ");
        out.push_str(&self.newsgroup);
        out.push('\n');
        out.push_str("Subject: ");
        out.push_str(&clean_text(&self.subject));
        out.push('\n');
        out.push_str("Date: ");
        out.push_str(&self.posted_at.format(NNTP_DATE_FORMAT).to_string());
        out.push('\n');
        out.push_str("Message-ID: ");
        out.push_str(&self.msg_id);
        out.push('\n');
        if !self.references.is_empty() {
            out.push_str("References: ");
            out.push_str(&self.references.join(","));
            out.push('\n');
        }
        out
    }
}

/// A full article: header plus body bytes
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub header: Header,
    pub body: Vec<u8>,
}

impl Article {
    /// Render header block, separating blank line, and cleaned body
    pub fn render(&self) -> Vec<u8> {
        let mut out = self.header.render().into_bytes();
        out.push(b'\n');
        out.extend_from_slice(&clean_body(&self.body));
        out
    }
}

/// Strip the zero-width-space entity, then unescape HTML entities
fn clean_text(text: &str) -> String {
    let stripped = text.replace("&#x200B;", "");
    html_escape::decode_html_entities(&stripped).into_owned()
}

fn clean_body(body: &[u8]) -> Vec<u8> {
    clean_text(&String::from_utf8_lossy(body)).into_bytes()
}

fn header_from_db(db_header: DbHeader) -> Header {
    // A timestamp that fails to parse renders as the Unix epoch rather than
    // dropping the article.
    let posted_at =
        crate::store::from_db_time(&db_header.posted_at).unwrap_or(DateTime::UNIX_EPOCH);
    let references = if db_header.parent_id.is_empty() {
        Vec::new()
    } else {
        vec![db_header.parent_id]
    };
    Header {
        posted_at,
        newsgroup: db_header.newsgroup,
        subject: db_header.subject,
        author: db_header.author,
        msg_id: db_header.message_id,
        references,
    }
}

/// Convert a crawled post to its storage record
pub fn post_to_record(post: &Post, prefix: &str) -> ArticleRecord {
    ArticleRecord {
        posted_at: post.created(),
        newsgroup: format!("{prefix}.{}", post.subreddit.to_lowercase()),
        subject: post.title.clone(),
        author: format!("{0} <{0}@{prefix}>", post.author),
        message_id: format!("<{}.{}.{prefix}.nntp>", post.name, post.subreddit_id),
        parent_id: String::new(),
        body: post.selftext.clone().into_bytes(),
    }
}

/// Convert a crawled comment to its storage record
///
/// `title` is the parent post's subject; the comment threads under it via
/// `Re:` and the parent message-id.
pub fn comment_to_record(comment: &Comment, title: &str, prefix: &str) -> ArticleRecord {
    ArticleRecord {
        posted_at: comment.created(),
        newsgroup: format!("{prefix}.{}", comment.subreddit.to_lowercase()),
        subject: format!("Re: {title}"),
        author: format!("{0} <{0}@{prefix}>", comment.author),
        message_id: format!("<{}.{}.{prefix}.nntp>", comment.name, comment.subreddit_id),
        parent_id: format!("<{}.{}.{prefix}.nntp>", comment.parent_id, comment.subreddit_id),
        body: comment.body.clone().into_bytes(),
    }
}

/// The article spool: store handle, row-id cache, and memoized config
#[derive(Debug)]
pub struct Spool {
    db: Db,
    cache: RowIdCache,
    prefix: OnceLock<String>,
    start_date: OnceLock<DateTime<Utc>>,
}

impl Spool {
    pub fn new(db: Db) -> Self {
        Self {
            db,
            cache: RowIdCache::new(),
            prefix: OnceLock::new(),
            start_date: OnceLock::new(),
        }
    }

    /// Initialize the backing database schema
    pub fn init(&self, start_date: DateTime<Utc>, prefix: &str) -> Result<(), SpoolError> {
        self.db.create_new_spool(start_date, prefix)?;
        Ok(())
    }

    /// The configured hierarchy prefix, fetched once
    pub fn prefix(&self) -> Result<&str, SpoolError> {
        if let Some(prefix) = self.prefix.get() {
            return Ok(prefix);
        }
        let fetched = self.db.prefix()?;
        Ok(self.prefix.get_or_init(|| fetched))
    }

    /// The crawl start date, fetched once
    pub fn start_date(&self) -> Result<DateTime<Utc>, SpoolError> {
        if let Some(date) = self.start_date.get() {
            return Ok(*date);
        }
        let fetched = self.db.start_date()?;
        Ok(*self.start_date.get_or_init(|| fetched))
    }

    /// All known newsgroups (the `groups` table only)
    pub fn newsgroups(&self) -> Result<Vec<String>, SpoolError> {
        Ok(self.db.fetch_newsgroups()?)
    }

    /// Newsgroups created strictly after `since`
    pub fn new_groups(&self, since: DateTime<Utc>) -> Result<Vec<String>, SpoolError> {
        Ok(self.db.fetch_new_groups(since)?)
    }

    pub fn group_article_count(&self, group: &str) -> Result<u64, SpoolError> {
        Ok(self.db.group_article_count(group)?)
    }

    /// The group's article numbers, 1-based and dense
    pub fn article_nums(&self, group: &str) -> Result<Vec<u64>, SpoolError> {
        let row_ids = self.cache.row_ids(group, &self.db)?;
        Ok((1..=row_ids.len() as u64).collect())
    }

    pub fn header_by_group_num(&self, group: &str, article_num: u64) -> Result<Header, SpoolError> {
        let row_id = self.cache.article_num_to_row_id(group, article_num, &self.db)?;
        self.db
            .header_by_row_id(row_id)?
            .map(header_from_db)
            .ok_or(SpoolError::ArticleNumNotFound)
    }

    pub fn article_by_group_num(
        &self,
        group: &str,
        article_num: u64,
    ) -> Result<Article, SpoolError> {
        let row_id = self.cache.article_num_to_row_id(group, article_num, &self.db)?;
        let db_article = self
            .db
            .article_by_row_id(row_id)?
            .ok_or(SpoolError::ArticleNumNotFound)?;
        Ok(Article {
            header: header_from_db(db_article.header),
            body: db_article.body,
        })
    }

    pub fn header_by_msg_id(&self, msg_id: &str) -> Result<Header, SpoolError> {
        self.db
            .header_by_msg_id(msg_id)?
            .map(header_from_db)
            .ok_or(SpoolError::ArticleNumNotFound)
    }

    pub fn article_by_msg_id(&self, msg_id: &str) -> Result<Article, SpoolError> {
        let db_article = self
            .db
            .article_by_msg_id(msg_id)?
            .ok_or(SpoolError::ArticleNumNotFound)?;
        Ok(Article {
            header: header_from_db(db_article.header),
            body: db_article.body,
        })
    }

    /// Record group metadata for a subreddit (idempotent on the group name)
    pub fn add_group(&self, subreddit: &str) -> Result<(), SpoolError> {
        let prefix = self.prefix()?;
        let gm = GroupMetadata {
            name: format!("{prefix}.{}", subreddit.to_lowercase()),
            date_created: Utc::now(),
            days_retained: DEFAULT_DAYS_RETAINED,
        };
        Ok(self.db.insert_group_metadata(&gm)?)
    }

    /// Insert a post and its flattened comment tree
    ///
    /// Inserts are idempotent on message-id, so re-crawling a thread only
    /// adds comments that appeared since the last pass.
    pub fn add_post_and_comments(
        &self,
        post: &Post,
        comments: &[Comment],
    ) -> Result<(), SpoolError> {
        let prefix = self.prefix()?.to_string();
        let post_record = post_to_record(post, &prefix);
        self.db.insert_article_record(&post_record)?;

        let mut stack: VecDeque<&Comment> = comments.iter().collect();
        while let Some(comment) = stack.pop_front() {
            stack.extend(comment.replies.iter());
            let record = comment_to_record(comment, &post_record.subject, &prefix);
            self.db.insert_article_record(&record)?;
        }
        Ok(())
    }

    pub fn article_count(&self) -> Result<u64, SpoolError> {
        Ok(self.db.article_count()?)
    }
}
