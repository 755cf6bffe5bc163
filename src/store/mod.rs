//! SQLite data-access layer for the article spool
//!
//! Three tables back the spool: `config` (key/value pairs written at
//! initialization), `spool` (one row per article, keyed by an autoincrement
//! row id and a unique message-id), and `groups` (newsgroup metadata used to
//! answer LIST and NEWGROUPS).
//!
//! All operations are synchronous; the connection is guarded by a mutex so a
//! single `Db` can be shared across sessions behind an `Arc`.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;

/// Storage row id (the `article_num` autoincrement column).
///
/// Never exposed to NNTP clients; protocol article numbers are the 1-based
/// index into the per-group `posted_at`-ordered row-id list.
pub type RowId = i64;

const SCHEMA: &str = r#"
CREATE TABLE config(
    k TEXT NOT NULL,
    v TEXT NOT NULL
);
CREATE TABLE spool(
    article_num INTEGER PRIMARY KEY AUTOINCREMENT,
    posted_at   TEXT NOT NULL,
    newsgroup   TEXT NOT NULL,
    subject     TEXT,
    author      TEXT NOT NULL,
    message_id  TEXT UNIQUE NOT NULL,
    parent_id   TEXT,
    body        BLOB NOT NULL
);
CREATE INDEX spool_newsgroup ON spool(newsgroup);
CREATE TABLE groups(
    name          TEXT UNIQUE NOT NULL,
    date_created  TEXT NOT NULL,
    days_retained INTEGER NOT NULL
);
"#;

/// Errors surfaced by the data-access layer
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("spool database is already initialized")]
    AlreadyInitialized,

    #[error("missing config key '{0}' in spool database")]
    MissingConfig(&'static str),

    #[error("could not parse stored timestamp '{value}'")]
    Time { value: String },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// An article in storage form, as produced by the crawler
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleRecord {
    pub posted_at: DateTime<Utc>,
    /// Lowercase, prefixed newsgroup name (`<prefix>.<subreddit>`)
    pub newsgroup: String,
    pub subject: String,
    /// Rendered `name <name@prefix>` form
    pub author: String,
    /// Globally unique, wrapped in `<>`
    pub message_id: String,
    /// Empty for top-level posts; the parent's message-id for comments
    pub parent_id: String,
    pub body: Vec<u8>,
}

/// Newsgroup metadata row
#[derive(Debug, Clone, PartialEq)]
pub struct GroupMetadata {
    pub name: String,
    pub date_created: DateTime<Utc>,
    pub days_retained: u32,
}

/// Header fields exactly as stored (`posted_at` still the raw text column)
#[derive(Debug, Clone)]
pub struct DbHeader {
    pub posted_at: String,
    pub newsgroup: String,
    pub subject: String,
    pub author: String,
    pub message_id: String,
    pub parent_id: String,
}

/// A stored header plus the article body bytes
#[derive(Debug, Clone)]
pub struct DbArticle {
    pub header: DbHeader,
    pub body: Vec<u8>,
}

/// Parse a timestamp string the way the store writes them
///
/// Accepts RFC3339 with either a `Z` or `+00:00` offset spelling, and the
/// bare `YYYY-MM-DD HH:MM:SS` form SQLite's datetime() produces.
pub fn from_db_time(value: &str) -> Result<DateTime<Utc>, StoreError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }
    Err(StoreError::Time {
        value: value.to_string(),
    })
}

/// Handle to the spool database
#[derive(Debug)]
pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    /// Open (or create) the spool database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory spool database (testing and tooling)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned mutex means another thread panicked mid-query; the
        // connection itself is still usable.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create the schema and record the start date and hierarchy prefix
    ///
    /// Fails with [`StoreError::AlreadyInitialized`] if a spool table is
    /// already present.
    pub fn create_new_spool(
        &self,
        start_date: DateTime<Utc>,
        prefix: &str,
    ) -> Result<(), StoreError> {
        let conn = self.conn();
        let initialized: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'spool')",
            [],
            |row| row.get(0),
        )?;
        if initialized {
            return Err(StoreError::AlreadyInitialized);
        }

        conn.execute_batch(SCHEMA)?;
        conn.execute(
            "INSERT INTO config(k, v) VALUES ('startdate', ?1)",
            params![start_date.to_rfc3339()],
        )?;
        conn.execute(
            "INSERT INTO config(k, v) VALUES ('prefix', ?1)",
            params![prefix],
        )?;
        Ok(())
    }

    fn config_value(&self, key: &'static str) -> Result<String, StoreError> {
        self.conn()
            .query_row(
                "SELECT v FROM config WHERE k = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StoreError::MissingConfig(key))
    }

    /// The crawl start date recorded at initialization
    pub fn start_date(&self) -> Result<DateTime<Utc>, StoreError> {
        let raw = self.config_value("startdate")?;
        from_db_time(&raw)
    }

    /// The newsgroup hierarchy prefix recorded at initialization
    pub fn prefix(&self) -> Result<String, StoreError> {
        self.config_value("prefix")
    }

    /// Total number of spool rows
    pub fn article_count(&self) -> Result<u64, StoreError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM spool", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Insert an article record; a duplicate message-id is silently dropped
    ///
    /// `posted_at` is stored as RFC3339 text; with a fixed UTC offset the
    /// lexicographic `ORDER BY` in [`Db::row_ids`] is chronological.
    pub fn insert_article_record(&self, rec: &ArticleRecord) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT OR IGNORE INTO spool(posted_at, newsgroup, subject, author, message_id, parent_id, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                rec.posted_at.to_rfc3339(),
                rec.newsgroup,
                rec.subject,
                rec.author,
                rec.message_id,
                rec.parent_id,
                rec.body,
            ],
        )?;
        Ok(())
    }

    pub fn message_id_exists(&self, message_id: &str) -> Result<bool, StoreError> {
        let exists: bool = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM spool WHERE message_id = ?1)",
            params![message_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// All known newsgroup names, in insertion order
    pub fn fetch_newsgroups(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT name FROM groups")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    /// Newsgroups created strictly after `since`
    pub fn fetch_new_groups(&self, since: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT name FROM groups WHERE date_created > ?1")?;
        let names = stmt
            .query_map(params![since.to_rfc3339()], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    /// Insert group metadata; a duplicate name is silently dropped
    pub fn insert_group_metadata(&self, gm: &GroupMetadata) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT OR IGNORE INTO groups(name, date_created, days_retained) VALUES (?1, ?2, ?3)",
            params![gm.name, gm.date_created.to_rfc3339(), gm.days_retained],
        )?;
        Ok(())
    }

    /// Number of spool rows in a newsgroup
    pub fn group_article_count(&self, group: &str) -> Result<u64, StoreError> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM spool WHERE newsgroup = ?1",
            params![group],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Row ids for a newsgroup, ordered by posted time
    ///
    /// The autoincrement column breaks ties between rows sharing a
    /// `posted_at`, so repeated queries observe the same order.
    pub fn row_ids(&self, group: &str) -> Result<Vec<RowId>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT article_num FROM spool WHERE newsgroup = ?1
             ORDER BY posted_at ASC, article_num ASC",
        )?;
        let ids = stmt
            .query_map(params![group], |row| row.get(0))?
            .collect::<Result<Vec<RowId>, _>>()?;
        Ok(ids)
    }

    pub fn header_by_row_id(&self, id: RowId) -> Result<Option<DbHeader>, StoreError> {
        let header = self
            .conn()
            .query_row(
                "SELECT posted_at, newsgroup, subject, author, message_id, parent_id
                 FROM spool WHERE article_num = ?1",
                params![id],
                |row| header_from_row(row),
            )
            .optional()?;
        Ok(header)
    }

    pub fn header_by_msg_id(&self, message_id: &str) -> Result<Option<DbHeader>, StoreError> {
        let header = self
            .conn()
            .query_row(
                "SELECT posted_at, newsgroup, subject, author, message_id, parent_id
                 FROM spool WHERE message_id = ?1",
                params![message_id],
                |row| header_from_row(row),
            )
            .optional()?;
        Ok(header)
    }

    pub fn article_by_row_id(&self, id: RowId) -> Result<Option<DbArticle>, StoreError> {
        let article = self
            .conn()
            .query_row(
                "SELECT posted_at, newsgroup, subject, author, message_id, parent_id, body
                 FROM spool WHERE article_num = ?1",
                params![id],
                |row| article_from_row(row),
            )
            .optional()?;
        Ok(article)
    }

    pub fn article_by_msg_id(&self, message_id: &str) -> Result<Option<DbArticle>, StoreError> {
        let article = self
            .conn()
            .query_row(
                "SELECT posted_at, newsgroup, subject, author, message_id, parent_id, body
                 FROM spool WHERE message_id = ?1",
                params![message_id],
                |row| article_from_row(row),
            )
            .optional()?;
        Ok(article)
    }
}

fn header_from_row(row: &Row<'_>) -> rusqlite::Result<DbHeader> {
    Ok(DbHeader {
        posted_at: row.get(0)?,
        newsgroup: row.get(1)?,
        subject: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        author: row.get(3)?,
        message_id: row.get(4)?,
        parent_id: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
    })
}

fn article_from_row(row: &Row<'_>) -> rusqlite::Result<DbArticle> {
    Ok(DbArticle {
        header: header_from_row(row)?,
        body: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_db() -> Db {
        let db = Db::open_in_memory().expect("open");
        db.create_new_spool(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            "reddit",
        )
        .expect("init");
        db
    }

    fn record(msg_id: &str, group: &str, posted_at: DateTime<Utc>) -> ArticleRecord {
        ArticleRecord {
            posted_at,
            newsgroup: group.to_string(),
            subject: "A subject".to_string(),
            author: "alice <alice@reddit>".to_string(),
            message_id: msg_id.to_string(),
            parent_id: String::new(),
            body: b"hello world".to_vec(),
        }
    }

    #[test]
    fn test_create_new_spool_twice_fails() {
        let db = test_db();
        let err = db
            .create_new_spool(Utc::now(), "reddit")
            .expect_err("second init should fail");
        assert!(matches!(err, StoreError::AlreadyInitialized));
    }

    #[test]
    fn test_config_round_trip() {
        let db = test_db();
        assert_eq!(db.prefix().unwrap(), "reddit");
        assert_eq!(
            db.start_date().unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_missing_config_key() {
        let db = Db::open_in_memory().unwrap();
        db.conn()
            .execute_batch("CREATE TABLE config(k TEXT NOT NULL, v TEXT NOT NULL)")
            .unwrap();
        let err = db.prefix().expect_err("prefix should be missing");
        assert!(matches!(err, StoreError::MissingConfig("prefix")));
    }

    #[test]
    fn test_insert_is_idempotent_on_message_id() {
        let db = test_db();
        let rec = record("<t3_1.t5_2.reddit.nntp>", "reddit.rust", Utc::now());
        db.insert_article_record(&rec).unwrap();
        db.insert_article_record(&rec).unwrap();
        assert_eq!(db.article_count().unwrap(), 1);
        assert!(db.message_id_exists("<t3_1.t5_2.reddit.nntp>").unwrap());
        assert!(!db.message_id_exists("<nope>").unwrap());
    }

    #[test]
    fn test_row_ids_sorted_by_posted_at_with_stable_tiebreak() {
        let db = test_db();
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 6, 2, 12, 0, 0).unwrap();
        // Inserted newest-first; listing must come back oldest-first.
        db.insert_article_record(&record("<b>", "reddit.rust", t1))
            .unwrap();
        db.insert_article_record(&record("<a>", "reddit.rust", t0))
            .unwrap();
        // Same timestamp as <a>: insertion order breaks the tie.
        db.insert_article_record(&record("<c>", "reddit.rust", t0))
            .unwrap();

        let ids = db.row_ids("reddit.rust").unwrap();
        let msg_ids: Vec<String> = ids
            .iter()
            .map(|&id| db.header_by_row_id(id).unwrap().unwrap().message_id)
            .collect();
        assert_eq!(msg_ids, vec!["<a>", "<c>", "<b>"]);
    }

    #[test]
    fn test_row_ids_scoped_to_group() {
        let db = test_db();
        db.insert_article_record(&record("<a>", "reddit.rust", Utc::now()))
            .unwrap();
        db.insert_article_record(&record("<b>", "reddit.news", Utc::now()))
            .unwrap();
        assert_eq!(db.row_ids("reddit.rust").unwrap().len(), 1);
        assert_eq!(db.group_article_count("reddit.news").unwrap(), 1);
        assert_eq!(db.group_article_count("reddit.empty").unwrap(), 0);
    }

    #[test]
    fn test_header_lookup_by_msg_id() {
        let db = test_db();
        let rec = record("<a>", "reddit.rust", Utc::now());
        db.insert_article_record(&rec).unwrap();

        let header = db.header_by_msg_id("<a>").unwrap().unwrap();
        assert_eq!(header.newsgroup, "reddit.rust");
        assert_eq!(header.author, "alice <alice@reddit>");
        assert!(db.header_by_msg_id("<missing>").unwrap().is_none());
    }

    #[test]
    fn test_article_lookup_includes_body() {
        let db = test_db();
        db.insert_article_record(&record("<a>", "reddit.rust", Utc::now()))
            .unwrap();
        let id = db.row_ids("reddit.rust").unwrap()[0];
        let article = db.article_by_row_id(id).unwrap().unwrap();
        assert_eq!(article.body, b"hello world");
        assert_eq!(
            db.article_by_msg_id("<a>").unwrap().unwrap().header.message_id,
            "<a>"
        );
    }

    #[test]
    fn test_group_metadata_idempotent_and_new_groups_filter() {
        let db = test_db();
        let old = GroupMetadata {
            name: "reddit.old".to_string(),
            date_created: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
            days_retained: 7,
        };
        let new = GroupMetadata {
            name: "reddit.new".to_string(),
            date_created: Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap(),
            days_retained: 7,
        };
        db.insert_group_metadata(&old).unwrap();
        db.insert_group_metadata(&old).unwrap();
        db.insert_group_metadata(&new).unwrap();

        assert_eq!(db.fetch_newsgroups().unwrap().len(), 2);
        let since = Utc.with_ymd_and_hms(2024, 6, 5, 0, 0, 0).unwrap();
        assert_eq!(db.fetch_new_groups(since).unwrap(), vec!["reddit.new"]);
    }

    #[test]
    fn test_from_db_time_accepts_offset_spellings() {
        let expect = Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 0).unwrap();
        assert_eq!(from_db_time("2024-06-01T12:30:00+00:00").unwrap(), expect);
        assert_eq!(from_db_time("2024-06-01T12:30:00Z").unwrap(), expect);
        assert_eq!(from_db_time("2024-06-01 12:30:00").unwrap(), expect);
        assert!(from_db_time("not a time").is_err());
    }
}
