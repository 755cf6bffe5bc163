//! Short-TTL cache of per-group row-id lists
//!
//! Protocol commands arrive in bursts (a reader opening a group issues
//! GROUP, LISTGROUP, then a run of HEAD/ARTICLE by number); each of those
//! needs the group's `posted_at`-ordered row-id list. The cache memoizes the
//! list per group for a few seconds so a burst costs one query.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::store::{Db, RowId};

use super::SpoolError;

/// How long a cached row-id list stays valid
pub(crate) const ROW_ID_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct CacheEntry {
    row_ids: Arc<Vec<RowId>>,
    last_fetched: Instant,
}

#[derive(Debug, Default)]
pub(crate) struct RowIdCache {
    entries: DashMap<String, CacheEntry>,
}

impl RowIdCache {
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// The ordered row-id list for `group`, from cache or the store
    ///
    /// Concurrent misses may query in parallel; the entry with the latest
    /// fetch time wins, and fetch time is captured before the query so a
    /// slow stale fetch cannot overwrite a fresher result. Equal fetch
    /// times race, which at worst re-fetches one TTL early.
    pub(crate) fn row_ids(&self, group: &str, db: &Db) -> Result<Arc<Vec<RowId>>, SpoolError> {
        if let Some(entry) = self.entries.get(group) {
            if entry.last_fetched.elapsed() <= ROW_ID_TTL {
                return Ok(Arc::clone(&entry.row_ids));
            }
        }

        let fetch_time = Instant::now();
        let row_ids = Arc::new(db.row_ids(group)?);
        let fresh = CacheEntry {
            row_ids: Arc::clone(&row_ids),
            last_fetched: fetch_time,
        };

        self.entries
            .entry(group.to_string())
            .and_modify(|existing| {
                if fetch_time > existing.last_fetched {
                    *existing = fresh.clone();
                }
            })
            .or_insert(fresh);

        Ok(row_ids)
    }

    /// Map a 1-based NNTP article number to its storage row id
    pub(crate) fn article_num_to_row_id(
        &self,
        group: &str,
        article_num: u64,
        db: &Db,
    ) -> Result<RowId, SpoolError> {
        if article_num < 1 {
            return Err(SpoolError::BadArticleNumber(article_num));
        }

        let row_ids = self.row_ids(group, db)?;
        if row_ids.is_empty() {
            return Err(SpoolError::NoArticles {
                group: group.to_string(),
            });
        }
        if article_num as usize > row_ids.len() {
            return Err(SpoolError::ArticleNumNotFound);
        }

        Ok(row_ids[article_num as usize - 1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ArticleRecord;
    use chrono::{TimeZone, Utc};

    fn seeded_db(group: &str, count: usize) -> Db {
        let db = Db::open_in_memory().unwrap();
        db.create_new_spool(Utc::now(), "reddit").unwrap();
        for i in 0..count {
            db.insert_article_record(&ArticleRecord {
                posted_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, i as u32, 0).unwrap(),
                newsgroup: group.to_string(),
                subject: format!("post {i}"),
                author: "alice <alice@reddit>".to_string(),
                message_id: format!("<t3_{i}.t5_0.reddit.nntp>"),
                parent_id: String::new(),
                body: b"body".to_vec(),
            })
            .unwrap();
        }
        db
    }

    #[test]
    fn test_article_num_maps_to_ordered_index() {
        let db = seeded_db("reddit.rust", 3);
        let cache = RowIdCache::new();
        let ids = db.row_ids("reddit.rust").unwrap();
        for (i, &expected) in ids.iter().enumerate() {
            let got = cache
                .article_num_to_row_id("reddit.rust", i as u64 + 1, &db)
                .unwrap();
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn test_article_num_zero_is_rejected() {
        let db = seeded_db("reddit.rust", 1);
        let cache = RowIdCache::new();
        let err = cache
            .article_num_to_row_id("reddit.rust", 0, &db)
            .expect_err("article 0 cannot be served");
        assert!(matches!(err, SpoolError::BadArticleNumber(0)));
    }

    #[test]
    fn test_empty_group_reports_no_articles() {
        let db = seeded_db("reddit.rust", 0);
        let cache = RowIdCache::new();
        let err = cache
            .article_num_to_row_id("reddit.rust", 1, &db)
            .expect_err("no rows in group");
        assert!(matches!(err, SpoolError::NoArticles { .. }));
    }

    #[test]
    fn test_past_end_is_the_not_found_sentinel() {
        let db = seeded_db("reddit.rust", 2);
        let cache = RowIdCache::new();
        let err = cache
            .article_num_to_row_id("reddit.rust", 3, &db)
            .expect_err("only two articles");
        assert!(matches!(err, SpoolError::ArticleNumNotFound));
    }

    #[test]
    fn test_fresh_entry_is_served_from_cache() {
        let db = seeded_db("reddit.rust", 1);
        let cache = RowIdCache::new();
        let first = cache.row_ids("reddit.rust", &db).unwrap();

        // A row inserted after the first lookup is invisible until the TTL
        // elapses.
        db.insert_article_record(&ArticleRecord {
            posted_at: Utc::now(),
            newsgroup: "reddit.rust".to_string(),
            subject: "late".to_string(),
            author: "bob <bob@reddit>".to_string(),
            message_id: "<late>".to_string(),
            parent_id: String::new(),
            body: b"body".to_vec(),
        })
        .unwrap();

        let second = cache.row_ids("reddit.rust", &db).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn test_later_fetch_wins_install() {
        let db = seeded_db("reddit.rust", 1);
        let cache = RowIdCache::new();

        // Plant a stale entry, then force a refetch by aging it out.
        cache.entries.insert(
            "reddit.rust".to_string(),
            CacheEntry {
                row_ids: Arc::new(vec![]),
                last_fetched: Instant::now() - ROW_ID_TTL - Duration::from_secs(1),
            },
        );
        let refreshed = cache.row_ids("reddit.rust", &db).unwrap();
        assert_eq!(refreshed.len(), 1);

        let stored = cache.entries.get("reddit.rust").unwrap();
        assert_eq!(stored.row_ids.len(), 1);
    }
}
