//! Response status lines and group listing formats
//!
//! Status codes follow RFC 3977 §3.2.1; the exact reply texts are part of
//! the server's observable contract and are kept in one place.

/// Greeting and MODE READER reply (201: posting prohibited)
pub const GREETING: &str = "201 Posting prohibited";

pub const CONNECTION_CLOSING: &str = "205 Connection closing";

pub const CAPABILITIES_FOLLOW: &str = "101 Capability list:";
pub const ACTIVE_LIST_FOLLOWS: &str = "215 list of newsgroups follows";
pub const NEWSGROUP_LIST_FOLLOWS: &str = "215 information follows";
pub const NEW_GROUPS_FOLLOW: &str = "231 list of newsgroups follows";

pub const NO_SUCH_GROUP: &str = "411 No such newsgroup";
pub const GROUP_NOT_FOUND: &str = "411 group not found";
/// LISTGROUP with neither an argument nor a current group
pub const NO_NEWSGROUP_SELECTED: &str = "412 No newsgroup selected";
/// STAT numeric/implicit mode without a current group
pub const NO_GROUP_SELECTED: &str = "412 No Newsgroup Selected";
pub const NO_SUCH_ARTICLE: &str = "423 No article with that number";

pub const DATE_PARSE_ERROR: &str = "403 error parsing date format";
pub const NEWGROUPS_MISSING_ARGS: &str = "403 not enough arguments provided to NEWGROUPS";
pub const SPOOL_READ_ERROR: &str = "403 error reading from spool";

pub const UNKNOWN_COMMAND: &str = "500 Unknown command";
pub const ONLY_READER_SUPPORTED: &str = "500 Only READER is supported";
pub const NO_GROUP_ARG: &str = "500 No group name provided";
pub const NO_ACTIVE_GROUP: &str = "500 No active group set";
pub const GROUP_FETCH_FAILED: &str = "500 Server error: could not fetch groups";
pub const SPOOL_QUERY_FAILED: &str = "500 query to spool failed";
pub const SPOOL_GROUP_READ_FAILED: &str = "500 error reading from spool";
pub const BAD_LINE: &str = "500 could not parse line properly";
pub const NO_CURRENT_ARTICLE_MODE: &str = "500 current article mode unsupported";

pub const LIST_ARG_UNSUPPORTED: &str = "503 This LIST argument is not supported";

/// Posting status flag in active-format lines (RFC 3977 §7.6.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostingStatus {
    Permitted,
    Prohibited,
    Moderated,
}

impl PostingStatus {
    pub const fn as_char(self) -> char {
        match self {
            Self::Permitted => 'y',
            Self::Prohibited => 'n',
            Self::Moderated => 'm',
        }
    }
}

/// Water marks for one group, as shown in GROUP and LIST ACTIVE replies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupData {
    pub name: String,
    pub high: u64,
    pub low: u64,
    pub status: PostingStatus,
}

impl GroupData {
    /// Water marks from an article count; an empty group renders as
    /// `high=1, low=0`
    pub fn new(name: &str, count: u64) -> Self {
        let (high, low) = if count == 0 { (1, 0) } else { (count, 1) };
        Self {
            name: name.to_string(),
            high,
            low,
            status: PostingStatus::Prohibited,
        }
    }

    /// Active-format line: `<name> <high> <low> <status>`
    pub fn active_line(&self) -> String {
        format!(
            "{} {} {} {}",
            self.name,
            self.high,
            self.low,
            self.status.as_char()
        )
    }

    /// GROUP status argument: `<est> <low> <high> <name>`
    pub fn group_status(&self) -> String {
        let est = self.high - self.low;
        format!("{} {} {} {}", est, self.low, self.high, self.name)
    }
}
