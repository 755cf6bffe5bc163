//! Command parsing, session state, and per-command handlers
//!
//! A received line splits on ASCII space into a verb (uppercased) and its
//! arguments. Dispatch matches on the verb; each handler writes exactly one
//! reply. Spool lookup misses answer 423 without error-level logging; only
//! genuine store failures are logged and mapped to 403/500 per command.

use std::io;

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;
use tokio::io::AsyncWrite;
use tracing::{error, warn};

use crate::spool::{Spool, SpoolError};

use super::responses::{self, GroupData};
use super::wire;

/// Upper bound on fields parsed from one command line
const CMD_WORD_LIMIT: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NntpCommand {
    pub verb: String,
    pub args: Vec<String>,
}

/// Split a received line into an uppercased verb and its arguments
pub(crate) fn parse_line(line: &str) -> NntpCommand {
    let mut fields = line.splitn(CMD_WORD_LIMIT, ' ');
    let verb = fields.next().unwrap_or_default().to_ascii_uppercase();
    let args = fields.map(str::to_string).collect();
    NntpCommand { verb, args }
}

/// A message-id argument is wrapped in angle brackets
fn is_message_id(arg: &str) -> bool {
    arg.starts_with('<') && arg.ends_with('>') && arg.len() >= 2
}

/// Article range accepted by LISTGROUP: `N`, `N-`, or `N-M`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArticleRange {
    Singleton(u64),
    From(u64),
    Closed { low: u64, high: u64 },
}

#[derive(Debug, Error)]
pub(crate) enum RangeError {
    #[error("could not parse singleton article range: {0}")]
    Singleton(std::num::ParseIntError),
    #[error("could not parse lower bound of article range: {0}")]
    Low(std::num::ParseIntError),
    #[error("could not parse upper bound of closed article range: {0}")]
    High(std::num::ParseIntError),
}

impl ArticleRange {
    pub(crate) fn parse(raw: &str) -> Result<Self, RangeError> {
        match raw.split_once('-') {
            Some((low_raw, high_raw)) => {
                let low = low_raw.parse().map_err(RangeError::Low)?;
                if high_raw.is_empty() {
                    Ok(Self::From(low))
                } else {
                    let high = high_raw.parse().map_err(RangeError::High)?;
                    Ok(Self::Closed { low, high })
                }
            }
            None => Ok(Self::Singleton(raw.parse().map_err(RangeError::Singleton)?)),
        }
    }

    pub(crate) fn contains(self, num: u64) -> bool {
        match self {
            Self::Singleton(n) => num == n,
            Self::From(low) => num >= low,
            Self::Closed { low, high } => num >= low && num <= high,
        }
    }
}

/// Parse the NEWGROUPS `date time` argument pair as UTC
///
/// The date is `yymmdd` or `yyyymmdd`, the time `hhmmss`; a trailing `GMT`
/// argument is accepted and ignored since all dates are treated as UTC.
pub(crate) fn parse_newgroups_date(raw_date: &str, raw_time: &str) -> Option<DateTime<Utc>> {
    let format = match raw_date.len() {
        8 => "%Y%m%d%H%M%S",
        6 => "%y%m%d%H%M%S",
        _ => return None,
    };
    let combined = format!("{raw_date}{raw_time}");
    NaiveDateTime::parse_from_str(&combined, format)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Per-connection session state, mutated only by the processor
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    current_group: Option<String>,
    current_article: u64,
}

impl SessionState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn group(&self) -> Option<&str> {
        self.current_group.as_deref()
    }

    pub(crate) fn set_group(&mut self, group: &str) {
        self.current_group = Some(group.to_string());
    }

    pub(crate) fn article_num(&self) -> u64 {
        self.current_article
    }

    pub(crate) fn set_article_num(&mut self, num: u64) {
        self.current_article = num;
    }
}

/// Whether the session continues after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Quit,
}

/// Dispatch one parsed command, writing exactly one reply
pub(crate) async fn dispatch<W>(
    writer: &mut W,
    spool: &Spool,
    state: &mut SessionState,
    cmd: &NntpCommand,
) -> io::Result<Flow>
where
    W: AsyncWrite + Unpin,
{
    match cmd.verb.as_str() {
        "CAPABILITIES" => {
            wire::write_multiline(writer, responses::CAPABILITIES_FOLLOW, b"READER\nVERSION\n")
                .await?;
        }
        "MODE" => handle_mode(writer, &cmd.args).await?,
        "QUIT" => {
            wire::write_line(writer, responses::CONNECTION_CLOSING).await?;
            return Ok(Flow::Quit);
        }
        "LIST" => handle_list(writer, spool, &cmd.args).await?,
        "NEWGROUPS" => handle_newgroups(writer, spool, &cmd.args).await?,
        "GROUP" => handle_group(writer, spool, state, &cmd.args).await?,
        "LISTGROUP" => handle_listgroup(writer, spool, state, &cmd.args).await?,
        "HEAD" => handle_head(writer, spool, state, &cmd.args).await?,
        "ARTICLE" => handle_article(writer, spool, state, &cmd.args).await?,
        "STAT" => handle_stat(writer, spool, state, &cmd.args).await?,
        other => {
            warn!(command = other, "unknown command");
            wire::write_line(writer, responses::UNKNOWN_COMMAND).await?;
        }
    }
    Ok(Flow::Continue)
}

async fn handle_mode<W>(writer: &mut W, args: &[String]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match args.first().map(String::as_str) {
        None => wire::write_line(writer, responses::UNKNOWN_COMMAND).await,
        Some("READER") => wire::write_line(writer, responses::GREETING).await,
        Some(_) => wire::write_line(writer, responses::ONLY_READER_SUPPORTED).await,
    }
}

/// Active-format lines for a set of groups, one per line
fn active_lines(spool: &Spool, groups: &[String]) -> Result<String, SpoolError> {
    let mut out = String::new();
    for group in groups {
        let count = spool.group_article_count(group)?;
        out.push_str(&GroupData::new(group, count).active_line());
        out.push('\n');
    }
    Ok(out)
}

async fn handle_list<W>(writer: &mut W, spool: &Spool, args: &[String]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    enum ListMode {
        Active,
        Newsgroups,
    }

    let mode = match args.first().map(String::as_str) {
        None | Some("ACTIVE") => ListMode::Active,
        Some("NEWSGROUPS") => ListMode::Newsgroups,
        Some(_) => return wire::write_line(writer, responses::LIST_ARG_UNSUPPORTED).await,
    };

    let groups = match spool.newsgroups() {
        Ok(groups) => groups,
        Err(e) => {
            error!("error listing newsgroups: {e}");
            return wire::write_line(writer, responses::SPOOL_READ_ERROR).await;
        }
    };

    match mode {
        ListMode::Active => {
            let payload = match active_lines(spool, &groups) {
                Ok(payload) => payload,
                Err(e) => {
                    error!("error reading group counts: {e}");
                    return wire::write_line(writer, responses::SPOOL_READ_ERROR).await;
                }
            };
            wire::write_multiline(writer, responses::ACTIVE_LIST_FOLLOWS, payload.as_bytes())
                .await
        }
        ListMode::Newsgroups => {
            let mut payload = String::new();
            for group in &groups {
                payload.push_str(group);
                payload.push('\n');
            }
            wire::write_multiline(
                writer,
                responses::NEWSGROUP_LIST_FOLLOWS,
                payload.as_bytes(),
            )
            .await
        }
    }
}

async fn handle_newgroups<W>(writer: &mut W, spool: &Spool, args: &[String]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if args.len() < 2 {
        return wire::write_line(writer, responses::NEWGROUPS_MISSING_ARGS).await;
    }

    let since = match parse_newgroups_date(&args[0], &args[1]) {
        Some(since) => since,
        None => return wire::write_line(writer, responses::DATE_PARSE_ERROR).await,
    };

    let groups = match spool.new_groups(since) {
        Ok(groups) => groups,
        Err(e) => {
            error!("error querying new groups: {e}");
            return wire::write_line(writer, responses::SPOOL_QUERY_FAILED).await;
        }
    };

    let payload = match active_lines(spool, &groups) {
        Ok(payload) => payload,
        Err(e) => {
            error!("error reading group counts: {e}");
            return wire::write_line(writer, responses::SPOOL_GROUP_READ_FAILED).await;
        }
    };

    wire::write_multiline(writer, responses::NEW_GROUPS_FOLLOW, payload.as_bytes()).await
}

async fn handle_group<W>(
    writer: &mut W,
    spool: &Spool,
    state: &mut SessionState,
    args: &[String],
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let Some(group) = args.first() else {
        return wire::write_line(writer, responses::NO_GROUP_ARG).await;
    };

    let known = match spool.newsgroups() {
        Ok(known) => known,
        Err(e) => {
            error!("error fetching newsgroups: {e}");
            return wire::write_line(writer, responses::GROUP_FETCH_FAILED).await;
        }
    };
    if !known.iter().any(|name| name == group) {
        return wire::write_line(writer, responses::NO_SUCH_GROUP).await;
    }

    let count = match spool.group_article_count(group) {
        Ok(count) => count,
        Err(e) => {
            error!(group = %group, "error getting group article count: {e}");
            return wire::write_line(writer, responses::SPOOL_READ_ERROR).await;
        }
    };

    state.set_group(group);
    if count > 0 {
        state.set_article_num(1);
    }

    let data = GroupData::new(group, count);
    wire::write_line(writer, &format!("211 {}", data.group_status())).await
}

async fn handle_listgroup<W>(
    writer: &mut W,
    spool: &Spool,
    state: &mut SessionState,
    args: &[String],
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let (group, explicit) = match args.first() {
        Some(group) => (group.clone(), true),
        None => match state.group() {
            Some(group) => (group.to_string(), false),
            None => return wire::write_line(writer, responses::NO_NEWSGROUP_SELECTED).await,
        },
    };
    if group.is_empty() {
        return wire::write_line(writer, responses::NO_NEWSGROUP_SELECTED).await;
    }

    let range = match args.get(1) {
        Some(raw) => match ArticleRange::parse(raw) {
            Ok(range) => Some(range),
            Err(e) => {
                let reply = format!("403 could not parse article range: {e}");
                return wire::write_line(writer, &reply).await;
            }
        },
        None => None,
    };

    if explicit {
        let known = match spool.newsgroups() {
            Ok(known) => known,
            Err(e) => {
                error!("error fetching newsgroups: {e}");
                return wire::write_line(writer, responses::SPOOL_QUERY_FAILED).await;
            }
        };
        if !known.iter().any(|name| *name == group) {
            return wire::write_line(writer, responses::GROUP_NOT_FOUND).await;
        }
    }

    let nums = match spool.article_nums(&group) {
        Ok(nums) => nums,
        Err(e) => {
            error!(group = %group, "error getting article numbers: {e}");
            return wire::write_line(writer, responses::SPOOL_QUERY_FAILED).await;
        }
    };

    let filtered: Vec<u64> = match range {
        Some(range) => nums.into_iter().filter(|&n| range.contains(n)).collect(),
        None => nums,
    };

    // An empty listing keeps the fixed `span=1, min=1, max=0` shape.
    let (span, min, max) = match (filtered.first(), filtered.last()) {
        (Some(&min), Some(&max)) => (max - min + 1, min, max),
        _ => (1, 1, 0),
    };

    let mut payload = String::new();
    for num in &filtered {
        payload.push_str(&num.to_string());
        payload.push('\n');
    }

    let status = format!("211 {span} {min} {max} list follows");
    wire::write_multiline(writer, &status, payload.as_bytes()).await?;

    if explicit {
        state.set_group(&group);
        state.set_article_num(1);
    }
    Ok(())
}

/// How a HEAD/ARTICLE argument addresses an article
enum ArticleKey<'a> {
    MsgId(&'a str),
    Num { group: &'a str, num: u64 },
}

/// Resolve a HEAD/ARTICLE argument, writing the error reply on failure
///
/// Message-id form needs no current group and reports article number 0;
/// numeric form requires the session to have a group selected.
async fn resolve_article_arg<'a, W>(
    writer: &mut W,
    state: &'a SessionState,
    args: &'a [String],
) -> io::Result<Option<ArticleKey<'a>>>
where
    W: AsyncWrite + Unpin,
{
    let Some(arg) = args.first() else {
        wire::write_line(writer, responses::NO_CURRENT_ARTICLE_MODE).await?;
        return Ok(None);
    };
    if arg.is_empty() {
        wire::write_line(writer, responses::BAD_LINE).await?;
        return Ok(None);
    }

    if is_message_id(arg) {
        return Ok(Some(ArticleKey::MsgId(arg)));
    }

    let Some(group) = state.group() else {
        wire::write_line(writer, responses::NO_ACTIVE_GROUP).await?;
        return Ok(None);
    };
    match arg.parse::<u64>() {
        Ok(num) => Ok(Some(ArticleKey::Num { group, num })),
        Err(_) => {
            wire::write_line(writer, responses::NO_SUCH_ARTICLE).await?;
            Ok(None)
        }
    }
}

/// Answer 423 for lookup misses; log anything else before answering 423
async fn reply_article_miss<W>(writer: &mut W, command: &str, err: &SpoolError) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if !err.is_not_found() {
        error!(command, "error reading article from spool: {err}");
    }
    wire::write_line(writer, responses::NO_SUCH_ARTICLE).await
}

async fn handle_head<W>(
    writer: &mut W,
    spool: &Spool,
    state: &SessionState,
    args: &[String],
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let Some(key) = resolve_article_arg(writer, state, args).await? else {
        return Ok(());
    };
    let (num, header) = match key {
        ArticleKey::MsgId(id) => (0, spool.header_by_msg_id(id)),
        ArticleKey::Num { group, num } => (num, spool.header_by_group_num(group, num)),
    };
    match header {
        Ok(header) => {
            let status = format!("221 {num} {}", header.msg_id);
            wire::write_multiline(writer, &status, header.render().as_bytes()).await
        }
        Err(e) => reply_article_miss(writer, "HEAD", &e).await,
    }
}

async fn handle_article<W>(
    writer: &mut W,
    spool: &Spool,
    state: &SessionState,
    args: &[String],
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let Some(key) = resolve_article_arg(writer, state, args).await? else {
        return Ok(());
    };
    let (num, article) = match key {
        ArticleKey::MsgId(id) => (0, spool.article_by_msg_id(id)),
        ArticleKey::Num { group, num } => (num, spool.article_by_group_num(group, num)),
    };
    match article {
        Ok(article) => {
            let status = format!("220 {num} {}", article.header.msg_id);
            wire::write_multiline(writer, &status, &article.render()).await
        }
        Err(e) => reply_article_miss(writer, "ARTICLE", &e).await,
    }
}

async fn handle_stat<W>(
    writer: &mut W,
    spool: &Spool,
    state: &SessionState,
    args: &[String],
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    // Message-id mode answers article number 0: the store has no reverse
    // map from message-id to a per-group number.
    if let Some(arg) = args.first() {
        if is_message_id(arg) {
            return match spool.header_by_msg_id(arg) {
                Ok(header) => {
                    wire::write_line(writer, &format!("223 0 {}", header.msg_id)).await
                }
                Err(e) => reply_article_miss(writer, "STAT", &e).await,
            };
        }
    }

    let Some(group) = state.group() else {
        return wire::write_line(writer, responses::NO_GROUP_SELECTED).await;
    };

    let num = match args.first() {
        Some(raw) => match raw.parse::<u64>() {
            Ok(num) => num,
            Err(_) => return wire::write_line(writer, responses::NO_SUCH_ARTICLE).await,
        },
        None => state.article_num(),
    };

    match spool.header_by_group_num(group, num) {
        Ok(header) => wire::write_line(writer, &format!("223 {num} {}", header.msg_id)).await,
        Err(e) => reply_article_miss(writer, "STAT", &e).await,
    }
}
