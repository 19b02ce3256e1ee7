//! SQLite archive source.
//!
//! Reads the relational archive produced by the importer. `tweets` and
//! `likes` are required; `users`, `blocks`, `mutes` and `account` are read
//! when present and skipped otherwise, since older archives lack them.

use std::fmt;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use wren_core::{
    AccountRecord, ArchiveError, ArchiveRows, ArchiveSource, ContentItem, LikedItem, UserRecord,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tweets (
    id TEXT PRIMARY KEY,
    text TEXT,
    created_at TEXT,
    conversation_id TEXT,
    author_id TEXT,
    in_reply_to_status_id TEXT,
    in_reply_to_user_id TEXT,
    in_reply_to_screen_name TEXT,
    favorite_count INTEGER,
    retweet_count INTEGER,
    lang TEXT,
    deleted_at TEXT
);
CREATE TABLE IF NOT EXISTS likes (
    tweet_id TEXT PRIMARY KEY,
    full_text TEXT,
    expanded_url TEXT,
    liked_at TEXT,
    author_id TEXT,
    author_username TEXT
);
CREATE TABLE IF NOT EXISTS blocks (
    user_id TEXT PRIMARY KEY,
    user_link TEXT
);
CREATE TABLE IF NOT EXISTS mutes (
    user_id TEXT PRIMARY KEY,
    user_link TEXT
);
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT,
    display_name TEXT,
    user_link TEXT
);
CREATE TABLE IF NOT EXISTS account (
    account_id TEXT PRIMARY KEY,
    username TEXT,
    display_name TEXT
);
"#;

/// [`ArchiveSource`] over a SQLite archive database.
pub struct SqliteArchive {
    conn: Mutex<Connection>,
    location: String,
}

impl SqliteArchive {
    /// Open an archive file.
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let conn = Connection::open(path).map_err(|e| ArchiveError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            conn: Mutex::new(conn),
            location: path.display().to_string(),
        })
    }

    /// Wrap an already open connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            location: ":connection:".to_string(),
        }
    }

    /// Create the archive tables if they do not exist.
    pub fn init_schema(conn: &Connection) -> Result<(), ArchiveError> {
        conn.execute_batch(SCHEMA).map_err(|e| ArchiveError::Query {
            table: "schema".to_string(),
            reason: e.to_string(),
        })
    }

    fn read_all(conn: &Connection) -> Result<ArchiveRows, ArchiveError> {
        let items = load_items(conn)?;
        let likes = load_likes(conn)?;

        let users = if table_exists(conn, "users")? {
            load_users(conn)?
        } else {
            Vec::new()
        };
        let blocked = if table_exists(conn, "blocks")? {
            load_ids(conn, "blocks")?
        } else {
            Vec::new()
        };
        let muted = if table_exists(conn, "mutes")? {
            load_ids(conn, "mutes")?
        } else {
            Vec::new()
        };
        let account = if table_exists(conn, "account")? {
            load_account(conn)?
        } else {
            None
        };

        Ok(ArchiveRows {
            items,
            likes,
            users,
            blocked,
            muted,
            account,
        })
    }
}

impl ArchiveSource for SqliteArchive {
    fn load_rows(&self) -> Result<ArchiveRows, ArchiveError> {
        let conn = self.conn.lock().map_err(|_| ArchiveError::Unavailable {
            reason: "archive connection lock poisoned".to_string(),
        })?;
        Self::read_all(&conn)
    }
}

impl fmt::Debug for SqliteArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteArchive")
            .field("location", &self.location)
            .finish()
    }
}

// ============================================================================
// ROW LOADERS
// ============================================================================

fn query_error(table: &str) -> impl Fn(rusqlite::Error) -> ArchiveError + '_ {
    move |e| ArchiveError::Query {
        table: table.to_string(),
        reason: e.to_string(),
    }
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool, ArchiveError> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(query_error("sqlite_master"))
}

fn load_items(conn: &Connection) -> Result<Vec<ContentItem>, ArchiveError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, text, created_at, conversation_id, author_id, in_reply_to_status_id, \
             in_reply_to_screen_name, favorite_count, retweet_count, lang, deleted_at FROM tweets",
        )
        .map_err(query_error("tweets"))?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<i64>>(7)?,
                row.get::<_, Option<i64>>(8)?,
                row.get::<_, Option<String>>(9)?,
                row.get::<_, Option<String>>(10)?,
            ))
        })
        .map_err(query_error("tweets"))?;

    let mut items = Vec::new();
    for row in rows {
        let (id, text, created_at, conversation_id, author_id, parent_id, reply_to, favs, rts, lang, deleted_at) =
            row.map_err(query_error("tweets"))?;
        items.push(ContentItem {
            created_at: created_at
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or_default(),
            deleted_at: deleted_at.as_deref().and_then(parse_timestamp),
            id,
            text: text.unwrap_or_default(),
            author_id: non_empty(author_id),
            parent_id: non_empty(parent_id),
            conversation_id: non_empty(conversation_id),
            in_reply_to_username: non_empty(reply_to),
            favorite_count: favs.unwrap_or(0).max(0) as u64,
            retweet_count: rts.unwrap_or(0).max(0) as u64,
            lang,
        });
    }
    Ok(items)
}

fn load_likes(conn: &Connection) -> Result<Vec<LikedItem>, ArchiveError> {
    let mut stmt = conn
        .prepare("SELECT tweet_id, full_text, expanded_url, liked_at, author_id, author_username FROM likes")
        .map_err(query_error("likes"))?;

    let rows = stmt
        .query_map([], |row| {
            Ok(LikedItem {
                item_id: row.get(0)?,
                text: row.get(1)?,
                expanded_url: row.get(2)?,
                liked_at: row
                    .get::<_, Option<String>>(3)?
                    .as_deref()
                    .and_then(parse_timestamp),
                author_id: non_empty(row.get(4)?),
                author_username: non_empty(row.get(5)?),
                author_display_name: None,
            })
        })
        .map_err(query_error("likes"))?;

    rows.collect::<Result<Vec<_>, _>>()
        .map_err(query_error("likes"))
}

fn load_users(conn: &Connection) -> Result<Vec<UserRecord>, ArchiveError> {
    let mut stmt = conn
        .prepare("SELECT id, username, display_name, user_link FROM users")
        .map_err(query_error("users"))?;

    let rows = stmt
        .query_map([], |row| {
            Ok(UserRecord {
                id: row.get(0)?,
                username: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                display_name: row.get(2)?,
                profile_url: row.get(3)?,
            })
        })
        .map_err(query_error("users"))?;

    rows.collect::<Result<Vec<_>, _>>()
        .map_err(query_error("users"))
}

fn load_ids(conn: &Connection, table: &str) -> Result<Vec<String>, ArchiveError> {
    let sql = format!("SELECT user_id FROM {}", table);
    let mut stmt = conn.prepare(&sql).map_err(query_error(table))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(query_error(table))?;
    rows.collect::<Result<Vec<_>, _>>().map_err(query_error(table))
}

fn load_account(conn: &Connection) -> Result<Option<AccountRecord>, ArchiveError> {
    conn.query_row(
        "SELECT account_id, username, display_name FROM account LIMIT 1",
        [],
        |row| {
            Ok(AccountRecord {
                account_id: row.get(0)?,
                username: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                display_name: row.get(2)?,
            })
        },
    )
    .optional()
    .map_err(query_error("account"))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Archive timestamps are RFC 3339 or the legacy `Wed Oct 10 20:19:24 +0000 2018` form.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%a %b %d %H:%M:%S %z %Y"))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
