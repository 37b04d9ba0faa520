mod types;
pub use types::*;

use std::{str::FromStr, sync::Arc};

use chrono::{NaiveDate, Utc};
pub use sqlx::Error;
use sqlx::{
    migrate::MigrateDatabase,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Executor, Row, Sqlite, SqliteConnection, Transaction,
};
use teloxide::types::UserId;
use url::Url;

use crate::{
    reputation::{Action, Score},
    types::{InvalidTransition, LinkStatus, Verdict},
};

type Pool = sqlx::Pool<Sqlite>;

/// How many comments one user may leave on one link.
pub const MAX_COMMENTS_PER_LINK: i64 = 3;

/// Columns selected to build a [`LinkInfo`], in the order [`link_from_row`] expects.
macro_rules! link_columns {
    () => {
        "id, hidden_id, url, submitted_by, status, votes_legit, votes_scam, created_at"
    };
}

/// Columns selected to build a [`UserRecord`], in the order [`user_from_row`] expects.
macro_rules! user_columns {
    () => {
        "telegram_id, username, points, trust_score, referral_code, referrer_id, last_daily, created_at"
    };
}

// SQLite has no unsigned integers, and Telegram user IDs fit in 52 bits anyway.
#[allow(clippy::cast_possible_wrap)]
fn db_id(user: UserId) -> i64 {
    user.0 as i64
}

#[allow(clippy::cast_sign_loss)]
fn user_id(db_id: i64) -> UserId {
    UserId(db_id as u64)
}

fn link_from_row(row: SqliteRow) -> Result<LinkInfo, Error> {
    let status: i64 = row.try_get(4)?;
    let status = LinkStatus::try_from(status)
        .map_err(|x| Error::Decode(format!("Unknown link status in database: {x}").into()))?;

    Ok(LinkInfo {
        id: row.try_get(0)?,
        hidden_id: row.try_get(1)?,
        url: row.try_get(2)?,
        submitted_by: row.try_get::<Option<i64>, _>(3)?.map(user_id),
        status,
        votes_legit: row.try_get(5)?,
        votes_scam: row.try_get(6)?,
        created_at: row.try_get(7)?,
    })
}

fn user_from_row(row: SqliteRow) -> Result<UserRecord, Error> {
    Ok(UserRecord {
        id: user_id(row.try_get(0)?),
        username: row.try_get(1)?,
        score: Score {
            points: row.try_get(2)?,
            trust: row.try_get(3)?,
        },
        referral_code: row.try_get(4)?,
        referrer: row.try_get::<Option<i64>, _>(5)?.map(user_id),
        last_daily: row.try_get(6)?,
        created_at: row.try_get(7)?,
    })
}

fn leaderboard_entry_from_row(row: SqliteRow) -> LeaderboardEntry {
    LeaderboardEntry {
        id: user_id(row.get(0)),
        username: row.get(1),
        score: Score {
            points: row.get(2),
            trust: row.get(3),
        },
    }
}

/// A random string of lowercase hex digits.
fn random_hex(digits: usize) -> String {
    use rand::RngExt;
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut rng = rand::rng();
    (0..digits)
        .map(|_| HEX[rng.random_range(0..HEX.len())] as char)
        .collect()
}

/// Generate random hex codes until `taken_query` says one of them is free.
async fn unused_code(
    conn: &mut SqliteConnection,
    taken_query: &'static str,
    digits: usize,
) -> Result<String, Error> {
    loop {
        let code = random_hex(digits);
        let taken = sqlx::query(taken_query)
            .bind(&code)
            .fetch_optional(&mut *conn)
            .await?
            .is_some();
        if !taken {
            return Ok(code);
        }
        log::debug!("Random code {code} was taken, rolling again.");
    }
}

/// Escape `keyword` for a `LIKE ... ESCAPE '\'` substring search.
fn like_pattern(keyword: &str) -> String {
    let escaped = keyword
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

/// Push an action through the reputation engine for this user and store the result.
///
/// Returns [`None`] if there's no such user.
async fn apply_action_on(
    conn: &mut SqliteConnection,
    user: UserId,
    action: Action,
) -> Result<Option<ScoreChange>, Error> {
    let Some(before) = sqlx::query("SELECT points, trust_score FROM users WHERE telegram_id=?;")
        .bind(db_id(user))
        .map(|row: SqliteRow| Score {
            points: row.get(0),
            trust: row.get(1),
        })
        .fetch_optional(&mut *conn)
        .await?
    else {
        log::warn!("Tried to apply {action} to unknown user {user}");
        return Ok(None);
    };

    let after = before.apply(action);

    if after != before {
        sqlx::query("UPDATE users SET points=?, trust_score=? WHERE telegram_id=?;")
            .bind(after.points)
            .bind(after.trust)
            .bind(db_id(user))
            .execute(&mut *conn)
            .await?;
    }

    log::debug!(
        "Applied {action} to user {user}: points {} -> {}, trust {} -> {}",
        before.points,
        after.points,
        before.trust,
        after.trust
    );

    Ok(Some(ScoreChange { before, after }))
}

async fn get_link_on(conn: &mut SqliteConnection, link_id: i64) -> Result<LinkInfo, Error> {
    sqlx::query(concat!("SELECT ", link_columns!(), " FROM links WHERE id=?;"))
        .bind(link_id)
        .try_map(link_from_row)
        .fetch_one(&mut *conn)
        .await
}

async fn find_link_by_url_on(
    conn: &mut SqliteConnection,
    url: &Url,
) -> Result<Option<LinkInfo>, Error> {
    sqlx::query(concat!("SELECT ", link_columns!(), " FROM links WHERE url=?;"))
        .bind(url.as_str())
        .try_map(link_from_row)
        .fetch_optional(&mut *conn)
        .await
}

async fn set_status_on(
    conn: &mut SqliteConnection,
    link_id: i64,
    status: LinkStatus,
) -> Result<(), Error> {
    sqlx::query("UPDATE links SET status=? WHERE id=?;")
        .bind(i64::from(status))
        .bind(link_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub struct Database {
    pool: Pool,
}

impl Database {
    /// Connect to the database at `database_url` and create the tables if
    /// they aren't there yet. `sqlite::memory:` gives a fresh throwaway one.
    pub async fn new(database_url: &str) -> Result<Arc<Database>, Error> {
        let in_memory = database_url.contains(":memory:");

        if !in_memory && !Sqlite::database_exists(database_url).await.unwrap_or(false) {
            Sqlite::create_database(database_url).await?;
        }

        let options = SqliteConnectOptions::from_str(database_url)?
            .pragma("cache_size", "-32768")
            .busy_timeout(std::time::Duration::from_secs(600));

        let pool_options = if in_memory {
            // Each connection to an in-memory database is a database of its own,
            // so there must be exactly one and it must never be closed.
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(32)
        };

        let pool = pool_options.connect_with(options).await?;

        // Do some init. Create the tables...

        // USERS:
        // telegram_id (unique primary key, i64 because sqlite doesn't support u64)
        // username (display name, "@username" if they have one)
        // points (never negative)
        // trust_score (0 to 200)
        // referral_code (unique, 6 hex digits)
        // referrer_id (telegram_id of who referred them, may be NULL)
        // last_daily (UTC date of last daily bonus, may be NULL)
        // created_at (date+time in UTC)
        pool.execute(sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                telegram_id INTEGER PRIMARY KEY NOT NULL,
                username TEXT NOT NULL,
                points INTEGER NOT NULL DEFAULT 0 CHECK (points >= 0),
                trust_score INTEGER NOT NULL DEFAULT 100 CHECK (trust_score BETWEEN 0 AND 200),
                referral_code TEXT NOT NULL UNIQUE COLLATE NOCASE,
                referrer_id INTEGER NULL,
                last_daily TEXT NULL,
                created_at TEXT NOT NULL
            ) STRICT;",
        ))
        .await?;

        // LINKS:
        // id (key)
        // url (unique, normalized)
        // hidden_id (unique, 8 hex digits, what users refer to the link by)
        // submitted_by (telegram_id, NULL if it was first seen in a report)
        // status (see LinkStatus)
        // votes_legit, votes_scam (tallies of the votes table)
        // created_at (date+time in UTC)
        pool.execute(sqlx::query(
            "CREATE TABLE IF NOT EXISTS links (
                id INTEGER PRIMARY KEY NOT NULL,
                url TEXT NOT NULL UNIQUE COLLATE NOCASE,
                hidden_id TEXT NOT NULL UNIQUE,
                submitted_by INTEGER NULL,
                status INTEGER NOT NULL,
                votes_legit INTEGER NOT NULL DEFAULT 0,
                votes_scam INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            ) STRICT;",
        ))
        .await?;

        // REPORTS:
        // resolved (0 for no, 1 for yes, set when a moderator decides on the link)
        pool.execute(sqlx::query(
            "CREATE TABLE IF NOT EXISTS reports (
                id INTEGER PRIMARY KEY NOT NULL,
                link_id INTEGER NOT NULL REFERENCES links(id),
                reported_by INTEGER NOT NULL,
                reason TEXT NOT NULL,
                created_at TEXT NOT NULL,
                resolved INTEGER NOT NULL DEFAULT 0
            ) STRICT;",
        ))
        .await?;

        pool.execute(sqlx::query(
            "CREATE TABLE IF NOT EXISTS comments (
                id INTEGER PRIMARY KEY NOT NULL,
                link_id INTEGER NOT NULL REFERENCES links(id),
                user_id INTEGER NOT NULL,
                text TEXT NOT NULL,
                created_at TEXT NOT NULL
            ) STRICT;",
        ))
        .await?;

        // VOTES:
        // is_scam (0 for "legit", 1 for "scam")
        pool.execute(sqlx::query(
            "CREATE TABLE IF NOT EXISTS votes (
                link_id INTEGER NOT NULL REFERENCES links(id),
                user_id INTEGER NOT NULL,
                is_scam INTEGER NOT NULL,
                PRIMARY KEY (link_id, user_id)
            ) STRICT;",
        ))
        .await?;

        let _ = sqlx::query("CREATE INDEX IF NOT EXISTS reports_link ON reports(link_id);")
            .execute(&pool)
            .await;
        let _ = sqlx::query("CREATE INDEX IF NOT EXISTS links_submitted_by ON links(submitted_by);")
            .execute(&pool)
            .await;
        let _ = sqlx::query("CREATE INDEX IF NOT EXISTS users_referrer ON users(referrer_id);")
            .execute(&pool)
            .await;

        Ok(Arc::new(Database { pool }))
    }

    /// Start a transaction holding the write lock from the start, so that
    /// concurrent writers wait on the busy timeout instead of failing with
    /// "database is locked".
    async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>, Error> {
        self.pool.begin_with("BEGIN IMMEDIATE").await
    }

    /// Make sure this user is in the database, and update their display name
    /// if they are.
    ///
    /// If they're new and `referral_code` belongs to someone else, that
    /// someone is recorded as their referrer and gets rewarded for it.
    pub async fn ensure_user(
        &self,
        user: UserId,
        username: &str,
        referral_code: Option<&str>,
    ) -> Result<EnsureUserResult, Error> {
        let mut tx = self.begin_write().await?;

        let exists = sqlx::query("SELECT 1 FROM users WHERE telegram_id=?;")
            .bind(db_id(user))
            .fetch_optional(&mut *tx)
            .await?
            .is_some();

        if exists {
            sqlx::query("UPDATE users SET username=? WHERE telegram_id=?;")
                .bind(username)
                .bind(db_id(user))
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok(EnsureUserResult::Existing);
        }

        let referrer = match referral_code.map(str::trim).filter(|x| !x.is_empty()) {
            Some(code) => {
                sqlx::query("SELECT telegram_id FROM users WHERE referral_code=?;")
                    .bind(code)
                    .map(|row: SqliteRow| user_id(row.get(0)))
                    .fetch_optional(&mut *tx)
                    .await?
            }
            None => None,
        };

        let own_code =
            unused_code(&mut tx, "SELECT 1 FROM users WHERE referral_code=?;", 6).await?;

        let initial = Score::INITIAL;
        sqlx::query(
            "INSERT INTO users (
                telegram_id,
                username,
                points,
                trust_score,
                referral_code,
                referrer_id,
                created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?);",
        )
        .bind(db_id(user))
        .bind(username)
        .bind(initial.points)
        .bind(initial.trust)
        .bind(&own_code)
        .bind(referrer.map(db_id))
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        let referred_by = match referrer {
            Some(referrer) => apply_action_on(&mut tx, referrer, Action::Referral)
                .await?
                .map(|change| (referrer, change)),
            None => None,
        };

        tx.commit().await?;

        log::info!("New user {user} ({username}), referred by {referrer:?}");

        Ok(EnsureUserResult::Created { referred_by })
    }

    pub async fn get_user(&self, user: UserId) -> Result<Option<UserRecord>, Error> {
        sqlx::query(concat!(
            "SELECT ",
            user_columns!(),
            " FROM users WHERE telegram_id=?;"
        ))
        .bind(db_id(user))
        .try_map(user_from_row)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn get_user_stats(&self, user: UserId) -> Result<UserStats, Error> {
        sqlx::query(
            "SELECT
                (SELECT COUNT(*) FROM links WHERE submitted_by=?1),
                (SELECT COUNT(*) FROM reports WHERE reported_by=?1),
                (SELECT COUNT(*) FROM users WHERE referrer_id=?1);",
        )
        .bind(db_id(user))
        .map(|row: SqliteRow| UserStats {
            links_added: row.get(0),
            reports_made: row.get(1),
            friends_invited: row.get(2),
        })
        .fetch_one(&self.pool)
        .await
    }

    /// Push an action through the reputation engine for this user.
    ///
    /// Returns [`None`] if there's no such user.
    pub async fn apply_action(
        &self,
        user: UserId,
        action: Action,
    ) -> Result<Option<ScoreChange>, Error> {
        let mut tx = self.begin_write().await?;
        let change = apply_action_on(&mut tx, user, action).await?;
        tx.commit().await?;
        Ok(change)
    }

    /// Punish a user for gaming the system.
    pub async fn penalize(&self, user: UserId) -> Result<Option<ScoreChange>, Error> {
        self.apply_action(user, Action::Cheat).await
    }

    /// Submit a new link on behalf of `submitter`, who should already be
    /// in the database to get points for it.
    pub async fn add_link(&self, url: &Url, submitter: UserId) -> Result<AddLinkResult, Error> {
        let mut tx = self.begin_write().await?;

        if let Some(existing) = find_link_by_url_on(&mut tx, url).await? {
            return Ok(AddLinkResult::AlreadyExists(existing));
        }

        let hidden_id = unused_code(&mut tx, "SELECT 1 FROM links WHERE hidden_id=?;", 8).await?;

        let link_id: i64 = sqlx::query(
            "INSERT INTO links (url, hidden_id, submitted_by, status, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id;",
        )
        .bind(url.as_str())
        .bind(&hidden_id)
        .bind(db_id(submitter))
        .bind(i64::from(LinkStatus::Pending))
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?
        .get(0);

        let change = apply_action_on(&mut tx, submitter, Action::AddLink).await?;
        let link = get_link_on(&mut tx, link_id).await?;

        tx.commit().await?;

        Ok(AddLinkResult::Added { link, change })
    }

    pub async fn get_link(&self, link_id: i64) -> Result<Option<LinkInfo>, Error> {
        sqlx::query(concat!("SELECT ", link_columns!(), " FROM links WHERE id=?;"))
            .bind(link_id)
            .try_map(link_from_row)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn find_link_by_url(&self, url: &Url) -> Result<Option<LinkInfo>, Error> {
        let mut conn = self.pool.acquire().await?;
        find_link_by_url_on(&mut conn, url).await
    }

    pub async fn find_link_by_hidden_id(&self, hidden_id: &str) -> Result<Option<LinkInfo>, Error> {
        sqlx::query(concat!(
            "SELECT ",
            link_columns!(),
            " FROM links WHERE hidden_id=?;"
        ))
        .bind(hidden_id.trim().to_ascii_lowercase())
        .try_map(link_from_row)
        .fetch_optional(&self.pool)
        .await
    }

    /// Links whose URL contains `keyword`, newest first.
    pub async fn search_links(&self, keyword: &str, limit: i64) -> Result<Vec<LinkInfo>, Error> {
        sqlx::query(concat!(
            "SELECT ",
            link_columns!(),
            " FROM links WHERE url LIKE ? ESCAPE '\\' ORDER BY id DESC LIMIT ?;"
        ))
        .bind(like_pattern(keyword))
        .bind(limit)
        .try_map(link_from_row)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn recent_links(&self, limit: i64) -> Result<Vec<LinkInfo>, Error> {
        sqlx::query(concat!(
            "SELECT ",
            link_columns!(),
            " FROM links ORDER BY id DESC LIMIT ?;"
        ))
        .bind(limit)
        .try_map(link_from_row)
        .fetch_all(&self.pool)
        .await
    }

    /// Report a link. If the link isn't known yet, it's added as reported.
    pub async fn report_link(
        &self,
        url: &Url,
        reporter: UserId,
        reason: &str,
    ) -> Result<ReportResult, Error> {
        let mut tx = self.begin_write().await?;

        let (link_id, link_created) = match find_link_by_url_on(&mut tx, url).await? {
            Some(link) => {
                if link.submitted_by == Some(reporter) {
                    return Ok(ReportResult::OwnLink);
                }

                let already_reported = sqlx::query(
                    "SELECT 1 FROM reports WHERE link_id=? AND reported_by=? AND resolved=0;",
                )
                .bind(link.id)
                .bind(db_id(reporter))
                .fetch_optional(&mut *tx)
                .await?
                .is_some();

                if already_reported {
                    return Ok(ReportResult::AlreadyReported);
                }

                // Already scam or under review links stay where they are.
                if link.status.can_transition_to(LinkStatus::Reported) {
                    set_status_on(&mut tx, link.id, LinkStatus::Reported).await?;
                }

                (link.id, false)
            }
            None => {
                let hidden_id =
                    unused_code(&mut tx, "SELECT 1 FROM links WHERE hidden_id=?;", 8).await?;

                let link_id: i64 = sqlx::query(
                    "INSERT INTO links (url, hidden_id, submitted_by, status, created_at)
                    VALUES (?, ?, NULL, ?, ?)
                    RETURNING id;",
                )
                .bind(url.as_str())
                .bind(&hidden_id)
                .bind(i64::from(LinkStatus::Reported))
                .bind(Utc::now())
                .fetch_one(&mut *tx)
                .await?
                .get(0);

                (link_id, true)
            }
        };

        sqlx::query(
            "INSERT INTO reports (link_id, reported_by, reason, created_at) VALUES (?, ?, ?, ?);",
        )
        .bind(link_id)
        .bind(db_id(reporter))
        .bind(reason)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        let change = apply_action_on(&mut tx, reporter, Action::ReportLink).await?;
        let link = get_link_on(&mut tx, link_id).await?;

        tx.commit().await?;

        Ok(ReportResult::Reported {
            link,
            link_created,
            change,
        })
    }

    pub async fn add_comment(
        &self,
        link_id: i64,
        user: UserId,
        text: &str,
    ) -> Result<CommentResult, Error> {
        let mut tx = self.begin_write().await?;

        let count: i64 = sqlx::query("SELECT COUNT(*) FROM comments WHERE link_id=? AND user_id=?;")
            .bind(link_id)
            .bind(db_id(user))
            .fetch_one(&mut *tx)
            .await?
            .get(0);

        if count >= MAX_COMMENTS_PER_LINK {
            return Ok(CommentResult::LimitReached);
        }

        sqlx::query("INSERT INTO comments (link_id, user_id, text, created_at) VALUES (?, ?, ?, ?);")
            .bind(link_id)
            .bind(db_id(user))
            .bind(text)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        let change = apply_action_on(&mut tx, user, Action::CommentLink).await?;

        tx.commit().await?;

        Ok(CommentResult::Added { change })
    }

    /// Most recent comments on a link, newest first, with their authors' names.
    pub async fn get_comments(
        &self,
        link_id: i64,
        limit: i64,
    ) -> Result<Vec<(String, String)>, Error> {
        sqlx::query(
            "SELECT COALESCE(users.username, CAST(comments.user_id AS TEXT)), comments.text
            FROM comments LEFT JOIN users ON users.telegram_id=comments.user_id
            WHERE comments.link_id=?
            ORDER BY comments.id DESC LIMIT ?;",
        )
        .bind(link_id)
        .bind(limit)
        .map(|row: SqliteRow| (row.get(0), row.get(1)))
        .fetch_all(&self.pool)
        .await
    }

    /// Claim the daily bonus for `today`, if it wasn't claimed on that date yet.
    pub async fn claim_daily(&self, user: UserId, today: NaiveDate) -> Result<DailyResult, Error> {
        let mut tx = self.begin_write().await?;

        let updated = sqlx::query(
            "UPDATE users SET last_daily=?
            WHERE telegram_id=? AND (last_daily IS NULL OR last_daily<>?);",
        )
        .bind(today)
        .bind(db_id(user))
        .bind(today)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            let exists = sqlx::query("SELECT 1 FROM users WHERE telegram_id=?;")
                .bind(db_id(user))
                .fetch_optional(&mut *tx)
                .await?
                .is_some();

            return Ok(match exists {
                true => DailyResult::AlreadyClaimed,
                false => DailyResult::UnknownUser,
            });
        }

        let Some(change) = apply_action_on(&mut tx, user, Action::DailyBonus).await? else {
            return Ok(DailyResult::UnknownUser);
        };

        tx.commit().await?;

        Ok(DailyResult::Claimed { change })
    }

    /// Cast or change a user's vote on a link.
    pub async fn vote(
        &self,
        link_id: i64,
        voter: UserId,
        verdict: Verdict,
    ) -> Result<VoteResult, Error> {
        let mut tx = self.begin_write().await?;

        let link = get_link_on(&mut tx, link_id).await?;
        if link.submitted_by == Some(voter) {
            return Ok(VoteResult::OwnLink);
        }

        sqlx::query(
            "INSERT INTO votes (link_id, user_id, is_scam) VALUES (?, ?, ?)
            ON CONFLICT (link_id, user_id) DO UPDATE SET is_scam=excluded.is_scam;",
        )
        .bind(link_id)
        .bind(db_id(voter))
        .bind(verdict == Verdict::Scam)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE links SET
                votes_legit=(SELECT COUNT(*) FROM votes WHERE link_id=?1 AND is_scam=0),
                votes_scam=(SELECT COUNT(*) FROM votes WHERE link_id=?1 AND is_scam=1)
            WHERE id=?1;",
        )
        .bind(link_id)
        .execute(&mut *tx)
        .await?;

        let mut link = get_link_on(&mut tx, link_id).await?;
        let escalated = link
            .status
            .escalates_on_votes(link.votes_legit, link.votes_scam);

        if escalated {
            set_status_on(&mut tx, link_id, LinkStatus::UnderReview).await?;
            link.status = LinkStatus::UnderReview;
            log::info!("Link {} went under review due to votes.", link.hidden_id);
        }

        tx.commit().await?;

        Ok(VoteResult::Voted { link, escalated })
    }

    /// Move a link to another status, if the transition table allows it.
    pub async fn set_link_status(
        &self,
        link_id: i64,
        to: LinkStatus,
    ) -> Result<Result<LinkInfo, InvalidTransition>, Error> {
        let mut tx = self.begin_write().await?;

        let link = get_link_on(&mut tx, link_id).await?;
        if let Err(e) = link.status.transition(to) {
            return Ok(Err(e));
        }

        set_status_on(&mut tx, link_id, to).await?;
        let link = get_link_on(&mut tx, link_id).await?;

        tx.commit().await?;

        Ok(Ok(link))
    }

    /// Apply a moderator's verdict on a link: move it to its final status,
    /// reward or punish the submitter, reward or punish everyone who
    /// reported it, and resolve those reports.
    pub async fn moderate_link(
        &self,
        link_id: i64,
        verdict: Verdict,
    ) -> Result<Result<ModerationResult, InvalidTransition>, Error> {
        let (submitter_action, reporter_action) = match verdict {
            Verdict::Legit => (Action::ApprovedLink, Action::FalseReport),
            Verdict::Scam => (Action::SpamLink, Action::ValidReport),
        };

        let mut tx = self.begin_write().await?;

        let link = get_link_on(&mut tx, link_id).await?;
        let new_status = match link.status.transition(verdict.resulting_status()) {
            Ok(s) => s,
            Err(e) => return Ok(Err(e)),
        };

        set_status_on(&mut tx, link_id, new_status).await?;

        let submitter = match link.submitted_by {
            Some(submitter) => apply_action_on(&mut tx, submitter, submitter_action)
                .await?
                .map(|change| (submitter, change)),
            None => None,
        };

        let reporter_ids: Vec<i64> =
            sqlx::query("SELECT reported_by FROM reports WHERE link_id=? AND resolved=0 ORDER BY id;")
                .bind(link_id)
                .map(|row: SqliteRow| row.get(0))
                .fetch_all(&mut *tx)
                .await?;

        let mut reporters = Vec::with_capacity(reporter_ids.len());
        for reporter in reporter_ids.into_iter().map(user_id) {
            if let Some(change) = apply_action_on(&mut tx, reporter, reporter_action).await? {
                reporters.push((reporter, change));
            }
        }

        sqlx::query("UPDATE reports SET resolved=1 WHERE link_id=? AND resolved=0;")
            .bind(link_id)
            .execute(&mut *tx)
            .await?;

        let link = get_link_on(&mut tx, link_id).await?;

        tx.commit().await?;

        log::info!(
            "Link {} moderated as {verdict}, {} reports resolved.",
            link.hidden_id,
            reporters.len()
        );

        Ok(Ok(ModerationResult {
            link,
            submitter,
            reporters,
        }))
    }

    /// Next link a moderator should look at, after the one with `after_id`.
    /// Wraps around to the start if there's nothing after it.
    pub async fn next_for_review(&self, after_id: i64) -> Result<Option<LinkInfo>, Error> {
        let query = concat!(
            "SELECT ",
            link_columns!(),
            " FROM links WHERE status IN (?, ?, ?) AND id>? ORDER BY id LIMIT 1;"
        );

        for after_id in [after_id, 0] {
            let link = sqlx::query(query)
                .bind(i64::from(LinkStatus::Pending))
                .bind(i64::from(LinkStatus::Reported))
                .bind(i64::from(LinkStatus::UnderReview))
                .bind(after_id)
                .try_map(link_from_row)
                .fetch_optional(&self.pool)
                .await?;

            if link.is_some() {
                return Ok(link);
            }
        }

        Ok(None)
    }

    /// Amount of links waiting on a moderator's decision.
    pub async fn review_count(&self) -> Result<i64, Error> {
        sqlx::query("SELECT COUNT(*) FROM links WHERE status IN (?, ?, ?);")
            .bind(i64::from(LinkStatus::Pending))
            .bind(i64::from(LinkStatus::Reported))
            .bind(i64::from(LinkStatus::UnderReview))
            .map(|row: SqliteRow| row.get(0))
            .fetch_one(&self.pool)
            .await
    }

    pub async fn top_by_points(&self, limit: i64) -> Result<Vec<LeaderboardEntry>, Error> {
        sqlx::query(
            "SELECT telegram_id, username, points, trust_score FROM users
            ORDER BY points DESC, telegram_id LIMIT ?;",
        )
        .bind(limit)
        .map(leaderboard_entry_from_row)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn top_by_trust(&self, limit: i64) -> Result<Vec<LeaderboardEntry>, Error> {
        sqlx::query(
            "SELECT telegram_id, username, points, trust_score FROM users
            ORDER BY trust_score DESC, telegram_id LIMIT ?;",
        )
        .bind(limit)
        .map(leaderboard_entry_from_row)
        .fetch_all(&self.pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: UserId = UserId(1);
    const BOB: UserId = UserId(2);
    const CAROL: UserId = UserId(3);
    const DAVE: UserId = UserId(4);

    async fn db() -> Arc<Database> {
        Database::new("sqlite::memory:").await.unwrap()
    }

    async fn db_with_users(users: &[UserId]) -> Arc<Database> {
        let db = db().await;
        for user in users {
            db.ensure_user(*user, &format!("user{}", user.0), None)
                .await
                .unwrap();
        }
        db
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    async fn added_link(db: &Database, s: &str, submitter: UserId) -> LinkInfo {
        match db.add_link(&url(s), submitter).await.unwrap() {
            AddLinkResult::Added { link, .. } => link,
            AddLinkResult::AlreadyExists(_) => panic!("{s} was already there"),
        }
    }

    #[tokio::test]
    async fn users_and_referrals() {
        let db = db().await;

        assert_eq!(
            db.ensure_user(ALICE, "@alice", None).await.unwrap(),
            EnsureUserResult::Created { referred_by: None }
        );
        let alice = db.get_user(ALICE).await.unwrap().unwrap();
        assert_eq!(alice.score, Score::INITIAL);
        assert_eq!(alice.referral_code.len(), 6);
        assert!(alice.referral_code.chars().all(|c| c.is_ascii_hexdigit()));

        let EnsureUserResult::Created {
            referred_by: Some((referrer, change)),
        } = db
            .ensure_user(BOB, "@bob", Some(alice.referral_code.as_str()))
            .await
            .unwrap()
        else {
            panic!("Bob should have been referred by Alice");
        };
        assert_eq!(referrer, ALICE);
        assert_eq!(change.points_gained(), 5);
        assert_eq!(db.get_user(BOB).await.unwrap().unwrap().referrer, Some(ALICE));

        // Garbage codes are ignored.
        assert_eq!(
            db.ensure_user(CAROL, "Carol", Some("nope")).await.unwrap(),
            EnsureUserResult::Created { referred_by: None }
        );

        // Coming back doesn't give anything, but renames.
        assert_eq!(
            db.ensure_user(BOB, "@bobby", Some(alice.referral_code.as_str()))
                .await
                .unwrap(),
            EnsureUserResult::Existing
        );
        assert_eq!(db.get_user(BOB).await.unwrap().unwrap().username, "@bobby");
        assert_eq!(db.get_user(ALICE).await.unwrap().unwrap().score.points, 5);

        let stats = db.get_user_stats(ALICE).await.unwrap();
        assert_eq!(stats.friends_invited, 1);
        assert_eq!(db.get_user(DAVE).await.unwrap(), None);
    }

    #[tokio::test]
    async fn adding_links() {
        let db = db_with_users(&[ALICE, BOB]).await;

        let AddLinkResult::Added { link, change } =
            db.add_link(&url("https://example.com/"), ALICE).await.unwrap()
        else {
            panic!("Link should have been added");
        };
        assert_eq!(link.status, LinkStatus::Pending);
        assert_eq!(link.submitted_by, Some(ALICE));
        assert_eq!(link.hidden_id.len(), 8);
        assert_eq!(change.unwrap().points_gained(), 2);
        assert_eq!(change.unwrap().trust_gained(), 0);

        assert_eq!(
            db.add_link(&url("https://EXAMPLE.com/"), BOB).await.unwrap(),
            AddLinkResult::AlreadyExists(link.clone())
        );
        assert_eq!(db.get_user(BOB).await.unwrap().unwrap().score.points, 0);

        assert_eq!(
            db.find_link_by_hidden_id(&link.hidden_id.to_uppercase())
                .await
                .unwrap(),
            Some(link.clone())
        );
        assert_eq!(db.get_user_stats(ALICE).await.unwrap().links_added, 1);
    }

    #[tokio::test]
    async fn searching() {
        let db = db_with_users(&[ALICE]).await;
        added_link(&db, "https://example.com/", ALICE).await;
        added_link(&db, "https://another.org/top_picks", ALICE).await;

        assert_eq!(db.search_links("example", 10).await.unwrap().len(), 1);
        assert_eq!(db.search_links("https", 10).await.unwrap().len(), 2);
        assert_eq!(db.search_links("https", 1).await.unwrap().len(), 1);
        assert!(db.search_links("%", 10).await.unwrap().is_empty());
        assert_eq!(db.search_links("_", 10).await.unwrap().len(), 1);
        assert!(db.search_links("nothing", 10).await.unwrap().is_empty());

        let recent = db.recent_links(10).await.unwrap();
        assert_eq!(recent[0].url, "https://another.org/top_picks");
    }

    #[tokio::test]
    async fn reporting() {
        let db = db_with_users(&[ALICE, BOB]).await;
        let link = added_link(&db, "https://example.com/", ALICE).await;

        assert_eq!(
            db.report_link(&url("https://example.com/"), ALICE, "mine")
                .await
                .unwrap(),
            ReportResult::OwnLink
        );

        let ReportResult::Reported {
            link: reported,
            link_created,
            change,
        } = db
            .report_link(&url("https://example.com/"), BOB, "fake")
            .await
            .unwrap()
        else {
            panic!("Report should have gone through");
        };
        assert_eq!(reported.id, link.id);
        assert_eq!(reported.status, LinkStatus::Reported);
        assert!(!link_created);
        assert_eq!(change.unwrap().points_gained(), 3);

        assert_eq!(
            db.report_link(&url("https://example.com/"), BOB, "again")
                .await
                .unwrap(),
            ReportResult::AlreadyReported
        );

        // Unknown links get added by the report.
        let ReportResult::Reported {
            link, link_created, ..
        } = db
            .report_link(&url("https://scam.example/"), BOB, "")
            .await
            .unwrap()
        else {
            panic!("Report should have gone through");
        };
        assert!(link_created);
        assert_eq!(link.status, LinkStatus::Reported);
        assert_eq!(link.submitted_by, None);

        assert_eq!(db.get_user_stats(BOB).await.unwrap().reports_made, 2);
    }

    #[tokio::test]
    async fn comment_limit() {
        let db = db_with_users(&[ALICE, BOB]).await;
        let link = added_link(&db, "https://example.com/", ALICE).await;

        for i in 0..MAX_COMMENTS_PER_LINK {
            let CommentResult::Added { change } = db
                .add_comment(link.id, BOB, &format!("comment {i}"))
                .await
                .unwrap()
            else {
                panic!("Comment {i} should have been added");
            };
            assert_eq!(change.unwrap().points_gained(), 1);
        }
        assert_eq!(
            db.add_comment(link.id, BOB, "one too many").await.unwrap(),
            CommentResult::LimitReached
        );
        // Limit is per user.
        assert!(matches!(
            db.add_comment(link.id, ALICE, "hi").await.unwrap(),
            CommentResult::Added { .. }
        ));

        let comments = db.get_comments(link.id, 10).await.unwrap();
        assert_eq!(comments.len(), 4);
        assert_eq!(comments[0], ("user1".to_string(), "hi".to_string()));
    }

    #[tokio::test]
    async fn daily_once_per_day() {
        let db = db_with_users(&[ALICE]).await;
        let today = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let tomorrow = today.succ_opt().unwrap();

        let DailyResult::Claimed { change } = db.claim_daily(ALICE, today).await.unwrap() else {
            panic!("Daily should have been claimed");
        };
        assert_eq!(change.points_gained(), 1);
        assert_eq!(
            db.claim_daily(ALICE, today).await.unwrap(),
            DailyResult::AlreadyClaimed
        );
        assert!(matches!(
            db.claim_daily(ALICE, tomorrow).await.unwrap(),
            DailyResult::Claimed { .. }
        ));
        assert_eq!(
            db.claim_daily(BOB, today).await.unwrap(),
            DailyResult::UnknownUser
        );

        let alice = db.get_user(ALICE).await.unwrap().unwrap();
        assert_eq!(alice.score.points, 2);
        assert_eq!(alice.last_daily, Some(tomorrow));
    }

    #[tokio::test]
    async fn moderating_as_scam() {
        let db = db_with_users(&[ALICE, BOB, CAROL]).await;
        let link = added_link(&db, "https://example.com/", ALICE).await;
        db.report_link(&url("https://example.com/"), BOB, "fake")
            .await
            .unwrap();
        db.report_link(&url("https://example.com/"), CAROL, "also fake")
            .await
            .unwrap();

        let result = db
            .moderate_link(link.id, Verdict::Scam)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.link.status, LinkStatus::Scam);

        let (submitter, change) = result.submitter.unwrap();
        assert_eq!(submitter, ALICE);
        assert_eq!(change.trust_gained(), -20);

        assert_eq!(result.reporters.len(), 2);
        for (_, change) in &result.reporters {
            assert_eq!(change.trust_gained(), 5);
        }

        assert_eq!(db.review_count().await.unwrap(), 0);
        // Scam links only go back through review.
        assert!(db
            .moderate_link(link.id, Verdict::Legit)
            .await
            .unwrap()
            .is_err());
    }

    #[tokio::test]
    async fn moderating_as_legit() {
        let db = db_with_users(&[ALICE, BOB]).await;
        let link = added_link(&db, "https://example.com/", ALICE).await;
        db.report_link(&url("https://example.com/"), BOB, "i don't like it")
            .await
            .unwrap();

        let result = db
            .moderate_link(link.id, Verdict::Legit)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.link.status, LinkStatus::Verified);
        assert_eq!(result.submitter.unwrap().1.trust_gained(), 2);
        assert_eq!(result.reporters[0].1.trust_gained(), -10);

        let bob = db.get_user(BOB).await.unwrap().unwrap();
        assert_eq!(bob.score.trust, 90);
    }

    #[tokio::test]
    async fn status_changes_follow_the_table() {
        let db = db_with_users(&[ALICE]).await;
        let link = added_link(&db, "https://example.com/", ALICE).await;

        let verified = db
            .set_link_status(link.id, LinkStatus::Verified)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verified.status, LinkStatus::Verified);

        assert_eq!(
            db.set_link_status(link.id, LinkStatus::Scam).await.unwrap(),
            Err(InvalidTransition {
                from: LinkStatus::Verified,
                to: LinkStatus::Scam
            })
        );
        assert_eq!(
            db.get_link(link.id).await.unwrap().unwrap().status,
            LinkStatus::Verified
        );
    }

    #[tokio::test]
    async fn cheating_bottoms_out() {
        let db = db_with_users(&[ALICE]).await;
        for _ in 0..10 {
            db.penalize(ALICE).await.unwrap();
        }
        let alice = db.get_user(ALICE).await.unwrap().unwrap();
        assert_eq!(alice.score.trust, 0);
        assert_eq!(alice.score.points, 0);
        assert_eq!(db.penalize(DAVE).await.unwrap(), None);
    }

    #[tokio::test]
    async fn votes_escalate_to_review() {
        let db = db_with_users(&[ALICE, BOB, CAROL, DAVE]).await;
        let link = added_link(&db, "https://example.com/", ALICE).await;

        assert_eq!(
            db.vote(link.id, ALICE, Verdict::Legit).await.unwrap(),
            VoteResult::OwnLink
        );

        for (voter, expect_escalation) in [(BOB, false), (CAROL, false)] {
            let VoteResult::Voted { escalated, .. } =
                db.vote(link.id, voter, Verdict::Scam).await.unwrap()
            else {
                panic!("Vote should have counted");
            };
            assert_eq!(escalated, expect_escalation);
        }

        // Changing a vote doesn't add a new one.
        let VoteResult::Voted { link: voted, .. } =
            db.vote(link.id, CAROL, Verdict::Legit).await.unwrap()
        else {
            panic!("Vote should have counted");
        };
        assert_eq!((voted.votes_legit, voted.votes_scam), (1, 1));
        db.vote(link.id, CAROL, Verdict::Scam).await.unwrap();

        let VoteResult::Voted { link, escalated } =
            db.vote(link.id, DAVE, Verdict::Scam).await.unwrap()
        else {
            panic!("Vote should have counted");
        };
        assert!(escalated);
        assert_eq!(link.status, LinkStatus::UnderReview);
        assert_eq!(link.votes_scam, 3);
    }

    #[tokio::test]
    async fn reporting_keeps_decided_statuses() {
        let db = db_with_users(&[ALICE, BOB]).await;
        let scam = added_link(&db, "https://scam.example/", ALICE).await;
        db.moderate_link(scam.id, Verdict::Scam)
            .await
            .unwrap()
            .unwrap();
        let disputed = added_link(&db, "https://disputed.example/", ALICE).await;
        db.set_link_status(disputed.id, LinkStatus::UnderReview)
            .await
            .unwrap()
            .unwrap();

        for (link, status) in [(scam, LinkStatus::Scam), (disputed, LinkStatus::UnderReview)] {
            let ReportResult::Reported {
                link: reported,
                change,
                ..
            } = db
                .report_link(&url(&link.url), BOB, "still bad")
                .await
                .unwrap()
            else {
                panic!("Report on {} should have gone through", link.url);
            };
            assert_eq!(reported.status, status);
            assert_eq!(change.unwrap().points_gained(), 3);
        }

        assert_eq!(db.get_user_stats(BOB).await.unwrap().reports_made, 2);
    }

    #[tokio::test]
    async fn legit_votes_reopen_scam_links() {
        let db = db_with_users(&[ALICE, BOB, CAROL, DAVE]).await;
        let link = added_link(&db, "https://example.com/", ALICE).await;
        db.moderate_link(link.id, Verdict::Scam)
            .await
            .unwrap()
            .unwrap();

        let mut last = None;
        for voter in [BOB, CAROL, DAVE] {
            last = Some(db.vote(link.id, voter, Verdict::Legit).await.unwrap());
        }

        let Some(VoteResult::Voted { link, escalated }) = last else {
            panic!("Vote should have counted");
        };
        assert!(escalated);
        assert_eq!(link.status, LinkStatus::UnderReview);
        assert_eq!(link.votes_legit, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_writers_on_a_file() {
        let path = std::env::temp_dir().join(format!(
            "linktory_concurrent_writers_{}.sqlite",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        let db = Database::new(&format!("sqlite:{}", path.display()))
            .await
            .unwrap();

        let users: Vec<UserId> = (1..=40).map(UserId).collect();

        let mut tasks = Vec::new();
        for user in users.iter().copied() {
            let db = db.clone();
            tasks.push(tokio::spawn(async move {
                db.ensure_user(user, &format!("user{}", user.0), None).await?;
                db.apply_action(user, Action::DailyBonus).await
            }));
        }

        for task in tasks {
            let change = task.await.unwrap().unwrap();
            assert_eq!(change.unwrap().points_gained(), 1);
        }

        for user in users {
            let record = db.get_user(user).await.unwrap().unwrap();
            assert_eq!(record.score.points, 1);
        }

        drop(db);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn review_queue_and_leaderboards() {
        let db = db_with_users(&[ALICE, BOB]).await;
        let first = added_link(&db, "https://one.example/", ALICE).await;
        let second = added_link(&db, "https://two.example/", ALICE).await;
        added_link(&db, "https://three.example/", BOB).await;

        db.moderate_link(second.id, Verdict::Legit)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(db.review_count().await.unwrap(), 2);
        assert_eq!(db.next_for_review(0).await.unwrap().unwrap().id, first.id);
        let third = db.next_for_review(first.id).await.unwrap().unwrap();
        assert_eq!(third.url, "https://three.example/");
        // Wraps around.
        assert_eq!(
            db.next_for_review(third.id).await.unwrap().unwrap().id,
            first.id
        );

        // Alice has 4 points and 102 trust, Bob has 2 points and 100 trust.
        let by_points = db.top_by_points(10).await.unwrap();
        assert_eq!(by_points[0].id, ALICE);
        assert_eq!(by_points[0].score.points, 4);
        let by_trust = db.top_by_trust(1).await.unwrap();
        assert_eq!(by_trust.len(), 1);
        assert_eq!(by_trust[0].score.trust, 102);
    }
}
