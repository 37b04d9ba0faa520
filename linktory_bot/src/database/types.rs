use std::fmt::Display;

use chrono::{DateTime, NaiveDate, Utc};
use html_escape::encode_text;
use teloxide::types::UserId;

use crate::{
    reputation::{Badge, Score},
    types::LinkStatus,
};

/// A user as stored in the database.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    /// Display name, `@username` if they have one.
    pub username: String,
    pub score: Score,
    /// Code others can pass to `/start` to say this user referred them.
    pub referral_code: String,
    pub referrer: Option<UserId>,
    /// UTC date the daily bonus was last claimed on.
    pub last_daily: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    #[must_use]
    pub fn badge(&self) -> Badge {
        self.score.badge()
    }
}

/// Counters shown on a user's dashboard.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct UserStats {
    pub links_added: i64,
    pub reports_made: i64,
    pub friends_invited: i64,
}

/// A link as stored in the database.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkInfo {
    /// Internal row ID. Not shown to users.
    pub id: i64,
    /// Short random ID users refer to this link by.
    pub hidden_id: String,
    pub url: String,
    pub submitted_by: Option<UserId>,
    pub status: LinkStatus,
    pub votes_legit: i64,
    pub votes_scam: i64,
    pub created_at: DateTime<Utc>,
}

impl Display for LinkInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "<b>Link</b>: {}", encode_text(&self.url))?;
        writeln!(f, "<b>ID</b>: <code>{}</code>", self.hidden_id)?;
        writeln!(f, "<b>Status</b>: {} {}", self.status.emoji(), self.status)?;
        write!(
            f,
            "<b>Votes</b>: 👍 {} / 👎 {}",
            self.votes_legit, self.votes_scam
        )
    }
}

/// A user's score before and after something happened to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScoreChange {
    pub before: Score,
    pub after: Score,
}

impl ScoreChange {
    #[must_use]
    pub fn points_gained(&self) -> i64 {
        self.after.points - self.before.points
    }
    #[must_use]
    pub fn trust_gained(&self) -> i64 {
        self.after.trust - self.before.trust
    }
}

/// One line of a leaderboard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub id: UserId,
    pub username: String,
    pub score: Score,
}

/// Result of [`Database::ensure_user`].
///
/// [`Database::ensure_user`]: super::Database::ensure_user
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnsureUserResult {
    /// User was just created. If a valid referral code was given, the
    /// referrer and what the referral did to their score is included.
    Created {
        referred_by: Option<(UserId, ScoreChange)>,
    },
    /// User was already there.
    Existing,
}

/// Result of [`Database::add_link`].
///
/// [`Database::add_link`]: super::Database::add_link
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddLinkResult {
    Added {
        link: LinkInfo,
        change: Option<ScoreChange>,
    },
    AlreadyExists(LinkInfo),
}

/// Result of [`Database::report_link`].
///
/// [`Database::report_link`]: super::Database::report_link
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReportResult {
    Reported {
        /// The link after the report was applied.
        link: LinkInfo,
        /// True if the link wasn't known before this report.
        link_created: bool,
        change: Option<ScoreChange>,
    },
    /// The reporter submitted this link themselves.
    OwnLink,
    /// The reporter already has an unresolved report on this link.
    AlreadyReported,
}

/// Result of [`Database::add_comment`].
///
/// [`Database::add_comment`]: super::Database::add_comment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommentResult {
    Added { change: Option<ScoreChange> },
    /// User has left the maximum amount of comments on this link.
    LimitReached,
}

/// Result of [`Database::claim_daily`].
///
/// [`Database::claim_daily`]: super::Database::claim_daily
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DailyResult {
    Claimed { change: ScoreChange },
    AlreadyClaimed,
    /// User isn't in the database.
    UnknownUser,
}

/// Result of [`Database::vote`].
///
/// [`Database::vote`]: super::Database::vote
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VoteResult {
    Voted {
        /// The link with the new tallies.
        link: LinkInfo,
        /// True if this vote pushed the link into review.
        escalated: bool,
    },
    OwnLink,
}

/// Result of [`Database::moderate_link`].
///
/// [`Database::moderate_link`]: super::Database::moderate_link
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModerationResult {
    /// The link in its new status.
    pub link: LinkInfo,
    pub submitter: Option<(UserId, ScoreChange)>,
    /// One entry per resolved report.
    pub reporters: Vec<(UserId, ScoreChange)>,
}
