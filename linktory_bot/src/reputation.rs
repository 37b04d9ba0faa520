use std::{fmt::Display, str::FromStr};

/// Lowest possible trust score.
pub const MIN_TRUST: i64 = 0;
/// Highest possible trust score.
pub const MAX_TRUST: i64 = 200;
/// Trust score every user starts out with.
pub const INITIAL_TRUST: i64 = 100;

/// Something a user did that may be worth points or trust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Submitted a new link.
    AddLink,
    /// Reported a link as bad.
    ReportLink,
    /// Commented on a link.
    CommentLink,
    /// Claimed the daily bonus.
    DailyBonus,
    /// Brought in a new user with their referral code.
    Referral,
    /// A link they submitted was verified as legit by a moderator.
    ApprovedLink,
    /// A link they reported was confirmed as a scam by a moderator.
    ValidReport,
    /// A link they reported was verified as legit by a moderator.
    FalseReport,
    /// A link they submitted was confirmed as a scam by a moderator.
    SpamLink,
    /// A moderator caught them gaming the system.
    Cheat,
}

impl Action {
    pub const ALL: [Action; 10] = [
        Action::AddLink,
        Action::ReportLink,
        Action::CommentLink,
        Action::DailyBonus,
        Action::Referral,
        Action::ApprovedLink,
        Action::ValidReport,
        Action::FalseReport,
        Action::SpamLink,
        Action::Cheat,
    ];

    /// The tag this action is known by, like `add_link`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Action::AddLink => "add_link",
            Action::ReportLink => "report_link",
            Action::CommentLink => "comment_link",
            Action::DailyBonus => "daily_bonus",
            Action::Referral => "referral",
            Action::ApprovedLink => "approved_link",
            Action::ValidReport => "valid_report",
            Action::FalseReport => "false_report",
            Action::SpamLink => "spam_link",
            Action::Cheat => "cheat",
        }
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An action tag that doesn't name any [`Action`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown action: {0:?}")]
pub struct UnknownAction(pub String);

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| UnknownAction(s.to_string()))
    }
}

/// Points awarded for doing this action.
#[must_use]
pub fn points_for(action: Action) -> i64 {
    match action {
        Action::AddLink => 2,
        Action::ReportLink => 3,
        Action::CommentLink => 1,
        Action::DailyBonus => 1,
        Action::Referral => 5,
        Action::ApprovedLink
        | Action::ValidReport
        | Action::FalseReport
        | Action::SpamLink
        | Action::Cheat => 0,
    }
}

/// Trust gained (or lost, if negative) as a result of this action.
#[must_use]
pub fn trust_delta(action: Action) -> i64 {
    match action {
        Action::ApprovedLink => 2,
        Action::ValidReport => 5,
        Action::FalseReport => -10,
        Action::SpamLink => -20,
        Action::Cheat => -50,
        Action::AddLink
        | Action::ReportLink
        | Action::CommentLink
        | Action::DailyBonus
        | Action::Referral => 0,
    }
}

/// Like [`points_for`], but for an action tag.
pub fn points_for_tag(tag: &str) -> Result<i64, UnknownAction> {
    tag.parse().map(points_for)
}

/// Like [`trust_delta`], but for an action tag.
pub fn trust_delta_for_tag(tag: &str) -> Result<i64, UnknownAction> {
    tag.parse().map(trust_delta)
}

/// Apply a trust delta, clamping the result to the valid trust range.
#[must_use]
pub fn apply_trust(current: i64, delta: i64) -> i64 {
    current.saturating_add(delta).clamp(MIN_TRUST, MAX_TRUST)
}

/// Display tier derived from a user's trust and points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Badge {
    Elite,
    Gold,
    Silver,
    Bronze,
    LowCredibility,
    Newbie,
}

impl Badge {
    /// Plain name of the badge.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Badge::Elite => "Elite",
            Badge::Gold => "Gold",
            Badge::Silver => "Silver",
            Badge::Bronze => "Bronze",
            Badge::LowCredibility => "Low Credibility",
            Badge::Newbie => "Newbie",
        }
    }

    #[must_use]
    pub fn emoji(self) -> &'static str {
        match self {
            Badge::Elite => "👑",
            Badge::Gold => "🥇",
            Badge::Silver => "🥈",
            Badge::Bronze => "🥉",
            Badge::LowCredibility => "⚠️",
            Badge::Newbie => "🌱",
        }
    }
}

impl Display for Badge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.emoji(), self.label())
    }
}

/// Badge for a user with this trust and points.
///
/// First match wins. Trust in `[50, 80)` with under 1000 points lands on
/// [`Badge::Newbie`], not [`Badge::LowCredibility`]. Keep it that way until
/// someone decides otherwise.
#[must_use]
pub fn badge_for(trust: i64, points: i64) -> Badge {
    if trust >= 150 && points >= 1000 {
        Badge::Elite
    } else if trust >= 120 {
        Badge::Gold
    } else if trust >= 100 {
        Badge::Silver
    } else if trust >= 80 {
        Badge::Bronze
    } else if trust < 50 {
        Badge::LowCredibility
    } else {
        Badge::Newbie
    }
}

/// A user's points and trust, as one value to push actions through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Score {
    pub points: i64,
    pub trust: i64,
}

impl Score {
    /// Score of a brand new user.
    pub const INITIAL: Score = Score {
        points: 0,
        trust: INITIAL_TRUST,
    };

    /// Score after this action is done.
    #[must_use]
    pub fn apply(self, action: Action) -> Score {
        Score {
            points: self.points.saturating_add(points_for(action)).max(0),
            trust: apply_trust(self.trust, trust_delta(action)),
        }
    }

    #[must_use]
    pub fn badge(self) -> Badge {
        badge_for(self.trust, self.points)
    }
}
