use std::{fmt::Display, str::FromStr};

/// Amount of agreeing votes needed to push a link under review.
pub const VOTES_FOR_REVIEW: i64 = 3;

/// Where a link is in its moderation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkStatus {
    /// Freshly submitted, nobody has looked at it yet.
    Pending = 0,
    /// A moderator decided it's legit.
    Verified = 1,
    /// Someone reported it.
    Reported = 2,
    /// A moderator decided it's a scam.
    Scam = 3,
    /// Enough votes or reports piled up that a moderator should take a look.
    UnderReview = 4,
}

impl LinkStatus {
    pub const ALL: [LinkStatus; 5] = [
        LinkStatus::Pending,
        LinkStatus::Verified,
        LinkStatus::Reported,
        LinkStatus::Scam,
        LinkStatus::UnderReview,
    ];

    /// Statuses a link with this status may move to.
    #[must_use]
    pub fn allowed_transitions(self) -> &'static [LinkStatus] {
        use LinkStatus::*;
        match self {
            Pending => &[Verified, Reported, Scam, UnderReview],
            Reported => &[Verified, Scam, UnderReview],
            UnderReview => &[Verified, Scam],
            Verified => &[Reported, UnderReview],
            Scam => &[UnderReview],
        }
    }

    #[must_use]
    pub fn can_transition_to(self, to: LinkStatus) -> bool {
        self.allowed_transitions().contains(&to)
    }

    /// Returns `to` if a link may move there from this status.
    pub fn transition(self, to: LinkStatus) -> Result<LinkStatus, InvalidTransition> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(InvalidTransition { from: self, to })
        }
    }

    /// True if a moderator still has to make a call on this link.
    #[must_use]
    pub fn awaits_moderation(self) -> bool {
        matches!(
            self,
            LinkStatus::Pending | LinkStatus::Reported | LinkStatus::UnderReview
        )
    }

    /// True if a link with this status and these vote tallies should be put
    /// under review. That's when a clear majority of at least
    /// [`VOTES_FOR_REVIEW`] disagrees with where the link currently stands.
    #[must_use]
    pub fn escalates_on_votes(self, votes_legit: i64, votes_scam: i64) -> bool {
        let disagreeing_majority = match self {
            LinkStatus::Pending | LinkStatus::Reported | LinkStatus::Verified => {
                votes_scam >= VOTES_FOR_REVIEW && votes_scam > votes_legit
            }
            LinkStatus::Scam => votes_legit >= VOTES_FOR_REVIEW && votes_legit > votes_scam,
            LinkStatus::UnderReview => false,
        };
        disagreeing_majority && self.can_transition_to(LinkStatus::UnderReview)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LinkStatus::Pending => "pending",
            LinkStatus::Verified => "verified",
            LinkStatus::Reported => "reported",
            LinkStatus::Scam => "scam",
            LinkStatus::UnderReview => "under_review",
        }
    }

    #[must_use]
    pub fn emoji(self) -> &'static str {
        match self {
            LinkStatus::Pending => "⏳",
            LinkStatus::Verified => "✅",
            LinkStatus::Reported => "⚠️",
            LinkStatus::Scam => "🚫",
            LinkStatus::UnderReview => "🔎",
        }
    }
}

impl TryFrom<i64> for LinkStatus {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        LinkStatus::ALL
            .into_iter()
            .find(|status| *status as i64 == value)
            .ok_or(value)
    }
}

impl From<LinkStatus> for i64 {
    fn from(value: LinkStatus) -> Self {
        value as i64
    }
}

impl Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A link status change that isn't in the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("a link can't go from {from} to {to}")]
pub struct InvalidTransition {
    pub from: LinkStatus,
    pub to: LinkStatus,
}

/// An opinion on a link, either from a user's vote or a moderator's review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Legit,
    Scam,
}

impl Verdict {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Legit => "legit",
            Verdict::Scam => "scam",
        }
    }

    /// Status a moderator's verdict puts the link into.
    #[must_use]
    pub fn resulting_status(self) -> LinkStatus {
        match self {
            Verdict::Legit => LinkStatus::Verified,
            Verdict::Scam => LinkStatus::Scam,
        }
    }
}

impl FromStr for Verdict {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "legit" | "safe" | "ok" | "good" => Ok(Verdict::Legit),
            "scam" | "spam" | "bad" => Ok(Verdict::Scam),
            _ => Err(()),
        }
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Buttons of the inline main menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MenuButton {
    Add,
    Check,
    Report,
    Leaderboard,
    Trustboard,
    Dashboard,
    Daily,
    Back,
}

impl MenuButton {
    pub const ALL: [MenuButton; 8] = [
        MenuButton::Add,
        MenuButton::Check,
        MenuButton::Report,
        MenuButton::Leaderboard,
        MenuButton::Trustboard,
        MenuButton::Dashboard,
        MenuButton::Daily,
        MenuButton::Back,
    ];

    fn as_str(self) -> &'static str {
        match self {
            MenuButton::Add => "add",
            MenuButton::Check => "check",
            MenuButton::Report => "report",
            MenuButton::Leaderboard => "top",
            MenuButton::Trustboard => "trust",
            MenuButton::Dashboard => "dashboard",
            MenuButton::Daily => "daily",
            MenuButton::Back => "back",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            MenuButton::Add => "➕ Add link",
            MenuButton::Check => "🔍 Check link",
            MenuButton::Report => "🚨 Report link",
            MenuButton::Leaderboard => "🏆 Leaderboard",
            MenuButton::Trustboard => "🛡 Trustboard",
            MenuButton::Dashboard => "📊 Dashboard",
            MenuButton::Daily => "🎁 Daily bonus",
            MenuButton::Back => "⬅️ Back to menu",
        }
    }
}

/// What a moderator pressed on a review keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReviewAction {
    Verdict(Verdict),
    Skip,
}

/// Data carried by inline keyboard buttons.
///
/// Telegram limits it to 64 bytes, so links are referred to by row ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackData {
    Menu(MenuButton),
    Review { link_id: i64, action: ReviewAction },
}

impl CallbackData {
    #[must_use]
    pub fn to_data(self) -> String {
        match self {
            CallbackData::Menu(button) => format!("MENU {}", button.as_str()),
            CallbackData::Review { link_id, action } => {
                let action = match action {
                    ReviewAction::Verdict(verdict) => verdict.as_str(),
                    ReviewAction::Skip => "skip",
                };
                format!("REVIEW {action} {link_id}")
            }
        }
    }
}

impl FromStr for CallbackData {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(' ');
        let data = match (parts.next(), parts.next(), parts.next()) {
            (Some("MENU"), Some(button), None) => CallbackData::Menu(
                MenuButton::ALL
                    .into_iter()
                    .find(|x| x.as_str() == button)
                    .ok_or(())?,
            ),
            (Some("REVIEW"), Some(action), Some(link_id)) => CallbackData::Review {
                link_id: link_id.parse().map_err(|_| ())?,
                action: match action {
                    "skip" => ReviewAction::Skip,
                    verdict => ReviewAction::Verdict(verdict.parse()?),
                },
            },
            _ => return Err(()),
        };

        if parts.next().is_some() {
            return Err(());
        }

        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_data() {
        assert_eq!(
            "MENU dashboard".parse(),
            Ok(CallbackData::Menu(MenuButton::Dashboard))
        );
        assert_eq!(
            "REVIEW scam 42".parse(),
            Ok(CallbackData::Review {
                link_id: 42,
                action: ReviewAction::Verdict(Verdict::Scam)
            })
        );
        assert_eq!(
            CallbackData::Review {
                link_id: 7,
                action: ReviewAction::Skip
            }
            .to_data(),
            "REVIEW skip 7"
        );
        for button in MenuButton::ALL {
            let data = CallbackData::Menu(button).to_data();
            assert!(data.len() <= 64);
            assert_eq!(data.parse(), Ok(CallbackData::Menu(button)));
        }

        assert_eq!("MENU nope".parse::<CallbackData>(), Err(()));
        assert_eq!("REVIEW maybe 1".parse::<CallbackData>(), Err(()));
        assert_eq!("REVIEW scam x".parse::<CallbackData>(), Err(()));
        assert_eq!("REVIEW scam 1 2".parse::<CallbackData>(), Err(()));
    }

    #[test]
    fn transition_table() {
        use LinkStatus::*;
        assert_eq!(Pending.transition(Verified), Ok(Verified));
        assert_eq!(Pending.transition(Scam), Ok(Scam));
        assert_eq!(Pending.transition(UnderReview), Ok(UnderReview));
        assert_eq!(Reported.transition(Scam), Ok(Scam));
        assert_eq!(Scam.transition(UnderReview), Ok(UnderReview));

        assert_eq!(
            Scam.transition(Verified),
            Err(InvalidTransition {
                from: Scam,
                to: Verified
            })
        );
        assert!(Verified.transition(Pending).is_err());
        assert!(UnderReview.transition(Reported).is_err());

        for status in LinkStatus::ALL {
            assert!(!status.can_transition_to(status), "{status} to itself");
            assert!(!status.can_transition_to(Pending), "{status} back to pending");
        }
    }

    #[test]
    fn vote_escalation() {
        use LinkStatus::*;
        assert!(!Pending.escalates_on_votes(0, 2));
        assert!(Pending.escalates_on_votes(0, 3));
        assert!(!Pending.escalates_on_votes(3, 3));
        assert!(Verified.escalates_on_votes(1, 4));
        assert!(!Scam.escalates_on_votes(0, 10));
        assert!(Scam.escalates_on_votes(3, 1));
        assert!(!UnderReview.escalates_on_votes(0, 10));
    }

    #[test]
    fn status_integer_repr() {
        for status in LinkStatus::ALL {
            assert_eq!(LinkStatus::try_from(i64::from(status)), Ok(status));
        }
        assert_eq!(LinkStatus::try_from(42), Err(42));
    }

    #[test]
    fn verdict_parsing() {
        assert_eq!("legit".parse(), Ok(Verdict::Legit));
        assert_eq!(" SCAM ".parse(), Ok(Verdict::Scam));
        assert_eq!("spam".parse(), Ok(Verdict::Scam));
        assert_eq!("maybe".parse::<Verdict>(), Err(()));
        assert_eq!(Verdict::Scam.resulting_status(), LinkStatus::Scam);
    }
}
