use std::fmt::Write;

use html_escape::encode_text;
use linktory_commons::{is_member_of, teloxide_retry};
use teloxide::{
    payloads::{EditMessageTextSetters, SendMessageSetters},
    prelude::Requester,
    sugar::request::RequestLinkPreviewExt,
    types::{ChatId, InlineKeyboardButton, InlineKeyboardMarkup, MessageId, ParseMode, User, UserId},
    ApiError, Bot, RequestError,
};

use crate::{
    config::Config,
    database::{
        Database, LeaderboardEntry, LinkInfo, ModerationResult, ScoreChange, UserRecord,
        UserStats,
    },
    misc::user_name_prettyprint,
    types::{CallbackData, LinkStatus, MenuButton, ReviewAction, Verdict},
};

/// How long to stall someone who isn't a moderator but asked in `chat`.
///
/// Updates from one chat are handled one at a time. In a DM that only holds
/// up this user, but in a group it would hold up everyone.
fn outsider_delay(chat: ChatId) -> Option<std::time::Duration> {
    chat.is_user().then(|| std::time::Duration::from_secs(5))
}

/// Check if this user is in the moderator chat and can do reviews, and
/// delay their requests if appropriate.
pub async fn authenticate_moderator(
    bot: &Bot,
    user: &User,
    chat: ChatId,
    config: &Config,
) -> Result<bool, RequestError> {
    let Some(moderator_chat) = config.moderator_chat else {
        return Ok(false);
    };

    let moderator = is_member_of(bot, user.id, moderator_chat).await?;
    if !moderator {
        let username = user_name_prettyprint(user, true);
        log::info!("Unauthorized user trying to moderate: {username}");

        if let Some(delay) = outsider_delay(chat) {
            tokio::time::sleep(delay).await;
        }
    }
    Ok(moderator)
}

/// Short human description of what happened to a score, like `+2 points, -10 trust`.
/// Empty if nothing changed.
#[must_use]
pub fn describe_score_change(change: &ScoreChange) -> String {
    let mut parts = Vec::new();
    let points = change.points_gained();
    if points != 0 {
        parts.push(format!("{points:+} points"));
    }
    let trust = change.trust_gained();
    if trust != 0 {
        parts.push(format!("{trust:+} trust"));
    }
    parts.join(", ")
}

/// Let a user know their score changed because of `reason`. Failing to reach
/// them is not an error; they may have blocked the bot.
pub async fn notify_score_change(bot: &Bot, user: UserId, change: &ScoreChange, reason: &str) {
    let description = describe_score_change(change);
    if description.is_empty() {
        return;
    }

    let text = format!(
        "{reason}\n<b>{description}</b>\nYou're now at {} points and {} trust.",
        change.after.points, change.after.trust
    );

    if let Err(e) = teloxide_retry!(
        bot.send_message(ChatId::from(user), &text)
            .parse_mode(ParseMode::Html)
            .await
    ) {
        log::debug!("Couldn't notify {user} of a score change: {e}");
    }
}

fn menu_row(buttons: &[MenuButton]) -> Vec<InlineKeyboardButton> {
    buttons
        .iter()
        .map(|button| {
            InlineKeyboardButton::callback(button.label(), CallbackData::Menu(*button).to_data())
        })
        .collect()
}

#[must_use]
pub fn main_menu_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new([
        menu_row(&[MenuButton::Add, MenuButton::Check]),
        menu_row(&[MenuButton::Report, MenuButton::Daily]),
        menu_row(&[MenuButton::Leaderboard, MenuButton::Trustboard]),
        menu_row(&[MenuButton::Dashboard]),
    ])
}

#[must_use]
pub fn back_to_menu_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new([menu_row(&[MenuButton::Back])])
}

pub const MAIN_MENU_TEXT: &str = concat!(
    "🔗 <b>Linktory</b>\n\n",
    "Check links before you click them, report scams, ",
    "and earn points and trust for keeping everyone safe.\n\n",
    "Pick something below, or send /help for all commands."
);

#[must_use]
pub fn render_profile(user: &UserRecord) -> String {
    format!(
        concat!(
            "👤 <b>{}</b>\n",
            "<b>Badge</b>: {}\n",
            "<b>Points</b>: {}\n",
            "<b>Trust</b>: {}/200"
        ),
        encode_text(&user.username),
        user.badge(),
        user.score.points,
        user.score.trust
    )
}

#[must_use]
pub fn render_dashboard(user: &UserRecord, stats: &UserStats, bot_username: &str) -> String {
    let mut text = render_profile(user);
    // Writing to a String never fails.
    let _ = write!(
        text,
        concat!(
            "\n\n📊 <b>Activity</b>\n",
            "<b>Links added</b>: {}\n",
            "<b>Reports made</b>: {}\n",
            "<b>Friends invited</b>: {}\n\n",
            "🎟 <b>Your referral code</b>: <code>{}</code>\n",
            "Invite link: https://t.me/{}?start={}"
        ),
        stats.links_added,
        stats.reports_made,
        stats.friends_invited,
        user.referral_code,
        bot_username,
        user.referral_code,
    );
    text
}

/// Which number a leaderboard is sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderboardKind {
    Points,
    Trust,
}

#[must_use]
pub fn render_leaderboard(kind: LeaderboardKind, entries: &[LeaderboardEntry]) -> String {
    let mut text = String::from(match kind {
        LeaderboardKind::Points => "🏆 <b>Top contributors</b>\n",
        LeaderboardKind::Trust => "🛡 <b>Most trusted</b>\n",
    });

    if entries.is_empty() {
        text.push_str("\nNobody here yet. Be the first!");
        return text;
    }

    for (place, entry) in entries.iter().enumerate() {
        let medal = match place {
            0 => "🥇",
            1 => "🥈",
            2 => "🥉",
            _ => "▫️",
        };
        let value = match kind {
            LeaderboardKind::Points => format!("{} points", entry.score.points),
            LeaderboardKind::Trust => format!("{} trust", entry.score.trust),
        };
        let _ = write!(
            text,
            "\n{medal} {}. {} ({}) {value}",
            place + 1,
            encode_text(&entry.username),
            entry.score.badge().emoji(),
        );
    }

    text
}

/// Text describing a link and what to make of it, for `/check` and friends.
#[must_use]
pub fn render_link_check(link: &LinkInfo) -> String {
    let verdict = match link.status {
        LinkStatus::Verified => "Moderators checked this link and found it legit.",
        LinkStatus::Scam => "⛔️ Moderators confirmed this link is a <b>scam</b>. Don't open it!",
        LinkStatus::Reported => "Someone reported this link. Be careful.",
        LinkStatus::UnderReview => "People disagree about this link. Moderators will take a look.",
        LinkStatus::Pending => "Nobody has checked this link yet.",
    };
    format!("{link}\n\n{verdict}")
}

fn review_text_and_keyboard(
    link: &LinkInfo,
    comments: &[(String, String)],
) -> (String, InlineKeyboardMarkup) {
    let mut text = format!("<b>REVIEW:</b>\n\n{link}");

    if !comments.is_empty() {
        text.push_str("\n\n<b>Latest comments</b>:");
        for (author, comment) in comments {
            let _ = write!(
                text,
                "\n<i>{}</i>: {}",
                encode_text(author),
                encode_text(comment)
            );
        }
    }

    text.push_str("\n\nWhat is this link?");

    let button = |label: &str, action: ReviewAction| {
        InlineKeyboardButton::callback(
            label,
            CallbackData::Review {
                link_id: link.id,
                action,
            }
            .to_data(),
        )
    };

    let keyboard = InlineKeyboardMarkup::new([
        vec![
            button("✅ Legit", ReviewAction::Verdict(Verdict::Legit)),
            button("🚫 Scam", ReviewAction::Verdict(Verdict::Scam)),
        ],
        vec![button("Skip", ReviewAction::Skip)],
    ]);

    (text, keyboard)
}

/// Fetch the next link to review after `after_id` and edit the message
/// specified by `chat_id` and `message_id` into a review keyboard for it.
pub async fn edit_message_into_a_review_keyboard(
    bot: &Bot,
    database: &Database,
    chat_id: ChatId,
    message_id: MessageId,
    after_id: i64,
) -> Result<(), crate::handlers::BotError> {
    let Some(link) = database.next_for_review(after_id).await? else {
        bot.edit_message_text(chat_id, message_id, "There are no more links to review.")
            .reply_markup(InlineKeyboardMarkup {
                inline_keyboard: Vec::new(),
            })
            .await?;
        return Ok(());
    };

    let comments = database.get_comments(link.id, 3).await?;
    let (text, keyboard) = review_text_and_keyboard(&link, &comments);

    let edit_result = bot
        .edit_message_text(chat_id, message_id, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(keyboard)
        .disable_link_preview(true)
        .await;

    // If we get this error, that means that the message was modified to the
    // exact same thing as it was before. That's the only link left.
    if let Err(RequestError::Api(ApiError::MessageNotModified)) = edit_result {
        return Ok(());
    }

    edit_result?;
    Ok(())
}

/// Let the submitter and reporters of a link know how a moderator's verdict
/// on it affected them.
pub async fn notify_about_moderation(bot: &Bot, result: &ModerationResult) {
    let url = encode_text(&result.link.url);
    let verdict = result.link.status;

    if let Some((submitter, change)) = &result.submitter {
        let reason = format!("A link you added was marked as <b>{verdict}</b>:\n{url}");
        notify_score_change(bot, *submitter, change, &reason).await;
    }

    for (reporter, change) in &result.reporters {
        let reason = format!("A link you reported was marked as <b>{verdict}</b>:\n{url}");
        notify_score_change(bot, *reporter, change, &reason).await;
    }
}

/// Launches an ever-running loop that reminds people in the moderator chat
/// every 24 hours about links awaiting review.
pub async fn remind_about_reviews_spinloop(
    bot: Bot,
    database: std::sync::Weak<Database>,
    moderator_chat: ChatId,
) {
    use tokio::time::{sleep, Duration};
    loop {
        let Some(database) = database.upgrade() else {
            // No more database!
            return;
        };

        let review_count = match database.review_count().await {
            Ok(r) => r,
            Err(e) => {
                log::error!("Database error! {e:?}");
                return;
            }
        };

        if review_count > 0 {
            // No biggie if this fails, honestly.
            let _ = teloxide_retry!(
                bot.send_message(
                    moderator_chat,
                    format!(
                        "There are {review_count} links awaiting review. DM this bot /review to review."
                    )
                )
                .await
            );
        }

        drop(database);
        sleep(Duration::from_secs(24 * 60 * 60)).await;
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::reputation::Score;

    fn user(trust: i64, points: i64) -> UserRecord {
        UserRecord {
            id: UserId(1),
            username: "<script>".to_string(),
            score: Score { points, trust },
            referral_code: "abc123".to_string(),
            referrer: None,
            last_daily: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn score_change_description() {
        let before = Score::INITIAL;
        let change = ScoreChange {
            before,
            after: Score {
                points: 2,
                trust: 90,
            },
        };
        assert_eq!(describe_score_change(&change), "+2 points, -10 trust");
        let nothing = ScoreChange {
            before,
            after: before,
        };
        assert_eq!(describe_score_change(&nothing), "");
    }

    #[test]
    fn profile_is_escaped_and_badged() {
        let text = render_profile(&user(160, 1200));
        assert!(text.contains("&lt;script&gt;"));
        assert!(text.contains("Elite"));
        assert!(text.contains("<b>Trust</b>: 160/200"));

        let text = render_dashboard(&user(100, 0), &UserStats::default(), "Linktory_Bot");
        assert!(text.contains("https://t.me/Linktory_Bot?start=abc123"));
    }

    #[test]
    fn leaderboards() {
        assert!(render_leaderboard(LeaderboardKind::Points, &[]).contains("Nobody here yet"));

        let entries = [
            LeaderboardEntry {
                id: UserId(1),
                username: "@alice".to_string(),
                score: Score {
                    points: 10,
                    trust: 120,
                },
            },
            LeaderboardEntry {
                id: UserId(2),
                username: "@bob".to_string(),
                score: Score {
                    points: 3,
                    trust: 40,
                },
            },
        ];
        let text = render_leaderboard(LeaderboardKind::Trust, &entries);
        assert!(text.contains("🥇 1. @alice (🥇) 120 trust"));
        assert!(text.contains("🥈 2. @bob (⚠️) 40 trust"));
    }

    #[test]
    fn main_menu_has_everything_but_back() {
        let keyboard = main_menu_keyboard();
        let buttons: Vec<_> = keyboard.inline_keyboard.iter().flatten().collect();
        assert_eq!(buttons.len(), 7);
    }

    #[test]
    fn outsiders_only_stalled_in_dms() {
        assert_eq!(
            outsider_delay(ChatId(123_456)),
            Some(std::time::Duration::from_secs(5))
        );
        assert_eq!(outsider_delay(ChatId(-4_000_123)), None);
        assert_eq!(outsider_delay(ChatId(-1_001_234_567_890)), None);
    }
}
