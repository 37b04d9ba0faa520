use std::{fmt::Write, future::Future, pin::Pin};

use chrono::Utc;
use html_escape::encode_text;
use linktory_commons::teloxide_retry;
use teloxide::{
    payloads::SendMessageSetters,
    requests::Requester,
    sugar::request::{RequestLinkPreviewExt, RequestReplyExt},
    types::{BotCommand, Me, Message, ParseMode, User, UserId},
    Bot, RequestError,
};

use super::BotError;
use crate::{
    actions::{
        authenticate_moderator, describe_score_change, edit_message_into_a_review_keyboard,
        main_menu_keyboard, notify_about_moderation, notify_score_change, render_dashboard,
        render_leaderboard, render_link_check, render_profile, LeaderboardKind, MAIN_MENU_TEXT,
    },
    config::Config,
    database::{
        AddLinkResult, CommentResult, DailyResult, Database, EnsureUserResult, LinkInfo,
        ReportResult, ScoreChange, VoteResult, MAX_COMMENTS_PER_LINK,
    },
    misc::{
        is_hidden_id, parse_link, split_first_word, split_link_and_reason, user_name_prettyprint,
    },
    pending::{PendingInputs, PendingKind},
    types::Verdict,
};

pub const COMMANDS: &[Command] = &[
    START,
    MENU,
    HELP,
    ADD,
    CHECK,
    SEARCH,
    REPORT,
    COMMENT,
    VOTE,
    DAILY,
    TOP,
    TRUSTBOARD,
    ME,
    DASHBOARD,
    CANCEL,
    REVIEW,
    VERIFY,
    PENALIZE,
];

/// How many entries leaderboards and search results show.
const LIST_LIMIT: i64 = 10;

pub type Ret = Result<(), BotError>;
pub type CommandFuture<'a> = Pin<Box<dyn Future<Output = Ret> + Send + 'a>>;

/// Everything a command needs to do its thing.
pub struct CommandParams<'a> {
    pub bot: &'a Bot,
    pub me: &'a Me,
    /// Message to reply to. For menu buttons this is the bot's own message.
    pub message: &'a Message,
    /// Who is asking. Not always the sender of `message`.
    pub user: &'a User,
    /// Text after the command, or the whole message for prompted input.
    pub params: &'a str,
    pub database: &'a Database,
    pub pending: &'a PendingInputs,
    pub config: &'a Config,
}

impl CommandParams<'_> {
    async fn reply(&self, text: impl Into<String> + Send) -> Result<Message, RequestError> {
        self.bot
            .send_message(self.message.chat.id, text)
            .reply_to(self.message.id)
            .parse_mode(ParseMode::Html)
            .disable_link_preview(true)
            .await
    }
}

pub struct Command {
    pub callname: &'static str,
    pub description: &'static str,
    pub function: fn(CommandParams) -> CommandFuture,
    hidden: bool,
}

impl Command {
    /// True if `command` (without the `/`) is this command's name.
    pub fn is_matching_callname(&self, command: &str) -> bool {
        self.callname
            .split_ascii_whitespace()
            .next()
            .map(|x| x.trim_start_matches('/'))
            .is_some_and(|x| x.eq_ignore_ascii_case(command))
    }

    pub fn get_help(&self, mut output: impl std::fmt::Write) -> Result<(), std::fmt::Error> {
        output.write_str(self.callname)?;
        if !self.description.is_empty() {
            output.write_str(" - ")?;
            output.write_str(self.description)?;
        }

        Ok(())
    }
}

pub fn generate_help() -> String {
    let mut response = String::from("HELP:\n\n");
    for command in COMMANDS {
        if command.hidden {
            continue;
        }
        // Writing to a String never fails.
        let _ = command.get_help(&mut response);
        response += "\n";
    }
    response.pop();
    response
}

pub fn generate_bot_commands() -> Vec<BotCommand> {
    let mut output = Vec::new();

    for command in COMMANDS {
        if command.hidden {
            continue;
        }
        let Some(callname) = command.callname.split_ascii_whitespace().next() else {
            continue;
        };

        // Cut off the /
        let callname = callname[1..].trim().to_string();
        let description = command
            .description
            .replace("&lt;", "<")
            .replace("&gt;", ">");

        output.push(BotCommand {
            command: callname,
            description,
        });
    }

    output
}

/// Find a link by its short ID, or by its URL.
async fn resolve_link(database: &Database, text: &str) -> Result<Option<LinkInfo>, BotError> {
    if is_hidden_id(text) {
        if let Some(link) = database.find_link_by_hidden_id(text).await? {
            return Ok(Some(link));
        }
    }

    match parse_link(text) {
        Ok(url) => Ok(database.find_link_by_url(&url).await?),
        Err(_) => Ok(None),
    }
}

fn points_note(change: Option<&ScoreChange>) -> String {
    match change.map(describe_score_change) {
        Some(description) if !description.is_empty() => format!("\n\n🎉 {description}"),
        _ => String::new(),
    }
}

///////////////////////////////////////
/////////////////COMMAND DEFINITIONS
///////////////////////////////////////

/// Wraps the function's return value in a pinning closure.
macro_rules! wrap {
    ($thing:expr) => {
        |cp| Box::pin($thing(cp))
    };
}

/// Reply with this text and stop.
macro_rules! goodbye {
    ($cp:expr, $text:expr) => {{
        $cp.reply($text).await?;
        return Ok(());
    }};
}

/// Stop unless the user is a moderator.
macro_rules! moderators_only {
    ($cp:expr) => {
        if !authenticate_moderator($cp.bot, $cp.user, $cp.message.chat.id, $cp.config).await? {
            goodbye!($cp, "This command is for moderators only.");
        }
    };
}

pub const START: Command = Command {
    callname: "/start",
    description: "",
    function: wrap!(start),
    hidden: true,
};
async fn start(cp: CommandParams<'_>) -> Ret {
    let code = cp.params.split_whitespace().next();
    let name = user_name_prettyprint(cp.user, false);

    let result = cp.database.ensure_user(cp.user.id, &name, code).await?;

    let mut text = String::from(MAIN_MENU_TEXT);

    if let EnsureUserResult::Created { referred_by } = result {
        text.insert_str(0, "👋 Welcome aboard!\n\n");

        if let Some((referrer, change)) = referred_by {
            text.push_str("\n\nYou were invited by a friend. Thanks for joining!");
            let reason = format!(
                "{} joined Linktory with your referral code!",
                encode_text(&name)
            );
            notify_score_change(cp.bot, referrer, &change, &reason).await;
        }
    }

    cp.bot
        .send_message(cp.message.chat.id, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(main_menu_keyboard())
        .await?;

    Ok(())
}

pub const MENU: Command = Command {
    callname: "/menu",
    description: "show the main menu.",
    function: wrap!(menu),
    hidden: false,
};
async fn menu(cp: CommandParams<'_>) -> Ret {
    cp.pending.cancel(cp.user.id).await;
    cp.bot
        .send_message(cp.message.chat.id, MAIN_MENU_TEXT)
        .parse_mode(ParseMode::Html)
        .reply_markup(main_menu_keyboard())
        .await?;
    Ok(())
}

pub const HELP: Command = Command {
    callname: "/help",
    description: "show this help.",
    function: wrap!(help),
    hidden: false,
};
async fn help(cp: CommandParams<'_>) -> Ret {
    goodbye!(cp, generate_help());
}

pub const ADD: Command = Command {
    callname: "/add &lt;link&gt;",
    description: "add a link to Linktory.",
    function: wrap!(add),
    hidden: false,
};
async fn add(cp: CommandParams<'_>) -> Ret {
    if cp.params.trim().is_empty() {
        cp.pending.begin(cp.user.id, PendingKind::AddLink).await;
        goodbye!(cp, PendingKind::AddLink.prompt());
    }
    add_link_from_params(&cp).await
}

pub(super) async fn add_link_from_params(cp: &CommandParams<'_>) -> Ret {
    let url = match parse_link(cp.params) {
        Ok(url) => url,
        Err(e) => goodbye!(cp, format!("Can't add that: {e}.")),
    };

    match cp.database.add_link(&url, cp.user.id).await? {
        AddLinkResult::Added { link, change } => {
            log::info!("{} added link {}", cp.user.id, link.url);
            goodbye!(
                cp,
                format!(
                    "✅ Link added! Moderators will take a look at it.\n\n{link}{}",
                    points_note(change.as_ref())
                )
            );
        }
        AddLinkResult::AlreadyExists(link) => {
            goodbye!(
                cp,
                format!(
                    "This link is already in Linktory.\n\n{}",
                    render_link_check(&link)
                )
            );
        }
    }
}

pub const CHECK: Command = Command {
    callname: "/check &lt;link&gt;",
    description: "see what's known about a link.",
    function: wrap!(check),
    hidden: false,
};
async fn check(cp: CommandParams<'_>) -> Ret {
    if cp.params.trim().is_empty() {
        cp.pending.begin(cp.user.id, PendingKind::CheckLink).await;
        goodbye!(cp, PendingKind::CheckLink.prompt());
    }
    check_link_from_params(&cp).await
}

pub(super) async fn check_link_from_params(cp: &CommandParams<'_>) -> Ret {
    let url = match parse_link(cp.params) {
        Ok(url) => url,
        Err(e) => goodbye!(cp, format!("Can't check that: {e}.")),
    };

    match cp.database.find_link_by_url(&url).await? {
        Some(link) => goodbye!(cp, render_link_check(&link)),
        None => goodbye!(
            cp,
            format!(
                concat!(
                    "🤷 Nobody has added {} yet.\n\n",
                    "If you trust it, /add it. If it's a scam, /report it."
                ),
                encode_text(url.as_str())
            )
        ),
    }
}

pub const SEARCH: Command = Command {
    callname: "/search &lt;keyword&gt;",
    description: "find links containing a keyword.",
    function: wrap!(search),
    hidden: false,
};
async fn search(cp: CommandParams<'_>) -> Ret {
    let keyword = cp.params.trim();
    if keyword.is_empty() {
        goodbye!(cp, "Usage: <code>/search keyword</code>");
    }

    let links = cp.database.search_links(keyword, LIST_LIMIT).await?;
    if links.is_empty() {
        goodbye!(cp, "🔍 Nothing found.");
    }

    let mut text = format!("🔍 <b>Results for</b> <i>{}</i>:\n", encode_text(keyword));
    for link in links {
        let _ = write!(
            text,
            "\n{} <code>{}</code> {}",
            link.status.emoji(),
            link.hidden_id,
            encode_text(&link.url)
        );
    }
    goodbye!(cp, text);
}

pub const REPORT: Command = Command {
    callname: "/report &lt;link&gt; | &lt;reason&gt;",
    description: "report a link as a scam.",
    function: wrap!(report),
    hidden: false,
};
async fn report(cp: CommandParams<'_>) -> Ret {
    if cp.params.trim().is_empty() {
        cp.pending.begin(cp.user.id, PendingKind::ReportLink).await;
        goodbye!(cp, PendingKind::ReportLink.prompt());
    }
    report_link_from_params(&cp).await
}

pub(super) async fn report_link_from_params(cp: &CommandParams<'_>) -> Ret {
    let (link, reason) = split_link_and_reason(cp.params);
    let url = match parse_link(link) {
        Ok(url) => url,
        Err(e) => goodbye!(cp, format!("Can't report that: {e}.")),
    };

    match cp.database.report_link(&url, cp.user.id, reason).await? {
        ReportResult::Reported {
            link,
            link_created,
            change,
        } => {
            log::info!("{} reported link {}: {reason:?}", cp.user.id, link.url);
            let note = match link_created {
                true => "\nThis link wasn't in Linktory before, so it's been added.",
                false => "",
            };
            goodbye!(
                cp,
                format!(
                    "🚨 Thanks for the report! Moderators will look into it.{note}\n\n{link}{}",
                    points_note(change.as_ref())
                )
            );
        }
        ReportResult::OwnLink => goodbye!(cp, "You can't report a link you added yourself."),
        ReportResult::AlreadyReported => {
            goodbye!(cp, "You already reported this link. Moderators are on it.")
        }
    }
}

pub const COMMENT: Command = Command {
    callname: "/comment &lt;link or ID&gt; &lt;text&gt;",
    description: "leave a comment on a link.",
    function: wrap!(comment),
    hidden: false,
};
async fn comment(cp: CommandParams<'_>) -> Ret {
    let (target, text) = split_first_word(cp.params);
    if target.is_empty() || text.is_empty() {
        goodbye!(cp, "Usage: <code>/comment link-or-ID your comment</code>");
    }

    let Some(link) = resolve_link(cp.database, target).await? else {
        goodbye!(cp, "No such link in Linktory.");
    };

    match cp.database.add_comment(link.id, cp.user.id, text).await? {
        CommentResult::Added { change } => {
            goodbye!(cp, format!("💬 Comment added.{}", points_note(change.as_ref())));
        }
        CommentResult::LimitReached => goodbye!(
            cp,
            format!("You can only leave {MAX_COMMENTS_PER_LINK} comments per link.")
        ),
    }
}

pub const VOTE: Command = Command {
    callname: "/vote &lt;link or ID&gt; legit|scam",
    description: "say whether you think a link is legit or a scam.",
    function: wrap!(vote),
    hidden: false,
};
async fn vote(cp: CommandParams<'_>) -> Ret {
    let (target, verdict) = split_first_word(cp.params);
    let Ok(verdict) = verdict.parse::<Verdict>() else {
        goodbye!(
            cp,
            concat!(
                "Usage: <code>/vote link-or-ID legit</code> ",
                "or <code>/vote link-or-ID scam</code>"
            )
        );
    };

    let Some(link) = resolve_link(cp.database, target).await? else {
        goodbye!(cp, "No such link in Linktory.");
    };

    let (link, escalated) = match cp.database.vote(link.id, cp.user.id, verdict).await? {
        VoteResult::Voted { link, escalated } => (link, escalated),
        VoteResult::OwnLink => goodbye!(cp, "You can't vote on a link you added yourself."),
    };

    if escalated {
        if let Some(moderator_chat) = cp.config.moderator_chat {
            // No biggie if this fails, it's in the review queue either way.
            let _ = teloxide_retry!(
                cp.bot
                    .send_message(
                        moderator_chat,
                        format!("Votes pushed a link under review:\n\n{link}")
                    )
                    .parse_mode(ParseMode::Html)
                    .disable_link_preview(true)
                    .await
            );
        }
    }

    goodbye!(cp, format!("🗳 Vote counted as <b>{verdict}</b>.\n\n{link}"));
}

pub const DAILY: Command = Command {
    callname: "/daily",
    description: "claim your daily bonus.",
    function: wrap!(daily),
    hidden: false,
};
async fn daily(cp: CommandParams<'_>) -> Ret {
    let text = daily_text(&cp).await?;
    goodbye!(cp, text);
}

pub(super) async fn daily_text(cp: &CommandParams<'_>) -> Result<String, BotError> {
    let today = Utc::now().date_naive();
    Ok(match cp.database.claim_daily(cp.user.id, today).await? {
        DailyResult::Claimed { change } => format!(
            "🎁 Daily bonus claimed!{}",
            points_note(Some(&change))
        ),
        DailyResult::AlreadyClaimed => {
            String::from("You already claimed today's bonus. Come back tomorrow!")
        }
        DailyResult::UnknownUser => String::from("Send /start first."),
    })
}

pub const TOP: Command = Command {
    callname: "/top",
    description: "show who has the most points.",
    function: wrap!(top),
    hidden: false,
};
async fn top(cp: CommandParams<'_>) -> Ret {
    let text = leaderboard_text(&cp).await?;
    goodbye!(cp, text);
}

pub(super) async fn leaderboard_text(cp: &CommandParams<'_>) -> Result<String, BotError> {
    let entries = cp.database.top_by_points(LIST_LIMIT).await?;
    Ok(render_leaderboard(LeaderboardKind::Points, &entries))
}

pub const TRUSTBOARD: Command = Command {
    callname: "/trustboard",
    description: "show who is trusted the most.",
    function: wrap!(trustboard),
    hidden: false,
};
async fn trustboard(cp: CommandParams<'_>) -> Ret {
    let text = trustboard_text(&cp).await?;
    goodbye!(cp, text);
}

pub(super) async fn trustboard_text(cp: &CommandParams<'_>) -> Result<String, BotError> {
    let entries = cp.database.top_by_trust(LIST_LIMIT).await?;
    Ok(render_leaderboard(LeaderboardKind::Trust, &entries))
}

pub const ME: Command = Command {
    callname: "/me",
    description: "show your points, trust and badge.",
    function: wrap!(me),
    hidden: false,
};
async fn me(cp: CommandParams<'_>) -> Ret {
    match cp.database.get_user(cp.user.id).await? {
        Some(user) => goodbye!(cp, render_profile(&user)),
        None => goodbye!(cp, "Send /start first."),
    }
}

pub const DASHBOARD: Command = Command {
    callname: "/dashboard",
    description: "show your profile, activity and referral code.",
    function: wrap!(dashboard),
    hidden: false,
};
async fn dashboard(cp: CommandParams<'_>) -> Ret {
    let text = dashboard_text(&cp).await?;
    goodbye!(cp, text);
}

pub(super) async fn dashboard_text(cp: &CommandParams<'_>) -> Result<String, BotError> {
    let Some(user) = cp.database.get_user(cp.user.id).await? else {
        return Ok(String::from("Send /start first."));
    };
    let stats = cp.database.get_user_stats(cp.user.id).await?;
    Ok(render_dashboard(&user, &stats, cp.me.username()))
}

pub const CANCEL: Command = Command {
    callname: "/cancel",
    description: "stop waiting for a link.",
    function: wrap!(cancel),
    hidden: false,
};
async fn cancel(cp: CommandParams<'_>) -> Ret {
    if cp.pending.cancel(cp.user.id).await {
        goodbye!(cp, "Cancelled.");
    } else {
        goodbye!(cp, "Nothing to cancel.");
    }
}

pub const REVIEW: Command = Command {
    callname: "/review",
    description: "moderators: review links.",
    function: wrap!(review),
    hidden: true,
};
async fn review(cp: CommandParams<'_>) -> Ret {
    moderators_only!(cp);

    let message = cp.reply("Loading review keyboard...").await?;

    edit_message_into_a_review_keyboard(cp.bot, cp.database, message.chat.id, message.id, 0)
        .await
}

pub const VERIFY: Command = Command {
    callname: "/verify &lt;link or ID&gt; legit|scam",
    description: "moderators: decide on a link.",
    function: wrap!(verify),
    hidden: true,
};
async fn verify(cp: CommandParams<'_>) -> Ret {
    moderators_only!(cp);

    let (target, verdict) = split_first_word(cp.params);
    let Ok(verdict) = verdict.parse::<Verdict>() else {
        goodbye!(
            cp,
            concat!(
                "Usage: <code>/verify link-or-ID legit</code> ",
                "or <code>/verify link-or-ID scam</code>"
            )
        );
    };

    let Some(link) = resolve_link(cp.database, target).await? else {
        goodbye!(cp, "No such link in Linktory.");
    };

    match cp.database.moderate_link(link.id, verdict).await? {
        Ok(result) => {
            log::info!(
                "{} marked link {} as {verdict}",
                cp.user.id,
                result.link.hidden_id
            );
            notify_about_moderation(cp.bot, &result).await;
            goodbye!(
                cp,
                format!(
                    "Done. {} report(s) resolved.\n\n{}",
                    result.reporters.len(),
                    result.link
                )
            );
        }
        Err(e) => goodbye!(cp, format!("Can't do that: {e}.")),
    }
}

pub const PENALIZE: Command = Command {
    callname: "/penalize &lt;user ID&gt;",
    description: "moderators: punish someone for gaming the system.",
    function: wrap!(penalize),
    hidden: true,
};
async fn penalize(cp: CommandParams<'_>) -> Ret {
    moderators_only!(cp);

    let Ok(target) = cp.params.trim().parse::<u64>().map(UserId) else {
        goodbye!(cp, "Usage: <code>/penalize 123456789</code>");
    };

    let Some(change) = cp.database.penalize(target).await? else {
        goodbye!(cp, "No such user.");
    };

    log::info!("{} penalized user {target}", cp.user.id);

    notify_score_change(
        cp.bot,
        target,
        &change,
        "⚠️ A moderator caught you gaming the system.",
    )
    .await;

    goodbye!(
        cp,
        format!(
            "Penalized. They're now at {} points and {} trust.",
            change.after.points, change.after.trust
        )
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callnames_match() {
        assert!(ADD.is_matching_callname("add"));
        assert!(ADD.is_matching_callname("ADD"));
        assert!(!ADD.is_matching_callname("add_link"));
        assert!(REPORT.is_matching_callname("report"));
    }

    #[test]
    fn no_duplicate_commands() {
        for (i, a) in COMMANDS.iter().enumerate() {
            for b in &COMMANDS[i + 1..] {
                assert_ne!(a.callname, b.callname);
            }
        }
    }

    #[test]
    fn bot_commands_are_valid() {
        let commands = generate_bot_commands();
        assert!(!commands.is_empty());
        for command in commands {
            // https://core.telegram.org/bots/api#botcommand
            assert!(!command.command.is_empty() && command.command.len() <= 32);
            assert!(command
                .command
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
            assert!(!command.description.is_empty() && command.description.len() <= 256);
            assert!(!command.description.contains("&lt;"));
        }
    }

    #[test]
    fn help_skips_hidden_commands() {
        let help = generate_help();
        assert!(help.contains("/add &lt;link&gt; - add a link to Linktory."));
        assert!(help.contains("/trustboard"));
        assert!(!help.contains("/start"));
        assert!(!help.contains("/penalize"));
    }
}
