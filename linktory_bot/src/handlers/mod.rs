pub mod commands;

use std::sync::Arc;

use linktory_commons::MessageStuff;
use teloxide::{
    payloads::{AnswerCallbackQuerySetters, SendMessageSetters},
    requests::Requester,
    sugar::request::{RequestLinkPreviewExt, RequestReplyExt},
    types::{CallbackQuery, ChatId, Me, Message, ParseMode, User},
    Bot, RequestError,
};

pub use commands::generate_bot_commands;
use commands::{CommandParams, COMMANDS};

use crate::{
    actions::{
        authenticate_moderator, back_to_menu_keyboard, edit_message_into_a_review_keyboard,
        main_menu_keyboard, notify_about_moderation, MAIN_MENU_TEXT,
    },
    config::Config,
    database::{self, Database},
    misc::user_name_prettyprint,
    pending::{PendingInputs, PendingKind},
    types::{CallbackData, MenuButton, ReviewAction},
};

/// Anything that can go wrong while handling an update.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error(transparent)]
    Telegram(#[from] RequestError),
    #[error("database error: {0}")]
    Database(#[from] database::Error),
}

impl BotError {
    /// Deal with this error in the context of `chat`. Database errors are
    /// logged and apologized for, and Telegram errors are handed back to the
    /// dispatcher.
    pub async fn report(self, bot: &Bot, chat: ChatId) -> Result<(), RequestError> {
        match self {
            BotError::Telegram(e) => Err(e),
            BotError::Database(e) => {
                log::error!("Database error! {e:?}");
                bot.send_message(chat, "⚠️ Database error, try again later.")
                    .await?;
                Ok(())
            }
        }
    }
}

pub async fn handle_message(
    bot: Bot,
    me: Me,
    message: Message,
    database: Arc<Database>,
    pending: Arc<PendingInputs>,
    config: Arc<Config>,
) -> Result<(), RequestError> {
    let chat = message.chat.id;
    match handle_message_inner(&bot, &me, &message, &database, &pending, &config).await {
        Ok(()) => Ok(()),
        Err(e) => e.report(&bot, chat).await,
    }
}

async fn handle_message_inner(
    bot: &Bot,
    me: &Me,
    message: &Message,
    database: &Database,
    pending: &PendingInputs,
    config: &Config,
) -> Result<(), BotError> {
    // Only people get to talk to this bot.
    let Some(user) = &message.from else {
        return Ok(());
    };
    if user.is_bot {
        return Ok(());
    }

    let Some(text) = message.text_full() else {
        return Ok(());
    };

    let command = message.command(me.username());

    // /start does the registering itself, because it may carry a referral code.
    if command.is_none_or(|c| !c.name.eq_ignore_ascii_case("start")) {
        database
            .ensure_user(user.id, &user_name_prettyprint(user, false), None)
            .await?;
    }

    if let Some(command) = command {
        let Some(found) = COMMANDS
            .iter()
            .find(|x| x.is_matching_callname(command.name))
        else {
            // Not ours, or a typo. Either way, nothing to say.
            return Ok(());
        };

        log::debug!("{} used /{}", user.id, command.name);

        let params = CommandParams {
            bot,
            me,
            message,
            user,
            params: command.params,
            database,
            pending,
            config,
        };

        return (found.function)(params).await;
    }

    // Plain text only means something in private chats, as an answer to a prompt.
    if !message.chat.is_private() {
        return Ok(());
    }

    let Some(input) = pending.take(user.id).await else {
        bot.send_message(message.chat.id, "Not sure what you mean. Here's the menu:")
            .reply_to(message.id)
            .reply_markup(main_menu_keyboard())
            .await?;
        return Ok(());
    };

    let params = CommandParams {
        bot,
        me,
        message,
        user,
        params: text,
        database,
        pending,
        config,
    };

    match input.kind {
        PendingKind::AddLink => commands::add_link_from_params(&params).await,
        PendingKind::CheckLink => commands::check_link_from_params(&params).await,
        PendingKind::ReportLink => commands::report_link_from_params(&params).await,
    }
}

pub async fn handle_callback_query(
    bot: Bot,
    me: Me,
    query: CallbackQuery,
    database: Arc<Database>,
    pending: Arc<PendingInputs>,
    config: Arc<Config>,
) -> Result<(), RequestError> {
    let chat = ChatId::from(query.from.id);
    match handle_callback_query_inner(&bot, &me, &query, &database, &pending, &config).await {
        Ok(()) => Ok(()),
        Err(e) => e.report(&bot, chat).await,
    }
}

async fn handle_callback_query_inner(
    bot: &Bot,
    me: &Me,
    query: &CallbackQuery,
    database: &Database,
    pending: &PendingInputs,
    config: &Config,
) -> Result<(), BotError> {
    macro_rules! goodbye {
        ($text:expr) => {{
            bot.answer_callback_query(query.id.clone())
                .text($text)
                .await?;
            return Ok(());
        }};
        () => {{
            bot.answer_callback_query(query.id.clone()).await?;
            return Ok(());
        }};
    }

    let Some(data) = query.data.as_deref() else {
        goodbye!();
    };

    let Ok(data) = data.parse::<CallbackData>() else {
        log::warn!("Unknown callback data: {data:?}");
        goodbye!("This button is too old, sorry.");
    };

    // Buttons only ever show up on messages this bot sent.
    let Some(message) = query.regular_message() else {
        goodbye!("This button is too old, sorry.");
    };

    let user = &query.from;
    database
        .ensure_user(user.id, &user_name_prettyprint(user, false), None)
        .await?;

    match data {
        CallbackData::Menu(button) => {
            handle_menu_button(bot, me, user, message, button, database, pending, config).await?;
            goodbye!();
        }
        CallbackData::Review { link_id, action } => {
            if !authenticate_moderator(bot, user, message.chat.id, config).await? {
                goodbye!("Only moderators can review links.");
            }

            let verdict = match action {
                ReviewAction::Skip => {
                    edit_message_into_a_review_keyboard(
                        bot,
                        database,
                        message.chat.id,
                        message.id,
                        link_id,
                    )
                    .await?;
                    goodbye!();
                }
                ReviewAction::Verdict(verdict) => verdict,
            };

            match database.moderate_link(link_id, verdict).await? {
                Ok(result) => {
                    log::info!(
                        "{} marked link {} as {verdict}",
                        user_name_prettyprint(user, true),
                        result.link.hidden_id
                    );
                    notify_about_moderation(bot, &result).await;
                }
                Err(e) => {
                    // Someone else probably got to it first.
                    log::debug!("Review of link {link_id} didn't apply: {e}");
                }
            }

            edit_message_into_a_review_keyboard(
                bot,
                database,
                message.chat.id,
                message.id,
                link_id,
            )
            .await?;

            goodbye!(format!("Marked as {verdict}."));
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_menu_button(
    bot: &Bot,
    me: &Me,
    user: &User,
    message: &Message,
    button: MenuButton,
    database: &Database,
    pending: &PendingInputs,
    config: &Config,
) -> Result<(), BotError> {
    let kind = match button {
        MenuButton::Add => Some(PendingKind::AddLink),
        MenuButton::Check => Some(PendingKind::CheckLink),
        MenuButton::Report => Some(PendingKind::ReportLink),
        _ => None,
    };

    if let Some(kind) = kind {
        pending.begin(user.id, kind).await;
        bot.send_message(message.chat.id, kind.prompt())
            .parse_mode(ParseMode::Html)
            .reply_markup(back_to_menu_keyboard())
            .await?;
        return Ok(());
    }

    if button == MenuButton::Back {
        pending.cancel(user.id).await;
        bot.send_message(message.chat.id, MAIN_MENU_TEXT)
            .parse_mode(ParseMode::Html)
            .reply_markup(main_menu_keyboard())
            .await?;
        return Ok(());
    }

    // The rest are views that the commands show too. Show them the same way,
    // as if the user sent the command.
    let params = CommandParams {
        bot,
        me,
        message,
        user,
        params: "",
        database,
        pending,
        config,
    };

    let text = match button {
        MenuButton::Leaderboard => commands::leaderboard_text(&params).await?,
        MenuButton::Trustboard => commands::trustboard_text(&params).await?,
        MenuButton::Dashboard => commands::dashboard_text(&params).await?,
        MenuButton::Daily => commands::daily_text(&params).await?,
        MenuButton::Add | MenuButton::Check | MenuButton::Report | MenuButton::Back => {
            return Ok(())
        }
    };

    bot.send_message(message.chat.id, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(back_to_menu_keyboard())
        .disable_link_preview(true)
        .await?;

    Ok(())
}
