//! Boilerplate shared by the Linktory binaries, so that the bot crate
//! itself can be about links and reputation and not about plumbing.

use std::future::Future;

use teloxide::{
    requests::Requester,
    types::{ChatId, Message, UserId},
    Bot, RequestError,
};

/// Initialize logging and start the `closure` in an async runtime.
///
/// Logging uses `default_filter` unless overridden by the environment
/// variable `RUST_LOG`. This uses the crate [pretty_env_logger][] internally,
/// see its documentation for the filter syntax.
///
/// Timestamps are left out when running as a systemd service, since the
/// journal already records them.
///
/// [pretty_env_logger]: https://docs.rs/pretty_env_logger
///
/// # Panics
///
/// Panics if the tokio runtime can't be built.
pub fn start_everything(default_filter: &str, closure: impl Future<Output = ()>) {
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());

    let running_as_systemd_service = std::env::var_os("JOURNAL_STREAM").is_some();

    let mut builder = match running_as_systemd_service {
        true => pretty_env_logger::formatted_builder(),
        false => pretty_env_logger::formatted_timed_builder(),
    };

    builder.parse_filters(&log_filter);

    if builder.try_init().is_err() {
        log::error!("Tried to init logger twice!");
    }

    log::info!("Logging with filter: {log_filter}");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build the tokio runtime!")
        .block_on(closure);
}

/// Run a teloxide request expression, and if Telegram answers with a flood
/// wait, sleep for as long as it asks and run the expression again.
///
/// Gives up after 5 flood waits and returns the last result as-is.
///
/// ```ignore
/// teloxide_retry!(bot.send_message(chat_id, "hi").await)?;
/// ```
#[macro_export]
macro_rules! teloxide_retry {
    ($request:expr) => {{
        let mut flood_waits: u32 = 0;
        loop {
            match $request {
                Err(::teloxide::RequestError::RetryAfter(seconds)) if flood_waits < 5 => {
                    flood_waits += 1;
                    ::log::warn!(
                        "Flood wait of {} seconds, attempt {}",
                        seconds.seconds(),
                        flood_waits
                    );
                    ::tokio::time::sleep(seconds.duration()).await;
                }
                result => break result,
            }
        }
    }};
}

/// A bot command split out of a message's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandText<'a> {
    /// Command name with the leading `/` and any `@botname` suffix trimmed,
    /// e.g. `add` for `/add@Linktory_Bot https://example.com`.
    pub name: &'a str,
    /// Everything after the command, with leading whitespace trimmed.
    pub params: &'a str,
}

/// Split `text` into a command and its parameters.
///
/// Returns [`None`] if the text isn't a command, or if it's a command
/// addressed to some other bot than `bot_username`.
#[must_use]
pub fn split_command<'a>(text: &'a str, bot_username: &str) -> Option<CommandText<'a>> {
    let rest = text.strip_prefix('/')?;
    let command = rest.split_whitespace().next()?;

    if !command.is_ascii() {
        // Telegram commands must be ASCII.
        // See https://core.telegram.org/bots/api#botcommand
        return None;
    }

    let name = if let Some((name, addressee)) = command.split_once('@') {
        // Bot names are guaranteed ASCII, so ignore ASCII case specifically.
        if !addressee.eq_ignore_ascii_case(bot_username) {
            return None;
        }
        name
    } else {
        command
    };

    if name.is_empty() {
        return None;
    }

    Some(CommandText {
        name,
        params: rest[command.len()..].trim_start(),
    })
}

pub trait MessageStuff {
    /// Text of the message, or its caption if it has no text.
    fn text_full(&self) -> Option<&str>;
    /// Convenience over [`split_command`] on [`Self::text_full`].
    fn command(&self, bot_username: &str) -> Option<CommandText<'_>>;
}

impl MessageStuff for Message {
    fn text_full(&self) -> Option<&str> {
        self.text().or_else(|| self.caption())
    }
    fn command(&self, bot_username: &str) -> Option<CommandText<'_>> {
        split_command(self.text_full()?, bot_username)
    }
}

/// Find out if a user of this ID is present in the chat of that ID,
/// as a member, admin, or owner.
pub async fn is_member_of(bot: &Bot, user: UserId, chat: ChatId) -> Result<bool, RequestError> {
    Ok(bot.get_chat_member(chat, user).await?.is_present())
}
