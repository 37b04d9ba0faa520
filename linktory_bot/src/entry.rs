use std::{fs, sync::Arc};
use teloxide::{dptree::deps, prelude::*};

use crate::{
    actions::remind_about_reviews_spinloop,
    config::Config,
    database::Database,
    handlers::{generate_bot_commands, handle_callback_query, handle_message},
    pending::{prune_pending_spinloop, PendingInputs},
};

/// # Panics
///
/// Panics if there's no key file, the configuration is invalid, or the
/// database can't be opened.
pub async fn entry() {
    log::info!("ASYNC WOOOO");
    let key = fs::read_to_string(match cfg!(debug_assertions) {
        true => "key_debug",
        false => "key",
    })
    .expect("Could not load bot key file!");

    let config = Arc::new(Config::from_env().expect("Invalid configuration!"));
    log::debug!("Running with {config:?}");

    let bot = Bot::new(key.trim());

    bot.set_my_commands(generate_bot_commands())
        .await
        .expect("Failed to set bot commands!");

    let database: Arc<Database> = Database::new(&config.database_url)
        .await
        .expect("Failed to open the database!");

    let pending = PendingInputs::new(config.pending_timeout);

    if let Some(moderator_chat) = config.moderator_chat {
        tokio::spawn(remind_about_reviews_spinloop(
            bot.clone(),
            Arc::downgrade(&database),
            moderator_chat,
        ));
    } else {
        log::warn!("LINKTORY_MODERATOR_CHAT is not set, nobody will be able to review links.");
    }

    tokio::spawn(prune_pending_spinloop(Arc::downgrade(&pending)));

    log::info!("Creating the handler...");

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback_query));

    log::info!("Dispatching the dispatcher!");

    Dispatcher::builder(bot, handler)
        .default_handler(|_| async {})
        .dependencies(deps![database, pending, config])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    log::info!("it appears we have been bonked.");
}
