//! Source code for Linktory, a Telegram bot where users add, check and report
//! links, and earn points and trust for doing it well.

/// Reputation and reward engine. Pure functions, no I/O.
pub mod reputation;

/// Various types used throughout.
pub mod types;

/// Settings from the environment.
pub mod config;

/// The database.
pub mod database;

/// Per-user "waiting for a link" state after a menu button press.
pub mod pending;

/// Miscellaneous functions.
mod misc;

/// Functions that perform stuff via the bot.
mod actions;

/// Functions that handle events from Telegram.
mod handlers;

/// Entry function that starts the bot.
mod entry;
pub use entry::*;
