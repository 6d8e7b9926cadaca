use crate::{
    app::App,
    history::{HISTORY_VISIBLE, format_history},
    session::UserKey,
    telegram::history_keyboard,
};
use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};
use teloxide::{prelude::*, utils::command::BotCommands};

pub const WELCOME: &str = "Welcome to the Downloader Bot!\n\n\
    Send me a URL for videos (YouTube, TikTok, Facebook, etc.) or images, \
    and I'll download it for you.\n\n\
    For videos, choose your preferred quality when prompted.\n\n\
    Commands: /history (view downloads), /health (bot status).";

pub const DESCRIPTION: &str =
    "Send a link to a video or an image and get the file back, with live progress.";

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    /// Start the bot.
    Start,
    /// Display this text.
    #[command(aliases = ["h", "?"])]
    Help,
    /// Show your recent downloads.
    History,
    /// Show bot status.
    Health,
}

/// Handle a command from the user.
///
/// # Errors
///
/// Returns a Teloxide error if the message fails to send.
pub async fn answer(bot: Bot, msg: Message, cmd: Command, app: Arc<App>) -> ResponseResult<()> {
    match cmd {
        Command::Start => {
            bot.send_message(msg.chat.id, WELCOME).await?;
        }
        Command::Help => {
            bot.send_message(msg.chat.id, Command::descriptions().to_string())
                .await?;
        }
        Command::History => {
            let Some(user) = msg.from.as_ref().map(|u| UserKey::from(u.id)) else {
                return Ok(());
            };
            let entries = app.coordinator.recent(user, HISTORY_VISIBLE);
            if entries.is_empty() {
                bot.send_message(msg.chat.id, "No download history.").await?;
                return Ok(());
            }
            bot.send_message(msg.chat.id, format_history(&entries, SystemTime::now()))
                .reply_markup(history_keyboard(entries.len()))
                .await?;
        }
        Command::Health => {
            let text = health_text(app.started_at.elapsed(), app.coordinator.active_count());
            bot.send_message(msg.chat.id, text).await?;
        }
    }

    Ok(())
}

#[must_use]
pub fn format_uptime(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
}

#[must_use]
pub fn health_text(uptime: Duration, active: usize) -> String {
    format!(
        "✅ Bot is healthy!\n⏱️ Uptime: {}\n🔧 Active downloads: {active}",
        format_uptime(uptime)
    )
}
