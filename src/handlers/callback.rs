use super::message::{ChatContext, process_url, start_download};
use crate::{
    app::App,
    history::HISTORY_VISIBLE,
    session::UserKey,
    telegram::{AUDIO_MP3_DATA, CANCEL_DATA, REDOWNLOAD_PREFIX, VIDEO_BEST_DATA},
    utils::MediaKind,
};
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::{debug, info};

/// A decoded inline button press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Choose(MediaKind),
    Cancel,
    /// Index into the listed (most recent) history entries.
    Redownload(usize),
}

impl CallbackAction {
    #[must_use]
    pub fn parse(data: &str) -> Option<Self> {
        match data {
            VIDEO_BEST_DATA => Some(Self::Choose(MediaKind::Video)),
            AUDIO_MP3_DATA => Some(Self::Choose(MediaKind::Audio)),
            CANCEL_DATA => Some(Self::Cancel),
            _ => data
                .strip_prefix(REDOWNLOAD_PREFIX)
                .and_then(|i| i.parse().ok())
                .map(Self::Redownload),
        }
    }
}

/// Entry point for callback queries.
///
/// # Errors
///
/// Returns a Teloxide error if answering or editing fails.
pub async fn handle_callback(bot: Bot, q: CallbackQuery, app: Arc<App>) -> ResponseResult<()> {
    let Some(action) = q.data.as_deref().and_then(CallbackAction::parse) else {
        bot.answer_callback_query(q.id.clone())
            .text("Invalid selection.")
            .await?;
        return Ok(());
    };
    let Some((chat_id, message_id)) = q.message.as_ref().map(|m| (m.chat().id, m.id())) else {
        bot.answer_callback_query(q.id.clone()).await?;
        return Ok(());
    };

    let ctx = ChatContext {
        bot: bot.clone(),
        chat_id,
        user: UserKey::from(q.from.id),
    };
    debug!(user = %ctx.user, ?action, "callback");

    match action {
        CallbackAction::Choose(kind) => {
            let Some(url) = app.sessions().take_pending(ctx.user) else {
                bot.answer_callback_query(q.id.clone())
                    .text("No active download found.")
                    .await?;
                return Ok(());
            };
            bot.answer_callback_query(q.id.clone()).await?;
            let quality = match kind {
                MediaKind::Audio => "mp3",
                MediaKind::Video | MediaKind::Image => "best",
            };
            start_download(
                &ctx,
                url,
                kind,
                quality,
                "Downloading... This may take a few minutes.",
                &app,
            )
            .await?;
        }
        CallbackAction::Cancel => {
            if app.coordinator.cancel(ctx.user) {
                info!(user = %ctx.user, "cancelled from button");
                bot.edit_message_text(chat_id, message_id, "Download cancelled.")
                    .await?;
            }
            bot.answer_callback_query(q.id.clone()).await?;
        }
        CallbackAction::Redownload(index) => {
            let entry = app
                .coordinator
                .recent(ctx.user, HISTORY_VISIBLE)
                .into_iter()
                .nth(index);
            let Some(entry) = entry else {
                bot.answer_callback_query(q.id.clone())
                    .text("Invalid selection.")
                    .await?;
                return Ok(());
            };
            bot.answer_callback_query(q.id.clone())
                .text("Re-downloading...")
                .await?;
            process_url(&ctx, entry.url, &app).await?;
        }
    }
    Ok(())
}
