//! Telegram implementations of the status and delivery seams, plus the
//! inline keyboards the bot attaches to its messages.

use crate::{
    coordinator::Artifact,
    error::{Error, Result},
    extractor::MediaInfo,
    sink::{FileSender, StatusSink},
    utils::MediaKind,
};
use teloxide::{
    ApiError, RequestError,
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId},
};

pub const CANCEL_DATA: &str = "cancel";
pub const VIDEO_BEST_DATA: &str = "video_best";
pub const AUDIO_MP3_DATA: &str = "audio_mp3";
pub const REDOWNLOAD_PREFIX: &str = "redownload_";

/// A status message that is edited in place while an operation runs.
#[derive(Debug, Clone)]
pub struct TelegramStatus {
    bot: Bot,
    chat_id: ChatId,
    message_id: MessageId,
}

impl TelegramStatus {
    #[must_use]
    pub const fn new(bot: Bot, chat_id: ChatId, message_id: MessageId) -> Self {
        Self {
            bot,
            chat_id,
            message_id,
        }
    }
}

#[async_trait::async_trait]
impl StatusSink for TelegramStatus {
    async fn edit(&self, text: &str) -> Result<()> {
        let req = self
            .bot
            .edit_message_text(self.chat_id, self.message_id, text)
            .reply_markup(cancel_keyboard());
        ignore_not_modified(req.await.map(|_| ()))
    }

    async fn finish(&self, text: &str) -> Result<()> {
        let req = self
            .bot
            .edit_message_text(self.chat_id, self.message_id, text);
        ignore_not_modified(req.await.map(|_| ()))
    }
}

fn ignore_not_modified(result: std::result::Result<(), RequestError>) -> Result<()> {
    match result {
        Ok(()) | Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
        Err(err) => Err(Error::from(err)),
    }
}

/// Sends artifacts into a chat.
#[derive(Debug, Clone)]
pub struct TelegramFiles {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramFiles {
    #[must_use]
    pub const fn new(bot: Bot, chat_id: ChatId) -> Self {
        Self { bot, chat_id }
    }
}

#[async_trait::async_trait]
impl FileSender for TelegramFiles {
    async fn send_file(&self, artifact: &Artifact) -> Result<()> {
        let file = InputFile::file(artifact.path.clone());
        let caption = artifact.caption();

        match artifact.kind {
            MediaKind::Video => {
                let mut req = self.bot.send_video(self.chat_id, file);
                if let Some(c) = caption {
                    req = req.caption(c);
                }
                req.await?;
            }
            MediaKind::Audio => {
                let mut req = self.bot.send_audio(self.chat_id, file);
                if let Some(c) = caption {
                    req = req.caption(c);
                }
                req.await?;
            }
            MediaKind::Image => {
                let mut req = self.bot.send_photo(self.chat_id, file);
                if let Some(c) = caption {
                    req = req.caption(c);
                }
                req.await?;
            }
        }
        Ok(())
    }
}

#[must_use]
pub fn cancel_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new([[InlineKeyboardButton::callback("Cancel", CANCEL_DATA)]])
}

/// Video/audio choice for an analysed URL, or `None` if it has neither.
#[must_use]
pub fn type_keyboard(info: &MediaInfo) -> Option<InlineKeyboardMarkup> {
    let mut row = Vec::new();
    if info.has_video() {
        row.push(InlineKeyboardButton::callback("Video (Best)", VIDEO_BEST_DATA));
    }
    if info.has_audio() {
        row.push(InlineKeyboardButton::callback("Audio (MP3)", AUDIO_MP3_DATA));
    }
    (!row.is_empty()).then(|| InlineKeyboardMarkup::new([row]))
}

/// One re-download button per listed history entry.
#[must_use]
pub fn history_keyboard(count: usize) -> InlineKeyboardMarkup {
    let row = (0..count)
        .map(|i| {
            InlineKeyboardButton::callback(
                format!("Re-download {}", i + 1),
                format!("{REDOWNLOAD_PREFIX}{i}"),
            )
        })
        .collect::<Vec<_>>();
    InlineKeyboardMarkup::new([row])
}
