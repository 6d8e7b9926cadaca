use crate::{
    app::App,
    coordinator::Outcome,
    error::Error,
    links::{extract_urls, is_auto_download_url, is_image_url},
    rate_limit::Admission,
    session::UserKey,
    telegram::{TelegramFiles, TelegramStatus, cancel_keyboard, type_keyboard},
    utils::MediaKind,
};
use std::{sync::Arc, time::Instant};
use teloxide::prelude::*;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Where a request came from and where its replies go.
#[derive(Debug, Clone)]
pub struct ChatContext {
    pub bot: Bot,
    pub chat_id: ChatId,
    pub user: UserKey,
}

impl ChatContext {
    async fn say(&self, text: impl Into<String>) -> ResponseResult<Message> {
        self.bot.send_message(self.chat_id, text).await
    }
}

/// Entry point for non-command text messages.
///
/// # Errors
///
/// Returns a Teloxide error if a reply fails to send.
pub async fn handle_text(bot: Bot, msg: Message, app: Arc<App>) -> ResponseResult<()> {
    let (Some(text), Some(from)) = (msg.text(), msg.from.as_ref()) else {
        return Ok(());
    };
    let ctx = ChatContext {
        bot,
        chat_id: msg.chat.id,
        user: UserKey::from(from.id),
    };

    let urls = extract_urls(text);
    if urls.is_empty() {
        ctx.say(Error::InvalidUrl(text.to_string()).user_message())
            .await?;
        return Ok(());
    }

    info!(user = %ctx.user, count = urls.len(), "received urls");
    tokio::spawn(async move {
        if let Err(err) = process_urls(&ctx, urls, &app).await {
            warn!(%err, user = %ctx.user, "failed to process urls");
        }
    });
    Ok(())
}

/// Handle the URLs of one message in order, waiting for each download to
/// finish before the next URL is admitted.
async fn process_urls(ctx: &ChatContext, urls: Vec<String>, app: &Arc<App>) -> ResponseResult<()> {
    for url in urls {
        match app.limiter.admit(ctx.user, Instant::now()) {
            Admission::Accepted => {}
            Admission::Busy => {
                ctx.say(Error::Busy.user_message()).await?;
                continue;
            }
            Admission::Limited => {
                let limit = app.limiter.limit();
                ctx.say(Error::RateLimited { url, limit }.user_message())
                    .await?;
                continue;
            }
        }
        if let Some(download) = process_url(ctx, url, app).await?
            && let Err(err) = download.await
        {
            warn!(%err, user = %ctx.user, "download task failed");
        }
    }
    Ok(())
}

/// Route one URL: images download directly, auto-download hosts fetch the
/// best video, everything else is analysed and offered as video or audio.
///
/// # Errors
///
/// Returns a Teloxide error if a reply fails to send.
pub async fn process_url(
    ctx: &ChatContext,
    url: String,
    app: &Arc<App>,
) -> ResponseResult<Option<JoinHandle<Outcome>>> {
    if app.coordinator.is_busy(ctx.user) {
        ctx.say(Error::Busy.user_message()).await?;
        return Ok(None);
    }

    if is_image_url(&url) {
        let info = app.coordinator.head_image(&url).await;
        ctx.say(info.describe()).await?;
        return start_download(ctx, url, MediaKind::Image, "best", "Downloading image...", app)
            .await;
    }

    if is_auto_download_url(&url) {
        return start_download(
            ctx,
            url,
            MediaKind::Video,
            "best",
            "Downloading from Pinterest...",
            app,
        )
        .await;
    }

    analyze(ctx, url, app).await?;
    Ok(None)
}

async fn analyze(ctx: &ChatContext, url: String, app: &Arc<App>) -> ResponseResult<()> {
    let status = ctx.say("Analyzing available formats...").await?;

    let info = match app.coordinator.analyze(&url).await {
        Ok(info) => info,
        Err(err) => {
            warn!(%err, url = %url, "analysis failed");
            let reason = match &err {
                Error::DownloadFailed(msg) | Error::FormatUnavailable(msg) => msg.clone(),
                other => other.user_message(),
            };
            ctx.bot
                .edit_message_text(ctx.chat_id, status.id, format!("Error analyzing video: {reason}"))
                .await?;
            return Ok(());
        }
    };

    ctx.bot
        .edit_message_text(ctx.chat_id, status.id, info.describe())
        .await?;

    let Some(keyboard) = type_keyboard(&info) else {
        ctx.say("No downloadable formats found for this video.")
            .await?;
        return Ok(());
    };

    app.sessions().set_pending(ctx.user, url);
    ctx.bot
        .send_message(ctx.chat_id, "Choose type:")
        .reply_markup(keyboard)
        .await?;
    Ok(())
}

/// Begin an operation and hand it to a background task. Returns the task, or
/// `None` when the operation could not begin.
///
/// The dispatcher handles updates of one chat in sequence, so the download
/// must not block a handler or the cancel button would never be seen.
///
/// # Errors
///
/// Returns a Teloxide error if the status message cannot be sent.
pub async fn start_download(
    ctx: &ChatContext,
    url: String,
    kind: MediaKind,
    quality: &str,
    intro: &str,
    app: &Arc<App>,
) -> ResponseResult<Option<JoinHandle<Outcome>>> {
    let handle = match app.coordinator.begin(ctx.user, url, kind, quality) {
        Ok(handle) => handle,
        Err(err) => {
            ctx.say(err.user_message()).await?;
            return Ok(None);
        }
    };

    let status_msg = match ctx
        .bot
        .send_message(ctx.chat_id, intro)
        .reply_markup(cancel_keyboard())
        .await
    {
        Ok(msg) => msg,
        Err(err) => {
            app.coordinator.end(&handle, Outcome::Failed);
            return Err(err);
        }
    };

    let status = Arc::new(TelegramStatus::new(
        ctx.bot.clone(),
        ctx.chat_id,
        status_msg.id,
    ));
    let files = TelegramFiles::new(ctx.bot.clone(), ctx.chat_id);
    let app = Arc::clone(app);

    Ok(Some(tokio::spawn(async move {
        let op = handle.id();
        let outcome = app.coordinator.execute(handle, status, &files).await;
        debug!(op, ?outcome, "download task finished");
        outcome
    })))
}
