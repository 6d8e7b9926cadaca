use dotenv::dotenv;
use std::sync::Arc;
use teloxide::{prelude::*, utils::command::BotCommands};
use tg_fetch_rs::{
    app::App,
    commands::{Command, DESCRIPTION},
    config::Config,
    handlers::schema,
    health,
    image::HttpImageSource,
    telemetry::setup_logger,
    ytdlp::YtDlp,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenv().ok();
    color_eyre::install()?;
    setup_logger()?;

    let config = Config::from_env()?;
    info!(
        max_file_size = config.max_file_size,
        rate_limit = config.rate_limit,
        temp_dir = %config.temp_dir.display(),
        "configuration loaded"
    );

    let port = config.port;
    tokio::spawn(async move {
        if let Err(err) = health::serve(port).await {
            error!(%err, "health server stopped");
        }
    });

    let bot = Bot::new(&config.bot_token);
    if let Err(err) = bot.set_my_commands(Command::bot_commands()).await {
        warn!(%err, "failed to register commands");
    }
    if let Err(err) = bot.set_my_description().description(DESCRIPTION).await {
        warn!(%err, "failed to set bot description");
    }

    let extractor = Arc::new(YtDlp::new(&config.ytdlp));
    let images = Arc::new(HttpImageSource::new()?);
    let app = Arc::new(App::new(config, extractor, images));

    info!("bot starting");
    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![app])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
