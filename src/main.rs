use std::error::Error;

use dotenvy::dotenv;
use once_cell::sync::Lazy;
use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{info, warn};

mod config;
mod db;
mod generation;
mod handlers;
mod health;
mod session;
mod state;
mod utils;

use config::CONFIG;
use db::Database;
use generation::style::STYLE_CALLBACK_PREFIX;
use generation::ImageDispatcher;
use handlers::keyboards::{self, TOPUP_DEMO_CALLBACK, TOPUP_REAL_CALLBACK};
use handlers::{commands, wizard};
use state::AppState;
use utils::logging::init_logging;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
enum Command {
    Start,
    Help,
    Generate,
    Balance,
    Buy,
    Stats,
    Cancel,
    Admin,
    Credit(String),
}

type HandlerResult = Result<(), Box<dyn Error + Send + Sync>>;

#[tokio::main]
async fn main() -> HandlerResult {
    dotenv().ok();
    let _guards = init_logging(&config::log_level_from_env());
    Lazy::force(&CONFIG);

    if CONFIG.bot_token.trim().is_empty() {
        return Err("BOT_TOKEN is required".into());
    }

    let bot = Bot::new(CONFIG.bot_token.clone());
    info!("Starting Nano-Banano image bot");

    let db = Database::init(&CONFIG.database_url, CONFIG.free_generations).await?;
    db.health_check().await?;
    let generator = ImageDispatcher::new(&CONFIG.provider_settings());
    let state = AppState::new(db, generator);

    match bot.get_me().await {
        Ok(me) => info!("Connected as @{}", me.username()),
        Err(err) => warn!("get_me failed, continuing: {err}"),
    }

    tokio::spawn(health::serve(CONFIG.health_addr));

    let command_handler = dptree::entry()
        .filter_command::<Command>()
        .endpoint(handle_command);

    let message_handler = Update::filter_message()
        .branch(command_handler)
        .branch(dptree::filter(|msg: Message| msg.photo().is_some()).endpoint(handle_photo))
        .branch(
            dptree::filter(|msg: Message| msg.text().is_some_and(keyboards::is_menu_label))
                .endpoint(handle_menu),
        )
        .branch(dptree::filter(|msg: Message| msg.text().is_some()).endpoint(handle_text))
        .endpoint(ignore_message);

    let callback_handler = Update::filter_callback_query().endpoint(handle_callback_query);

    let handler = dptree::entry()
        .branch(message_handler)
        .branch(callback_handler);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Bot stopped");
    Ok(())
}

async fn handle_command(
    bot: Bot,
    state: AppState,
    message: Message,
    command: Command,
) -> HandlerResult {
    match command {
        Command::Start => commands::start_handler(bot, state, message).await?,
        Command::Help => commands::help_handler(bot, state, message).await?,
        Command::Generate => commands::generate_handler(bot, state, message).await?,
        Command::Balance => commands::balance_handler(bot, state, message).await?,
        Command::Buy => commands::buy_handler(bot, state, message).await?,
        Command::Stats => commands::stats_handler(bot, state, message).await?,
        Command::Cancel => wizard::cancel_handler(bot, state, message).await?,
        Command::Admin => commands::admin_handler(bot, state, message).await?,
        Command::Credit(args) => commands::credit_handler(bot, state, message, args).await?,
    }
    Ok(())
}

async fn handle_menu(bot: Bot, state: AppState, message: Message) -> HandlerResult {
    let label = message.text().unwrap_or_default().to_string();
    match label.as_str() {
        keyboards::MENU_GENERATE => commands::generate_handler(bot, state, message).await?,
        keyboards::MENU_UPLOAD_PHOTO | keyboards::OPTION_WITH_PHOTO => {
            wizard::begin_wizard(bot, state, message, true).await?
        }
        keyboards::OPTION_TEXT_ONLY => wizard::begin_wizard(bot, state, message, false).await?,
        keyboards::MENU_BALANCE => commands::balance_handler(bot, state, message).await?,
        keyboards::MENU_BUY => commands::buy_handler(bot, state, message).await?,
        keyboards::MENU_STATS => commands::stats_handler(bot, state, message).await?,
        keyboards::MENU_HELP => commands::help_handler(bot, state, message).await?,
        keyboards::CANCEL_LABEL => wizard::cancel_handler(bot, state, message).await?,
        _ => {}
    }
    Ok(())
}

async fn handle_photo(bot: Bot, state: AppState, message: Message) -> HandlerResult {
    wizard::photo_handler(bot, state, message).await?;
    Ok(())
}

async fn handle_text(bot: Bot, state: AppState, message: Message) -> HandlerResult {
    if message.text().is_some_and(|text| text.trim_start().starts_with('/')) {
        return Ok(());
    }
    wizard::text_handler(bot, state, message).await?;
    Ok(())
}

async fn handle_callback_query(bot: Bot, state: AppState, query: CallbackQuery) -> HandlerResult {
    let Some(data) = query.data.clone() else {
        return Ok(());
    };
    if data.starts_with(STYLE_CALLBACK_PREFIX) {
        wizard::style_callback(bot, state, query).await?;
    } else if data == TOPUP_DEMO_CALLBACK || data == TOPUP_REAL_CALLBACK {
        commands::topup_callback(bot, state, query).await?;
    } else {
        bot.answer_callback_query(query.id.clone()).await?;
    }
    Ok(())
}

async fn ignore_message(_message: Message) -> HandlerResult {
    Ok(())
}
