use anyhow::{Context, Result};
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use guide_funnel_bot::bot::{self, BotContext};
use guide_funnel_bot::config::{BotConfig, StoreConfig};
use guide_funnel_bot::ledger::{LeadStore, Ledger, MemoryStore, PgStore, RecordStore};
use guide_funnel_bot::localization::init_localization;
use guide_funnel_bot::scheduler::run_daily;
use guide_funnel_bot::transport::{Messenger, TelegramMessenger};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn open_store(config: &StoreConfig) -> Result<Arc<dyn LeadStore>> {
    let store: Arc<dyn LeadStore> = match config {
        StoreConfig::Postgres { database_url } => Arc::new(PgStore::connect(database_url).await?),
        StoreConfig::RecordStore(settings) => {
            info!(base = %settings.base_id, table = %settings.leads_table, "Using hosted record store");
            Arc::new(RecordStore::new(settings.clone()))
        }
        StoreConfig::Memory => {
            warn!("No lead store configured; leads are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };
    Ok(store)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    init_tracing();
    info!("Starting Guide Funnel Telegram Bot");

    let config = BotConfig::from_env().context("Invalid bot configuration")?;
    init_localization().context("Failed to load translations")?;

    let store = open_store(&config.store).await?;
    let ledger = Ledger::new(store, config.report.timezone);
    info!(backend = ledger.backend(), "Lead ledger ready");

    let bot = Bot::new(config.bot_token.clone());
    let messenger: Arc<dyn Messenger> = Arc::new(TelegramMessenger::new(bot.clone()));

    let schedule = config.report.clone();
    let ctx = Arc::new(BotContext::new(config, messenger, ledger));

    let report_ctx = Arc::clone(&ctx);
    tokio::spawn(async move {
        run_daily(schedule.at, schedule.timezone, || {
            let ctx = Arc::clone(&report_ctx);
            async move { ctx.aggregator.run().await.map(|_| ()) }
        })
        .await;
    });

    info!("Bot initialized, starting dispatcher");

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(bot::message_handler))
        .branch(Update::filter_callback_query().endpoint(bot::callback_handler));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![ctx])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
