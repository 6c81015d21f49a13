//! # Minder — single-owner reminder, task, and note bot over Telegram.
//!
//! Usage:
//!   minder                         # ~/.minder/config.toml
//!   minder --config ./minder.toml  # explicit config
//!   MINDER_BOT_TOKEN=... minder    # token from the environment

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

use minder_channels::TelegramChannel;
use minder_core::{MinderConfig, ReminderStore};
use minder_scheduler::{
    DispatchHandle, JobRunner, ReminderDispatcher, Schedule, SchedulerEngine, Trigger,
    reconcile_active, resolve_zone, spawn_scheduler,
};
use minder_store::SqliteStore;

mod commands;
use commands::CommandContext;

#[derive(Parser)]
#[command(
    name = "minder",
    version,
    about = "⏰ Minder — personal reminders, tasks, and notes over Telegram"
)]
struct Cli {
    /// Config file path (default: ~/.minder/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Database path override
    #[arg(long)]
    db: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "minder=debug,minder_scheduler=debug,minder_channels=debug,minder_store=debug"
    } else {
        "minder=info,minder_scheduler=info,minder_channels=info,minder_store=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => MinderConfig::load_from(Path::new(path))?,
        None => MinderConfig::load()?,
    };
    if config.telegram.bot_token.is_empty() {
        anyhow::bail!("No bot token. Set telegram.bot_token in config or MINDER_BOT_TOKEN");
    }
    if config.telegram.owner_user_id == 0 {
        anyhow::bail!("No owner. Set telegram.owner_user_id in config");
    }

    let db_path = cli
        .db
        .map(PathBuf::from)
        .unwrap_or_else(|| config.storage.resolved_db_path());
    let store = Arc::new(SqliteStore::open(&db_path)?);
    let store_dyn: Arc<dyn ReminderStore> = store.clone();

    let mut channel = TelegramChannel::new(
        config.telegram.bot_token.clone(),
        config.telegram.poll_timeout_secs,
    );
    let sender = channel.sender();
    let me = channel.get_me().await?;
    tracing::info!(
        "🤖 Connected as @{}",
        me.username.as_deref().unwrap_or("unknown")
    );

    let engine = Arc::new(Mutex::new(SchedulerEngine::new()));
    let delivery: Arc<dyn minder_core::Delivery> = Arc::new(sender.clone());
    let dispatcher = Arc::new(ReminderDispatcher::new(
        store_dyn.clone(),
        delivery,
        engine.clone(),
    ));

    let misfire_grace = chrono::Duration::seconds(config.scheduler.misfire_grace_secs as i64);
    let installed = reconcile_active(
        &store_dyn,
        &dispatcher,
        misfire_grace,
        config.scheduler.fallback_utc_offset_hours,
    )
    .await?;

    let ctx = Arc::new(CommandContext {
        owner_user_id: config.telegram.owner_user_id,
        timezone: config.scheduler.timezone.clone(),
        zone: resolve_zone(
            &config.scheduler.timezone,
            config.scheduler.fallback_utc_offset_hours,
        ),
        fallback_offset_hours: config.scheduler.fallback_utc_offset_hours,
        misfire_grace,
        store,
        store_dyn,
        dispatcher,
        sender,
    });
    install_close_day(&ctx).await?;

    // Engine task + dispatch worker. The worker executes dispatcher work
    // sequentially, so storage writes from firings never interleave.
    let (dispatch, worker) = DispatchHandle::new();
    tokio::spawn(spawn_scheduler(
        engine,
        dispatch,
        config.scheduler.tick_interval_secs,
    ));
    tokio::spawn(worker.run());

    println!("⏰ Minder v{}", env!("CARGO_PKG_VERSION"));
    println!("   🗄️  Database: {}", db_path.display());
    println!("   🌍 Timezone: {}", config.scheduler.timezone);
    println!("   🔔 {installed} reminder job(s) restored");
    println!();

    // Main polling loop — everything the owner types lands here.
    loop {
        match channel.get_updates().await {
            Ok(messages) => {
                for msg in messages {
                    ctx.handle(msg).await;
                }
            }
            Err(e) => {
                tracing::error!("📡 Polling error: {e}");
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        }
    }
}

/// Schedule the end-of-day job through the same engine as reminders:
/// every night at 23:59 owner time, pending tasks become missed.
async fn install_close_day(ctx: &Arc<CommandContext>) -> Result<()> {
    let schedule = Schedule::parse("EVERYDAY@23:59")?;
    let trigger = Trigger::build(&schedule, ctx.zone);
    let c = ctx.clone();
    let runner: JobRunner = Arc::new(move || {
        let c = c.clone();
        Box::pin(async move { c.close_day().await })
    });
    ctx.dispatcher
        .engine()
        .lock()
        .await
        .upsert("close-day", trigger, ctx.misfire_grace, runner);
    Ok(())
}
