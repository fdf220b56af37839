use anyhow::Result;
use clap::Parser;
use hubwatch::dispatch;
use hubwatch::hub::{websub, HubClient, Intake, MalformedPolicy, WebSubEngine};
use hubwatch::telegram::TelegramMessenger;
use hubwatch::watchlist::Watchlist;
use hubwatch::{config, db, forwarder, handlers};
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::prelude::*;
use tokio::net::TcpListener;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let mut cfg = config::load(Some(&args.config))?;
    if let Ok(url) = std::env::var("DATABASE_URL") {
        cfg.database.url = url;
    }

    let pool = db::init_pool(&cfg.database).await?;
    db::run_migrations(&pool).await?;

    let (forwarder, entries) = forwarder::channel(cfg.app.queue_capacity);
    let engine = Arc::new(WebSubEngine::new(cfg.hub.callback_base.clone())?);
    let intake = Intake::new(
        forwarder,
        MalformedPolicy::from_forward_flag(cfg.hub.forward_malformed),
    );
    let watchlist = Arc::new(Watchlist::new(
        pool.clone(),
        HubClient::new(engine.clone(), intake),
    ));

    let bot = Bot::new(cfg.telegram.bot_token.clone());

    // Single consumer of hub deliveries.
    let messenger = TelegramMessenger::new(bot.clone());
    let dispatch_pool = pool.clone();
    tokio::spawn(async move {
        dispatch::run(dispatch_pool, &messenger, entries).await;
    });

    let addr = cfg.hub.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, callback_base = %cfg.hub.callback_base, "serving hub callbacks");
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, websub::router(engine)).await {
            error!(?err, "callback server stopped");
        }
    });

    if cfg.app.resubscribe_on_start {
        let watchlist = watchlist.clone();
        tokio::spawn(async move {
            if let Err(err) = watchlist.resubscribe_all().await {
                error!(?err, "failed to resubscribe stored channels");
            }
        });
    }

    let admins = Arc::new(cfg.telegram.admins.clone());
    info!("starting telegram bot");
    teloxide::repl(bot, move |bot: Bot, msg: Message| {
        let watchlist = watchlist.clone();
        let admins = admins.clone();
        async move {
            if let Err(err) = handlers::handle_update(&bot, &watchlist, &admins, &msg).await {
                error!(?err, "failed to handle update");
            }
            respond(())
        }
    })
    .await;

    Ok(())
}
