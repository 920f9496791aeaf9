use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use secrecy::ExposeSecret;
use serenity::all::{ClientBuilder, GatewayIntents, Http};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use welcome_bot::config::BotConfig;
use welcome_bot::gateway::{ChatGateway, DiscordGateway, EventRouter, MemberId};
use welcome_bot::identity::{AccountLinker, IdentityStore, PgIdentityStore};
use welcome_bot::karma::KarmaTracker;
use welcome_bot::marketing::{ConvertKitClient, TaggingService};
use welcome_bot::onboarding::{
    OnboardingDeps, OnboardingRouteState, StepCatalog, StepSequencer, Watchdog, onboarding_routes,
};
use welcome_bot::store::{Database, LibSqlBackend};

/// Install the stdout subscriber, plus a daily log file when `log_dir` is set.
fn init_tracing(log_dir: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout = tracing_subscriber::fmt::layer().with_target(false);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "welcome-bot.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout)
                .with(file)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = BotConfig::from_env().context("Failed to load configuration")?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    eprintln!("👋 Welcome bot v{}", env!("CARGO_PKG_VERSION"));
    info!(guild_id = config.guild.guild_id, "Starting welcome bot");

    let shutdown = CancellationToken::new();

    // ── Discord HTTP ────────────────────────────────────────────────────
    let token = config.discord_token.expose_secret().to_string();
    let http = Arc::new(Http::new(&token));
    let me = http
        .get_current_user()
        .await
        .context("Failed to fetch the bot user; is DISCORD_TOKEN valid?")?;
    let bot_id = MemberId(me.id.get());
    let gateway: Arc<dyn ChatGateway> =
        Arc::new(DiscordGateway::new(Arc::clone(&http), bot_id, config.guild.clone()));

    // ── Database ────────────────────────────────────────────────────────
    let store: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.session_db_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to open session database at {}",
                    config.session_db_path.display()
                )
            })?,
    );
    eprintln!("   Sessions: {}", config.session_db_path.display());

    let identity: Arc<dyn IdentityStore> = Arc::new(
        PgIdentityStore::connect(&config.identity_database_url)
            .await
            .context("Failed to connect to the identity database")?,
    );
    let linker = Arc::new(AccountLinker::new(
        identity,
        config.onboarding.poll_interval,
    ));
    let tagging: Arc<dyn TaggingService> =
        Arc::new(ConvertKitClient::new(config.convertkit.clone()));

    // ── Onboarding ──────────────────────────────────────────────────────
    let catalog = Arc::new(StepCatalog::community(&config.onboarding));
    let sequencer = StepSequencer::new(
        OnboardingDeps {
            gateway: Arc::clone(&gateway),
            store: Arc::clone(&store),
            linker,
            tagging,
        },
        catalog,
        config.onboarding.clone(),
        shutdown.clone(),
    );
    let watchdog = Arc::new(Watchdog::new(
        Arc::clone(&sequencer),
        config.watchdog.clone(),
    ));
    let karma = Arc::new(KarmaTracker::new(
        Arc::clone(&gateway),
        Arc::clone(&store),
        config.karma_channel,
    ));

    // ── Status server ───────────────────────────────────────────────────
    if let Some(port) = config.status_port {
        let app = onboarding_routes(OnboardingRouteState {
            store: Arc::clone(&store),
        });
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("Failed to bind status port {port}"))?;
        eprintln!("   Status API: http://0.0.0.0:{port}/api/onboarding/sessions");
        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(server_shutdown.cancelled_owned())
                .await
            {
                error!(error = %e, "Status server failed");
            }
        });
    }

    // ── Discord gateway ─────────────────────────────────────────────────
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_MESSAGE_REACTIONS
        | GatewayIntents::MESSAGE_CONTENT;
    let router = EventRouter::new(
        sequencer,
        karma,
        watchdog,
        config.guild.guild_id,
        shutdown.clone(),
    );
    let mut client = ClientBuilder::new(&token, intents)
        .event_handler(router)
        .await
        .context("Failed to build the Discord client")?;

    let shard_manager = Arc::clone(&client.shard_manager);
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
            signal_shutdown.cancel();
            shard_manager.shutdown_all().await;
        }
    });

    client.start().await.context("Discord client stopped")?;
    shutdown.cancel();
    Ok(())
}
