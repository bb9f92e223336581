use clap::{Args, Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use pizzeria_bot::application::dispatcher::EventDispatcher;
use pizzeria_bot::application::engine::DialogEngine;
use pizzeria_bot::config::OrderingConfig;
use pizzeria_bot::domain::geo::TierThresholds;
use pizzeria_bot::domain::ports::SessionStoreBox;
use pizzeria_bot::domain::pricing::DeliveryPricing;
use pizzeria_bot::domain::session::ChatId;
use pizzeria_bot::infrastructure::in_memory::{
    CatalogSeed, InMemoryCommerceGateway, InMemoryGeocoder, InMemorySessionStore,
    RecordingMessenger,
};
use pizzeria_bot::infrastructure::moltin::{self, MoltinClient, MoltinConfig};
use pizzeria_bot::infrastructure::telegram::{self, TelegramMessenger};
use pizzeria_bot::infrastructure::yandex::{self, YandexGeocoder};
use pizzeria_bot::interfaces::polling;
use pizzeria_bot::interfaces::replay::{EventReader, ReplayWriter};
use rust_decimal::Decimal;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to persistent session database (optional). If provided, uses RocksDB.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(flatten)]
    ordering: OrderingArgs,
}

#[derive(Subcommand)]
enum Command {
    /// Run the bot against the live messaging, commerce and geocoding services.
    Serve(ServeArgs),
    /// Feed recorded events through an offline shop and print every outbound action.
    Replay {
        /// Events, one JSON object per line
        events: PathBuf,
        /// Products, pizzerias and known addresses
        #[arg(long)]
        catalog: PathBuf,
    },
}

#[derive(Args)]
struct OrderingArgs {
    #[arg(long, global = true, env = "SHOP_NAME", default_value = "Pizzeria")]
    shop_name: String,
    #[arg(long, global = true, default_value = "RUB")]
    currency: String,
    /// Upper bound of the free delivery zone, km
    #[arg(long, global = true, default_value_t = 0.5)]
    near_km: f64,
    #[arg(long, global = true, default_value_t = 5.0)]
    mid_km: f64,
    /// Beyond this distance only pickup is offered, km
    #[arg(long, global = true, default_value_t = 20.0)]
    far_km: f64,
    #[arg(long, global = true, default_value = "0")]
    near_fee: Decimal,
    #[arg(long, global = true, default_value = "100")]
    mid_fee: Decimal,
    #[arg(long, global = true, default_value = "300")]
    far_fee: Decimal,
    #[arg(long, global = true, default_value_t = 7)]
    menu_page_size: usize,
    /// Delay of the post-payment reminder, seconds
    #[arg(long, global = true, default_value_t = 3600)]
    reminder_delay_secs: u64,
    /// Chat that receives failure reports
    #[arg(long, global = true, env = "TG_OPERATOR_CHAT_ID")]
    operator_chat: Option<i64>,
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    bot_token: String,
    #[arg(long, env = "TELEGRAM_PAYMENT_TOKEN", hide_env_values = true)]
    payment_token: String,
    #[arg(long, env = "ELASTICPATH_CLIENT_ID", hide_env_values = true)]
    client_id: String,
    #[arg(long, env = "ELASTICPATH_CLIENT_SECRET", hide_env_values = true)]
    client_secret: String,
    #[arg(long, env = "YANDEX_GEOCODER_API_KEY", hide_env_values = true)]
    geocoder_key: String,
    #[arg(long, default_value = telegram::DEFAULT_API_URL)]
    telegram_url: String,
    #[arg(long, default_value = moltin::DEFAULT_BASE_URL)]
    commerce_url: String,
    #[arg(long, default_value = yandex::DEFAULT_GEOCODER_URL)]
    geocoder_url: String,
    /// Long-poll timeout, seconds
    #[arg(long, default_value_t = 30)]
    poll_timeout: u64,
    /// Timeout of commerce and geocoder calls, seconds
    #[arg(long, default_value_t = 15)]
    http_timeout: u64,
}

impl OrderingArgs {
    fn into_config(self) -> Result<OrderingConfig> {
        Ok(OrderingConfig {
            shop_name: self.shop_name,
            currency: self.currency,
            payment_provider_token: String::new(),
            thresholds: TierThresholds::new(self.near_km, self.mid_km, self.far_km)
                .into_diagnostic()?,
            pricing: DeliveryPricing::new(self.near_fee, self.mid_fee, self.far_fee)
                .into_diagnostic()?,
            menu_page_size: self.menu_page_size.max(1),
            reminder_delay: Duration::from_secs(self.reminder_delay_secs),
            operator_chat: self.operator_chat.map(ChatId),
        })
    }
}

#[cfg(feature = "storage-rocksdb")]
fn session_store(db_path: Option<PathBuf>) -> Result<SessionStoreBox> {
    use pizzeria_bot::infrastructure::rocksdb::RocksDBSessionStore;

    match db_path {
        Some(path) => Ok(Box::new(RocksDBSessionStore::open(path).into_diagnostic()?)),
        None => Ok(Box::new(InMemorySessionStore::new())),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn session_store(db_path: Option<PathBuf>) -> Result<SessionStoreBox> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(Box::new(InMemorySessionStore::new()))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.ordering.into_config()?;
    let sessions = session_store(cli.db_path)?;

    match cli.command {
        Command::Serve(args) => serve(args, sessions, config).await,
        Command::Replay { events, catalog } => replay(events, catalog, sessions, config).await,
    }
}

async fn serve(
    args: ServeArgs,
    sessions: SessionStoreBox,
    mut config: OrderingConfig,
) -> Result<()> {
    config.payment_provider_token = args.payment_token;
    let http_timeout = Duration::from_secs(args.http_timeout);

    let messenger = Arc::new(
        TelegramMessenger::new(
            &args.telegram_url,
            &args.bot_token,
            Duration::from_secs(args.poll_timeout) + http_timeout,
        )
        .into_diagnostic()?,
    );
    let commerce = Arc::new(
        MoltinClient::new(MoltinConfig {
            base_url: args.commerce_url,
            client_id: args.client_id,
            client_secret: args.client_secret,
            timeout: http_timeout,
        })
        .into_diagnostic()?,
    );
    let geocoder = Arc::new(
        YandexGeocoder::new(args.geocoder_url, args.geocoder_key, http_timeout)
            .into_diagnostic()?,
    );

    let engine = Arc::new(DialogEngine::new(
        sessions,
        commerce,
        messenger.clone(),
        geocoder,
        config,
    ));
    let dispatcher = EventDispatcher::new(engine);

    tokio::select! {
        _ = polling::run(messenger, dispatcher.clone(), args.poll_timeout) => {}
        result = tokio::signal::ctrl_c() => {
            result.into_diagnostic()?;
            info!("shutting down");
            dispatcher.wait_idle().await;
        }
    }
    Ok(())
}

async fn replay(
    events: PathBuf,
    catalog: PathBuf,
    sessions: SessionStoreBox,
    config: OrderingConfig,
) -> Result<()> {
    let catalog = BufReader::new(File::open(catalog).into_diagnostic()?);
    let seed: CatalogSeed = serde_json::from_reader(catalog).into_diagnostic()?;
    let commerce = Arc::new(InMemoryCommerceGateway::from_seed(&seed).into_diagnostic()?);
    let geocoder = Arc::new(InMemoryGeocoder::from_seed(&seed));
    let messenger = Arc::new(RecordingMessenger::new());
    let engine = DialogEngine::new(sessions, commerce, messenger.clone(), geocoder, config);

    let reader = EventReader::new(BufReader::new(File::open(events).into_diagnostic()?));
    let stdout = io::stdout();
    let mut writer = ReplayWriter::new(stdout.lock());

    for event in reader.events() {
        match event {
            // Failures are reported by the engine and show up in the outbox.
            Ok(event) => {
                let _ = engine.dispatch(event).await;
            }
            Err(e) => warn!(error = %e, "skipping unreadable event"),
        }
        writer.write_outbound(&messenger.take()).into_diagnostic()?;
    }

    let sessions = engine.sessions().await.into_diagnostic()?;
    writer.write_sessions(&sessions).into_diagnostic()?;
    Ok(())
}
