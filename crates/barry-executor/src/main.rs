use std::net::SocketAddr;
use std::sync::Arc;

use clap::builder::BoolishValueParser;
use clap::Parser;
use tracing::{error, info, warn};

use barry_broker::alpaca::{DEFAULT_BASE_URL, DEFAULT_DATA_URL};
use barry_broker::{AlpacaClient, AlpacaConfig, Broker};
use barry_executor::{api, shutdown, sweeper, AppState, Features};
use intent_guard::GuardConfig;

/// barry-executor: order-intent executor with the intent guard in front
#[derive(Parser)]
#[command(name = "barry-executor")]
struct Args {
    /// Listen address for the HTTP API
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    listen_addr: String,

    /// Broker trading API base URL
    #[arg(long, env = "APCA_API_BASE_URL", default_value = DEFAULT_BASE_URL)]
    apca_api_base_url: String,

    /// Broker market-data API base URL
    #[arg(long, env = "APCA_DATA_BASE_URL", default_value = DEFAULT_DATA_URL)]
    apca_data_base_url: String,

    #[arg(long, env = "APCA_API_KEY_ID")]
    apca_api_key_id: Option<String>,

    #[arg(long, env = "APCA_API_SECRET_KEY", hide_env_values = true)]
    apca_api_secret_key: Option<String>,

    /// Simulate every broker call
    #[arg(long, env = "DRY_RUN", default_value = "false", value_parser = BoolishValueParser::new())]
    dry_run: bool,

    /// Put the intent guard in front of the router
    #[arg(long, env = "GUARD_ENABLED", default_value = "true", value_parser = BoolishValueParser::new())]
    guard_enabled: bool,

    /// Mount /validate and /limits
    #[arg(long, env = "VALIDATE_ROUTES", default_value = "true", value_parser = BoolishValueParser::new())]
    validate_routes: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "barry_executor=info,intent_guard=info,barry_broker=info,tower_http=info".into()
            }),
        )
        .json()
        .init();

    let args = Args::parse();
    info!(listen_addr = %args.listen_addr, dry_run = args.dry_run, "barry-executor starting");

    let config = match GuardConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid guard configuration");
            std::process::exit(1);
        }
    };
    if config.shared_secret.is_none() {
        warn!("SHARED_SECRET not set, signed endpoints will answer 500");
    }

    let broker = match AlpacaClient::new(AlpacaConfig {
        base_url: args.apca_api_base_url,
        data_url: args.apca_data_base_url,
        key_id: args.apca_api_key_id,
        secret_key: args.apca_api_secret_key,
        dry_run: args.dry_run,
    }) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "failed to build broker client");
            std::process::exit(1);
        }
    };
    if !broker.has_credentials() && !args.dry_run {
        warn!("broker credentials not configured, broker calls will fail");
    }
    let broker: Arc<dyn Broker> = Arc::new(broker);

    let features = Features {
        guard: args.guard_enabled,
        validate_routes: args.validate_routes,
    };
    if features.guard {
        info!(
            intent_path = %config.intent_path,
            session = %config.session.describe(),
            max_positions = config.caps.max_positions,
            max_trades_day = config.caps.max_trades_day,
            policy = ?config.position_policy,
            "intent guard enabled"
        );
    } else {
        warn!("intent guard disabled");
    }

    let state = Arc::new(AppState::new(broker, config, features));

    tokio::spawn(sweeper::run(state.clone(), sweeper::SWEEP_INTERVAL));

    let shutdown_state = state.clone();
    let shutdown_handle = tokio::spawn(async move {
        shutdown::wait_for_shutdown(shutdown_state).await;
    });

    let app = api::router(state.clone());
    let listener = match tokio::net::TcpListener::bind(&args.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, addr = %args.listen_addr, "failed to bind");
            std::process::exit(1);
        }
    };
    info!(addr = %args.listen_addr, "API server listening");

    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        shutdown_handle.await.ok();
    })
    .await
    {
        error!(error = %e, "server error");
    }

    info!("barry-executor stopped");
}
