use api::auth::JwtValidator;
use api::state::{AppState, WsSettings};
use db::SeaOrmChatStore;
use migration::Migrator;
use sea_orm_migration::MigratorTrait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::rolling;
use util::broker::LocalBroker;
use util::cache::MemoryStore;
use util::config::AppConfig;

#[tokio::main]
async fn main() {
    let cfg = AppConfig::global().clone();

    let _log_guard = init_logging(&cfg.log_file, &cfg.log_level, cfg.log_to_stdout);

    let db = db::connect(&cfg.database_path)
        .await
        .expect("Failed to connect to database");
    Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");

    let state = AppState::new(
        Arc::new(SeaOrmChatStore::new(db)),
        Arc::new(LocalBroker::new(cfg.broker_topic_capacity)),
        Arc::new(MemoryStore::new()),
        Arc::new(JwtValidator::new(&cfg.jwt_secret)),
        WsSettings::from_config(&cfg),
        Duration::from_secs(cfg.dm_cache_ttl_secs),
    );

    let app = api::app(state);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .expect("Invalid address");

    tracing::info!(env = %cfg.env, "Starting {} on http://{}", cfg.project_name, addr);

    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server crashed");
}

fn init_logging(
    log_file: &str,
    log_level: &str,
    log_to_stdout: bool,
) -> tracing_appender::non_blocking::WorkerGuard {
    use std::fs;
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    fs::create_dir_all("logs").ok();

    let file_appender = rolling::daily("logs", log_file);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true);

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .with_target(true)
        .with_thread_ids(true);

    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("api=info"));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);

    if log_to_stdout {
        registry.with(stdout_layer).init();
    } else {
        registry.init();
    }

    guard
}
