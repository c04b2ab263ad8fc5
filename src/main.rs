use dotenvy::dotenv;
use axum::{
    routing::{get, post},
    Router,
};
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use std::sync::Arc;
mod handlers {
    pub mod config_handlers;
    pub mod profile_handlers;
    pub mod run_handlers;
    pub mod whatsapp_webhook;
}
mod collectors {
    pub mod calendar;
    pub mod gmail;
    pub mod google_auth;
    pub mod news;
}
mod intelligence {
    pub mod briefing;
    pub mod heuristics;
    pub mod llm;
    pub mod profile_analyzer;
}
mod audio {
    pub mod storage;
    pub mod tts;
}
mod delivery {
    pub mod whatsapp;
    pub mod window;
}
mod utils {
    pub mod encryption;
}
mod error;
mod models {
    pub mod briefing_models;
}
mod repositories {
    pub mod briefing_repository;
    pub mod user_core;
}
mod schema;
mod jobs {
    pub mod next_run;
    pub mod pipeline;
    pub mod trigger;
}
use audio::storage::BlobStorage;
use handlers::{config_handlers, profile_handlers, run_handlers, whatsapp_webhook};
use repositories::briefing_repository::BriefingRepository;
use repositories::user_core::UserCore;
type DbPool = r2d2::Pool<ConnectionManager<SqliteConnection>>;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

async fn health_check() -> &'static str {
    "OK"
}

pub struct AppState {
    user_core: Arc<UserCore>,
    briefing_repository: Arc<BriefingRepository>,
    blob_storage: Arc<BlobStorage>,
}

pub fn validate_env() {
    let required_vars = [
        "DATABASE_URL", "ENCRYPTION_KEY", "OPENROUTER_API_KEY", "SERVER_URL",
        "AUDIO_URL_SECRET", "GOOGLE_CLIENT_ID", "GOOGLE_CLIENT_SECRET",
        "ELEVENLABS_API_KEY", "BRIEFING_VOICE_ID", "TWILIO_ACCOUNT_SID",
        "TWILIO_AUTH_TOKEN", "TWILIO_WHATSAPP_NUMBER",
    ];
    for var in required_vars.iter() {
        std::env::var(var).expect(&format!("{} must be set", var));
    }
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,daybreak=debug"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    validate_env();

    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set in environment");
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = r2d2::Pool::builder()
        .build(manager)
        .expect("Failed to create pool");
    {
        let mut conn = pool.get().expect("Failed to get DB connection");
        conn.run_pending_migrations(MIGRATIONS)
            .expect("Failed to run migrations");
    }
    let user_core = Arc::new(UserCore::new(pool.clone()));
    let briefing_repository = Arc::new(BriefingRepository::new(pool.clone()));
    let blob_storage = Arc::new(BlobStorage::from_env().expect("Invalid blob storage config"));

    let state = Arc::new(AppState {
        user_core,
        briefing_repository,
        blob_storage,
    });

    let app = Router::new()
        .route("/api/health", get(health_check))
        .route("/api/config", post(config_handlers::save_config))
        .route("/api/config", get(config_handlers::get_config))
        .route("/api/profile/analyze", post(profile_handlers::start_analysis))
        .route("/api/profile/analyze/stop", post(profile_handlers::stop_analysis))
        .route("/api/profile/analyze/status", post(profile_handlers::analysis_status))
        .route("/api/runs/trigger", post(run_handlers::trigger_now))
        .route("/api/internal/run-pipeline", post(run_handlers::run_pipeline))
        .route("/api/cron/process", get(run_handlers::cron_process))
        .route("/api/audio/{run_id}", get(run_handlers::audio_redirect))
        .route("/uploads/{*key}", get(run_handlers::serve_upload))
        .route("/api/webhooks/twilio", post(whatsapp_webhook::inbound_message))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(
            CorsLayer::new()
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST, axum::http::Method::OPTIONS])
                .allow_origin(AllowOrigin::exact(
                    std::env::var("FRONTEND_URL")
                        .unwrap_or_else(|_| "http://localhost:8080".to_string())
                        .parse()
                        .expect("Invalid FRONTEND_URL"),
                ))
                .allow_headers([
                    axum::http::header::CONTENT_TYPE,
                    axum::http::header::AUTHORIZATION,
                    axum::http::header::ACCEPT,
                ]),
        )
        .with_state(state.clone());

    let state_for_trigger = state.clone();
    tokio::spawn(async move {
        jobs::trigger::start_trigger(state_for_trigger).await;
    });

    use tokio::net::TcpListener;
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);
    tracing::info!("Starting server on port {}", port);
    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await.unwrap();
    axum::serve(listener, app.into_make_service()).await.unwrap();
}
