//! Application entry point for the `fieldflow-irrigation` service.
//!
//! Startup sequence:
//! - Load configuration from environment variables or `.env`
//! - Initialize structured logging/tracing
//! - Open the session pool (Postgres when `DATABASE_URL` is set, in-memory
//!   otherwise) and create the schema
//! - Build the weather collector (live when `WEATHER_API_KEY` is set)
//! - Mount the API routes via the `routes` gateway and serve
//!
//! # Environment Variables
//! See [`fieldflow_irrigation::config::load_from_env`]. Logging reads
//! `RUST_LOG`, `AXUM_LOG_LEVEL`, `AXUM_SPAN_EVENTS` and `FORCE_COLOR`.
use std::{env, sync::Arc};

use anyhow::{anyhow, Result};
use axum::Router;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use fieldflow_irrigation::config::{self, mask_db_url, Config};
use fieldflow_irrigation::pool::ConnectionPool;
use fieldflow_irrigation::routes;
use fieldflow_irrigation::schema;
use fieldflow_irrigation::store::{MemoryStore, PgStore, SessionPool};
use fieldflow_irrigation::weather::{OpenWeatherSource, WeatherCollector};
use fieldflow_irrigation::{Pipeline, PipelineSettings};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let weather = build_weather(&cfg)?;

    match cfg.db_url.clone() {
        Some(db_url) => {
            tracing::info!("Attempting to connect to database: {}", mask_db_url(&db_url));

            let store = PgStore::connect(&db_url, cfg.pool_options())
                .await
                .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;
            tracing::info!("Successfully connected to database");

            schema::create_schema(store.pool()).await?;
            serve(store, weather, &cfg).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, records are kept in memory only");
            let pool = ConnectionPool::new(MemoryStore::new(), cfg.pool_options());
            pool.warm().await?;
            serve(pool, weather, &cfg).await
        }
    }
}

fn build_weather(cfg: &Config) -> Result<WeatherCollector> {
    // ---
    let offset = cfg.field_offset()?;
    match &cfg.weather_api_key {
        Some(key) => {
            let live = OpenWeatherSource::new(
                cfg.weather_api_url.clone(),
                key.clone(),
                cfg.weather_city.clone(),
                cfg.weather_timeout(),
            )?;
            tracing::info!("Live weather enabled for {}", cfg.weather_city);
            Ok(WeatherCollector::with_live(Arc::new(live), cfg.weather_timeout(), offset))
        }
        None => {
            tracing::info!("No WEATHER_API_KEY, using synthetic weather");
            Ok(WeatherCollector::synthetic(offset))
        }
    }
}

async fn serve<P: SessionPool>(pool: P, weather: WeatherCollector, cfg: &Config) -> Result<()> {
    // ---
    let settings = PipelineSettings {
        enrichment_max_concurrent: cfg.enrichment_max_concurrent,
        training_row_limit: cfg.training_row_limit,
    };
    let pipeline = Pipeline::new(pool, weather, settings);

    // Build app from routes gateway
    let app: Router = routes::router(pipeline);

    tracing::info!("Listening on {}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(cfg.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// - Target, file and line number are always included
/// - Color: `FORCE_COLOR=1|true|yes` forces on, `0|false|no` forces off,
///   otherwise TTY detection decides
/// - Span events from `AXUM_SPAN_EVENTS`: `full`, `enter_exit`, or close
///   events only (default)
/// - Level from `RUST_LOG` if set, else `AXUM_LOG_LEVEL` (default `debug`)
///
/// Call once at startup, before any tracing macro fires.
fn init_tracing() {
    // ---
    let span_events = match env::var("AXUM_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("AXUM_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn,hyper=info,reqwest=info"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
