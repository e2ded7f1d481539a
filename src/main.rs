use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use anyhow::{bail, Context};
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use orderlink::auth::MIN_SECRET_LEN;
use orderlink::holidays::HolidayService;
use orderlink::openapi::ApiDoc;
use orderlink::rate_limit::RateLimits;
use orderlink::repo::Repo;
use orderlink::{config, telemetry, AppState, SecurityHeaders};

const SWEEP_PERIOD: Duration = Duration::from_secs(5 * 60);

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds to reduce manual setup overhead.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }
    telemetry::init_tracing();
    validate_env_vars()?;

    info!("Bootstrapping orderlink");
    if let Err(e) = telemetry::install_metrics() {
        warn!(error = %e, "metrics recorder not installed");
    }

    let repo = build_repo().await?;
    let limits = RateLimits::from_env();
    if !limits.limiter.enabled {
        warn!("rate limiting disabled by RATE_LIMIT_ENABLED");
    }
    if limits.trust_proxy {
        info!("client addresses taken from proxy headers");
    }
    actix_web::rt::spawn(limits.limiter.clone().run_sweeper(SWEEP_PERIOD));

    let holidays = HolidayService::from_env();
    let state = web::Data::new(AppState::new(repo, limits, holidays));
    let security = SecurityHeaders::from_env();
    let frontend = std::env::var("FRONTEND_URL").ok();
    let openapi = ApiDoc::openapi();
    info!("OpenAPI spec generated");

    let bind = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let server = HttpServer::new(move || {
        let cors = {
            let mut c = Cors::default()
                // local dev frontends
                .allowed_origin("http://localhost:3000")
                .allowed_origin("http://127.0.0.1:3000")
                .allow_any_header()
                .allowed_methods(["GET", "POST", "PUT", "DELETE", "OPTIONS"])
                .supports_credentials()
                .max_age(3600);
            if let Some(front) = &frontend {
                c = c.allowed_origin(front);
            }
            c
        };

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(security.clone())
            .wrap(cors)
            .app_data(state.clone())
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind(&bind)
    .with_context(|| format!("binding {bind}"))?;

    info!("Listening on http://{bind}");
    server.run().await?;
    Ok(())
}

#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
async fn build_repo() -> anyhow::Result<Arc<dyn Repo>> {
    let repo = orderlink::repo::inmem::InMemRepo::from_env();
    info!("Using in-memory repository backend");
    Ok(Arc::new(repo))
}

#[cfg(feature = "postgres-store")]
async fn build_repo() -> anyhow::Result<Arc<dyn Repo>> {
    use sqlx::postgres::PgPoolOptions;
    let db_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set for postgres-store")?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await
        .context("connecting to Postgres")?;
    let repo = orderlink::repo::pg::PgRepo::new(pool);
    repo.migrate().await.context("running migrations")?;
    info!("Using Postgres repository backend");
    Ok(Arc::new(repo))
}

/// Fails fast on missing or weak required settings.
fn validate_env_vars() -> anyhow::Result<()> {
    let secret = std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
    if secret.len() < MIN_SECRET_LEN {
        bail!("JWT_SECRET must be at least {MIN_SECRET_LEN} characters long");
    }
    if std::env::var("PUBLIC_DATA_API_KEY").is_err() {
        warn!("PUBLIC_DATA_API_KEY not set, holiday lookups return the fallback");
    }
    Ok(())
}
