use crate::{
    api::handlers::{SmtpAdmin, health},
    mail::{SmtpMailer, SmtpSettings},
    reset::{Ledger, PasswordStorage, ResetWorkflow, SystemClock},
    setup::{OperatorCredentials, SetupState, SetupStatus, StaticSecretProvider},
    store::{PgStore, TransportStore, schema},
};
use anyhow::{Context, Result, anyhow};
use axum::{
    Extension,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::options,
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, error, info, info_span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;

pub mod error;
pub(crate) mod handlers;
mod openapi;

pub use openapi::openapi;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Runtime knobs for the HTTP service, resolved from the command line.
#[derive(Debug, Clone)]
pub struct Settings {
    pub frontend_origin: String,
    pub code_ttl_seconds: i64,
    pub password_storage: PasswordStorage,
    pub smtp: SmtpSettings,
    pub operator: OperatorCredentials,
}

/// Start the server
/// # Errors
/// Return error if the database is unreachable, the schema cannot be applied
/// or the listener fails
pub async fn new(port: u16, dsn: &str, settings: Settings) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")?;

    schema::apply(&pool)
        .await
        .context("Failed to apply database schema")?;

    let store = Arc::new(PgStore::new(pool.clone()));

    let transport_configured = store
        .active_transport()
        .await
        .context("Failed to read the active SMTP configuration")?
        .is_some();

    let setup = Arc::new(SetupState::new(
        SetupStatus {
            database_ready: true,
            schema_ready: true,
            transport_configured,
        },
        Arc::new(StaticSecretProvider::new(settings.operator)),
    ));

    let mailer = SmtpMailer::new(store.clone(), settings.smtp);
    let ledger = Ledger::new(store.clone(), Arc::new(SystemClock))
        .with_ttl_seconds(settings.code_ttl_seconds);
    let workflow = Arc::new(ResetWorkflow::new(
        store.clone(),
        ledger,
        Arc::new(mailer.clone()),
        settings.password_storage,
    ));
    let admin = Arc::new(SmtpAdmin::new(store, mailer));

    let frontend_origin = frontend_origin(&settings.frontend_origin)?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_origin(AllowOrigin::exact(frontend_origin));

    let (router, _openapi) = router().split_for_parts();
    let app = router
        .route("/health", options(health::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(workflow))
                .layer(Extension(admin))
                .layer(Extension(setup)),
        )
        .layer(Extension(pool));

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {err}");
            }
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_url: &str) -> Result<HeaderValue> {
    let parsed =
        Url::parse(frontend_url).with_context(|| format!("Invalid frontend origin: {frontend_url}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Frontend origin must include a valid host: {frontend_url}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontend_origin_drops_path() -> Result<()> {
        let origin = frontend_origin("http://localhost:3000/reset?x=1")?;
        assert_eq!(origin, "http://localhost:3000");

        let origin = frontend_origin("https://reset.example.com")?;
        assert_eq!(origin, "https://reset.example.com");
        Ok(())
    }

    #[test]
    fn frontend_origin_requires_host() {
        assert!(frontend_origin("not a url").is_err());
        assert!(frontend_origin("mailto:user@example.com").is_err());
    }
}
