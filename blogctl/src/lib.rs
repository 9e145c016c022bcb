//! # blogctl: blog platform backend
//!
//! `blogctl` serves the admin API of a blog. The interesting part is the request pipeline that
//! gates every protected route:
//!
//! ```text
//! request ─► session_layer ─► authenticate ─► authorize ─► listen_online ─► handler
//!             (cookie in/out)   (who?)         (may they?)   (forced out?)
//! ```
//!
//! - **Authentication** resolves the caller from the request cache, the session cookie or a
//!   bearer token, in that order. A verified token is promoted into the session. See
//!   [`auth::resolver`].
//! - **Authorization** checks the caller's roles against the matched route and method; any
//!   granting role allows, super-admins always pass. See [`auth::permissions`].
//! - **Presence** tracks who is online and lets administrators force users out. See
//!   [`auth::presence`].
//!
//! ## Responses
//!
//! Every response that reaches a handler or middleware is HTTP 200 with a
//! `{code, message, data}` body; `code == 0` is success and everything else is a business
//! error from [`errors::codes`]. HTTP 500 is produced only when a handler panics.
//!
//! ## Routes
//!
//! | Method | Path                       | Auth      |
//! |--------|----------------------------|-----------|
//! | POST   | `/api/login`               | public    |
//! | GET    | `/api/logout`              | public    |
//! | GET    | `/api/user/info`           | protected |
//! | GET    | `/api/user/online`         | protected |
//! | POST   | `/api/user/offline/{id}`   | protected |
//!
//! Protected routes are matched against the `resource` table with the `/api` prefix removed,
//! e.g. `GET /user/info`.
//!
//! ## Configuration
//!
//! See [`config`] for the file format and environment overrides.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub mod test_utils;

use std::{any::Any, sync::Arc};

use axum::{
    Json, Router,
    http::{self, HeaderValue, StatusCode},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bon::Builder;
use sqlx::{PgPool, postgres::PgPoolOptions};
use tokio::net::TcpListener;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, error, info, instrument, warn};

pub use config::Config;

use crate::{
    api::models::response::ApiResponse,
    auth::{
        middleware::{authenticate, authorize, listen_online},
        password,
        permissions::PermissionEvaluator,
        presence::{MemoryPresenceStore, PresenceTracker},
        resolver::IdentityResolver,
        session::{CookieSessionStore, MemorySessionStore, SessionStore, session_layer},
        stores::{RoleGrantStore, UserStore},
        token::TokenService,
    },
    config::{CorsOrigin, SessionBackend},
    db::{
        handlers::Users,
        models::users::UserCreateDBRequest,
        stores::{PgRoleGrantStore, PgUserStore},
    },
    errors::codes,
    types::UserId,
};

/// Application state shared across all request handlers.
///
/// Every collaborator of the auth pipeline is injected here, so tests swap the Postgres
/// stores for in-memory fakes without touching the pipeline.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config.clone())
///     .tokens(TokenService::new(&config.auth.jwt))
///     .users(Arc::new(PgUserStore::new(pool.clone())))
///     .grants(Arc::new(PgRoleGrantStore::new(pool)))
///     .sessions(create_session_store(&config))
///     .presence(PresenceTracker::new(Arc::new(MemoryPresenceStore::new()), config.auth.presence.online_ttl))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub tokens: TokenService,
    pub users: Arc<dyn UserStore>,
    pub grants: Arc<dyn RoleGrantStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub presence: PresenceTracker,
}

impl AppState {
    pub fn resolver(&self) -> IdentityResolver<'_> {
        IdentityResolver::new(&self.tokens, self.users.as_ref(), self.config.auth.store_timeout)
    }

    pub fn evaluator(&self) -> PermissionEvaluator<'_> {
        PermissionEvaluator::new(self.grants.as_ref(), self.config.auth.store_timeout)
    }
}

/// Get the blogctl database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Session backend selected by configuration
pub fn create_session_store(config: &Config) -> Arc<dyn SessionStore> {
    let session = &config.auth.session;
    match session.backend {
        SessionBackend::Cookie => Arc::new(CookieSessionStore::new(&session.secret, session.max_age)),
        SessionBackend::Memory => Arc::new(MemorySessionStore::new(session.max_age)),
    }
}

/// Ensure the super-admin account exists.
///
/// Idempotent: an existing account keeps its id and has its password replaced when one is
/// configured. Without a configured password a missing account cannot be created, and
/// `None` is returned.
#[instrument(skip_all)]
pub async fn create_initial_admin_user(username: &str, password: Option<&str>, db: &PgPool) -> Result<Option<UserId>, sqlx::Error> {
    let password_hash = match password {
        Some(pwd) => {
            Some(password::hash_password(pwd).map_err(|e| sqlx::Error::Encode(format!("Failed to hash admin password: {e}").into()))?)
        }
        None => None,
    };

    let mut tx = db.begin().await?;
    let mut user_repo = Users::new(&mut tx);

    if let Some(existing_user) = user_repo
        .get_by_username(username)
        .await
        .map_err(|e| sqlx::Error::Protocol(format!("Failed to check existing user: {e}")))?
    {
        if let Some(password_hash) = password_hash {
            user_repo
                .update_password(existing_user.id, &password_hash)
                .await
                .map_err(|e| sqlx::Error::Protocol(format!("Failed to update admin password: {e}")))?;
        }
        tx.commit().await?;
        return Ok(Some(existing_user.id));
    }

    let Some(password_hash) = password_hash else {
        warn!("Admin user '{}' does not exist and no admin_password is configured", username);
        return Ok(None);
    };

    let user_id = user_repo
        .create(&UserCreateDBRequest {
            username: username.to_string(),
            nickname: username.to_string(),
            email: None,
            password_hash,
            is_super: true,
            role_ids: vec![],
        })
        .await
        .map_err(|e| sqlx::Error::Protocol(format!("Failed to create admin user: {e}")))?;

    tx.commit().await?;
    info!("Created admin user '{}'", username);
    Ok(Some(user_id))
}

async fn setup_database(config: &Config) -> anyhow::Result<PgPool> {
    let pool_settings = &config.database.pool;
    let pool = PgPoolOptions::new()
        .max_connections(pool_settings.max_connections)
        .min_connections(pool_settings.min_connections)
        .acquire_timeout(std::time::Duration::from_secs(pool_settings.acquire_timeout_secs))
        .connect(&config.database.url)
        .await?;

    migrator().run(&pool).await?;

    create_initial_admin_user(&config.admin_username, config.admin_password.as_deref(), &pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create initial admin user: {}", e))?;

    Ok(pool)
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    for origin in &config.auth.cors.allowed_origins {
        let header_value = match origin {
            CorsOrigin::Wildcard => "*".parse::<HeaderValue>()?,
            CorsOrigin::Url(url) => url.as_str().trim_end_matches('/').parse::<HeaderValue>()?,
        };
        origins.push(header_value);
    }

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::PUT, http::Method::DELETE])
        .allow_headers([http::header::AUTHORIZATION, http::header::CONTENT_TYPE])
        .allow_credentials(config.auth.cors.allow_credentials);

    if let Some(max_age) = config.auth.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Render a handler panic. The only place the API answers with HTTP 500.
fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!("Handler panicked: {}", detail);

    let body = ApiResponse {
        code: codes::INTERNAL,
        message: "Internal server error".to_string(),
        data: (),
    };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

/// Build the application router.
///
/// Protected routes get `authenticate` → `authorize` → `listen_online` as route layers, so
/// the matched route pattern is available to the permission check. Every route runs inside
/// the session layer, CORS, request tracing and panic catching.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let protected = Router::new()
        .route("/api/user/info", get(api::handlers::users::get_user_info))
        .route("/api/user/online", get(api::handlers::users::list_online_users))
        .route("/api/user/offline/{id}", post(api::handlers::users::force_offline))
        .route_layer(from_fn_with_state(state.clone(), listen_online))
        .route_layer(from_fn_with_state(state.clone(), authorize))
        .route_layer(from_fn_with_state(state.clone(), authenticate));

    let public = Router::new()
        .route("/api/login", post(api::handlers::auth::login))
        .route("/api/logout", get(api::handlers::auth::logout));

    let router = Router::new()
        .merge(public)
        .merge(protected)
        .layer(from_fn_with_state(state.clone(), session_layer))
        .with_state(state.clone());

    let router = router
        .layer(create_cors_layer(&state.config)?)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CatchPanicLayer::custom(handle_panic));

    Ok(router)
}

/// The running service.
///
/// 1. **Create**: [`Application::new`] connects to Postgres, runs migrations, ensures the
///    admin account and builds the router
/// 2. **Serve**: [`Application::serve`] binds the port and handles requests until the
///    shutdown future resolves
pub struct Application {
    router: Router,
    config: Config,
    pool: PgPool,
}

impl Application {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting blogctl with configuration: {:#?}", config);

        let pool = setup_database(&config).await?;

        let app_state = AppState::builder()
            .config(config.clone())
            .tokens(TokenService::new(&config.auth.jwt))
            .users(Arc::new(PgUserStore::new(pool.clone())))
            .grants(Arc::new(PgRoleGrantStore::new(pool.clone())))
            .sessions(create_session_store(&config))
            .presence(PresenceTracker::new(
                Arc::new(MemoryPresenceStore::new()),
                config.auth.presence.online_ttl,
            ))
            .build();

        let router = build_router(&app_state)?;

        Ok(Self { router, config, pool })
    }

    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("blogctl listening on http://{}", bind_addr);

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Closing database connections...");
        self.pool.close().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
